/*!
Logger (C12 / C0b).

A process-wide `log::Log` implementation backing every `log::{error,
warn, info, debug, trace}!` call in the crate. Carries an atomic base
verbosity plus a thread-local override stack of depth one: a mod-API
call that wants to be extra chatty enters a
[`scoped_thread_verbosity`] region, which raises both the calling
thread's own threshold and (via a max-of-all-active-threads tracker) the
process-wide floor, so other threads briefly logging during that window
also get the extra detail.
!*/

use std::cell::Cell;
use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};

use log::{Metadata, Record};

/// Ordered the same way `log::LevelFilter` is, kept as our own type so
/// the thread-local override stack can store it in a `Cell` cheaply.
#[derive(Copy, Clone, Eq, PartialEq, PartialOrd, Ord, Debug)]
pub enum Verbosity {
	Off,
	Error,
	Warn,
	Info,
	Debug,
	Verbose,
}

impl Verbosity {
	fn to_level_filter(self) -> log::LevelFilter {
		match self {
			Verbosity::Off => log::LevelFilter::Off,
			Verbosity::Error => log::LevelFilter::Error,
			Verbosity::Warn => log::LevelFilter::Warn,
			Verbosity::Info => log::LevelFilter::Info,
			Verbosity::Debug => log::LevelFilter::Debug,
			Verbosity::Verbose => log::LevelFilter::Trace,
		}
	}

	fn from_u8(v: u8) -> Verbosity {
		match v {
			0 => Verbosity::Off,
			1 => Verbosity::Error,
			2 => Verbosity::Warn,
			3 => Verbosity::Info,
			4 => Verbosity::Debug,
			_ => Verbosity::Verbose,
		}
	}

	fn as_u8(self) -> u8 {
		self as u8
	}
}

static BASE_VERBOSITY: AtomicU8 = AtomicU8::new(Verbosity::Info as u8);

/// How many threads currently hold a raised override, tracked so the
/// process-wide floor can drop back down once the last one exits.
static RAISED_THREADS: AtomicUsize = AtomicUsize::new(0);
static RAISED_FLOOR: AtomicU8 = AtomicU8::new(Verbosity::Off as u8);

thread_local! {
	// Depth-one stack: a second nested call is rejected rather than
	// pushed, per spec's "re-entry is rejected" wording.
	static THREAD_OVERRIDE: Cell<Option<Verbosity>> = Cell::new(None);
}

pub struct DebugStreamLogger;

impl log::Log for DebugStreamLogger {
	fn enabled(&self, metadata: &Metadata) -> bool {
		metadata.level() <= effective_level_filter()
	}

	fn log(&self, record: &Record) {
		if !self.enabled(record.metadata()) {
			return;
		}
		let line = format!("{} {}\n", record.level(), record.args());
		write_debug_string(&line);
	}

	fn flush(&self) {}
}

fn effective_level_filter() -> log::LevelFilter {
	let thread_override = THREAD_OVERRIDE.with(|c| c.get());
	let base = Verbosity::from_u8(BASE_VERBOSITY.load(Ordering::Relaxed));
	let floor = Verbosity::from_u8(RAISED_FLOOR.load(Ordering::Relaxed));
	let effective = thread_override.unwrap_or(base).max(base).max(floor);
	effective.to_level_filter()
}

/// Reads the verbosity the calling thread currently logs at (its own
/// override if one is active, otherwise the process base level).
pub fn verbosity_for_current_thread() -> Verbosity {
	THREAD_OVERRIDE.with(|c| c.get()).unwrap_or_else(|| Verbosity::from_u8(BASE_VERBOSITY.load(Ordering::Relaxed)))
}

/// Installs this logger as the `log` facade's global logger. Call once,
/// from `InjectInit`.
pub fn install(initial: Verbosity) -> Result<(), log::SetLoggerError> {
	BASE_VERBOSITY.store(initial.as_u8(), Ordering::Relaxed);
	log::set_max_level(log::LevelFilter::Trace);
	log::set_logger(&DebugStreamLogger)
}

/// RAII guard: while alive, the calling thread logs at `Verbosity::Verbose`
/// and the process-wide floor is raised too, so other threads briefly
/// benefit. Dropping the guard restores both.
pub struct ScopedThreadVerbosity {
	_private: (),
}

pub fn scoped_thread_verbosity(level: Verbosity) -> ScopedThreadVerbosity {
	let already_raised = THREAD_OVERRIDE.with(|c| c.get().is_some());
	if !already_raised {
		THREAD_OVERRIDE.with(|c| c.set(Some(level)));
		let previous_count = RAISED_THREADS.fetch_add(1, Ordering::AcqRel);
		if previous_count == 0 || level.as_u8() > RAISED_FLOOR.load(Ordering::Relaxed) {
			RAISED_FLOOR.store(level.as_u8(), Ordering::Relaxed);
		}
	}
	ScopedThreadVerbosity { _private: () }
}

impl Drop for ScopedThreadVerbosity {
	fn drop(&mut self) {
		let had_override = THREAD_OVERRIDE.with(|c| c.get().is_some());
		if !had_override {
			return;
		}
		THREAD_OVERRIDE.with(|c| c.set(None));
		let remaining = RAISED_THREADS.fetch_sub(1, Ordering::AcqRel) - 1;
		if remaining == 0 {
			RAISED_FLOOR.store(Verbosity::Off.as_u8(), Ordering::Relaxed);
		}
	}
}

fn write_debug_string(line: &str) {
	let wide = crate::util::to_wide_null(line);
	unsafe {
		crate::winapi::OutputDebugStringW(wide.as_ptr());
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn scoped_verbosity_restores_previous_on_drop() {
		BASE_VERBOSITY.store(Verbosity::Info.as_u8(), Ordering::Relaxed);
		assert_eq!(verbosity_for_current_thread(), Verbosity::Info);
		{
			let _guard = scoped_thread_verbosity(Verbosity::Verbose);
			assert_eq!(verbosity_for_current_thread(), Verbosity::Verbose);
		}
		assert_eq!(verbosity_for_current_thread(), Verbosity::Info);
	}

	#[test]
	fn reentrant_scope_is_rejected_not_nested() {
		let _outer = scoped_thread_verbosity(Verbosity::Verbose);
		let before = RAISED_THREADS.load(Ordering::Relaxed);
		let _inner = scoped_thread_verbosity(Verbosity::Verbose);
		assert_eq!(RAISED_THREADS.load(Ordering::Relaxed), before);
	}
}
