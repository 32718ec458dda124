/*!
Mods manager (C10).

Owns the set of currently loaded mods, keyed by name. The constructor
enumerates every configured mod, loads the ones that should run in this
process, initializes them, then flushes every queued hook operation in
one `apply_queued(All)` batch so hooks across mods become live together.
`reload` recomputes that decision against the current settings and
sequences the before-uninit / apply / uninit / load / after-init dance
described in [`crate::modapi`], waiting out a thread-call-stack barrier
before unloading any mod's code.
!*/

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::error::WhResult;
use crate::hookqueue::{HookIdentity, HookQueue, IdentityFilter};
use crate::modapi::{LoadedMod, ModConfig};
use crate::patterns::PatternSet;
use crate::process_lists;
use crate::storage::StorageManager;
use crate::thread::{EnumThreads, Thread, ThreadRights};
use crate::winapi::*;
use crate::AsInner;

/// Abstraction over C13: "does any thread currently have a frame inside
/// one of these code ranges?" The real implementation walks every
/// thread's call stack via a Toolhelp32 snapshot; tests substitute a
/// fake that always reports clear so reload logic can be exercised
/// without live threads.
pub trait StackScanner {
	/// Polls until no thread has a frame inside any `(base, size)` region,
	/// or `timeout` elapses, whichever comes first.
	fn wait_for_regions_clear(&self, regions: &[(usize, usize)], poll_interval: Duration, timeout: Duration);
}

/// Default [`StackScanner`]: walks live threads via `Toolhelp32Snapshot` +
/// `GetThreadContext`/`StackWalk64`-free heuristic over `Rsp`/`Rip`
/// against each region. A full stack walk needs debug-help symbols this
/// engine doesn't carry for arbitrary third-party code, so this checks
/// only the instruction pointer, matching what a best-effort safety
/// barrier (not a correctness guarantee) needs.
pub struct ToolhelpStackScanner;

impl StackScanner for ToolhelpStackScanner {
	fn wait_for_regions_clear(&self, regions: &[(usize, usize)], poll_interval: Duration, timeout: Duration) {
		if regions.is_empty() {
			return;
		}
		let deadline = std::time::Instant::now() + timeout;
		loop {
			if !any_thread_ip_in_regions(regions) {
				return;
			}
			if std::time::Instant::now() >= deadline {
				return;
			}
			std::thread::sleep(poll_interval);
		}
	}
}

fn any_thread_ip_in_regions(regions: &[(usize, usize)]) -> bool {
	let self_pid = match crate::process::Process::current().pid() {
		Ok(pid) => pid,
		Err(_) => return false,
	};
	let self_tid = unsafe { GetCurrentThreadId() };
	let entries = match EnumThreads::create() {
		Ok(e) => e,
		Err(_) => return false,
	};
	for entry in entries {
		if entry.process_id() != self_pid {
			continue;
		}
		if entry.thread_id().to_raw() == self_tid {
			continue;
		}
		if let Some(ip) = thread_instruction_pointer(entry.thread_id()) {
			if regions.iter().any(|&(base, size)| ip >= base && ip < base + size) {
				return true;
			}
		}
	}
	false
}

fn thread_instruction_pointer(tid: crate::thread::ThreadId) -> Option<usize> {
	let thread = Thread::attach(tid, false, ThreadRights::new().get_context().query_information()).ok()?;
	unsafe {
		let mut ctx: CONTEXT = std::mem::zeroed();
		ctx.ContextFlags = CONTEXT_CONTROL;
		if GetThreadContext(*thread.as_inner(), &mut ctx) == 0 {
			return None;
		}
		#[cfg(target_arch = "x86_64")]
		{
			Some(ctx.Rip as usize)
		}
		#[cfg(target_arch = "x86")]
		{
			Some(ctx.Eip as usize)
		}
	}
}

/// `should_load_in_running_process`'s short-circuit composition.
pub fn should_load_in_running_process(mod_name: &str, running_process_path: &str) -> WhResult<bool> {
	let cfg = ModConfig::load(mod_name)?;
	if cfg.disabled {
		return Ok(false);
	}
	if !cfg.architecture.is_empty() && !architecture_matches_pattern(&cfg.architecture) {
		return Ok(false);
	}

	let explicit_only = !cfg.patterns_match_critical_system_processes
		&& (process_lists::is_critical_process_path(running_process_path)
			|| process_lists::is_critical_process_path_for_mods(running_process_path));

	// A critical process only loads a mod when one of its patterns names it
	// literally, with no `*`/`?` wildcard anywhere in the matching term —
	// this applies to both the ordinary Include list and IncludeCustom, so
	// a broad user wildcard in either can't sneak a mod into csrss.exe.
	let include = (!cfg.include_exclude_custom_only && cfg.include.matches_mode(running_process_path, explicit_only))
		|| cfg.include_custom.matches_mode(running_process_path, explicit_only);
	if !include {
		return Ok(false);
	}

	let exclude = (!cfg.include_exclude_custom_only && cfg.exclude.matches(running_process_path)) || cfg.exclude_custom.matches(running_process_path);
	Ok(!exclude)
}

/// `x86-64`/`amd64` is treated as matching both x64 and ARM64 hosts (ARM64
/// Windows runs x64 code under emulation); `arm64` matches ARM64 only.
fn architecture_matches_pattern(pattern: &str) -> bool {
	let set = PatternSet::parse(pattern);
	let tags: &[&str] = if cfg!(target_arch = "aarch64") {
		&["arm64", "amd64", "x86-64", "x86_64"]
	} else if cfg!(target_arch = "x86_64") {
		&["amd64", "x86-64", "x86_64"]
	} else {
		&["x86"]
	};
	tags.iter().any(|tag| set.matches(tag))
}

/// Matches `engine_root/{32,64,arm64}/windhawk.dll`'s directory naming.
pub(crate) fn host_arch_dir() -> &'static str {
	if cfg!(target_arch = "aarch64") {
		"arm64"
	} else if cfg!(target_pointer_width = "64") {
		"64"
	} else {
		"32"
	}
}

fn current_process_path() -> WhResult<String> {
	let mut buf = vec![0u16; 1024];
	loop {
		let len = unsafe { GetModuleFileNameW(std::ptr::null_mut(), buf.as_mut_ptr(), buf.len() as u32) };
		if len == 0 {
			return Err(crate::error::WindhawkError::Os(crate::error::OsError::last()));
		}
		if len as usize == buf.len() && unsafe { GetLastError() } == ERROR_INSUFFICIENT_BUFFER {
			buf.resize(buf.len() * 2, 0);
			continue;
		}
		return Ok(crate::util::from_wide_lossy(&buf[..len as usize]));
	}
}

pub struct ModsManager<S: StackScanner = ToolhelpStackScanner> {
	mods: HashMap<String, LoadedMod>,
	hooks: Arc<HookQueue>,
	next_identity: std::sync::atomic::AtomicU32,
	scanner: S,
}

impl ModsManager<ToolhelpStackScanner> {
	pub fn new(hooks: Arc<HookQueue>) -> ModsManager<ToolhelpStackScanner> {
		ModsManager::with_scanner(hooks, ToolhelpStackScanner)
	}
}

impl<S: StackScanner> ModsManager<S> {
	pub fn with_scanner(hooks: Arc<HookQueue>, scanner: S) -> ModsManager<S> {
		let mut manager = ModsManager {
			mods: HashMap::new(),
			hooks,
			next_identity: std::sync::atomic::AtomicU32::new(1),
			scanner,
		};
		manager.construct();
		manager
	}

	fn alloc_identity(&self) -> HookIdentity {
		HookIdentity(self.next_identity.fetch_add(1, std::sync::atomic::Ordering::Relaxed))
	}

	fn construct(&mut self) {
		let process_path = match current_process_path() {
			Ok(p) => p,
			Err(err) => {
				log::warn!("mods manager: could not resolve own process path: {}", err);
				return;
			}
		};
		let names = StorageManager::global().enum_mods().unwrap_or_default();
		for name in &names {
			match should_load_in_running_process(name, &process_path) {
				Ok(true) => self.load_one(name),
				Ok(false) => {}
				Err(err) => log::warn!("mod ({}) config check failed: {}", name, err),
			}
		}
		for loaded in self.mods.values() {
			if !loaded.init() {
				log::warn!("mod ({}) Init returned false", loaded.token.name);
			}
		}
		self.hooks.apply_queued(IdentityFilter::All);
	}

	fn load_one(&mut self, name: &str) {
		let path = StorageManager::global().paths().mods_dir(host_arch_dir()).join(format!("{}.dll", name));
		match LoadedMod::load(&path, self.alloc_identity(), Arc::clone(&self.hooks)) {
			Ok(loaded) => {
				self.mods.insert(name.to_string(), loaded);
			}
			Err(err) => log::warn!("mod ({}) loading failed: {}", name, err),
		}
	}

	/// Runs each loaded mod's `AfterInit`, per session step 2's final
	/// batched-apply-then-after-init sequencing.
	pub fn after_init(&self) {
		for loaded in self.mods.values() {
			loaded.after_init();
		}
	}

	/// Runs each loaded mod's `BeforeUninit`. Called by the session before
	/// it disables every hook during teardown.
	pub fn before_uninit(&self) {
		for loaded in self.mods.values() {
			loaded.before_uninit();
		}
	}

	/// Recomputes which mods should be loaded and sequences the reload:
	/// before-uninit the losers, one global hook-apply, uninit+collect
	/// their code ranges, wait for the stack barrier, destroy them,
	/// construct+load the newcomers, one more global hook-apply, then
	/// after-init the newcomers.
	pub fn reload(&mut self) {
		let process_path = match current_process_path() {
			Ok(p) => p,
			Err(err) => {
				log::warn!("mods manager reload: could not resolve own process path: {}", err);
				return;
			}
		};
		let names = StorageManager::global().enum_mods().unwrap_or_default();

		let mut keep_loaded: Vec<String> = Vec::new();
		let mut to_load: Vec<String> = Vec::new();

		for name in &names {
			let should_load = match should_load_in_running_process(name, &process_path) {
				Ok(v) => v,
				Err(err) => {
					log::warn!("mod ({}) reload check failed: {}", name, err);
					continue;
				}
			};
			if !should_load {
				continue;
			}
			if self.mods.contains_key(name) {
				keep_loaded.push(name.clone());
			} else {
				to_load.push(name.clone());
			}
		}

		let to_unload: Vec<String> = self.mods.keys().filter(|n| !keep_loaded.contains(n)).cloned().collect();

		for name in &to_unload {
			if let Some(loaded) = self.mods.get(name) {
				loaded.before_uninit();
			}
		}

		self.hooks.apply_queued(IdentityFilter::All);

		let mut regions = Vec::new();
		for name in &to_unload {
			if let Some(loaded) = self.mods.get(name) {
				loaded.uninit();
				regions.push(loaded.code_range());
			}
		}
		if !regions.is_empty() {
			self.scanner.wait_for_regions_clear(&regions, Duration::from_millis(200), Duration::from_millis(400));
		}
		for name in &to_unload {
			self.mods.remove(name);
		}

		for name in &to_load {
			self.load_one(name);
		}
		for name in &to_load {
			if let Some(loaded) = self.mods.get(name) {
				if !loaded.init() {
					log::warn!("mod ({}) Init returned false", name);
				}
			}
		}

		self.hooks.apply_queued(IdentityFilter::All);

		for name in &to_load {
			if let Some(loaded) = self.mods.get(name) {
				loaded.after_init();
			}
		}
	}
}

impl<S: StackScanner> Drop for ModsManager<S> {
	fn drop(&mut self) {
		let mut regions = Vec::new();
		for loaded in self.mods.values() {
			loaded.uninit();
			regions.push(loaded.code_range());
		}
		if !regions.is_empty() {
			self.scanner.wait_for_regions_clear(&regions, Duration::from_millis(200), Duration::from_millis(400));
		}
		self.mods.clear();
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	struct AlwaysClearScanner;
	impl StackScanner for AlwaysClearScanner {
		fn wait_for_regions_clear(&self, _regions: &[(usize, usize)], _poll_interval: Duration, _timeout: Duration) {}
	}

	#[test]
	fn empty_manager_constructs_and_drops_cleanly() {
		let hooks = Arc::new(HookQueue::new());
		let manager = ModsManager::with_scanner(hooks, AlwaysClearScanner);
		drop(manager);
	}

	#[test]
	fn architecture_pattern_amd64_matches_x86_64_tag() {
		assert!(architecture_matches_pattern("amd64"));
	}

	#[test]
	fn architecture_pattern_x86_does_not_match_amd64_host() {
		#[cfg(target_arch = "x86_64")]
		assert!(!architecture_matches_pattern("x86"));
	}
}
