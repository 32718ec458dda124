/*!
All-processes scanner (C6).

Iterates live processes via `NtGetNextProcess` (cheaper than a Toolhelp32
snapshot: it lets the kernel skip processes the caller can't open instead
of erroring out on them individually), filters by include/exclude/critical
patterns, and drives [`crate::inject`] for each matching target. Injection
is idempotent via a per-target `ProcessInitAPCMutex` living in the
session's private namespace.
!*/

use crate::error::{OsError, WhResult, WindhawkError};
use crate::inject::{self, InjectionMethod};
use crate::namespace::SessionNamespace;
use crate::patterns::PatternSet;
use crate::privilege;
use crate::process::{Process, ProcessId, ProcessRights};
use crate::process_lists;
use crate::thread::{EnumThreads, Thread, ThreadRights};
use crate::util::to_wide_null;
use crate::winapi::*;
use crate::{FromInner, IntoInner};

// `NtGetNextProcess`/`NtGetNextThread` post-date the bindings shipped by
// the pinned `ntapi` version; declared locally the same way `ntapi` itself
// declares raw `ntdll` entry points.
extern "system" {
	fn NtGetNextProcess(process: HANDLE, desired_access: u32, handle_attributes: u32, flags: u32, new_process: *mut HANDLE) -> i32;
}

/// Settings this scanner reads once per sweep.
pub struct ScanSettings {
	pub include: PatternSet,
	pub exclude: PatternSet,
	pub thread_attach_exempt: PatternSet,
	pub skip_critical_processes: bool,
}

/// Drives one `GlobalHookSessionHandleNewProcesses` sweep.
pub struct AllProcessesScanner {
	settings: ScanSettings,
	namespace_name: String,
	orch_process_handle: HANDLE,
	orch_session_mutex: HANDLE,
	engine_dll_path: std::path::PathBuf,
	log_verbosity: i32,
}

unsafe impl Send for AllProcessesScanner {}

impl AllProcessesScanner {
	pub fn new(
		settings: ScanSettings,
		namespace: &SessionNamespace,
		orch_process_handle: HANDLE,
		orch_session_mutex: HANDLE,
		engine_dll_path: std::path::PathBuf,
		log_verbosity: i32,
	) -> AllProcessesScanner {
		AllProcessesScanner {
			settings,
			namespace_name: namespace.name().to_string(),
			orch_process_handle,
			orch_session_mutex,
			engine_dll_path,
			log_verbosity,
		}
	}

	/// One sweep: iterate every live process via `NtGetNextProcess`,
	/// deciding per-process whether and how to inject.
	pub fn handle_new_processes(&self) -> WhResult<()> {
		let self_pid = Process::current().pid().map_err(WindhawkError::Os)?;
		let desired_access = required_extra_rights();
		let mut handle: HANDLE = std::ptr::null_mut();
		loop {
			let mut next: HANDLE = std::ptr::null_mut();
			// NtGetNextProcess takes ownership of `handle` (closing it) and
			// hands back a freshly opened handle to the next process, or
			// fails once the enumeration is exhausted.
			let status = unsafe { NtGetNextProcess(handle, desired_access, 0, 0, &mut next) };
			if status < 0 {
				break;
			}
			handle = next;
			let process = unsafe { Process::from_inner(handle) };
			if let Ok(pid) = process.pid() {
				if pid != self_pid {
					if let Err(err) = self.consider_process(&process, pid) {
						log::debug!("scan of pid {} skipped: {}", pid, err);
					}
				}
			}
			// Ownership of `handle` now belongs to the next NtGetNextProcess
			// call; don't let `process`'s Drop close it out from under us.
			std::mem::forget(process);
		}
		Ok(())
	}

	fn consider_process(&self, process: &Process, pid: ProcessId) -> WhResult<()> {
		if self.settings.skip_critical_processes && self.caller_lacks_debug_privilege_for(pid) {
			return Ok(());
		}

		let path = full_image_path(process)?;

		if self.settings.skip_critical_processes && process_lists::is_critical_process_path(&path) {
			return Ok(());
		}
		if !self.settings.include.matches(&path) {
			return Ok(());
		}
		if self.settings.exclude.matches(&path) {
			return Ok(());
		}
		let thread_attach_exempt = self.settings.thread_attach_exempt.matches(&path);

		match self.classify_startup_state(pid)? {
			StartupState::NotStarted(thread) => self.inject_not_started(process, pid, &thread),
			StartupState::AlreadyRunning => self.inject_already_running(process, pid, thread_attach_exempt),
		}
	}

	/// Probes whether the caller can open a session-0 process without
	/// `SeDebugPrivilege` by transiently disabling the privilege and
	/// retrying `OpenProcess`, per spec step 2 of the scan.
	fn caller_lacks_debug_privilege_for(&self, pid: ProcessId) -> bool {
		let probe = privilege::without_debug_privilege(|| Process::attach(pid, ProcessRights::new().query_limited_information()));
		probe.is_err()
	}

	/// A process "hasn't started running" if it has exactly one thread and
	/// that thread's start address is still `ntdll!RtlUserThreadStart`.
	fn classify_startup_state(&self, pid: ProcessId) -> WhResult<StartupState> {
		let mut threads = Vec::new();
		for entry in EnumThreads::create().map_err(WindhawkError::Os)? {
			if entry.process_id() == pid {
				threads.push(entry.thread_id());
				if threads.len() > 2 {
					break;
				}
			}
		}
		if threads.len() != 1 {
			return Ok(StartupState::AlreadyRunning);
		}
		let thread = Thread::attach(
			threads[0],
			false,
			ThreadRights::new().suspend_resume().get_context().query_information(),
		)
		.map_err(WindhawkError::Os)?;
		thread.suspend().map_err(WindhawkError::Os)?;
		if instruction_pointer_at_rtl_user_thread_start(&thread) {
			Ok(StartupState::NotStarted(thread))
		} else {
			thread.resume().map_err(WindhawkError::Os)?;
			Ok(StartupState::AlreadyRunning)
		}
	}

	fn apc_mutex_name(&self, pid: ProcessId) -> String {
		format!("{}\\ProcessInitAPCMutex-pid={}", self.namespace_name, pid)
	}

	fn inject_not_started(&self, process: &Process, pid: ProcessId, thread: &Thread) -> WhResult<()> {
		let name = to_wide_null(&self.apc_mutex_name(pid));
		let mutex = unsafe { CreateMutexW(std::ptr::null_mut(), TRUE, name.as_ptr()) };
		if mutex.is_null() {
			thread.resume().map_err(WindhawkError::Os)?;
			return Err(WindhawkError::Os(OsError::last()));
		}
		if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
			unsafe { CloseHandle(mutex) };
			thread.resume().map_err(WindhawkError::Os)?;
			return Ok(());
		}
		let result = inject::inject(
			process,
			InjectionMethod::Apc { suspended_thread: thread },
			self.orch_process_handle,
			self.orch_session_mutex,
			&self.engine_dll_path,
			self.log_verbosity,
		);
		unsafe {
			ReleaseMutex(mutex);
			CloseHandle(mutex);
		}
		result
	}

	fn inject_already_running(&self, process: &Process, pid: ProcessId, thread_attach_exempt: bool) -> WhResult<()> {
		let name = to_wide_null(&self.apc_mutex_name(pid));
		let existing = unsafe { OpenMutexW(SYNCHRONIZE, FALSE, name.as_ptr()) };
		if !existing.is_null() {
			unsafe { CloseHandle(existing) };
			return Ok(()); // another injector already owns this pid
		}
		inject::inject(
			process,
			InjectionMethod::RemoteThread { thread_attach_exempt },
			self.orch_process_handle,
			self.orch_session_mutex,
			&self.engine_dll_path,
			self.log_verbosity,
		)
	}
}

enum StartupState {
	NotStarted(Thread),
	AlreadyRunning,
}

fn required_extra_rights() -> u32 {
	inject::required_process_rights().into_inner() | PROCESS_QUERY_LIMITED_INFORMATION
}

fn full_image_path(process: &Process) -> WhResult<String> {
	let mut buf = vec![0u16; 1024];
	process
		.full_image_name_wide(&mut buf)
		.map(|w| crate::util::from_wide_lossy(w))
		.map_err(WindhawkError::Os)
}

/// Context retrieval (`GetThreadContext`) is architecture-specific: `Rip`
/// on x64, `Eip` on x86. A target still sitting at its loader-assigned
/// start address means no user code has run yet.
fn instruction_pointer_at_rtl_user_thread_start(thread: &Thread) -> bool {
	let ntdll = to_wide_null("ntdll.dll");
	let module = unsafe { GetModuleHandleW(ntdll.as_ptr()) };
	if module.is_null() {
		return false;
	}
	let proc_name = b"RtlUserThreadStart\0";
	let start = match unsafe { GetProcAddress(module, proc_name.as_ptr() as *const i8) } {
		Some(addr) => addr as usize,
		None => return false,
	};

	#[cfg(target_arch = "x86_64")]
	unsafe {
		let mut ctx: CONTEXT = std::mem::zeroed();
		ctx.ContextFlags = CONTEXT_CONTROL;
		if GetThreadContext(*crate::AsInner::as_inner(thread), &mut ctx) == 0 {
			return false;
		}
		ctx.Rip as usize == start
	}
	#[cfg(target_arch = "x86")]
	unsafe {
		let mut ctx: CONTEXT = std::mem::zeroed();
		ctx.ContextFlags = CONTEXT_CONTROL;
		if GetThreadContext(*crate::AsInner::as_inner(thread), &mut ctx) == 0 {
			return false;
		}
		ctx.Eip as usize == start
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn apc_mutex_name_is_namespace_scoped() {
		let settings = ScanSettings {
			include: PatternSet::parse("*"),
			exclude: PatternSet::parse(""),
			thread_attach_exempt: PatternSet::parse(""),
			skip_critical_processes: true,
		};
		let scanner = AllProcessesScanner {
			settings,
			namespace_name: "WindhawkSession1234".to_string(),
			orch_process_handle: std::ptr::null_mut(),
			orch_session_mutex: std::ptr::null_mut(),
			engine_dll_path: std::path::PathBuf::from("windhawk.dll"),
			log_verbosity: 0,
		};
		assert_eq!(
			scanner.apc_mutex_name(ProcessId::from_raw(42)),
			"WindhawkSession1234\\ProcessInitAPCMutex-pid=42"
		);
	}
}
