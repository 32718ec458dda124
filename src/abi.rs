/*!
Engine DLL exports (§6).

These four symbols are the entire surface the outside world calls by
name: `InjectInit` from the shellcode (C4) after it `LoadLibraryW`s this
DLL into a freshly targeted process, and the `GlobalHookSession*` trio
from the orchestrator's own 32-bit background scanning process, which
drives C6 against itself rather than against an injected target.
!*/

use std::ffi::c_void;

use crate::error::WhResult;
use crate::mods_manager;
use crate::namespace::SessionNamespace;
use crate::patterns::PatternSet;
use crate::process::ProcessId;
use crate::scanner::{AllProcessesScanner, ScanSettings};
use crate::session::CustomizationSession;
use crate::settings::SettingsBackend;
use crate::shellcode::LoadLibraryRemoteData;
use crate::storage::StorageManager;
use crate::winapi::*;

/// Entry point the shellcode (C4) calls after resolving us via
/// `LoadLibraryW`/`GetProcAddress`.
///
/// Once the session-manager-process liveness check below passes, the two
/// handles in `data` are considered ours to close, exactly like the
/// shellcode's own contract (step 7 of spec §4.4): it only closes them
/// itself when we're never reached at all, or when we hand back `false`.
/// Everything past that check always returns `true`; a construction
/// failure inside `CustomizationSession::start` still closes the handles,
/// it just does so on its own, slower path instead of here.
///
/// # Safety
/// `data` must point at a live [`LoadLibraryRemoteData`] with a
/// NUL-terminated UTF-16 `szDllName` immediately following the fixed
/// header, exactly as [`crate::shellcode::shellcode_entry`] writes it (or
/// a test harness emulating that layout).
#[no_mangle]
pub unsafe extern "system" fn InjectInit(data: *mut LoadLibraryRemoteData) -> i32 {
	if data.is_null() {
		return FALSE;
	}
	let data = &*data;

	if StorageManager::try_global().is_err() {
		log::error!("InjectInit: storage manager initialization failed");
		return FALSE;
	}

	let session_manager_process = data.h_session_manager_process as usize as HANDLE;
	let session_mutex = data.h_session_mutex as usize as HANDLE;

	if WaitForSingleObject(session_manager_process, 0) == WAIT_OBJECT_0 {
		log::warn!("InjectInit: session manager process is no longer running");
		return FALSE;
	}

	let running_from_apc = data.b_running_from_apc != 0;
	let thread_attach_exempt = data.b_thread_attach_exempt != 0;

	// From here on we own session_manager_process/session_mutex; `start`
	// closes them on every failure path, so this always reports success.
	CustomizationSession::start(running_from_apc, thread_attach_exempt, session_manager_process, session_mutex);
	TRUE
}

/// Only used by the x86 background process that scans every running
/// process on a timer; 64-bit orchestrators reach the same processes via
/// WOW64-aware targets without needing a dedicated scan of their own.
#[cfg(target_arch = "x86")]
#[no_mangle]
pub unsafe extern "system" fn GlobalHookSessionStart(skip_critical: BOOL) -> *mut c_void {
	if StorageManager::try_global().is_err() {
		return std::ptr::null_mut();
	}

	match build_scanner(skip_critical != 0) {
		Ok(scanner) => Box::into_raw(Box::new(scanner)) as *mut c_void,
		Err(e) => {
			log::error!("GlobalHookSessionStart: {}", e);
			std::ptr::null_mut()
		}
	}
}

#[cfg(not(target_arch = "x86"))]
#[no_mangle]
pub unsafe extern "system" fn GlobalHookSessionStart(_skip_critical: BOOL) -> *mut c_void {
	std::ptr::null_mut()
}

#[cfg(target_arch = "x86")]
fn build_scanner(skip_critical_processes: bool) -> WhResult<AllProcessesScanner> {
	// This process is itself the orchestrator (the background scanner
	// runs inside it, not inside an injected target), so the namespace
	// is keyed on our own pid and "the orchestrator's process handle"
	// is our own pseudo-handle.
	let self_pid = unsafe { GetCurrentProcessId() };
	let namespace = SessionNamespace::create(ProcessId(self_pid))?;

	let settings = StorageManager::global().settings();
	let include = PatternSet::parse(&settings.get_string("Settings", "Include")?.unwrap_or_default());
	let exclude = PatternSet::parse(&settings.get_string("Settings", "Exclude")?.unwrap_or_default());
	let thread_attach_exempt = PatternSet::parse(&settings.get_string("Settings", "ThreadAttachExempt")?.unwrap_or_default());
	let log_verbosity = settings.get_int("Settings", "LoggingVerbosity")?.unwrap_or(1);
	let engine_dll_path = StorageManager::global().paths().engine_dll(mods_manager::host_arch_dir());

	let scan_settings = ScanSettings { include, exclude, thread_attach_exempt, skip_critical_processes };

	Ok(AllProcessesScanner::new(
		scan_settings,
		&namespace,
		unsafe { GetCurrentProcess() },
		std::ptr::null_mut(),
		engine_dll_path,
		log_verbosity,
	))
}

/// Runs one sweep over every live process, injecting into whatever
/// matches. Returns `false` if `session` is null or doesn't point at a
/// live scanner.
#[cfg(target_arch = "x86")]
#[no_mangle]
pub unsafe extern "system" fn GlobalHookSessionHandleNewProcesses(session: *mut c_void) -> BOOL {
	if StorageManager::try_global().is_err() || session.is_null() {
		return FALSE;
	}
	let scanner = &*(session as *const AllProcessesScanner);
	if let Err(e) = scanner.handle_new_processes() {
		log::debug!("GlobalHookSessionHandleNewProcesses: {}", e);
	}
	TRUE
}

#[cfg(not(target_arch = "x86"))]
#[no_mangle]
pub unsafe extern "system" fn GlobalHookSessionHandleNewProcesses(_session: *mut c_void) -> BOOL {
	FALSE
}

/// Destroys a scanner created by `GlobalHookSessionStart`.
#[cfg(target_arch = "x86")]
#[no_mangle]
pub unsafe extern "system" fn GlobalHookSessionEnd(session: *mut c_void) -> BOOL {
	if session.is_null() {
		return FALSE;
	}
	drop(Box::from_raw(session as *mut AllProcessesScanner));
	TRUE
}

#[cfg(not(target_arch = "x86"))]
#[no_mangle]
pub unsafe extern "system" fn GlobalHookSessionEnd(_session: *mut c_void) -> BOOL {
	FALSE
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn inject_init_rejects_null_parameter_block() {
		assert_eq!(unsafe { InjectInit(std::ptr::null_mut()) }, FALSE);
	}
}
