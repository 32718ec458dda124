/*!
New-process interceptor (C7).

Installs an inline hook on the internal, extended-parameter form of
`CreateProcessW` that `kernelbase.dll`/`kernel32.dll` actually call
through, so children are caught suspended at birth and can be injected
before their first instruction runs.
!*/

use std::ffi::CString;
use std::os::raw::c_int;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::OnceLock;

use detour::RawDetour;
use parking_lot::Mutex;

use crate::error::{OsError, WhResult, WindhawkError};
use crate::inject::{self, InjectionMethod};
use crate::namespace::SessionNamespace;
use crate::patterns::PatternSet;
use crate::process::Process;
use crate::thread::Thread;
use crate::util::to_wide_null;
use crate::winapi::*;
use crate::FromInner;

const CREATE_SUSPENDED_FLAG: u32 = CREATE_SUSPENDED;

/// Extended-parameter form `kernelbase!CreateProcessInternalW` actually
/// implements; `CreateProcessW` is a thin wrapper over it with
/// `hUserToken`/`hRestrictedUserToken` fixed to null.
type CreateProcessInternalWFn = unsafe extern "system" fn(
	h_user_token: HANDLE,
	lp_application_name: LPCWSTR,
	lp_command_line: LPWSTR,
	lp_process_attributes: LPSECURITY_ATTRIBUTES,
	lp_thread_attributes: LPSECURITY_ATTRIBUTES,
	b_inherit_handles: BOOL,
	dw_creation_flags: DWORD,
	lp_environment: LPVOID,
	lp_current_directory: LPCWSTR,
	lp_startup_info: LPSTARTUPINFOW,
	lp_process_information: LPPROCESS_INFORMATION,
	h_restricted_user_token: *mut HANDLE,
) -> BOOL;

struct State {
	detour: RawDetour,
	original: CreateProcessInternalWFn,
}

unsafe impl Send for State {}

static STATE: OnceLock<Mutex<Option<State>>> = OnceLock::new();
static REENTRANCY: AtomicUsize = AtomicUsize::new(0);
static CONFIG: OnceLock<Mutex<HookConfig>> = OnceLock::new();

struct HookConfig {
	namespace_name: String,
	orch_process_handle: HANDLE,
	orch_session_mutex: HANDLE,
	engine_dll_path: std::path::PathBuf,
	log_verbosity: i32,
	exclude: PatternSet,
	include: PatternSet,
	thread_attach_exempt: PatternSet,
}

/// Installs the hook; idempotent (a second call is a no-op while one is
/// already installed, matching the "only one instance per process" rule).
pub fn install(
	namespace: &SessionNamespace,
	orch_process_handle: HANDLE,
	orch_session_mutex: HANDLE,
	engine_dll_path: std::path::PathBuf,
	log_verbosity: i32,
	include: PatternSet,
	exclude: PatternSet,
	thread_attach_exempt: PatternSet,
) -> WhResult<()> {
	let cfg = HookConfig {
		namespace_name: namespace.name().to_string(),
		orch_process_handle,
		orch_session_mutex,
		engine_dll_path,
		log_verbosity,
		exclude,
		include,
		thread_attach_exempt,
	};
	*CONFIG.get_or_init(|| Mutex::new(empty_config())).lock() = cfg;

	let slot = STATE.get_or_init(|| Mutex::new(None));
	let mut guard = slot.lock();
	if guard.is_some() {
		return Ok(());
	}

	let target = resolve_target()?;
	unsafe {
		let detour = RawDetour::new(target as *const (), hooked_create_process_internal_w as *const ())
			.map_err(|e| WindhawkError::Config(format!("detour init failed: {}", e)))?;
		detour.enable().map_err(|e| WindhawkError::Config(format!("detour enable failed: {}", e)))?;
		let original: CreateProcessInternalWFn = std::mem::transmute(detour.trampoline());
		*guard = Some(State { detour, original });
	}
	Ok(())
}

/// Removes the hook once reentrancy drops to zero, per spec's destructor
/// contract (spins until in-flight hook calls finish, then unhooks).
pub fn uninstall() {
	let slot = match STATE.get() {
		Some(s) => s,
		None => return,
	};
	while REENTRANCY.load(Ordering::Acquire) != 0 {
		std::thread::yield_now();
	}
	let mut guard = slot.lock();
	if let Some(state) = guard.take() {
		unsafe {
			let _ = state.detour.disable();
		}
	}
}

fn resolve_target() -> WhResult<usize> {
	for (module, symbol) in [("kernelbase.dll", "CreateProcessInternalW"), ("kernel32.dll", "CreateProcessInternalW")] {
		if let Some(addr) = module_symbol_address(module, symbol) {
			return Ok(addr);
		}
	}
	Err(WindhawkError::SymbolRequired("CreateProcessInternalW".to_string()))
}

fn module_symbol_address(module: &str, symbol: &str) -> Option<usize> {
	let wide = to_wide_null(module);
	let symbol = CString::new(symbol).ok()?;
	unsafe {
		let handle = GetModuleHandleW(wide.as_ptr());
		if handle.is_null() {
			return None;
		}
		GetProcAddress(handle, symbol.as_ptr() as *const i8).map(|f| f as usize)
	}
}

unsafe extern "system" fn hooked_create_process_internal_w(
	h_user_token: HANDLE,
	lp_application_name: LPCWSTR,
	lp_command_line: LPWSTR,
	lp_process_attributes: LPSECURITY_ATTRIBUTES,
	lp_thread_attributes: LPSECURITY_ATTRIBUTES,
	b_inherit_handles: BOOL,
	dw_creation_flags: DWORD,
	lp_environment: LPVOID,
	lp_current_directory: LPCWSTR,
	lp_startup_info: LPSTARTUPINFOW,
	lp_process_information: LPPROCESS_INFORMATION,
	h_restricted_user_token: *mut HANDLE,
) -> BOOL {
	REENTRANCY.fetch_add(1, Ordering::AcqRel);
	let original = {
		let slot = STATE.get().expect("hook installed before it can fire");
		slot.lock().as_ref().expect("hook state present while installed").original
	};

	let caller_requested_suspended = dw_creation_flags & CREATE_SUSPENDED_FLAG != 0;
	let forced_flags = dw_creation_flags | CREATE_SUSPENDED_FLAG;

	let result = original(
		h_user_token,
		lp_application_name,
		lp_command_line,
		lp_process_attributes,
		lp_thread_attributes,
		b_inherit_handles,
		forced_flags,
		lp_environment,
		lp_current_directory,
		lp_startup_info,
		lp_process_information,
		h_restricted_user_token,
	);

	if result != 0 && !lp_process_information.is_null() {
		if let Err(err) = on_child_created(&*lp_process_information, caller_requested_suspended) {
			log::debug!("new-process hook: {}", err);
		}
	}

	REENTRANCY.fetch_sub(1, Ordering::AcqRel);
	result
}

fn on_child_created(info: &PROCESS_INFORMATION, caller_requested_suspended: bool) -> WhResult<()> {
	let cfg_slot = CONFIG.get().ok_or(WindhawkError::InvalidState("hook fired before configuration was set"))?;
	let cfg = cfg_slot.lock();

	let process = unsafe { Process::from_inner(info.hProcess) };
	let pid = process.pid().map_err(WindhawkError::Os)?;
	let path = {
		let mut buf = vec![0u16; 1024];
		process
			.full_image_name_wide(&mut buf)
			.map(|w| crate::util::from_wide_lossy(w))
			.unwrap_or_default()
	};
	std::mem::forget(process); // handle belongs to PROCESS_INFORMATION, caller owns it

	if !cfg.include.matches(&path) || cfg.exclude.matches(&path) {
		return Ok(());
	}
	let thread_attach_exempt = cfg.thread_attach_exempt.matches(&path);

	let mutex_name = to_wide_null(&format!("{}\\ProcessInitAPCMutex-pid={}", cfg.namespace_name, pid));
	let mutex = unsafe { CreateMutexW(std::ptr::null_mut(), FALSE, mutex_name.as_ptr()) };
	if mutex.is_null() {
		return Err(WindhawkError::Os(OsError::last()));
	}
	if unsafe { GetLastError() } == ERROR_ALREADY_EXISTS {
		unsafe {
			WaitForSingleObject(mutex, INFINITE);
			CloseHandle(mutex);
		}
		return Ok(());
	}

	let process = unsafe { Process::from_inner(info.hProcess) };
	let thread = unsafe { Thread::from_inner(info.hThread) };
	let inject_result = inject::inject(
		&process,
		InjectionMethod::Apc { suspended_thread: &thread },
		cfg.orch_process_handle,
		cfg.orch_session_mutex,
		&cfg.engine_dll_path,
		cfg.log_verbosity,
	);
	std::mem::forget(process);
	std::mem::forget(thread);

	unsafe {
		ReleaseMutex(mutex);
		CloseHandle(mutex);
	}

	if !caller_requested_suspended {
		unsafe {
			ResumeThread(info.hThread);
		}
	}

	inject_result
}

fn empty_config() -> HookConfig {
	HookConfig {
		namespace_name: String::new(),
		orch_process_handle: std::ptr::null_mut(),
		orch_session_mutex: std::ptr::null_mut(),
		engine_dll_path: std::path::PathBuf::new(),
		log_verbosity: 0,
		exclude: PatternSet::parse(""),
		include: PatternSet::parse(""),
		thread_attach_exempt: PatternSet::parse(""),
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn reentrancy_counter_round_trips() {
		REENTRANCY.store(0, Ordering::SeqCst);
		REENTRANCY.fetch_add(1, Ordering::AcqRel);
		REENTRANCY.fetch_sub(1, Ordering::AcqRel);
		assert_eq!(REENTRANCY.load(Ordering::SeqCst), 0);
	}
}
