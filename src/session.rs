/*!
Customization session (C11).

Entered once per target process, from the engine DLL's `InjectInit`
export. Owns the hooking engine's apply-batch, the mods manager and the
new-process interceptor, and runs the event loop that waits for either
the orchestrator process to exit or a mod-config change to reload.

A `static` never runs its destructor on ordinary process exit, so unlike
the original engine's "don't destruct while terminating" workaround,
nothing here needs to special-case process termination: the session is
reached only through an `AtomicPtr`, and the only place that ever turns
it back into an owned `Box` (running its `Drop`, which unwinds the mods
manager through `before_uninit`/the stack barrier) is `delete_this`,
called from the event-loop thread's own teardown path.
!*/

use std::ffi::c_void;
use std::sync::atomic::{AtomicPtr, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{OsError, WhResult, WindhawkError};
use crate::hookqueue::{HookQueue, IdentityFilter};
use crate::mods_manager::{self, ModsManager, ToolhelpStackScanner};
use crate::namespace::SessionNamespace;
use crate::new_process;
use crate::patterns::PatternSet;
use crate::process::ProcessId;
use crate::settings::SettingsBackend;
use crate::storage::{ModConfigChangeNotification, StorageManager};
use crate::util::to_wide_null;
use crate::winapi::*;

/// `NtCreateThreadEx`'s `THREAD_CREATE_FLAGS_SKIP_THREAD_ATTACH`: suppress
/// TLS callbacks and `DllMain(DLL_THREAD_ATTACH)` notifications for every
/// DLL in the process on this thread, because we may be running before
/// the CRT of some of them has finished initializing.
const THREAD_CREATE_FLAGS_SKIP_THREAD_ATTACH: u32 = 0x0000_0002;

/// How long the event loop waits after a config-change signal before
/// acting on it, to coalesce bursts of several settings writes.
const CONFIG_CHANGE_COALESCE_MILLIS: u32 = 200;

static SESSION: AtomicPtr<CustomizationSession> = AtomicPtr::new(std::ptr::null_mut());
static SESSION_MANAGER_PROCESS: AtomicPtr<c_void> = AtomicPtr::new(std::ptr::null_mut());

/// Per-process state created by `InjectInit` and torn down by the event
/// loop when the orchestrator exits.
pub struct CustomizationSession {
	thread_attach_exempt: bool,
	session_manager_process: HANDLE,
	session_mutex: HANDLE,
	session_semaphore: HANDLE,
	hooks: Arc<HookQueue>,
	mods_manager: Mutex<ModsManager<ToolhelpStackScanner>>,
}

unsafe impl Send for CustomizationSession {}
unsafe impl Sync for CustomizationSession {}

impl CustomizationSession {
	/// Step 1-2 of spec.md 4.11: acquire the per-process semaphore, build
	/// the singleton, apply every queued hook once, then `after_init`.
	/// Returns `false` if a session is already live in this process or if
	/// construction failed; the caller (`InjectInit`) surfaces that as its
	/// own `false` return.
	///
	/// The caller hands over ownership of both handles on every path past
	/// its own "orchestrator already gone" check, mirroring the original's
	/// "we return TRUE from now on" contract: every failure branch below
	/// closes them rather than leaving that to a caller who now believes
	/// it doesn't own them.
	pub fn start(running_from_apc: bool, thread_attach_exempt: bool, session_manager_process: HANDLE, session_mutex: HANDLE) -> bool {
		let semaphore = match acquire_session_semaphore() {
			Ok(Some(h)) => h,
			Ok(None) => {
				log::warn!("a customization session is already active in this process");
				close_owned_handles(session_manager_process, session_mutex);
				return false;
			}
			Err(e) => {
				log::error!("session semaphore acquisition failed: {}", e);
				close_owned_handles(session_manager_process, session_mutex);
				return false;
			}
		};

		SESSION_MANAGER_PROCESS.store(session_manager_process as *mut c_void, Ordering::Release);

		let session = match CustomizationSession::construct(thread_attach_exempt, session_manager_process, session_mutex, semaphore) {
			Ok(session) => session,
			Err(e) => {
				log::error!("customization session construction failed: {}", e);
				release_and_close_semaphore(semaphore);
				SESSION_MANAGER_PROCESS.store(std::ptr::null_mut(), Ordering::Release);
				close_owned_handles(session_manager_process, session_mutex);
				return false;
			}
		};

		let ptr = Box::into_raw(Box::new(session));
		if SESSION.compare_exchange(std::ptr::null_mut(), ptr, Ordering::AcqRel, Ordering::Acquire).is_err() {
			// The semaphore already serializes this; a racing second
			// pointer shouldn't be reachable. Stay defensive anyway.
			unsafe { drop(Box::from_raw(ptr)) };
			return false;
		}

		if running_from_apc {
			CustomizationSession::start_from_apc(ptr);
		} else {
			// A dedicated thread was already created for us before
			// injection; just run the event loop on it directly.
			unsafe { (*ptr).run_and_delete_this() };
		}
		true
	}

	fn construct(
		thread_attach_exempt: bool,
		session_manager_process: HANDLE,
		session_mutex: HANDLE,
		session_semaphore: HANDLE,
	) -> WhResult<CustomizationSession> {
		let hooks = Arc::new(HookQueue::new());
		let mods_manager = ModsManager::new(Arc::clone(&hooks));

		let orch_pid = unsafe { GetProcessId(session_manager_process) };
		if orch_pid == 0 {
			return Err(WindhawkError::Os(OsError::last()));
		}
		let namespace = SessionNamespace::create(ProcessId(orch_pid))?;

		let settings = StorageManager::global().settings();
		let include = PatternSet::parse(&settings.get_string("Settings", "Include")?.unwrap_or_default());
		let exclude = PatternSet::parse(&settings.get_string("Settings", "Exclude")?.unwrap_or_default());
		let thread_attach_exempt_pattern =
			PatternSet::parse(&settings.get_string("Settings", "ThreadAttachExempt")?.unwrap_or_default());
		let log_verbosity = settings.get_int("Settings", "LoggingVerbosity")?.unwrap_or(1);
		let engine_dll_path = StorageManager::global().paths().engine_dll(mods_manager::host_arch_dir());

		new_process::install(
			&namespace,
			session_manager_process,
			session_mutex,
			engine_dll_path,
			log_verbosity,
			include,
			exclude,
			thread_attach_exempt_pattern,
		)?;

		hooks.apply_queued(IdentityFilter::All);

		let session = CustomizationSession {
			thread_attach_exempt,
			session_manager_process,
			session_mutex,
			session_semaphore,
			hooks,
			mods_manager: Mutex::new(mods_manager),
		};
		session.mods_manager.lock().after_init();
		Ok(session)
	}

	/// Step 3: running from APC means the engine DLL's own `DllMain` ran
	/// inside that APC, so further code on this thread must not trigger
	/// TLS/DllMain callbacks in other DLLs. Bump our own refcount and hand
	/// off to a freshly created, exempt thread to run the event loop.
	fn start_from_apc(self_ptr: *mut CustomizationSession) {
		let module = bump_own_refcount();
		let flags = THREAD_CREATE_FLAGS_SKIP_THREAD_ATTACH;
		if create_self_thread(apc_thread_entry, self_ptr as *mut c_void, flags).is_none() {
			log::error!("failed to create session event-loop thread: {}", OsError::last());
			unsafe { FreeLibrary(module) };
			delete_this(self_ptr);
		}
	}

	/// Either the plain "run then tear down" path (when patterns already
	/// requested `thread_attach_exempt`, so there is no need to ever drop
	/// the exempt flag), or the self-rethreading path that re-creates this
	/// thread without the flag the first time a config change fires.
	fn run_and_delete_this(&self) {
		self.run(None);
		delete_this(self as *const _ as *mut CustomizationSession);
	}

	/// spec.md 4.11 step 4: wait on `{orch_process_handle, mod_config_change}`.
	/// `exit_on_config_change`, when given, makes the loop return instead of
	/// reloading in place the first time a change fires — used by the
	/// self-rethreading path so the reload itself happens on the
	/// newly-recreated, non-exempt thread.
	fn run(&self, mut exit_on_config_change: Option<&mut bool>) {
		let notification = match ModConfigChangeNotification::new(StorageManager::global().paths()) {
			Ok(n) => Some(n),
			Err(e) => {
				log::error!("mod config change notification setup failed: {}", e);
				None
			}
		};

		loop {
			let handles = [self.session_manager_process, notification.as_ref().map_or(std::ptr::null_mut(), |n| n.get_handle())];
			let count = if notification.is_some() { 2 } else { 1 };
			let wait_result = unsafe { WaitForMultipleObjects(count, handles.as_ptr(), FALSE, INFINITE) };

			if wait_result == WAIT_OBJECT_0 {
				break;
			}
			if wait_result == WAIT_OBJECT_0 + 1 {
				if unsafe { WaitForSingleObject(self.session_manager_process, CONFIG_CHANGE_COALESCE_MILLIS) } == WAIT_OBJECT_0 {
					break;
				}
				if let Some(flag) = exit_on_config_change.as_deref_mut() {
					*flag = true;
					break;
				}
				self.mods_manager.lock().reload();
				if let Some(n) = notification.as_ref() {
					if let Err(e) = n.continue_monitoring() {
						log::warn!("rearming mod config notification failed: {}", e);
						break;
					}
				}
				continue;
			}
			log::warn!("session event loop wait returned {:#x}, last error {}", wait_result, OsError::last());
			break;
		}
		log::debug!("exiting session event loop");
	}

	/// Returns true once the orchestrator process handle is signaled,
	/// letting long-running mod operations bail out early.
	pub fn is_ending_soon() -> bool {
		let handle = SESSION_MANAGER_PROCESS.load(Ordering::Acquire);
		!handle.is_null() && unsafe { WaitForSingleObject(handle as HANDLE, 0) } == WAIT_OBJECT_0
	}

	pub fn get_session_manager_pid() -> WhResult<u32> {
		let handle = SESSION_MANAGER_PROCESS.load(Ordering::Acquire);
		if handle.is_null() {
			return Err(WindhawkError::InvalidState("no active customization session"));
		}
		let pid = unsafe { GetProcessId(handle as HANDLE) };
		if pid == 0 {
			Err(WindhawkError::Os(OsError::last()))
		} else {
			Ok(pid)
		}
	}

	pub fn get_session_manager_process_create_time() -> WhResult<FILETIME> {
		let handle = SESSION_MANAGER_PROCESS.load(Ordering::Acquire);
		if handle.is_null() {
			return Err(WindhawkError::InvalidState("no active customization session"));
		}
		unsafe {
			let mut creation: FILETIME = std::mem::zeroed();
			let mut exit: FILETIME = std::mem::zeroed();
			let mut kernel: FILETIME = std::mem::zeroed();
			let mut user: FILETIME = std::mem::zeroed();
			if GetProcessTimes(handle as HANDLE, &mut creation, &mut exit, &mut kernel, &mut user) == 0 {
				Err(WindhawkError::Os(OsError::last()))
			} else {
				Ok(creation)
			}
		}
	}
}

/// Step 5: `mods.before_uninit()`, disable every hook, destroy the mods
/// manager (which runs the thread-call-stack barrier), then release the
/// session semaphore only after that destruction has returned.
fn delete_this(ptr: *mut CustomizationSession) {
	if SESSION.compare_exchange(ptr, std::ptr::null_mut(), Ordering::AcqRel, Ordering::Acquire).is_err() {
		log::error!("delete_this called on a session pointer that wasn't current");
		return;
	}
	let session = unsafe { Box::from_raw(ptr) };
	session.mods_manager.lock().before_uninit();
	session.hooks.apply_queued(IdentityFilter::All);
	new_process::uninstall();
	let semaphore = session.session_semaphore;
	let session_mutex = session.session_mutex;
	let session_manager_process = session.session_manager_process;
	drop(session); // runs ModsManager's Drop: uninit + stack barrier.
	release_and_close_semaphore(semaphore);
	unsafe {
		CloseHandle(session_mutex);
		CloseHandle(session_manager_process);
	}
	SESSION_MANAGER_PROCESS.store(std::ptr::null_mut(), Ordering::Release);
}

fn acquire_session_semaphore() -> WhResult<Option<HANDLE>> {
	let name = to_wide_null(&format!("WindhawkCustomizationSessionSemaphore-pid={}", std::process::id()));
	let handle = unsafe { CreateSemaphoreW(std::ptr::null_mut(), 1, 1, name.as_ptr()) };
	if handle.is_null() {
		return Err(WindhawkError::Os(OsError::last()));
	}
	match unsafe { WaitForSingleObject(handle, 0) } {
		WAIT_OBJECT_0 => Ok(Some(handle)),
		_ => {
			unsafe { CloseHandle(handle) };
			Ok(None)
		}
	}
}

fn release_and_close_semaphore(handle: HANDLE) {
	unsafe {
		ReleaseSemaphore(handle, 1, std::ptr::null_mut());
		CloseHandle(handle);
	}
}

/// Closes both handles `start` was handed, for every path where session
/// construction doesn't end up owning them itself.
fn close_owned_handles(session_manager_process: HANDLE, session_mutex: HANDLE) {
	unsafe {
		CloseHandle(session_manager_process);
		CloseHandle(session_mutex);
	}
}

fn bump_own_refcount() -> HMODULE {
	let addr = crate::module::image_base();
	let mut out: HMODULE = std::ptr::null_mut();
	unsafe { GetModuleHandleExW(GET_MODULE_HANDLE_EX_FLAG_FROM_ADDRESS, addr as LPCWSTR, &mut out) };
	out
}

fn create_self_thread(entry: unsafe extern "system" fn(LPVOID) -> DWORD, param: *mut c_void, flags: u32) -> Option<HANDLE> {
	unsafe {
		let mut thread_handle: HANDLE = std::ptr::null_mut();
		let status = NtCreateThreadEx(
			&mut thread_handle,
			0x1FFFFF, /* THREAD_ALL_ACCESS */
			std::ptr::null_mut(),
			GetCurrentProcess(),
			std::mem::transmute(entry),
			param,
			flags,
			0,
			0,
			0,
			std::ptr::null_mut(),
		);
		if status < 0 || thread_handle.is_null() {
			None
		} else {
			Some(thread_handle)
		}
	}
}

unsafe extern "system" fn apc_thread_entry(param: LPVOID) -> DWORD {
	SetThreadErrorMode(SEM_FAILCRITICALERRORS, std::ptr::null_mut());
	let ptr = param as *mut CustomizationSession;
	let session = &*ptr;
	if session.thread_attach_exempt {
		session.run(None);
		delete_this(ptr);
	} else {
		run_and_delete_this_with_thread_recreate(ptr);
	}
	FreeLibraryAndExitThread(crate::module::image_base(), 0);
	0
}

/// The first time a config change fires on the exempt thread, stop and
/// re-create the thread without the exempt flag before actually
/// reloading, so any DLL callbacks a reload triggers see normal
/// TLS/DllMain semantics from here on.
fn run_and_delete_this_with_thread_recreate(ptr: *mut CustomizationSession) {
	let session = unsafe { &*ptr };
	let mut config_changed = false;
	session.run(Some(&mut config_changed));

	let module = bump_own_refcount();
	let entry: unsafe extern "system" fn(LPVOID) -> DWORD =
		if config_changed { recreated_thread_entry_with_reload } else { recreated_thread_entry_plain };
	if create_self_thread(entry, ptr as *mut c_void, 0).is_none() {
		log::error!("failed to recreate session thread: {}", OsError::last());
		unsafe { FreeLibrary(module) };
		delete_this(ptr);
	}
}

unsafe extern "system" fn recreated_thread_entry_with_reload(param: LPVOID) -> DWORD {
	SetThreadErrorMode(SEM_FAILCRITICALERRORS, std::ptr::null_mut());
	let ptr = param as *mut CustomizationSession;
	let session = &*ptr;
	session.mods_manager.lock().reload();
	session.run(None);
	delete_this(ptr);
	FreeLibraryAndExitThread(crate::module::image_base(), 0);
	0
}

unsafe extern "system" fn recreated_thread_entry_plain(param: LPVOID) -> DWORD {
	SetThreadErrorMode(SEM_FAILCRITICALERRORS, std::ptr::null_mut());
	let ptr = param as *mut CustomizationSession;
	delete_this(ptr);
	FreeLibraryAndExitThread(crate::module::image_base(), 0);
	0
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn session_manager_helpers_fail_cleanly_with_no_active_session() {
		SESSION_MANAGER_PROCESS.store(std::ptr::null_mut(), Ordering::Release);
		assert!(CustomizationSession::get_session_manager_pid().is_err());
		assert!(CustomizationSession::get_session_manager_process_create_time().is_err());
		assert!(!CustomizationSession::is_ending_soon());
	}
}
