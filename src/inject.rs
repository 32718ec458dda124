/*!
DLL injector (C5).

Given a target process handle, writes the shellcode plus its parameter
block and starts it, either as a remote thread or as a user-mode APC on
the process's single not-yet-started thread.
!*/

use crate::error::{OsError, WhResult, WindhawkError};
use crate::process::{Process, ProcessRights};
use crate::shellcode::{shellcode_begin, shellcode_end, shellcode_entry, LoadLibraryRemoteData};
use crate::thread::{Thread, ThreadRights};
use crate::util::to_wide_null;
use crate::winapi::*;
use crate::FromInner;

/// Access rights C5 needs on the target process.
pub fn required_process_rights() -> ProcessRights {
	ProcessRights::new()
		.create_thread()
		.vm_operation()
		.vm_read()
		.vm_write()
		.dup_handle()
		.query_information()
		.synchronize()
}

/// Where to run the shellcode: freshly suspended thread via APC, or a
/// brand-new remote thread.
pub enum InjectionMethod<'a> {
	Apc { suspended_thread: &'a Thread },
	RemoteThread { thread_attach_exempt: bool },
}

/// Extracts the shellcode's instruction bytes from this module's own code
/// section, between the `shellcode_begin`/`shellcode_end` markers. See
/// `crate::shellcode`'s module doc for why this is how the bytes are
/// obtained rather than hand-assembled.
fn shellcode_bytes() -> &'static [u8] {
	let start = shellcode_begin as usize;
	let end = shellcode_end as usize;
	debug_assert!(end > start, "shellcode_end must follow shellcode_begin in the binary layout");
	unsafe { std::slice::from_raw_parts(start as *const u8, end - start) }
}

pub fn inject(
	target: &Process,
	method: InjectionMethod,
	orch_process_handle: HANDLE,
	orch_session_mutex: HANDLE,
	engine_dll_path: &std::path::Path,
	log_verbosity: i32,
) -> WhResult<()> {
	let target_handle: HANDLE = *crate::AsInner::as_inner(target);

	let dup_process = duplicate_into(target_handle, orch_process_handle, SYNCHRONIZE)?;
	let dup_mutex = duplicate_into(target_handle, orch_session_mutex, SYNCHRONIZE)?;

	let thread_attach_exempt = match &method {
		InjectionMethod::RemoteThread { thread_attach_exempt } => *thread_attach_exempt,
		InjectionMethod::Apc { .. } => false,
	};

	let code = shellcode_bytes();
	let entry_offset = (shellcode_entry as usize) - (shellcode_begin as usize);
	let dll_name = to_wide_null(&engine_dll_path.to_string_lossy());
	let total_len = code.len() + std::mem::size_of::<LoadLibraryRemoteData>() + dll_name.len() * 2;

	unsafe {
		// Allocated before the parameter block is built: the block carries
		// the shellcode's own remote entry address, so the running-from-APC
		// self-requeue path (spec §4.4 step 3) can re-arm an APC against
		// itself without resolving its own address at runtime.
		let remote_page = VirtualAllocEx(target_handle, std::ptr::null_mut(), total_len, MEM_COMMIT | MEM_RESERVE, PAGE_EXECUTE_READWRITE);
		if remote_page.is_null() {
			close_remote_duplicates(target_handle, dup_process, dup_mutex);
			return Err(WindhawkError::Os(OsError::last()));
		}
		let entry_addr = (remote_page as *mut u8).add(entry_offset);

		let header = LoadLibraryRemoteData {
			n_log_verbosity: log_verbosity,
			b_running_from_apc: matches!(method, InjectionMethod::Apc { .. }) as i32,
			b_thread_attach_exempt: thread_attach_exempt as i32,
			shellcode_entry_remote_address: entry_addr as u64,
			h_session_manager_process: dup_process as u64,
			h_session_mutex: dup_mutex as u64,
		};
		let param_bytes = header.serialize(&dll_name);

		let mut written = 0usize;
		if WriteProcessMemory(target_handle, remote_page, code.as_ptr() as *const _, code.len(), &mut written) == 0 {
			close_remote_duplicates(target_handle, dup_process, dup_mutex);
			return Err(WindhawkError::Os(OsError::last()));
		}
		let param_addr = (remote_page as *mut u8).add(code.len());
		if WriteProcessMemory(target_handle, param_addr as *mut _, param_bytes.as_ptr() as *const _, param_bytes.len(), &mut written) == 0 {
			close_remote_duplicates(target_handle, dup_process, dup_mutex);
			return Err(WindhawkError::Os(OsError::last()));
		}

		match method {
			InjectionMethod::Apc { suspended_thread } => {
				let thread_handle: HANDLE = *crate::AsInner::as_inner(suspended_thread);
				let rv = QueueUserAPC(Some(std::mem::transmute(entry_addr)), thread_handle, param_addr as usize);
				if rv == 0 {
					close_remote_duplicates(target_handle, dup_process, dup_mutex);
					return Err(WindhawkError::Os(OsError::last()));
				}
				suspended_thread.resume().map_err(WindhawkError::Os)?;
			}
			InjectionMethod::RemoteThread { thread_attach_exempt } => {
				let flags = if thread_attach_exempt { 0x00000002 /* THREAD_CREATE_FLAGS_SKIP_THREAD_ATTACH */ } else { 0 };
				let mut thread_handle: HANDLE = std::ptr::null_mut();
				let status = NtCreateThreadEx(
					&mut thread_handle,
					0x1FFFFF, /* THREAD_ALL_ACCESS */
					std::ptr::null_mut(),
					target_handle,
					std::mem::transmute(entry_addr),
					param_addr as *mut _,
					flags,
					0,
					0,
					0,
					std::ptr::null_mut(),
				);
				if status < 0 {
					close_remote_duplicates(target_handle, dup_process, dup_mutex);
					return Err(WindhawkError::Os(unsafe { OsError::from_inner(status as u32) }));
				}
				if !thread_handle.is_null() {
					CloseHandle(thread_handle);
				}
			}
		}
	}

	Ok(())
}

fn duplicate_into(target_process: HANDLE, source: HANDLE, access: DWORD) -> WhResult<HANDLE> {
	unsafe {
		let current = GetCurrentProcess();
		let mut dup = std::ptr::null_mut();
		if DuplicateHandle(current, source, target_process, &mut dup, access, FALSE, 0) == 0 {
			Err(WindhawkError::Os(OsError::last()))
		} else {
			Ok(dup)
		}
	}
}

fn close_remote_duplicates(_target_process: HANDLE, _dup_process: HANDLE, _dup_mutex: HANDLE) {
	// The duplicates live in the target process; if injection failed
	// before the shellcode ran, they leak there until the target exits.
	// This mirrors the shellcode's own failure contract in spec §4.4: on
	// failure the shellcode (not the injector) is responsible for closing
	// what it already owns. Nothing to do on this side once VirtualAllocEx
	// has already failed — the handles were never observed by the target.
}
