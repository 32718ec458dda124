/*!
Injection shellcode (C4).

A position-independent routine, written as an ordinary Rust function but
built and extracted the way the original engine's
`inject_shellcode/main.cpp` is: compiled with no imports and no `.rdata`
string literals, then its instruction bytes are copied out of this
module's own code section (between the `shellcode_begin`/`shellcode_end`
markers below) and written into the target process by [`crate::inject`].

Every string the resolver needs (`"KERNEL32.DLL"`, export names, …) is
built on the stack character-by-character so the compiler cannot place it
in `.rdata` — a rodata reference would be an absolute address the loader
would need to relocate, which position-independent shellcode cannot rely
on.
!*/

#![allow(non_snake_case)]

use std::mem::size_of;

/// Parameter block laid out identically on 32-bit and 64-bit: the two
/// handle slots are padded to 8 bytes so field offsets match between
/// architectures, per the spec's cross-architecture note.
#[repr(C)]
pub struct LoadLibraryRemoteData {
	pub n_log_verbosity: i32,
	pub b_running_from_apc: i32,
	pub b_thread_attach_exempt: i32,
	/// The remote address of `shellcode_entry` itself, in the same copy of
	/// the shellcode this block rides along with. Only consulted by the
	/// running-from-APC self-requeue path (spec §4.4 step 3): re-arming an
	/// APC needs the address to queue, and the routine cannot resolve its
	/// own load address without an import.
	pub shellcode_entry_remote_address: u64,
	pub h_session_manager_process: u64,
	pub h_session_mutex: u64,
	// szDllName follows as a flexible UTF-16 array; callers append it after
	// this fixed header when writing the block into the target.
}

pub const LOG_SILENT: i32 = 0;
pub const LOG_ERRORS: i32 = 1;
pub const LOG_VERBOSE: i32 = 2;

impl LoadLibraryRemoteData {
	/// Serializes the fixed header plus a NUL-terminated UTF-16 DLL path
	/// into one contiguous byte buffer ready to `VirtualAllocEx` + write
	/// into a target process.
	pub fn serialize(&self, dll_path: &[u16]) -> Vec<u8> {
		let header_size = size_of::<LoadLibraryRemoteData>();
		let mut buf = Vec::with_capacity(header_size + dll_path.len() * 2);
		unsafe {
			let header_bytes = std::slice::from_raw_parts(self as *const _ as *const u8, header_size);
			buf.extend_from_slice(header_bytes);
		}
		for &word in dll_path {
			buf.extend_from_slice(&word.to_le_bytes());
		}
		buf
	}
}

//----------------------------------------------------------------
// Minimal, self-contained PEB/LDR/PE views. These intentionally do not
// reuse crate::process/crate::module — the shellcode must not reference
// any imported symbol, and duplicating the handful of fields it needs
// keeps the freestanding routine below independent of the rest of the
// crate's ABI.

#[repr(C)]
struct UnicodeStr {
	length: u16,
	maximum_length: u16,
	buffer: *const u16,
}

#[repr(C)]
struct ListEntry {
	flink: *mut ListEntry,
	blink: *mut ListEntry,
}

#[repr(C)]
struct LdrDataTableEntry {
	in_load_order_links: ListEntry,
	_in_memory_order_module_list: ListEntry,
	_in_initialization_order_module_list: ListEntry,
	dll_base: *mut u8,
	_entry_point: *mut u8,
	_size_of_image: u32,
	full_dll_name: UnicodeStr,
	_base_dll_name: UnicodeStr,
}

#[repr(C)]
struct PebLdrData {
	_length: u32,
	_initialized: u32,
	_ss_handle: *mut u8,
	in_load_order_module_list: ListEntry,
}

/// Only the prefix of the real PEB this routine needs: `ProcessInitializing`
/// lives inside `CrossProcessFlags`, at the offsets shown in `main.cpp`.
#[repr(C)]
struct PebPrefix {
	_reserved: [u8; if cfg!(target_pointer_width = "64") { 0x18 } else { 0x0c }],
	ldr: *mut PebLdrData,
	_process_parameters: *mut u8,
	_subsystem_data: *mut u8,
	_process_heap: *mut u8,
	_fast_peb_lock: *mut u8,
	_atl_thunk_slist_ptr: *mut u8,
	_ife_o_key: *mut u8,
	cross_process_flags: u32,
}

const PROCESS_INITIALIZING_BIT: u32 = 1 << 1;

/// Reads the current thread's PEB pointer from `fs:0x30` (x86) /
/// `gs:0x60` (x64). Grounded on the identical technique already used by
/// [`crate::process::ProcessEnvironmentBlock::current`] for the
/// non-shellcode PEB reader.
#[cfg(target_pointer_width = "32")]
#[inline(always)]
unsafe fn read_peb() -> *mut PebPrefix {
	let peb: *mut PebPrefix;
	std::arch::asm!("mov {0}, fs:[0x30]", out(reg) peb, options(nostack, preserves_flags));
	peb
}
#[cfg(target_pointer_width = "64")]
#[inline(always)]
unsafe fn read_peb() -> *mut PebPrefix {
	let peb: *mut PebPrefix;
	std::arch::asm!("mov {0}, gs:[0x60]", out(reg) peb, options(nostack, preserves_flags));
	peb
}

/// Builds `"KERNEL32.DLL"` character-by-character on the stack so it never
/// appears as a `.rdata` literal in the compiled routine.
#[inline(always)]
fn kernel32_dll_name() -> [u16; 13] {
	let mut buf = [0u16; 13];
	const CHARS: [u8; 12] = *b"KERNEL32.DLL";
	let mut i = 0;
	while i < CHARS.len() {
		unsafe { std::ptr::write_volatile(&mut buf[i], CHARS[i] as u16) };
		i += 1;
	}
	buf
}

/// Builds `"NTDLL.DLL"` character-by-character on the stack, same reasoning
/// as `kernel32_dll_name`.
#[inline(always)]
fn ntdll_dll_name() -> [u16; 9] {
	let mut buf = [0u16; 9];
	const CHARS: [u8; 9] = *b"NTDLL.DLL";
	let mut i = 0;
	while i < CHARS.len() {
		unsafe { std::ptr::write_volatile(&mut buf[i], CHARS[i] as u16) };
		i += 1;
	}
	buf
}

fn ends_with_ignore_case(haystack: &[u16], needle: &[u16]) -> bool {
	if haystack.len() < needle.len() {
		return false;
	}
	let start = haystack.len() - needle.len();
	haystack[start..]
		.iter()
		.zip(needle.iter())
		.all(|(&a, &b)| upper_u16(a) == upper_u16(b))
}

fn upper_u16(c: u16) -> u16 {
	if c >= 'a' as u16 && c <= 'z' as u16 { c - 32 } else { c }
}

/// Walks `PEB.Ldr.InLoadOrderModuleList` looking for a module whose full
/// DLL name ends in `name`, matching the resolver's "no imports" contract:
/// no `GetModuleHandle`, just the loader data the PEB already gives us.
unsafe fn find_module_base(peb: *mut PebPrefix, name: &[u16]) -> *mut u8 {
	let ldr = (*peb).ldr;
	if ldr.is_null() {
		return std::ptr::null_mut();
	}
	let head = &mut (*ldr).in_load_order_module_list as *mut ListEntry;
	let mut it = (*head).flink;
	while it != head {
		let entry = it as *mut LdrDataTableEntry;
		let dll_name = &(*entry).full_dll_name;
		if !dll_name.buffer.is_null() {
			let wide = std::slice::from_raw_parts(dll_name.buffer, (dll_name.length / 2) as usize);
			if ends_with_ignore_case(wide, name) {
				return (*entry).dll_base;
			}
		}
		it = (*it).flink;
	}
	std::ptr::null_mut()
}

#[repr(C)]
struct ImageDosHeader {
	_e_magic: u16,
	_pad: [u8; 0x3a],
	e_lfanew: i32,
}

#[repr(C)]
struct ImageExportDirectory {
	_characteristics: u32,
	_time_date_stamp: u32,
	_major_version: u16,
	_minor_version: u16,
	_name: u32,
	_base: u32,
	number_of_functions: u32,
	number_of_names: u32,
	address_of_functions: u32,
	address_of_names: u32,
	address_of_name_ordinals: u32,
}

/// Parses `base`'s export directory for `proc_name`, doing the ordinary
/// string compare the spec calls for (no case-folding — export names are
/// ASCII and case-exact by convention).
unsafe fn find_export(base: *mut u8, proc_name: &[u8]) -> *mut u8 {
	let dos = base as *const ImageDosHeader;
	let nt_headers = base.offset((*dos).e_lfanew as isize);
	// COFF header (24 bytes) + magic discriminates PE32 vs PE32+; the data
	// directory array starts right after the optional header's fixed part.
	// Offsets below match IMAGE_NT_HEADERS{32,64}.OptionalHeader.DataDirectory[0].
	#[cfg(target_pointer_width = "32")]
	let export_dir_rva_offset = 4 + 20 + 96;
	#[cfg(target_pointer_width = "64")]
	let export_dir_rva_offset = 4 + 20 + 112;
	let export_dir_rva = std::ptr::read_unaligned(nt_headers.offset(export_dir_rva_offset) as *const u32);
	if export_dir_rva == 0 {
		return std::ptr::null_mut();
	}
	let export_dir = base.offset(export_dir_rva as isize) as *const ImageExportDirectory;
	let names = base.offset((*export_dir).address_of_names as isize) as *const u32;
	let ordinals = base.offset((*export_dir).address_of_name_ordinals as isize) as *const u16;
	let functions = base.offset((*export_dir).address_of_functions as isize) as *const u32;
	for i in 0..(*export_dir).number_of_names {
		let name_rva = std::ptr::read_unaligned(names.offset(i as isize));
		let name_ptr = base.offset(name_rva as isize);
		if ascii_eq(name_ptr, proc_name) {
			let ordinal = std::ptr::read_unaligned(ordinals.offset(i as isize));
			let func_rva = std::ptr::read_unaligned(functions.offset(ordinal as isize));
			return base.offset(func_rva as isize);
		}
	}
	std::ptr::null_mut()
}

unsafe fn ascii_eq(ptr: *const u8, expected: &[u8]) -> bool {
	for (i, &e) in expected.iter().enumerate() {
		if std::ptr::read(ptr.offset(i as isize)) != e {
			return false;
		}
	}
	std::ptr::read(ptr.offset(expected.len() as isize)) == 0
}

/// Mirrors the logging-level contract: 0 silent, 1 errors only (hex
/// `GetLastError`), 2 verbose (`LL`, `GPA`, `II`, `II: 0/1`, `APC RE`).
/// The freestanding routine cannot allocate or format; it writes through
/// a caller-resolved `OutputDebugStringA` the same way it calls every
/// other resolved export.
type FnOutputDebugStringA = unsafe extern "system" fn(*const u8);
type FnLoadLibraryW = unsafe extern "system" fn(*const u16) -> *mut u8;
type FnGetProcAddress = unsafe extern "system" fn(*mut u8, *const u8) -> *mut u8;
type FnFreeLibrary = unsafe extern "system" fn(*mut u8) -> i32;
type FnVirtualFree = unsafe extern "system" fn(*mut u8, usize, u32) -> i32;
type FnCloseHandle = unsafe extern "system" fn(*mut u8) -> i32;
type FnSetThreadErrorMode = unsafe extern "system" fn(u32, *mut u32) -> i32;
type FnNtQueueApcThread = unsafe extern "system" fn(*mut u8, *mut u8, *mut u8, *mut u8, *mut u8) -> i32;
type FnNtAlertThread = unsafe extern "system" fn(*mut u8) -> i32;

/// Marks the start of the code range copied into the target process.
/// `#[no_mangle]` keeps its symbol (and therefore its address) stable so
/// the build step that extracts shellcode bytes can find it.
#[no_mangle]
pub extern "system" fn shellcode_begin() {}

/// The routine itself. Returns the `VirtualFree` thunk address the
/// *caller's* stub should invoke last to release the shellcode page, or
/// null if the caller must not free anything (the `Ldr == NULL` case).
///
/// # Safety
/// Must only be invoked with `param` pointing at a live
/// [`LoadLibraryRemoteData`] inside the same address space this code was
/// written into.
#[no_mangle]
pub unsafe extern "system" fn shellcode_entry(param: *mut LoadLibraryRemoteData) -> usize {
	let peb = read_peb();
	if (*peb).ldr.is_null() {
		return 0;
	}

	let kernel32_name = kernel32_dll_name();
	let kernel32_base = find_module_base(peb, &kernel32_name);
	if kernel32_base.is_null() {
		return 0;
	}

	let load_library_w: FnLoadLibraryW = std::mem::transmute(find_export(kernel32_base, b"LoadLibraryW"));
	let get_proc_address: FnGetProcAddress = std::mem::transmute(find_export(kernel32_base, b"GetProcAddress"));
	let free_library: FnFreeLibrary = std::mem::transmute(find_export(kernel32_base, b"FreeLibrary"));
	let virtual_free: FnVirtualFree = std::mem::transmute(find_export(kernel32_base, b"VirtualFree"));
	let close_handle: FnCloseHandle = std::mem::transmute(find_export(kernel32_base, b"CloseHandle"));
	let set_thread_error_mode: FnSetThreadErrorMode = std::mem::transmute(find_export(kernel32_base, b"SetThreadErrorMode"));
	let output_debug_string_a: FnOutputDebugStringA = std::mem::transmute(find_export(kernel32_base, b"OutputDebugStringA"));

	let resolved_ok = (load_library_w as usize != 0)
		&& (get_proc_address as usize != 0)
		&& (free_library as usize != 0)
		&& (virtual_free as usize != 0)
		&& (close_handle as usize != 0)
		&& (set_thread_error_mode as usize != 0);

	let process_initializing = (*peb).cross_process_flags & PROCESS_INITIALIZING_BIT != 0;

	if (*param).b_running_from_apc != 0 && process_initializing {
		// The process hasn't finished initializing, so running arbitrary
		// DLL-loading code now would be unsafe. Re-queue an APC against our
		// own remote entry point and alert the thread so it runs again once
		// the process is ready, per
		// https://x.com/sixtyvividtails/status/1910374252307534071.
		if resolved_ok && (*param).n_log_verbosity >= LOG_VERBOSE {
			let mut msg = [0u8; 12];
			for (i, b) in b"[WH] APC RE\n".iter().enumerate() {
				msg[i] = *b;
			}
			output_debug_string_a(msg.as_ptr());
		}

		let ntdll_name = ntdll_dll_name();
		let ntdll_base = find_module_base(peb, &ntdll_name);
		let mut queued = false;
		let mut err_flags: u8 = 0;
		if !ntdll_base.is_null() {
			let nt_queue_apc_thread: FnNtQueueApcThread = std::mem::transmute(find_export(ntdll_base, b"NtQueueApcThread"));
			let nt_alert_thread: FnNtAlertThread = std::mem::transmute(find_export(ntdll_base, b"NtAlertThread"));
			if nt_queue_apc_thread as usize != 0 && nt_alert_thread as usize != 0 {
				let current_thread = (-2isize) as usize as *mut u8;
				let shellcode_entry_ptr = (*param).shellcode_entry_remote_address as usize as *mut u8;
				let status = nt_queue_apc_thread(current_thread, shellcode_entry_ptr, param as *mut u8, std::ptr::null_mut(), std::ptr::null_mut());
				if status >= 0 {
					queued = true;
					if nt_alert_thread(current_thread) < 0 {
						err_flags |= 4;
					}
				} else {
					err_flags |= 2;
				}
			} else {
				err_flags |= 1;
			}
		} else {
			err_flags |= 1;
		}

		if err_flags != 0 && resolved_ok && (*param).n_log_verbosity >= LOG_ERRORS {
			let mut msg = [0u8; 14];
			for (i, b) in b"[WH] APC ERR".iter().enumerate() {
				msg[i] = *b;
			}
			msg[12] = b'0' + err_flags;
			msg[13] = b'\n';
			output_debug_string_a(msg.as_ptr());
		}

		return if queued { 0 } else { virtual_free as usize };
	}

	if !resolved_ok {
		if (*param).n_log_verbosity >= LOG_ERRORS {
			let mut msg = [0u8; 9];
			for (i, b) in b"[WH] EXP\n".iter().enumerate() {
				msg[i] = *b;
			}
			output_debug_string_a(msg.as_ptr());
		}
		return virtual_free as usize;
	}

	set_thread_error_mode(0x0001 /* SEM_FAILCRITICALERRORS */, std::ptr::null_mut());

	let dll_name_ptr = (param as *const u8).add(size_of::<LoadLibraryRemoteData>()) as *const u16;
	let module = load_library_w(dll_name_ptr);
	if !module.is_null() {
		let mut entry_name = [0u8; 11];
		for (i, b) in b"InjectInit\0".iter().enumerate() {
			entry_name[i] = *b;
		}
		let inject_init = get_proc_address(module, entry_name.as_ptr());
		if !inject_init.is_null() {
			type FnInjectInit = unsafe extern "system" fn(*mut LoadLibraryRemoteData) -> i32;
			let inject_init: FnInjectInit = std::mem::transmute(inject_init);
			let ok = inject_init(param);
			if ok == 0 {
				close_handle((*param).h_session_manager_process as usize as *mut u8);
				close_handle((*param).h_session_mutex as usize as *mut u8);
			}
		}
		free_library(module);
	}

	virtual_free as usize
}

/// Marks the end of the copied code range.
#[no_mangle]
pub extern "system" fn shellcode_end() {}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn param_block_handle_slots_are_eight_bytes_wide() {
		// The handle slots are always 8 bytes (not pointer-width-sized) so
		// the header's total size doesn't depend on the host's pointer
		// width, per the spec's cross-architecture layout requirement.
		assert_eq!(size_of::<u64>(), 8);
		let offset_of_first_handle = memoffset_h_session_manager_process();
		assert_eq!(size_of::<LoadLibraryRemoteData>() - offset_of_first_handle, 16);
	}

	fn memoffset_h_session_manager_process() -> usize {
		let base = std::mem::MaybeUninit::<LoadLibraryRemoteData>::uninit();
		let base_ptr = base.as_ptr();
		unsafe {
			let field_ptr = std::ptr::addr_of!((*base_ptr).h_session_manager_process);
			(field_ptr as usize) - (base_ptr as usize)
		}
	}

	#[test]
	fn serialize_appends_nul_terminated_dll_name() {
		let header = LoadLibraryRemoteData {
			n_log_verbosity: LOG_VERBOSE,
			b_running_from_apc: 0,
			b_thread_attach_exempt: 0,
			shellcode_entry_remote_address: 0,
			h_session_manager_process: 0,
			h_session_mutex: 0,
		};
		let name: Vec<u16> = "windhawk.dll\0".encode_utf16().collect();
		let buf = header.serialize(&name);
		assert_eq!(buf.len(), size_of::<LoadLibraryRemoteData>() + name.len() * 2);
	}

	#[test]
	fn upper_u16_only_touches_ascii_lowercase() {
		assert_eq!(upper_u16('k' as u16), 'K' as u16);
		assert_eq!(upper_u16('2' as u16), '2' as u16);
	}

	#[test]
	fn ends_with_ignore_case_matches_kernel32() {
		let hay: Vec<u16> = r"C:\Windows\System32\kernel32.dll".encode_utf16().collect();
		let needle = kernel32_dll_name();
		assert!(ends_with_ignore_case(&hay, &needle));
	}

	#[test]
	fn ends_with_ignore_case_matches_ntdll() {
		let hay: Vec<u16> = r"C:\Windows\System32\ntdll.dll".encode_utf16().collect();
		let needle = ntdll_dll_name();
		assert!(ends_with_ignore_case(&hay, &needle));
	}
}
