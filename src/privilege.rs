/*!
Token privilege adjustment.

Used by the scanner's session-0 probe (spec step: "skip session-0
processes the caller cannot open without debug privilege, probed by
transiently disabling `SeDebugPrivilege` and retrying `OpenProcess`").
!*/

use crate::error::OsError;
use crate::winapi::*;
use crate::Result;

/// Runs `f` with `SeDebugPrivilege` disabled on the calling thread's
/// process token, restoring its previous state afterward.
pub fn without_debug_privilege<T>(f: impl FnOnce() -> Result<T>) -> Result<T> {
	match disable(SE_DEBUG_NAME) {
		Ok(previously_enabled) => {
			let result = f();
			if previously_enabled {
				let _ = enable(SE_DEBUG_NAME);
			}
			result
		}
		Err(_) => f(),
	}
}

/// Enables a privilege by name on the current process token. Returns
/// whether it was already enabled.
pub fn enable(name: &[u16]) -> Result<bool> {
	adjust(name, SE_PRIVILEGE_ENABLED)
}

/// Disables a privilege by name on the current process token. Returns
/// whether it was enabled beforehand.
pub fn disable(name: &[u16]) -> Result<bool> {
	adjust(name, 0)
}

fn adjust(name: &[u16], new_attributes: DWORD) -> Result<bool> {
	unsafe {
		let mut token: HANDLE = std::ptr::null_mut();
		if OpenProcessToken(GetCurrentProcess(), TOKEN_ADJUST_PRIVILEGES | TOKEN_QUERY, &mut token) == 0 {
			return Err(OsError::last());
		}
		let mut luid: LUID = std::mem::zeroed();
		if LookupPrivilegeValueW(std::ptr::null(), name.as_ptr(), &mut luid) == 0 {
			CloseHandle(token);
			return Err(OsError::last());
		}

		let mut previous: TOKEN_PRIVILEGES = std::mem::zeroed();
		let mut previous_len: DWORD = std::mem::size_of::<TOKEN_PRIVILEGES>() as DWORD;
		let mut desired: TOKEN_PRIVILEGES = std::mem::zeroed();
		desired.PrivilegeCount = 1;
		desired.Privileges[0].Luid = luid;
		desired.Privileges[0].Attributes = new_attributes;

		let ok = AdjustTokenPrivileges(
			token,
			FALSE,
			&mut desired,
			std::mem::size_of::<TOKEN_PRIVILEGES>() as DWORD,
			&mut previous,
			&mut previous_len,
		);
		let err = OsError::last();
		CloseHandle(token);
		if ok == 0 {
			return Err(err);
		}
		let was_enabled = previous.PrivilegeCount == 1 && (previous.Privileges[0].Attributes & SE_PRIVILEGE_ENABLED) != 0;
		Ok(was_enabled)
	}
}

// winapi only exposes `SE_DEBUG_NAME` as an ANSI byte string; build the
// wide, nul-terminated form `LookupPrivilegeValueW` needs.
const SE_DEBUG_NAME_WIDE: [u16; 17] = wide_str!(
	'S' 'e' 'D' 'e' 'b' 'u' 'g' 'P' 'r' 'i' 'v' 'i' 'l' 'e' 'g' 'e' 0
);
pub static SE_DEBUG_NAME: &[u16] = &SE_DEBUG_NAME_WIDE;

#[cfg(test)]
mod tests {
	// No live-OS tests here: privilege adjustment requires running as an
	// account with SeDebugPrivilege assignable, which CI lacks.
}
