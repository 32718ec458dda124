/*!
Late-bound WinHTTP access.

The engine must not carry a static import on `winhttp.dll` (it would fail
to load in sandboxed processes that block that module). Every entry
point is resolved through `LoadLibraryW`/`GetProcAddress` the same way
the pack's PEB-walking dynamic-import helper resolves kernel32 exports,
minus the PEB walk itself: this code runs as ordinary, fully loaded
engine code with a normal import table, so `GetProcAddress` through the
loader is enough to avoid a static dependency on `winhttp.dll` specifically.
!*/

use std::ffi::c_void;
use std::sync::OnceLock;

use crate::error::{OsError, WhResult, WindhawkError};
use crate::util::to_wide_null;
use crate::winapi::*;

type WinHttpOpenFn = unsafe extern "system" fn(LPCWSTR, DWORD, LPCWSTR, LPCWSTR, DWORD) -> HINTERNET;
type WinHttpConnectFn = unsafe extern "system" fn(HINTERNET, LPCWSTR, INTERNET_PORT, DWORD) -> HINTERNET;
type WinHttpOpenRequestFn =
	unsafe extern "system" fn(HINTERNET, LPCWSTR, LPCWSTR, LPCWSTR, LPCWSTR, *mut LPCWSTR, DWORD) -> HINTERNET;
type WinHttpSendRequestFn =
	unsafe extern "system" fn(HINTERNET, LPCWSTR, DWORD, *mut c_void, DWORD, DWORD, usize) -> BOOL;
type WinHttpReceiveResponseFn = unsafe extern "system" fn(HINTERNET, *mut c_void) -> BOOL;
type WinHttpQueryDataAvailableFn = unsafe extern "system" fn(HINTERNET, *mut DWORD) -> BOOL;
type WinHttpReadDataFn = unsafe extern "system" fn(HINTERNET, *mut c_void, DWORD, *mut DWORD) -> BOOL;
type WinHttpCloseHandleFn = unsafe extern "system" fn(HINTERNET) -> BOOL;
type WinHttpCrackUrlFn = unsafe extern "system" fn(LPCWSTR, DWORD, DWORD, *mut URL_COMPONENTSW) -> BOOL;

pub type HINTERNET = *mut c_void;
pub type INTERNET_PORT = u16;

#[repr(C)]
#[allow(non_snake_case)]
pub struct URL_COMPONENTSW {
	pub dwStructSize: DWORD,
	pub lpszScheme: LPWSTR,
	pub dwSchemeLength: DWORD,
	pub nScheme: i32,
	pub lpszHostName: LPWSTR,
	pub dwHostNameLength: DWORD,
	pub nPort: INTERNET_PORT,
	pub lpszUserName: LPWSTR,
	pub dwUserNameLength: DWORD,
	pub lpszPassword: LPWSTR,
	pub dwPasswordLength: DWORD,
	pub lpszUrlPath: LPWSTR,
	pub dwUrlPathLength: DWORD,
	pub lpszExtraInfo: LPWSTR,
	pub dwExtraInfoLength: DWORD,
}

struct WinHttp {
	open: WinHttpOpenFn,
	connect: WinHttpConnectFn,
	open_request: WinHttpOpenRequestFn,
	send_request: WinHttpSendRequestFn,
	receive_response: WinHttpReceiveResponseFn,
	query_data_available: WinHttpQueryDataAvailableFn,
	read_data: WinHttpReadDataFn,
	close_handle: WinHttpCloseHandleFn,
	crack_url: WinHttpCrackUrlFn,
}

unsafe impl Send for WinHttp {}
unsafe impl Sync for WinHttp {}

static WINHTTP: OnceLock<Option<WinHttp>> = OnceLock::new();

fn winhttp() -> WhResult<&'static WinHttp> {
	WINHTTP
		.get_or_init(load_winhttp)
		.as_ref()
		.ok_or_else(|| WindhawkError::Config("winhttp.dll could not be loaded".to_string()))
}

fn load_winhttp() -> Option<WinHttp> {
	unsafe {
		let name = to_wide_null("winhttp.dll");
		let module = LoadLibraryW(name.as_ptr());
		if module.is_null() {
			return None;
		}
		macro_rules! resolve {
			($sym:literal) => {{
				let name = concat!($sym, "\0");
				match GetProcAddress(module, name.as_ptr() as *const i8) {
					Some(addr) => std::mem::transmute(addr),
					None => return None,
				}
			}};
		}
		Some(WinHttp {
			open: resolve!("WinHttpOpen"),
			connect: resolve!("WinHttpConnect"),
			open_request: resolve!("WinHttpOpenRequest"),
			send_request: resolve!("WinHttpSendRequest"),
			receive_response: resolve!("WinHttpReceiveResponse"),
			query_data_available: resolve!("WinHttpQueryDataAvailable"),
			read_data: resolve!("WinHttpReadData"),
			close_handle: resolve!("WinHttpCloseHandle"),
			crack_url: resolve!("WinHttpCrackUrl"),
		})
	}
}

struct Session(HINTERNET);
impl Drop for Session {
	fn drop(&mut self) {
		if let Ok(w) = winhttp() {
			unsafe { (w.close_handle)(self.0) };
		}
	}
}

/// Synchronous HTTP(S) GET. Mirrors the engine's `get_url_content`: the
/// body is returned owned by the caller (there's no separate
/// `free_url_content` step needed in a `Vec<u8>`-returning API, which is
/// the point of keeping this safe-Rust rather than an FFI boundary).
pub fn get_url_content(url: &str) -> WhResult<Vec<u8>> {
	let w = winhttp()?;
	let (scheme_https, host, port, path) = crack_url(w, url)?;

	let agent = to_wide_null("Windhawk");
	let session = unsafe { (w.open)(agent.as_ptr(), 0 /* WINHTTP_ACCESS_TYPE_DEFAULT_PROXY */, std::ptr::null(), std::ptr::null(), 0) };
	if session.is_null() {
		return Err(WindhawkError::Os(OsError::last()));
	}
	let session = Session(session);

	let host_w = to_wide_null(&host);
	let connect = unsafe { (w.connect)(session.0, host_w.as_ptr(), port, 0) };
	if connect.is_null() {
		return Err(WindhawkError::Os(OsError::last()));
	}
	let connect = Session(connect);

	let verb = to_wide_null("GET");
	let path_w = to_wide_null(&path);
	let flags = if scheme_https { 0x0080_0000 /* WINHTTP_FLAG_SECURE */ } else { 0 };
	let request = unsafe {
		(w.open_request)(
			connect.0,
			verb.as_ptr(),
			path_w.as_ptr(),
			std::ptr::null(),
			std::ptr::null(),
			std::ptr::null_mut(),
			flags,
		)
	};
	if request.is_null() {
		return Err(WindhawkError::Os(OsError::last()));
	}
	let request = Session(request);

	unsafe {
		if (w.send_request)(request.0, std::ptr::null(), 0, std::ptr::null_mut(), 0, 0, 0) == 0 {
			return Err(WindhawkError::Os(OsError::last()));
		}
		if (w.receive_response)(request.0, std::ptr::null_mut()) == 0 {
			return Err(WindhawkError::Os(OsError::last()));
		}
	}

	let mut body = Vec::new();
	loop {
		let mut available: DWORD = 0;
		if unsafe { (w.query_data_available)(request.0, &mut available) } == 0 {
			return Err(WindhawkError::Os(OsError::last()));
		}
		if available == 0 {
			break;
		}
		let start = body.len();
		body.resize(start + available as usize, 0u8);
		let mut read: DWORD = 0;
		if unsafe { (w.read_data)(request.0, body[start..].as_mut_ptr() as *mut c_void, available, &mut read) } == 0 {
			return Err(WindhawkError::Os(OsError::last()));
		}
		body.truncate(start + read as usize);
	}

	Ok(body)
}

fn crack_url(w: &WinHttp, url: &str) -> WhResult<(bool, String, u16, String)> {
	let url_w = to_wide_null(url);
	let mut host_buf = vec![0u16; 256];
	let mut path_buf = vec![0u16; 2048];
	let mut components: URL_COMPONENTSW = unsafe { std::mem::zeroed() };
	components.dwStructSize = std::mem::size_of::<URL_COMPONENTSW>() as DWORD;
	components.lpszHostName = host_buf.as_mut_ptr();
	components.dwHostNameLength = host_buf.len() as DWORD;
	components.lpszUrlPath = path_buf.as_mut_ptr();
	components.dwUrlPathLength = path_buf.len() as DWORD;

	if unsafe { (w.crack_url)(url_w.as_ptr(), 0, 0, &mut components) } == 0 {
		return Err(WindhawkError::Config(format!("invalid URL: {}", url)));
	}
	let https = components.nScheme == 2 /* INTERNET_SCHEME_HTTPS */;
	let host = crate::util::from_wide_lossy(&host_buf[..components.dwHostNameLength as usize]);
	let path = crate::util::from_wide_lossy(&path_buf[..components.dwUrlPathLength as usize]);
	let port = if components.nPort != 0 { components.nPort } else if https { 443 } else { 80 };
	Ok((https, host, port, path))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn url_components_struct_matches_expected_field_count() {
		assert_eq!(std::mem::size_of::<URL_COMPONENTSW>() % std::mem::size_of::<usize>(), 0);
	}
}
