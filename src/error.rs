/*!
Error types.
!*/

use std::{fmt, error};
use crate::winapi::*;

/// Raw Windows error code, as returned by `GetLastError`.
///
/// See [System Error Codes](https://msdn.microsoft.com/en-us/library/windows/desktop/ms681381.aspx) for more information.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct OsError(DWORD);
impl_inner!(OsError: safe DWORD);
impl OsError {
	pub const SUCCESS: OsError = OsError(0);
}
impl OsError {
	/// Returns true if this is the success error code.
	pub const fn is_success(self) -> bool {
		self.0 == 0
	}
	/// Gets the last error code.
	///
	/// See [GetLastError function](https://msdn.microsoft.com/en-us/library/windows/desktop/ms679360.aspx) for more information.
	pub fn last() -> OsError {
		OsError(unsafe { GetLastError() })
	}
}
impl fmt::Display for OsError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "{:#X}", self.0)
	}
}
impl fmt::Debug for OsError {
	fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
		write!(f, "OsError({:#X})", self.0)
	}
}
impl error::Error for OsError {}

/// Backwards-compatible alias for the raw error code type.
pub type ErrorCode = OsError;

/// The core's error sum type.
///
/// Every mod-API boundary function and every orchestrator-facing export
/// catches this and degrades to `false`/`None`/no-op rather than letting it
/// escape into the host process, per the propagation policy: the engine
/// never aborts the process it is injected into.
#[derive(thiserror::Error, Debug)]
pub enum WindhawkError {
	/// `engine.ini` missing or malformed, or an unsupported architecture was
	/// requested. Fatal to initialization.
	#[error("config error: {0}")]
	Config(String),

	/// A Win32/NT API call failed. Logged at verbose, the caller usually
	/// just skips the target and continues iterating.
	#[error(transparent)]
	Os(#[from] OsError),

	/// The target process exited mid-operation.
	#[error("target process exited")]
	TargetGone,

	/// A non-optional symbol could not be resolved by any of the three
	/// `hook_symbols` passes (local cache, online cache, full enumeration).
	#[error("required symbol unresolved: {0}")]
	SymbolRequired(String),

	/// A write to mod-private storage failed.
	#[error("storage io error")]
	Storage(#[source] std::io::Error),

	/// A mod called an API outside the lifecycle window where it is valid
	/// (e.g. registering a hook after `BeforeUninit` has started).
	#[error("invalid call: {0}")]
	InvalidState(&'static str),
}

impl From<std::io::Error> for WindhawkError {
	fn from(e: std::io::Error) -> WindhawkError {
		WindhawkError::Storage(e)
	}
}

pub type WhResult<T> = std::result::Result<T, WindhawkError>;
