/*!
Thread identifier.
!*/

use crate::winapi::DWORD;

/// Thread identifier.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ThreadId(pub(crate) DWORD);
impl_inner!(ThreadId: safe DWORD);

impl std::fmt::Display for ThreadId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}
impl std::fmt::Debug for ThreadId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "ThreadId({})", self.0)
	}
}
