/*!
Process identifier.
!*/

use crate::winapi::DWORD;

/// Process identifier.
#[derive(Copy, Clone, Default, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct ProcessId(pub(crate) DWORD);
impl_inner!(ProcessId: safe DWORD);

impl std::fmt::Display for ProcessId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "{}", self.0)
	}
}
impl std::fmt::Debug for ProcessId {
	fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
		write!(f, "ProcessId({})", self.0)
	}
}
