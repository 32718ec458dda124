/*!
Session-private namespace (C3).

A named kernel-object namespace scoped to one orchestrator process, so
mutexes/events/semaphores the engine creates inside target processes
don't collide with a second, concurrently running orchestrator.
!*/

use crate::error::{OsError, WhResult, WindhawkError};
use crate::process::ProcessId;
use crate::util::to_wide_null;
use crate::winapi::*;

/// Owns the boundary descriptor and the private namespace handle for one
/// orchestrator pid. Creating a second `SessionNamespace` for the same pid
/// (in another process) opens the same namespace rather than creating a
/// new one.
pub struct SessionNamespace {
	handle: HANDLE,
	name: String,
}

unsafe impl Send for SessionNamespace {}
unsafe impl Sync for SessionNamespace {}

impl SessionNamespace {
	/// `WindhawkSession<orch-pid>`, the name a target process derives from
	/// the orchestrator pid it receives in its parameter block.
	pub fn name_for(orch_pid: ProcessId) -> String {
		format!("WindhawkSession{}", orch_pid)
	}

	/// Creates (or opens, if another thread raced us) the boundary
	/// descriptor tagged `"Windhawk"` plus the World SID at Medium
	/// integrity, and the private namespace itself.
	pub fn create(orch_pid: ProcessId) -> WhResult<SessionNamespace> {
		let name = Self::name_for(orch_pid);
		unsafe {
			let boundary_name = to_wide_null("Windhawk");
			let mut boundary = CreateBoundaryDescriptorW(boundary_name.as_ptr(), 0);
			if boundary.is_null() {
				return Err(WindhawkError::Os(OsError::last()));
			}

			let mut world_sid = [0u8; SECURITY_MAX_SID_SIZE as usize];
			let mut sid_size = world_sid.len() as DWORD;
			if CreateWellKnownSid(WinWorldSid, std::ptr::null_mut(), world_sid.as_mut_ptr() as PSID, &mut sid_size) == 0 {
				DeleteBoundaryDescriptor(boundary);
				return Err(WindhawkError::Os(OsError::last()));
			}
			if AddSIDToBoundaryDescriptor(&mut boundary, world_sid.as_mut_ptr() as PSID) == 0 {
				DeleteBoundaryDescriptor(boundary);
				return Err(WindhawkError::Os(OsError::last()));
			}

			let mut medium_label_sid = [0u8; SECURITY_MAX_SID_SIZE as usize];
			let mut label_sid_size = medium_label_sid.len() as DWORD;
			if CreateWellKnownSid(WinMediumLabelSid, std::ptr::null_mut(), medium_label_sid.as_mut_ptr() as PSID, &mut label_sid_size) == 0 {
				DeleteBoundaryDescriptor(boundary);
				return Err(WindhawkError::Os(OsError::last()));
			}
			if AddIntegrityLabelToBoundaryDescriptor(&mut boundary, medium_label_sid.as_mut_ptr() as PSID) == 0 {
				DeleteBoundaryDescriptor(boundary);
				return Err(WindhawkError::Os(OsError::last()));
			}

			let namespace_name = to_wide_null(&name);
			let handle = CreatePrivateNamespaceW(std::ptr::null_mut(), boundary, namespace_name.as_ptr());
			let handle = if handle.is_null() && OsError::last().as_inner_value() == ERROR_ALREADY_EXISTS {
				OpenPrivateNamespaceW(boundary, namespace_name.as_ptr())
			} else {
				handle
			};
			DeleteBoundaryDescriptor(boundary);

			if handle.is_null() {
				return Err(WindhawkError::Os(OsError::last()));
			}
			Ok(SessionNamespace { handle, name })
		}
	}

	pub fn name(&self) -> &str {
		&self.name
	}

	/// Qualifies a bare object name with this namespace's prefix, the form
	/// `\<namespace>\<name>` the kernel object APIs expect for a private
	/// namespace.
	pub fn qualify(&self, object_name: &str) -> String {
		format!("{}\\{}", self.name, object_name)
	}
}

impl Drop for SessionNamespace {
	fn drop(&mut self) {
		unsafe {
			ClosePrivateNamespace(self.handle, 0);
		}
	}
}

trait OsErrorValue {
	fn as_inner_value(self) -> u32;
}
impl OsErrorValue for OsError {
	fn as_inner_value(self) -> u32 {
		use crate::AsInner;
		*self.as_inner()
	}
}
