/*!
Hook queue (C9's collaborator with the hooking engine).

`detour::RawDetour` supplies the trampoline mechanics; this module adds
the batching layer spec.md describes: every hook is tagged with the
identity of the mod that registered it, staged rather than applied
immediately, and a single `apply_queued(ALL)` call flushes every pending
registration/removal across every mod in one pass (mirroring MinHook's
`MH_ALL_IDENTS` batch-apply idiom, built here on top of `detour` since
`detour` itself has no notion of identities or staging).
!*/

use std::collections::HashMap;

use detour::RawDetour;
use parking_lot::Mutex;

use crate::error::{WhResult, WindhawkError};

/// Identifies which mod registered a hook, so operations can be filtered
/// or batched per-mod.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug)]
pub struct HookIdentity(pub u32);

/// Selects which identities an `apply_queued` call should touch.
#[derive(Copy, Clone, Eq, PartialEq)]
pub enum IdentityFilter {
	All,
	Only(HookIdentity),
}

impl IdentityFilter {
	fn matches(self, id: HookIdentity) -> bool {
		match self {
			IdentityFilter::All => true,
			IdentityFilter::Only(want) => want == id,
		}
	}
}

enum PendingOp {
	Enable,
	Disable(removal_reason::Reason),
}

mod removal_reason {
	#[derive(Copy, Clone)]
	pub enum Reason {
		Requested,
		Disabled,
	}
}

struct Entry {
	detour: RawDetour,
	identity: HookIdentity,
	enabled: bool,
	pending: Option<PendingOp>,
}

unsafe impl Send for Entry {}

/// Process-wide hook registry. One entry per unique target address;
/// `detour` itself forbids double-hooking the same address anyway.
pub struct HookQueue {
	entries: Mutex<HashMap<usize, Entry>>,
}

impl HookQueue {
	pub fn new() -> HookQueue {
		HookQueue { entries: Mutex::new(HashMap::new()) }
	}

	/// Stages a hook install; returns the trampoline address ("original")
	/// immediately so callers can wire up their `out_original` pointer
	/// before the batch is applied. The detour isn't live until the next
	/// `apply_queued` for this identity (or `All`).
	pub fn queue_install(&self, identity: HookIdentity, target: *const (), hook: *const ()) -> WhResult<*const ()> {
		let detour = unsafe { RawDetour::new(target, hook) }.map_err(|e| WindhawkError::Config(format!("hook init failed: {}", e)))?;
		let trampoline = detour.trampoline() as *const _ as *const ();
		let mut entries = self.entries.lock();
		entries.insert(target as usize, Entry { detour, identity, enabled: false, pending: Some(PendingOp::Enable) });
		Ok(trampoline)
	}

	/// Stages a hook removal. A no-op if nothing is registered at `target`.
	pub fn queue_remove(&self, identity: HookIdentity, target: *const ()) {
		let mut entries = self.entries.lock();
		if let Some(entry) = entries.get_mut(&(target as usize)) {
			if entry.identity == identity {
				entry.pending = Some(PendingOp::Disable(removal_reason::Reason::Requested));
			}
		}
	}

	/// Flushes every staged operation matching `filter`, then drops fully
	/// disabled entries. Errors from individual detours are logged and
	/// skipped rather than aborting the whole batch, matching the "best
	/// effort across many mods" intent of a shared apply pass.
	pub fn apply_queued(&self, filter: IdentityFilter) {
		let mut entries = self.entries.lock();
		let mut to_drop = Vec::new();
		for (addr, entry) in entries.iter_mut() {
			if !filter.matches(entry.identity) {
				continue;
			}
			match entry.pending.take() {
				Some(PendingOp::Enable) => {
					if !entry.enabled {
						match unsafe { entry.detour.enable() } {
							Ok(()) => entry.enabled = true,
							Err(e) => log::warn!("hook enable failed at {:#x}: {}", addr, e),
						}
					}
				}
				Some(PendingOp::Disable(_)) => {
					if entry.enabled {
						match unsafe { entry.detour.disable() } {
							Ok(()) => entry.enabled = false,
							Err(e) => log::warn!("hook disable failed at {:#x}: {}", addr, e),
						}
					}
					to_drop.push(*addr);
				}
				None => {}
			}
		}
		for addr in to_drop {
			entries.remove(&addr);
		}
	}

	/// Disables and drops every hook owned by `identity`, used when a mod
	/// is unloaded outright rather than just editing one hook.
	pub fn remove_all_for(&self, identity: HookIdentity) {
		let mut entries = self.entries.lock();
		for entry in entries.values_mut() {
			if entry.identity == identity && entry.enabled {
				let _ = unsafe { entry.detour.disable() };
				entry.enabled = false;
			}
		}
		entries.retain(|_, entry| entry.identity != identity);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn identity_filter_all_matches_everything() {
		assert!(IdentityFilter::All.matches(HookIdentity(1)));
		assert!(IdentityFilter::All.matches(HookIdentity(2)));
	}

	#[test]
	fn identity_filter_only_matches_single_identity() {
		let f = IdentityFilter::Only(HookIdentity(7));
		assert!(f.matches(HookIdentity(7)));
		assert!(!f.matches(HookIdentity(8)));
	}
}
