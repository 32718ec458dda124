/*!
Hard-coded process lists the mods manager and scanner gate against.

Ported from a table of known-critical Windows process paths; the original
comment attributes the selection to elastic's "unusual parent-child
relationship" detection rules, since unexpected injection into these
processes is exactly the kind of thing that ruleset flags.
!*/

use crate::patterns::PatternSet;
use once_cell::sync::Lazy;

/// Processes that must never be injected with `skip_critical_processes`
/// set, regardless of user include patterns.
pub const CRITICAL_PROCESSES: &str = concat!(
	r"%systemroot%\system32\autochk.exe|",
	r"%systemroot%\syswow64\autochk.exe|",
	r"%systemroot%\system32\chkdsk.exe|",
	r"%systemroot%\syswow64\chkdsk.exe|",
	r"%systemroot%\system32\consent.exe|",
	r"%systemroot%\system32\csrss.exe|",
	r"%systemroot%\system32\doskey.exe|",
	r"%systemroot%\syswow64\doskey.exe|",
	r"%systemroot%\system32\dwm.exe|",
	r"%systemroot%\system32\fontdrvhost.exe|",
	r"%systemroot%\system32\logonui.exe|",
	r"%systemroot%\system32\lsaiso.exe|",
	r"%systemroot%\system32\lsass.exe|",
	r"%systemroot%\system32\searchindexer.exe|",
	r"%systemroot%\syswow64\searchindexer.exe|",
	r"%systemroot%\system32\searchprotocolhost.exe|",
	r"%systemroot%\syswow64\searchprotocolhost.exe|",
	r"%systemroot%\system32\services.exe|",
	r"%systemroot%\system32\setupcl.exe|",
	r"%systemroot%\system32\smss.exe|",
	r"%systemroot%\system32\spoolsv.exe|",
	r"%systemroot%\system32\taskhostw.exe|",
	r"%systemroot%\system32\werfaultsecure.exe|",
	r"%systemroot%\syswow64\werfaultsecure.exe|",
	r"%systemroot%\system32\wermgr.exe|",
	r"%systemroot%\syswow64\wermgr.exe|",
	r"%systemroot%\system32\wininit.exe|",
	r"%systemroot%\system32\winrshost.exe|",
	r"%systemroot%\syswow64\winrshost.exe|",
	r"%systemroot%\system32\wbem\wmiprvse.exe|",
	r"%systemroot%\syswow64\wbem\wmiprvse.exe|",
	r"%systemroot%\system32\wsmprovhost.exe|",
	r"%systemroot%\syswow64\wsmprovhost.exe",
);

/// A second, smaller tier: critical enough that a *mod* should not load
/// there even though the scanner itself is allowed to inject the engine
/// (e.g. so a mod doesn't run logic meant for user shells inside
/// `svchost.exe`).
pub const CRITICAL_PROCESSES_FOR_MODS: &str = concat!(
	r"%systemroot%\system32\svchost.exe|",
	r"%systemroot%\syswow64\svchost.exe|",
	r"%systemroot%\system32\werfault.exe|",
	r"%systemroot%\syswow64\werfault.exe|",
	r"%systemroot%\system32\winlogon.exe",
);

static CRITICAL: Lazy<PatternSet> = Lazy::new(|| PatternSet::parse(CRITICAL_PROCESSES));
static CRITICAL_FOR_MODS: Lazy<PatternSet> = Lazy::new(|| PatternSet::parse(CRITICAL_PROCESSES_FOR_MODS));

/// True if `path` names one of the hard-coded critical system processes
/// the scanner refuses to inject into when `skip_critical_processes` is
/// set.
pub fn is_critical_process_path(path: &str) -> bool {
	CRITICAL.matches(path)
}

/// True if `path` names a process a mod should not load into even though
/// the engine itself may already be present there.
pub fn is_critical_process_path_for_mods(path: &str) -> bool {
	CRITICAL_FOR_MODS.matches(path)
}

#[cfg(test)]
mod tests {
	use super::*;

	fn with_systemroot_env() {
		std::env::set_var("systemroot", r"C:\Windows");
	}

	#[test]
	fn csrss_is_critical() {
		with_systemroot_env();
		assert!(is_critical_process_path(r"C:\Windows\system32\csrss.exe"));
	}

	#[test]
	fn explorer_is_not_critical() {
		with_systemroot_env();
		assert!(!is_critical_process_path(r"C:\Windows\explorer.exe"));
	}

	#[test]
	fn winlogon_is_critical_for_mods_only() {
		with_systemroot_env();
		assert!(!is_critical_process_path(r"C:\Windows\system32\winlogon.exe"));
		assert!(is_critical_process_path_for_mods(r"C:\Windows\system32\winlogon.exe"));
	}
}
