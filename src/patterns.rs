/*!
Include/exclude/thread-attach-exempt pattern matching.

Shared by the all-processes scanner (C6), the new-process interceptor (C7)
and the mods manager's `should_load_in_running_process` (C10) — all three
read the same `|`-separated glob language out of settings, so it lives in
one place instead of three.
!*/

use crate::util::{ascii_upper, expand_env_vars};

/// A compiled set of `|`-separated glob terms.
///
/// A term containing a path separator (`\` or `/`) matches against the
/// full path; a term without one matches against the filename only.
/// Matching is case-insensitive and env vars in the pattern string are
/// expanded once, at parse time.
#[derive(Clone, Debug, Default)]
pub struct PatternSet {
	terms: Vec<Term>,
}

#[derive(Clone, Debug)]
struct Term {
	glob: String,
	by_full_path: bool,
}

impl PatternSet {
	/// Parses a raw `|`-separated pattern string as read from settings.
	/// An empty or whitespace-only string yields an empty set, which
	/// matches nothing.
	pub fn parse(raw: &str) -> PatternSet {
		let expanded = expand_env_vars(raw);
		let terms = expanded
			.split('|')
			.map(str::trim)
			.filter(|s| !s.is_empty())
			.map(|s| Term {
				by_full_path: s.contains('\\') || s.contains('/'),
				glob: ascii_upper(s),
			})
			.collect();
		PatternSet { terms }
	}

	pub fn is_empty(&self) -> bool {
		self.terms.is_empty()
	}

	/// Matches a full path against this set. `matches(a|b, x) == matches(a,
	/// x) || matches(b, x)`, per the pattern-matcher round-trip law.
	pub fn matches(&self, path: &str) -> bool {
		self.matches_mode(path, false)
	}

	/// Same as `matches`, but when `explicit_only` is set, terms containing
	/// `*`/`?` are skipped entirely rather than matched loosely. Used to
	/// gate Include/IncludeCustom against critical system processes, where
	/// only a literal, user-typed process name is allowed to opt a mod in.
	pub fn matches_mode(&self, path: &str, explicit_only: bool) -> bool {
		let path_upper = ascii_upper(path);
		let filename_upper = file_name(&path_upper);
		self.terms.iter().any(|term| {
			if explicit_only && term.glob.contains(|c| c == '*' || c == '?') {
				return false;
			}
			let subject: &str = if term.by_full_path { &path_upper } else { filename_upper };
			glob_match(&term.glob, subject)
		})
	}
}

fn file_name(path: &str) -> &str {
	path.rsplit(|c| c == '\\' || c == '/').next().unwrap_or(path)
}

/// `*`/`?` glob match, not path-separator aware (a `*` may cross `\`).
/// Both `glob` and `text` must already be in the same case.
pub fn glob_match(glob: &str, text: &str) -> bool {
	let g: Vec<char> = glob.chars().collect();
	let t: Vec<char> = text.chars().collect();
	glob_match_rec(&g, &t)
}

fn glob_match_rec(g: &[char], t: &[char]) -> bool {
	// Standard backtracking glob matcher; `*` matches any run (including
	// empty), `?` matches exactly one character.
	let (mut gi, mut ti) = (0usize, 0usize);
	let (mut star_gi, mut star_ti) = (None, 0usize);
	while ti < t.len() {
		if gi < g.len() && (g[gi] == '?' || g[gi] == t[ti]) {
			gi += 1;
			ti += 1;
		} else if gi < g.len() && g[gi] == '*' {
			star_gi = Some(gi);
			star_ti = ti;
			gi += 1;
		} else if let Some(sg) = star_gi {
			gi = sg + 1;
			star_ti += 1;
			ti = star_ti;
		} else {
			return false;
		}
	}
	while gi < g.len() && g[gi] == '*' {
		gi += 1;
	}
	gi == g.len()
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn filename_only_term_ignores_directory() {
		let set = PatternSet::parse("explorer.exe");
		assert!(set.matches(r"C:\Windows\explorer.exe"));
		assert!(!set.matches(r"C:\Windows\notepad.exe"));
	}

	#[test]
	fn full_path_term_requires_directory_match() {
		let set = PatternSet::parse(r"C:\Windows\explorer.exe");
		assert!(set.matches(r"C:\Windows\explorer.exe"));
		assert!(!set.matches(r"C:\Other\explorer.exe"));
	}

	#[test]
	fn wildcard_and_case_insensitive() {
		let set = PatternSet::parse("Note*.EXE");
		assert!(set.matches(r"C:\Windows\notepad.exe"));
	}

	#[test]
	fn union_is_disjunction() {
		let ab = PatternSet::parse("ab|cd");
		let a = PatternSet::parse("ab");
		let b = PatternSet::parse("cd");
		for text in ["ab", "cd", "xy"] {
			assert_eq!(ab.matches(text), a.matches(text) || b.matches(text));
		}
	}

	#[test]
	fn empty_pattern_matches_nothing() {
		let set = PatternSet::parse("   ");
		assert!(set.is_empty());
		assert!(!set.matches("anything"));
	}

	#[test]
	fn question_mark_matches_one_char() {
		assert!(glob_match("A?C", "ABC"));
		assert!(!glob_match("A?C", "ABBC"));
	}

	#[test]
	fn explicit_only_skips_wildcard_terms() {
		let set = PatternSet::parse("*");
		assert!(set.matches(r"C:\Windows\csrss.exe"));
		assert!(!set.matches_mode(r"C:\Windows\csrss.exe", true));
	}

	#[test]
	fn explicit_only_still_matches_literal_term() {
		let set = PatternSet::parse(r"C:\Windows\csrss.exe");
		assert!(set.matches_mode(r"C:\Windows\csrss.exe", true));
	}
}
