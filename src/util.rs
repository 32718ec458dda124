/*!
Small string and buffer helpers shared by the rest of the crate.
!*/

#![allow(unused)]

#[inline]
pub fn from_wchar_buf(buf: &[u16]) -> &[u16] {
	let len = buf.iter()
		.enumerate()
		.find(|&(_, &word)| word == 0)
		.map_or_else(|| buf.len(), |(len, _)| len);
	&buf[..len]
}

#[inline]
pub fn from_char_buf(buf: &[u8]) -> &[u8] {
	let mut len = buf.len();
	for i in 0..len {
		if buf[i] == 0 {
			len = i;
			break;
		}
	}
	&buf[..len]
}

/// Converts a Rust string to a NUL-terminated UTF-16 buffer, suitable for
/// passing to wide Win32 APIs.
pub fn to_wide_null(s: &str) -> Vec<u16> {
	use std::os::windows::ffi::OsStrExt;
	std::ffi::OsStr::new(s).encode_wide().chain(Some(0)).collect()
}

/// Converts a NUL-terminated (or not) UTF-16 buffer back to a Rust string,
/// replacing unpaired surrogates with the replacement character.
pub fn from_wide_lossy(buf: &[u16]) -> String {
	String::from_utf16_lossy(from_wchar_buf(buf))
}

/// Expands `%VAR%`-style environment variable references the way
/// `ExpandEnvironmentStringsW` does, for use by the pattern matcher and the
/// storage manager's `AppDataPath` normalization.
pub fn expand_env_vars(s: &str) -> String {
	let mut out = String::with_capacity(s.len());
	let mut rest = s;
	while let Some(start) = rest.find('%') {
		let (head, tail) = rest.split_at(start);
		out.push_str(head);
		let tail = &tail[1..];
		if let Some(end) = tail.find('%') {
			let name = &tail[..end];
			if name.is_empty() {
				out.push('%');
			} else if let Ok(value) = std::env::var(name) {
				out.push_str(&value);
			} else {
				out.push('%');
				out.push_str(name);
				out.push('%');
			}
			rest = &tail[end + 1..];
		} else {
			out.push('%');
			rest = tail;
			break;
		}
	}
	out.push_str(rest);
	out
}

/// Uppercases an ASCII string the way the platform's case-insensitive string
/// compare does for our purposes (pattern matching, DLL name compare).
pub fn ascii_upper(s: &str) -> String {
	s.chars().map(|c| c.to_ascii_uppercase()).collect()
}

/// Encodes bytes as uppercase hex pairs with no separator, per the INI
/// backend's binary-value round-trip rule.
pub fn hex_encode(bytes: &[u8]) -> String {
	let mut out = String::with_capacity(bytes.len() * 2);
	for b in bytes {
		out.push_str(&format!("{:02X}", b));
	}
	out
}

/// Decodes uppercase (or lowercase) hex pairs into bytes. An odd-length
/// input is invalid per the spec's round-trip rule.
pub fn hex_decode(s: &str) -> Option<Vec<u8>> {
	if s.len() % 2 != 0 {
		return None;
	}
	let mut out = Vec::with_capacity(s.len() / 2);
	let bytes = s.as_bytes();
	let mut i = 0;
	while i < bytes.len() {
		let hi = (bytes[i] as char).to_digit(16)?;
		let lo = (bytes[i + 1] as char).to_digit(16)?;
		out.push(((hi << 4) | lo) as u8);
		i += 2;
	}
	Some(out)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hex_round_trip() {
		let bytes = [0u8, 1, 255, 16, 128];
		let enc = hex_encode(&bytes);
		assert_eq!(enc, "0001FF1080");
		assert_eq!(hex_decode(&enc).unwrap(), bytes);
	}

	#[test]
	fn hex_decode_rejects_odd_length() {
		assert!(hex_decode("ABC").is_none());
	}

	#[test]
	fn expand_env_vars_substitutes_known_var() {
		std::env::set_var("WINDHAWK_TEST_VAR", "C:\\Data");
		assert_eq!(expand_env_vars("%WINDHAWK_TEST_VAR%\\Mods"), "C:\\Data\\Mods");
	}

	#[test]
	fn expand_env_vars_leaves_unknown_var() {
		assert_eq!(expand_env_vars("%NO_SUCH_WINDHAWK_VAR%\\x"), "%NO_SUCH_WINDHAWK_VAR%\\x");
	}
}
