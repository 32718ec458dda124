/*!
Portable settings store (C1).

Uniform key/value access over either a registry subtree or an INI file.
Both backends round-trip bit-compatibly: integers, UTF-16 strings and
opaque byte buffers are the only three value kinds either backend knows
about.
!*/

use std::path::{Path, PathBuf};
use crate::error::{OsError, WhResult, WindhawkError};
use crate::util::{hex_decode, hex_encode, to_wide_null};
use crate::winapi::*;

/// One typed value a settings backend can store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SettingsValue {
	Int(i32),
	String(String),
	Binary(Vec<u8>),
}

/// Shared contract both backends implement. All operations are scoped to
/// one *section* (one registry key, or one `[Section]` in the INI file).
pub trait SettingsBackend {
	fn get_int(&self, section: &str, name: &str) -> WhResult<Option<i32>>;
	fn set_int(&self, section: &str, name: &str, value: i32) -> WhResult<()>;
	fn get_string(&self, section: &str, name: &str) -> WhResult<Option<String>>;
	fn set_string(&self, section: &str, name: &str, value: &str) -> WhResult<()>;
	fn get_binary(&self, section: &str, name: &str) -> WhResult<Option<Vec<u8>>>;
	fn set_binary(&self, section: &str, name: &str, value: &[u8]) -> WhResult<()>;
	fn remove(&self, section: &str, name: &str) -> WhResult<()>;
	fn enum_int_values(&self, section: &str) -> WhResult<Vec<(String, i32)>>;
	fn enum_string_values(&self, section: &str) -> WhResult<Vec<(String, String)>>;
	fn remove_section(&self, section: &str) -> WhResult<()>;
	/// Lists the immediate child names one level below `section` — e.g.
	/// `enum_subsections("Mods")` returns every mod name that has at least
	/// one `Mods/<name>/...` section present.
	fn enum_subsections(&self, section: &str) -> WhResult<Vec<String>>;
}

/// Either storage backend, selected once at startup by
/// [`crate::storage::StorageManager`]'s `Portable` flag.
pub enum PortableSettings {
	Registry(RegistrySettings),
	Ini(IniSettings),
}

impl SettingsBackend for PortableSettings {
	fn get_int(&self, section: &str, name: &str) -> WhResult<Option<i32>> {
		match self {
			PortableSettings::Registry(b) => b.get_int(section, name),
			PortableSettings::Ini(b) => b.get_int(section, name),
		}
	}
	fn set_int(&self, section: &str, name: &str, value: i32) -> WhResult<()> {
		match self {
			PortableSettings::Registry(b) => b.set_int(section, name, value),
			PortableSettings::Ini(b) => b.set_int(section, name, value),
		}
	}
	fn get_string(&self, section: &str, name: &str) -> WhResult<Option<String>> {
		match self {
			PortableSettings::Registry(b) => b.get_string(section, name),
			PortableSettings::Ini(b) => b.get_string(section, name),
		}
	}
	fn set_string(&self, section: &str, name: &str, value: &str) -> WhResult<()> {
		match self {
			PortableSettings::Registry(b) => b.set_string(section, name, value),
			PortableSettings::Ini(b) => b.set_string(section, name, value),
		}
	}
	fn get_binary(&self, section: &str, name: &str) -> WhResult<Option<Vec<u8>>> {
		match self {
			PortableSettings::Registry(b) => b.get_binary(section, name),
			PortableSettings::Ini(b) => b.get_binary(section, name),
		}
	}
	fn set_binary(&self, section: &str, name: &str, value: &[u8]) -> WhResult<()> {
		match self {
			PortableSettings::Registry(b) => b.set_binary(section, name, value),
			PortableSettings::Ini(b) => b.set_binary(section, name, value),
		}
	}
	fn remove(&self, section: &str, name: &str) -> WhResult<()> {
		match self {
			PortableSettings::Registry(b) => b.remove(section, name),
			PortableSettings::Ini(b) => b.remove(section, name),
		}
	}
	fn enum_int_values(&self, section: &str) -> WhResult<Vec<(String, i32)>> {
		match self {
			PortableSettings::Registry(b) => b.enum_int_values(section),
			PortableSettings::Ini(b) => b.enum_int_values(section),
		}
	}
	fn enum_string_values(&self, section: &str) -> WhResult<Vec<(String, String)>> {
		match self {
			PortableSettings::Registry(b) => b.enum_string_values(section),
			PortableSettings::Ini(b) => b.enum_string_values(section),
		}
	}
	fn remove_section(&self, section: &str) -> WhResult<()> {
		match self {
			PortableSettings::Registry(b) => b.remove_section(section),
			PortableSettings::Ini(b) => b.remove_section(section),
		}
	}
	fn enum_subsections(&self, section: &str) -> WhResult<Vec<String>> {
		match self {
			PortableSettings::Registry(b) => b.enum_subsections(section),
			PortableSettings::Ini(b) => b.enum_subsections(section),
		}
	}
}

//----------------------------------------------------------------
// Registry backend

/// `HKEY`-rooted backend. Keys are always opened with the 64-bit registry
/// view (`KEY_WOW64_64KEY`) regardless of the caller's own architecture,
/// so a 32-bit orchestrator and a 64-bit one see the same data.
pub struct RegistrySettings {
	root: HKEY,
	subtree: String,
}

unsafe impl Send for RegistrySettings {}
unsafe impl Sync for RegistrySettings {}

impl RegistrySettings {
	pub fn new(root: HKEY, subtree: impl Into<String>) -> RegistrySettings {
		RegistrySettings { root, subtree: subtree.into() }
	}

	fn open(&self, section: &str, write: bool) -> WhResult<HKEY> {
		let path = if section.is_empty() {
			self.subtree.clone()
		} else {
			format!("{}\\{}", self.subtree, section.replace('/', "\\"))
		};
		let wide = to_wide_null(&path);
		let access = if write { KEY_WRITE | KEY_WOW64_64KEY } else { KEY_READ | KEY_WOW64_64KEY };
		let mut key = std::ptr::null_mut();
		let rv = if write {
			let mut disposition = 0;
			unsafe {
				RegCreateKeyExW(
					self.root,
					wide.as_ptr(),
					0,
					std::ptr::null_mut(),
					0,
					access,
					std::ptr::null_mut(),
					&mut key,
					&mut disposition,
				)
			}
		} else {
			unsafe { RegOpenKeyExW(self.root, wide.as_ptr(), 0, access, &mut key) }
		};
		if rv as u32 != 0 {
			Err(WindhawkError::Os(unsafe { OsError::from_inner(rv as u32) }))
		} else {
			Ok(key)
		}
	}
}

impl SettingsBackend for RegistrySettings {
	fn get_int(&self, section: &str, name: &str) -> WhResult<Option<i32>> {
		// Registry values can be DWORD or SZ; try the native numeric form first.
		let key = match self.open(section, false) {
			Ok(k) => k,
			Err(_) => return Ok(None),
		};
		let name_w = to_wide_null(name);
		let mut value: DWORD = 0;
		let mut size = std::mem::size_of::<DWORD>() as DWORD;
		let mut kind: DWORD = 0;
		let rv = unsafe {
			RegGetValueW(
				key,
				std::ptr::null(),
				name_w.as_ptr(),
				0x0000_ffff, // RRF_RT_ANY
				&mut kind,
				&mut value as *mut _ as *mut _,
				&mut size,
			)
		};
		unsafe { RegCloseKey(key) };
		if rv as u32 == 0 {
			if kind == REG_SZ || kind == REG_EXPAND_SZ {
				// Read again as a string and parse with C integer semantics.
				return Ok(self.get_string(section, name)?.and_then(|s| s.trim().parse::<i32>().ok()));
			}
			Ok(Some(value as i32))
		} else {
			Ok(None)
		}
	}

	fn set_int(&self, section: &str, name: &str, value: i32) -> WhResult<()> {
		let key = self.open(section, true)?;
		let name_w = to_wide_null(name);
		let v = value as u32;
		let rv = unsafe {
			RegSetValueExW(key, name_w.as_ptr(), 0, REG_DWORD, &v as *const _ as *const u8, std::mem::size_of::<DWORD>() as u32)
		};
		unsafe { RegCloseKey(key) };
		if rv as u32 != 0 {
			Err(WindhawkError::Os(unsafe { OsError::from_inner(rv as u32) }))
		} else {
			Ok(())
		}
	}

	fn get_string(&self, section: &str, name: &str) -> WhResult<Option<String>> {
		let key = match self.open(section, false) {
			Ok(k) => k,
			Err(_) => return Ok(None),
		};
		let name_w = to_wide_null(name);
		let mut kind: DWORD = 0;
		let mut size: DWORD = 0;
		// First query for the size, tolerating a concurrent writer by
		// retrying on ERROR_MORE_DATA.
		loop {
			let rv = unsafe {
				RegGetValueW(key, std::ptr::null(), name_w.as_ptr(), 0x0000_ffff, &mut kind, std::ptr::null_mut(), &mut size)
			};
			if rv as u32 != 0 {
				unsafe { RegCloseKey(key) };
				return Ok(None);
			}
			if kind == REG_DWORD {
				unsafe { RegCloseKey(key) };
				return Ok(self.get_int(section, name)?.map(|i| i.to_string()));
			}
			let mut buf: Vec<u16> = vec![0; size as usize / 2 + 1];
			let mut actual = (buf.len() * 2) as DWORD;
			let rv = unsafe {
				RegGetValueW(key, std::ptr::null(), name_w.as_ptr(), 0x0000_ffff, &mut kind, buf.as_mut_ptr() as *mut _, &mut actual)
			};
			if rv as u32 == 234 /* ERROR_MORE_DATA */ {
				size = actual;
				continue;
			}
			unsafe { RegCloseKey(key) };
			if rv as u32 != 0 {
				return Ok(None);
			}
			let s = crate::util::from_wide_lossy(&buf);
			return Ok(Some(s));
		}
	}

	fn set_string(&self, section: &str, name: &str, value: &str) -> WhResult<()> {
		let key = self.open(section, true)?;
		let name_w = to_wide_null(name);
		let value_w = to_wide_null(value);
		let bytes = value_w.len() * 2;
		let rv = unsafe { RegSetValueExW(key, name_w.as_ptr(), 0, REG_SZ, value_w.as_ptr() as *const u8, bytes as u32) };
		unsafe { RegCloseKey(key) };
		if rv as u32 != 0 {
			Err(WindhawkError::Os(unsafe { OsError::from_inner(rv as u32) }))
		} else {
			Ok(())
		}
	}

	fn get_binary(&self, section: &str, name: &str) -> WhResult<Option<Vec<u8>>> {
		let key = match self.open(section, false) {
			Ok(k) => k,
			Err(_) => return Ok(None),
		};
		let name_w = to_wide_null(name);
		let mut kind: DWORD = 0;
		let mut size: DWORD = 0;
		let rv = unsafe { RegGetValueW(key, std::ptr::null(), name_w.as_ptr(), 0x0000_0008 /* RRF_RT_REG_BINARY */, &mut kind, std::ptr::null_mut(), &mut size) };
		if rv as u32 != 0 {
			unsafe { RegCloseKey(key) };
			return Ok(None);
		}
		let mut buf = vec![0u8; size as usize];
		let rv = unsafe { RegGetValueW(key, std::ptr::null(), name_w.as_ptr(), 0x0000_0008, &mut kind, buf.as_mut_ptr() as *mut _, &mut size) };
		unsafe { RegCloseKey(key) };
		if rv as u32 != 0 {
			Ok(None)
		} else {
			Ok(Some(buf))
		}
	}

	fn set_binary(&self, section: &str, name: &str, value: &[u8]) -> WhResult<()> {
		let key = self.open(section, true)?;
		let name_w = to_wide_null(name);
		let rv = unsafe { RegSetValueExW(key, name_w.as_ptr(), 0, REG_BINARY, value.as_ptr(), value.len() as u32) };
		unsafe { RegCloseKey(key) };
		if rv as u32 != 0 {
			Err(WindhawkError::Os(unsafe { OsError::from_inner(rv as u32) }))
		} else {
			Ok(())
		}
	}

	fn remove(&self, section: &str, name: &str) -> WhResult<()> {
		let key = self.open(section, true)?;
		let name_w = to_wide_null(name);
		let rv = unsafe { RegDeleteValueW(key, name_w.as_ptr()) };
		unsafe { RegCloseKey(key) };
		if rv as u32 != 0 && rv as u32 != 2 /* ERROR_FILE_NOT_FOUND */ {
			Err(WindhawkError::Os(unsafe { OsError::from_inner(rv as u32) }))
		} else {
			Ok(())
		}
	}

	fn enum_int_values(&self, section: &str) -> WhResult<Vec<(String, i32)>> {
		let names = self.enum_value_names(section)?;
		let mut out = Vec::with_capacity(names.len());
		for name in names {
			if let Some(v) = self.get_int(section, &name)? {
				out.push((name, v));
			}
		}
		Ok(out)
	}

	fn enum_string_values(&self, section: &str) -> WhResult<Vec<(String, String)>> {
		let names = self.enum_value_names(section)?;
		let mut out = Vec::with_capacity(names.len());
		for name in names {
			if let Some(v) = self.get_string(section, &name)? {
				out.push((name, v));
			}
		}
		Ok(out)
	}

	fn remove_section(&self, section: &str) -> WhResult<()> {
		let path = if section.is_empty() { self.subtree.clone() } else { format!("{}\\{}", self.subtree, section.replace('/', "\\")) };
		let wide = to_wide_null(&path);
		let rv = unsafe { RegDeleteTreeW(self.root, wide.as_ptr()) };
		if rv as u32 != 0 && rv as u32 != 2 {
			Err(WindhawkError::Os(unsafe { OsError::from_inner(rv as u32) }))
		} else {
			Ok(())
		}
	}

	fn enum_subsections(&self, section: &str) -> WhResult<Vec<String>> {
		let key = match self.open(section, false) {
			Ok(k) => k,
			Err(_) => return Ok(Vec::new()),
		};
		let mut names = Vec::new();
		let mut index = 0;
		loop {
			let mut buf = [0u16; 256];
			let mut len = buf.len() as DWORD;
			let rv = unsafe {
				RegEnumKeyExW(key, index, buf.as_mut_ptr(), &mut len, std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut())
			};
			if rv as u32 == 259 /* ERROR_NO_MORE_ITEMS */ {
				break;
			}
			if rv as u32 != 0 {
				break;
			}
			names.push(crate::util::from_wide_lossy(&buf[..len as usize]));
			index += 1;
		}
		unsafe { RegCloseKey(key) };
		Ok(names)
	}
}

impl RegistrySettings {
	fn enum_value_names(&self, section: &str) -> WhResult<Vec<String>> {
		let key = match self.open(section, false) {
			Ok(k) => k,
			Err(_) => return Ok(Vec::new()),
		};
		let mut names = Vec::new();
		let mut index = 0;
		loop {
			let mut buf = [0u16; 512];
			let mut len = buf.len() as DWORD;
			let rv = unsafe { RegEnumValueW(key, index, buf.as_mut_ptr(), &mut len, std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut(), std::ptr::null_mut()) };
			if rv as u32 == 259 /* ERROR_NO_MORE_ITEMS */ {
				break;
			}
			if rv as u32 != 0 {
				break;
			}
			names.push(crate::util::from_wide_lossy(&buf[..len as usize]));
			index += 1;
		}
		unsafe { RegCloseKey(key) };
		Ok(names)
	}
}

//----------------------------------------------------------------
// INI backend

/// `GetPrivateProfileString`-style backend over a single INI file.
pub struct IniSettings {
	path: PathBuf,
}

impl IniSettings {
	pub fn new(path: impl Into<PathBuf>) -> IniSettings {
		IniSettings { path: path.into() }
	}

	fn path_wide(&self) -> Vec<u16> {
		to_wide_null(&self.path.to_string_lossy())
	}

	/// Creates the file with a UTF-16 LE BOM if it does not exist yet, so
	/// `GetPrivateProfileStringW` treats it as Unicode.
	fn ensure_unicode_file(path: &Path) -> WhResult<()> {
		if !path.exists() {
			if let Some(parent) = path.parent() {
				std::fs::create_dir_all(parent)?;
			}
			std::fs::write(path, [0xFFu8, 0xFE])?;
		}
		Ok(())
	}
}

impl SettingsBackend for IniSettings {
	fn get_int(&self, section: &str, name: &str) -> WhResult<Option<i32>> {
		Ok(self.get_string(section, name)?.and_then(|s| s.trim().parse::<i32>().ok()))
	}

	fn set_int(&self, section: &str, name: &str, value: i32) -> WhResult<()> {
		self.set_string(section, name, &value.to_string())
	}

	fn get_string(&self, section: &str, name: &str) -> WhResult<Option<String>> {
		let section_w = to_wide_null(section);
		let name_w = to_wide_null(name);
		let path_w = self.path_wide();
		let mut buf = vec![0u16; 1024];
		let len = unsafe {
			GetPrivateProfileStringW(
				section_w.as_ptr(),
				name_w.as_ptr(),
				to_wide_null("").as_ptr(),
				buf.as_mut_ptr(),
				buf.len() as u32,
				path_w.as_ptr(),
			)
		};
		if len == 0 {
			Ok(None)
		} else {
			Ok(Some(crate::util::from_wide_lossy(&buf[..len as usize])))
		}
	}

	fn set_string(&self, section: &str, name: &str, value: &str) -> WhResult<()> {
		Self::ensure_unicode_file(&self.path)?;
		let section_w = to_wide_null(section);
		let name_w = to_wide_null(name);
		let value_w = to_wide_null(value);
		let path_w = self.path_wide();
		let ok = unsafe { WritePrivateProfileStringW(section_w.as_ptr(), name_w.as_ptr(), value_w.as_ptr(), path_w.as_ptr()) };
		if ok == 0 {
			Err(WindhawkError::Os(OsError::last()))
		} else {
			Ok(())
		}
	}

	fn get_binary(&self, section: &str, name: &str) -> WhResult<Option<Vec<u8>>> {
		Ok(self.get_string(section, name)?.and_then(|s| hex_decode(&s)))
	}

	fn set_binary(&self, section: &str, name: &str, value: &[u8]) -> WhResult<()> {
		self.set_string(section, name, &hex_encode(value))
	}

	fn remove(&self, section: &str, name: &str) -> WhResult<()> {
		let section_w = to_wide_null(section);
		let name_w = to_wide_null(name);
		let path_w = self.path_wide();
		let ok = unsafe { WritePrivateProfileStringW(section_w.as_ptr(), name_w.as_ptr(), std::ptr::null(), path_w.as_ptr()) };
		if ok == 0 {
			Err(WindhawkError::Os(OsError::last()))
		} else {
			Ok(())
		}
	}

	fn enum_int_values(&self, section: &str) -> WhResult<Vec<(String, i32)>> {
		let mut out = Vec::new();
		for (name, value) in self.enum_string_values(section)? {
			if let Ok(i) = value.trim().parse::<i32>() {
				out.push((name, i));
			}
		}
		Ok(out)
	}

	fn enum_string_values(&self, section: &str) -> WhResult<Vec<(String, String)>> {
		let section_w = to_wide_null(section);
		let path_w = self.path_wide();
		let mut buf = vec![0u16; 4096];
		loop {
			let len = unsafe { GetPrivateProfileStringW(section_w.as_ptr(), std::ptr::null(), to_wide_null("").as_ptr(), buf.as_mut_ptr(), buf.len() as u32, path_w.as_ptr()) };
			if (len as usize) < buf.len() - 2 {
				let mut out = Vec::new();
				for name in split_nul_list(&buf[..len as usize]) {
					if let Some(value) = self.get_string(section, &name)? {
						out.push((name, value));
					}
				}
				return Ok(out);
			}
			buf.resize(buf.len() * 2, 0);
		}
	}

	fn remove_section(&self, section: &str) -> WhResult<()> {
		let section_w = to_wide_null(section);
		let path_w = self.path_wide();
		let ok = unsafe { WritePrivateProfileStringW(section_w.as_ptr(), std::ptr::null(), std::ptr::null(), path_w.as_ptr()) };
		if ok == 0 {
			Err(WindhawkError::Os(OsError::last()))
		} else {
			Ok(())
		}
	}

	/// Section headers in this file look like `Mods/<name>/Config` or
	/// `Mods/<name>/Settings`; this scans every header once and picks out
	/// the distinct `<name>` component one level below `section`.
	fn enum_subsections(&self, section: &str) -> WhResult<Vec<String>> {
		let path_w = self.path_wide();
		let prefix = format!("{}/", section);
		let mut buf = vec![0u16; 8192];
		loop {
			let len = unsafe { GetPrivateProfileSectionNamesW(buf.as_mut_ptr(), buf.len() as u32, path_w.as_ptr()) };
			if (len as usize) < buf.len() - 2 {
				let mut seen = Vec::new();
				for name in split_nul_list(&buf[..len as usize]) {
					if let Some(rest) = name.strip_prefix(&prefix) {
						let child = rest.split('/').next().unwrap_or("");
						if !child.is_empty() && !seen.contains(&child.to_string()) {
							seen.push(child.to_string());
						}
					}
				}
				return Ok(seen);
			}
			buf.resize(buf.len() * 2, 0);
		}
	}
}

fn split_nul_list(buf: &[u16]) -> Vec<String> {
	buf.split(|&c| c == 0)
		.filter(|s| !s.is_empty())
		.map(crate::util::from_wide_lossy)
		.collect()
}

use crate::FromInner;

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn ini_int_round_trip() {
		let dir = std::env::temp_dir().join("windhawk-core-test-settings-int");
		let _ = std::fs::remove_file(&dir);
		let ini = IniSettings::new(&dir);
		ini.set_int("Engine", "Value", -12345).unwrap();
		assert_eq!(ini.get_int("Engine", "Value").unwrap(), Some(-12345));
		let _ = std::fs::remove_file(&dir);
	}

	#[test]
	fn ini_binary_round_trip_is_hex_pairs() {
		let dir = std::env::temp_dir().join("windhawk-core-test-settings-bin");
		let _ = std::fs::remove_file(&dir);
		let ini = IniSettings::new(&dir);
		let bytes = [0u8, 1, 255, 16];
		ini.set_binary("Mod", "Cache", &bytes).unwrap();
		assert_eq!(ini.get_string("Mod", "Cache").unwrap().unwrap(), "0001FF10");
		assert_eq!(ini.get_binary("Mod", "Cache").unwrap(), Some(bytes.to_vec()));
		let _ = std::fs::remove_file(&dir);
	}
}
