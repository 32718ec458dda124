/*!
Storage manager (C2).

Resolves the on-disk/registry layout once per process and hands out the
frozen path bundle plus a ready-to-use [`PortableSettings`] backend.
!*/

use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use crate::error::{WhResult, WindhawkError};
use crate::settings::{IniSettings, PortableSettings, RegistrySettings, SettingsBackend};
use crate::util::{expand_env_vars, to_wide_null};
use crate::winapi::*;
use crate::FromInner;

/// Frozen path bundle, computed once from `engine.ini`.
#[derive(Clone, Debug)]
pub struct Paths {
	pub engine_root: PathBuf,
	pub app_data: PathBuf,
	pub portable: bool,
	pub registry_key: Option<String>,
}

impl Paths {
	pub fn mods_dir(&self, arch: &str) -> PathBuf {
		self.app_data.join("Mods").join(arch)
	}
	pub fn engine_dll(&self, arch: &str) -> PathBuf {
		self.engine_root.join(arch).join("windhawk.dll")
	}
	pub fn symbols_dir(&self) -> PathBuf {
		self.app_data.join("Symbols")
	}
	pub fn mods_writable_dir(&self) -> PathBuf {
		self.app_data.join("ModsWritable")
	}
	pub fn mod_status_file(&self, instance_id: &str) -> PathBuf {
		self.mods_writable_dir().join("mod-status").join(instance_id)
	}
	pub fn mod_task_file(&self, instance_id: &str) -> PathBuf {
		self.mods_writable_dir().join("mod-task").join(instance_id)
	}
	pub fn mod_storage_dir(&self, mod_name: &str) -> PathBuf {
		self.mods_writable_dir().join("mod-storage").join(mod_name)
	}
	pub fn settings_ini_path(&self) -> PathBuf {
		self.app_data.join("settings.ini")
	}
}

/// Process-wide storage manager singleton.
pub struct StorageManager {
	paths: Paths,
	settings: PortableSettings,
}

static INSTANCE: OnceLock<StorageManager> = OnceLock::new();

impl StorageManager {
	/// Returns the lazily-initialized process-wide instance, panicking if it
	/// hasn't been set up yet. Every call site in the mod runtime only runs
	/// after `InjectInit` has already called [`StorageManager::try_global`]
	/// successfully, so the panic is unreachable in practice.
	pub fn global() -> &'static StorageManager {
		INSTANCE.get().expect("storage manager not initialized")
	}

	/// Lazily initializes the process-wide instance, returning the error
	/// instead of panicking on failure. This is what `InjectInit` calls
	/// first, so a bad `engine.ini` surfaces as a clean `false` return to
	/// the session manager instead of tearing down the process.
	pub fn try_global() -> WhResult<&'static StorageManager> {
		if let Some(inst) = INSTANCE.get() {
			return Ok(inst);
		}
		let inst = StorageManager::new()?;
		Ok(INSTANCE.get_or_init(|| inst))
	}

	fn new() -> WhResult<StorageManager> {
		let engine_root = engine_root_dir()?;
		let ini_path = engine_root.join("engine.ini");
		let ini = IniSettings::new(&ini_path);

		let app_data_raw = ini
			.get_string("Storage", "AppDataPath")?
			.ok_or_else(|| WindhawkError::Config("engine.ini missing [Storage] AppDataPath".into()))?;
		let portable = ini.get_int("Storage", "Portable")?.unwrap_or(0) != 0;
		let registry_key = ini.get_string("Storage", "RegistryKey")?;

		let app_data = normalize_app_data_path(&app_data_raw);
		std::fs::create_dir_all(&app_data).or_else(|e| {
			if app_data.is_dir() { Ok(()) } else { Err(e) }
		})?;

		let settings = if portable {
			PortableSettings::Ini(IniSettings::new(app_data.join("settings.ini")))
		} else {
			let key = registry_key
				.clone()
				.ok_or_else(|| WindhawkError::Config("Portable=0 but RegistryKey missing".into()))?;
			PortableSettings::Registry(RegistrySettings::new(HKEY_LOCAL_MACHINE, strip_hklm_prefix(&key)))
		};

		Ok(StorageManager {
			paths: Paths { engine_root, app_data, portable, registry_key },
			settings,
		})
	}

	pub fn paths(&self) -> &Paths {
		&self.paths
	}

	pub fn settings(&self) -> &PortableSettings {
		&self.settings
	}

	/// Every mod name with at least one `Mods/<name>/...` section present.
	pub fn enum_mods(&self) -> WhResult<Vec<String>> {
		self.settings.enum_subsections("Mods")
	}
}

fn strip_hklm_prefix(key: &str) -> String {
	key.trim_start_matches("HKEY_LOCAL_MACHINE\\").trim_start_matches("HKLM\\").to_string()
}

fn engine_root_dir() -> WhResult<PathBuf> {
	let base = crate::module::image_base();
	let mut buf = vec![0u16; 1024];
	let len = unsafe { GetModuleFileNameW(base as HMODULE, buf.as_mut_ptr(), buf.len() as u32) };
	if len == 0 {
		return Err(WindhawkError::Os(crate::error::OsError::last()));
	}
	let path = PathBuf::from(crate::util::from_wide_lossy(&buf[..len as usize]));
	Ok(path.parent().map(Path::to_path_buf).unwrap_or(path))
}

/// Normalizes `AppDataPath`: expands env vars, folds a 32-bit view of
/// `%ProgramFiles%` onto the 64-bit one under WOW64, and substitutes
/// `%ProgramData%` manually when the variable itself is unset (as happens
/// inside `csrss.exe`).
fn normalize_app_data_path(raw: &str) -> PathBuf {
	let mut s = raw.to_string();
	if std::env::var("ProgramData").is_err() {
		if let Some(program_data) = known_program_data_fallback() {
			s = s.replace("%ProgramData%", &program_data);
		}
	}
	let expanded = expand_env_vars(&s);
	let expanded = expanded.replace("Program Files (x86)", "Program Files");
	PathBuf::from(expanded)
}

fn known_program_data_fallback() -> Option<String> {
	if let Ok(drive) = std::env::var("SystemDrive") {
		return Some(format!("{}\\ProgramData", drive));
	}
	Some("C:\\ProgramData".to_string())
}

/// A reusable, one-shot change-notification handle for `Mods/` reloads.
pub enum ModConfigChangeNotification {
	Portable { dir_handle: HANDLE, mods_dir: Vec<u16> },
	Registry { event: HANDLE, key: HKEY },
}

unsafe impl Send for ModConfigChangeNotification {}

impl ModConfigChangeNotification {
	pub fn new(paths: &Paths) -> WhResult<ModConfigChangeNotification> {
		if paths.portable {
			let mods_dir = to_wide_null(&paths.mods_dir("").to_string_lossy());
			let handle = unsafe {
				FindFirstChangeNotificationW(
					mods_dir.as_ptr(),
					FALSE,
					0x0000_0001 /* FILE_NOTIFY_CHANGE_FILE_NAME */ | 0x0000_0010, /* FILE_NOTIFY_CHANGE_LAST_WRITE */
				)
			};
			if handle == INVALID_HANDLE_VALUE {
				return Err(WindhawkError::Os(crate::error::OsError::last()));
			}
			Ok(ModConfigChangeNotification::Portable { dir_handle: handle, mods_dir })
		} else {
			let registry_key = paths
				.registry_key
				.as_deref()
				.ok_or_else(|| WindhawkError::Config("Portable=0 but RegistryKey missing".into()))?;
			let mods_key_path = format!("{}\\Mods", strip_hklm_prefix(registry_key));
			let mods_key_path_wide = to_wide_null(&mods_key_path);
			let mut key: HKEY = std::ptr::null_mut();
			let status = unsafe {
				RegOpenKeyExW(HKEY_LOCAL_MACHINE, mods_key_path_wide.as_ptr(), 0, KEY_NOTIFY, &mut key)
			};
			if status != 0 {
				return Err(WindhawkError::Os(unsafe { crate::error::OsError::from_inner(status as u32) }));
			}
			let event = unsafe { CreateEventW(std::ptr::null_mut(), FALSE, FALSE, std::ptr::null()) };
			if event.is_null() {
				unsafe { RegCloseKey(key) };
				return Err(WindhawkError::Os(crate::error::OsError::last()));
			}
			let notification = ModConfigChangeNotification::Registry { event, key };
			notification.arm_registry_notification()?;
			Ok(notification)
		}
	}

	fn arm_registry_notification(&self) -> WhResult<()> {
		if let ModConfigChangeNotification::Registry { event, key } = self {
			let status = unsafe {
				RegNotifyChangeKeyValue(*key, TRUE, REG_NOTIFY_CHANGE_NAME | REG_NOTIFY_CHANGE_LAST_SET, *event, TRUE)
			};
			if status != 0 {
				return Err(WindhawkError::Os(unsafe { crate::error::OsError::from_inner(status as u32) }));
			}
		}
		Ok(())
	}

	pub fn get_handle(&self) -> HANDLE {
		match self {
			ModConfigChangeNotification::Portable { dir_handle, .. } => *dir_handle,
			ModConfigChangeNotification::Registry { event, .. } => *event,
		}
	}

	/// Rearms the notification after it has fired once.
	pub fn continue_monitoring(&self) -> WhResult<()> {
		match self {
			ModConfigChangeNotification::Portable { dir_handle, .. } => {
				if unsafe { FindNextChangeNotification(*dir_handle) } == 0 {
					Err(WindhawkError::Os(crate::error::OsError::last()))
				} else {
					Ok(())
				}
			}
			ModConfigChangeNotification::Registry { .. } => self.arm_registry_notification(),
		}
	}

	/// Registry change notifications support thread-agnostic delivery
	/// (`REG_NOTIFY_THREAD_AGNOSTIC`) from Windows 8 onward; directory
	/// watches are always thread-agnostic.
	pub fn can_monitor_across_threads(&self) -> bool {
		match self {
			ModConfigChangeNotification::Portable { .. } => true,
			ModConfigChangeNotification::Registry { .. } => windows_version_at_least_8(),
		}
	}
}

impl Drop for ModConfigChangeNotification {
	fn drop(&mut self) {
		unsafe {
			match self {
				ModConfigChangeNotification::Portable { dir_handle, .. } => {
					FindCloseChangeNotification(*dir_handle);
				}
				ModConfigChangeNotification::Registry { event, key } => {
					CloseHandle(*event);
					RegCloseKey(*key);
				}
			}
		}
	}
}

fn windows_version_at_least_8() -> bool {
	unsafe {
		let mut info: OSVERSIONINFOEXW = std::mem::zeroed();
		info.dwOSVersionInfoSize = std::mem::size_of::<OSVERSIONINFOEXW>() as u32;
		#[allow(deprecated)]
		if GetVersionExW(&mut info as *mut _ as *mut _) != 0 {
			(info.dwMajorVersion, info.dwMinorVersion) >= (6, 2)
		} else {
			true
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn app_data_path_expands_program_data_fallback() {
		std::env::remove_var("ProgramData");
		std::env::set_var("SystemDrive", "C:");
		let p = normalize_app_data_path("%ProgramData%\\Windhawk");
		assert_eq!(p, PathBuf::from("C:\\ProgramData\\Windhawk"));
	}

	#[test]
	fn wow64_program_files_folds_to_64_bit_view() {
		let p = normalize_app_data_path("C:\\Program Files (x86)\\Windhawk");
		assert_eq!(p, PathBuf::from("C:\\Program Files\\Windhawk"));
	}
}
