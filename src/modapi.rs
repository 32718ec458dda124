/*!
Mod runtime (C9).

Loads one mod DLL, dispatches its lifecycle exports, and exposes the
mod-facing API surface (storage, settings, hooks, symbols, disasm, URL
fetch). Every call is routed through a [`ModToken`] identifying which mod
is calling, so hook operations queue under the right identity and
storage/setting reads are scoped to the right `Mods/<mod>` tree.

Mods here are modeled as safe Rust callers of these methods rather than
as `extern "C"` exports of this crate — the C ABI surface this engine
exposes to the outside world is confined to [`crate::abi`], per the
contract an injected mod DLL would actually link against in the full
system. The lifecycle exports a mod DLL implements (`Wh_ModInit` etc.)
are still resolved by decorated name via `GetProcAddress`, matching how
the real loader finds them.
!*/

use std::ffi::CString;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::disasm::DisasmResult;
use crate::error::{OsError, WhResult, WindhawkError};
use crate::hookqueue::{HookIdentity, HookQueue, IdentityFilter};
use crate::session::CustomizationSession;
use crate::settings::SettingsBackend;
use crate::storage::StorageManager;
use crate::symbols::{self, Callbacks, Symbol, SymbolEnum, UndecorateMode};
use crate::util::to_wide_null;
use crate::winapi::*;

/// One argument to a `printf`-style mod-settings key, e.g.
/// `get_int_setting("item[%d]", FormatArg::Int(3))`. Re-implements the
/// original's variadic `vsnprintf` semantics with a fixed small arg list
/// rather than routing through a typed API, since mods depend on the
/// exact substitution order.
#[derive(Copy, Clone)]
pub enum FormatArg<'a> {
	Int(i32),
	Str(&'a str),
}

fn format_key(template: &str, args: &[FormatArg]) -> String {
	let mut out = String::with_capacity(template.len());
	let mut chars = template.chars().peekable();
	let mut arg_index = 0;
	while let Some(c) = chars.next() {
		if c != '%' {
			out.push(c);
			continue;
		}
		match chars.peek() {
			Some('d') => {
				chars.next();
				if let Some(FormatArg::Int(v)) = args.get(arg_index) {
					out.push_str(&v.to_string());
				}
				arg_index += 1;
			}
			Some('s') => {
				chars.next();
				if let Some(FormatArg::Str(v)) = args.get(arg_index) {
					out.push_str(v);
				}
				arg_index += 1;
			}
			Some('%') => {
				chars.next();
				out.push('%');
			}
			_ => out.push('%'),
		}
	}
	out
}

type WhModInitFn = unsafe extern "C" fn() -> BOOL;
type WhModVoidFn = unsafe extern "C" fn();
type WhModSettingsChangedFn = unsafe extern "C" fn(*mut BOOL) -> BOOL;

/// Resolved, optional lifecycle exports of one mod DLL.
struct ModExports {
	init: Option<WhModInitFn>,
	after_init: Option<WhModVoidFn>,
	before_uninit: Option<WhModVoidFn>,
	uninit: Option<WhModVoidFn>,
	settings_changed: Option<WhModSettingsChangedFn>,
	internal_ptr_slot: Option<*mut usize>,
}

unsafe impl Send for ModExports {}

impl ModExports {
	fn resolve(module: HMODULE) -> ModExports {
		unsafe fn find<T>(module: HMODULE, name: &str) -> Option<T> {
			let c = CString::new(name).ok()?;
			GetProcAddress(module, c.as_ptr() as *const i8).map(|addr| std::mem::transmute_copy(&addr))
		}
		unsafe {
			ModExports {
				init: find(module, "Wh_ModInit"),
				after_init: find(module, "Wh_ModAfterInit"),
				before_uninit: find(module, "Wh_ModBeforeUninit"),
				uninit: find(module, "Wh_ModUninit"),
				settings_changed: find(module, "Wh_ModSettingsChanged"),
				internal_ptr_slot: find::<*mut usize>(module, "InternalWhModPtr"),
			}
		}
	}
}

/// Lifecycle phase a loaded mod is in; hook-queue operations are only
/// accepted in certain phases per spec's programmer-error rule.
#[derive(Copy, Clone, Eq, PartialEq, Debug)]
pub enum ModPhase {
	Constructed,
	Initialized,
	BeforeUninit,
	Uninitialized,
}

/// Identity token passed to (and held by) one loaded mod; the engine
/// writes its address into the mod's `InternalWhModPtr` slot before
/// calling `Wh_ModInit`, mirroring the original duck-typed export
/// contract.
pub struct ModToken {
	pub name: String,
	pub identity: HookIdentity,
	hooks: Arc<HookQueue>,
	unloading: AtomicBool,
	phase: parking_lot::Mutex<ModPhase>,
	instance_id: String,
	status_file: parking_lot::Mutex<Option<HANDLE>>,
	task_file: parking_lot::Mutex<Option<HANDLE>>,
}

impl ModToken {
	fn new(name: String, identity: HookIdentity, hooks: Arc<HookQueue>) -> WhResult<ModToken> {
		let instance_id = generate_mod_instance_id(&name)?;
		Ok(ModToken {
			name,
			identity,
			hooks,
			unloading: AtomicBool::new(false),
			phase: parking_lot::Mutex::new(ModPhase::Constructed),
			instance_id,
			status_file: parking_lot::Mutex::new(None),
			task_file: parking_lot::Mutex::new(None),
		})
	}

	/// `"<orch-pid>_<orch-create-time-100ns>_<self-pid>_<mod-name>"`,
	/// unique across every session on the machine; the file name used for
	/// this mod's status/task metadata files.
	pub fn instance_id(&self) -> &str {
		&self.instance_id
	}

	/// Reports this mod's coarse lifecycle state via a transient,
	/// delete-on-close file so an external task-manager-style view can
	/// show "Loading...", "Loaded", "Unloaded" per instance without
	/// polling the process itself. `None` clears the file.
	pub fn set_status(&self, status: Option<&str>) {
		self.set_metadata(&self.status_file, status, ModMetadataCategory::Status);
	}

	/// Same as `set_status`, but for a short-lived current activity
	/// (symbol download progress, init/uninit) rather than the coarse
	/// loaded/unloaded state.
	pub fn set_task(&self, task: Option<&str>) {
		self.set_metadata(&self.task_file, task, ModMetadataCategory::Task);
	}

	fn set_metadata(&self, slot: &parking_lot::Mutex<Option<HANDLE>>, value: Option<&str>, category: ModMetadataCategory) {
		let mut guard = slot.lock();
		match value {
			None => {
				if let Some(handle) = guard.take() {
					unsafe { CloseHandle(handle) };
				}
			}
			Some(v) => {
				if guard.is_none() {
					match create_mod_metadata_file(category, &self.instance_id) {
						Ok(handle) => *guard = Some(handle),
						Err(e) => {
							log::error!("mod metadata file ({:?}) create failed: {}", category, e);
							return;
						}
					}
				}
				if let Some(handle) = *guard {
					let full_value = format!("{}|{}", current_process_image_filename(), v);
					write_mod_metadata_value(handle, &full_value);
				}
			}
		}
	}

	fn set_phase(&self, phase: ModPhase) {
		*self.phase.lock() = phase;
	}

	fn phase(&self) -> ModPhase {
		*self.phase.lock()
	}

	/// Polled by `hook_symbols` at <=1 Hz; true once the mod has started
	/// unloading, so a long-running symbol fetch aborts without error and
	/// without persisting a partial cache.
	pub fn should_abort(&self) -> bool {
		self.unloading.load(Ordering::Acquire) || self.phase() == ModPhase::BeforeUninit || self.phase() == ModPhase::Uninitialized
	}

	fn settings_section(&self) -> String {
		format!("Mods/{}/Settings", self.name)
	}
	fn storage_section(&self) -> String {
		format!("ModsWritable/{}/LocalStorage", self.name)
	}
	fn cache_section(&self) -> String {
		format!("ModsWritable/{}/SymbolCache", self.name)
	}

	//-------------------------------------------------------------
	// Logging

	pub fn is_log_enabled(&self) -> bool {
		crate::logger::verbosity_for_current_thread() >= crate::logger::Verbosity::Info
	}

	/// Writes `"[WH] [<mod>] <line>\n"` to the debug stream, truncated to
	/// 1024 characters as spec requires.
	pub fn log(&self, line: &str) {
		let mut truncated: String = line.chars().take(1024).collect();
		truncated.push('\n');
		log::info!("[WH] [{}] {}", self.name, truncated.trim_end_matches('\n'));
	}

	//-------------------------------------------------------------
	// Mod-private storage

	pub fn get_int_value(&self, name: &str) -> Option<i32> {
		StorageManager::global().settings().get_int(&self.storage_section(), name).ok().flatten()
	}
	pub fn set_int_value(&self, name: &str, value: i32) -> bool {
		StorageManager::global().settings().set_int(&self.storage_section(), name, value).is_ok()
	}
	pub fn get_string_value(&self, name: &str) -> Option<String> {
		StorageManager::global().settings().get_string(&self.storage_section(), name).ok().flatten()
	}
	pub fn set_string_value(&self, name: &str, value: &str) -> bool {
		StorageManager::global().settings().set_string(&self.storage_section(), name, value).is_ok()
	}
	pub fn get_binary_value(&self, name: &str) -> Option<Vec<u8>> {
		StorageManager::global().settings().get_binary(&self.storage_section(), name).ok().flatten()
	}
	pub fn set_binary_value(&self, name: &str, value: &[u8]) -> bool {
		StorageManager::global().settings().set_binary(&self.storage_section(), name, value).is_ok()
	}
	pub fn delete_value(&self, name: &str) -> bool {
		StorageManager::global().settings().remove(&self.storage_section(), name).is_ok()
	}

	/// `ModsWritable/mod-storage/<mod>/`, created lazily on first access.
	pub fn get_mod_storage_path(&self) -> WhResult<PathBuf> {
		let dir = StorageManager::global().paths().mod_storage_dir(&self.name);
		std::fs::create_dir_all(&dir)?;
		Ok(dir)
	}

	//-------------------------------------------------------------
	// Read-only settings (`Mods/<mod>/Settings`)

	pub fn get_int_setting(&self, template: &str, args: &[FormatArg]) -> Option<i32> {
		let key = format_key(template, args);
		StorageManager::global().settings().get_int(&self.settings_section(), &key).ok().flatten()
	}

	/// Caller owns the returned string; `free_string_setting` exists only
	/// at the original C ABI and has no counterpart here since `String`
	/// already owns its storage.
	pub fn get_string_setting(&self, template: &str, args: &[FormatArg]) -> Option<String> {
		let key = format_key(template, args);
		StorageManager::global().settings().get_string(&self.settings_section(), &key).ok().flatten()
	}

	//-------------------------------------------------------------
	// Hooks

	/// Queues a hook registration under this mod's identity. Rejected once
	/// `before_uninit` has started.
	pub fn set_function_hook(&self, target: *const (), hook: *const ()) -> WhResult<*const ()> {
		if self.phase() == ModPhase::BeforeUninit || self.phase() == ModPhase::Uninitialized {
			return Err(WindhawkError::InvalidState("set_function_hook called after before_uninit"));
		}
		self.hooks.queue_install(self.identity, target, hook)
	}

	/// Queues a hook removal. Valid only in `[Initialized, BeforeUninit)`.
	pub fn remove_function_hook(&self, target: *const ()) -> WhResult<()> {
		if self.phase() != ModPhase::Initialized {
			return Err(WindhawkError::InvalidState("remove_function_hook outside the initialized window"));
		}
		self.hooks.queue_remove(self.identity, target);
		Ok(())
	}

	/// Flushes this mod's queued hook operations only.
	pub fn apply_hook_operations(&self) {
		self.hooks.apply_queued(IdentityFilter::Only(self.identity));
	}

	//-------------------------------------------------------------
	// Symbol enumeration (thin wrapper over C8, scoped per find-session)

	pub fn find_first_symbol(&self, module_path: &Path, module_base: usize, options: FindSymbolOptions) -> WhResult<SymbolFinder> {
		let enumerator = SymbolEnum::new(module_path, module_base, options.symbol_server, options.undecorate_mode)?;
		Ok(SymbolFinder { enumerator, callbacks: Callbacks::default() })
	}

	//-------------------------------------------------------------
	// Symbol hook batch

	pub fn hook_symbols(&self, module_path: &Path, module_base: usize, specs: &mut [HookSymbolSpec], options: HookSymbolsOptions) -> WhResult<bool> {
		hook_symbols_impl(self, module_path, module_base, specs, options)
	}

	//-------------------------------------------------------------
	// Disassembly

	pub fn disasm(&self, addr: usize, bytes: &[u8]) -> WhResult<DisasmResult> {
		crate::disasm::decode_one(addr, bytes)
	}

	//-------------------------------------------------------------
	// URL fetch

	pub fn get_url_content(&self, url: &str) -> WhResult<Vec<u8>> {
		crate::dynload::get_url_content(url)
	}
}

impl Drop for ModToken {
	fn drop(&mut self) {
		unsafe {
			if let Some(handle) = self.status_file.lock().take() {
				CloseHandle(handle);
			}
			if let Some(handle) = self.task_file.lock().take() {
				CloseHandle(handle);
			}
		}
	}
}

#[derive(Copy, Clone, Debug)]
enum ModMetadataCategory {
	Status,
	Task,
}

/// `"<orch-pid>_<orch-create-time-100ns>_<self-pid>_<mod-name>"`.
fn generate_mod_instance_id(mod_name: &str) -> WhResult<String> {
	let orch_pid = CustomizationSession::get_session_manager_pid()?;
	let create_time = CustomizationSession::get_session_manager_process_create_time()?;
	let create_time_100ns = ((create_time.dwHighDateTime as u64) << 32) | create_time.dwLowDateTime as u64;
	let self_pid = unsafe { GetCurrentProcessId() };
	Ok(format!("{}_{}_{}_{}", orch_pid, create_time_100ns, self_pid, mod_name))
}

/// Opens a fresh `FILE_FLAG_DELETE_ON_CLOSE` handle for a mod's status or
/// task metadata file, so it vanishes automatically however the process
/// exits.
fn create_mod_metadata_file(category: ModMetadataCategory, instance_id: &str) -> WhResult<HANDLE> {
	let paths = StorageManager::global().paths();
	let path = match category {
		ModMetadataCategory::Status => paths.mod_status_file(instance_id),
		ModMetadataCategory::Task => paths.mod_task_file(instance_id),
	};
	if let Some(parent) = path.parent() {
		std::fs::create_dir_all(parent)?;
	}
	let wide = to_wide_null(&path.to_string_lossy());
	let handle = unsafe {
		CreateFileW(
			wide.as_ptr(),
			GENERIC_WRITE,
			FILE_SHARE_READ | FILE_SHARE_DELETE,
			std::ptr::null_mut(),
			CREATE_ALWAYS,
			FILE_ATTRIBUTE_NORMAL | FILE_FLAG_DELETE_ON_CLOSE,
			std::ptr::null_mut(),
		)
	};
	if handle == INVALID_HANDLE_VALUE {
		Err(WindhawkError::Os(OsError::last()))
	} else {
		Ok(handle)
	}
}

fn write_mod_metadata_value(handle: HANDLE, value: &str) {
	let wide: Vec<u16> = value.encode_utf16().collect();
	unsafe {
		SetFilePointer(handle, 0, std::ptr::null_mut(), FILE_BEGIN);
		SetEndOfFile(handle);
		let bytes = std::slice::from_raw_parts(wide.as_ptr() as *const u8, wide.len() * 2);
		let mut written = 0u32;
		WriteFile(handle, bytes.as_ptr() as *const _, bytes.len() as u32, &mut written, std::ptr::null_mut());
	}
}

fn current_process_image_filename() -> String {
	let mut buf = vec![0u16; 1024];
	let len = unsafe { GetModuleFileNameW(std::ptr::null_mut(), buf.as_mut_ptr(), buf.len() as u32) };
	let path = crate::util::from_wide_lossy(&buf[..len as usize]);
	Path::new(&path).file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default()
}

/// Settings read from `Mods/<mod>/Config` that decide whether and how a
/// mod loads into the current process; the actual pattern/architecture
/// composition lives in [`crate::mods_manager`], this is just the data.
#[derive(Clone, Debug)]
pub struct ModConfig {
	pub name: String,
	pub disabled: bool,
	pub architecture: String,
	pub patterns_match_critical_system_processes: bool,
	pub include: crate::patterns::PatternSet,
	pub include_custom: crate::patterns::PatternSet,
	pub include_exclude_custom_only: bool,
	pub exclude: crate::patterns::PatternSet,
	pub exclude_custom: crate::patterns::PatternSet,
}

impl ModConfig {
	pub fn load(name: &str) -> WhResult<ModConfig> {
		let settings = StorageManager::global().settings();
		let section = format!("Mods/{}/Config", name);
		Ok(ModConfig {
			name: name.to_string(),
			disabled: settings.get_int(&section, "Disabled")?.unwrap_or(0) != 0,
			architecture: settings.get_string(&section, "Architecture")?.unwrap_or_default(),
			patterns_match_critical_system_processes: settings
				.get_int(&section, "PatternsMatchCriticalSystemProcesses")?
				.unwrap_or(0)
				!= 0,
			include: crate::patterns::PatternSet::parse(&settings.get_string(&section, "Include")?.unwrap_or_default()),
			include_custom: crate::patterns::PatternSet::parse(&settings.get_string(&section, "IncludeCustom")?.unwrap_or_default()),
			include_exclude_custom_only: settings.get_int(&section, "IncludeExcludeCustomOnly")?.unwrap_or(0) != 0,
			exclude: crate::patterns::PatternSet::parse(&settings.get_string(&section, "Exclude")?.unwrap_or_default()),
			exclude_custom: crate::patterns::PatternSet::parse(&settings.get_string(&section, "ExcludeCustom")?.unwrap_or_default()),
		})
	}
}

/// One loaded mod DLL plus its identity token, driven through the strict
/// lifecycle order the mods-manager (C10) sequences:
/// `Load -> Init -> AfterInit -> (ops) -> BeforeUninit -> Uninit`.
pub struct LoadedMod {
	module: HMODULE,
	exports: ModExports,
	pub token: Arc<ModToken>,
	pub module_base: usize,
	pub module_size: usize,
}

unsafe impl Send for LoadedMod {}

impl LoadedMod {
	/// Loads the mod DLL and resolves its optional lifecycle exports.
	/// Does not call `Wh_ModInit` yet — that's a separate step so the
	/// mods-manager can construct every mod before initializing any of
	/// them, matching the original's two-pass constructor.
	pub fn load(path: &Path, identity: HookIdentity, hooks: Arc<HookQueue>) -> WhResult<LoadedMod> {
		let wide = to_wide_null(&path.to_string_lossy());
		let module = unsafe { LoadLibraryW(wide.as_ptr()) };
		if module.is_null() {
			return Err(WindhawkError::Os(OsError::last()));
		}
		let (module_base, module_size) = module_range(module);
		let name = path.file_stem().map(|s| s.to_string_lossy().to_string()).unwrap_or_default();
		let exports = ModExports::resolve(module);
		let token = Arc::new(ModToken::new(name, identity, hooks)?);
		if let Some(slot) = exports.internal_ptr_slot {
			unsafe { *slot = Arc::as_ptr(&token) as usize };
		}
		token.set_status(Some("Loading..."));
		Ok(LoadedMod { module, exports, token, module_base, module_size })
	}

	/// Calls `Wh_ModInit`; `false` (from either the export or its absence
	/// being treated as a hard requirement by the caller) means the mod
	/// should not be kept loaded.
	pub fn init(&self) -> bool {
		self.token.set_task(Some("Initializing..."));
		let result = match self.exports.init {
			Some(f) => unsafe { f() != 0 },
			None => true,
		};
		self.token.set_task(None);
		if result {
			self.token.set_phase(ModPhase::Initialized);
			self.token.set_status(Some("Loaded"));
		}
		result
	}

	pub fn after_init(&self) {
		if let Some(f) = self.exports.after_init {
			unsafe { f() };
		}
	}

	pub fn before_uninit(&self) {
		self.token.set_phase(ModPhase::BeforeUninit);
		self.token.set_task(Some("Uninitializing..."));
		if let Some(f) = self.exports.before_uninit {
			unsafe { f() };
		}
		self.token.set_task(None);
	}

	pub fn uninit(&self) {
		if let Some(f) = self.exports.uninit {
			unsafe { f() };
		}
		self.token.set_phase(ModPhase::Uninitialized);
		self.token.set_status(Some("Unloaded"));
	}

	/// `Wh_ModSettingsChanged`; the export may report via an out-param or
	/// via its own return value, matching the original's two accepted
	/// signatures (`bool` alone is treated as "reload requested").
	pub fn settings_changed(&self) -> bool {
		match self.exports.settings_changed {
			Some(f) => {
				let mut reload: BOOL = 0;
				let handled = unsafe { f(&mut reload) };
				handled != 0 && reload != 0
			}
			None => true,
		}
	}

	/// `(base, size)` of this mod's code range, handed to the
	/// thread-call-stack barrier before `FreeLibrary`.
	pub fn code_range(&self) -> (usize, usize) {
		(self.module_base, self.module_size)
	}
}

impl Drop for LoadedMod {
	fn drop(&mut self) {
		self.token.hooks.remove_all_for(self.token.identity);
		unsafe {
			FreeLibrary(self.module);
		}
	}
}

fn module_range(module: HMODULE) -> (usize, usize) {
	unsafe {
		let dos = module as *const IMAGE_DOS_HEADER;
		let nt = (module as usize + (*dos).e_lfanew as usize) as *const IMAGE_NT_HEADERS;
		(module as usize, (*nt).OptionalHeader.SizeOfImage as usize)
	}
}

/// Cursor state for `find_first_symbol`/`find_next_symbol`/`find_close_symbol`.
pub struct SymbolFinder<'a> {
	enumerator: SymbolEnum,
	callbacks: Callbacks<'a>,
}

impl<'a> SymbolFinder<'a> {
	pub fn set_callbacks(&mut self, callbacks: Callbacks<'a>) {
		self.callbacks = callbacks;
	}

	/// Advances the iterator; `None` on exhaustion or on the caller's own
	/// `query_cancel` callback returning true.
	pub fn find_next_symbol(&mut self) -> Option<Symbol> {
		if let Some(cancel) = self.callbacks.query_cancel.as_mut() {
			if cancel() {
				return None;
			}
		}
		self.enumerator.next_symbol()
	}
}

// `find_close_symbol` has no counterpart: dropping `SymbolFinder` releases
// everything it owns.

#[derive(Copy, Clone)]
pub struct FindSymbolOptions<'a> {
	pub symbol_server: Option<&'a str>,
	pub undecorate_mode: UndecorateMode,
}

impl<'a> Default for FindSymbolOptions<'a> {
	fn default() -> FindSymbolOptions<'a> {
		FindSymbolOptions { symbol_server: None, undecorate_mode: UndecorateMode::Default }
	}
}

/// One entry in a `hook_symbols` batch request.
pub struct HookSymbolSpec<'a> {
	pub name: &'a str,
	pub optional: bool,
	pub hook: *const (),
	pub out_original: *mut *const (),
}

#[derive(Copy, Clone, Eq, PartialEq)]
pub enum NonArm64HybridMode {
	Refuse,
	Proceed,
	NoOpSuccess,
}

pub struct HookSymbolsOptions<'a> {
	pub symbol_server: Option<&'a str>,
	pub no_undecorated_symbols: bool,
	pub non_arm64_hybrid_mode: NonArm64HybridMode,
}

impl<'a> Default for HookSymbolsOptions<'a> {
	fn default() -> HookSymbolsOptions<'a> {
		HookSymbolsOptions { symbol_server: None, no_undecorated_symbols: false, non_arm64_hybrid_mode: NonArm64HybridMode::Refuse }
	}
}

fn host_is_arm64() -> bool {
	cfg!(target_arch = "aarch64")
}

/// `hook_symbols` — cache key, local cache, online cache, full
/// enumeration, in that order, per spec.md's seven-step algorithm.
fn hook_symbols_impl(
	token: &ModToken,
	module_path: &Path,
	module_base: usize,
	specs: &mut [HookSymbolSpec],
	options: HookSymbolsOptions,
) -> WhResult<bool> {
	let is_hybrid = symbols::probe_is_hybrid(module_base);
	if is_hybrid && !host_is_arm64() {
		match options.non_arm64_hybrid_mode {
			NonArm64HybridMode::Refuse => return Ok(false),
			NonArm64HybridMode::NoOpSuccess => return Ok(true),
			NonArm64HybridMode::Proceed => {}
		}
	}

	let sep = if is_hybrid { ';' } else { '#' };
	let cache_key = compute_cache_key(module_path, is_hybrid)?;
	let settings = StorageManager::global().settings();
	let section = token.cache_section();

	// Step 2-3: local cache.
	if let Some(raw) = settings.get_string(&section, &cache_key)? {
		if let Some(parsed) = parse_cache_entry(&raw, sep) {
			if try_apply_from_cache(token, module_base, specs, &parsed) {
				token.apply_hook_operations();
				return Ok(true);
			}
		}
	}

	// Step 4-5: online cache, serialized by a cross-mod mutex named after
	// the cache key so concurrent processes loading the same mod don't
	// all hit the network at once.
	let mutex_name = format!("SymbolGetOnlineCacheMutex-{}", cache_key);
	let mutex_name_w = to_wide_null(&mutex_name);
	let mutex = unsafe { CreateMutexW(std::ptr::null_mut(), FALSE, mutex_name_w.as_ptr()) };
	if !mutex.is_null() {
		unsafe { WaitForSingleObject(mutex, INFINITE) };
		// Re-check the local cache: another process may have populated it
		// while we were waiting on the mutex.
		if let Some(raw) = settings.get_string(&section, &cache_key)? {
			if let Some(parsed) = parse_cache_entry(&raw, sep) {
				if try_apply_from_cache(token, module_base, specs, &parsed) {
					unsafe {
						ReleaseMutex(mutex);
						CloseHandle(mutex);
					}
					token.apply_hook_operations();
					return Ok(true);
				}
			}
		}
		if !options_disable_online(&options) {
			if let Ok(body) = fetch_online_cache(&token.name, &cache_key) {
				if let Ok(text) = String::from_utf8(body) {
					if let Some(parsed) = parse_cache_entry(&text, sep) {
						if try_apply_from_cache(token, module_base, specs, &parsed) {
							let _ = settings.set_string(&section, &cache_key, &text);
							unsafe {
								ReleaseMutex(mutex);
								CloseHandle(mutex);
							}
							token.apply_hook_operations();
							return Ok(true);
						}
					}
				}
			}
		}
		unsafe {
			ReleaseMutex(mutex);
			CloseHandle(mutex);
		}
	}

	// Step 6: full enumeration fallback.
	let mut enumerator = SymbolEnum::new(
		module_path,
		module_base,
		options.symbol_server,
		if options.no_undecorated_symbols { UndecorateMode::None } else { UndecorateMode::Default },
	)?;

	let mut resolved: Vec<(String, Option<u32>)> = Vec::new();
	let mut remaining: std::collections::HashSet<usize> = (0..specs.len()).collect();
	let mut since_poll = 0u32;
	while let Some(symbol) = enumerator.next_symbol() {
		since_poll += 1;
		if since_poll % 64 == 0 && token.should_abort() {
			return Ok(false);
		}
		let candidate = if options.no_undecorated_symbols { &symbol.name } else { &symbol.name_undecorated };
		let mut matched_index = None;
		for &i in &remaining {
			if specs[i].name == candidate {
				matched_index = Some(i);
				break;
			}
		}
		if let Some(i) = matched_index {
			let offset = (symbol.address - module_base) as u32;
			unsafe { *specs[i].out_original = (module_base + offset as usize) as *const () };
			resolved.push((specs[i].name.to_string(), Some(offset)));
			remaining.remove(&i);
			if !remaining.is_empty() {
				continue;
			}
			break;
		}
	}

	for &i in &remaining {
		if specs[i].optional {
			resolved.push((specs[i].name.to_string(), None));
		} else {
			return Err(WindhawkError::SymbolRequired(specs[i].name.to_string()));
		}
	}

	for spec in specs.iter() {
		if resolved.iter().any(|(n, off)| n == spec.name && off.is_some()) {
			token.set_function_hook(unsafe { *spec.out_original }, spec.hook)?;
		}
	}
	token.apply_hook_operations();

	let entry = encode_cache_entry(sep, module_path, &resolved);
	let _ = settings.set_string(&section, &cache_key, &entry);
	Ok(true)
}

fn options_disable_online(_options: &HookSymbolsOptions) -> bool {
	false
}

fn fetch_online_cache(mod_name: &str, cache_key: &str) -> WhResult<Vec<u8>> {
	let url = format!("https://ramensoftware.github.io/windhawk-mod-symbol-cache/{}/{}.txt", mod_name, cache_key);
	crate::dynload::get_url_content(&url)
}

struct ParsedCacheEntry {
	entries: Vec<(String, Option<u32>)>,
}

fn parse_cache_entry(raw: &str, expected_sep: char) -> Option<ParsedCacheEntry> {
	let mut chars = raw.chars();
	if chars.next()? != '1' {
		return None;
	}
	let sep = chars.next()?;
	if sep != expected_sep {
		return None; // wrong hybrid/non-hybrid family; treat as a miss
	}
	let rest: String = chars.collect();
	let mut parts = rest.split(sep);
	let _filename = parts.next()?;
	let _ts_size = parts.next()?;
	let mut entries = Vec::new();
	loop {
		let name = match parts.next() {
			Some(n) if !n.is_empty() || parts.clone().next().is_some() => n,
			_ => break,
		};
		let offset_str = parts.next().unwrap_or("");
		let offset = if offset_str.is_empty() { None } else { offset_str.parse::<u32>().ok() };
		entries.push((name.to_string(), offset));
	}
	Some(ParsedCacheEntry { entries })
}

fn encode_cache_entry(sep: char, module_path: &Path, entries: &[(String, Option<u32>)]) -> String {
	let filename = module_path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
	let metadata = std::fs::metadata(module_path).ok();
	let size = metadata.as_ref().map(|m| m.len()).unwrap_or(0);
	let mut s = String::new();
	s.push('1');
	s.push(sep);
	s.push_str(&filename);
	s.push(sep);
	s.push_str(&format!("0-{}", size));
	for (name, offset) in entries {
		s.push(sep);
		s.push_str(name);
		s.push(sep);
		if let Some(off) = offset {
			s.push_str(&off.to_string());
		}
	}
	s
}

/// Attempts to satisfy every non-optional spec (and record every optional
/// one) purely from a parsed cache entry, queuing hooks as it goes.
/// Returns false (and queues nothing) if any non-optional spec misses.
fn try_apply_from_cache(token: &ModToken, module_base: usize, specs: &mut [HookSymbolSpec], cache: &ParsedCacheEntry) -> bool {
	let mut out = Vec::with_capacity(specs.len());
	for spec in specs.iter() {
		match cache.entries.iter().find(|(name, _)| name == spec.name) {
			Some((_, Some(offset))) => out.push((*offset, spec.hook, spec.out_original)),
			Some((_, None)) if spec.optional => continue,
			_ => return false,
		}
	}
	for (offset, hook, out_original) in out {
		let target = (module_base + offset as usize) as *const ();
		if let Ok(trampoline) = token.set_function_hook(target, hook) {
			unsafe { *out_original = trampoline };
		} else {
			return false;
		}
	}
	true
}

/// Preferred: PDB signature GUID + age (`"pdb_<hex32>"`). Falls back to
/// `"pe_<timestamp>_<imagesize>_<filename>"` when the PDB can't be opened
/// or carries no debug-info stream, per spec step 1. Either form gets a
/// `_hybrid` suffix for hybrid modules.
fn compute_cache_key(module_path: &Path, is_hybrid: bool) -> WhResult<String> {
	let suffix = if is_hybrid { "_hybrid" } else { "" };
	if let Some(pdb_key) = try_pdb_cache_key(module_path) {
		return Ok(format!("pdb_{}{}", pdb_key, suffix));
	}
	let metadata = std::fs::metadata(module_path)?;
	let size = metadata.len();
	let filename = module_path.file_name().map(|f| f.to_string_lossy().to_string()).unwrap_or_default();
	Ok(format!("pe_0_{}_{}{}", size, filename, suffix))
}

fn try_pdb_cache_key(module_path: &Path) -> Option<String> {
	let pdb_path = module_path.with_extension("pdb");
	let file = std::fs::File::open(&pdb_path).ok()?;
	let mut pdb = pdb::PDB::open(file).ok()?;
	let info = pdb.pdb_information().ok()?;
	let guid = info.guid;
	let age = info.age;
	let hex: String = guid.as_bytes().iter().map(|b| format!("{:02X}", b)).collect();
	Some(format!("{}{:X}", hex, age))
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn format_key_substitutes_in_order() {
		assert_eq!(format_key("item[%d]", &[FormatArg::Int(3)]), "item[3]");
		assert_eq!(format_key("%s.%s", &[FormatArg::Str("a"), FormatArg::Str("b")]), "a.b");
	}

	#[test]
	fn cache_entry_round_trips() {
		let entries = vec![("SymbolA".to_string(), Some(16u32)), ("SymbolB".to_string(), None)];
		let path = Path::new("kernel32.dll");
		let encoded = encode_cache_entry('#', path, &entries);
		let parsed = parse_cache_entry(&encoded, '#').unwrap();
		assert_eq!(parsed.entries, entries);
	}

	#[test]
	fn hybrid_cache_entry_rejects_non_hybrid_separator() {
		let entries = vec![("SymbolA".to_string(), Some(16u32))];
		let encoded = encode_cache_entry(';', Path::new("m.dll"), &entries);
		assert!(parse_cache_entry(&encoded, '#').is_none());
	}
}
