/*!
Windhawk-core: the process injector and in-process customization session
that make up the hard core of a Windows-wide mod-loading runtime.
!*/

#![cfg(windows)]
#![cfg_attr(feature = "nightly", feature(asm))]

mod util;
pub use self::util::*;

#[macro_use]
mod inner;
pub use self::inner::*;

macro_rules! wide_str {
    ($($c:tt)+) => {
        [$($c as u16,)+]
    }
}

mod winapi;

/// Thin OS-call result, used by the low-level `process`/`thread`/`memory`
/// wrappers that only ever fail with a raw `GetLastError` code.
pub type Result<T> = std::result::Result<T, error::ErrorCode>;

pub mod error;
pub mod process;
pub mod module;
pub mod thread;
pub mod memory;

pub mod patterns;
pub mod process_lists;
pub mod settings;
pub mod storage;
pub mod namespace;
pub mod privilege;

pub mod shellcode;
pub mod inject;
pub mod scanner;
pub mod new_process;

pub mod hookqueue;
pub mod symbols;
pub mod dynload;
pub mod disasm;
pub mod logger;
pub mod modapi;
pub mod mods_manager;
pub mod session;
pub mod abi;

pub mod prelude;
