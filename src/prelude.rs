/*!
The prelude contains this library's items in a flat namespace.
!*/

pub use super::Result;
pub use super::error::*;
pub use super::process::*;
pub use super::module::*;
pub use super::thread::*;
pub use super::memory::*;
pub use super::patterns::*;
pub use super::settings::*;
pub use super::storage::*;
pub use super::namespace::*;
pub use super::scanner::*;
pub use super::hookqueue::*;
pub use super::symbols::*;
pub use super::modapi::*;
pub use super::mods_manager::*;
pub use super::session::*;
pub use crate::{AsInner, AsInnerMut, FromInner, IntoInner};

pub use intptr::*;
pub use dataview::Pod;
