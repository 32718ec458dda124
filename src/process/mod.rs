/*!
Process handles.
!*/

mod process_enum;
mod process_id;
mod process_list;
mod process_peb;
mod process_rights;
mod process_vm;
mod process;

pub use self::process_enum::*;
pub use self::process_id::*;
pub use self::process_list::*;
pub use self::process_peb::*;
pub use self::process_rights::*;
pub use self::process_vm::*;
pub use self::process::*;
