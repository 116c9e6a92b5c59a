//! Serializable schemas shared between depman's manifest front-end, lock
//! writer, and persistent cache: plain data, no parsing of any particular
//! on-disk syntax.

pub mod encoding;
pub mod lock;
pub mod manifest;

pub use lock::{Lock, LockedProject};
pub use manifest::{Manifest, ProjectProperties};
