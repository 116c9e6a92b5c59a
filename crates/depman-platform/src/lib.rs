//! Representation of a build/target platform and the `cfg(...)` build-constraint
//! language used to decide whether a source file in a dependency's tree is
//! reachable on at least one real platform.

mod cfg;
mod error;
mod platform;

pub use cfg::{Cfg, CfgExpr};
pub use error::ParseError;
pub use platform::{KnownPlatform, Platform, PlatformTable};
