//! Package discovery: walks a local source tree into an in-memory mapping
//! of import-path → package (or parse error), and offers reachability
//! queries over that mapping (§4.3).

mod reach;
mod walk;

pub use reach::{IgnoreSet, ReachMap};
pub use walk::{walk_package_tree, Package, PackageOrErr, PackageTree, WalkError};
