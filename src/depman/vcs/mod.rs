//! Thin abstraction over an external VCS binary (§4.2): everything the
//! source gateway needs is a handful of subprocess invocations run under a
//! [`depman_util::MonitoredCommand`], never a library binding. This keeps
//! the driver honest about the one contract real VCS tooling actually
//! offers: a command line and a process exit code.

mod driver;
mod git;
mod registry;

pub use driver::{CommitInfo, VcsDriver, VcsError};
pub use git::GitDriver;
pub use registry::RegistryDriver;

use std::time::Duration;

use crate::path_deduce::VcsKind;

/// Idle timeout for expensive operations (clone, fetch, long log), per §4.2.
pub const EXPENSIVE_IDLE_TIMEOUT: Duration = Duration::from_secs(120);

/// Idle timeout for cheap operations (checkout, export, commit-info).
pub const CHEAP_IDLE_TIMEOUT: Duration = Duration::from_secs(10);

/// Look up the driver for a given VCS kind. Only git and the registry
/// back-end are implemented; hg/bzr/svn are recognized by the path deducer
/// but have no driver wired in yet.
pub fn driver_for(kind: VcsKind) -> Option<Box<dyn VcsDriver>> {
    match kind {
        VcsKind::Git => Some(Box::new(GitDriver)),
        VcsKind::Registry => Some(Box::new(RegistryDriver)),
        VcsKind::Hg | VcsKind::Bzr | VcsKind::Svn => None,
    }
}
