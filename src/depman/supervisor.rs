//! Process-wide throttle/cancellation coordinator around long-running VCS
//! and HTTP work (§4.6).

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// The kind of long-running work an in-flight call represents, recorded
/// purely for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkKind {
    VcsClone,
    VcsFetch,
    VcsCheckout,
    VcsExport,
    HttpFetch,
}

#[derive(Debug, Clone)]
struct InFlight {
    name: String,
    kind: WorkKind,
    started_at: Instant,
}

#[derive(Debug, thiserror::Error)]
pub enum SupervisorError {
    #[error("operation cancelled")]
    Cancelled,
    #[error("supervisor shut down while {0} call(s) were still in flight")]
    ShutdownTimeout(usize),
}

/// A cancellation handle shared by every caller of [`Supervisor::run`]. All
/// VCS shell-outs and HTTP fetches go through the supervisor that owns one
/// of these.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    pub fn new() -> CancellationToken {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Wraps a cancellable scope of work (§4.6).
pub struct Supervisor {
    token: CancellationToken,
    in_flight: Mutex<HashMap<u64, InFlight>>,
    next_id: AtomicU64,
}

impl Default for Supervisor {
    fn default() -> Supervisor {
        Supervisor::new(CancellationToken::new())
    }
}

impl Supervisor {
    pub fn new(token: CancellationToken) -> Supervisor {
        Supervisor {
            token,
            in_flight: Mutex::new(HashMap::new()),
            next_id: AtomicU64::new(0),
        }
    }

    pub fn cancellation(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Run `f`, recording an in-flight entry for the duration of the call.
    /// If the supervisor's token is already cancelled, `f` is never invoked.
    pub fn run<T>(&self, name: &str, kind: WorkKind, f: impl FnOnce() -> T) -> Result<T, SupervisorError> {
        if self.token.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }

        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.in_flight.lock().unwrap().insert(
            id,
            InFlight {
                name: name.to_string(),
                kind,
                started_at: Instant::now(),
            },
        );

        let result = f();

        self.in_flight.lock().unwrap().remove(&id);

        if self.token.is_cancelled() {
            return Err(SupervisorError::Cancelled);
        }
        Ok(result)
    }

    /// Diagnostic snapshot of everything currently running, oldest first.
    pub fn in_flight(&self) -> Vec<(String, WorkKind, Duration)> {
        let mut entries: Vec<_> = self
            .in_flight
            .lock()
            .unwrap()
            .values()
            .map(|e| (e.name.clone(), e.kind, e.started_at.elapsed()))
            .collect();
        entries.sort_by_key(|(_, _, elapsed)| std::cmp::Reverse(*elapsed));
        entries
    }

    /// Cancel the scope and wait for in-flight calls to drain, up to
    /// `grace`. Calls that are already running are not interrupted by this
    /// alone (cancellation is cooperative: they must poll [`CancellationToken::is_cancelled`]);
    /// this just bounds how long shutdown waits for them to notice.
    pub fn shutdown(&self, grace: Duration) -> Result<(), SupervisorError> {
        self.token.cancel();
        let deadline = Instant::now() + grace;
        loop {
            let remaining = self.in_flight.lock().unwrap().len();
            if remaining == 0 {
                return Ok(());
            }
            if Instant::now() >= deadline {
                tracing::warn!(remaining, "supervisor shutdown grace period elapsed with callers still in flight");
                return Err(SupervisorError::ShutdownTimeout(remaining));
            }
            std::thread::sleep(Duration::from_millis(20));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancelled_token_rejects_new_work() {
        let sup = Supervisor::default();
        sup.cancellation().cancel();
        let result = sup.run("test", WorkKind::HttpFetch, || 1);
        assert!(matches!(result, Err(SupervisorError::Cancelled)));
    }

    #[test]
    fn successful_run_clears_in_flight() {
        let sup = Supervisor::default();
        let result = sup.run("clone github.com/a/b", WorkKind::VcsClone, || 42).unwrap();
        assert_eq!(result, 42);
        assert!(sup.in_flight().is_empty());
    }

    #[test]
    fn shutdown_succeeds_with_nothing_in_flight() {
        let sup = Supervisor::default();
        assert!(sup.shutdown(Duration::from_millis(50)).is_ok());
    }
}
