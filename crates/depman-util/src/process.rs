//! A wrapper around [`std::process::Command`] that watches a child process
//! for activity and kills it if it goes quiet for too long.
//!
//! VCS operations (`git clone`, `hg pull`, ...) are run as external binaries
//! rather than through a library binding, so a hung or interactive subprocess
//! (a credential prompt, a stalled network read) has to be detected from the
//! outside. [`MonitoredCommand`] runs the child with piped output, drains it
//! on a background thread into a bounded ring buffer, and fails the command
//! if no bytes arrive within the idle timeout. On timeout it first sends an
//! interrupt and gives the child a grace period to exit cleanly before it is
//! killed outright.

use std::io::Read;
use std::process::{Child, Command, Stdio};
use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context};

/// Default ceiling on how long a monitored command may go without producing
/// output before it is considered hung.
pub const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Grace period between sending an interrupt and sending a kill.
const INTERRUPT_GRACE: Duration = Duration::from_secs(3);

/// How many trailing bytes of combined stdout/stderr are kept for error
/// reporting.
const ACTIVITY_BUFFER_CAP: usize = 8 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum MonitoredCommandError {
    #[error("process `{0}` timed out after no output for {1:?}")]
    Timeout(String, Duration),
    #[error("process `{0}` exited with {1}")]
    NonZeroExit(String, std::process::ExitStatus),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// The outcome of a completed, non-timed-out run: exit status plus the
/// trailing activity buffer (useful for error messages even on success, e.g.
/// to surface warnings a VCS binary printed to stderr).
pub struct Output {
    pub status: std::process::ExitStatus,
    pub tail: Vec<u8>,
}

pub struct MonitoredCommand {
    command: Command,
    idle_timeout: Duration,
    program: String,
}

impl MonitoredCommand {
    pub fn new(command: Command) -> MonitoredCommand {
        let program = command.get_program().to_string_lossy().into_owned();
        MonitoredCommand {
            command,
            idle_timeout: DEFAULT_IDLE_TIMEOUT,
            program,
        }
    }

    pub fn idle_timeout(mut self, timeout: Duration) -> MonitoredCommand {
        self.idle_timeout = timeout;
        self
    }

    /// Spawn the child and block until it exits, times out, or is killed.
    pub fn run(mut self) -> Result<Output, MonitoredCommandError> {
        self.command.stdin(Stdio::null());
        self.command.stdout(Stdio::piped());
        self.command.stderr(Stdio::piped());

        tracing::debug!(program = %self.program, "spawning monitored command");
        let mut child = self.command.spawn()?;

        let (tx, rx) = mpsc::channel::<Vec<u8>>();
        let stdout = child.stdout.take().expect("stdout was piped");
        let stderr = child.stderr.take().expect("stderr was piped");
        spawn_reader(stdout, tx.clone());
        spawn_reader(stderr, tx);

        let mut tail = Vec::new();
        let mut last_activity = Instant::now();

        loop {
            match rx.recv_timeout(self.idle_timeout) {
                Ok(chunk) => {
                    last_activity = Instant::now();
                    append_capped(&mut tail, &chunk, ACTIVITY_BUFFER_CAP);
                }
                Err(mpsc::RecvTimeoutError::Timeout) => {
                    if last_activity.elapsed() >= self.idle_timeout {
                        return Err(self.kill_for_timeout(&mut child));
                    }
                }
                Err(mpsc::RecvTimeoutError::Disconnected) => break,
            }

            if let Some(status) = child.try_wait()? {
                drain_remaining(&rx, &mut tail, ACTIVITY_BUFFER_CAP);
                return Ok(Output { status, tail });
            }
        }

        let status = child.wait()?;
        Ok(Output { status, tail })
    }

    /// Run the command and turn a non-zero exit into an error carrying the
    /// trailing output.
    pub fn run_checked(self) -> anyhow::Result<Vec<u8>> {
        let program = self.program.clone();
        let output = self.run().with_context(|| format!("failed to run `{program}`"))?;
        if !output.status.success() {
            bail!(
                "process `{program}` exited with {}\n--- output ---\n{}",
                output.status,
                String::from_utf8_lossy(&output.tail)
            );
        }
        Ok(output.tail)
    }

    fn kill_for_timeout(&self, child: &mut Child) -> MonitoredCommandError {
        tracing::warn!(program = %self.program, timeout = ?self.idle_timeout, "process idle, interrupting");
        interrupt(child);
        thread::sleep(INTERRUPT_GRACE);
        if child.try_wait().ok().flatten().is_none() {
            tracing::warn!(program = %self.program, "process ignored interrupt, killing");
            let _ = child.kill();
            let _ = child.wait();
        }
        MonitoredCommandError::Timeout(self.program.clone(), self.idle_timeout)
    }
}

fn spawn_reader<R: Read + Send + 'static>(mut reader: R, tx: mpsc::Sender<Vec<u8>>) {
    thread::spawn(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if tx.send(buf[..n].to_vec()).is_err() {
                        break;
                    }
                }
            }
        }
    });
}

fn append_capped(tail: &mut Vec<u8>, chunk: &[u8], cap: usize) {
    tail.extend_from_slice(chunk);
    if tail.len() > cap {
        let excess = tail.len() - cap;
        tail.drain(0..excess);
    }
}

fn drain_remaining(rx: &mpsc::Receiver<Vec<u8>>, tail: &mut Vec<u8>, cap: usize) {
    while let Ok(chunk) = rx.try_recv() {
        append_capped(tail, &chunk, cap);
    }
}

#[cfg(unix)]
fn interrupt(child: &Child) {
    unsafe {
        libc::kill(child.id() as libc::pid_t, libc::SIGINT);
    }
}

#[cfg(windows)]
fn interrupt(child: &Child) {
    unsafe {
        windows_sys::Win32::System::Console::GenerateConsoleCtrlEvent(
            windows_sys::Win32::System::Console::CTRL_BREAK_EVENT,
            child.id(),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn successful_command_collects_output() {
        let mut cmd = Command::new("echo");
        cmd.arg("hello");
        let out = MonitoredCommand::new(cmd).run().unwrap();
        assert!(out.status.success());
        assert_eq!(String::from_utf8_lossy(&out.tail).trim(), "hello");
    }

    #[test]
    fn failing_command_is_reported() {
        let mut cmd = Command::new("sh");
        cmd.args(["-c", "exit 7"]);
        let out = MonitoredCommand::new(cmd).run().unwrap();
        assert_eq!(out.status.code(), Some(7));
    }

    #[test]
    fn idle_process_is_killed() {
        let mut cmd = Command::new("sleep");
        cmd.arg("5");
        let err = MonitoredCommand::new(cmd)
            .idle_timeout(Duration::from_millis(200))
            .run()
            .unwrap_err();
        assert!(matches!(err, MonitoredCommandError::Timeout(..)));
    }
}
