use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::sync::atomic::AtomicI32;
use std::sync::atomic::Ordering;
use std::time::Duration;
use std::time::Instant;

use tracing::debug;
use tracing::trace;

use crate::config::InvocationConfig;

// Hardcode these since it does not seem worth pulling signal tables out of
// libc just for two well-known values.
const SIGINT_CODE: i32 = 2;
const SIGKILL_CODE: i32 = 9;

/// Process id sentinel once the child is known (or forced) to be gone.
const PID_GONE: i32 = -1;
/// Process id before the spawn has produced one.
const PID_UNSET: i32 = 0;

/// How long the engine must run before the stopped event counts it as
/// having plausibly performed work.
const DID_WORK_THRESHOLD: Duration = Duration::from_millis(500);

/// Outcome of one `stop` call, used by the host to advance its state
/// machine without re-deriving what the invocation just did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopOutcome {
    /// Graceful interrupt sent; the child may still wind down on its own.
    Interrupted,
    /// Escalated to an unconditional kill; the pid was marked gone.
    Killed,
    /// The child was already gone (or never spawned). No signal sent.
    AlreadyDown,
}

#[derive(Debug, Default)]
struct StopState {
    warned_once: bool,
    killed_forcefully: bool,
}

/// One run attempt of the supervised download engine, from accepted start
/// request to final exit notification. At most one non-terminated
/// `Invocation` exists at any time; the supervisor enforces that.
///
/// The pid cell is the only field shared across threads without a lock:
/// written by the worker at spawn, marked gone on forceful kill, read by
/// any thread via [`Invocation::is_running`]. A [`PID_GONE`] write is a
/// liveness signal, not a guarantee the OS has reaped the process — the
/// worker still awaits the exit separately.
#[derive(Debug)]
pub struct Invocation {
    config: InvocationConfig,
    pid: AtomicI32,
    started_at: Instant,
    stop_state: StdMutex<StopState>,
}

impl Invocation {
    pub(crate) fn new(config: InvocationConfig) -> Self {
        Self {
            config,
            pid: AtomicI32::new(PID_UNSET),
            started_at: Instant::now(),
            stop_state: StdMutex::new(StopState::default()),
        }
    }

    pub fn config(&self) -> &InvocationConfig {
        &self.config
    }

    pub fn started_at(&self) -> Instant {
        self.started_at
    }

    pub(crate) fn record_pid(&self, pid: i32) {
        self.pid.store(pid, Ordering::Release);
    }

    pub(crate) fn mark_gone(&self) {
        self.pid.store(PID_GONE, Ordering::Release);
    }

    /// True iff the recorded process id is a valid live one. Safe to call
    /// from any thread without blocking.
    pub fn is_running(&self) -> bool {
        self.pid.load(Ordering::Acquire) > 1
    }

    /// Escalating, idempotent stop. The first call while running sends an
    /// interrupt; the second distinct call escalates to an unconditional
    /// kill regardless of elapsed time, marks the kill forceful, and
    /// writes the pid-gone sentinel. Calls after that are no-ops, as are
    /// calls that land before a pid was ever recorded.
    pub fn stop(&self) -> StopOutcome {
        let mut state = self.lock_stop_state();

        let pid = self.pid.load(Ordering::Acquire);
        if pid <= 1 {
            return StopOutcome::AlreadyDown;
        }

        if !state.warned_once {
            state.warned_once = true;
            send_signal(pid, SIGINT_CODE);
            debug!(pid, "sent interrupt to download engine");
            StopOutcome::Interrupted
        } else {
            state.killed_forcefully = true;
            send_signal(pid, SIGKILL_CODE);
            debug!(pid, "killed download engine forcefully");
            self.mark_gone();
            StopOutcome::Killed
        }
    }

    pub(crate) fn killed_forcefully(&self) -> bool {
        self.lock_stop_state().killed_forcefully
    }

    /// Ran long enough that the engine plausibly transferred something.
    pub(crate) fn did_some_work(&self) -> bool {
        self.started_at.elapsed() > DID_WORK_THRESHOLD
    }

    fn lock_stop_state(&self) -> MutexGuard<'_, StopState> {
        match self.stop_state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Delivery failure is tolerated: a dead child means we are already where
/// the caller wants to be.
fn send_signal(pid: i32, signal: i32) {
    let rc = unsafe { libc::kill(pid as libc::pid_t, signal) };
    if rc != 0 {
        trace!(
            pid,
            signal,
            errno = std::io::Error::last_os_error().raw_os_error(),
            "signal not delivered; treating process as already stopped"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::process::Command;
    use std::process::Stdio;

    fn test_config() -> InvocationConfig {
        InvocationConfig {
            program: "aria2c".to_string(),
            args: Vec::new(),
            home_dir: PathBuf::from("/tmp"),
            network_interface: None,
            take_wakelock: false,
            verbose_output: false,
            delegate_display: false,
            notify_on_stop: true,
            interactive: false,
        }
    }

    #[test]
    fn stop_before_spawn_is_a_no_op() {
        let invocation = Invocation::new(test_config());
        assert_eq!(invocation.stop(), StopOutcome::AlreadyDown);
        assert!(!invocation.killed_forcefully());
        assert!(!invocation.is_running());
    }

    #[test]
    fn stop_after_gone_is_a_no_op() {
        let invocation = Invocation::new(test_config());
        invocation.record_pid(12345);
        invocation.mark_gone();
        assert_eq!(invocation.stop(), StopOutcome::AlreadyDown);
    }

    #[cfg(unix)]
    #[test]
    fn second_stop_escalates_to_kill() {
        // A real child that ignores the interrupt, so the escalation (and
        // only the escalation) takes it down.
        let mut child = Command::new("/bin/sh")
            .args(["-c", "trap '' INT; sleep 30"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn test child");

        let invocation = Invocation::new(test_config());
        invocation.record_pid(child.id() as i32);
        assert!(invocation.is_running());

        assert_eq!(invocation.stop(), StopOutcome::Interrupted);
        assert!(!invocation.killed_forcefully());
        assert!(invocation.is_running());

        assert_eq!(invocation.stop(), StopOutcome::Killed);
        assert!(invocation.killed_forcefully());
        assert!(!invocation.is_running());

        let status = child.wait().expect("reap test child");
        assert!(!status.success());

        // Terminated invocations shrug off further stop calls.
        assert_eq!(invocation.stop(), StopOutcome::AlreadyDown);
    }

    #[cfg(unix)]
    #[test]
    fn first_stop_interrupts_gracefully() {
        let mut child = Command::new("/bin/sleep")
            .arg("30")
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .expect("spawn test child");

        let invocation = Invocation::new(test_config());
        invocation.record_pid(child.id() as i32);

        assert_eq!(invocation.stop(), StopOutcome::Interrupted);
        let status = child.wait().expect("reap test child");
        assert!(!status.success());
        assert!(!invocation.killed_forcefully());
    }
}
