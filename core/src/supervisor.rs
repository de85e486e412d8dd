use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;

use portable_pty::PtySize;
use portable_pty::native_pty_system;
use tokio::task::JoinHandle;
use tracing::info;
use tracing::warn;

use crate::config::InvocationConfig;
use crate::error::Result;
use crate::error::WardenErr;
use crate::invocation::Invocation;
use crate::invocation::StopOutcome;
use crate::relay::RendererIo;

const PTY_ROWS: u16 = 24;
const PTY_COLS: u16 = 80;

/// Exit code reported when the child's status could not be collected.
const EXIT_CODE_UNKNOWN: i32 = -1;

/// A spawned child plus the pseudo-terminal handles the relay needs.
pub(crate) struct SpawnedChild {
    pub pid: i32,
    pub reader: Box<dyn std::io::Read + Send>,
    pub renderer_io: Option<RendererIo>,
    pub wait: JoinHandle<i32>,
}

/// Owns at most one invocation of the download engine at a time. Spawns it
/// attached to a fresh pseudo-terminal and exposes the escalating stop
/// sequence; the lifecycle host drives everything else.
#[derive(Debug, Default)]
pub struct ProcessSupervisor {
    current: StdMutex<Option<Arc<Invocation>>>,
}

impl ProcessSupervisor {
    /// Accepts a start request: creates the invocation and installs it as
    /// current. Refuses while any previous invocation has not been retired
    /// yet — this is the contract check, made before any spawn work.
    pub(crate) fn begin(&self, config: InvocationConfig) -> Result<Arc<Invocation>> {
        let mut current = self.lock_current();
        if current.is_some() {
            return Err(WardenErr::AlreadyRunning);
        }
        let invocation = Arc::new(Invocation::new(config));
        *current = Some(Arc::clone(&invocation));
        Ok(invocation)
    }

    /// Allocates the pseudo-terminal, spawns the child on its slave side
    /// and records the process id. A pid that cannot belong to a live
    /// child means the invocation never started.
    pub(crate) fn spawn(&self, invocation: &Invocation) -> Result<SpawnedChild> {
        // A pty spawn forks before it execs, so a missing executable would
        // otherwise surface as a confusing instant exit. Resolve it first.
        let program = &invocation.config().program;
        which::which(program).map_err(|source| WardenErr::MissingExecutable {
            program: program.clone(),
            source,
        })?;

        let pty_system = native_pty_system();
        let pair = pty_system
            .openpty(PtySize {
                rows: PTY_ROWS,
                cols: PTY_COLS,
                pixel_width: 0,
                pixel_height: 0,
            })
            .map_err(WardenErr::open_pty)?;

        let command = invocation.config().to_command(std::process::id());
        if let Ok(line) = command.as_unix_command_line() {
            info!(command = %line, "spawning download engine");
        }

        let mut child = pair.slave.spawn_command(command).map_err(WardenErr::spawn)?;
        // The child owns its copy of the slave side; ours would only keep
        // the master from ever seeing end-of-stream.
        drop(pair.slave);

        let pid = child.process_id().map(|pid| pid as i32).unwrap_or(0);
        if pid <= 1 {
            let _ = child.kill();
            return Err(WardenErr::InvalidPid { pid });
        }
        invocation.record_pid(pid);
        info!(pid, "download engine running");

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(WardenErr::open_pty)?;
        let renderer_io = if invocation.config().delegate_display {
            Some(RendererIo {
                reader: pair
                    .master
                    .try_clone_reader()
                    .map_err(WardenErr::open_pty)?,
                writer: pair.master.take_writer().map_err(WardenErr::open_pty)?,
            })
        } else {
            None
        };

        // The exit wait goes through the OS on a blocking task, so a stop
        // signal (not runtime-level interruption) is what unblocks it.
        let wait = tokio::task::spawn_blocking(move || match child.wait() {
            Ok(status) => status.exit_code() as i32,
            Err(err) => {
                warn!(error = ?err, "failed to collect download engine exit status");
                EXIT_CODE_UNKNOWN
            }
        });

        Ok(SpawnedChild {
            pid,
            reader,
            renderer_io,
            wait,
        })
    }

    /// Blocks (asynchronously) until the child terminates.
    pub(crate) async fn await_exit(wait: JoinHandle<i32>) -> i32 {
        wait.await.unwrap_or(EXIT_CODE_UNKNOWN)
    }

    /// Forwards to the current invocation's escalating stop. Safe from any
    /// thread; a no-op when nothing is live.
    pub fn stop(&self) -> StopOutcome {
        let invocation = self.lock_current().clone();
        match invocation {
            Some(invocation) => invocation.stop(),
            None => StopOutcome::AlreadyDown,
        }
    }

    pub fn is_running(&self) -> bool {
        self.lock_current()
            .as_ref()
            .is_some_and(|invocation| invocation.is_running())
    }

    /// Drops the invocation after its final notification has been sent,
    /// making room for the next start request.
    pub(crate) fn retire(&self, invocation: &Arc<Invocation>) {
        let mut current = self.lock_current();
        if current
            .as_ref()
            .is_some_and(|live| Arc::ptr_eq(live, invocation))
        {
            *current = None;
        }
    }

    fn lock_current(&self) -> MutexGuard<'_, Option<Arc<Invocation>>> {
        match self.current.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::InvocationConfig;
    use std::path::PathBuf;

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
    fn begin_refuses_second_invocation() {
        let supervisor = ProcessSupervisor::default();
        let first = supervisor.begin(test_config()).expect("first start accepted");
        assert!(matches!(
            supervisor.begin(test_config()),
            Err(WardenErr::AlreadyRunning)
        ));

        supervisor.retire(&first);
        supervisor.begin(test_config()).expect("slot free after retire");
    }

    #[test]
    fn retire_ignores_stale_invocations() {
        let supervisor = ProcessSupervisor::default();
        let stale = Arc::new(Invocation::new(test_config()));
        let live = supervisor.begin(test_config()).expect("start accepted");

        supervisor.retire(&stale);
        assert!(matches!(
            supervisor.begin(test_config()),
            Err(WardenErr::AlreadyRunning)
        ));
        supervisor.retire(&live);
    }
}
