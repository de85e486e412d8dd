//! Lifecycle host: owns the supervisor, serializes start commands onto a
//! single worker and guarantees at most one live invocation. The
//! [`ControlChannel`] is the boundary object handed to clients.

use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::sync::MutexGuard;
use std::time::Duration;

use tokio::sync::Notify;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::debug;
use tracing::error;
use tracing::info;
use tracing::warn;

use warden_protocol::RunState;
use warden_protocol::StartOptions;
use warden_protocol::StoppedEvent;

use crate::config::InvocationConfig;
use crate::connectivity::ConnectivityProbe;
use crate::error::Result;
use crate::error::WardenErr;
use crate::invocation::Invocation;
use crate::invocation::StopOutcome;
use crate::notify::Notifier;
use crate::notify::WakeLock;
use crate::relay::OutputRelay;
use crate::relay::RendererRegistry;
use crate::supervisor::ProcessSupervisor;

const NO_NETWORK_TEXT: &str = "no usable network; the download engine will start later";

const COMMAND_QUEUE_DEPTH: usize = 8;

/// How long teardown waits for the graceful stop to take before it
/// escalates to the kill.
const TEARDOWN_GRACE: Duration = Duration::from_secs(2);

enum Command {
    Start(Arc<Invocation>),
    Restart(InvocationConfig),
}

type ResultCallback = Arc<dyn Fn(bool) + Send + Sync>;

struct HostState {
    run_state: RunState,
    attachments: u32,
    foreground: bool,
    callback: Option<ResultCallback>,
}

struct HostShared {
    supervisor: ProcessSupervisor,
    notifier: Arc<dyn Notifier>,
    registry: Arc<dyn RendererRegistry>,
    wake: Arc<dyn WakeLock>,
    connectivity: Arc<dyn ConnectivityProbe>,
    state: StdMutex<HostState>,
}

impl HostShared {
    fn lock_state(&self) -> MutexGuard<'_, HostState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn set_run_state(&self, next: RunState) {
        let mut state = self.lock_state();
        if state.run_state != next {
            debug!(from = %state.run_state, to = %next, "run state changed");
            state.run_state = next;
        }
    }

    /// Enters `Stopping` only while a run is still in flight. A forceful
    /// kill can land after the worker has already settled the run (or a
    /// successor run has claimed the state); those states stay untouched.
    fn note_forceful_stop(&self) {
        let mut state = self.lock_state();
        if matches!(state.run_state, RunState::Starting | RunState::Running) {
            debug!(from = %state.run_state, to = %RunState::Stopping, "run state changed");
            state.run_state = RunState::Stopping;
        }
    }

    /// Delivers one run-state notification to the registered client, if
    /// any. The callback slot holds at most one addressee.
    fn send_result(&self, running: bool) {
        let callback = self.lock_state().callback.clone();
        if let Some(callback) = callback {
            callback(running);
        }
    }

    /// Foreground visibility is derived solely from "no client attached
    /// and an invocation running".
    fn update_foreground(&self) {
        let running = self.supervisor.is_running();
        let mut state = self.lock_state();
        let visible = state.attachments == 0 && running;
        if visible != state.foreground {
            state.foreground = visible;
            drop(state);
            self.notifier.set_foreground(visible);
        }
    }
}

/// Owns the worker and the supervisor. Dropping the host (after
/// [`LifecycleHost::shutdown`]) retires the worker.
pub struct LifecycleHost {
    shared: Arc<HostShared>,
    commands: mpsc::Sender<Command>,
    worker: JoinHandle<()>,
}

impl LifecycleHost {
    pub fn new(
        notifier: Arc<dyn Notifier>,
        registry: Arc<dyn RendererRegistry>,
        wake: Arc<dyn WakeLock>,
        connectivity: Arc<dyn ConnectivityProbe>,
    ) -> Self {
        let shared = Arc::new(HostShared {
            supervisor: ProcessSupervisor::default(),
            notifier,
            registry,
            wake,
            connectivity,
            state: StdMutex::new(HostState {
                run_state: RunState::Idle,
                attachments: 0,
                foreground: false,
                callback: None,
            }),
        });
        let (commands, command_rx) = mpsc::channel(COMMAND_QUEUE_DEPTH);
        let worker = tokio::spawn(worker_loop(Arc::clone(&shared), command_rx));
        Self {
            shared,
            commands,
            worker,
        }
    }

    /// The boundary object for clients. Cheap to clone.
    pub fn channel(&self) -> ControlChannel {
        ControlChannel {
            shared: Arc::clone(&self.shared),
            commands: self.commands.clone(),
        }
    }

    /// Teardown: issues the stop signal and closes the command queue, then
    /// waits for the worker to retire. The worker itself awaits the
    /// child's exit before it does; an engine that shrugs off the
    /// interrupt is killed once the teardown grace elapses.
    pub async fn shutdown(self) {
        let Self {
            shared,
            commands,
            mut worker,
        } = self;
        shared.supervisor.stop();
        drop(commands);
        match timeout(TEARDOWN_GRACE, &mut worker).await {
            Ok(joined) => {
                if joined.is_err() {
                    warn!("lifecycle worker ended abnormally");
                }
            }
            Err(_) => {
                shared.supervisor.stop();
                if worker.await.is_err() {
                    warn!("lifecycle worker ended abnormally");
                }
            }
        }
    }
}

/// Exposes start/stop/is-running plus attachment tracking to whatever
/// client is currently bound.
#[derive(Clone)]
pub struct ControlChannel {
    shared: Arc<HostShared>,
    commands: mpsc::Sender<Command>,
}

impl ControlChannel {
    /// Accepts a start request and enqueues it onto the worker. Refused
    /// with [`WardenErr::AlreadyRunning`] unless the host is idle. An
    /// offline interactive start settles with an advisory instead of an
    /// invocation.
    pub fn start(&self, options: StartOptions) -> Result<()> {
        let config = InvocationConfig::from(options);

        {
            let state = self.shared.lock_state();
            if state.run_state != RunState::Idle {
                return Err(WardenErr::AlreadyRunning);
            }
        }

        if !self.shared.connectivity.is_online() {
            info!("network unavailable; download engine not started");
            if config.interactive {
                self.shared.notifier.toast(NO_NETWORK_TEXT);
            }
            return Ok(());
        }

        let invocation = self.shared.supervisor.begin(config)?;
        self.shared.set_run_state(RunState::Starting);
        if self
            .commands
            .try_send(Command::Start(Arc::clone(&invocation)))
            .is_err()
        {
            self.shared.supervisor.retire(&invocation);
            self.shared.set_run_state(RunState::Idle);
            return Err(WardenErr::WorkerGone);
        }
        Ok(())
    }

    /// Stops the current invocation, then starts a fresh one with the new
    /// configuration once the worker has settled the old run.
    pub fn restart(&self, options: StartOptions) -> Result<()> {
        self.stop();
        let config = InvocationConfig::from(options);
        self.commands
            .try_send(Command::Restart(config))
            .map_err(|_| WardenErr::WorkerGone)
    }

    /// Escalating stop; see [`Invocation::stop`]. Safe to call from any
    /// thread, concurrently with the worker's own spawn/await sequence.
    pub fn stop(&self) {
        match self.shared.supervisor.stop() {
            StopOutcome::Interrupted => {}
            StopOutcome::Killed => self.shared.note_forceful_stop(),
            StopOutcome::AlreadyDown => debug!("stop requested with nothing running"),
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.supervisor.is_running()
    }

    pub fn run_state(&self) -> RunState {
        self.shared.lock_state().run_state
    }

    /// Registers the single result-callback slot; a newly attached client
    /// always supersedes the previous addressee.
    pub fn register_result_callback(&self, callback: impl Fn(bool) + Send + Sync + 'static) {
        self.shared.lock_state().callback = Some(Arc::new(callback));
    }

    pub fn bind(&self) {
        {
            let mut state = self.shared.lock_state();
            state.attachments += 1;
        }
        self.shared.update_foreground();
    }

    /// Unbind is clamped at zero so a pathological unpaired call can never
    /// push the count negative.
    pub fn unbind(&self) {
        {
            let mut state = self.shared.lock_state();
            if state.attachments == 0 {
                warn!("unbind without a matching bind");
            }
            state.attachments = state.attachments.saturating_sub(1);
        }
        self.shared.update_foreground();
    }

    /// A returning client counts like a fresh bind.
    pub fn rebind(&self) {
        self.bind();
    }

    #[cfg(test)]
    pub(crate) fn attachments(&self) -> u32 {
        self.shared.lock_state().attachments
    }
}

async fn worker_loop(shared: Arc<HostShared>, mut commands: mpsc::Receiver<Command>) {
    while let Some(command) = commands.recv().await {
        match command {
            Command::Start(invocation) => run_invocation(&shared, invocation).await,
            Command::Restart(config) => match shared.supervisor.begin(config) {
                Ok(invocation) => {
                    shared.set_run_state(RunState::Starting);
                    run_invocation(&shared, invocation).await;
                }
                Err(err) => error!(error = ?err, "restart could not claim the invocation slot"),
            },
        }
    }
}

/// One full invocation, executed serially on the worker: spawn, relay,
/// await exit, final notifications.
async fn run_invocation(shared: &Arc<HostShared>, invocation: Arc<Invocation>) {
    let spawned = match shared.supervisor.spawn(&invocation) {
        Ok(spawned) => spawned,
        Err(err) => {
            error!(error = ?err, "download engine failed to start");
            invocation.mark_gone();
            shared.supervisor.retire(&invocation);
            shared.send_result(false);
            shared.set_run_state(RunState::Idle);
            shared.update_foreground();
            return;
        }
    };

    let config = invocation.config();
    let wake_guard = if config.take_wakelock {
        let guard = shared.wake.acquire();
        if guard.is_none() {
            debug!("wakelock unavailable; continuing without it");
        }
        guard
    } else {
        None
    };

    shared.set_run_state(RunState::Running);
    shared.send_result(true);
    shared.update_foreground();

    let exit_notify = Arc::new(Notify::new());
    let relay = OutputRelay::new(
        spawned.reader,
        spawned.renderer_io,
        config.verbose_output,
        Arc::clone(&exit_notify),
        Arc::clone(&shared.notifier),
        Arc::clone(&shared.registry),
    );
    let relay_task = tokio::spawn(relay.run());

    let exit_code = ProcessSupervisor::await_exit(spawned.wait).await;
    invocation.mark_gone();
    exit_notify.notify_one();
    if relay_task.await.is_err() {
        warn!("output relay ended abnormally");
    }
    drop(wake_guard);

    info!(pid = spawned.pid, exit_code, "download engine exited");
    shared.send_result(false);
    if invocation.config().notify_on_stop {
        shared.notifier.stopped(StoppedEvent {
            exit_code,
            did_work: invocation.did_some_work(),
            killed_forcefully: invocation.killed_forcefully(),
        });
    }
    shared.supervisor.retire(&invocation);
    shared.set_run_state(RunState::Idle);
    shared.update_foreground();
}
