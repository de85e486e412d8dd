//! Consumes the pseudo-terminal's output stream on a dedicated worker.
//!
//! The child deadlocks if nobody drains its terminal, so the relay either
//! reads continuously itself or hands the terminal to an external renderer
//! and takes over again once that session ends. On completion it derives a
//! diagnostic banner from the earliest captured output window.

use std::io::ErrorKind;
use std::io::Read;
use std::io::Write;
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::Duration;
use std::time::Instant;

use tokio::sync::Notify;
use tokio::sync::oneshot;
use tokio::time::timeout;
use tracing::debug;
use tracing::trace;

use crate::banner;
use crate::notify::Notifier;

/// Most recent output retained for the diagnostic banner.
const OUTPUT_WINDOW_BYTES: usize = 2048;
/// Bound on the wait for a renderer's initial handoff acknowledgment.
const HANDOFF_ACK_TIMEOUT: Duration = Duration::from_secs(5);
/// A process that dies this quickly is assumed diagnostic-worthy even when
/// verbose output is off.
const STARTUP_GRACE: Duration = Duration::from_millis(400);

/// The pseudo-terminal handles passed to an external renderer. The
/// renderer must drop these when its session ends so the relay's own
/// reader can reach end-of-stream.
pub struct RendererIo {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

impl std::fmt::Debug for RendererIo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RendererIo").finish_non_exhaustive()
    }
}

/// Handle an external renderer uses to report on its session. Cheap to
/// clone; both signals are latched, so firing them before the relay waits
/// is fine.
#[derive(Clone)]
pub struct RendererSession {
    ack: Arc<StdMutex<Option<oneshot::Sender<()>>>>,
    released: Arc<Notify>,
}

impl RendererSession {
    fn channel() -> (Self, oneshot::Receiver<()>, Arc<Notify>) {
        let (ack_tx, ack_rx) = oneshot::channel();
        let released = Arc::new(Notify::new());
        let session = Self {
            ack: Arc::new(StdMutex::new(Some(ack_tx))),
            released: Arc::clone(&released),
        };
        (session, ack_rx, released)
    }

    /// First successful display of the terminal. Without this within the
    /// handoff bound, delegation is abandoned.
    pub fn acknowledge(&self) {
        let sender = match self.ack.lock() {
            Ok(mut guard) => guard.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(sender) = sender {
            let _ = sender.send(());
        }
    }

    /// The renderer is done with the terminal (disconnected or crashed).
    pub fn release(&self) {
        self.released.notify_one();
    }
}

/// External component capable of rendering a live terminal session.
pub trait TerminalRenderer: Send + Sync {
    fn start_session(&self, io: RendererIo, session: RendererSession) -> anyhow::Result<()>;
}

/// Capability lookup against the hosting environment; the first match is
/// accepted.
pub trait RendererRegistry: Send + Sync {
    fn resolve(&self) -> Option<Arc<dyn TerminalRenderer>>;
}

/// Hosting environment without terminal renderers.
#[derive(Debug, Default)]
pub struct NoRenderers;

impl RendererRegistry for NoRenderers {
    fn resolve(&self) -> Option<Arc<dyn TerminalRenderer>> {
        None
    }
}

pub(crate) struct OutputRelay {
    reader: Box<dyn Read + Send>,
    renderer_io: Option<RendererIo>,
    verbose_output: bool,
    started_at: Instant,
    exit_notify: Arc<Notify>,
    notifier: Arc<dyn Notifier>,
    registry: Arc<dyn RendererRegistry>,
}

impl OutputRelay {
    pub(crate) fn new(
        reader: Box<dyn Read + Send>,
        renderer_io: Option<RendererIo>,
        verbose_output: bool,
        exit_notify: Arc<Notify>,
        notifier: Arc<dyn Notifier>,
        registry: Arc<dyn RendererRegistry>,
    ) -> Self {
        Self {
            reader,
            renderer_io,
            verbose_output,
            started_at: Instant::now(),
            exit_notify,
            notifier,
            registry,
        }
    }

    pub(crate) async fn run(mut self) {
        if let Some(io) = self.renderer_io.take() {
            self.delegate(io).await;
        }

        let reader = self.reader;
        let outcome = tokio::task::spawn_blocking(move || drain(reader))
            .await
            .unwrap_or_default();

        let source = String::from_utf8_lossy(&outcome.banner_source);
        if self.verbose_output || self.started_at.elapsed() < STARTUP_GRACE {
            if let Some(text) = banner::compose(&source) {
                self.notifier.toast(&text);
            }
        }
    }

    /// Hands the terminal to the first renderer the environment offers and
    /// waits until that session ends or the child dies, whichever happens
    /// first. Every failure mode falls back to plain draining silently.
    async fn delegate(&mut self, io: RendererIo) {
        let Some(renderer) = self.registry.resolve() else {
            trace!("no terminal renderer available");
            return;
        };

        let (session, ack_rx, released) = RendererSession::channel();
        if let Err(err) = renderer.start_session(io, session) {
            debug!(error = ?err, "terminal renderer refused the session");
            return;
        }

        match timeout(HANDOFF_ACK_TIMEOUT, ack_rx).await {
            Ok(Ok(())) => {
                tokio::select! {
                    _ = released.notified() => {
                        debug!("terminal renderer released the session");
                    }
                    _ = self.exit_notify.notified() => {
                        debug!("download engine exited while delegated");
                    }
                }
            }
            Ok(Err(_)) | Err(_) => {
                debug!("terminal renderer never acknowledged the handoff");
            }
        }
    }
}

#[derive(Default)]
struct DrainOutcome {
    /// First filled window if one was captured, otherwise whatever was
    /// left in the window at end-of-stream.
    banner_source: Vec<u8>,
}

/// Reads until end-of-stream into a fixed rolling window. Each time the
/// window fills it goes to the trace log and is cleared; the first segment
/// is kept verbatim as early output for the banner.
fn drain(mut reader: Box<dyn Read + Send>) -> DrainOutcome {
    let mut window = [0u8; OUTPUT_WINDOW_BYTES];
    let mut filled = 0usize;
    let mut early: Option<Vec<u8>> = None;

    loop {
        match reader.read(&mut window[filled..]) {
            Ok(0) => break,
            Ok(n) => {
                filled += n;
                if filled == window.len() {
                    if early.is_none() {
                        early = Some(window.to_vec());
                    }
                    trace!(output = %String::from_utf8_lossy(&window), "engine output");
                    filled = 0;
                }
            }
            Err(ref err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(ref err) if err.kind() == ErrorKind::WouldBlock => {
                std::thread::sleep(Duration::from_millis(5));
                continue;
            }
            // A pty master reports EIO rather than a clean EOF once the
            // slave side is gone.
            Err(_) => break,
        }
    }

    if filled > 0 {
        trace!(output = %String::from_utf8_lossy(&window[..filled]), "engine output");
    }

    let banner_source = early.unwrap_or_else(|| window[..filled].to_vec());
    DrainOutcome { banner_source }
}
