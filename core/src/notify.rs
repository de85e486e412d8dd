//! Boundaries toward the presentation and hosting environment. The core
//! never assumes control over notification rendering or power management;
//! the embedding host supplies these capabilities.

use tracing::info;
use warden_protocol::StoppedEvent;

/// Presentation collaborator. Implementations decide how advisory text and
/// lifecycle events actually reach the user.
pub trait Notifier: Send + Sync {
    /// Short advisory text (diagnostic banner, "no network" warning).
    fn toast(&self, text: &str);

    /// Structured event describing how a run ended.
    fn stopped(&self, event: StoppedEvent);

    /// Whether the running invocation should be promoted to a
    /// foreground-visible task.
    fn set_foreground(&self, visible: bool);
}

/// Default presentation: everything goes to the diagnostic log.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn toast(&self, text: &str) {
        info!(text, "advisory");
    }

    fn stopped(&self, event: StoppedEvent) {
        info!(
            exit_code = event.exit_code,
            did_work = event.did_work,
            killed_forcefully = event.killed_forcefully,
            "download engine stopped"
        );
    }

    fn set_foreground(&self, visible: bool) {
        info!(visible, "foreground visibility changed");
    }
}

/// Keeps the machine awake while a download runs. Released on drop.
pub trait WakeGuard: Send {}

/// Wakelock-style capability. Acquisition failure is a feature being
/// unavailable, not an error: the invocation proceeds without it.
pub trait WakeLock: Send + Sync {
    fn acquire(&self) -> Option<Box<dyn WakeGuard>>;
}

/// Host provided no power-management integration.
#[derive(Debug, Default)]
pub struct NoWakeLock;

impl WakeLock for NoWakeLock {
    fn acquire(&self) -> Option<Box<dyn WakeGuard>> {
        None
    }
}
