//! Types crossing the control boundary between the supervisor host and
//! whatever client drives it (CLI today, an RPC surface tomorrow).

use std::fmt;
use std::path::PathBuf;

use serde::Deserialize;
use serde::Serialize;

/// Parameters of one start request, as supplied by a client. The host turns
/// these into an immutable per-invocation configuration snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StartOptions {
    /// Path to (or name of) the download-engine executable.
    pub program: String,
    /// Extra arguments appended verbatim before the injected flags.
    #[serde(default)]
    pub args: Vec<String>,
    /// Private storage directory; also exported as `HOME` to the child.
    pub home_dir: PathBuf,
    /// Network interface the engine should bind to, if any.
    #[serde(default)]
    pub network_interface: Option<String>,
    /// Hold a wakelock-style inhibitor while the engine runs.
    #[serde(default)]
    pub take_wakelock: bool,
    /// Surface captured output even when the run did not fail fast.
    #[serde(default)]
    pub verbose_output: bool,
    /// Hand the pseudo-terminal to an external renderer when one is found.
    #[serde(default)]
    pub delegate_display: bool,
    /// Emit the structured stopped event when the run ends.
    #[serde(default = "default_true")]
    pub notify_on_stop: bool,
    /// Whether a human is watching; gates the "no network" advisory.
    #[serde(default)]
    pub interactive: bool,
}

fn default_true() -> bool {
    true
}

/// Lifecycle of the host, observable at the control boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Idle,
    Starting,
    Running,
    Stopping,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Starting => write!(f, "starting"),
            Self::Running => write!(f, "running"),
            Self::Stopping => write!(f, "stopping"),
        }
    }
}

/// Structured event describing how an invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoppedEvent {
    pub exit_code: i32,
    /// True when the engine ran long enough to have plausibly done work.
    pub did_work: bool,
    /// True when the second stop call escalated to an unconditional kill.
    pub killed_forcefully: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn start_options_defaults_apply() {
        let options: StartOptions = serde_json::from_str(
            r#"{"program": "aria2c", "home_dir": "/tmp/warden"}"#,
        )
        .expect("minimal options parse");

        assert_eq!(options.args, Vec::<String>::new());
        assert_eq!(options.network_interface, None);
        assert!(!options.take_wakelock);
        assert!(!options.verbose_output);
        assert!(!options.delegate_display);
        assert!(options.notify_on_stop);
        assert!(!options.interactive);
    }

    #[test]
    fn run_state_serializes_snake_case() {
        let json = serde_json::to_string(&RunState::Starting).expect("serialize");
        assert_eq!(json, "\"starting\"");
    }

    #[test]
    fn stopped_event_round_trips() {
        let event = StoppedEvent {
            exit_code: 7,
            did_work: true,
            killed_forcefully: false,
        };
        let json = serde_json::to_string(&event).expect("serialize");
        let back: StoppedEvent = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(event, back);
    }
}
