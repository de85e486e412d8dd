use std::path::PathBuf;

use portable_pty::CommandBuilder;
use warden_protocol::StartOptions;

/// Immutable configuration snapshot for one invocation of the download
/// engine. Created per start request and owned exclusively by the
/// [`Invocation`](crate::invocation::Invocation) it configures.
#[derive(Debug, Clone)]
pub struct InvocationConfig {
    pub program: String,
    pub args: Vec<String>,
    pub home_dir: PathBuf,
    pub network_interface: Option<String>,
    pub take_wakelock: bool,
    pub verbose_output: bool,
    pub delegate_display: bool,
    pub notify_on_stop: bool,
    pub interactive: bool,
}

impl InvocationConfig {
    /// Builds the child command: caller-provided arguments first, then the
    /// two injected flags. `--stop-with-process` ties the engine's lifetime
    /// to the host so an orphaned child shuts itself down if the host dies
    /// without running its stop sequence.
    pub fn to_command(&self, host_pid: u32) -> CommandBuilder {
        let mut command = CommandBuilder::new(&self.program);
        for arg in &self.args {
            command.arg(arg);
        }
        command.arg(format!("--stop-with-process={host_pid}"));
        if let Some(interface) = &self.network_interface {
            command.arg(format!("--interface={interface}"));
        }
        command.env("HOME", &self.home_dir);
        command.cwd(&self.home_dir);
        command
    }
}

impl From<StartOptions> for InvocationConfig {
    fn from(options: StartOptions) -> Self {
        let StartOptions {
            program,
            args,
            home_dir,
            network_interface,
            take_wakelock,
            verbose_output,
            delegate_display,
            notify_on_stop,
            interactive,
        } = options;
        Self {
            program,
            args,
            home_dir,
            network_interface,
            take_wakelock,
            verbose_output,
            delegate_display,
            notify_on_stop,
            interactive,
        }
    }
}
