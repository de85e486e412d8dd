//! Command-line front end: starts the download engine under the lifecycle
//! host and maps Ctrl-C onto the escalating stop protocol.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tracing::info;

use warden_core::AssumeOnline;
use warden_core::LifecycleHost;
use warden_core::NoRenderers;
use warden_core::NoWakeLock;
use warden_core::Notifier;
use warden_protocol::StartOptions;
use warden_protocol::StoppedEvent;

#[derive(Debug, Parser)]
#[command(name = "warden", about = "Supervise a download engine on a pseudo-terminal")]
struct Cli {
    /// Download-engine executable to launch.
    #[arg(long, default_value = "aria2c")]
    program: String,

    /// Session directory, exported to the engine as HOME.
    #[arg(long, value_name = "DIR", default_value = ".")]
    home: PathBuf,

    /// Network interface the engine should bind to.
    #[arg(long, value_name = "IFACE")]
    interface: Option<String>,

    /// Surface captured engine output even when the run did not fail fast.
    #[arg(long)]
    verbose: bool,

    /// Skip the exit summary when the engine stops.
    #[arg(long)]
    quiet_stop: bool,

    /// Extra arguments passed to the engine verbatim.
    #[arg(trailing_var_arg = true, allow_hyphen_values = true, value_name = "ENGINE_ARGS")]
    engine_args: Vec<String>,
}

/// Routes host notifications to the controlling terminal.
struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn toast(&self, text: &str) {
        eprintln!("{text}");
    }

    fn stopped(&self, event: StoppedEvent) {
        let how = if event.killed_forcefully {
            "killed"
        } else {
            "exited"
        };
        eprintln!(
            "engine {how} with code {} (did work: {})",
            event.exit_code, event.did_work
        );
    }

    fn set_foreground(&self, visible: bool) {
        info!(visible, "foreground visibility changed");
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    setup_tracing();
    let cli = Cli::parse();

    let host = LifecycleHost::new(
        Arc::new(ConsoleNotifier),
        Arc::new(NoRenderers),
        Arc::new(NoWakeLock),
        Arc::new(AssumeOnline),
    );
    let channel = host.channel();

    let (settled_tx, mut settled_rx) = tokio::sync::mpsc::unbounded_channel();
    channel.register_result_callback(move |running| {
        let _ = settled_tx.send(running);
    });

    channel.start(StartOptions {
        program: cli.program,
        args: cli.engine_args,
        home_dir: cli.home,
        network_interface: cli.interface,
        take_wakelock: false,
        verbose_output: cli.verbose,
        delegate_display: false,
        notify_on_stop: !cli.quiet_stop,
        interactive: true,
    })?;

    // First Ctrl-C interrupts the engine, a second one kills it outright.
    loop {
        tokio::select! {
            result = settled_rx.recv() => match result {
                Some(true) => info!("download engine is running"),
                Some(false) | None => break,
            },
            signal = tokio::signal::ctrl_c() => {
                signal?;
                channel.stop();
            }
        }
    }

    host.shutdown().await;
    Ok(())
}

fn setup_tracing() {
    if tracing::dispatcher::has_been_set() {
        return;
    }
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .try_init();
}
