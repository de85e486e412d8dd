//! Supervised child-process manager for a long-running download engine.
//!
//! The engine runs attached to a pseudo-terminal; its lifetime is driven
//! by a single serialized worker, its output by a dedicated relay, and
//! shutdown by an escalating interrupt-then-kill protocol that stays
//! idempotent under concurrent callers.

mod banner;
mod config;
mod connectivity;
mod error;
mod host;
mod invocation;
mod notify;
mod relay;
mod supervisor;

pub use config::InvocationConfig;
pub use connectivity::AssumeOnline;
pub use connectivity::ConnectivityProbe;
pub use error::Result;
pub use error::WardenErr;
pub use host::ControlChannel;
pub use host::LifecycleHost;
pub use invocation::Invocation;
pub use invocation::StopOutcome;
pub use notify::LogNotifier;
pub use notify::NoWakeLock;
pub use notify::Notifier;
pub use notify::WakeGuard;
pub use notify::WakeLock;
pub use relay::NoRenderers;
pub use relay::RendererIo;
pub use relay::RendererRegistry;
pub use relay::RendererSession;
pub use relay::TerminalRenderer;
pub use supervisor::ProcessSupervisor;
