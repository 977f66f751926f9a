//! Worker/reaper/session core for the multi-worker SOCKS5 proxy. The
//! binary in `main.rs` is a thin CLI shell around [`orchestrator::Proxy`].

pub mod binder;
pub mod control;
pub mod metrics;
pub mod orchestrator;
pub mod reaper;
pub mod session;
pub mod wire;
pub mod worker;

pub use control::ControlBus;
pub use orchestrator::Proxy;
