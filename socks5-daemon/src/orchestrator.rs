//! Builds the TCP listener, starts the auth-file watcher, spawns one OS
//! thread per worker and waits for a shutdown signal.
//!
//! Each worker thread gets its own current-thread `tokio::runtime::Runtime`
//! plus a `tokio::task::LocalSet`, so a worker's sessions are `!Send` and
//! never migrate between threads — the multi-worker topology is cooperative
//! scheduling within a thread, not work-stealing across them.

use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::thread::JoinHandle;

use socks5_core::config::ProxyConfig;
use socks5_core::endpoint::Endpoint;
use socks5_core::error::{ProxyError, Result};
use socks5_transport::resolver::DnsResolver;
use socks5_transport::socket_factory::SocketFactory;

use crate::control::ControlBus;
use crate::worker::Worker;

pub struct Proxy {
    config: Arc<ProxyConfig>,
    factory: Arc<SocketFactory>,
    resolver: DnsResolver,
    control: ControlBus,
}

impl Proxy {
    pub fn new(config: Arc<ProxyConfig>) -> Result<Self> {
        let listen_ip: IpAddr = config
            .main
            .listen_address
            .parse()
            .map_err(|_| ProxyError::config(format!("invalid listen-address: {:?}", config.main.listen_address)))?;
        let listen_port: u16 = config
            .main
            .port
            .parse()
            .map_err(|_| ProxyError::config(format!("invalid port: {:?}", config.main.port)))?;
        let endpoint = Endpoint::from_socket_addr(SocketAddr::new(listen_ip, listen_port));
        let factory = Arc::new(SocketFactory::new(endpoint, config.main.listen_ipv6_only));

        Ok(Self {
            config,
            factory,
            resolver: DnsResolver::system(),
            control: ControlBus::new(),
        })
    }

    /// Spawns every worker thread and the auth-file watcher, then blocks
    /// until a shutdown signal arrives, drains, and joins the threads.
    pub async fn run(self) -> Result<()> {
        let initial_store = self
            .config
            .load_initial_user_store()?
            .unwrap_or_else(socks5_core::auth::UserStore::empty);

        if let Some(mut reload_rx) = self.config.watch_auth_file()? {
            let control = self.control.clone();
            tokio::spawn(async move {
                // The first value is the already-loaded initial store; only
                // react to changes observed afterwards.
                let _ = reload_rx.changed().await;
                loop {
                    let store = reload_rx.borrow_and_update().clone();
                    tracing::info!("auth file changed, broadcasting reload to workers");
                    control.reload(store);
                    if reload_rx.changed().await.is_err() {
                        break;
                    }
                }
            });
        }

        {
            let config = self.config.clone();
            let control = self.control.clone();
            tokio::spawn(run_reload_signal_loop(config, control));
        }

        let mut handles: Vec<JoinHandle<()>> = Vec::with_capacity(self.config.main.workers);
        for id in 0..self.config.main.workers {
            let config = self.config.clone();
            let factory = self.factory.clone();
            let resolver = self.resolver.clone();
            let initial_store = initial_store.clone();
            let control_rx = self.control.subscribe();

            let handle = std::thread::Builder::new()
                .name(format!("socks5-worker-{id}"))
                .spawn(move || run_worker_thread(id, config, factory, resolver, initial_store, control_rx))
                .map_err(|e| ProxyError::config(format!("failed to spawn worker thread: {e}")))?;
            handles.push(handle);
        }

        wait_for_shutdown_signal().await;
        tracing::info!("shutdown signal received, stopping workers");
        self.control.shutdown();

        for handle in handles {
            match tokio::task::spawn_blocking(move || handle.join()).await {
                Ok(Err(_)) => tracing::warn!("a worker thread panicked during shutdown"),
                Err(e) => tracing::warn!(error = %e, "worker thread join task failed"),
                Ok(Ok(())) => {}
            }
        }
        Ok(())
    }
}

fn run_worker_thread(
    id: usize,
    config: Arc<ProxyConfig>,
    factory: Arc<SocketFactory>,
    resolver: DnsResolver,
    initial_store: Arc<socks5_core::auth::UserStore>,
    control_rx: tokio::sync::broadcast::Receiver<crate::control::ControlEvent>,
) {
    let rt = match tokio::runtime::Builder::new_current_thread().enable_all().build() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(worker = id, error = %e, "failed to build worker runtime");
            return;
        }
    };
    let local = tokio::task::LocalSet::new();

    local.block_on(&rt, async move {
        let listener = match factory.get() {
            Ok(l) => l,
            Err(e) => {
                tracing::error!(worker = id, error = %e, "failed to acquire listener");
                return;
            }
        };
        let worker = match Worker::new(id, config, listener, initial_store, resolver, control_rx) {
            Ok(w) => w,
            Err(e) => {
                tracing::error!(worker = id, error = %e, "failed to build worker");
                return;
            }
        };
        worker.run().await;
    });
}

/// Waits for either Ctrl+C or, on Unix, `SIGTERM` — the two signals a
/// process manager or an interactive shell actually sends to ask a daemon
/// to stop.
#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut terminate = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGTERM handler, Ctrl+C only");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
}

/// Rebuilds the user store and broadcasts it to every worker each time
/// `SIGUSR1` arrives, the conventional "reload configuration" signal for
/// long-running Unix daemons. Not available outside Unix, so this task
/// simply never fires there — the file-watcher reload path still works
/// regardless.
#[cfg(unix)]
async fn run_reload_signal_loop(config: Arc<ProxyConfig>, control: ControlBus) {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sig = match signal(SignalKind::user_defined1()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!(error = %e, "failed to install SIGUSR1 handler, signal-triggered reload disabled");
            return;
        }
    };
    loop {
        sig.recv().await;
        tracing::info!("reload signal received, rebuilding user store");
        match config.load_initial_user_store() {
            Ok(store) => control.reload(store.unwrap_or_else(socks5_core::auth::UserStore::empty)),
            Err(e) => tracing::warn!(error = %e, "failed to rebuild user store on reload signal"),
        }
    }
}

#[cfg(not(unix))]
async fn run_reload_signal_loop(_config: Arc<ProxyConfig>, _control: ControlBus) {}
