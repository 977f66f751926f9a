//! A Worker owns one listener fd, drives its own accept loop and reaper on
//! a single-threaded cooperative scheduler (one tokio current-thread
//! runtime + `LocalSet` per OS thread), and tracks live sessions.

use std::net::TcpListener as StdTcpListener;
use std::sync::atomic::{AtomicI32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::DashMap;
use tokio::net::TcpListener;
use tokio::task::AbortHandle;

use socks5_core::auth::UserStore;
use socks5_core::config::ProxyConfig;
use socks5_transport::resolver::DnsResolver;

use crate::control::ControlEvent;
use crate::reaper::{self, LIVENESS_REFILL};
use crate::session::Session;

pub type SessionId = u64;
pub type LiveSessions = Arc<DashMap<SessionId, SessionHandle>>;

/// What the worker keeps about a live session: enough to cancel it (the
/// reaper's and the event task's only lever) and to decrement its
/// liveness. The session itself stays the sole owner of its sockets.
pub struct SessionHandle {
    pub abort: AbortHandle,
    pub liveness: Arc<AtomicI32>,
}

/// Removes the session's entry from the live list on any exit path,
/// including cancellation by `AbortHandle::abort()`.
struct SessionListGuard {
    id: SessionId,
    sessions: LiveSessions,
}

impl Drop for SessionListGuard {
    fn drop(&mut self) {
        self.sessions.remove(&self.id);
    }
}

/// How long the shutdown path waits for live sessions to actually drop
/// their resources after being aborted, before giving up and returning
/// anyway (the worker thread must still join promptly).
const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Worker {
    id: usize,
    config: Arc<ProxyConfig>,
    listener: TcpListener,
    sessions: LiveSessions,
    next_id: AtomicU64,
    user_store: ArcSwap<UserStore>,
    resolver: DnsResolver,
    control: tokio::sync::broadcast::Receiver<ControlEvent>,
}

impl Worker {
    pub fn new(
        id: usize,
        config: Arc<ProxyConfig>,
        listener: StdTcpListener,
        initial_store: Arc<UserStore>,
        resolver: DnsResolver,
        control: tokio::sync::broadcast::Receiver<ControlEvent>,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::from_std(listener)?;
        Ok(Self {
            id,
            config,
            listener,
            sessions: Arc::new(DashMap::new()),
            next_id: AtomicU64::new(0),
            user_store: ArcSwap::new(initial_store),
            resolver,
            control,
        })
    }

    /// Runs the accept loop and the reaper on the current `LocalSet` until
    /// a shutdown control event is observed. Must be called from inside
    /// `LocalSet::run_until`.
    pub async fn run(mut self) {
        let reaper_handle = tokio::task::spawn_local(reaper::run(self.sessions.clone()));

        loop {
            tokio::select! {
                biased;
                event = self.control.recv() => {
                    match event {
                        Ok(ControlEvent::Shutdown) | Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                        Ok(ControlEvent::Reload(store)) => {
                            tracing::info!(worker = self.id, "installing reloaded user store");
                            self.user_store.store(store);
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            tracing::warn!(worker = self.id, skipped, "control bus lagged");
                        }
                    }
                }
                accepted = self.listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => self.spawn_session(stream, peer),
                        Err(e) => {
                            tracing::warn!(worker = self.id, error = %e, "accept failed, continuing");
                        }
                    }
                }
            }
        }

        reaper_handle.abort();
        self.drain().await;
        tracing::info!(worker = self.id, "worker stopped");
    }

    fn spawn_session(&self, stream: tokio::net::TcpStream, peer: std::net::SocketAddr) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let liveness = Arc::new(AtomicI32::new(LIVENESS_REFILL));
        let guard = SessionListGuard {
            id,
            sessions: self.sessions.clone(),
        };

        let session = Session::new(
            stream,
            peer,
            self.config.clone(),
            self.user_store.load_full(),
            self.resolver.clone(),
            liveness.clone(),
        );

        crate::metrics::record_session_accepted();
        let task = tokio::task::spawn_local(async move {
            let _guard = guard;
            let _ = session.run().await;
            crate::metrics::record_session_closed();
        });

        tracing::debug!(worker = self.id, session = id, peer = %peer, "accepted session");
        self.sessions.insert(
            id,
            SessionHandle {
                abort: task.abort_handle(),
                liveness,
            },
        );
    }

    /// Aborts every live session and waits (bounded) for the live list to
    /// drain before the worker thread returns.
    async fn drain(&self) {
        for entry in self.sessions.iter() {
            entry.abort.abort();
        }
        let deadline = tokio::time::Instant::now() + SHUTDOWN_DRAIN_TIMEOUT;
        while !self.sessions.is_empty() && tokio::time::Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        if !self.sessions.is_empty() {
            tracing::warn!(
                worker = self.id,
                remaining = self.sessions.len(),
                "shutdown drain timed out with sessions still live"
            );
        }
    }
}
