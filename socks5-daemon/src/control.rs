//! Cross-thread control signalling. The original design wakes each
//! worker's event task with a single byte written to a self-pipe (`'s'`
//! stop, `'r'` reload). Tokio's reactor can already wake a task blocked on
//! I/O from any thread, so a [`tokio::sync::broadcast`] channel fanned out
//! to every worker is the direct async substitute — same "every worker
//! observes every control event" shape, no raw fd plumbing.

use std::sync::Arc;

use socks5_core::auth::UserStore;
use tokio::sync::broadcast;

#[derive(Debug, Clone)]
pub enum ControlEvent {
    /// Stop accepting; drain live sessions.
    Shutdown,
    /// A freshly published user store; workers install it at their next
    /// safe point.
    Reload(Arc<UserStore>),
}

/// Owned by the orchestrator; `subscribe()` is called once per worker at
/// startup.
#[derive(Clone)]
pub struct ControlBus {
    tx: broadcast::Sender<ControlEvent>,
}

impl ControlBus {
    pub fn new() -> Self {
        // Bounded buffer: workers that briefly fall behind (e.g. mid-accept)
        // still see the event once they poll again; the daemon never emits
        // enough distinct control events for this to matter in practice.
        let (tx, _rx) = broadcast::channel(16);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ControlEvent> {
        self.tx.subscribe()
    }

    pub fn shutdown(&self) {
        let _ = self.tx.send(ControlEvent::Shutdown);
    }

    pub fn reload(&self, store: Arc<UserStore>) {
        let _ = self.tx.send(ControlEvent::Reload(store));
    }
}

impl Default for ControlBus {
    fn default() -> Self {
        Self::new()
    }
}
