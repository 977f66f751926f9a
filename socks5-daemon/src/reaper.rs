//! The session reaper: one task per worker, woken on a fixed
//! interval, decrementing each live session's liveness counter and waking
//! (here: aborting) any session that has run dry.

use std::sync::atomic::Ordering;
use std::time::Duration;

use crate::worker::LiveSessions;

/// Sessions refill their counter to this value on every successful byte of
/// I/O. With the default 30s reaper interval this yields an effective idle
/// timeout of `LIVENESS_REFILL * REAP_INTERVAL` = 300s.
pub const LIVENESS_REFILL: i32 = 10;

pub const REAP_INTERVAL: Duration = Duration::from_secs(30);

/// Runs until the worker's `LocalSet` is torn down (the task is simply
/// never joined past that point — its abort handle lives on the worker).
pub async fn run(sessions: LiveSessions) {
    let mut ticker = tokio::time::interval(REAP_INTERVAL);
    // The first tick fires immediately; skip it so freshly-accepted
    // sessions get a full interval of grace before the first decrement.
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let mut reaped = 0usize;
        for entry in sessions.iter() {
            let remaining = entry.liveness.fetch_sub(1, Ordering::AcqRel) - 1;
            if remaining <= 0 {
                entry.abort.abort();
                reaped += 1;
            }
        }
        if reaped > 0 {
            tracing::debug!(reaped, "reaper aborted idle sessions");
            for _ in 0..reaped {
                crate::metrics::record_session_reaped();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::SessionHandle;
    use dashmap::DashMap;
    use std::sync::atomic::AtomicI32;
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn decrements_and_aborts_on_zero() {
        let sessions: LiveSessions = Arc::new(DashMap::new());
        let liveness = Arc::new(AtomicI32::new(1));
        let task = tokio::spawn(std::future::pending::<()>());
        sessions.insert(
            1,
            SessionHandle {
                abort: task.abort_handle(),
                liveness: liveness.clone(),
            },
        );

        let reaper = tokio::spawn(run(sessions.clone()));
        tokio::time::advance(REAP_INTERVAL * 2).await;
        tokio::task::yield_now().await;

        assert!(task.is_finished());
        reaper.abort();
    }
}
