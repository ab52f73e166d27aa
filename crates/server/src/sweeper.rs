//! Idle session eviction
//!
//! Sessions are never closed explicitly, so a periodic sweep removes the
//! ones that have no live connection and have been idle longer than the TTL.

use crate::session::SessionDirectory;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

pub fn spawn(
    sessions: Arc<SessionDirectory>,
    interval: Duration,
    ttl: chrono::Duration,
) -> JoinHandle<()> {
    let interval = if interval.is_zero() {
        warn!(
            "Session sweep interval must be positive, using {}s",
            crate::config::DEFAULT_SWEEP_SECS
        );
        Duration::from_secs(crate::config::DEFAULT_SWEEP_SECS)
    } else {
        interval
    };

    info!(
        "Session sweeper running every {:?}, ttl {}s",
        interval,
        ttl.num_seconds()
    );

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        // The first tick completes immediately.
        ticker.tick().await;

        loop {
            ticker.tick().await;
            let evicted = sessions.evict_idle(Utc::now(), ttl);
            debug!(evicted, remaining = sessions.len(), "session sweep");
        }
    })
}
