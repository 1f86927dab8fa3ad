//! Periodic eviction of expired sessions.

use crate::shutdown::ShutdownSignal;
use session_core::SessionStore;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Sweep `store` every `interval` until shutdown.
pub async fn run_gc(store: Arc<SessionStore>, interval: Duration, mut shutdown: ShutdownSignal) {
    loop {
        let evicted = store.sweep();
        if evicted > 0 {
            info!("Evicted {} expired session(s), {} left", evicted, store.len());
        }

        if !shutdown.sleep(interval).await {
            break;
        }
    }
    debug!("Session GC stopped");
}
