//! Background upkeep of the membership view.
//!
//! Each round refreshes against the bootstrap directory, waits a jittered
//! period, gossips with one random peer, and waits again. Jitter keeps
//! instances started together from hitting the directory in lockstep.

use crate::shutdown::ShutdownSignal;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use session_core::{Directory, MembershipView, RpcClient};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// A period drawn uniformly from `[base/2, base*3/2)`.
pub fn jittered<R: Rng + ?Sized>(base: Duration, rng: &mut R) -> Duration {
    let max_extra = u64::try_from(base.as_millis()).unwrap_or(u64::MAX);
    if max_extra == 0 {
        return Duration::ZERO;
    }
    base / 2 + Duration::from_millis(rng.random_range(0..max_extra))
}

pub struct ViewMaintenance {
    view: Arc<MembershipView>,
    directory: Arc<dyn Directory>,
    rpc: Arc<dyn RpcClient>,
    /// Base period between steps (default: 5 seconds)
    period: Duration,
}

impl ViewMaintenance {
    pub fn new(
        view: Arc<MembershipView>,
        directory: Arc<dyn Directory>,
        rpc: Arc<dyn RpcClient>,
        period: Duration,
    ) -> Self {
        Self {
            view,
            directory,
            rpc,
            period,
        }
    }

    /// Run rounds until shutdown. Failures are logged and retried next round.
    pub async fn run(self, mut shutdown: ShutdownSignal) {
        let mut rng = StdRng::from_os_rng();
        loop {
            if let Err(e) = self
                .view
                .refresh_directory(self.directory.as_ref(), &mut rng)
                .await
            {
                warn!("Directory refresh failed: {}", e);
            }

            if !shutdown.sleep(jittered(self.period, &mut rng)).await {
                break;
            }

            self.view.gossip_once(self.rpc.as_ref(), &mut rng).await;

            if !shutdown.sleep(jittered(self.period, &mut rng)).await {
                break;
            }
        }
        debug!("View maintenance stopped");
    }
}
