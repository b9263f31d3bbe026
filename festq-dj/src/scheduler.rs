//! Periodic scheduler driving round deadlines and the playback clock

use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};

use crate::service::{DjService, TickReport};

/// Spawn the tick loop; it runs until the returned handle is aborted
pub fn spawn(service: Arc<DjService>) -> JoinHandle<()> {
    let period = service.config().tick_interval;
    info!("Scheduler started (tick every {:?})", period);

    tokio::spawn(async move {
        let mut ticker = interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            ticker.tick().await;
            let report = service.tick(festq_common::time::now()).await;
            if report != TickReport::default() {
                debug!("Tick: {:?}", report);
            }
        }
    })
}
