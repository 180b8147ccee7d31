use std::{sync::Arc, time::Duration};

use tokio::{
   task::JoinHandle,
   time::{self, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use super::ResultCache;

/// Periodically sweeps expired entries and persists a snapshot. A final
/// snapshot is written when `cancel` fires.
pub fn spawn_maintenance(
   cache: Arc<ResultCache>,
   interval: Duration,
   cancel: CancellationToken,
) -> JoinHandle<()> {
   tokio::spawn(async move {
      let mut ticker = time::interval_at(time::Instant::now() + interval, interval);
      ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

      loop {
         tokio::select! {
            () = cancel.cancelled() => break,
            _ = ticker.tick() => {
               let expired = cache.sweep_expired();
               match cache.persist().await {
                  Ok(saved) => tracing::debug!(expired, saved, "cache maintenance pass"),
                  Err(e) => tracing::warn!(error = %e, "cache snapshot failed"),
               }
            }
         }
      }

      if let Err(e) = cache.persist().await {
         tracing::warn!(error = %e, "final cache snapshot failed");
      }
      tracing::debug!("cache maintenance stopped");
   })
}
