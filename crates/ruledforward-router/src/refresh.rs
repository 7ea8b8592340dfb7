//! Cron-driven matcher refresh.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use ruledforward_rules::GeositeCatalog;

use crate::group::{Group, UpdateMask};

/// Spawn the refresh loop for one group: sleep until the schedule's next
/// fire time, rebuild from the remote source, repeat. Failures are logged
/// and the loop continues on schedule; shutdown wins the race against the
/// timer.
pub(crate) fn spawn_refresh(
    group: Arc<Group>,
    catalog: Option<Arc<GeositeCatalog>>,
    shutdown: CancellationToken,
) {
    let Some(schedule) = group.refresh.clone() else {
        return;
    };
    tokio::spawn(async move {
        info!(group = %group.name, "refresh loop started");
        loop {
            let Some(next) = schedule.upcoming(Utc).next() else {
                warn!(group = %group.name, "refresh schedule has no future fire times");
                return;
            };
            let wait = (next - Utc::now()).to_std().unwrap_or(Duration::ZERO);
            tokio::select! {
                _ = shutdown.cancelled() => {
                    debug!(group = %group.name, "refresh loop stopped");
                    return;
                }
                _ = tokio::time::sleep(wait) => {
                    if let Err(err) = group
                        .update(catalog.as_deref(), UpdateMask::ADGUARD_REMOTE)
                        .await
                    {
                        warn!(group = %group.name, error = %err, "refresh failed");
                    }
                }
            }
        }
    });
}
