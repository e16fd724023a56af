//! Per-job interruption monitor.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::store::{WorkItemRef, WorkItemStore};

/// Watch a claimed item while its command runs.
///
/// Someone moving the item out of the running state on the board is the
/// interruption signal: the token is cancelled and the executing command
/// gets terminated. The token is the only channel back to the main loop.
/// Read errors are skipped; the next tick re-checks.
pub fn watch(
    store: Arc<dyn WorkItemStore>,
    reference: WorkItemRef,
    running_state: String,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => return,
                _ = tokio::time::sleep(interval) => {}
            }
            match store.get_details(&reference).await {
                Ok(item) if item.state_id != running_state => {
                    tracing::warn!(
                        item = %reference,
                        state = %item.state_id,
                        "item moved out of running, interrupting"
                    );
                    cancel.cancel();
                    return;
                }
                Ok(_) => {}
                Err(err) => {
                    tracing::debug!(item = %reference, error = %err, "monitor read failed");
                }
            }
        }
    })
}
