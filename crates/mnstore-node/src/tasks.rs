//! Periodic background loops.

use std::future::Future;
use std::time::Duration;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::Result;

/// Run `step` every `interval` until `shutdown` fires. A failing step is
/// logged and the loop carries on.
pub fn spawn_periodic<F, Fut>(
    name: &'static str,
    interval: Duration,
    mut shutdown: broadcast::Receiver<()>,
    mut step: F,
) -> JoinHandle<()>
where
    F: FnMut() -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {}
                _ = shutdown.recv() => break,
            }
            if let Err(e) = step().await {
                warn!(task = name, error = %e, "background task step failed");
            }
        }
        debug!(task = name, "background task stopped");
    })
}
