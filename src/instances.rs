//! Removal of agent instances left over from an earlier deployment or a
//! self-update.

use std::time::Duration;

use log::{debug, error, info};
use tokio_util::sync::CancellationToken;

use crate::error::Result;
use crate::filters::Filter;
use crate::runtime::ContainerRuntime;

/// Stops and removes every other agent container in `scope`.
///
/// Returns how many were removed. Individual failures are logged and
/// skipped; only listing errors are returned.
pub async fn cleanup_excess_instances(
    runtime: &dyn ContainerRuntime,
    self_id: &str,
    scope: Option<&str>,
    cleanup: bool,
    stop_timeout: Duration,
    cancel: &CancellationToken,
) -> Result<usize> {
    let filter = Filter::all()
        .and("watchtower", |c| c.is_watchtower())
        .by_scope(scope);
    let instances = runtime.list_containers(&filter).await?;
    let own_image = instances
        .iter()
        .find(|c| c.id() == self_id)
        .map(|c| c.image_id().to_string());

    let mut removed = 0;
    for instance in instances.iter().filter(|c| c.id() != self_id) {
        info!(
            "Stopping excess agent instance {} ({})",
            instance.name(),
            instance.short_id()
        );
        if let Err(e) = runtime.stop_container(instance, stop_timeout, cancel).await {
            error!("Unable to stop {}: {}", instance.name(), e);
            continue;
        }
        removed += 1;

        if !cleanup || own_image.as_deref() == Some(instance.image_id()) {
            continue;
        }
        match runtime
            .remove_image_by_id(instance.image_id(), &instance.image_name())
            .await
        {
            Ok(()) => {}
            Err(e) if e.is_not_found() || e.has_dependent_children() => {
                debug!("Did not remove image of {}: {}", instance.name(), e);
            }
            Err(e) => error!("Unable to remove image of {}: {}", instance.name(), e),
        }
    }
    Ok(removed)
}
