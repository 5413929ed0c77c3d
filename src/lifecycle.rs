//! Lifecycle hooks: operator commands run inside a container around an
//! update.
//!
//! Exit code 0 is success, 75 (`EX_TEMPFAIL`) asks for the update to be
//! skipped this sweep, anything else is a failure.

use std::collections::BTreeMap;
use std::time::Duration;

use log::{debug, error, info};
use serde::Serialize;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

use crate::container::Container;
use crate::error::{Error, Result};
use crate::labels;
use crate::runtime::{ContainerRuntime, ExecRequest, POLL_INTERVAL};
use crate::types::LifecycleStage;

pub const EX_TEMPFAIL: i64 = 75;

/// Payload of the `WT_CONTAINER` variable hook scripts receive.
#[derive(Debug, Serialize)]
struct ContainerMetadata<'a> {
    name: &'a str,
    id: &'a str,
    image_name: String,
    stop_signal: String,
    labels: BTreeMap<String, String>,
}

pub fn container_metadata(container: &Container) -> String {
    let metadata = ContainerMetadata {
        name: container.name(),
        id: container.id(),
        image_name: container.image_name(),
        stop_signal: container.stop_signal(),
        labels: labels::watchtower_labels(container.labels()),
    };
    serde_json::to_string(&metadata).unwrap_or_default()
}

pub fn exec_user(uid: u32, gid: u32) -> Option<String> {
    match (uid > 0, gid > 0) {
        (true, true) => Some(format!("{}:{}", uid, gid)),
        (true, false) => Some(uid.to_string()),
        (false, true) => Some(format!(":{}", gid)),
        (false, false) => None,
    }
}

/// Runs `command` in `container` and waits for it.
///
/// Returns `Ok(true)` when the command asked for the update to be skipped.
/// A `timeout_minutes` of 0 waits indefinitely. Timeouts too large to
/// represent in seconds saturate.
#[allow(clippy::too_many_arguments)]
pub async fn execute_command(
    runtime: &dyn ContainerRuntime,
    container: &Container,
    stage: LifecycleStage,
    command: &str,
    timeout_minutes: u64,
    uid: u32,
    gid: u32,
    cancel: &CancellationToken,
) -> Result<bool> {
    let request = ExecRequest {
        cmd: vec!["sh".to_string(), "-c".to_string(), command.to_string()],
        env: vec![format!("WT_CONTAINER={}", container_metadata(container))],
        user: exec_user(uid, gid),
        tty: true,
    };
    debug!("Running {} command in {}: {}", stage, container.name(), command);
    let exec_id = runtime.start_exec(container.id(), &request).await?;

    let timeout = Duration::from_secs(timeout_minutes.saturating_mul(60));
    let started = Instant::now();
    let exit_code = loop {
        let status = runtime.inspect_exec(&exec_id).await?;
        if !status.running {
            break status.exit_code.unwrap_or(0);
        }
        if timeout_minutes > 0 && started.elapsed() >= timeout {
            return Err(Error::HookTimeout { stage, timeout });
        }
        tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Cancelled),
            _ = sleep(POLL_INTERVAL) => {}
        }
    };

    match exit_code {
        0 => Ok(false),
        EX_TEMPFAIL => Ok(true),
        code => Err(Error::HookFailed { stage, code }),
    }
}

/// Resolves hook commands from labels and runs them when hooks are enabled.
pub struct LifecycleRunner<'a> {
    runtime: &'a dyn ContainerRuntime,
    enabled: bool,
}

impl<'a> LifecycleRunner<'a> {
    pub fn new(runtime: &'a dyn ContainerRuntime, enabled: bool) -> Self {
        Self { runtime, enabled }
    }

    async fn run(
        &self,
        container: &Container,
        stage: LifecycleStage,
        cancel: &CancellationToken,
    ) -> Result<bool> {
        if !self.enabled {
            return Ok(false);
        }
        let Some(command) = labels::hook_command(container.labels(), stage) else {
            debug!("No {} command for {}", stage, container.name());
            return Ok(false);
        };
        let timeout = labels::hook_timeout_minutes(container.labels(), stage);
        let (uid, gid) = labels::hook_user(container.labels());
        info!("Executing {} command for {}", stage, container.name());
        execute_command(
            self.runtime,
            container,
            stage,
            &command,
            timeout,
            uid,
            gid,
            cancel,
        )
        .await
    }

    /// Runs a stage whose failure never blocks the update.
    async fn run_logged(
        &self,
        container: &Container,
        stage: LifecycleStage,
        cancel: &CancellationToken,
    ) {
        if let Err(e) = self.run(container, stage, cancel).await {
            error!("{} command for {} failed: {}", stage, container.name(), e);
        }
    }

    pub async fn pre_check(&self, container: &Container, cancel: &CancellationToken) {
        self.run_logged(container, LifecycleStage::PreCheck, cancel)
            .await
    }

    pub async fn post_check(&self, container: &Container, cancel: &CancellationToken) {
        self.run_logged(container, LifecycleStage::PostCheck, cancel)
            .await
    }

    /// `Ok(true)` means the hook asked to skip this container's update.
    pub async fn pre_update(&self, container: &Container, cancel: &CancellationToken) -> Result<bool> {
        if !container.is_running() {
            debug!(
                "{} is not running, skipping pre-update command",
                container.name()
            );
            return Ok(false);
        }
        self.run(container, LifecycleStage::PreUpdate, cancel).await
    }

    pub async fn post_update(&self, container: &Container, cancel: &CancellationToken) {
        self.run_logged(container, LifecycleStage::PostUpdate, cancel)
            .await
    }
}
