//! Data structures shared by the orchestrator and its collaborators.
//!
//! `UpdateParams` carries the per-sweep decision inputs, `LifecycleStage`
//! names the four hook points, and `SweepReport` is what one sweep hands
//! back to its caller for logging.

use std::fmt;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How CPU limits are carried over to a recreated container.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CpuCopyMode {
    /// Full on Docker; drop `NanoCPUs` on Podman.
    #[default]
    Auto,
    Full,
    None,
}

/// Log level policy for a failed registry HEAD request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WarnOnHeadFailed {
    Always,
    Never,
    /// Warn only for registries known to rate-limit manifest pulls.
    #[default]
    Auto,
}

#[derive(Debug, Clone)]
pub struct UpdateParams {
    pub monitor_only: bool,
    pub no_pull: bool,
    pub label_precedence: bool,
    pub cleanup: bool,
    pub include_stopped: bool,
    pub revive_stopped: bool,
    pub include_restarting: bool,
    pub disable_memory_swappiness: bool,
    pub cpu_copy_mode: CpuCopyMode,
    pub rolling_restart: bool,
    pub lifecycle_hooks: bool,
    pub warn_on_head_failed: WarnOnHeadFailed,
    pub stop_timeout: Duration,
    /// `Some(deadline)` when recreated containers must be waited on until healthy.
    pub health_check_timeout: Option<Duration>,
    pub self_update: bool,
}

impl Default for UpdateParams {
    fn default() -> Self {
        Self {
            monitor_only: false,
            no_pull: false,
            label_precedence: false,
            cleanup: false,
            include_stopped: false,
            revive_stopped: false,
            include_restarting: false,
            disable_memory_swappiness: false,
            cpu_copy_mode: CpuCopyMode::Auto,
            rolling_restart: false,
            lifecycle_hooks: false,
            warn_on_head_failed: WarnOnHeadFailed::Auto,
            stop_timeout: Duration::from_secs(10),
            health_check_timeout: None,
            self_update: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LifecycleStage {
    PreCheck,
    PostCheck,
    PreUpdate,
    PostUpdate,
}

impl fmt::Display for LifecycleStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            LifecycleStage::PreCheck => "pre-check",
            LifecycleStage::PostCheck => "post-check",
            LifecycleStage::PreUpdate => "pre-update",
            LifecycleStage::PostUpdate => "post-update",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContainerState {
    Running,
    Restarting,
    Paused,
    Exited,
    Created,
    Removing,
    Dead,
}

/// Outcome for one container in a sweep.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Checked and already on the newest image.
    Fresh,
    Updated,
    /// Stale but deliberately left alone (monitor-only, hook skip, pinned image).
    Skipped,
    Failed,
}

#[derive(Debug, Clone)]
pub struct ContainerReport {
    pub id: String,
    pub name: String,
    pub image_name: String,
    pub old_image_id: String,
    pub new_image_id: Option<String>,
    pub outcome: Outcome,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Default)]
pub struct SweepReport {
    pub containers: Vec<ContainerReport>,
}

impl SweepReport {
    pub fn count(&self, outcome: Outcome) -> usize {
        self.containers
            .iter()
            .filter(|c| c.outcome == outcome)
            .count()
    }

    pub fn get(&self, name: &str) -> Option<&ContainerReport> {
        self.containers.iter().find(|c| c.name == name)
    }

    /// Records or replaces the entry for a container.
    pub(crate) fn set(&mut self, report: ContainerReport) {
        match self.containers.iter_mut().find(|c| c.id == report.id) {
            Some(existing) => *existing = report,
            None => self.containers.push(report),
        }
    }
}

impl fmt::Display for SweepReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "scanned={} updated={} failed={} skipped={} fresh={}",
            self.containers.len(),
            self.count(Outcome::Updated),
            self.count(Outcome::Failed),
            self.count(Outcome::Skipped),
            self.count(Outcome::Fresh),
        )
    }
}
