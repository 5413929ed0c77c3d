use std::time::Duration;

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::filters::Filter;
use crate::registry::RegistryCredentials;
use crate::runtime::ClientOptions;
use crate::types::{CpuCopyMode, UpdateParams, WarnOnHeadFailed};

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub interval_secs: u64,
    pub run_once: bool,
    pub names: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub label_enable: bool,
    pub monitor_only: bool,
    pub no_pull: bool,
    pub label_precedence: bool,
    pub cleanup: bool,
    pub include_stopped: bool,
    pub revive_stopped: bool,
    pub include_restarting: bool,
    pub remove_volumes: bool,
    pub disable_memory_swappiness: bool,
    pub rolling_restart: bool,
    pub lifecycle_hooks: bool,
    pub cpu_copy_mode: CpuCopyMode,
    pub warn_on_head_failure: WarnOnHeadFailed,
    pub stop_timeout_secs: u64,
    pub health_check_wait: bool,
    pub health_check_timeout_secs: u64,
    pub http_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_user: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repo_pass: Option<String>,
    pub self_update: bool,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_secs: 24 * 60 * 60,
            run_once: false,
            names: Vec::new(),
            scope: None,
            label_enable: false,
            monitor_only: false,
            no_pull: false,
            label_precedence: false,
            cleanup: false,
            include_stopped: false,
            revive_stopped: false,
            include_restarting: false,
            remove_volumes: false,
            disable_memory_swappiness: false,
            rolling_restart: false,
            lifecycle_hooks: false,
            cpu_copy_mode: CpuCopyMode::Auto,
            warn_on_head_failure: WarnOnHeadFailed::Auto,
            stop_timeout_secs: 10,
            health_check_wait: false,
            health_check_timeout_secs: 60,
            http_timeout_secs: 30,
            repo_user: None,
            repo_pass: None,
            self_update: false,
            log_level: "info".into(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        Self::from_figment(
            Figment::from(Serialized::defaults(Config::default()))
                .merge(Toml::file("watchtower.toml"))
                .merge(Json::file("watchtower.json"))
                .merge(Env::prefixed("WATCHTOWER_")),
        )
    }

    fn from_figment(figment: Figment) -> anyhow::Result<Self> {
        let mut config: Config = figment
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(pass_file) = std::env::var("WATCHTOWER_REPO_PASS_FILE") {
            config.repo_pass = Some(std::fs::read_to_string(pass_file)?.trim().to_string());
        }

        if config.interval_secs == 0 {
            anyhow::bail!("interval_secs must be greater than zero");
        }
        Ok(config)
    }

    pub fn update_params(&self) -> UpdateParams {
        UpdateParams {
            monitor_only: self.monitor_only,
            no_pull: self.no_pull,
            label_precedence: self.label_precedence,
            cleanup: self.cleanup,
            include_stopped: self.include_stopped,
            revive_stopped: self.revive_stopped,
            include_restarting: self.include_restarting,
            disable_memory_swappiness: self.disable_memory_swappiness,
            cpu_copy_mode: self.cpu_copy_mode,
            rolling_restart: self.rolling_restart,
            lifecycle_hooks: self.lifecycle_hooks,
            warn_on_head_failed: self.warn_on_head_failure,
            stop_timeout: Duration::from_secs(self.stop_timeout_secs),
            health_check_timeout: self
                .health_check_wait
                .then(|| Duration::from_secs(self.health_check_timeout_secs)),
            self_update: self.self_update,
        }
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            remove_volumes: self.remove_volumes,
            include_stopped: self.include_stopped,
            include_restarting: self.include_restarting,
            revive_stopped: self.revive_stopped,
            disable_memory_swappiness: self.disable_memory_swappiness,
            cpu_copy_mode: self.cpu_copy_mode,
        }
    }

    pub fn credentials(&self) -> Option<RegistryCredentials> {
        match (&self.repo_user, &self.repo_pass) {
            (Some(username), Some(password)) => Some(RegistryCredentials {
                username: username.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    /// Candidate filter for a sweep. The agent's own container is only
    /// kept when self-update is on.
    pub fn filter(&self, self_id: Option<&str>) -> Filter {
        let filter = Filter::all()
            .by_names(&self.names)
            .by_enable_label(!self.label_enable)
            .by_scope(self.scope.as_deref())
            .by_state(self.include_stopped, self.include_restarting);
        if self.self_update {
            filter
        } else {
            filter.exclude_self(self_id)
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout_secs)
    }
}
