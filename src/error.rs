//! Error kinds surfaced by the runtime gateway, the registry client and the
//! update orchestrator.

use std::time::Duration;

use thiserror::Error;

use crate::types::LifecycleStage;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    /// The container or image vanished between observation and action.
    #[error("{0} not found")]
    NotFound(String),

    #[error("registry refused credentials for {0}")]
    Unauthorized(String),

    #[error("image {0} is pinned by digest and is never pulled")]
    PinnedImage(String),

    /// The runtime answered with a non-success status.
    #[error("runtime returned {status}: {message}")]
    Api { status: u16, message: String },

    /// Connection, timeout or stream failure talking to the runtime.
    #[error("runtime request failed: {0}")]
    Transport(String),

    #[error("registry request failed: {0}")]
    Registry(String),

    #[error("{stage} command exited with code {code}")]
    HookFailed { stage: LifecycleStage, code: i64 },

    #[error("{stage} command did not finish within {timeout:?}")]
    HookTimeout {
        stage: LifecycleStage,
        timeout: Duration,
    },

    #[error("container {0} did not become healthy within {1:?}")]
    HealthTimeout(String, Duration),

    #[error("container {0} is unhealthy")]
    Unhealthy(String),

    #[error("invalid container configuration: {0}")]
    InvalidConfiguration(String),

    #[error("current container id undetectable")]
    SelfIdUndetectable,

    #[error("operation cancelled")]
    Cancelled,
}

impl Error {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }

    /// Image removal refused because other images are built on top of it.
    pub fn has_dependent_children(&self) -> bool {
        match self {
            Error::Api { status, message } => {
                *status == 409 && message.contains("dependent child images")
            }
            _ => false,
        }
    }

    /// The runtime refused the request because of the object's current state.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Error::Api { status: 409, .. })
    }
}

impl From<bollard::errors::Error> for Error {
    fn from(e: bollard::errors::Error) -> Self {
        match e {
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } if status_code == 404 => Error::NotFound(message),
            bollard::errors::Error::DockerResponseServerError {
                status_code,
                message,
            } => Error::Api {
                status: status_code,
                message,
            },
            other => Error::Transport(other.to_string()),
        }
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::Registry(e.to_string())
    }
}
