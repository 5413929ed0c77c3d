//! Image references, registry credentials and the manifest-digest capability.

use std::fmt;

use async_trait::async_trait;
use bollard::auth::DockerCredentials;

use crate::error::Result;

pub mod digest;

pub use digest::RegistryClient;

pub const DOCKER_HUB_HOST: &str = "index.docker.io";

/// A reference split into the parts the distribution API addresses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub host: String,
    pub path: String,
    /// Tag or `sha256:` digest.
    pub reference: String,
}

impl ImageReference {
    pub fn parse(image: &str) -> Self {
        let (name, reference) = match image.split_once('@') {
            Some((name, digest)) => (strip_tag(name).0, digest.to_string()),
            None => {
                let (name, tag) = strip_tag(image);
                (name, tag.unwrap_or("latest").to_string())
            }
        };

        let (host, path) = match name.split_once('/') {
            Some((first, rest))
                if first.contains('.') || first.contains(':') || first == "localhost" =>
            {
                (first, rest.to_string())
            }
            _ => ("docker.io", name.to_string()),
        };

        let host = match host {
            "docker.io" | "index.docker.io" | "registry-1.docker.io" => DOCKER_HUB_HOST,
            other => other,
        };
        let path = if host == DOCKER_HUB_HOST && !path.contains('/') {
            format!("library/{}", path)
        } else {
            path
        };

        Self {
            host: host.to_string(),
            path,
            reference,
        }
    }

    pub fn is_docker_hub(&self) -> bool {
        self.host == DOCKER_HUB_HOST
    }

    /// Registries whose manifest requests count against a pull quota.
    pub fn is_rate_limited(&self) -> bool {
        self.is_docker_hub() || self.host == "ghcr.io"
    }
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let separator = if self.reference.starts_with("sha256:") {
            '@'
        } else {
            ':'
        };
        write!(f, "{}/{}{}{}", self.host, self.path, separator, self.reference)
    }
}

/// Splits `name[:tag]`, ignoring a `host:port` prefix.
fn strip_tag(image: &str) -> (&str, Option<&str>) {
    let last_slash = image.rfind('/');
    match image.rfind(':') {
        Some(colon) if last_slash.map_or(true, |slash| colon > slash) => {
            (&image[..colon], Some(&image[colon + 1..]))
        }
        _ => (image, None),
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RegistryCredentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for RegistryCredentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RegistryCredentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

impl RegistryCredentials {
    pub fn to_docker_credentials(&self, server: &str) -> DockerCredentials {
        DockerCredentials {
            username: Some(self.username.clone()),
            password: Some(self.password.clone()),
            serveraddress: Some(server.to_string()),
            ..Default::default()
        }
    }
}

/// Supplies pull credentials for an image reference.
pub trait CredentialSource: Send + Sync {
    fn credentials_for(&self, image: &ImageReference) -> Option<RegistryCredentials>;
}

/// The same credentials (or none) for every registry.
#[derive(Debug, Clone, Default)]
pub struct StaticCredentials(pub Option<RegistryCredentials>);

impl CredentialSource for StaticCredentials {
    fn credentials_for(&self, _image: &ImageReference) -> Option<RegistryCredentials> {
        self.0.clone()
    }
}

/// Resolves the digest a registry currently serves for a reference.
#[async_trait]
pub trait ManifestDigest: Send + Sync {
    async fn remote_digest(
        &self,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String>;
}
