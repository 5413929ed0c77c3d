//! Decides whether a container's image has a newer version available.

use log::{debug, info, warn};

use crate::container::Container;
use crate::error::{Error, Result};
use crate::registry::{CredentialSource, ImageReference, ManifestDigest};
use crate::runtime::ContainerRuntime;
use crate::types::{UpdateParams, WarnOnHeadFailed};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Staleness {
    pub stale: bool,
    pub latest_image_id: String,
}

pub struct StalenessOracle<'a> {
    runtime: &'a dyn ContainerRuntime,
    registry: &'a dyn ManifestDigest,
    credentials: &'a dyn CredentialSource,
}

impl<'a> StalenessOracle<'a> {
    pub fn new(
        runtime: &'a dyn ContainerRuntime,
        registry: &'a dyn ManifestDigest,
        credentials: &'a dyn CredentialSource,
    ) -> Self {
        Self {
            runtime,
            registry,
            credentials,
        }
    }

    /// Pinned (`sha256:`) images yield [`Error::PinnedImage`] and never
    /// reach the registry.
    pub async fn check(&self, container: &Container, params: &UpdateParams) -> Result<Staleness> {
        let image_name = container.image_name();
        let current = container.image_id().to_string();

        if image_name.starts_with("sha256:") {
            return Err(Error::PinnedImage(image_name));
        }

        if container.is_no_pull(params) {
            debug!(
                "Not pulling {} for {}, comparing local image only",
                image_name,
                container.name()
            );
            let local = self.runtime.image_id(&image_name).await?;
            return Ok(Staleness {
                stale: local != current,
                latest_image_id: local,
            });
        }

        let reference = ImageReference::parse(&image_name);
        let credentials = self.credentials.credentials_for(&reference);

        match self
            .registry
            .remote_digest(&reference, credentials.as_ref())
            .await
        {
            Ok(remote) => {
                if container.image_digests().iter().any(|d| *d == remote) {
                    debug!("{} is up to date ({})", container.name(), remote);
                    return Ok(Staleness {
                        stale: false,
                        latest_image_id: current,
                    });
                }
                debug!(
                    "Digest of {} changed to {}, pulling",
                    image_name, remote
                );
            }
            Err(e) => {
                let message = format!(
                    "Could not do a head request for {}, falling back to regular pull: {}",
                    image_name, e
                );
                if should_warn(params.warn_on_head_failed, &reference) {
                    warn!("{}", message);
                } else {
                    debug!("{}", message);
                }
            }
        }

        info!("Pulling {} for {}", image_name, container.name());
        self.runtime
            .pull_image(&image_name, credentials.as_ref())
            .await?;
        let latest = self.runtime.image_id(&image_name).await?;
        let stale = latest != current;
        if stale {
            info!("Found new {} image ({})", image_name, short(&latest));
        } else {
            debug!("No new image for {}", container.name());
        }
        Ok(Staleness {
            stale,
            latest_image_id: latest,
        })
    }
}

fn should_warn(strategy: WarnOnHeadFailed, reference: &ImageReference) -> bool {
    match strategy {
        WarnOnHeadFailed::Always => true,
        WarnOnHeadFailed::Never => false,
        WarnOnHeadFailed::Auto => reference.is_rate_limited(),
    }
}

fn short(image_id: &str) -> &str {
    let id = image_id.trim_start_matches("sha256:");
    &id[..id.len().min(12)]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn head_failure_warning_policy() {
        let hub = ImageReference::parse("nginx");
        let private = ImageReference::parse("registry.internal:5000/app");
        assert!(should_warn(WarnOnHeadFailed::Auto, &hub));
        assert!(!should_warn(WarnOnHeadFailed::Auto, &private));
        assert!(should_warn(WarnOnHeadFailed::Always, &private));
        assert!(!should_warn(WarnOnHeadFailed::Never, &hub));
    }

    #[test]
    fn short_ids() {
        assert_eq!(short("sha256:0123456789abcdef"), "0123456789ab");
        assert_eq!(short("abc"), "abc");
    }
}
