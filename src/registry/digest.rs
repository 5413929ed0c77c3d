//! Manifest digest lookups against an OCI distribution registry.
//!
//! Only `HEAD /v2/<name>/manifests/<ref>` is issued for the digest itself;
//! manifests are not downloaded.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use log::debug;
use reqwest::header::{ACCEPT, WWW_AUTHENTICATE};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::Deserialize;

use super::{ImageReference, ManifestDigest, RegistryCredentials};
use crate::error::{Error, Result};

const MANIFEST_TYPES: [&str; 4] = [
    "application/vnd.docker.distribution.manifest.v2+json",
    "application/vnd.docker.distribution.manifest.list.v2+json",
    "application/vnd.oci.image.manifest.v1+json",
    "application/vnd.oci.image.index.v1+json",
];

const DIGEST_HEADER: &str = "docker-content-digest";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    pub scheme: String,
    pub params: HashMap<String, String>,
}

/// Parses a `WWW-Authenticate` header such as
/// `Bearer realm="https://auth.docker.io/token",service="registry.docker.io"`.
pub fn parse_challenge(header: &str) -> Option<Challenge> {
    let header = header.trim();
    let (scheme, rest) = match header.split_once(' ') {
        Some((scheme, rest)) => (scheme, rest),
        None => (header, ""),
    };
    if scheme.is_empty() {
        return None;
    }
    let mut params = HashMap::new();
    for part in rest.split(',') {
        if let Some((key, value)) = part.split_once('=') {
            params.insert(
                key.trim().to_ascii_lowercase(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }
    Some(Challenge {
        scheme: scheme.to_ascii_lowercase(),
        params,
    })
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    #[serde(default)]
    token: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
}

enum Authorization {
    Anonymous,
    Bearer(String),
    Basic(RegistryCredentials),
}

impl Authorization {
    fn apply(&self, request: RequestBuilder) -> RequestBuilder {
        match self {
            Authorization::Anonymous => request,
            Authorization::Bearer(token) => request.bearer_auth(token),
            Authorization::Basic(c) => request.basic_auth(&c.username, Some(&c.password)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct RegistryClient {
    http: Client,
    mirrors: Vec<String>,
}

impl RegistryClient {
    pub fn new(timeout: Duration, mirrors: Vec<String>) -> Result<Self> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self { http, mirrors })
    }

    /// Base URLs to try, mirrors first for Docker Hub references.
    fn endpoints(&self, image: &ImageReference) -> Vec<String> {
        let mut endpoints = Vec::new();
        if image.is_docker_hub() {
            endpoints.extend(
                self.mirrors
                    .iter()
                    .map(|m| m.trim_end_matches('/').to_string()),
            );
        }
        endpoints.push(format!("https://{}", image.host));
        endpoints
    }

    async fn authorize(
        &self,
        base: &str,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<Authorization> {
        let response = self.http.get(format!("{}/v2/", base)).send().await?;
        if response.status().is_success() {
            return Ok(Authorization::Anonymous);
        }
        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|v| v.to_str().ok())
            .and_then(parse_challenge);
        let Some(challenge) = challenge else {
            return Err(Error::Registry(format!(
                "{} answered {} without an auth challenge",
                base,
                response.status()
            )));
        };

        match challenge.scheme.as_str() {
            "basic" => match credentials {
                Some(c) => Ok(Authorization::Basic(c.clone())),
                None => Err(Error::Unauthorized(image.to_string())),
            },
            "bearer" => {
                let realm = challenge.params.get("realm").ok_or_else(|| {
                    Error::Registry(format!("{} sent a bearer challenge without realm", base))
                })?;
                let scope = format!("repository:{}:pull", image.path);
                let mut request = self.http.get(realm.as_str()).query(&[("scope", scope.as_str())]);
                if let Some(service) = challenge.params.get("service") {
                    request = request.query(&[("service", service.as_str())]);
                }
                if let Some(c) = credentials {
                    request = request.basic_auth(&c.username, Some(&c.password));
                }
                let response = request.send().await?;
                match response.status() {
                    StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                        return Err(Error::Unauthorized(image.to_string()))
                    }
                    status if !status.is_success() => {
                        return Err(Error::Registry(format!(
                            "token request for {} failed with {}",
                            image, status
                        )))
                    }
                    _ => {}
                }
                let body: TokenResponse = response.json().await?;
                body.token
                    .or(body.access_token)
                    .map(Authorization::Bearer)
                    .ok_or_else(|| Error::Registry(format!("empty token for {}", image)))
            }
            other => Err(Error::Registry(format!(
                "unsupported auth scheme {:?} from {}",
                other, base
            ))),
        }
    }

    async fn head_manifest(
        &self,
        base: &str,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let auth = self.authorize(base, image, credentials).await?;
        let url = format!("{}/v2/{}/manifests/{}", base, image.path, image.reference);
        let request = self.http.head(&url).header(ACCEPT, MANIFEST_TYPES.join(", "));
        let response = auth.apply(request).send().await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(Error::Unauthorized(image.to_string()))
            }
            status if !status.is_success() => Err(Error::Registry(format!(
                "HEAD {} returned {}",
                url, status
            ))),
            _ => response
                .headers()
                .get(DIGEST_HEADER)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
                .ok_or_else(|| Error::Registry(format!("HEAD {} returned no digest", url))),
        }
    }
}

#[async_trait]
impl ManifestDigest for RegistryClient {
    async fn remote_digest(
        &self,
        image: &ImageReference,
        credentials: Option<&RegistryCredentials>,
    ) -> Result<String> {
        let mut last_error = None;
        for base in self.endpoints(image) {
            match self.head_manifest(&base, image, credentials).await {
                Ok(digest) => {
                    debug!("{} resolved to {} via {}", image, digest, base);
                    return Ok(digest);
                }
                Err(e) => {
                    debug!("Digest lookup for {} via {} failed: {}", image, base, e);
                    last_error = Some(e);
                }
            }
        }
        Err(last_error.unwrap_or_else(|| Error::Registry(format!("no endpoint for {}", image))))
    }
}
