//! Finds the id of the container the agent itself runs in.
//!
//! Tried in order: `/proc/self/mountinfo`, `/proc/self/cgroup`, then a
//! hostname match against every container the runtime knows about.

use std::fs;
use std::path::Path;

use log::debug;

use crate::error::{Error, Result};
use crate::filters::Filter;
use crate::runtime::ContainerRuntime;

const CONTAINER_ID_LEN: usize = 64;

/// Raw inputs the detection methods read from the host.
#[derive(Debug, Clone, Default)]
pub struct SelfIdSources {
    pub mountinfo: Option<String>,
    pub cgroup: Option<String>,
    pub hostname: Option<String>,
}

impl SelfIdSources {
    pub fn from_host() -> Self {
        Self::from_paths(
            Path::new("/proc/self/mountinfo"),
            Path::new("/proc/self/cgroup"),
        )
    }

    pub fn from_paths(mountinfo: &Path, cgroup: &Path) -> Self {
        Self {
            mountinfo: fs::read_to_string(mountinfo).ok(),
            cgroup: fs::read_to_string(cgroup).ok(),
            hostname: std::env::var("HOSTNAME").ok().filter(|h| !h.is_empty()),
        }
    }
}

/// First maximal run of exactly 64 lowercase hex characters in `path`.
pub fn extract_container_id(path: &str) -> Option<&str> {
    let bytes = path.as_bytes();
    let mut start = 0;
    while start < bytes.len() {
        if !is_lower_hex(bytes[start]) {
            start += 1;
            continue;
        }
        let mut end = start;
        while end < bytes.len() && is_lower_hex(bytes[end]) {
            end += 1;
        }
        if end - start == CONTAINER_ID_LEN {
            return Some(&path[start..end]);
        }
        start = end;
    }
    None
}

fn is_lower_hex(b: u8) -> bool {
    b.is_ascii_digit() || (b'a'..=b'f').contains(&b)
}

pub fn id_from_mountinfo(content: &str) -> Option<String> {
    for line in content.lines() {
        for marker in ["/containers/", "/overlay-containers/"] {
            let Some(position) = line.find(marker) else {
                continue;
            };
            let segment = line[position + marker.len()..]
                .split('/')
                .next()
                .unwrap_or_default();
            if let Some(id) = extract_container_id(segment) {
                if id.len() == segment.len() {
                    return Some(id.to_string());
                }
            }
        }
    }
    None
}

pub fn id_from_cgroup(content: &str) -> Option<String> {
    const RUNTIME_MARKERS: [&str; 5] = ["/docker/", "docker-", "libpod-", "/libpod/", "containerd"];
    content
        .lines()
        .filter_map(|line| line.splitn(3, ':').nth(2))
        .filter(|path| RUNTIME_MARKERS.iter().any(|m| path.contains(m)))
        .find_map(extract_container_id)
        .map(str::to_string)
}

/// Resolves the agent's own container id.
pub async fn current_container_id(
    runtime: &dyn ContainerRuntime,
    sources: &SelfIdSources,
) -> Result<String> {
    if let Some(id) = sources.mountinfo.as_deref().and_then(id_from_mountinfo) {
        debug!("Found own container id {} in mountinfo", id);
        return Ok(id);
    }
    if let Some(id) = sources.cgroup.as_deref().and_then(id_from_cgroup) {
        debug!("Found own container id {} in cgroup", id);
        return Ok(id);
    }
    if let Some(hostname) = sources.hostname.as_deref() {
        let containers = runtime.list_containers(&Filter::all()).await?;
        if let Some(found) = containers
            .iter()
            .find(|c| c.hostname() == Some(hostname))
        {
            debug!("Matched own container {} by hostname", found.name());
            return Ok(found.id().to_string());
        }
    }
    Err(Error::SelfIdUndetectable)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    const ID: &str = "3f2a9c1b4d5e6f708192a3b4c5d6e7f8091a2b3c4d5e6f708192a3b4c5d6e7f8";

    #[test]
    fn extracts_only_exact_length_runs() {
        assert_eq!(extract_container_id(&format!("/docker/{}", ID)), Some(ID));
        assert_eq!(extract_container_id(&format!("/docker/{}0", ID)), None);
        assert_eq!(extract_container_id("/docker/abc123"), None);
        assert_eq!(
            extract_container_id(&format!("/docker/{}", ID.to_uppercase())),
            None
        );
    }

    #[test]
    fn mountinfo_docker_and_podman() {
        let docker = format!(
            "123 0 0:1 / / rw - overlay overlay rw\n\
             456 123 8:1 /var/lib/docker/containers/{}/hostname /etc/hostname rw - ext4 /dev/sda1 rw\n",
            ID
        );
        assert_eq!(id_from_mountinfo(&docker).as_deref(), Some(ID));

        let podman = format!(
            "456 123 0:2 /overlay-containers/{}/userdata/hosts /etc/hosts rw\n",
            ID
        );
        assert_eq!(id_from_mountinfo(&podman).as_deref(), Some(ID));

        assert_eq!(id_from_mountinfo("123 0 0:1 / / rw - ext4 /dev/sda rw\n"), None);
    }

    #[test]
    fn cgroup_v1_and_systemd_scopes() {
        let v1 = format!("12:memory:/docker/{}\n11:cpu:/docker/{}\n", ID, ID);
        assert_eq!(id_from_cgroup(&v1).as_deref(), Some(ID));

        let scope = format!("0::/system.slice/docker-{}.scope\n", ID);
        assert_eq!(id_from_cgroup(&scope).as_deref(), Some(ID));

        assert_eq!(id_from_cgroup("0::/\n"), None);
    }

    #[test]
    fn reads_sources_from_files() {
        let mut mountinfo = tempfile::NamedTempFile::new().unwrap();
        writeln!(
            mountinfo,
            "789 1 8:1 /var/lib/docker/containers/{}/resolv.conf /etc/resolv.conf rw",
            ID
        )
        .unwrap();
        let sources = SelfIdSources::from_paths(
            mountinfo.path(),
            Path::new("/nonexistent/cgroup"),
        );
        assert!(sources.cgroup.is_none());
        assert_eq!(
            sources.mountinfo.as_deref().and_then(id_from_mountinfo).as_deref(),
            Some(ID)
        );
    }
}
