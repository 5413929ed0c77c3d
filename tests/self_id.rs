mod common;

use common::FakeRuntime;
use watchtower::error::Error;
use watchtower::self_id::{current_container_id, SelfIdSources};

#[tokio::test]
async fn files_win_over_hostname() {
    let runtime = FakeRuntime::new();
    runtime.add_container("other", "repo/app:latest", &[]);
    let id = "9".repeat(64);
    let sources = SelfIdSources {
        mountinfo: None,
        cgroup: Some(format!("0::/system.slice/docker-{}.scope\n", id)),
        hostname: Some("unrelated".to_string()),
    };
    assert_eq!(current_container_id(&runtime, &sources).await.unwrap(), id);
}

#[tokio::test]
async fn hostname_matches_container_config() {
    let runtime = FakeRuntime::new();
    runtime.add_container("other", "repo/app:latest", &[]);
    let own = runtime.add_container("watchtower", "containrrr/watchtower:latest", &[]);
    let sources = SelfIdSources {
        mountinfo: Some("25 1 0:23 / / rw - overlay overlay rw\n".to_string()),
        cgroup: Some("0::/\n".to_string()),
        hostname: Some(own[..12].to_string()),
    };
    assert_eq!(current_container_id(&runtime, &sources).await.unwrap(), own);
}

#[tokio::test]
async fn nothing_matches() {
    let runtime = FakeRuntime::new();
    let sources = SelfIdSources {
        hostname: Some("nobody".to_string()),
        ..Default::default()
    };
    assert!(matches!(
        current_container_id(&runtime, &sources).await,
        Err(Error::SelfIdUndetectable)
    ));
}
