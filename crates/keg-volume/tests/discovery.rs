//! End-to-end discovery tests with engine and driver doubles.

use std::collections::HashMap;
use std::io::Write;
use std::path::PathBuf;

use async_trait::async_trait;
use keg_common::{KegError, KegResult};
use keg_volume::discovery::discover_and_sync;
use keg_volume::{
    AccessMode, ContainerEngine, ContainerMount, ContainerSummary, EngineInfo, PluginConfig,
    RefCountMap, VolumeDriver, VolumeStatus,
};
use parking_lot::Mutex;

/// Engine double backed by a fixed container/mount fixture.
#[derive(Default)]
struct FakeEngine {
    containers: Vec<ContainerSummary>,
    mounts: HashMap<String, Vec<ContainerMount>>,
    fail_inspect: Vec<String>,
    fail_list: bool,
}

impl FakeEngine {
    fn with_container(mut self, id: &str, mounts: Vec<ContainerMount>) -> Self {
        self.containers.push(ContainerSummary {
            id: id.to_string(),
            names: vec![format!("/{id}")],
            state: "running".to_string(),
        });
        self.mounts.insert(id.to_string(), mounts);
        self
    }
}

#[async_trait]
impl ContainerEngine for FakeEngine {
    async fn ping(&self) -> KegResult<EngineInfo> {
        Ok(EngineInfo::default())
    }

    async fn list_active_containers(&self) -> KegResult<Vec<ContainerSummary>> {
        if self.fail_list {
            return Err(KegError::Engine {
                message: "list failed".to_string(),
            });
        }
        Ok(self.containers.clone())
    }

    async fn inspect_container(&self, id: &str) -> KegResult<Vec<ContainerMount>> {
        if self.fail_inspect.iter().any(|f| f == id) {
            return Err(KegError::Engine {
                message: format!("inspect failed for {id}"),
            });
        }
        Ok(self.mounts.get(id).cloned().unwrap_or_default())
    }
}

/// Driver double recording corrective actions.
#[derive(Default)]
struct FakeDriver {
    mounts: Mutex<Vec<(String, bool)>>,
    unmounts: Mutex<Vec<String>>,
    statuses: Mutex<HashMap<String, VolumeStatus>>,
}

#[async_trait]
impl VolumeDriver for FakeDriver {
    async fn mount_volume(
        &self,
        name: &str,
        _fstype: &str,
        _disk_id: &str,
        read_only: bool,
        _skip_attach: bool,
    ) -> KegResult<PathBuf> {
        self.mounts.lock().push((name.to_string(), read_only));
        Ok(PathBuf::from("/mnt/keg").join(name))
    }

    async fn unmount_volume(&self, name: &str) -> KegResult<()> {
        self.unmounts.lock().push(name.to_string());
        Ok(())
    }

    async fn get_volume(&self, name: &str) -> KegResult<VolumeStatus> {
        self.statuses
            .lock()
            .get(name)
            .cloned()
            .ok_or_else(|| KegError::Driver {
                message: format!("unknown volume {name}"),
            })
    }
}

fn keg_mount(volume: &str) -> ContainerMount {
    ContainerMount {
        name: volume.to_string(),
        driver: "keg".to_string(),
        source: format!("/mnt/keg/{volume}"),
    }
}

/// Write a synthetic mount table and return a config pointing at it.
fn config_with_mounts(entries: &[(&str, &str)]) -> (PluginConfig, tempfile::NamedTempFile) {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "proc /proc proc rw,nosuid 0 0").unwrap();
    for (device, volume) in entries {
        writeln!(file, "{device} /mnt/keg/{volume} ext4 rw,relatime 0 0").unwrap();
    }
    let config = PluginConfig::default()
        .with_mount_root("/mnt/keg")
        .with_mounts_file(file.path().to_path_buf());
    (config, file)
}

#[test_log::test(tokio::test)]
async fn shared_volume_counts_every_consumer() {
    let engine = FakeEngine::default()
        .with_container("web", vec![keg_mount("shared")])
        .with_container("worker", vec![keg_mount("shared")]);
    let driver = FakeDriver::default();
    let (config, _guard) = config_with_mounts(&[("/dev/sdb1", "shared")]);

    let store = RefCountMap::new();
    discover_and_sync(&store, &engine, &driver, &config)
        .await
        .unwrap();

    assert_eq!(store.get_count("shared"), 2);
    assert!(driver.mounts.lock().is_empty());
    assert!(driver.unmounts.lock().is_empty());
}

#[test_log::test(tokio::test)]
async fn foreign_driver_mounts_are_ignored() {
    let engine = FakeEngine::default().with_container(
        "web",
        vec![
            keg_mount("ours"),
            ContainerMount {
                name: "theirs".to_string(),
                driver: "local".to_string(),
                source: "/var/lib/docker/volumes/theirs".to_string(),
            },
        ],
    );
    let driver = FakeDriver::default();
    let (config, _guard) = config_with_mounts(&[("/dev/sdb1", "ours")]);

    let store = RefCountMap::new();
    discover_and_sync(&store, &engine, &driver, &config)
        .await
        .unwrap();

    assert_eq!(store.get_count("ours"), 1);
    assert_eq!(store.get_count("theirs"), 0);
}

#[test_log::test(tokio::test)]
async fn failed_inspect_skips_only_that_container() {
    let mut engine = FakeEngine::default()
        .with_container("healthy", vec![keg_mount("vol1")])
        .with_container("broken", vec![keg_mount("vol2")]);
    engine.fail_inspect.push("broken".to_string());
    let driver = FakeDriver::default();
    let (config, _guard) = config_with_mounts(&[("/dev/sdb1", "vol1")]);

    let store = RefCountMap::new();
    discover_and_sync(&store, &engine, &driver, &config)
        .await
        .unwrap();

    assert_eq!(store.get_count("vol1"), 1);
    assert_eq!(store.get_count("vol2"), 0);
}

#[test_log::test(tokio::test)]
async fn failed_container_list_aborts_discovery() {
    let engine = FakeEngine {
        fail_list: true,
        ..FakeEngine::default()
    };
    let driver = FakeDriver::default();
    let (config, _guard) = config_with_mounts(&[]);

    let store = RefCountMap::new();
    store.increment("stale");
    let err = discover_and_sync(&store, &engine, &driver, &config)
        .await
        .unwrap_err();
    assert!(matches!(err, KegError::Engine { .. }));
    // The purge already ran; the store starts over from live traffic.
    assert!(store.is_empty());
}

#[test_log::test(tokio::test)]
async fn stale_mount_is_unmounted_during_discovery() {
    // The mount table knows `stale`, the engine does not.
    let engine = FakeEngine::default().with_container("web", vec![keg_mount("active")]);
    let driver = FakeDriver::default();
    let (config, _guard) = config_with_mounts(&[("/dev/sdb1", "active"), ("/dev/sdc1", "stale")]);

    let store = RefCountMap::new();
    discover_and_sync(&store, &engine, &driver, &config)
        .await
        .unwrap();

    assert_eq!(*driver.unmounts.lock(), vec!["stale".to_string()]);
    assert!(driver.mounts.lock().is_empty());
}

#[test_log::test(tokio::test)]
async fn unmounted_volume_in_use_is_remounted() {
    // The engine reports a consumer, the mount table has no entry.
    let engine = FakeEngine::default().with_container("web", vec![keg_mount("vol2")]);
    let driver = FakeDriver::default();
    driver.statuses.lock().insert(
        "vol2".to_string(),
        VolumeStatus {
            fstype: "ext4".to_string(),
            access: AccessMode::ReadWrite,
            disk_id: None,
        },
    );
    let (config, _guard) = config_with_mounts(&[]);

    let store = RefCountMap::new();
    discover_and_sync(&store, &engine, &driver, &config)
        .await
        .unwrap();

    assert_eq!(*driver.mounts.lock(), vec![("vol2".to_string(), false)]);
    assert!(driver.unmounts.lock().is_empty());
}

#[test_log::test(tokio::test)]
async fn discovery_replaces_prior_state() {
    let engine = FakeEngine::default().with_container("web", vec![keg_mount("fresh")]);
    let driver = FakeDriver::default();
    driver.statuses.lock().insert(
        "fresh".to_string(),
        VolumeStatus {
            fstype: "ext4".to_string(),
            access: AccessMode::ReadWrite,
            disk_id: None,
        },
    );
    let (config, _guard) = config_with_mounts(&[]);

    let store = RefCountMap::new();
    store.increment("forgotten");
    store.increment("forgotten");
    discover_and_sync(&store, &engine, &driver, &config)
        .await
        .unwrap();

    assert_eq!(store.get_count("forgotten"), 0);
    assert_eq!(store.get_count("fresh"), 1);
}

#[test_log::test(tokio::test)]
async fn unreadable_mount_table_still_reconciles_counts() {
    let engine = FakeEngine::default().with_container("web", vec![keg_mount("vol1")]);
    let driver = FakeDriver::default();
    driver.statuses.lock().insert(
        "vol1".to_string(),
        VolumeStatus {
            fstype: "ext4".to_string(),
            access: AccessMode::ReadWrite,
            disk_id: None,
        },
    );
    let config = PluginConfig::default()
        .with_mount_root("/mnt/keg")
        .with_mounts_file("/nonexistent/mounts");

    let store = RefCountMap::new();
    discover_and_sync(&store, &engine, &driver, &config)
        .await
        .unwrap();

    // Without mount annotations the volume looks unmounted-but-used and a
    // recovery mount is attempted.
    assert_eq!(store.get_count("vol1"), 1);
    assert_eq!(*driver.mounts.lock(), vec![("vol1".to_string(), false)]);
}
