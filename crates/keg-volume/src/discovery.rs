//! Startup discovery of volume usage.
//!
//! Runs once, strictly before the plugin accepts mount/unmount requests:
//! live increment/decrement traffic racing the purge-and-rebuild below would
//! corrupt the reconciler's view of truth.

use keg_common::{KegError, KegResult};

use crate::config::{DISCOVER_VOLUMES_ENV, PluginConfig};
use crate::driver::VolumeDriver;
use crate::engine::{ContainerEngine, DockerEngine};
use crate::mounts::scan_mount_table;
use crate::reconcile::reconcile;
use crate::refcount::RefCountMap;

/// Rebuild refcounts from the container engine and reconcile them against
/// the OS mount table.
///
/// Skips silently (store left empty, to be populated by live traffic) when
/// discovery is not opted in or the engine is unreachable; an unreachable
/// engine means no container holds a volume right now.
///
/// # Errors
///
/// Returns an error when the engine client cannot be constructed (a
/// misconfiguration the operator must fix) or when reconciliation finds a
/// corrupt store record. Every other discovery failure is logged and the
/// plugin starts with whatever state was rebuilt before it.
pub async fn init(
    store: &RefCountMap,
    driver: &dyn VolumeDriver,
    config: &PluginConfig,
) -> KegResult<()> {
    if !config.discover {
        tracing::debug!(
            "Skipping volume discovery - {} not set",
            DISCOVER_VOLUMES_ENV
        );
        return Ok(());
    }

    let engine = DockerEngine::new(&config.engine_socket)?;

    tracing::info!(socket = %config.engine_socket.display(), "Getting volume data from engine");
    match engine.ping().await {
        Ok(info) => {
            tracing::debug!(
                version = %info.server_version,
                root = %info.root_dir,
                os = %info.operating_system,
                "Engine info"
            );
        }
        Err(err) => {
            tracing::info!(
                socket = %config.engine_socket.display(),
                %err,
                "Engine not reachable, skipping discovery"
            );
            // An engine that is down holds no volumes. Proactively detaching
            // everything in this case is deferred.
            return Ok(());
        }
    }

    match discover_and_sync(store, &engine, driver, config).await {
        Ok(()) => {}
        Err(err @ KegError::InvariantViolation { .. }) => return Err(err),
        Err(err) => {
            tracing::error!(%err, "Failed to discover mount refcounts");
            return Ok(());
        }
    }

    tracing::info!(count = store.len(), "Discovered volumes in use");
    for (volume, rec) in store.snapshot() {
        tracing::info!(
            volume,
            count = rec.count,
            mounted = rec.mounted,
            device = %rec.device,
            "Discovered volume"
        );
    }
    Ok(())
}

/// Purge the store, rebuild counts from the engine's active containers,
/// annotate with the mount table and reconcile.
///
/// # Errors
///
/// Returns an error when the container list cannot be fetched or when
/// reconciliation fails. A failed inspection of an individual container is
/// logged and that container is skipped.
pub async fn discover_and_sync(
    store: &RefCountMap,
    engine: &dyn ContainerEngine,
    driver: &dyn VolumeDriver,
    config: &PluginConfig,
) -> KegResult<()> {
    // No prior in-memory state is trustworthy after a restart.
    store.purge();

    let containers = engine.list_active_containers().await?;
    tracing::debug!(count = containers.len(), "Found running or paused containers");

    for container in &containers {
        let mounts = match engine.inspect_container(&container.id).await {
            Ok(mounts) => mounts,
            Err(err) => {
                tracing::error!(
                    container = %container.id,
                    names = ?container.names,
                    %err,
                    "Container inspect failed, skipping"
                );
                continue;
            }
        };
        for mount in mounts {
            if mount.driver == config.driver_name {
                let count = store.increment(&mount.name);
                tracing::debug!(
                    volume = %mount.name,
                    driver = %mount.driver,
                    source = %mount.source,
                    count,
                    "Counted volume mount"
                );
            }
        }
    }

    // Compare against what the OS actually has mounted under the plugin
    // root. A partial or failed scan still leaves usable refcounts.
    if scan_mount_table(store, config).is_err() {
        tracing::warn!("Proceeding with partial mount state");
    }

    reconcile(store, driver, config).await
}
