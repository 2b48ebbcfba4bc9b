//! Reconciliation of tracked usage against actual mount state.
//!
//! After discovery has rebuilt refcounts and the mount-table scan has
//! annotated them, every record falls into one of four cases. Two are
//! mismatches a crash leaves behind and get a corrective driver call; one is
//! consistent; one cannot legally exist and means the store is corrupted.

use keg_common::{KegError, KegResult};

use crate::config::PluginConfig;
use crate::driver::{AccessMode, VolumeDriver};
use crate::refcount::{RefCountMap, UsageRecord};

/// What a record's `(mounted, count)` pair says about the volume.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Diagnosis {
    /// Mounted with active consumers. Nothing to do.
    Consistent,
    /// Mounted but no consumer: a mount that survived an engine crash.
    StaleMount,
    /// Active consumers but no OS mount. Should not happen while the engine
    /// holds a bind mount, but a manual unmount can get a host here.
    MissingMount,
    /// Zero count and not mounted. Such entries must not exist in the map.
    InvariantViolation,
}

/// Classify a record. Pure detection; the caller owns the halt policy for
/// [`Diagnosis::InvariantViolation`].
#[must_use]
pub const fn diagnose(record: &UsageRecord) -> Diagnosis {
    match (record.mounted, record.count) {
        (true, 0) => Diagnosis::StaleMount,
        (true, _) => Diagnosis::Consistent,
        (false, 0) => Diagnosis::InvariantViolation,
        (false, _) => Diagnosis::MissingMount,
    }
}

/// Walk every tracked volume and issue corrective driver actions.
///
/// Per-volume corrective failures are logged and left for manual recovery;
/// they do not stop the walk. Iteration order is unspecified and actions are
/// independent per volume.
///
/// # Errors
///
/// Returns [`KegError::InvariantViolation`] as soon as a record that cannot
/// legally exist is found. The store is corrupted at that point and further
/// corrective actions would act on garbage.
pub async fn reconcile(
    store: &RefCountMap,
    driver: &dyn VolumeDriver,
    config: &PluginConfig,
) -> KegResult<()> {
    for (volume, record) in store.snapshot() {
        tracing::debug!(
            volume,
            count = record.count,
            mounted = record.mounted,
            device = %record.device,
            "Refcount record"
        );
        match diagnose(&record) {
            Diagnosis::Consistent => {}
            Diagnosis::StaleMount => {
                tracing::info!(volume, device = %record.device, "Initiating recovery unmount");
                if let Err(err) = driver.unmount_volume(&volume).await {
                    tracing::warn!(volume, %err, "Recovery unmount failed - manual recovery may be needed");
                }
            }
            Diagnosis::MissingMount => {
                tracing::warn!(volume, count = record.count, "Initiating recovery mount");
                if let Err(err) = recovery_mount(driver, &volume, config).await {
                    tracing::warn!(volume, %err, "Recovery mount failed - manual recovery may be needed");
                }
            }
            Diagnosis::InvariantViolation => {
                tracing::error!(volume, "Record with zero count and no mount should not exist");
                return Err(KegError::InvariantViolation { volume });
            }
        }
    }
    Ok(())
}

/// Mount a volume back using the status the driver reports for it.
async fn recovery_mount(
    driver: &dyn VolumeDriver,
    volume: &str,
    config: &PluginConfig,
) -> KegResult<()> {
    let status = driver.get_volume(volume).await?;
    let disk_id = status.disk_id.unwrap_or_default();
    if driver.requires_disk_id() && disk_id.is_empty() {
        tracing::warn!(
            volume,
            driver = %config.driver_name,
            "Driver requires a disk ID but the volume status has none"
        );
    }
    let read_only = status.access == AccessMode::ReadOnly;
    driver
        .mount_volume(volume, &status.fstype, &disk_id, read_only, false)
        .await?;
    Ok(())
}
