//! Volume driver interface.
//!
//! The driver owns the actual storage attach/detach and filesystem
//! mount/unmount mechanics; this crate only consumes it to issue corrective
//! actions during reconciliation.

use std::path::PathBuf;

use async_trait::async_trait;
use keg_common::KegResult;

/// How a volume may be accessed, as reported by the driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AccessMode {
    /// Read-write access.
    #[default]
    ReadWrite,
    /// Read-only access.
    ReadOnly,
}

/// Status fields a driver reports for a volume.
#[derive(Debug, Clone, Default)]
pub struct VolumeStatus {
    /// Filesystem type the volume is formatted with.
    pub fstype: String,
    /// Access mode the volume was created with.
    pub access: AccessMode,
    /// Explicit disk identifier, for backends that address disks by ID
    /// rather than by volume name.
    pub disk_id: Option<String>,
}

/// Operations a storage backend provides to the plugin.
#[async_trait]
pub trait VolumeDriver: Send + Sync {
    /// Attach and mount a volume, returning the mount path.
    async fn mount_volume(
        &self,
        name: &str,
        fstype: &str,
        disk_id: &str,
        read_only: bool,
        skip_attach: bool,
    ) -> KegResult<PathBuf>;

    /// Unmount and detach a volume.
    async fn unmount_volume(&self, name: &str) -> KegResult<()>;

    /// Fetch the driver's current status for a volume.
    async fn get_volume(&self, name: &str) -> KegResult<VolumeStatus>;

    /// Whether this backend needs an explicit disk ID to mount a volume.
    fn requires_disk_id(&self) -> bool {
        false
    }
}
