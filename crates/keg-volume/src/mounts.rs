//! OS mount table scanning.
//!
//! Annotates the refcount map with what the kernel actually has mounted
//! under the plugin's mount root. Everything the plugin mounts lives in
//! `<mount_root>/<volume_name>`, so the volume name is the final path
//! component of the mount point.

use std::path::Path;

use keg_common::KegResult;

use crate::config::PluginConfig;
use crate::refcount::RefCountMap;

/// Scan the mount table and mark matching volumes as mounted.
///
/// Each line is whitespace-separated with the device first and the mount
/// point second (`/dev/sdb /mnt/keg/vol1 ext4 rw,relatime 0 0`). Lines with
/// fewer than two fields, or whose mount point is not directly under the
/// configured mount root, are ignored.
///
/// # Errors
///
/// Returns an error when the mount table cannot be read. Entries written
/// before the failure are kept; the caller decides whether partial state is
/// usable.
pub fn scan_mount_table(store: &RefCountMap, config: &PluginConfig) -> KegResult<()> {
    let data = std::fs::read_to_string(&config.mounts_file).inspect_err(|err| {
        tracing::error!(
            path = %config.mounts_file.display(),
            %err,
            "Failed to read mount table"
        );
    })?;

    for line in data.lines() {
        let Some((device, volume)) = parse_mount_line(line, &config.mount_root) else {
            continue;
        };
        store.mark_mounted(volume, device);
        tracing::debug!(volume, device, "Found plugin volume in mount table");
    }

    Ok(())
}

/// Extract `(device, volume_name)` from one mount table line, if its mount
/// point sits directly under `mount_root`.
fn parse_mount_line<'a>(line: &'a str, mount_root: &Path) -> Option<(&'a str, &'a str)> {
    let mut fields = line.split_whitespace();
    let device = fields.next()?;
    let mount_point = Path::new(fields.next()?);
    if mount_point.parent() != Some(mount_root) {
        return None;
    }
    let volume = mount_point.file_name()?.to_str()?;
    Some((device, volume))
}
