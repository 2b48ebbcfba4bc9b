//! Volume usage refcounting.
//!
//! The engine mounts a volume once per consuming container, so the plugin
//! tracks a count of active consumers per volume name. The map is the sole
//! owner of its records; callers only ever see copied values, never live
//! references into it.

use std::collections::HashMap;

use keg_common::{KegError, KegResult};
use parking_lot::RwLock;

/// Usage state tracked for a single volume.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UsageRecord {
    /// Number of active consumers known to the container engine.
    pub count: u32,
    /// Whether the OS mount table reports this volume mounted under the
    /// plugin's mount root.
    pub mounted: bool,
    /// Backing device the mount table reported. Informational, set only by
    /// a mount-table scan; empty during normal operation.
    pub device: String,
}

/// Concurrency-safe map from volume name to [`UsageRecord`].
///
/// One reader/writer lock guards the whole map. Individual operations are
/// atomic with respect to the map; cross-call sequences are not. The
/// plugin's request layer serializes mount/unmount per volume.
#[derive(Debug, Default)]
pub struct RefCountMap {
    inner: RwLock<HashMap<String, UsageRecord>>,
}

impl RefCountMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current refcount for a volume, 0 when the volume is unknown.
    pub fn get_count(&self, volume: &str) -> u32 {
        self.inner.read().get(volume).map_or(0, |rec| rec.count)
    }

    /// Increment the refcount for a volume, creating the entry if needed.
    /// Returns the new count.
    pub fn increment(&self, volume: &str) -> u32 {
        let mut map = self.inner.write();
        let rec = map.entry(volume.to_string()).or_default();
        rec.count += 1;
        rec.count
    }

    /// Decrement the refcount for a volume and return the new count.
    ///
    /// The entry is removed once the count reaches zero. A decrement on an
    /// entry whose count is already zero removes it and succeeds with 0,
    /// since the engine occasionally sends an extra unmount notification
    /// and that state is already what the caller wants.
    ///
    /// # Errors
    ///
    /// Returns [`KegError::MissingRefcount`] when the volume is unknown;
    /// the map is left unchanged.
    pub fn decrement(&self, volume: &str) -> KegResult<u32> {
        let mut map = self.inner.write();
        let Some(rec) = map.get_mut(volume) else {
            return Err(KegError::MissingRefcount {
                volume: volume.to_string(),
            });
        };

        if rec.count == 0 {
            map.remove(volume);
            tracing::warn!(volume, "Decrement on refcount already at zero");
            return Ok(0);
        }

        rec.count -= 1;
        let count = rec.count;
        if count == 0 {
            // Removal does not consult `mounted`, so a still-mounted volume
            // loses its device annotation here. See the open question in
            // DESIGN.md before changing this.
            map.remove(volume);
        }
        Ok(count)
    }

    /// Remove every entry. Used only at the start of discovery, when no
    /// prior in-memory state is trustworthy.
    pub fn purge(&self) {
        self.inner.write().clear();
    }

    /// Mark a volume as mounted from the given device, creating the entry
    /// if needed. Called by the mount-table scanner.
    pub fn mark_mounted(&self, volume: &str, device: &str) {
        let mut map = self.inner.write();
        let rec = map.entry(volume.to_string()).or_default();
        rec.mounted = true;
        rec.device = device.to_string();
    }

    /// Copy of every entry, for reconciliation. No iteration order is
    /// guaranteed.
    pub fn snapshot(&self) -> Vec<(String, UsageRecord)> {
        self.inner
            .read()
            .iter()
            .map(|(name, rec)| (name.clone(), rec.clone()))
            .collect()
    }

    /// Number of tracked volumes.
    pub fn len(&self) -> usize {
        self.inner.read().len()
    }

    /// Whether no volume is tracked.
    pub fn is_empty(&self) -> bool {
        self.inner.read().is_empty()
    }

    /// Insert a record verbatim, bypassing the operation surface. Lets tests
    /// build states the public operations cannot reach.
    #[cfg(test)]
    pub(crate) fn insert_record(&self, volume: &str, record: UsageRecord) {
        self.inner.write().insert(volume.to_string(), record);
    }
}
