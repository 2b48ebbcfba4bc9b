//! # keg-volume
//!
//! Volume usage refcounting and crash-recovery discovery.
//!
//! The container engine sends the plugin one mount request per container
//! that uses a volume and one unmount when it stops, so the plugin has to
//! count consumers itself to know when a volume is really free. This crate
//! owns that counter and rebuilds it after an ungraceful restart:
//!
//! - [`RefCountMap`] tracks active consumers per volume name.
//! - [`discovery::init`] runs once at startup, before the plugin serves any
//!   mount or unmount request: it re-derives counts from the engine's live
//!   container list, annotates them with the real OS mount table, and issues
//!   corrective mounts/unmounts through the [`VolumeDriver`] seam.
//!
//! When the engine shuts down cleanly it sends matching unmounts and the
//! counts stay in sync on their own; discovery exists for the crash case,
//! where the engine forgets everything while volumes stay mounted.

#![warn(missing_docs)]

pub mod config;
pub mod discovery;
pub mod driver;
pub mod engine;
pub mod mounts;
pub mod reconcile;
pub mod refcount;

pub use config::PluginConfig;
pub use driver::{AccessMode, VolumeDriver, VolumeStatus};
pub use engine::{ContainerEngine, ContainerMount, ContainerSummary, DockerEngine, EngineInfo};
pub use refcount::{RefCountMap, UsageRecord};
