//! # keg-common
//!
//! Shared types for the Keg volume-plugin ecosystem.
//!
//! This crate provides the common error type and result alias used across
//! all Keg crates.

#![warn(missing_docs)]

pub mod error;

pub use error::{KegError, KegResult};
