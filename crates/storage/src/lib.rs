//! Storage layer for Nikwela
//!
//! This crate provides the device-local key-value cache and the on-disk
//! persisted state used to restore sessions across restarts.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod kv;
pub mod persistence;

pub use kv::{DeviceStore, KvError, KvStore, LocalCache};
pub use persistence::{PersistedState, PersistenceConfig, PersistenceError};
