//! # wm-core
//!
//! Core types shared across all Waymark crates.
//!
//! This crate provides:
//! - Entity structs for the synced domain objects (projects, milestones, issues)
//! - The `Entity` tagged union and the record adapter used at the storage boundary
//! - Status, phase, and strategy enums
//! - Sync history (`SyncMetadata`) and checkpoint (`SyncCheckpoint`) data types
//! - Store traits implemented by `wm-db` and consumed by `wm-sync`
//! - Cross-cutting error types

pub mod checkpoint;
pub mod entities;
pub mod enums;
pub mod errors;
pub mod metadata;
pub mod store;
