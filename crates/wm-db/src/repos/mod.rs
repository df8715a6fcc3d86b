//! Repository modules.
//!
//! Each module adds methods to `WmDb` via `impl WmDb` blocks and implements
//! the matching `wm_core::store` trait.

pub mod entity;
pub mod sync_state;
