//! Public facade crate for `serpscrub`.
//!
//! This crate intentionally contains no IO or provider-specific logic.
//! It re-exports the backend-agnostic types/traits from `serpscrub-core`.

pub use serpscrub_core::*;
