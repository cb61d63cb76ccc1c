//! # clipmesh-app
//!
//! The `Core` aggregate (module `core`) and the use cases (module
//! `use_cases`) that orchestrate it: pairing, clipboard sync, and
//! application startup. This crate owns no transport or storage
//! implementation of its own — it wires `clipmesh-core` and `clipmesh-net`
//! together behind a single fixed startup sequence.

pub mod core;
pub mod use_cases;

pub use crate::core::{BuildError, Core, CoreBuilder};
pub use use_cases::{AppHandle, PairDevice, StartApp, SyncClipboard};
