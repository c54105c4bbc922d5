// src/system/mod.rs

//! # System Interaction Layer
//!
//! The boundary between the configure engine and the operating system.
//!
//! ## Modules
//!
//! - **`executor`**: spawns a process with captured stdout/stderr and a hard
//!   timeout, and classifies how it ended.
//! - **`toolchain`**: the [`ProbeExecutor`](crate::core::probe::ProbeExecutor)
//!   backed by the real compilers and linkers.

pub mod executor;
pub mod toolchain;
