// src/core/mod.rs

//! # Configure Engine
//!
//! - **`graph`**: the dependency DAG with deterministic topological order.
//! - **`module`**: the `ConfigModule` contract and the probe context.
//! - **`framework`**: module registry, dependency wiring and the configure run.
//! - **`engine`**: serial and parallel traversal of the graph.
//! - **`probe`**: compile/link/run requests and the executor seam.
//! - **`options`** / **`arg_parser`**: typed options and `--key=value` parsing.
//! - **`batch`**: the generated program for cross-compiled run tests.
//! - **`cache`**: per-architecture result reuse.
//! - **`artifacts`**: the header, Makefile fragments and substituted files.
//! - **`config_loader`** / **`paths`**: `confgraph.toml` and directory resolution.
//! - **`report`**: summary and failure rendering.

pub mod arg_parser;
pub mod artifacts;
pub mod batch;
pub mod cache;
pub mod config_loader;
pub mod engine;
pub mod framework;
pub mod graph;
pub mod module;
pub mod options;
pub mod paths;
pub mod probe;
pub mod report;

#[cfg(test)]
pub(crate) mod testing;
