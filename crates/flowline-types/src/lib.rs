//! Shared domain types for the flowline workflow engine.
//!
//! This crate contains the types that cross the engine boundary: the data bag
//! handlers exchange, dotted vertex paths, request statuses and trace records,
//! error kinds, and engine options.
//!
//! Zero infrastructure dependencies -- only serde, serde_json, chrono, thiserror.

pub mod data;
pub mod error;
pub mod flow;
pub mod options;
pub mod path;
