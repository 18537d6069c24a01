//! Persistent, resumable DAG workflow engine.
//!
//! Callers register named DAGs of async work units, then launch many
//! concurrent request executions of those DAGs. Each request's state is
//! checkpointed to a pluggable [`store::Store`] after every step, so requests
//! survive process restart and can be paused, resumed and terminated.
//!
//! This crate defines the engine and the storage *port*; backends live in
//! `flowline-store`.

pub mod dag;
pub mod flow;
pub mod store;

#[cfg(test)]
pub(crate) mod test_support;

pub use dag::builder::DagBuilder;
pub use flow::context::{BooleanHandler, NodeHandler, StepContext, bool_fn, node_fn};
pub use flow::engine::FlowEngine;
