//! DAG declaration and compilation.
//!
//! - `builder` -- declarative construction with duplicate/cycle validation
//! - `plan` -- the serializable execution plan (vertices, links, start)
//! - `runtime` -- plan-to-runtime compilation and per-vertex execution

pub mod builder;
pub(crate) mod plan;
pub(crate) mod runtime;
