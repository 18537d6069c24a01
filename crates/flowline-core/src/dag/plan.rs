//! The serializable execution plan.
//!
//! A plan is the durable form of a DAG: vertex kinds, condition branch
//! targets, embedded sub-plans, the forward-link map and the start vertex.
//! Vertices are referenced by *name*; resolution to concrete run contexts
//! happens at compile time (`runtime` module). Maps are `BTreeMap` so a plan
//! serializes to identical bytes across round-trips.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Vertex info
// ---------------------------------------------------------------------------

/// The kind of a declared vertex.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum VertexKind {
    Node,
    Condition,
    SubDag,
}

/// Declared facts about one vertex, as persisted inside a plan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub(crate) struct VertexInfo {
    pub kind: VertexKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub true_vertex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub false_vertex: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub_plan: Option<ExecutePlan>,
}

impl VertexInfo {
    pub fn node() -> Self {
        Self {
            kind: VertexKind::Node,
            true_vertex: None,
            false_vertex: None,
            sub_plan: None,
        }
    }

    pub fn condition(true_vertex: &str, false_vertex: &str) -> Self {
        Self {
            kind: VertexKind::Condition,
            true_vertex: Some(true_vertex.to_string()),
            false_vertex: Some(false_vertex.to_string()),
            sub_plan: None,
        }
    }

    pub fn sub_dag(plan: ExecutePlan) -> Self {
        Self {
            kind: VertexKind::SubDag,
            true_vertex: None,
            false_vertex: None,
            sub_plan: Some(plan),
        }
    }
}

// ---------------------------------------------------------------------------
// Execution plan
// ---------------------------------------------------------------------------

/// The serializable plan of one DAG.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub(crate) struct ExecutePlan {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub start_vertex: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub vertices: BTreeMap<String, VertexInfo>,
    /// Forward links: an edge `a -> b` is stored as `links["a"] = "b"`.
    /// Each source has at most one outgoing link, so this map is functional.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub links: BTreeMap<String, String>,
}

impl ExecutePlan {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Self::default()
        }
    }

    /// Walk forward links from `from`; true if the chain reaches `needle`.
    ///
    /// Conditions are not links, so they terminate the walk. Because the link
    /// map is functional this is a plain linear walk, not a graph search.
    pub fn has_forward_path(&self, from: &str, needle: &str) -> bool {
        let mut current = from;
        while let Some(next) = self.links.get(current) {
            if next == needle {
                return true;
            }
            current = next;
        }
        false
    }

    /// Vertices this vertex continues to: its link target, or a condition's
    /// two branch targets. `None` when execution ends here.
    fn continuations(&self, vertex: &str) -> Option<Vec<&str>> {
        if let Some(next) = self.links.get(vertex) {
            return Some(vec![next.as_str()]);
        }
        if let Some(info) = self.vertices.get(vertex) {
            if info.kind == VertexKind::Condition {
                return Some(vec![
                    info.true_vertex.as_deref().unwrap_or(""),
                    info.false_vertex.as_deref().unwrap_or(""),
                ]);
            }
        }
        None
    }

    /// The vertices execution can end on, reachable from the start, each
    /// prefixed with `prefix`. Used to attach edges leaving a sub-DAG.
    pub fn end_vertices(&self, prefix: &str) -> Vec<String> {
        let mut ends = Vec::new();
        let mut stack = vec![self.start_vertex.as_str()];
        let mut visited = 0usize;
        let visit_cap = 2 * self.vertices.len().max(1);

        while let Some(vertex) = stack.pop() {
            if visited >= visit_cap {
                break;
            }
            visited += 1;
            match self.continuations(vertex) {
                Some(next) => stack.extend(next),
                None => {
                    let end = format!("{prefix}{vertex}");
                    if !ends.contains(&end) {
                        ends.push(end);
                    }
                }
            }
        }
        ends
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
