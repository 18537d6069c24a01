//! Declarative DAG construction.
//!
//! A [`DagBuilder`] is handed to the caller's registration closure. Every
//! operation is a checked mutation on the plan under construction and on the
//! process-wide vertex index (keyed `<dag>.<vertex>`), which also holds the
//! handlers the serialized plan cannot carry.

use std::collections::HashMap;
use std::sync::Mutex;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use flowline_types::error::FlowError;

use crate::dag::plan::{ExecutePlan, VertexInfo, VertexKind};
use crate::flow::context::{BooleanHandler, NodeHandler};

// ---------------------------------------------------------------------------
// Vertex index
// ---------------------------------------------------------------------------

/// What the process knows about a declared vertex beyond its plan entry.
#[derive(Clone)]
pub(crate) enum VertexEntity {
    Node { handler: NodeHandler },
    Condition { handler: BooleanHandler },
    SubDag { dag: String },
}

impl VertexEntity {
    pub fn kind(&self) -> VertexKind {
        match self {
            Self::Node { .. } => VertexKind::Node,
            Self::Condition { .. } => VertexKind::Condition,
            Self::SubDag { .. } => VertexKind::SubDag,
        }
    }
}

/// Process-wide vertex registry, keyed `<dagName>.<vertex>`.
#[derive(Default)]
pub(crate) struct VertexIndex {
    entries: DashMap<String, VertexEntity>,
}

impl VertexIndex {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(dag: &str, vertex: &str) -> String {
        format!("{dag}.{vertex}")
    }

    pub fn register(
        &self,
        dag: &str,
        vertex: &str,
        entity: VertexEntity,
    ) -> Result<(), FlowError> {
        match self.entries.entry(Self::key(dag, vertex)) {
            Entry::Occupied(_) => Err(FlowError::AlreadyExists(format!("vertex: {vertex}"))),
            Entry::Vacant(slot) => {
                slot.insert(entity);
                Ok(())
            }
        }
    }

    pub fn contains(&self, dag: &str, vertex: &str) -> bool {
        self.entries.contains_key(&Self::key(dag, vertex))
    }

    pub fn get(&self, dag: &str, vertex: &str) -> Option<VertexEntity> {
        self.entries
            .get(&Self::key(dag, vertex))
            .map(|entry| entry.value().clone())
    }
}

// ---------------------------------------------------------------------------
// Plan registry
// ---------------------------------------------------------------------------

/// Registered plans by DAG name. Owned by the engine for the process lifetime.
#[derive(Default)]
pub(crate) struct DagRegistry {
    plans: Mutex<HashMap<String, ExecutePlan>>,
}

impl DagRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<ExecutePlan> {
        self.plans.lock().expect("registry lock").get(name).cloned()
    }

    pub fn insert(&self, name: &str, plan: ExecutePlan) {
        self.plans
            .lock()
            .expect("registry lock")
            .insert(name.to_string(), plan);
    }

    pub fn names(&self) -> Vec<String> {
        self.plans
            .lock()
            .expect("registry lock")
            .keys()
            .cloned()
            .collect()
    }
}

// ---------------------------------------------------------------------------
// DagBuilder
// ---------------------------------------------------------------------------

/// Builds one DAG inside a registration closure.
///
/// Declaration order matters for conditions: a condition's true/false targets
/// must already be declared when the condition is added. Sub-DAG references
/// must name an already-registered DAG.
pub struct DagBuilder<'e> {
    plan: ExecutePlan,
    index: &'e VertexIndex,
    registry: &'e DagRegistry,
}

impl<'e> DagBuilder<'e> {
    pub(crate) fn new(name: &str, index: &'e VertexIndex, registry: &'e DagRegistry) -> Self {
        Self {
            plan: ExecutePlan::new(name),
            index,
            registry,
        }
    }

    pub(crate) fn into_plan(self) -> ExecutePlan {
        self.plan
    }

    /// Declare a work vertex with a user handler.
    pub fn node(&mut self, vertex: &str, handler: NodeHandler) -> Result<(), FlowError> {
        self.index
            .register(&self.plan.name, vertex, VertexEntity::Node { handler })?;

        self.plan
            .vertices
            .insert(vertex.to_string(), VertexInfo::node());
        if self.plan.start_vertex.is_empty() {
            self.plan.start_vertex = vertex.to_string();
        }
        Ok(())
    }

    /// Declare a branching vertex. Both successors must already be declared.
    pub fn condition(
        &mut self,
        vertex: &str,
        true_vertex: &str,
        false_vertex: &str,
        handler: BooleanHandler,
    ) -> Result<(), FlowError> {
        if !self.index.contains(&self.plan.name, true_vertex) {
            return Err(FlowError::NotFound(format!("true vertex: {true_vertex}")));
        }
        if !self.index.contains(&self.plan.name, false_vertex) {
            return Err(FlowError::NotFound(format!("false vertex: {false_vertex}")));
        }

        self.index
            .register(&self.plan.name, vertex, VertexEntity::Condition { handler })?;

        // The condition subsumes a successor that currently is the start.
        if self.plan.start_vertex.is_empty()
            || self.plan.start_vertex == true_vertex
            || self.plan.start_vertex == false_vertex
        {
            self.plan.start_vertex = vertex.to_string();
        }

        self.plan.vertices.insert(
            vertex.to_string(),
            VertexInfo::condition(true_vertex, false_vertex),
        );
        Ok(())
    }

    /// Embed an already-registered DAG as a vertex.
    pub fn sub_dag(&mut self, vertex: &str, dag_name: &str) -> Result<(), FlowError> {
        let sub_plan = self
            .registry
            .get(dag_name)
            .ok_or_else(|| FlowError::NotFound(format!("DAG: {dag_name}")))?;

        self.index.register(
            &self.plan.name,
            vertex,
            VertexEntity::SubDag {
                dag: dag_name.to_string(),
            },
        )?;

        if self.plan.start_vertex.is_empty() {
            self.plan.start_vertex = vertex.to_string();
        }
        self.plan
            .vertices
            .insert(vertex.to_string(), VertexInfo::sub_dag(sub_plan));
        Ok(())
    }

    /// Connect `from` to `to`. Conditions cannot be edge sources, each source
    /// has at most one outgoing edge, and edges closing a cycle are rejected.
    pub fn edge(&mut self, from: &str, to: &str) -> Result<(), FlowError> {
        if let Some(existing) = self.plan.links.get(from) {
            return Err(FlowError::AlreadyExists(format!("from {from} to {existing}")));
        }

        let from_entity = self
            .index
            .get(&self.plan.name, from)
            .ok_or_else(|| FlowError::NotFound(format!("from: {from}")))?;
        if from_entity.kind() == VertexKind::Condition {
            return Err(FlowError::BadRequest(format!(
                "from: {from} is a condition and can not be an edge source"
            )));
        }

        if !self.index.contains(&self.plan.name, to) {
            return Err(FlowError::NotFound(format!("to: {to}")));
        }

        if self.plan.has_forward_path(to, from) {
            return Err(FlowError::Forbidden(format!("{to} -> {from} is linked")));
        }

        self.plan.links.insert(from.to_string(), to.to_string());

        if self.plan.start_vertex == to {
            self.plan.start_vertex = from.to_string();
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::context::{bool_fn, node_fn};
    use flowline_types::data::Data;

    fn noop() -> NodeHandler {
        node_fn(|_cx, data: Data| async move { Ok(data) })
    }

    fn always(flag: bool) -> BooleanHandler {
        bool_fn(move |_cx, _data| async move { Ok(flag) })
    }

    fn builder<'e>(index: &'e VertexIndex, registry: &'e DagRegistry) -> DagBuilder<'e> {
        DagBuilder::new("test", index, registry)
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

    #[test]
    fn test_duplicate_vertex_rejected() {
        let index = VertexIndex::new();
        let registry = DagRegistry::new();
        let mut dag = builder(&index, &registry);

        dag.node("a", noop()).unwrap();
        let err = dag.node("a", noop()).unwrap_err();
        assert!(matches!(err, FlowError::AlreadyExists(_)));
    }

    #[test]
    fn test_condition_requires_declared_successors() {
        let index = VertexIndex::new();
        let registry = DagRegistry::new();
        let mut dag = builder(&index, &registry);

        let err = dag.condition("cond", "a", "b", always(true)).unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));

        dag.node("a", noop()).unwrap();
        dag.node("b", noop()).unwrap();
        dag.condition("cond", "a", "b", always(true)).unwrap();
    }

    #[test]
    fn test_sub_dag_requires_registered_dag() {
        let index = VertexIndex::new();
        let registry = DagRegistry::new();
        let mut dag = builder(&index, &registry);

        let err = dag.sub_dag("child", "other").unwrap_err();
        assert!(matches!(err, FlowError::NotFound(_)));

        registry.insert("other", ExecutePlan::new("other"));
        dag.sub_dag("child", "other").unwrap();
    }

    // -----------------------------------------------------------------------
    // Edges
    // -----------------------------------------------------------------------

    #[test]
    fn test_edge_contracts() {
        let index = VertexIndex::new();
        let registry = DagRegistry::new();
        let mut dag = builder(&index, &registry);

        // Unknown endpoints
        assert!(matches!(
            dag.edge("a", "b").unwrap_err(),
            FlowError::NotFound(_)
        ));

        dag.node("a", noop()).unwrap();
        dag.node("b", noop()).unwrap();
        dag.node("c", noop()).unwrap();
        dag.condition("cond", "b", "c", always(true)).unwrap();

        // Conditions cannot be edge sources
        assert!(matches!(
            dag.edge("cond", "a").unwrap_err(),
            FlowError::BadRequest(_)
        ));

        dag.edge("a", "b").unwrap();

        // One outgoing edge per source
        assert!(matches!(
            dag.edge("a", "c").unwrap_err(),
            FlowError::AlreadyExists(_)
        ));

        dag.edge("b", "c").unwrap();

        // Closing the cycle c -> a is forbidden
        assert!(matches!(
            dag.edge("c", "a").unwrap_err(),
            FlowError::Forbidden(_)
        ));
    }

    // -----------------------------------------------------------------------
    // Start vertex maintenance
    // -----------------------------------------------------------------------

    #[test]
    fn test_first_vertex_becomes_start() {
        let index = VertexIndex::new();
        let registry = DagRegistry::new();
        let mut dag = builder(&index, &registry);

        dag.node("a", noop()).unwrap();
        dag.node("b", noop()).unwrap();
        assert_eq!(dag.plan.start_vertex, "a");
    }

    #[test]
    fn test_edge_pushes_start_back() {
        let index = VertexIndex::new();
        let registry = DagRegistry::new();
        let mut dag = builder(&index, &registry);

        dag.node("a", noop()).unwrap();
        dag.node("b", noop()).unwrap();
        // a is the start; an edge b -> a pushes the start to b.
        dag.edge("b", "a").unwrap();
        assert_eq!(dag.plan.start_vertex, "b");
    }

    #[test]
    fn test_every_connected_vertex_is_reachable_from_start() {
        let index = VertexIndex::new();
        let registry = DagRegistry::new();
        let mut dag = builder(&index, &registry);

        for name in ["a", "b", "c", "d"] {
            dag.node(name, noop()).unwrap();
        }
        dag.condition("cond", "c", "d", always(true)).unwrap();
        dag.edge("a", "b").unwrap();
        dag.edge("b", "cond").unwrap();

        let plan = &dag.plan;
        let mut reachable = std::collections::BTreeSet::new();
        let mut stack = vec![plan.start_vertex.as_str()];
        while let Some(vertex) = stack.pop() {
            if !reachable.insert(vertex) {
                continue;
            }
            if let Some(next) = plan.links.get(vertex) {
                stack.push(next);
            }
            if let Some(info) = plan.vertices.get(vertex) {
                stack.extend(info.true_vertex.as_deref());
                stack.extend(info.false_vertex.as_deref());
            }
        }

        let connected: std::collections::BTreeSet<&str> = plan
            .vertices
            .keys()
            .map(String::as_str)
            .filter(|v| {
                plan.links.contains_key(*v)
                    || plan.links.values().any(|to| to == v)
                    || plan.vertices[*v].kind == VertexKind::Condition
                    || plan.vertices.values().any(|info| {
                        info.true_vertex.as_deref() == Some(*v)
                            || info.false_vertex.as_deref() == Some(*v)
                    })
            })
            .collect();

        assert!(
            connected.is_subset(&reachable),
            "connected {connected:?} not all reachable from start ({reachable:?})"
        );
    }

    #[test]
    fn test_condition_subsumes_start() {
        let index = VertexIndex::new();
        let registry = DagRegistry::new();
        let mut dag = builder(&index, &registry);

        dag.node("a", noop()).unwrap();
        dag.node("b", noop()).unwrap();
        // a is the start and becomes the condition's true branch.
        dag.condition("cond", "a", "b", always(true)).unwrap();
        assert_eq!(dag.plan.start_vertex, "cond");
    }
}
