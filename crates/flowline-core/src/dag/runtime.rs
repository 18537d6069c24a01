//! Plan-to-runtime compilation and per-vertex execution.
//!
//! A compiled request is a [`RuntimeGraph`]: an arena of run contexts indexed
//! by [`RcId`], with successor references resolved from the plan's vertex
//! names. The serialized plan stays name-based; only this in-memory form
//! holds concrete references, so there are no cyclic structures to persist.
//!
//! Execution is one [`run_rc`] call per scheduler step: the current run
//! context performs one unit of work and hands back the next run context (or
//! the [`NextRc::Termination`] sentinel ending its DAG scope).

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, AtomicI64, Ordering};

use flowline_types::data::Data;
use flowline_types::error::{FlowError, StepError};
use flowline_types::path::Path;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;

use crate::dag::builder::{VertexEntity, VertexIndex};
use crate::dag::plan::ExecutePlan;
use crate::flow::context::{BooleanHandler, FlowContext, NodeHandler, StepContext};
use crate::store::Store;

// ---------------------------------------------------------------------------
// Arena types
// ---------------------------------------------------------------------------

/// Index of a run context inside its request's [`RuntimeGraph`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RcId(usize);

/// A resolved successor reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum NextRc {
    Id(RcId),
    /// End of the enclosing DAG scope.
    Termination,
}

/// Lock-free per-vertex counters for observability.
#[derive(Debug, Default)]
pub(crate) struct NodeStats {
    pub current_running: AtomicI32,
    pub success_times: AtomicI64,
    pub failed_times: AtomicI64,
}

pub(crate) struct NodeRuntime {
    name: String,
    path: Path,
    handler: NodeHandler,
    next: NextRc,
    stats: Arc<NodeStats>,
}

impl std::fmt::Debug for NodeRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRuntime")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("handler", &"<handler>")
            .field("next", &self.next)
            .field("stats", &self.stats)
            .finish()
    }
}

pub(crate) struct CondRuntime {
    name: String,
    path: Path,
    handler: BooleanHandler,
    true_rc: NextRc,
    false_rc: NextRc,
    stats: Arc<NodeStats>,
}

impl std::fmt::Debug for CondRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CondRuntime")
            .field("name", &self.name)
            .field("path", &self.path)
            .field("handler", &"<handler>")
            .field("true_rc", &self.true_rc)
            .field("false_rc", &self.false_rc)
            .field("stats", &self.stats)
            .finish()
    }
}

#[derive(Debug)]
pub(crate) struct DagRuntime {
    /// The sub-DAG vertex label; `None` for the root scope.
    vertex: Option<String>,
    /// The plan name of this scope.
    name: String,
    /// The child currently executing inside this scope.
    running: RcId,
    next: NextRc,
}

#[derive(Debug)]
pub(crate) enum RunContext {
    Node(NodeRuntime),
    Condition(CondRuntime),
    Dag(DagRuntime),
}

/// Arena of run contexts for one request.
#[derive(Debug, Default)]
pub(crate) struct RuntimeGraph {
    nodes: Vec<RunContext>,
}

impl RuntimeGraph {
    fn push(&mut self, rc: RunContext) -> RcId {
        self.nodes.push(rc);
        RcId(self.nodes.len() - 1)
    }

    /// The address of the vertex `id` will execute next. Descends through DAG
    /// scopes to the leaf.
    pub fn path_of(&self, id: RcId) -> Path {
        match &self.nodes[id.0] {
            RunContext::Node(n) => n.path.clone(),
            RunContext::Condition(c) => c.path.clone(),
            RunContext::Dag(d) => self.path_of(d.running),
        }
    }

}

// ---------------------------------------------------------------------------
// Compilation
// ---------------------------------------------------------------------------

/// Deferred successor resolution, applied once every vertex has an [`RcId`].
enum Fixup {
    Next {
        id: RcId,
        name: Option<String>,
    },
    Branches {
        id: RcId,
        true_name: Option<String>,
        false_name: Option<String>,
    },
}

fn resolve(
    name: Option<&String>,
    ids: &std::collections::HashMap<String, RcId>,
) -> Result<NextRc, FlowError> {
    match name {
        None => Ok(NextRc::Termination),
        Some(name) if name.is_empty() => Ok(NextRc::Termination),
        Some(name) => ids
            .get(name)
            .map(|id| NextRc::Id(*id))
            .ok_or_else(|| FlowError::NotFound(format!("run context: {name}"))),
    }
}

/// Compile a plan into a fresh runtime graph; returns the root DAG scope.
///
/// An empty `entrypoint` starts at the plan's start vertex; otherwise the
/// path addresses the vertex to resume at (`dag.vertex` or, through sub-DAGs,
/// `dag.subVertex.innerDag.vertex`).
pub(crate) fn compile_runtime(
    plan: &ExecutePlan,
    index: &VertexIndex,
    entrypoint: &Path,
) -> Result<(RuntimeGraph, RcId), FlowError> {
    let mut graph = RuntimeGraph::default();
    let root = compile_scope(plan, index, &Path::new(), None, entrypoint, &mut graph)?;
    Ok((graph, root))
}

fn compile_scope(
    plan: &ExecutePlan,
    index: &VertexIndex,
    parent_path: &Path,
    sub_vertex: Option<&str>,
    entrypoint: &Path,
    graph: &mut RuntimeGraph,
) -> Result<RcId, FlowError> {
    // The entrypoint's first segment identifies this DAG; the remainder
    // addresses where inside it to resume.
    let entry = entrypoint.descend();

    let mut dag_path = parent_path.clone();
    if let Some(vertex) = sub_vertex {
        dag_path.push(vertex);
    }
    dag_path.push(&plan.name);

    let mut ids = std::collections::HashMap::new();
    let mut fixups = Vec::with_capacity(plan.vertices.len());

    for (vertex, info) in &plan.vertices {
        let entity = index.get(&plan.name, vertex).ok_or_else(|| {
            FlowError::NotFound(format!("dag: {} vertex: {vertex}", plan.name))
        })?;
        if entity.kind() != info.kind {
            return Err(FlowError::BadRequest(format!(
                "vertex kind mismatch on {}.{vertex}",
                plan.name
            )));
        }

        let id = match entity {
            VertexEntity::Node { handler } => {
                let id = graph.push(RunContext::Node(NodeRuntime {
                    name: vertex.clone(),
                    path: dag_path.child(vertex),
                    handler,
                    next: NextRc::Termination,
                    stats: Arc::new(NodeStats::default()),
                }));
                fixups.push(Fixup::Next {
                    id,
                    name: plan.links.get(vertex).cloned(),
                });
                id
            }
            VertexEntity::Condition { handler } => {
                let id = graph.push(RunContext::Condition(CondRuntime {
                    name: vertex.clone(),
                    path: dag_path.child(vertex),
                    handler,
                    true_rc: NextRc::Termination,
                    false_rc: NextRc::Termination,
                    stats: Arc::new(NodeStats::default()),
                }));
                fixups.push(Fixup::Branches {
                    id,
                    true_name: info.true_vertex.clone(),
                    false_name: info.false_vertex.clone(),
                });
                id
            }
            VertexEntity::SubDag { .. } => {
                let sub_plan = info.sub_plan.as_ref().ok_or_else(|| {
                    FlowError::NotFound(format!("sub plan of {}.{vertex}", plan.name))
                })?;
                // Only the sub-DAG lying on the entrypoint path resumes
                // mid-flight; its siblings compile fresh.
                let child_entry = if entry.first() == Some(vertex.as_str()) {
                    entry.descend()
                } else {
                    Path::new()
                };
                let id = compile_scope(
                    sub_plan,
                    index,
                    &dag_path,
                    Some(vertex),
                    &child_entry,
                    graph,
                )?;
                fixups.push(Fixup::Next {
                    id,
                    name: plan.links.get(vertex).cloned(),
                });
                id
            }
        };
        ids.insert(vertex.clone(), id);
    }

    for fixup in fixups {
        match fixup {
            Fixup::Next { id, name } => {
                let next = resolve(name.as_ref(), &ids)?;
                match &mut graph.nodes[id.0] {
                    RunContext::Node(n) => n.next = next,
                    RunContext::Dag(d) => d.next = next,
                    RunContext::Condition(_) => {}
                }
            }
            Fixup::Branches {
                id,
                true_name,
                false_name,
            } => {
                let true_rc = resolve(true_name.as_ref(), &ids)?;
                let false_rc = resolve(false_name.as_ref(), &ids)?;
                if let RunContext::Condition(c) = &mut graph.nodes[id.0] {
                    c.true_rc = true_rc;
                    c.false_rc = false_rc;
                }
            }
        }
    }

    let entry_vertex = entry
        .first()
        .map(str::to_string)
        .unwrap_or_else(|| plan.start_vertex.clone());
    let running = *ids
        .get(&entry_vertex)
        .ok_or_else(|| FlowError::NotFound(format!("run context: {entry_vertex}")))?;

    Ok(graph.push(RunContext::Dag(DagRuntime {
        vertex: sub_vertex.map(str::to_string),
        name: plan.name.clone(),
        running,
        next: NextRc::Termination,
    })))
}

// ---------------------------------------------------------------------------
// Execution
// ---------------------------------------------------------------------------

/// What one `run_rc` dispatch needs, cloned out of the arena so no borrow is
/// held across the handler await.
enum Dispatch {
    Node {
        name: String,
        handler: NodeHandler,
        next: NextRc,
        stats: Arc<NodeStats>,
    },
    Cond {
        name: String,
        handler: BooleanHandler,
        true_rc: NextRc,
        false_rc: NextRc,
        stats: Arc<NodeStats>,
    },
    Dag {
        vertex: Option<String>,
        name: String,
        running: RcId,
        next: NextRc,
    },
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

async fn invoke_node(
    handler: NodeHandler,
    cx: StepContext,
    input: Data,
    at: &str,
) -> Result<Data, StepError> {
    match AssertUnwindSafe(handler(cx, input)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(StepError::fatal(format!(
            "panic on {at}: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

async fn invoke_bool(
    handler: BooleanHandler,
    cx: StepContext,
    input: Data,
    at: &str,
) -> Result<bool, StepError> {
    match AssertUnwindSafe(handler(cx, input)).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(StepError::fatal(format!(
            "panic on {at}: {}",
            panic_message(payload.as_ref())
        ))),
    }
}

/// Execute one unit of work at `id`, returning the successor and the data to
/// carry forward.
///
/// On error the caller leaves its running reference untouched, so the same
/// vertex re-runs on the next eligible tick.
pub(crate) fn run_rc<'a, S: Store>(
    graph: &'a mut RuntimeGraph,
    id: RcId,
    fc: &'a mut FlowContext<S>,
    input: Data,
) -> BoxFuture<'a, Result<(NextRc, Data), StepError>> {
    Box::pin(async move {
        let dispatch = match &graph.nodes[id.0] {
            RunContext::Node(n) => Dispatch::Node {
                name: n.name.clone(),
                handler: Arc::clone(&n.handler),
                next: n.next,
                stats: Arc::clone(&n.stats),
            },
            RunContext::Condition(c) => Dispatch::Cond {
                name: c.name.clone(),
                handler: Arc::clone(&c.handler),
                true_rc: c.true_rc,
                false_rc: c.false_rc,
                stats: Arc::clone(&c.stats),
            },
            RunContext::Dag(d) => Dispatch::Dag {
                vertex: d.vertex.clone(),
                name: d.name.clone(),
                running: d.running,
                next: d.next,
            },
        };

        match dispatch {
            Dispatch::Node {
                name,
                handler,
                next,
                stats,
            } => {
                fc.enter(&name);
                let at = fc.current_vertex();
                stats.current_running.fetch_add(1, Ordering::Relaxed);
                let result = invoke_node(handler, fc.step_context(), input, &at).await;
                stats.current_running.fetch_sub(1, Ordering::Relaxed);
                fc.exit();

                match result {
                    Ok(output) => {
                        stats.success_times.fetch_add(1, Ordering::Relaxed);
                        Ok((next, output))
                    }
                    Err(error) => {
                        stats.failed_times.fetch_add(1, Ordering::Relaxed);
                        Err(error)
                    }
                }
            }
            Dispatch::Cond {
                name,
                handler,
                true_rc,
                false_rc,
                stats,
            } => {
                fc.enter(&name);
                let at = fc.current_vertex();
                stats.current_running.fetch_add(1, Ordering::Relaxed);
                let result = invoke_bool(handler, fc.step_context(), input.clone(), &at).await;
                stats.current_running.fetch_sub(1, Ordering::Relaxed);
                fc.exit();

                match result {
                    Ok(branch) => {
                        stats.success_times.fetch_add(1, Ordering::Relaxed);
                        Ok((if branch { true_rc } else { false_rc }, input))
                    }
                    Err(error) => {
                        stats.failed_times.fetch_add(1, Ordering::Relaxed);
                        Err(error)
                    }
                }
            }
            Dispatch::Dag {
                vertex,
                name,
                running,
                next,
            } => {
                if let Some(vertex) = &vertex {
                    fc.enter(vertex);
                }
                fc.enter(&name);
                let result = run_rc(graph, running, fc, input).await;
                fc.exit();
                if vertex.is_some() {
                    fc.exit();
                }

                match result? {
                    // The child scope finished: continue past this sub-DAG.
                    (NextRc::Termination, data) => Ok((next, data)),
                    // Otherwise remember where the child is and stay current,
                    // so the scheduler re-enters this scope next tick.
                    (NextRc::Id(child), data) => {
                        if let RunContext::Dag(d) = &mut graph.nodes[id.0] {
                            d.running = child;
                        }
                        Ok((NextRc::Id(id), data))
                    }
                }
            }
        }
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
