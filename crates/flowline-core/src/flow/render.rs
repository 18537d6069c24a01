//! DOT rendering of plans and request traces.
//!
//! Nodes render as records, conditions as diamonds with True/False edge
//! labels, sub-DAGs as clustered subgraphs. When trace records are supplied,
//! vertices are colored by outcome (yellow in-progress, red errored, green
//! completed) and the record JSON rides along as an escaped `comment`.

use std::collections::BTreeMap;

use flowline_types::flow::TraceRecord;

use crate::dag::plan::{ExecutePlan, VertexInfo, VertexKind};

pub(crate) fn render_plan(plan: &ExecutePlan, records: &BTreeMap<String, TraceRecord>) -> String {
    let mut renderer = DotRenderer {
        records,
        out: String::new(),
    };
    renderer.line("digraph D {");
    let prefix = format!("{}.", plan.name);
    renderer.draw_dag(&prefix, &plan.name, plan);
    renderer.line("}");
    renderer.out
}

struct DotRenderer<'a> {
    records: &'a BTreeMap<String, TraceRecord>,
    out: String,
}

impl DotRenderer<'_> {
    fn line(&mut self, text: &str) {
        self.out.push_str(text);
        self.out.push('\n');
    }

    fn draw_dag(&mut self, prefix: &str, name: &str, plan: &ExecutePlan) {
        for (vertex, info) in &plan.vertices {
            match info.kind {
                VertexKind::Node => self.draw_node(prefix, vertex),
                VertexKind::Condition => self.draw_cond(prefix, vertex, info, plan),
                VertexKind::SubDag => {
                    let Some(sub) = &info.sub_plan else { continue };
                    let cluster = id_string(&format!("{prefix}{vertex}"));
                    self.line(&format!("subgraph cluster_{cluster} {{"));
                    self.line("style=filled");
                    self.line("color=lightgrey");
                    let sub_prefix = format!("{prefix}{vertex}.{}.", sub.name);
                    self.draw_dag(&sub_prefix, vertex, sub);
                    self.line("}");
                }
            }
        }
        self.draw_links(prefix, plan);
        self.line(&format!("label={}", quote(name)));
    }

    fn draw_node(&mut self, prefix: &str, name: &str) {
        let attr = self.attr(prefix, name);
        self.line(&format!(
            "{} [label={} shape=\"record\"{attr}]",
            id_string(&format!("{prefix}{name}")),
            quote(name)
        ));
    }

    fn draw_cond(&mut self, prefix: &str, name: &str, info: &VertexInfo, plan: &ExecutePlan) {
        let attr = self.attr(prefix, name);
        let id = id_string(&format!("{prefix}{name}"));
        self.line(&format!("{id} [label={} shape=\"diamond\"{attr}]", quote(name)));

        for (target, label) in [
            (info.true_vertex.as_deref(), "True"),
            (info.false_vertex.as_deref(), "False"),
        ] {
            let Some(target) = target else { continue };
            for vertex in real_vertices(target, plan, false) {
                self.line(&format!(
                    "{id} -> {} [label=\"{label}\"]",
                    id_string(&format!("{prefix}{vertex}"))
                ));
            }
        }
    }

    fn draw_links(&mut self, prefix: &str, plan: &ExecutePlan) {
        for (from, to) in &plan.links {
            for from_vertex in real_vertices(from, plan, true) {
                for to_vertex in real_vertices(to, plan, false) {
                    self.line(&format!(
                        "{} -> {}",
                        id_string(&format!("{prefix}{from_vertex}")),
                        id_string(&format!("{prefix}{to_vertex}"))
                    ));
                }
            }
        }
    }

    fn attr(&self, prefix: &str, name: &str) -> String {
        let Some(record) = self.records.get(&format!("{prefix}{name}")) else {
            return String::new();
        };
        let color = if record.end_time.is_none() {
            "yellow"
        } else if record.error.is_some() {
            "red"
        } else {
            "green"
        };
        format!(
            " style=\"filled\" color=\"{color}\" comment=\"{}\"",
            record_comment(record)
        )
    }
}

/// An edge endpoint naming a sub-DAG really attaches to vertices inside it:
/// its start vertex when entering, its end vertices when leaving.
fn real_vertices(vertex: &str, plan: &ExecutePlan, is_from: bool) -> Vec<String> {
    let Some(info) = plan.vertices.get(vertex) else {
        return Vec::new();
    };
    match info.kind {
        VertexKind::Node | VertexKind::Condition => vec![vertex.to_string()],
        VertexKind::SubDag => {
            let Some(sub) = &info.sub_plan else {
                return Vec::new();
            };
            if is_from {
                sub.end_vertices(&format!("{vertex}.{}.", sub.name))
            } else {
                vec![format!("{vertex}.{}.{}", sub.name, sub.start_vertex)]
            }
        }
    }
}

fn record_comment(record: &TraceRecord) -> String {
    let json = serde_json::to_string(record).unwrap_or_default();
    add_slashes(&json).replace('\n', "\\n")
}

fn add_slashes(s: &str) -> String {
    let mut out = s.to_string();
    for token in ["\\", "\"", "'", " "] {
        out = out.replace(token, &format!("\\{token}"));
    }
    out
}

fn quote(s: &str) -> String {
    format!("\"{}\"", s.replace('"', "\\\""))
}

fn id_string(s: &str) -> String {
    s.replace(
        [
            ' ', '\'', '"', '(', ')', '*', '&', '^', '%', '$', '#', '@', '!', '?', '<', '>', '[',
            ']', '{', '}', '.',
        ],
        "_",
    )
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
