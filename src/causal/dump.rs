//! Human-readable renderings of a causal graph.

use std::path::Path;

use crate::causal::{CausalGraph, NodeKind};
use crate::error::{GraphError, GraphResult};
use crate::factor::file::prior_list;

/// One line per node: `id \t prior|D \t #children \t I|+|* \t children \t key`.
pub fn causal_txt(graph: &CausalGraph) -> String {
    let mut out = String::new();
    for (id, node) in graph.nodes() {
        let prior = node
            .prior
            .map(|p| p.0.to_string())
            .unwrap_or_else(|| "D".to_string());
        let op = match node.kind {
            NodeKind::Input => 'I',
            NodeKind::Sum(_) => '+',
            NodeKind::Product(_) => '*',
        };
        let children: Vec<String> = node
            .kind
            .children()
            .iter()
            .map(|c| c.0.to_string())
            .collect();
        out.push_str(&format!(
            "{}\t{}\t{}\t{}\t{}\t{}\n",
            id.0,
            prior,
            children.len(),
            op,
            children.join(" "),
            node.key
        ));
    }
    out
}

/// Graphviz rendering: sums are ellipses, products boxes, inputs filled;
/// priors are drawn as diamonds with bold edges to their nodes.
pub fn to_dot(graph: &CausalGraph) -> String {
    let mut out = String::new();
    out.push_str(&format!("digraph \"{}\" {{\n", graph.name().replace('"', "'")));
    for (i, prior) in graph.priors().iter().enumerate() {
        out.push_str(&format!(
            "  p{i} [shape=diamond, label=\"P{i} mean={:.3}\"];\n",
            prior.mean()
        ));
    }
    for (id, node) in graph.nodes() {
        let label = node.key.to_string().replace('"', "'");
        let style = match node.kind {
            NodeKind::Input => "shape=ellipse, style=filled",
            NodeKind::Sum(_) => "shape=ellipse",
            NodeKind::Product(_) => "shape=box",
        };
        out.push_str(&format!("  n{} [{style}, label=\"{label}\"];\n", id.0));
        for c in node.kind.children() {
            out.push_str(&format!("  n{} -> n{};\n", c.0, id.0));
        }
        if let Some(p) = node.prior {
            out.push_str(&format!("  p{} -> n{} [style=bold];\n", p.0, id.0));
        }
    }
    out.push_str("}\n");
    out
}

/// Write `<name>.causal.txt`, `<name>.dot` and `priors.list` into `dir`.
pub fn dump(graph: &CausalGraph, dir: &Path) -> GraphResult<()> {
    let files = [
        (format!("{}.causal.txt", graph.name()), causal_txt(graph)),
        (format!("{}.dot", graph.name()), to_dot(graph)),
        ("priors.list".to_string(), prior_list(graph.priors())),
    ];
    for (name, content) in files {
        let path = dir.join(name);
        std::fs::write(&path, content).map_err(|e| GraphError::DumpWrite {
            path: path.display().to_string(),
            source: e,
        })?;
    }
    Ok(())
}

impl CausalGraph {
    /// See [`to_dot`].
    pub fn to_dot(&self) -> String {
        to_dot(self)
    }

    /// See [`dump`].
    pub fn dump(&self, dir: &Path) -> GraphResult<()> {
        dump(self, dir)
    }
}
