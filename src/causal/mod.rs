//! Causal graph: a tagged Boolean DAG compiled from an acyclic derivation.
//!
//! Nodes live in an arena addressed by [`NodeId`]. Each node has exactly one
//! [`NodeKind`]:
//!
//! - `Input`: an axiom. With a prior it is a Bernoulli draw; without one it is
//!   constantly true.
//! - `Sum`: OR over its children (the clauses deriving a head).
//! - `Product`: AND over its children (the body of one clause).
//!
//! A Sum or Product with a prior is gated: its value is `gate ∧ OR/AND(children)`
//! where the gate fires with a probability drawn from the prior. Priors live in
//! a per-graph table so several nodes can share one parameter.

pub mod builder;
pub mod dump;
pub mod exact;
pub mod squeeze;

use std::collections::{HashMap, HashSet};
use std::fmt;

use petgraph::algo::toposort;
use petgraph::graph::{DiGraph, NodeIndex};
use serde::{Deserialize, Serialize};

use crate::error::{GraphError, GraphResult};
use crate::prior::Categorical01;
use crate::tuple::Tuple;

/// Arena index of a causal node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "n{}", self.0)
    }
}

/// Index into a graph's prior table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PriorId(pub u32);

impl PriorId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

/// What a node stands for: a tuple, or the body of the `k`-th active clause.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKey {
    Tuple(Tuple),
    Clause(usize),
}

impl fmt::Display for NodeKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tuple(t) => write!(f, "{t}"),
            Self::Clause(k) => write!(f, "D{k}"),
        }
    }
}

/// Structural role of a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeKind {
    Input,
    Sum(Vec<NodeId>),
    Product(Vec<NodeId>),
}

impl NodeKind {
    pub fn children(&self) -> &[NodeId] {
        match self {
            Self::Input => &[],
            Self::Sum(c) | Self::Product(c) => c,
        }
    }

    pub fn role(&self) -> &'static str {
        match self {
            Self::Input => "input",
            Self::Sum(_) => "sum",
            Self::Product(_) => "product",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CausalNode {
    pub key: NodeKey,
    pub kind: NodeKind,
    pub prior: Option<PriorId>,
}

/// Raw description of a graph, validated by [`CausalGraph::from_parts`].
///
/// Node roles are given as index lists into `keys`, the same way an upstream
/// tool would emit them; overlapping or missing roles are rejected.
#[derive(Debug, Clone, Default)]
pub struct GraphParts {
    pub name: String,
    pub keys: Vec<NodeKey>,
    pub inputs: Vec<usize>,
    pub sums: Vec<(usize, Vec<usize>)>,
    pub products: Vec<(usize, Vec<usize>)>,
    pub priors: Vec<Categorical01>,
    /// `(node, prior)` index pairs.
    pub node_priors: Vec<(usize, usize)>,
}

/// Compiled causal DAG.
#[derive(Debug, Clone, PartialEq)]
pub struct CausalGraph {
    name: String,
    nodes: Vec<CausalNode>,
    index: HashMap<NodeKey, NodeId>,
    priors: Vec<Categorical01>,
}

impl CausalGraph {
    /// Validate and assemble a graph.
    ///
    /// Fails when a node has more than one role or none, a child or prior
    /// index is out of range, a node lists itself, a key repeats, or the
    /// result is cyclic. Duplicate children are collapsed keeping order.
    pub fn from_parts(parts: GraphParts) -> GraphResult<Self> {
        let n = parts.keys.len();
        let label = |i: usize| -> String {
            parts
                .keys
                .get(i)
                .map(|k| k.to_string())
                .unwrap_or_else(|| format!("#{i}"))
        };

        let mut index = HashMap::with_capacity(n);
        for (i, key) in parts.keys.iter().enumerate() {
            if index.insert(key.clone(), NodeId(i as u32)).is_some() {
                return Err(GraphError::DuplicateKey {
                    key: key.to_string(),
                });
            }
        }

        let mut kinds: Vec<Option<NodeKind>> = vec![None; n];
        let mut assign = |node: usize, kind: NodeKind| -> GraphResult<()> {
            let slot = kinds.get_mut(node).ok_or_else(|| GraphError::UnknownNode {
                key: format!("#{node}"),
            })?;
            if let Some(existing) = slot {
                return Err(GraphError::OverlappedNode {
                    node: label(node),
                    first: existing.role(),
                    second: kind.role(),
                });
            }
            *slot = Some(kind);
            Ok(())
        };

        let dedup = |node: usize, children: &[usize]| -> GraphResult<Vec<NodeId>> {
            let mut seen = HashSet::new();
            let mut out = Vec::with_capacity(children.len());
            for &c in children {
                if c >= n {
                    return Err(GraphError::UnknownChild {
                        node: label(node),
                        child: c,
                    });
                }
                if c == node {
                    return Err(GraphError::SelfReference { node: label(node) });
                }
                if seen.insert(c) {
                    out.push(NodeId(c as u32));
                }
            }
            Ok(out)
        };

        for &i in &parts.inputs {
            assign(i, NodeKind::Input)?;
        }
        for (head, children) in &parts.sums {
            let children = dedup(*head, children)?;
            assign(*head, NodeKind::Sum(children))?;
        }
        for (head, children) in &parts.products {
            let children = dedup(*head, children)?;
            assign(*head, NodeKind::Product(children))?;
        }

        let mut priors_of: Vec<Option<PriorId>> = vec![None; n];
        for &(node, prior) in &parts.node_priors {
            if node >= n || prior >= parts.priors.len() {
                return Err(GraphError::UnknownNode {
                    key: format!("#{node} with prior {prior}"),
                });
            }
            priors_of[node] = Some(PriorId(prior as u32));
        }

        let mut nodes = Vec::with_capacity(n);
        for (i, (key, kind)) in parts.keys.into_iter().zip(kinds).enumerate() {
            let kind = kind.ok_or_else(|| GraphError::OrphanNode {
                node: key.to_string(),
            })?;
            nodes.push(CausalNode {
                key,
                kind,
                prior: priors_of[i],
            });
        }

        let graph = Self {
            name: parts.name,
            nodes,
            index,
            priors: parts.priors,
        };
        graph.topological_order()?;
        Ok(graph)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn node(&self, id: NodeId) -> &CausalNode {
        &self.nodes[id.index()]
    }

    pub fn nodes(&self) -> impl Iterator<Item = (NodeId, &CausalNode)> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (NodeId(i as u32), n))
    }

    pub fn children(&self, id: NodeId) -> &[NodeId] {
        self.nodes[id.index()].kind.children()
    }

    pub fn lookup(&self, key: &NodeKey) -> Option<NodeId> {
        self.index.get(key).copied()
    }

    pub fn lookup_tuple(&self, tuple: &Tuple) -> Option<NodeId> {
        self.lookup(&NodeKey::Tuple(tuple.clone()))
    }

    pub fn priors(&self) -> &[Categorical01] {
        &self.priors
    }

    pub fn prior(&self, id: PriorId) -> &Categorical01 {
        &self.priors[id.index()]
    }

    /// Mutable access for applying solver updates in place.
    pub fn prior_mut(&mut self, id: PriorId) -> &mut Categorical01 {
        &mut self.priors[id.index()]
    }

    pub fn prior_of(&self, node: NodeId) -> Option<&Categorical01> {
        self.nodes[node.index()].prior.map(|p| self.prior(p))
    }

    /// Stochastic Sum/Product nodes: those that need a separate gate variable.
    pub fn is_gated(&self, node: NodeId) -> bool {
        let n = &self.nodes[node.index()];
        n.prior.is_some() && !matches!(n.kind, NodeKind::Input)
    }

    /// Number of live nodes referencing each prior.
    pub fn prior_uses(&self) -> Vec<usize> {
        let mut uses = vec![0; self.priors.len()];
        for n in &self.nodes {
            if let Some(p) = n.prior {
                uses[p.index()] += 1;
            }
        }
        uses
    }

    /// Nodes listing each node as a child.
    pub fn consumers(&self) -> Vec<Vec<NodeId>> {
        let mut out = vec![Vec::new(); self.nodes.len()];
        for (id, node) in self.nodes() {
            for &c in node.kind.children() {
                out[c.index()].push(id);
            }
        }
        out
    }

    /// Children-before-parents order; fails on a cycle.
    pub fn topological_order(&self) -> GraphResult<Vec<NodeId>> {
        let mut g: DiGraph<(), ()> = DiGraph::with_capacity(self.nodes.len(), 0);
        for _ in &self.nodes {
            g.add_node(());
        }
        for (id, node) in self.nodes() {
            for &c in node.kind.children() {
                g.add_edge(NodeIndex::new(c.index()), NodeIndex::new(id.index()), ());
            }
        }
        toposort(&g, None)
            .map(|order| order.into_iter().map(|ix| NodeId(ix.index() as u32)).collect())
            .map_err(|cycle| GraphError::Cycle {
                node: self.nodes[cycle.node_id().index()].key.to_string(),
            })
    }

    /// Assemble without validation; callers guarantee well-formedness.
    pub(crate) fn from_validated(
        name: String,
        nodes: Vec<CausalNode>,
        priors: Vec<Categorical01>,
    ) -> Self {
        let index = nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.key.clone(), NodeId(i as u32)))
            .collect();
        Self {
            name,
            nodes,
            index,
            priors,
        }
    }
}
