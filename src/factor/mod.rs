//! Bounded-arity factor-graph encoding of a causal graph.
//!
//! Variable ids are laid out as
//!
//! ```text
//! [priors][copy 0: nodes | gates | phonies][copy 1: ...]...
//! ```
//!
//! Every copy shares the prior variables, so observing several traces (one per
//! copy) lets the solver learn the shared parameters. Copy 0 is the one queried
//! for predictions.
//!
//! No emitted factor references more than `clause_limit + 1` variables. A node
//! whose child list is longer than its budget has its last `clause_limit`
//! children peeled into a phony OR/AND node, repeatedly, until it fits.

pub mod file;

use crate::causal::{CausalGraph, NodeId, NodeKind, PriorId};
use crate::error::{EncodeError, EncodeResult};
use crate::prior::Categorical01;

use self::file::{FactorBlock, FactorGraph};

/// Default arity budget: `2^(15+1)` table rows per factor.
pub const DEFAULT_CLAUSE_LIMIT: usize = 15;

/// Largest accepted clause limit; logic tables grow as `2^clause_limit`.
pub const MAX_CLAUSE_LIMIT: usize = 20;

/// A Boolean variable referenced by a node or phony factor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Var {
    Node(NodeId),
    Phony(usize),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Logic {
    Or,
    And,
}

impl Logic {
    /// Truth value over `k` children whose states are the bits of `rep`.
    pub fn eval(self, rep: usize, k: usize) -> bool {
        match self {
            Self::Or => rep != 0,
            Self::And => rep == (1usize << k) - 1,
        }
    }
}

/// Synthetic node standing for OR/AND over exactly `clause_limit` children.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Phony {
    pub logic: Logic,
    pub owner: NodeId,
    pub children: Vec<Var>,
}

/// Result of arity decomposition, computed once and reused by every copy.
#[derive(Debug, Clone, Default)]
pub struct Decomposition {
    /// Per node, the children its own factor references.
    pub children: Vec<Vec<Var>>,
    /// Phonies in creation order; those of one node are contiguous.
    pub phonies: Vec<Phony>,
}

/// Variable numbering for one encoding.
#[derive(Debug, Clone)]
pub struct Layout {
    pub num_priors: usize,
    pub num_nodes: usize,
    /// Gated Sum/Product nodes, in arena order.
    pub gates: Vec<NodeId>,
    gate_index: Vec<Option<usize>>,
    pub decomposition: Decomposition,
    /// Number of copies (1 + repetitions).
    pub copies: usize,
}

impl Layout {
    /// Variables per copy.
    pub fn shift(&self) -> usize {
        self.num_nodes + self.gates.len() + self.decomposition.phonies.len()
    }

    fn base(&self, copy: usize) -> usize {
        self.num_priors + copy * self.shift()
    }

    pub fn prior_var(&self, prior: PriorId) -> usize {
        prior.index()
    }

    pub fn node_var(&self, copy: usize, node: NodeId) -> usize {
        self.base(copy) + node.index()
    }

    pub fn gate_var(&self, copy: usize, node: NodeId) -> Option<usize> {
        self.gate_index[node.index()].map(|g| self.base(copy) + self.num_nodes + g)
    }

    pub fn phony_var(&self, copy: usize, phony: usize) -> usize {
        self.base(copy) + self.num_nodes + self.gates.len() + phony
    }

    pub fn var(&self, copy: usize, v: Var) -> usize {
        match v {
            Var::Node(n) => self.node_var(copy, n),
            Var::Phony(p) => self.phony_var(copy, p),
        }
    }

    /// Inverse of [`node_var`](Self::node_var).
    pub fn node_of_var(&self, var: usize) -> Option<(usize, NodeId)> {
        let shift = self.shift();
        if var < self.num_priors || shift == 0 {
            return None;
        }
        let rel = var - self.num_priors;
        let (copy, offset) = (rel / shift, rel % shift);
        (copy < self.copies && offset < self.num_nodes).then(|| (copy, NodeId(offset as u32)))
    }

    pub fn total_vars(&self) -> usize {
        self.num_priors + self.copies * self.shift()
    }

    /// One factor per prior plus one per variable of every copy.
    pub fn factor_count(&self) -> usize {
        self.num_priors + self.copies * self.shift()
    }
}

/// An encoded factor graph with the layout needed to decode solver output.
#[derive(Debug, Clone)]
pub struct Encoded {
    pub layout: Layout,
    pub graph: FactorGraph,
}

#[derive(Debug, Clone)]
pub struct FactorEncoder {
    clause_limit: usize,
}

impl Default for FactorEncoder {
    fn default() -> Self {
        Self {
            clause_limit: DEFAULT_CLAUSE_LIMIT,
        }
    }
}

impl FactorEncoder {
    pub fn new(clause_limit: usize) -> EncodeResult<Self> {
        if !(2..=MAX_CLAUSE_LIMIT).contains(&clause_limit) {
            return Err(EncodeError::InvalidClauseLimit {
                limit: clause_limit,
            });
        }
        Ok(Self { clause_limit })
    }

    pub fn clause_limit(&self) -> usize {
        self.clause_limit
    }

    /// Split over-wide nodes into phony chains.
    pub fn decompose(&self, graph: &CausalGraph) -> Decomposition {
        let limit = self.clause_limit;
        let mut out = Decomposition::default();
        for (id, node) in graph.nodes() {
            let logic = match node.kind {
                NodeKind::Input => {
                    out.children.push(Vec::new());
                    continue;
                }
                NodeKind::Sum(_) => Logic::Or,
                NodeKind::Product(_) => Logic::And,
            };
            // The gate takes one slot of a gated node's own factor.
            let budget = if graph.is_gated(id) { limit - 1 } else { limit };
            let mut children: Vec<Var> = node.kind.children().iter().map(|&c| Var::Node(c)).collect();
            while children.len() > budget {
                let tail = children.split_off(children.len() - limit);
                out.phonies.push(Phony {
                    logic,
                    owner: id,
                    children: tail,
                });
                children.push(Var::Phony(out.phonies.len() - 1));
            }
            out.children.push(children);
        }
        if !out.phonies.is_empty() {
            tracing::debug!(phonies = out.phonies.len(), limit, "arity decomposition");
        }
        out
    }

    /// Variable layout for `repeats + 1` copies.
    pub fn layout(&self, graph: &CausalGraph, repeats: usize) -> Layout {
        let mut gates = Vec::new();
        let mut gate_index = vec![None; graph.len()];
        for (id, _) in graph.nodes() {
            if graph.is_gated(id) {
                gate_index[id.index()] = Some(gates.len());
                gates.push(id);
            }
        }
        Layout {
            num_priors: graph.priors().len(),
            num_nodes: graph.len(),
            gates,
            gate_index,
            decomposition: self.decompose(graph),
            copies: repeats + 1,
        }
    }

    /// Encode the graph with `repeats` extra copies for observation traces.
    pub fn encode(&self, graph: &CausalGraph, repeats: usize) -> EncodeResult<Encoded> {
        let layout = self.layout(graph, repeats);
        let mut factors = Vec::with_capacity(layout.factor_count());

        for (i, prior) in graph.priors().iter().enumerate() {
            factors.push(FactorBlock {
                vars: vec![layout.prior_var(PriorId(i as u32))],
                cards: vec![prior.len()],
                entries: prior
                    .probs()
                    .iter()
                    .enumerate()
                    .filter(|(_, w)| **w > 0.0)
                    .map(|(j, w)| (j, *w))
                    .collect(),
            });
        }

        for copy in 0..layout.copies {
            let mut phony_cursor = 0;
            for (id, node) in graph.nodes() {
                let self_var = layout.node_var(copy, id);
                let prior = node.prior;

                if let NodeKind::Input = node.kind {
                    factors.push(match prior {
                        Some(p) => bernoulli(self_var, layout.prior_var(p), graph.prior(p)),
                        None => FactorBlock {
                            vars: vec![self_var],
                            cards: vec![2],
                            entries: vec![(1, 1.0)],
                        },
                    });
                    continue;
                }

                let gate = layout.gate_var(copy, id);
                if let (Some(g), Some(p)) = (gate, prior) {
                    factors.push(bernoulli(g, layout.prior_var(p), graph.prior(p)));
                }

                while let Some(phony) = layout.decomposition.phonies.get(phony_cursor) {
                    if phony.owner != id {
                        break;
                    }
                    let vars = std::iter::once(layout.phony_var(copy, phony_cursor))
                        .chain(phony.children.iter().map(|&c| layout.var(copy, c)))
                        .collect();
                    factors.push(self.check(logic_factor(vars, None, phony.logic), graph, id)?);
                    phony_cursor += 1;
                }

                let logic = if matches!(node.kind, NodeKind::Sum(_)) {
                    Logic::Or
                } else {
                    Logic::And
                };
                let children: Vec<usize> = layout.decomposition.children[id.index()]
                    .iter()
                    .map(|&c| layout.var(copy, c))
                    .collect();
                let mut vars = vec![self_var];
                vars.extend(gate);
                vars.extend(children);
                factors.push(self.check(logic_factor(vars, gate, logic), graph, id)?);
            }
            debug_assert_eq!(phony_cursor, layout.decomposition.phonies.len());
        }

        if factors.len() != layout.factor_count() {
            return Err(EncodeError::FactorCountMismatch {
                expected: layout.factor_count(),
                actual: factors.len(),
            });
        }
        tracing::debug!(
            factors = factors.len(),
            vars = layout.total_vars(),
            copies = layout.copies,
            "factor graph encoded"
        );
        Ok(Encoded {
            layout,
            graph: FactorGraph { factors },
        })
    }

    fn check(&self, block: FactorBlock, graph: &CausalGraph, owner: NodeId) -> EncodeResult<FactorBlock> {
        if block.vars.len() > self.clause_limit + 1 {
            return Err(EncodeError::ArityOverflow {
                node: graph.node(owner).key.to_string(),
                arity: block.vars.len(),
                limit: self.clause_limit + 1,
            });
        }
        Ok(block)
    }
}

/// `P(var = 1 | prior = j) = s_j` over `[var, prior]`.
fn bernoulli(var: usize, prior_var: usize, prior: &Categorical01) -> FactorBlock {
    let mut entries = Vec::with_capacity(prior.len() * 2);
    for (j, &s) in prior.supports().iter().enumerate() {
        if s < 1.0 {
            entries.push((2 * j, 1.0 - s));
        }
        if s > 0.0 {
            entries.push((2 * j + 1, s));
        }
    }
    FactorBlock {
        vars: vec![var, prior_var],
        cards: vec![2, prior.len()],
        entries,
    }
}

/// Deterministic table over `[self, gate?, children...]`.
///
/// Ungated: `self = logic(children)`. Gated: `self = gate ∧ logic(children)`.
fn logic_factor(vars: Vec<usize>, gate: Option<usize>, logic: Logic) -> FactorBlock {
    let k = vars.len() - 1 - usize::from(gate.is_some());
    let mut entries = Vec::with_capacity(if gate.is_some() { 2 << k } else { 1 << k });
    for rep in 0..(1usize << k) {
        let value = usize::from(logic.eval(rep, k));
        if gate.is_some() {
            entries.push((rep * 4, 1.0));
            entries.push((rep * 4 + 2 + value, 1.0));
        } else {
            entries.push((rep * 2 + value, 1.0));
        }
    }
    FactorBlock {
        cards: vec![2; vars.len()],
        vars,
        entries,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::{GraphParts, NodeKey};
    use crate::tuple::Tuple;

    fn key(name: &str) -> NodeKey {
        NodeKey::Tuple(Tuple::atom(name))
    }

    /// o :- i, with prior 0.9 on i and 0.99 on the clause.
    fn chain() -> CausalGraph {
        CausalGraph::from_parts(GraphParts {
            name: "chain".into(),
            keys: vec![key("o"), NodeKey::Clause(0), key("i")],
            inputs: vec![2],
            sums: vec![(0, vec![1])],
            products: vec![(1, vec![2])],
            priors: vec![
                Categorical01::point(0.9).unwrap(),
                Categorical01::point(0.99).unwrap(),
            ],
            node_priors: vec![(2, 0), (1, 1)],
        })
        .unwrap()
    }

    /// Sum or product over `n` constant-true inputs.
    fn wide(n: usize, sum: bool, gated: bool) -> CausalGraph {
        let mut keys = vec![key("h")];
        keys.extend((0..n).map(|i| key(&format!("c{i}"))));
        let children: Vec<usize> = (1..=n).collect();
        CausalGraph::from_parts(GraphParts {
            name: "wide".into(),
            keys,
            inputs: children.clone(),
            sums: if sum { vec![(0, children.clone())] } else { vec![] },
            products: if sum { vec![] } else { vec![(0, children)] },
            priors: if gated {
                vec![Categorical01::point(0.5).unwrap()]
            } else {
                vec![]
            },
            node_priors: if gated { vec![(0, 0)] } else { vec![] },
        })
        .unwrap()
    }

    #[test]
    fn clause_limit_must_be_at_least_two() {
        assert!(FactorEncoder::new(1).is_err());
        assert!(FactorEncoder::new(2).is_ok());
    }

    #[test]
    fn clause_limit_is_capped() {
        assert!(FactorEncoder::new(MAX_CLAUSE_LIMIT).is_ok());
        for limit in [MAX_CLAUSE_LIMIT + 1, 40, 64] {
            assert!(matches!(
                FactorEncoder::new(limit),
                Err(EncodeError::InvalidClauseLimit { limit: l }) if l == limit
            ));
        }
        assert_eq!(FactorEncoder::default().clause_limit(), DEFAULT_CLAUSE_LIMIT);
    }

    #[test]
    fn chain_layout_and_factor_count() {
        let g = chain();
        let enc = FactorEncoder::default().encode(&g, 0).unwrap();
        let l = &enc.layout;
        assert_eq!(l.num_priors, 2);
        assert_eq!(l.gates, vec![NodeId(1)]);
        assert_eq!(l.shift(), 4);
        assert_eq!(enc.graph.factors.len(), 2 + 4);
        assert_eq!(l.node_var(0, NodeId(0)), 2);
        assert_eq!(l.gate_var(0, NodeId(1)), Some(5));
        assert_eq!(l.gate_var(0, NodeId(0)), None);
        assert_eq!(l.node_of_var(4), Some((0, NodeId(2))));
        assert_eq!(l.node_of_var(5), None);
        assert_eq!(l.node_of_var(1), None);
    }

    #[test]
    fn repeats_add_copies() {
        let g = chain();
        let enc = FactorEncoder::default().encode(&g, 2).unwrap();
        assert_eq!(enc.layout.copies, 3);
        assert_eq!(enc.graph.factors.len(), 2 + 3 * 4);
        assert_eq!(enc.layout.node_var(2, NodeId(0)), 2 + 2 * 4);
        assert_eq!(enc.layout.node_of_var(10), Some((2, NodeId(0))));
    }

    #[test]
    fn gated_product_table() {
        let g = chain();
        let enc = FactorEncoder::default().encode(&g, 0).unwrap();
        // factors: 2 priors, o, gate(D0), D0, i
        let d0 = &enc.graph.factors[4];
        assert_eq!(d0.vars, vec![3, 5, 4]);
        // rep 0 (i false): gate 0 -> 0; gate 1 -> self 0
        // rep 1 (i true):  gate 0 -> 4; gate 1 -> self 1
        assert_eq!(d0.entries, vec![(0, 1.0), (2, 1.0), (4, 1.0), (7, 1.0)]);
        let gate = &enc.graph.factors[3];
        assert_eq!(gate.vars, vec![5, 1]);
        assert_eq!(gate.cards, vec![2, 1]);
        let input = &enc.graph.factors[5];
        assert_eq!(input.vars, vec![4, 0]);
        assert!((input.value(&[1, 0]) - 0.9).abs() < 1e-12);
        assert!((input.value(&[0, 0]) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn wide_nodes_respect_the_arity_budget() {
        for &(n, limit, gated) in &[(40, 15, false), (40, 15, true), (7, 2, true), (16, 15, false)] {
            let g = wide(n, true, gated);
            let enc = FactorEncoder::new(limit).unwrap().encode(&g, 1).unwrap();
            for f in &enc.graph.factors {
                assert!(f.vars.len() <= limit + 1, "{n}/{limit}/{gated}: {}", f.vars.len());
            }
            for p in &enc.layout.decomposition.phonies {
                assert_eq!(p.children.len(), limit);
            }
            assert_eq!(enc.graph.factors.len(), enc.layout.factor_count());
        }
    }

    #[test]
    fn narrow_nodes_have_no_phonies() {
        let g = wide(15, false, false);
        let d = FactorEncoder::default().decompose(&g);
        assert!(d.phonies.is_empty());
        let g = wide(15, false, true);
        let d = FactorEncoder::default().decompose(&g);
        assert_eq!(d.phonies.len(), 1);
    }

    #[test]
    fn logic_eval() {
        assert!(!Logic::Or.eval(0, 3));
        assert!(Logic::Or.eval(4, 3));
        assert!(Logic::And.eval(7, 3));
        assert!(!Logic::And.eval(6, 3));
        assert!(Logic::And.eval(0, 0));
        assert!(!Logic::Or.eval(0, 0));
    }
}
