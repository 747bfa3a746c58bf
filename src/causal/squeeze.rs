//! Graph squeezing: lossless elimination of redundant causal nodes.
//!
//! The squeezer rewrites a [`CausalGraph`] into a smaller one whose marginals
//! over the reserved tuples are unchanged. Eliminations run from a worklist
//! until no rule applies:
//!
//! 1. **Folding**: a non-reserved input feeding exactly one product is
//!    removed and its prior multiplied into the product's gate. Inputs without
//!    a prior are constantly true and simply drop out of every product body.
//! 2. **Merging**: body-less products under one sum collapse into one via
//!    `reverse_multiply`; a sum left with a single body-less product becomes an
//!    input whose prior is the product of both gates, and can fold in turn.
//! 3. **Splicing**: a non-reserved sum with one product and one consuming
//!    product is replaced, in the consumer's body, by that product's body.
//! 4. **Pruning**: non-reserved nodes nobody consumes are removed.
//!
//! Only priors private to the rewritten nodes (or point masses, whose gates are
//! independent) are ever combined; a shared non-degenerate prior correlates
//! its gates and blocks the rewrite.

use std::collections::{BTreeSet, HashSet, VecDeque};

use serde::{Deserialize, Serialize};

use crate::causal::{CausalGraph, CausalNode, NodeId, NodeKey, NodeKind, PriorId};
use crate::prior::Categorical01;
use crate::tuple::Tuple;

/// Counters for one squeeze run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SqueezeStats {
    pub nodes_before: usize,
    pub nodes_after: usize,
    pub folded: usize,
    pub merged: usize,
    pub spliced: usize,
    pub pruned: usize,
}

pub struct GraphSqueezer {
    reserved: HashSet<Tuple>,
}

impl GraphSqueezer {
    pub fn new(reserved: impl IntoIterator<Item = Tuple>) -> Self {
        Self {
            reserved: reserved.into_iter().collect(),
        }
    }

    pub fn squeeze(&self, graph: &CausalGraph) -> (CausalGraph, SqueezeStats) {
        let mut work = Work::new(graph, &self.reserved);
        let mut stats = SqueezeStats {
            nodes_before: graph.len(),
            ..Default::default()
        };
        loop {
            let before = stats.clone();
            work.run(&mut stats);
            if stats == before {
                break;
            }
        }
        let squeezed = work.compact(graph.name());
        stats.nodes_after = squeezed.len();
        tracing::info!(
            before = stats.nodes_before,
            after = stats.nodes_after,
            folded = stats.folded,
            merged = stats.merged,
            spliced = stats.spliced,
            pruned = stats.pruned,
            "causal graph squeezed"
        );
        (squeezed, stats)
    }
}

// ---------------------------------------------------------------------------
// Working state
// ---------------------------------------------------------------------------

struct Work {
    keys: Vec<NodeKey>,
    /// `None` once removed.
    kinds: Vec<Option<NodeKind>>,
    priors: Vec<Option<PriorId>>,
    table: Vec<Categorical01>,
    uses: Vec<usize>,
    consumers: Vec<BTreeSet<NodeId>>,
    reserved: Vec<bool>,
    queue: VecDeque<NodeId>,
    queued: Vec<bool>,
}

impl Work {
    fn new(graph: &CausalGraph, reserved: &HashSet<Tuple>) -> Self {
        let n = graph.len();
        let mut consumers = vec![BTreeSet::new(); n];
        for (id, node) in graph.nodes() {
            for &c in node.kind.children() {
                consumers[c.index()].insert(id);
            }
        }
        Self {
            keys: graph.nodes().map(|(_, n)| n.key.clone()).collect(),
            kinds: graph.nodes().map(|(_, n)| Some(n.kind.clone())).collect(),
            priors: graph.nodes().map(|(_, n)| n.prior).collect(),
            table: graph.priors().to_vec(),
            uses: graph.prior_uses(),
            consumers,
            reserved: graph
                .nodes()
                .map(|(_, n)| matches!(&n.key, NodeKey::Tuple(t) if reserved.contains(t)))
                .collect(),
            queue: VecDeque::new(),
            queued: vec![false; n],
        }
    }

    fn push(&mut self, id: NodeId) {
        if self.kinds[id.index()].is_some() && !self.queued[id.index()] {
            self.queued[id.index()] = true;
            self.queue.push_back(id);
        }
    }

    fn run(&mut self, stats: &mut SqueezeStats) {
        for i in 0..self.kinds.len() {
            self.push(NodeId(i as u32));
        }
        while let Some(id) = self.queue.pop_front() {
            self.queued[id.index()] = false;
            if self.kinds[id.index()].is_none() {
                continue;
            }
            if self.prune_dead(id) {
                stats.pruned += 1;
            } else if self.drop_constant_input(id) || self.fold_input(id) {
                stats.folded += 1;
            } else if self.merge_bodyless(id) || self.sum_to_input(id) {
                stats.merged += 1;
            } else if self.splice(id) {
                stats.spliced += 1;
            }
        }
    }

    // -- helpers ----------------------------------------------------------

    fn kind(&self, id: NodeId) -> Option<&NodeKind> {
        self.kinds[id.index()].as_ref()
    }

    fn is_reserved(&self, id: NodeId) -> bool {
        self.reserved[id.index()]
    }

    fn prior(&self, id: NodeId) -> Option<&Categorical01> {
        self.priors[id.index()].map(|p| &self.table[p.index()])
    }

    /// The node's gate can be rewritten without touching any other node.
    fn exclusive(&self, id: NodeId) -> bool {
        match self.priors[id.index()] {
            None => true,
            Some(p) => self.uses[p.index()] == 1 || self.table[p.index()].is_point(),
        }
    }

    fn sole_consumer(&self, id: NodeId) -> Option<NodeId> {
        let c = &self.consumers[id.index()];
        if c.len() == 1 { c.first().copied() } else { None }
    }

    fn is_product(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Product(_)))
    }

    fn is_bodyless_product(&self, id: NodeId) -> bool {
        matches!(self.kind(id), Some(NodeKind::Product(c)) if c.is_empty())
    }

    fn set_prior(&mut self, id: NodeId, prior: Option<Categorical01>) {
        self.release_prior(id);
        if let Some(dist) = prior {
            self.table.push(dist);
            self.uses.push(1);
            self.priors[id.index()] = Some(PriorId((self.table.len() - 1) as u32));
        }
    }

    fn release_prior(&mut self, id: NodeId) {
        // A prior left with one user may unblock rewrites there; the next full
        // pass in `squeeze` picks those up.
        if let Some(p) = self.priors[id.index()].take() {
            self.uses[p.index()] -= 1;
        }
    }

    /// Remove a node and detach it from its children.
    fn remove(&mut self, id: NodeId) {
        self.release_prior(id);
        if let Some(kind) = self.kinds[id.index()].take() {
            for &c in kind.children() {
                self.consumers[c.index()].remove(&id);
                self.push(c);
            }
        }
    }

    fn children_mut(&mut self, id: NodeId) -> Option<&mut Vec<NodeId>> {
        match self.kinds[id.index()].as_mut() {
            Some(NodeKind::Sum(c)) | Some(NodeKind::Product(c)) => Some(c),
            _ => None,
        }
    }

    fn unlink(&mut self, parent: NodeId, child: NodeId) {
        if let Some(children) = self.children_mut(parent) {
            children.retain(|&c| c != child);
        }
        self.consumers[child.index()].remove(&parent);
    }

    fn push_neighbourhood(&mut self, id: NodeId) {
        self.push(id);
        let consumers: Vec<NodeId> = self.consumers[id.index()].iter().copied().collect();
        for c in consumers {
            self.push(c);
        }
    }

    // -- rules ------------------------------------------------------------

    fn prune_dead(&mut self, id: NodeId) -> bool {
        if self.is_reserved(id) || !self.consumers[id.index()].is_empty() {
            return false;
        }
        self.remove(id);
        true
    }

    /// Constant-true inputs vanish from product bodies.
    fn drop_constant_input(&mut self, id: NodeId) -> bool {
        if self.is_reserved(id)
            || !matches!(self.kind(id), Some(NodeKind::Input))
            || self.priors[id.index()].is_some()
        {
            return false;
        }
        let consumers: Vec<NodeId> = self.consumers[id.index()].iter().copied().collect();
        if consumers.is_empty() || !consumers.iter().all(|&c| self.is_product(c)) {
            return false;
        }
        for c in consumers {
            self.unlink(c, id);
            self.push_neighbourhood(c);
        }
        self.remove(id);
        true
    }

    fn fold_input(&mut self, id: NodeId) -> bool {
        if self.is_reserved(id) || !matches!(self.kind(id), Some(NodeKind::Input)) {
            return false;
        }
        let Some(consumer) = self.sole_consumer(id) else {
            return false;
        };
        if !self.is_product(consumer) || !self.exclusive(id) || !self.exclusive(consumer) {
            return false;
        }
        let folded = Categorical01::multiply_opt(self.prior(consumer), self.prior(id));
        self.set_prior(consumer, folded);
        self.unlink(consumer, id);
        self.remove(id);
        self.push_neighbourhood(consumer);
        true
    }

    /// Body-less products of a sum that nothing else consumes.
    fn private_bodyless(&self, sum: NodeId) -> Vec<NodeId> {
        let Some(NodeKind::Sum(children)) = self.kind(sum) else {
            return Vec::new();
        };
        children
            .iter()
            .copied()
            .filter(|&p| {
                self.is_bodyless_product(p)
                    && self.sole_consumer(p) == Some(sum)
                    && !self.is_reserved(p)
                    && self.exclusive(p)
            })
            .collect()
    }

    fn merge_bodyless(&mut self, sum: NodeId) -> bool {
        let group = self.private_bodyless(sum);
        if group.len() < 2 {
            return false;
        }
        // An ungated alternative is always true, and so is the OR.
        let merged = group.iter().try_fold(None::<Categorical01>, |acc, &p| {
            let dist = self.prior(p)?;
            Some(Some(match acc {
                None => dist.clone(),
                Some(a) => a.reverse_multiply(dist),
            }))
        });
        let keep = group[0];
        self.set_prior(keep, merged.flatten());
        for &p in &group[1..] {
            self.unlink(sum, p);
            self.remove(p);
        }
        self.push_neighbourhood(sum);
        true
    }

    fn sum_to_input(&mut self, sum: NodeId) -> bool {
        let Some(NodeKind::Sum(children)) = self.kind(sum) else {
            return false;
        };
        if children.len() != 1 {
            return false;
        }
        let p = children[0];
        let group = self.private_bodyless(sum);
        if group != [p] || !self.exclusive(sum) {
            return false;
        }
        let prior = Categorical01::multiply_opt(self.prior(sum), self.prior(p));
        self.unlink(sum, p);
        self.remove(p);
        self.kinds[sum.index()] = Some(NodeKind::Input);
        self.set_prior(sum, prior);
        self.push_neighbourhood(sum);
        true
    }

    fn splice(&mut self, sum: NodeId) -> bool {
        if self.is_reserved(sum) {
            return false;
        }
        let Some(NodeKind::Sum(children)) = self.kind(sum) else {
            return false;
        };
        if children.len() != 1 {
            return false;
        }
        let producer = children[0];
        let Some(consumer) = self.sole_consumer(sum) else {
            return false;
        };
        if !self.is_product(producer)
            || self.is_reserved(producer)
            || self.sole_consumer(producer) != Some(sum)
            || !self.is_product(consumer)
            || !self.exclusive(sum)
            || !self.exclusive(producer)
            || !self.exclusive(consumer)
        {
            return false;
        }

        let gate = Categorical01::multiply_opt(self.prior(consumer), self.prior(sum));
        let gate = Categorical01::multiply_opt(gate.as_ref(), self.prior(producer));
        let body: Vec<NodeId> = self.kind(producer).map(|k| k.children().to_vec()).unwrap_or_default();

        if let Some(children) = self.children_mut(consumer) {
            let mut spliced = Vec::with_capacity(children.len() + body.len());
            for &c in children.iter() {
                if c == sum {
                    for &b in &body {
                        if !spliced.contains(&b) && !children.contains(&b) {
                            spliced.push(b);
                        }
                    }
                } else {
                    spliced.push(c);
                }
            }
            *children = spliced;
        }
        for &b in &body {
            self.consumers[b.index()].insert(consumer);
        }
        self.consumers[sum.index()].remove(&consumer);
        self.set_prior(consumer, gate);
        self.remove(sum);
        self.remove(producer);
        self.push_neighbourhood(consumer);
        true
    }

    // -- output -----------------------------------------------------------

    /// Renumber surviving nodes in arena order and keep only referenced priors,
    /// ordered by first reference.
    fn compact(self, name: &str) -> CausalGraph {
        let mut remap: Vec<Option<NodeId>> = vec![None; self.kinds.len()];
        let mut next = 0u32;
        for (i, k) in self.kinds.iter().enumerate() {
            if k.is_some() {
                remap[i] = Some(NodeId(next));
                next += 1;
            }
        }

        let mut prior_remap: Vec<Option<PriorId>> = vec![None; self.table.len()];
        let mut priors = Vec::new();
        let mut nodes = Vec::with_capacity(next as usize);
        for (i, (key, kind)) in self.keys.into_iter().zip(self.kinds).enumerate() {
            let Some(kind) = kind else { continue };
            let map = |c: &NodeId| remap[c.index()].unwrap_or(*c);
            let kind = match kind {
                NodeKind::Input => NodeKind::Input,
                NodeKind::Sum(c) => NodeKind::Sum(c.iter().map(map).collect()),
                NodeKind::Product(c) => NodeKind::Product(c.iter().map(map).collect()),
            };
            let prior = self.priors[i].map(|p| {
                *prior_remap[p.index()].get_or_insert_with(|| {
                    priors.push(self.table[p.index()].clone());
                    PriorId((priors.len() - 1) as u32)
                })
            });
            nodes.push(CausalNode { key, kind, prior });
        }
        CausalGraph::from_validated(name.to_string(), nodes, priors)
    }
}
