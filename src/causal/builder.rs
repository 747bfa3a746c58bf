//! Compile a pruned [`Provenance`] into a [`CausalGraph`].
//!
//! Each tuple becomes one node: inputs become `Input`, every active head a
//! `Sum` over one `Product` per clause deriving it. Clause and input priors
//! come from caller-supplied functions; a prior may be private to its node or
//! tied to a key so that all nodes returning the same key share one parameter.

use std::collections::{BTreeMap, HashMap};

use crate::causal::{CausalGraph, GraphParts, NodeKey};
use crate::error::GraphResult;
use crate::prior::Categorical01;
use crate::provenance::Provenance;
use crate::tuple::{Tuple, TupleKind};

/// A prior assigned to one node.
#[derive(Debug, Clone, PartialEq)]
pub enum Prior {
    /// Private to the node.
    Own(Categorical01),
    /// Shared by every node assigned the same key; the first distribution seen wins.
    Tied { key: String, dist: Categorical01 },
}

/// Priors tied per rule name and per input relation.
#[derive(Debug, Clone, Default)]
pub struct TiedPriors {
    pub rules: BTreeMap<String, Categorical01>,
    pub relations: BTreeMap<String, Categorical01>,
}

impl TiedPriors {
    pub fn clause_prior(&self, rule: &str) -> Option<Prior> {
        self.rules.get(rule).map(|dist| Prior::Tied {
            key: format!("rule:{rule}"),
            dist: dist.clone(),
        })
    }

    pub fn input_prior(&self, tuple: &Tuple) -> Option<Prior> {
        self.relations.get(&tuple.relation).map(|dist| Prior::Tied {
            key: format!("relation:{}", tuple.relation),
            dist: dist.clone(),
        })
    }
}

#[derive(Default)]
struct PriorTable {
    priors: Vec<Categorical01>,
    tied: HashMap<String, usize>,
}

impl PriorTable {
    fn add(&mut self, prior: Prior) -> usize {
        match prior {
            Prior::Own(dist) => {
                self.priors.push(dist);
                self.priors.len() - 1
            }
            Prior::Tied { key, dist } => *self.tied.entry(key).or_insert_with(|| {
                self.priors.push(dist);
                self.priors.len() - 1
            }),
        }
    }
}

pub struct CausalGraphBuilder<'a> {
    provenance: &'a Provenance,
    name: String,
}

impl<'a> CausalGraphBuilder<'a> {
    pub fn new(provenance: &'a Provenance, name: impl Into<String>) -> Self {
        Self {
            provenance,
            name: name.into(),
        }
    }

    /// Build the graph.
    ///
    /// `clause_prior(rule, head)` and `input_prior(tuple)` choose the prior of
    /// each clause body and each input; `None` means deterministic.
    pub fn build<F, G>(&self, mut clause_prior: F, mut input_prior: G) -> GraphResult<CausalGraph>
    where
        F: FnMut(&str, &Tuple) -> Option<Prior>,
        G: FnMut(&Tuple) -> Option<Prior>,
    {
        let prov = self.provenance;
        let n_tuples = prov.tuples().len();
        let mut parts = GraphParts {
            name: self.name.clone(),
            ..Default::default()
        };
        let mut table = PriorTable::default();

        // Tuples occupy nodes [0, n_tuples); clause bodies follow.
        let mut derivations: Vec<Vec<usize>> = vec![Vec::new(); n_tuples];
        for (k, clause) in prov.clauses().iter().enumerate() {
            derivations[clause.head.index()].push(n_tuples + k);
        }

        for (id, tuple) in prov.tuples().iter() {
            parts.keys.push(NodeKey::Tuple(tuple.clone()));
            let node = id.index();
            if prov.kind(id) == TupleKind::Input {
                parts.inputs.push(node);
                if let Some(p) = input_prior(tuple) {
                    parts.node_priors.push((node, table.add(p)));
                }
            } else if derivations[node].is_empty() {
                tracing::warn!(tuple = %tuple, "tuple has no derivation, treating as always false");
                parts.inputs.push(node);
                let never = Prior::Own(Categorical01::never());
                parts.node_priors.push((node, table.add(never)));
            } else {
                parts.sums.push((node, std::mem::take(&mut derivations[node])));
            }
        }

        for (k, clause) in prov.clauses().iter().enumerate() {
            let node = n_tuples + k;
            parts.keys.push(NodeKey::Clause(k));
            parts
                .products
                .push((node, clause.body.iter().map(|b| b.index()).collect()));
            let rule = prov.rule_name(clause.rule);
            if let Some(p) = clause_prior(rule, prov.tuple(clause.head)) {
                parts.node_priors.push((node, table.add(p)));
            }
        }

        parts.priors = table.priors;
        let graph = CausalGraph::from_parts(parts)?;
        tracing::info!(
            name = graph.name(),
            nodes = graph.len(),
            priors = graph.priors().len(),
            "causal graph built"
        );
        Ok(graph)
    }

    /// Build with priors looked up from a [`TiedPriors`] table.
    pub fn build_tied(&self, priors: &TiedPriors) -> GraphResult<CausalGraph> {
        self.build(|rule, _| priors.clause_prior(rule), |t| priors.input_prior(t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::causal::{NodeId, NodeKind};
    use crate::constraint::{Constraint, ConstraintSet};
    use crate::provenance::ProvenancePruner;

    fn t(name: &str) -> Tuple {
        Tuple::atom(name)
    }

    fn prune(clauses: &[(&str, &[&str])], inputs: &[&str], outputs: &[&str]) -> Provenance {
        let mut set = ConstraintSet::new();
        for (head, body) in clauses {
            set.insert(&Constraint::new(
                format!("R_{head}"),
                t(head),
                body.iter().map(|b| t(b)).collect(),
            ));
        }
        let inputs: Vec<Tuple> = inputs.iter().map(|n| t(n)).collect();
        let outputs: Vec<Tuple> = outputs.iter().map(|n| t(n)).collect();
        ProvenancePruner::new(&set, &inputs, &outputs).prune()
    }

    #[test]
    fn every_node_has_exactly_one_role() {
        let prov = prune(&[("h", &["i", "j"]), ("h", &["i"]), ("o", &["h"])], &["i", "j"], &["o"]);
        let g = CausalGraphBuilder::new(&prov, "g").build(|_, _| None, |_| None).unwrap();
        // 4 tuples + 3 clauses.
        assert_eq!(g.len(), 7);
        let h = g.lookup_tuple(&t("h")).unwrap();
        match &g.node(h).kind {
            NodeKind::Sum(children) => {
                assert_eq!(children.len(), 2);
                for c in children {
                    assert!(matches!(g.node(*c).kind, NodeKind::Product(_)));
                    assert!(matches!(g.node(*c).key, NodeKey::Clause(_)));
                }
            }
            other => panic!("expected sum, got {other:?}"),
        }
        let i = g.lookup_tuple(&t("i")).unwrap();
        assert_eq!(g.node(i).kind, NodeKind::Input);
    }

    #[test]
    fn sum_children_are_the_clauses_sharing_its_head() {
        let prov = prune(&[("h", &["i"]), ("h", &["j"]), ("o", &["h"])], &["i", "j"], &["o"]);
        let g = CausalGraphBuilder::new(&prov, "g").build(|_, _| None, |_| None).unwrap();
        let h = g.lookup_tuple(&t("h")).unwrap();
        let mut expected: Vec<NodeId> = prov
            .clauses()
            .iter()
            .enumerate()
            .filter(|(_, c)| prov.tuple(c.head) == &t("h"))
            .map(|(k, _)| g.lookup(&NodeKey::Clause(k)).unwrap())
            .collect();
        let mut got = g.children(h).to_vec();
        expected.sort();
        got.sort();
        assert_eq!(got, expected);
    }

    #[test]
    fn tied_priors_share_one_parameter() {
        let prov = prune(&[("a", &["i"]), ("b", &["j"]), ("o", &["a", "b"])], &["i", "j"], &["o"]);
        let mut tied = TiedPriors::default();
        tied.relations
            .insert("i".into(), Categorical01::uniform(&[0.2, 0.8]).unwrap());
        tied.relations
            .insert("j".into(), Categorical01::uniform(&[0.2, 0.8]).unwrap());
        let rule_prior = Categorical01::point(0.9).unwrap();
        let g = CausalGraphBuilder::new(&prov, "g")
            .build(
                |_, _| {
                    Some(Prior::Tied {
                        key: "all".into(),
                        dist: rule_prior.clone(),
                    })
                },
                |tuple| tied.input_prior(tuple),
            )
            .unwrap();
        // one shared clause prior + one per input relation
        assert_eq!(g.priors().len(), 3);
        let uses = g.prior_uses();
        assert_eq!(uses.iter().sum::<usize>(), 5);
        assert!(uses.contains(&3));
    }

    #[test]
    fn own_priors_are_private() {
        let prov = prune(&[("a", &["i"]), ("o", &["a"])], &["i"], &["o"]);
        let g = CausalGraphBuilder::new(&prov, "g")
            .build(
                |_, _| Some(Prior::Own(Categorical01::point(0.5).unwrap())),
                |_| None,
            )
            .unwrap();
        assert_eq!(g.priors().len(), 2);
        assert_eq!(g.prior_uses(), vec![1, 1]);
    }
}
