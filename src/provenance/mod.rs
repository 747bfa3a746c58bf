//! Provenance pruning: from a cyclic derivation to an acyclic justification.
//!
//! [`ProvenancePruner`] takes every rule instance produced upstream together
//! with the input (axiom) and output (observed) tuples and keeps only the
//! clauses that (1) are consistent with the DOB order or could be re-admitted
//! without closing a cycle, and (2) help justify some output. The result is a
//! [`Provenance`]: the active clause set over a compact tuple table with
//! stable `I<k>` / `O<k>` / `H<k>` tags and `D<k>` clause tags.

pub mod dob;

use std::collections::HashSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::constraint::{ConstraintId, ConstraintSet, RuleId};
use crate::error::{ProvenanceError, ProvenanceResult};
use crate::tuple::{Tuple, TupleId, TupleKind, TupleStore};

use self::dob::{Augmenter, DobAnalysis};

// ---------------------------------------------------------------------------
// Pruning result
// ---------------------------------------------------------------------------

/// One active clause of the pruned derivation, over the provenance's own tuple ids.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveClause {
    /// Id of the clause in the originating [`ConstraintSet`].
    pub source: ConstraintId,
    pub head: TupleId,
    pub body: Vec<TupleId>,
    pub rule: RuleId,
}

/// Counters describing one pruning run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PruneStats {
    pub tuples: usize,
    pub clauses: usize,
    pub forward: usize,
    pub augmented: usize,
    pub rejected: usize,
    pub active_clauses: usize,
    pub active_tuples: usize,
    /// Clauses dropped for referencing undeclared tuples.
    pub dropped: usize,
}

/// The active clause set: acyclic, goal-justifying, with readable tags.
#[derive(Debug, Clone)]
pub struct Provenance {
    tuples: TupleStore,
    kinds: Vec<TupleKind>,
    /// Position of each tuple within its kind's list (the number in its tag).
    tag_index: Vec<usize>,
    inputs: Vec<TupleId>,
    outputs: Vec<TupleId>,
    hidden: Vec<TupleId>,
    clauses: Vec<ActiveClause>,
    rules: Vec<String>,
    stats: PruneStats,
}

impl Provenance {
    pub fn tuples(&self) -> &TupleStore {
        &self.tuples
    }

    pub fn tuple(&self, id: TupleId) -> &Tuple {
        self.tuples.get(id)
    }

    pub fn kind(&self, id: TupleId) -> TupleKind {
        self.kinds[id.index()]
    }

    /// Stable debugging tag such as `I0`, `O3` or `H12`.
    pub fn tag(&self, id: TupleId) -> String {
        format!("{}{}", self.kind(id).tag(), self.tag_index[id.index()])
    }

    pub fn inputs(&self) -> &[TupleId] {
        &self.inputs
    }

    /// Observed tuples that survived pruning.
    pub fn outputs(&self) -> &[TupleId] {
        &self.outputs
    }

    pub fn hidden(&self) -> &[TupleId] {
        &self.hidden
    }

    /// Active clauses in source-id order. Position `k` is clause tag `D<k>`.
    pub fn clauses(&self) -> &[ActiveClause] {
        &self.clauses
    }

    pub fn rule_name(&self, rule: RuleId) -> &str {
        &self.rules[rule.0 as usize]
    }

    pub fn stats(&self) -> &PruneStats {
        &self.stats
    }

    /// Resolve a tag (`I0`, `H3`, `D7`, ...) to a readable line.
    pub fn unfold(&self, tag: &str) -> ProvenanceResult<String> {
        let unknown = || ProvenanceError::UnknownTag {
            tag: tag.to_string(),
        };
        let mut chars = tag.chars();
        let prefix = chars.next().ok_or_else(unknown)?;
        let index: usize = chars.as_str().parse().map_err(|_| unknown())?;

        let list = match prefix {
            'I' => &self.inputs,
            'O' => &self.outputs,
            'H' => &self.hidden,
            'D' => {
                let clause = self.clauses.get(index).ok_or_else(unknown)?;
                let body: Vec<String> = clause
                    .body
                    .iter()
                    .map(|&b| self.tuple(b).to_string())
                    .collect();
                return Ok(format!(
                    "{}: {} :- {}",
                    self.rule_name(clause.rule),
                    self.tuple(clause.head),
                    body.join(", ")
                ));
            }
            _ => return Err(unknown()),
        };
        let &id = list
            .iter()
            .find(|&&id| self.tag_index[id.index()] == index && self.tag(id) == tag)
            .ok_or_else(unknown)?;
        Ok(self.tuple(id).to_string())
    }

    /// Write the human-readable dump files into `dir`.
    ///
    /// - `tuple_dict.txt`: `<tag>:\t<tuple>`
    /// - `rule_dict.txt`: `R<i>:\t<rule>`
    /// - `cons_pruned.txt`: `R<rule>-<k>: <head>=<body>,...`
    /// - `base_queries.txt`: one output tag per line
    pub fn dump(&self, dir: &Path) -> ProvenanceResult<()> {
        let mut tuple_dict = String::new();
        for (id, tuple) in self.tuples.iter() {
            tuple_dict.push_str(&format!("{}:\t{}\n", self.tag(id), tuple));
        }

        let mut rule_dict = String::new();
        for (i, rule) in self.rules.iter().enumerate() {
            rule_dict.push_str(&format!("R{i}:\t{rule}\n"));
        }

        let mut cons = String::new();
        for (k, clause) in self.clauses.iter().enumerate() {
            let body: Vec<String> = clause.body.iter().map(|&b| self.tag(b)).collect();
            cons.push_str(&format!(
                "R{}-{}: {}={}\n",
                clause.rule.0,
                k,
                self.tag(clause.head),
                body.join(",")
            ));
        }

        let mut queries = String::new();
        for &o in &self.outputs {
            queries.push_str(&format!("{}\n", self.tag(o)));
        }

        for (name, content) in [
            ("tuple_dict.txt", tuple_dict),
            ("rule_dict.txt", rule_dict),
            ("cons_pruned.txt", cons),
            ("base_queries.txt", queries),
        ] {
            let path = dir.join(name);
            std::fs::write(&path, content).map_err(|e| ProvenanceError::DumpWrite {
                path: path.display().to_string(),
                source: e,
            })?;
        }
        tracing::info!(dir = %dir.display(), clauses = self.clauses.len(), "provenance dumped");
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Pruner
// ---------------------------------------------------------------------------

/// Reduces a constraint set to its acyclic, output-justifying core.
#[derive(Debug)]
pub struct ProvenancePruner<'a> {
    set: &'a ConstraintSet,
    is_input: Vec<bool>,
    is_output: Vec<bool>,
    outputs: Vec<TupleId>,
    augment: bool,
}

impl<'a> ProvenancePruner<'a> {
    /// Inputs and outputs not mentioned by any clause are ignored; unknown
    /// outputs are logged since nothing can justify them.
    pub fn new<'t>(
        set: &'a ConstraintSet,
        inputs: impl IntoIterator<Item = &'t Tuple>,
        outputs: impl IntoIterator<Item = &'t Tuple>,
    ) -> Self {
        let n = set.tuples().len();
        let mut is_input = vec![false; n];
        for t in inputs {
            if let Some(id) = set.tuples().lookup(t) {
                is_input[id.index()] = true;
            }
        }

        let mut is_output = vec![false; n];
        let mut out = Vec::new();
        for t in outputs {
            match set.tuples().lookup(t) {
                Some(id) => {
                    if !is_output[id.index()] {
                        is_output[id.index()] = true;
                        out.push(id);
                    }
                }
                None => tracing::warn!(tuple = %t, "output tuple has no clauses, skipping"),
            }
        }

        Self {
            set,
            is_input,
            is_output,
            outputs: out,
            augment: true,
        }
    }

    /// Enable or disable greedy augmentation (on by default).
    pub fn with_augmentation(mut self, augment: bool) -> Self {
        self.augment = augment;
        self
    }

    pub fn prune(&self) -> Provenance {
        let set = self.set;
        let dob = DobAnalysis::compute(set, &self.is_input);

        let mut forward = Vec::new();
        let mut candidates = Vec::new();
        for (id, clause) in set.clauses() {
            if self.is_input[clause.head.index()] {
                continue;
            }
            if dob.is_forward(set, id) {
                forward.push(id);
            } else if clause.body.iter().all(|&b| dob.is_derivable(b)) {
                candidates.push(id);
            }
        }

        let mut aug = Augmenter::new(set, &forward);
        if self.augment {
            aug.augment(candidates);
        }

        // Backward from the outputs through accepted clauses.
        let mut visited: HashSet<TupleId> = HashSet::new();
        let mut active: Vec<ConstraintId> = Vec::new();
        let mut stack: Vec<TupleId> = self.outputs.clone();
        visited.extend(self.outputs.iter().copied());
        while let Some(t) = stack.pop() {
            for &c in aug.producers(t) {
                active.push(c);
                for &b in &set.clause(c).body {
                    if visited.insert(b) {
                        stack.push(b);
                    }
                }
            }
        }
        active.sort();

        let stats = PruneStats {
            tuples: set.tuples().len(),
            clauses: set.len(),
            forward: forward.len(),
            augmented: aug.augmented().len(),
            rejected: aug.rejected().len(),
            active_clauses: active.len(),
            active_tuples: 0,
            dropped: set.dropped().len(),
        };
        let prov = self.assemble(&active, stats);
        tracing::info!(
            clauses = prov.stats.clauses,
            forward = prov.stats.forward,
            augmented = prov.stats.augmented,
            rejected = prov.stats.rejected,
            active = prov.stats.active_clauses,
            "provenance pruned"
        );
        prov
    }

    /// Re-index the active clauses over a compact tuple table.
    fn assemble(&self, active: &[ConstraintId], mut stats: PruneStats) -> Provenance {
        let set = self.set;
        let mut tuples = TupleStore::new();
        let mut clauses = Vec::with_capacity(active.len());
        for &id in active {
            let c = set.clause(id);
            let head = tuples.intern(set.tuples().get(c.head).clone());
            let body = c
                .body
                .iter()
                .map(|&b| tuples.intern(set.tuples().get(b).clone()))
                .collect();
            clauses.push(ActiveClause {
                source: id,
                head,
                body,
                rule: c.rule,
            });
        }
        // Observed inputs stay queryable even when nothing consumes them.
        for &o in &self.outputs {
            if self.is_input[o.index()] {
                tuples.intern(set.tuples().get(o).clone());
            }
        }

        let mut kinds = Vec::with_capacity(tuples.len());
        let mut tag_index = Vec::with_capacity(tuples.len());
        let (mut inputs, mut outputs, mut hidden) = (Vec::new(), Vec::new(), Vec::new());
        for (id, tuple) in tuples.iter() {
            let src = set.tuples().lookup(tuple).map(|s| s.index());
            let input = src.is_some_and(|s| self.is_input[s]);
            let output = src.is_some_and(|s| self.is_output[s]);
            let kind = if input {
                TupleKind::Input
            } else if output {
                TupleKind::Output
            } else {
                TupleKind::Hidden
            };
            let list = match kind {
                TupleKind::Input => &mut inputs,
                TupleKind::Output => &mut outputs,
                TupleKind::Hidden => &mut hidden,
            };
            tag_index.push(list.len());
            list.push(id);
            kinds.push(kind);
        }

        // Observed inputs are classified Input but still listed as outputs.
        let observed: Vec<TupleId> = self
            .outputs
            .iter()
            .filter_map(|&o| tuples.lookup(set.tuples().get(o)))
            .collect();

        stats.active_tuples = tuples.len();
        Provenance {
            tuples,
            kinds,
            tag_index,
            inputs,
            outputs: observed,
            hidden,
            clauses,
            rules: set.rules().to_vec(),
            stats,
        }
    }
}
