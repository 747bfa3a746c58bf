//! Date-of-birth ordering and acyclic augmentation.
//!
//! Every tuple gets an integer "date of birth": inputs are born at 0, every
//! other tuple starts at `max_dob` (the tuple count, standing in for infinity)
//! and is lowered to `1 + max(body dobs)` of its cheapest clause until a
//! fixpoint. A clause is *forward* when its head is born strictly after all of
//! its body tuples; the forward clauses form a DAG by construction.
//!
//! The [`Augmenter`] then greedily re-admits non-forward clauses in batches,
//! accepting a batch only when doing so cannot close a cycle through the
//! clauses accepted so far.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::constraint::{ConstraintId, ConstraintSet};
use crate::tuple::TupleId;

// ---------------------------------------------------------------------------
// DOB fixpoint
// ---------------------------------------------------------------------------

/// Result of the DOB fixpoint over one constraint set.
#[derive(Debug, Clone)]
pub struct DobAnalysis {
    /// DOB per tuple, indexed by `TupleId`.
    pub dob: Vec<usize>,
    /// The "infinity" value: total tuple count.
    pub max_dob: usize,
}

impl DobAnalysis {
    /// Run the fixpoint. `is_input[t]` marks axioms, which are born at 0.
    pub fn compute(set: &ConstraintSet, is_input: &[bool]) -> Self {
        let max_dob = set.tuples().len();
        let mut dob: Vec<usize> = (0..max_dob)
            .map(|t| if is_input[t] { 0 } else { max_dob })
            .collect();

        // Clauses to revisit when one of their body tuples is lowered.
        let mut consumers: HashMap<TupleId, Vec<ConstraintId>> = HashMap::new();
        for (id, clause) in set.clauses() {
            for &b in &clause.body {
                consumers.entry(b).or_default().push(id);
            }
        }

        let mut queued = vec![true; set.len()];
        let mut worklist: VecDeque<ConstraintId> = set.clauses().map(|(id, _)| id).collect();
        let mut rounds = 0usize;

        while let Some(id) = worklist.pop_front() {
            queued[id.index()] = false;
            rounds += 1;
            let clause = set.clause(id);
            if is_input[clause.head.index()] {
                continue;
            }
            let body_max = clause.body.iter().map(|b| dob[b.index()]).max().unwrap_or(0);
            let candidate = if body_max < max_dob { body_max + 1 } else { max_dob };
            if candidate < dob[clause.head.index()] {
                dob[clause.head.index()] = candidate;
                if let Some(next) = consumers.get(&clause.head) {
                    for &c in next {
                        if !queued[c.index()] {
                            queued[c.index()] = true;
                            worklist.push_back(c);
                        }
                    }
                }
            }
        }

        tracing::debug!(tuples = max_dob, clauses = set.len(), rounds, "DOB fixpoint reached");
        Self { dob, max_dob }
    }

    pub fn dob(&self, t: TupleId) -> usize {
        self.dob[t.index()]
    }

    /// Largest body DOB of a clause (0 for an empty body).
    pub fn body_dob(&self, set: &ConstraintSet, id: ConstraintId) -> usize {
        set.clause(id)
            .body
            .iter()
            .map(|b| self.dob(*b))
            .max()
            .unwrap_or(0)
    }

    /// A clause is forward iff its head is born strictly after its body.
    pub fn is_forward(&self, set: &ConstraintSet, id: ConstraintId) -> bool {
        self.dob(set.clause(id).head) > self.body_dob(set, id)
    }

    /// True when the tuple has some derivation from the inputs.
    pub fn is_derivable(&self, t: TupleId) -> bool {
        self.dob(t) < self.max_dob
    }
}

// ---------------------------------------------------------------------------
// Augmentation
// ---------------------------------------------------------------------------

/// Accepted-clause set that only ever grows while staying acyclic.
#[derive(Debug)]
pub struct Augmenter<'a> {
    set: &'a ConstraintSet,
    accepted: HashSet<ConstraintId>,
    /// head tuple → accepted clauses deriving it
    by_head: HashMap<TupleId, Vec<ConstraintId>>,
    /// body tuple → accepted clauses consuming it
    by_body: HashMap<TupleId, Vec<ConstraintId>>,
    augmented: Vec<ConstraintId>,
    rejected: Vec<ConstraintId>,
}

impl<'a> Augmenter<'a> {
    /// Start from an acyclic base (the forward clauses).
    pub fn new(set: &'a ConstraintSet, base: &[ConstraintId]) -> Self {
        let mut aug = Self {
            set,
            accepted: HashSet::new(),
            by_head: HashMap::new(),
            by_body: HashMap::new(),
            augmented: Vec::new(),
            rejected: Vec::new(),
        };
        for &id in base {
            aug.accept(id);
        }
        aug
    }

    fn accept(&mut self, id: ConstraintId) {
        if !self.accepted.insert(id) {
            return;
        }
        let clause = self.set.clause(id);
        self.by_head.entry(clause.head).or_default().push(id);
        for &b in &clause.body {
            self.by_body.entry(b).or_default().push(id);
        }
    }

    /// Try to admit `candidates`, bisecting batches that would close a cycle.
    ///
    /// Batches are processed from an explicit stack, left half first, so each
    /// right half is tested against everything its left sibling admitted. A
    /// singleton that fails the test is rejected exactly once.
    pub fn augment(&mut self, candidates: Vec<ConstraintId>) {
        let mut stack: Vec<Vec<ConstraintId>> = vec![candidates];
        while let Some(mut batch) = stack.pop() {
            if batch.is_empty() {
                continue;
            }
            if self.is_ancestor_descendant_disjoint(&batch) {
                for &id in &batch {
                    self.accept(id);
                    self.augmented.push(id);
                }
            } else if batch.len() == 1 {
                self.rejected.push(batch[0]);
            } else {
                let right = batch.split_off(batch.len() / 2);
                stack.push(right);
                stack.push(batch);
            }
        }
        self.augmented.sort();
        self.rejected.sort();
    }

    /// Check that nothing reachable forward from the batch heads can reach
    /// back to the batch bodies through accepted clauses.
    ///
    /// Both closures are grown together, always expanding the smaller side,
    /// and the test fails as soon as they meet.
    fn is_ancestor_descendant_disjoint(&self, batch: &[ConstraintId]) -> bool {
        let mut ancestors: HashSet<TupleId> = HashSet::new();
        let mut descendants: HashSet<TupleId> = HashSet::new();
        let mut up: Vec<TupleId> = Vec::new();
        let mut down: Vec<TupleId> = Vec::new();

        for &id in batch {
            let clause = self.set.clause(id);
            for &b in &clause.body {
                if ancestors.insert(b) {
                    up.push(b);
                }
            }
            if descendants.insert(clause.head) {
                down.push(clause.head);
            }
        }
        if ancestors.iter().any(|t| descendants.contains(t)) {
            return false;
        }

        while !up.is_empty() || !down.is_empty() {
            let expand_up = !up.is_empty() && (down.is_empty() || ancestors.len() <= descendants.len());
            if expand_up {
                let Some(t) = up.pop() else { break };
                for &c in self.by_head.get(&t).map(Vec::as_slice).unwrap_or(&[]) {
                    for &b in &self.set.clause(c).body {
                        if descendants.contains(&b) {
                            return false;
                        }
                        if ancestors.insert(b) {
                            up.push(b);
                        }
                    }
                }
            } else {
                let Some(t) = down.pop() else { break };
                for &c in self.by_body.get(&t).map(Vec::as_slice).unwrap_or(&[]) {
                    let h = self.set.clause(c).head;
                    if ancestors.contains(&h) {
                        return false;
                    }
                    if descendants.insert(h) {
                        down.push(h);
                    }
                }
            }
        }
        true
    }

    pub fn is_accepted(&self, id: ConstraintId) -> bool {
        self.accepted.contains(&id)
    }

    /// Accepted clauses deriving `head`.
    pub fn producers(&self, head: TupleId) -> &[ConstraintId] {
        self.by_head.get(&head).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn accepted_count(&self) -> usize {
        self.accepted.len()
    }

    /// Clauses admitted by [`augment`](Self::augment), sorted.
    pub fn augmented(&self) -> &[ConstraintId] {
        &self.augmented
    }

    /// Singletons refused by [`augment`](Self::augment), sorted.
    pub fn rejected(&self) -> &[ConstraintId] {
        &self.rejected
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constraint::Constraint;
    use crate::tuple::Tuple;

    fn t(name: &str) -> Tuple {
        Tuple::atom(name)
    }

    fn inputs_of(set: &ConstraintSet, names: &[&str]) -> Vec<bool> {
        let mut v = vec![false; set.tuples().len()];
        for n in names {
            if let Some(id) = set.tuples().lookup(&t(n)) {
                v[id.index()] = true;
            }
        }
        v
    }

    #[test]
    fn dob_counts_derivation_depth() {
        let mut set = ConstraintSet::new();
        set.insert(&Constraint::new("R", t("b"), vec![t("a")]));
        set.insert(&Constraint::new("R", t("c"), vec![t("b")]));
        set.insert(&Constraint::new("R", t("c"), vec![t("a")]));
        let inputs = inputs_of(&set, &["a"]);
        let dob = DobAnalysis::compute(&set, &inputs);
        let id = |n: &str| set.tuples().lookup(&t(n)).unwrap();
        assert_eq!(dob.dob(id("a")), 0);
        assert_eq!(dob.dob(id("b")), 1);
        assert_eq!(dob.dob(id("c")), 1);
        // c :- b is not forward (dob(c) == dob(b)), c :- a is.
        assert!(!dob.is_forward(&set, ConstraintId(1)));
        assert!(dob.is_forward(&set, ConstraintId(2)));
    }

    #[test]
    fn underivable_tuples_stay_at_max() {
        let mut set = ConstraintSet::new();
        set.insert(&Constraint::new("R", t("x"), vec![t("y")]));
        set.insert(&Constraint::new("R", t("y"), vec![t("x")]));
        let inputs = inputs_of(&set, &[]);
        let dob = DobAnalysis::compute(&set, &inputs);
        assert_eq!(dob.max_dob, 2);
        assert!(!dob.is_derivable(TupleId(0)));
        assert!(!dob.is_forward(&set, ConstraintId(0)));
        assert!(!dob.is_forward(&set, ConstraintId(1)));
    }

    #[test]
    fn augmentation_admits_non_forward_acyclic_clause() {
        let mut set = ConstraintSet::new();
        let ab = set.insert(&Constraint::new("R", t("b"), vec![t("a")])).unwrap();
        let bc = set.insert(&Constraint::new("R", t("c"), vec![t("b")])).unwrap();
        let ac = set.insert(&Constraint::new("R", t("c"), vec![t("a")])).unwrap();
        let mut aug = Augmenter::new(&set, &[ab, ac]);
        aug.augment(vec![bc]);
        assert_eq!(aug.augmented(), &[bc]);
        assert!(aug.rejected().is_empty());
        assert_eq!(aug.accepted_count(), 3);
    }

    #[test]
    fn augmentation_rejects_back_edge() {
        let mut set = ConstraintSet::new();
        let ab = set.insert(&Constraint::new("R", t("b"), vec![t("a")])).unwrap();
        let bc = set.insert(&Constraint::new("R", t("c"), vec![t("b")])).unwrap();
        let cb = set.insert(&Constraint::new("R", t("b"), vec![t("c")])).unwrap();
        let mut aug = Augmenter::new(&set, &[ab, bc]);
        aug.augment(vec![cb]);
        assert!(aug.augmented().is_empty());
        assert_eq!(aug.rejected(), &[cb]);
        assert!(!aug.is_accepted(cb));
    }

    #[test]
    fn cyclic_batch_is_bisected_and_one_side_kept() {
        // x :- y and y :- x together form a cycle; neither alone does.
        let mut set = ConstraintSet::new();
        let xy = set.insert(&Constraint::new("R", t("x"), vec![t("y")])).unwrap();
        let yx = set.insert(&Constraint::new("R", t("y"), vec![t("x")])).unwrap();
        let mut aug = Augmenter::new(&set, &[]);
        aug.augment(vec![xy, yx]);
        assert_eq!(aug.augmented(), &[xy]);
        assert_eq!(aug.rejected(), &[yx]);
    }

    #[test]
    fn self_loop_is_rejected() {
        let mut set = ConstraintSet::new();
        let xx = set.insert(&Constraint::new("R", t("x"), vec![t("x")])).unwrap();
        let mut aug = Augmenter::new(&set, &[]);
        aug.augment(vec![xx]);
        assert_eq!(aug.rejected(), &[xx]);
    }
}
