//! Rule instances (clauses) and the deduplicating constraint set.
//!
//! Upstream rule evaluation hands over [`Constraint`]s: a head tuple, an ordered
//! body of tuples (a conjunction) and the name of the rule that produced them.
//! [`ConstraintSet`] interns those into [`Clause`]s over [`TupleId`]s, assigning
//! dense [`ConstraintId`]s and a rule dictionary.

use std::collections::{HashMap, HashSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::ProvenanceError;
use crate::tuple::{Tuple, TupleId, TupleStore};

/// One rule instance as produced upstream: `head :- body[0], body[1], ...`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Constraint {
    pub rule: String,
    pub head: Tuple,
    #[serde(default)]
    pub body: Vec<Tuple>,
}

impl Constraint {
    pub fn new(rule: impl Into<String>, head: Tuple, body: Vec<Tuple>) -> Self {
        Self {
            rule: rule.into(),
            head,
            body,
        }
    }
}

impl fmt::Display for Constraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {} :- ", self.rule, self.head)?;
        for (i, b) in self.body.iter().enumerate() {
            if i > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{b}")?;
        }
        Ok(())
    }
}

/// Dense index of a clause inside one [`ConstraintSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ConstraintId(pub u32);

impl ConstraintId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for ConstraintId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "D{}", self.0)
    }
}

/// Dense index into the rule dictionary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RuleId(pub u32);

/// An interned clause. Body tuples are deduplicated, keeping first occurrence.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Clause {
    pub head: TupleId,
    pub body: Vec<TupleId>,
    pub rule: RuleId,
}

/// Deduplicated clause collection plus the tuple and rule tables it refers to.
#[derive(Debug, Default)]
pub struct ConstraintSet {
    tuples: TupleStore,
    clauses: Vec<Clause>,
    index: HashMap<Clause, ConstraintId>,
    rules: Vec<String>,
    rule_index: HashMap<String, RuleId>,
    /// When set, clauses mentioning tuples outside the declared universe are dropped.
    strict: bool,
    dropped: Vec<ProvenanceError>,
}

impl ConstraintSet {
    /// A set that collects its tuple universe from the clauses it receives.
    pub fn new() -> Self {
        Self::default()
    }

    /// A set restricted to an explicitly declared tuple universe.
    pub fn with_universe(tuples: impl IntoIterator<Item = Tuple>) -> Self {
        let mut set = Self {
            strict: true,
            ..Self::default()
        };
        for t in tuples {
            set.tuples.intern(t);
        }
        set
    }

    /// Register a tuple (e.g. an input with no clauses mentioning it).
    ///
    /// In strict mode this widens the universe, so callers declare tuples
    /// before inserting constraints.
    pub fn declare(&mut self, tuple: Tuple) -> TupleId {
        self.tuples.intern(tuple)
    }

    /// Insert a constraint, returning its id.
    ///
    /// Returns `None` when the constraint references a tuple outside the
    /// declared universe; the reference error is logged and retained in
    /// [`dropped`](Self::dropped).
    pub fn insert(&mut self, constraint: &Constraint) -> Option<ConstraintId> {
        if self.strict {
            let missing = std::iter::once(&constraint.head)
                .chain(constraint.body.iter())
                .find(|t| !self.tuples.contains(t));
            if let Some(tuple) = missing {
                let err = ProvenanceError::UnknownTuple {
                    clause: constraint.to_string(),
                    tuple: tuple.to_string(),
                };
                tracing::warn!(error = %err, "dropping clause");
                self.dropped.push(err);
                return None;
            }
        }

        let head = self.tuples.intern(constraint.head.clone());
        let mut seen = HashSet::new();
        let mut body = Vec::with_capacity(constraint.body.len());
        for t in &constraint.body {
            let id = self.tuples.intern(t.clone());
            if seen.insert(id) {
                body.push(id);
            }
        }
        let rule = self.intern_rule(&constraint.rule);
        let clause = Clause { head, body, rule };

        if let Some(&id) = self.index.get(&clause) {
            return Some(id);
        }
        let id = ConstraintId(self.clauses.len() as u32);
        self.index.insert(clause.clone(), id);
        self.clauses.push(clause);
        Some(id)
    }

    fn intern_rule(&mut self, name: &str) -> RuleId {
        if let Some(&id) = self.rule_index.get(name) {
            return id;
        }
        let id = RuleId(self.rules.len() as u32);
        self.rule_index.insert(name.to_string(), id);
        self.rules.push(name.to_string());
        id
    }

    pub fn tuples(&self) -> &TupleStore {
        &self.tuples
    }

    pub fn clause(&self, id: ConstraintId) -> &Clause {
        &self.clauses[id.index()]
    }

    pub fn clauses(&self) -> impl Iterator<Item = (ConstraintId, &Clause)> {
        self.clauses
            .iter()
            .enumerate()
            .map(|(i, c)| (ConstraintId(i as u32), c))
    }

    pub fn len(&self) -> usize {
        self.clauses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn rule_name(&self, id: RuleId) -> &str {
        &self.rules[id.0 as usize]
    }

    pub fn rules(&self) -> &[String] {
        &self.rules
    }

    /// Reference errors for clauses rejected in strict mode.
    pub fn dropped(&self) -> &[ProvenanceError] {
        &self.dropped
    }

    /// Rebuild the upstream form of a clause.
    pub fn resolve(&self, id: ConstraintId) -> Constraint {
        let c = self.clause(id);
        Constraint {
            rule: self.rule_name(c.rule).to_string(),
            head: self.tuples.get(c.head).clone(),
            body: c.body.iter().map(|&b| self.tuples.get(b).clone()).collect(),
        }
    }
}
