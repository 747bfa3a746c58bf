//! Ground facts and their interning store.
//!
//! A [`Tuple`] is a relation name plus ordered argument strings. Equality and
//! hashing are structural, so two tuples parsed from different places compare
//! equal when they name the same fact. [`TupleStore`] interns tuples into dense
//! [`TupleId`]s so the rest of the pipeline can work with integer indices.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProblemError;

/// A ground logical fact, e.g. `edge(a,b)`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Tuple {
    pub relation: String,
    #[serde(default)]
    pub args: Vec<String>,
}

impl Tuple {
    pub fn new(relation: impl Into<String>, args: &[&str]) -> Self {
        Self {
            relation: relation.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
        }
    }

    /// A nullary fact such as `goal()`.
    pub fn atom(relation: impl Into<String>) -> Self {
        Self {
            relation: relation.into(),
            args: Vec::new(),
        }
    }
}

impl fmt::Display for Tuple {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.relation, self.args.join(","))
    }
}

/// Parses `rel(a,b)`, `rel()` or a bare `rel`.
impl FromStr for Tuple {
    type Err = ProblemError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bad = || ProblemError::BadTuple { text: s.to_string() };
        let s = s.trim();
        let (relation, args) = match s.find('(') {
            Some(open) => {
                let inner = s[open + 1..].strip_suffix(')').ok_or_else(bad)?;
                let args: Vec<String> = if inner.trim().is_empty() {
                    Vec::new()
                } else {
                    inner.split(',').map(|a| a.trim().to_string()).collect()
                };
                (s[..open].trim(), args)
            }
            None => (s, Vec::new()),
        };
        let valid = |t: &str| !t.is_empty() && !t.contains(['(', ')', ',']);
        if !valid(relation) || !args.iter().all(|a| valid(a)) {
            return Err(bad());
        }
        Ok(Self {
            relation: relation.to_string(),
            args,
        })
    }
}

/// Dense index of a tuple inside one [`TupleStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TupleId(pub u32);

impl TupleId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for TupleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

/// How a tuple participates in a derivation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TupleKind {
    /// Axiom; never derived.
    Input,
    /// Explicitly observed or queried.
    Output,
    /// Intermediate fact.
    Hidden,
}

impl TupleKind {
    /// Single-letter tag prefix used in dumps.
    pub fn tag(self) -> char {
        match self {
            Self::Input => 'I',
            Self::Output => 'O',
            Self::Hidden => 'H',
        }
    }
}

/// Interning table from tuples to dense ids.
#[derive(Debug, Clone, Default)]
pub struct TupleStore {
    tuples: Vec<Tuple>,
    index: HashMap<Tuple, TupleId>,
}

impl TupleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Intern a tuple, returning its existing id if already present.
    pub fn intern(&mut self, tuple: Tuple) -> TupleId {
        if let Some(&id) = self.index.get(&tuple) {
            return id;
        }
        let id = TupleId(self.tuples.len() as u32);
        self.index.insert(tuple.clone(), id);
        self.tuples.push(tuple);
        id
    }

    pub fn lookup(&self, tuple: &Tuple) -> Option<TupleId> {
        self.index.get(tuple).copied()
    }

    pub fn contains(&self, tuple: &Tuple) -> bool {
        self.index.contains_key(tuple)
    }

    /// Resolve an id. Panics only on ids minted by another store.
    pub fn get(&self, id: TupleId) -> &Tuple {
        &self.tuples[id.index()]
    }

    pub fn len(&self) -> usize {
        self.tuples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tuples.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (TupleId, &Tuple)> {
        self.tuples
            .iter()
            .enumerate()
            .map(|(i, t)| (TupleId(i as u32), t))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_dump_format() {
        assert_eq!(Tuple::new("edge", &["a", "b"]).to_string(), "edge(a,b)");
        assert_eq!(Tuple::atom("goal").to_string(), "goal()");
    }

    #[test]
    fn parse_tuples() {
        assert_eq!("edge(a, b)".parse::<Tuple>().unwrap(), Tuple::new("edge", &["a", "b"]));
        assert_eq!("goal".parse::<Tuple>().unwrap(), Tuple::atom("goal"));
        assert_eq!("goal()".parse::<Tuple>().unwrap(), Tuple::atom("goal"));
        let t = Tuple::new("r", &["1", "x"]);
        assert_eq!(t.to_string().parse::<Tuple>().unwrap(), t);
        for bad in ["", "(a)", "edge(a", "edge(a,)", "e(a(b))"] {
            assert!(bad.parse::<Tuple>().is_err(), "{bad}");
        }
    }

    #[test]
    fn structural_equality() {
        let a = Tuple::new("reach", &["x", "y"]);
        let b = Tuple {
            relation: "reach".into(),
            args: vec!["x".into(), "y".into()],
        };
        assert_eq!(a, b);
        assert_ne!(a, Tuple::new("reach", &["y", "x"]));
    }

    #[test]
    fn intern_is_idempotent() {
        let mut store = TupleStore::new();
        let a = store.intern(Tuple::new("p", &["1"]));
        let b = store.intern(Tuple::new("q", &["1"]));
        let a2 = store.intern(Tuple::new("p", &["1"]));
        assert_eq!(a, a2);
        assert_ne!(a, b);
        assert_eq!(store.len(), 2);
        assert_eq!(store.get(b).relation, "q");
        assert_eq!(store.lookup(&Tuple::new("p", &["1"])), Some(a));
        assert!(store.lookup(&Tuple::new("p", &["2"])).is_none());
    }

    #[test]
    fn iteration_follows_insertion_order() {
        let mut store = TupleStore::new();
        store.intern(Tuple::atom("z"));
        store.intern(Tuple::atom("a"));
        let names: Vec<_> = store.iter().map(|(_, t)| t.relation.clone()).collect();
        assert_eq!(names, vec!["z", "a"]);
    }

    #[test]
    fn kind_tags() {
        assert_eq!(TupleKind::Input.tag(), 'I');
        assert_eq!(TupleKind::Output.tag(), 'O');
        assert_eq!(TupleKind::Hidden.tag(), 'H');
    }
}
