//! JSON problem and observation files.
//!
//! A problem file carries everything needed to build a causal graph:
//!
//! ```json
//! {
//!   "name": "reach",
//!   "inputs": [{"relation": "edge", "args": ["a", "b"]}],
//!   "outputs": [{"relation": "path", "args": ["a", "b"]}],
//!   "constraints": [
//!     {"rule": "R0", "head": {"relation": "path", "args": ["a", "b"]},
//!      "body": [{"relation": "edge", "args": ["a", "b"]}]}
//!   ],
//!   "rule_priors": {"R0": {"supports": [0.9], "weights": [1.0]}},
//!   "input_priors": {"edge": {"supports": [0.5, 1.0], "weights": [1, 1]}}
//! }
//! ```
//!
//! When `tuples` is present it is the closed universe: constraints mentioning
//! anything else are dropped with a warning.

use std::collections::{BTreeMap, HashMap};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::causal::builder::{CausalGraphBuilder, TiedPriors};
use crate::causal::squeeze::{GraphSqueezer, SqueezeStats};
use crate::causal::CausalGraph;
use crate::config::ProvnetConfig;
use crate::constraint::{Constraint, ConstraintSet};
use crate::error::{ProblemError, ProblemResult, ProvnetResult};
use crate::prior::Categorical01;
use crate::provenance::{Provenance, ProvenancePruner};
use crate::tuple::Tuple;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProblemFile {
    #[serde(default = "default_name")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuples: Option<Vec<Tuple>>,
    #[serde(default)]
    pub inputs: Vec<Tuple>,
    #[serde(default)]
    pub outputs: Vec<Tuple>,
    #[serde(default)]
    pub constraints: Vec<Constraint>,
    /// Prior shared by every clause instantiating a rule.
    #[serde(default)]
    pub rule_priors: BTreeMap<String, Categorical01>,
    /// Prior shared by every input tuple of a relation.
    #[serde(default)]
    pub input_priors: BTreeMap<String, Categorical01>,
}

fn default_name() -> String {
    "causal".into()
}

/// A compiled problem: the pruned provenance and its causal graph.
#[derive(Debug)]
pub struct Compiled {
    pub provenance: Provenance,
    pub graph: CausalGraph,
    pub squeeze: Option<SqueezeStats>,
}

impl ProblemFile {
    pub fn load(path: &Path) -> ProblemResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProblemError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_json(&text, &path.display().to_string())
    }

    pub fn from_json(text: &str, origin: &str) -> ProblemResult<Self> {
        serde_json::from_str(text).map_err(|e| ProblemError::Parse {
            path: origin.to_string(),
            message: e.to_string(),
        })
    }

    pub fn constraint_set(&self) -> ConstraintSet {
        let mut set = match &self.tuples {
            Some(universe) => ConstraintSet::with_universe(universe.iter().cloned()),
            None => ConstraintSet::new(),
        };
        let mut inserted = 0usize;
        for c in &self.constraints {
            if set.insert(c).is_some() {
                inserted += 1;
            }
        }
        tracing::debug!(
            constraints = self.constraints.len(),
            inserted,
            dropped = set.dropped().len(),
            "constraint set loaded"
        );
        set
    }

    pub fn tied_priors(&self) -> TiedPriors {
        TiedPriors {
            rules: self.rule_priors.clone(),
            relations: self.input_priors.clone(),
        }
    }

    pub fn prune(&self, augment: bool) -> Provenance {
        let set = self.constraint_set();
        ProvenancePruner::new(&set, &self.inputs, &self.outputs)
            .with_augmentation(augment)
            .prune()
    }

    /// Prune, build and optionally squeeze, as configured.
    ///
    /// Squeezing keeps the output tuples addressable.
    pub fn compile(&self, config: &ProvnetConfig, squeeze: bool) -> ProvnetResult<Compiled> {
        self.compile_reserving(config, squeeze, &[])
    }

    /// Like [`compile`](Self::compile), but squeezing also keeps `extra`
    /// addressable: the tuples a caller will query or observe.
    pub fn compile_reserving(
        &self,
        config: &ProvnetConfig,
        squeeze: bool,
        extra: &[Tuple],
    ) -> ProvnetResult<Compiled> {
        let provenance = self.prune(config.prune.augment);
        let graph = CausalGraphBuilder::new(&provenance, self.name.as_str()).build_tied(&self.tied_priors())?;
        let (graph, squeeze) = if squeeze {
            let reserved = self.outputs.iter().chain(extra).cloned();
            let (g, stats) = GraphSqueezer::new(reserved).squeeze(&graph);
            (g, Some(stats))
        } else {
            (graph, None)
        };
        Ok(Compiled {
            provenance,
            graph,
            squeeze,
        })
    }
}

/// One observed truth value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub tuple: Tuple,
    pub value: bool,
}

/// `{"traces": [[{"tuple": ..., "value": true}, ...], ...]}`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ObservationFile {
    #[serde(default)]
    pub traces: Vec<Vec<Observation>>,
}

impl ObservationFile {
    pub fn load(path: &Path) -> ProblemResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| ProblemError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        serde_json::from_str(&text).map_err(|e| ProblemError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })
    }

    /// Later observations of the same tuple within a trace win.
    pub fn to_maps(&self) -> Vec<HashMap<Tuple, bool>> {
        self.traces
            .iter()
            .map(|trace| trace.iter().map(|o| (o.tuple.clone(), o.value)).collect())
            .collect()
    }
}
