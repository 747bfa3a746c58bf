//! Query / update cycles against a solver.
//!
//! Each cycle encodes the current graph, writes the solver's input files,
//! invokes the backend and decodes its output. Priors learned by an update are
//! written back into the graph, so later queries see them.

use std::collections::HashMap;

use crate::causal::{CausalGraph, PriorId};
use crate::error::{ProvnetResult, SolverError};
use crate::factor::file::{observation_list, param_list, parse_predictions, parse_weights, prior_list, query_list};
use crate::factor::{Encoded, FactorEncoder};
use crate::solver::{SolverBackend, SolverFiles};
use crate::tuple::Tuple;

pub struct CausalDriver<B: SolverBackend> {
    graph: CausalGraph,
    encoder: FactorEncoder,
    backend: B,
    files: SolverFiles,
}

impl<B: SolverBackend> CausalDriver<B> {
    pub fn new(graph: CausalGraph, encoder: FactorEncoder, backend: B, files: SolverFiles) -> Self {
        Self {
            graph,
            encoder,
            backend,
            files,
        }
    }

    pub fn graph(&self) -> &CausalGraph {
        &self.graph
    }

    pub fn into_graph(self) -> CausalGraph {
        self.graph
    }

    pub fn files(&self) -> &SolverFiles {
        &self.files
    }

    /// Marginal probability of each queried tuple.
    ///
    /// Tuples absent from the graph are skipped with a warning and do not
    /// appear in the result.
    pub fn query_marginals(&mut self, queries: &[Tuple]) -> ProvnetResult<HashMap<Tuple, f64>> {
        let encoded = self.encode(0)?;

        let mut by_var = HashMap::new();
        let mut vars = Vec::new();
        for tuple in queries {
            let Some(id) = self.graph.lookup_tuple(tuple) else {
                tracing::warn!(%tuple, "query tuple not in causal graph, skipped");
                continue;
            };
            let var = encoded.layout.node_var(0, id);
            if by_var.insert(var, tuple).is_none() {
                vars.push(var);
            }
        }
        self.files.write(&self.files.queries(), &query_list(&vars))?;

        let out = self.files.predictions();
        self.files.clear_output(&out)?;
        self.backend.predict(&self.files)?;
        let text = self.files.read_output(&out)?;
        let path = out.display().to_string();

        let mut result = HashMap::with_capacity(vars.len());
        for (var, prob) in parse_predictions(&text, &path)? {
            let tuple = by_var
                .get(&var)
                .ok_or(SolverError::UnknownId { what: "variable", id: var })?;
            result.insert((*tuple).clone(), prob);
        }
        if result.len() < vars.len() {
            tracing::warn!(
                asked = vars.len(),
                answered = result.len(),
                "solver left some queries unanswered"
            );
        }
        tracing::info!(queries = result.len(), "marginals computed");
        Ok(result)
    }

    /// Learn the priors from one observation over the prediction copy.
    pub fn update_with_observation(&mut self, observation: &HashMap<Tuple, bool>) -> ProvnetResult<()> {
        self.update(0, &[(0, observation)])
    }

    /// Learn the priors from several independent traces.
    ///
    /// The graph is encoded with one extra copy per trace; trace `t` observes
    /// copy `t + 1` while all copies share the prior variables.
    pub fn update_with_traces(&mut self, traces: &[HashMap<Tuple, bool>]) -> ProvnetResult<()> {
        if traces.is_empty() {
            tracing::warn!("no traces to learn from, priors unchanged");
            return Ok(());
        }
        let observed: Vec<_> = traces.iter().enumerate().map(|(t, o)| (t + 1, o)).collect();
        self.update(traces.len(), &observed)
    }

    fn update(&mut self, repeats: usize, observed: &[(usize, &HashMap<Tuple, bool>)]) -> ProvnetResult<()> {
        let encoded = self.encode(repeats)?;

        let mut obs = Vec::new();
        for &(copy, observation) in observed {
            for (tuple, &value) in observation {
                match self.graph.lookup_tuple(tuple) {
                    Some(id) => obs.push((encoded.layout.node_var(copy, id), value)),
                    None => tracing::warn!(%tuple, "observed tuple not in causal graph, skipped"),
                }
            }
        }
        obs.sort_unstable();
        self.files.write(&self.files.observations(), &observation_list(&obs))?;

        let out = self.files.weights();
        self.files.clear_output(&out)?;
        self.backend.update(&self.files)?;
        let text = self.files.read_output(&out)?;
        let path = out.display().to_string();

        let weights = parse_weights(&text, &path)?;
        // Stage every learned prior first so a bad line leaves the graph untouched.
        let mut staged = Vec::with_capacity(weights.len());
        for (param, w) in &weights {
            let Some(current) = self.graph.priors().get(*param) else {
                return Err(SolverError::UnknownId {
                    what: "parameter",
                    id: *param,
                }
                .into());
            };
            let mut learned = current.clone();
            learned.update_probs(w)?;
            staged.push((PriorId(*param as u32), learned));
        }
        for (id, learned) in staged {
            *self.graph.prior_mut(id) = learned;
        }
        tracing::info!(
            observations = obs.len(),
            updated = weights.len(),
            "priors updated"
        );
        Ok(())
    }

    fn encode(&self, repeats: usize) -> ProvnetResult<Encoded> {
        let encoded = self.encoder.encode(&self.graph, repeats)?;
        encoded.graph.save(&self.files.factor_graph())?;
        self.files
            .write(&self.files.priors(), &prior_list(self.graph.priors()))?;
        self.files
            .write(&self.files.params(), &param_list(encoded.layout.num_priors))?;
        Ok(encoded)
    }
}
