//! Brute-force marginals by enumerating every gate assignment.
//!
//! Only usable on small graphs, but exact: tied priors are handled by summing
//! over each shared prior's support once for all of its gates. Serves as the
//! reference the squeezer and the factor encoding are checked against.

use crate::causal::{CausalGraph, NodeId, NodeKind};
use crate::error::{GraphError, GraphResult};

/// Largest number of stochastic gates [`marginals`] will enumerate.
pub const MAX_GATES: usize = 20;

/// `P(node = true | evidence)` for every node, indexed by `NodeId`.
pub fn marginals(graph: &CausalGraph, evidence: &[(NodeId, bool)]) -> GraphResult<Vec<f64>> {
    let order = graph.topological_order()?;
    let gates: Vec<NodeId> = graph
        .nodes()
        .filter(|(_, n)| n.prior.is_some())
        .map(|(id, _)| id)
        .collect();
    if gates.len() > MAX_GATES {
        return Err(GraphError::TooManyGates {
            gates: gates.len(),
            limit: MAX_GATES,
        });
    }

    // gate position -> bit index; per prior, the bits of its users.
    let mut bit_of = vec![usize::MAX; graph.len()];
    let mut users: Vec<Vec<usize>> = vec![Vec::new(); graph.priors().len()];
    for (bit, &g) in gates.iter().enumerate() {
        bit_of[g.index()] = bit;
        if let Some(p) = graph.node(g).prior {
            users[p.index()].push(bit);
        }
    }

    let mut totals = vec![0.0; graph.len()];
    let mut z = 0.0;
    let mut value = vec![false; graph.len()];
    for assignment in 0u64..(1u64 << gates.len()) {
        let fired = |bit: usize| (assignment >> bit) & 1 == 1;

        let mut weight = 1.0;
        for (p, bits) in users.iter().enumerate() {
            if bits.is_empty() {
                continue;
            }
            let dist = &graph.priors()[p];
            let mut mix = 0.0;
            for (&s, &w) in dist.supports().iter().zip(dist.probs()) {
                let mut term = w;
                for &b in bits {
                    term *= if fired(b) { s } else { 1.0 - s };
                }
                mix += term;
            }
            weight *= mix;
        }
        if weight == 0.0 {
            continue;
        }

        for &id in &order {
            let node = graph.node(id);
            let gate = node.prior.is_none() || fired(bit_of[id.index()]);
            value[id.index()] = gate
                && match &node.kind {
                    NodeKind::Input => true,
                    NodeKind::Sum(c) => c.iter().any(|c| value[c.index()]),
                    NodeKind::Product(c) => c.iter().all(|c| value[c.index()]),
                };
        }
        if evidence.iter().any(|&(id, v)| value[id.index()] != v) {
            continue;
        }

        z += weight;
        for (i, &v) in value.iter().enumerate() {
            if v {
                totals[i] += weight;
            }
        }
    }

    if z <= 0.0 {
        return Err(GraphError::ImpossibleEvidence);
    }
    Ok(totals.into_iter().map(|t| t / z).collect())
}
