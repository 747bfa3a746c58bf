//! End-to-end tests from problem file to decoded solver output.
//!
//! A brute-force in-process backend reads the written factor graph exactly as
//! an external solver would, so these tests check the encoding against the
//! exact marginals of the causal graph it came from.

use std::collections::HashMap;

use provnet::causal::exact;
use provnet::causal::{CausalGraph, GraphParts, NodeKey};
use provnet::config::ProvnetConfig;
use provnet::driver::CausalDriver;
use provnet::error::SolverResult;
use provnet::factor::file::{FactorBlock, FactorGraph};
use provnet::factor::FactorEncoder;
use provnet::prior::Categorical01;
use provnet::problem::ProblemFile;
use provnet::solver::{SolverBackend, SolverFiles};
use provnet::tuple::Tuple;

// ---------------------------------------------------------------------------
// Brute-force solver
// ---------------------------------------------------------------------------

/// Enumerates the joint distribution of the written factor graph.
struct BruteForce;

struct Joint {
    z: f64,
    /// Per variable, mass of each state.
    mass: Vec<Vec<f64>>,
}

fn read(path: &std::path::Path) -> String {
    std::fs::read_to_string(path).unwrap()
}

fn enumerate(fg: &FactorGraph, clamp: &HashMap<usize, usize>) -> Joint {
    let n = fg
        .factors
        .iter()
        .flat_map(|f| f.vars.iter().copied())
        .max()
        .map_or(0, |m| m + 1);
    let mut cards = vec![1; n];
    let mut by_last: Vec<Vec<&FactorBlock>> = vec![Vec::new(); n];
    for f in &fg.factors {
        for (&v, &c) in f.vars.iter().zip(&f.cards) {
            cards[v] = c;
        }
        if let Some(&last) = f.vars.iter().max() {
            by_last[last].push(f);
        }
    }

    let mut joint = Joint {
        z: 0.0,
        mass: cards.iter().map(|&c| vec![0.0; c]).collect(),
    };
    let mut state = vec![0; n];
    dfs(0, 1.0, &mut state, &cards, &by_last, clamp, &mut joint);
    joint
}

fn dfs(
    v: usize,
    weight: f64,
    state: &mut [usize],
    cards: &[usize],
    by_last: &[Vec<&FactorBlock>],
    clamp: &HashMap<usize, usize>,
    joint: &mut Joint,
) {
    if v == cards.len() {
        joint.z += weight;
        for (var, &s) in state.iter().enumerate() {
            joint.mass[var][s] += weight;
        }
        return;
    }
    for s in 0..cards[v] {
        if clamp.get(&v).is_some_and(|&c| c != s) {
            continue;
        }
        state[v] = s;
        let mut w = weight;
        for f in &by_last[v] {
            let states: Vec<usize> = f.vars.iter().map(|&x| state[x]).collect();
            w *= f.value(&states);
            if w == 0.0 {
                break;
            }
        }
        if w > 0.0 {
            dfs(v + 1, w, state, cards, by_last, clamp, joint);
        }
    }
}

impl SolverBackend for BruteForce {
    fn update(&self, files: &SolverFiles) -> SolverResult<()> {
        let fg = FactorGraph::parse(&read(&files.factor_graph())).unwrap();
        let clamp: HashMap<usize, usize> = read(&files.observations())
            .lines()
            .map(|l| {
                let mut parts = l.split_whitespace();
                let var = parts.next().unwrap().parse().unwrap();
                let value = parts.next().unwrap().parse().unwrap();
                (var, value)
            })
            .collect();
        let joint = enumerate(&fg, &clamp);
        let mut out = String::new();
        for line in read(&files.params()).lines() {
            let param: usize = line.trim().parse().unwrap();
            let posterior: Vec<String> = joint.mass[param]
                .iter()
                .map(|m| (m / joint.z).to_string())
                .collect();
            out.push_str(&format!("{param} {}\n", posterior.join(" ")));
        }
        files.write(&files.weights(), &out)
    }

    fn predict(&self, files: &SolverFiles) -> SolverResult<()> {
        let fg = FactorGraph::parse(&read(&files.factor_graph())).unwrap();
        let joint = enumerate(&fg, &HashMap::new());
        let mut out = String::new();
        for line in read(&files.queries()).lines() {
            let var: usize = line.trim().parse().unwrap();
            out.push_str(&format!("{var} {}\n", joint.mass[var][1] / joint.z));
        }
        files.write(&files.predictions(), &out)
    }
}

fn driver(graph: CausalGraph, limit: usize, dir: &tempfile::TempDir) -> CausalDriver<BruteForce> {
    CausalDriver::new(
        graph,
        FactorEncoder::new(limit).unwrap(),
        BruteForce,
        SolverFiles::new(dir.path()),
    )
}

fn assert_close(a: f64, b: f64) {
    assert!((a - b).abs() < 1e-9, "{a} != {b}");
}

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

fn t(rel: &str, args: &[&str]) -> serde_json::Value {
    serde_json::json!({ "relation": rel, "args": args })
}

fn clause(rule: &str, head: serde_json::Value, body: Vec<serde_json::Value>) -> serde_json::Value {
    serde_json::json!({ "rule": rule, "head": head, "body": body })
}

/// Transitive closure over a graph with a back edge, so the raw constraints
/// contain a derivation cycle through `path(a,c)`.
fn reach() -> ProblemFile {
    let json = serde_json::json!({
        "name": "reach",
        "inputs": [t("edge", &["a", "b"]), t("edge", &["b", "c"]), t("edge", &["a", "c"]), t("edge", &["c", "a"])],
        "outputs": [t("path", &["a", "c"])],
        "constraints": [
            clause("R0", t("path", &["a", "b"]), vec![t("edge", &["a", "b"])]),
            clause("R0", t("path", &["b", "c"]), vec![t("edge", &["b", "c"])]),
            clause("R0", t("path", &["a", "c"]), vec![t("edge", &["a", "c"])]),
            clause("R0", t("path", &["c", "a"]), vec![t("edge", &["c", "a"])]),
            clause("R1", t("path", &["a", "c"]), vec![t("path", &["a", "b"]), t("edge", &["b", "c"])]),
            clause("R1", t("path", &["a", "a"]), vec![t("path", &["a", "c"]), t("edge", &["c", "a"])]),
            clause("R1", t("path", &["a", "c"]), vec![t("path", &["a", "a"]), t("edge", &["a", "c"])]),
        ],
        "rule_priors": {
            "R0": {"supports": [0.95], "weights": [1.0]},
            "R1": {"supports": [0.9], "weights": [1.0]}
        },
        "input_priors": {
            "edge": {"supports": [0.5, 0.9], "weights": [1.0, 1.0]}
        }
    });
    ProblemFile::from_json(&json.to_string(), "reach").unwrap()
}

/// `h` is the OR of `n` clauses, each over its own uncertain input.
fn wide_or(n: usize) -> CausalGraph {
    let mut keys = vec![NodeKey::Tuple(Tuple::atom("h"))];
    keys.extend((0..n).map(NodeKey::Clause));
    keys.extend((0..n).map(|i| NodeKey::Tuple(Tuple::new("in", &[i.to_string().as_str()]))));
    CausalGraph::from_parts(GraphParts {
        name: "wide".into(),
        keys,
        inputs: (n + 1..=2 * n).collect(),
        sums: vec![(0, (1..=n).collect())],
        products: (1..=n).map(|k| (k, vec![k + n])).collect(),
        priors: (0..n)
            .map(|i| Categorical01::point(0.1 * (i + 1) as f64).unwrap())
            .collect(),
        node_priors: (0..n).map(|i| (n + 1 + i, i)).collect(),
    })
    .unwrap()
}

/// `h` is one gated clause whose body is `n` uncertain inputs.
fn wide_and(n: usize) -> CausalGraph {
    let mut keys = vec![NodeKey::Tuple(Tuple::atom("h")), NodeKey::Clause(0)];
    keys.extend((0..n).map(|i| NodeKey::Tuple(Tuple::new("in", &[i.to_string().as_str()]))));
    let mut node_priors: Vec<(usize, usize)> = (0..n).map(|i| (2 + i, i)).collect();
    node_priors.push((1, n));
    let mut priors: Vec<Categorical01> = (0..n)
        .map(|i| Categorical01::point(1.0 - 0.05 * i as f64).unwrap())
        .collect();
    priors.push(Categorical01::uniform(&[0.5, 1.0]).unwrap());
    CausalGraph::from_parts(GraphParts {
        name: "wide_and".into(),
        keys,
        inputs: (2..2 + n).collect(),
        sums: vec![(0, vec![1])],
        products: vec![(1, (2..2 + n).collect())],
        priors,
        node_priors,
    })
    .unwrap()
}

/// `o :- i` with a two-point prior on `i`.
fn coin() -> CausalGraph {
    CausalGraph::from_parts(GraphParts {
        name: "coin".into(),
        keys: vec![
            NodeKey::Tuple(Tuple::atom("o")),
            NodeKey::Clause(0),
            NodeKey::Tuple(Tuple::atom("i")),
        ],
        inputs: vec![2],
        sums: vec![(0, vec![1])],
        products: vec![(1, vec![2])],
        priors: vec![Categorical01::uniform(&[0.2, 0.8]).unwrap()],
        node_priors: vec![(2, 0)],
    })
    .unwrap()
}

fn all_tuples(graph: &CausalGraph) -> Vec<Tuple> {
    graph
        .nodes()
        .filter_map(|(_, n)| match &n.key {
            NodeKey::Tuple(t) => Some(t.clone()),
            NodeKey::Clause(_) => None,
        })
        .collect()
}

fn check_against_exact(graph: CausalGraph, limit: usize) {
    let expected = exact::marginals(&graph, &[]).unwrap();
    let tuples = all_tuples(&graph);
    let dir = tempfile::TempDir::new().unwrap();
    let mut d = driver(graph, limit, &dir);
    let got = d.query_marginals(&tuples).unwrap();
    assert_eq!(got.len(), tuples.len());
    for t in &tuples {
        let id = d.graph().lookup_tuple(t).unwrap();
        assert_close(got[t], expected[id.index()]);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[test]
fn pruning_breaks_the_derivation_cycle() {
    let p = reach();
    let prov = p.prune(true);
    let stats = prov.stats();
    assert!(stats.rejected >= 1, "{stats:?}");
    let compiled = p.compile(&ProvnetConfig::default(), false).unwrap();
    assert!(compiled.graph.topological_order().is_ok());
    assert!(compiled.graph.lookup_tuple(&Tuple::new("path", &["a", "c"])).is_some());
}

#[test]
fn encoded_reach_matches_exact_marginals() {
    let compiled = reach().compile(&ProvnetConfig::default(), false).unwrap();
    check_against_exact(compiled.graph, 15);
}

#[test]
fn squeezing_keeps_output_marginals() {
    let p = reach();
    let out = Tuple::new("path", &["a", "c"]);
    let mut answers = Vec::new();
    for squeeze in [false, true] {
        let compiled = p.compile(&ProvnetConfig::default(), squeeze).unwrap();
        let dir = tempfile::TempDir::new().unwrap();
        let mut d = driver(compiled.graph, 15, &dir);
        answers.push(d.query_marginals(&[out.clone()]).unwrap()[&out]);
    }
    assert_close(answers[0], answers[1]);
}

#[test]
fn phony_chains_preserve_wide_or() {
    for limit in [2, 3, 15] {
        check_against_exact(wide_or(6), limit);
    }
}

#[test]
fn phony_chains_preserve_wide_and() {
    for limit in [2, 4, 15] {
        check_against_exact(wide_and(5), limit);
    }
}

#[test]
fn or_of_two_certain_inputs_is_one() {
    let json = serde_json::json!({
        "inputs": [t("a", &[]), t("b", &[])],
        "outputs": [t("h", &[])],
        "constraints": [
            clause("R", t("h", &[]), vec![t("a", &[])]),
            clause("R", t("h", &[]), vec![t("b", &[])]),
        ]
    });
    let p = ProblemFile::from_json(&json.to_string(), "or").unwrap();
    let compiled = p.compile(&ProvnetConfig::default(), false).unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    let mut d = driver(compiled.graph, 15, &dir);
    let m = d.query_marginals(&[Tuple::atom("h")]).unwrap();
    assert_close(m[&Tuple::atom("h")], 1.0);
}

#[test]
fn observation_updates_the_prior() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut d = driver(coin(), 15, &dir);
    let o = Tuple::atom("o");
    assert_close(d.query_marginals(&[o.clone()]).unwrap()[&o], 0.5);

    d.update_with_observation(&HashMap::from([(o.clone(), true)])).unwrap();
    let probs = d.graph().priors()[0].probs().to_vec();
    assert_close(probs[0], 0.2);
    assert_close(probs[1], 0.8);
    assert_close(d.query_marginals(&[o.clone()]).unwrap()[&o], 0.68);
}

#[test]
fn traces_share_the_prior_across_copies() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut d = driver(coin(), 15, &dir);
    let o = Tuple::atom("o");
    let traces = vec![
        HashMap::from([(o.clone(), true)]),
        HashMap::from([(o.clone(), true)]),
    ];
    d.update_with_traces(&traces).unwrap();
    let probs = d.graph().priors()[0].probs().to_vec();
    assert_close(probs[0], 0.04 / 0.68);
    assert_close(probs[1], 0.64 / 0.68);
}

#[test]
fn mixed_traces_cancel_out() {
    let dir = tempfile::TempDir::new().unwrap();
    let mut d = driver(coin(), 15, &dir);
    let o = Tuple::atom("o");
    let traces = vec![
        HashMap::from([(o.clone(), true)]),
        HashMap::from([(o.clone(), false)]),
    ];
    d.update_with_traces(&traces).unwrap();
    // 0.2 * 0.8 on both support points
    let probs = d.graph().priors()[0].probs().to_vec();
    assert_close(probs[0], 0.5);
    assert_close(probs[1], 0.5);
}

#[test]
fn dumps_land_in_the_work_dir() {
    let p = reach();
    let compiled = p.compile(&ProvnetConfig::default(), false).unwrap();
    let dir = tempfile::TempDir::new().unwrap();
    compiled.provenance.dump(dir.path()).unwrap();
    compiled.graph.dump(dir.path()).unwrap();
    for name in [
        "tuple_dict.txt",
        "rule_dict.txt",
        "cons_pruned.txt",
        "reach.causal.txt",
        "reach.dot",
        "priors.list",
    ] {
        assert!(dir.path().join(name).exists(), "{name}");
    }
}
