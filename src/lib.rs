// thiserror's #[error("...{field}...")] format strings reference struct fields,
// but the compiler doesn't see through the derive macro and reports false positives.
#![allow(unused_assignments)]

//! # provnet
//!
//! Turns the derivation provenance of a Datalog-style analysis into a
//! probabilistic model and runs inference over it with an external solver.
//!
//! ## Pipeline
//!
//! - **Pruning** (`provenance`): reduce ground constraints to an acyclic,
//!   output-justifying core, then greedily re-admit clauses that keep it acyclic
//! - **Causal graph** (`causal`): one Sum node per derived tuple, one Product
//!   node per clause, Inputs for axioms, gates carrying discretized priors
//! - **Squeezing** (`causal::squeeze`): marginal-preserving graph shrinking
//! - **Encoding** (`factor`): bounded-arity factor graph with repetition copies
//! - **Solver** (`solver`, `driver`): subprocess invocation and decoding of
//!   marginals and learned priors
//!
//! ## Library usage
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use provnet::config::ProvnetConfig;
//! use provnet::driver::CausalDriver;
//! use provnet::factor::FactorEncoder;
//! use provnet::problem::ProblemFile;
//! use provnet::solver::{ProcessSolver, SolverFiles};
//!
//! let problem = ProblemFile::load("reach.json".as_ref()).unwrap();
//! let compiled = problem.compile(&ProvnetConfig::default(), true).unwrap();
//! let solver = ProcessSolver::new("/opt/solver", Duration::from_secs(60));
//! let mut driver = CausalDriver::new(
//!     compiled.graph,
//!     FactorEncoder::default(),
//!     solver,
//!     SolverFiles::new("work"),
//! );
//! let marginals = driver.query_marginals(&problem.outputs).unwrap();
//! ```

pub mod causal;
pub mod config;
pub mod constraint;
pub mod driver;
pub mod error;
pub mod factor;
pub mod prior;
pub mod problem;
pub mod provenance;
pub mod solver;
pub mod tuple;
