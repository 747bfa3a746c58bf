//! Rich diagnostic error types for provnet.
//!
//! Each subsystem defines its own error type with miette `#[diagnostic]` derives,
//! providing error codes and help text that name the offending tuple, clause,
//! node or file so a failure can be reproduced.

use miette::Diagnostic;
use thiserror::Error;

/// Top-level error type for provnet.
///
/// Each variant wraps a subsystem-specific error, preserving the full diagnostic
/// chain through to the user.
#[derive(Debug, Error, Diagnostic)]
pub enum ProvnetError {
    #[error(transparent)]
    #[diagnostic(transparent)]
    Provenance(#[from] ProvenanceError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Prior(#[from] PriorError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Graph(#[from] GraphError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Encode(#[from] EncodeError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Solver(#[from] SolverError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    #[diagnostic(transparent)]
    Problem(#[from] ProblemError),
}

// ---------------------------------------------------------------------------
// Provenance errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ProvenanceError {
    #[error("clause {clause} references unknown tuple {tuple}")]
    #[diagnostic(
        code(provnet::provenance::unknown_tuple),
        help(
            "The tuple universe was declared explicitly and this tuple is not part of it. \
             The clause is dropped; declare the tuple or fix the upstream fact dump."
        )
    )]
    UnknownTuple { clause: String, tuple: String },

    #[error("failed to write provenance dump: {path}")]
    #[diagnostic(
        code(provnet::provenance::dump_write),
        help("Ensure the dump directory exists and is writable.")
    )]
    DumpWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("unknown provenance tag: {tag}")]
    #[diagnostic(
        code(provnet::provenance::unknown_tag),
        help("Tags look like I3, O0, H12 for tuples and D7 for clauses.")
    )]
    UnknownTag { tag: String },
}

pub type ProvenanceResult<T> = std::result::Result<T, ProvenanceError>;

// ---------------------------------------------------------------------------
// Prior errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum PriorError {
    #[error("prior has no support values")]
    #[diagnostic(
        code(provnet::prior::empty),
        help("A categorical prior needs at least one support value in [0, 1].")
    )]
    Empty,

    #[error("prior support {value} is outside [0, 1]")]
    #[diagnostic(
        code(provnet::prior::support_range),
        help("Support values are firing probabilities and must lie in [0, 1].")
    )]
    SupportOutOfRange { value: f64 },

    #[error("prior weight {value} is negative or not finite")]
    #[diagnostic(
        code(provnet::prior::invalid_weight),
        help("Weights must be finite and non-negative.")
    )]
    InvalidWeight { value: f64 },

    #[error("prior weights sum to {sum}, expected 1")]
    #[diagnostic(
        code(provnet::prior::not_normalized),
        help("Probabilities of a categorical prior must sum to 1.")
    )]
    NotNormalized { sum: f64 },

    #[error("prior has {supports} supports but {weights} weights")]
    #[diagnostic(
        code(provnet::prior::length_mismatch),
        help("Provide exactly one weight per support value.")
    )]
    LengthMismatch { supports: usize, weights: usize },
}

pub type PriorResult<T> = std::result::Result<T, PriorError>;

// ---------------------------------------------------------------------------
// Causal graph errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum GraphError {
    #[error("overlapped node {node}: declared as both {first} and {second}")]
    #[diagnostic(
        code(provnet::graph::overlapped_node),
        help("Every node must be exactly one of Input, Sum or Product.")
    )]
    OverlappedNode {
        node: String,
        first: &'static str,
        second: &'static str,
    },

    #[error("redundant node {node}: it has no Input, Sum or Product role")]
    #[diagnostic(
        code(provnet::graph::orphan_node),
        help("Remove the node or give it a role; orphans have no semantics.")
    )]
    OrphanNode { node: String },

    #[error("node {node} references unknown child {child}")]
    #[diagnostic(
        code(provnet::graph::unknown_child),
        help("Every child must be a node index present in the graph.")
    )]
    UnknownChild { node: String, child: usize },

    #[error("duplicate node key {key}")]
    #[diagnostic(
        code(provnet::graph::duplicate_key),
        help("Each tuple or clause may appear as at most one node.")
    )]
    DuplicateKey { key: String },

    #[error("node {node} lists itself as a child")]
    #[diagnostic(
        code(provnet::graph::self_reference),
        help("A head may not appear in its own body.")
    )]
    SelfReference { node: String },

    #[error("causal graph contains a cycle through node {node}")]
    #[diagnostic(
        code(provnet::graph::cycle),
        help("Run provenance pruning before building the causal graph.")
    )]
    Cycle { node: String },

    #[error("node key {key} is not present in the graph")]
    #[diagnostic(
        code(provnet::graph::unknown_node),
        help("Query only tuples that survived pruning and squeezing.")
    )]
    UnknownNode { key: String },

    #[error("exact evaluation needs {gates} stochastic gates, limit is {limit}")]
    #[diagnostic(
        code(provnet::graph::too_many_gates),
        help("Brute-force enumeration is for small graphs; squeeze first or use the solver.")
    )]
    TooManyGates { gates: usize, limit: usize },

    #[error("evidence has probability zero")]
    #[diagnostic(
        code(provnet::graph::impossible_evidence),
        help("The observed values contradict the model's deterministic structure.")
    )]
    ImpossibleEvidence,

    #[error("failed to write causal graph dump: {path}")]
    #[diagnostic(
        code(provnet::graph::dump_write),
        help("Ensure the dump directory exists and is writable.")
    )]
    DumpWrite {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type GraphResult<T> = std::result::Result<T, GraphError>;

// ---------------------------------------------------------------------------
// Factor graph encoding errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum EncodeError {
    #[error("clause limit {limit} is out of range")]
    #[diagnostic(
        code(provnet::encode::invalid_clause_limit),
        help("The clause limit must be between 2 and 20: phony nodes need at least 2 children and logic tables have 2^limit rows.")
    )]
    InvalidClauseLimit { limit: usize },

    #[error("factor for {node} has {arity} variables, limit is {limit}")]
    #[diagnostic(
        code(provnet::encode::arity_overflow),
        help("This is an internal error in arity decomposition; please report it.")
    )]
    ArityOverflow {
        node: String,
        arity: usize,
        limit: usize,
    },

    #[error("emitted {actual} factors, layout predicted {expected}")]
    #[diagnostic(
        code(provnet::encode::factor_count),
        help("This is an internal error in the factor layout; please report it.")
    )]
    FactorCountMismatch { expected: usize, actual: usize },

    #[error("malformed factor graph at line {line}: {message}")]
    #[diagnostic(
        code(provnet::encode::malformed),
        help("The file must follow the count / vars / cards / entries block layout.")
    )]
    Malformed { line: usize, message: String },

    #[error("failed to write {path}")]
    #[diagnostic(
        code(provnet::encode::io),
        help("Ensure the working directory exists and is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type EncodeResult<T> = std::result::Result<T, EncodeError>;

// ---------------------------------------------------------------------------
// Solver errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum SolverError {
    #[error("failed to spawn solver {program}")]
    #[diagnostic(
        code(provnet::solver::spawn),
        help("Check `solver.dir` in the config and that the binary is executable.")
    )]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("solver {program} timed out after {elapsed_ms}ms")]
    #[diagnostic(
        code(provnet::solver::timeout),
        help("The solver was killed. Increase `solver.timeout_secs` or squeeze the graph first.")
    )]
    Timeout { program: String, elapsed_ms: u128 },

    #[error("solver {program} exited with {code:?}: {stderr}")]
    #[diagnostic(
        code(provnet::solver::exit),
        help("The inference round is aborted; inspect the solver's stderr above.")
    )]
    NonZeroExit {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("solver output {path} is missing")]
    #[diagnostic(
        code(provnet::solver::missing_output),
        help("The solver exited cleanly but did not write its result file.")
    )]
    MissingOutput { path: String },

    #[error("cannot parse {path} line {line}: {message}")]
    #[diagnostic(
        code(provnet::solver::parse),
        help("Solver output lines are `<id> <prob> ...` separated by whitespace.")
    )]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    #[error("solver result refers to unknown {what} {id}")]
    #[diagnostic(
        code(provnet::solver::unknown_id),
        help("The result file does not match the factor graph that was written.")
    )]
    UnknownId { what: &'static str, id: usize },

    #[error("solver I/O failed on {path}")]
    #[diagnostic(
        code(provnet::solver::io),
        help("Ensure the working directory exists and is writable.")
    )]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

pub type SolverResult<T> = std::result::Result<T, SolverError>;

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ConfigError {
    #[error("failed to read config: {path}")]
    #[diagnostic(
        code(provnet::config::read),
        help("Ensure the config file exists and is valid TOML.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {path}")]
    #[diagnostic(
        code(provnet::config::parse),
        help("Check the TOML syntax in the config file.")
    )]
    Parse { path: String, message: String },

    #[error("failed to write config: {path}")]
    #[diagnostic(
        code(provnet::config::write),
        help("Ensure you have write permissions to the config directory.")
    )]
    Write {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config value for {field}: {message}")]
    #[diagnostic(code(provnet::config::invalid))]
    Invalid { field: &'static str, message: String },
}

pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// ---------------------------------------------------------------------------
// Problem file errors
// ---------------------------------------------------------------------------

#[derive(Debug, Error, Diagnostic)]
pub enum ProblemError {
    #[error("failed to read problem file: {path}")]
    #[diagnostic(
        code(provnet::problem::read),
        help("Ensure the problem file exists and is readable.")
    )]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse tuple {text:?}")]
    #[diagnostic(
        code(provnet::problem::bad_tuple),
        help("Write tuples as `relation(arg1,arg2)` or a bare relation name.")
    )]
    BadTuple { text: String },

    #[error("failed to parse problem file: {path}")]
    #[diagnostic(
        code(provnet::problem::parse),
        help("Problem files are JSON with inputs, outputs and constraints.")
    )]
    Parse { path: String, message: String },
}

pub type ProblemResult<T> = std::result::Result<T, ProblemError>;

/// Convenience result type for provnet operations.
pub type ProvnetResult<T> = std::result::Result<T, ProvnetError>;
