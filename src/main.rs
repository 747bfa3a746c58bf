//! provnet CLI: prune derivations, compile causal graphs, run the solver.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use miette::{IntoDiagnostic, Result};

use provnet::config::ProvnetConfig;
use provnet::driver::CausalDriver;
use provnet::factor::FactorEncoder;
use provnet::problem::{ObservationFile, ProblemFile};
use provnet::solver::{ProcessSolver, SolverFiles};
use provnet::tuple::Tuple;

#[derive(Parser)]
#[command(name = "provnet", version, about = "Derivation provenance to probabilistic factor graphs")]
struct Cli {
    /// TOML config file (defaults are used when absent).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Prune a problem's constraints and dump the active clause set.
    Prune {
        /// Problem file (JSON).
        problem: PathBuf,

        /// Output directory (defaults to the configured work dir).
        #[arg(long)]
        out: Option<PathBuf>,

        /// Keep only forward clauses.
        #[arg(long)]
        no_augment: bool,
    },

    /// Build the causal graph and write it with its factor graph.
    Compile {
        problem: PathBuf,

        #[arg(long)]
        out: Option<PathBuf>,

        /// Squeeze the graph, keeping the outputs addressable.
        #[arg(long)]
        squeeze: bool,

        /// Print the Graphviz rendering to stdout.
        #[arg(long)]
        dot: bool,
    },

    /// Ask the predictor for tuple marginals.
    Query {
        problem: PathBuf,

        /// Tuples to query, e.g. `path(a,b)`; defaults to the problem's outputs.
        #[arg(long = "tuple")]
        tuples: Vec<String>,

        #[arg(long)]
        squeeze: bool,
    },

    /// Learn priors from observation traces, then report the outputs.
    Update {
        problem: PathBuf,

        /// Observation file (JSON traces).
        #[arg(long)]
        observations: PathBuf,

        #[arg(long)]
        squeeze: bool,
    },

    /// Write a config file with every default spelled out.
    InitConfig {
        #[arg(default_value = "provnet.toml")]
        path: PathBuf,
    },
}

fn main() -> Result<()> {
    miette::set_hook(Box::new(|_| {
        Box::new(
            miette::MietteHandlerOpts::new()
                .terminal_links(true)
                .unicode(true)
                .context_lines(3)
                .build(),
        )
    }))
    .ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => ProvnetConfig::load(path)?,
        None => ProvnetConfig::default(),
    };

    match cli.command {
        Commands::Prune {
            problem,
            out,
            no_augment,
        } => {
            let problem = ProblemFile::load(&problem)?;
            let provenance = problem.prune(config.prune.augment && !no_augment);
            let dir = work_dir(out.as_deref(), &config)?;
            provenance.dump(&dir)?;

            let s = provenance.stats();
            println!("Pruned {} ({} clauses):", problem.name, s.clauses);
            println!("  forward:   {}", s.forward);
            println!("  augmented: {}", s.augmented);
            println!("  rejected:  {}", s.rejected);
            println!(
                "  active:    {} clauses over {} tuples",
                s.active_clauses, s.active_tuples
            );
            println!("Dumped to {}", dir.display());
        }

        Commands::Compile {
            problem,
            out,
            squeeze,
            dot,
        } => {
            let problem = ProblemFile::load(&problem)?;
            let compiled = problem.compile(&config, squeeze || config.squeeze.enabled)?;
            let dir = work_dir(out.as_deref(), &config)?;
            compiled.provenance.dump(&dir)?;
            compiled.graph.dump(&dir)?;

            let encoder = FactorEncoder::new(config.encode.clause_limit)?;
            let encoded = encoder.encode(&compiled.graph, 0)?;
            let files = SolverFiles::new(&dir);
            encoded.graph.save(&files.factor_graph())?;

            if let Some(stats) = &compiled.squeeze {
                println!(
                    "Squeezed {} -> {} nodes (folded {}, merged {}, spliced {}, pruned {})",
                    stats.nodes_before,
                    stats.nodes_after,
                    stats.folded,
                    stats.merged,
                    stats.spliced,
                    stats.pruned
                );
            }
            println!(
                "Causal graph {}: {} nodes, {} priors, {} factors",
                compiled.graph.name(),
                compiled.graph.len(),
                compiled.graph.priors().len(),
                encoded.graph.factors.len()
            );
            if dot {
                print!("{}", compiled.graph.to_dot());
            }
        }

        Commands::Query {
            problem,
            tuples,
            squeeze,
        } => {
            let problem = ProblemFile::load(&problem)?;
            let queries = if tuples.is_empty() {
                problem.outputs.clone()
            } else {
                parse_tuples(&tuples)?
            };
            let mut driver = open_driver(&problem, &config, squeeze, &queries)?;
            let marginals = driver.query_marginals(&queries)?;
            print_marginals(&queries, &marginals);
        }

        Commands::Update {
            problem,
            observations,
            squeeze,
        } => {
            let problem = ProblemFile::load(&problem)?;
            let traces = ObservationFile::load(&observations)?.to_maps();
            let observed: Vec<Tuple> = traces
                .iter()
                .flat_map(|t| t.keys().cloned())
                .collect::<std::collections::HashSet<_>>()
                .into_iter()
                .collect();
            let mut driver = open_driver(&problem, &config, squeeze, &observed)?;
            match traces.as_slice() {
                [single] => driver.update_with_observation(single)?,
                many => driver.update_with_traces(many)?,
            }

            println!("Learned priors:");
            for (i, p) in driver.graph().priors().iter().enumerate() {
                println!("  P{i}: {p} (mean {:.4})", p.mean());
            }
            let marginals = driver.query_marginals(&problem.outputs)?;
            print_marginals(&problem.outputs, &marginals);
        }

        Commands::InitConfig { path } => {
            ProvnetConfig::default().save(&path)?;
            println!("Wrote {}", path.display());
        }
    }

    Ok(())
}

fn work_dir(out: Option<&Path>, config: &ProvnetConfig) -> Result<PathBuf> {
    let dir = out.map(Path::to_path_buf).unwrap_or_else(|| config.work_dir.clone());
    std::fs::create_dir_all(&dir).into_diagnostic()?;
    Ok(dir)
}

fn parse_tuples(texts: &[String]) -> Result<Vec<Tuple>> {
    texts
        .iter()
        .map(|t| t.parse::<Tuple>().map_err(miette::Report::new))
        .collect()
}

fn open_driver(
    problem: &ProblemFile,
    config: &ProvnetConfig,
    squeeze: bool,
    reserve: &[Tuple],
) -> Result<CausalDriver<ProcessSolver>> {
    let started = Instant::now();
    let compiled = problem.compile_reserving(config, squeeze || config.squeeze.enabled, reserve)?;
    let dir = work_dir(None, config)?;
    let encoder = FactorEncoder::new(config.encode.clause_limit)?;
    let solver = ProcessSolver::from_config(&config.solver)
        .with_deadline(started + std::time::Duration::from_secs(config.solver.timeout_secs));
    Ok(CausalDriver::new(
        compiled.graph,
        encoder,
        solver,
        SolverFiles::new(dir),
    ))
}

fn print_marginals(queries: &[Tuple], marginals: &std::collections::HashMap<Tuple, f64>) {
    println!("Marginals:");
    for q in queries {
        match marginals.get(q) {
            Some(p) => println!("  {q}: {p:.4}"),
            None => println!("  {q}: (not in graph)"),
        }
    }
}
