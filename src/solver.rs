//! External solver invocation.
//!
//! The solver is a pair of executables sharing a working directory with the
//! driver: the updater learns prior weights from observations, the predictor
//! computes marginals for queried variables. [`ProcessSolver`] runs them as
//! subprocesses under a timeout; [`SolverBackend`] lets tests substitute an
//! in-process implementation.

use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

use crate::config::SolverConfig;
use crate::error::{SolverError, SolverResult};

/// Interval between `try_wait` polls while a solver runs.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// The files exchanged with the solver, all inside one working directory.
#[derive(Debug, Clone)]
pub struct SolverFiles {
    dir: PathBuf,
}

impl SolverFiles {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn factor_graph(&self) -> PathBuf {
        self.dir.join("causal.fg")
    }

    pub fn priors(&self) -> PathBuf {
        self.dir.join("priors.list")
    }

    pub fn params(&self) -> PathBuf {
        self.dir.join("params.list")
    }

    pub fn observations(&self) -> PathBuf {
        self.dir.join("obs.list")
    }

    pub fn queries(&self) -> PathBuf {
        self.dir.join("query.list")
    }

    /// Updater output.
    pub fn weights(&self) -> PathBuf {
        self.dir.join("weights.list")
    }

    /// Predictor output.
    pub fn predictions(&self) -> PathBuf {
        self.dir.join("prediction.list")
    }

    fn stderr_log(&self) -> PathBuf {
        self.dir.join("solver.stderr")
    }

    pub fn write(&self, path: &Path, content: &str) -> SolverResult<()> {
        std::fs::write(path, content).map_err(|e| SolverError::Io {
            path: path.display().to_string(),
            source: e,
        })
    }

    /// Read a solver output file, reporting a missing file as `MissingOutput`.
    pub fn read_output(&self, path: &Path) -> SolverResult<String> {
        match std::fs::read_to_string(path) {
            Ok(text) => Ok(text),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(SolverError::MissingOutput {
                path: path.display().to_string(),
            }),
            Err(e) => Err(SolverError::Io {
                path: path.display().to_string(),
                source: e,
            }),
        }
    }

    /// Remove a previous run's output so a silent solver cannot leave stale data.
    pub fn clear_output(&self, path: &Path) -> SolverResult<()> {
        match std::fs::remove_file(path) {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(SolverError::Io {
                path: path.display().to_string(),
                source: e,
            }),
            _ => Ok(()),
        }
    }
}

/// Something that can run the update and predict steps over [`SolverFiles`].
///
/// `update` reads `causal.fg`, `obs.list` and `params.list` and writes
/// `weights.list`; `predict` reads `causal.fg` and `query.list` and writes
/// `prediction.list`.
pub trait SolverBackend {
    fn update(&self, files: &SolverFiles) -> SolverResult<()>;

    fn predict(&self, files: &SolverFiles) -> SolverResult<()>;
}

/// Runs the `updater` / `predictor` executables found in one directory.
#[derive(Debug, Clone)]
pub struct ProcessSolver {
    dir: PathBuf,
    updater: String,
    predictor: String,
    timeout: Duration,
    deadline: Option<Instant>,
}

impl ProcessSolver {
    pub fn new(dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            dir: dir.into(),
            updater: "updater".into(),
            predictor: "predictor".into(),
            timeout,
            deadline: None,
        }
    }

    pub fn from_config(config: &SolverConfig) -> Self {
        Self {
            dir: config.dir.clone(),
            updater: config.updater.clone(),
            predictor: config.predictor.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            deadline: None,
        }
    }

    /// Also stop at an absolute deadline shared by every invocation.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Time the next invocation may take.
    pub fn budget(&self) -> Duration {
        match self.deadline {
            Some(d) => self.timeout.min(d.saturating_duration_since(Instant::now())),
            None => self.timeout,
        }
    }

    fn run(&self, name: &str, args: &[PathBuf], files: &SolverFiles) -> SolverResult<()> {
        let program = self.dir.join(name);
        let program_display = program.display().to_string();
        let budget = self.budget();
        if budget.is_zero() {
            return Err(SolverError::Timeout {
                program: program_display,
                elapsed_ms: 0,
            });
        }

        let stderr_path = files.stderr_log();
        let stderr = std::fs::File::create(&stderr_path).map_err(|e| SolverError::Io {
            path: stderr_path.display().to_string(),
            source: e,
        })?;

        tracing::info!(program = %program_display, budget_ms = budget.as_millis() as u64, "starting solver");
        let started = Instant::now();
        let mut child = Command::new(&program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(stderr)
            .spawn()
            .map_err(|e| SolverError::Spawn {
                program: program_display.clone(),
                source: e,
            })?;

        let deadline = started + budget;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) => {
                    if Instant::now() >= deadline {
                        let _ = child.kill();
                        let _ = child.wait();
                        tracing::warn!(program = %program_display, "solver timed out, killed");
                        return Err(SolverError::Timeout {
                            program: program_display,
                            elapsed_ms: started.elapsed().as_millis(),
                        });
                    }
                    std::thread::sleep(POLL_INTERVAL);
                }
                Err(e) => {
                    let _ = child.kill();
                    let _ = child.wait();
                    return Err(SolverError::Io {
                        path: program_display,
                        source: e,
                    });
                }
            }
        };

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if !status.success() {
            let stderr = std::fs::read_to_string(&stderr_path).unwrap_or_default();
            return Err(SolverError::NonZeroExit {
                program: program_display,
                code: status.code(),
                stderr: stderr.trim().to_string(),
            });
        }
        tracing::info!(program = %program_display, elapsed_ms, "solver finished");
        Ok(())
    }
}

impl SolverBackend for ProcessSolver {
    fn update(&self, files: &SolverFiles) -> SolverResult<()> {
        let args = [
            files.factor_graph(),
            files.observations(),
            files.params(),
            files.weights(),
        ];
        self.run(&self.updater, &args, files)
    }

    fn predict(&self, files: &SolverFiles) -> SolverResult<()> {
        let args = [files.factor_graph(), files.queries(), files.predictions()];
        self.run(&self.predictor, &args, files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names() {
        let files = SolverFiles::new("/tmp/work");
        assert_eq!(files.factor_graph(), Path::new("/tmp/work/causal.fg"));
        assert_eq!(files.observations(), Path::new("/tmp/work/obs.list"));
        assert_eq!(files.predictions(), Path::new("/tmp/work/prediction.list"));
        assert_eq!(files.weights(), Path::new("/tmp/work/weights.list"));
    }

    #[test]
    fn budget_is_capped_by_deadline() {
        let solver = ProcessSolver::new("bin", Duration::from_secs(600));
        assert_eq!(solver.budget(), Duration::from_secs(600));
        let solver = solver.with_deadline(Instant::now() + Duration::from_secs(5));
        assert!(solver.budget() <= Duration::from_secs(5));
    }

    #[test]
    fn expired_deadline_times_out_without_spawning() {
        let dir = tempfile::TempDir::new().unwrap();
        let files = SolverFiles::new(dir.path());
        let solver = ProcessSolver::new(dir.path(), Duration::from_secs(1)).with_deadline(Instant::now());
        let err = solver.predict(&files).unwrap_err();
        assert!(matches!(err, SolverError::Timeout { elapsed_ms: 0, .. }));
    }

    #[test]
    fn missing_binary_is_a_spawn_error() {
        let dir = tempfile::TempDir::new().unwrap();
        let files = SolverFiles::new(dir.path());
        let solver = ProcessSolver::new(dir.path().join("nope"), Duration::from_secs(1));
        assert!(matches!(solver.update(&files), Err(SolverError::Spawn { .. })));
    }

    #[test]
    fn missing_output_and_stale_output() {
        let dir = tempfile::TempDir::new().unwrap();
        let files = SolverFiles::new(dir.path());
        let path = files.predictions();
        assert!(matches!(
            files.read_output(&path),
            Err(SolverError::MissingOutput { .. })
        ));
        files.write(&path, "1 0.5\n").unwrap();
        assert_eq!(files.read_output(&path).unwrap(), "1 0.5\n");
        files.clear_output(&path).unwrap();
        files.clear_output(&path).unwrap();
        assert!(!path.exists());
    }
}
