//! Pipeline configuration, persisted as TOML.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};
use crate::factor::{DEFAULT_CLAUSE_LIMIT, MAX_CLAUSE_LIMIT};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProvnetConfig {
    #[serde(default)]
    pub prune: PruneConfig,
    #[serde(default)]
    pub encode: EncodeConfig,
    #[serde(default)]
    pub squeeze: SqueezeConfig,
    #[serde(default)]
    pub solver: SolverConfig,
    /// Directory the factor graph and list files are written to.
    #[serde(default = "default_work_dir")]
    pub work_dir: PathBuf,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PruneConfig {
    /// Re-admit non-forward clauses that keep the active set acyclic.
    #[serde(default = "default_augment")]
    pub augment: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodeConfig {
    /// Maximum children per emitted factor besides head and gate.
    #[serde(default = "default_clause_limit")]
    pub clause_limit: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SqueezeConfig {
    #[serde(default)]
    pub enabled: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SolverConfig {
    /// Directory holding the solver executables.
    #[serde(default = "default_solver_dir")]
    pub dir: PathBuf,
    #[serde(default = "default_updater")]
    pub updater: String,
    #[serde(default = "default_predictor")]
    pub predictor: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("work")
}
fn default_augment() -> bool {
    true
}
fn default_clause_limit() -> usize {
    DEFAULT_CLAUSE_LIMIT
}
fn default_solver_dir() -> PathBuf {
    PathBuf::from(".")
}
fn default_updater() -> String {
    "updater".into()
}
fn default_predictor() -> String {
    "predictor".into()
}
fn default_timeout() -> u64 {
    600
}

impl Default for ProvnetConfig {
    fn default() -> Self {
        Self {
            prune: PruneConfig::default(),
            encode: EncodeConfig::default(),
            squeeze: SqueezeConfig::default(),
            solver: SolverConfig::default(),
            work_dir: default_work_dir(),
        }
    }
}

impl Default for PruneConfig {
    fn default() -> Self {
        Self {
            augment: default_augment(),
        }
    }
}

impl Default for EncodeConfig {
    fn default() -> Self {
        Self {
            clause_limit: default_clause_limit(),
        }
    }
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            dir: default_solver_dir(),
            updater: default_updater(),
            predictor: default_predictor(),
            timeout_secs: default_timeout(),
        }
    }
}

impl ProvnetConfig {
    /// Load from a TOML file and validate.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let config: Self = toml::from_str(&content).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Save to a TOML file, creating parent directories.
    pub fn save(&self, path: &Path) -> ConfigResult<()> {
        let content = toml::to_string_pretty(self).map_err(|e| ConfigError::Parse {
            path: path.display().to_string(),
            message: e.to_string(),
        })?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| ConfigError::Write {
                path: parent.display().to_string(),
                source: e,
            })?;
        }
        std::fs::write(path, content).map_err(|e| ConfigError::Write {
            path: path.display().to_string(),
            source: e,
        })
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if !(2..=MAX_CLAUSE_LIMIT).contains(&self.encode.clause_limit) {
            return Err(ConfigError::Invalid {
                field: "encode.clause_limit",
                message: format!(
                    "must be between 2 and {MAX_CLAUSE_LIMIT}, got {}",
                    self.encode.clause_limit
                ),
            });
        }
        if self.solver.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "solver.timeout_secs",
                message: "must be positive".into(),
            });
        }
        for (field, name) in [
            ("solver.updater", &self.solver.updater),
            ("solver.predictor", &self.solver.predictor),
        ] {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid {
                    field,
                    message: "executable name is empty".into(),
                });
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let c = ProvnetConfig::default();
        assert!(c.prune.augment);
        assert_eq!(c.encode.clause_limit, 15);
        assert!(!c.squeeze.enabled);
        assert_eq!(c.solver.timeout_secs, 600);
        assert!(c.validate().is_ok());
    }

    #[test]
    fn partial_toml_fills_defaults() {
        let c: ProvnetConfig = toml::from_str("[encode]\nclause_limit = 4\n").unwrap();
        assert_eq!(c.encode.clause_limit, 4);
        assert!(c.prune.augment);
        assert_eq!(c.solver.updater, "updater");
    }

    #[test]
    fn save_then_load() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("nested").join("provnet.toml");
        let mut c = ProvnetConfig::default();
        c.squeeze.enabled = true;
        c.solver.timeout_secs = 30;
        c.save(&path).unwrap();
        assert_eq!(ProvnetConfig::load(&path).unwrap(), c);
    }

    #[test]
    fn invalid_values_are_rejected() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[encode]\nclause_limit = 1\n").unwrap();
        assert!(matches!(
            ProvnetConfig::load(&path),
            Err(ConfigError::Invalid {
                field: "encode.clause_limit",
                ..
            })
        ));
        std::fs::write(&path, "[encode]\nclause_limit = 40\n").unwrap();
        assert!(matches!(
            ProvnetConfig::load(&path),
            Err(ConfigError::Invalid {
                field: "encode.clause_limit",
                ..
            })
        ));
        std::fs::write(&path, "not = [toml").unwrap();
        assert!(matches!(ProvnetConfig::load(&path), Err(ConfigError::Parse { .. })));
        assert!(matches!(
            ProvnetConfig::load(&dir.path().join("missing.toml")),
            Err(ConfigError::Read { .. })
        ));
    }
}
