use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sweepgen_core::errors::{ErrorInfo, SweepError};

use crate::enumerate::DesignOptions;
use crate::merge::MergeMode;
use crate::registry::RetryPolicy;
use crate::serde::from_yaml_slice;
use crate::seeds::SeedOptions;

/// Experiment name used when none is configured.
pub const DEFAULT_EXPERIMENT: &str = "EXPERIMENT";

/// Explicit context for one generation run, loadable from YAML.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    /// Directory holding the base template and one sub-directory per sweep.
    pub input_root: PathBuf,
    /// Directory receiving the scenario files; must be empty or missing.
    pub output_dir: PathBuf,
    /// Location of the CSV manifest.
    pub manifest_path: PathBuf,
    #[serde(default)]
    pub experiment: ExperimentConfig,
    /// First identifier handed out when no registry is used.
    #[serde(default)]
    pub start_id: u64,
    #[serde(default)]
    pub seeds: SeedOptions,
    #[serde(default)]
    pub mode: RunMode,
    /// Write per-arm deltas instead of merged documents.
    #[serde(default)]
    pub patches: bool,
    /// Validate base, arms and scenarios when a validator is available.
    #[serde(default = "default_true")]
    pub validate: bool,
    #[serde(default = "default_true")]
    pub min_three_sweeps: bool,
    /// Worker threads used for merging and writing.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    #[serde(default)]
    pub registry: Option<RegistryConfig>,
}

fn default_true() -> bool {
    true
}

fn default_parallelism() -> usize {
    1
}

/// What a run produces.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunMode {
    /// Scenarios plus manifest.
    #[default]
    Full,
    /// Manifest only.
    WriteListOnly,
    /// Scenarios for the rows of an existing manifest only.
    ReadList,
}

impl RunMode {
    pub fn is_restricted(self) -> bool {
        matches!(self, RunMode::ReadList)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExperimentConfig {
    #[serde(default = "default_experiment_name")]
    pub name: String,
    #[serde(default)]
    pub description: Option<String>,
}

fn default_experiment_name() -> String {
    DEFAULT_EXPERIMENT.to_string()
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            name: default_experiment_name(),
            description: None,
        }
    }
}

/// Shared SQLite registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    pub path: PathBuf,
    /// How long a call waits on a locked registry before timing out.
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

fn default_timeout_ms() -> u64 {
    5_000
}

fn default_max_attempts() -> u32 {
    3
}

fn default_backoff_ms() -> u64 {
    200
}

impl RegistryConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            timeout_ms: default_timeout_ms(),
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff_ms: self.backoff_ms,
        }
    }
}

fn invalid(code: &str, message: &str) -> SweepError {
    SweepError::MalformedInput(ErrorInfo::new(code, message))
}

impl RunConfig {
    /// Config with every optional field at its default.
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
        manifest_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            input_root: input_root.into(),
            output_dir: output_dir.into(),
            manifest_path: manifest_path.into(),
            experiment: ExperimentConfig::default(),
            start_id: 0,
            seeds: SeedOptions::default(),
            mode: RunMode::default(),
            patches: false,
            validate: true,
            min_three_sweeps: true,
            parallelism: 1,
            registry: None,
        }
    }

    /// Reads a YAML run configuration. The result is not checked yet, so
    /// callers can still override fields before [`RunConfig::check`].
    pub fn from_yaml_path(path: &Path) -> Result<Self, SweepError> {
        let bytes = fs::read(path).map_err(|err| {
            SweepError::Io(
                ErrorInfo::new("config.read", err.to_string())
                    .with_context("path", path.display().to_string()),
            )
        })?;
        from_yaml_slice(&bytes)
    }

    /// Rejects option combinations that cannot be honoured together.
    pub fn check(&self) -> Result<(), SweepError> {
        if self.parallelism == 0 {
            return Err(invalid("config.parallelism", "parallelism must be at least 1"));
        }
        let name = self.experiment.name.as_str();
        if name.is_empty() || name == "." || name == ".." || name.contains(['/', '\\']) {
            return Err(SweepError::MalformedInput(
                ErrorInfo::new(
                    "config.experiment_name",
                    "experiment name must be a plain file name prefix",
                )
                .with_context("name", name),
            ));
        }
        if self.registry.is_none() {
            return Ok(());
        }
        if self
            .experiment
            .description
            .as_deref()
            .map_or(true, |desc| desc.trim().is_empty())
        {
            return Err(invalid(
                "config.registry_description",
                "a registry run needs an experiment description",
            ));
        }
        if self.start_id != 0 {
            return Err(invalid(
                "config.registry_start_id",
                "scenario identifiers are assigned by the registry",
            ));
        }
        Ok(())
    }

    pub fn design_options(&self) -> DesignOptions {
        DesignOptions {
            min_three_sweeps: self.min_three_sweeps,
        }
    }

    pub fn merge_mode(&self) -> MergeMode {
        if self.patches {
            MergeMode::Patch
        } else {
            MergeMode::Document
        }
    }
}
