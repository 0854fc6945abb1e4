use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use sweepgen_core::errors::{ErrorInfo, SweepError};
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::document::{apply_delta, diff, DocumentFormat};
use crate::sweep::{Arm, Sweep, SweepKind};
use crate::validate::{schema_violation, DocumentValidator};

/// File stem of the base template inside the input root.
pub const BASE_STEM: &str = "base";

fn malformed(code: &str, message: impl Into<String>, path: &Path) -> SweepError {
    SweepError::MalformedInput(
        ErrorInfo::new(code, message).with_context("path", path.display().to_string()),
    )
}

/// Base template plus the sweeps discovered under an input root.
#[derive(Debug, Clone)]
pub struct SweepRepository {
    pub base: Value,
    pub format: DocumentFormat,
    pub sweeps: Vec<Sweep>,
}

impl SweepRepository {
    /// Loads `base.{json,yaml,yml}` and one sweep per sub-directory of `root`.
    ///
    /// Every document inside a sweep directory becomes an arm whose delta is
    /// the structural difference between that document and the base. When a
    /// validator is supplied, each arm applied onto the base is validated.
    pub fn load(root: &Path, validator: Option<&dyn DocumentValidator>) -> Result<Self, SweepError> {
        let entries = sorted_entries(root)?;
        let (base_path, format) = find_base(root, &entries)?;
        let base = read_document(&base_path, format)?;
        if let Some(validator) = validator {
            validator
                .validate(&base)
                .map_err(|violations| schema_violation("repository.base_schema", violations))?;
        }
        debug!(path = %base_path.display(), "loaded base template");

        let mut sweeps = Vec::new();
        for entry in entries.iter().filter(|entry| entry.file_type().is_dir()) {
            if let Some(sweep) = load_sweep(entry.path(), &base, validator)? {
                debug!(sweep = %sweep.name, arms = sweep.arms.len(), "discovered sweep");
                sweeps.push(sweep);
            }
        }
        Ok(Self {
            base,
            format,
            sweeps,
        })
    }
}

fn sorted_entries(dir: &Path) -> Result<Vec<DirEntry>, SweepError> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
    {
        let entry = entry.map_err(|err| malformed("repository.read_dir", err.to_string(), dir))?;
        if is_hidden(&entry) {
            continue;
        }
        entries.push(entry);
    }
    Ok(entries)
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry
        .file_name()
        .to_str()
        .map(|name| name.starts_with('.'))
        .unwrap_or(false)
}

fn find_base(root: &Path, entries: &[DirEntry]) -> Result<(PathBuf, DocumentFormat), SweepError> {
    let candidates: Vec<(PathBuf, DocumentFormat)> = entries
        .iter()
        .filter(|entry| entry.file_type().is_file())
        .filter(|entry| entry.path().file_stem().and_then(|s| s.to_str()) == Some(BASE_STEM))
        .filter_map(|entry| {
            DocumentFormat::from_path(entry.path()).map(|format| (entry.path().to_path_buf(), format))
        })
        .collect();
    let mut found = candidates.into_iter();
    match (found.next(), found.next()) {
        (Some(only), None) => Ok(only),
        (None, _) => Err(malformed(
            "repository.no_base",
            "input root has no base template (base.json, base.yaml or base.yml)",
            root,
        )),
        (Some(_), Some(_)) => Err(malformed(
            "repository.ambiguous_base",
            "input root has more than one base template",
            root,
        )),
    }
}

fn read_document(path: &Path, format: DocumentFormat) -> Result<Value, SweepError> {
    let bytes = fs::read(path).map_err(|err| malformed("repository.read", err.to_string(), path))?;
    format
        .parse(&bytes)
        .map_err(|err| malformed("repository.parse", err, path))
}

fn load_sweep(
    dir: &Path,
    base: &Value,
    validator: Option<&dyn DocumentValidator>,
) -> Result<Option<Sweep>, SweepError> {
    let name = dir
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| malformed("repository.sweep_name", "sweep directory name is not UTF-8", dir))?
        .to_string();
    let entries = sorted_entries(dir)?;
    if entries.is_empty() {
        warn!(sweep = %name, "skipping empty sweep directory");
        return Ok(None);
    }

    let mut arms = Vec::new();
    for entry in entries.iter().filter(|entry| entry.file_type().is_file()) {
        let Some(format) = DocumentFormat::from_path(entry.path()) else {
            continue;
        };
        let arm_name = entry
            .path()
            .file_stem()
            .and_then(|stem| stem.to_str())
            .ok_or_else(|| malformed("repository.arm_name", "arm file name is not UTF-8", entry.path()))?
            .to_string();
        let fragment = read_document(entry.path(), format)?;
        let delta = diff(base, &fragment);
        if let Some(validator) = validator {
            let mut merged = base.clone();
            apply_delta(&mut merged, &delta).map_err(|missing| {
                malformed("repository.delta", missing.reason, entry.path())
            })?;
            validator.validate(&merged).map_err(|violations| {
                let err = schema_violation("repository.schema", violations);
                with_arm_context(err, &name, &arm_name)
            })?;
        }
        if arms.iter().any(|arm: &Arm| arm.name == arm_name) {
            return Err(malformed(
                "repository.duplicate_arm",
                format!("arm {arm_name} is defined by more than one file"),
                dir,
            ));
        }
        arms.push(Arm::new(arm_name, delta));
    }
    if arms.is_empty() {
        return Err(malformed(
            "repository.empty_sweep",
            format!("sweep {name} contains no configuration fragments"),
            dir,
        ));
    }
    Ok(Some(Sweep::new(name, SweepKind::Described, arms)))
}

fn with_arm_context(err: SweepError, sweep: &str, arm: &str) -> SweepError {
    match err {
        SweepError::SchemaViolation(info) => SweepError::SchemaViolation(
            info.with_context("sweep", sweep).with_context("arm", arm),
        ),
        other => other,
    }
}
