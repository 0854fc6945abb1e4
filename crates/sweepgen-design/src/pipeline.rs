use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use sweepgen_core::errors::{ErrorInfo, SweepError};
use tracing::{debug, info, warn};

use crate::config::{RunConfig, RunMode};
use crate::enumerate::{enumerate, Design};
use crate::manifest::{read_manifest, write_manifest};
use crate::merge::{MergeEngine, Scenario};
use crate::registry::{Experiment, Registry};
use crate::repository::SweepRepository;
use crate::seeds::seed_sweep;
use crate::sweep::Combination;
use crate::validate::{schema_violation, DocumentValidator};
use crate::writer::OutputWriter;

/// Summary of a completed run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunReport {
    /// Size of the full cross product, whatever subset was written.
    pub design_size: usize,
    /// Hash of the sweep and arm universe.
    pub fingerprint: String,
    /// Scenario files in identifier order.
    pub written: Vec<PathBuf>,
    /// Manifest written by this run, if any.
    pub manifest: Option<PathBuf>,
    pub experiment_id: Option<i64>,
    /// Lowest identifier assigned by the registry.
    pub registry_offset: Option<u64>,
}

/// Generates the scenarios and manifest described by `config`.
///
/// When any scenario fails to merge, validate or write, the scenarios
/// already written by this run are removed and no manifest is written, so
/// the output directory is left empty. The first failure in combination
/// order is returned.
pub fn run(
    config: &RunConfig,
    registry: &dyn Registry,
    validator: Option<&dyn DocumentValidator>,
) -> Result<RunReport, SweepError> {
    config.check()?;
    let validator = validator.filter(|_| config.validate);
    let restricted = config.mode.is_restricted();

    let repository = SweepRepository::load(&config.input_root, validator)?;
    // the target directory is checked before anything is registered
    let writer = match config.mode {
        RunMode::WriteListOnly => None,
        RunMode::Full | RunMode::ReadList => Some(OutputWriter::create(
            &config.output_dir,
            config.experiment.name.as_str(),
            repository.format,
        )?),
    };

    let mut sweeps = repository.sweeps;
    if let Some(seeds) = seed_sweep(&config.seeds)? {
        sweeps.push(seeds);
    }
    let design = enumerate(sweeps, config.start_id, &config.design_options())?;
    let fingerprint = design.fingerprint()?;
    info!(
        sweeps = design.sweeps.len(),
        combinations = design.combinations.len(),
        fingerprint = %fingerprint,
        "enumerated design"
    );

    let mut combinations = if restricted {
        let listed = read_manifest(&config.manifest_path, &design)?;
        info!(
            manifest = %config.manifest_path.display(),
            listed = listed.len(),
            "restricted to manifest rows"
        );
        listed
    } else {
        design.combinations.clone()
    };

    let mut experiment_id = None;
    let mut registry_offset = None;
    match config.mode {
        RunMode::Full => {
            let experiment = Experiment {
                name: config.experiment.name.clone(),
                description: config.experiment.description.clone(),
                signatures: combinations.iter().map(|c| design.signature(c)).collect(),
            };
            if let Some(assignment) = registry.synchronize(&experiment)? {
                renumber(&mut combinations, &assignment.ids)?;
                experiment_id = Some(assignment.experiment_id);
                registry_offset = assignment.offset();
            }
        }
        RunMode::ReadList if config.registry.is_some() => {
            warn!(
                registry = %registry.label(),
                "registry identifiers are not re-consulted when regenerating from a manifest"
            );
        }
        RunMode::ReadList | RunMode::WriteListOnly => {}
    }

    let written = match &writer {
        Some(writer) => {
            let engine = MergeEngine::new(Arc::new(repository.base));
            write_all(config, &design, &combinations, &engine, writer, validator)?
        }
        None => Vec::new(),
    };

    let manifest = if restricted {
        None
    } else {
        write_manifest(&config.manifest_path, &design, &combinations)?;
        Some(config.manifest_path.clone())
    };

    info!(
        written = written.len(),
        design_size = design.combinations.len(),
        "run complete"
    );
    Ok(RunReport {
        design_size: design.combinations.len(),
        fingerprint,
        written,
        manifest,
        experiment_id,
        registry_offset,
    })
}

fn renumber(combinations: &mut [Combination], ids: &[u64]) -> Result<(), SweepError> {
    if ids.len() != combinations.len() {
        return Err(SweepError::RegistryConflict(
            ErrorInfo::new("registry.id_count", "registry returned the wrong number of identifiers")
                .with_context("expected", combinations.len().to_string())
                .with_context("received", ids.len().to_string()),
        ));
    }
    for (combination, &id) in combinations.iter_mut().zip(ids) {
        combination.id = id;
    }
    Ok(())
}

fn write_all(
    config: &RunConfig,
    design: &Design,
    combinations: &[Combination],
    engine: &MergeEngine,
    writer: &OutputWriter,
    validator: Option<&dyn DocumentValidator>,
) -> Result<Vec<PathBuf>, SweepError> {
    let mode = config.merge_mode();
    let pool = rayon::ThreadPoolBuilder::new()
        .num_threads(config.parallelism.max(1))
        .build()
        .map_err(|err| SweepError::Io(ErrorInfo::new("thread_pool", err.to_string())))?;

    let results: Vec<Result<(usize, PathBuf), SweepError>> = pool.install(|| {
        combinations
            .par_iter()
            .enumerate()
            .map(|(index, combination)| -> Result<(usize, PathBuf), SweepError> {
                let scenario = engine.scenario(design, combination, mode)?;
                if let (Some(validator), Scenario::Document(doc)) = (validator, &scenario) {
                    validator.validate(doc).map_err(|violations| {
                        let err = schema_violation("scenario.schema", violations);
                        SweepError::SchemaViolation(
                            err.info()
                                .clone()
                                .with_context("combination", combination.id.to_string()),
                        )
                    })?;
                }
                let path = writer.write(combination.id, &scenario)?;
                debug!(id = combination.id, path = %path.display(), "wrote scenario");
                Ok((index, path))
            })
            .collect()
    });

    let mut ordered = Vec::with_capacity(results.len());
    let mut first_error = None;
    for result in results {
        match result {
            Ok(entry) => ordered.push(entry),
            Err(err) if first_error.is_none() => first_error = Some(err),
            Err(_) => {}
        }
    }
    if let Some(err) = first_error {
        let removed = discard(&ordered);
        warn!(removed, code = %err.info().code, "scenario generation failed; removed partial output");
        return Err(err);
    }
    ordered.sort_by_key(|(index, _)| *index);
    Ok(ordered.into_iter().map(|(_, path)| path).collect())
}

/// Removes scenario files written before a failure, returning how many went.
fn discard(written: &[(usize, PathBuf)]) -> usize {
    written
        .iter()
        .filter(|(_, path)| match fs::remove_file(path) {
            Ok(()) => true,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not remove partial scenario");
                false
            }
        })
        .count()
}
