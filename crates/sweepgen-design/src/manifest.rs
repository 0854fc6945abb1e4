//! CSV manifest linking scenario identifiers to their arm choices.
//!
//! The header is `scenario_id` followed by one column per sweep in canonical
//! order; every data row names the chosen arm of each sweep.

use std::collections::BTreeSet;
use std::fs;
use std::io::Write;
use std::path::Path;

use csv::{ReaderBuilder, WriterBuilder};
use sweepgen_core::errors::{ErrorInfo, SweepError};
use tempfile::NamedTempFile;
use tracing::debug;

use crate::enumerate::Design;
use crate::sweep::Combination;

/// Header of the identifier column.
pub const ID_COLUMN: &str = "scenario_id";

fn wrap_csv(code: &str, err: csv::Error, path: &Path) -> SweepError {
    SweepError::MalformedInput(
        ErrorInfo::new(code, "CSV manifest failure")
            .with_context("path", path.display().to_string())
            .with_hint(err.to_string()),
    )
}

fn io_error(code: &str, err: impl ToString, path: &Path) -> SweepError {
    SweepError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Writes `combinations` of `design` to `path`, replacing any previous file.
pub fn write_manifest(
    path: &Path,
    design: &Design,
    combinations: &[Combination],
) -> Result<(), SweepError> {
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent).map_err(|err| io_error("manifest.create_dir", err, parent))?;
    let mut staged =
        NamedTempFile::new_in(parent).map_err(|err| io_error("manifest.tempfile", err, parent))?;
    {
        let mut writer = WriterBuilder::new().from_writer(staged.as_file_mut());
        let mut header = vec![ID_COLUMN.to_string()];
        header.extend(design.sweeps.iter().map(|sweep| sweep.name.clone()));
        writer
            .write_record(&header)
            .map_err(|err| wrap_csv("manifest.write_header", err, path))?;
        for combination in combinations {
            let mut record = Vec::with_capacity(header.len());
            record.push(combination.id.to_string());
            record.extend(design.arms(combination).map(|(_, arm)| arm.name.clone()));
            writer
                .write_record(&record)
                .map_err(|err| wrap_csv("manifest.write_row", err, path))?;
        }
        writer
            .flush()
            .map_err(|err| io_error("manifest.flush", err, path))?;
    }
    staged
        .as_file_mut()
        .flush()
        .map_err(|err| io_error("manifest.flush", err, path))?;
    staged
        .persist(path)
        .map_err(|err| io_error("manifest.persist", err.error, path))?;
    debug!(path = %path.display(), rows = combinations.len(), "wrote manifest");
    Ok(())
}

/// Reads a manifest and resolves every row against the current `design`.
///
/// Identifiers come from the file and are never reassigned. Rows are
/// returned in file order; rows removed from the file are simply absent.
pub fn read_manifest(path: &Path, design: &Design) -> Result<Vec<Combination>, SweepError> {
    let mut reader = ReaderBuilder::new()
        .has_headers(true)
        .from_path(path)
        .map_err(|err| wrap_csv("manifest.open", err, path))?;
    let headers = reader
        .headers()
        .map_err(|err| wrap_csv("manifest.header", err, path))?
        .clone();

    let mut id_column = None;
    // column index for each sweep in canonical order
    let mut sweep_columns: Vec<Option<usize>> = vec![None; design.sweeps.len()];
    for (column, name) in headers.iter().enumerate() {
        let slot = if name == ID_COLUMN {
            &mut id_column
        } else {
            let index = design.sweep_index(name).ok_or_else(|| {
                SweepError::UnresolvedArm(
                    ErrorInfo::new("manifest.unknown_sweep", "manifest references an unknown sweep")
                        .with_context("row", "header")
                        .with_context("sweep", name)
                        .with_context("path", path.display().to_string()),
                )
            })?;
            &mut sweep_columns[index]
        };
        if slot.replace(column).is_some() {
            return Err(SweepError::MalformedInput(
                ErrorInfo::new("manifest.duplicate_column", "manifest header repeats a column")
                    .with_context("row", "header")
                    .with_context("column", name)
                    .with_context("path", path.display().to_string()),
            ));
        }
    }
    let id_column = id_column.ok_or_else(|| {
        SweepError::MalformedInput(
            ErrorInfo::new("manifest.no_id_column", format!("missing {ID_COLUMN} column"))
                .with_context("path", path.display().to_string()),
        )
    })?;
    if let Some(missing) = sweep_columns.iter().position(Option::is_none) {
        return Err(SweepError::UnresolvedArm(
            ErrorInfo::new("manifest.missing_sweep", "manifest has no column for a current sweep")
                .with_context("row", "header")
                .with_context("sweep", design.sweeps[missing].name.clone())
                .with_context("path", path.display().to_string()),
        ));
    }

    let mut seen = BTreeSet::new();
    let mut combinations = Vec::new();
    for (row_idx, record) in reader.records().enumerate() {
        let row = (row_idx + 1).to_string();
        let record = record.map_err(|err| wrap_csv("manifest.record", err, path))?;
        let raw_id = record.get(id_column).unwrap_or_default().trim();
        let id: u64 = raw_id.parse().map_err(|_| {
            SweepError::MalformedInput(
                ErrorInfo::new("manifest.bad_id", "scenario identifier is not a number")
                    .with_context("row", row.clone())
                    .with_context("value", raw_id),
            )
        })?;
        if !seen.insert(id) {
            return Err(SweepError::MalformedInput(
                ErrorInfo::new("manifest.duplicate_id", "scenario identifier appears twice")
                    .with_context("row", row)
                    .with_context("id", id.to_string()),
            ));
        }

        let mut choices = Vec::with_capacity(design.sweeps.len());
        for (sweep, column) in design.sweeps.iter().zip(&sweep_columns) {
            let arm_name = (*column)
                .and_then(|column| record.get(column))
                .unwrap_or_default()
                .trim();
            let choice = sweep.arm_index(arm_name).ok_or_else(|| {
                SweepError::UnresolvedArm(
                    ErrorInfo::new("manifest.unknown_arm", "manifest references an unknown arm")
                        .with_context("row", row.clone())
                        .with_context("id", id.to_string())
                        .with_context("sweep", sweep.name.clone())
                        .with_context("arm", arm_name),
                )
            })?;
            choices.push(choice);
        }
        combinations.push(Combination { id, choices });
    }
    debug!(path = %path.display(), rows = combinations.len(), "read manifest");
    Ok(combinations)
}
