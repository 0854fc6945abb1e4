use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use sweepgen_core::errors::{ErrorInfo, SweepError};
use tempfile::NamedTempFile;

use crate::document::DocumentFormat;
use crate::merge::Scenario;

fn io_error(code: &str, err: impl ToString, path: &Path) -> SweepError {
    SweepError::Io(
        ErrorInfo::new(code, err.to_string()).with_context("path", path.display().to_string()),
    )
}

/// Writes one file per scenario into a directory that was empty at start.
#[derive(Debug, Clone)]
pub struct OutputWriter {
    dir: PathBuf,
    prefix: String,
    format: DocumentFormat,
}

impl OutputWriter {
    /// Prepares `dir`, creating it when missing and refusing it when it
    /// already holds entries.
    pub fn create(
        dir: &Path,
        prefix: impl Into<String>,
        format: DocumentFormat,
    ) -> Result<Self, SweepError> {
        fs::create_dir_all(dir).map_err(|err| io_error("output.create_dir", err, dir))?;
        let mut entries = fs::read_dir(dir).map_err(|err| io_error("output.read_dir", err, dir))?;
        if entries.next().is_some() {
            return Err(SweepError::Io(
                ErrorInfo::new("output.not_empty", "output directory is not empty")
                    .with_context("path", dir.display().to_string())
                    .with_hint("point the run at an empty or missing directory"),
            ));
        }
        Ok(Self {
            dir: dir.to_path_buf(),
            prefix: prefix.into(),
            format,
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Final path of the file for scenario `id`.
    pub fn path_for(&self, id: u64, scenario: &Scenario) -> PathBuf {
        let ext = self.format.extension();
        let name = match scenario {
            Scenario::Document(_) => format!("{}_{id}.{ext}", self.prefix),
            Scenario::Patch(_) => format!("{}_{id}.patch.{ext}", self.prefix),
        };
        self.dir.join(name)
    }

    /// Writes `scenario` under its identifier.
    ///
    /// The bytes go to a temporary file in the same directory that is then
    /// renamed into place without replacing an existing file, so a crash
    /// never leaves a partially written scenario under its final name.
    pub fn write(&self, id: u64, scenario: &Scenario) -> Result<PathBuf, SweepError> {
        let target = self.path_for(id, scenario);
        let bytes = match scenario {
            Scenario::Document(doc) => self.format.encode(doc)?,
            Scenario::Patch(entries) => self.format.encode(entries)?,
        };
        let mut staged = NamedTempFile::new_in(&self.dir)
            .map_err(|err| io_error("output.tempfile", err, &self.dir))?;
        staged
            .write_all(&bytes)
            .and_then(|_| staged.as_file().sync_all())
            .map_err(|err| io_error("output.write", err, &target))?;
        staged
            .persist_noclobber(&target)
            .map_err(|err| io_error("output.persist", err.error, &target))?;
        Ok(target)
    }
}
