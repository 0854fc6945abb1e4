//! Reconciliation of experiment designs against a shared identifier registry.

mod sqlite;

use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sweepgen_core::errors::{ErrorInfo, SweepError};
use tracing::warn;

use crate::sweep::Signature;

pub use sqlite::SqliteRegistry;

/// Unit registered against a registry: a name, a description and every
/// combination signature of the design, in identifier order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Experiment {
    pub name: String,
    pub description: Option<String>,
    pub signatures: Vec<Signature>,
}

/// Authoritative identifiers handed out by a registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assignment {
    pub experiment_id: i64,
    /// One identifier per signature, in the order they were submitted.
    pub ids: Vec<u64>,
}

impl Assignment {
    /// Lowest identifier assigned to this run's combinations.
    pub fn offset(&self) -> Option<u64> {
        self.ids.iter().copied().min()
    }
}

/// Operations available inside one atomic registry unit.
pub trait RegistryTx {
    /// Returns the id of the experiment registered under the `(name,
    /// description)` pair, registering it when absent. A custom name already
    /// registered with another description is a conflict; experiments under
    /// the default name are told apart by their description alone.
    fn register_or_find_experiment(
        &mut self,
        name: &str,
        description: &str,
    ) -> Result<i64, SweepError>;

    /// Returns the id bound to `signature` within the experiment,
    /// registering a new row when absent.
    fn register_or_find_combination(
        &mut self,
        experiment_id: i64,
        signature: &Signature,
    ) -> Result<i64, SweepError>;
}

/// Identifier authority consulted before scenarios are written.
pub trait Registry: Send + Sync {
    /// Short label used in logs.
    fn label(&self) -> String;

    /// Registers `experiment` atomically; `None` keeps the local numbering.
    fn synchronize(&self, experiment: &Experiment) -> Result<Option<Assignment>, SweepError>;
}

/// Registry used when no shared registry is configured.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRegistry;

impl Registry for NoRegistry {
    fn label(&self) -> String {
        "none".to_string()
    }

    fn synchronize(&self, _experiment: &Experiment) -> Result<Option<Assignment>, SweepError> {
        Ok(None)
    }
}

/// Runs the reconciliation policy inside an already opened atomic unit.
///
/// Callers must discard every write made through `tx` when this fails.
pub fn reconcile(tx: &mut dyn RegistryTx, experiment: &Experiment) -> Result<Assignment, SweepError> {
    let description = experiment.description.as_deref().unwrap_or_default();
    let experiment_id = tx.register_or_find_experiment(&experiment.name, description)?;
    let mut ids = Vec::with_capacity(experiment.signatures.len());
    for signature in &experiment.signatures {
        let id = tx.register_or_find_combination(experiment_id, signature)?;
        let id = u64::try_from(id).map_err(|_| {
            SweepError::RegistryConflict(
                ErrorInfo::new("registry.negative_id", "registry returned a negative identifier")
                    .with_context("signature", signature.to_string()),
            )
        })?;
        ids.push(id);
    }
    Ok(Assignment { experiment_id, ids })
}

/// Bounded retry with doubling backoff for timed-out registry calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 200,
        }
    }
}

impl RetryPolicy {
    /// Calls `op` until it succeeds, fails with a non-retryable error or the
    /// attempts are exhausted.
    pub fn run<T>(&self, mut op: impl FnMut() -> Result<T, SweepError>) -> Result<T, SweepError> {
        let mut attempt = 0u32;
        let mut backoff = Duration::from_millis(self.initial_backoff_ms);
        loop {
            attempt += 1;
            match op() {
                Err(err) if err.is_retryable() && attempt < self.max_attempts.max(1) => {
                    warn!(attempt, error = %err, "registry busy, retrying");
                    thread::sleep(backoff);
                    backoff = backoff.saturating_mul(2);
                }
                Err(SweepError::RegistryConflict(info)) if attempt > 1 => {
                    return Err(SweepError::RegistryConflict(
                        info.with_context("attempts", attempt.to_string()),
                    ))
                }
                other => return other,
            }
        }
    }
}
