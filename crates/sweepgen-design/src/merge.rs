use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use sweepgen_core::errors::{ErrorInfo, SweepError};

use crate::document::{apply_delta, Delta};
use crate::enumerate::Design;
use crate::sweep::Combination;

/// Whether scenarios are materialised documents or the deltas alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeMode {
    #[default]
    Document,
    Patch,
}

/// One chosen arm's delta inside a patch scenario.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatchEntry {
    pub sweep: String,
    pub arm: String,
    pub delta: Delta,
}

/// Materialised output for one combination.
#[derive(Debug, Clone, PartialEq)]
pub enum Scenario {
    Document(Value),
    Patch(Vec<PatchEntry>),
}

/// Applies arm deltas onto a shared, read-only base template.
#[derive(Debug, Clone)]
pub struct MergeEngine {
    base: Arc<Value>,
}

impl MergeEngine {
    pub fn new(base: Arc<Value>) -> Self {
        Self { base }
    }

    pub fn base(&self) -> &Value {
        &self.base
    }

    /// Builds the scenario for `combination`.
    ///
    /// Arms are applied in canonical sweep order, so a later sweep editing
    /// the same location as an earlier one wins. A delta addressing a node
    /// that no longer exists after the preceding edits is a merge error.
    pub fn scenario(
        &self,
        design: &Design,
        combination: &Combination,
        mode: MergeMode,
    ) -> Result<Scenario, SweepError> {
        match mode {
            MergeMode::Document => self.merge(design, combination).map(Scenario::Document),
            MergeMode::Patch => Ok(Scenario::Patch(
                design
                    .arms(combination)
                    .map(|(sweep, arm)| PatchEntry {
                        sweep: sweep.name.clone(),
                        arm: arm.name.clone(),
                        delta: arm.delta.clone(),
                    })
                    .collect(),
            )),
        }
    }

    /// Returns the fully merged document for `combination`.
    pub fn merge(&self, design: &Design, combination: &Combination) -> Result<Value, SweepError> {
        let mut doc = (*self.base).clone();
        for (sweep, arm) in design.arms(combination) {
            apply_delta(&mut doc, &arm.delta).map_err(|missing| {
                SweepError::Merge(
                    ErrorInfo::new("merge.missing_location", missing.reason)
                        .with_context("combination", combination.id.to_string())
                        .with_context("sweep", sweep.name.clone())
                        .with_context("arm", arm.name.clone())
                        .with_context("path", missing.path.to_string()),
                )
            })?;
        }
        Ok(doc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{EditOp, NodePath};
    use crate::enumerate::{enumerate, DesignOptions};
    use crate::sweep::{Arm, Sweep, SweepKind};
    use serde_json::json;

    fn set(pointer: &str, value: Value) -> Delta {
        Delta::new(vec![EditOp::Replace {
            path: NodePath::parse_pointer(pointer),
            value,
        }])
    }

    fn engine() -> MergeEngine {
        MergeEngine::new(Arc::new(json!({"model": {"pop": 100, "vector": {"species": "a"}}})))
    }

    #[test]
    fn later_sweep_wins_on_same_location() {
        let first = Sweep::new(
            "first",
            SweepKind::Described,
            vec![Arm::new("x", set("/model/pop", json!(200)))],
        );
        let second = Sweep::new(
            "second",
            SweepKind::Described,
            vec![Arm::new("y", set("/model/pop", json!(300)))],
        );
        let design = enumerate(vec![first, second], 0, &DesignOptions::default()).expect("design");
        let doc = engine().merge(&design, &design.combinations[0]).expect("merge");
        assert_eq!(doc["model"]["pop"], json!(300));
    }

    #[test]
    fn edit_after_delete_is_merge_error() {
        let removes = Sweep::new(
            "removes",
            SweepKind::Described,
            vec![Arm::new(
                "drop",
                Delta::new(vec![EditOp::Delete {
                    path: NodePath::parse_pointer("/model/vector"),
                }]),
            )],
        );
        let edits = Sweep::new(
            "edits",
            SweepKind::Described,
            vec![Arm::new("species", set("/model/vector/species", json!("b")))],
        );
        let design = enumerate(vec![removes, edits], 5, &DesignOptions::default()).expect("design");
        let err = engine().merge(&design, &design.combinations[0]).expect_err("missing");
        assert!(matches!(err, SweepError::Merge(_)));
        let context = &err.info().context;
        assert_eq!(context.get("combination").map(String::as_str), Some("5"));
        assert_eq!(context.get("arm").map(String::as_str), Some("species"));
        assert_eq!(context.get("path").map(String::as_str), Some("/model/vector/species"));
    }

    #[test]
    fn patch_mode_lists_deltas_in_sweep_order() {
        let a = Sweep::new("a", SweepKind::Described, vec![Arm::new("a1", set("/model/pop", json!(1)))]);
        let design = enumerate(vec![a], 0, &DesignOptions::default()).expect("design");
        let scenario = engine()
            .scenario(&design, &design.combinations[0], MergeMode::Patch)
            .expect("patch");
        let Scenario::Patch(entries) = scenario else {
            panic!("expected patch");
        };
        let labels: Vec<_> = entries.iter().map(|e| (e.sweep.as_str(), e.arm.as_str())).collect();
        assert_eq!(labels, [("a", "a1"), ("dummy_1", "none"), ("dummy_2", "none")]);
        assert_eq!(entries[0].delta.len(), 1);
    }
}
