use serde::{Deserialize, Serialize};
use sweepgen_core::errors::{ErrorInfo, SweepError};

use crate::document::Delta;
use crate::hash::stable_hash_string;
use crate::manifest::ID_COLUMN;
use crate::sweep::{Arm, Combination, Signature, Sweep, SweepKind};

/// Minimum number of sweeps expected by downstream analysis tooling.
pub const MIN_SWEEPS: usize = 3;
/// Name of the single arm carried by injected dummy sweeps.
pub const DUMMY_ARM: &str = "none";
/// Upper bound on the number of combinations a single design may hold.
pub const MAX_COMBINATIONS: u64 = 10_000_000;

/// Enumeration policy knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DesignOptions {
    /// Pad the sweep list with single-arm dummy sweeps up to [`MIN_SWEEPS`].
    pub min_three_sweeps: bool,
}

impl Default for DesignOptions {
    fn default() -> Self {
        Self {
            min_three_sweeps: true,
        }
    }
}

/// Canonical sweep list together with its full cross product.
#[derive(Debug, Clone, PartialEq)]
pub struct Design {
    pub sweeps: Vec<Sweep>,
    pub combinations: Vec<Combination>,
}

impl Design {
    /// Signature of `combination` in canonical sweep order.
    pub fn signature(&self, combination: &Combination) -> Signature {
        Signature(
            self.sweeps
                .iter()
                .zip(&combination.choices)
                .map(|(sweep, &choice)| (sweep.name.clone(), sweep.arms[choice].name.clone()))
                .collect(),
        )
    }

    /// Chosen arms of `combination`, paired with their sweep.
    pub fn arms<'a>(
        &'a self,
        combination: &'a Combination,
    ) -> impl Iterator<Item = (&'a Sweep, &'a Arm)> + 'a {
        self.sweeps
            .iter()
            .zip(&combination.choices)
            .map(|(sweep, &choice)| (sweep, &sweep.arms[choice]))
    }

    /// Position of a sweep in the canonical order.
    pub fn sweep_index(&self, name: &str) -> Option<usize> {
        self.sweeps.iter().position(|sweep| sweep.name == name)
    }

    /// Stable hash of the sweep and arm universe (names and deltas).
    pub fn fingerprint(&self) -> Result<String, SweepError> {
        stable_hash_string(&self.sweeps)
    }
}

/// Computes the cross product of all arms, last sweep varying fastest.
///
/// Identifiers are assigned sequentially from `start_id`. With
/// [`DesignOptions::min_three_sweeps`] the sweep list is padded with dummy
/// sweeps (`dummy_1`, `dummy_2`, ...) whose single arm is a no-op.
///
/// Sweep names must be distinct and must not collide with the manifest's
/// identifier column. Designs above [`MAX_COMBINATIONS`] are rejected before
/// anything is allocated.
pub fn enumerate(
    mut sweeps: Vec<Sweep>,
    start_id: u64,
    opts: &DesignOptions,
) -> Result<Design, SweepError> {
    check_names(&sweeps)?;
    if opts.min_three_sweeps {
        let mut dummy = 1;
        while sweeps.len() < MIN_SWEEPS {
            let name = unused_dummy_name(&sweeps, &mut dummy);
            sweeps.push(Sweep::new(
                name,
                SweepKind::Dummy,
                vec![Arm::new(DUMMY_ARM, Delta::default())],
            ));
        }
    }

    let mut total: u64 = 1;
    for sweep in &sweeps {
        if sweep.arms.is_empty() {
            return Err(SweepError::EmptyDesign(
                ErrorInfo::new("design.empty_sweep", "sweep resolved to zero arms")
                    .with_context("sweep", sweep.name.clone()),
            ));
        }
        total = total
            .checked_mul(sweep.arms.len() as u64)
            .filter(|total| *total <= MAX_COMBINATIONS)
            .filter(|total| start_id.checked_add(*total).is_some())
            .ok_or_else(|| {
                SweepError::MalformedInput(
                    ErrorInfo::new(
                        "design.too_large",
                        "number of combinations exceeds the supported design size",
                    )
                    .with_context("limit", MAX_COMBINATIONS.to_string())
                    .with_context("sweep", sweep.name.clone()),
                )
            })?;
    }
    let capacity = usize::try_from(total).map_err(|_| {
        SweepError::MalformedInput(ErrorInfo::new(
            "design.too_large",
            "number of combinations does not fit in memory on this platform",
        ))
    })?;

    let radices: Vec<usize> = sweeps.iter().map(|sweep| sweep.arms.len()).collect();
    let mut choices = Vec::with_capacity(capacity);
    expand(&radices, 0, Vec::with_capacity(radices.len()), &mut choices);
    let combinations = choices
        .into_iter()
        .enumerate()
        .map(|(position, choices)| Combination {
            id: start_id + position as u64,
            choices,
        })
        .collect();
    Ok(Design {
        sweeps,
        combinations,
    })
}

fn check_names(sweeps: &[Sweep]) -> Result<(), SweepError> {
    for (idx, sweep) in sweeps.iter().enumerate() {
        if sweep.name == ID_COLUMN {
            return Err(SweepError::MalformedInput(
                ErrorInfo::new(
                    "design.reserved_sweep",
                    "sweep name collides with the manifest identifier column",
                )
                .with_context("sweep", sweep.name.clone()),
            ));
        }
        if sweeps[..idx].iter().any(|earlier| earlier.name == sweep.name) {
            return Err(SweepError::MalformedInput(
                ErrorInfo::new("design.duplicate_sweep", "two sweeps share a name")
                    .with_context("sweep", sweep.name.clone())
                    .with_hint("rename the sweep directory, or disable the seed sweep"),
            ));
        }
    }
    Ok(())
}

fn unused_dummy_name(sweeps: &[Sweep], counter: &mut usize) -> String {
    loop {
        let name = format!("dummy_{counter}");
        *counter += 1;
        if sweeps.iter().all(|sweep| sweep.name != name) {
            return name;
        }
    }
}

fn expand(radices: &[usize], idx: usize, current: Vec<usize>, outputs: &mut Vec<Vec<usize>>) {
    if idx == radices.len() {
        outputs.push(current);
        return;
    }
    for choice in 0..radices[idx] {
        let mut next = current.clone();
        next.push(choice);
        expand(radices, idx + 1, next, outputs);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sweep(name: &str, arms: &[&str]) -> Sweep {
        Sweep::new(
            name,
            SweepKind::Described,
            arms.iter().map(|arm| Arm::new(*arm, Delta::default())).collect(),
        )
    }

    #[test]
    fn two_sweeps_get_dummy_and_row_major_order() {
        let design = enumerate(
            vec![sweep("A", &["a1", "a2"]), sweep("B", &["b1", "b2", "b3"])],
            0,
            &DesignOptions::default(),
        )
        .expect("design");
        assert_eq!(design.sweeps.len(), 3);
        assert_eq!(design.sweeps[2].kind, SweepKind::Dummy);
        assert_eq!(design.sweeps[2].arms.len(), 1);
        assert!(design.sweeps[2].arms[0].delta.is_empty());

        let ids: Vec<u64> = design.combinations.iter().map(|c| c.id).collect();
        assert_eq!(ids, [0, 1, 2, 3, 4, 5]);
        let rows: Vec<(String, String)> = design
            .combinations
            .iter()
            .map(|c| {
                let sig = design.signature(c);
                (sig.0[0].1.clone(), sig.0[1].1.clone())
            })
            .collect();
        let expected = [
            ("a1", "b1"),
            ("a1", "b2"),
            ("a1", "b3"),
            ("a2", "b1"),
            ("a2", "b2"),
            ("a2", "b3"),
        ];
        for (row, (a, b)) in rows.iter().zip(expected) {
            assert_eq!((row.0.as_str(), row.1.as_str()), (a, b));
        }
        assert!(design
            .combinations
            .iter()
            .all(|c| design.signature(c).0[2] == ("dummy_1".to_string(), DUMMY_ARM.to_string())));
    }

    #[test]
    fn dummies_can_be_disabled() {
        let design = enumerate(
            vec![sweep("A", &["a1", "a2"])],
            10,
            &DesignOptions {
                min_three_sweeps: false,
            },
        )
        .expect("design");
        assert_eq!(design.sweeps.len(), 1);
        assert_eq!(design.combinations[0].id, 10);
        assert_eq!(design.combinations[1].id, 11);
    }

    #[test]
    fn zero_sweeps_with_dummies_yield_single_combination() {
        let design = enumerate(Vec::new(), 0, &DesignOptions::default()).expect("design");
        let names: Vec<_> = design.sweeps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["dummy_1", "dummy_2", "dummy_3"]);
        assert_eq!(design.combinations.len(), 1);
    }

    #[test]
    fn dummy_names_avoid_collisions() {
        let design = enumerate(
            vec![sweep("dummy_1", &["x"])],
            0,
            &DesignOptions::default(),
        )
        .expect("design");
        let names: Vec<_> = design.sweeps.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["dummy_1", "dummy_2", "dummy_3"]);
    }

    #[test]
    fn sweep_without_arms_is_empty_design() {
        let err = enumerate(
            vec![sweep("A", &["a1"]), sweep("seed", &[])],
            0,
            &DesignOptions::default(),
        )
        .expect_err("empty");
        assert!(matches!(err, SweepError::EmptyDesign(_)));
        assert_eq!(err.info().context.get("sweep").map(String::as_str), Some("seed"));
    }

    #[test]
    fn duplicate_and_reserved_sweep_names_are_rejected() {
        let err = enumerate(
            vec![sweep("seed", &["a"]), sweep("pop", &["p1"]), sweep("seed", &["0", "1"])],
            0,
            &DesignOptions::default(),
        )
        .expect_err("duplicate");
        assert!(matches!(err, SweepError::MalformedInput(_)));
        assert_eq!(err.info().code, "design.duplicate_sweep");
        assert_eq!(err.info().context.get("sweep").map(String::as_str), Some("seed"));

        let err = enumerate(
            vec![sweep(ID_COLUMN, &["a"])],
            0,
            &DesignOptions::default(),
        )
        .expect_err("reserved");
        assert_eq!(err.info().code, "design.reserved_sweep");
    }

    #[test]
    fn oversized_design_is_rejected_without_allocating() {
        let sweeps: Vec<Sweep> = (0..40)
            .map(|idx| sweep(&format!("s{idx}"), &["on", "off"]))
            .collect();
        let err = enumerate(sweeps, 0, &DesignOptions::default()).expect_err("too large");
        assert!(matches!(err, SweepError::MalformedInput(_)));
        assert_eq!(err.info().code, "design.too_large");
        assert_eq!(
            err.info().context.get("limit").map(String::as_str),
            Some("10000000")
        );
    }
}
