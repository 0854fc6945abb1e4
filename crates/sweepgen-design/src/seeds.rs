use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::json;
use sweepgen_core::errors::{ErrorInfo, SweepError};
use sweepgen_core::rng::substream_rng;

use crate::document::{Delta, EditOp, NodePath};
use crate::sweep::{Arm, Sweep, SweepKind};

/// Name of the synthesised seed sweep.
pub const SEED_SWEEP: &str = "seed";
/// Seeds are drawn from `[0, SEED_SPACE)`.
pub const SEED_SPACE: usize = i32::MAX as usize;
const SEED_STREAM: u64 = 0x5eed;

/// Seed sweep request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeedOptions {
    /// Number of seed arms; negative disables the seed sweep.
    #[serde(default = "SeedOptions::default_count")]
    pub count: i64,
    /// Draw seeds without repetition across arms.
    #[serde(default = "SeedOptions::default_unique")]
    pub unique: bool,
    /// Master seed from which the seed values are derived.
    #[serde(default)]
    pub master_seed: u64,
    /// Pointer to the field receiving the seed value.
    #[serde(default = "SeedOptions::default_field")]
    pub field: String,
}

impl SeedOptions {
    const fn default_count() -> i64 {
        -1
    }

    const fn default_unique() -> bool {
        true
    }

    fn default_field() -> String {
        "/model/parameters/iseed".to_string()
    }
}

impl Default for SeedOptions {
    fn default() -> Self {
        Self {
            count: Self::default_count(),
            unique: Self::default_unique(),
            master_seed: 0,
            field: Self::default_field(),
        }
    }
}

/// Builds the seed sweep, or `None` when `count` is negative.
///
/// Arms are named `0..count`; each upserts the seed field with its value.
/// The values only depend on `master_seed`, `count` and `unique`.
pub fn seed_sweep(opts: &SeedOptions) -> Result<Option<Sweep>, SweepError> {
    if opts.count < 0 {
        return Ok(None);
    }
    let count = usize::try_from(opts.count).map_err(|err| {
        SweepError::MalformedInput(ErrorInfo::new("seeds.count", err.to_string()))
    })?;
    let field = NodePath::parse_pointer(&opts.field);
    if field.is_root() {
        return Err(SweepError::MalformedInput(
            ErrorInfo::new("seeds.field", "seed field must name a node below the root")
                .with_context("field", opts.field.clone()),
        ));
    }
    let values = draw_seeds(count, opts.unique, opts.master_seed)?;
    let arms = values
        .into_iter()
        .enumerate()
        .map(|(idx, value)| {
            let delta = Delta::new(vec![EditOp::Insert {
                path: field.clone(),
                value: json!(value),
            }]);
            Arm::new(idx.to_string(), delta)
        })
        .collect();
    Ok(Some(Sweep::new(SEED_SWEEP, SweepKind::Seed, arms)))
}

fn draw_seeds(count: usize, unique: bool, master_seed: u64) -> Result<Vec<u64>, SweepError> {
    let mut rng = substream_rng(master_seed, SEED_STREAM);
    if unique {
        if count > SEED_SPACE {
            return Err(SweepError::MalformedInput(
                ErrorInfo::new("seeds.space", "more unique seeds requested than available")
                    .with_context("count", count.to_string()),
            ));
        }
        Ok(index::sample(&mut rng, SEED_SPACE, count)
            .into_iter()
            .map(|value| value as u64)
            .collect())
    } else {
        Ok((0..count)
            .map(|_| rng.gen_range(0..SEED_SPACE as u64))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeSet;

    fn seed_values(sweep: &Sweep) -> Vec<u64> {
        sweep
            .arms
            .iter()
            .map(|arm| match &arm.delta.ops()[0] {
                EditOp::Insert { value, .. } => value.as_u64().expect("numeric seed"),
                other => panic!("unexpected op {other:?}"),
            })
            .collect()
    }

    #[test]
    fn negative_count_is_noop() {
        let opts = SeedOptions::default();
        assert!(seed_sweep(&opts).expect("noop").is_none());
    }

    #[test]
    fn unique_seeds_are_pairwise_distinct() {
        let opts = SeedOptions {
            count: 5,
            ..SeedOptions::default()
        };
        let sweep = seed_sweep(&opts).expect("seeds").expect("sweep");
        assert_eq!(sweep.name, SEED_SWEEP);
        assert_eq!(sweep.kind, SweepKind::Seed);
        let names: Vec<_> = sweep.arms.iter().map(|arm| arm.name.as_str()).collect();
        assert_eq!(names, ["0", "1", "2", "3", "4"]);
        let values = seed_values(&sweep);
        let distinct: BTreeSet<_> = values.iter().collect();
        assert_eq!(distinct.len(), 5);
        assert!(values.iter().all(|v| *v < SEED_SPACE as u64));
    }

    #[test]
    fn same_master_seed_reproduces_values() {
        let opts = SeedOptions {
            count: 8,
            unique: false,
            master_seed: 99,
            ..SeedOptions::default()
        };
        let a = seed_sweep(&opts).expect("a").expect("sweep");
        let b = seed_sweep(&opts).expect("b").expect("sweep");
        assert_eq!(seed_values(&a), seed_values(&b));
        assert_eq!(a.arms.len(), 8);
    }

    #[test]
    fn zero_count_yields_empty_sweep() {
        let opts = SeedOptions {
            count: 0,
            ..SeedOptions::default()
        };
        let sweep = seed_sweep(&opts).expect("seeds").expect("sweep");
        assert!(sweep.arms.is_empty());
    }

    #[test]
    fn seeds_target_configured_field() {
        let opts = SeedOptions {
            count: 1,
            field: "/sim/seed".into(),
            ..SeedOptions::default()
        };
        let sweep = seed_sweep(&opts).expect("seeds").expect("sweep");
        assert_eq!(sweep.arms[0].delta.ops()[0].path().to_string(), "/sim/seed");
    }
}
