//! Sweep discovery, design enumeration and scenario generation.
//!
//! A run loads a base template and its sweeps, enumerates every combination
//! of arms, reconciles identifiers against an optional registry, then writes
//! one scenario per combination together with a CSV manifest.

mod config;
mod document;
mod enumerate;
mod hash;
mod manifest;
mod merge;
mod pipeline;
mod registry;
mod repository;
mod seeds;
mod serde;
mod sweep;
mod validate;
mod writer;

pub use config::{ExperimentConfig, RegistryConfig, RunConfig, RunMode, DEFAULT_EXPERIMENT};
pub use document::{
    apply_delta, apply_op, diff, Delta, DocumentFormat, EditOp, MissingLocation, NodePath,
    PathSegment,
};
pub use enumerate::{enumerate, Design, DesignOptions, DUMMY_ARM, MAX_COMBINATIONS, MIN_SWEEPS};
pub use hash::{signature_hash, stable_hash_string};
pub use manifest::{read_manifest, write_manifest, ID_COLUMN};
pub use merge::{MergeEngine, MergeMode, PatchEntry, Scenario};
pub use pipeline::{run, RunReport};
pub use registry::{
    reconcile, Assignment, Experiment, NoRegistry, Registry, RegistryTx, RetryPolicy,
    SqliteRegistry,
};
pub use repository::{SweepRepository, BASE_STEM};
pub use seeds::{seed_sweep, SeedOptions, SEED_SPACE, SEED_SWEEP};
pub use sweep::{Arm, Combination, Signature, Sweep, SweepKind};
pub use validate::{DocumentValidator, JsonSchemaValidator};
pub use writer::OutputWriter;

pub use serde::{from_yaml_slice, to_canonical_json_bytes};
