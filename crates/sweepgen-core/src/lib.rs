#![deny(missing_docs)]
#![doc = "Shared error surface and deterministic seeding helpers for the sweepgen engine."]

pub mod errors;
pub mod rng;

pub use errors::{ErrorInfo, SweepError};
pub use rng::{derive_substream_seed, substream_rng};
