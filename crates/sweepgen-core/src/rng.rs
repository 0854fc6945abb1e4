//! Seed derivation for reproducible seed sweeps.

use rand::rngs::StdRng;
use rand::SeedableRng;
use siphasher::sip::SipHasher13;
use std::hash::Hasher;

/// Generator for one named substream of `master_seed`.
///
/// The stream is seeded with [`derive_substream_seed`], so the same master
/// seed yields the same values on every platform. Regenerating scenarios from
/// a manifest relies on this.
pub fn substream_rng(master_seed: u64, substream: u64) -> StdRng {
    StdRng::seed_from_u64(derive_substream_seed(master_seed, substream))
}

/// Hashes `(master_seed, substream)` with SipHash-1-3 keyed with zeros.
pub fn derive_substream_seed(master_seed: u64, substream: u64) -> u64 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write_u64(master_seed);
    hasher.write_u64(substream);
    hasher.finish()
}
