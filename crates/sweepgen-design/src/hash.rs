use serde::Serialize;
use sha2::{Digest, Sha256};
use sweepgen_core::errors::SweepError;

use crate::serde::to_canonical_json_bytes;
use crate::sweep::Signature;

/// Computes a stable hexadecimal hash for the provided serializable payload.
pub fn stable_hash_string<T: Serialize + ?Sized>(value: &T) -> Result<String, SweepError> {
    let bytes = to_canonical_json_bytes(value)?;
    let digest = Sha256::digest(bytes);
    Ok(format!("{:x}", digest))
}

/// Hash identifying a combination signature inside a registry.
pub fn signature_hash(signature: &Signature) -> Result<String, SweepError> {
    stable_hash_string(signature.pairs())
}
