//! Cache keys.
//!
//! A [`Fingerprint`] keeps both a 64-bit hash and the exact bit pattern of the
//! input it was computed from. Lookups compare hashes first; equal hashes are
//! then confirmed bit by bit. A collision, equal hash with different bits, is
//! never trusted and surfaces as [`GpnetError::CacheInconsistency`].

use gpnet_core::{GpnetError, GpnetResult};
use hashbrown::DefaultHashBuilder;
use std::hash::BuildHasher;

/// Hash state shared by all fingerprints of one cache.
#[derive(Clone, Default)]
pub struct FingerprintHasher(DefaultHashBuilder);

impl std::fmt::Debug for FingerprintHasher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("FingerprintHasher")
    }
}

/// Hash plus exact bits of a sequence of `f64` slices.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fingerprint {
    hash: u64,
    bits: Vec<u64>,
}

impl Fingerprint {
    /// Fingerprint of `parts`; slice lengths are part of the key.
    pub fn of(hasher: &FingerprintHasher, parts: &[&[f64]]) -> Self {
        let total = parts.iter().map(|p| p.len() + 1).sum();
        let mut bits = Vec::with_capacity(total);
        for part in parts {
            bits.push(part.len() as u64);
            bits.extend(part.iter().map(|v| v.to_bits()));
        }
        Self {
            hash: hasher.0.hash_one(&bits),
            bits,
        }
    }

    #[cfg(test)]
    pub(crate) fn from_raw(hash: u64, bits: Vec<u64>) -> Self {
        Self { hash, bits }
    }

    pub fn hash(&self) -> u64 {
        self.hash
    }

    /// Whether `self` and `other` describe the same input.
    pub fn matches(&self, other: &Fingerprint) -> GpnetResult<bool> {
        if self.hash != other.hash {
            return Ok(false);
        }
        if self.bits != other.bits {
            tracing::warn!(hash = self.hash, "fingerprint collision rejected");
            return Err(GpnetError::CacheInconsistency(format!(
                "hash {:#018x} shared by two different inputs",
                self.hash
            )));
        }
        Ok(true)
    }
}
