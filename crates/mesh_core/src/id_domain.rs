use serde::{Deserialize, Serialize};

use crate::ids::ObjectId;
use crate::permutation::{FeistelPermutation, PermutationOracle};
use crate::{MeshError, MeshResult};

/// Width of the per-chunk id domain. Persisted as a nibble count.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdSize {
    Bits16,
    Bits32,
}

impl IdSize {
    pub fn from_nibbles(value: i32) -> MeshResult<Self> {
        match value {
            4 => Ok(IdSize::Bits16),
            8 => Ok(IdSize::Bits32),
            other => Err(MeshError::UnsupportedIdDomain { id_size: other }),
        }
    }

    pub fn as_nibbles(self) -> i32 {
        match self {
            IdSize::Bits16 => 4,
            IdSize::Bits32 => 8,
        }
    }

    pub fn domain_bits(self) -> u32 {
        self.as_nibbles() as u32 * 4
    }

    /// Number of distinct ids the domain can hand out.
    pub fn capacity(self) -> u64 {
        1u64 << self.domain_bits()
    }

    /// Shifts unsigned oracle output into the signed range of the column.
    pub fn sign_offset(self) -> i64 {
        -(1i64 << (self.domain_bits() - 1))
    }
}

/// Maps a logical allocation index to its external id with the default oracle.
pub fn resolve(index: u64, salt: i64, id_size: IdSize) -> MeshResult<ObjectId> {
    resolve_with(&FeistelPermutation, index, salt, id_size)
}

/// A zero salt disables obfuscation and returns the index unchanged.
pub fn resolve_with(
    oracle: &dyn PermutationOracle,
    index: u64,
    salt: i64,
    id_size: IdSize,
) -> MeshResult<ObjectId> {
    if salt == 0 {
        let raw = i64::try_from(index)
            .map_err(|_| MeshError::invalid(format!("index {index} exceeds the id column")))?;
        return Ok(ObjectId(raw));
    }
    if index >= id_size.capacity() {
        return Err(MeshError::invalid(format!(
            "index {index} outside the {}-bit id domain",
            id_size.domain_bits()
        )));
    }
    let permuted = oracle.permute(index, salt, id_size.domain_bits());
    Ok(ObjectId(permuted as i64 + id_size.sign_offset()))
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn nibble_encoding_maps_to_domains() {
        assert_eq!(IdSize::from_nibbles(4).unwrap().domain_bits(), 16);
        assert_eq!(IdSize::from_nibbles(8).unwrap().domain_bits(), 32);
        assert!(matches!(
            IdSize::from_nibbles(6),
            Err(MeshError::UnsupportedIdDomain { id_size: 6 })
        ));
        assert_eq!(IdSize::Bits16.sign_offset(), -32_768);
        assert_eq!(IdSize::Bits32.sign_offset(), -2_147_483_648);
    }

    #[test]
    fn zero_salt_is_identity() -> MeshResult<()> {
        for index in [0u64, 1, 2, 3, 65_535, 1 << 40] {
            assert_eq!(resolve(index, 0, IdSize::Bits16)?, ObjectId(index as i64));
        }
        Ok(())
    }

    #[test]
    fn nonzero_salt_changes_mapping() -> MeshResult<()> {
        for salt in [1_000_000_000_000_i64, 123_456_789_012_345, 9_000_000_000_000_000_000] {
            let mapped = (0..64)
                .map(|index| resolve(index, salt, IdSize::Bits16).map(|id| id.0))
                .collect::<MeshResult<Vec<_>>>()?;
            let identity: Vec<i64> = (0..64).collect();
            assert_ne!(mapped, identity);
        }
        Ok(())
    }

    #[test]
    fn salted_ids_stay_in_signed_range_and_distinct() -> MeshResult<()> {
        let mut seen = HashSet::new();
        for index in 0..(1u64 << 16) {
            let id = resolve(index, 555_555_555_555, IdSize::Bits16)?;
            assert!((-32_768..32_768).contains(&id.0));
            assert!(seen.insert(id));
        }
        Ok(())
    }

    #[test]
    fn salted_index_outside_domain_is_rejected() {
        assert!(resolve(1 << 16, 42, IdSize::Bits16).is_err());
        assert!(resolve((1 << 16) - 1, 42, IdSize::Bits16).is_ok());
    }
}
