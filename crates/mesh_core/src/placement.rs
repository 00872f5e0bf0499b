use crate::ids::{OrganizationId, TypeId};
use crate::{MeshError, MeshResult};

/// Picks the shard index for a chunk. Computed in 128-bit arithmetic with a
/// Euclidean remainder so negative obfuscated ids land in range.
///
/// The mapping changes whenever `shard_count` changes.
pub fn bucket_chunk_shard(
    organization_id: OrganizationId,
    type_id: TypeId,
    chunk_id: i64,
    shard_count: usize,
) -> MeshResult<usize> {
    if shard_count == 0 {
        return Err(MeshError::invalid("no shard endpoints registered"));
    }
    let hash = i128::from(organization_id.0) * 17
        + i128::from(type_id.0) * 31
        + i128::from(chunk_id) * 5;
    let bucket = hash.rem_euclid(shard_count as i128);
    Ok(bucket as usize)
}
