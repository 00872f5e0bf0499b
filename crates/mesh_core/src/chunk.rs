use serde::{Deserialize, Serialize};

use crate::id_domain::{IdSize, resolve};
use crate::ids::{ObjectId, OrganizationId, TypeId};
use crate::{MeshError, MeshResult};

/// Directory row id of the anchor chunk and of the local shard endpoint.
pub const ANCHOR_ROW_ID: i64 = 0;

/// A registered shard location. A `None` url is the local partition.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ShardEndpoint {
    pub id: i64,
    pub shard_url: Option<String>,
}

/// One allocation partition of an (organization, type) pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChunkShard {
    pub id: i64,
    pub organization_id: OrganizationId,
    pub type_id: TypeId,
    /// Raw chunk id as stored.
    pub chunk_id: i64,
    pub chunk_id_salt: i64,
    /// `resolve(chunk_id, chunk_id_salt, 32-bit)`.
    pub visible_chunk_id: i64,
    pub shard_url: Option<String>,
    pub id_size: IdSize,
    pub current: bool,
    pub last_index: i64,
    pub id_salt: i64,
}

impl ChunkShard {
    pub fn is_anchor(&self) -> bool {
        self.id == ANCHOR_ROW_ID
    }

    /// The anchor is unclaimed until bootstrap rebinds it to the `type` type.
    pub fn is_unclaimed_anchor(&self) -> bool {
        self.is_anchor() && self.organization_id.0 == 0 && self.type_id.0 == 0
    }

    pub fn is_obfuscated(&self) -> bool {
        self.id_salt != 0
    }

    /// Indices still available in an obfuscated domain. Unsalted chunks are
    /// bounded only by the cursor column.
    pub fn remaining(&self) -> Option<u64> {
        if !self.is_obfuscated() {
            return None;
        }
        let used = u64::try_from(self.last_index).unwrap_or(0);
        Some(self.id_size.capacity().saturating_sub(used))
    }

    /// Shift applied to every id of a salted chunk. Chunk `k` of a pair owns
    /// the band `k * capacity` around the signed domain, so successors never
    /// reissue ids of their predecessors.
    pub fn band_offset(&self) -> MeshResult<i64> {
        if !self.is_obfuscated() {
            return Ok(0);
        }
        let offset = i128::from(self.chunk_id) * i128::from(self.id_size.capacity());
        i64::try_from(offset).map_err(|_| {
            MeshError::invalid(format!("chunk {} has no id band", self.chunk_id))
        })
    }

    pub fn resolve_index(&self, index: u64) -> MeshResult<ObjectId> {
        let id = resolve(index, self.id_salt, self.id_size)?;
        let offset = self.band_offset()?;
        id.0.checked_add(offset)
            .map(ObjectId)
            .ok_or_else(|| MeshError::invalid(format!("id {id} overflows band {offset}")))
    }

    /// Raw chunk id of the successor. An unsalted chunk hands out its plain
    /// cursor, so the successor band must start above it.
    pub fn successor_chunk_id(&self) -> i64 {
        let next = self.chunk_id.saturating_add(1);
        if self.is_obfuscated() {
            return next;
        }
        let capacity = i64::try_from(self.id_size.capacity()).unwrap_or(i64::MAX);
        let half = capacity / 2;
        let clear = self
            .last_index
            .max(0)
            .saturating_add(half)
            .saturating_add(capacity - 1)
            / capacity;
        next.max(clear)
    }
}

pub fn visible_chunk_id(chunk_id: i64, chunk_id_salt: i64) -> MeshResult<i64> {
    let raw = u64::try_from(chunk_id)
        .map_err(|_| MeshError::invalid(format!("negative chunk id {chunk_id}")))?;
    Ok(resolve(raw, chunk_id_salt, IdSize::Bits32)?.0)
}

/// Options for a new chunk. Missing salts are sampled; a missing raw chunk id
/// defaults to the number of chunks already recorded for the pair.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct ChunkOptions {
    pub shard_url: Option<String>,
    pub id_salt: Option<i64>,
    pub id_size: IdSize,
    pub chunk_id: Option<i64>,
    pub chunk_id_salt: Option<i64>,
}

impl ChunkOptions {
    pub fn new(id_size: IdSize) -> Self {
        Self {
            shard_url: None,
            id_salt: None,
            id_size,
            chunk_id: None,
            chunk_id_salt: None,
        }
    }

    pub fn with_shard_url(mut self, shard_url: Option<String>) -> Self {
        self.shard_url = shard_url;
        self
    }

    pub fn with_id_salt(mut self, id_salt: i64) -> Self {
        self.id_salt = Some(id_salt);
        self
    }

    pub fn with_chunk_id(mut self, chunk_id: i64) -> Self {
        self.chunk_id = Some(chunk_id);
        self
    }

    pub fn with_chunk_id_salt(mut self, chunk_id_salt: i64) -> Self {
        self.chunk_id_salt = Some(chunk_id_salt);
        self
    }
}

/// Ids handed out by a single reservation, in allocation order.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct Reservation {
    /// Chunk state after the cursor bump.
    pub chunk: ChunkShard,
    pub start_index: u64,
    pub ids: Vec<ObjectId>,
}

impl Reservation {
    pub fn first(&self) -> MeshResult<ObjectId> {
        self.ids
            .first()
            .copied()
            .ok_or_else(|| MeshError::invalid("empty reservation"))
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RolloverReason {
    DomainExhausted,
    ShardFull,
}

/// Decides whether `pending` more allocations need a successor chunk.
pub fn needs_rollover(
    chunk: &ChunkShard,
    pending: u64,
    shard_bytes: Option<u64>,
    max_shard_bytes: u64,
) -> Option<RolloverReason> {
    if chunk.remaining().is_some_and(|remaining| pending > remaining) {
        return Some(RolloverReason::DomainExhausted);
    }
    match shard_bytes {
        Some(bytes) if bytes >= max_shard_bytes => Some(RolloverReason::ShardFull),
        _ => None,
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BootstrapOutcome {
    /// Fresh backend; every built-in and declared entity was written.
    Initialized,
    /// Anchor was already claimed and missing entities were filled in.
    Resumed,
    /// Anchor was claimed and nothing was missing.
    AlreadyInitialized,
}

/// Every known shard endpoint and chunk row.
#[derive(Clone, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
pub struct Survey {
    pub shards: Vec<ShardEndpoint>,
    pub chunks: Vec<ChunkShard>,
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    fn chunk(id_salt: i64, last_index: i64) -> ChunkShard {
        ChunkShard {
            id: 5,
            organization_id: OrganizationId(7),
            type_id: TypeId(3),
            chunk_id: 0,
            chunk_id_salt: 0,
            visible_chunk_id: 0,
            shard_url: None,
            id_size: IdSize::Bits16,
            current: true,
            last_index,
            id_salt,
        }
    }

    #[test]
    fn rollover_triggers_on_domain_and_size() {
        let full = chunk(42, 65_530);
        assert_eq!(
            needs_rollover(&full, 10, None, 1 << 30),
            Some(RolloverReason::DomainExhausted)
        );
        assert_eq!(needs_rollover(&full, 6, None, 1 << 30), None);
        assert_eq!(
            needs_rollover(&full, 1, Some(1 << 30), 1 << 30),
            Some(RolloverReason::ShardFull)
        );
        assert_eq!(needs_rollover(&chunk(0, 1 << 40), 1_000, None, 1 << 30), None);
    }

    #[test]
    fn visible_chunk_id_is_raw_without_salt() -> MeshResult<()> {
        assert_eq!(visible_chunk_id(3, 0)?, 3);
        let salted = visible_chunk_id(3, 1_000_000_000_007)?;
        assert!((-(1i64 << 31)..(1i64 << 31)).contains(&salted));
        assert!(visible_chunk_id(-1, 0).is_err());
        Ok(())
    }

    #[test]
    fn successive_chunks_get_disjoint_bands() -> MeshResult<()> {
        let mut first = chunk(1_000_000_000_041, 0);
        let mut second = chunk(1_000_000_000_043, 0);
        second.chunk_id = 1;
        assert_eq!(first.band_offset()?, 0);
        assert_eq!(second.band_offset()?, 65_536);
        for index in [0, 1, 7, 65_535] {
            assert_eq!(first.resolve_index(index)?, resolve(index, first.id_salt, IdSize::Bits16)?);
        }
        let low: HashSet<ObjectId> = (0..1 << 16)
            .map(|index| first.resolve_index(index))
            .collect::<MeshResult<_>>()?;
        for index in 0..1 << 16 {
            let id = second.resolve_index(index)?;
            assert!(!low.contains(&id), "id {id} reused by the successor");
            assert!((32_768..98_304).contains(&id.0));
        }

        first.chunk_id = i64::MAX / 2;
        assert!(first.band_offset().is_err());
        Ok(())
    }

    #[test]
    fn successor_clears_an_unsalted_cursor() {
        let salted = chunk(1_000_000_000_041, 65_536);
        assert_eq!(salted.successor_chunk_id(), 1);
        assert_eq!(chunk(0, 0).successor_chunk_id(), 1);
        assert_eq!(chunk(0, 32_768).successor_chunk_id(), 1);
        assert_eq!(chunk(0, 32_769).successor_chunk_id(), 2);
        assert_eq!(chunk(0, 200_000).successor_chunk_id(), 4);
    }

    #[test]
    fn anchor_is_recognised() {
        let mut anchor = chunk(0, 0);
        anchor.id = ANCHOR_ROW_ID;
        anchor.organization_id = OrganizationId(0);
        anchor.type_id = TypeId(0);
        assert!(anchor.is_unclaimed_anchor());
        anchor.type_id = TypeId(-31_000);
        assert!(!anchor.is_unclaimed_anchor());
        assert!(anchor.is_anchor());
    }
}
