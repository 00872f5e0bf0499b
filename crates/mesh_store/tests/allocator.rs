use std::collections::HashSet;
use std::path::Path;

use prime_mesh_store::{
    AllocatorApi, ChunkOptions, DirectoryApi, IdSize, MeshConfig, MeshError, MeshResult,
    MeshStore, ObjectId, ObjectRef, OrganizationId, TypeId, ValueStoreApi, allocator, resolve,
};
use sea_orm::{ConnectionTrait, Statement};
use tempfile::tempdir;

async fn attach(base: &Path) -> MeshResult<MeshStore> {
    let config = MeshConfig::default_sqlite(base.join("mesh.sqlite").to_string_lossy());
    let store = MeshStore::attach(&config, base).await?;
    store.ensure_directory_tables().await?;
    Ok(store)
}

const ORG: OrganizationId = OrganizationId(7);
const TYPE: TypeId = TypeId(3);

#[tokio::test]
async fn anchor_hands_out_plain_indices() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;

    let reservation = store.reserve(OrganizationId(0), TypeId(0), 3).await?;
    assert_eq!(reservation.start_index, 0);
    assert_eq!(reservation.ids, vec![ObjectId(0), ObjectId(1), ObjectId(2)]);
    assert!(reservation.chunk.is_anchor());
    assert_eq!(reservation.chunk.last_index, 3);

    store.detach().await
}

#[tokio::test]
async fn salted_chunk_yields_distinct_ids_in_domain() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    let salt = 123_456_789_012_345;
    store
        .create_chunk(ORG, TYPE, ChunkOptions::new(IdSize::Bits32).with_id_salt(salt))
        .await?;

    let reservation = store.reserve(ORG, TYPE, 5).await?;
    assert_eq!(reservation.ids.len(), 5);
    let distinct: HashSet<ObjectId> = reservation.ids.iter().copied().collect();
    assert_eq!(distinct.len(), 5);
    for (index, id) in reservation.ids.iter().enumerate() {
        assert!((-(1i64 << 31)..(1i64 << 31)).contains(&id.0));
        assert_eq!(*id, resolve(index as u64, salt, IdSize::Bits32)?);
    }
    assert_eq!(store.current_chunk(ORG, TYPE).await?.last_index, 5);

    store.detach().await
}

#[tokio::test]
async fn sequential_reservations_are_disjoint() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store
        .create_chunk(ORG, TYPE, ChunkOptions::new(IdSize::Bits16))
        .await?;

    let first = store.reserve(ORG, TYPE, 4).await?;
    let second = store.reserve(ORG, TYPE, 6).await?;
    assert_eq!(first.start_index, 0);
    assert_eq!(second.start_index, 4);
    let mut seen: HashSet<ObjectId> = first.ids.into_iter().collect();
    for id in second.ids {
        assert!(seen.insert(id), "id {id} handed out twice");
    }
    assert_eq!(seen.len(), 10);

    store.detach().await
}

#[tokio::test]
async fn concurrent_reservations_partition_the_cursor() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store
        .create_chunk(ORG, TYPE, ChunkOptions::new(IdSize::Bits32).with_id_salt(0))
        .await?;

    let mut handles = Vec::new();
    for count in 1..=8u64 {
        let store = store.clone();
        handles.push(tokio::spawn(
            async move { store.reserve(ORG, TYPE, count).await },
        ));
    }
    let mut ids = Vec::new();
    for handle in handles {
        let reservation = handle.await.expect("join")?;
        ids.extend(reservation.ids.into_iter().map(|id| id.0));
    }
    ids.sort_unstable();
    assert_eq!(ids, (0..36).collect::<Vec<i64>>());
    assert_eq!(store.current_chunk(ORG, TYPE).await?.last_index, 36);

    store.detach().await
}

#[tokio::test]
async fn missing_chunk_and_empty_count_are_rejected() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;

    let err = store.reserve(ORG, TYPE, 1).await.unwrap_err();
    assert!(matches!(err, MeshError::ChunkNotProvisioned { .. }));

    store
        .create_chunk(ORG, TYPE, ChunkOptions::new(IdSize::Bits16))
        .await?;
    let err = store.reserve(ORG, TYPE, 0).await.unwrap_err();
    assert!(matches!(err, MeshError::Validation { .. }));
    assert_eq!(store.current_chunk(ORG, TYPE).await?.last_index, 0);

    store.detach().await
}

#[tokio::test]
async fn exhausted_domain_leaves_cursor_and_store_rolls_over() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store
        .create_chunk(
            ORG,
            TYPE,
            ChunkOptions::new(IdSize::Bits16).with_id_salt(1_000_000_000_777),
        )
        .await?;

    let full = allocator::reserve(store.connection(), ORG, TYPE, 1 << 16).await?;
    assert_eq!(full.ids.len(), 1 << 16);
    assert_eq!(full.chunk.remaining(), Some(0));

    let err = allocator::reserve(store.connection(), ORG, TYPE, 1)
        .await
        .unwrap_err();
    assert!(matches!(err, MeshError::IdDomainExhausted { capacity: 65_536, .. }));
    assert_eq!(store.current_chunk(ORG, TYPE).await?.last_index, 1 << 16);

    let next = store.reserve(ORG, TYPE, 1).await?;
    assert_eq!(next.chunk.chunk_id, 1);
    assert_eq!(next.start_index, 0);
    let issued: HashSet<ObjectId> = full.ids.iter().copied().collect();
    assert_eq!(issued.len(), 1 << 16);
    assert!(!issued.contains(&next.first()?), "successor reissued {}", next.first()?);

    store.ensure_value_tables().await?;
    let last = full.ids[full.ids.len() - 1];
    store
        .create_object(ObjectRef::new(ORG, TYPE, last), None)
        .await?;
    store
        .create_object(ObjectRef::new(ORG, TYPE, next.first()?), None)
        .await?;
    assert_eq!(store.select_objects(ORG, TYPE).await?.len(), 2);
    let chunks = store.list_chunks(ORG, TYPE).await?;
    assert_eq!(chunks.len(), 2);
    assert!(!chunks[0].current);
    assert!(chunks[1].current);

    store.detach().await
}

#[tokio::test]
async fn duplicate_current_chunks_are_reported() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store
        .create_chunk(ORG, TYPE, ChunkOptions::new(IdSize::Bits16))
        .await?;
    store.rollover_chunk(ORG, TYPE).await?;
    store
        .connection()
        .execute_raw(Statement::from_string(
            store.backend(),
            "UPDATE mesh_chunk_shard SET current = 1 WHERE organization_id = 7 AND type_id = 3",
        ))
        .await?;

    let err = store.reserve(ORG, TYPE, 1).await.unwrap_err();
    assert!(matches!(err, MeshError::DuplicateCurrentChunk { count: 2, .. }));
    for chunk in store.list_chunks(ORG, TYPE).await? {
        assert_eq!(chunk.last_index, 0);
    }
    let err = store.verify_current_chunk(ORG, TYPE).await.unwrap_err();
    assert!(matches!(err, MeshError::DuplicateCurrentChunk { .. }));

    store.detach().await
}
