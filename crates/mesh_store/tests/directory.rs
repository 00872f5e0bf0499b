use std::collections::HashSet;
use std::path::Path;

use prime_mesh_store::{
    AllocatorApi, ChunkOptions, DirectoryApi, IdSize, MeshConfig, MeshResult, MeshStore,
    NewValue, ObjectId, ObjectRef, OrganizationId, PropertyId, TypeId, Value, ValueStoreApi,
    bucket_chunk_shard, resolve,
};
use tempfile::tempdir;

async fn attach(base: &Path) -> MeshResult<MeshStore> {
    let config = MeshConfig::default_sqlite(base.join("mesh.sqlite").to_string_lossy());
    MeshStore::attach(&config, base).await
}

const ORG: OrganizationId = OrganizationId(11);
const TYPE: TypeId = TypeId(-4_000);

#[tokio::test]
async fn provisioning_is_idempotent_and_seeds_the_anchor() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.ensure_directory_tables().await?;
    store.ensure_directory_tables().await?;

    let survey = store.survey().await?;
    assert_eq!(survey.shards.len(), 1);
    assert_eq!(survey.shards[0].id, 0);
    assert_eq!(survey.shards[0].shard_url, None);
    assert_eq!(survey.chunks.len(), 1);
    let anchor = &survey.chunks[0];
    assert!(anchor.is_unclaimed_anchor());
    assert_eq!(anchor.id_size, IdSize::Bits16);
    assert_eq!(anchor.last_index, 0);
    assert!(anchor.current);
    assert_eq!(store.find_anchor().await?, *anchor);

    store.detach().await
}

#[tokio::test]
async fn rollover_retires_the_previous_chunk() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.ensure_directory_tables().await?;
    let first = store
        .create_chunk(ORG, TYPE, ChunkOptions::new(IdSize::Bits32))
        .await?;
    assert_eq!(first.chunk_id, 0);
    store.ensure_value_tables().await?;
    let before = store.reserve(ORG, TYPE, 3).await?;
    let kept = ObjectRef::new(ORG, TYPE, before.first()?);
    store.create_object(kept, Some("before rollover".into())).await?;
    store
        .create_value(NewValue::new(kept, PropertyId(1), Value::String("kept".into())))
        .await?;

    let second = store.rollover_chunk(ORG, TYPE).await?;
    assert_eq!(second.chunk_id, 1);
    assert_eq!(second.id_size, IdSize::Bits32);
    assert_ne!(second.id_salt, first.id_salt);
    assert_eq!(store.current_chunk(ORG, TYPE).await?, second);

    let chunks = store.list_chunks(ORG, TYPE).await?;
    assert_eq!(chunks.len(), 2);
    assert_eq!(chunks[0].id, first.id);
    assert!(!chunks[0].current);
    assert_eq!(chunks[0].last_index, 3);
    assert!(chunks[1].current);
    store.verify_current_chunk(ORG, TYPE).await?;

    let after = store.reserve(ORG, TYPE, 3).await?;
    assert_eq!(after.chunk.id, second.id);
    let issued: HashSet<ObjectId> = before.ids.iter().copied().collect();
    for id in &after.ids {
        assert!(!issued.contains(id), "id {id} issued on both sides of the rollover");
    }
    let fresh = ObjectRef::new(ORG, TYPE, after.first()?);
    store.create_object(fresh, None).await?;
    store
        .create_value(NewValue::new(fresh, PropertyId(1), Value::String("fresh".into())))
        .await?;

    let records = store.select_every_type_record(ORG, TYPE).await?;
    let read = |object: ObjectRef| {
        records
            .iter()
            .find(|record| record.object == object)
            .and_then(|record| record.value.as_str().map(str::to_owned))
    };
    assert_eq!(read(kept).as_deref(), Some("kept"));
    assert_eq!(read(fresh).as_deref(), Some("fresh"));

    store.detach().await
}

#[tokio::test]
async fn rollover_places_chunks_by_hash() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.ensure_directory_tables().await?;
    store.register_shard("sqlite://shard-a.sqlite").await?;
    store.register_shard("sqlite://shard-b.sqlite").await?;
    assert!(store.register_shard("   ").await.is_err());
    let shards = store.list_shards().await?;
    assert_eq!(shards.len(), 3);
    assert_eq!(shards[1].id, 1);

    store
        .create_chunk(ORG, TYPE, ChunkOptions::new(IdSize::Bits16))
        .await?;
    for chunk_id in 1..=4 {
        let chunk = store.rollover_chunk(ORG, TYPE).await?;
        assert_eq!(chunk.chunk_id, chunk_id);
        let bucket = bucket_chunk_shard(ORG, TYPE, chunk_id, shards.len())?;
        assert_eq!(chunk.shard_url, shards[bucket].shard_url);
    }

    store.detach().await
}

#[tokio::test]
async fn visible_chunk_id_is_obfuscated() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.ensure_directory_tables().await?;
    let salt = 2_000_000_000_003;
    let chunk = store
        .create_chunk(
            ORG,
            TYPE,
            ChunkOptions::new(IdSize::Bits16)
                .with_chunk_id(5)
                .with_chunk_id_salt(salt),
        )
        .await?;
    assert_eq!(chunk.visible_chunk_id, resolve(5, salt, IdSize::Bits32)?.0);
    let stored = store.current_chunk(ORG, TYPE).await?;
    assert_eq!(stored.visible_chunk_id, chunk.visible_chunk_id);
    assert_eq!(stored.chunk_id, 5);

    store.detach().await
}

#[tokio::test]
async fn reports_database_size() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.ensure_directory_tables().await?;
    assert!(store.database_size_bytes().await? > 0);
    let anchor = store.find_anchor().await?;
    assert_eq!(store.needs_rollover(&anchor, 1, Some(0)), None);

    store.detach().await
}
