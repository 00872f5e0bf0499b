//! Chunk-shard directory: which chunk of an (organization, type) pair is
//! current, where each chunk lives and which shard endpoints exist.

use log::debug;
use sea_orm::sea_query::{Alias, Expr, ExprTrait, Func, Order, Query, SelectStatement};
use sea_orm::{
    ConnectionTrait, DatabaseBackend, QueryResult, Statement, TransactionSession, TransactionTrait,
};

use prime_mesh_core::salt::thread_salt;
use prime_mesh_core::{
    ANCHOR_ROW_ID, ChunkOptions, ChunkShard, IdSize, MeshError, MeshResult, OrganizationId,
    ShardEndpoint, TypeId, bucket_chunk_shard, visible_chunk_id,
};

use crate::db::*;
use crate::query::{col_name, exec, query_all, query_one, read_i64};

pub(crate) const CHUNK_COLUMNS: [MeshChunkShard; 10] = [
    MeshChunkShard::Id,
    MeshChunkShard::OrganizationId,
    MeshChunkShard::TypeId,
    MeshChunkShard::ChunkIdSalt,
    MeshChunkShard::ChunkId,
    MeshChunkShard::ShardUrl,
    MeshChunkShard::IdSize,
    MeshChunkShard::Current,
    MeshChunkShard::LastIndex,
    MeshChunkShard::IdSalt,
];

pub(crate) fn read_chunk(row: &QueryResult) -> MeshResult<ChunkShard> {
    let chunk_id = read_i64(row, MeshChunkShard::ChunkId)?;
    let chunk_id_salt = read_i64(row, MeshChunkShard::ChunkIdSalt)?;
    let type_id = read_i64(row, MeshChunkShard::TypeId)?;
    let id_size = read_i64(row, MeshChunkShard::IdSize)?;
    Ok(ChunkShard {
        id: read_i64(row, MeshChunkShard::Id)?,
        organization_id: OrganizationId(read_i64(row, MeshChunkShard::OrganizationId)?),
        type_id: TypeId(
            i32::try_from(type_id)
                .map_err(|_| MeshError::storage(format!("type id {type_id} out of range")))?,
        ),
        chunk_id,
        chunk_id_salt,
        visible_chunk_id: visible_chunk_id(chunk_id, chunk_id_salt)?,
        shard_url: row.try_get("", &col_name(MeshChunkShard::ShardUrl))?,
        id_size: IdSize::from_nibbles(i32::try_from(id_size).unwrap_or(i32::MAX))?,
        current: row.try_get("", &col_name(MeshChunkShard::Current))?,
        last_index: read_i64(row, MeshChunkShard::LastIndex)?,
        id_salt: read_i64(row, MeshChunkShard::IdSalt)?,
    })
}

fn select_chunks() -> SelectStatement {
    Query::select()
        .from(MeshChunkShard::Table)
        .columns(CHUNK_COLUMNS)
        .to_owned()
}

pub(crate) fn select_current(
    organization_id: OrganizationId,
    type_id: TypeId,
) -> SelectStatement {
    select_chunks()
        .and_where(Expr::col(MeshChunkShard::OrganizationId).eq(organization_id.0))
        .and_where(Expr::col(MeshChunkShard::TypeId).eq(type_id.0))
        .and_where(Expr::col(MeshChunkShard::Current).eq(true))
        .to_owned()
}

/// Exactly one current chunk, or the matching invariant error.
pub(crate) fn single_current(
    organization_id: OrganizationId,
    type_id: TypeId,
    rows: Vec<QueryResult>,
) -> MeshResult<ChunkShard> {
    match rows.as_slice() {
        [] => Err(MeshError::chunk_not_provisioned(organization_id, type_id)),
        [row] => read_chunk(row),
        _ => Err(MeshError::DuplicateCurrentChunk {
            organization_id,
            type_id,
            count: rows.len() as u64,
        }),
    }
}

pub async fn current_chunk<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<ChunkShard> {
    let rows = query_all(conn, &select_current(organization_id, type_id)).await?;
    single_current(organization_id, type_id, rows)
}

/// Checks the one-current-chunk invariant without returning the row.
pub async fn verify_current_chunk<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<()> {
    current_chunk(conn, organization_id, type_id).await.map(|_| ())
}

pub async fn list_chunks<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<Vec<ChunkShard>> {
    let select = select_chunks()
        .and_where(Expr::col(MeshChunkShard::OrganizationId).eq(organization_id.0))
        .and_where(Expr::col(MeshChunkShard::TypeId).eq(type_id.0))
        .order_by(MeshChunkShard::ChunkId, Order::Asc)
        .order_by(MeshChunkShard::Id, Order::Asc)
        .to_owned();
    query_all(conn, &select)
        .await?
        .iter()
        .map(read_chunk)
        .collect()
}

pub async fn list_all_chunks<C: ConnectionTrait>(conn: &C) -> MeshResult<Vec<ChunkShard>> {
    let select = select_chunks()
        .order_by(MeshChunkShard::Id, Order::Asc)
        .to_owned();
    query_all(conn, &select)
        .await?
        .iter()
        .map(read_chunk)
        .collect()
}

pub async fn find_anchor<C: ConnectionTrait>(conn: &C) -> MeshResult<ChunkShard> {
    let select = select_chunks()
        .and_where(Expr::col(MeshChunkShard::Id).eq(ANCHOR_ROW_ID))
        .to_owned();
    let row = query_one(conn, &select)
        .await?
        .ok_or_else(|| MeshError::not_found("anchor chunk is not provisioned"))?;
    read_chunk(&row)
}

async fn next_row_id<C, T>(conn: &C, table: T, id_col: T) -> MeshResult<i64>
where
    C: ConnectionTrait,
    T: sea_orm::sea_query::Iden + Copy + 'static,
{
    let select = Query::select()
        .from(table)
        .expr_as(Func::max(Expr::col(id_col)), Alias::new("max_id"))
        .to_owned();
    let max_id = match query_one(conn, &select).await? {
        Some(row) => row.try_get::<Option<i64>>("", "max_id")?,
        None => None,
    };
    Ok(max_id.unwrap_or(ANCHOR_ROW_ID) + 1)
}

async fn count_chunks<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<i64> {
    let select = Query::select()
        .from(MeshChunkShard::Table)
        .expr_as(Func::count(Expr::col(MeshChunkShard::Id)), Alias::new("chunk_count"))
        .and_where(Expr::col(MeshChunkShard::OrganizationId).eq(organization_id.0))
        .and_where(Expr::col(MeshChunkShard::TypeId).eq(type_id.0))
        .to_owned();
    match query_one(conn, &select).await? {
        Some(row) => Ok(row.try_get::<i64>("", "chunk_count")?),
        None => Ok(0),
    }
}

/// Records a new current chunk for the pair, retiring the previous current
/// chunk in the same transaction.
pub async fn create_chunk<C>(
    db: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
    options: ChunkOptions,
) -> MeshResult<ChunkShard>
where
    C: ConnectionTrait + TransactionTrait,
{
    let tx = db.begin().await?;
    let chunk_id = match options.chunk_id {
        Some(chunk_id) => chunk_id,
        None => count_chunks(&tx, organization_id, type_id).await?,
    };
    let chunk_id_salt = options.chunk_id_salt.unwrap_or_else(thread_salt);
    let id_salt = options.id_salt.unwrap_or_else(thread_salt);
    let visible = visible_chunk_id(chunk_id, chunk_id_salt)?;

    let retire = Query::update()
        .table(MeshChunkShard::Table)
        .values([(MeshChunkShard::Current, false.into())])
        .and_where(Expr::col(MeshChunkShard::OrganizationId).eq(organization_id.0))
        .and_where(Expr::col(MeshChunkShard::TypeId).eq(type_id.0))
        .and_where(Expr::col(MeshChunkShard::Current).eq(true))
        .to_owned();
    exec(&tx, &retire).await?;

    let id = next_row_id(&tx, MeshChunkShard::Table, MeshChunkShard::Id).await?;
    let insert = Query::insert()
        .into_table(MeshChunkShard::Table)
        .columns(CHUNK_COLUMNS)
        .values_panic([
            id.into(),
            organization_id.0.into(),
            type_id.0.into(),
            chunk_id_salt.into(),
            chunk_id.into(),
            options.shard_url.clone().into(),
            options.id_size.as_nibbles().into(),
            true.into(),
            0i64.into(),
            id_salt.into(),
        ])
        .to_owned();
    exec(&tx, &insert).await?;
    tx.commit().await?;

    debug!(
        "mesh: created chunk {visible} for organization {organization_id} type {type_id} (row {id})"
    );
    Ok(ChunkShard {
        id,
        organization_id,
        type_id,
        chunk_id,
        chunk_id_salt,
        visible_chunk_id: visible,
        shard_url: options.shard_url,
        id_size: options.id_size,
        current: true,
        last_index: 0,
        id_salt,
    })
}

/// Rebinds the unclaimed anchor row to the `type` type of the default
/// organization. Fails when the anchor was already claimed.
pub async fn claim_anchor<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
    id_salt: i64,
) -> MeshResult<ChunkShard> {
    let update = Query::update()
        .table(MeshChunkShard::Table)
        .values([
            (MeshChunkShard::OrganizationId, organization_id.0.into()),
            (MeshChunkShard::TypeId, type_id.0.into()),
            (MeshChunkShard::IdSalt, id_salt.into()),
            (MeshChunkShard::IdSize, IdSize::Bits16.as_nibbles().into()),
        ])
        .and_where(Expr::col(MeshChunkShard::Id).eq(ANCHOR_ROW_ID))
        .and_where(Expr::col(MeshChunkShard::OrganizationId).eq(0i64))
        .and_where(Expr::col(MeshChunkShard::TypeId).eq(0i32))
        .to_owned();
    if exec(conn, &update).await? == 0 {
        return Err(MeshError::invalid("anchor chunk is already claimed"));
    }
    debug!("mesh: claimed anchor for organization {organization_id} type {type_id}");
    find_anchor(conn).await
}

/// Creates the successor of the current chunk with the same id size and fresh
/// salts. Its raw chunk id picks an id band above every id of the pair handed
/// out so far; placement hashes that id over the registered shards.
pub async fn rollover_chunk<C>(
    db: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<ChunkShard>
where
    C: ConnectionTrait + TransactionTrait,
{
    let current = current_chunk(db, organization_id, type_id).await?;
    let shards = list_shards(db).await?;
    let chunk_id = current.successor_chunk_id();
    let bucket = bucket_chunk_shard(organization_id, type_id, chunk_id, shards.len())?;
    let shard_url = shards.get(bucket).and_then(|shard| shard.shard_url.clone());
    let options = ChunkOptions::new(current.id_size)
        .with_chunk_id(chunk_id)
        .with_shard_url(shard_url);
    create_chunk(db, organization_id, type_id, options).await
}

pub async fn register_shard<C: ConnectionTrait>(
    conn: &C,
    shard_url: &str,
) -> MeshResult<ShardEndpoint> {
    if shard_url.trim().is_empty() {
        return Err(MeshError::invalid("shard url must not be empty"));
    }
    let id = next_row_id(conn, MeshChunkShardShard::Table, MeshChunkShardShard::Id).await?;
    let insert = Query::insert()
        .into_table(MeshChunkShardShard::Table)
        .columns([MeshChunkShardShard::Id, MeshChunkShardShard::ShardUrl])
        .values_panic([id.into(), shard_url.to_string().into()])
        .to_owned();
    exec(conn, &insert).await?;
    Ok(ShardEndpoint {
        id,
        shard_url: Some(shard_url.to_string()),
    })
}

pub async fn list_shards<C: ConnectionTrait>(conn: &C) -> MeshResult<Vec<ShardEndpoint>> {
    let select = Query::select()
        .from(MeshChunkShardShard::Table)
        .columns([MeshChunkShardShard::Id, MeshChunkShardShard::ShardUrl])
        .order_by(MeshChunkShardShard::Id, Order::Asc)
        .to_owned();
    query_all(conn, &select)
        .await?
        .iter()
        .map(|row| {
            Ok(ShardEndpoint {
                id: read_i64(row, MeshChunkShardShard::Id)?,
                shard_url: row.try_get("", &col_name(MeshChunkShardShard::ShardUrl))?,
            })
        })
        .collect()
}

/// Bytes used by the connected database.
pub async fn database_size_bytes<C: ConnectionTrait>(conn: &C) -> MeshResult<u64> {
    let backend = conn.get_database_backend();
    let sql = match backend {
        DatabaseBackend::Postgres => "SELECT pg_database_size(current_database()) AS size",
        DatabaseBackend::MySql => {
            "SELECT CAST(COALESCE(SUM(data_length + index_length), 0) AS SIGNED) AS size \
             FROM information_schema.tables WHERE table_schema = DATABASE()"
        }
        _ => "SELECT page_count * page_size AS size FROM pragma_page_count(), pragma_page_size()",
    };
    let row = conn
        .query_one_raw(Statement::from_string(backend, sql))
        .await?
        .ok_or_else(|| MeshError::storage("database size probe returned no row"))?;
    let size: i64 = row.try_get("", "size")?;
    Ok(u64::try_from(size).unwrap_or(0))
}
