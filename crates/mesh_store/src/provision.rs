//! Idempotent table provisioning. Every table is guarded by an existence probe
//! so provisioning can run on each start.

use sea_orm::sea_query::{Expr, ExprTrait, Query};
use sea_orm::{DatabaseBackend, DatabaseConnection};
use sea_orm_migration::SchemaManager;
use sea_orm_migration::prelude::{ColumnDef, Iden, Index, Table};

use prime_mesh_core::{ANCHOR_ROW_ID, IdSize, MeshResult, ValueKind};

use crate::db::*;
use crate::query::{col_name, exec, query_one};

pub async fn ensure_directory_tables(conn: &DatabaseConnection) -> MeshResult<()> {
    let manager = SchemaManager::new(conn);
    if !manager.has_table(col_name(MeshChunkShardShard::Table)).await? {
        manager
            .create_table(
                Table::create()
                    .table(MeshChunkShardShard::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MeshChunkShardShard::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(ColumnDef::new(MeshChunkShardShard::ShardUrl).string())
                    .to_owned(),
            )
            .await?;
    }
    if !manager.has_table(col_name(MeshChunkShard::Table)).await? {
        manager
            .create_table(
                Table::create()
                    .table(MeshChunkShard::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(MeshChunkShard::Id)
                            .big_integer()
                            .not_null()
                            .primary_key(),
                    )
                    .col(
                        ColumnDef::new(MeshChunkShard::OrganizationId)
                            .big_integer()
                            .not_null(),
                    )
                    .col(ColumnDef::new(MeshChunkShard::TypeId).integer().not_null())
                    .col(
                        ColumnDef::new(MeshChunkShard::ChunkIdSalt)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MeshChunkShard::ChunkId)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(MeshChunkShard::ShardUrl).string())
                    .col(
                        ColumnDef::new(MeshChunkShard::IdSize)
                            .integer()
                            .not_null()
                            .default(IdSize::Bits16.as_nibbles()),
                    )
                    .col(
                        ColumnDef::new(MeshChunkShard::Current)
                            .boolean()
                            .not_null()
                            .default(true),
                    )
                    .col(
                        ColumnDef::new(MeshChunkShard::LastIndex)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(MeshChunkShard::IdSalt)
                            .big_integer()
                            .not_null()
                            .default(0),
                    )
                    .to_owned(),
            )
            .await?;
        manager
            .create_index(
                Index::create()
                    .name("mesh_chunk_shard_pair_idx")
                    .table(MeshChunkShard::Table)
                    .col(MeshChunkShard::OrganizationId)
                    .col(MeshChunkShard::TypeId)
                    .to_owned(),
            )
            .await?;
    }
    seed_local_shard(conn).await?;
    seed_anchor_chunk(conn).await?;
    Ok(())
}

async fn seed_local_shard(conn: &DatabaseConnection) -> MeshResult<()> {
    let select = Query::select()
        .from(MeshChunkShardShard::Table)
        .column(MeshChunkShardShard::Id)
        .and_where(Expr::col(MeshChunkShardShard::Id).eq(ANCHOR_ROW_ID))
        .to_owned();
    if query_one(conn, &select).await?.is_some() {
        return Ok(());
    }
    let insert = Query::insert()
        .into_table(MeshChunkShardShard::Table)
        .columns([MeshChunkShardShard::Id, MeshChunkShardShard::ShardUrl])
        .values_panic([ANCHOR_ROW_ID.into(), Option::<String>::None.into()])
        .to_owned();
    exec(conn, &insert).await?;
    Ok(())
}

/// The anchor starts unclaimed: organization 0, type 0, no salts, 16-bit.
async fn seed_anchor_chunk(conn: &DatabaseConnection) -> MeshResult<()> {
    let select = Query::select()
        .from(MeshChunkShard::Table)
        .column(MeshChunkShard::Id)
        .and_where(Expr::col(MeshChunkShard::Id).eq(ANCHOR_ROW_ID))
        .to_owned();
    if query_one(conn, &select).await?.is_some() {
        return Ok(());
    }
    let insert = Query::insert()
        .into_table(MeshChunkShard::Table)
        .columns([
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
        ])
        .values_panic([
            ANCHOR_ROW_ID.into(),
            0i64.into(),
            0i32.into(),
            0i64.into(),
            0i64.into(),
            Option::<String>::None.into(),
            IdSize::Bits16.as_nibbles().into(),
            true.into(),
            0i64.into(),
            0i64.into(),
        ])
        .to_owned();
    exec(conn, &insert).await?;
    Ok(())
}

pub async fn ensure_object_table(conn: &DatabaseConnection) -> MeshResult<()> {
    let manager = SchemaManager::new(conn);
    if manager.has_table(col_name(MeshObject::Table)).await? {
        return Ok(());
    }
    let backend = manager.get_database_backend();
    manager
        .create_table(
            Table::create()
                .table(MeshObject::Table)
                .if_not_exists()
                .col(sequence_col(backend, MeshObject::Sequence))
                .col(
                    ColumnDef::new(MeshObject::ObjectOrganizationId)
                        .big_integer()
                        .not_null(),
                )
                .col(ColumnDef::new(MeshObject::ObjectTypeId).integer().not_null())
                .col(ColumnDef::new(MeshObject::ObjectId).big_integer().not_null())
                .col(ColumnDef::new(MeshObject::Debug).text())
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name("mesh_object_triple_uidx")
                .table(MeshObject::Table)
                .col(MeshObject::ObjectOrganizationId)
                .col(MeshObject::ObjectTypeId)
                .col(MeshObject::ObjectId)
                .unique()
                .to_owned(),
        )
        .await?;
    Ok(())
}

pub async fn ensure_value_table(conn: &DatabaseConnection, kind: ValueKind) -> MeshResult<()> {
    let manager = SchemaManager::new(conn);
    let name = value_table_name(kind);
    if manager.has_table(&name).await? {
        return Ok(());
    }
    let backend = manager.get_database_backend();
    let mut table = Table::create();
    table
        .table(value_table(kind))
        .if_not_exists()
        .col(sequence_col(backend, MeshValue::Sequence))
        .col(
            ColumnDef::new(MeshValue::ObjectOrganizationId)
                .big_integer()
                .not_null(),
        )
        .col(ColumnDef::new(MeshValue::ObjectTypeId).integer().not_null())
        .col(ColumnDef::new(MeshValue::ObjectId).big_integer().not_null())
        .col(
            ColumnDef::new(MeshValue::ObjectPropertyId)
                .integer()
                .not_null(),
        );
    for column in value_column_defs(kind) {
        table.col(column);
    }
    table.col(ColumnDef::new(MeshValue::Debug).text());
    manager.create_table(table.to_owned()).await?;

    manager
        .create_index(
            Index::create()
                .name(format!("{name}_org_type_idx"))
                .table(value_table(kind))
                .col(MeshValue::ObjectOrganizationId)
                .col(MeshValue::ObjectTypeId)
                .to_owned(),
        )
        .await?;
    manager
        .create_index(
            Index::create()
                .name(format!("{name}_org_type_object_idx"))
                .table(value_table(kind))
                .col(MeshValue::ObjectOrganizationId)
                .col(MeshValue::ObjectTypeId)
                .col(MeshValue::ObjectId)
                .to_owned(),
        )
        .await?;
    Ok(())
}

/// Provisions the object table and one table per value kind.
pub async fn ensure_value_tables(conn: &DatabaseConnection) -> MeshResult<()> {
    ensure_object_table(conn).await?;
    for kind in ValueKind::ALL {
        ensure_value_table(conn, kind).await?;
    }
    Ok(())
}

/// Drops every value table, the object table and both directory tables.
pub async fn drop_all_tables(conn: &DatabaseConnection) -> MeshResult<()> {
    let manager = SchemaManager::new(conn);
    for kind in ValueKind::ALL {
        manager
            .drop_table(Table::drop().table(value_table(kind)).if_exists().to_owned())
            .await?;
    }
    manager
        .drop_table(Table::drop().table(MeshObject::Table).if_exists().to_owned())
        .await?;
    manager
        .drop_table(Table::drop().table(MeshChunkShard::Table).if_exists().to_owned())
        .await?;
    manager
        .drop_table(
            Table::drop()
                .table(MeshChunkShardShard::Table)
                .if_exists()
                .to_owned(),
        )
        .await?;
    Ok(())
}

fn value_column_defs(kind: ValueKind) -> Vec<ColumnDef> {
    match kind {
        ValueKind::Attachment => vec![
            ColumnDef::new(MeshValue::BucketId).big_integer().to_owned(),
            ColumnDef::new(MeshValue::ValueHash).string().to_owned(),
        ],
        ValueKind::String => vec![ColumnDef::new(MeshValue::Value).string().not_null().to_owned()],
        ValueKind::Text => vec![ColumnDef::new(MeshValue::Value).text().not_null().to_owned()],
        ValueKind::Decimal => vec![ColumnDef::new(MeshValue::Value).double().not_null().to_owned()],
        ValueKind::Integer | ValueKind::Timestamp => vec![
            ColumnDef::new(MeshValue::Value)
                .big_integer()
                .not_null()
                .to_owned(),
        ],
        ValueKind::Boolean => vec![ColumnDef::new(MeshValue::Value).boolean().not_null().to_owned()],
        ValueKind::Property => vec![
            ColumnDef::new(MeshValue::ValueOrganizationId)
                .big_integer()
                .to_owned(),
            ColumnDef::new(MeshValue::ValueTypeId).integer().to_owned(),
            ColumnDef::new(MeshValue::ValueObjectId).big_integer().to_owned(),
            ColumnDef::new(MeshValue::ValuePropertyId).integer().to_owned(),
        ],
        ValueKind::Association => vec![
            ColumnDef::new(MeshValue::ValueOrganizationId)
                .big_integer()
                .not_null()
                .to_owned(),
            ColumnDef::new(MeshValue::ValueTypeId)
                .integer()
                .not_null()
                .to_owned(),
            ColumnDef::new(MeshValue::ValueObjectId)
                .big_integer()
                .not_null()
                .to_owned(),
        ],
    }
}

/// SQLite only auto-increments an `integer primary key`.
fn sequence_col(backend: DatabaseBackend, col: impl Iden + 'static) -> ColumnDef {
    let mut col_def = ColumnDef::new(col);
    match backend {
        DatabaseBackend::Sqlite => {
            col_def.integer();
        }
        _ => {
            col_def.big_integer();
        }
    }
    col_def.not_null().auto_increment().primary_key().to_owned()
}
