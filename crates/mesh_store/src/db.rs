use sea_orm::sea_query;
use sea_orm::sea_query::Alias;
use sea_orm_migration::prelude::Iden;

use prime_mesh_core::ValueKind;

#[derive(Iden, Clone, Copy)]
pub enum MeshChunkShard {
    Table,
    Id,
    OrganizationId,
    TypeId,
    ChunkIdSalt,
    ChunkId,
    ShardUrl,
    IdSize,
    Current,
    LastIndex,
    IdSalt,
}

#[derive(Iden, Clone, Copy)]
pub enum MeshChunkShardShard {
    Table,
    Id,
    ShardUrl,
}

#[derive(Iden, Clone, Copy)]
pub enum MeshObject {
    Table,
    Sequence,
    ObjectOrganizationId,
    ObjectTypeId,
    ObjectId,
    Debug,
}

/// Columns shared by the per-kind value tables plus each kind's value side.
#[derive(Iden, Clone, Copy)]
pub enum MeshValue {
    Sequence,
    ObjectOrganizationId,
    ObjectTypeId,
    ObjectId,
    ObjectPropertyId,
    Debug,
    Value,
    BucketId,
    ValueHash,
    ValueOrganizationId,
    ValueTypeId,
    ValueObjectId,
    ValuePropertyId,
}

pub const TABLE_PREFIX: &str = "mesh_";

pub fn value_table_name(kind: ValueKind) -> String {
    format!("{TABLE_PREFIX}{}", kind.as_str())
}

pub fn value_table(kind: ValueKind) -> Alias {
    Alias::new(value_table_name(kind))
}

/// Value-side columns of a kind, in insert order.
pub fn value_columns(kind: ValueKind) -> &'static [MeshValue] {
    match kind {
        ValueKind::Attachment => &[MeshValue::BucketId, MeshValue::ValueHash],
        ValueKind::String
        | ValueKind::Text
        | ValueKind::Decimal
        | ValueKind::Integer
        | ValueKind::Boolean
        | ValueKind::Timestamp => &[MeshValue::Value],
        ValueKind::Property => &[
            MeshValue::ValueOrganizationId,
            MeshValue::ValueTypeId,
            MeshValue::ValueObjectId,
            MeshValue::ValuePropertyId,
        ],
        ValueKind::Association => &[
            MeshValue::ValueOrganizationId,
            MeshValue::ValueTypeId,
            MeshValue::ValueObjectId,
        ],
    }
}

pub const OBJECT_KEY_COLUMNS: [MeshValue; 4] = [
    MeshValue::ObjectOrganizationId,
    MeshValue::ObjectTypeId,
    MeshValue::ObjectId,
    MeshValue::ObjectPropertyId,
];
