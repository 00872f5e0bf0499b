//! Append-only entity-attribute-value rows. One table per value kind, every
//! row keyed by its object triple and property id.

use std::collections::HashSet;

use sea_orm::sea_query::{Expr, ExprTrait, Order, Query};
use sea_orm::{ConnectionTrait, QueryResult};

use prime_mesh_core::{
    Attachment, MeshError, MeshResult, NewValue, ObjectId, ObjectRecord, ObjectRef,
    OrganizationId, PropertyId, PropertyRef, TaggedRecord, Timestamp, TypeId, Value, ValueKind,
};

use crate::db::*;
use crate::query::{col_name, exec, query_all, query_one, read_i64, read_opt_i64};

pub async fn create_object<C: ConnectionTrait>(
    conn: &C,
    object: ObjectRef,
    debug: Option<String>,
) -> MeshResult<()> {
    let insert = Query::insert()
        .into_table(MeshObject::Table)
        .columns([
            MeshObject::ObjectOrganizationId,
            MeshObject::ObjectTypeId,
            MeshObject::ObjectId,
            MeshObject::Debug,
        ])
        .values_panic([
            object.organization_id.0.into(),
            object.type_id.0.into(),
            object.object_id.0.into(),
            debug.into(),
        ])
        .to_owned();
    exec(conn, &insert).await?;
    Ok(())
}

pub async fn object_exists<C: ConnectionTrait>(conn: &C, object: ObjectRef) -> MeshResult<bool> {
    let select = Query::select()
        .from(MeshObject::Table)
        .column(MeshObject::Sequence)
        .and_where(Expr::col(MeshObject::ObjectOrganizationId).eq(object.organization_id.0))
        .and_where(Expr::col(MeshObject::ObjectTypeId).eq(object.type_id.0))
        .and_where(Expr::col(MeshObject::ObjectId).eq(object.object_id.0))
        .limit(1)
        .to_owned();
    Ok(query_one(conn, &select).await?.is_some())
}

pub async fn select_objects<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<Vec<ObjectRecord>> {
    let select = Query::select()
        .from(MeshObject::Table)
        .columns([MeshObject::ObjectId, MeshObject::Debug])
        .and_where(Expr::col(MeshObject::ObjectOrganizationId).eq(organization_id.0))
        .and_where(Expr::col(MeshObject::ObjectTypeId).eq(type_id.0))
        .order_by(MeshObject::Sequence, Order::Asc)
        .to_owned();
    query_all(conn, &select)
        .await?
        .iter()
        .map(|row| {
            Ok(ObjectRecord {
                object: ObjectRef::new(
                    organization_id,
                    type_id,
                    ObjectId(read_i64(row, MeshObject::ObjectId)?),
                ),
                debug: row.try_get("", &col_name(MeshObject::Debug))?,
            })
        })
        .collect()
}

/// Appends one value row. The object row must already exist.
pub async fn create_value<C: ConnectionTrait>(conn: &C, input: NewValue) -> MeshResult<()> {
    let kind = input.value.kind();
    if !object_exists(conn, input.object).await? {
        return Err(MeshError::orphan(kind, input.object));
    }
    let mut columns = OBJECT_KEY_COLUMNS.to_vec();
    columns.extend_from_slice(value_columns(kind));
    columns.push(MeshValue::Debug);

    let mut values: Vec<Expr> = vec![
        input.object.organization_id.0.into(),
        input.object.type_id.0.into(),
        input.object.object_id.0.into(),
        input.property_id.0.into(),
    ];
    values.extend(value_exprs(&input.value));
    values.push(input.debug.into());

    let insert = Query::insert()
        .into_table(value_table(kind))
        .columns(columns)
        .values_panic(values)
        .to_owned();
    exec(conn, &insert).await?;
    Ok(())
}

fn value_exprs(value: &Value) -> Vec<Expr> {
    match value {
        Value::Attachment(attachment) => vec![
            attachment.bucket_id.into(),
            attachment.value_hash.clone().into(),
        ],
        Value::String(text) | Value::Text(text) => vec![text.clone().into()],
        Value::Decimal(number) => vec![(*number).into()],
        Value::Integer(number) => vec![(*number).into()],
        Value::Boolean(flag) => vec![(*flag).into()],
        Value::Timestamp(timestamp) => vec![timestamp.0.into()],
        Value::Property(target) => vec![
            target.organization_id.map(|id| id.0).into(),
            target.type_id.map(|id| id.0).into(),
            target.object_id.map(|id| id.0).into(),
            target.property_id.map(|id| id.0).into(),
        ],
        Value::Association(target) => vec![
            target.organization_id.0.into(),
            target.type_id.0.into(),
            target.object_id.0.into(),
        ],
    }
}

fn read_value(kind: ValueKind, row: &QueryResult) -> MeshResult<Value> {
    let value_col = col_name(MeshValue::Value);
    let value = match kind {
        ValueKind::Attachment => Value::Attachment(Attachment {
            bucket_id: read_opt_i64(row, MeshValue::BucketId)?,
            value_hash: row.try_get("", &col_name(MeshValue::ValueHash))?,
        }),
        ValueKind::String => Value::String(row.try_get("", &value_col)?),
        ValueKind::Text => Value::Text(row.try_get("", &value_col)?),
        ValueKind::Decimal => Value::Decimal(row.try_get("", &value_col)?),
        ValueKind::Integer => Value::Integer(read_i64(row, MeshValue::Value)?),
        ValueKind::Boolean => Value::Boolean(row.try_get("", &value_col)?),
        ValueKind::Timestamp => Value::Timestamp(Timestamp(read_i64(row, MeshValue::Value)?)),
        ValueKind::Property => Value::Property(PropertyRef {
            organization_id: read_opt_i64(row, MeshValue::ValueOrganizationId)?
                .map(OrganizationId),
            type_id: read_opt_i64(row, MeshValue::ValueTypeId)?
                .map(narrow_i32)
                .transpose()?
                .map(TypeId),
            object_id: read_opt_i64(row, MeshValue::ValueObjectId)?.map(ObjectId),
            property_id: read_opt_i64(row, MeshValue::ValuePropertyId)?
                .map(narrow_i32)
                .transpose()?
                .map(PropertyId),
        }),
        ValueKind::Association => Value::Association(ObjectRef::new(
            OrganizationId(read_i64(row, MeshValue::ValueOrganizationId)?),
            TypeId(narrow_i32(read_i64(row, MeshValue::ValueTypeId)?)?),
            ObjectId(read_i64(row, MeshValue::ValueObjectId)?),
        )),
    };
    Ok(value)
}

fn narrow_i32(value: i64) -> MeshResult<i32> {
    i32::try_from(value)
        .map_err(|_| MeshError::storage(format!("{value} does not fit an integer column")))
}

fn read_record(kind: ValueKind, row: &QueryResult) -> MeshResult<TaggedRecord> {
    Ok(TaggedRecord {
        kind,
        sequence: read_i64(row, MeshValue::Sequence)?,
        object: ObjectRef::new(
            OrganizationId(read_i64(row, MeshValue::ObjectOrganizationId)?),
            TypeId(narrow_i32(read_i64(row, MeshValue::ObjectTypeId)?)?),
            ObjectId(read_i64(row, MeshValue::ObjectId)?),
        ),
        property_id: PropertyId(narrow_i32(read_i64(row, MeshValue::ObjectPropertyId)?)?),
        value: read_value(kind, row)?,
        debug: row.try_get("", &col_name(MeshValue::Debug))?,
    })
}

pub async fn select_kind_records<C: ConnectionTrait>(
    conn: &C,
    kind: ValueKind,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<Vec<TaggedRecord>> {
    let mut columns = vec![MeshValue::Sequence];
    columns.extend_from_slice(&OBJECT_KEY_COLUMNS);
    columns.extend_from_slice(value_columns(kind));
    columns.push(MeshValue::Debug);
    let select = Query::select()
        .from(value_table(kind))
        .columns(columns)
        .and_where(Expr::col(MeshValue::ObjectOrganizationId).eq(organization_id.0))
        .and_where(Expr::col(MeshValue::ObjectTypeId).eq(type_id.0))
        .order_by(MeshValue::Sequence, Order::Asc)
        .to_owned();
    query_all(conn, &select)
        .await?
        .iter()
        .map(|row| read_record(kind, row))
        .collect()
}

/// Every value row of the pair across all kinds, ordered by kind then sequence.
pub async fn select_every_type_record<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<Vec<TaggedRecord>> {
    let mut records = Vec::new();
    for kind in ValueKind::ALL {
        records.extend(select_kind_records(conn, kind, organization_id, type_id).await?);
    }
    Ok(records)
}

/// Value rows of the pair whose object triple has no object row.
pub async fn find_orphan_rows<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
) -> MeshResult<Vec<TaggedRecord>> {
    let known: HashSet<ObjectRef> = select_objects(conn, organization_id, type_id)
        .await?
        .into_iter()
        .map(|record| record.object)
        .collect();
    let records = select_every_type_record(conn, organization_id, type_id).await?;
    Ok(records
        .into_iter()
        .filter(|record| !known.contains(&record.object))
        .collect())
}
