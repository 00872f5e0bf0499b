//! Block id reservation against the current chunk of a pair.
//!
//! The cursor bump is the first statement of the transaction so the backend
//! takes the row lock (the database write lock on SQLite) before anything is
//! read. The bumped row is then selected `FOR UPDATE` and the transaction is
//! committed before any id is handed out; an error drops the transaction and
//! leaves `last_index` untouched.

use log::debug;
use sea_orm::sea_query::{Expr, ExprTrait, Query};
use sea_orm::{ConnectionTrait, TransactionSession, TransactionTrait};

use prime_mesh_core::{MeshError, MeshResult, ObjectId, OrganizationId, Reservation, TypeId};

use crate::db::MeshChunkShard;
use crate::directory::{select_current, single_current};
use crate::query::{exec, query_all};

pub async fn reserve<C>(
    db: &C,
    organization_id: OrganizationId,
    type_id: TypeId,
    count: u64,
) -> MeshResult<Reservation>
where
    C: ConnectionTrait + TransactionTrait,
{
    if count == 0 {
        return Err(MeshError::invalid("reservation count must be positive"));
    }
    let step = i64::try_from(count)
        .map_err(|_| MeshError::invalid(format!("reservation count {count} too large")))?;

    let tx = db.begin().await?;
    let bump = Query::update()
        .table(MeshChunkShard::Table)
        .values([(
            MeshChunkShard::LastIndex,
            Expr::col(MeshChunkShard::LastIndex).add(step),
        )])
        .and_where(Expr::col(MeshChunkShard::OrganizationId).eq(organization_id.0))
        .and_where(Expr::col(MeshChunkShard::TypeId).eq(type_id.0))
        .and_where(Expr::col(MeshChunkShard::Current).eq(true))
        .to_owned();
    let affected = exec(&tx, &bump).await?;
    if affected > 1 {
        return Err(MeshError::DuplicateCurrentChunk {
            organization_id,
            type_id,
            count: affected,
        });
    }

    let select = select_current(organization_id, type_id)
        .lock_exclusive()
        .to_owned();
    let rows = query_all(&tx, &select).await?;
    let chunk = single_current(organization_id, type_id, rows)?;

    let next_index = u64::try_from(chunk.last_index)
        .map_err(|_| MeshError::storage(format!("negative cursor {}", chunk.last_index)))?;
    let start_index = next_index
        .checked_sub(count)
        .ok_or_else(|| MeshError::storage("cursor moved backwards during reservation"))?;
    let capacity = chunk.id_size.capacity();
    if chunk.is_obfuscated() && next_index > capacity {
        return Err(MeshError::IdDomainExhausted {
            organization_id,
            type_id,
            capacity,
        });
    }
    tx.commit().await?;

    let ids = (start_index..next_index)
        .map(|index| chunk.resolve_index(index))
        .collect::<MeshResult<Vec<ObjectId>>>()?;
    debug!(
        "mesh: reserved {count} ids [{start_index}, {next_index}) for organization {organization_id} type {type_id}"
    );
    Ok(Reservation {
        chunk,
        start_index,
        ids,
    })
}
