use thiserror::Error;

use crate::ids::{ObjectRef, OrganizationId, TypeId};
use crate::value::ValueKind;

#[derive(Debug, Error)]
pub enum MeshError {
    #[error("storage error: {message}")]
    Storage { message: String },
    #[error("not found: {message}")]
    NotFound { message: String },
    #[error("validation error: {message}")]
    Validation { message: String },
    #[error("no chunk provisioned for organization {organization_id} type {type_id}")]
    ChunkNotProvisioned {
        organization_id: OrganizationId,
        type_id: TypeId,
    },
    #[error("unsupported id domain: id_size {id_size}")]
    UnsupportedIdDomain { id_size: i32 },
    #[error(
        "id domain exhausted for organization {organization_id} type {type_id} (capacity {capacity})"
    )]
    IdDomainExhausted {
        organization_id: OrganizationId,
        type_id: TypeId,
        capacity: u64,
    },
    #[error(
        "{count} current chunks for organization {organization_id} type {type_id}, expected one"
    )]
    DuplicateCurrentChunk {
        organization_id: OrganizationId,
        type_id: TypeId,
        count: u64,
    },
    #[error("{kind} row references missing object {object}")]
    OrphanValueRow { kind: ValueKind, object: ObjectRef },
}

impl MeshError {
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    pub fn chunk_not_provisioned(organization_id: OrganizationId, type_id: TypeId) -> Self {
        Self::ChunkNotProvisioned {
            organization_id,
            type_id,
        }
    }

    pub fn orphan(kind: ValueKind, object: ObjectRef) -> Self {
        Self::OrphanValueRow { kind, object }
    }

    /// True for failures that leave the directory untouched and can be retried
    /// as a whole.
    pub fn is_retryable(&self) -> bool {
        matches!(self, MeshError::Storage { .. })
    }
}

pub type MeshResult<T> = Result<T, MeshError>;

impl From<sea_orm::DbErr> for MeshError {
    fn from(value: sea_orm::DbErr) -> Self {
        MeshError::storage(value.to_string())
    }
}
