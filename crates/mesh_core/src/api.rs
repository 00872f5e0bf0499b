use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::{
    ChunkOptions, ChunkShard, MeshResult, NewValue, ObjectRecord, ObjectRef, OrganizationId,
    Reservation, ShardEndpoint, Survey, TaggedRecord, TypeId, Value,
};

#[async_trait]
pub trait AllocatorApi {
    /// Reserves `count` ids from the current chunk of the pair.
    async fn reserve(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
        count: u64,
    ) -> MeshResult<Reservation>;
}

#[async_trait]
pub trait DirectoryApi {
    async fn create_chunk(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
        options: ChunkOptions,
    ) -> MeshResult<ChunkShard>;
    async fn current_chunk(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<ChunkShard>;
    async fn list_chunks(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Vec<ChunkShard>>;
    async fn rollover_chunk(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<ChunkShard>;
    async fn register_shard(&self, shard_url: &str) -> MeshResult<ShardEndpoint>;
    async fn list_shards(&self) -> MeshResult<Vec<ShardEndpoint>>;
    async fn survey(&self) -> MeshResult<Survey>;
}

#[async_trait]
pub trait ValueStoreApi {
    async fn create_object(&self, object: ObjectRef, debug: Option<String>) -> MeshResult<()>;
    async fn create_value(&self, value: NewValue) -> MeshResult<()>;
    async fn select_every_type_record(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Vec<TaggedRecord>>;
    async fn select_objects(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Vec<ObjectRecord>>;
    async fn object_exists(&self, object: ObjectRef) -> MeshResult<bool>;
    async fn find_orphan_rows(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Vec<TaggedRecord>>;
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RecordValue {
    pub property: String,
    pub value: Value,
}

impl RecordValue {
    pub fn new(property: impl Into<String>, value: Value) -> Self {
        Self {
            property: property.into(),
            value,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct CreateRecordInput {
    /// Defaults to the organization created by bootstrap.
    pub organization_id: Option<OrganizationId>,
    pub type_name: String,
    pub values: Vec<RecordValue>,
    pub debug: Option<String>,
}

#[async_trait]
pub trait RecordWriteApi {
    async fn create_record(&self, input: CreateRecordInput) -> MeshResult<ObjectRef>;
}
