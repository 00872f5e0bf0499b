use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use sea_orm::sea_query::Iden;
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseBackend, DatabaseConnection, Statement,
};
use sea_orm_migration::SchemaManager;
use tokio::sync::RwLock;

use prime_mesh_core::api::{
    AllocatorApi, CreateRecordInput, DirectoryApi, RecordWriteApi, ValueStoreApi,
};
use prime_mesh_core::{
    BootstrapOutcome, ChunkOptions, ChunkShard, MeshError, MeshResult, NewValue, ObjectRecord,
    ObjectRef, OrganizationId, Reservation, RolloverReason, SchemaDeclaration, SchemaRegistry,
    ShardEndpoint, Survey, TaggedRecord, TypeId, ValueKind, needs_rollover,
};

use crate::db::MeshChunkShard;
use crate::{
    MeshConfig, ShardingConfig, allocator, bootstrap, directory, eav, load_schema_manifest,
    provision, schema_read,
};

/// Handle to one mesh backend. Cloning shares the pool and the schema registry.
#[derive(Clone)]
pub struct MeshStore {
    conn: DatabaseConnection,
    backend: DatabaseBackend,
    sharding: ShardingConfig,
    registry: Arc<RwLock<SchemaRegistry>>,
    allocations_since_probe: Arc<AtomicU64>,
}

impl MeshStore {
    /// Connects and checks liveness. A previously bootstrapped schema is loaded
    /// into the registry; nothing is provisioned.
    pub async fn attach(config: &MeshConfig, base_dir: &Path) -> MeshResult<Self> {
        let url = config.connection_url(base_dir)?;
        let mut options = ConnectOptions::new(url);
        if let Some(pool) = &config.pool {
            if let Some(max) = pool.max_connections {
                options.max_connections(max);
            }
            if let Some(min) = pool.min_connections {
                options.min_connections(min);
            }
            if let Some(timeout_ms) = pool.connect_timeout_ms {
                options.connect_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.acquire_timeout_ms {
                options.acquire_timeout(Duration::from_millis(timeout_ms));
            }
            if let Some(timeout_ms) = pool.idle_timeout_ms {
                options.idle_timeout(Duration::from_millis(timeout_ms));
            }
        }
        options.sqlx_logging(config.sql_logging.unwrap_or(false));
        let sharding = config.sharding();
        sharding.id_size()?;

        let conn = Database::connect(options).await.map_err(MeshError::from)?;
        let backend = conn.get_database_backend();
        conn.query_one_raw(Statement::from_string(backend, "SELECT 1"))
            .await?
            .ok_or_else(|| MeshError::storage("liveness probe returned no row"))?;

        let store = Self {
            conn,
            backend,
            sharding,
            registry: Arc::new(RwLock::new(SchemaRegistry::new())),
            allocations_since_probe: Arc::new(AtomicU64::new(0)),
        };
        store.reload_schema().await?;
        info!("mesh: attached {} store", config.backend_name());
        Ok(store)
    }

    pub fn connection(&self) -> &DatabaseConnection {
        &self.conn
    }

    pub fn backend(&self) -> DatabaseBackend {
        self.backend
    }

    pub fn sharding(&self) -> &ShardingConfig {
        &self.sharding
    }

    /// Provisions every table and bootstraps the embedded schema manifest.
    pub async fn emerge(&self) -> MeshResult<BootstrapOutcome> {
        let declaration = load_schema_manifest()?;
        self.emerge_with(&declaration).await
    }

    pub async fn emerge_with(&self, declaration: &SchemaDeclaration) -> MeshResult<BootstrapOutcome> {
        let mut registry = self.registry.write().await;
        let outcome = bootstrap::emerge(
            &self.conn,
            declaration,
            &mut registry,
            self.sharding.id_size()?,
        )
        .await?;
        info!(
            "mesh: emerged ({outcome:?}) with {} types for organization {}",
            declaration.types.len(),
            registry.organization_id()?
        );
        Ok(outcome)
    }

    pub async fn detach(self) -> MeshResult<()> {
        self.conn.close().await?;
        info!("mesh: detached");
        Ok(())
    }

    /// Drops every mesh table and forgets the schema.
    pub async fn revoke(&self) -> MeshResult<()> {
        provision::drop_all_tables(&self.conn).await?;
        *self.registry.write().await = SchemaRegistry::new();
        info!("mesh: revoked all tables");
        Ok(())
    }

    pub async fn ensure_directory_tables(&self) -> MeshResult<()> {
        provision::ensure_directory_tables(&self.conn).await
    }

    pub async fn ensure_value_table(&self, kind: ValueKind) -> MeshResult<()> {
        provision::ensure_value_table(&self.conn, kind).await
    }

    pub async fn ensure_value_tables(&self) -> MeshResult<()> {
        provision::ensure_value_tables(&self.conn).await
    }

    /// Snapshot of the schema registry.
    pub async fn schema(&self) -> SchemaRegistry {
        self.registry.read().await.clone()
    }

    pub async fn default_organization(&self) -> MeshResult<OrganizationId> {
        self.registry.read().await.organization_id()
    }

    /// Rebuilds the registry from storage when the anchor has been claimed.
    pub async fn reload_schema(&self) -> MeshResult<()> {
        let manager = SchemaManager::new(&self.conn);
        if !manager
            .has_table(MeshChunkShard::Table.to_string())
            .await?
        {
            return Ok(());
        }
        let anchor = directory::find_anchor(&self.conn).await?;
        if anchor.is_unclaimed_anchor() {
            return Ok(());
        }
        let builtins = bootstrap::builtin_types_for(anchor.id_salt)?;
        let registry =
            schema_read::select_every_type(&self.conn, anchor.organization_id, builtins).await?;
        *self.registry.write().await = registry;
        debug!("mesh: loaded schema for organization {}", anchor.organization_id);
        Ok(())
    }

    pub async fn find_anchor(&self) -> MeshResult<ChunkShard> {
        directory::find_anchor(&self.conn).await
    }

    pub async fn verify_current_chunk(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<()> {
        directory::verify_current_chunk(&self.conn, organization_id, type_id).await
    }

    pub async fn database_size_bytes(&self) -> MeshResult<u64> {
        directory::database_size_bytes(&self.conn).await
    }

    /// Rollover decision against the configured shard size.
    pub fn needs_rollover(
        &self,
        chunk: &ChunkShard,
        pending: u64,
        shard_bytes: Option<u64>,
    ) -> Option<RolloverReason> {
        needs_rollover(chunk, pending, shard_bytes, self.sharding.max_database_bytes())
    }

    /// Probes the shard size once enough allocations have accumulated.
    async fn probe_shard_size(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
        count: u64,
    ) -> MeshResult<()> {
        let seen = self
            .allocations_since_probe
            .fetch_add(count, Ordering::Relaxed)
            + count;
        if seen < self.sharding.database_size_check_threshold() {
            return Ok(());
        }
        self.allocations_since_probe.store(0, Ordering::Relaxed);
        let bytes = self.database_size_bytes().await?;
        let chunk = directory::current_chunk(&self.conn, organization_id, type_id).await?;
        if self.needs_rollover(&chunk, count, Some(bytes)) != Some(RolloverReason::ShardFull) {
            return Ok(());
        }
        let shards = directory::list_shards(&self.conn).await?;
        if shards.len() < 2 {
            warn!("mesh: shard holds {bytes} bytes but no other shard is registered");
            return Ok(());
        }
        warn!(
            "mesh: shard holds {bytes} bytes, rolling over organization {organization_id} type {type_id}"
        );
        directory::rollover_chunk(&self.conn, organization_id, type_id).await?;
        Ok(())
    }

    fn validate_record(registry: &SchemaRegistry, input: &CreateRecordInput) -> MeshResult<()> {
        let mut seen = std::collections::HashSet::new();
        for entry in &input.values {
            let property = registry
                .property(&input.type_name, &entry.property)
                .ok_or_else(|| {
                    MeshError::validation(format!(
                        "type '{}' has no property '{}'",
                        input.type_name, entry.property
                    ))
                })?;
            let kind = entry.value.kind();
            let accepted = property.types.is_empty()
                || property
                    .types
                    .keys()
                    .any(|name| ValueKind::for_property_type(name) == kind);
            if !accepted {
                return Err(MeshError::validation(format!(
                    "property '{}.{}' does not accept {kind} values",
                    input.type_name, entry.property
                )));
            }
            if !seen.insert(entry.property.as_str()) && !property.is_list {
                return Err(MeshError::validation(format!(
                    "property '{}.{}' is not a list",
                    input.type_name, entry.property
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AllocatorApi for MeshStore {
    /// Rolls the chunk over and retries once when its id domain is exhausted.
    async fn reserve(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
        count: u64,
    ) -> MeshResult<Reservation> {
        self.probe_shard_size(organization_id, type_id, count)
            .await?;
        match allocator::reserve(&self.conn, organization_id, type_id, count).await {
            Err(MeshError::IdDomainExhausted { capacity, .. }) => {
                info!(
                    "mesh: id domain of {capacity} exhausted, rolling over organization {organization_id} type {type_id}"
                );
                directory::rollover_chunk(&self.conn, organization_id, type_id).await?;
                allocator::reserve(&self.conn, organization_id, type_id, count).await
            }
            other => other,
        }
    }
}

#[async_trait]
impl DirectoryApi for MeshStore {
    async fn create_chunk(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
        options: ChunkOptions,
    ) -> MeshResult<ChunkShard> {
        directory::create_chunk(&self.conn, organization_id, type_id, options).await
    }

    async fn current_chunk(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<ChunkShard> {
        directory::current_chunk(&self.conn, organization_id, type_id).await
    }

    async fn list_chunks(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Vec<ChunkShard>> {
        directory::list_chunks(&self.conn, organization_id, type_id).await
    }

    async fn rollover_chunk(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<ChunkShard> {
        let chunk = directory::rollover_chunk(&self.conn, organization_id, type_id).await?;
        info!(
            "mesh: rolled over organization {organization_id} type {type_id} to chunk {}",
            chunk.visible_chunk_id
        );
        Ok(chunk)
    }

    async fn register_shard(&self, shard_url: &str) -> MeshResult<ShardEndpoint> {
        directory::register_shard(&self.conn, shard_url).await
    }

    async fn list_shards(&self) -> MeshResult<Vec<ShardEndpoint>> {
        directory::list_shards(&self.conn).await
    }

    async fn survey(&self) -> MeshResult<Survey> {
        Ok(Survey {
            shards: directory::list_shards(&self.conn).await?,
            chunks: directory::list_all_chunks(&self.conn).await?,
        })
    }
}

#[async_trait]
impl ValueStoreApi for MeshStore {
    async fn create_object(&self, object: ObjectRef, debug: Option<String>) -> MeshResult<()> {
        eav::create_object(&self.conn, object, debug).await
    }

    async fn create_value(&self, value: NewValue) -> MeshResult<()> {
        eav::create_value(&self.conn, value).await
    }

    async fn select_every_type_record(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Vec<TaggedRecord>> {
        eav::select_every_type_record(&self.conn, organization_id, type_id).await
    }

    async fn select_objects(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Vec<ObjectRecord>> {
        eav::select_objects(&self.conn, organization_id, type_id).await
    }

    async fn object_exists(&self, object: ObjectRef) -> MeshResult<bool> {
        eav::object_exists(&self.conn, object).await
    }

    async fn find_orphan_rows(
        &self,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Vec<TaggedRecord>> {
        eav::find_orphan_rows(&self.conn, organization_id, type_id).await
    }
}

#[async_trait]
impl RecordWriteApi for MeshStore {
    async fn create_record(&self, input: CreateRecordInput) -> MeshResult<ObjectRef> {
        let registry = self.schema().await;
        let organization_id = match input.organization_id {
            Some(organization_id) => organization_id,
            None => registry.organization_id()?,
        };
        let type_id = registry.get_id_for_type(&input.type_name)?;
        Self::validate_record(&registry, &input)?;

        let object_id = self.reserve(organization_id, type_id, 1).await?.first()?;
        let object = ObjectRef::new(organization_id, type_id, object_id);
        eav::create_object(&self.conn, object, input.debug.clone()).await?;
        for entry in input.values {
            let property_id = registry.get_id_for_property(&input.type_name, &entry.property)?;
            eav::create_value(&self.conn, NewValue::new(object, property_id, entry.value)).await?;
        }
        debug!("mesh: created {} record {object}", input.type_name);
        Ok(object)
    }
}
