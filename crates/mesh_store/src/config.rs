use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use prime_mesh_core::{IdSize, MeshError, MeshResult};

const DEFAULT_CONFIG_NAME: &str = "mesh.json";
const DEFAULT_DB_FILE: &str = "mesh.sqlite";

const GIB: u64 = 1024 * 1024 * 1024;
const MIB: u64 = 1024 * 1024;
pub const DEFAULT_MAX_DATABASE_BYTES: u64 = 1024 * GIB;
pub const MIN_MAX_DATABASE_BYTES: u64 = GIB;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum DatabaseConfig {
    Sqlite { path: Option<String> },
    Postgres { url: String },
    Mysql { url: String },
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct PoolConfig {
    pub max_connections: Option<u32>,
    pub min_connections: Option<u32>,
    pub connect_timeout_ms: Option<u64>,
    pub acquire_timeout_ms: Option<u64>,
    pub idle_timeout_ms: Option<u64>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Bytes a shard may hold before new chunks are placed elsewhere.
    pub max_size_of_each_database_instance: Option<u64>,
    /// Id domain of newly created chunks, as a nibble count (4 or 8).
    pub default_id_size: Option<i32>,
}

impl ShardingConfig {
    pub fn with_defaults() -> Self {
        Self {
            max_size_of_each_database_instance: Some(DEFAULT_MAX_DATABASE_BYTES),
            default_id_size: Some(IdSize::Bits16.as_nibbles()),
        }
    }

    pub fn max_database_bytes(&self) -> u64 {
        self.max_size_of_each_database_instance
            .unwrap_or(DEFAULT_MAX_DATABASE_BYTES)
            .max(MIN_MAX_DATABASE_BYTES)
    }

    /// Allocations between two shard size probes.
    pub fn database_size_check_threshold(&self) -> u64 {
        self.max_database_bytes() / MIB
    }

    pub fn id_size(&self) -> MeshResult<IdSize> {
        IdSize::from_nibbles(
            self.default_id_size
                .unwrap_or_else(|| IdSize::Bits16.as_nibbles()),
        )
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MeshConfig {
    pub database: DatabaseConfig,
    pub pool: Option<PoolConfig>,
    pub sharding: Option<ShardingConfig>,
    pub sql_logging: Option<bool>,
}

impl MeshConfig {
    pub fn default_sqlite(path: impl Into<String>) -> Self {
        Self {
            database: DatabaseConfig::Sqlite {
                path: Some(path.into()),
            },
            pool: None,
            sharding: Some(ShardingConfig::with_defaults()),
            sql_logging: Some(false),
        }
    }

    pub fn load_or_init(base_dir: &Path, default_sqlite_path: &Path) -> MeshResult<Self> {
        fs::create_dir_all(base_dir)
            .map_err(|err| MeshError::storage(format!("create config dir: {err}")))?;
        let config_path = base_dir.join(DEFAULT_CONFIG_NAME);
        if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .map_err(|err| MeshError::storage(format!("read config: {err}")))?;
            let config: MeshConfig =
                serde_json::from_str(&raw).map_err(|err| MeshError::invalid(err.to_string()))?;
            config.sharding().id_size()?;
            return Ok(config);
        }
        let default = MeshConfig::default_sqlite(default_sqlite_path.to_string_lossy());
        let payload = serde_json::to_string_pretty(&default)
            .map_err(|err| MeshError::storage(format!("serialize config: {err}")))?;
        fs::write(&config_path, payload)
            .map_err(|err| MeshError::storage(format!("write config: {err}")))?;
        Ok(default)
    }

    pub fn sharding(&self) -> ShardingConfig {
        self.sharding
            .clone()
            .unwrap_or_else(ShardingConfig::with_defaults)
    }

    pub fn sqlite_path(&self, base_dir: &Path) -> MeshResult<PathBuf> {
        match &self.database {
            DatabaseConfig::Sqlite { path } => {
                let path = path.clone().unwrap_or_else(|| DEFAULT_DB_FILE.to_string());
                let candidate = PathBuf::from(path);
                if candidate.is_absolute() {
                    Ok(candidate)
                } else {
                    Ok(base_dir.join(candidate))
                }
            }
            _ => Err(MeshError::invalid("config is not sqlite backend")),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        match self.database {
            DatabaseConfig::Sqlite { .. } => "sqlite",
            DatabaseConfig::Postgres { .. } => "postgres",
            DatabaseConfig::Mysql { .. } => "mysql",
        }
    }

    pub fn connection_url(&self, base_dir: &Path) -> MeshResult<String> {
        match &self.database {
            DatabaseConfig::Sqlite { .. } => {
                let path = self.sqlite_path(base_dir)?;
                Ok(format!("sqlite://{}?mode=rwc", path.display()))
            }
            DatabaseConfig::Postgres { url } | DatabaseConfig::Mysql { url } => Ok(url.clone()),
        }
    }
}
