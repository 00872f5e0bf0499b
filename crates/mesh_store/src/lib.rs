pub mod allocator;
pub mod bootstrap;
pub mod config;
pub mod datastore;
mod db;
pub mod directory;
pub mod eav;
pub mod provision;
mod query;
pub mod schema_manifest;
pub mod schema_read;
pub mod store;

pub mod api {
    pub use prime_mesh_core::api::*;
}

pub mod schema {
    pub use prime_mesh_core::schema::*;
}

pub mod value {
    pub use prime_mesh_core::value::*;
}

pub use config::{DatabaseConfig, MeshConfig, PoolConfig, ShardingConfig};
pub use datastore::{default_sqlite_path, load_or_init_config, open_and_emerge, open_store};
pub use prime_mesh_core::*;
pub use schema_manifest::load_schema_manifest;
pub use store::MeshStore;
