//! Entry points for a mesh rooted in a local directory.

use std::path::{Path, PathBuf};

use log::info;

use crate::{BootstrapOutcome, MeshConfig, MeshResult, MeshStore};

const DEFAULT_DB_NAME: &str = "mesh.sqlite";

/// Reads `mesh.json` under `base`, writing a SQLite default beside it when
/// none exists.
pub fn load_or_init_config(base: &Path) -> MeshResult<MeshConfig> {
    MeshConfig::load_or_init(base, &default_sqlite_path(base))
}

/// Connects with the config found under `base`. Tables are not provisioned
/// until `emerge`.
pub async fn open_store(base: &Path) -> MeshResult<MeshStore> {
    let config = load_or_init_config(base)?;
    let sharding = config.sharding();
    info!(
        "mesh: opening {} store under {} (default id size {:?})",
        config.backend_name(),
        base.display(),
        sharding.id_size()?
    );
    MeshStore::attach(&config, base).await
}

/// Opens the store under `base` and brings its schema up to the embedded
/// manifest.
pub async fn open_and_emerge(base: &Path) -> MeshResult<(MeshStore, BootstrapOutcome)> {
    let store = open_store(base).await?;
    let outcome = store.emerge().await?;
    info!("mesh: schema {outcome:?}");
    Ok((store, outcome))
}

pub fn default_sqlite_path(base: &Path) -> PathBuf {
    base.join(DEFAULT_DB_NAME)
}
