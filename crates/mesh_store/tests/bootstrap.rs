use std::path::Path;

use prime_mesh_store::{
    BootstrapOutcome, DirectoryApi, MeshConfig, MeshResult, MeshStore, NAME_PROPERTY, ObjectId,
    ObjectRef, PROPERTY_TYPE, SchemaDeclaration, SchemaRegistry, TYPE_TYPE, ValueStoreApi,
    load_schema_manifest, open_store,
};
use sea_orm::{ConnectionTrait, Statement};
use tempfile::tempdir;

async fn attach(base: &Path) -> MeshResult<MeshStore> {
    let config = MeshConfig::default_sqlite(base.join("mesh.sqlite").to_string_lossy());
    MeshStore::attach(&config, base).await
}

async fn run_sql(store: &MeshStore, sql: String) -> MeshResult<()> {
    store
        .connection()
        .execute_raw(Statement::from_string(store.backend(), sql))
        .await?;
    Ok(())
}

/// Every (type, property, property type) id the registry knows.
fn snapshot(registry: &SchemaRegistry) -> Vec<String> {
    let mut lines = Vec::new();
    for (name, entry) in registry.types() {
        lines.push(format!("{name}={}@{}", entry.id, entry.chunk_id));
        for (property, property_entry) in &entry.properties {
            lines.push(format!(
                "{name}.{property}={:?} list={} required={}",
                property_entry.id, property_entry.is_list, property_entry.is_required
            ));
            for (variant, id) in &property_entry.types {
                lines.push(format!("{name}.{property}:{variant}={id}"));
            }
        }
    }
    lines
}

#[tokio::test]
async fn second_emerge_changes_nothing() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;

    assert_eq!(store.emerge().await?, BootstrapOutcome::Initialized);
    let first = snapshot(&store.schema().await);
    let chunks = store.survey().await?.chunks.len();

    assert_eq!(store.emerge().await?, BootstrapOutcome::AlreadyInitialized);
    assert_eq!(snapshot(&store.schema().await), first);
    assert_eq!(store.survey().await?.chunks.len(), chunks);

    store.detach().await
}

#[tokio::test]
async fn reattach_reloads_the_same_registry() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.emerge().await?;
    let before = store.schema().await;
    let organization = store.default_organization().await?;
    store.detach().await?;

    let store = attach(dir.path()).await?;
    let after = store.schema().await;
    assert_eq!(store.default_organization().await?, organization);
    assert_eq!(snapshot(&after), snapshot(&before));
    assert_eq!(after.builtins()?, before.builtins()?);

    store.detach().await
}

#[tokio::test]
async fn organization_properties_are_registered() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = open_store(dir.path()).await?;
    store.emerge().await?;
    let registry = store.schema().await;

    let organization = registry.type_entry("organization").expect("organization");
    let properties: Vec<&str> = organization.properties.keys().map(String::as_str).collect();
    assert_eq!(
        properties,
        vec!["description", "image", "keywords", "slug", "title"]
    );

    let slug = registry.property("organization", "slug").expect("slug");
    assert!(slug.is_required);
    assert!(!slug.is_list);
    assert!(slug.types.contains_key("string"));
    let keywords = registry.property("organization", "keywords").expect("keywords");
    assert!(keywords.is_list);
    assert!(keywords.types.contains_key("term"));

    let slug_id = registry.get_id_for_property("organization", "slug")?;
    let organization_type = registry.get_id_for_type("organization")?;
    assert_eq!(
        registry.get_name_for_property(organization_type, slug_id)?,
        "slug"
    );
    let variant = registry.get_id_for_property_type("organization", "slug", "string")?;
    assert_eq!(
        registry.get_name_for_property_type(organization_type, slug_id, variant)?,
        "string"
    );

    store.detach().await
}

#[tokio::test]
async fn anchor_becomes_the_type_chunk() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.emerge().await?;
    let registry = store.schema().await;
    let builtins = registry.builtins()?;
    let declared = load_schema_manifest()?.types.len() as i64;

    let anchor = store.find_anchor().await?;
    assert_eq!(anchor.type_id, builtins.type_type);
    assert_eq!(anchor.organization_id, store.default_organization().await?);
    assert!(anchor.is_obfuscated());
    assert_eq!(anchor.last_index, declared);
    assert_eq!(registry.get_id_for_type(TYPE_TYPE)?, builtins.type_type);

    for (name, entry) in registry.types() {
        let chunk = store
            .current_chunk(anchor.organization_id, entry.id)
            .await?;
        assert_eq!(chunk.visible_chunk_id, entry.chunk_id, "chunk of {name}");
    }

    store.detach().await
}

#[tokio::test]
async fn name_property_names_itself() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.emerge().await?;
    let registry = store.schema().await;
    let organization = store.default_organization().await?;
    let builtins = registry.builtins()?;
    let name_id = registry.get_id_for_property(PROPERTY_TYPE, NAME_PROPERTY)?;

    let records = store
        .select_every_type_record(organization, builtins.property)
        .await?;
    let own_name = records
        .iter()
        .find(|record| {
            record.object.object_id == name_id.as_object() && record.property_id == name_id
        })
        .expect("name row of property.name");
    assert_eq!(own_name.value.as_str(), Some(NAME_PROPERTY));

    let default_org = ObjectRef::new(
        organization,
        builtins.organization,
        ObjectId(organization.0),
    );
    assert!(store.object_exists(default_org).await?);
    assert!(store.find_orphan_rows(organization, builtins.property).await?.is_empty());

    store.detach().await
}

#[tokio::test]
async fn partial_bootstrap_resumes_without_renumbering() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    let full = load_schema_manifest()?;
    let partial = SchemaDeclaration {
        types: full.types.iter().take(5).cloned().collect(),
    };

    assert_eq!(store.emerge_with(&partial).await?, BootstrapOutcome::Initialized);
    let before = store.schema().await;
    assert!(!before.contains_type("membership"));

    assert_eq!(store.emerge_with(&full).await?, BootstrapOutcome::Resumed);
    let after = store.schema().await;
    for (name, entry) in before.types() {
        assert_eq!(after.get_id_for_type(name)?, entry.id);
        for (property, property_entry) in &entry.properties {
            assert_eq!(
                after.property(name, property).and_then(|p| p.id),
                property_entry.id
            );
        }
    }
    assert!(after.contains_type("membership"));
    assert_eq!(store.emerge().await?, BootstrapOutcome::AlreadyInitialized);

    store.detach().await
}

#[tokio::test]
async fn unnamed_types_are_recovered_without_renumbering() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.emerge().await?;
    let before = snapshot(&store.schema().await);
    let chunks = store.survey().await?.chunks.len();
    let builtins = store.schema().await.builtins()?;

    // Object rows and chunks of every type survive, their name rows do not.
    run_sql(
        &store,
        format!(
            "DELETE FROM mesh_string WHERE object_type_id = {}",
            builtins.type_type
        ),
    )
    .await?;
    store.detach().await?;

    let store = attach(dir.path()).await?;
    assert!(!store.schema().await.contains_type("membership"));
    assert_eq!(store.emerge().await?, BootstrapOutcome::Resumed);
    assert_eq!(snapshot(&store.schema().await), before);
    assert_eq!(store.survey().await?.chunks.len(), chunks);
    store.detach().await?;

    let store = attach(dir.path()).await?;
    assert_eq!(snapshot(&store.schema().await), before);
    assert_eq!(store.emerge().await?, BootstrapOutcome::AlreadyInitialized);

    store.detach().await
}

#[tokio::test]
async fn property_flags_land_before_its_name() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    store.emerge().await?;
    let registry = store.schema().await;
    let builtins = registry.builtins()?;
    let keywords = registry.get_id_for_property("organization", "keywords")?;
    let before = snapshot(&registry);

    // State left by a crash right after the owner row of `keywords`.
    for table in ["mesh_string", "mesh_boolean"] {
        run_sql(
            &store,
            format!(
                "DELETE FROM {table} WHERE object_type_id = {} AND object_id = {}",
                builtins.property, keywords
            ),
        )
        .await?;
    }
    store.detach().await?;

    let store = attach(dir.path()).await?;
    assert!(store.schema().await.property("organization", "keywords").is_none());
    assert_eq!(store.emerge().await?, BootstrapOutcome::Resumed);
    store.detach().await?;

    let store = attach(dir.path()).await?;
    let registry = store.schema().await;
    assert_eq!(snapshot(&registry), before);
    let reloaded = registry.property("organization", "keywords").expect("keywords");
    assert_eq!(reloaded.id, Some(keywords));
    assert!(reloaded.is_list);
    assert!(!reloaded.is_required);

    store.detach().await
}

#[tokio::test]
async fn declaration_without_meta_properties_is_rejected() -> MeshResult<()> {
    let dir = tempdir().expect("tempdir");
    let store = attach(dir.path()).await?;
    let mut declaration = load_schema_manifest()?;
    if let Some(property) = declaration
        .types
        .iter_mut()
        .find(|decl| decl.name == PROPERTY_TYPE)
    {
        property.properties.retain(|p| p.name != "is_list");
    }
    assert!(store.emerge_with(&declaration).await.is_err());
    assert!(store.schema().await.is_empty());

    store.detach().await
}
