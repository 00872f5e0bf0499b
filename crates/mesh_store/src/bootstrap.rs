//! Meta-circular schema bootstrap.
//!
//! Phase 1 establishes identities: the anchor becomes the chunk of the `type`
//! type, the other built-in chunks are created, and every declared type and
//! property gets an object row. Phase 2 writes the relationships and names
//! that describe the schema with the schema's own properties.
//!
//! Every step skips entities that already exist, so a run against a claimed
//! anchor resumes an interrupted bootstrap or does nothing. Schema objects
//! whose name row never landed are found again by their debug label, and a
//! property's name row is its last write.

use std::collections::{HashMap, HashSet};

use log::{debug, warn};
use sea_orm::DatabaseConnection;

use prime_mesh_core::salt::thread_salt;
use prime_mesh_core::{
    BUILTIN_TYPES, BootstrapOutcome, BuiltinTypes, ChunkOptions, ChunkShard, IS_LIST_PROPERTY,
    IS_REQUIRED_PROPERTY, IdSize, MeshError, MeshResult, NAME_PROPERTY, NewValue,
    ORGANIZATION_TYPE, OWNER_PROPERTY, ObjectId, ObjectRef, OrganizationId,
    PROPERTY_TYPE, PROPERTY_TYPE_OWNER_PROPERTY, PROPERTY_TYPE_TYPE, PropertyDecl, PropertyId,
    SchemaDeclaration, SchemaRegistry, TYPE_TYPE, TypeId, Value, ValueKind, resolve,
};

use crate::{allocator, directory, eav, provision, schema_read};

/// Salts drawn for a fresh bootstrap.
#[derive(Clone, Copy, Debug)]
pub struct BootstrapSalts {
    pub organization: i64,
    pub type_type: i64,
    pub property: i64,
    pub property_type: i64,
}

impl BootstrapSalts {
    pub fn generate() -> Self {
        Self {
            organization: thread_salt(),
            type_type: thread_salt(),
            property: thread_salt(),
            property_type: thread_salt(),
        }
    }
}

/// Built-in type ids follow from the type salt: logical indices 0 to 3 of
/// the `type` chunk in declaration order.
pub fn builtin_types_for(type_salt: i64) -> MeshResult<BuiltinTypes> {
    let id = |index: u64| -> MeshResult<TypeId> {
        TypeId::from_object(resolve(index, type_salt, IdSize::Bits16)?)
    };
    Ok(BuiltinTypes {
        type_type: id(0)?,
        property: id(1)?,
        property_type: id(2)?,
        organization: id(3)?,
    })
}

pub fn default_organization_for(organization_salt: i64) -> MeshResult<OrganizationId> {
    Ok(OrganizationId::from_object(resolve(
        0,
        organization_salt,
        IdSize::Bits32,
    )?))
}

/// Runs the bootstrap and fills `registry`.
pub async fn emerge(
    conn: &DatabaseConnection,
    declaration: &SchemaDeclaration,
    registry: &mut SchemaRegistry,
    type_id_size: IdSize,
) -> MeshResult<BootstrapOutcome> {
    declaration.validate()?;
    provision::ensure_directory_tables(conn).await?;
    provision::ensure_value_tables(conn).await?;

    let anchor = directory::find_anchor(conn).await?;
    let mut salts = BootstrapSalts::generate();
    let resumed = !anchor.is_unclaimed_anchor();
    let (organization_id, builtins) = if resumed {
        let builtins = builtin_types_for(anchor.id_salt)?;
        if builtins.type_type != anchor.type_id {
            return Err(MeshError::storage(format!(
                "anchor type {} does not match its salt",
                anchor.type_id
            )));
        }
        salts.type_type = anchor.id_salt;
        *registry =
            schema_read::select_every_type(conn, anchor.organization_id, builtins).await?;
        (anchor.organization_id, builtins)
    } else {
        let builtins = builtin_types_for(salts.type_type)?;
        let organization_id = default_organization_for(salts.organization)?;
        directory::claim_anchor(conn, organization_id, builtins.type_type, salts.type_type)
            .await?;
        *registry = SchemaRegistry::new();
        registry.set_organization(organization_id);
        registry.set_builtins(builtins);
        (organization_id, builtins)
    };

    let mut run = Bootstrap {
        conn,
        organization_id,
        builtins,
        salts,
        type_id_size,
        registry,
        labels: HashMap::new(),
        writes: 0,
    };
    run.establish_builtins().await?;
    run.load_labels().await?;
    run.establish_types(declaration).await?;
    run.establish_properties(declaration).await?;
    run.link_properties(declaration).await?;
    run.name_types(declaration).await?;

    let outcome = match (resumed, run.writes) {
        (false, _) => BootstrapOutcome::Initialized,
        (true, 0) => BootstrapOutcome::AlreadyInitialized,
        (true, writes) => {
            warn!("mesh: resumed an interrupted bootstrap ({writes} writes)");
            BootstrapOutcome::Resumed
        }
    };
    Ok(outcome)
}

struct Bootstrap<'a> {
    conn: &'a DatabaseConnection,
    organization_id: OrganizationId,
    builtins: BuiltinTypes,
    salts: BootstrapSalts,
    type_id_size: IdSize,
    registry: &'a mut SchemaRegistry,
    /// Schema object ids by (type, debug label).
    labels: HashMap<(TypeId, String), ObjectId>,
    writes: u64,
}

impl Bootstrap<'_> {
    fn object(&self, type_id: TypeId, object_id: ObjectId) -> ObjectRef {
        ObjectRef::new(self.organization_id, type_id, object_id)
    }

    async fn ensure_chunk(
        &mut self,
        type_id: TypeId,
        options: ChunkOptions,
    ) -> MeshResult<ChunkShard> {
        match directory::current_chunk(self.conn, self.organization_id, type_id).await {
            Ok(chunk) => Ok(chunk),
            Err(MeshError::ChunkNotProvisioned { .. }) => {
                self.writes += 1;
                directory::create_chunk(self.conn, self.organization_id, type_id, options).await
            }
            Err(err) => Err(err),
        }
    }

    async fn ensure_object(&mut self, object: ObjectRef, debug: &str) -> MeshResult<bool> {
        if eav::object_exists(self.conn, object).await? {
            return Ok(false);
        }
        eav::create_object(self.conn, object, Some(debug.to_string())).await?;
        self.writes += 1;
        debug!("mesh: bootstrap object {object} ({debug})");
        Ok(true)
    }

    async fn write(&mut self, value: NewValue) -> MeshResult<()> {
        eav::create_value(self.conn, value).await?;
        self.writes += 1;
        Ok(())
    }

    async fn reserve_one(&mut self, type_id: TypeId) -> MeshResult<ObjectId> {
        allocator::reserve(self.conn, self.organization_id, type_id, 1)
            .await?
            .first()
    }

    async fn load_labels(&mut self) -> MeshResult<()> {
        let schema_types = [
            self.builtins.type_type,
            self.builtins.property,
            self.builtins.property_type,
        ];
        for type_id in schema_types {
            for record in eav::select_objects(self.conn, self.organization_id, type_id).await? {
                if let Some(label) = record.debug {
                    self.labels.insert((type_id, label), record.object.object_id);
                }
            }
        }
        Ok(())
    }

    /// Id of a schema object written earlier, or a fresh one from its chunk.
    async fn recover_or_reserve(&mut self, type_id: TypeId, label: &str) -> MeshResult<ObjectId> {
        if let Some(id) = self.labels.get(&(type_id, label.to_string())) {
            debug!("mesh: bootstrap recovered {label} as {id}");
            return Ok(*id);
        }
        self.reserve_one(type_id).await
    }

    /// Built-in chunks, their type rows and the default organization.
    async fn establish_builtins(&mut self) -> MeshResult<()> {
        let builtins = self.builtins;
        let type_chunk = directory::current_chunk(self.conn, self.organization_id, builtins.type_type).await?;
        if type_chunk.last_index == 0 {
            let reservation = allocator::reserve(
                self.conn,
                self.organization_id,
                builtins.type_type,
                BUILTIN_TYPES.len() as u64,
            )
            .await?;
            let expected: Vec<ObjectId> = builtins
                .as_array()
                .iter()
                .map(|id| id.as_object())
                .collect();
            if reservation.ids != expected {
                return Err(MeshError::storage(
                    "anchor chunk did not yield the built-in type ids",
                ));
            }
        }

        let property_chunk = self
            .ensure_chunk(
                builtins.property,
                ChunkOptions::new(IdSize::Bits16).with_id_salt(self.salts.property),
            )
            .await?;
        let property_type_chunk = self
            .ensure_chunk(
                builtins.property_type,
                ChunkOptions::new(IdSize::Bits16).with_id_salt(self.salts.property_type),
            )
            .await?;
        let organization_chunk = self
            .ensure_chunk(
                builtins.organization,
                ChunkOptions::new(IdSize::Bits32).with_id_salt(self.salts.organization),
            )
            .await?;

        let chunks = [
            type_chunk.visible_chunk_id,
            property_chunk.visible_chunk_id,
            property_type_chunk.visible_chunk_id,
            organization_chunk.visible_chunk_id,
        ];
        for ((name, type_id), chunk_id) in BUILTIN_TYPES
            .iter()
            .zip(builtins.as_array())
            .zip(chunks)
        {
            self.ensure_object(self.object(builtins.type_type, type_id.as_object()), name)
                .await?;
            self.registry.register_type(name, type_id, chunk_id);
        }

        let organization = self.object(
            builtins.organization,
            ObjectId(self.organization_id.0),
        );
        if !eav::object_exists(self.conn, organization).await? {
            if organization_chunk.last_index == 0 {
                let reserved = self.reserve_one(builtins.organization).await?;
                if reserved != organization.object_id {
                    warn!(
                        "mesh: organization chunk yielded {reserved}, keeping default organization {}",
                        self.organization_id
                    );
                }
            }
            self.ensure_object(organization, ORGANIZATION_TYPE).await?;
        }
        self.registry.set_organization(self.organization_id);
        self.registry.set_builtins(builtins);
        Ok(())
    }

    /// Declared application types: an id from the `type` chunk, a chunk of
    /// their own and an object row.
    async fn establish_types(&mut self, declaration: &SchemaDeclaration) -> MeshResult<()> {
        for decl in &declaration.types {
            if BUILTIN_TYPES.contains(&decl.name.as_str()) {
                continue;
            }
            let type_id = match self.registry.get_id_for_type(&decl.name) {
                Ok(type_id) => type_id,
                Err(_) => {
                    let id = self
                        .recover_or_reserve(self.builtins.type_type, &decl.name)
                        .await?;
                    TypeId::from_object(id)?
                }
            };
            let chunk = self
                .ensure_chunk(type_id, ChunkOptions::new(self.type_id_size))
                .await?;
            self.ensure_object(self.object(self.builtins.type_type, type_id.as_object()), &decl.name)
                .await?;
            self.registry
                .register_type(&decl.name, type_id, chunk.visible_chunk_id);
        }
        Ok(())
    }

    /// One `property` object per declared property.
    async fn establish_properties(&mut self, declaration: &SchemaDeclaration) -> MeshResult<()> {
        for decl in &declaration.types {
            for property in &decl.properties {
                if self
                    .registry
                    .get_id_for_property(&decl.name, &property.name)
                    .is_ok()
                {
                    continue;
                }
                let label = format!("{}.{}", decl.name, property.name);
                let id = PropertyId::from_object(
                    self.recover_or_reserve(self.builtins.property, &label).await?,
                )?;
                self.ensure_object(self.object(self.builtins.property, id.as_object()), &label)
                    .await?;
                self.registry.register_property(
                    &decl.name,
                    &property.name,
                    id,
                    property.is_list,
                    property.required,
                )?;
            }
        }
        Ok(())
    }

    fn meta(&self, type_name: &str, property_name: &str) -> MeshResult<PropertyId> {
        self.registry.get_id_for_property(type_name, property_name)
    }

    /// Owner, flags and finally the name of every property that has no name
    /// row yet, then the property-type variants.
    async fn link_properties(&mut self, declaration: &SchemaDeclaration) -> MeshResult<()> {
        let owner = self.meta(PROPERTY_TYPE, OWNER_PROPERTY)?;
        let name = self.meta(PROPERTY_TYPE, NAME_PROPERTY)?;
        let is_list = self.meta(PROPERTY_TYPE, IS_LIST_PROPERTY)?;
        let is_required = self.meta(PROPERTY_TYPE, IS_REQUIRED_PROPERTY)?;
        let variant_owner = self.meta(PROPERTY_TYPE_TYPE, PROPERTY_TYPE_OWNER_PROPERTY)?;
        let variant_name = self.meta(PROPERTY_TYPE_TYPE, NAME_PROPERTY)?;

        let named = self
            .named_objects(self.builtins.property, name)
            .await?;
        let named_variants = self
            .named_objects(self.builtins.property_type, variant_name)
            .await?;
        for decl in &declaration.types {
            let type_id = self.registry.get_id_for_type(&decl.name)?;
            for property in &decl.properties {
                let id = self.registry.get_id_for_property(&decl.name, &property.name)?;
                let object = self.object(self.builtins.property, id.as_object());
                if !named.contains(&object.object_id) {
                    let home = self.object(self.builtins.type_type, type_id.as_object());
                    self.write(NewValue::new(object, owner, Value::Association(home)))
                        .await?;
                    self.write(NewValue::new(object, is_list, Value::Boolean(property.is_list)))
                        .await?;
                    self.write(NewValue::new(
                        object,
                        is_required,
                        Value::Boolean(property.required),
                    ))
                    .await?;
                    // The reader treats a named property as complete.
                    self.write(NewValue::new(
                        object,
                        name,
                        Value::String(property.name.clone()),
                    ))
                    .await?;
                    debug!("mesh: bootstrap linked property {}.{}", decl.name, property.name);
                }
                let variant_props = (variant_owner, variant_name);
                self.link_variants(&decl.name, property, object, variant_props, &named_variants)
                    .await?;
            }
        }
        Ok(())
    }

    async fn link_variants(
        &mut self,
        type_name: &str,
        property: &PropertyDecl,
        property_object: ObjectRef,
        (variant_owner, variant_name): (PropertyId, PropertyId),
        named_variants: &HashSet<ObjectId>,
    ) -> MeshResult<()> {
        for variant in &property.types {
            if self
                .registry
                .get_id_for_property_type(type_name, &property.name, variant)
                .is_ok()
            {
                continue;
            }
            let label = format!("{type_name}.{}:{variant}", property.name);
            let id = self
                .recover_or_reserve(self.builtins.property_type, &label)
                .await?;
            let object = self.object(self.builtins.property_type, id);
            self.ensure_object(object, &label).await?;
            if !named_variants.contains(&id) {
                self.write(NewValue::new(
                    object,
                    variant_owner,
                    Value::Association(property_object),
                ))
                .await?;
                self.write(NewValue::new(object, variant_name, Value::String(variant.clone())))
                    .await?;
            }
            self.registry
                .register_property_type(type_name, &property.name, variant, id)?;
        }
        Ok(())
    }

    /// Name rows of every declared type that lacks one.
    async fn name_types(&mut self, declaration: &SchemaDeclaration) -> MeshResult<()> {
        let name = self.meta(TYPE_TYPE, NAME_PROPERTY)?;
        let named = self.named_objects(self.builtins.type_type, name).await?;
        for decl in &declaration.types {
            let type_id = self.registry.get_id_for_type(&decl.name)?;
            if named.contains(&type_id.as_object()) {
                continue;
            }
            let object = self.object(self.builtins.type_type, type_id.as_object());
            self.write(NewValue::new(object, name, Value::String(decl.name.clone())))
                .await?;
        }
        Ok(())
    }

    async fn named_objects(
        &self,
        type_id: TypeId,
        name: PropertyId,
    ) -> MeshResult<HashSet<ObjectId>> {
        Ok(
            eav::select_kind_records(self.conn, ValueKind::String, self.organization_id, type_id)
                .await?
                .into_iter()
                .filter(|record| record.property_id == name)
                .map(|record| record.object.object_id)
                .collect(),
        )
    }
}
