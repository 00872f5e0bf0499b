//! Rebuilds the schema registry from stored rows.
//!
//! Property ids are not known up front. The `name` property of the `property`
//! type names itself: its object id equals the property id of its own name row
//! and the value is "name". The `type` property of the `property` type points
//! to the `property` type through a row keyed by its own id. Those two fixed
//! points give every other meta property.

use std::collections::HashMap;

use sea_orm::ConnectionTrait;

use prime_mesh_core::{
    BUILTIN_TYPES, BuiltinTypes, IS_LIST_PROPERTY, IS_REQUIRED_PROPERTY, MeshResult,
    NAME_PROPERTY, OWNER_PROPERTY, ObjectRef, OrganizationId, PROPERTY_TYPE_OWNER_PROPERTY,
    PropertyId, SchemaRegistry, TaggedRecord, TypeId, Value, ValueKind,
};

use crate::directory::list_all_chunks;
use crate::eav::{select_every_type_record, select_objects};

#[derive(Debug, Default)]
struct ObjectFields {
    strings: HashMap<PropertyId, String>,
    associations: HashMap<PropertyId, ObjectRef>,
    booleans: HashMap<PropertyId, bool>,
}

/// Latest value per (object, property), keyed by prime key. Records arrive in
/// sequence order so later rows win.
fn group_by_object(records: Vec<TaggedRecord>) -> HashMap<String, ObjectFields> {
    let mut grouped: HashMap<String, ObjectFields> = HashMap::new();
    for record in records {
        let fields = grouped.entry(record.object.prime_key()).or_default();
        match (record.kind, record.value) {
            (ValueKind::String, Value::String(name)) => {
                fields.strings.insert(record.property_id, name);
            }
            (ValueKind::Association, Value::Association(target)) => {
                fields.associations.insert(record.property_id, target);
            }
            (ValueKind::Boolean, Value::Boolean(flag)) => {
                fields.booleans.insert(record.property_id, flag);
            }
            _ => {}
        }
    }
    grouped
}

struct LoadedObjects {
    objects: Vec<ObjectRef>,
    fields: HashMap<String, ObjectFields>,
}

impl LoadedObjects {
    async fn load<C: ConnectionTrait>(
        conn: &C,
        organization_id: OrganizationId,
        type_id: TypeId,
    ) -> MeshResult<Self> {
        let objects = select_objects(conn, organization_id, type_id)
            .await?
            .into_iter()
            .map(|record| record.object)
            .collect();
        let records = select_every_type_record(conn, organization_id, type_id).await?;
        Ok(Self {
            objects,
            fields: group_by_object(records),
        })
    }

    fn fields(&self, object: &ObjectRef) -> Option<&ObjectFields> {
        self.fields.get(&object.prime_key())
    }

    fn string(&self, object: &ObjectRef, property: Option<PropertyId>) -> Option<&str> {
        let property = property?;
        self.fields(object)?
            .strings
            .get(&property)
            .map(String::as_str)
    }

    fn association(&self, object: &ObjectRef, property: Option<PropertyId>) -> Option<ObjectRef> {
        let property = property?;
        self.fields(object)?.associations.get(&property).copied()
    }

    fn boolean(&self, object: &ObjectRef, property: Option<PropertyId>) -> bool {
        property
            .and_then(|property| self.fields(object)?.booleans.get(&property).copied())
            .unwrap_or(false)
    }
}

struct PropertyRow {
    id: PropertyId,
    name: String,
    owner: TypeId,
    is_list: bool,
    is_required: bool,
}

/// Reads the registry of `organization_id` given the built-in type ids.
pub async fn select_every_type<C: ConnectionTrait>(
    conn: &C,
    organization_id: OrganizationId,
    builtins: BuiltinTypes,
) -> MeshResult<SchemaRegistry> {
    let mut registry = SchemaRegistry::new();
    registry.set_organization(organization_id);
    registry.set_builtins(builtins);

    let chunk_ids: HashMap<TypeId, i64> = list_all_chunks(conn)
        .await?
        .into_iter()
        .filter(|chunk| chunk.current && chunk.organization_id == organization_id)
        .map(|chunk| (chunk.type_id, chunk.visible_chunk_id))
        .collect();
    let chunk_of = |type_id: TypeId| chunk_ids.get(&type_id).copied().unwrap_or(0);

    for (name, type_id) in BUILTIN_TYPES.iter().zip(builtins.as_array()) {
        registry.register_type(name, type_id, chunk_of(type_id));
    }

    let properties = LoadedObjects::load(conn, organization_id, builtins.property).await?;
    let property_type_target = ObjectRef::new(
        organization_id,
        builtins.type_type,
        builtins.property.as_object(),
    );

    let name_id = properties.objects.iter().find_map(|object| {
        let candidate = PropertyId::from_object(object.object_id).ok()?;
        (properties.string(object, Some(candidate)) == Some(NAME_PROPERTY)).then_some(candidate)
    });
    let owner_id = properties.objects.iter().find_map(|object| {
        let candidate = PropertyId::from_object(object.object_id).ok()?;
        let named_owner = properties.string(object, name_id) == Some(OWNER_PROPERTY);
        let points_home = properties.association(object, Some(candidate)) == Some(property_type_target);
        (named_owner && points_home).then_some(candidate)
    });

    let mut rows = Vec::new();
    for object in &properties.objects {
        let Ok(id) = PropertyId::from_object(object.object_id) else {
            continue;
        };
        let (Some(name), Some(owner)) = (
            properties.string(object, name_id),
            properties.association(object, owner_id),
        ) else {
            continue;
        };
        let Ok(owner) = TypeId::from_object(owner.object_id) else {
            continue;
        };
        rows.push(PropertyRow {
            id,
            name: name.to_string(),
            owner,
            is_list: false,
            is_required: false,
        });
    }
    let meta = |owner: TypeId, name: &str| {
        rows.iter()
            .find(|row| row.owner == owner && row.name == name)
            .map(|row| row.id)
    };
    let is_list_id = meta(builtins.property, IS_LIST_PROPERTY);
    let is_required_id = meta(builtins.property, IS_REQUIRED_PROPERTY);
    let type_name_id = meta(builtins.type_type, NAME_PROPERTY);
    let property_type_name_id = meta(builtins.property_type, NAME_PROPERTY);
    let property_type_owner_id = meta(builtins.property_type, PROPERTY_TYPE_OWNER_PROPERTY);
    for row in &mut rows {
        let object = ObjectRef::new(organization_id, builtins.property, row.id.as_object());
        row.is_list = properties.boolean(&object, is_list_id);
        row.is_required = properties.boolean(&object, is_required_id);
    }

    let types = LoadedObjects::load(conn, organization_id, builtins.type_type).await?;
    for object in &types.objects {
        let Ok(type_id) = TypeId::from_object(object.object_id) else {
            continue;
        };
        if let Some(name) = types.string(object, type_name_id) {
            registry.register_type(name, type_id, chunk_of(type_id));
        }
    }

    for row in &rows {
        let Ok(type_name) = registry.get_name_for_type(row.owner).map(str::to_string) else {
            continue;
        };
        registry.register_property(&type_name, &row.name, row.id, row.is_list, row.is_required)?;
    }

    let property_types = LoadedObjects::load(conn, organization_id, builtins.property_type).await?;
    for object in &property_types.objects {
        let (Some(name), Some(target)) = (
            property_types.string(object, property_type_name_id),
            property_types.association(object, property_type_owner_id),
        ) else {
            continue;
        };
        let Some(row) = rows
            .iter()
            .find(|row| row.id.as_object() == target.object_id)
        else {
            continue;
        };
        let Ok(type_name) = registry.get_name_for_type(row.owner).map(str::to_string) else {
            continue;
        };
        registry.register_property_type(&type_name, &row.name, name, object.object_id)?;
    }

    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use prime_mesh_core::ObjectId;

    fn record(kind: ValueKind, sequence: i64, object_id: i64, property: i32, value: Value) -> TaggedRecord {
        TaggedRecord {
            kind,
            sequence,
            object: ObjectRef::new(OrganizationId(1), TypeId(2), ObjectId(object_id)),
            property_id: PropertyId(property),
            value,
            debug: None,
        }
    }

    #[test]
    fn grouping_keeps_latest_value_per_property() {
        let grouped = group_by_object(vec![
            record(ValueKind::String, 1, 9, 4, Value::String("old".into())),
            record(ValueKind::String, 2, 9, 4, Value::String("new".into())),
            record(ValueKind::Boolean, 1, 9, 5, Value::Boolean(true)),
            record(ValueKind::Integer, 1, 9, 6, Value::Integer(3)),
        ]);
        let fields = grouped.get("1:2:9").expect("object grouped");
        assert_eq!(fields.strings.get(&PropertyId(4)).map(String::as_str), Some("new"));
        assert_eq!(fields.booleans.get(&PropertyId(5)), Some(&true));
        assert!(fields.associations.is_empty());
    }
}
