use std::collections::{BTreeMap, HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::ids::{ObjectId, OrganizationId, PropertyId, TypeId};
use crate::{MeshError, MeshResult};

pub const TYPE_TYPE: &str = "type";
pub const PROPERTY_TYPE: &str = "property";
pub const PROPERTY_TYPE_TYPE: &str = "property_type";
pub const ORGANIZATION_TYPE: &str = "organization";

/// Built-in types in the order their logical indices are assigned.
pub const BUILTIN_TYPES: [&str; 4] = [
    TYPE_TYPE,
    PROPERTY_TYPE,
    PROPERTY_TYPE_TYPE,
    ORGANIZATION_TYPE,
];

pub const NAME_PROPERTY: &str = "name";
pub const OWNER_PROPERTY: &str = "type";
pub const IS_LIST_PROPERTY: &str = "is_list";
pub const IS_REQUIRED_PROPERTY: &str = "is_required";
pub const PROPERTY_TYPE_OWNER_PROPERTY: &str = "property";

/// Meta properties the bootstrap writes through; the declaration must carry them.
const META_PROPERTIES: [(&str, &str); 7] = [
    (TYPE_TYPE, NAME_PROPERTY),
    (PROPERTY_TYPE, NAME_PROPERTY),
    (PROPERTY_TYPE, OWNER_PROPERTY),
    (PROPERTY_TYPE, IS_LIST_PROPERTY),
    (PROPERTY_TYPE, IS_REQUIRED_PROPERTY),
    (PROPERTY_TYPE_TYPE, NAME_PROPERTY),
    (PROPERTY_TYPE_TYPE, PROPERTY_TYPE_OWNER_PROPERTY),
];

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PropertyDecl {
    pub name: String,
    #[serde(default)]
    pub types: Vec<String>,
    #[serde(default)]
    pub is_list: bool,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<serde_json::Value>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeDecl {
    pub name: String,
    #[serde(default)]
    pub properties: Vec<PropertyDecl>,
}

/// Declared types and properties, in declaration order.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SchemaDeclaration {
    pub types: Vec<TypeDecl>,
}

impl SchemaDeclaration {
    pub fn get_type(&self, name: &str) -> Option<&TypeDecl> {
        self.types.iter().find(|decl| decl.name == name)
    }

    pub fn validate(&self) -> MeshResult<()> {
        let mut names = HashSet::new();
        for decl in &self.types {
            if !names.insert(decl.name.as_str()) {
                return Err(MeshError::validation(format!(
                    "type '{}' declared twice",
                    decl.name
                )));
            }
            let mut properties = HashSet::new();
            for property in &decl.properties {
                if !properties.insert(property.name.as_str()) {
                    return Err(MeshError::validation(format!(
                        "property '{}.{}' declared twice",
                        decl.name, property.name
                    )));
                }
            }
        }
        for builtin in BUILTIN_TYPES {
            if !names.contains(builtin) {
                return Err(MeshError::validation(format!(
                    "built-in type '{builtin}' is not declared"
                )));
            }
        }
        for (type_name, property_name) in META_PROPERTIES {
            let declared = self
                .get_type(type_name)
                .map(|decl| decl.properties.iter().any(|p| p.name == property_name))
                .unwrap_or(false);
            if !declared {
                return Err(MeshError::validation(format!(
                    "meta property '{type_name}.{property_name}' is not declared"
                )));
            }
        }
        Ok(())
    }
}

/// Ids of the four built-in types of the default organization.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct BuiltinTypes {
    pub type_type: TypeId,
    pub property: TypeId,
    pub property_type: TypeId,
    pub organization: TypeId,
}

impl BuiltinTypes {
    pub fn as_array(&self) -> [TypeId; 4] {
        [
            self.type_type,
            self.property,
            self.property_type,
            self.organization,
        ]
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct PropertyEntry {
    pub id: Option<PropertyId>,
    pub is_list: bool,
    pub is_required: bool,
    /// Property-type name to the id of its `property_type` object.
    pub types: BTreeMap<String, ObjectId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TypeEntry {
    pub id: TypeId,
    pub chunk_id: i64,
    pub properties: BTreeMap<String, PropertyEntry>,
}

#[derive(Clone, Debug, Default)]
struct ReverseTypeEntry {
    name: String,
    properties: HashMap<PropertyId, ReversePropertyEntry>,
}

#[derive(Clone, Debug, Default)]
struct ReversePropertyEntry {
    name: String,
    types: HashMap<ObjectId, String>,
}

/// Name/id lookups for every known type, property and property-type, kept in
/// both directions. Rebuilt from storage on attach; storage stays authoritative.
#[derive(Clone, Debug, Default)]
pub struct SchemaRegistry {
    organization_id: Option<OrganizationId>,
    builtins: Option<BuiltinTypes>,
    types: BTreeMap<String, TypeEntry>,
    reverse: HashMap<TypeId, ReverseTypeEntry>,
}

impl SchemaRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn set_organization(&mut self, organization_id: OrganizationId) {
        self.organization_id = Some(organization_id);
    }

    pub fn organization_id(&self) -> MeshResult<OrganizationId> {
        self.organization_id
            .ok_or_else(|| MeshError::not_found("default organization is not known yet"))
    }

    pub fn set_builtins(&mut self, builtins: BuiltinTypes) {
        self.builtins = Some(builtins);
    }

    pub fn builtins(&self) -> MeshResult<BuiltinTypes> {
        self.builtins
            .ok_or_else(|| MeshError::not_found("built-in types are not known yet"))
    }

    pub fn register_type(&mut self, name: &str, id: TypeId, chunk_id: i64) {
        let entry = self
            .types
            .entry(name.to_string())
            .or_insert_with(|| TypeEntry {
                id,
                chunk_id,
                properties: BTreeMap::new(),
            });
        entry.id = id;
        entry.chunk_id = chunk_id;
        self.reverse.entry(id).or_default().name = name.to_string();
    }

    pub fn register_property(
        &mut self,
        type_name: &str,
        property_name: &str,
        id: PropertyId,
        is_list: bool,
        is_required: bool,
    ) -> MeshResult<()> {
        let entry = self.types.get_mut(type_name).ok_or_else(|| {
            MeshError::not_found(format!("type '{type_name}' is not registered"))
        })?;
        let property = entry
            .properties
            .entry(property_name.to_string())
            .or_default();
        property.id = Some(id);
        property.is_list = is_list;
        property.is_required = is_required;
        self.reverse
            .entry(entry.id)
            .or_default()
            .properties
            .entry(id)
            .or_default()
            .name = property_name.to_string();
        Ok(())
    }

    pub fn register_property_type(
        &mut self,
        type_name: &str,
        property_name: &str,
        property_type_name: &str,
        id: ObjectId,
    ) -> MeshResult<()> {
        let entry = self.types.get_mut(type_name).ok_or_else(|| {
            MeshError::not_found(format!("type '{type_name}' is not registered"))
        })?;
        let property = entry.properties.get_mut(property_name).ok_or_else(|| {
            MeshError::not_found(format!(
                "property '{type_name}.{property_name}' is not registered"
            ))
        })?;
        let property_id = property.id.ok_or_else(|| {
            MeshError::not_found(format!("property '{type_name}.{property_name}' has no id"))
        })?;
        property.types.insert(property_type_name.to_string(), id);
        self.reverse
            .entry(entry.id)
            .or_default()
            .properties
            .entry(property_id)
            .or_default()
            .types
            .insert(id, property_type_name.to_string());
        Ok(())
    }

    pub fn contains_type(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    pub fn type_entry(&self, name: &str) -> Option<&TypeEntry> {
        self.types.get(name)
    }

    pub fn property(&self, type_name: &str, property_name: &str) -> Option<&PropertyEntry> {
        self.types
            .get(type_name)
            .and_then(|entry| entry.properties.get(property_name))
    }

    pub fn types(&self) -> impl Iterator<Item = (&str, &TypeEntry)> {
        self.types.iter().map(|(name, entry)| (name.as_str(), entry))
    }

    pub fn get_id_for_type(&self, name: &str) -> MeshResult<TypeId> {
        self.types
            .get(name)
            .map(|entry| entry.id)
            .ok_or_else(|| MeshError::not_found(format!("type '{name}'")))
    }

    pub fn chunk_id_for_type(&self, name: &str) -> MeshResult<i64> {
        self.types
            .get(name)
            .map(|entry| entry.chunk_id)
            .ok_or_else(|| MeshError::not_found(format!("type '{name}'")))
    }

    pub fn get_name_for_type(&self, id: TypeId) -> MeshResult<&str> {
        self.reverse
            .get(&id)
            .map(|entry| entry.name.as_str())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| MeshError::not_found(format!("type id {id}")))
    }

    pub fn get_id_for_property(&self, type_name: &str, property_name: &str) -> MeshResult<PropertyId> {
        self.property(type_name, property_name)
            .and_then(|property| property.id)
            .ok_or_else(|| MeshError::not_found(format!("property '{type_name}.{property_name}'")))
    }

    pub fn get_name_for_property(&self, type_id: TypeId, property_id: PropertyId) -> MeshResult<&str> {
        self.reverse
            .get(&type_id)
            .and_then(|entry| entry.properties.get(&property_id))
            .map(|property| property.name.as_str())
            .ok_or_else(|| {
                MeshError::not_found(format!("property id {property_id} of type id {type_id}"))
            })
    }

    pub fn get_id_for_property_type(
        &self,
        type_name: &str,
        property_name: &str,
        property_type_name: &str,
    ) -> MeshResult<ObjectId> {
        self.property(type_name, property_name)
            .and_then(|property| property.types.get(property_type_name).copied())
            .ok_or_else(|| {
                MeshError::not_found(format!(
                    "property type '{type_name}.{property_name}:{property_type_name}'"
                ))
            })
    }

    pub fn get_name_for_property_type(
        &self,
        type_id: TypeId,
        property_id: PropertyId,
        property_type_id: ObjectId,
    ) -> MeshResult<&str> {
        self.reverse
            .get(&type_id)
            .and_then(|entry| entry.properties.get(&property_id))
            .and_then(|property| property.types.get(&property_type_id))
            .map(String::as_str)
            .ok_or_else(|| MeshError::not_found(format!("property type id {property_type_id}")))
    }
}
