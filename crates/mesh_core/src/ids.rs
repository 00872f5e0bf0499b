use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{MeshError, MeshResult};

/// Tenant scope of every row. Obfuscated ids are signed, so the column is a
/// signed bigint.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrganizationId(pub i64);

/// Id of a type. Types are objects of the built-in `type` type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TypeId(pub i32);

/// Id of a property. Properties are objects of the built-in `property` type.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PropertyId(pub i32);

#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub i64);

macro_rules! id_display {
    ($name:ident) => {
        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

id_display!(OrganizationId);
id_display!(TypeId);
id_display!(PropertyId);
id_display!(ObjectId);

impl TypeId {
    pub fn from_object(id: ObjectId) -> MeshResult<Self> {
        i32::try_from(id.0)
            .map(TypeId)
            .map_err(|_| MeshError::invalid(format!("object id {id} does not fit a type id")))
    }

    pub fn as_object(self) -> ObjectId {
        ObjectId(i64::from(self.0))
    }
}

impl PropertyId {
    pub fn from_object(id: ObjectId) -> MeshResult<Self> {
        i32::try_from(id.0)
            .map(PropertyId)
            .map_err(|_| MeshError::invalid(format!("object id {id} does not fit a property id")))
    }

    pub fn as_object(self) -> ObjectId {
        ObjectId(i64::from(self.0))
    }
}

impl OrganizationId {
    pub fn from_object(id: ObjectId) -> Self {
        OrganizationId(id.0)
    }
}

/// The (organization, type, object) triple every row is keyed by.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct ObjectRef {
    pub organization_id: OrganizationId,
    pub type_id: TypeId,
    pub object_id: ObjectId,
}

impl ObjectRef {
    pub fn new(organization_id: OrganizationId, type_id: TypeId, object_id: ObjectId) -> Self {
        Self {
            organization_id,
            type_id,
            object_id,
        }
    }

    /// Grouping key formed by joining the three integers.
    pub fn prime_key(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.organization_id, self.type_id, self.object_id
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prime_key_joins_triple() {
        let object = ObjectRef::new(OrganizationId(-12), TypeId(4), ObjectId(99));
        assert_eq!(object.prime_key(), "-12:4:99");
    }

    #[test]
    fn narrowing_rejects_wide_object_ids() {
        assert_eq!(TypeId::from_object(ObjectId(-32_768)).unwrap(), TypeId(-32_768));
        assert!(TypeId::from_object(ObjectId(i64::from(i32::MAX) + 1)).is_err());
        assert!(PropertyId::from_object(ObjectId(i64::MIN)).is_err());
        assert_eq!(PropertyId(17).as_object(), ObjectId(17));
    }
}
