use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::ids::{ObjectId, ObjectRef, OrganizationId, PropertyId, TypeId};

/// Microseconds since the Unix epoch, UTC.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd, Hash, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    pub fn now_micros() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_micros() as i64;
        Self(micros)
    }
}

/// One table per kind; every value row lives in exactly one of them.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Attachment,
    String,
    Text,
    Decimal,
    Integer,
    Boolean,
    Timestamp,
    Property,
    Association,
}

impl ValueKind {
    pub const ALL: [ValueKind; 9] = [
        ValueKind::Attachment,
        ValueKind::String,
        ValueKind::Text,
        ValueKind::Decimal,
        ValueKind::Integer,
        ValueKind::Boolean,
        ValueKind::Timestamp,
        ValueKind::Property,
        ValueKind::Association,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ValueKind::Attachment => "attachment",
            ValueKind::String => "string",
            ValueKind::Text => "text",
            ValueKind::Decimal => "decimal",
            ValueKind::Integer => "integer",
            ValueKind::Boolean => "boolean",
            ValueKind::Timestamp => "timestamp",
            ValueKind::Property => "property",
            ValueKind::Association => "association",
        }
    }

    /// Storage kind for a declared property-type name. Names that are not a
    /// scalar kind refer to another type and are stored as associations.
    pub fn for_property_type(name: &str) -> ValueKind {
        match name {
            "string" => ValueKind::String,
            "text" => ValueKind::Text,
            "decimal" => ValueKind::Decimal,
            "integer" | "biginteger" => ValueKind::Integer,
            "boolean" => ValueKind::Boolean,
            "timestamp" | "datetime" => ValueKind::Timestamp,
            "attachment" => ValueKind::Attachment,
            "property_binding" => ValueKind::Property,
            _ => ValueKind::Association,
        }
    }
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Pointer into a stored blob: bucket plus content hash.
#[derive(Clone, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Attachment {
    pub bucket_id: Option<i64>,
    pub value_hash: Option<String>,
}

/// Reference to a property slot of another entity. Every side is optional in
/// storage.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct PropertyRef {
    pub organization_id: Option<OrganizationId>,
    pub type_id: Option<TypeId>,
    pub object_id: Option<ObjectId>,
    pub property_id: Option<PropertyId>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Value {
    Attachment(Attachment),
    String(String),
    Text(String),
    Decimal(f64),
    Integer(i64),
    Boolean(bool),
    Timestamp(Timestamp),
    Property(PropertyRef),
    Association(ObjectRef),
}

impl Value {
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Attachment(_) => ValueKind::Attachment,
            Value::String(_) => ValueKind::String,
            Value::Text(_) => ValueKind::Text,
            Value::Decimal(_) => ValueKind::Decimal,
            Value::Integer(_) => ValueKind::Integer,
            Value::Boolean(_) => ValueKind::Boolean,
            Value::Timestamp(_) => ValueKind::Timestamp,
            Value::Property(_) => ValueKind::Property,
            Value::Association(_) => ValueKind::Association,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(value) | Value::Text(value) => Some(value.as_str()),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(value) => Some(*value),
            _ => None,
        }
    }

    pub fn as_association(&self) -> Option<ObjectRef> {
        match self {
            Value::Association(target) => Some(*target),
            _ => None,
        }
    }
}

/// Input for a single append-only value row.
#[derive(Clone, Debug, PartialEq)]
pub struct NewValue {
    pub object: ObjectRef,
    pub property_id: PropertyId,
    pub value: Value,
    pub debug: Option<String>,
}

impl NewValue {
    pub fn new(object: ObjectRef, property_id: PropertyId, value: Value) -> Self {
        Self {
            object,
            property_id,
            value,
            debug: None,
        }
    }

    pub fn with_debug(mut self, debug: impl Into<String>) -> Self {
        self.debug = Some(debug.into());
        self
    }
}

/// A stored value row tagged with the table it came from.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TaggedRecord {
    pub kind: ValueKind,
    /// Insertion order within the kind's table.
    pub sequence: i64,
    pub object: ObjectRef,
    pub property_id: PropertyId,
    pub value: Value,
    pub debug: Option<String>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRecord {
    pub object: ObjectRef,
    pub debug: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn value_reports_its_kind() {
        assert_eq!(Value::Boolean(true).kind(), ValueKind::Boolean);
        assert_eq!(Value::Text("x".into()).kind(), ValueKind::Text);
        let target = ObjectRef::new(OrganizationId(1), TypeId(1), ObjectId(1));
        assert_eq!(Value::Association(target).kind(), ValueKind::Association);
        assert_eq!(Value::Association(target).as_association(), Some(target));
    }

    #[test]
    fn property_type_names_map_to_storage_kinds() {
        assert_eq!(ValueKind::for_property_type("string"), ValueKind::String);
        assert_eq!(ValueKind::for_property_type("datetime"), ValueKind::Timestamp);
        assert_eq!(ValueKind::for_property_type("biginteger"), ValueKind::Integer);
        assert_eq!(ValueKind::for_property_type("property_binding"), ValueKind::Property);
        assert_eq!(ValueKind::for_property_type("image"), ValueKind::Association);
    }
}
