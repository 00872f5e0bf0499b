use prime_mesh_core::{MeshError, MeshResult, SchemaDeclaration};

pub fn schema_manifest_json() -> &'static str {
    include_str!(concat!(env!("OUT_DIR"), "/schema_manifest.json"))
}

/// Declared schema shipped with the crate: the four built-ins followed by the
/// application types.
pub fn load_schema_manifest() -> MeshResult<SchemaDeclaration> {
    let declaration: SchemaDeclaration = serde_json::from_str(schema_manifest_json())
        .map_err(|err| MeshError::storage(format!("schema manifest parse: {err}")))?;
    declaration.validate()?;
    Ok(declaration)
}

#[cfg(test)]
mod tests {
    use super::load_schema_manifest;
    use prime_mesh_core::{BUILTIN_TYPES, MeshResult};

    #[test]
    fn manifest_starts_with_builtins() -> MeshResult<()> {
        let declaration = load_schema_manifest()?;
        let names: Vec<&str> = declaration
            .types
            .iter()
            .take(BUILTIN_TYPES.len())
            .map(|decl| decl.name.as_str())
            .collect();
        assert_eq!(names, BUILTIN_TYPES);
        assert_eq!(declaration.types.len(), 15);
        Ok(())
    }

    #[test]
    fn organization_declares_expected_properties() -> MeshResult<()> {
        let declaration = load_schema_manifest()?;
        let organization = declaration
            .get_type("organization")
            .expect("organization declared");
        let names: Vec<&str> = organization
            .properties
            .iter()
            .map(|property| property.name.as_str())
            .collect();
        assert_eq!(names, ["slug", "title", "description", "image", "keywords"]);
        assert!(organization.properties[0].required);
        assert!(organization.properties[4].is_list);
        Ok(())
    }
}
