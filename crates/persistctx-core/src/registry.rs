//! The entity registry: the set of entity types a session factory knows about.
//!
//! Registration checks each type on its own (identifiers, primary key,
//! owning-side metadata). [`EntityRegistry::validate`] then checks the
//! relationships across types: every target is registered and every inverse
//! side names a matching owning side.

use std::collections::HashMap;
use std::sync::OnceLock;

use regex::Regex;

use crate::entity::{Entity, EntityType};
use crate::error::{Error, Result};
use crate::relationship::{RelationshipInfo, RelationshipKind};

const IDENTIFIER_PATTERN: &str = r"^[A-Za-z_][A-Za-z0-9_]*$";

fn identifier_regex() -> std::result::Result<&'static Regex, Error> {
    static IDENTIFIER: OnceLock<std::result::Result<Regex, regex::Error>> = OnceLock::new();
    IDENTIFIER
        .get_or_init(|| Regex::new(IDENTIFIER_PATTERN))
        .as_ref()
        .map_err(|e| Error::Mapping(format!("invalid identifier pattern: {e}")))
}

/// Check that `name` is usable as an entity, table, column or relationship name.
pub fn validate_identifier(kind: &str, name: &str) -> Result<()> {
    if identifier_regex()?.is_match(name) {
        Ok(())
    } else {
        Err(Error::Mapping(format!("invalid {kind} name: {name:?}")))
    }
}

/// Registered entity types, by name.
#[derive(Debug, Clone, Default)]
pub struct EntityRegistry {
    types: HashMap<&'static str, EntityType>,
    order: Vec<&'static str>,
}

impl EntityRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity type.
    pub fn register<E: Entity>(&mut self) -> Result<()> {
        let ty = E::entity_type();
        if ty.name() != E::NAME {
            return Err(Error::Mapping(format!(
                "entity type {} describes itself as {}",
                E::NAME,
                ty.name()
            )));
        }
        self.register_type(ty)
    }

    /// Register entity metadata directly.
    pub fn register_type(&mut self, ty: EntityType) -> Result<()> {
        check_entity_type(&ty)?;
        let name = ty.name();
        if self.types.contains_key(name) {
            return Err(Error::Mapping(format!(
                "entity type {name} is already registered"
            )));
        }
        tracing::debug!(
            entity = name,
            fields = ty.fields().len(),
            relationships = ty.relationships().len(),
            "Registered entity type"
        );
        self.order.push(name);
        self.types.insert(name, ty);
        Ok(())
    }

    /// Cross-check relationships between registered types.
    pub fn validate(&self) -> Result<()> {
        for name in &self.order {
            let ty = &self.types[name];
            for rel in ty.relationships() {
                let target = self.types.get(rel.related).ok_or_else(|| {
                    Error::Mapping(format!(
                        "{}.{} targets unregistered entity type {}",
                        ty.name(),
                        rel.name,
                        rel.related
                    ))
                })?;
                if let Some(mapped_by) = rel.mapped_by {
                    check_inverse(ty, rel, target, mapped_by)?;
                }
            }
        }
        Ok(())
    }

    /// Metadata for a registered type.
    pub fn get(&self, name: &str) -> Result<&EntityType> {
        self.types
            .get(name)
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    /// Whether a type is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.types.contains_key(name)
    }

    /// Registered type names, in registration order.
    pub fn names(&self) -> &[&'static str] {
        &self.order
    }

    /// Number of registered types.
    pub fn len(&self) -> usize {
        self.order.len()
    }

    /// True if nothing is registered.
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// A relationship of a registered type.
    pub fn relationship(&self, entity: &'static str, name: &str) -> Result<&RelationshipInfo> {
        self.get(entity)?
            .relationship_named(name)
            .ok_or_else(|| Error::UnknownRelationship {
                entity,
                relationship: name.to_string(),
            })
    }

    /// The owning relationship an inverse relationship mirrors.
    pub fn owning_side(&self, inverse: &RelationshipInfo) -> Result<&RelationshipInfo> {
        let mapped_by = inverse.mapped_by.ok_or_else(|| {
            Error::Mapping(format!("relationship {} is not an inverse side", inverse.name))
        })?;
        self.relationship(inverse.related, mapped_by)
    }
}

fn check_entity_type(ty: &EntityType) -> Result<()> {
    let name = ty.name();
    validate_identifier("entity", name)?;

    let pk = ty.primary_key_columns();
    if pk.is_empty() {
        return Err(Error::Mapping(format!("entity type {name} has no primary key")));
    }
    if ty.has_generated_key() && pk.len() != 1 {
        return Err(Error::Mapping(format!(
            "entity type {name}: a generated key must be a single column"
        )));
    }

    let mut seen = Vec::with_capacity(ty.fields().len());
    for field in ty.fields() {
        validate_identifier("column", field.column_name)?;
        if seen.contains(&field.column_name) {
            return Err(Error::Mapping(format!(
                "entity type {name}: duplicate column {}",
                field.column_name
            )));
        }
        seen.push(field.column_name);
    }

    for rel in ty.relationships() {
        validate_identifier("relationship", rel.name)?;
        check_relationship(name, rel)?;
    }
    Ok(())
}

fn check_relationship(entity: &str, rel: &RelationshipInfo) -> Result<()> {
    let fail = |msg: &str| Err(Error::Mapping(format!("{entity}.{}: {msg}", rel.name)));
    match (rel.kind, rel.is_owning()) {
        (RelationshipKind::ManyToOne, false) => {
            return fail("a many-to-one relationship is always the owning side");
        }
        (RelationshipKind::OneToMany, true) => {
            return fail("a one-to-many relationship must name its owning side with mapped_by");
        }
        (RelationshipKind::ManyToOne | RelationshipKind::OneToOne, true) => {
            let Some(column) = rel.local_key else {
                return fail("an owning to-one relationship needs a join column");
            };
            validate_identifier("join column", column)?;
        }
        (RelationshipKind::ManyToMany, true) => {
            let Some(link) = rel.link_table else {
                return fail("an owning many-to-many relationship needs a link table");
            };
            validate_identifier("link table", link.table_name)?;
            validate_identifier("link column", link.local_column)?;
            validate_identifier("link column", link.remote_column)?;
            if link.local_column == link.remote_column {
                return fail("link table columns must differ");
            }
        }
        _ => {}
    }
    if !rel.is_owning() && (rel.local_key.is_some() || rel.link_table.is_some()) {
        return fail("an inverse relationship cannot carry a join column or link table");
    }
    Ok(())
}

fn check_inverse(
    ty: &EntityType,
    rel: &RelationshipInfo,
    target: &EntityType,
    mapped_by: &str,
) -> Result<()> {
    let owning = target.relationship_named(mapped_by).ok_or_else(|| {
        Error::Mapping(format!(
            "{}.{} is mapped by {}.{mapped_by}, which does not exist",
            ty.name(),
            rel.name,
            target.name()
        ))
    })?;
    let expected = match rel.kind {
        RelationshipKind::OneToMany => RelationshipKind::ManyToOne,
        other => other,
    };
    if !owning.is_owning() || owning.related != ty.name() || owning.kind != expected {
        return Err(Error::Mapping(format!(
            "{}.{} is mapped by {}.{mapped_by}, which is not a matching owning relationship",
            ty.name(),
            rel.name,
            target.name()
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::relationship::LinkTableInfo;

    fn team() -> EntityType {
        EntityType::new("Team")
            .id("team_id")
            .column("name")
            .relationship(RelationshipInfo::one_to_many("members", "Member").mapped_by("team"))
    }

    fn member() -> EntityType {
        EntityType::new("Member")
            .id("member_id")
            .column("username")
            .relationship(RelationshipInfo::many_to_one("team", "Team").join_column("team_id"))
    }

    #[test]
    fn test_identifier_validation() {
        assert!(validate_identifier("column", "team_id").is_ok());
        assert!(validate_identifier("column", "_x9").is_ok());
        assert!(validate_identifier("column", "9lives").is_err());
        assert!(validate_identifier("column", "drop table").is_err());
        assert!(validate_identifier("column", "").is_err());
    }

    #[test]
    fn test_register_and_validate_bidirectional_pair() {
        let mut registry = EntityRegistry::new();
        registry.register_type(team()).unwrap();
        registry.register_type(member()).unwrap();
        registry.validate().unwrap();

        assert_eq!(registry.names(), &["Team", "Member"]);
        let inverse = registry.relationship("Team", "members").unwrap();
        let owning = registry.owning_side(inverse).unwrap();
        assert_eq!(owning.local_key, Some("team_id"));
    }

    #[test]
    fn test_unregistered_target_fails_validation() {
        let mut registry = EntityRegistry::new();
        registry.register_type(member()).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(err.to_string().contains("unregistered entity type Team"));
    }

    #[test]
    fn test_duplicate_registration_rejected() {
        let mut registry = EntityRegistry::new();
        registry.register_type(team()).unwrap();
        assert!(registry.register_type(team()).is_err());
        assert!(matches!(
            registry.get("Nope"),
            Err(Error::UnknownEntity(name)) if name == "Nope"
        ));
    }

    #[test]
    fn test_entity_without_primary_key_rejected() {
        let mut registry = EntityRegistry::new();
        let err = registry
            .register_type(EntityType::new("Log").column("line"))
            .unwrap_err();
        assert!(err.to_string().contains("no primary key"));
    }

    #[test]
    fn test_owning_side_metadata_required() {
        let mut registry = EntityRegistry::new();
        let no_join = EntityType::new("Member")
            .id("member_id")
            .relationship(RelationshipInfo::many_to_one("team", "Team"));
        assert!(registry.register_type(no_join).is_err());

        let no_link = EntityType::new("Member")
            .id("member_id")
            .relationship(RelationshipInfo::many_to_many("products", "Product"));
        assert!(registry.register_type(no_link).is_err());

        let unowned = EntityType::new("Team")
            .id("team_id")
            .relationship(RelationshipInfo::one_to_many("members", "Member"));
        assert!(registry.register_type(unowned).is_err());

        let linked = EntityType::new("Member").id("member_id").relationship(
            RelationshipInfo::many_to_many("products", "Product").link_table(LinkTableInfo::new(
                "member_product",
                "member_id",
                "product_id",
            )),
        );
        assert!(registry.register_type(linked).is_ok());
    }

    #[test]
    fn test_mapped_by_must_name_matching_owning_side() {
        let mut registry = EntityRegistry::new();
        registry
            .register_type(
                EntityType::new("Team")
                    .id("team_id")
                    .relationship(RelationshipInfo::one_to_many("members", "Member").mapped_by("squad")),
            )
            .unwrap();
        registry.register_type(member()).unwrap();
        let err = registry.validate().unwrap_err();
        assert!(err.to_string().contains("does not exist"));
    }
}
