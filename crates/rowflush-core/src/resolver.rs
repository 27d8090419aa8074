//! Entity catalog lookups.
//!
//! The flush engine never walks a schema itself; it asks an
//! [`EntityResolver`] for an entity's columns and for the relationships that
//! constrain ordering. A resolver is immutable once built and is normally
//! shared behind an `Arc` by every flush in a process.

use crate::entity::EntityInfo;
use crate::error::{MetadataError, MetadataErrorKind, Result};
use crate::relationship::RelationshipInfo;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

/// Builder for an [`EntityResolver`].
#[derive(Debug, Default)]
pub struct EntityResolverBuilder {
    entities: Vec<EntityInfo>,
    relationships: Vec<RelationshipInfo>,
}

impl EntityResolverBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an entity.
    #[must_use]
    pub fn entity(mut self, entity: EntityInfo) -> Self {
        self.entities.push(entity);
        self
    }

    /// Register a relationship. Both ends must be registered entities by the
    /// time [`build`](Self::build) runs.
    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipInfo) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Validate the catalog and build the resolver.
    ///
    /// Every entity must declare a primary key, every relationship must join
    /// existing columns, and `to_pk` is recomputed for each relationship.
    #[tracing::instrument(level = "debug", skip(self), fields(entities = self.entities.len(), relationships = self.relationships.len()))]
    pub fn build(self) -> Result<EntityResolver> {
        let mut entities: HashMap<String, Arc<EntityInfo>> = HashMap::new();
        for entity in self.entities {
            if entity.primary_key_columns().is_empty() {
                return Err(MetadataError::new(
                    MetadataErrorKind::MissingPrimaryKey,
                    format!("entity '{}' declares no primary key", entity.name()),
                )
                .into());
            }
            let name = entity.name().to_string();
            if entities.insert(name.clone(), Arc::new(entity)).is_some() {
                return Err(MetadataError::new(
                    MetadataErrorKind::DuplicateEntity,
                    format!("entity '{name}' registered twice"),
                )
                .into());
            }
        }

        let mut relationships = Vec::with_capacity(self.relationships.len());
        for mut rel in self.relationships {
            let source = lookup(&entities, &rel.source_entity, &rel.name)?;
            let target = lookup(&entities, &rel.target_entity, &rel.name)?;
            for join in &rel.joins {
                if source.find_column(&join.source).is_none() {
                    return Err(invalid(&rel, &format!("unknown source column '{}'", join.source)));
                }
                if target.find_column(&join.target).is_none() {
                    return Err(invalid(&rel, &format!("unknown target column '{}'", join.target)));
                }
            }

            let target_pk = target.primary_key_columns();
            let mut joined: Vec<&str> = rel.joins.iter().map(|j| j.target.as_str()).collect();
            joined.sort_unstable();
            joined.dedup();
            let mut pk: Vec<&str> = target_pk.iter().map(String::as_str).collect();
            pk.sort_unstable();
            rel.to_pk = !joined.is_empty() && joined == pk;

            tracing::trace!(
                relationship = %rel.name,
                source = %rel.source_entity,
                target = %rel.target_entity,
                to_pk = rel.to_pk,
                ordering = rel.is_ordering_edge(),
                "Registered relationship"
            );
            relationships.push(rel);
        }

        tracing::debug!(
            entities = entities.len(),
            relationships = relationships.len(),
            "Entity resolver built"
        );

        Ok(EntityResolver {
            entities,
            relationships,
            ordering: OnceLock::new(),
        })
    }
}

fn lookup<'a>(
    entities: &'a HashMap<String, Arc<EntityInfo>>,
    name: &str,
    relationship: &str,
) -> Result<&'a Arc<EntityInfo>> {
    entities.get(name).ok_or_else(|| {
        MetadataError::new(
            MetadataErrorKind::InvalidRelationship,
            format!("relationship '{relationship}' refers to unknown entity '{name}'"),
        )
        .into()
    })
}

fn invalid(rel: &RelationshipInfo, detail: &str) -> crate::Error {
    MetadataError::new(
        MetadataErrorKind::InvalidRelationship,
        format!(
            "relationship '{}' ({} -> {}): {}",
            rel.name, rel.source_entity, rel.target_entity, detail
        ),
    )
    .into()
}

/// Read-only catalog of entities and relationships.
#[derive(Debug)]
pub struct EntityResolver {
    entities: HashMap<String, Arc<EntityInfo>>,
    relationships: Vec<RelationshipInfo>,
    /// Source entity name -> indices of its ordering relationships.
    ordering: OnceLock<HashMap<String, Vec<usize>>>,
}

impl EntityResolver {
    pub fn builder() -> EntityResolverBuilder {
        EntityResolverBuilder::new()
    }

    /// Look up an entity by name.
    pub fn entity(&self, name: &str) -> Option<&Arc<EntityInfo>> {
        self.entities.get(name)
    }

    /// Look up an entity, failing with `UnknownEntity` if absent.
    pub fn require_entity(&self, name: &str) -> Result<&Arc<EntityInfo>> {
        self.entities.get(name).ok_or_else(|| {
            MetadataError::new(
                MetadataErrorKind::UnknownEntity,
                format!("entity '{name}' is not registered"),
            )
            .into()
        })
    }

    /// All relationships declared with `entity` as their source.
    pub fn relationships_from<'a>(
        &'a self,
        entity: &'a str,
    ) -> impl Iterator<Item = &'a RelationshipInfo> + 'a {
        self.relationships
            .iter()
            .filter(move |r| r.source_entity == entity)
    }

    /// Relationships from `entity` that constrain operation order.
    ///
    /// Computed once for the whole catalog on first use.
    pub fn ordering_relationships(&self, entity: &str) -> Vec<&RelationshipInfo> {
        let index = self.ordering.get_or_init(|| {
            let mut map: HashMap<String, Vec<usize>> = HashMap::new();
            for (i, rel) in self.relationships.iter().enumerate() {
                if rel.is_ordering_edge() {
                    map.entry(rel.source_entity.clone()).or_default().push(i);
                }
            }
            map
        });
        index
            .get(entity)
            .map(|ids| ids.iter().map(|&i| &self.relationships[i]).collect())
            .unwrap_or_default()
    }

    /// Number of registered entities.
    pub fn entity_count(&self) -> usize {
        self.entities.len()
    }
}
