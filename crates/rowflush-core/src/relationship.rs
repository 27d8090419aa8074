//! Relationship metadata.
//!
//! Only single-valued relationships whose join columns land on the target's
//! primary key, and which do not resolve through a dependent key, constrain
//! the order in which row operations execute. Everything else is carried for
//! completeness and ignored by the sorter.

use serde::{Deserialize, Serialize};

/// The type of relationship between two entities.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum RelationshipKind {
    /// One-to-one: `Artist` has one `Profile`.
    OneToOne,
    /// Many-to-one: many `Painting`s belong to one `Artist`.
    #[default]
    ManyToOne,
    /// One-to-many: one `Artist` has many `Painting`s.
    OneToMany,
    /// Many-to-many through a link table.
    ManyToMany,
}

impl RelationshipKind {
    /// Whether traversing this relationship yields a collection.
    pub const fn is_to_many(self) -> bool {
        matches!(self, RelationshipKind::OneToMany | RelationshipKind::ManyToMany)
    }
}

/// One source→target column pair of a relationship join.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinColumn {
    /// Column on the source entity (the foreign key side).
    pub source: String,
    /// Column on the target entity.
    pub target: String,
}

/// Metadata about a relationship between two entities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationshipInfo {
    /// Name of the relationship.
    pub name: String,
    /// Entity owning the join source columns.
    pub source_entity: String,
    /// Entity the relationship points at.
    pub target_entity: String,
    /// Kind of relationship.
    pub kind: RelationshipKind,
    /// Join column pairs (one for simple keys, several for composite keys).
    pub joins: Vec<JoinColumn>,
    /// The target's primary key is derived from the source's (dependent key).
    pub to_dependent_pk: bool,
    /// The join target columns are exactly the target's primary key.
    ///
    /// Computed when the relationship is registered with an
    /// [`EntityResolver`](crate::EntityResolver).
    #[serde(default)]
    pub to_pk: bool,
}

impl RelationshipInfo {
    /// A to-one relationship (`source` holds a foreign key to `target`).
    pub fn to_one(
        name: impl Into<String>,
        source_entity: impl Into<String>,
        target_entity: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            source_entity: source_entity.into(),
            target_entity: target_entity.into(),
            kind: RelationshipKind::ManyToOne,
            joins: Vec::new(),
            to_dependent_pk: false,
            to_pk: false,
        }
    }

    /// Add a join column pair.
    #[must_use]
    pub fn join(mut self, source: impl Into<String>, target: impl Into<String>) -> Self {
        self.joins.push(JoinColumn {
            source: source.into(),
            target: target.into(),
        });
        self
    }

    /// Set the relationship kind.
    #[must_use]
    pub fn kind(mut self, kind: RelationshipKind) -> Self {
        self.kind = kind;
        self
    }

    /// Mark the target's key as derived from this side.
    #[must_use]
    pub fn to_dependent_pk(mut self, value: bool) -> Self {
        self.to_dependent_pk = value;
        self
    }

    pub fn is_to_many(&self) -> bool {
        self.kind.is_to_many()
    }

    /// Whether this relationship constrains insert/delete ordering.
    pub fn is_ordering_edge(&self) -> bool {
        !self.is_to_many() && self.to_pk && !self.to_dependent_pk && !self.joins.is_empty()
    }

    /// Source-side join columns.
    pub fn source_columns(&self) -> impl Iterator<Item = &str> {
        self.joins.iter().map(|j| j.source.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_edge_requires_to_one_to_pk() {
        let mut rel = RelationshipInfo::to_one("artist", "painting", "artist").join("artist_id", "id");
        assert!(!rel.is_ordering_edge());
        rel.to_pk = true;
        assert!(rel.is_ordering_edge());

        let to_many = rel.clone().kind(RelationshipKind::OneToMany);
        assert!(!to_many.is_ordering_edge());

        let dependent = rel.clone().to_dependent_pk(true);
        assert!(!dependent.is_ordering_edge());
    }

    #[test]
    fn composite_join_columns() {
        let rel = RelationshipInfo::to_one("exhibit", "ticket", "exhibit")
            .join("gallery_id", "gallery_id")
            .join("exhibit_seq", "seq");
        let sources: Vec<&str> = rel.source_columns().collect();
        assert_eq!(sources, vec!["gallery_id", "exhibit_seq"]);
    }
}
