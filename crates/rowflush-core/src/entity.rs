//! Entity and column definitions.

use serde::{Deserialize, Serialize};

/// Metadata about one table column.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnInfo {
    /// Database column name
    pub name: String,
    /// Whether this column is part of the primary key
    pub primary_key: bool,
    /// Whether the database generates this column's value (auto-increment/identity)
    pub generated: bool,
    /// Whether this column is nullable
    pub nullable: bool,
}

impl ColumnInfo {
    /// Create a plain, non-null column.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            primary_key: false,
            generated: false,
            nullable: false,
        }
    }

    /// Primary key column whose value is supplied by the application.
    pub fn primary_key(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            ..Self::new(name)
        }
    }

    /// Primary key column generated by the database.
    pub fn generated_key(name: impl Into<String>) -> Self {
        Self {
            primary_key: true,
            generated: true,
            ..Self::new(name)
        }
    }

    /// Set nullable flag.
    #[must_use]
    pub fn nullable(mut self, value: bool) -> Self {
        self.nullable = value;
        self
    }
}

/// Metadata about one entity (table) in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityInfo {
    name: String,
    /// Logical namespace (schema / data map). Batches never span namespaces.
    namespace: String,
    columns: Vec<ColumnInfo>,
}

impl EntityInfo {
    /// Create an entity in the default namespace.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            namespace: String::new(),
            columns: Vec::new(),
        }
    }

    /// Set the namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = namespace.into();
        self
    }

    /// Add a column.
    #[must_use]
    pub fn column(mut self, column: ColumnInfo) -> Self {
        self.columns.push(column);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn namespace_name(&self) -> &str {
        &self.namespace
    }

    pub fn columns(&self) -> &[ColumnInfo] {
        &self.columns
    }

    /// Look up a column by name.
    pub fn find_column(&self, name: &str) -> Option<&ColumnInfo> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Primary key column names, in declaration order.
    pub fn primary_key_columns(&self) -> Vec<String> {
        self.columns
            .iter()
            .filter(|c| c.primary_key)
            .map(|c| c.name.clone())
            .collect()
    }

    /// True if any primary key column is generated by the database.
    pub fn has_generated_key(&self) -> bool {
        self.columns.iter().any(|c| c.primary_key && c.generated)
    }

    /// Same table in the same namespace.
    pub fn same_table(&self, other: &EntityInfo) -> bool {
        self.name == other.name && self.namespace == other.namespace
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn primary_key_columns_in_declaration_order() {
        let entity = EntityInfo::new("exhibit")
            .column(ColumnInfo::primary_key("gallery_id"))
            .column(ColumnInfo::new("title"))
            .column(ColumnInfo::primary_key("seq"));
        assert_eq!(entity.primary_key_columns(), vec!["gallery_id", "seq"]);
        assert!(!entity.has_generated_key());
    }

    #[test]
    fn generated_key_detected() {
        let entity = EntityInfo::new("artist").column(ColumnInfo::generated_key("id"));
        assert!(entity.has_generated_key());
        assert!(entity.find_column("id").is_some_and(|c| c.primary_key));
        assert!(entity.find_column("missing").is_none());
    }

    #[test]
    fn same_table_respects_namespace() {
        let a = EntityInfo::new("artist").namespace("public");
        let b = EntityInfo::new("artist").namespace("archive");
        assert!(!a.same_table(&b));
        assert!(a.same_table(&a.clone()));
    }
}
