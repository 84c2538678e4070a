use serde::{Deserialize, Serialize};

use crate::core::{DbError, Result};

use super::TableSchema;

/// Schema-only view of one store part: every hierarchy table with its
/// registered types, columns, indexes and full-text set.
///
/// Detached from the live tables, so cloning it never blocks writers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartCatalog {
    part: String,
    #[serde(default)]
    tables: Vec<TableSchema>,
}

impl PartCatalog {
    /// Catalog of a part that holds no tables yet.
    pub fn empty(part: impl Into<String>) -> Self {
        Self {
            part: part.into(),
            tables: Vec::new(),
        }
    }

    pub fn new(part: impl Into<String>, tables: Vec<TableSchema>) -> Self {
        let mut catalog = Self {
            part: part.into(),
            tables,
        };
        catalog.tables.sort_by(|a, b| a.name().cmp(b.name()));
        catalog
    }

    pub fn part(&self) -> &str {
        &self.part
    }

    pub fn tables(&self) -> &[TableSchema] {
        &self.tables
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn get_table(&self, name: &str) -> Result<&TableSchema> {
        self.tables
            .iter()
            .find(|table| table.name() == name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn get_table_mut(&mut self, name: &str) -> Result<&mut TableSchema> {
        self.tables
            .iter_mut()
            .find(|table| table.name() == name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_exists(&self, name: &str) -> bool {
        self.tables.iter().any(|table| table.name() == name)
    }

    /// Table in which `type_name` is registered.
    pub fn table_of_type(&self, type_name: &str) -> Option<&TableSchema> {
        self.tables.iter().find(|table| table.has_type(type_name))
    }

    pub fn list_tables(&self) -> Vec<&str> {
        self.tables.iter().map(|table| table.name()).collect()
    }

    pub fn with_table(&mut self, schema: TableSchema) -> Result<()> {
        if self.table_exists(schema.name()) {
            return Err(DbError::TableExists(schema.name().to_string()));
        }
        let position = self
            .tables
            .partition_point(|table| table.name() < schema.name());
        self.tables.insert(position, schema);
        Ok(())
    }

    pub fn without_table(&mut self, name: &str) -> Result<TableSchema> {
        let position = self
            .tables
            .iter()
            .position(|table| table.name() == name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;
        Ok(self.tables.remove(position))
    }

    /// Renames a type in `table` and every reference column pointing at it.
    pub fn rename_type(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        if let Some(existing) = self.table_of_type(to) {
            return Err(DbError::ConstraintViolation(format!(
                "type '{}' already exists in table '{}'",
                to,
                existing.name()
            )));
        }
        if table == from && self.table_exists(to) {
            return Err(DbError::TableExists(to.to_string()));
        }
        self.get_table_mut(table)?.rename_type(from, to)?;
        for schema in &mut self.tables {
            schema.rename_references(from, to);
        }
        self.resort();
        Ok(())
    }

    /// Keeps tables sorted after a root rename changed a table name.
    pub(crate) fn resort(&mut self) {
        self.tables.sort_by(|a, b| a.name().cmp(b.name()));
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let mut catalog: Self = serde_json::from_str(json)?;
        catalog.resort();
        Ok(catalog)
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
