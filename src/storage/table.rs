use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::core::{ColumnDef, DataType, DbError, Result, Row, RowKey, Value};

use super::fulltext::FullTextCatalog;

/// Entity type stored in a hierarchy table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeEntry {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexDef {
    pub name: String,
    /// Entity type that declares the index.
    pub owner: String,
    pub columns: Vec<String>,
}

/// Schema of one table-per-hierarchy table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableSchema {
    name: String,
    columns: Vec<ColumnDef>,
    types: Vec<TypeEntry>,
    #[serde(default)]
    indexes: Vec<IndexDef>,
    #[serde(default)]
    full_text: Vec<String>,
}

impl TableSchema {
    /// Table for a new hierarchy root, holding only its key column.
    pub fn new_root(root: impl Into<String>, key: ColumnDef) -> Self {
        let root = root.into();
        Self {
            name: root.clone(),
            columns: vec![key],
            types: vec![TypeEntry {
                name: root,
                parent: None,
            }],
            indexes: Vec::new(),
            full_text: Vec::new(),
        }
    }

    /// Builds a schema without consistency checks; used when reading persisted catalogs.
    pub fn from_parts(
        name: impl Into<String>,
        columns: Vec<ColumnDef>,
        types: Vec<TypeEntry>,
        indexes: Vec<IndexDef>,
        full_text: Vec<String>,
    ) -> Self {
        Self {
            name: name.into(),
            columns,
            types,
            indexes,
            full_text,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn find_column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|col| col.name == name)
    }

    pub fn column(&self, name: &str) -> Option<&ColumnDef> {
        self.find_column_index(name).map(|idx| &self.columns[idx])
    }

    pub fn key_index(&self) -> Option<usize> {
        self.columns.iter().position(|col| col.key)
    }

    pub fn types(&self) -> &[TypeEntry] {
        &self.types
    }

    pub fn indexes(&self) -> &[IndexDef] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&IndexDef> {
        self.indexes.iter().find(|index| index.name == name)
    }

    pub fn full_text_columns(&self) -> &[String] {
        &self.full_text
    }

    pub fn has_type(&self, name: &str) -> bool {
        self.types.iter().any(|entry| entry.name == name)
    }

    pub fn type_entry(&self, name: &str) -> Option<&TypeEntry> {
        self.types.iter().find(|entry| entry.name == name)
    }

    pub fn root_type(&self) -> Option<&TypeEntry> {
        self.types.iter().find(|entry| entry.parent.is_none())
    }

    /// `type_name` and its ancestors, hierarchy root first.
    pub fn lineage(&self, type_name: &str) -> Vec<String> {
        let mut chain = Vec::new();
        let mut current = self.type_entry(type_name);
        while let Some(entry) = current {
            if chain.contains(&entry.name) {
                break;
            }
            chain.push(entry.name.clone());
            current = entry.parent.as_deref().and_then(|parent| self.type_entry(parent));
        }
        chain.reverse();
        chain
    }

    pub fn is_same_or_descendant(&self, type_name: &str, ancestor: &str) -> bool {
        self.lineage(type_name).iter().any(|name| name == ancestor)
    }

    /// Column positions visible to an entity of `type_name`.
    pub fn columns_of(&self, type_name: &str) -> Vec<usize> {
        let lineage = self.lineage(type_name);
        self.columns
            .iter()
            .enumerate()
            .filter(|(_, col)| lineage.contains(&col.owner))
            .map(|(idx, _)| idx)
            .collect()
    }

    fn not_found(&self, column: &str) -> DbError {
        DbError::ColumnNotFound(column.to_string(), self.name.clone())
    }

    pub fn register_type(&mut self, name: &str, parent: &str) -> Result<()> {
        if self.has_type(name) {
            return Err(DbError::ConstraintViolation(format!(
                "type '{}' is already stored in table '{}'",
                name, self.name
            )));
        }
        if !self.has_type(parent) {
            return Err(DbError::TypeNotFound(format!("{} (in table '{}')", parent, self.name)));
        }
        self.types.push(TypeEntry {
            name: name.to_string(),
            parent: Some(parent.to_string()),
        });
        Ok(())
    }

    /// Removes a derived type together with the columns and indexes it declares.
    pub fn unregister_type(&mut self, name: &str) -> Result<Vec<usize>> {
        let entry = self
            .type_entry(name)
            .ok_or_else(|| DbError::TypeNotFound(format!("{} (in table '{}')", name, self.name)))?;
        if entry.parent.is_none() {
            return Err(DbError::ConstraintViolation(format!(
                "root type '{}' can only be removed by dropping table '{}'",
                name, self.name
            )));
        }
        if let Some(child) = self.types.iter().find(|t| t.parent.as_deref() == Some(name)) {
            return Err(DbError::ConstraintViolation(format!(
                "type '{}' still has derived type '{}'",
                name, child.name
            )));
        }

        let removed: Vec<usize> = self
            .columns
            .iter()
            .enumerate()
            .filter(|(_, col)| col.owner == name)
            .map(|(idx, _)| idx)
            .collect();
        let removed_names: Vec<String> = removed.iter().map(|idx| self.columns[*idx].name.clone()).collect();
        self.columns.retain(|col| col.owner != name);
        self.indexes.retain(|index| index.owner != name);
        self.full_text.retain(|col| !removed_names.contains(col));
        self.types.retain(|entry| entry.name != name);
        Ok(removed)
    }

    /// Renames a type inside this table; renaming the root renames the table.
    pub fn rename_type(&mut self, from: &str, to: &str) -> Result<()> {
        if !self.has_type(from) {
            return Err(DbError::TypeNotFound(format!("{} (in table '{}')", from, self.name)));
        }
        if self.has_type(to) {
            return Err(DbError::ConstraintViolation(format!(
                "type '{}' is already stored in table '{}'",
                to, self.name
            )));
        }
        for entry in &mut self.types {
            if entry.name == from {
                entry.name = to.to_string();
            }
            if entry.parent.as_deref() == Some(from) {
                entry.parent = Some(to.to_string());
            }
        }
        for column in &mut self.columns {
            if column.owner == from {
                column.owner = to.to_string();
            }
        }
        for index in &mut self.indexes {
            if index.owner == from {
                index.owner = to.to_string();
            }
        }
        if self.name == from {
            self.name = to.to_string();
        }
        Ok(())
    }

    pub fn rename_references(&mut self, from: &str, to: &str) {
        for column in &mut self.columns {
            if column.references.as_deref() == Some(from) {
                column.references = Some(to.to_string());
            }
        }
    }

    pub fn set_parent(&mut self, name: &str, parent: &str) -> Result<()> {
        if !self.has_type(parent) {
            return Err(DbError::TypeNotFound(format!("{} (in table '{}')", parent, self.name)));
        }
        if self.is_same_or_descendant(parent, name) {
            return Err(DbError::ConstraintViolation(format!(
                "making '{}' the parent of '{}' creates a cycle",
                parent, name
            )));
        }
        let entry = self
            .types
            .iter_mut()
            .find(|entry| entry.name == name)
            .ok_or_else(|| DbError::TypeNotFound(name.to_string()))?;
        if entry.parent.is_none() {
            return Err(DbError::ConstraintViolation(format!(
                "root type '{}' cannot get a parent inside its own table",
                name
            )));
        }
        entry.parent = Some(parent.to_string());
        Ok(())
    }

    pub fn add_column(&mut self, column: ColumnDef) -> Result<()> {
        if self.find_column_index(&column.name).is_some() {
            return Err(DbError::ConstraintViolation(format!(
                "column '{}' already exists in table '{}'",
                column.name, self.name
            )));
        }
        if !self.has_type(&column.owner) {
            return Err(DbError::TypeNotFound(format!("{} (in table '{}')", column.owner, self.name)));
        }
        if column.key {
            return Err(DbError::ConstraintViolation(format!(
                "key column '{}' can only be created with its table",
                column.name
            )));
        }
        if column.data_type == DataType::Text {
            self.full_text.push(column.name.clone());
        }
        self.columns.push(column);
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<usize> {
        let idx = self.find_column_index(name).ok_or_else(|| self.not_found(name))?;
        if self.columns[idx].key {
            return Err(DbError::ConstraintViolation(format!(
                "key column '{}' cannot be dropped",
                name
            )));
        }
        if let Some(index) = self.indexes.iter().find(|index| index.columns.iter().any(|c| c == name)) {
            return Err(DbError::ConstraintViolation(format!(
                "column '{}' is still covered by index '{}'",
                name, index.name
            )));
        }
        self.columns.remove(idx);
        self.full_text.retain(|col| col != name);
        Ok(idx)
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        if self.find_column_index(to).is_some() {
            return Err(DbError::ConstraintViolation(format!(
                "column '{}' already exists in table '{}'",
                to, self.name
            )));
        }
        let idx = self.find_column_index(from).ok_or_else(|| self.not_found(from))?;
        self.columns[idx].name = to.to_string();
        for index in &mut self.indexes {
            for column in &mut index.columns {
                if column == from {
                    *column = to.to_string();
                }
            }
        }
        for column in &mut self.full_text {
            if column == from {
                *column = to.to_string();
            }
        }
        Ok(())
    }

    /// Gives column `target.name` the type, nullability, reference target and
    /// default of `target`; owner and key flag are kept.
    pub fn retype_column(&mut self, target: &ColumnDef) -> Result<usize> {
        let name = target.name.as_str();
        let idx = self.find_column_index(name).ok_or_else(|| self.not_found(name))?;
        let column = &mut self.columns[idx];
        if column.key && (column.data_type != target.data_type || target.nullable) {
            return Err(DbError::ConstraintViolation(format!(
                "key column '{}' cannot change type",
                name
            )));
        }
        if let Some(default) = &target.default
            && !target.data_type.is_compatible(default)
        {
            return Err(DbError::TypeMismatch(format!(
                "default '{}' of column '{}' does not fit {}",
                default, name, target.data_type
            )));
        }
        let was_text = column.data_type == DataType::Text;
        column.data_type = target.data_type;
        column.nullable = target.nullable && !column.key;
        column.references = if target.data_type == DataType::Reference {
            target.references.clone()
        } else {
            None
        };
        column.default = target.default.clone();
        match (was_text, target.data_type == DataType::Text) {
            (false, true) => self.full_text.push(name.to_string()),
            (true, false) => self.full_text.retain(|col| col != name),
            _ => {}
        }
        Ok(idx)
    }

    pub fn add_index(&mut self, index: IndexDef) -> Result<()> {
        if self.index(&index.name).is_some() {
            return Err(DbError::ConstraintViolation(format!(
                "index '{}' already exists on table '{}'",
                index.name, self.name
            )));
        }
        if !self.has_type(&index.owner) {
            return Err(DbError::TypeNotFound(format!("{} (in table '{}')", index.owner, self.name)));
        }
        for column in &index.columns {
            if self.find_column_index(column).is_none() {
                return Err(self.not_found(column));
            }
        }
        self.indexes.push(index);
        Ok(())
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        if self.index(name).is_none() {
            return Err(DbError::ExecutionError(format!(
                "index '{}' not found on table '{}'",
                name, self.name
            )));
        }
        self.indexes.retain(|index| index.name != name);
        Ok(())
    }
}

/// Row of a hierarchy table tagged with its concrete type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub type_name: String,
    pub values: Row,
}

type IndexEntries = BTreeMap<Vec<Value>, BTreeSet<RowKey>>;

#[derive(Debug, Clone)]
pub struct Table {
    schema: TableSchema,
    rows: BTreeMap<RowKey, StoredRow>,
    indexes: BTreeMap<String, IndexEntries>,
    full_text: FullTextCatalog,
}

impl Table {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
            indexes: BTreeMap::new(),
            full_text: FullTextCatalog::default(),
        }
    }

    /// Rebuilds index and full-text data for persisted rows.
    ///
    /// Every row is checked as on insert; malformed rows and duplicate keys
    /// are all reported as `SnapshotRead`.
    pub fn restore(schema: TableSchema, rows: Vec<StoredRow>) -> Result<Self> {
        let mut table = Self::new(schema);
        let key_idx = table.key_index()?;
        let mut problems = Vec::new();
        for (position, row) in rows.into_iter().enumerate() {
            if let Err(err) = table.validate_row(&row) {
                problems.push(format!("table '{}' row {}: {}", table.schema.name, position, err));
                continue;
            }
            let key = match RowKey::from_value(&row.values[key_idx]) {
                Ok(key) => key,
                Err(err) => {
                    problems.push(format!("table '{}' row {}: {}", table.schema.name, position, err));
                    continue;
                }
            };
            if table.rows.contains_key(&key) {
                problems.push(format!(
                    "table '{}' row {}: duplicate key {}",
                    table.schema.name, position, key
                ));
                continue;
            }
            table.rows.insert(key, row);
        }
        if !problems.is_empty() {
            return Err(DbError::SnapshotRead(problems));
        }
        let index_names: Vec<String> = table.schema.indexes.iter().map(|i| i.name.clone()).collect();
        for name in index_names {
            table.build_index(&name)?;
        }
        table.rebuild_full_text();
        Ok(table)
    }

    pub fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub fn name(&self) -> &str {
        self.schema.name()
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn rows(&self) -> impl Iterator<Item = (&RowKey, &StoredRow)> {
        self.rows.iter()
    }

    pub fn get(&self, key: &RowKey) -> Option<&StoredRow> {
        self.rows.get(key)
    }

    pub fn full_text(&self) -> &FullTextCatalog {
        &self.full_text
    }

    fn key_index(&self) -> Result<usize> {
        self.schema.key_index().ok_or_else(|| {
            DbError::ConstraintViolation(format!("table '{}' has no key column", self.schema.name))
        })
    }

    /// Rows whose type is `type_name` or, with `polymorphic`, one of its descendants.
    pub fn rows_of<'a>(
        &'a self,
        type_name: &'a str,
        polymorphic: bool,
    ) -> impl Iterator<Item = (&'a RowKey, &'a StoredRow)> + 'a {
        self.rows.iter().filter(move |(_, row)| {
            if polymorphic {
                self.schema.is_same_or_descendant(&row.type_name, type_name)
            } else {
                row.type_name == type_name
            }
        })
    }

    pub fn count_of(&self, type_name: &str) -> usize {
        self.rows_of(type_name, false).count()
    }

    fn validate_row(&self, row: &StoredRow) -> Result<()> {
        let columns = self.schema.columns();
        if row.values.len() != columns.len() {
            return Err(DbError::ExecutionError(format!(
                "Expected {} columns, got {}",
                columns.len(),
                row.values.len()
            )));
        }
        if !self.schema.has_type(&row.type_name) {
            return Err(DbError::TypeNotFound(format!(
                "{} (in table '{}')",
                row.type_name, self.schema.name
            )));
        }
        let visible = self.schema.columns_of(&row.type_name);
        for (idx, (column, value)) in columns.iter().zip(row.values.iter()).enumerate() {
            if visible.contains(&idx) {
                column.validate(value)?;
            } else if !value.is_null() {
                return Err(DbError::ConstraintViolation(format!(
                    "column '{}' does not belong to type '{}'",
                    column.name, row.type_name
                )));
            }
        }
        Ok(())
    }

    pub fn insert(&mut self, row: StoredRow) -> Result<RowKey> {
        self.validate_row(&row)?;
        let key = RowKey::from_value(&row.values[self.key_index()?])?;
        if self.rows.contains_key(&key) {
            return Err(DbError::ConstraintViolation(format!(
                "Unique constraint violation: key {} already exists in table '{}'",
                key, self.schema.name
            )));
        }
        self.index_row(&key, &row);
        self.rows.insert(key.clone(), row);
        Ok(key)
    }

    /// Replaces a row, keeping its key.
    pub fn replace(&mut self, key: &RowKey, row: StoredRow) -> Result<()> {
        self.validate_row(&row)?;
        let old = self
            .rows
            .remove(key)
            .ok_or_else(|| DbError::ExecutionError(format!("row {} not found", key)))?;
        self.unindex_row(key, &old);
        self.index_row(key, &row);
        self.rows.insert(key.clone(), row);
        Ok(())
    }

    /// Removes every row whose concrete type is `type_name`.
    pub fn delete_type_rows(&mut self, type_name: &str) -> usize {
        let keys: Vec<RowKey> = self.rows_of(type_name, false).map(|(key, _)| key.clone()).collect();
        for key in &keys {
            if let Some(row) = self.rows.remove(key) {
                self.unindex_row(key, &row);
            }
        }
        keys.len()
    }

    fn index_row(&mut self, key: &RowKey, row: &StoredRow) {
        for def in &self.schema.indexes {
            if let (Some(entries), Some(values)) = (self.indexes.get_mut(&def.name), index_values(&self.schema, def, row)) {
                entries.entry(values).or_default().insert(key.clone());
            }
        }
        let texts: Vec<&Value> = self
            .schema
            .full_text
            .iter()
            .filter_map(|col| self.schema.find_column_index(col))
            .map(|idx| &row.values[idx])
            .collect();
        self.full_text.add(key, &texts);
    }

    fn unindex_row(&mut self, key: &RowKey, row: &StoredRow) {
        for def in &self.schema.indexes {
            if let (Some(entries), Some(values)) = (self.indexes.get_mut(&def.name), index_values(&self.schema, def, row)) {
                if let Some(keys) = entries.get_mut(&values) {
                    keys.remove(key);
                    if keys.is_empty() {
                        entries.remove(&values);
                    }
                }
            }
        }
        self.full_text.remove(key);
    }

    fn build_index(&mut self, name: &str) -> Result<()> {
        let def = self
            .schema
            .index(name)
            .cloned()
            .ok_or_else(|| DbError::ExecutionError(format!("index '{}' not found", name)))?;
        let mut entries = IndexEntries::new();
        for (key, row) in &self.rows {
            if let Some(values) = index_values(&self.schema, &def, row) {
                entries.entry(values).or_default().insert(key.clone());
            }
        }
        self.indexes.insert(def.name, entries);
        Ok(())
    }

    pub fn add_column(&mut self, column: ColumnDef) -> Result<()> {
        let fill = column.fill_value();
        if !self.rows.is_empty() {
            column.validate(&fill)?;
        }
        let is_text = column.data_type == DataType::Text;
        let owner = column.owner.clone();
        let had_full_text = self.has_full_text();
        self.schema.add_column(column)?;
        for row in self.rows.values_mut() {
            let applies = self.schema.is_same_or_descendant(&row.type_name, &owner);
            row.values.push(if applies { fill.clone() } else { Value::Null });
        }
        if is_text {
            self.invalidate_full_text(had_full_text);
        }
        Ok(())
    }

    pub fn drop_column(&mut self, name: &str) -> Result<()> {
        let was_text = self.schema.full_text.iter().any(|col| col == name);
        let idx = self.schema.drop_column(name)?;
        for row in self.rows.values_mut() {
            row.values.remove(idx);
        }
        if was_text {
            self.invalidate_full_text(true);
        }
        Ok(())
    }

    pub fn rename_column(&mut self, from: &str, to: &str) -> Result<()> {
        self.schema.rename_column(from, to)
    }

    /// Converts every stored value of the column in place.
    pub fn retype_column(&mut self, target: &ColumnDef) -> Result<()> {
        let name = target.name.as_str();
        let full_text_before = self.schema.full_text.clone();
        let idx = self.schema.retype_column(target)?;
        let column = self.schema.columns[idx].clone();
        let mut converted = Vec::with_capacity(self.rows.len());
        for (key, row) in &self.rows {
            let value = column.data_type.convert(&row.values[idx])?;
            if self.schema.columns_of(&row.type_name).contains(&idx) {
                column.validate(&value)?;
            }
            converted.push((key.clone(), value));
        }
        for (key, value) in converted {
            if let Some(row) = self.rows.get_mut(&key) {
                row.values[idx] = value;
            }
        }
        let covering: Vec<String> = self
            .schema
            .indexes
            .iter()
            .filter(|index| index.columns.iter().any(|col| col == name))
            .map(|index| index.name.clone())
            .collect();
        for index in covering {
            self.build_index(&index)?;
        }
        if full_text_before != self.schema.full_text || column.data_type == DataType::Text {
            self.invalidate_full_text(!full_text_before.is_empty());
        }
        Ok(())
    }

    pub fn register_type(&mut self, name: &str, parent: &str) -> Result<()> {
        self.schema.register_type(name, parent)
    }

    /// Deletes the type's rows and removes it with its own columns.
    pub fn drop_type(&mut self, name: &str) -> Result<usize> {
        let deleted = self.delete_type_rows(name);
        let had_full_text = self.has_full_text();
        let had_text = self
            .schema
            .columns
            .iter()
            .any(|col| col.owner == name && col.data_type == DataType::Text);
        let owned_indexes: Vec<String> = self
            .schema
            .indexes
            .iter()
            .filter(|index| index.owner == name)
            .map(|index| index.name.clone())
            .collect();
        let removed = self.schema.unregister_type(name)?;
        for row in self.rows.values_mut() {
            for idx in removed.iter().rev() {
                row.values.remove(*idx);
            }
        }
        for index in owned_indexes {
            self.indexes.remove(&index);
        }
        if had_text {
            self.invalidate_full_text(had_full_text);
        }
        Ok(deleted)
    }

    pub fn rename_type(&mut self, from: &str, to: &str) -> Result<()> {
        self.schema.rename_type(from, to)?;
        for row in self.rows.values_mut() {
            if row.type_name == from {
                row.type_name = to.to_string();
            }
        }
        Ok(())
    }

    pub fn rename_references(&mut self, from: &str, to: &str) {
        self.schema.rename_references(from, to);
    }

    /// Re-parents a type; inherited columns it loses are cleared and the ones it gains are filled.
    pub fn set_parent(&mut self, name: &str, parent: &str) -> Result<()> {
        let had_full_text = self.has_full_text();
        let before: Vec<String> = self.subtree_types(name);
        let old_visible: Vec<Vec<usize>> = before.iter().map(|t| self.schema.columns_of(t)).collect();
        self.schema.set_parent(name, parent)?;
        for (type_name, old) in before.iter().zip(old_visible) {
            let new = self.schema.columns_of(type_name);
            for row in self.rows.values_mut().filter(|row| &row.type_name == type_name) {
                for idx in &old {
                    if !new.contains(idx) {
                        row.values[*idx] = Value::Null;
                    }
                }
                for idx in &new {
                    if !old.contains(idx) {
                        row.values[*idx] = self.schema.columns[*idx].fill_value();
                    }
                }
            }
        }
        self.invalidate_full_text(had_full_text);
        let names: Vec<String> = self.schema.indexes.iter().map(|i| i.name.clone()).collect();
        for index in names {
            self.build_index(&index)?;
        }
        Ok(())
    }

    fn has_full_text(&self) -> bool {
        !self.schema.full_text.is_empty()
    }

    /// A table that never had full-text columns keeps its empty catalog valid.
    fn invalidate_full_text(&mut self, had_full_text: bool) {
        if had_full_text || self.has_full_text() {
            self.full_text.mark_stale();
        }
    }

    fn subtree_types(&self, name: &str) -> Vec<String> {
        self.schema
            .types
            .iter()
            .filter(|entry| self.schema.is_same_or_descendant(&entry.name, name))
            .map(|entry| entry.name.clone())
            .collect()
    }

    pub fn create_index(&mut self, index: IndexDef) -> Result<()> {
        let name = index.name.clone();
        self.schema.add_index(index)?;
        self.build_index(&name)
    }

    pub fn drop_index(&mut self, name: &str) -> Result<()> {
        self.schema.drop_index(name)?;
        self.indexes.remove(name);
        Ok(())
    }

    pub fn rebuild_full_text(&mut self) {
        let positions: Vec<usize> = self
            .schema
            .full_text
            .iter()
            .filter_map(|col| self.schema.find_column_index(col))
            .collect();
        let documents = self
            .rows
            .iter()
            .map(|(key, row)| (key, positions.iter().map(|idx| &row.values[*idx]).collect()));
        self.full_text.rebuild(documents);
    }

    pub fn lookup_index(&self, name: &str, values: &[Value]) -> Result<Vec<RowKey>> {
        let entries = self.indexes.get(name).ok_or_else(|| {
            DbError::ExecutionError(format!("index '{}' not found on table '{}'", name, self.schema.name))
        })?;
        Ok(entries
            .get(values)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default())
    }
}

fn index_values(schema: &TableSchema, def: &IndexDef, row: &StoredRow) -> Option<Vec<Value>> {
    def.columns
        .iter()
        .map(|col| schema.find_column_index(col).map(|idx| row.values[idx].clone()))
        .collect()
}
