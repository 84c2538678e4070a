use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::sync::{Arc, RwLock};

use crate::core::{DbError, Result, RowKey, Value};

use super::fulltext::tokenize;
use super::{PartCatalog, StoredRow, Table, TableSchema};

/// One stored entity as seen through its concrete type.
#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub type_name: String,
    pub fields: BTreeMap<String, Value>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: BTreeMap::new(),
        }
    }

    pub fn with(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(field.into(), value.into());
        self
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

impl fmt::Display for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {{", self.type_name)?;
        for (idx, (name, value)) in self.fields.iter().enumerate() {
            let sep = if idx == 0 { " " } else { ", " };
            write!(f, "{}{}: {}", sep, name, value)?;
        }
        write!(f, " }}")
    }
}

/// Tables of one part.
///
/// Tables sit behind `Arc`, so cloning a part for staging is shallow and a
/// table is copied only when the staging copy first writes to it.
#[derive(Debug, Clone, Default)]
pub struct PartState {
    tables: BTreeMap<String, Arc<Table>>,
}

impl PartState {
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn catalog(&self, part: &str) -> PartCatalog {
        PartCatalog::new(
            part,
            self.tables.values().map(|table| table.schema().clone()).collect(),
        )
    }

    pub fn tables(&self) -> impl Iterator<Item = &Table> {
        self.tables.values().map(|table| table.as_ref())
    }

    pub fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .map(|table| table.as_ref())
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    pub fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .map(Arc::make_mut)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))
    }

    /// Takes a table out of the part, e.g. to hand it to a copy worker.
    pub(crate) fn take_table(&mut self, name: &str) -> Result<Table> {
        let table = self
            .tables
            .remove(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;
        Ok(Arc::unwrap_or_clone(table))
    }

    pub(crate) fn put_table(&mut self, table: Table) {
        self.tables.insert(table.name().to_string(), Arc::new(table));
    }

    pub fn table_of_type(&self, type_name: &str) -> Option<&Table> {
        self.tables
            .values()
            .find(|table| table.schema().has_type(type_name))
            .map(|table| table.as_ref())
    }

    pub fn create_table(&mut self, schema: TableSchema) -> Result<()> {
        if self.tables.contains_key(schema.name()) {
            return Err(DbError::TableExists(schema.name().to_string()));
        }
        self.tables
            .insert(schema.name().to_string(), Arc::new(Table::new(schema)));
        Ok(())
    }

    pub fn drop_table(&mut self, name: &str) -> Result<usize> {
        let table = self
            .tables
            .remove(name)
            .ok_or_else(|| DbError::TableNotFound(name.to_string()))?;
        Ok(table.row_count())
    }

    /// Renames a type in its table and every reference column pointing at it.
    pub fn rename_type(&mut self, table: &str, from: &str, to: &str) -> Result<()> {
        if let Some(existing) = self.table_of_type(to) {
            return Err(DbError::ConstraintViolation(format!(
                "type '{}' already exists in table '{}'",
                to,
                existing.name()
            )));
        }
        if table == from && self.tables.contains_key(to) {
            return Err(DbError::TableExists(to.to_string()));
        }
        let mut moved = self.take_table(table)?;
        let result = moved.rename_type(from, to);
        self.put_table(moved);
        result?;
        let holders: Vec<String> = self
            .tables
            .iter()
            .filter(|(_, t)| t.schema().columns().iter().any(|c| c.references.as_deref() == Some(from)))
            .map(|(name, _)| name.clone())
            .collect();
        for name in holders {
            self.table_mut(&name)?.rename_references(from, to);
        }
        Ok(())
    }

    /// Row with `key` whose type is `type_name` or one of its descendants.
    pub fn find_row(&self, type_name: &str, key: &RowKey) -> Option<(&Table, &StoredRow)> {
        let table = self.table_of_type(type_name)?;
        let row = table.get(key)?;
        table
            .schema()
            .is_same_or_descendant(&row.type_name, type_name)
            .then_some((table, row))
    }

    /// Checks that every non-null reference of `row` resolves to a stored entity.
    pub fn check_references(&self, schema: &TableSchema, row: &StoredRow) -> Result<()> {
        for idx in schema.columns_of(&row.type_name) {
            let column = &schema.columns()[idx];
            let (Some(target), value) = (&column.references, &row.values[idx]) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            let key = RowKey::from_value(value)?;
            if self.find_row(target, &key).is_none() {
                return Err(DbError::ConstraintViolation(format!(
                    "reference '{}' of {} points to missing {} {}",
                    column.name, row.type_name, target, key
                )));
            }
        }
        Ok(())
    }
}

pub(crate) fn to_entity(schema: &TableSchema, row: &StoredRow) -> Entity {
    let mut entity = Entity::new(row.type_name.clone());
    for idx in schema.columns_of(&row.type_name) {
        entity
            .fields
            .insert(schema.columns()[idx].name.clone(), row.values[idx].clone());
    }
    entity
}

/// Builds the stored row for an entity, normalizing every value to its column type.
pub(crate) fn to_row(schema: &TableSchema, entity: &Entity) -> Result<StoredRow> {
    if !schema.has_type(&entity.type_name) {
        return Err(DbError::TypeNotFound(entity.type_name.clone()));
    }
    let visible = schema.columns_of(&entity.type_name);
    for name in entity.fields.keys() {
        match schema.find_column_index(name) {
            Some(idx) if visible.contains(&idx) => {}
            _ => return Err(DbError::ColumnNotFound(name.clone(), entity.type_name.clone())),
        }
    }
    let mut values = Vec::with_capacity(schema.columns().len());
    for (idx, column) in schema.columns().iter().enumerate() {
        let value = if visible.contains(&idx) {
            let value = entity.fields.get(&column.name).cloned().unwrap_or(Value::Null);
            column.data_type.normalize(value)?
        } else {
            Value::Null
        };
        values.push(value);
    }
    Ok(StoredRow {
        type_name: entity.type_name.clone(),
        values,
    })
}

/// In-memory entity store made of independently lockable parts.
#[derive(Debug, Default)]
pub struct Store {
    parts: RwLock<HashMap<String, Arc<RwLock<PartState>>>>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn from_parts(parts: HashMap<String, PartState>) -> Self {
        Self {
            parts: RwLock::new(
                parts
                    .into_iter()
                    .map(|(name, state)| (name, Arc::new(RwLock::new(state))))
                    .collect(),
            ),
        }
    }

    /// Handle to a part, created empty on first use.
    pub fn ensure_part(&self, part: &str) -> Result<Arc<RwLock<PartState>>> {
        if let Some(handle) = self.part(part)? {
            return Ok(handle);
        }
        let mut parts = self.parts.write()?;
        Ok(parts
            .entry(part.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(PartState::default())))
            .clone())
    }

    /// Unregisters `part` when it holds no tables. Returns whether it was removed.
    pub(crate) fn remove_empty_part(&self, part: &str) -> Result<bool> {
        let mut parts = self.parts.write()?;
        let empty = match parts.get(part) {
            Some(handle) => handle.read()?.is_empty(),
            None => return Ok(false),
        };
        if empty {
            parts.remove(part);
        }
        Ok(empty)
    }

    pub fn part(&self, part: &str) -> Result<Option<Arc<RwLock<PartState>>>> {
        Ok(self.parts.read()?.get(part).cloned())
    }

    fn existing_part(&self, part: &str) -> Result<Arc<RwLock<PartState>>> {
        self.part(part)?
            .ok_or_else(|| DbError::PartNotFound(part.to_string()))
    }

    pub fn part_names(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.parts.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    /// Schema of a part; a part never written to has an empty catalog.
    pub fn catalog(&self, part: &str) -> Result<PartCatalog> {
        match self.part(part)? {
            Some(handle) => Ok(handle.read()?.catalog(part)),
            None => Ok(PartCatalog::empty(part)),
        }
    }

    pub fn insert(&self, part: &str, entity: &Entity) -> Result<RowKey> {
        let handle = self.existing_part(part)?;
        let mut state = handle.write()?;
        let table_name = state
            .table_of_type(&entity.type_name)
            .map(|table| table.name().to_string())
            .ok_or_else(|| DbError::TypeNotFound(entity.type_name.clone()))?;
        let row = {
            let table = state.table(&table_name)?;
            let row = to_row(table.schema(), entity)?;
            state.check_references(table.schema(), &row)?;
            row
        };
        state.table_mut(&table_name)?.insert(row)
    }

    pub fn get(&self, part: &str, type_name: &str, key: &Value) -> Result<Option<Entity>> {
        let handle = self.existing_part(part)?;
        let state = handle.read()?;
        let key = RowKey::from_value(key)?;
        Ok(state
            .find_row(type_name, &key)
            .map(|(table, row)| to_entity(table.schema(), row)))
    }

    /// Entities of `type_name` and all of its descendants, in key order.
    pub fn query(&self, part: &str, type_name: &str) -> Result<Vec<Entity>> {
        let handle = self.existing_part(part)?;
        let state = handle.read()?;
        let table = state
            .table_of_type(type_name)
            .ok_or_else(|| DbError::TypeNotFound(type_name.to_string()))?;
        Ok(table
            .rows_of(type_name, true)
            .map(|(_, row)| to_entity(table.schema(), row))
            .collect())
    }

    pub fn count(&self, part: &str, type_name: &str) -> Result<usize> {
        let handle = self.existing_part(part)?;
        let state = handle.read()?;
        let table = state
            .table_of_type(type_name)
            .ok_or_else(|| DbError::TypeNotFound(type_name.to_string()))?;
        Ok(table.rows_of(type_name, true).count())
    }

    /// Entities whose concrete type is exactly `type_name`, in key order.
    pub fn query_exact(&self, part: &str, type_name: &str) -> Result<Vec<Entity>> {
        let handle = self.existing_part(part)?;
        let state = handle.read()?;
        let table = state
            .table_of_type(type_name)
            .ok_or_else(|| DbError::TypeNotFound(type_name.to_string()))?;
        Ok(table
            .rows_of(type_name, false)
            .map(|(_, row)| to_entity(table.schema(), row))
            .collect())
    }

    pub fn count_exact(&self, part: &str, type_name: &str) -> Result<usize> {
        let handle = self.existing_part(part)?;
        let state = handle.read()?;
        let table = state
            .table_of_type(type_name)
            .ok_or_else(|| DbError::TypeNotFound(type_name.to_string()))?;
        Ok(table.count_of(type_name))
    }

    /// Full-text search over the string fields of `type_name` and its descendants.
    pub fn search(&self, part: &str, type_name: &str, query: &str) -> Result<Vec<Entity>> {
        let handle = self.existing_part(part)?;
        let state = handle.read()?;
        let table = state
            .table_of_type(type_name)
            .ok_or_else(|| DbError::TypeNotFound(type_name.to_string()))?;
        if tokenize(query).is_empty() {
            return Ok(Vec::new());
        }
        let keys = table.full_text().search(table.name(), query)?;
        Ok(keys
            .iter()
            .filter_map(|key| table.get(key))
            .filter(|row| table.schema().is_same_or_descendant(&row.type_name, type_name))
            .map(|row| to_entity(table.schema(), row))
            .collect())
    }

    pub fn find_by_index(
        &self,
        part: &str,
        type_name: &str,
        index: &str,
        values: &[Value],
    ) -> Result<Vec<Entity>> {
        let handle = self.existing_part(part)?;
        let state = handle.read()?;
        let table = state
            .table_of_type(type_name)
            .ok_or_else(|| DbError::TypeNotFound(type_name.to_string()))?;
        let keys = table.lookup_index(index, values)?;
        Ok(keys
            .iter()
            .filter_map(|key| table.get(key))
            .filter(|row| table.schema().is_same_or_descendant(&row.type_name, type_name))
            .map(|row| to_entity(table.schema(), row))
            .collect())
    }

    pub(crate) fn snapshot_parts(&self) -> Result<Vec<(String, PartState)>> {
        let parts = self.parts.read()?;
        let mut result = Vec::with_capacity(parts.len());
        for (name, handle) in parts.iter() {
            result.push((name.clone(), handle.read()?.clone()));
        }
        result.sort_by(|a, b| a.0.cmp(&b.0));
        Ok(result)
    }
}
