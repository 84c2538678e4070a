// ============================================================================
// Schema Snapshot Loader
// ============================================================================
//
// Reconstructs the model currently realized in a store part from its catalog.
// Inconsistent catalogs are reported in full and never repaired.
//
// ============================================================================

use std::collections::{HashMap, HashSet};

use tracing::debug;

use crate::core::{DataType, DbError, Result};
use crate::model::{EntitySpec, FieldSpec, IndexSpec, Model};
use crate::storage::{PartCatalog, Store, TableSchema};

pub struct SnapshotLoader;

impl SnapshotLoader {
    /// Model of `part` as deployed in `store`; an absent part yields an empty model.
    pub fn from_store(store: &Store, part: &str) -> Result<Model> {
        Self::load(&store.catalog(part)?)
    }

    pub fn from_json(json: &str) -> Result<Model> {
        let catalog = PartCatalog::from_json(json)
            .map_err(|err| DbError::SnapshotRead(vec![format!("catalog is not readable: {}", err)]))?;
        Self::load(&catalog)
    }

    pub fn load(catalog: &PartCatalog) -> Result<Model> {
        if catalog.is_empty() {
            return Ok(Model::empty(catalog.part()));
        }

        let mut problems = Vec::new();
        let registered: HashMap<&str, &str> = {
            let mut map = HashMap::new();
            for table in catalog.tables() {
                for entry in table.types() {
                    if let Some(other) = map.insert(entry.name.as_str(), table.name()) {
                        problems.push(format!(
                            "type '{}' is registered in both '{}' and '{}'",
                            entry.name,
                            other,
                            table.name()
                        ));
                    }
                }
            }
            map
        };

        for table in catalog.tables() {
            check_table(table, &registered, &mut problems);
        }

        if !problems.is_empty() {
            return Err(DbError::SnapshotRead(problems));
        }

        let mut builder = Model::builder(catalog.part());
        for table in catalog.tables() {
            builder = builder.entities(table_entities(table));
        }

        let model = builder.build().map_err(|err| match err {
            DbError::ModelValidation(violations) => {
                DbError::SnapshotRead(violations.iter().map(ToString::to_string).collect())
            }
            other => other,
        })?;
        debug!(part = catalog.part(), types = model.len(), "snapshot loaded");
        Ok(model)
    }
}

fn check_table(table: &TableSchema, registered: &HashMap<&str, &str>, problems: &mut Vec<String>) {
    let name = table.name();

    let roots: Vec<&str> = table
        .types()
        .iter()
        .filter(|entry| entry.parent.is_none())
        .map(|entry| entry.name.as_str())
        .collect();
    match roots.as_slice() {
        [root] if *root == name => {}
        [root] => problems.push(format!(
            "table '{}' is named differently from its root type '{}'",
            name, root
        )),
        [] => problems.push(format!("table '{}' has no root type", name)),
        many => problems.push(format!(
            "table '{}' has {} root types ({})",
            name,
            many.len(),
            many.join(", ")
        )),
    }

    for entry in table.types() {
        if let Some(parent) = &entry.parent
            && !table.has_type(parent)
        {
            problems.push(format!(
                "type '{}' in table '{}' has parent '{}' outside the table",
                entry.name, name, parent
            ));
        }
    }

    let mut seen = HashSet::new();
    for column in table.columns() {
        if !seen.insert(column.name.as_str()) {
            problems.push(format!("table '{}' has duplicate column '{}'", name, column.name));
        }
        if !table.has_type(&column.owner) {
            problems.push(format!(
                "column '{}.{}' is owned by unregistered type '{}'",
                name, column.name, column.owner
            ));
        }
        if let Some(target) = &column.references
            && !registered.contains_key(target.as_str())
        {
            problems.push(format!(
                "column '{}.{}' references unregistered type '{}'",
                name, column.name, target
            ));
        }
        if column.data_type == DataType::Text && !table.full_text_columns().contains(&column.name) {
            problems.push(format!(
                "text column '{}.{}' is missing from the full-text catalog",
                name, column.name
            ));
        }
    }

    let keys: Vec<_> = table.columns().iter().filter(|column| column.key).collect();
    match keys.as_slice() {
        [key] => {
            if roots.len() == 1 && key.owner != roots[0] {
                problems.push(format!(
                    "key column '{}.{}' is owned by '{}' instead of the root type",
                    name, key.name, key.owner
                ));
            }
        }
        [] => problems.push(format!("table '{}' has no key column", name)),
        _ => problems.push(format!("table '{}' has {} key columns", name, keys.len())),
    }

    for column in table.full_text_columns() {
        match table.column(column) {
            None => problems.push(format!(
                "full-text catalog of '{}' names missing column '{}'",
                name, column
            )),
            Some(def) if def.data_type != DataType::Text => problems.push(format!(
                "full-text catalog of '{}' names non-text column '{}'",
                name, column
            )),
            Some(_) => {}
        }
    }

    for index in table.indexes() {
        if !table.has_type(&index.owner) {
            problems.push(format!(
                "index '{}' on '{}' belongs to unregistered type '{}'",
                index.name, name, index.owner
            ));
        }
        for column in &index.columns {
            if table.column(column).is_none() {
                problems.push(format!(
                    "index '{}' on '{}' covers missing column '{}'",
                    index.name, name, column
                ));
            }
        }
    }
}

fn table_entities(table: &TableSchema) -> Vec<EntitySpec> {
    table
        .types()
        .iter()
        .map(|entry| {
            let mut spec = match &entry.parent {
                Some(parent) => EntitySpec::derived(entry.name.as_str(), parent.as_str()),
                None => EntitySpec::root(entry.name.as_str()),
            };
            for column in table.columns().iter().filter(|c| c.owner == entry.name) {
                spec = spec.field(FieldSpec {
                    name: column.name.clone(),
                    data_type: column.data_type,
                    target: column.references.clone(),
                    nullable: column.nullable,
                    key: column.key,
                    full_text: column.data_type == DataType::Text,
                    default: column.default.clone(),
                });
            }
            for index in table.indexes().iter().filter(|i| i.owner == entry.name) {
                spec = spec.with_index(IndexSpec::new(index.columns.iter().cloned()).named(index.name.as_str()));
            }
            spec
        })
        .collect()
}
