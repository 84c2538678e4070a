use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{ColumnDef, DISCRIMINATOR_COLUMN, DbError, Result, quote_ident, sql_literal};
use crate::storage::{IndexDef, PartCatalog, TableSchema};

/// Source column copied into a target column by [`UpgradeOperation::CopyData`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldMapping {
    pub source: String,
    pub target: String,
}

impl FieldMapping {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// One step of an upgrade plan.
///
/// Every operation names the tables it touches, so a plan can be logged,
/// rendered and executed without either model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum UpgradeOperation {
    /// Registers a type. With `key` set it is a hierarchy root and gets its own table.
    CreateType {
        table: String,
        type_name: String,
        parent: Option<String>,
        key: Option<ColumnDef>,
    },
    /// Deletes the type's rows and its own columns; dropping a root drops the table.
    DropType { table: String, type_name: String },
    RenameType { table: String, from: String, to: String },
    SetParent { table: String, type_name: String, parent: String },
    AddField { table: String, column: ColumnDef },
    DropField { table: String, column: String },
    RenameField { table: String, from: String, to: String },
    /// Converts column `column.name` to the definition in `column`.
    RetypeField { table: String, column: ColumnDef },
    CreateIndex { table: String, index: IndexDef },
    DropIndex { table: String, name: String },
    RebuildFullText { table: String },
    /// Copies mapped columns from rows of `source_type` into rows of `target_type`.
    ///
    /// Within one table existing rows are updated in place; across tables
    /// new rows of exactly `target_type` are inserted.
    CopyData {
        source_table: String,
        source_type: String,
        target_table: String,
        target_type: String,
        mapping: Vec<FieldMapping>,
        include_descendants: bool,
    },
}

impl UpgradeOperation {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::CreateType { .. } => "CreateType",
            Self::DropType { .. } => "DropType",
            Self::RenameType { .. } => "RenameType",
            Self::SetParent { .. } => "SetParent",
            Self::AddField { .. } => "AddField",
            Self::DropField { .. } => "DropField",
            Self::RenameField { .. } => "RenameField",
            Self::RetypeField { .. } => "RetypeField",
            Self::CreateIndex { .. } => "CreateIndex",
            Self::DropIndex { .. } => "DropIndex",
            Self::RebuildFullText { .. } => "RebuildFullText",
            Self::CopyData { .. } => "CopyData",
        }
    }

    /// Table the operation writes to.
    pub fn table(&self) -> &str {
        match self {
            Self::CreateType { table, .. }
            | Self::DropType { table, .. }
            | Self::RenameType { table, .. }
            | Self::SetParent { table, .. }
            | Self::AddField { table, .. }
            | Self::DropField { table, .. }
            | Self::RenameField { table, .. }
            | Self::RetypeField { table, .. }
            | Self::CreateIndex { table, .. }
            | Self::DropIndex { table, .. }
            | Self::RebuildFullText { table } => table,
            Self::CopyData { target_table, .. } => target_table,
        }
    }

    pub fn is_copy(&self) -> bool {
        matches!(self, Self::CopyData { .. })
    }

    /// Operation undoing this one, where it can be undone without the old data.
    pub fn inverse(&self) -> Option<UpgradeOperation> {
        match self {
            Self::CreateType { table, type_name, .. } => Some(Self::DropType {
                table: table.clone(),
                type_name: type_name.clone(),
            }),
            Self::RenameType { table, from, to } => {
                let table = if table == from { to.clone() } else { table.clone() };
                Some(Self::RenameType {
                    table,
                    from: to.clone(),
                    to: from.clone(),
                })
            }
            Self::AddField { table, column } => Some(Self::DropField {
                table: table.clone(),
                column: column.name.clone(),
            }),
            Self::RenameField { table, from, to } => Some(Self::RenameField {
                table: table.clone(),
                from: to.clone(),
                to: from.clone(),
            }),
            Self::CreateIndex { table, index } => Some(Self::DropIndex {
                table: table.clone(),
                name: index.name.clone(),
            }),
            Self::RebuildFullText { table } => Some(Self::RebuildFullText { table: table.clone() }),
            Self::DropType { .. }
            | Self::SetParent { .. }
            | Self::DropField { .. }
            | Self::RetypeField { .. }
            | Self::DropIndex { .. }
            | Self::CopyData { .. } => None,
        }
    }

    /// DDL/DML rendering for review; statements are separated by `;\n`.
    pub fn to_sql(&self) -> String {
        let q = |name: &str| quote_ident(name);
        let disc = q(DISCRIMINATOR_COLUMN);
        let type_lit = |name: &str| sql_literal(&name.into());
        match self {
            Self::CreateType {
                table,
                key: Some(key),
                ..
            } => format!(
                "CREATE TABLE {} ({} VARCHAR NOT NULL, {})",
                q(table),
                disc,
                key.to_sql()
            ),
            Self::CreateType {
                table,
                type_name,
                parent,
                key: None,
            } => format!(
                "-- register type {} under {} in {}",
                q(type_name),
                q(parent.as_deref().unwrap_or(table)),
                q(table)
            ),
            Self::DropType { table, type_name } if table == type_name => {
                format!("DROP TABLE {}", q(table))
            }
            Self::DropType { table, type_name } => format!(
                "DELETE FROM {} WHERE {} = {}",
                q(table),
                disc,
                type_lit(type_name)
            ),
            Self::RenameType { table, from, to } => {
                let mut sql = String::new();
                let current = if table == from {
                    sql.push_str(&format!("ALTER TABLE {} RENAME TO {};\n", q(table), q(to)));
                    to
                } else {
                    table
                };
                sql.push_str(&format!(
                    "UPDATE {} SET {} = {} WHERE {} = {}",
                    q(current),
                    disc,
                    type_lit(to),
                    disc,
                    type_lit(from)
                ));
                sql
            }
            Self::SetParent {
                table,
                type_name,
                parent,
            } => format!(
                "-- set parent of {} to {} in {}",
                q(type_name),
                q(parent),
                q(table)
            ),
            Self::AddField { table, column } => {
                format!("ALTER TABLE {} ADD COLUMN {}", q(table), column.to_sql())
            }
            Self::DropField { table, column } => {
                format!("ALTER TABLE {} DROP COLUMN {}", q(table), q(column))
            }
            Self::RenameField { table, from, to } => format!(
                "ALTER TABLE {} RENAME COLUMN {} TO {}",
                q(table),
                q(from),
                q(to)
            ),
            Self::RetypeField { table, column } => {
                let mut clauses = vec![format!(
                    "ALTER COLUMN {} TYPE {}",
                    q(&column.name),
                    column.data_type.sql_name()
                )];
                clauses.push(format!(
                    "ALTER COLUMN {} {} NOT NULL",
                    q(&column.name),
                    if column.nullable { "DROP" } else { "SET" }
                ));
                if let Some(default) = &column.default {
                    clauses.push(format!(
                        "ALTER COLUMN {} SET DEFAULT {}",
                        q(&column.name),
                        sql_literal(default)
                    ));
                }
                format!("ALTER TABLE {} {}", q(table), clauses.join(", "))
            }
            Self::CreateIndex { table, index } => format!(
                "CREATE INDEX {} ON {} ({})",
                q(&index.name),
                q(table),
                index.columns.iter().map(|c| q(c)).collect::<Vec<_>>().join(", ")
            ),
            Self::DropIndex { name, .. } => format!("DROP INDEX {}", q(name)),
            Self::RebuildFullText { table } => {
                format!("ALTER FULLTEXT INDEX ON {} START FULL POPULATION", q(table))
            }
            Self::CopyData {
                source_table,
                source_type,
                target_table,
                target_type,
                mapping,
                include_descendants,
            } => {
                let filter = if *include_descendants {
                    format!("{} IN ({}, ...descendants)", disc, type_lit(source_type))
                } else {
                    format!("{} = {}", disc, type_lit(source_type))
                };
                if source_table == target_table {
                    let sets = mapping
                        .iter()
                        .map(|m| format!("{} = {}", q(&m.target), q(&m.source)))
                        .collect::<Vec<_>>()
                        .join(", ");
                    format!("UPDATE {} SET {} WHERE {}", q(target_table), sets, filter)
                } else {
                    let targets = mapping.iter().map(|m| q(&m.target)).collect::<Vec<_>>().join(", ");
                    let sources = mapping.iter().map(|m| q(&m.source)).collect::<Vec<_>>().join(", ");
                    format!(
                        "INSERT INTO {} ({}, {}) SELECT {}, {} FROM {} WHERE {}",
                        q(target_table),
                        disc,
                        targets,
                        type_lit(target_type),
                        sources,
                        q(source_table),
                        filter
                    )
                }
            }
        }
    }

    /// Applies the schema effect of the operation to a detached catalog.
    pub fn simulate(&self, catalog: &mut PartCatalog) -> Result<()> {
        match self {
            Self::CreateType {
                table,
                type_name,
                parent,
                key,
            } => match (key, parent) {
                (Some(key), None) => {
                    if table != type_name {
                        return Err(DbError::ConstraintViolation(format!(
                            "root type '{}' must own a table of the same name, not '{}'",
                            type_name, table
                        )));
                    }
                    catalog.with_table(TableSchema::new_root(type_name.as_str(), key.clone()))
                }
                (None, Some(parent)) => catalog.get_table_mut(table)?.register_type(type_name, parent),
                _ => Err(DbError::ConstraintViolation(format!(
                    "type '{}' needs either a key or a parent",
                    type_name
                ))),
            },
            Self::DropType { table, type_name } => {
                let schema = catalog.get_table(table)?;
                let is_root = schema
                    .type_entry(type_name)
                    .ok_or_else(|| DbError::TypeNotFound(format!("{} (in table '{}')", type_name, table)))?
                    .parent
                    .is_none();
                if is_root {
                    if schema.types().len() > 1 {
                        return Err(DbError::ConstraintViolation(format!(
                            "table '{}' still stores derived types",
                            table
                        )));
                    }
                    catalog.without_table(table).map(|_| ())
                } else {
                    catalog.get_table_mut(table)?.unregister_type(type_name).map(|_| ())
                }
            }
            Self::RenameType { table, from, to } => catalog.rename_type(table, from, to),
            Self::SetParent {
                table,
                type_name,
                parent,
            } => catalog.get_table_mut(table)?.set_parent(type_name, parent),
            Self::AddField { table, column } => catalog.get_table_mut(table)?.add_column(column.clone()),
            Self::DropField { table, column } => catalog.get_table_mut(table)?.drop_column(column).map(|_| ()),
            Self::RenameField { table, from, to } => catalog.get_table_mut(table)?.rename_column(from, to),
            Self::RetypeField { table, column } => catalog.get_table_mut(table)?.retype_column(column).map(|_| ()),
            Self::CreateIndex { table, index } => catalog.get_table_mut(table)?.add_index(index.clone()),
            Self::DropIndex { table, name } => catalog.get_table_mut(table)?.drop_index(name),
            Self::RebuildFullText { table } => catalog.get_table(table).map(|_| ()),
            Self::CopyData {
                source_table,
                source_type,
                target_table,
                target_type,
                mapping,
                ..
            } => {
                let source = catalog.get_table(source_table)?;
                let target = catalog.get_table(target_table)?;
                check_copy(source, source_type, target, target_type, mapping)
            }
        }
    }
}

/// Checks that every mapped column is visible to the copied types.
pub(crate) fn check_copy(
    source: &TableSchema,
    source_type: &str,
    target: &TableSchema,
    target_type: &str,
    mapping: &[FieldMapping],
) -> Result<()> {
    for (schema, type_name) in [(source, source_type), (target, target_type)] {
        if !schema.has_type(type_name) {
            return Err(DbError::TypeNotFound(format!("{} (in table '{}')", type_name, schema.name())));
        }
    }
    let source_visible = source.columns_of(source_type);
    let target_visible = target.columns_of(target_type);
    for m in mapping {
        match source.find_column_index(&m.source) {
            Some(idx) if source_visible.contains(&idx) => {}
            _ => return Err(DbError::ColumnNotFound(m.source.clone(), source.name().to_string())),
        }
        match target.find_column_index(&m.target) {
            Some(idx) if target_visible.contains(&idx) => {}
            _ => return Err(DbError::ColumnNotFound(m.target.clone(), target.name().to_string())),
        }
    }
    if source.name() != target.name() {
        let key = target
            .key_index()
            .map(|idx| target.columns()[idx].name.as_str())
            .unwrap_or_default();
        if !mapping.iter().any(|m| m.target == key) {
            return Err(DbError::ConstraintViolation(format!(
                "copy into '{}' does not map its key column",
                target.name()
            )));
        }
    }
    Ok(())
}

impl fmt::Display for UpgradeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::CreateType {
                table,
                type_name,
                parent,
                key,
            } => match (key, parent) {
                (Some(key), _) => write!(f, "CreateType {} (table {}, key {})", type_name, table, key.name),
                (None, Some(parent)) => write!(f, "CreateType {}.{} : {}", table, type_name, parent),
                (None, None) => write!(f, "CreateType {}.{}", table, type_name),
            },
            Self::DropType { table, type_name } => write!(f, "DropType {}.{}", table, type_name),
            Self::RenameType { table, from, to } => write!(f, "RenameType {}.{} -> {}", table, from, to),
            Self::SetParent {
                table,
                type_name,
                parent,
            } => write!(f, "SetParent {}.{} : {}", table, type_name, parent),
            Self::AddField { table, column } => {
                write!(f, "AddField {}.{} {}", table, column.name, column.data_type)?;
                if !column.nullable {
                    write!(f, " not null")?;
                }
                Ok(())
            }
            Self::DropField { table, column } => write!(f, "DropField {}.{}", table, column),
            Self::RenameField { table, from, to } => write!(f, "RenameField {}.{} -> {}", table, from, to),
            Self::RetypeField { table, column } => write!(
                f,
                "RetypeField {}.{} {}{}",
                table,
                column.name,
                column.data_type,
                if column.nullable { "" } else { " not null" }
            ),
            Self::CreateIndex { table, index } => {
                write!(f, "CreateIndex {} on {} ({})", index.name, table, index.columns.join(", "))
            }
            Self::DropIndex { table, name } => write!(f, "DropIndex {} on {}", name, table),
            Self::RebuildFullText { table } => write!(f, "RebuildFullText {}", table),
            Self::CopyData {
                source_table,
                source_type,
                target_table,
                target_type,
                mapping,
                include_descendants,
            } => {
                write!(
                    f,
                    "CopyData {}.{}{} -> {}.{} [",
                    source_table,
                    source_type,
                    if *include_descendants { "*" } else { "" },
                    target_table,
                    target_type
                )?;
                for (idx, m) in mapping.iter().enumerate() {
                    if idx > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{} -> {}", m.source, m.target)?;
                }
                write!(f, "]")
            }
        }
    }
}
