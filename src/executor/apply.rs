use tracing::debug;

use crate::core::{DbError, Result};
use crate::plan::UpgradeOperation;
use crate::storage::{PartState, TableSchema};

/// Applies one schema operation to a staging copy of a part.
///
/// Data copies are handled by the copy module.
pub(crate) fn apply_schema(state: &mut PartState, op: &UpgradeOperation) -> Result<()> {
    match op {
        UpgradeOperation::CreateType {
            table,
            type_name,
            parent,
            key,
        } => match (key, parent) {
            (Some(key), None) if table == type_name => {
                state.create_table(TableSchema::new_root(type_name.as_str(), key.clone()))
            }
            (None, Some(parent)) => state.table_mut(table)?.register_type(type_name, parent),
            _ => Err(DbError::ConstraintViolation(format!(
                "type '{}' cannot be created in table '{}'",
                type_name, table
            ))),
        },
        UpgradeOperation::DropType { table, type_name } => {
            let schema = state.table(table)?.schema();
            let is_root = schema.type_entry(type_name).is_some_and(|entry| entry.parent.is_none());
            if is_root {
                if schema.types().len() > 1 {
                    return Err(DbError::ConstraintViolation(format!(
                        "table '{}' still stores derived types",
                        table
                    )));
                }
                let rows = state.drop_table(table)?;
                debug!(table = %table, rows, "table dropped");
            } else {
                let rows = state.table_mut(table)?.drop_type(type_name)?;
                debug!(table = %table, type_name = %type_name, rows, "type dropped");
            }
            Ok(())
        }
        UpgradeOperation::RenameType { table, from, to } => state.rename_type(table, from, to),
        UpgradeOperation::SetParent {
            table,
            type_name,
            parent,
        } => state.table_mut(table)?.set_parent(type_name, parent),
        UpgradeOperation::AddField { table, column } => state.table_mut(table)?.add_column(column.clone()),
        UpgradeOperation::DropField { table, column } => state.table_mut(table)?.drop_column(column),
        UpgradeOperation::RenameField { table, from, to } => state.table_mut(table)?.rename_column(from, to),
        UpgradeOperation::RetypeField { table, column } => state.table_mut(table)?.retype_column(column),
        UpgradeOperation::CreateIndex { table, index } => state.table_mut(table)?.create_index(index.clone()),
        UpgradeOperation::DropIndex { table, name } => state.table_mut(table)?.drop_index(name),
        UpgradeOperation::RebuildFullText { table } => {
            state.table_mut(table)?.rebuild_full_text();
            Ok(())
        }
        UpgradeOperation::CopyData { .. } => Err(DbError::ExecutionError(
            "data copies are not schema operations".to_string(),
        )),
    }
}
