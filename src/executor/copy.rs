// ============================================================================
// Data Copy
// ============================================================================
//
// CopyData runs in two steps. Rows are gathered from a shared view of the
// staging part and converted to the target column types, then written into the
// target table chunk by chunk. Copies into distinct tables gather and write on
// separate scoped threads; a single table is only ever written by one thread.
//
// ============================================================================

use std::thread;

use tracing::debug;

use crate::core::{DbError, Result, RowKey, Value};
use crate::plan::{FieldMapping, UpgradeOperation};
use crate::storage::{PartState, StoredRow, Table, TableSchema};

/// Row writes produced by one copy operation, split into chunks.
#[derive(Debug)]
pub(crate) enum CopyBatch {
    Insert(Vec<Vec<StoredRow>>),
    Update(Vec<Vec<(RowKey, StoredRow)>>),
}

impl CopyBatch {
    fn rows(&self) -> usize {
        match self {
            Self::Insert(chunks) => chunks.iter().map(Vec::len).sum(),
            Self::Update(chunks) => chunks.iter().map(Vec::len).sum(),
        }
    }
}

struct CopySpec<'a> {
    source_table: &'a str,
    source_type: &'a str,
    target_table: &'a str,
    target_type: &'a str,
    mapping: &'a [FieldMapping],
    include_descendants: bool,
}

impl<'a> CopySpec<'a> {
    fn of(op: &'a UpgradeOperation) -> Result<Self> {
        match op {
            UpgradeOperation::CopyData {
                source_table,
                source_type,
                target_table,
                target_type,
                mapping,
                include_descendants,
            } => Ok(Self {
                source_table,
                source_type,
                target_table,
                target_type,
                mapping,
                include_descendants: *include_descendants,
            }),
            other => Err(DbError::ExecutionError(format!("{} is not a data copy", other.kind()))),
        }
    }
}

/// Resolved `(source position, target position)` pairs of a mapping.
fn resolve(source: &TableSchema, target: &TableSchema, mapping: &[FieldMapping]) -> Result<Vec<(usize, usize)>> {
    mapping
        .iter()
        .map(|m| {
            let from = source
                .find_column_index(&m.source)
                .ok_or_else(|| DbError::ColumnNotFound(m.source.clone(), source.name().to_string()))?;
            let to = target
                .find_column_index(&m.target)
                .ok_or_else(|| DbError::ColumnNotFound(m.target.clone(), target.name().to_string()))?;
            Ok((from, to))
        })
        .collect()
}

/// Reads and converts the rows a copy writes.
pub(crate) fn gather(state: &PartState, op: &UpgradeOperation, chunk_size: usize) -> Result<CopyBatch> {
    let spec = CopySpec::of(op)?;
    let chunk_size = chunk_size.max(1);
    let source = state.table(spec.source_table)?;
    let target = state.table(spec.target_table)?;
    let positions = resolve(source.schema(), target.schema(), spec.mapping)?;
    let columns = target.schema().columns();
    let rows = source.rows_of(spec.source_type, spec.include_descendants);

    if spec.source_table == spec.target_table {
        let mut chunks: Vec<Vec<(RowKey, StoredRow)>> = Vec::new();
        let mut current = Vec::with_capacity(chunk_size);
        for (key, row) in rows {
            let mut updated = row.clone();
            for (from, to) in &positions {
                updated.values[*to] = columns[*to].data_type.convert(&row.values[*from])?;
            }
            current.push((key.clone(), updated));
            if current.len() == chunk_size {
                chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
            }
        }
        if !current.is_empty() {
            chunks.push(current);
        }
        return Ok(CopyBatch::Update(chunks));
    }

    let visible = target.schema().columns_of(spec.target_type);
    let template: Vec<Value> = columns
        .iter()
        .enumerate()
        .map(|(idx, column)| {
            if visible.contains(&idx) {
                column.fill_value()
            } else {
                Value::Null
            }
        })
        .collect();

    let mut chunks: Vec<Vec<StoredRow>> = Vec::new();
    let mut current = Vec::with_capacity(chunk_size);
    for (_, row) in rows {
        let mut values = template.clone();
        for (from, to) in &positions {
            values[*to] = columns[*to].data_type.convert(&row.values[*from])?;
        }
        current.push(StoredRow {
            type_name: spec.target_type.to_string(),
            values,
        });
        if current.len() == chunk_size {
            chunks.push(std::mem::replace(&mut current, Vec::with_capacity(chunk_size)));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    Ok(CopyBatch::Insert(chunks))
}

/// Writes gathered rows; the first failing chunk aborts the copy.
pub(crate) fn write(target: &mut Table, batch: CopyBatch) -> Result<()> {
    let total = batch.rows();
    match batch {
        CopyBatch::Insert(chunks) => {
            for (idx, chunk) in chunks.into_iter().enumerate() {
                let rows = chunk.len();
                for row in chunk {
                    target.insert(row)?;
                }
                debug!(table = target.name(), chunk = idx, rows, "chunk inserted");
            }
        }
        CopyBatch::Update(chunks) => {
            for (idx, chunk) in chunks.into_iter().enumerate() {
                let rows = chunk.len();
                for (key, row) in chunk {
                    target.replace(&key, row)?;
                }
                debug!(table = target.name(), chunk = idx, rows, "chunk updated");
            }
        }
    }
    debug!(table = target.name(), rows = total, "copy written");
    Ok(())
}

/// Runs one copy against the staging part.
pub(crate) fn copy(state: &mut PartState, op: &UpgradeOperation, chunk_size: usize) -> Result<()> {
    let batch = gather(state, op, chunk_size)?;
    write(state.table_mut(op.table())?, batch)
}

/// Copies whose targets are pairwise distinct and never read by another member.
pub(crate) fn independent(ops: &[UpgradeOperation]) -> usize {
    let mut targets: Vec<&str> = Vec::new();
    let mut sources: Vec<&str> = Vec::new();
    for (count, op) in ops.iter().enumerate() {
        let Ok(spec) = CopySpec::of(op) else {
            return count;
        };
        let clashes = targets.contains(&spec.target_table)
            || targets.contains(&spec.source_table)
            || (sources.contains(&spec.target_table));
        if clashes {
            return count;
        }
        targets.push(spec.target_table);
        sources.push(spec.source_table);
    }
    ops.len()
}

/// Runs a group of independent copies on up to `workers` threads.
///
/// Returns the position inside `ops` and the error of the first failing copy.
pub(crate) fn copy_group(
    state: &mut PartState,
    ops: &[UpgradeOperation],
    chunk_size: usize,
    workers: usize,
) -> std::result::Result<(), (usize, DbError)> {
    let workers = workers.max(1);
    if ops.len() == 1 || workers == 1 {
        for (pos, op) in ops.iter().enumerate() {
            copy(state, op, chunk_size).map_err(|err| (pos, err))?;
        }
        return Ok(());
    }

    for (batch_no, batch) in ops.chunks(workers).enumerate() {
        let offset = batch_no * workers;

        let shared: &PartState = state;
        let gathered: Vec<Result<CopyBatch>> = thread::scope(|scope| {
            let handles: Vec<_> = batch
                .iter()
                .map(|op| scope.spawn(move || gather(shared, op, chunk_size)))
                .collect();
            handles
                .into_iter()
                .map(|handle| {
                    handle
                        .join()
                        .unwrap_or_else(|_| Err(DbError::ExecutionError("copy worker panicked".to_string())))
                })
                .collect()
        });

        let mut work = Vec::with_capacity(batch.len());
        for (pos, (op, result)) in batch.iter().zip(gathered).enumerate() {
            let batch = result.map_err(|err| (offset + pos, err))?;
            let table = state.take_table(op.table()).map_err(|err| (offset + pos, err))?;
            work.push((offset + pos, table, batch));
        }

        let written: Vec<(usize, Table, Result<()>)> = thread::scope(|scope| {
            let handles: Vec<_> = work
                .into_iter()
                .map(|(pos, mut table, batch)| {
                    scope.spawn(move || {
                        let result = write(&mut table, batch);
                        (pos, table, result)
                    })
                })
                .collect();
            handles
                .into_iter()
                .filter_map(|handle| handle.join().ok())
                .collect()
        });

        let expected = batch.len();
        let mut failure = None;
        let returned = written.len();
        for (pos, table, result) in written {
            state.put_table(table);
            if let Err(err) = result
                && failure.as_ref().is_none_or(|(first, _)| pos < *first)
            {
                failure = Some((pos, err));
            }
        }
        if let Some(failure) = failure {
            return Err(failure);
        }
        if returned != expected {
            return Err((offset, DbError::ExecutionError("copy worker panicked".to_string())));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ColumnDef, DataType};

    fn state() -> PartState {
        let mut state = PartState::default();
        let mut animal = TableSchema::new_root("Animal", ColumnDef::new("Id", DataType::Int64, "Animal").key());
        animal.add_column(ColumnDef::new("Age", DataType::String, "Animal")).unwrap();
        state.create_table(animal).unwrap();
        let mut pet = TableSchema::new_root("Pet", ColumnDef::new("PetId", DataType::Int64, "Pet").key());
        pet.add_column(ColumnDef::new("Years", DataType::Int32, "Pet")).unwrap();
        pet.add_column(ColumnDef::new("Tame", DataType::Boolean, "Pet").not_null()).unwrap();
        state.create_table(pet).unwrap();
        for id in 0..5 {
            state
                .table_mut("Animal")
                .unwrap()
                .insert(StoredRow {
                    type_name: "Animal".into(),
                    values: vec![Value::Integer(id), Value::Text(format!("{}", id + 1))],
                })
                .unwrap();
        }
        state
    }

    fn to_pet() -> UpgradeOperation {
        UpgradeOperation::CopyData {
            source_table: "Animal".into(),
            source_type: "Animal".into(),
            target_table: "Pet".into(),
            target_type: "Pet".into(),
            mapping: vec![FieldMapping::new("Id", "PetId"), FieldMapping::new("Age", "Years")],
            include_descendants: false,
        }
    }

    #[test]
    fn test_cross_table_copy_converts_and_fills() {
        let mut state = state();
        copy(&mut state, &to_pet(), 2).unwrap();
        let pet = state.table("Pet").unwrap();
        assert_eq!(pet.row_count(), 5);
        let row = pet.get(&RowKey::Int(3)).unwrap();
        assert_eq!(row.values, vec![Value::Integer(3), Value::Integer(4), Value::Boolean(false)]);
    }

    #[test]
    fn test_gather_chunks_rows() {
        let state = state();
        let CopyBatch::Insert(chunks) = gather(&state, &to_pet(), 2).unwrap() else {
            panic!("expected inserts");
        };
        assert_eq!(chunks.iter().map(Vec::len).collect::<Vec<_>>(), vec![2, 2, 1]);
    }

    #[test]
    fn test_failed_conversion_aborts() {
        let mut state = state();
        state
            .table_mut("Animal")
            .unwrap()
            .insert(StoredRow {
                type_name: "Animal".into(),
                values: vec![Value::Integer(9), Value::Text("old".into())],
            })
            .unwrap();
        assert!(copy(&mut state, &to_pet(), 2).is_err());
    }

    fn with_stray(mut state: PartState) -> PartState {
        let mut stray = TableSchema::new_root("Stray", ColumnDef::new("StrayId", DataType::Int64, "Stray").key());
        stray.add_column(ColumnDef::new("Years", DataType::Int32, "Stray")).unwrap();
        state.create_table(stray).unwrap();
        state
    }

    fn to_stray() -> UpgradeOperation {
        UpgradeOperation::CopyData {
            source_table: "Animal".into(),
            source_type: "Animal".into(),
            target_table: "Stray".into(),
            target_type: "Stray".into(),
            mapping: vec![FieldMapping::new("Id", "StrayId"), FieldMapping::new("Age", "Years")],
            include_descendants: false,
        }
    }

    #[test]
    fn test_group_copies_on_workers() {
        let mut state = with_stray(state());
        let ops = [to_pet(), to_stray()];
        assert_eq!(independent(&ops), 2);
        copy_group(&mut state, &ops, 2, 2).unwrap();
        assert_eq!(state.table("Pet").unwrap().row_count(), 5);
        let stray = state.table("Stray").unwrap();
        assert_eq!(stray.row_count(), 5);
        assert_eq!(stray.get(&RowKey::Int(4)).unwrap().values, vec![Value::Integer(4), Value::Integer(5)]);
    }

    #[test]
    fn test_group_reports_failing_member_and_keeps_tables() {
        let mut state = with_stray(state());
        state
            .table_mut("Stray")
            .unwrap()
            .insert(StoredRow {
                type_name: "Stray".into(),
                values: vec![Value::Integer(2), Value::Null],
            })
            .unwrap();
        let (pos, err) = copy_group(&mut state, &[to_pet(), to_stray()], 2, 2).unwrap_err();
        assert_eq!(pos, 1);
        assert!(matches!(err, DbError::ConstraintViolation(_)), "{err}");
        // Both tables are handed back to the staging part.
        assert!(state.table("Pet").is_ok());
        assert!(state.table("Stray").is_ok());
    }

    #[test]
    fn test_group_gather_failure_names_first_member() {
        let mut state = with_stray(state());
        state
            .table_mut("Animal")
            .unwrap()
            .insert(StoredRow {
                type_name: "Animal".into(),
                values: vec![Value::Integer(9), Value::Text("old".into())],
            })
            .unwrap();
        let (pos, _) = copy_group(&mut state, &[to_pet(), to_stray()], 2, 2).unwrap_err();
        assert_eq!(pos, 0);
        assert_eq!(state.table("Pet").unwrap().row_count(), 0);
    }

    #[test]
    fn test_independent_copies() {
        let in_place = UpgradeOperation::CopyData {
            source_table: "Animal".into(),
            source_type: "Animal".into(),
            target_table: "Animal".into(),
            target_type: "Animal".into(),
            mapping: vec![FieldMapping::new("Age", "Age")],
            include_descendants: true,
        };
        assert_eq!(independent(&[to_pet(), to_pet()]), 1);
        assert_eq!(independent(&[to_pet(), in_place.clone()]), 1);
        assert_eq!(independent(&[in_place, UpgradeOperation::RebuildFullText { table: "Pet".into() }]), 1);
    }
}
