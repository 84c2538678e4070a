// ============================================================================
// Upgrade Executor
// ============================================================================
//
// Applies a plan to one part of a store.
//
// The part's write lock is held for the whole run. Operations are applied to a
// staging clone of the part (tables are shared copy-on-write, so only the
// tables an operation writes are actually copied) and the staging clone
// replaces the live part only after the last operation and the final
// reference check succeed. Any failure drops the staging clone, so readers
// only ever see the part before or after the whole plan.
//
// ============================================================================

mod apply;
mod copy;
mod result;
mod state;

use tracing::{debug, info, info_span, warn};

use crate::config::UpgradeConfig;
use crate::core::{DbError, Result};
use crate::plan::{UpgradeOperation, UpgradePlan};
use crate::storage::{PartState, Store};

pub use result::{TypeCounts, UpgradeResult};
pub use state::{UpgradeHandle, UpgradeState};

/// Hook invoked around plan execution.
pub trait UpgradeObserver {
    /// Called before operation `index` is applied; an error aborts the upgrade.
    fn before_apply(&self, _index: usize, _op: &UpgradeOperation) -> Result<()> {
        Ok(())
    }

    fn finished(&self, _state: UpgradeState) {}
}

/// Observer that does nothing.
pub struct NoopObserver;

impl UpgradeObserver for NoopObserver {}

pub struct UpgradeExecutor<'a> {
    store: &'a Store,
    config: &'a UpgradeConfig,
    observer: &'a dyn UpgradeObserver,
    handle: UpgradeHandle,
}

impl<'a> UpgradeExecutor<'a> {
    pub fn new(store: &'a Store, config: &'a UpgradeConfig) -> Self {
        Self {
            store,
            config,
            observer: &NoopObserver,
            handle: UpgradeHandle::new(),
        }
    }

    pub fn with_observer(mut self, observer: &'a dyn UpgradeObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn with_handle(mut self, handle: UpgradeHandle) -> Self {
        self.handle = handle;
        self
    }

    /// Handle for watching or cancelling this execution from elsewhere.
    pub fn handle(&self) -> UpgradeHandle {
        self.handle.clone()
    }

    pub fn execute(&self, plan: &UpgradePlan) -> Result<UpgradeResult> {
        self.handle.begin()?;
        let span = info_span!("upgrade", plan = %plan.id, part = %plan.part);
        let _guard = span.enter();

        let created = match self.store.part(&plan.part) {
            Ok(existing) => existing.is_none(),
            Err(err) => return Err(self.abort(0, "acquire part", err)),
        };
        let part = match self.store.ensure_part(&plan.part) {
            Ok(part) => part,
            Err(err) => return Err(self.abort(0, "acquire part", err)),
        };
        let mut live = match part.write() {
            Ok(live) => live,
            Err(err) => return Err(self.abort(0, "acquire part", err.into())),
        };

        let before: Vec<(usize, String)> = plan.tracked.iter().map(|t| result::before(&live, t)).collect();
        let mut staging: PartState = live.clone();

        info!(operations = plan.operations.len(), "applying upgrade plan");
        if let Err((index, err)) = self.apply_all(&mut staging, &plan.operations) {
            let operation = plan
                .operations
                .get(index)
                .map(ToString::to_string)
                .unwrap_or_default();
            drop(live);
            self.forget_part(created, &plan.part);
            return Err(self.abort(index, &operation, err));
        }
        if let Err(err) = check_references(&staging) {
            drop(live);
            self.forget_part(created, &plan.part);
            return Err(self.abort(plan.operations.len(), "reference check", err));
        }

        let types = plan
            .tracked
            .iter()
            .zip(before)
            .map(|(tracked, (rows_before, hash_before))| {
                let (rows_after, hash_after) = result::after(&staging, tracked);
                TypeCounts {
                    old_name: tracked.old_name.clone(),
                    type_name: tracked.new_name.clone(),
                    rows_before,
                    rows_after,
                    hash_before,
                    hash_after,
                }
            })
            .collect();

        *live = staging;
        drop(live);
        self.handle.finish(true)?;
        self.observer.finished(UpgradeState::Committed);
        info!("upgrade committed");

        Ok(UpgradeResult {
            plan_id: plan.id,
            part: plan.part.clone(),
            state: UpgradeState::Committed,
            operations: plan.operations.len(),
            types,
        })
    }

    fn apply_all(
        &self,
        staging: &mut PartState,
        ops: &[UpgradeOperation],
    ) -> std::result::Result<(), (usize, DbError)> {
        let mut index = 0;
        while index < ops.len() {
            let op = &ops[index];
            if !op.is_copy() {
                self.observer.before_apply(index, op).map_err(|err| (index, err))?;
                debug!(index, op = %op, "applying");
                apply::apply_schema(staging, op).map_err(|err| (index, err))?;
                index += 1;
                continue;
            }

            let group = copy::independent(&ops[index..]).max(1);
            for offset in 0..group {
                let member = index + offset;
                self.observer
                    .before_apply(member, &ops[member])
                    .map_err(|err| (member, err))?;
                debug!(index = member, op = %ops[member], "copying");
            }
            copy::copy_group(
                staging,
                &ops[index..index + group],
                self.config.copy_chunk_size,
                self.config.copy_workers,
            )
            .map_err(|(offset, err)| (index + offset, err))?;
            index += group;
        }
        Ok(())
    }

    /// A part registered by a failed first deploy is removed again.
    fn forget_part(&self, created: bool, part: &str) {
        if !created {
            return;
        }
        match self.store.remove_empty_part(part) {
            Ok(removed) => debug!(part, removed, "released part of failed deploy"),
            Err(err) => warn!(part, error = %err, "could not release part of failed deploy"),
        }
    }

    fn abort(&self, index: usize, operation: &str, source: DbError) -> DbError {
        if let Err(err) = self.handle.finish(false) {
            warn!(error = %err, "upgrade state was not applying");
        }
        self.observer.finished(UpgradeState::RolledBack);
        warn!(index, operation, error = %source, "upgrade rolled back");
        DbError::Execution {
            index,
            operation: operation.to_string(),
            source: Box::new(source),
        }
    }
}

/// Every non-null reference in the part resolves to a stored row of its target type.
fn check_references(state: &PartState) -> Result<()> {
    for table in state.tables() {
        let schema = table.schema();
        if !schema.columns().iter().any(|column| column.references.is_some()) {
            continue;
        }
        for (_, row) in table.rows() {
            state.check_references(schema, row)?;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    use uuid::Uuid;

    use crate::core::{ColumnDef, DataType, Value};
    use crate::plan::FieldMapping;
    use crate::storage::Entity;

    fn plan(operations: Vec<UpgradeOperation>) -> UpgradePlan {
        UpgradePlan {
            id: Uuid::new_v4(),
            part: "Zoo".into(),
            operations,
            tracked: Vec::new(),
        }
    }

    fn create_animal() -> Vec<UpgradeOperation> {
        vec![
            UpgradeOperation::CreateType {
                table: "Animal".into(),
                type_name: "Animal".into(),
                parent: None,
                key: Some(ColumnDef::new("Id", DataType::Int64, "Animal").key()),
            },
            UpgradeOperation::AddField {
                table: "Animal".into(),
                column: ColumnDef::new("Name", DataType::String, "Animal"),
            },
        ]
    }

    struct FailAt {
        index: usize,
        seen: Cell<usize>,
    }

    impl UpgradeObserver for FailAt {
        fn before_apply(&self, index: usize, _op: &UpgradeOperation) -> Result<()> {
            self.seen.set(self.seen.get() + 1);
            if index == self.index {
                return Err(DbError::ExecutionError("injected".into()));
            }
            Ok(())
        }
    }

    #[test]
    fn test_execute_commits() {
        let store = Store::new();
        let config = UpgradeConfig::default();
        let result = UpgradeExecutor::new(&store, &config)
            .execute(&plan(create_animal()))
            .unwrap();
        assert_eq!(result.state, UpgradeState::Committed);
        store
            .insert("Zoo", &Entity::new("Animal").with("Id", 1i64).with("Name", "Rex"))
            .unwrap();
        assert_eq!(store.count("Zoo", "Animal").unwrap(), 1);
    }

    #[test]
    fn test_failure_leaves_part_untouched() {
        let store = Store::new();
        let config = UpgradeConfig::default();
        UpgradeExecutor::new(&store, &config).execute(&plan(create_animal())).unwrap();
        store
            .insert("Zoo", &Entity::new("Animal").with("Id", 1i64).with("Name", "Rex"))
            .unwrap();
        let before = store.catalog("Zoo").unwrap();

        let ops = vec![
            UpgradeOperation::RenameField {
                table: "Animal".into(),
                from: "Name".into(),
                to: "Title".into(),
            },
            UpgradeOperation::DropField {
                table: "Animal".into(),
                column: "Missing".into(),
            },
        ];
        let executor = UpgradeExecutor::new(&store, &config);
        let handle = executor.handle();
        let err = executor.execute(&plan(ops)).unwrap_err();
        let DbError::Execution { index, .. } = err else {
            panic!("expected execution error, got {err}");
        };
        assert_eq!(index, 1);
        assert_eq!(handle.state(), UpgradeState::RolledBack);
        assert_eq!(store.catalog("Zoo").unwrap(), before);
    }

    #[test]
    fn test_observer_failure_rolls_back() {
        let store = Store::new();
        let config = UpgradeConfig::default();
        let observer = FailAt {
            index: 1,
            seen: Cell::new(0),
        };
        let err = UpgradeExecutor::new(&store, &config)
            .with_observer(&observer)
            .execute(&plan(create_animal()))
            .unwrap_err();
        assert!(matches!(err, DbError::Execution { index: 1, .. }));
        assert_eq!(observer.seen.get(), 2);
        assert!(store.catalog("Zoo").unwrap().is_empty());
    }

    #[test]
    fn test_cancelled_before_start() {
        let store = Store::new();
        let config = UpgradeConfig::default();
        let executor = UpgradeExecutor::new(&store, &config);
        executor.handle().cancel().unwrap();
        assert!(matches!(executor.execute(&plan(create_animal())), Err(DbError::Cancelled)));
        assert!(store.part("Zoo").unwrap().is_none());
    }

    #[test]
    fn test_dangling_reference_rolls_back() {
        let store = Store::new();
        let config = UpgradeConfig::default();
        let mut ops = create_animal();
        ops.push(UpgradeOperation::CreateType {
            table: "Owner".into(),
            type_name: "Owner".into(),
            parent: None,
            key: Some(ColumnDef::new("OwnerId", DataType::Int64, "Owner").key()),
        });
        UpgradeExecutor::new(&store, &config).execute(&plan(ops)).unwrap();
        store
            .insert("Zoo", &Entity::new("Animal").with("Id", 7i64).with("Name", "Rex"))
            .unwrap();

        // Retargeting Name into a reference leaves a value that points nowhere.
        let retarget = vec![
            UpgradeOperation::AddField {
                table: "Animal".into(),
                column: ColumnDef::new("Keeper", DataType::Reference, "Animal").references("Owner"),
            },
            UpgradeOperation::CopyData {
                source_table: "Animal".into(),
                source_type: "Animal".into(),
                target_table: "Animal".into(),
                target_type: "Animal".into(),
                mapping: vec![FieldMapping::new("Id", "Keeper")],
                include_descendants: true,
            },
        ];
        let err = UpgradeExecutor::new(&store, &config).execute(&plan(retarget)).unwrap_err();
        assert!(matches!(err, DbError::Execution { index: 2, .. }), "{err}");
        let rex = store.get("Zoo", "Animal", &Value::Integer(7)).unwrap().unwrap();
        assert!(rex.get("Keeper").is_none());
    }
}
