mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{PART, dump, zoo_hints, zoo_store, zoo_v1, zoo_v2};
use modelshift::{DbError, Result, Store, UpgradeObserver, UpgradeOperation, UpgradeState, Upgrader};

/// Fails the upgrade right before operation `index` is applied.
struct FailBefore {
    index: usize,
    calls: AtomicUsize,
}

impl FailBefore {
    fn new(index: usize) -> Self {
        Self {
            index,
            calls: AtomicUsize::new(0),
        }
    }
}

impl UpgradeObserver for FailBefore {
    fn before_apply(&self, index: usize, _op: &UpgradeOperation) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if index == self.index {
            return Err(DbError::ExecutionError(format!("injected failure at #{index}")));
        }
        Ok(())
    }
}

#[test]
fn test_failure_at_every_operation_leaves_store_unchanged() -> anyhow::Result<()> {
    let store = zoo_store();
    let catalog_before = store.catalog(PART)?;
    let rows_before = dump(&store, &zoo_v1());

    let plan = Upgrader::new(&store).with_hints(zoo_hints()).plan(&zoo_v2())?;
    assert!(plan.len() > 10, "{}", plan);

    for index in 0..plan.len() {
        let observer = FailBefore::new(index);
        let upgrader = Upgrader::new(&store).with_hints(zoo_hints()).with_observer(&observer);
        let handle = upgrader.handle();
        let err = upgrader.upgrade(&zoo_v2()).unwrap_err();

        let DbError::Execution { index: failed, .. } = err else {
            panic!("expected an execution error at #{index}, got {err}");
        };
        assert_eq!(failed, index);
        assert_eq!(handle.state(), UpgradeState::RolledBack);
        assert_eq!(store.catalog(PART)?, catalog_before, "catalog changed after failure at #{index}");
        assert_eq!(dump(&store, &zoo_v1()), rows_before, "rows changed after failure at #{index}");
    }

    let outcome = Upgrader::new(&store).with_hints(zoo_hints()).upgrade(&zoo_v2())?;
    assert_eq!(outcome.result.state, UpgradeState::Committed);
    assert_eq!(outcome.result.operations, plan.len());
    Ok(())
}

#[test]
fn test_cancelled_upgrade_never_starts() -> anyhow::Result<()> {
    let store = zoo_store();
    let catalog_before = store.catalog(PART)?;
    let upgrader = Upgrader::new(&store).with_hints(zoo_hints());
    upgrader.handle().cancel()?;

    assert!(matches!(upgrader.upgrade(&zoo_v2()), Err(DbError::Cancelled)));
    assert_eq!(store.catalog(PART)?, catalog_before);
    Ok(())
}

#[test]
fn test_unconvertible_value_rolls_back() -> anyhow::Result<()> {
    let store = zoo_store();
    store.insert(
        PART,
        &modelshift::Entity::new("Animal")
            .with("Id", 20i64)
            .with("Name", "Ancient")
            .with("Age", 5_000_000_000i64),
    )?;
    let rows_before = dump(&store, &zoo_v1());

    let err = Upgrader::new(&store).with_hints(zoo_hints()).upgrade(&zoo_v2()).unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }), "{err}");
    assert_eq!(dump(&store, &zoo_v1()), rows_before);
    Ok(())
}

#[test]
fn test_failed_first_deploy_leaves_no_part() -> anyhow::Result<()> {
    let store = Store::new();
    let observer = FailBefore::new(1);
    let err = Upgrader::new(&store).with_observer(&observer).upgrade(&zoo_v1()).unwrap_err();
    assert!(matches!(err, DbError::Execution { index: 1, .. }), "{err}");
    assert!(store.part_names()?.is_empty());

    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("empty.store");
    store.save(&path)?;
    assert!(Store::open(&path)?.part_names()?.is_empty());

    // A part that existed before keeps its registration after a rollback.
    let store = zoo_store();
    let observer = FailBefore::new(0);
    Upgrader::new(&store)
        .with_hints(zoo_hints())
        .with_observer(&observer)
        .upgrade(&zoo_v2())
        .unwrap_err();
    assert_eq!(store.part_names()?, vec![PART.to_string()]);
    Ok(())
}
