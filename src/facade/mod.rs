// ============================================================================
// Upgrader
// ============================================================================
//
// One-call model upgrade of a store part: snapshot, compare, plan, capture
// verification samples, execute, verify. `plan` stops after planning and
// never touches the store.
//
// ============================================================================

use std::fmt;

use tracing::{info, info_span, warn};

use crate::config::UpgradeConfig;
use crate::core::{DbError, Result};
use crate::diff::{Comparer, RenameHints};
use crate::executor::{NoopObserver, UpgradeExecutor, UpgradeHandle, UpgradeObserver, UpgradeResult};
use crate::model::Model;
use crate::plan::{PlanBuilder, UpgradePlan};
use crate::snapshot::SnapshotLoader;
use crate::storage::Store;
use crate::verify::{VerificationReport, Verifier};

/// Everything an upgrade produced.
#[derive(Debug, Clone)]
pub struct UpgradeOutcome {
    pub plan: UpgradePlan,
    pub result: UpgradeResult,
    pub report: VerificationReport,
}

impl UpgradeOutcome {
    /// Fails with [`DbError::Verification`] when sampled rows did not survive intact.
    pub fn into_result(self) -> Result<Self> {
        if self.report.is_ok() {
            Ok(self)
        } else {
            Err(DbError::Verification(self.report.failures))
        }
    }
}

impl fmt::Display for UpgradeOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.result)?;
        write!(f, "{}", self.report)
    }
}

pub struct Upgrader<'a> {
    store: &'a Store,
    config: UpgradeConfig,
    hints: RenameHints,
    observer: &'a dyn UpgradeObserver,
    handle: UpgradeHandle,
}

impl<'a> Upgrader<'a> {
    pub fn new(store: &'a Store) -> Self {
        Self {
            store,
            config: UpgradeConfig::default(),
            hints: RenameHints::default(),
            observer: &NoopObserver,
            handle: UpgradeHandle::new(),
        }
    }

    pub fn with_config(mut self, config: UpgradeConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_hints(mut self, hints: RenameHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn with_observer(mut self, observer: &'a dyn UpgradeObserver) -> Self {
        self.observer = observer;
        self
    }

    pub fn config(&self) -> &UpgradeConfig {
        &self.config
    }

    /// Handle of the next upgrade; cancelling it before execution starts aborts it.
    pub fn handle(&self) -> UpgradeHandle {
        self.handle.clone()
    }

    /// Dry run: the plan that would turn the deployed part into `model`.
    pub fn plan(&self, model: &Model) -> Result<UpgradePlan> {
        self.config.validate()?;
        let deployed = SnapshotLoader::from_store(self.store, model.name())?;
        let diff = Comparer::new(&self.config)
            .with_hints(self.hints.clone())
            .compare(&deployed, model)?;
        PlanBuilder::new(&self.config).build(&diff)
    }

    /// Upgrades the part named after `model` and verifies the surviving rows.
    ///
    /// A plan that fails to apply leaves the part untouched. Verification runs
    /// after commit, so its failures are reported but never undone.
    pub fn upgrade(&self, model: &Model) -> Result<UpgradeOutcome> {
        let span = info_span!("model_upgrade", part = %model.name());
        let _guard = span.enter();

        let plan = self.plan(model)?;
        let verifier = Verifier::new(&self.config);
        let samples = verifier.capture(self.store, &plan)?;

        let result = UpgradeExecutor::new(self.store, &self.config)
            .with_observer(self.observer)
            .with_handle(self.handle.clone())
            .execute(&plan)?;

        let report = verifier.verify(self.store, &samples)?;
        if report.is_ok() {
            info!(operations = plan.len(), rows = report.rows_checked, "model upgraded");
        } else {
            warn!(failures = report.failures.len(), "upgraded part failed verification");
        }
        UpgradeOutcome { plan, result, report }.into_result()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{DataType, Value};
    use crate::model::{EntitySpec, FieldSpec};
    use crate::storage::Entity;

    fn shop(price: DataType) -> Model {
        Model::builder("Shop")
            .entity(
                EntitySpec::root("Product")
                    .field(FieldSpec::key("Id", DataType::Int64))
                    .field(FieldSpec::new("Name", DataType::String))
                    .field(FieldSpec::new("Price", price)),
            )
            .build()
            .unwrap()
    }

    #[test]
    fn test_dry_run_leaves_store_alone() {
        let store = Store::new();
        let plan = Upgrader::new(&store).plan(&shop(DataType::Float32)).unwrap();
        assert!(!plan.is_empty());
        assert!(store.catalog("Shop").unwrap().is_empty());
    }

    #[test]
    fn test_upgrade_deploys_then_widens() {
        let store = Store::new();
        let upgrader = Upgrader::new(&store);
        upgrader.upgrade(&shop(DataType::Float32)).unwrap();
        store
            .insert(
                "Shop",
                &Entity::new("Product").with("Id", 1i64).with("Name", "Lamp").with("Price", 19.5f32),
            )
            .unwrap();

        let outcome = Upgrader::new(&store).upgrade(&shop(DataType::Float64)).unwrap();
        assert_eq!(outcome.report.rows_checked, 1);
        assert!(outcome.result.preserved());
        let lamp = store.get("Shop", "Product", &Value::Integer(1)).unwrap().unwrap();
        assert_eq!(lamp.get("Price"), Some(&Value::Float(19.5)));

        let again = Upgrader::new(&store).plan(&shop(DataType::Float64)).unwrap();
        assert!(again.is_empty());
    }

    #[test]
    fn test_invalid_config_is_rejected() {
        let store = Store::new();
        let config = UpgradeConfig::default().copy_workers(0);
        let err = Upgrader::new(&store)
            .with_config(config)
            .plan(&shop(DataType::Float32))
            .unwrap_err();
        assert!(matches!(err, DbError::InvalidConfig(_)));
    }
}
