// ============================================================================
// modelshift Library
// ============================================================================
//
// Schema evolution for table-per-hierarchy entity stores: compares the model
// deployed in a store part with a newly declared one, plans the upgrade and
// applies it atomically without losing rows.
//
// ============================================================================

//! ```
//! use modelshift::{DataType, EntitySpec, FieldSpec, Model, Store, Upgrader};
//!
//! # fn main() -> modelshift::Result<()> {
//! let store = Store::new();
//! let model = Model::builder("Shop")
//!     .entity(
//!         EntitySpec::root("Product")
//!             .field(FieldSpec::key("Id", DataType::Int64))
//!             .field(FieldSpec::new("Name", DataType::String)),
//!     )
//!     .build()?;
//!
//! let plan = Upgrader::new(&store).plan(&model)?;
//! println!("{}", plan);
//! Upgrader::new(&store).upgrade(&model)?;
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod core;
pub mod diff;
pub mod executor;
pub mod facade;
pub mod fixtures;
pub mod model;
pub mod plan;
pub mod snapshot;
pub mod storage;
pub mod verify;

// Re-export main types for convenience
pub use config::UpgradeConfig;
pub use core::{DataType, DbError, Result, Value, VerificationFailure};
pub use diff::{Comparer, ModelDiff, RenameHints, SchemaChange};
pub use executor::{UpgradeExecutor, UpgradeHandle, UpgradeObserver, UpgradeResult, UpgradeState};
pub use facade::{UpgradeOutcome, Upgrader};
pub use fixtures::{ChainFixture, ChainLayout};
pub use model::{EntitySpec, FieldSpec, IndexSpec, Model, ModelDocument};
pub use plan::{PlanBuilder, UpgradeOperation, UpgradePlan};
pub use snapshot::SnapshotLoader;
pub use storage::{Entity, PartCatalog, Store, StoreSnapshot};
pub use verify::{VerificationReport, Verifier};
