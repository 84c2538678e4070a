// ============================================================================
// Upgrade Plans
// ============================================================================
//
// An upgrade plan is the ordered list of operations turning the deployed
// schema of one part into a newly declared model, plus the list of types whose
// rows survive the upgrade and must be checked afterwards.
//
// ============================================================================

mod builder;
mod operation;

use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::{DataType, Result};

pub use builder::{PlanBuilder, deployed_catalog};
pub use operation::{FieldMapping, UpgradeOperation};

/// Field whose values survive an upgrade.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedField {
    /// Column name before the upgrade.
    pub old: String,
    /// Column name after the upgrade.
    pub new: String,
    /// Type after the upgrade.
    pub data_type: DataType,
    /// Values are converted to another type on the way.
    pub converted: bool,
    #[serde(default)]
    pub key: bool,
}

/// Type whose rows survive an upgrade, possibly renamed or moved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackedType {
    pub old_name: String,
    pub new_name: String,
    pub fields: Vec<TrackedField>,
}

impl TrackedType {
    pub fn field_by_old(&self, old: &str) -> Option<&TrackedField> {
        self.fields.iter().find(|field| field.old == old)
    }

    pub fn key_field(&self) -> Option<&TrackedField> {
        self.fields.iter().find(|field| field.key)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradePlan {
    pub id: Uuid,
    pub part: String,
    pub operations: Vec<UpgradeOperation>,
    #[serde(default)]
    pub tracked: Vec<TrackedType>,
}

impl UpgradePlan {
    pub fn len(&self) -> usize {
        self.operations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.operations.is_empty()
    }

    pub fn tracked_type(&self, old_name: &str) -> Option<&TrackedType> {
        self.tracked.iter().find(|tracked| tracked.old_name == old_name)
    }

    /// Renders every operation as SQL, one statement per line.
    pub fn to_sql(&self) -> String {
        let mut sql = String::new();
        for op in &self.operations {
            sql.push_str(&op.to_sql());
            sql.push_str(";\n");
        }
        sql
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

impl fmt::Display for UpgradePlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Upgrade plan {} for part '{}' ({} operations)",
            self.id,
            self.part,
            self.operations.len()
        )?;
        for (idx, op) in self.operations.iter().enumerate() {
            writeln!(f, "  {:>4}  {}", idx, op)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plan_rendering() {
        let plan = UpgradePlan {
            id: Uuid::nil(),
            part: "Zoo".into(),
            operations: vec![
                UpgradeOperation::DropField {
                    table: "Animal".into(),
                    column: "Legs".into(),
                },
                UpgradeOperation::RebuildFullText { table: "Animal".into() },
            ],
            tracked: Vec::new(),
        };

        let text = plan.to_string();
        assert!(text.starts_with("Upgrade plan 00000000-0000-0000-0000-000000000000 for part 'Zoo' (2 operations)"));
        assert!(text.contains("     0  DropField Animal.Legs"));
        assert_eq!(
            plan.to_sql(),
            "ALTER TABLE \"Animal\" DROP COLUMN \"Legs\";\nALTER FULLTEXT INDEX ON \"Animal\" START FULL POPULATION;\n"
        );
        assert_eq!(UpgradePlan::from_json(&plan.to_json().unwrap()).unwrap(), plan);
    }
}
