use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::plan::TrackedType;
use crate::storage::PartState;

use super::UpgradeState;

/// Row count and content hash of one tracked type, before and after.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCounts {
    pub old_name: String,
    pub type_name: String,
    pub rows_before: usize,
    pub rows_after: usize,
    pub hash_before: String,
    pub hash_after: String,
}

impl TypeCounts {
    /// Same number of rows and identical values in every unconverted field.
    pub fn preserved(&self) -> bool {
        self.rows_before == self.rows_after && self.hash_before == self.hash_after
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpgradeResult {
    pub plan_id: Uuid,
    pub part: String,
    pub state: UpgradeState,
    pub operations: usize,
    pub types: Vec<TypeCounts>,
}

impl UpgradeResult {
    pub fn preserved(&self) -> bool {
        self.types.iter().all(TypeCounts::preserved)
    }

    pub fn counts(&self, type_name: &str) -> Option<&TypeCounts> {
        self.types.iter().find(|counts| counts.type_name == type_name)
    }
}

impl fmt::Display for UpgradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Upgrade {} of part '{}' {} after {} operations",
            self.plan_id, self.part, self.state, self.operations
        )?;
        for counts in &self.types {
            let marker = if counts.preserved() { "ok" } else { "CHANGED" };
            writeln!(
                f,
                "  {:<24} {:>8} -> {:<8} {}",
                counts.type_name, counts.rows_before, counts.rows_after, marker
            )?;
        }
        Ok(())
    }
}

/// Rows of exactly `type_name` and a SHA-256 over the given columns.
///
/// Rows are hashed independently and combined in sorted order, so the
/// digest does not depend on key order.
pub(crate) fn fingerprint(state: &PartState, type_name: &str, columns: &[&str]) -> (usize, String) {
    let Some(table) = state.table_of_type(type_name) else {
        return (0, hex(&Sha256::new().finalize()));
    };
    let schema = table.schema();
    let positions: Vec<Option<usize>> = columns.iter().map(|name| schema.find_column_index(name)).collect();

    let mut digests: Vec<Vec<u8>> = table
        .rows_of(type_name, false)
        .map(|(_, row)| {
            let mut bytes = Vec::new();
            for position in &positions {
                match position {
                    Some(idx) => row.values[*idx].write_canonical(&mut bytes),
                    None => bytes.push(0xff),
                }
            }
            Sha256::digest(&bytes).to_vec()
        })
        .collect();
    digests.sort();

    let mut hasher = Sha256::new();
    for digest in &digests {
        hasher.update(digest);
    }
    (digests.len(), hex(&hasher.finalize()))
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Fingerprint of a tracked type under its old names.
pub(crate) fn before(state: &PartState, tracked: &TrackedType) -> (usize, String) {
    let columns: Vec<&str> = tracked
        .fields
        .iter()
        .filter(|field| !field.converted)
        .map(|field| field.old.as_str())
        .collect();
    fingerprint(state, &tracked.old_name, &columns)
}

/// Fingerprint of a tracked type under its new names.
pub(crate) fn after(state: &PartState, tracked: &TrackedType) -> (usize, String) {
    let columns: Vec<&str> = tracked
        .fields
        .iter()
        .filter(|field| !field.converted)
        .map(|field| field.new.as_str())
        .collect();
    fingerprint(state, &tracked.new_name, &columns)
}
