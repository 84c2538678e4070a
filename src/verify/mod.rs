// ============================================================================
// Verifier
// ============================================================================
//
// Samples rows of every tracked type before an upgrade, translated into the
// names and types they must have afterwards, and checks them field by field
// once the upgrade committed. Every mismatch is reported.
//
// ============================================================================

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::config::UpgradeConfig;
use crate::core::{DISCRIMINATOR_COLUMN, DataType, DbError, Result, Value, VerificationFailure};
use crate::plan::{TrackedType, UpgradePlan};
use crate::storage::{Entity, Store};

/// One expected field value of a sampled row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedField {
    pub name: String,
    pub data_type: DataType,
    pub value: Value,
}

/// Row captured before an upgrade, expressed in the upgraded schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub type_name: String,
    pub key_field: String,
    pub key: Value,
    pub fields: Vec<ExpectedField>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleSet {
    pub part: String,
    pub samples: Vec<Sample>,
}

impl SampleSet {
    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct VerificationReport {
    pub part: String,
    pub rows_checked: usize,
    pub fields_checked: usize,
    pub failures: Vec<VerificationFailure>,
}

impl VerificationReport {
    pub fn is_ok(&self) -> bool {
        self.failures.is_empty()
    }

    /// Turns a report with failures into [`DbError::Verification`].
    pub fn into_result(self) -> Result<Self> {
        if self.failures.is_empty() {
            Ok(self)
        } else {
            Err(DbError::Verification(self.failures))
        }
    }
}

impl fmt::Display for VerificationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "verified {} rows ({} fields) of part '{}': ",
            self.rows_checked, self.fields_checked, self.part
        )?;
        if self.failures.is_empty() {
            return write!(f, "no mismatches");
        }
        writeln!(f, "{} mismatches", self.failures.len())?;
        for failure in &self.failures {
            writeln!(f, "  - {}", failure)?;
        }
        Ok(())
    }
}

pub struct Verifier<'c> {
    config: &'c UpgradeConfig,
}

impl<'c> Verifier<'c> {
    pub fn new(config: &'c UpgradeConfig) -> Self {
        Self { config }
    }

    /// Reads samples of every tracked type; call before executing `plan`.
    pub fn capture(&self, store: &Store, plan: &UpgradePlan) -> Result<SampleSet> {
        let mut set = SampleSet {
            part: plan.part.clone(),
            samples: Vec::new(),
        };
        if store.part(&plan.part)?.is_none() {
            return Ok(set);
        }
        for tracked in &plan.tracked {
            let rows = store.query_exact(&plan.part, &tracked.old_name)?;
            for entity in spread(&rows, self.config.verify_sample_size) {
                if let Some(sample) = translate(tracked, entity) {
                    set.samples.push(sample);
                }
            }
        }
        debug!(part = %set.part, samples = set.samples.len(), "verification samples captured");
        Ok(set)
    }

    /// Re-reads every sample and compares it field by field.
    pub fn verify(&self, store: &Store, samples: &SampleSet) -> Result<VerificationReport> {
        let mut report = VerificationReport {
            part: samples.part.clone(),
            ..Default::default()
        };
        for sample in &samples.samples {
            report.rows_checked += 1;
            let Some(entity) = store.get(&samples.part, &sample.type_name, &sample.key)? else {
                report.failures.push(VerificationFailure {
                    type_name: sample.type_name.clone(),
                    key: sample.key.clone(),
                    field: sample.key_field.clone(),
                    expected: sample.key.clone(),
                    actual: None,
                });
                continue;
            };
            if entity.type_name != sample.type_name {
                report.failures.push(VerificationFailure {
                    type_name: sample.type_name.clone(),
                    key: sample.key.clone(),
                    field: DISCRIMINATOR_COLUMN.to_string(),
                    expected: Value::Text(sample.type_name.clone()),
                    actual: Some(Value::Text(entity.type_name.clone())),
                });
            }
            for field in &sample.fields {
                report.fields_checked += 1;
                let actual = entity.get(&field.name);
                let matches = actual.is_some_and(|actual| self.same(field.data_type, &field.value, actual));
                if !matches {
                    report.failures.push(VerificationFailure {
                        type_name: sample.type_name.clone(),
                        key: sample.key.clone(),
                        field: field.name.clone(),
                        expected: field.value.clone(),
                        actual: actual.cloned(),
                    });
                }
            }
        }
        info!(
            part = %report.part,
            rows = report.rows_checked,
            failures = report.failures.len(),
            "verification finished"
        );
        Ok(report)
    }

    fn same(&self, data_type: DataType, expected: &Value, actual: &Value) -> bool {
        let epsilon = match data_type {
            DataType::Float32 => self.config.float32_epsilon,
            DataType::Float64 => self.config.float64_epsilon,
            _ => return expected == actual,
        };
        match (expected.as_f64(), actual.as_f64()) {
            (Some(e), Some(a)) => {
                if e == a || (e.is_nan() && a.is_nan()) {
                    return true;
                }
                let scale = e.abs().max(a.abs()).max(1.0);
                (e - a).abs() <= epsilon * scale
            }
            _ => expected == actual,
        }
    }
}

/// Up to `count` rows spread evenly over `rows`.
fn spread(rows: &[Entity], count: usize) -> Vec<&Entity> {
    if count == 0 || rows.is_empty() {
        return Vec::new();
    }
    if rows.len() <= count {
        return rows.iter().collect();
    }
    let step = rows.len() / count;
    rows.iter().step_by(step).take(count).collect()
}

fn translate(tracked: &TrackedType, entity: &Entity) -> Option<Sample> {
    let key_field = tracked.key_field()?;
    let fields: Vec<ExpectedField> = tracked
        .fields
        .iter()
        .map(|field| {
            let raw = entity.get(&field.old).cloned().unwrap_or(Value::Null);
            // Values that cannot be converted are expected to fail the upgrade, not to vanish.
            let value = field.data_type.convert(&raw).unwrap_or(raw);
            ExpectedField {
                name: field.new.clone(),
                data_type: field.data_type,
                value,
            }
        })
        .collect();
    let key = fields.iter().find(|field| field.name == key_field.new)?.value.clone();
    if key.is_null() {
        return None;
    }
    Some(Sample {
        type_name: tracked.new_name.clone(),
        key_field: key_field.new.clone(),
        key,
        fields,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::TrackedField;

    #[test]
    fn test_float_tolerance_is_relative() {
        let config = UpgradeConfig::default().float_epsilons(1e-6, 1e-12);
        let verifier = Verifier::new(&config);
        assert!(verifier.same(DataType::Float32, &Value::Float(1e6), &Value::Float(1e6 + 0.5)));
        assert!(!verifier.same(DataType::Float32, &Value::Float(1.0), &Value::Float(1.01)));
        assert!(verifier.same(DataType::Float64, &Value::Float(0.0), &Value::Float(1e-13)));
        assert!(!verifier.same(DataType::Int32, &Value::Integer(1), &Value::Integer(2)));
    }

    #[test]
    fn test_non_finite_floats_match_themselves() {
        let config = UpgradeConfig::default();
        let verifier = Verifier::new(&config);
        for data_type in [DataType::Float32, DataType::Float64] {
            for value in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
                assert!(verifier.same(data_type, &Value::Float(value), &Value::Float(value)));
            }
            assert!(!verifier.same(data_type, &Value::Float(f64::NAN), &Value::Float(1.0)));
            assert!(!verifier.same(data_type, &Value::Float(f64::INFINITY), &Value::Float(f64::NEG_INFINITY)));
        }
    }

    #[test]
    fn test_spread_samples() {
        let rows: Vec<Entity> = (0..10).map(|i| Entity::new("T").with("Id", i as i64)).collect();
        let picked: Vec<&Value> = spread(&rows, 3).iter().filter_map(|e| e.get("Id")).collect();
        assert_eq!(picked, vec![&Value::Integer(0), &Value::Integer(3), &Value::Integer(6)]);
        assert!(spread(&rows, 0).is_empty());
        assert_eq!(spread(&rows, 20).len(), 10);
    }

    #[test]
    fn test_translate_renames_and_converts() {
        let tracked = TrackedType {
            old_name: "Person".into(),
            new_name: "Customer".into(),
            fields: vec![
                TrackedField {
                    old: "Id".into(),
                    new: "Id".into(),
                    data_type: DataType::Int64,
                    converted: false,
                    key: true,
                },
                TrackedField {
                    old: "Age".into(),
                    new: "Years".into(),
                    data_type: DataType::String,
                    converted: true,
                    key: false,
                },
            ],
        };
        let entity = Entity::new("Person").with("Id", 5i64).with("Age", 41i64);
        let sample = translate(&tracked, &entity).unwrap();
        assert_eq!(sample.type_name, "Customer");
        assert_eq!(sample.key, Value::Integer(5));
        assert_eq!(sample.fields[1].value, Value::Text("41".into()));
    }
}
