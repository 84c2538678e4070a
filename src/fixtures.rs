// ============================================================================
// Hierarchy Chain Fixture
// ============================================================================
//
// Model T0..Tn where every type carries one field of each scalar type plus a
// reference to every lower-indexed type, stored either as independent roots
// or as one deep inheritance chain. The fixture populates one row per type
// into a store it is handed and checks those rows back.
//
// ============================================================================

use chrono::{NaiveDateTime, TimeDelta};
use serde::{Deserialize, Serialize};

use crate::config::UpgradeConfig;
use crate::core::{DataType, Result, Value, VerificationFailure};
use crate::model::{EntitySpec, FieldSpec, Model};
use crate::storage::{Entity, Store};
use crate::verify::{ExpectedField, Sample, SampleSet, VerificationReport, Verifier};

pub const KEY_FIELD: &str = "Id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainLayout {
    /// Every type is its own hierarchy root.
    Independent,
    /// `Tn` derives from `Tn-1`; all types share one table.
    Inheritance,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainFixture {
    pub part: String,
    pub prefix: String,
    pub depth: usize,
    pub layout: ChainLayout,
    /// Widens the Int16 fields and adds a nullable note field per type.
    pub evolved: bool,
}

impl ChainFixture {
    pub fn new(part: impl Into<String>, depth: usize, layout: ChainLayout) -> Self {
        Self {
            part: part.into(),
            prefix: "T".to_string(),
            depth,
            layout,
            evolved: false,
        }
    }

    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    /// Same chain in its second revision.
    pub fn evolve(&self) -> Self {
        Self {
            evolved: true,
            ..self.clone()
        }
    }

    pub fn type_name(&self, n: usize) -> String {
        format!("{}{}", self.prefix, n)
    }

    fn scalar_fields(&self, n: usize) -> Vec<(String, DataType)> {
        let small = if self.evolved { DataType::Int32 } else { DataType::Int16 };
        vec![
            (format!("Bool{n}"), DataType::Boolean),
            (format!("Small{n}"), small),
            (format!("Int{n}"), DataType::Int32),
            (format!("Long{n}"), DataType::Int64),
            (format!("Float{n}"), DataType::Float32),
            (format!("Double{n}"), DataType::Float64),
            (format!("Stamp{n}"), DataType::DateTime),
            (format!("Name{n}"), DataType::String),
            (format!("About{n}"), DataType::Text),
        ]
    }

    fn reference_field(n: usize, k: usize) -> String {
        format!("Ref{n}_{k}")
    }

    pub fn model(&self) -> Result<Model> {
        let mut builder = Model::builder(self.part.as_str());
        for n in 0..self.depth {
            let name = self.type_name(n);
            let mut entity = match self.layout {
                ChainLayout::Inheritance if n > 0 => EntitySpec::derived(&name, self.type_name(n - 1)),
                _ => EntitySpec::root(&name).field(FieldSpec::key(KEY_FIELD, DataType::Int64)),
            };
            for (field, data_type) in self.scalar_fields(n) {
                entity = entity.field(match data_type {
                    DataType::Text => FieldSpec::full_text(field),
                    DataType::Boolean => FieldSpec::new(field, data_type).not_null(),
                    _ => FieldSpec::new(field, data_type),
                });
            }
            for k in 0..n {
                entity = entity.field(FieldSpec::reference(Self::reference_field(n, k), self.type_name(k)));
            }
            if self.evolved {
                entity = entity.field(FieldSpec::new(format!("Note{n}"), DataType::String));
            }
            entity = entity.index([format!("Int{n}")]);
            builder = builder.entity(entity);
        }
        builder.build()
    }

    /// Values stored for type `n`, own fields only.
    fn own_values(&self, n: usize) -> Vec<(String, Value)> {
        let i = n as i64;
        let stamp = NaiveDateTime::default() + TimeDelta::days(i) + TimeDelta::seconds(i * 61);
        let mut values = vec![
            (format!("Bool{n}"), Value::Boolean(n % 2 == 0)),
            (format!("Small{n}"), Value::Integer(i)),
            (format!("Int{n}"), Value::Integer(i * 10)),
            (format!("Long{n}"), Value::Integer(i * 1_000_000_007)),
            (format!("Float{n}"), Value::from(n as f32 + 0.5)),
            (format!("Double{n}"), Value::Float(i as f64 / 3.0)),
            (format!("Stamp{n}"), Value::DateTime(stamp)),
            (format!("Name{n}"), Value::Text(self.type_name(n))),
            (format!("About{n}"), Value::Text(format!("about {}", self.type_name(n)))),
        ];
        for k in 0..n {
            values.push((Self::reference_field(n, k), Value::Integer(k as i64)));
        }
        values
    }

    /// Row of type `n` as populated.
    pub fn expected(&self, n: usize) -> Entity {
        let mut entity = Entity::new(self.type_name(n)).with(KEY_FIELD, n as i64);
        let owners: Vec<usize> = match self.layout {
            ChainLayout::Independent => vec![n],
            ChainLayout::Inheritance => (0..=n).collect(),
        };
        for owner in owners {
            for (field, value) in self.own_values(owner) {
                entity = entity.with(field, value);
            }
        }
        entity
    }

    /// Inserts one row per type, lowest index first. Returns the row count.
    pub fn populate(&self, store: &Store) -> Result<usize> {
        store.ensure_part(&self.part)?;
        for n in 0..self.depth {
            store.insert(&self.part, &self.expected(n))?;
        }
        Ok(self.depth)
    }

    pub fn samples(&self) -> Result<SampleSet> {
        let model = self.model()?;
        let mut samples = Vec::with_capacity(self.depth);
        for n in 0..self.depth {
            let name = self.type_name(n);
            let Some(id) = model.type_id(&name) else {
                continue;
            };
            let expected = self.expected(n);
            let fields = model
                .all_fields(id)
                .into_iter()
                .filter_map(|(_, field)| {
                    expected.get(field.name()).map(|value| ExpectedField {
                        name: field.name().to_string(),
                        data_type: field.data_type(),
                        value: value.clone(),
                    })
                })
                .collect();
            samples.push(Sample {
                type_name: name,
                key_field: KEY_FIELD.to_string(),
                key: Value::Integer(n as i64),
                fields,
            });
        }
        Ok(SampleSet {
            part: self.part.clone(),
            samples,
        })
    }

    /// Every type holds exactly its one populated row, field for field.
    pub fn check(&self, store: &Store, config: &UpgradeConfig) -> Result<VerificationReport> {
        let mut report = Verifier::new(config).verify(store, &self.samples()?)?;
        for n in 0..self.depth {
            let name = self.type_name(n);
            let rows = store.count_exact(&self.part, &name)?;
            if rows != 1 {
                report.failures.push(VerificationFailure {
                    type_name: name,
                    key: Value::Integer(n as i64),
                    field: "row count".to_string(),
                    expected: Value::Integer(1),
                    actual: Some(Value::Integer(rows as i64)),
                });
            }
        }
        Ok(report)
    }
}
