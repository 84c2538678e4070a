//! Serialized form of a model, as emitted by the declarative annotation layer.

use serde::{Deserialize, Serialize};

use crate::core::{DataType, Result, Value};

use super::{EntitySpec, FieldSpec, FieldType, IndexSpec, Model, ModelBuilder};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDocument {
    pub name: String,
    #[serde(default)]
    pub types: Vec<EntityDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityDocument {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
    /// Defaults to "has no parent".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hierarchy_root: Option<bool>,
    #[serde(default)]
    pub fields: Vec<FieldDocument>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub indexes: Vec<IndexDocument>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldDocument {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: DataType,
    #[serde(default = "default_nullable")]
    pub nullable: bool,
    #[serde(default)]
    pub key: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub references: Option<String>,
    #[serde(default)]
    pub full_text: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
}

fn default_nullable() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexDocument {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub fields: Vec<String>,
}

impl ModelDocument {
    pub fn into_builder(self) -> ModelBuilder {
        let entities = self.types.into_iter().map(|entity| {
            let hierarchy_root = entity.hierarchy_root.unwrap_or(entity.parent.is_none());
            EntitySpec {
                name: entity.name,
                parent: entity.parent,
                hierarchy_root,
                fields: entity.fields.into_iter().map(FieldDocument::into_spec).collect(),
                indexes: entity
                    .indexes
                    .into_iter()
                    .map(|index| IndexSpec {
                        name: index.name,
                        fields: index.fields,
                    })
                    .collect(),
            }
        });
        ModelBuilder::new(self.name).entities(entities)
    }
}

impl FieldDocument {
    fn into_spec(self) -> FieldSpec {
        let data_type = if self.references.is_some() {
            DataType::Reference
        } else {
            self.data_type
        };
        FieldSpec {
            name: self.name,
            data_type,
            target: self.references,
            nullable: self.nullable && !self.key,
            key: self.key,
            full_text: self.full_text || data_type == DataType::Text,
            default: self.default,
        }
    }
}

impl Model {
    pub fn from_document(document: ModelDocument) -> Result<Self> {
        document.into_builder().build()
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let document: ModelDocument = serde_json::from_str(json)?;
        Self::from_document(document)
    }

    pub fn to_document(&self) -> ModelDocument {
        let types = self
            .types()
            .iter()
            .map(|entity| EntityDocument {
                name: entity.name().to_string(),
                parent: entity.parent().map(|parent| self.get(parent).name().to_string()),
                hierarchy_root: Some(entity.is_hierarchy_root()),
                fields: entity
                    .fields()
                    .iter()
                    .map(|field| FieldDocument {
                        name: field.name().to_string(),
                        data_type: field.data_type(),
                        nullable: field.is_nullable(),
                        key: field.is_key(),
                        references: match field.field_type() {
                            FieldType::Reference(target) => Some(self.get(target).name().to_string()),
                            FieldType::Scalar(_) => None,
                        },
                        full_text: field.is_full_text(),
                        default: field.default_value().cloned(),
                    })
                    .collect(),
                indexes: entity
                    .indexes()
                    .iter()
                    .map(|index| IndexDocument {
                        name: Some(index.name().to_string()),
                        fields: index.fields().to_vec(),
                    })
                    .collect(),
            })
            .collect();

        ModelDocument {
            name: self.name().to_string(),
            types,
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(&self.to_document())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const DOCUMENT: &str = r#"{
        "name": "PartOne",
        "types": [
            {
                "name": "TestEntity0",
                "fields": [
                    { "name": "Id", "type": "int32", "key": true },
                    { "name": "Bool", "type": "boolean", "nullable": false },
                    { "name": "Text", "type": "string", "full_text": true }
                ],
                "indexes": [ { "fields": ["Bool"] } ]
            },
            {
                "name": "TestEntity1",
                "fields": [
                    { "name": "Id", "type": "int32", "key": true },
                    { "name": "Ref0", "type": "reference", "references": "TestEntity0" }
                ]
            }
        ]
    }"#;

    #[test]
    fn test_parse_document() {
        let model = Model::from_json(DOCUMENT).unwrap();
        assert_eq!(model.name(), "PartOne");
        let t0 = model.find("TestEntity0").unwrap();
        assert!(t0.is_hierarchy_root());
        assert!(t0.field("Text").unwrap().is_full_text());
        assert!(!t0.field("Bool").unwrap().is_nullable());
        assert_eq!(t0.indexes()[0].name(), "idx_testentity0_bool");

        let t1 = model.type_id("TestEntity1").unwrap();
        assert_eq!(model.referenced_types(t1), vec![t0.id()]);
    }

    #[test]
    fn test_document_round_trip_preserves_model() {
        let model = Model::from_json(DOCUMENT).unwrap();
        let again = Model::from_json(&model.to_json().unwrap()).unwrap();
        assert_eq!(model, again);
    }

    #[test]
    fn test_full_text_flag_on_integer_is_rejected() {
        let json = r#"{"name":"P","types":[{"name":"A","fields":[
            {"name":"Id","type":"int64","key":true},
            {"name":"N","type":"int32","full_text":true}]}]}"#;
        let err = Model::from_json(json).unwrap_err();
        assert!(err.to_string().contains("full-text field 'N' must be a string"));
    }
}
