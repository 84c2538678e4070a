use serde::{Deserialize, Serialize};

use crate::core::{DataType, Value};

/// Position of an entity type inside its model's arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TypeId(pub usize);

impl TypeId {
    pub fn index(&self) -> usize {
        self.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldType {
    Scalar(DataType),
    Reference(TypeId),
}

impl FieldType {
    pub fn data_type(&self) -> DataType {
        match self {
            Self::Scalar(data_type) => *data_type,
            Self::Reference(_) => DataType::Reference,
        }
    }

    pub fn target(&self) -> Option<TypeId> {
        match self {
            Self::Reference(target) => Some(*target),
            Self::Scalar(_) => None,
        }
    }
}

/// Resolved field of an entity type.
#[derive(Debug, Clone, PartialEq)]
pub struct FieldDescriptor {
    pub(crate) name: String,
    pub(crate) field_type: FieldType,
    pub(crate) nullable: bool,
    pub(crate) key: bool,
    pub(crate) default: Option<Value>,
}

impl FieldDescriptor {
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn field_type(&self) -> FieldType {
        self.field_type
    }

    pub fn data_type(&self) -> DataType {
        self.field_type.data_type()
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn is_key(&self) -> bool {
        self.key
    }

    pub fn is_full_text(&self) -> bool {
        self.data_type() == DataType::Text
    }

    pub fn default_value(&self) -> Option<&Value> {
        self.default.as_ref()
    }
}

/// Declarative description of one field, resolved by [`crate::model::ModelBuilder`].
#[derive(Debug, Clone, PartialEq)]
pub struct FieldSpec {
    pub name: String,
    pub data_type: DataType,
    /// Referenced type name for reference fields.
    pub target: Option<String>,
    pub nullable: bool,
    pub key: bool,
    pub full_text: bool,
    pub default: Option<Value>,
}

impl FieldSpec {
    pub fn new(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            name: name.into(),
            data_type,
            target: None,
            nullable: true,
            key: false,
            full_text: data_type == DataType::Text,
            default: None,
        }
    }

    pub fn key(name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            nullable: false,
            key: true,
            ..Self::new(name, data_type)
        }
    }

    pub fn reference(name: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::new(name, DataType::Reference)
        }
    }

    pub fn full_text(name: impl Into<String>) -> Self {
        Self::new(name, DataType::Text)
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    pub fn nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    pub fn with_default(mut self, value: impl Into<Value>) -> Self {
        self.default = Some(value.into());
        self
    }
}
