use super::{FieldDescriptor, FieldSpec, IndexDescriptor, IndexSpec, TypeId};

/// Resolved entity type stored in a [`crate::model::Model`] arena.
#[derive(Debug, Clone, PartialEq)]
pub struct EntityTypeDescriptor {
    pub(crate) id: TypeId,
    pub(crate) name: String,
    pub(crate) parent: Option<TypeId>,
    pub(crate) fields: Vec<FieldDescriptor>,
    pub(crate) indexes: Vec<IndexDescriptor>,
    pub(crate) hierarchy_root: bool,
}

impl EntityTypeDescriptor {
    pub fn id(&self) -> TypeId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn parent(&self) -> Option<TypeId> {
        self.parent
    }

    pub fn is_hierarchy_root(&self) -> bool {
        self.hierarchy_root
    }

    /// Fields declared by this type, excluding inherited ones.
    pub fn fields(&self) -> &[FieldDescriptor] {
        &self.fields
    }

    pub fn field(&self, name: &str) -> Option<&FieldDescriptor> {
        self.fields.iter().find(|field| field.name == name)
    }

    pub fn indexes(&self) -> &[IndexDescriptor] {
        &self.indexes
    }

    pub fn index(&self, name: &str) -> Option<&IndexDescriptor> {
        self.indexes.iter().find(|index| index.name == name)
    }
}

/// Declarative description of an entity type.
///
/// ```
/// use modelshift::DataType;
/// use modelshift::model::{EntitySpec, FieldSpec};
///
/// let spec = EntitySpec::root("Customer")
///     .field(FieldSpec::key("Id", DataType::Int64))
///     .field(FieldSpec::new("Name", DataType::String))
///     .index(["Name"]);
/// assert_eq!(spec.fields.len(), 2);
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct EntitySpec {
    pub name: String,
    pub parent: Option<String>,
    pub hierarchy_root: bool,
    pub fields: Vec<FieldSpec>,
    pub indexes: Vec<IndexSpec>,
}

impl EntitySpec {
    pub fn root(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: None,
            hierarchy_root: true,
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn derived(name: impl Into<String>, parent: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            parent: Some(parent.into()),
            hierarchy_root: false,
            fields: Vec::new(),
            indexes: Vec::new(),
        }
    }

    pub fn field(mut self, field: FieldSpec) -> Self {
        self.fields.push(field);
        self
    }

    pub fn fields<I>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = FieldSpec>,
    {
        self.fields.extend(fields);
        self
    }

    pub fn index<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.indexes.push(IndexSpec::new(fields));
        self
    }

    pub fn with_index(mut self, index: IndexSpec) -> Self {
        self.indexes.push(index);
        self
    }
}
