use std::collections::{BTreeSet, HashMap, HashSet};

use crate::core::{ColumnDef, DISCRIMINATOR_COLUMN, DataType, DbError, ModelViolation, Result};

use super::{
    EntitySpec, EntityTypeDescriptor, FieldDescriptor, FieldType, IndexDescriptor, TypeId,
};

/// Named, ordered set of entity types; one independently evolvable part of a store.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    name: String,
    types: Vec<EntityTypeDescriptor>,
    by_name: HashMap<String, TypeId>,
}

impl Model {
    /// Model without types, the state of a part that was never deployed.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            types: Vec::new(),
            by_name: HashMap::new(),
        }
    }

    pub fn builder(name: impl Into<String>) -> ModelBuilder {
        ModelBuilder::new(name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.types.len()
    }

    pub fn is_empty(&self) -> bool {
        self.types.is_empty()
    }

    pub fn types(&self) -> &[EntityTypeDescriptor] {
        &self.types
    }

    pub fn get(&self, id: TypeId) -> &EntityTypeDescriptor {
        &self.types[id.0]
    }

    pub fn type_id(&self, name: &str) -> Option<TypeId> {
        self.by_name.get(name).copied()
    }

    pub fn find(&self, name: &str) -> Option<&EntityTypeDescriptor> {
        self.type_id(name).map(|id| self.get(id))
    }

    pub fn root_of(&self, id: TypeId) -> TypeId {
        let mut current = id;
        while let Some(parent) = self.get(current).parent {
            current = parent;
        }
        current
    }

    /// Ancestors of `id`, hierarchy root first, `id` itself excluded.
    pub fn ancestors(&self, id: TypeId) -> Vec<TypeId> {
        let mut chain = Vec::new();
        let mut current = self.get(id).parent;
        while let Some(parent) = current {
            chain.push(parent);
            current = self.get(parent).parent;
        }
        chain.reverse();
        chain
    }

    pub fn children(&self, id: TypeId) -> Vec<TypeId> {
        self.types
            .iter()
            .filter(|entity| entity.parent == Some(id))
            .map(|entity| entity.id)
            .collect()
    }

    /// `id` followed by all of its descendants, parents before children.
    pub fn subtree(&self, id: TypeId) -> Vec<TypeId> {
        let mut result = vec![id];
        let mut cursor = 0;
        while cursor < result.len() {
            let children = self.children(result[cursor]);
            result.extend(children);
            cursor += 1;
        }
        result
    }

    pub fn is_descendant_of(&self, id: TypeId, ancestor: TypeId) -> bool {
        self.ancestors(id).contains(&ancestor)
    }

    /// Inherited fields first, then the type's own fields.
    pub fn all_fields(&self, id: TypeId) -> Vec<(TypeId, &FieldDescriptor)> {
        let mut chain = self.ancestors(id);
        chain.push(id);
        chain
            .into_iter()
            .flat_map(|owner| self.get(owner).fields.iter().map(move |field| (owner, field)))
            .collect()
    }

    pub fn find_field(&self, id: TypeId, name: &str) -> Option<(TypeId, &FieldDescriptor)> {
        self.all_fields(id)
            .into_iter()
            .find(|(_, field)| field.name == name)
    }

    /// Effective key of a type, declared by its hierarchy root.
    pub fn key_field(&self, id: TypeId) -> &FieldDescriptor {
        let root = self.get(self.root_of(id));
        root.fields
            .iter()
            .find(|field| field.key)
            .unwrap_or(&root.fields[0])
    }

    /// Name of the table holding rows of `id`.
    pub fn table_name(&self, id: TypeId) -> &str {
        &self.get(self.root_of(id)).name
    }

    /// Physical column for one resolved field.
    pub fn column_def(&self, owner: TypeId, field: &FieldDescriptor) -> ColumnDef {
        let mut column = ColumnDef::new(&field.name, field.data_type(), &self.get(owner).name);
        column.nullable = field.nullable;
        column.key = field.key;
        column.default = field.default.clone();
        if let FieldType::Reference(target) = field.field_type {
            column.references = Some(self.get(target).name.clone());
        }
        column
    }

    /// Types referenced by the fields `id` declares.
    pub fn referenced_types(&self, id: TypeId) -> Vec<TypeId> {
        let mut targets = Vec::new();
        for field in &self.get(id).fields {
            if let Some(target) = field.field_type.target()
                && !targets.contains(&target)
            {
                targets.push(target);
            }
        }
        targets
    }

    /// Types ordered so parents and referenced types come first.
    ///
    /// Fails when a reference from a type to one of its own descendants makes
    /// the combined parent/reference graph cyclic.
    pub fn dependency_order(&self) -> Result<Vec<TypeId>> {
        let mut dependencies: Vec<Vec<TypeId>> = Vec::with_capacity(self.types.len());
        for entity in &self.types {
            let mut deps = self.referenced_types(entity.id);
            if let Some(parent) = entity.parent {
                deps.push(parent);
            }
            deps.retain(|dep| *dep != entity.id);
            dependencies.push(deps);
        }

        let mut placed = vec![false; self.types.len()];
        let mut order = Vec::with_capacity(self.types.len());
        loop {
            let mut progressed = false;
            for entity in &self.types {
                let idx = entity.id.0;
                if placed[idx] {
                    continue;
                }
                if dependencies[idx].iter().all(|dep| placed[dep.0]) {
                    placed[idx] = true;
                    order.push(entity.id);
                    progressed = true;
                }
            }
            if order.len() == self.types.len() {
                return Ok(order);
            }
            if !progressed {
                let stuck = self
                    .types
                    .iter()
                    .filter(|entity| !placed[entity.id.0])
                    .map(|entity| entity.name.as_str())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(DbError::UnsatisfiablePlan(format!(
                    "types {} depend on each other through parents and references",
                    stuck
                )));
            }
        }
    }
}

/// Collects [`EntitySpec`]s and validates them into a [`Model`].
#[derive(Debug, Clone)]
pub struct ModelBuilder {
    name: String,
    entities: Vec<EntitySpec>,
}

impl ModelBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            entities: Vec::new(),
        }
    }

    pub fn entity(mut self, entity: EntitySpec) -> Self {
        self.entities.push(entity);
        self
    }

    pub fn entities<I>(mut self, entities: I) -> Self
    where
        I: IntoIterator<Item = EntitySpec>,
    {
        self.entities.extend(entities);
        self
    }

    /// Resolves names into arena ids and checks every model invariant.
    ///
    /// All violations are reported together in [`DbError::ModelValidation`].
    pub fn build(self) -> Result<Model> {
        let mut violations = Vec::new();

        if self.name.trim().is_empty() {
            violations.push(ModelViolation::new(None, "model name must not be empty"));
        }

        let mut by_name = HashMap::new();
        for (idx, spec) in self.entities.iter().enumerate() {
            if spec.name.trim().is_empty() {
                violations.push(ModelViolation::new(None, format!("type #{} has an empty name", idx)));
            } else if spec.name.starts_with("__") {
                violations.push(ModelViolation::new(Some(&spec.name), "names starting with '__' are reserved"));
            }
            if by_name.insert(spec.name.clone(), TypeId(idx)).is_some() {
                violations.push(ModelViolation::new(Some(&spec.name), "type is declared more than once"));
            }
        }

        let mut types = Vec::with_capacity(self.entities.len());
        for (idx, spec) in self.entities.iter().enumerate() {
            types.push(resolve_entity(TypeId(idx), spec, &by_name, &mut violations));
        }

        let model = Model {
            name: self.name,
            types,
            by_name,
        };

        let parents_ok = check_parent_cycles(&model, &mut violations);
        if parents_ok {
            check_keys(&model, &mut violations);
            check_hierarchy_columns(&model, &mut violations);
            check_indexes(&model, &mut violations);
        }
        check_reference_cycles(&model, &mut violations);

        if violations.is_empty() {
            Ok(model)
        } else {
            Err(DbError::ModelValidation(violations))
        }
    }
}

fn resolve_entity(
    id: TypeId,
    spec: &EntitySpec,
    by_name: &HashMap<String, TypeId>,
    violations: &mut Vec<ModelViolation>,
) -> EntityTypeDescriptor {
    let name = spec.name.as_str();

    let parent = match &spec.parent {
        Some(parent_name) => match by_name.get(parent_name) {
            Some(parent) => Some(*parent),
            None => {
                violations.push(ModelViolation::new(
                    Some(name),
                    format!("parent type '{}' does not exist", parent_name),
                ));
                None
            }
        },
        None => None,
    };

    if spec.hierarchy_root && spec.parent.is_some() {
        violations.push(ModelViolation::new(Some(name), "hierarchy root cannot have a parent type"));
    }
    if !spec.hierarchy_root && spec.parent.is_none() {
        violations.push(ModelViolation::new(
            Some(name),
            "type has no parent and is not marked as a hierarchy root",
        ));
    }

    let mut seen = HashSet::new();
    let mut fields = Vec::with_capacity(spec.fields.len());
    for field in &spec.fields {
        if field.name.trim().is_empty() {
            violations.push(ModelViolation::new(Some(name), "field with an empty name"));
            continue;
        }
        if field.name == DISCRIMINATOR_COLUMN || field.name.starts_with("__") {
            violations.push(ModelViolation::new(
                Some(name),
                format!("field name '{}' is reserved", field.name),
            ));
        }
        if !seen.insert(field.name.as_str()) {
            violations.push(ModelViolation::new(
                Some(name),
                format!("field '{}' is declared more than once", field.name),
            ));
            continue;
        }

        let field_type = match (&field.target, field.data_type) {
            (Some(target), DataType::Reference) => match by_name.get(target) {
                Some(target_id) => FieldType::Reference(*target_id),
                None => {
                    violations.push(ModelViolation::new(
                        Some(name),
                        format!("field '{}' references unknown type '{}'", field.name, target),
                    ));
                    FieldType::Scalar(DataType::Reference)
                }
            },
            (None, DataType::Reference) => {
                violations.push(ModelViolation::new(
                    Some(name),
                    format!("reference field '{}' has no target type", field.name),
                ));
                FieldType::Scalar(DataType::Reference)
            }
            (Some(_), other) => {
                violations.push(ModelViolation::new(
                    Some(name),
                    format!("field '{}' of type {} cannot have a reference target", field.name, other),
                ));
                FieldType::Scalar(other)
            }
            (None, data_type) if field.full_text => {
                if !data_type.is_string() {
                    violations.push(ModelViolation::new(
                        Some(name),
                        format!("full-text field '{}' must be a string, found {}", field.name, data_type),
                    ));
                }
                FieldType::Scalar(DataType::Text)
            }
            (None, data_type) => FieldType::Scalar(data_type),
        };

        if let Some(default) = &field.default
            && (default.is_null() || !field_type.data_type().is_compatible(default))
        {
            violations.push(ModelViolation::new(
                Some(name),
                format!(
                    "default value '{}' of field '{}' does not fit {}",
                    default,
                    field.name,
                    field_type.data_type()
                ),
            ));
        }

        fields.push(FieldDescriptor {
            name: field.name.clone(),
            field_type,
            nullable: field.nullable,
            key: field.key,
            default: field.default.clone(),
        });
    }

    let mut indexes = Vec::with_capacity(spec.indexes.len());
    for index in &spec.indexes {
        indexes.push(IndexDescriptor {
            name: index.resolved_name(name),
            fields: index.fields.clone(),
        });
    }

    EntityTypeDescriptor {
        id,
        name: spec.name.clone(),
        parent,
        fields,
        indexes,
        hierarchy_root: spec.hierarchy_root,
    }
}

fn check_parent_cycles(model: &Model, violations: &mut Vec<ModelViolation>) -> bool {
    let mut ok = true;
    for entity in &model.types {
        let mut visited = HashSet::new();
        let mut current = entity.parent;
        while let Some(parent) = current {
            if parent == entity.id || !visited.insert(parent) {
                violations.push(ModelViolation::new(
                    Some(&entity.name),
                    "parent chain is cyclic",
                ));
                ok = false;
                break;
            }
            current = model.get(parent).parent;
        }
    }
    ok
}

fn check_keys(model: &Model, violations: &mut Vec<ModelViolation>) {
    for entity in &model.types {
        let keys: Vec<&FieldDescriptor> = entity.fields.iter().filter(|field| field.key).collect();
        if entity.parent.is_some() {
            for key in keys {
                violations.push(ModelViolation::new(
                    Some(&entity.name),
                    format!("derived type declares key '{}'; keys belong to the hierarchy root", key.name),
                ));
            }
            continue;
        }
        match keys.as_slice() {
            [] => violations.push(ModelViolation::new(Some(&entity.name), "type has no key field")),
            [key] => {
                if key.nullable {
                    violations.push(ModelViolation::new(
                        Some(&entity.name),
                        format!("key field '{}' cannot be nullable", key.name),
                    ));
                }
                if !key.data_type().is_key_type() {
                    violations.push(ModelViolation::new(
                        Some(&entity.name),
                        format!("key field '{}' has unsupported type {}", key.name, key.data_type()),
                    ));
                }
            }
            many => violations.push(ModelViolation::new(
                Some(&entity.name),
                format!(
                    "type declares {} key fields ({}), exactly one is required",
                    many.len(),
                    many.iter().map(|key| key.name.as_str()).collect::<Vec<_>>().join(", ")
                ),
            )),
        }
    }
}

// Every type of a hierarchy shares one table, so field names must be unique across it.
fn check_hierarchy_columns(model: &Model, violations: &mut Vec<ModelViolation>) {
    let mut columns: HashMap<(TypeId, &str), &str> = HashMap::new();
    for entity in &model.types {
        let root = model.root_of(entity.id);
        for field in &entity.fields {
            if let Some(owner) = columns.insert((root, field.name.as_str()), entity.name.as_str()) {
                violations.push(ModelViolation::new(
                    Some(&entity.name),
                    format!(
                        "field '{}' collides with field of '{}' in hierarchy '{}'",
                        field.name,
                        owner,
                        model.get(root).name
                    ),
                ));
            }
        }
    }
}

fn check_indexes(model: &Model, violations: &mut Vec<ModelViolation>) {
    let mut names: HashMap<(TypeId, &str), &str> = HashMap::new();
    for entity in &model.types {
        let root = model.root_of(entity.id);
        for index in &entity.indexes {
            if index.fields.is_empty() {
                violations.push(ModelViolation::new(
                    Some(&entity.name),
                    format!("index '{}' covers no fields", index.name),
                ));
            }
            let mut seen = HashSet::new();
            for field in &index.fields {
                if model.find_field(entity.id, field).is_none() {
                    violations.push(ModelViolation::new(
                        Some(&entity.name),
                        format!("index '{}' covers unknown field '{}'", index.name, field),
                    ));
                }
                if !seen.insert(field.as_str()) {
                    violations.push(ModelViolation::new(
                        Some(&entity.name),
                        format!("index '{}' lists field '{}' twice", index.name, field),
                    ));
                }
            }
            if let Some(owner) = names.insert((root, index.name.as_str()), entity.name.as_str()) {
                violations.push(ModelViolation::new(
                    Some(&entity.name),
                    format!("index name '{}' is already used by '{}'", index.name, owner),
                ));
            }
        }
    }
}

fn check_reference_cycles(model: &Model, violations: &mut Vec<ModelViolation>) {
    #[derive(Clone, Copy, PartialEq)]
    enum Mark {
        New,
        Active,
        Done,
    }

    fn visit(
        model: &Model,
        id: TypeId,
        marks: &mut [Mark],
        stack: &mut Vec<TypeId>,
        cycles: &mut BTreeSet<Vec<TypeId>>,
    ) {
        marks[id.0] = Mark::Active;
        stack.push(id);
        for target in model.referenced_types(id) {
            match marks[target.0] {
                Mark::New => visit(model, target, marks, stack, cycles),
                Mark::Active => {
                    let start = stack.iter().position(|entry| *entry == target).unwrap_or(0);
                    let mut cycle = stack[start..].to_vec();
                    let min = cycle.iter().enumerate().min_by_key(|(_, id)| **id).map(|(i, _)| i).unwrap_or(0);
                    cycle.rotate_left(min);
                    cycles.insert(cycle);
                }
                Mark::Done => {}
            }
        }
        stack.pop();
        marks[id.0] = Mark::Done;
    }

    let mut marks = vec![Mark::New; model.types.len()];
    let mut cycles = BTreeSet::new();
    for entity in &model.types {
        if marks[entity.id.0] == Mark::New {
            visit(model, entity.id, &mut marks, &mut Vec::new(), &mut cycles);
        }
    }

    for cycle in &cycles {
        let mut names: Vec<&str> = cycle.iter().map(|id| model.get(*id).name.as_str()).collect();
        names.push(names[0]);
        violations.push(ModelViolation::new(
            None,
            format!("reference cycle {}", names.join(" -> ")),
        ));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::Value;
    use crate::model::FieldSpec;

    fn root(name: &str) -> EntitySpec {
        EntitySpec::root(name).field(FieldSpec::key("Id", DataType::Int64))
    }

    #[test]
    fn test_build_resolves_references_to_ids() {
        let model = Model::builder("Part")
            .entity(root("A"))
            .entity(root("B").field(FieldSpec::reference("A", "A")))
            .build()
            .unwrap();

        let b = model.type_id("B").unwrap();
        let a = model.type_id("A").unwrap();
        assert_eq!(model.referenced_types(b), vec![a]);
        assert_eq!(model.dependency_order().unwrap(), vec![a, b]);
    }

    #[test]
    fn test_validation_reports_every_violation() {
        let err = Model::builder("Part")
            .entity(EntitySpec::root("NoKey").field(FieldSpec::new("Name", DataType::String)))
            .entity(root("Dangling").field(FieldSpec::reference("Other", "Missing")))
            .entity(EntitySpec::derived("Orphan", "Nowhere"))
            .entity(root("BadIndex").index(["Missing"]))
            .build()
            .unwrap_err();

        let DbError::ModelValidation(violations) = err else {
            panic!("expected validation error");
        };
        assert!(violations.len() >= 4, "{:?}", violations);
        let text: Vec<String> = violations.iter().map(ToString::to_string).collect();
        assert!(text.iter().any(|v| v.contains("NoKey") && v.contains("no key")));
        assert!(text.iter().any(|v| v.contains("unknown type 'Missing'")));
        assert!(text.iter().any(|v| v.contains("parent type 'Nowhere'")));
        assert!(text.iter().any(|v| v.contains("unknown field 'Missing'")));
    }

    #[test]
    fn test_reference_cycle_is_rejected() {
        let err = Model::builder("Part")
            .entity(root("A").field(FieldSpec::reference("B", "B")))
            .entity(root("B").field(FieldSpec::reference("A", "A")))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("reference cycle A -> B -> A"));
    }

    #[test]
    fn test_derived_types_share_key_and_columns() {
        let model = Model::builder("Part")
            .entity(root("Animal").field(FieldSpec::new("Name", DataType::String)))
            .entity(EntitySpec::derived("Dog", "Animal").field(FieldSpec::new("Barks", DataType::Boolean)))
            .build()
            .unwrap();

        let dog = model.type_id("Dog").unwrap();
        assert_eq!(model.table_name(dog), "Animal");
        assert_eq!(model.key_field(dog).name(), "Id");
        let names: Vec<&str> = model.all_fields(dog).iter().map(|(_, f)| f.name()).collect();
        assert_eq!(names, vec!["Id", "Name", "Barks"]);
    }

    #[test]
    fn test_hierarchy_column_collision() {
        let err = Model::builder("Part")
            .entity(root("Animal"))
            .entity(EntitySpec::derived("Dog", "Animal").field(FieldSpec::new("Size", DataType::Int32)))
            .entity(EntitySpec::derived("Cat", "Animal").field(FieldSpec::new("Size", DataType::String)))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("collides"));
    }

    #[test]
    fn test_derived_key_and_bad_default() {
        let err = Model::builder("Part")
            .entity(root("Animal"))
            .entity(
                EntitySpec::derived("Dog", "Animal")
                    .field(FieldSpec::key("DogId", DataType::Int32))
                    .field(FieldSpec::new("Age", DataType::Int16).with_default(Value::Text("old".into()))),
            )
            .build()
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("derived type declares key"));
        assert!(text.contains("default value 'old'"));
    }

    #[test]
    fn test_reference_to_descendant_is_unorderable() {
        let model = Model::builder("Part")
            .entity(root("Animal").field(FieldSpec::reference("Favorite", "Dog")))
            .entity(EntitySpec::derived("Dog", "Animal"))
            .build()
            .unwrap();
        assert!(matches!(model.dependency_order(), Err(DbError::UnsatisfiablePlan(_))));
    }
}
