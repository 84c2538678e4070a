// ============================================================================
// Model Comparer
// ============================================================================
//
// Structural diff between the deployed model and a newly declared one.
//
// Matching runs type level first (rename hints, then exact names), then field
// level inside every matched type, then indexes. Unmatched new types that look
// like renames of unmatched old types are never guessed: they fail the
// comparison until a hint confirms or rejects them.
//
// ============================================================================

use std::collections::{HashMap, HashSet};
use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::UpgradeConfig;
use crate::core::{DbError, ModelViolation, RenameCandidate, Result};
use crate::model::{FieldDescriptor, FieldType, Model, TypeId};

/// Caller-confirmed renames and explicitly new types.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RenameHints {
    pub types: Vec<TypeRename>,
    pub fields: Vec<FieldRename>,
    /// New types that must not be treated as renames.
    pub new_types: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeRename {
    pub from: String,
    pub to: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldRename {
    /// Name of the type in the new model.
    #[serde(rename = "type")]
    pub type_name: String,
    pub from: String,
    pub to: String,
}

impl RenameHints {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rename_type(mut self, from: impl Into<String>, to: impl Into<String>) -> Self {
        self.types.push(TypeRename {
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn rename_field(
        mut self,
        type_name: impl Into<String>,
        from: impl Into<String>,
        to: impl Into<String>,
    ) -> Self {
        self.fields.push(FieldRename {
            type_name: type_name.into(),
            from: from.into(),
            to: to.into(),
        });
        self
    }

    pub fn new_type(mut self, name: impl Into<String>) -> Self {
        self.new_types.push(name.into());
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::from_json(&fs::read_to_string(path)?)
    }
}

/// Old field matched to a new field of the same matched type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldMatch {
    pub old: String,
    pub new: String,
    /// Type, nullability, reference target or default differ.
    pub retyped: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TypeMatch {
    pub old: TypeId,
    pub new: TypeId,
    /// Matches among the fields each side declares itself.
    pub fields: Vec<FieldMatch>,
}

impl TypeMatch {
    pub fn field_by_old(&self, old: &str) -> Option<&FieldMatch> {
        self.fields.iter().find(|field| field.old == old)
    }

    pub fn field_by_new(&self, new: &str) -> Option<&FieldMatch> {
        self.fields.iter().find(|field| field.new == new)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum SchemaChange {
    TypeAdded { new: TypeId },
    TypeRemoved { old: TypeId },
    TypeRenamed { old: TypeId, new: TypeId },
    ParentChanged { old: TypeId, new: TypeId },
    FieldAdded { new: TypeId, field: String },
    FieldRemoved { old: TypeId, field: String },
    FieldRenamed { old: TypeId, new: TypeId, from: String, to: String },
    FieldRetyped { old: TypeId, new: TypeId, field: String },
    FullTextChanged { new: TypeId, field: String, enabled: bool },
    IndexAdded { new: TypeId, index: String },
    IndexRemoved { old: TypeId, index: String },
    KeyChanged { old: TypeId, new: TypeId, field: String },
}

/// Unordered set of changes between two models, borrowing both.
#[derive(Debug, Clone)]
pub struct ModelDiff<'m> {
    old: &'m Model,
    new: &'m Model,
    matches: Vec<TypeMatch>,
    by_old: HashMap<TypeId, usize>,
    by_new: HashMap<TypeId, usize>,
    changes: Vec<SchemaChange>,
}

impl<'m> ModelDiff<'m> {
    pub fn old(&self) -> &'m Model {
        self.old
    }

    pub fn new_model(&self) -> &'m Model {
        self.new
    }

    pub fn matches(&self) -> &[TypeMatch] {
        &self.matches
    }

    pub fn changes(&self) -> &[SchemaChange] {
        &self.changes
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn match_of_old(&self, old: TypeId) -> Option<&TypeMatch> {
        self.by_old.get(&old).map(|idx| &self.matches[*idx])
    }

    pub fn match_of_new(&self, new: TypeId) -> Option<&TypeMatch> {
        self.by_new.get(&new).map(|idx| &self.matches[*idx])
    }

    pub fn new_of(&self, old: TypeId) -> Option<TypeId> {
        self.match_of_old(old).map(|m| m.new)
    }

    pub fn old_of(&self, new: TypeId) -> Option<TypeId> {
        self.match_of_new(new).map(|m| m.old)
    }

    /// New types without an old counterpart, in model order.
    pub fn added_types(&self) -> Vec<TypeId> {
        self.new
            .types()
            .iter()
            .map(|entity| entity.id())
            .filter(|id| !self.by_new.contains_key(id))
            .collect()
    }

    pub fn removed_types(&self) -> Vec<TypeId> {
        self.old
            .types()
            .iter()
            .map(|entity| entity.id())
            .filter(|id| !self.by_old.contains_key(id))
            .collect()
    }

    /// New name of an old field, looked up through the type that declares it.
    pub fn new_field_name(&self, old_owner: TypeId, field: &str) -> Option<&str> {
        self.match_of_old(old_owner)?
            .field_by_old(field)
            .map(|m| m.new.as_str())
    }

    pub fn describe(&self, change: &SchemaChange) -> String {
        let old = |id: &TypeId| self.old.get(*id).name();
        let new = |id: &TypeId| self.new.get(*id).name();
        match change {
            SchemaChange::TypeAdded { new: id } => format!("type {} added", new(id)),
            SchemaChange::TypeRemoved { old: id } => format!("type {} removed", old(id)),
            SchemaChange::TypeRenamed { old: o, new: n } => {
                format!("type {} renamed to {}", old(o), new(n))
            }
            SchemaChange::ParentChanged { old: o, new: n } => {
                let from = self.old.get(*o).parent().map(|p| self.old.get(p).name()).unwrap_or("<root>");
                let to = self.new.get(*n).parent().map(|p| self.new.get(p).name()).unwrap_or("<root>");
                format!("type {} parent {} -> {}", new(n), from, to)
            }
            SchemaChange::FieldAdded { new: id, field } => format!("field {}.{} added", new(id), field),
            SchemaChange::FieldRemoved { old: id, field } => format!("field {}.{} removed", old(id), field),
            SchemaChange::FieldRenamed { new: id, from, to, .. } => {
                format!("field {}.{} renamed to {}", new(id), from, to)
            }
            SchemaChange::FieldRetyped { new: id, field, .. } => format!("field {}.{} retyped", new(id), field),
            SchemaChange::FullTextChanged { new: id, field, enabled } => format!(
                "field {}.{} full-text {}",
                new(id),
                field,
                if *enabled { "enabled" } else { "disabled" }
            ),
            SchemaChange::IndexAdded { new: id, index } => format!("index {} on {} added", index, new(id)),
            SchemaChange::IndexRemoved { old: id, index } => format!("index {} on {} removed", index, old(id)),
            SchemaChange::KeyChanged { new: id, field, .. } => format!("key {}.{} changed", new(id), field),
        }
    }
}

pub struct Comparer<'c> {
    config: &'c UpgradeConfig,
    hints: RenameHints,
}

impl<'c> Comparer<'c> {
    pub fn new(config: &'c UpgradeConfig) -> Self {
        Self {
            config,
            hints: RenameHints::default(),
        }
    }

    pub fn with_hints(mut self, hints: RenameHints) -> Self {
        self.hints = hints;
        self
    }

    pub fn compare<'m>(&self, old: &'m Model, new: &'m Model) -> Result<ModelDiff<'m>> {
        let pairs = self.match_types(old, new)?;

        let mut diff = ModelDiff {
            old,
            new,
            matches: Vec::with_capacity(pairs.len()),
            by_old: HashMap::new(),
            by_new: HashMap::new(),
            changes: Vec::new(),
        };
        for (idx, (o, n)) in pairs.iter().enumerate() {
            diff.by_old.insert(*o, idx);
            diff.by_new.insert(*n, idx);
            diff.matches.push(TypeMatch {
                old: *o,
                new: *n,
                fields: Vec::new(),
            });
        }

        let mut violations = Vec::new();
        for idx in 0..diff.matches.len() {
            let (fields, changes) = self.diff_fields(&diff, idx, &mut violations);
            diff.matches[idx].fields = fields;
            diff.changes.extend(changes);
        }
        if !violations.is_empty() {
            return Err(DbError::ModelValidation(violations));
        }

        for id in diff.removed_types() {
            diff.changes.push(SchemaChange::TypeRemoved { old: id });
        }
        for id in diff.added_types() {
            diff.changes.push(SchemaChange::TypeAdded { new: id });
        }

        let mut structural = Vec::new();
        for m in &diff.matches {
            if old.get(m.old).name() != new.get(m.new).name() {
                structural.push(SchemaChange::TypeRenamed { old: m.old, new: m.new });
            }
            let old_parent = old.get(m.old).parent().and_then(|p| diff.new_of(p));
            let new_parent = new.get(m.new).parent();
            if old_parent != new_parent || old.get(m.old).parent().is_some() != new_parent.is_some() {
                structural.push(SchemaChange::ParentChanged { old: m.old, new: m.new });
            }
            structural.extend(index_changes(&diff, m));
        }
        diff.changes.extend(structural);

        debug!(
            part = new.name(),
            matched = diff.matches.len(),
            changes = diff.changes.len(),
            "models compared"
        );
        Ok(diff)
    }

    fn match_types(&self, old: &Model, new: &Model) -> Result<Vec<(TypeId, TypeId)>> {
        let mut violations = Vec::new();
        let mut old_taken = HashSet::new();
        let mut new_taken = HashSet::new();
        let mut pairs = Vec::new();

        for hint in &self.hints.types {
            match (old.type_id(&hint.from), new.type_id(&hint.to)) {
                (Some(o), Some(n)) => {
                    if !old_taken.insert(o) || !new_taken.insert(n) {
                        violations.push(ModelViolation::new(
                            Some(&hint.to),
                            format!("rename hint {} -> {} overlaps another hint", hint.from, hint.to),
                        ));
                        continue;
                    }
                    pairs.push((o, n));
                }
                (None, _) => violations.push(ModelViolation::new(
                    Some(&hint.from),
                    "rename hint names a type missing from the deployed model",
                )),
                (_, None) => violations.push(ModelViolation::new(
                    Some(&hint.to),
                    "rename hint names a type missing from the new model",
                )),
            }
        }
        for name in &self.hints.new_types {
            if new.type_id(name).is_none() {
                violations.push(ModelViolation::new(Some(name), "type marked as new is not declared"));
            }
        }
        if !violations.is_empty() {
            return Err(DbError::ModelValidation(violations));
        }

        for entity in new.types() {
            if new_taken.contains(&entity.id()) || self.hints.new_types.iter().any(|n| n == entity.name()) {
                continue;
            }
            if let Some(o) = old.type_id(entity.name())
                && !old_taken.contains(&o)
            {
                old_taken.insert(o);
                new_taken.insert(entity.id());
                pairs.push((o, entity.id()));
            }
        }

        let mut ambiguous = Vec::new();
        for entity in new.types() {
            if new_taken.contains(&entity.id()) || self.hints.new_types.iter().any(|n| n == entity.name()) {
                continue;
            }
            let candidates: Vec<(String, f64)> = old
                .types()
                .iter()
                .filter(|o| !old_taken.contains(&o.id()))
                .filter_map(|o| {
                    let (shared, ratio) = overlap(old, o.id(), new, entity.id());
                    (shared >= self.config.rename_min_shared_fields
                        && ratio >= self.config.rename_overlap_threshold)
                        .then(|| (o.name().to_string(), ratio))
                })
                .collect();
            if !candidates.is_empty() {
                ambiguous.push(RenameCandidate {
                    new_type: entity.name().to_string(),
                    candidates,
                });
            }
        }
        if !ambiguous.is_empty() {
            return Err(DbError::AmbiguousRename(ambiguous));
        }

        pairs.sort_by_key(|(_, n)| *n);
        Ok(pairs)
    }

    fn diff_fields(
        &self,
        diff: &ModelDiff<'_>,
        idx: usize,
        violations: &mut Vec<ModelViolation>,
    ) -> (Vec<FieldMatch>, Vec<SchemaChange>) {
        let (old, new) = (diff.old, diff.new);
        let m = &diff.matches[idx];
        let old_type = old.get(m.old);
        let new_type = new.get(m.new);

        let mut pairs: Vec<(&FieldDescriptor, &FieldDescriptor)> = Vec::new();
        let mut old_taken = HashSet::new();
        let mut new_taken = HashSet::new();

        for hint in self.hints.fields.iter().filter(|h| h.type_name == new_type.name()) {
            match (old_type.field(&hint.from), new_type.field(&hint.to)) {
                (Some(o), Some(n)) if old_taken.insert(o.name()) && new_taken.insert(n.name()) => {
                    pairs.push((o, n));
                }
                (Some(_), Some(_)) => violations.push(ModelViolation::new(
                    Some(new_type.name()),
                    format!("field rename hint {} -> {} overlaps another hint", hint.from, hint.to),
                )),
                _ => violations.push(ModelViolation::new(
                    Some(new_type.name()),
                    format!("field rename hint {} -> {} names an unknown field", hint.from, hint.to),
                )),
            }
        }
        for field in new_type.fields() {
            if new_taken.contains(field.name()) {
                continue;
            }
            if let Some(o) = old_type.field(field.name())
                && !old_taken.contains(o.name())
            {
                old_taken.insert(o.name());
                new_taken.insert(field.name());
                pairs.push((o, field));
            }
        }

        let mut fields = Vec::with_capacity(pairs.len());
        let mut changes = Vec::new();
        for (o, n) in pairs {
            let retyped = is_retyped(diff, o, n);
            if o.name() != n.name() {
                changes.push(SchemaChange::FieldRenamed {
                    old: m.old,
                    new: m.new,
                    from: o.name().to_string(),
                    to: n.name().to_string(),
                });
            }
            if o.is_key() || n.is_key() {
                if o.is_key() != n.is_key() || o.data_type() != n.data_type() {
                    changes.push(SchemaChange::KeyChanged {
                        old: m.old,
                        new: m.new,
                        field: n.name().to_string(),
                    });
                }
            } else if retyped {
                changes.push(SchemaChange::FieldRetyped {
                    old: m.old,
                    new: m.new,
                    field: n.name().to_string(),
                });
            }
            if o.is_full_text() != n.is_full_text() {
                changes.push(SchemaChange::FullTextChanged {
                    new: m.new,
                    field: n.name().to_string(),
                    enabled: n.is_full_text(),
                });
            }
            fields.push(FieldMatch {
                old: o.name().to_string(),
                new: n.name().to_string(),
                retyped,
            });
        }

        for field in old_type.fields() {
            if !old_taken.contains(field.name()) {
                changes.push(SchemaChange::FieldRemoved {
                    old: m.old,
                    field: field.name().to_string(),
                });
            }
        }
        for field in new_type.fields() {
            if !new_taken.contains(field.name()) {
                changes.push(SchemaChange::FieldAdded {
                    new: m.new,
                    field: field.name().to_string(),
                });
            }
        }

        (fields, changes)
    }
}

fn is_retyped(diff: &ModelDiff<'_>, old: &FieldDescriptor, new: &FieldDescriptor) -> bool {
    let target_changed = match (old.field_type(), new.field_type()) {
        (FieldType::Reference(o), FieldType::Reference(n)) => diff.new_of(o) != Some(n),
        (o, n) => o.data_type() != n.data_type(),
    };
    target_changed
        || old.data_type() != new.data_type()
        || old.is_nullable() != new.is_nullable()
        || old.default_value() != new.default_value()
}

/// Identical fields (same name and type) and their share of the new type's fields.
fn overlap(old: &Model, o: TypeId, new: &Model, n: TypeId) -> (usize, f64) {
    let new_fields = new.all_fields(n);
    if new_fields.is_empty() {
        return (0, 0.0);
    }
    let old_fields = old.all_fields(o);
    let shared = new_fields
        .iter()
        .filter(|(_, nf)| {
            old_fields
                .iter()
                .any(|(_, of)| of.name() == nf.name() && of.data_type() == nf.data_type())
        })
        .count();
    (shared, shared as f64 / new_fields.len() as f64)
}

/// Index changes of one matched type; field lists are compared after field renames.
fn index_changes(diff: &ModelDiff<'_>, m: &TypeMatch) -> Vec<SchemaChange> {
    let old_type = diff.old.get(m.old);
    let new_type = diff.new.get(m.new);
    let mut changes = Vec::new();

    for index in old_type.indexes() {
        let renamed: Option<Vec<String>> = index
            .fields()
            .iter()
            .map(|field| {
                let (owner, _) = diff.old.find_field(m.old, field)?;
                diff.new_field_name(owner, field).map(str::to_string)
            })
            .collect();
        match new_type.index(index.name()) {
            Some(current) if renamed.as_deref() == Some(current.fields()) => {}
            Some(_) => {
                changes.push(SchemaChange::IndexRemoved {
                    old: m.old,
                    index: index.name().to_string(),
                });
                changes.push(SchemaChange::IndexAdded {
                    new: m.new,
                    index: index.name().to_string(),
                });
            }
            None => changes.push(SchemaChange::IndexRemoved {
                old: m.old,
                index: index.name().to_string(),
            }),
        }
    }
    for index in new_type.indexes() {
        if old_type.index(index.name()).is_none() {
            changes.push(SchemaChange::IndexAdded {
                new: m.new,
                index: index.name().to_string(),
            });
        }
    }
    changes
}
