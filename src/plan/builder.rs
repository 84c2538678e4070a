// ============================================================================
// Upgrade Plan Builder
// ============================================================================
//
// Turns an unordered model diff into an executable sequence of operations.
//
// Operations are emitted in phases so that types exist before anything that
// references or derives from them, data is copied while both the source and
// the destination columns exist, and indexes and full-text catalogs are only
// (re)built once every field operation touching them is done. Each emitted
// operation is simulated against a schema-only catalog of the part; the first
// one that cannot apply makes the whole plan unsatisfiable.
//
// ============================================================================

use std::collections::{BTreeSet, HashMap, HashSet};

use tracing::{debug, info};
use uuid::Uuid;

use crate::config::UpgradeConfig;
use crate::core::{DbError, Result};
use crate::diff::{ModelDiff, SchemaChange};
use crate::model::{FieldDescriptor, Model, TypeId};
use crate::storage::{IndexDef, PartCatalog, TableSchema};

use super::{FieldMapping, TrackedField, TrackedType, UpgradeOperation, UpgradePlan};

/// Catalog a store holds after deploying `model` into an empty part.
pub fn deployed_catalog(model: &Model) -> Result<PartCatalog> {
    let mut catalog = PartCatalog::empty(model.name());
    for root in model.types().iter().filter(|entity| entity.is_hierarchy_root()) {
        let key = model.key_field(root.id());
        let mut schema = TableSchema::new_root(root.name(), model.column_def(root.id(), key));
        for id in model.subtree(root.id()) {
            let entity = model.get(id);
            if let Some(parent) = entity.parent() {
                schema.register_type(entity.name(), model.get(parent).name())?;
            }
            for field in entity.fields().iter().filter(|field| !field.is_key()) {
                schema.add_column(model.column_def(id, field))?;
            }
        }
        for id in model.subtree(root.id()) {
            for index in model.get(id).indexes() {
                schema.add_index(index_def(model, id, index.name()))?;
            }
        }
        catalog.with_table(schema)?;
    }
    Ok(catalog)
}

fn index_def(model: &Model, owner: TypeId, name: &str) -> IndexDef {
    let entity = model.get(owner);
    IndexDef {
        name: name.to_string(),
        owner: entity.name().to_string(),
        columns: entity
            .index(name)
            .map(|index| index.fields().to_vec())
            .unwrap_or_default(),
    }
}

/// What happens to an old type during the upgrade.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Fate {
    /// Matched and still stored in the same hierarchy table.
    Stays(TypeId),
    /// Matched, but stored in a different hierarchy table afterwards.
    Moves(TypeId),
    Removed,
}

pub struct PlanBuilder<'c> {
    config: &'c UpgradeConfig,
}

impl<'c> PlanBuilder<'c> {
    pub fn new(config: &'c UpgradeConfig) -> Self {
        Self { config }
    }

    pub fn build(&self, diff: &ModelDiff<'_>) -> Result<UpgradePlan> {
        let mut planner = Planner::new(self.config, diff)?;
        planner.check_keys()?;
        planner.drop_indexes()?;
        planner.drop_removed()?;
        planner.rename_types()?;
        planner.rename_fields()?;
        planner.create_types()?;
        planner.add_fields()?;
        planner.retype_fields()?;
        planner.set_parents()?;
        planner.copy_moved()?;
        planner.drop_leftovers()?;
        planner.create_indexes()?;
        planner.rebuild_full_text()?;

        let plan = UpgradePlan {
            id: Uuid::new_v4(),
            part: diff.new_model().name().to_string(),
            operations: planner.ops,
            tracked: planner.tracked,
        };
        info!(
            plan = %plan.id,
            part = %plan.part,
            operations = plan.operations.len(),
            tracked = plan.tracked.len(),
            "upgrade plan built"
        );
        Ok(plan)
    }
}

struct Planner<'d, 'm> {
    config: &'d UpgradeConfig,
    diff: &'d ModelDiff<'m>,
    old: &'m Model,
    new: &'m Model,
    /// New model in parents-and-references-first order.
    order: Vec<TypeId>,
    fates: Vec<Fate>,
    catalog: PartCatalog,
    ops: Vec<UpgradeOperation>,
    /// Tables written by the plan, under their current names.
    touched: BTreeSet<String>,
    /// Tables that carried a full-text catalog before the upgrade, under their current names.
    had_full_text: BTreeSet<String>,
    /// Old fields converted through a shadow column, keyed by old owner.
    shadowed: HashSet<(TypeId, String)>,
    /// Indexes of the new model to create at the end.
    pending_indexes: BTreeSet<(TypeId, String)>,
    tracked: Vec<TrackedType>,
}

impl<'d, 'm> Planner<'d, 'm> {
    fn new(config: &'d UpgradeConfig, diff: &'d ModelDiff<'m>) -> Result<Self> {
        let old = diff.old();
        let new = diff.new_model();
        let order = new.dependency_order()?;
        let catalog = deployed_catalog(old)?;

        let fates = old
            .types()
            .iter()
            .map(|entity| match diff.new_of(entity.id()) {
                None => Fate::Removed,
                Some(n) => {
                    let old_root = old.root_of(entity.id());
                    if diff.new_of(old_root) == Some(new.root_of(n)) {
                        Fate::Stays(n)
                    } else {
                        Fate::Moves(n)
                    }
                }
            })
            .collect();

        let had_full_text = catalog
            .tables()
            .iter()
            .filter(|schema| !schema.full_text_columns().is_empty())
            .map(|schema| schema.name().to_string())
            .collect();

        let mut planner = Self {
            config,
            diff,
            old,
            new,
            order,
            fates,
            catalog,
            ops: Vec::new(),
            touched: BTreeSet::new(),
            had_full_text,
            shadowed: HashSet::new(),
            pending_indexes: BTreeSet::new(),
            tracked: Vec::new(),
        };
        planner.track_types();
        Ok(planner)
    }

    fn fate(&self, old: TypeId) -> Fate {
        self.fates[old.index()]
    }

    fn stays(&self, old: TypeId) -> bool {
        matches!(self.fate(old), Fate::Stays(_))
    }

    fn staying(&self) -> Vec<(TypeId, TypeId)> {
        self.old
            .types()
            .iter()
            .filter_map(|entity| match self.fate(entity.id()) {
                Fate::Stays(n) => Some((entity.id(), n)),
                _ => None,
            })
            .collect()
    }

    /// Simulates `op` and appends it to the plan.
    fn emit(&mut self, op: UpgradeOperation) -> Result<()> {
        if let Err(err) = op.simulate(&mut self.catalog) {
            return Err(DbError::UnsatisfiablePlan(format!(
                "operation #{} ({}) cannot apply: {}",
                self.ops.len(),
                op,
                err
            )));
        }
        match &op {
            UpgradeOperation::RenameType { table, from, to } if table == from => {
                for set in [&mut self.touched, &mut self.had_full_text] {
                    if set.remove(table) {
                        set.insert(to.clone());
                    }
                }
                self.touched.insert(to.clone());
            }
            UpgradeOperation::CopyData {
                source_table,
                target_table,
                ..
            } => {
                self.touched.insert(source_table.clone());
                self.touched.insert(target_table.clone());
            }
            other => {
                self.touched.insert(other.table().to_string());
            }
        }
        for table in self.catalog.tables() {
            if !table.full_text_columns().is_empty() {
                self.had_full_text.insert(table.name().to_string());
            }
        }
        debug!(index = self.ops.len(), op = %op, "planned");
        self.ops.push(op);
        Ok(())
    }

    /// Column name of an old field once renames of staying types have run.
    fn current_column(&self, owner: TypeId, field: &FieldDescriptor) -> String {
        if self.stays(owner)
            && let Some(new_name) = self.diff.new_field_name(owner, field.name())
        {
            return new_name.to_string();
        }
        field.name().to_string()
    }

    /// Old fields of `old` whose values survive into `new`, with their new names.
    fn preserved_fields(&self, old: TypeId, new: TypeId) -> Vec<(TypeId, &'m FieldDescriptor, &'m FieldDescriptor)> {
        let new_key = self.new.key_field(new);
        let mut preserved = Vec::new();
        for (owner, field) in self.old.all_fields(old) {
            if field.is_key() {
                preserved.push((owner, field, new_key));
                continue;
            }
            let Some(m) = self.diff.match_of_old(owner) else {
                continue;
            };
            if m.new != new && !self.new.is_descendant_of(new, m.new) {
                continue;
            }
            let Some(fm) = m.field_by_old(field.name()) else {
                continue;
            };
            if let Some(target) = self.new.get(m.new).field(&fm.new) {
                preserved.push((owner, field, target));
            }
        }
        preserved
    }

    fn track_types(&mut self) {
        let mut tracked = Vec::new();
        for entity in self.old.types() {
            let (Fate::Stays(n) | Fate::Moves(n)) = self.fate(entity.id()) else {
                continue;
            };
            let fields = self
                .preserved_fields(entity.id(), n)
                .into_iter()
                .map(|(_, of, nf)| TrackedField {
                    old: of.name().to_string(),
                    new: nf.name().to_string(),
                    data_type: nf.data_type(),
                    converted: of.data_type() != nf.data_type(),
                    key: of.is_key(),
                })
                .collect();
            tracked.push(TrackedType {
                old_name: entity.name().to_string(),
                new_name: self.new.get(n).name().to_string(),
                fields,
            });
        }
        self.tracked = tracked;
    }

    fn needs_shadow(&self, old_owner: TypeId, field: &str) -> bool {
        let Some(m) = self.diff.match_of_old(old_owner) else {
            return false;
        };
        let Some(fm) = m.field_by_old(field) else {
            return false;
        };
        let (Some(of), Some(nf)) = (self.old.get(m.old).field(&fm.old), self.new.get(m.new).field(&fm.new)) else {
            return false;
        };
        fm.retyped && !of.is_key() && !of.data_type().is_widening_to(&nf.data_type())
    }

    fn check_keys(&mut self) -> Result<()> {
        for change in self.diff.changes() {
            if let SchemaChange::KeyChanged { .. } = change {
                return Err(DbError::UnsatisfiablePlan(format!(
                    "{}: key fields cannot be changed in place",
                    self.diff.describe(change)
                )));
            }
        }
        for (o, _) in self.staying() {
            let entity = self.old.get(o);
            if !entity.is_hierarchy_root() {
                continue;
            }
            let key = self.old.key_field(o);
            if self.diff.new_field_name(o, key.name()).is_none() {
                return Err(DbError::UnsatisfiablePlan(format!(
                    "key field {}.{} has no counterpart in the new model",
                    entity.name(),
                    key.name()
                )));
            }
        }
        for (o, _) in self.staying() {
            for field in self.old.get(o).fields() {
                if self.needs_shadow(o, field.name()) {
                    self.shadowed.insert((o, field.name().to_string()));
                }
            }
        }
        Ok(())
    }

    /// Drops indexes that are removed, belong to types leaving their table,
    /// or cover a field about to be rebuilt through a shadow column.
    fn drop_indexes(&mut self) -> Result<()> {
        let mut drops: Vec<(String, String)> = Vec::new();
        let push = |drops: &mut Vec<(String, String)>, table: &str, name: &str| {
            if !drops.iter().any(|(t, n)| t == table && n == name) {
                drops.push((table.to_string(), name.to_string()));
            }
        };

        for entity in self.old.types() {
            if self.stays(entity.id()) {
                continue;
            }
            let table = self.old.table_name(entity.id());
            for index in entity.indexes() {
                push(&mut drops, table, index.name());
            }
        }
        for change in self.diff.changes() {
            if let SchemaChange::IndexRemoved { old, index } = change
                && self.stays(*old)
            {
                push(&mut drops, self.old.table_name(*old), index);
            }
        }

        let shadowed: Vec<(TypeId, String)> = self.shadowed.iter().cloned().collect();
        for (owner, field) in shadowed {
            let table = self.old.table_name(owner).to_string();
            let covering: Vec<IndexDef> = self
                .catalog
                .get_table(&table)?
                .indexes()
                .iter()
                .filter(|index| index.columns.contains(&field))
                .cloned()
                .collect();
            for index in covering {
                push(&mut drops, &table, &index.name);
                if let Some(index_owner) = self.old.type_id(&index.owner)
                    && let Fate::Stays(n) = self.fate(index_owner)
                    && self.new.get(n).index(&index.name).is_some()
                {
                    self.pending_indexes.insert((n, index.name.clone()));
                }
            }
        }

        for (table, name) in drops {
            self.emit(UpgradeOperation::DropIndex { table, name })?;
        }
        Ok(())
    }

    /// Removed fields of staying types, and removed types whose whole subtree goes too.
    fn drop_removed(&mut self) -> Result<()> {
        for change in self.diff.changes() {
            if let SchemaChange::FieldRemoved { old, field } = change
                && self.stays(*old)
            {
                self.emit(UpgradeOperation::DropField {
                    table: self.old.table_name(*old).to_string(),
                    column: field.clone(),
                })?;
            }
        }

        let mut removed: Vec<TypeId> = self
            .diff
            .removed_types()
            .into_iter()
            .filter(|id| {
                self.old
                    .subtree(*id)
                    .iter()
                    .all(|member| self.fate(*member) == Fate::Removed)
            })
            .collect();
        removed.sort_by_key(|id| std::cmp::Reverse(self.old.ancestors(*id).len()));
        for id in removed {
            self.emit(UpgradeOperation::DropType {
                table: self.old.table_name(id).to_string(),
                type_name: self.old.get(id).name().to_string(),
            })?;
        }
        Ok(())
    }

    fn rename_types(&mut self) -> Result<()> {
        // Renaming a staying root renames its table; derived renames follow.
        let mut pending: Vec<(String, String)> = Vec::new();
        for (o, n) in self.staying() {
            let from = self.old.get(o).name();
            let to = self.new.get(n).name();
            if from != to {
                pending.push((from.to_string(), to.to_string()));
            }
        }
        if pending.is_empty() {
            return Ok(());
        }

        let catalog = &self.catalog;
        let (old, new) = (self.old, self.new);
        let ordered = order_renames(
            "type",
            pending,
            |name| catalog.table_of_type(name).is_some() || catalog.table_exists(name),
            |name| old.type_id(name).is_some() || new.type_id(name).is_some(),
            self.config.allow_intermediate_renames,
        )?;

        for (from, to) in ordered {
            let table = self
                .catalog
                .table_of_type(&from)
                .map(|schema| schema.name().to_string())
                .ok_or_else(|| DbError::TypeNotFound(from.clone()))?;
            self.emit(UpgradeOperation::RenameType { table, from, to })?;
        }
        Ok(())
    }

    fn type_name_after_renames(&self, old: TypeId) -> &'m str {
        match self.fate(old) {
            Fate::Stays(n) => self.new.get(n).name(),
            _ => self.old.get(old).name(),
        }
    }

    /// Table holding the rows of an old type once staying types are renamed.
    fn current_table(&self, old: TypeId) -> &'m str {
        self.type_name_after_renames(self.old.root_of(old))
    }

    fn rename_fields(&mut self) -> Result<()> {
        let mut per_table: Vec<(String, Vec<(String, String)>)> = Vec::new();
        for (o, n) in self.staying() {
            let Some(m) = self.diff.match_of_old(o) else {
                continue;
            };
            let table = self.new.table_name(n).to_string();
            for fm in m.fields.iter().filter(|fm| fm.old != fm.new) {
                let pair = (fm.old.clone(), fm.new.clone());
                match per_table.iter_mut().find(|(t, _)| *t == table) {
                    Some((_, pending)) => pending.push(pair),
                    None => per_table.push((table.clone(), vec![pair])),
                }
            }
        }

        for (table, pending) in per_table {
            let schema = self.catalog.get_table(&table)?;
            let (old, new) = (self.old, self.new);
            let ordered = order_renames(
                "field",
                pending,
                |name| schema.column(name).is_some(),
                |name| {
                    old.types().iter().any(|t| t.field(name).is_some())
                        || new.types().iter().any(|t| t.field(name).is_some())
                },
                self.config.allow_intermediate_renames,
            )?;
            for (from, to) in ordered {
                self.emit(UpgradeOperation::RenameField {
                    table: table.clone(),
                    from,
                    to,
                })?;
            }
        }
        Ok(())
    }

    /// Added types and types moving to another table, parents and referenced types first.
    fn arriving(&self) -> Vec<TypeId> {
        let mut arriving: HashSet<TypeId> = self.diff.added_types().into_iter().collect();
        for entity in self.old.types() {
            if let Fate::Moves(n) = self.fate(entity.id()) {
                arriving.insert(n);
            }
        }
        self.order.iter().copied().filter(|id| arriving.contains(id)).collect()
    }

    fn create_types(&mut self) -> Result<()> {
        for n in self.arriving() {
            let entity = self.new.get(n);
            let op = match entity.parent() {
                None => UpgradeOperation::CreateType {
                    table: entity.name().to_string(),
                    type_name: entity.name().to_string(),
                    parent: None,
                    key: Some(self.new.column_def(n, self.new.key_field(n))),
                },
                Some(parent) => UpgradeOperation::CreateType {
                    table: self.new.table_name(n).to_string(),
                    type_name: entity.name().to_string(),
                    parent: Some(self.new.get(parent).name().to_string()),
                    key: None,
                },
            };
            self.emit(op)?;
        }
        Ok(())
    }

    fn add_fields(&mut self) -> Result<()> {
        let mut columns: Vec<(TypeId, String)> = Vec::new();
        for n in self.arriving() {
            for field in self.new.get(n).fields().iter().filter(|field| !field.is_key()) {
                columns.push((n, field.name().to_string()));
            }
        }
        for change in self.diff.changes() {
            if let SchemaChange::FieldAdded { new, field } = change
                && self.diff.old_of(*new).is_some_and(|o| self.stays(o))
            {
                columns.push((*new, field.clone()));
            }
        }
        for (n, name) in columns {
            let Some(field) = self.new.get(n).field(&name) else {
                continue;
            };
            if field.is_key() {
                return Err(DbError::UnsatisfiablePlan(format!(
                    "key field {}.{} cannot be added to an existing type",
                    self.new.get(n).name(),
                    name
                )));
            }
            self.emit(UpgradeOperation::AddField {
                table: self.new.table_name(n).to_string(),
                column: self.new.column_def(n, field),
            })?;
        }
        Ok(())
    }

    /// Retypes matched fields of staying types. Reference columns whose target
    /// moved to another table under a new name are retargeted in place too.
    fn retype_fields(&mut self) -> Result<()> {
        let diff = self.diff;
        for (o, n) in self.staying() {
            let Some(m) = diff.match_of_old(o) else {
                continue;
            };
            let table = self.new.table_name(n).to_string();
            let type_name = self.new.get(n).name().to_string();
            for fm in &m.fields {
                let (Some(of), Some(nf)) = (self.old.get(o).field(&fm.old), self.new.get(n).field(&fm.new)) else {
                    continue;
                };
                if of.is_key() {
                    continue;
                }
                let column = self.new.column_def(n, nf);
                if !fm.retyped {
                    let current = self
                        .catalog
                        .get_table(&table)?
                        .column(&fm.new)
                        .map(|c| c.references.clone());
                    if current.is_some_and(|target| target != column.references) {
                        self.emit(UpgradeOperation::RetypeField {
                            table: table.clone(),
                            column,
                        })?;
                    }
                    continue;
                }
                if !self.shadowed.contains(&(o, fm.old.clone())) {
                    self.emit(UpgradeOperation::RetypeField {
                        table: table.clone(),
                        column,
                    })?;
                    continue;
                }

                let shadow_name = self.shadow_name(&table, &fm.new)?;
                let mut shadow = column.clone();
                shadow.name = shadow_name.clone();
                shadow.nullable = true;
                shadow.default = None;
                let needs_constraints = shadow.nullable != column.nullable || shadow.default != column.default;

                self.emit(UpgradeOperation::AddField {
                    table: table.clone(),
                    column: shadow,
                })?;
                self.emit(UpgradeOperation::CopyData {
                    source_table: table.clone(),
                    source_type: type_name.clone(),
                    target_table: table.clone(),
                    target_type: type_name.clone(),
                    mapping: vec![FieldMapping::new(fm.new.as_str(), shadow_name.as_str())],
                    include_descendants: true,
                })?;
                self.emit(UpgradeOperation::DropField {
                    table: table.clone(),
                    column: fm.new.clone(),
                })?;
                self.emit(UpgradeOperation::RenameField {
                    table: table.clone(),
                    from: shadow_name,
                    to: fm.new.clone(),
                })?;
                if needs_constraints {
                    self.emit(UpgradeOperation::RetypeField {
                        table: table.clone(),
                        column,
                    })?;
                }
            }
        }
        Ok(())
    }

    fn shadow_name(&self, table: &str, field: &str) -> Result<String> {
        let schema = self.catalog.get_table(table)?;
        let mut counter = 0usize;
        loop {
            let candidate = format!("__{}_{}", field, counter);
            if schema.column(&candidate).is_none() {
                return Ok(candidate);
            }
            counter += 1;
        }
    }

    fn set_parents(&mut self) -> Result<()> {
        let reparented: HashSet<TypeId> = self
            .diff
            .changes()
            .iter()
            .filter_map(|change| match change {
                SchemaChange::ParentChanged { old, new } if self.stays(*old) => Some(*new),
                _ => None,
            })
            .collect();
        for n in self.order.clone() {
            if !reparented.contains(&n) {
                continue;
            }
            let entity = self.new.get(n);
            let Some(parent) = entity.parent() else {
                continue;
            };
            self.emit(UpgradeOperation::SetParent {
                table: self.new.table_name(n).to_string(),
                type_name: entity.name().to_string(),
                parent: self.new.get(parent).name().to_string(),
            })?;
        }
        Ok(())
    }

    /// Copies rows of every moving type into its new table.
    fn copy_moved(&mut self) -> Result<()> {
        let moving: HashMap<TypeId, TypeId> = self
            .old
            .types()
            .iter()
            .filter_map(|entity| match self.fate(entity.id()) {
                Fate::Moves(n) => Some((n, entity.id())),
                _ => None,
            })
            .collect();

        for n in self.order.clone() {
            let Some(&o) = moving.get(&n) else {
                continue;
            };
            let source_table = self.current_table(o).to_string();
            let mut mapping: Vec<FieldMapping> = Vec::new();
            for (owner, of, nf) in self.preserved_fields(o, n) {
                if mapping.iter().any(|m| m.target == nf.name()) {
                    continue;
                }
                mapping.push(FieldMapping::new(self.current_column(owner, of), nf.name()));
            }
            self.emit(UpgradeOperation::CopyData {
                source_table,
                source_type: self.old.get(o).name().to_string(),
                target_table: self.new.table_name(n).to_string(),
                target_type: self.new.get(n).name().to_string(),
                mapping,
                include_descendants: false,
            })?;
        }
        Ok(())
    }

    /// Types that left their table, and removed types that still had surviving descendants.
    fn drop_leftovers(&mut self) -> Result<()> {
        let mut remaining: Vec<TypeId> = self
            .old
            .types()
            .iter()
            .map(|entity| entity.id())
            .filter(|id| match self.fate(*id) {
                Fate::Moves(_) => true,
                Fate::Removed => self
                    .catalog
                    .get_table(self.current_table(*id))
                    .is_ok_and(|schema| schema.has_type(self.old.get(*id).name())),
                Fate::Stays(_) => false,
            })
            .collect();

        while !remaining.is_empty() {
            let position = remaining.iter().position(|id| {
                let name = self.old.get(*id).name();
                self.catalog
                    .get_table(self.current_table(*id))
                    .map(|schema| {
                        let has_children = schema.types().iter().any(|entry| entry.parent.as_deref() == Some(name));
                        let other_types = schema.types().len() > 1;
                        let is_root = schema.type_entry(name).is_some_and(|entry| entry.parent.is_none());
                        !has_children && !(is_root && other_types)
                    })
                    .unwrap_or(false)
            });
            let Some(position) = position else {
                let stuck = remaining
                    .iter()
                    .map(|id| self.old.get(*id).name())
                    .collect::<Vec<_>>()
                    .join(", ");
                return Err(DbError::UnsatisfiablePlan(format!(
                    "types {} cannot be dropped because other types still derive from them",
                    stuck
                )));
            };
            let id = remaining.remove(position);
            self.emit(UpgradeOperation::DropType {
                table: self.current_table(id).to_string(),
                type_name: self.old.get(id).name().to_string(),
            })?;
        }
        Ok(())
    }

    fn create_indexes(&mut self) -> Result<()> {
        for n in self.arriving() {
            for index in self.new.get(n).indexes() {
                self.pending_indexes.insert((n, index.name().to_string()));
            }
        }
        for change in self.diff.changes() {
            if let SchemaChange::IndexAdded { new, index } = change {
                self.pending_indexes.insert((*new, index.clone()));
            }
        }

        for n in self.order.clone() {
            let names: Vec<String> = self
                .new
                .get(n)
                .indexes()
                .iter()
                .map(|index| index.name().to_string())
                .filter(|name| self.pending_indexes.contains(&(n, name.clone())))
                .collect();
            for name in names {
                self.emit(UpgradeOperation::CreateIndex {
                    table: self.new.table_name(n).to_string(),
                    index: index_def(self.new, n, &name),
                })?;
            }
        }
        Ok(())
    }

    fn rebuild_full_text(&mut self) -> Result<()> {
        let tables: Vec<String> = self
            .touched
            .iter()
            .filter(|name| {
                self.catalog.get_table(name).is_ok_and(|schema| {
                    !schema.full_text_columns().is_empty() || self.had_full_text.contains(*name)
                })
            })
            .cloned()
            .collect();
        for table in tables {
            self.emit(UpgradeOperation::RebuildFullText { table })?;
        }
        Ok(())
    }
}

/// Orders renames so no target name is taken when its rename runs.
///
/// `occupied` reports names currently held in the catalog. A target held by
/// something other than a pending rename cannot be freed. Cycles are broken
/// with a temporary name when `allow_temporary` is set.
fn order_renames(
    kind: &str,
    mut pending: Vec<(String, String)>,
    occupied: impl Fn(&str) -> bool,
    declared: impl Fn(&str) -> bool,
    allow_temporary: bool,
) -> Result<Vec<(String, String)>> {
    for (from, to) in &pending {
        if occupied(to) && !pending.iter().any(|(source, _)| source == to) {
            return Err(DbError::UnsatisfiablePlan(format!(
                "cannot rename {} {} to {}: the name is still in use",
                kind, from, to
            )));
        }
    }

    let mut ordered = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let free = pending
            .iter()
            .position(|(_, to)| !pending.iter().any(|(source, _)| source == to));
        if let Some(position) = free {
            ordered.push(pending.remove(position));
            continue;
        }
        if !allow_temporary {
            let cycle = pending
                .iter()
                .map(|(from, to)| format!("{} -> {}", from, to))
                .collect::<Vec<_>>()
                .join(", ");
            return Err(DbError::UnsatisfiablePlan(format!(
                "{} renames form a cycle ({}); allow intermediate renames to break it",
                kind, cycle
            )));
        }
        let from = pending[0].0.clone();
        let mut temporary = format!("__tmp_{}", from);
        let mut counter = 0usize;
        while occupied(&temporary) || declared(&temporary) || pending.iter().any(|(f, t)| *f == temporary || *t == temporary) {
            counter += 1;
            temporary = format!("__tmp_{}_{}", from, counter);
        }
        ordered.push((from, temporary.clone()));
        pending[0].0 = temporary;
    }
    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::DataType;
    use crate::diff::{Comparer, RenameHints};
    use crate::model::{EntitySpec, FieldSpec};

    fn zoo(animal_fields: Vec<FieldSpec>, dog: EntitySpec) -> Model {
        Model::builder("Zoo")
            .entity(
                EntitySpec::root("Animal")
                    .field(FieldSpec::key("Id", DataType::Int64))
                    .fields(animal_fields),
            )
            .entity(dog)
            .build()
            .unwrap()
    }

    fn plan(old: &Model, new: &Model, hints: RenameHints, config: &UpgradeConfig) -> Result<UpgradePlan> {
        let diff = Comparer::new(config).with_hints(hints).compare(old, new)?;
        PlanBuilder::new(config).build(&diff)
    }

    fn kinds(plan: &UpgradePlan) -> Vec<&'static str> {
        plan.operations.iter().map(UpgradeOperation::kind).collect()
    }

    #[test]
    fn test_deployed_catalog_matches_model() {
        let model = zoo(
            vec![FieldSpec::full_text("Notes")],
            EntitySpec::derived("Dog", "Animal")
                .field(FieldSpec::new("Barks", DataType::Boolean))
                .index(["Barks"]),
        );
        let catalog = deployed_catalog(&model).unwrap();
        let table = catalog.get_table("Animal").unwrap();
        assert_eq!(table.types().len(), 2);
        assert_eq!(table.full_text_columns(), ["Notes".to_string()]);
        assert_eq!(table.indexes()[0].owner, "Dog");
    }

    #[test]
    fn test_identical_models_plan_nothing() {
        let model = zoo(vec![], EntitySpec::derived("Dog", "Animal"));
        let plan = plan(&model, &model, RenameHints::new(), &UpgradeConfig::default()).unwrap();
        assert!(plan.is_empty());
        assert_eq!(plan.tracked.len(), 2);
    }

    #[test]
    fn test_narrowing_retype_uses_shadow_column() {
        let old = zoo(
            vec![FieldSpec::new("Age", DataType::Int64)],
            EntitySpec::derived("Dog", "Animal"),
        );
        let new = zoo(
            vec![FieldSpec::new("Age", DataType::Int16).not_null()],
            EntitySpec::derived("Dog", "Animal"),
        );
        let plan = plan(&old, &new, RenameHints::new(), &UpgradeConfig::default()).unwrap();
        assert_eq!(
            kinds(&plan),
            vec!["AddField", "CopyData", "DropField", "RenameField", "RetypeField"]
        );
        let UpgradeOperation::CopyData { mapping, include_descendants, .. } = &plan.operations[1] else {
            panic!("expected copy");
        };
        assert_eq!(mapping[0], FieldMapping::new("Age", "__Age_0"));
        assert!(*include_descendants);
    }

    #[test]
    fn test_widening_retype_is_in_place() {
        let old = zoo(vec![FieldSpec::new("Age", DataType::Int16)], EntitySpec::derived("Dog", "Animal"));
        let new = zoo(vec![FieldSpec::new("Age", DataType::Int64)], EntitySpec::derived("Dog", "Animal"));
        let plan = plan(&old, &new, RenameHints::new(), &UpgradeConfig::default()).unwrap();
        assert_eq!(kinds(&plan), vec!["RetypeField"]);
        assert!(plan.tracked[0].fields.iter().any(|f| f.old == "Age" && f.converted));
    }

    #[test]
    fn test_field_swap_needs_intermediate_rename() {
        let old = zoo(
            vec![FieldSpec::new("A", DataType::Int32), FieldSpec::new("B", DataType::Int32)],
            EntitySpec::derived("Dog", "Animal"),
        );
        let hints = RenameHints::new()
            .rename_field("Animal", "A", "B")
            .rename_field("Animal", "B", "A");

        let err = plan(&old, &old, hints.clone(), &UpgradeConfig::default()).unwrap_err();
        assert!(matches!(err, DbError::UnsatisfiablePlan(_)));

        let config = UpgradeConfig::default().allow_intermediate_renames(true);
        let plan = plan(&old, &old, hints, &config).unwrap();
        let renames: Vec<String> = plan.operations.iter().map(ToString::to_string).collect();
        assert_eq!(
            renames,
            vec![
                "RenameField Animal.A -> __tmp_A",
                "RenameField Animal.B -> A",
                "RenameField Animal.__tmp_A -> B",
            ]
        );
    }

    #[test]
    fn test_moving_type_copies_rows() {
        let old = zoo(
            vec![FieldSpec::new("Name", DataType::String)],
            EntitySpec::derived("Dog", "Animal").field(FieldSpec::new("Barks", DataType::Boolean)),
        );
        let new = Model::builder("Zoo")
            .entity(
                EntitySpec::root("Animal")
                    .field(FieldSpec::key("Id", DataType::Int64))
                    .field(FieldSpec::new("Name", DataType::String)),
            )
            .entity(
                EntitySpec::root("Pet")
                    .field(FieldSpec::key("PetId", DataType::Int64))
                    .field(FieldSpec::new("Name", DataType::String).nullable(true)),
            )
            .entity(EntitySpec::derived("Dog", "Pet").field(FieldSpec::new("Barks", DataType::Boolean)))
            .build()
            .unwrap();
        let plan = plan(&old, &new, RenameHints::new(), &UpgradeConfig::default()).unwrap();

        let copy = plan
            .operations
            .iter()
            .find(|op| op.is_copy())
            .expect("copy planned");
        let UpgradeOperation::CopyData { source_table, target_table, mapping, .. } = copy else {
            unreachable!();
        };
        assert_eq!(source_table, "Animal");
        assert_eq!(target_table, "Pet");
        assert!(mapping.contains(&FieldMapping::new("Id", "PetId")));
        assert!(mapping.contains(&FieldMapping::new("Barks", "Barks")));
        assert!(!mapping.iter().any(|m| m.source == "Name"));

        let copy_at = plan.operations.iter().position(UpgradeOperation::is_copy).unwrap();
        let drop_at = plan
            .operations
            .iter()
            .position(|op| matches!(op, UpgradeOperation::DropType { type_name, .. } if type_name == "Dog"))
            .unwrap();
        assert!(copy_at < drop_at);
    }

    #[test]
    fn test_key_change_is_unsatisfiable() {
        let old = zoo(vec![], EntitySpec::derived("Dog", "Animal"));
        let new = Model::builder("Zoo")
            .entity(EntitySpec::root("Animal").field(FieldSpec::key("Id", DataType::String)))
            .entity(EntitySpec::derived("Dog", "Animal"))
            .build()
            .unwrap();
        let err = plan(&old, &new, RenameHints::new(), &UpgradeConfig::default()).unwrap_err();
        assert!(matches!(err, DbError::UnsatisfiablePlan(_)));
    }
}
