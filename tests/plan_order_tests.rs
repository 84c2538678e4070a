use std::collections::HashMap;

use modelshift::{DataType, EntitySpec, FieldSpec, Model, Store, UpgradeOperation, UpgradePlan, Upgrader};
use proptest::prelude::*;

/// One generated type: derived or root, the earlier type it derives from and
/// the earlier types it references.
type Shape = (bool, usize, Vec<usize>);

fn build_model(shapes: &[Shape]) -> Model {
    let mut builder = Model::builder("Random");
    for (i, (derived, parent, refs)) in shapes.iter().enumerate() {
        let name = format!("E{i}");
        let mut spec = if *derived && i > 0 {
            EntitySpec::derived(&name, format!("E{}", parent % i))
        } else {
            EntitySpec::root(&name).field(FieldSpec::key("Id", DataType::Int64))
        };
        spec = spec.field(FieldSpec::new(format!("Value{i}"), DataType::Int32));
        if i > 0 {
            let mut targets: Vec<usize> = refs.iter().map(|r| r % i).collect();
            targets.sort_unstable();
            targets.dedup();
            for target in targets {
                spec = spec.field(FieldSpec::reference(format!("Ref{i}_{target}"), format!("E{target}")));
            }
        }
        builder = builder.entity(spec.index([format!("Value{i}")]));
    }
    builder.build().expect("generated model is valid")
}

fn shapes() -> impl Strategy<Value = Vec<Shape>> {
    proptest::collection::vec(
        (any::<bool>(), 0..16usize, proptest::collection::vec(0..16usize, 0..3)),
        1..10,
    )
}

/// Position of the operation creating each type.
fn created_at(plan: &UpgradePlan) -> HashMap<String, usize> {
    plan.operations
        .iter()
        .enumerate()
        .filter_map(|(pos, op)| match op {
            UpgradeOperation::CreateType { type_name, .. } => Some((type_name.clone(), pos)),
            _ => None,
        })
        .collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn prop_deploy_creates_targets_first(shapes in shapes()) {
        let model = build_model(&shapes);
        let store = Store::new();
        let plan = Upgrader::new(&store).plan(&model).unwrap();
        let created = created_at(&plan);
        prop_assert_eq!(created.len(), model.len());

        for (pos, op) in plan.operations.iter().enumerate() {
            match op {
                UpgradeOperation::CreateType { parent: Some(parent), .. } => {
                    prop_assert!(created[parent] < pos, "{} created before its parent", op);
                }
                UpgradeOperation::AddField { column, .. } => {
                    if let Some(target) = &column.references {
                        prop_assert!(created[target] < pos, "{} added before its target exists", op);
                    }
                }
                _ => {}
            }
        }
    }

    #[test]
    fn prop_deployed_model_replans_empty(shapes in shapes()) {
        let model = build_model(&shapes);
        let store = Store::new();
        Upgrader::new(&store).upgrade(&model).unwrap();
        let plan = Upgrader::new(&store).plan(&model).unwrap();
        prop_assert!(plan.is_empty(), "{}", plan);
    }

    #[test]
    fn prop_removal_drops_children_first(shapes in shapes()) {
        let model = build_model(&shapes);
        let store = Store::new();
        Upgrader::new(&store).upgrade(&model).unwrap();

        let plan = Upgrader::new(&store).plan(&Model::empty("Random")).unwrap();
        let dropped: HashMap<&str, usize> = plan
            .operations
            .iter()
            .enumerate()
            .filter_map(|(pos, op)| match op {
                UpgradeOperation::DropType { type_name, .. } => Some((type_name.as_str(), pos)),
                _ => None,
            })
            .collect();
        prop_assert_eq!(dropped.len(), model.len());
        for entity in model.types() {
            if let Some(parent) = entity.parent() {
                let parent = model.get(parent).name();
                prop_assert!(dropped[entity.name()] < dropped[parent]);
            }
        }

        Upgrader::new(&store).upgrade(&Model::empty("Random")).unwrap();
        prop_assert!(store.catalog("Random").unwrap().is_empty());
    }
}
