mod common;

use std::sync::atomic::{AtomicUsize, Ordering};

use common::{PART, dump, int, zoo_hints, zoo_store, zoo_v2};
use modelshift::{
    DataType, DbError, Entity, EntitySpec, FieldSpec, Model, Result, Store, UpgradeConfig, UpgradeObserver,
    UpgradeOperation, UpgradeState, Upgrader, Value,
};

#[test]
fn test_moved_type_keeps_its_rows() -> anyhow::Result<()> {
    let store = zoo_store();
    let outcome = Upgrader::new(&store).with_hints(zoo_hints()).upgrade(&zoo_v2())?;
    assert!(outcome.result.preserved(), "{}", outcome.result);
    assert_eq!(outcome.report.rows_checked, 4);

    let dogs = store.query(PART, "Pet")?;
    assert_eq!(dogs.len(), 2);
    assert!(dogs.iter().all(|dog| dog.type_name == "Dog"));

    let rex = store.get(PART, "Dog", &int(11))?.expect("Rex moved");
    assert_eq!(rex.get("PetId"), Some(&int(11)));
    assert_eq!(rex.get("Barks"), Some(&Value::Boolean(true)));
    assert_eq!(rex.get("Nick"), Some(&Value::Null));
    assert!(rex.get("Name").is_none());

    // Only the tortoise and the renamed cat are left in the Animal table.
    assert_eq!(store.count(PART, "Animal")?, 2);
    assert_eq!(store.count_exact(PART, "Animal")?, 1);
    let catalog = store.catalog(PART)?;
    let animal = catalog.get_table("Animal")?;
    assert!(animal.columns().iter().all(|column| column.name != "Barks"));
    assert!(catalog.table_exists("Pet"));
    Ok(())
}

#[test]
fn test_renamed_and_retyped_fields_keep_values() -> anyhow::Result<()> {
    let store = zoo_store();
    Upgrader::new(&store).with_hints(zoo_hints()).upgrade(&zoo_v2())?;

    let tom = store.get(PART, "Feline", &int(13))?.expect("Tom renamed");
    assert_eq!(tom.get("Lives"), Some(&int(9)));
    assert_eq!(tom.get("Age"), Some(&int(3)));
    assert_eq!(tom.get("Weight"), Some(&Value::Float(4.75)));
    assert!(store.get(PART, "Cat", &int(13))?.is_none());

    let tortoise = store.get(PART, "Animal", &int(10))?.expect("tortoise");
    assert_eq!(tortoise.get("Age"), Some(&int(120)));
    assert_eq!(tortoise.get("Keeper"), Some(&int(1)));
    assert_eq!(tortoise.get("Tag"), Some(&Value::Null));

    let ada = store.get(PART, "Keeper", &int(1))?.expect("keeper");
    assert_eq!(ada.get("FullName"), Some(&Value::Text("Ada".into())));

    let by_name = store.find_by_index(PART, "Animal", "idx_Animal_Name", &[Value::Text("Tom".into())])?;
    assert_eq!(by_name.len(), 1);
    assert_eq!(by_name[0].type_name, "Feline");
    Ok(())
}

#[test]
fn test_moved_rows_pass_verification_with_full_sampling() -> anyhow::Result<()> {
    let store = zoo_store();
    let config = UpgradeConfig::default().verify_sample_size(100);
    let outcome = Upgrader::new(&store)
        .with_config(config)
        .with_hints(zoo_hints())
        .upgrade(&zoo_v2())?;
    // Keepers, the tortoise, both dogs and the cat.
    assert_eq!(outcome.report.rows_checked, 6);
    assert!(outcome.report.is_ok());
    Ok(())
}

fn garden(color_parent: &str) -> Model {
    Model::builder("Garden")
        .entity(
            EntitySpec::root("Plant")
                .field(FieldSpec::key("Id", DataType::Int64))
                .field(FieldSpec::new("Name", DataType::String)),
        )
        .entity(EntitySpec::derived("Tree", "Plant").field(FieldSpec::new("Height", DataType::Int32)))
        .entity(EntitySpec::derived("Rose", color_parent).field(FieldSpec::new("Color", DataType::String)))
        .build()
        .expect("valid garden model")
}

#[test]
fn test_reparenting_without_full_text_keeps_search_usable() -> anyhow::Result<()> {
    let store = Store::new();
    Upgrader::new(&store).upgrade(&garden("Plant"))?;
    store.insert("Garden", &Entity::new("Rose").with("Id", 1i64).with("Name", "Rosa").with("Color", "red"))?;
    assert!(store.search("Garden", "Plant", "rosa")?.is_empty());

    Upgrader::new(&store).upgrade(&garden("Tree"))?;
    assert!(store.search("Garden", "Plant", "rosa")?.is_empty());
    let rose = store.get("Garden", "Rose", &int(1))?.expect("rose");
    assert_eq!(rose.get("Color"), Some(&Value::Text("red".into())));
    assert_eq!(rose.get("Height"), Some(&Value::Null));
    Ok(())
}

fn shelter(moved: bool) -> Model {
    let mut builder = Model::builder("Shelter").entity(
        EntitySpec::root("Animal")
            .field(FieldSpec::key("Id", DataType::Int64))
            .field(FieldSpec::new("Name", DataType::String)),
    );
    let (dog_parent, cat_parent) = if moved {
        builder = builder
            .entity(EntitySpec::root("Pet").field(FieldSpec::key("PetId", DataType::Int64)))
            .entity(EntitySpec::root("Stray").field(FieldSpec::key("StrayId", DataType::Int64)));
        ("Pet", "Stray")
    } else {
        ("Animal", "Animal")
    };
    builder
        .entity(EntitySpec::derived("Dog", dog_parent).field(FieldSpec::new("Barks", DataType::Boolean)))
        .entity(EntitySpec::derived("Cat", cat_parent).field(FieldSpec::new("Lives", DataType::Int16)))
        .build()
        .expect("valid shelter model")
}

fn shelter_store() -> anyhow::Result<Store> {
    let store = Store::new();
    Upgrader::new(&store).upgrade(&shelter(false))?;
    for id in 0..20i64 {
        store.insert("Shelter", &Entity::new("Dog").with("Id", id).with("Barks", id % 2 == 0))?;
        store.insert("Shelter", &Entity::new("Cat").with("Id", 100 + id).with("Lives", (id % 9) as i16))?;
    }
    Ok(store)
}

/// Positions of the data copies in the planned move.
fn copy_positions(store: &Store) -> anyhow::Result<Vec<usize>> {
    let plan = Upgrader::new(store).plan(&shelter(true))?;
    Ok(plan
        .operations
        .iter()
        .enumerate()
        .filter(|(_, op)| matches!(op, UpgradeOperation::CopyData { .. }))
        .map(|(pos, _)| pos)
        .collect())
}

#[test]
fn test_two_moves_copy_on_parallel_workers() -> anyhow::Result<()> {
    let store = shelter_store()?;
    let copies = copy_positions(&store)?;
    assert_eq!(copies.len(), 2);
    assert_eq!(copies[1], copies[0] + 1, "moves are not adjacent");

    let config = UpgradeConfig::default().copy_workers(2).copy_chunk_size(3).verify_sample_size(20);
    let outcome = Upgrader::new(&store).with_config(config).upgrade(&shelter(true))?;
    assert!(outcome.result.preserved(), "{}", outcome.result);
    assert!(outcome.report.is_ok(), "{}", outcome.report);

    assert_eq!(store.count("Shelter", "Pet")?, 20);
    assert_eq!(store.count("Shelter", "Stray")?, 20);
    assert_eq!(store.count("Shelter", "Animal")?, 0);
    let cat = store.get("Shelter", "Cat", &int(117))?.expect("moved cat");
    assert_eq!(cat.get("StrayId"), Some(&int(117)));
    assert_eq!(cat.get("Lives"), Some(&int(8)));
    Ok(())
}

/// Fails right before operation `index`.
struct FailAt {
    index: usize,
    seen: AtomicUsize,
}

impl UpgradeObserver for FailAt {
    fn before_apply(&self, index: usize, _op: &UpgradeOperation) -> Result<()> {
        self.seen.fetch_add(1, Ordering::SeqCst);
        if index == self.index {
            return Err(DbError::ExecutionError(format!("stopped at #{index}")));
        }
        Ok(())
    }
}

#[test]
fn test_failure_in_parallel_copy_group_rolls_back() -> anyhow::Result<()> {
    let store = shelter_store()?;
    let catalog_before = store.catalog("Shelter")?;
    let rows_before = dump(&store, &shelter(false));
    let copies = copy_positions(&store)?;

    let config = UpgradeConfig::default().copy_workers(2);
    let observer = FailAt {
        index: copies[1],
        seen: AtomicUsize::new(0),
    };
    let upgrader = Upgrader::new(&store).with_config(config).with_observer(&observer);
    let handle = upgrader.handle();
    let err = upgrader.upgrade(&shelter(true)).unwrap_err();

    assert!(matches!(err, DbError::Execution { index, .. } if index == copies[1]), "{err}");
    assert_eq!(handle.state(), UpgradeState::RolledBack);
    assert_eq!(store.catalog("Shelter")?, catalog_before);
    assert_eq!(dump(&store, &shelter(false)), rows_before);
    Ok(())
}
