use modelshift::{
    DataType, DbError, Entity, EntitySpec, FieldSpec, Model, RenameHints, Store, UpgradeConfig, Upgrader, Value,
};

fn root(name: &str, fields: &[(&str, DataType)]) -> EntitySpec {
    let mut spec = EntitySpec::root(name).field(FieldSpec::key("Id", DataType::Int64));
    for (field, data_type) in fields {
        spec = spec.field(FieldSpec::new(*field, *data_type));
    }
    spec
}

fn model(entities: Vec<EntitySpec>) -> Model {
    Model::builder("Catalog").entities(entities).build().expect("valid model")
}

fn two_similar_types() -> Model {
    model(vec![
        root("A", &[("W", DataType::String), ("X", DataType::Int32), ("Y", DataType::Boolean), ("Z", DataType::String)]),
        root("B", &[("W", DataType::String), ("X", DataType::Int32), ("Y", DataType::Boolean), ("Q", DataType::Int64)]),
    ])
}

fn merged_type() -> Model {
    model(vec![root(
        "C",
        &[("W", DataType::String), ("X", DataType::Int32), ("Y", DataType::Boolean), ("R", DataType::Float64)],
    )])
}

#[test]
fn test_two_equally_close_candidates_are_ambiguous() -> anyhow::Result<()> {
    let store = Store::new();
    Upgrader::new(&store).upgrade(&two_similar_types())?;

    let err = Upgrader::new(&store).plan(&merged_type()).unwrap_err();
    let DbError::AmbiguousRename(ambiguous) = err else {
        panic!("expected an ambiguous rename, got {err}");
    };
    assert_eq!(ambiguous.len(), 1);
    assert_eq!(ambiguous[0].new_type, "C");
    let mut names: Vec<&str> = ambiguous[0].candidates.iter().map(|(name, _)| name.as_str()).collect();
    names.sort();
    assert_eq!(names, vec!["A", "B"]);
    assert!(ambiguous[0].candidates.iter().all(|(_, ratio)| (*ratio - 0.8).abs() < 1e-9));

    // Nothing was applied.
    assert!(store.catalog("Catalog")?.table_exists("A"));
    Ok(())
}

#[test]
fn test_rename_hint_resolves_ambiguity() -> anyhow::Result<()> {
    let store = Store::new();
    Upgrader::new(&store).upgrade(&two_similar_types())?;
    store.insert(
        "Catalog",
        &Entity::new("A").with("Id", 1i64).with("W", "w").with("X", 7i32).with("Y", true).with("Z", "gone"),
    )?;
    store.insert("Catalog", &Entity::new("B").with("Id", 2i64).with("W", "b"))?;

    let outcome = Upgrader::new(&store)
        .with_hints(RenameHints::new().rename_type("A", "C"))
        .upgrade(&merged_type())?;
    assert!(outcome.report.is_ok());

    let catalog = store.catalog("Catalog")?;
    assert!(catalog.table_exists("C"));
    assert!(!catalog.table_exists("A"));
    assert!(!catalog.table_exists("B"));

    let row = store.get("Catalog", "C", &Value::Integer(1))?.expect("renamed row");
    assert_eq!(row.get("W"), Some(&Value::Text("w".into())));
    assert_eq!(row.get("X"), Some(&Value::Integer(7)));
    assert_eq!(row.get("R"), Some(&Value::Null));
    assert!(row.get("Z").is_none());
    Ok(())
}

fn person() -> Model {
    model(vec![root("Person", &[("First", DataType::String), ("Last", DataType::String)])])
}

fn swap_hints() -> RenameHints {
    RenameHints::new()
        .rename_field("Person", "First", "Last")
        .rename_field("Person", "Last", "First")
}

#[test]
fn test_field_swap_needs_intermediate_renames() -> anyhow::Result<()> {
    let store = Store::new();
    Upgrader::new(&store).upgrade(&person())?;
    store.insert(
        "Catalog",
        &Entity::new("Person").with("Id", 1i64).with("First", "Grace").with("Last", "Hopper"),
    )?;

    let err = Upgrader::new(&store).with_hints(swap_hints()).upgrade(&person()).unwrap_err();
    assert!(matches!(err, DbError::UnsatisfiablePlan(_)), "{err}");

    let config = UpgradeConfig::default().allow_intermediate_renames(true);
    let outcome = Upgrader::new(&store)
        .with_config(config)
        .with_hints(swap_hints())
        .upgrade(&person())?;
    assert_eq!(outcome.plan.len(), 3);
    assert!(outcome.report.is_ok(), "{}", outcome.report);

    let grace = store.get("Catalog", "Person", &Value::Integer(1))?.expect("person");
    assert_eq!(grace.get("First"), Some(&Value::Text("Hopper".into())));
    assert_eq!(grace.get("Last"), Some(&Value::Text("Grace".into())));
    Ok(())
}

#[test]
fn test_explicit_new_type_is_not_a_rename() -> anyhow::Result<()> {
    let store = Store::new();
    Upgrader::new(&store).upgrade(&two_similar_types())?;
    store.insert("Catalog", &Entity::new("A").with("Id", 1i64))?;

    Upgrader::new(&store)
        .with_hints(RenameHints::new().new_type("C"))
        .upgrade(&merged_type())?;
    assert_eq!(store.count("Catalog", "C")?, 0);
    assert!(!store.catalog("Catalog")?.table_exists("A"));
    Ok(())
}
