use modelshift::{ChainFixture, ChainLayout, DataType, Store, UpgradeConfig, Upgrader, Value};

fn deploy(store: &Store, fixture: &ChainFixture) -> anyhow::Result<()> {
    Upgrader::new(store).upgrade(&fixture.model()?)?;
    fixture.populate(store)?;
    Ok(())
}

#[test]
fn test_depth_100_chain_survives_upgrade_in_both_parts() -> anyhow::Result<()> {
    let store = Store::new();
    let config = UpgradeConfig::default();
    let one = ChainFixture::new("PartOne", 100, ChainLayout::Inheritance);
    let two = ChainFixture::new("PartTwo", 100, ChainLayout::Independent).with_prefix("TestEntityTwo");
    deploy(&store, &one)?;
    deploy(&store, &two)?;

    let outcome = Upgrader::new(&store).upgrade(&one.evolve().model()?)?;
    assert!(outcome.result.preserved(), "{}", outcome.result);
    assert_eq!(outcome.report.rows_checked, 100);
    assert!(one.evolve().check(&store, &config)?.is_ok());

    // PartTwo has not been touched by upgrading PartOne.
    assert!(two.check(&store, &config)?.is_ok());
    let plan = Upgrader::new(&store).plan(&two.model()?)?;
    assert!(plan.is_empty(), "{}", plan);

    let outcome = Upgrader::new(&store).upgrade(&two.evolve().model()?)?;
    assert!(outcome.result.preserved());
    let report = two.evolve().check(&store, &config)?;
    assert!(report.is_ok(), "{}", report);
    Ok(())
}

#[test]
fn test_each_chain_type_holds_its_populated_row() -> anyhow::Result<()> {
    let store = Store::new();
    let fixture = ChainFixture::new("Chain", 100, ChainLayout::Independent);
    deploy(&store, &fixture)?;
    Upgrader::new(&store).upgrade(&fixture.evolve().model()?)?;

    let t0 = store.get("Chain", "T0", &Value::Integer(0))?.expect("T0 row");
    assert_eq!(t0.get("Bool0"), Some(&Value::Boolean(true)));
    assert_eq!(t0.get("Small0"), Some(&Value::Integer(0)));
    assert_eq!(t0.get("Name0"), Some(&Value::Text("T0".into())));
    assert_eq!(t0.get("About0"), Some(&Value::Text("about T0".into())));
    assert_eq!(t0.get("Note0"), Some(&Value::Null));

    for n in 0..100 {
        let name = format!("T{n}");
        assert_eq!(store.count_exact("Chain", &name)?, 1, "{name}");
        let row = store.get("Chain", &name, &Value::Integer(n as i64))?.expect("populated row");
        for k in 0..n {
            assert_eq!(row.get(&format!("Ref{n}_{k}")), Some(&Value::Integer(k as i64)));
        }
    }

    let catalog = store.catalog("Chain")?;
    let t5 = catalog.get_table("T5")?;
    let small = t5.columns().iter().find(|c| c.name == "Small5").expect("widened column");
    assert_eq!(small.data_type, DataType::Int32);
    Ok(())
}

#[test]
fn test_full_text_search_after_upgrade() -> anyhow::Result<()> {
    let store = Store::new();
    let fixture = ChainFixture::new("Chain", 10, ChainLayout::Inheritance);
    deploy(&store, &fixture)?;
    Upgrader::new(&store).upgrade(&fixture.evolve().model()?)?;

    let hits = store.search("Chain", "T0", "about T7")?;
    assert!(hits.iter().any(|entity| entity.type_name == "T7"));
    // T3 and every type below it in the chain carry Int3.
    let by_index = store.find_by_index("Chain", "T3", "idx_T3_Int3", &[Value::Integer(30)])?;
    assert_eq!(by_index.len(), 7);
    Ok(())
}
