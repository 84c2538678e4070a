#![allow(dead_code)]

use modelshift::{DataType, Entity, EntitySpec, FieldSpec, Model, RenameHints, Store, Upgrader, Value};

pub const PART: &str = "Zoo";

pub fn zoo_v1() -> Model {
    Model::builder(PART)
        .entity(
            EntitySpec::root("Keeper")
                .field(FieldSpec::key("KeeperId", DataType::Int64))
                .field(FieldSpec::new("Name", DataType::String)),
        )
        .entity(
            EntitySpec::root("Animal")
                .field(FieldSpec::key("Id", DataType::Int64))
                .field(FieldSpec::new("Name", DataType::String))
                .field(FieldSpec::new("Age", DataType::Int64).not_null())
                .field(FieldSpec::new("Weight", DataType::Float32))
                .field(FieldSpec::reference("Keeper", "Keeper"))
                .index(["Name"]),
        )
        .entity(EntitySpec::derived("Dog", "Animal").field(FieldSpec::new("Barks", DataType::Boolean)))
        .entity(EntitySpec::derived("Cat", "Animal").field(FieldSpec::new("Lives", DataType::Int16)))
        .build()
        .expect("valid zoo model")
}

/// Keeper.Name renamed, Animal.Age narrowed, Animal.Weight widened, Cat renamed
/// to Feline and Dog moved under a new Pet hierarchy.
pub fn zoo_v2() -> Model {
    Model::builder(PART)
        .entity(
            EntitySpec::root("Keeper")
                .field(FieldSpec::key("KeeperId", DataType::Int64))
                .field(FieldSpec::new("FullName", DataType::String)),
        )
        .entity(
            EntitySpec::root("Animal")
                .field(FieldSpec::key("Id", DataType::Int64))
                .field(FieldSpec::new("Name", DataType::String))
                .field(FieldSpec::new("Age", DataType::Int32).not_null())
                .field(FieldSpec::new("Weight", DataType::Float64))
                .field(FieldSpec::reference("Keeper", "Keeper"))
                .field(FieldSpec::new("Tag", DataType::String))
                .index(["Name"])
                .index(["Tag"]),
        )
        .entity(EntitySpec::derived("Feline", "Animal").field(FieldSpec::new("Lives", DataType::Int32)))
        .entity(
            EntitySpec::root("Pet")
                .field(FieldSpec::key("PetId", DataType::Int64))
                .field(FieldSpec::new("Nick", DataType::String)),
        )
        .entity(EntitySpec::derived("Dog", "Pet").field(FieldSpec::new("Barks", DataType::Boolean)))
        .build()
        .expect("valid zoo model")
}

pub fn zoo_hints() -> RenameHints {
    RenameHints::new()
        .rename_type("Cat", "Feline")
        .rename_field("Keeper", "Name", "FullName")
}

/// Deploys the first zoo revision and fills it.
pub fn zoo_store() -> Store {
    let store = Store::new();
    Upgrader::new(&store).upgrade(&zoo_v1()).expect("deploy zoo");
    let rows = [
        Entity::new("Keeper").with("KeeperId", 1i64).with("Name", "Ada"),
        Entity::new("Keeper").with("KeeperId", 2i64).with("Name", "Brook"),
        Entity::new("Animal")
            .with("Id", 10i64)
            .with("Name", "Tortoise")
            .with("Age", 120i64)
            .with("Weight", 80.25f32)
            .with("Keeper", 1i64),
        Entity::new("Dog")
            .with("Id", 11i64)
            .with("Name", "Rex")
            .with("Age", 4i64)
            .with("Weight", 31.5f32)
            .with("Keeper", 2i64)
            .with("Barks", true),
        Entity::new("Dog")
            .with("Id", 12i64)
            .with("Name", "Fido")
            .with("Age", 9i64)
            .with("Barks", false),
        Entity::new("Cat")
            .with("Id", 13i64)
            .with("Name", "Tom")
            .with("Age", 3i64)
            .with("Weight", 4.75f32)
            .with("Lives", 9i16),
    ];
    for row in &rows {
        store.insert(PART, row).expect("insert zoo row");
    }
    store
}

/// Every row of every type the part stores, by type.
pub fn dump(store: &Store, model: &Model) -> Vec<(String, Vec<Entity>)> {
    model
        .types()
        .iter()
        .map(|entity| {
            let rows = store.query_exact(PART, entity.name()).unwrap_or_default();
            (entity.name().to_string(), rows)
        })
        .collect()
}

pub fn int(value: i64) -> Value {
    Value::Integer(value)
}
