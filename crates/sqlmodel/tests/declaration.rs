use std::sync::Arc;

use rust_decimal::Decimal;
use serde_json::json;
use sqlmodel::prelude::*;
use sqlmodel::schema::introspect::table_names;
use sqlmodel::session::engine::lock_connection;
use sqlmodel::{Column, SqlType, ValidationErrorKind};

fn id_field() -> Field {
    Field::new().default(Value::Null).primary_key(true)
}

#[test]
fn sa_column_cannot_be_combined_with_column_options() {
    let mut registry = Registry::new();
    let err = ModelBuilder::table("Hero")
        .field(
            "id",
            Annotation::optional(Annotation::Int),
            Field::new()
                .sa_column(Column::new(SqlType::Integer).primary_key(true))
                .primary_key(true),
        )
        .declare(&mut registry)
        .and_then(|_| registry.build())
        .unwrap_err();
    assert!(matches!(err, Error::Config(ref m) if m.contains("sa_column")));
}

#[test]
fn forward_references_resolve_when_built() {
    let mut registry = Registry::new();
    ModelBuilder::table("Hero")
        .field("id", Annotation::optional(Annotation::Int), id_field())
        .annotate("name", Annotation::Str)
        .field(
            "team_id",
            Annotation::optional(Annotation::Int),
            Field::new().default(Value::Null).foreign_key("team.id"),
        )
        .relationship(
            "team",
            Annotation::optional(Annotation::model("Team")),
            Relationship::new().back_populates("heroes"),
        )
        .declare(&mut registry)
        .unwrap();
    ModelBuilder::table("Team")
        .field("id", Annotation::optional(Annotation::Int), id_field())
        .annotate("name", Annotation::Str)
        .relationship(
            "heroes",
            Annotation::list(Annotation::model("Hero")),
            Relationship::new().back_populates("team"),
        )
        .declare(&mut registry)
        .unwrap();

    let schema = registry.build().unwrap();
    let hero = schema.model("Hero").unwrap();
    let team = schema.model("Team").unwrap();
    let to_team = hero.relationship("team").unwrap();
    assert_eq!(hero.related_model(to_team).unwrap().name(), "Team");
    assert!(team.relationship("heroes").unwrap().uselist);
    assert_eq!(schema.metadata().sorted_tables().len(), 2);
}

fn priced_item() -> Arc<ModelDescriptor> {
    let mut registry = Registry::new();
    ModelBuilder::new("Item")
        .annotate("name", Annotation::Str)
        .field(
            "price",
            Annotation::Decimal,
            Field::new().max_digits(4).decimal_places(2),
        )
        .declare(&mut registry)
        .unwrap();
    Arc::clone(registry.build().unwrap().model("Item").unwrap())
}

#[test]
fn decimal_precision_is_validated() {
    let item = priced_item();

    let ok = item
        .model_validate(kwargs! { "name" => "cape", "price" => Decimal::new(314, 2) }, None)
        .unwrap();
    assert_eq!(ok.get("price").unwrap(), Value::Decimal(Decimal::new(314, 2)));

    let err = item
        .model_validate(kwargs! { "name" => "cape", "price" => Decimal::new(3142, 3) }, None)
        .unwrap_err();
    assert!(err.as_validation().unwrap().has("price", ValidationErrorKind::DecimalPlaces));

    let err = item
        .model_validate(kwargs! { "name" => "cape", "price" => Decimal::new(420, 0) }, None)
        .unwrap_err();
    assert!(err.as_validation().unwrap().has("price", ValidationErrorKind::WholeDigits));
}

#[test]
fn missing_required_field_is_reported() {
    let item = priced_item();
    let err = item.model_validate(json!({ "price": 3 }), None).unwrap_err();
    let validation = err.as_validation().unwrap();
    assert!(validation.has("name", ValidationErrorKind::Missing));
    assert_eq!(validation.errors.len(), 1);
}

// ============================================================================
// Multiple models over one table
// ============================================================================

struct HeroModels {
    engine: Engine,
    hero: Arc<ModelDescriptor>,
    hero_create: Arc<ModelDescriptor>,
    hero_public: Arc<ModelDescriptor>,
    hero_update: Arc<ModelDescriptor>,
}

fn hero_models() -> HeroModels {
    let mut registry = Registry::new();
    ModelBuilder::new("HeroBase")
        .field("name", Annotation::Str, Field::new().index(true))
        .annotate("secret_name", Annotation::Str)
        .field(
            "age",
            Annotation::optional(Annotation::Int),
            Field::new().default(Value::Null).index(true),
        )
        .declare(&mut registry)
        .unwrap();
    ModelBuilder::table("Hero")
        .inherits("HeroBase")
        .field("id", Annotation::optional(Annotation::Int), id_field())
        .declare(&mut registry)
        .unwrap();
    ModelBuilder::new("HeroCreate")
        .inherits("HeroBase")
        .declare(&mut registry)
        .unwrap();
    ModelBuilder::new("HeroPublic")
        .inherits("HeroBase")
        .annotate("id", Annotation::Int)
        .declare(&mut registry)
        .unwrap();
    ModelBuilder::new("HeroUpdate")
        .with_default("name", Annotation::optional(Annotation::Str), Value::Null)
        .with_default("secret_name", Annotation::optional(Annotation::Str), Value::Null)
        .with_default("age", Annotation::optional(Annotation::Int), Value::Null)
        .declare(&mut registry)
        .unwrap();
    let schema = registry.build().unwrap();

    let engine = create_engine("sqlite://").unwrap();
    engine.create_all(schema.metadata()).unwrap();
    let model = |name: &str| Arc::clone(schema.model(name).unwrap());
    HeroModels {
        engine,
        hero: model("Hero"),
        hero_create: model("HeroCreate"),
        hero_public: model("HeroPublic"),
        hero_update: model("HeroUpdate"),
    }
}

#[test]
fn only_the_table_model_gets_a_table() {
    let models = hero_models();
    let conn = models.engine.connect().unwrap();
    let mut guard = lock_connection(&conn);
    let names = table_names(&mut **guard).unwrap();
    assert_eq!(names, ["hero"]);
    assert!(models.hero_create.table_name().is_none());
}

#[test]
fn create_read_update_through_data_models() {
    let models = hero_models();
    let session = Session::new(&models.engine).unwrap();

    let payload = json!({ "name": "Deadpond", "secret_name": "Dive Wilson" });
    let hero_create = models.hero_create.model_validate(payload, None).unwrap();
    let hero = models.hero.model_validate(&hero_create, None).unwrap();
    session.add(&hero).unwrap();
    session.commit().unwrap();
    session.refresh(&hero).unwrap();

    let public = models.hero_public.model_validate(&hero, None).unwrap();
    assert_eq!(public.get("id").unwrap(), Value::BigInt(1));
    assert_eq!(public.get("age").unwrap(), Value::Null);

    let patch = models
        .hero_update
        .model_validate(json!({ "age": 30 }), None)
        .unwrap();
    let changes = patch.model_dump(&DumpOptions::new().exclude_unset(true)).unwrap();
    assert_eq!(changes.keys().collect::<Vec<_>>(), ["age"]);

    hero.sqlmodel_update(changes, None).unwrap();
    session.add(&hero).unwrap();
    session.commit().unwrap();

    let reader = Session::new(&models.engine).unwrap();
    let stored = reader.get(&models.hero, 1).unwrap().unwrap();
    assert_eq!(stored.get("age").unwrap(), Value::BigInt(30));
    assert_eq!(stored.get("name").unwrap(), Value::from("Deadpond"));
}

#[test]
fn table_model_construct_takes_values_as_given() {
    let models = hero_models();
    let hero = models.hero.construct(kwargs! { "name" => "Deadpond" }).unwrap();
    assert_eq!(hero.get("secret_name").unwrap(), Value::Null);

    let err = models.hero_create.construct(kwargs! { "name" => "Deadpond" }).unwrap_err();
    assert!(err.as_validation().unwrap().has("secret_name", ValidationErrorKind::Missing));
}

#[test]
fn dump_json_uses_field_order() {
    let models = hero_models();
    let hero = models
        .hero_public
        .model_validate(kwargs! { "name" => "Rusty-Man", "secret_name" => "Tommy Sharp", "id" => 3 }, None)
        .unwrap();
    let json = hero.model_dump_json(&DumpOptions::new().exclude(["secret_name"])).unwrap();
    assert_eq!(json, r#"{"name":"Rusty-Man","age":null,"id":3}"#);
}
