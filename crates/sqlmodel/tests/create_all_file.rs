use std::sync::Arc;

use sqlmodel::prelude::*;

fn hero_schema() -> Arc<Schema> {
    let mut registry = Registry::new();
    ModelBuilder::table("Hero")
        .field(
            "id",
            Annotation::optional(Annotation::Int),
            Field::new().default(Value::Null).primary_key(true),
        )
        .annotate("name", Annotation::Str)
        .annotate("secret_name", Annotation::Str)
        .with_default("age", Annotation::optional(Annotation::Int), Value::Null)
        .declare(&mut registry)
        .unwrap();
    registry.build().unwrap()
}

fn file_engine(dir: &tempfile::TempDir) -> Engine {
    let path = dir.path().join("database.db");
    create_engine(&format!("sqlite:///{}", path.display())).unwrap()
}

#[test]
fn create_all_is_idempotent_on_a_file_database() {
    let dir = tempfile::tempdir().unwrap();
    let schema = hero_schema();
    let hero = schema.model("Hero").unwrap();

    let engine = file_engine(&dir);
    engine.create_all(schema.metadata()).unwrap();
    let session = Session::new(&engine).unwrap();
    session
        .add(&hero.construct(kwargs! { "name" => "Deadpond", "secret_name" => "Dive Wilson" }).unwrap())
        .unwrap();
    session.commit().unwrap();
    session.close().unwrap();

    let reopened = file_engine(&dir);
    reopened.create_all(schema.metadata()).unwrap();
    let session = Session::new(&reopened).unwrap();
    let heroes = session.exec(&select(hero)).unwrap().instances();
    assert_eq!(heroes.len(), 1);
    assert_eq!(heroes[0].get("name").unwrap(), Value::from("Deadpond"));
}

#[test]
fn sessions_on_a_file_engine_see_committed_rows_only() {
    let dir = tempfile::tempdir().unwrap();
    let schema = hero_schema();
    let hero = schema.model("Hero").unwrap();
    let engine = file_engine(&dir);
    engine.create_all(schema.metadata()).unwrap();

    let writer = Session::new(&engine).unwrap();
    writer
        .add(&hero.construct(kwargs! { "name" => "Rusty-Man", "secret_name" => "Tommy Sharp" }).unwrap())
        .unwrap();
    writer.commit().unwrap();

    let reader = Session::new(&engine).unwrap();
    assert_eq!(reader.exec(&select(hero)).unwrap().len(), 1);
}

#[test]
fn drop_all_removes_the_tables() {
    let dir = tempfile::tempdir().unwrap();
    let schema = hero_schema();
    let hero = schema.model("Hero").unwrap();
    let engine = file_engine(&dir);
    engine.create_all(schema.metadata()).unwrap();
    engine.drop_all(schema.metadata()).unwrap();

    let session = Session::new(&engine).unwrap();
    assert!(matches!(session.exec(&select(hero)), Err(Error::Database(_))));
}
