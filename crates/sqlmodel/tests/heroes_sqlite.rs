use std::sync::Arc;

use sqlmodel::prelude::*;
use sqlmodel::Selectable;

struct Heroes {
    engine: Engine,
    team: Arc<ModelDescriptor>,
    hero: Arc<ModelDescriptor>,
}

fn id_field() -> Field {
    Field::new().default(Value::Null).primary_key(true)
}

fn heroes() -> Heroes {
    let mut registry = Registry::new();
    ModelBuilder::table("Team")
        .field("id", Annotation::optional(Annotation::Int), id_field())
        .field("name", Annotation::Str, Field::new().index(true))
        .annotate("headquarters", Annotation::Str)
        .relationship(
            "heroes",
            Annotation::list(Annotation::model("Hero")),
            Relationship::new().back_populates("team"),
        )
        .declare(&mut registry)
        .unwrap();
    ModelBuilder::table("Hero")
        .field("id", Annotation::optional(Annotation::Int), id_field())
        .field("name", Annotation::Str, Field::new().index(true))
        .annotate("secret_name", Annotation::Str)
        .field(
            "age",
            Annotation::optional(Annotation::Int),
            Field::new().default(Value::Null).index(true),
        )
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
    let schema = registry.build().unwrap();

    let engine = create_engine("sqlite://").unwrap();
    engine.create_all(schema.metadata()).unwrap();
    Heroes {
        engine,
        team: Arc::clone(schema.model("Team").unwrap()),
        hero: Arc::clone(schema.model("Hero").unwrap()),
    }
}

fn new_hero(db: &Heroes, name: &str, secret_name: &str, age: Option<i64>) -> Instance {
    db.hero
        .construct(kwargs! { "name" => name, "secret_name" => secret_name, "age" => age })
        .unwrap()
}

fn add_heroes(db: &Heroes, session: &Session) {
    for (name, secret, age) in [
        ("Deadpond", "Dive Wilson", None),
        ("Spider-Boy", "Pedro Parqueador", None),
        ("Rusty-Man", "Tommy Sharp", Some(48)),
        ("Tarantula", "Natalia Roman-on", Some(32)),
        ("Black Lion", "Trevor Challa", Some(35)),
    ] {
        session.add(&new_hero(db, name, secret, age)).unwrap();
    }
    session.commit().unwrap();
}

fn names(instances: &[Instance]) -> Vec<String> {
    instances
        .iter()
        .map(|h| h.get("name").unwrap().as_str().unwrap().to_string())
        .collect()
}

fn col(model: &Arc<ModelDescriptor>, name: &str) -> Expr {
    Expr::from(model.col(name).unwrap())
}

#[test]
fn deadpond_gets_generated_id_and_null_columns() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    let hero = new_hero(&db, "Deadpond", "Dive Wilson", None);
    assert_eq!(hero.get("id").unwrap(), Value::Null);

    session.add(&hero).unwrap();
    session.commit().unwrap();
    session.refresh(&hero).unwrap();

    assert_eq!(hero.get("id").unwrap(), Value::BigInt(1));
    assert_eq!(hero.get("age").unwrap(), Value::Null);
    assert_eq!(hero.get("team_id").unwrap(), Value::Null);
    assert_eq!(hero.get("secret_name").unwrap(), Value::from("Dive Wilson"));
}

#[test]
fn round_trip_through_a_new_session() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    let hero = new_hero(&db, "Rusty-Man", "Tommy Sharp", Some(48));
    session.add(&hero).unwrap();
    session.commit().unwrap();
    let id = hero.get("id").unwrap();
    session.close().unwrap();

    let reader = Session::new(&db.engine).unwrap();
    let loaded = reader.get(&db.hero, id).unwrap().unwrap();
    assert_eq!(loaded, hero);
    assert_eq!(loaded.get("team_id").unwrap(), Value::Null);
}

#[test]
fn where_order_by_limit_offset() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    add_heroes(&db, &session);

    let older = session
        .exec(&select(&db.hero).where_(col(&db.hero, "age").ge(35)).order_by(col(&db.hero, "name")))
        .unwrap()
        .instances();
    assert_eq!(names(&older), ["Black Lion", "Rusty-Man"]);

    let page = session
        .exec(&select(&db.hero).order_by(col(&db.hero, "id")).offset(1).limit(2))
        .unwrap()
        .instances();
    assert_eq!(names(&page), ["Spider-Boy", "Rusty-Man"]);

    let unknown_age = session
        .exec(&select(&db.hero).where_(col(&db.hero, "age").is_null()))
        .unwrap();
    assert_eq!(unknown_age.len(), 2);

    let either = session
        .exec(&select(&db.hero).where_(
            col(&db.hero, "name").eq("Deadpond").or(col(&db.hero, "age").lt(33)),
        ))
        .unwrap()
        .instances();
    assert_eq!(names(&either), ["Deadpond", "Tarantula"]);
}

#[test]
fn one_and_one_or_none_count_rows() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    add_heroes(&db, &session);

    let by_name = |name: &str| select(&db.hero).where_(col(&db.hero, "name").eq(name));

    let rusty = session.exec(&by_name("Rusty-Man")).unwrap().one().unwrap();
    assert_eq!(rusty.instance().unwrap().get("age").unwrap(), Value::BigInt(48));

    let missing = session.exec(&by_name("Nobody")).unwrap().one();
    assert!(matches!(missing, Err(Error::NoResultFound)));
    assert!(session.exec(&by_name("Nobody")).unwrap().one_or_none().unwrap().is_none());

    let many = session
        .exec(&select(&db.hero).where_(col(&db.hero, "age").is_null()))
        .unwrap()
        .one_or_none();
    assert!(matches!(many, Err(Error::MultipleResultsFound(2))));

    assert!(session.exec(&by_name("Nobody")).unwrap().first().is_none());
}

#[test]
fn selected_rows_share_identity() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    let hero = new_hero(&db, "Spider-Boy", "Pedro Parqueador", None);
    session.add(&hero).unwrap();
    session.commit().unwrap();

    let first = session.exec(&select(&db.hero)).unwrap().instances();
    let second = session.get(&db.hero, 1).unwrap().unwrap();
    assert!(first[0].same(&hero));
    assert!(second.same(&hero));
}

#[test]
fn column_and_expression_selects() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    add_heroes(&db, &session);

    let names = session
        .exec(&select(db.hero.col("name").unwrap()).order_by(col(&db.hero, "name")).limit(2))
        .unwrap()
        .values();
    assert_eq!(names, vec![Value::from("Black Lion"), Value::from("Deadpond")]);

    let total = session
        .exec(&select(Expr::count_all()).select_from(&db.hero))
        .unwrap()
        .one()
        .unwrap();
    assert_eq!(total.value(), Some(&Value::BigInt(5)));
}

#[test]
fn join_yields_tuples() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    let preventers = db
        .team
        .construct(kwargs! { "name" => "Preventers", "headquarters" => "Sharp Tower" })
        .unwrap();
    let rusty = new_hero(&db, "Rusty-Man", "Tommy Sharp", Some(48));
    rusty.set("team", &preventers).unwrap();
    session.add(&rusty).unwrap();
    session.add(&new_hero(&db, "Deadpond", "Dive Wilson", None)).unwrap();
    session.commit().unwrap();

    let items = [Selectable::from(&db.hero), Selectable::from(&db.team)];
    let rows = session
        .exec(&select_tuple(items.clone()).join(&db.team))
        .unwrap()
        .all();
    assert_eq!(rows.len(), 1);
    assert!(rows[0][0].instance().unwrap().same(&rusty));
    assert!(rows[0][1].instance().unwrap().same(&preventers));

    let outer = session
        .exec(&select_tuple(items).outer_join(&db.team).order_by(col(&db.hero, "id")))
        .unwrap()
        .all();
    assert_eq!(outer.len(), 2);
    assert!(outer[1][0].instance().is_some());
    assert!(outer[1][1].is_null());

    let filtered = session
        .exec(
            &select(&db.hero)
                .join(&db.team)
                .where_(col(&db.team, "name").eq("Preventers")),
        )
        .unwrap()
        .instances();
    assert_eq!(names(&filtered), ["Rusty-Man"]);
}

#[test]
fn team_heroes_contains_hero_once_after_commit() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    let team = db
        .team
        .construct(kwargs! { "name" => "Z-Force", "headquarters" => "Sister Margaret's Bar" })
        .unwrap();
    session.add(&team).unwrap();
    session.commit().unwrap();

    let hero = new_hero(&db, "Deadpond", "Dive Wilson", None);
    hero.set("team_id", team.get("id").unwrap()).unwrap();
    session.add(&hero).unwrap();
    session.commit().unwrap();

    let members = team.related("heroes").unwrap();
    assert_eq!(members.len(), 1);
    assert!(members.contains(&hero));
    assert!(hero.related("team").unwrap().one().unwrap().same(&team));
}

#[test]
fn relationship_assignment_sets_foreign_key() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    let team = db
        .team
        .construct(kwargs! { "name" => "Preventers", "headquarters" => "Sharp Tower" })
        .unwrap();
    let hero = db
        .hero
        .construct(kwargs! { "name" => "Spider-Boy", "secret_name" => "Pedro Parqueador", "team" => &team })
        .unwrap();
    assert_eq!(team.related("heroes").unwrap().len(), 1);

    session.add(&team).unwrap();
    assert!(session.contains(&hero));
    session.commit().unwrap();
    assert_eq!(hero.get("team_id").unwrap(), team.get("id").unwrap());

    team.remove("heroes", &hero).unwrap();
    session.commit().unwrap();
    assert_eq!(hero.get("team_id").unwrap(), Value::Null);
}

#[test]
fn update_and_delete() {
    let db = heroes();
    let session = Session::new(&db.engine).unwrap();
    add_heroes(&db, &session);

    let spider = session
        .exec(&select(&db.hero).where_(col(&db.hero, "name").eq("Spider-Boy")))
        .unwrap()
        .one()
        .unwrap()
        .into_instance()
        .unwrap();
    spider.set("age", 16).unwrap();
    session.commit().unwrap();

    session.delete(&spider).unwrap();
    session.commit().unwrap();
    assert_eq!(spider.state(), ObjectState::Detached);

    let reader = Session::new(&db.engine).unwrap();
    assert!(reader.get(&db.hero, 2).unwrap().is_none());
    let left = reader.exec(&select(&db.hero)).unwrap();
    assert_eq!(left.len(), 4);
}
