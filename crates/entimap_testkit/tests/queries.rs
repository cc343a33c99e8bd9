//! Query evaluation, paging and the session query helpers.

use entimap_core::{Config, Direction, FieldValue, FilterOp, Query};
use entimap_testkit::prelude::*;

fn names(results: impl Iterator<Item = entimap_core::CoreResult<entimap_core::Entity>>) -> Vec<String> {
    results
        .map(|entity| {
            entity
                .unwrap()
                .get("name")
                .unwrap()
                .as_text()
                .unwrap()
                .to_string()
        })
        .collect()
}

#[test]
fn filters_and_orders() {
    let env = TestEnv::memory();
    let mut session = env.session();
    for (name, age) in [("Ada", 36), ("Bob", 20), ("Cy", 52), ("Di", 36)] {
        session.put(&mut env.person(&session, name, age)).unwrap();
    }
    let people = || Query::for_model(&env.models.person);

    let thirty_six = people().filter("age", FilterOp::Eq, 36).unwrap();
    assert_eq!(session.count(thirty_six).unwrap(), 2);

    let older = people()
        .filter("age", FilterOp::Ge, 36)
        .unwrap()
        .order_by("age", Direction::Descending)
        .unwrap()
        .order_by("name", Direction::Ascending)
        .unwrap();
    assert_eq!(names(session.query(older)), ["Cy", "Ada", "Di"]);

    let band = people()
        .filter("age", FilterOp::Gt, 20)
        .unwrap()
        .filter("age", FilterOp::Lt, 52)
        .unwrap()
        .order_by("name", Direction::Descending)
        .unwrap();
    assert_eq!(names(session.query(band)), ["Di", "Ada"]);

    let by_name = people().filter("name", FilterOp::Eq, "Bob").unwrap();
    let mut bob = session.first(by_name).unwrap().unwrap();
    assert_eq!(bob.get("age").unwrap(), FieldValue::Integer(20));
}

#[test]
fn unindexed_and_computed_properties_cannot_be_queried() {
    let env = TestEnv::memory();
    let people = Query::for_model(&env.models.person);
    assert!(people.clone().filter("email", FilterOp::Eq, "a@b.c").is_err());
    assert!(people.clone().filter("initial", FilterOp::Eq, "A").is_err());
    assert!(people.clone().order_by("initial", Direction::Ascending).is_err());
    assert!(people.clone().filter("missing", FilterOp::Eq, 1).is_err());
    assert!(Query::kindless().filter("name", FilterOp::Eq, "x").is_err());
}

#[test]
fn repeated_properties_match_any_element() {
    let env = TestEnv::memory();
    let mut session = env.session();
    for (title, tags) in [("one", vec!["red", "blue"]), ("two", vec!["blue"]), ("three", vec![])] {
        let mut note = env.note(&session, title);
        note.set("tags", FieldValue::list(tags)).unwrap();
        session.put(&mut note).unwrap();
    }
    let notes = || Query::for_model(&env.models.note);
    assert_eq!(session.count(notes().filter("tags", FilterOp::Eq, "blue").unwrap()).unwrap(), 2);
    assert_eq!(session.count(notes().filter("tags", FilterOp::Eq, "red").unwrap()).unwrap(), 1);
    assert_eq!(session.count(notes().filter("tags", FilterOp::Eq, "green").unwrap()).unwrap(), 0);
}

#[test]
fn key_filters_find_references() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut ada = env.person(&session, "Ada", 36);
    let ada_key = session.put(&mut ada).unwrap();
    for title in ["a", "b"] {
        let mut note = env.note(&session, title);
        note.set("author", &ada).unwrap();
        session.put(&mut note).unwrap();
    }
    session.put(&mut env.note(&session, "anonymous")).unwrap();

    let by_ada = Query::for_model(&env.models.note)
        .filter("author", FilterOp::Eq, ada_key)
        .unwrap();
    assert_eq!(session.count(by_ada).unwrap(), 2);
}

#[test]
fn paging_with_cursors() {
    let env = TestEnv::memory_with_config(Config::default().query_batch_size(3));
    let mut session = env.session();
    env.populate_people(&mut session, 10);
    let by_age = Query::for_model(&env.models.person)
        .order_by("age", Direction::Ascending)
        .unwrap();

    let pages: Vec<_> = session
        .query(by_age.clone())
        .pages()
        .map(Result::unwrap)
        .collect();
    let sizes: Vec<usize> = pages.iter().map(|page| page.entities.len()).collect();
    assert_eq!(sizes, [3, 3, 3, 1]);

    let cursor = pages[1].cursor.clone().unwrap();
    let resumed = names(session.query_from(by_age.clone(), cursor));
    assert_eq!(
        resumed,
        ["person-6", "person-7", "person-8", "person-9"]
    );

    let window = names(session.query(by_age.offset(2).limit(4)));
    assert_eq!(window, ["person-2", "person-3", "person-4", "person-5"]);
}

#[test]
fn keys_only_and_projection() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let keys = env.populate_people(&mut session, 3);

    let mut found: Vec<_> = session
        .query(Query::for_model(&env.models.person).keys_only())
        .keys()
        .map(Result::unwrap)
        .collect();
    found.sort_by_key(|key| key.int_id());
    assert_eq!(found, keys);

    let projected = Query::for_model(&env.models.person)
        .project(["age"])
        .unwrap()
        .order_by("age", Direction::Ascending)
        .unwrap();
    let mut first = session.first(projected).unwrap().unwrap();
    assert_eq!(first.get("age").unwrap(), FieldValue::Integer(0));
    assert_eq!(first.value("name"), None);

    assert!(Query::for_model(&env.models.person).project(["email"]).is_err());
}

#[test]
fn delete_matching_removes_only_matches() {
    let env = TestEnv::memory_with_config(Config::default().query_batch_size(2));
    let mut session = env.session();
    env.populate_people(&mut session, 7);

    let young = Query::for_model(&env.models.person)
        .filter("age", FilterOp::Lt, 5)
        .unwrap();
    assert_eq!(session.delete_matching(young.clone()).unwrap(), 5);
    assert_eq!(session.count(young).unwrap(), 0);
    assert_eq!(session.count(Query::for_model(&env.models.person)).unwrap(), 2);
}

#[test]
fn cached_queries_load_current_entities() {
    let env = TestEnv::cached();
    let mut session = env.session();
    let keys = env.populate_people(&mut session, 2);
    session.get(&keys[0]).unwrap();

    let mut ada = session.get(&keys[0]).unwrap().unwrap();
    ada.set("age", 100).unwrap();
    session.put(&mut ada).unwrap();

    let oldest = Query::for_model(&env.models.person)
        .order_by("age", Direction::Descending)
        .unwrap();
    let mut top = session.first(oldest).unwrap().unwrap();
    assert_eq!(top.get("age").unwrap(), FieldValue::Integer(100));
    assert!(!env.cache().is_empty());
}
