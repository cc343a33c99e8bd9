//! Key identity, hierarchy and namespace scoping.

use entimap_core::{Adapter, Config, FieldValue, Key, KeyId, Query};
use entimap_testkit::prelude::*;
use proptest::prelude::*;

#[test]
fn saved_entities_get_complete_keys() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut ada = env.person(&session, "Ada", 36);
    assert!(ada.key().is_partial());
    let key = session.put(&mut ada).unwrap();
    assert!(key.is_complete());
    assert_eq!(ada.key(), &key);
    assert!(matches!(key.id(), Some(KeyId::Id(id)) if *id > 0));

    // saving again keeps the identity
    ada.set("age", 37).unwrap();
    assert_eq!(session.put(&mut ada).unwrap(), key);
    assert_eq!(env.base.len(), 1);
}

#[test]
fn named_keys_are_used_verbatim() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut ada = env.person(&session, "Ada", 36);
    ada.set_key(session.key(PERSON).id("ada").build().unwrap())
        .unwrap();
    let key = session.put(&mut ada).unwrap();
    assert_eq!(key.name(), Some("ada"));
    assert!(session.get(&session.key(PERSON).id("ada").build().unwrap()).unwrap().is_some());
    assert!(ada.set_key(Key::from_id(CAT, 1).unwrap()).is_err());
}

#[test]
fn children_live_under_their_parent() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let owner = session.put(&mut env.person(&session, "Jon", 30)).unwrap();
    let other = session.put(&mut env.person(&session, "Liz", 30)).unwrap();

    for (parent, name) in [(&owner, "Garfield"), (&owner, "Nermal"), (&other, "Tom")] {
        let mut cat = session.new_entity(&env.models.cat).unwrap();
        cat.set("name", name).unwrap();
        cat.set_key(session.key(CAT).parent(parent.clone()).build().unwrap())
            .unwrap();
        let key = session.put(&mut cat).unwrap();
        assert_eq!(key.parent(), Some(parent));
        assert_eq!(key.root(), parent);
        assert!(parent.is_ancestor_of(&key));
    }

    let owned = Query::for_model(&env.models.cat).ancestor(owner.clone()).unwrap();
    assert_eq!(session.count(owned).unwrap(), 2);

    let everything_under_owner = Query::kindless().ancestor(owner.clone()).unwrap();
    let kinds: Vec<String> = session
        .query(everything_under_owner)
        .map(|entity| entity.unwrap().kind().to_string())
        .collect();
    assert_eq!(kinds.iter().filter(|k| *k == PERSON).count(), 1);
    assert_eq!(kinds.iter().filter(|k| *k == CAT).count(), 2);

    assert!(Query::kindless()
        .ancestor(Key::partial(PERSON).unwrap())
        .is_err());
}

#[test]
fn namespaces_isolate_entities() {
    let env = TestEnv::memory_with_config(Config::default().default_namespace("main"));
    let mut session = env.session();

    let in_main = session.put(&mut env.person(&session, "Main", 1)).unwrap();
    assert_eq!(in_main.namespace(), Some("main"));

    let in_tenant = session.with_namespace("tenant", |s| {
        let mut person = env.person(s, "Tenant", 2);
        s.put(&mut person).unwrap()
    });
    assert_eq!(in_tenant.namespace(), Some("tenant"));

    let in_default = session.with_namespace("", |s| {
        let mut person = env.person(s, "Default", 3);
        s.put(&mut person).unwrap()
    });
    assert_eq!(in_default.namespace(), None);

    let people = Query::for_model(&env.models.person);
    assert_eq!(session.count(people.clone()).unwrap(), 1);
    assert_eq!(session.count(people.clone().namespace("tenant")).unwrap(), 1);
    assert_eq!(session.count(people.clone().namespace("")).unwrap(), 1);

    // a key carries its namespace, whatever the session's override
    let found = session.with_namespace("tenant", |s| s.get(&in_main).unwrap());
    assert!(found.is_some());

    // same path, different namespace: a different entity
    let twin = Key::builder(PERSON)
        .id(in_main.int_id().unwrap())
        .namespace("tenant")
        .build()
        .unwrap();
    assert_ne!(twin, in_main);
    assert!(!env.base.get(&twin).unwrap().is_found());
}

#[test]
fn children_inherit_the_parent_namespace() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let owner = session.with_namespace("pets", |s| {
        let mut person = env.person(s, "Jon", 30);
        s.put(&mut person).unwrap()
    });

    let cat_key = session.key(CAT).parent(owner.clone()).build().unwrap();
    assert_eq!(cat_key.namespace(), Some("pets"));
    assert!(Key::builder(CAT)
        .parent(owner)
        .namespace("elsewhere")
        .build()
        .is_err());
}

#[test]
fn key_properties_store_references() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut ada = env.person(&session, "Ada", 36);
    session.put(&mut ada).unwrap();

    let mut note = env.note(&session, "by ada");
    note.set("author", &ada).unwrap();
    let note_key = session.put(&mut note).unwrap();

    let mut loaded = session.get(&note_key).unwrap().unwrap();
    let author = loaded.get("author").unwrap();
    let author = author.as_key().unwrap();
    let mut resolved = session.get(author).unwrap().unwrap();
    assert_eq!(resolved.get("name").unwrap(), FieldValue::from("Ada"));
    assert_eq!(resolved.get("initial").unwrap(), FieldValue::from("A"));
}

#[test]
fn batch_reads_mix_hits_and_misses() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let keys = env.populate_people(&mut session, 3);
    let missing = Key::from_id(PERSON, 10_000).unwrap();

    let batch = vec![keys[2].clone(), missing, keys[0].clone()];
    let found = session.get_multi(&batch).unwrap();
    assert_eq!(found.len(), 3);
    assert_eq!(found[0].as_ref().unwrap().key(), &keys[2]);
    assert!(found[1].is_none());
    assert_eq!(found[2].as_ref().unwrap().key(), &keys[0]);

    session.delete_multi(&keys[..2]).unwrap();
    let after = session.get_multi(&keys).unwrap();
    assert!(after[0].is_none() && after[1].is_none() && after[2].is_some());
}

proptest! {
    #[test]
    fn key_paths_round_trip(key in key_strategy(4)) {
        let path = key.to_path();
        prop_assert_eq!(Key::from_path(&path).unwrap(), key.clone());
        prop_assert_eq!(key.storage_key().unwrap(), Key::from_path(&path).unwrap().storage_key().unwrap());
        prop_assert!(key.root().is_ancestor_of(&key));
    }
}
