//! Store/load behavior of the property pipeline through a session.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::{Duration, FixedOffset, TimeZone, Utc};
use entimap_codec::Value;
use entimap_core::property::MAX_INDEXED_LENGTH;
use entimap_core::{Adapter, Config, Context, FieldValue, InMemoryAdapter, Key, Model, Property};
use entimap_testkit::prelude::*;
use proptest::prelude::*;

fn stored(env: &TestEnv, key: &Key) -> entimap_core::Record {
    env.base.get(key).unwrap().into_record().expect("stored record")
}

#[test]
fn every_kind_round_trips() {
    init_tracing();
    let env = TestEnv::memory();
    let mut session = env.session();
    let author = session.put(&mut env.person(&session, "Ada", 36)).unwrap();

    let mut note = env.note(&session, "hello");
    let created = FixedOffset::east_opt(2 * 3600)
        .unwrap()
        .with_ymd_and_hms(2024, 5, 1, 12, 0, 0)
        .unwrap();
    note.set("body", "a body that compresses well well well well").unwrap();
    note.set("tags", FieldValue::list(["a", "b"])).unwrap();
    note.set("meta", serde_json::json!({"pinned": true, "rank": 3})).unwrap();
    note.set("attachment", vec![7u8; 512]).unwrap();
    note.set("created", created).unwrap();
    note.set("author", author.clone()).unwrap();
    let key = session.put(&mut note).unwrap();

    let mut loaded = session.get(&key).unwrap().unwrap();
    assert_eq!(loaded.get("title").unwrap(), FieldValue::from("hello"));
    assert_eq!(
        loaded.get("body").unwrap(),
        FieldValue::from("a body that compresses well well well well")
    );
    assert_eq!(loaded.get("tags").unwrap(), FieldValue::list(["a", "b"]));
    assert_eq!(
        loaded.get("meta").unwrap(),
        FieldValue::Json(serde_json::json!({"pinned": true, "rank": 3}))
    );
    assert_eq!(loaded.get("attachment").unwrap(), FieldValue::Bytes(vec![7u8; 512]));
    assert_eq!(loaded.get("created").unwrap(), FieldValue::from(created));
    assert_eq!(loaded.get("author").unwrap(), FieldValue::Key(author));
}

#[test]
fn optional_values_round_trip_as_null() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let key = session.put(&mut env.note(&session, "bare")).unwrap();

    let mut loaded = session.get(&key).unwrap().unwrap();
    assert_eq!(loaded.get("body").unwrap(), FieldValue::Null);
    assert_eq!(loaded.get("meta").unwrap(), FieldValue::Null);
    assert_eq!(loaded.get("author").unwrap(), FieldValue::Null);
    assert_eq!(loaded.get("tags").unwrap(), FieldValue::List(Vec::new()));
}

#[test]
fn wire_values_are_transformed() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut note = env.note(&session, "wire");
    note.set("body", "x".repeat(4096)).unwrap();
    note.set("meta", serde_json::json!({"a": [1, 2]})).unwrap();
    let key = session.put(&mut note).unwrap();

    let record = stored(&env, &key);
    match record.properties.get("body") {
        Some(Value::Bytes(bytes)) => assert!(bytes.len() < 4096),
        other => panic!("body stored as {other:?}"),
    }
    match record.properties.get("meta") {
        Some(Value::Bytes(bytes)) => assert!(!bytes.is_empty()),
        other => panic!("meta stored as {other:?}"),
    }
    assert!(!record.is_indexed("body"));
    assert!(record.is_indexed("title"));
    // computed values are never stored
    assert!(!stored(&env, &session.put(&mut env.person(&session, "Bo", 1)).unwrap())
        .properties
        .contains_key("initial"));
}

#[test]
fn required_values_are_enforced_before_the_store() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut note = session.new_entity(&env.models.note).unwrap();
    let err = session.put(&mut note).unwrap_err();
    assert!(err.is_validation());
    assert!(env.base.is_empty());

    assert!(note.set("title", 5).unwrap_err().is_validation());
    assert!(note.set("tags", "not-a-list").unwrap_err().is_validation());
}

#[test]
fn indexed_length_boundary() {
    let env = TestEnv::memory();
    let session = env.session();
    let mut person = env.person(&session, "x", 1);

    let ascii_over = "a".repeat(MAX_INDEXED_LENGTH + 1);
    assert!(person.set("name", ascii_over).unwrap_err().is_validation());

    // more bytes than the limit, but few enough characters
    let wide = "\u{e9}".repeat(MAX_INDEXED_LENGTH);
    assert!(wide.len() > MAX_INDEXED_LENGTH);
    person.set("name", wide).unwrap();

    // unindexed text is unbounded
    let mut note = env.note(&session, "long");
    note.set("body", "b".repeat(MAX_INDEXED_LENGTH * 4)).unwrap();
}

#[test]
fn partial_keys_cannot_be_referenced() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut note = env.note(&session, "ref");

    let unsaved = env.person(&session, "Ghost", 1);
    assert!(note.set("author", &unsaved).unwrap_err().is_validation());
    assert!(note
        .set("author", Key::partial("Person").unwrap())
        .unwrap_err()
        .is_validation());
    assert!(note
        .set("author", Key::from_id("Cat", 1).unwrap())
        .unwrap_err()
        .is_validation());

    let mut saved = env.person(&session, "Real", 2);
    session.put(&mut saved).unwrap();
    note.set("author", &saved).unwrap();
}

#[test]
fn auto_timestamps() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut note = env.note(&session, "times");
    let before = Utc::now() - Duration::seconds(1);
    session.put(&mut note).unwrap();

    let created = note.get("created").unwrap();
    let updated = note.get("updated").unwrap();
    let created_at = *created.as_datetime().unwrap();
    assert!(created_at > before.fixed_offset());
    assert_eq!(created_at.offset().local_minus_utc(), 0);
    assert_eq!(updated.as_datetime().unwrap().offset().local_minus_utc(), 0);

    std::thread::sleep(std::time::Duration::from_millis(5));
    session.put(&mut note).unwrap();
    assert_eq!(note.get("created").unwrap(), created);
    assert!(note.get("updated").unwrap().as_datetime().unwrap() > updated.as_datetime().unwrap());

    let mut loaded = session.get(note.key()).unwrap().unwrap();
    assert_eq!(loaded.get("created").unwrap(), created);
}

#[test]
fn computed_properties_never_block_a_store() {
    let model = Model::builder("Thing")
        .property(Property::integer("n").build().unwrap())
        .property(
            Property::computed("double", |entity| {
                let n = entity.value("n").and_then(FieldValue::as_integer).unwrap_or(0);
                FieldValue::Integer(n * 2)
            })
            .optional(false)
            .build()
            .unwrap(),
        )
        .property(
            Property::computed("blob", |_| FieldValue::from("x".repeat(MAX_INDEXED_LENGTH + 500)))
                .build()
                .unwrap(),
        )
        .build()
        .unwrap();
    let context = Context::new(InMemoryAdapter::new(), Config::default()).unwrap();
    context.register(Arc::clone(&model)).unwrap();
    let mut session = context.session();

    // required computed value never read
    let mut thing = session.new_entity(&model).unwrap();
    thing.set("n", 2).unwrap();
    let key = session.put(&mut thing).unwrap();

    // memoized computed text past the indexed limit
    let mut loaded = session.get(&key).unwrap().unwrap();
    assert_eq!(loaded.get("double").unwrap(), FieldValue::Integer(4));
    assert!(loaded.get("blob").unwrap().as_text().unwrap().len() > MAX_INDEXED_LENGTH);
    session.put(&mut loaded).unwrap();

    let record = context.adapter().get(&key).unwrap().into_record().unwrap();
    assert_eq!(record.properties.keys().collect::<Vec<_>>(), ["n"]);
}

#[test]
fn rejected_writes_leave_entities_untouched() {
    let base = Arc::new(InMemoryAdapter::new());
    let env = TestEnv::over(ReadOnlyAdapter::new(Arc::clone(&base)), base, Config::default());
    let mut session = env.session();
    let mut note = env.note(&session, "draft");

    assert!(session.put(&mut note).is_err());
    assert!(note.key().is_partial());
    assert!(note.value("updated").is_none());
    assert!(note.value("created").is_none());
    assert!(env.base.is_empty());
}

#[test]
fn computed_values_are_memoized_until_invalidated() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let model = Model::builder("Tally")
        .property(Property::string("label").build().unwrap())
        .property(
            Property::computed("shout", move |entity| {
                counter.fetch_add(1, Ordering::SeqCst);
                entity
                    .value("label")
                    .and_then(FieldValue::as_text)
                    .map_or(FieldValue::Null, |label| FieldValue::Text(label.to_uppercase()))
            })
            .build()
            .unwrap(),
        )
        .build()
        .unwrap();
    let context = Context::new(InMemoryAdapter::new(), Config::default()).unwrap();
    context.register(Arc::clone(&model)).unwrap();
    let mut session = context.session();

    let mut tally = session.new_entity(&model).unwrap();
    tally.set("label", "hey").unwrap();
    assert!(tally.set("shout", "no").unwrap_err().is_validation());
    let key = session.put(&mut tally).unwrap();

    let mut loaded = session.get(&key).unwrap().unwrap();
    let before = calls.load(Ordering::SeqCst);
    assert_eq!(loaded.get("shout").unwrap(), FieldValue::from("HEY"));
    assert_eq!(loaded.get("shout").unwrap(), FieldValue::from("HEY"));
    assert_eq!(calls.load(Ordering::SeqCst), before + 1);

    loaded.set("label", "ho").unwrap();
    loaded.invalidate("shout").unwrap();
    assert_eq!(loaded.get("shout").unwrap(), FieldValue::from("HO"));
    assert_eq!(calls.load(Ordering::SeqCst), before + 2);
}

#[test]
fn renamed_properties_use_the_stored_name() {
    let env = TestEnv::memory();
    let mut session = env.session();
    let mut cat = session.new_entity(&env.models.cat).unwrap();
    cat.set("name", "Tom").unwrap();
    cat.set("nickname", "tommy").unwrap();
    assert_eq!(cat.get("lives").unwrap(), FieldValue::Integer(9));
    let key = session.put(&mut cat).unwrap();

    let record = stored(&env, &key);
    assert!(record.properties.contains_key("nick"));
    assert!(!record.properties.contains_key("nickname"));

    let mut loaded = session.get(&key).unwrap().unwrap();
    assert_eq!(loaded.get("nickname").unwrap(), FieldValue::from("tommy"));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn compressed_blobs_round_trip_at_every_level(
        data in bytes_strategy(),
        level in compression_level_strategy(),
    ) {
        let model = Model::builder("Blob")
            .property(Property::bytes("data").compression_level(level).build().unwrap())
            .build()
            .unwrap();
        let context = Context::new(InMemoryAdapter::new(), Config::default()).unwrap();
        context.register(Arc::clone(&model)).unwrap();
        let mut session = context.session();

        let mut blob = session.new_entity(&model).unwrap();
        blob.set("data", data.clone()).unwrap();
        let key = session.put(&mut blob).unwrap();
        let mut loaded = session.get(&key).unwrap().unwrap();
        prop_assert_eq!(loaded.get("data").unwrap(), FieldValue::Bytes(data));
    }

    #[test]
    fn text_and_json_round_trip(
        body in text_strategy(),
        meta in json_strategy(),
        tags in tags_strategy(),
    ) {
        let env = TestEnv::memory();
        let mut session = env.session();
        let mut note = env.note(&session, "prop");
        note.set("body", body.clone()).unwrap();
        note.set("meta", meta.clone()).unwrap();
        note.set("tags", tags.clone()).unwrap();
        let key = session.put(&mut note).unwrap();

        let mut loaded = session.get(&key).unwrap().unwrap();
        prop_assert_eq!(loaded.get("body").unwrap(), FieldValue::Text(body));
        prop_assert_eq!(loaded.get("meta").unwrap(), FieldValue::Json(meta));
        prop_assert_eq!(loaded.get("tags").unwrap(), tags);
    }

    #[test]
    fn datetimes_normalize_to_utc(dt in offset_datetime_strategy()) {
        let env = TestEnv::memory();
        let mut session = env.session();
        let mut note = env.note(&session, "when");
        note.set("created", dt).unwrap();
        let key = session.put(&mut note).unwrap();

        let mut loaded = session.get(&key).unwrap().unwrap();
        let created = loaded.get("created").unwrap();
        let created = created.as_datetime().unwrap();
        prop_assert_eq!(*created, dt);
        prop_assert_eq!(created.offset().local_minus_utc(), 0);
    }
}
