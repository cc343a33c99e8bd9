//! Property-based test generators using proptest.
//!
//! Provides strategies for generating random test data
//! that maintains required invariants.

use chrono::{DateTime, FixedOffset, Utc};
use entimap_core::property::MAX_INDEXED_LENGTH;
use entimap_core::{FieldValue, Key, KeyId};
use proptest::prelude::*;

/// Strategy for generating valid kinds.
pub fn kind_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[A-Z][A-Za-z0-9]{0,15}").expect("Invalid regex")
}

/// Strategy for generating valid key identifiers.
pub fn key_id_strategy() -> impl Strategy<Value = KeyId> {
    prop_oneof![
        (1..=i64::MAX).prop_map(KeyId::Id),
        prop::string::string_regex("[a-z][a-z0-9-]{0,23}")
            .expect("Invalid regex")
            .prop_map(KeyId::Name),
    ]
}

/// Strategy for generating optional namespaces.
pub fn namespace_strategy() -> impl Strategy<Value = Option<String>> {
    prop::option::of(prop::string::string_regex("[a-z][a-z0-9_]{0,15}").expect("Invalid regex"))
}

/// Strategy for generating complete keys with up to `max_depth` path
/// elements, all in one namespace.
pub fn key_strategy(max_depth: usize) -> impl Strategy<Value = Key> {
    (
        namespace_strategy(),
        prop::collection::vec((kind_strategy(), key_id_strategy()), 1..=max_depth.max(1)),
    )
        .prop_map(|(namespace, elements)| {
            let mut parent: Option<Key> = None;
            for (kind, id) in elements {
                let builder = Key::builder(kind).id(id);
                let builder = match (parent.take(), &namespace) {
                    (Some(parent), _) => builder.parent(parent),
                    (None, Some(namespace)) => builder.namespace(namespace.clone()),
                    (None, None) => builder,
                };
                parent = Some(builder.build().expect("generated key"));
            }
            parent.expect("at least one path element")
        })
}

/// Strategy for generating text accepted by an indexed string property.
pub fn indexed_text_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex(&format!("\\PC{{0,{MAX_INDEXED_LENGTH}}}")).expect("Invalid regex")
}

/// Strategy for generating arbitrary text, including long values.
pub fn text_strategy() -> impl Strategy<Value = String> {
    prop_oneof![
        any::<String>(),
        prop::string::string_regex("[a-z ]{0,4096}").expect("Invalid regex"),
    ]
}

/// Strategy for generating blob payloads.
pub fn bytes_strategy() -> impl Strategy<Value = Vec<u8>> {
    prop_oneof![
        prop::collection::vec(any::<u8>(), 0..1024),
        // compressible runs
        (any::<u8>(), 0usize..8192).prop_map(|(byte, len)| vec![byte; len]),
    ]
}

/// Strategy for generating compression levels accepted by compressed
/// properties.
pub fn compression_level_strategy() -> impl Strategy<Value = i32> {
    -1..=9i32
}

/// Strategy for generating JSON documents that survive a compact round trip.
pub fn json_strategy() -> impl Strategy<Value = serde_json::Value> {
    let leaf = prop_oneof![
        Just(serde_json::Value::Null),
        any::<bool>().prop_map(serde_json::Value::from),
        any::<i64>().prop_map(serde_json::Value::from),
        prop::string::string_regex("[a-zA-Z0-9 ]{0,16}")
            .expect("Invalid regex")
            .prop_map(serde_json::Value::from),
    ];
    leaf.prop_recursive(3, 32, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(serde_json::Value::Array),
            prop::collection::btree_map("[a-z]{1,8}", inner, 0..4)
                .prop_map(|map| serde_json::Value::Object(map.into_iter().collect())),
        ]
    })
}

/// Strategy for generating microsecond-precision UTC instants.
pub fn utc_datetime_strategy() -> impl Strategy<Value = DateTime<Utc>> {
    // 1970 to 2100
    (0i64..4_102_444_800_000_000)
        .prop_map(|micros| DateTime::from_timestamp_micros(micros).expect("in-range timestamp"))
}

/// Strategy for generating microsecond-precision instants with arbitrary
/// whole-minute offsets.
pub fn offset_datetime_strategy() -> impl Strategy<Value = DateTime<FixedOffset>> {
    (utc_datetime_strategy(), -840i32..=840).prop_map(|(utc, minutes)| {
        let offset = FixedOffset::east_opt(minutes * 60).expect("offset in range");
        utc.with_timezone(&offset)
    })
}

/// Strategy for generating `Person` fields.
pub fn person_strategy() -> impl Strategy<Value = (String, i64)> {
    (
        prop::string::string_regex("[A-Z][a-z]{0,11}").expect("Invalid regex"),
        0i64..130,
    )
}

/// Strategy for generating values of a repeated string property.
pub fn tags_strategy() -> impl Strategy<Value = FieldValue> {
    prop::collection::vec("[a-z]{1,8}", 0..6).prop_map(|tags| FieldValue::list(tags))
}
