//! Cache tier behavior seen through sessions.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use entimap_core::adapter::CacheValue;
use entimap_core::{
    Adapter, CacheConfig, CacheStore, CachedAdapter, Config, FieldValue, InMemoryAdapter, Key, MemoryCache,
    Query,
};
use entimap_testkit::prelude::*;

type Counted = Arc<CountingAdapter<Arc<InMemoryAdapter>>>;

struct Harness {
    env: TestEnv,
    counting: Counted,
    cache: Arc<MemoryCache>,
    cached: Arc<CachedAdapter<Counted, Arc<MemoryCache>>>,
}

fn harness() -> Harness {
    init_tracing();
    let base = Arc::new(InMemoryAdapter::new());
    let counting = Arc::new(CountingAdapter::new(Arc::clone(&base)));
    let cache = Arc::new(MemoryCache::new());
    let cached = Arc::new(CachedAdapter::new(
        Arc::clone(&counting),
        Arc::clone(&cache),
        CacheConfig::default(),
    ));
    let env = TestEnv::over(Arc::clone(&cached), base, Config::default());
    Harness {
        env,
        counting,
        cache,
        cached,
    }
}

fn age(entity: Option<entimap_core::Entity>) -> i64 {
    entity
        .expect("entity present")
        .get("age")
        .unwrap()
        .as_integer()
        .unwrap()
}

#[test]
fn repeated_reads_hit_the_cache() {
    let h = harness();
    let mut session = h.env.session();
    let key = session.put(&mut h.env.person(&session, "Ada", 36)).unwrap();
    h.counting.reset();

    assert_eq!(age(session.get(&key).unwrap()), 36);
    assert_eq!(age(session.get(&key).unwrap()), 36);
    assert_eq!(age(session.get(&key).unwrap()), 36);
    assert_eq!(h.counting.counts().keys_read, 1);

    let cache_key = h.cached.cache_key(&key).unwrap();
    let entry = h.cache.gets(&cache_key).unwrap().unwrap();
    assert!(matches!(entry.value, CacheValue::Value(_)));
}

#[test]
fn writes_replace_the_entry_with_a_placeholder() {
    let h = harness();
    let mut session = h.env.session();
    let mut ada = h.env.person(&session, "Ada", 36);
    let key = session.put(&mut ada).unwrap();
    session.get(&key).unwrap();

    ada.set("age", 37).unwrap();
    session.put(&mut ada).unwrap();
    let cache_key = h.cached.cache_key(&key).unwrap();
    assert_eq!(
        h.cache.gets(&cache_key).unwrap().unwrap().value,
        CacheValue::Empty
    );
    assert_eq!(age(session.get(&key).unwrap()), 37);
    assert!(matches!(
        h.cache.gets(&cache_key).unwrap().unwrap().value,
        CacheValue::Value(_)
    ));
}

#[test]
fn deletes_remove_the_entry() {
    let h = harness();
    let mut session = h.env.session();
    let key = session.put(&mut h.env.person(&session, "Ada", 36)).unwrap();
    session.get(&key).unwrap();

    session.delete(&key).unwrap();
    assert!(h.cache.gets(&h.cached.cache_key(&key).unwrap()).unwrap().is_none());
    assert!(session.get(&key).unwrap().is_none());
}

#[test]
fn absence_is_not_cached() {
    let h = harness();
    let mut session = h.env.session();
    let key = session.key(PERSON).id(42).build().unwrap();
    assert!(session.get(&key).unwrap().is_none());

    // written behind the cache's back
    let mut ada = h.env.person(&session, "Ada", 36);
    ada.set_key(key.clone()).unwrap();
    let record = ada.to_record().unwrap();
    h.env.base.put(record).unwrap();

    assert_eq!(age(session.get(&key).unwrap()), 36);
}

#[test]
fn committed_transactions_invalidate_written_keys() {
    let h = harness();
    let mut session = h.env.session();
    let key = session.put(&mut h.env.person(&session, "Ada", 36)).unwrap();
    assert_eq!(age(session.get(&key).unwrap()), 36);

    session
        .transaction(|s| {
            let mut ada = s.get(&key)?.expect("present");
            ada.set("age", 40)?;
            s.put(&mut ada)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(age(session.get(&key).unwrap()), 40);
}

#[test]
fn queries_bypass_the_cache() {
    let h = harness();
    let mut session = h.env.session();
    h.env.populate_people(&mut session, 3);
    h.counting.reset();
    let cached_before = h.cache.len();

    assert_eq!(session.count(Query::for_model(&h.env.models.person)).unwrap(), 3);
    assert_eq!(h.counting.counts().queries, 1);
    assert_eq!(h.cache.len(), cached_before);
}

#[test]
fn cache_outages_degrade_to_the_base() {
    init_tracing();
    let base = Arc::new(InMemoryAdapter::new());
    let cache = Arc::new(FlakyCache::new());
    let adapter = CachedAdapter::new(Arc::clone(&base), Arc::clone(&cache), CacheConfig::default());
    let env = TestEnv::over(adapter, base, Config::default());
    let mut session = env.session();

    cache.set_failing(true);
    let mut ada = env.person(&session, "Ada", 36);
    let key = session.put(&mut ada).unwrap();
    assert_eq!(age(session.get(&key).unwrap()), 36);
    ada.set("age", 37).unwrap();
    session.put(&mut ada).unwrap();
    assert_eq!(age(session.get(&key).unwrap()), 37);
    assert!(cache.faults() > 0);
    assert!(cache.inner().is_empty());

    cache.set_failing(false);
    assert_eq!(age(session.get(&key).unwrap()), 37);
    assert_eq!(cache.inner().len(), 1);
    session.delete(&key).unwrap();
    assert!(session.get(&key).unwrap().is_none());
}

#[test]
fn disabled_cache_passes_through() {
    let base = Arc::new(InMemoryAdapter::new());
    let cache = Arc::new(MemoryCache::new());
    let config = Config::default().cache(CacheConfig::disabled());
    let adapter = CachedAdapter::new(Arc::clone(&base), Arc::clone(&cache), config.cache.clone());
    let env = TestEnv::over(adapter, base, config);
    let mut session = env.session();

    let key = session.put(&mut env.person(&session, "Ada", 36)).unwrap();
    assert_eq!(age(session.get(&key).unwrap()), 36);
    assert!(cache.is_empty());
}

#[test]
fn readers_never_see_a_value_older_than_an_acknowledged_write() {
    const WRITES: i64 = 200;
    const READERS: usize = 4;

    let h = harness();
    let mut writer = h.env.session();
    let mut person = h.env.person(&writer, "Racer", 0);
    let key: Key = writer.put(&mut person).unwrap();
    let acknowledged = AtomicI64::new(0);
    let finished = AtomicBool::new(false);

    thread::scope(|scope| {
        for _ in 0..READERS {
            scope.spawn(|| {
                let mut session = h.env.session();
                while !finished.load(Ordering::SeqCst) {
                    let floor = acknowledged.load(Ordering::SeqCst);
                    let seen = age(session.get(&key).unwrap());
                    assert!(
                        seen >= floor,
                        "read {seen} after write {floor} was acknowledged"
                    );
                }
            });
        }

        for version in 1..=WRITES {
            person.set("age", version).unwrap();
            writer.put(&mut person).unwrap();
            acknowledged.store(version, Ordering::SeqCst);
        }
        finished.store(true, Ordering::SeqCst);
    });

    let mut reader = h.env.session();
    assert_eq!(
        reader.get(&key).unwrap().unwrap().get("age").unwrap(),
        FieldValue::Integer(WRITES)
    );
}
