//! Test fixtures and environment helpers.
//!
//! Provides the fixture models used across the integration suites and
//! ready-made contexts over the in-memory adapter, with or without the cache
//! tier.

use std::sync::Arc;

use entimap_core::{
    CacheConfig, CachedAdapter, Config, Context, Entity, FieldValue, InMemoryAdapter, MemoryCache,
    Model, Property, Session,
};

/// Kind of the [`person_model`].
pub const PERSON: &str = "Person";
/// Kind of the [`note_model`].
pub const NOTE: &str = "Note";
/// Kind of the [`cat_model`].
pub const CAT: &str = "Cat";

/// `Person`: an indexed name, an optional indexed age, an optional email and
/// a computed `initial`.
pub fn person_model() -> Arc<Model> {
    Model::builder(PERSON)
        .property(Property::string("name").indexed(true).build().expect("name"))
        .property(
            Property::integer("age")
                .indexed(true)
                .optional(true)
                .build()
                .expect("age"),
        )
        .property(Property::string("email").optional(true).build().expect("email"))
        .property(
            Property::computed("initial", |person| {
                person
                    .value("name")
                    .and_then(FieldValue::as_text)
                    .and_then(|name| name.chars().next())
                    .map_or(FieldValue::Null, |c| FieldValue::Text(c.to_string()))
            })
            .build()
            .expect("initial"),
        )
        .build()
        .expect("person model")
}

/// `Note`: exercises every pipeline stage. The body is compressed text, the
/// metadata compressed JSON, and the timestamps are automatic.
pub fn note_model() -> Arc<Model> {
    Model::builder(NOTE)
        .property(Property::string("title").indexed(true).build().expect("title"))
        .property(
            Property::text("body")
                .optional(true)
                .compressed(true)
                .build()
                .expect("body"),
        )
        .property(
            Property::string("tags")
                .indexed(true)
                .repeated(true)
                .optional(true)
                .build()
                .expect("tags"),
        )
        .property(
            Property::json("meta")
                .optional(true)
                .compressed(true)
                .build()
                .expect("meta"),
        )
        .property(
            Property::bytes("attachment")
                .optional(true)
                .compression_level(9)
                .build()
                .expect("attachment"),
        )
        .property(
            Property::datetime("created")
                .auto_now_add(true)
                .build()
                .expect("created"),
        )
        .property(Property::datetime("updated").auto_now(true).build().expect("updated"))
        .property(
            Property::key("author")
                .key_kind(PERSON)
                .optional(true)
                .indexed(true)
                .build()
                .expect("author"),
        )
        .build()
        .expect("note model")
}

/// `Cat`: usually keyed under its owning `Person`.
pub fn cat_model() -> Arc<Model> {
    Model::builder(CAT)
        .property(Property::string("name").indexed(true).build().expect("name"))
        .property(
            Property::integer("lives")
                .indexed(true)
                .default(9)
                .build()
                .expect("lives"),
        )
        .property(
            Property::string("nickname")
                .name_on_entity("nick")
                .optional(true)
                .build()
                .expect("nickname"),
        )
        .build()
        .expect("cat model")
}

/// The fixture models of one environment.
#[derive(Debug, Clone)]
pub struct Models {
    /// [`person_model`].
    pub person: Arc<Model>,
    /// [`note_model`].
    pub note: Arc<Model>,
    /// [`cat_model`].
    pub cat: Arc<Model>,
}

impl Models {
    /// Builds all fixture models.
    pub fn new() -> Self {
        Self {
            person: person_model(),
            note: note_model(),
            cat: cat_model(),
        }
    }
}

impl Default for Models {
    fn default() -> Self {
        Self::new()
    }
}

/// A context over a fresh in-memory adapter with the fixture models
/// registered.
pub struct TestEnv {
    /// The context under test.
    pub context: Context,
    /// Registered fixture models.
    pub models: Models,
    /// The in-memory base adapter, for direct inspection.
    pub base: Arc<InMemoryAdapter>,
    /// The cache, when the environment has a cache tier.
    pub cache: Option<Arc<MemoryCache>>,
}

impl TestEnv {
    /// In-memory adapter, no cache.
    pub fn memory() -> Self {
        Self::memory_with_config(Config::default())
    }

    /// In-memory adapter with `config`.
    pub fn memory_with_config(config: Config) -> Self {
        let base = Arc::new(InMemoryAdapter::new());
        let context = Context::new(Arc::clone(&base), config).expect("test context");
        Self::register(context, base, None)
    }

    /// In-memory adapter behind a [`CachedAdapter`] with a [`MemoryCache`].
    pub fn cached() -> Self {
        Self::cached_with_config(Config::default())
    }

    /// Cached environment with `config`.
    pub fn cached_with_config(config: Config) -> Self {
        let base = Arc::new(InMemoryAdapter::new());
        let cache = Arc::new(MemoryCache::new());
        let adapter = CachedAdapter::new(Arc::clone(&base), Arc::clone(&cache), config.cache.clone());
        let context = Context::new(adapter, config).expect("test context");
        Self::register(context, base, Some(cache))
    }

    /// Environment over a caller-built adapter stack. `base` should be the
    /// innermost in-memory adapter of that stack.
    pub fn over<A>(adapter: A, base: Arc<InMemoryAdapter>, config: Config) -> Self
    where
        A: entimap_core::Adapter + 'static,
    {
        let context = Context::new(adapter, config).expect("test context");
        Self::register(context, base, None)
    }

    fn register(context: Context, base: Arc<InMemoryAdapter>, cache: Option<Arc<MemoryCache>>) -> Self {
        let models = Models::new();
        for model in [&models.person, &models.note, &models.cat] {
            context.register(Arc::clone(model)).expect("register fixture model");
        }
        Self {
            context,
            models,
            base,
            cache,
        }
    }

    /// Opens a session.
    pub fn session(&self) -> Session {
        self.context.session()
    }

    /// The cache tier. Panics for an uncached environment.
    pub fn cache(&self) -> &Arc<MemoryCache> {
        self.cache.as_ref().expect("environment has no cache")
    }

    /// A new unsaved `Person` in the session's namespace.
    pub fn person(&self, session: &Session, name: &str, age: i64) -> Entity {
        let mut person = session.new_entity(&self.models.person).expect("person entity");
        person.set("name", name).expect("name");
        person.set("age", age).expect("age");
        person
    }

    /// A new unsaved `Note` in the session's namespace.
    pub fn note(&self, session: &Session, title: &str) -> Entity {
        let mut note = session.new_entity(&self.models.note).expect("note entity");
        note.set("title", title).expect("title");
        note
    }

    /// Saves `count` people named `person-<n>` aged `n`.
    pub fn populate_people(&self, session: &mut Session, count: usize) -> Vec<entimap_core::Key> {
        let mut people: Vec<Entity> = (0..count)
            .map(|n| self.person(session, &format!("person-{n}"), n as i64))
            .collect();
        session.put_multi(&mut people).expect("populate people")
    }
}

/// Cache settings for a cached environment with a short-lived entry TTL.
pub fn short_ttl_cache(ttl: std::time::Duration) -> Config {
    Config::default().cache(CacheConfig::default().ttl(ttl))
}
