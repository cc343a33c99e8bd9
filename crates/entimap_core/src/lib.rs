//! # entimap core
//!
//! Typed entities over a pluggable key-value datastore.
//!
//! This crate provides:
//! - Property definitions with a reversible marshalling pipeline
//!   (encoding, compression, JSON, timestamps, computed values)
//! - Hierarchical keys with namespaces and ancestor paths
//! - Models, entities and a kind registry
//! - Lazy, paged queries
//! - The [`Adapter`] contract plus an in-memory binding
//! - A cache-consistent adapter wrapper with compare-and-swap leases
//! - Optimistic transactions with bounded, backed-off retry
//!
//! All shared state lives in an explicit [`Context`]; each caller works
//! through its own [`Session`].

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
mod config;
mod entity;
mod error;
mod key;
pub mod model;
pub mod property;
pub mod query;
mod session;
pub mod transaction;
mod types;

pub use adapter::{
    Adapter, CacheStore, CachedAdapter, InMemoryAdapter, Lookup, MemoryCache, PageRequest,
    QueryResponse, Record,
};
pub use config::{CacheConfig, Config, RetryConfig};
pub use entity::Entity;
pub use error::{BoxError, CoreError, CoreResult};
pub use key::{Key, KeyBuilder, KeyId};
pub use model::{Model, ModelBuilder, Registry};
pub use property::{FieldValue, Property, PropertyBuilder, PropertyKind};
pub use query::{Direction, FilterOp, Query, Resultset};
pub use session::{Context, NamespaceGuard, Session};
pub use transaction::{Transaction, TransactionManager, TransactionState};
pub use types::{Cursor, SequenceNumber, TransactionId};

pub use entimap_codec::Value;
