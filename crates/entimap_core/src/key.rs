//! Hierarchical entity keys.
//!
//! A [`Key`] is an immutable value: kind, optional identifier, optional
//! parent and namespace. Keys without an identifier are *partial*; they may
//! only identify an entity that has not been stored yet.

use std::fmt;
use std::sync::Arc;

use entimap_codec::{Encode, IdOrName, KeyPath, PathElement};

use crate::error::{CoreError, CoreResult};

/// Identifier portion of a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyId {
    /// Integer id, always positive.
    Id(i64),
    /// String name, never empty.
    Name(String),
}

impl From<i64> for KeyId {
    fn from(id: i64) -> Self {
        Self::Id(id)
    }
}

impl From<&str> for KeyId {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<String> for KeyId {
    fn from(name: String) -> Self {
        Self::Name(name)
    }
}

impl From<&KeyId> for IdOrName {
    fn from(id: &KeyId) -> Self {
        match id {
            KeyId::Id(id) => IdOrName::Id(*id),
            KeyId::Name(name) => IdOrName::Name(name.clone()),
        }
    }
}

impl From<&IdOrName> for KeyId {
    fn from(id: &IdOrName) -> Self {
        match id {
            IdOrName::Id(id) => KeyId::Id(*id),
            IdOrName::Name(name) => KeyId::Name(name.clone()),
        }
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Id(id) => write!(f, "{id}"),
            Self::Name(name) => write!(f, "{name:?}"),
        }
    }
}

#[derive(PartialEq, Eq, Hash)]
struct KeyInner {
    kind: String,
    id: Option<KeyId>,
    parent: Option<Key>,
    namespace: Option<String>,
}

/// An immutable hierarchical entity key.
///
/// Two keys are equal iff kind, identifier, full ancestor chain and
/// namespace are all equal. Cloning is cheap.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Key(Arc<KeyInner>);

impl Key {
    /// Starts building a key of `kind`.
    pub fn builder(kind: impl Into<String>) -> KeyBuilder {
        KeyBuilder {
            kind: kind.into(),
            id: None,
            parent: None,
            namespace: None,
            default_namespace: None,
        }
    }

    /// A partial root key in the default namespace.
    pub fn partial(kind: impl Into<String>) -> CoreResult<Self> {
        Self::builder(kind).build()
    }

    /// A complete root key in the default namespace.
    pub fn from_id(kind: impl Into<String>, id: impl Into<KeyId>) -> CoreResult<Self> {
        Self::builder(kind).id(id).build()
    }

    /// The kind of the leaf.
    pub fn kind(&self) -> &str {
        &self.0.kind
    }

    /// The identifier, `None` for partial keys.
    pub fn id(&self) -> Option<&KeyId> {
        self.0.id.as_ref()
    }

    /// The integer id, if this key has one.
    pub fn int_id(&self) -> Option<i64> {
        match self.0.id {
            Some(KeyId::Id(id)) => Some(id),
            _ => None,
        }
    }

    /// The string name, if this key has one.
    pub fn name(&self) -> Option<&str> {
        match &self.0.id {
            Some(KeyId::Name(name)) => Some(name),
            _ => None,
        }
    }

    /// The parent key.
    pub fn parent(&self) -> Option<&Key> {
        self.0.parent.as_ref()
    }

    /// The namespace, `None` for the default namespace.
    pub fn namespace(&self) -> Option<&str> {
        self.0.namespace.as_deref()
    }

    /// Returns true if the key has no identifier.
    pub fn is_partial(&self) -> bool {
        self.0.id.is_none()
    }

    /// Returns true if the key has an identifier.
    pub fn is_complete(&self) -> bool {
        !self.is_partial()
    }

    /// Fails with [`CoreError::InvalidKey`] unless the key is complete.
    pub fn ensure_complete(&self) -> CoreResult<()> {
        if self.is_partial() {
            return Err(CoreError::invalid_key(format!(
                "{self} is partial where a complete key is required"
            )));
        }
        Ok(())
    }

    /// The root ancestor (or this key when it has no parent).
    pub fn root(&self) -> &Key {
        let mut current = self;
        while let Some(parent) = current.parent() {
            current = parent;
        }
        current
    }

    /// Keys from the root down to and including this one.
    pub fn path(&self) -> Vec<&Key> {
        let mut chain = vec![self];
        let mut current = self;
        while let Some(parent) = current.parent() {
            chain.push(parent);
            current = parent;
        }
        chain.reverse();
        chain
    }

    /// Returns true if `self` is `other` or one of its ancestors.
    pub fn is_ancestor_of(&self, other: &Key) -> bool {
        other.path().into_iter().any(|k| k == self)
    }

    /// Completes a partial key with `id`.
    ///
    /// Identifiers are assigned exactly once: completing a complete key fails.
    pub fn with_id(&self, id: impl Into<KeyId>) -> CoreResult<Key> {
        if self.is_complete() {
            return Err(CoreError::invalid_key(format!("{self} already has an identifier")));
        }
        let mut builder = Key::builder(self.kind()).id(id);
        if let Some(parent) = self.parent() {
            builder = builder.parent(parent.clone());
        }
        if let Some(ns) = self.namespace() {
            builder = builder.namespace(ns);
        }
        builder.build()
    }

    /// Wire form of this key.
    pub fn to_path(&self) -> KeyPath {
        let elements = self
            .path()
            .into_iter()
            .map(|k| PathElement {
                kind: k.kind().to_string(),
                id: k.id().map(IdOrName::from),
            })
            .collect();
        KeyPath::new(self.0.namespace.clone(), elements)
    }

    /// Rebuilds a key from its wire form, re-checking every invariant.
    pub fn from_path(path: &KeyPath) -> CoreResult<Key> {
        let mut current: Option<Key> = None;
        for element in &path.elements {
            let mut builder = Key::builder(element.kind.clone());
            if let Some(id) = &element.id {
                builder = builder.id(KeyId::from(id));
            }
            if let Some(parent) = current.take() {
                builder = builder.parent(parent);
            } else if let Some(ns) = &path.namespace {
                builder = builder.namespace(ns.clone());
            }
            current = Some(builder.build()?);
        }
        current.ok_or_else(|| CoreError::invalid_key("key path has no elements"))
    }

    /// Canonical bytes identifying this key, used for cache keys.
    pub fn storage_key(&self) -> CoreResult<Vec<u8>> {
        Ok(self.to_path().encode()?)
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.to_path(), f)
    }
}

impl fmt::Debug for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Key({self})")
    }
}

/// Builder for [`Key`].
#[derive(Debug, Clone)]
#[must_use]
pub struct KeyBuilder {
    kind: String,
    id: Option<KeyId>,
    parent: Option<Key>,
    namespace: Option<String>,
    default_namespace: Option<String>,
}

impl KeyBuilder {
    /// Sets the identifier.
    pub fn id(mut self, id: impl Into<KeyId>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the parent key.
    pub fn parent(mut self, parent: Key) -> Self {
        self.parent = Some(parent);
        self
    }

    /// Sets the namespace explicitly. An empty string means the default
    /// namespace.
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    /// Namespace used when none is set explicitly and there is no parent to
    /// inherit from.
    pub fn default_namespace(mut self, namespace: Option<String>) -> Self {
        self.default_namespace = namespace;
        self
    }

    /// Validates and builds the key.
    pub fn build(self) -> CoreResult<Key> {
        if self.kind.is_empty() {
            return Err(CoreError::invalid_key("kind must not be empty"));
        }
        match &self.id {
            Some(KeyId::Id(id)) if *id <= 0 => {
                return Err(CoreError::invalid_key(format!(
                    "integer ids must be positive, got {id}"
                )))
            }
            Some(KeyId::Name(name)) if name.is_empty() => {
                return Err(CoreError::invalid_key("names must not be empty"))
            }
            _ => {}
        }

        let explicit = self.namespace.map(normalize_namespace);
        let namespace = match &self.parent {
            Some(parent) => {
                if parent.is_partial() {
                    return Err(CoreError::invalid_key(format!(
                        "partial key {parent} cannot be used as an ancestor"
                    )));
                }
                let inherited = parent.0.namespace.clone();
                if let Some(explicit) = explicit {
                    if explicit != inherited {
                        return Err(CoreError::invalid_key(format!(
                            "namespace {:?} does not match parent namespace {:?}",
                            explicit.as_deref().unwrap_or(""),
                            inherited.as_deref().unwrap_or(""),
                        )));
                    }
                }
                inherited
            }
            None => explicit.unwrap_or_else(|| self.default_namespace.and_then(normalize_namespace)),
        };

        Ok(Key(Arc::new(KeyInner {
            kind: self.kind,
            id: self.id,
            parent: self.parent,
            namespace,
        })))
    }
}

fn normalize_namespace(namespace: String) -> Option<String> {
    if namespace.is_empty() {
        None
    } else {
        Some(namespace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn person(id: i64) -> Key {
        Key::from_id("Person", id).unwrap()
    }

    #[test]
    fn equality_covers_every_component() {
        assert_eq!(person(1), person(1));
        assert_ne!(person(1), person(2));
        assert_ne!(person(1), Key::from_id("Cat", 1).unwrap());
        assert_ne!(person(1), Key::builder("Person").id(1).namespace("other").build().unwrap());

        let a = Key::builder("Note").id("n").parent(person(1)).build().unwrap();
        let b = Key::builder("Note").id("n").parent(person(2)).build().unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn partial_keys() {
        let key = Key::partial("Person").unwrap();
        assert!(key.is_partial());
        assert!(key.ensure_complete().is_err());
        assert_eq!(key.id(), None);
    }

    #[test]
    fn invalid_components_are_rejected() {
        assert!(Key::partial("").is_err());
        assert!(Key::from_id("Person", 0).is_err());
        assert!(Key::from_id("Person", -3).is_err());
        assert!(Key::from_id("Person", "").is_err());
    }

    #[test]
    fn partial_parent_is_rejected() {
        let parent = Key::partial("Person").unwrap();
        let err = Key::builder("Note").id(1).parent(parent).build().unwrap_err();
        assert!(matches!(err, CoreError::InvalidKey { .. }));
    }

    #[test]
    fn child_inherits_parent_namespace() {
        let parent = Key::builder("Person").id(1).namespace("tenant").build().unwrap();
        let child = Key::builder("Note")
            .id(2)
            .parent(parent.clone())
            .default_namespace(Some("ignored".into()))
            .build()
            .unwrap();
        assert_eq!(child.namespace(), Some("tenant"));

        let same = Key::builder("Note").id(2).parent(parent.clone()).namespace("tenant").build();
        assert_eq!(same.unwrap(), child);

        let mismatch = Key::builder("Note").id(2).parent(parent).namespace("other").build();
        assert!(matches!(mismatch, Err(CoreError::InvalidKey { .. })));
    }

    #[test]
    fn empty_namespace_is_the_default() {
        let a = Key::builder("Person").id(1).namespace("").build().unwrap();
        assert_eq!(a.namespace(), None);
        assert_eq!(a, person(1));
    }

    #[test]
    fn explicit_namespace_beats_default() {
        let key = Key::builder("Person")
            .id(1)
            .namespace("explicit")
            .default_namespace(Some("fallback".into()))
            .build()
            .unwrap();
        assert_eq!(key.namespace(), Some("explicit"));
        let key = Key::builder("Person")
            .id(1)
            .default_namespace(Some("fallback".into()))
            .build()
            .unwrap();
        assert_eq!(key.namespace(), Some("fallback"));
    }

    #[test]
    fn with_id_assigns_exactly_once() {
        let parent = Key::builder("Person").id(1).namespace("ns").build().unwrap();
        let partial = Key::builder("Note").parent(parent.clone()).build().unwrap();
        let complete = partial.with_id(42).unwrap();
        assert_eq!(complete.int_id(), Some(42));
        assert_eq!(complete.parent(), Some(&parent));
        assert_eq!(complete.namespace(), Some("ns"));
        assert!(complete.with_id(43).is_err());
    }

    #[test]
    fn path_round_trip() {
        let root = Key::builder("Person").id("ada").namespace("ns").build().unwrap();
        let leaf = Key::builder("Note").id(7).parent(root.clone()).build().unwrap();
        let path = leaf.to_path();
        assert_eq!(path.namespace.as_deref(), Some("ns"));
        assert_eq!(path.elements.len(), 2);
        assert_eq!(Key::from_path(&path).unwrap(), leaf);
        assert_eq!(leaf.root(), &root);
        assert!(root.is_ancestor_of(&leaf));
        assert!(!leaf.is_ancestor_of(&root));
        assert_eq!(leaf.to_string(), "ns|Person:\"ada\"/Note:7");
    }

    #[test]
    fn storage_keys_distinguish_namespaces() {
        let a = person(1).storage_key().unwrap();
        let b = Key::builder("Person").id(1).namespace("x").build().unwrap().storage_key().unwrap();
        assert_ne!(a, b);
        assert_eq!(a, person(1).storage_key().unwrap());
    }
}
