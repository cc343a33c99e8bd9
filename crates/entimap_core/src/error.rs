//! Error types for entimap core.

use thiserror::Error;

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Boxed source error carried by adapter faults.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors that can occur in entimap core operations.
///
/// Absent entities are not errors: reads report them as data
/// ([`Lookup::Missing`](crate::adapter::Lookup) or `None`).
#[derive(Debug, Error)]
pub enum CoreError {
    /// CBOR codec error.
    #[error("codec error: {0}")]
    Codec(#[from] entimap_codec::CodecError),

    /// A value failed type, length or required/optional checks.
    #[error("validation failed for property {property}: {message}")]
    Validation {
        /// Model-side property name.
        property: String,
        /// Description of the failure.
        message: String,
    },

    /// A key was malformed, partial where a complete key is required, or of
    /// the wrong kind.
    #[error("invalid key: {message}")]
    InvalidKey {
        /// Description of the failure.
        message: String,
    },

    /// Assignment to a derived property.
    #[error("property {property} is read-only")]
    ReadOnly {
        /// Model-side property name.
        property: String,
    },

    /// A property or model definition is inconsistent.
    #[error("invalid definition of {name}: {message}")]
    InvalidDefinition {
        /// Property or model name.
        name: String,
        /// Description of the problem.
        message: String,
    },

    /// The model has no property with this name.
    #[error("model {kind} has no property {property}")]
    UnknownProperty {
        /// Model kind.
        kind: String,
        /// Requested property name.
        property: String,
    },

    /// No model is registered for this kind.
    #[error("no model registered for kind {kind}")]
    UnknownKind {
        /// Requested kind.
        kind: String,
    },

    /// The store detected a concurrent modification during commit.
    #[error("transaction conflict: {message}")]
    TransactionConflict {
        /// Description of the conflicting access.
        message: String,
    },

    /// A unit of work kept conflicting until its attempt budget ran out.
    #[error("transaction failed after {attempts} attempts")]
    RetriesExceeded {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Backing-store or transport failure unrelated to conflicts.
    #[error("adapter fault: {message}")]
    Adapter {
        /// Description of the fault.
        message: String,
        /// Underlying error, when the binding has one.
        #[source]
        source: Option<BoxError>,
    },

    /// Operation not permitted in current state.
    #[error("invalid operation: {message}")]
    InvalidOperation {
        /// Description of why the operation is invalid.
        message: String,
    },

    /// Configuration values are out of range.
    #[error("invalid configuration: {message}")]
    InvalidConfig {
        /// Description of the problem.
        message: String,
    },
}

impl CoreError {
    /// Creates a validation error.
    pub fn validation(property: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            property: property.into(),
            message: message.into(),
        }
    }

    /// Creates an invalid key error.
    pub fn invalid_key(message: impl Into<String>) -> Self {
        Self::InvalidKey {
            message: message.into(),
        }
    }

    /// Creates an invalid definition error.
    pub fn invalid_definition(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidDefinition {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Creates a transaction conflict error.
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::TransactionConflict {
            message: message.into(),
        }
    }

    /// Creates an adapter fault without a source.
    pub fn adapter(message: impl Into<String>) -> Self {
        Self::Adapter {
            message: message.into(),
            source: None,
        }
    }

    /// Creates an adapter fault wrapping an underlying error.
    pub fn adapter_with_source(message: impl Into<String>, source: impl Into<BoxError>) -> Self {
        Self::Adapter {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Creates an invalid operation error.
    pub fn invalid_operation(message: impl Into<String>) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    /// Creates an invalid configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig {
            message: message.into(),
        }
    }

    /// Returns true for value and identity errors raised before any store call.
    #[must_use]
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::Validation { .. } | Self::InvalidKey { .. } | Self::ReadOnly { .. }
        )
    }

    /// Returns true if the transaction manager should retry.
    #[must_use]
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::TransactionConflict { .. })
    }
}
