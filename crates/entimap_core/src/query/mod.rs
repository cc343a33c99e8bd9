//! Queries over stored entities.
//!
//! A [`Query`] is a plain description: kind, ancestor, namespace, filters,
//! ordering and projection. Filter operands are run through the property
//! pipeline when the filter is added, so adapters only ever compare wire
//! values. Offsets and limits are handed to adapters page by page through
//! [`PageRequest`](crate::adapter::PageRequest) by a [`Resultset`].

mod resultset;

pub use resultset::{Page, Pages, Resultset};

use std::sync::Arc;

use entimap_codec::Value;

use crate::error::{CoreError, CoreResult};
use crate::key::Key;
use crate::model::Model;
use crate::property::FieldValue;

/// Comparison applied by a [`Filter`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    /// Equal.
    Eq,
    /// Less than.
    Lt,
    /// Less than or equal.
    Le,
    /// Greater than.
    Gt,
    /// Greater than or equal.
    Ge,
}

impl FilterOp {
    /// Whether `ordering` (stored value compared to operand) satisfies the op.
    #[must_use]
    pub fn accepts(self, ordering: std::cmp::Ordering) -> bool {
        use std::cmp::Ordering::{Equal, Greater, Less};
        match self {
            Self::Eq => ordering == Equal,
            Self::Lt => ordering == Less,
            Self::Le => ordering != Greater,
            Self::Gt => ordering == Greater,
            Self::Ge => ordering != Less,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Direction {
    /// Smallest first.
    #[default]
    Ascending,
    /// Largest first.
    Descending,
}

/// A property filter with a wire-form operand.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    /// Store-side property name.
    pub property: String,
    /// Comparison.
    pub op: FilterOp,
    /// Operand, already through the store pipeline.
    pub value: Value,
}

/// A sort order on one property.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Order {
    /// Store-side property name.
    pub property: String,
    /// Direction.
    pub direction: Direction,
}

/// A query description.
#[derive(Debug, Clone, Default)]
pub struct Query {
    model: Option<Arc<Model>>,
    ancestor: Option<Key>,
    namespace: Option<String>,
    namespace_set: bool,
    filters: Vec<Filter>,
    orders: Vec<Order>,
    projection: Vec<String>,
    keys_only: bool,
    offset: usize,
    limit: Option<usize>,
}

impl Query {
    /// Query over the entities of one model.
    #[must_use]
    pub fn for_model(model: &Arc<Model>) -> Self {
        Self {
            model: Some(Arc::clone(model)),
            ..Self::default()
        }
    }

    /// Query over every kind. Only key-level constraints apply.
    #[must_use]
    pub fn kindless() -> Self {
        Self::default()
    }

    /// Restricts results to `ancestor` and its descendants. The ancestor's
    /// namespace takes precedence over any other namespace.
    pub fn ancestor(mut self, ancestor: Key) -> CoreResult<Self> {
        ancestor.ensure_complete()?;
        self.ancestor = Some(ancestor);
        Ok(self)
    }

    /// Sets the namespace explicitly. An empty name selects the default
    /// namespace.
    #[must_use]
    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.namespace = (!namespace.is_empty()).then_some(namespace);
        self.namespace_set = true;
        self
    }

    /// Adds a filter on an indexed property.
    pub fn filter(
        mut self,
        name: &str,
        op: FilterOp,
        value: impl Into<FieldValue>,
    ) -> CoreResult<Self> {
        let model = self.require_model("filter")?;
        let property = model.property(name)?;
        if !property.is_indexed() || property.is_computed() {
            return Err(CoreError::invalid_operation(format!(
                "property {name} is not indexed and cannot be filtered on"
            )));
        }
        let value = property.prepare_filter_value(value.into())?;
        let property = property.name_on_entity().to_string();
        self.filters.push(Filter {
            property,
            op,
            value,
        });
        Ok(self)
    }

    /// Adds a sort order on an indexed property.
    pub fn order_by(mut self, name: &str, direction: Direction) -> CoreResult<Self> {
        let model = self.require_model("order")?;
        let property = model.property(name)?;
        if !property.is_indexed() || property.is_computed() {
            return Err(CoreError::invalid_operation(format!(
                "property {name} is not indexed and cannot be ordered on"
            )));
        }
        let property = property.name_on_entity().to_string();
        self.orders.push(Order {
            property,
            direction,
        });
        Ok(self)
    }

    /// Returns only the named properties.
    pub fn project<'a>(mut self, names: impl IntoIterator<Item = &'a str>) -> CoreResult<Self> {
        let model = self.require_model("project")?;
        let mut projection = Vec::new();
        for name in names {
            let property = model.property(name)?;
            if !property.is_indexed() || property.is_computed() {
                return Err(CoreError::invalid_operation(format!(
                    "property {name} is not indexed and cannot be projected"
                )));
            }
            projection.push(property.name_on_entity().to_string());
        }
        self.projection = projection;
        Ok(self)
    }

    /// Returns keys without properties.
    #[must_use]
    pub fn keys_only(mut self) -> Self {
        self.keys_only = true;
        self
    }

    /// Skips the first `offset` matches.
    #[must_use]
    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = offset;
        self
    }

    /// Caps the number of results.
    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Model the query targets, if any.
    #[must_use]
    pub fn model(&self) -> Option<&Arc<Model>> {
        self.model.as_ref()
    }

    /// Kind the query targets, if any.
    #[must_use]
    pub fn kind(&self) -> Option<&str> {
        self.model.as_deref().map(Model::kind)
    }

    /// Ancestor constraint.
    #[must_use]
    pub fn ancestor_key(&self) -> Option<&Key> {
        self.ancestor.as_ref()
    }

    /// Namespace results must live in.
    #[must_use]
    pub fn target_namespace(&self) -> Option<&str> {
        match &self.ancestor {
            Some(ancestor) => ancestor.namespace(),
            None => self.namespace.as_deref(),
        }
    }

    /// Filters, all of which must match.
    #[must_use]
    pub fn filters(&self) -> &[Filter] {
        &self.filters
    }

    /// Sort orders, most significant first.
    #[must_use]
    pub fn orders(&self) -> &[Order] {
        &self.orders
    }

    /// Projected store-side names. Empty means full entities.
    #[must_use]
    pub fn projection(&self) -> &[String] {
        &self.projection
    }

    /// Whether only keys are returned.
    #[must_use]
    pub fn is_keys_only(&self) -> bool {
        self.keys_only
    }

    /// Matches skipped before the first result.
    #[must_use]
    pub fn skip(&self) -> usize {
        self.offset
    }

    /// Maximum number of results.
    #[must_use]
    pub fn max_results(&self) -> Option<usize> {
        self.limit
    }

    /// Fills in the namespace when none was given explicitly.
    pub(crate) fn with_default_namespace(mut self, namespace: Option<String>) -> Self {
        if !self.namespace_set {
            self.namespace = namespace;
            self.namespace_set = true;
        }
        self
    }

    fn require_model(&self, what: &str) -> CoreResult<Arc<Model>> {
        self.model.clone().ok_or_else(|| {
            CoreError::invalid_operation(format!("kindless queries cannot {what} on properties"))
        })
    }
}
