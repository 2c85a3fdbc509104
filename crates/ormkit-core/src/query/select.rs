//! Field-level select queries, before resolution against a schema.

use ormkit_proto::{OrderSpec, Pagination, Predicate};

use crate::catalog::FetchStrategy;

/// A select over an entity, expressed in field names.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectQuery {
    /// Entity to select.
    pub entity: String,
    /// Filter tree over field names.
    pub predicate: Option<Predicate>,
    /// Explicit ordering over field names.
    pub order_by: Vec<OrderSpec>,
    /// Pagination.
    pub pagination: Option<Pagination>,
    /// Per-relation fetch strategy overrides.
    pub fetch: Vec<(String, FetchStrategy)>,
}

impl SelectQuery {
    /// Select every row of an entity.
    pub fn new(entity: impl Into<String>) -> Self {
        Self {
            entity: entity.into(),
            predicate: None,
            order_by: Vec::new(),
            pagination: None,
            fetch: Vec::new(),
        }
    }

    /// Set the filter tree.
    pub fn with_predicate(mut self, predicate: Predicate) -> Self {
        self.predicate = Some(predicate);
        self
    }

    /// Add ordering.
    pub fn with_order(mut self, order: OrderSpec) -> Self {
        self.order_by.push(order);
        self
    }

    /// Set pagination.
    pub fn with_pagination(mut self, pagination: Pagination) -> Self {
        self.pagination = Some(pagination);
        self
    }

    /// Override the fetch strategy of a relation.
    pub fn with_fetch(mut self, relation: impl Into<String>, strategy: FetchStrategy) -> Self {
        let relation = relation.into();
        self.fetch.retain(|(name, _)| *name != relation);
        self.fetch.push((relation, strategy));
        self
    }

    /// The effective fetch override for a relation, if any.
    pub fn fetch_override(&self, relation: &str) -> Option<FetchStrategy> {
        self.fetch
            .iter()
            .find(|(name, _)| name == relation)
            .map(|(_, s)| *s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ormkit_proto::Comparison;

    #[test]
    fn test_fetch_override_replaces() {
        let query = SelectQuery::new("User")
            .with_predicate(Comparison::eq("hacker", true).into())
            .with_fetch("dogs", FetchStrategy::Skip)
            .with_fetch("dogs", FetchStrategy::Eager);

        assert_eq!(query.fetch.len(), 1);
        assert_eq!(query.fetch_override("dogs"), Some(FetchStrategy::Eager));
        assert_eq!(query.fetch_override("cat"), None);
    }
}
