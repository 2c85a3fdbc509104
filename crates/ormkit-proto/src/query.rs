//! Select plans and compiled queries handed to storage backends.

use crate::predicate::Predicate;
use crate::value::Value;
use serde::{Deserialize, Serialize};

/// Order specification for sorting results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSpec {
    /// Field (or column, once compiled) to order by.
    pub field: String,
    /// Sort direction.
    pub direction: OrderDirection,
}

impl OrderSpec {
    /// Create an ascending order spec.
    pub fn asc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Asc,
        }
    }

    /// Create a descending order spec.
    pub fn desc(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            direction: OrderDirection::Desc,
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderDirection {
    /// Ascending order.
    Asc,
    /// Descending order.
    Desc,
}

impl OrderDirection {
    /// SQL keyword for this direction.
    pub fn keyword(&self) -> &'static str {
        match self {
            OrderDirection::Asc => "ASC",
            OrderDirection::Desc => "DESC",
        }
    }
}

/// Pagination parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pagination {
    /// Maximum number of results to return. None means unbounded.
    pub limit: Option<u32>,
    /// Number of results to skip.
    pub offset: u32,
}

impl Pagination {
    /// Create pagination with limit and offset.
    pub fn new(limit: u32, offset: u32) -> Self {
        Self {
            limit: Some(limit),
            offset,
        }
    }

    /// Create pagination with just a limit.
    pub fn limit(limit: u32) -> Self {
        Self {
            limit: Some(limit),
            offset: 0,
        }
    }

    /// Create pagination with just an offset.
    pub fn offset(offset: u32) -> Self {
        Self {
            limit: None,
            offset,
        }
    }

    /// Apply this pagination to an already ordered list.
    pub fn apply<T>(&self, items: Vec<T>) -> Vec<T> {
        let skipped = items.into_iter().skip(self.offset as usize);
        match self.limit {
            Some(limit) => skipped.take(limit as usize).collect(),
            None => skipped.collect(),
        }
    }
}

/// Column-level description of a select, independent of any query language.
///
/// Backends that do not speak SQL execute this instead of the query text.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectPlan {
    /// Table to read.
    pub table: String,
    /// Columns to return, in order.
    pub columns: Vec<String>,
    /// Row filter over column names.
    pub predicate: Option<Predicate>,
    /// Explicit ordering over column names.
    pub order_by: Vec<OrderSpec>,
    /// Pagination.
    pub pagination: Option<Pagination>,
}

impl SelectPlan {
    /// Create a plan that reads the given columns of a table.
    pub fn new(table: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            table: table.into(),
            columns,
            predicate: None,
            order_by: vec![],
            pagination: None,
        }
    }

    /// Set the row filter.
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
}

/// Backend-ready query: text plus ordered positional parameters.
///
/// Produced once per execution and consumed by the query logger and the
/// storage backend.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompiledQuery {
    /// Query text with `?` placeholders.
    pub text: String,
    /// Parameters bound to the placeholders, in order.
    pub params: Vec<Value>,
    /// The same query as a column-level plan.
    pub plan: SelectPlan,
}

impl CompiledQuery {
    /// Parameters rendered as strings, in placeholder order.
    pub fn param_strings(&self) -> Vec<String> {
        self.params.iter().map(|v| v.to_string()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::predicate::Comparison;

    #[test]
    fn test_pagination_apply() {
        let items: Vec<u32> = (0..10).collect();
        assert_eq!(Pagination::new(3, 2).apply(items.clone()), vec![2, 3, 4]);
        assert_eq!(Pagination::limit(2).apply(items.clone()), vec![0, 1]);
        assert_eq!(Pagination::offset(8).apply(items.clone()), vec![8, 9]);
        assert!(Pagination::new(5, 20).apply(items).is_empty());
    }

    #[test]
    fn test_select_plan_builder() {
        let plan = SelectPlan::new("user", vec!["id".into(), "age".into()])
            .with_predicate(Comparison::gt("age", 18).into())
            .with_order(OrderSpec::desc("age"))
            .with_pagination(Pagination::limit(10));

        assert_eq!(plan.table, "user");
        assert_eq!(plan.columns.len(), 2);
        assert!(plan.predicate.is_some());
        assert_eq!(plan.order_by[0].direction, OrderDirection::Desc);
        assert_eq!(plan.pagination.unwrap().limit, Some(10));
    }

    #[test]
    fn test_param_strings() {
        let query = CompiledQuery {
            text: "SELECT \"id\" FROM \"user\" WHERE (\"hacker\" = ? OR \"age\" = ?)".into(),
            params: vec![Value::Bool(true), Value::Int32(4)],
            plan: SelectPlan::new("user", vec!["id".into()]),
        };
        assert_eq!(query.param_strings(), vec!["true", "4"]);
    }
}
