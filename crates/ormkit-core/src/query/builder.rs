//! Fluent query builder.
//!
//! Each call consumes the builder and returns a new one holding a larger
//! predicate tree. Comparisons are appended in call order with strictly
//! left-associative grouping:
//!
//! ```text
//! field("a").eq(1).and().field("b").eq(2).or().field("c").eq(3)
//!   => ((a = 1 AND b = 2) OR c = 3)
//! ```
//!
//! After `and()` or `or()` only a field (or `not()`) can follow, so a
//! dangling connective never reaches the engine. Clone a builder to branch
//! it; the original is unaffected.

use std::marker::PhantomData;

use ormkit_proto::{Comparison, CompiledQuery, Connective, OrderSpec, Pagination, Predicate, Value};

use super::select::SelectQuery;
use crate::catalog::FetchStrategy;
use crate::codec::Entity;
use crate::engine::Database;
use crate::error::Error;

/// A select over entities of type `E`.
pub struct Select<'db, E> {
    db: &'db Database,
    query: SelectQuery,
    _entity: PhantomData<fn() -> E>,
}

impl<'db, E: Entity> Select<'db, E> {
    pub(crate) fn new(db: &'db Database, entity: impl Into<String>) -> Self {
        Self {
            db,
            query: SelectQuery::new(entity),
            _entity: PhantomData,
        }
    }

    /// Filter on a field, joined to the current filter with AND.
    pub fn field(self, name: impl Into<String>) -> FieldFilter<'db, E> {
        FieldFilter {
            select: self,
            connective: Connective::And,
            negated: false,
            field: name.into(),
        }
    }

    /// Join the next comparison with AND.
    pub fn and(self) -> Junction<'db, E> {
        Junction {
            select: self,
            connective: Connective::And,
            negated: false,
        }
    }

    /// Join the next comparison with OR. The whole filter so far becomes
    /// the left operand.
    pub fn or(self) -> Junction<'db, E> {
        Junction {
            select: self,
            connective: Connective::Or,
            negated: false,
        }
    }

    /// AND a prebuilt predicate onto the filter.
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.query.predicate = Some(Predicate::combine(
            self.query.predicate.take(),
            Connective::And,
            predicate,
        ));
        self
    }

    /// Add an ordering.
    pub fn order_by(mut self, order: OrderSpec) -> Self {
        self.query.order_by.push(order);
        self
    }

    /// Order ascending by a field.
    pub fn asc(self, field: impl Into<String>) -> Self {
        self.order_by(OrderSpec::asc(field))
    }

    /// Order descending by a field.
    pub fn desc(self, field: impl Into<String>) -> Self {
        self.order_by(OrderSpec::desc(field))
    }

    /// Return at most `limit` results.
    pub fn limit(mut self, limit: u32) -> Self {
        let offset = self.query.pagination.map_or(0, |p| p.offset);
        self.query.pagination = Some(Pagination::new(limit, offset));
        self
    }

    /// Skip the first `offset` results.
    pub fn offset(mut self, offset: u32) -> Self {
        let limit = self.query.pagination.and_then(|p| p.limit);
        self.query.pagination = Some(Pagination { limit, offset });
        self
    }

    /// Override the fetch strategy of a relation for this query.
    pub fn fetch(mut self, relation: impl Into<String>, strategy: FetchStrategy) -> Self {
        self.query = self.query.with_fetch(relation, strategy);
        self
    }

    /// The filter built so far.
    pub fn predicate(&self) -> Option<&Predicate> {
        self.query.predicate.as_ref()
    }

    /// The query built so far.
    pub fn query(&self) -> &SelectQuery {
        &self.query
    }

    /// Compile without running.
    pub fn compile(&self) -> Result<CompiledQuery, Error> {
        self.db.compile(&self.query)
    }

    /// Run the query and return every matching entity.
    pub fn as_list(&self) -> Result<Vec<E>, Error> {
        self.db.fetch_entities(&self.query)
    }

    /// Run the query and return the first matching entity.
    pub fn first(&self) -> Result<Option<E>, Error> {
        let offset = self.query.pagination.map_or(0, |p| p.offset);
        let query = self
            .query
            .clone()
            .with_pagination(Pagination::new(1, offset));
        Ok(self.db.fetch_entities(&query)?.into_iter().next())
    }
}

impl<E> Clone for Select<'_, E> {
    fn clone(&self) -> Self {
        Self {
            db: self.db,
            query: self.query.clone(),
            _entity: PhantomData,
        }
    }
}

impl<E> std::fmt::Debug for Select<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Select").field("query", &self.query).finish()
    }
}

/// A builder waiting for the comparison after `and()` or `or()`.
pub struct Junction<'db, E> {
    select: Select<'db, E>,
    connective: Connective,
    negated: bool,
}

impl<'db, E: Entity> Junction<'db, E> {
    /// The field of the next comparison.
    pub fn field(self, name: impl Into<String>) -> FieldFilter<'db, E> {
        FieldFilter {
            select: self.select,
            connective: self.connective,
            negated: self.negated,
            field: name.into(),
        }
    }

    /// Negate the next comparison.
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }
}

impl<E> Clone for Junction<'_, E> {
    fn clone(&self) -> Self {
        Self {
            select: self.select.clone(),
            connective: self.connective,
            negated: self.negated,
        }
    }
}

/// A builder waiting for the comparator of a field.
pub struct FieldFilter<'db, E> {
    select: Select<'db, E>,
    connective: Connective,
    negated: bool,
    field: String,
}

impl<'db, E: Entity> FieldFilter<'db, E> {
    /// Negate this comparison.
    pub fn not(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// `field = value`.
    pub fn eq(self, value: impl Into<Value>) -> Select<'db, E> {
        let c = Comparison::eq(self.field.clone(), value);
        self.apply(c)
    }

    /// `field <> value`.
    pub fn ne(self, value: impl Into<Value>) -> Select<'db, E> {
        let c = Comparison::ne(self.field.clone(), value);
        self.apply(c)
    }

    /// `field < value`.
    pub fn lt(self, value: impl Into<Value>) -> Select<'db, E> {
        let c = Comparison::lt(self.field.clone(), value);
        self.apply(c)
    }

    /// `field <= value`.
    pub fn le(self, value: impl Into<Value>) -> Select<'db, E> {
        let c = Comparison::le(self.field.clone(), value);
        self.apply(c)
    }

    /// `field > value`.
    pub fn gt(self, value: impl Into<Value>) -> Select<'db, E> {
        let c = Comparison::gt(self.field.clone(), value);
        self.apply(c)
    }

    /// `field >= value`.
    pub fn ge(self, value: impl Into<Value>) -> Select<'db, E> {
        let c = Comparison::ge(self.field.clone(), value);
        self.apply(c)
    }

    /// `field = true`.
    pub fn is_true(self) -> Select<'db, E> {
        self.eq(true)
    }

    /// `field = false`.
    pub fn is_false(self) -> Select<'db, E> {
        self.eq(false)
    }

    /// `field IS NULL`.
    pub fn is_null(self) -> Select<'db, E> {
        let c = Comparison::is_null(self.field.clone());
        self.apply(c)
    }

    /// `field IS NOT NULL`.
    pub fn is_not_null(self) -> Select<'db, E> {
        let c = Comparison::is_not_null(self.field.clone());
        self.apply(c)
    }

    /// SQL `LIKE` with `%` and `_` wildcards, case sensitive.
    pub fn like(self, pattern: impl Into<String>) -> Select<'db, E> {
        let c = Comparison::like(self.field.clone(), pattern);
        self.apply(c)
    }

    /// Membership in a list. An empty list matches nothing.
    pub fn in_values<V: Into<Value>>(self, values: impl IntoIterator<Item = V>) -> Select<'db, E> {
        let values = values.into_iter().map(Into::into).collect();
        let c = Comparison::in_values(self.field.clone(), values);
        self.apply(c)
    }

    fn apply(self, comparison: Comparison) -> Select<'db, E> {
        let mut node = Predicate::from(comparison);
        if self.negated {
            node = node.negate();
        }
        let mut select = self.select;
        select.query.predicate = Some(Predicate::combine(
            select.query.predicate.take(),
            self.connective,
            node,
        ));
        select
    }
}

impl<E> Clone for FieldFilter<'_, E> {
    fn clone(&self) -> Self {
        Self {
            select: self.select.clone(),
            connective: self.connective,
            negated: self.negated,
            field: self.field.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, FieldType, ScalarType};
    use crate::codec::Record;
    use crate::storage::SqliteBackend;

    struct Person;

    impl Entity for Person {
        fn entity_def() -> EntityDef {
            EntityDef::new("Person", "id")
                .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Int64)))
                .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
                .with_field(FieldDef::new("hacker", FieldType::scalar(ScalarType::Bool)))
        }

        fn to_record(&self) -> Record {
            Record::new("Person")
        }

        fn from_record(_record: Record) -> Result<Self, Error> {
            Ok(Person)
        }
    }

    fn database() -> Database {
        let db = Database::new(SqliteBackend::open_in_memory().unwrap());
        db.register::<Person>().unwrap();
        db
    }

    fn select(db: &Database) -> Select<'_, Person> {
        Select::new(db, "Person")
    }

    #[test]
    fn test_left_associative_grouping() {
        let db = database();
        let query = select(&db)
            .field("hacker")
            .is_true()
            .and()
            .field("age")
            .gt(18)
            .or()
            .field("age")
            .eq(4);

        let expected = Predicate::from(Comparison::eq("hacker", true))
            .and(Comparison::gt("age", 18))
            .or(Comparison::eq("age", 4));
        assert_eq!(query.predicate(), Some(&expected));
    }

    #[test]
    fn test_implicit_and_and_not() {
        let db = database();
        let query = select(&db)
            .field("age")
            .ge(1)
            .field("age")
            .not()
            .eq(3)
            .or()
            .not()
            .field("hacker")
            .is_false();

        let expected = Predicate::from(Comparison::ge("age", 1))
            .and(Predicate::from(Comparison::eq("age", 3)).negate())
            .or(Predicate::from(Comparison::eq("hacker", false)).negate());
        assert_eq!(query.predicate(), Some(&expected));
    }

    #[test]
    fn test_branching_leaves_original_untouched() {
        let db = database();
        let base = select(&db).field("age").eq(1);
        let branched = base.clone().or().field("age").eq(2);

        assert_eq!(
            base.predicate(),
            Some(&Predicate::from(Comparison::eq("age", 1)))
        );
        assert_ne!(base.predicate(), branched.predicate());
    }

    #[test]
    fn test_pagination_keeps_other_half() {
        let db = database();
        let query = select(&db).offset(5).limit(10).desc("age");
        assert_eq!(query.query().pagination, Some(Pagination::new(10, 5)));
        let query = query.offset(2);
        assert_eq!(query.query().pagination, Some(Pagination::new(10, 2)));
        assert_eq!(query.query().order_by, vec![OrderSpec::desc("age")]);
    }

    #[test]
    fn test_compile_demo_query() {
        let db = database();
        let compiled = select(&db)
            .field("hacker")
            .is_true()
            .or()
            .field("age")
            .eq(4)
            .compile()
            .unwrap();

        assert_eq!(
            compiled.text,
            "SELECT \"id\", \"age\", \"hacker\" FROM \"person\" WHERE (\"hacker\" = ? OR \"age\" = ?) ORDER BY rowid"
        );
        assert_eq!(compiled.params, vec![Value::Bool(true), Value::Int32(4)]);
    }

    #[test]
    fn test_unknown_field_fails_at_compile() {
        let db = database();
        let result = select(&db).field("shoe_size").eq(42).compile();
        assert!(matches!(result, Err(Error::UnknownField { .. })));
        let result = select(&db).field("shoe_size").eq(42).as_list();
        assert!(matches!(result, Err(Error::UnknownField { .. })));
    }
}
