//! Query compilation: resolve field names to columns and render SQL.
//!
//! Every binary node is parenthesised so the text shows the tree's grouping
//! exactly; identifiers are double-quoted and values are bound as `?`
//! parameters in left-to-right order.

use ormkit_proto::{
    Comparison, CompiledQuery, OrderSpec, Predicate, Row, SelectPlan, Value,
};

use super::select::SelectQuery;
use crate::catalog::{Schema, ScalarType, TableSchema, LINK_OWNER_COLUMN, LINK_POSITION_COLUMN};
use crate::codec::coerce;
use crate::error::Error;

/// Backend-specific rendering options.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SqlDialect {
    /// Implicit column reflecting insertion order (`rowid` in SQLite).
    ///
    /// When set, it is appended to every `ORDER BY` so results keep
    /// insertion order among equal sort keys.
    pub insertion_order_column: Option<String>,
}

impl SqlDialect {
    /// Dialect with an insertion-order column.
    pub fn with_insertion_order(column: impl Into<String>) -> Self {
        Self {
            insertion_order_column: Some(column.into()),
        }
    }
}

/// Quote an identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Compile a field-level select against a schema.
pub fn compile_select(
    schema: &Schema,
    query: &SelectQuery,
    dialect: &SqlDialect,
) -> Result<CompiledQuery, Error> {
    if query.entity != schema.entity {
        return Err(Error::InvalidQuery(format!(
            "query on '{}' compiled against schema of '{}'",
            query.entity, schema.entity
        )));
    }
    for (relation, _) in &query.fetch {
        schema.require_relation(relation)?;
    }

    let mut plan = SelectPlan::new(schema.table.name.clone(), schema.column_names());
    if let Some(predicate) = &query.predicate {
        plan.predicate = Some(predicate.try_map(&mut |c: &Comparison| resolve_comparison(schema, c))?);
    }
    for order in &query.order_by {
        let field = schema.require_field(&order.field)?;
        plan.order_by.push(OrderSpec {
            field: field.column.clone(),
            direction: order.direction,
        });
    }
    plan.pagination = query.pagination;

    Ok(render_select(plan, dialect))
}

/// Compile a select of the rows whose primary key is in `keys`.
pub fn compile_key_select(
    schema: &Schema,
    keys: Vec<Value>,
    dialect: &SqlDialect,
) -> Result<CompiledQuery, Error> {
    let query = SelectQuery::new(schema.entity.clone()).with_predicate(
        Comparison::in_values(schema.primary_key.field.clone(), keys).into(),
    );
    compile_select(schema, &query, dialect)
}

/// Compile a select of the link rows of the given owners, in list order.
pub fn compile_link_select(link: &TableSchema, owners: Vec<Value>, dialect: &SqlDialect) -> CompiledQuery {
    let plan = SelectPlan::new(link.name.clone(), link.column_names())
        .with_predicate(Comparison::in_values(LINK_OWNER_COLUMN, owners).into())
        .with_order(OrderSpec::asc(LINK_POSITION_COLUMN));
    render_select(plan, dialect)
}

/// Render a column-level plan into SQL text and parameters.
pub fn render_select(plan: SelectPlan, dialect: &SqlDialect) -> CompiledQuery {
    let columns: Vec<String> = plan.columns.iter().map(|c| quote_ident(c)).collect();
    let mut text = format!(
        "SELECT {} FROM {}",
        columns.join(", "),
        quote_ident(&plan.table)
    );
    let mut params = Vec::new();

    if let Some(predicate) = &plan.predicate {
        text.push_str(" WHERE ");
        render_predicate(predicate, &mut text, &mut params);
    }

    let mut order: Vec<String> = plan
        .order_by
        .iter()
        .map(|o| format!("{} {}", quote_ident(&o.field), o.direction.keyword()))
        .collect();
    if let Some(column) = &dialect.insertion_order_column {
        order.push(column.clone());
    }
    if !order.is_empty() {
        text.push_str(" ORDER BY ");
        text.push_str(&order.join(", "));
    }

    if let Some(pagination) = plan.pagination {
        match (pagination.limit, pagination.offset) {
            (Some(limit), 0) => text.push_str(&format!(" LIMIT {limit}")),
            (Some(limit), offset) => text.push_str(&format!(" LIMIT {limit} OFFSET {offset}")),
            (None, 0) => {}
            (None, offset) => text.push_str(&format!(" LIMIT -1 OFFSET {offset}")),
        }
    }

    CompiledQuery { text, params, plan }
}

/// Multi-row insert text with all parameters flattened row by row.
///
/// Columns are taken from the first row; other rows are projected onto them.
pub fn insert_statement(table: &str, rows: &[Row]) -> (String, Vec<Value>) {
    let columns: Vec<String> = rows
        .first()
        .map(|r| r.column_names().map(str::to_string).collect())
        .unwrap_or_default();
    let placeholders = format!("({})", vec!["?"; columns.len()].join(", "));
    let quoted: Vec<String> = columns.iter().map(|c| quote_ident(c)).collect();

    let text = format!(
        "INSERT INTO {} ({}) VALUES {}",
        quote_ident(table),
        quoted.join(", "),
        vec![placeholders; rows.len()].join(", ")
    );
    let params = rows
        .iter()
        .flat_map(|r| r.project(&columns).columns.into_iter().map(|(_, v)| v))
        .collect();
    (text, params)
}

/// Delete-everything text for a table.
pub fn delete_statement(table: &str) -> String {
    format!("DELETE FROM {}", quote_ident(table))
}

/// Delete text for the rows whose `column` is one of `keys`.
pub fn delete_keys_statement(table: &str, column: &str, keys: &[Value]) -> (String, Vec<Value>) {
    let text = format!(
        "DELETE FROM {} WHERE {} IN ({})",
        quote_ident(table),
        quote_ident(column),
        vec!["?"; keys.len()].join(", ")
    );
    (text, keys.to_vec())
}

fn render_predicate(predicate: &Predicate, text: &mut String, params: &mut Vec<Value>) {
    match predicate {
        Predicate::Comparison(c) => render_comparison(c, text, params),
        Predicate::And(left, right) | Predicate::Or(left, right) => {
            let keyword = if matches!(predicate, Predicate::And(..)) {
                " AND "
            } else {
                " OR "
            };
            text.push('(');
            render_predicate(left, text, params);
            text.push_str(keyword);
            render_predicate(right, text, params);
            text.push(')');
        }
        Predicate::Not(inner) => {
            text.push_str("(NOT ");
            render_predicate(inner, text, params);
            text.push(')');
        }
    }
}

fn render_comparison(comparison: &Comparison, text: &mut String, params: &mut Vec<Value>) {
    let column = quote_ident(comparison.field());
    match comparison {
        Comparison::Eq { value, .. }
        | Comparison::Ne { value, .. }
        | Comparison::Lt { value, .. }
        | Comparison::Le { value, .. }
        | Comparison::Gt { value, .. }
        | Comparison::Ge { value, .. } => {
            text.push_str(&format!("{} {} ?", column, comparison.operator()));
            params.push(value.clone());
        }
        // An empty set matches nothing.
        Comparison::In { values, .. } if values.is_empty() => text.push_str("1 = 0"),
        Comparison::In { values, .. } => {
            let placeholders = vec!["?"; values.len()].join(", ");
            text.push_str(&format!("{column} IN ({placeholders})"));
            params.extend(values.iter().cloned());
        }
        Comparison::IsNull { .. } | Comparison::IsNotNull { .. } => {
            text.push_str(&format!("{} {}", column, comparison.operator()));
        }
        Comparison::Like { pattern, .. } => {
            text.push_str(&format!("{column} LIKE ? ESCAPE '\\'"));
            params.push(Value::String(pattern.clone()));
        }
    }
}

/// Map a field-level comparison onto its column, checking value types.
fn resolve_comparison(schema: &Schema, comparison: &Comparison) -> Result<Comparison, Error> {
    let field = schema.require_field(comparison.field())?;
    let ty = field.field_type.scalar_type();
    let check = |value: &Value| -> Result<Value, Error> {
        if value.is_null() {
            return Err(Error::InvalidQuery(format!(
                "field '{}' compared with NULL; use is_null() or is_not_null()",
                field.field
            )));
        }
        coerce(value.clone(), ty).map_err(|found| {
            Error::InvalidQuery(format!(
                "value '{}' of type {} cannot be compared with field '{}' of type {}",
                found,
                found.type_name(),
                field.field,
                ty.name()
            ))
        })
    };
    let column = field.column.clone();

    Ok(match comparison {
        Comparison::Eq { value, .. } => Comparison::Eq { field: column, value: check(value)? },
        Comparison::Ne { value, .. } => Comparison::Ne { field: column, value: check(value)? },
        Comparison::Lt { value, .. } => Comparison::Lt { field: column, value: check(value)? },
        Comparison::Le { value, .. } => Comparison::Le { field: column, value: check(value)? },
        Comparison::Gt { value, .. } => Comparison::Gt { field: column, value: check(value)? },
        Comparison::Ge { value, .. } => Comparison::Ge { field: column, value: check(value)? },
        Comparison::In { values, .. } => Comparison::In {
            field: column,
            values: values.iter().map(check).collect::<Result<_, _>>()?,
        },
        Comparison::IsNull { .. } => Comparison::IsNull { field: column },
        Comparison::IsNotNull { .. } => Comparison::IsNotNull { field: column },
        Comparison::Like { pattern, .. } => {
            if ty != ScalarType::String {
                return Err(Error::InvalidQuery(format!(
                    "LIKE requires a string field, '{}' is {}",
                    field.field,
                    ty.name()
                )));
            }
            Comparison::Like {
                field: column,
                pattern: pattern.clone(),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{EntityDef, FieldDef, FieldType, RelationDef, SchemaRegistry};
    use ormkit_proto::Pagination;
    use std::sync::Arc;

    fn dog() -> EntityDef {
        EntityDef::new("Dog", "id")
            .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
    }

    fn user_schema() -> Arc<Schema> {
        let registry = SchemaRegistry::new();
        registry
            .register_def(
                EntityDef::new("User", "id")
                    .with_field(FieldDef::new("id", FieldType::scalar(ScalarType::Uuid)))
                    .with_field(FieldDef::new("age", FieldType::scalar(ScalarType::Int32)))
                    .with_field(FieldDef::new("name", FieldType::scalar(ScalarType::String)))
                    .with_field(
                        FieldDef::new("hacker", FieldType::scalar(ScalarType::Bool))
                            .with_column("is_hacker"),
                    )
                    .with_relation(RelationDef::one_to_many("dogs", dog)),
            )
            .unwrap()
    }

    fn sqlite() -> SqlDialect {
        SqlDialect::with_insertion_order("rowid")
    }

    #[test]
    fn test_compile_demo_query() {
        let schema = user_schema();
        let predicate = Predicate::from(Comparison::eq("hacker", true)).or(Comparison::eq("age", 4));
        let query = SelectQuery::new("User").with_predicate(predicate);

        let compiled = compile_select(&schema, &query, &sqlite()).unwrap();
        assert_eq!(
            compiled.text,
            "SELECT \"id\", \"age\", \"name\", \"is_hacker\" FROM \"user\" \
             WHERE (\"is_hacker\" = ? OR \"age\" = ?) ORDER BY rowid"
        );
        assert_eq!(compiled.params, vec![Value::Bool(true), Value::Int32(4)]);
        assert_eq!(compiled.param_strings(), vec!["true", "4"]);
        assert_eq!(compiled.plan.table, "user");
    }

    #[test]
    fn test_grouping_follows_tree() {
        let schema = user_schema();
        let predicate = Predicate::from(Comparison::eq("age", 1))
            .and(Comparison::eq("name", "a"))
            .or(Comparison::eq("hacker", false))
            .and(Predicate::from(Comparison::gt("age", 3)).negate());
        let query = SelectQuery::new("User").with_predicate(predicate);

        let compiled = compile_select(&schema, &query, &SqlDialect::default()).unwrap();
        assert!(compiled.text.ends_with(
            "WHERE (((\"age\" = ? AND \"name\" = ?) OR \"is_hacker\" = ?) AND (NOT \"age\" > ?))"
        ));
        assert_eq!(compiled.params.len(), 4);
    }

    #[test]
    fn test_order_limit_offset() {
        let schema = user_schema();
        let query = SelectQuery::new("User")
            .with_order(OrderSpec::desc("age"))
            .with_pagination(Pagination::new(10, 5));
        let compiled = compile_select(&schema, &query, &sqlite()).unwrap();
        assert!(compiled
            .text
            .ends_with("ORDER BY \"age\" DESC, rowid LIMIT 10 OFFSET 5"));

        let query = SelectQuery::new("User").with_pagination(Pagination::offset(3));
        let compiled = compile_select(&schema, &query, &SqlDialect::default()).unwrap();
        assert!(compiled.text.ends_with("FROM \"user\" LIMIT -1 OFFSET 3"));
    }

    #[test]
    fn test_in_like_and_null_checks() {
        let schema = user_schema();
        let predicate = Predicate::from(Comparison::in_values("age", vec![Value::Int32(1), Value::Int64(2)]))
            .and(Comparison::in_values("age", vec![]))
            .and(Comparison::like("name", "fl%"))
            .and(Comparison::is_not_null("name"));
        let query = SelectQuery::new("User").with_predicate(predicate);

        let compiled = compile_select(&schema, &query, &SqlDialect::default()).unwrap();
        assert!(compiled.text.contains("\"age\" IN (?, ?)"));
        assert!(compiled.text.contains("1 = 0"));
        assert!(compiled.text.contains("\"name\" LIKE ? ESCAPE '\\'"));
        assert!(compiled.text.contains("\"name\" IS NOT NULL"));
        assert_eq!(
            compiled.params,
            vec![Value::Int32(1), Value::Int32(2), Value::String("fl%".into())]
        );
    }

    #[test]
    fn test_invalid_queries() {
        let schema = user_schema();
        let compile = |p: Predicate| {
            compile_select(
                &schema,
                &SelectQuery::new("User").with_predicate(p),
                &SqlDialect::default(),
            )
        };

        assert!(matches!(
            compile(Comparison::eq("shoe", 1).into()),
            Err(Error::UnknownField { .. })
        ));
        assert!(matches!(
            compile(Comparison::eq("age", "four").into()),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            compile(Comparison::eq("age", Value::Null).into()),
            Err(Error::InvalidQuery(_))
        ));
        assert!(matches!(
            compile(Comparison::like("age", "1%").into()),
            Err(Error::InvalidQuery(_))
        ));

        let bad_fetch = SelectQuery::new("User").with_fetch("cats", crate::catalog::FetchStrategy::Skip);
        assert!(matches!(
            compile_select(&schema, &bad_fetch, &SqlDialect::default()),
            Err(Error::UnknownRelation { .. })
        ));
    }

    #[test]
    fn test_link_and_key_selects() {
        let schema = user_schema();
        let link = match &schema.relation("dogs").unwrap().kind {
            crate::catalog::RelationKind::OneToMany { link } => link.clone(),
            other => panic!("Expected link table, got {other:?}"),
        };

        let compiled = compile_link_select(&link, vec![Value::Uuid([1; 16])], &sqlite());
        assert_eq!(
            compiled.text,
            "SELECT \"owner_id\", \"position\", \"target_id\" FROM \"user_dogs\" \
             WHERE \"owner_id\" IN (?) ORDER BY \"position\" ASC, rowid"
        );

        let compiled = compile_key_select(&schema, vec![Value::Bytes(vec![2; 16])], &sqlite()).unwrap();
        assert!(compiled.text.contains("WHERE \"id\" IN (?)"));
        assert_eq!(compiled.params, vec![Value::Uuid([2; 16])]);
    }

    #[test]
    fn test_insert_and_delete_statements() {
        let rows = vec![
            Row::default().with("id", 1).with("name", "a"),
            Row::default().with("name", "b").with("id", 2),
        ];
        let (text, params) = insert_statement("dog", &rows);
        assert_eq!(
            text,
            "INSERT INTO \"dog\" (\"id\", \"name\") VALUES (?, ?), (?, ?)"
        );
        assert_eq!(
            params,
            vec![
                Value::Int32(1),
                Value::String("a".into()),
                Value::Int32(2),
                Value::String("b".into())
            ]
        );
        assert_eq!(delete_statement("dog"), "DELETE FROM \"dog\"");
        let keys = [Value::Int64(4), Value::Int64(9)];
        let (text, params) = delete_keys_statement("user_dogs", "owner_id", &keys);
        assert_eq!(text, "DELETE FROM \"user_dogs\" WHERE \"owner_id\" IN (?, ?)");
        assert_eq!(params, vec![Value::Int64(4), Value::Int64(9)]);
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }
}
