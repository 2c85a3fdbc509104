//! In-process filter evaluation for backends that do not speak SQL.
//!
//! Evaluation follows SQL three-valued logic: a comparison against a NULL
//! column is unknown (`None`), and only rows whose predicate is `Some(true)`
//! are selected.

use std::cmp::Ordering;

use ormkit_proto::{Comparison, OrderDirection, OrderSpec, Predicate, Row, Value};

/// Evaluates column-level predicates against rows.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a predicate against a row.
    ///
    /// Returns `None` when the result is unknown.
    pub fn evaluate(predicate: &Predicate, row: &Row) -> Option<bool> {
        match predicate {
            Predicate::Comparison(c) => Self::evaluate_comparison(c, row),
            Predicate::And(left, right) => {
                match (Self::evaluate(left, row), Self::evaluate(right, row)) {
                    (Some(false), _) | (_, Some(false)) => Some(false),
                    (Some(true), Some(true)) => Some(true),
                    _ => None,
                }
            }
            Predicate::Or(left, right) => {
                match (Self::evaluate(left, row), Self::evaluate(right, row)) {
                    (Some(true), _) | (_, Some(true)) => Some(true),
                    (Some(false), Some(false)) => Some(false),
                    _ => None,
                }
            }
            Predicate::Not(inner) => Self::evaluate(inner, row).map(|b| !b),
        }
    }

    /// Whether a row is selected by the predicate.
    pub fn matches(predicate: &Predicate, row: &Row) -> bool {
        Self::evaluate(predicate, row) == Some(true)
    }

    fn evaluate_comparison(comparison: &Comparison, row: &Row) -> Option<bool> {
        // Missing columns read as NULL
        let field_value = row.get(comparison.field()).unwrap_or(&Value::Null);

        match comparison {
            Comparison::IsNull { .. } => return Some(field_value.is_null()),
            Comparison::IsNotNull { .. } => return Some(!field_value.is_null()),
            _ if field_value.is_null() => return None,
            _ => {}
        }

        match comparison {
            Comparison::Eq { value, .. } => Self::compare_with(field_value, value, Ordering::is_eq),
            Comparison::Ne { value, .. } => Self::compare_with(field_value, value, Ordering::is_ne),
            Comparison::Lt { value, .. } => Self::compare_with(field_value, value, Ordering::is_lt),
            Comparison::Le { value, .. } => Self::compare_with(field_value, value, Ordering::is_le),
            Comparison::Gt { value, .. } => Self::compare_with(field_value, value, Ordering::is_gt),
            Comparison::Ge { value, .. } => Self::compare_with(field_value, value, Ordering::is_ge),
            Comparison::In { values, .. } => {
                if values.iter().any(|v| Self::compare_values(field_value, v) == Some(Ordering::Equal)) {
                    Some(true)
                } else if values.iter().any(Value::is_null) {
                    None
                } else {
                    Some(false)
                }
            }
            Comparison::Like { pattern, .. } => match field_value {
                Value::String(s) => Some(Self::like_match(s, pattern)),
                _ => Some(false),
            },
            Comparison::IsNull { .. } | Comparison::IsNotNull { .. } => None,
        }
    }

    fn compare_with(field_value: &Value, value: &Value, test: fn(Ordering) -> bool) -> Option<bool> {
        if value.is_null() {
            return None;
        }
        // Incomparable types never match
        Some(Self::compare_values(field_value, value).is_some_and(test))
    }

    /// Compare two non-null values, returning their ordering if comparable.
    pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
        match (a, b) {
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int32(b)) => Some(a.cmp(b)),
            (Value::Int64(a), Value::Int64(b)) => Some(a.cmp(b)),
            (Value::Int32(a), Value::Int64(b)) => Some((*a as i64).cmp(b)),
            (Value::Int64(a), Value::Int32(b)) => Some(a.cmp(&(*b as i64))),
            (Value::Float64(a), Value::Float64(b)) => a.partial_cmp(b),
            (Value::Float64(a), Value::Int32(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Float64(a), Value::Int64(b)) => a.partial_cmp(&(*b as f64)),
            (Value::Int32(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::Int64(a), Value::Float64(b)) => (*a as f64).partial_cmp(b),
            (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
            (Value::Timestamp(a), Value::Timestamp(b)) => Some(a.cmp(b)),
            (Value::Bytes(a), Value::Bytes(b)) => Some(a.cmp(b)),
            (Value::Uuid(a), Value::Uuid(b)) => Some(a.cmp(b)),
            _ => None, // Incompatible types
        }
    }

    /// Total order used for sorting: NULL first, then by value.
    pub fn sort_order(a: &Value, b: &Value) -> Ordering {
        match (a.is_null(), b.is_null()) {
            (true, true) => Ordering::Equal,
            (true, false) => Ordering::Less,
            (false, true) => Ordering::Greater,
            (false, false) => Self::compare_values(a, b).unwrap_or(Ordering::Equal),
        }
    }

    /// Stable sort of rows by the given column orderings.
    ///
    /// Rows equal under every ordering keep their relative order.
    pub fn sort_rows(rows: &mut [Row], order_by: &[OrderSpec]) {
        if order_by.is_empty() {
            return;
        }
        rows.sort_by(|a, b| {
            for order in order_by {
                let left = a.get(&order.field).unwrap_or(&Value::Null);
                let right = b.get(&order.field).unwrap_or(&Value::Null);
                let ord = Self::sort_order(left, right);
                let ord = match order.direction {
                    OrderDirection::Asc => ord,
                    OrderDirection::Desc => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    /// Match a string against a SQL `LIKE` pattern, case sensitive.
    ///
    /// `%` is any run of characters, `_` exactly one, and `\` escapes the
    /// next pattern character. A pattern ending in a lone escape matches
    /// nothing.
    pub fn like_match(value: &str, pattern: &str) -> bool {
        let Some(pattern) = like_tokens(pattern) else {
            return false;
        };
        let text: Vec<char> = value.chars().collect();

        // Greedy scan, backtracking only to the most recent `%`.
        let (mut t, mut p) = (0, 0);
        let mut resume: Option<(usize, usize)> = None;
        while t < text.len() {
            match pattern.get(p) {
                Some(LikeToken::Any) => {
                    resume = Some((p + 1, t));
                    p += 1;
                    continue;
                }
                Some(LikeToken::One) => {
                    p += 1;
                    t += 1;
                    continue;
                }
                Some(LikeToken::Char(c)) if *c == text[t] => {
                    p += 1;
                    t += 1;
                    continue;
                }
                _ => {}
            }
            match resume {
                Some((after, start)) => {
                    p = after;
                    t = start + 1;
                    resume = Some((after, start + 1));
                }
                None => return false,
            }
        }
        pattern[p..].iter().all(|token| *token == LikeToken::Any)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LikeToken {
    Any,
    One,
    Char(char),
}

fn like_tokens(pattern: &str) -> Option<Vec<LikeToken>> {
    let mut tokens = Vec::with_capacity(pattern.len());
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => LikeToken::Any,
            '_' => LikeToken::One,
            '\\' => LikeToken::Char(chars.next()?),
            c => LikeToken::Char(c),
        });
    }
    Some(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(age: Value, hacker: bool, name: &str) -> Row {
        Row::default()
            .with("age", age)
            .with("hacker", hacker)
            .with("name", name)
    }

    #[test]
    fn test_eq_or() {
        let predicate = Predicate::from(Comparison::eq("hacker", true)).or(Comparison::eq("age", 4));

        assert!(FilterEvaluator::matches(&predicate, &user(Value::Int32(21), true, "a")));
        assert!(FilterEvaluator::matches(&predicate, &user(Value::Int32(4), false, "b")));
        assert!(!FilterEvaluator::matches(&predicate, &user(Value::Int32(10), false, "c")));
    }

    #[test]
    fn test_cross_width_integers() {
        let row = user(Value::Int64(30), true, "a");
        assert!(FilterEvaluator::matches(&Comparison::eq("age", 30).into(), &row));
        assert!(FilterEvaluator::matches(&Comparison::ge("age", 30).into(), &row));
        assert!(!FilterEvaluator::matches(&Comparison::lt("age", 30).into(), &row));
        assert!(FilterEvaluator::matches(
            &Comparison::in_values("age", vec![Value::Int32(1), Value::Int32(30)]).into(),
            &row
        ));
    }

    #[test]
    fn test_three_valued_logic() {
        let row = user(Value::Null, false, "a");
        let age_eq = Predicate::from(Comparison::eq("age", 4));

        assert_eq!(FilterEvaluator::evaluate(&age_eq, &row), None);
        assert_eq!(FilterEvaluator::evaluate(&age_eq.clone().negate(), &row), None);
        assert!(!FilterEvaluator::matches(&age_eq.clone().negate(), &row));

        // unknown OR true is true, unknown AND false is false
        let or = age_eq.clone().or(Comparison::eq("name", "a"));
        assert_eq!(FilterEvaluator::evaluate(&or, &row), Some(true));
        let and = age_eq.clone().and(Comparison::eq("hacker", true));
        assert_eq!(FilterEvaluator::evaluate(&and, &row), Some(false));

        assert!(FilterEvaluator::matches(&Comparison::is_null("age").into(), &row));
        assert!(FilterEvaluator::matches(&Comparison::is_null("missing").into(), &row));
        assert!(!FilterEvaluator::matches(&Comparison::is_not_null("age").into(), &row));
    }

    #[test]
    fn test_like_patterns() {
        assert!(FilterEvaluator::like_match("florent", "flo%"));
        assert!(FilterEvaluator::like_match("florent", "%ent"));
        assert!(FilterEvaluator::like_match("florent", "%ore%"));
        assert!(FilterEvaluator::like_match("florent", "f_orent"));
        assert!(!FilterEvaluator::like_match("florent", "F%"));
        assert!(FilterEvaluator::like_match("100%", "100\\%"));
        assert!(!FilterEvaluator::like_match("1000", "100\\%"));
        assert!(FilterEvaluator::like_match("", "%"));
        assert!(!FilterEvaluator::like_match("", "_"));
        assert!(FilterEvaluator::like_match("a_b", "a\\_b"));
        assert!(!FilterEvaluator::like_match("axb", "a\\_b"));
        assert!(!FilterEvaluator::like_match("abc", "abc\\"));
    }

    #[test]
    fn test_like_with_many_wildcards() {
        let value = "a".repeat(200);
        let pattern = format!("{}b", "%a".repeat(30));
        assert!(!FilterEvaluator::like_match(&value, &pattern));
        assert!(FilterEvaluator::like_match(&value, &"%a".repeat(30)));
        assert!(FilterEvaluator::like_match("abcabd", "%ab_"));
        assert!(FilterEvaluator::like_match("xyz", "%%%"));
    }

    #[test]
    fn test_sort_rows_is_stable_with_nulls_first() {
        let mut rows = vec![
            user(Value::Int32(30), true, "a"),
            user(Value::Null, true, "b"),
            user(Value::Int32(10), false, "c"),
            user(Value::Int32(30), false, "d"),
        ];
        FilterEvaluator::sort_rows(&mut rows, &[OrderSpec::asc("age")]);
        let names: Vec<&str> = rows.iter().map(|r| r.get("name").unwrap().as_str().unwrap()).collect();
        assert_eq!(names, vec!["b", "c", "a", "d"]);

        FilterEvaluator::sort_rows(&mut rows, &[OrderSpec::desc("age"), OrderSpec::asc("name")]);
        let names: Vec<&str> = rows.iter().map(|r| r.get("name").unwrap().as_str().unwrap()).collect();
        assert_eq!(names, vec!["a", "d", "c", "b"]);
    }
}
