//! Predicate trees for filtering rows.
//!
//! A [`Predicate`] is an immutable tree of comparisons joined by boolean
//! combinators. Trees are built left to right: combining an existing tree
//! with a new comparison always makes the existing tree the left operand,
//! so grouping follows call order exactly.

use std::fmt;
use std::ops::Not;

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// A single field comparison (a leaf of a predicate tree).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Comparison {
    /// Field equals value.
    Eq { field: String, value: Value },
    /// Field not equals value.
    Ne { field: String, value: Value },
    /// Field less than value.
    Lt { field: String, value: Value },
    /// Field less than or equal to value.
    Le { field: String, value: Value },
    /// Field greater than value.
    Gt { field: String, value: Value },
    /// Field greater than or equal to value.
    Ge { field: String, value: Value },
    /// Field is in a set of values.
    In { field: String, values: Vec<Value> },
    /// Field is null.
    IsNull { field: String },
    /// Field is not null.
    IsNotNull { field: String },
    /// Field matches a LIKE pattern (`%`, `_`, `\` escapes).
    Like { field: String, pattern: String },
}

impl Comparison {
    /// Create an equality comparison.
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Comparison::Eq {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a not-equal comparison.
    pub fn ne(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Comparison::Ne {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than comparison.
    pub fn lt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Comparison::Lt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a less-than-or-equal comparison.
    pub fn le(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Comparison::Le {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than comparison.
    pub fn gt(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Comparison::Gt {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create a greater-than-or-equal comparison.
    pub fn ge(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Comparison::Ge {
            field: field.into(),
            value: value.into(),
        }
    }

    /// Create an IN comparison.
    pub fn in_values(field: impl Into<String>, values: Vec<Value>) -> Self {
        Comparison::In {
            field: field.into(),
            values,
        }
    }

    /// Create an IS NULL comparison.
    pub fn is_null(field: impl Into<String>) -> Self {
        Comparison::IsNull {
            field: field.into(),
        }
    }

    /// Create an IS NOT NULL comparison.
    pub fn is_not_null(field: impl Into<String>) -> Self {
        Comparison::IsNotNull {
            field: field.into(),
        }
    }

    /// Create a LIKE comparison.
    pub fn like(field: impl Into<String>, pattern: impl Into<String>) -> Self {
        Comparison::Like {
            field: field.into(),
            pattern: pattern.into(),
        }
    }

    /// The field this comparison reads.
    pub fn field(&self) -> &str {
        match self {
            Comparison::Eq { field, .. }
            | Comparison::Ne { field, .. }
            | Comparison::Lt { field, .. }
            | Comparison::Le { field, .. }
            | Comparison::Gt { field, .. }
            | Comparison::Ge { field, .. }
            | Comparison::In { field, .. }
            | Comparison::IsNull { field }
            | Comparison::IsNotNull { field }
            | Comparison::Like { field, .. } => field,
        }
    }

    /// Return the same comparison reading a different field.
    pub fn with_field(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        match &mut self {
            Comparison::Eq { field, .. }
            | Comparison::Ne { field, .. }
            | Comparison::Lt { field, .. }
            | Comparison::Le { field, .. }
            | Comparison::Gt { field, .. }
            | Comparison::Ge { field, .. }
            | Comparison::In { field, .. }
            | Comparison::IsNull { field }
            | Comparison::IsNotNull { field }
            | Comparison::Like { field, .. } => *field = name,
        }
        self
    }

    /// SQL operator token for this comparison.
    pub fn operator(&self) -> &'static str {
        match self {
            Comparison::Eq { .. } => "=",
            Comparison::Ne { .. } => "<>",
            Comparison::Lt { .. } => "<",
            Comparison::Le { .. } => "<=",
            Comparison::Gt { .. } => ">",
            Comparison::Ge { .. } => ">=",
            Comparison::In { .. } => "IN",
            Comparison::IsNull { .. } => "IS NULL",
            Comparison::IsNotNull { .. } => "IS NOT NULL",
            Comparison::Like { .. } => "LIKE",
        }
    }
}

/// Boolean connective used when appending a comparison to a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Connective {
    /// Both sides must hold.
    #[default]
    And,
    /// Either side must hold.
    Or,
}

/// A node of an immutable filter-expression tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// Leaf comparison.
    Comparison(Comparison),
    /// Left and right must hold.
    And(Box<Predicate>, Box<Predicate>),
    /// Left or right must hold.
    Or(Box<Predicate>, Box<Predicate>),
    /// Negation.
    Not(Box<Predicate>),
}

impl Predicate {
    /// Join with another tree, keeping `self` as the left operand.
    pub fn and(self, right: impl Into<Predicate>) -> Self {
        Predicate::And(Box::new(self), Box::new(right.into()))
    }

    /// Join with another tree, keeping `self` as the left operand.
    pub fn or(self, right: impl Into<Predicate>) -> Self {
        Predicate::Or(Box::new(self), Box::new(right.into()))
    }

    /// Negate this tree.
    pub fn negate(self) -> Self {
        Predicate::Not(Box::new(self))
    }

    /// Append `right` to an optional existing tree with the given connective.
    ///
    /// With no existing tree, `right` becomes the root.
    pub fn combine(left: Option<Predicate>, connective: Connective, right: Predicate) -> Self {
        match (left, connective) {
            (None, _) => right,
            (Some(left), Connective::And) => left.and(right),
            (Some(left), Connective::Or) => left.or(right),
        }
    }

    /// All comparisons in left-to-right order.
    pub fn comparisons(&self) -> Vec<&Comparison> {
        let mut out = Vec::new();
        self.collect_comparisons(&mut out);
        out
    }

    fn collect_comparisons<'a>(&'a self, out: &mut Vec<&'a Comparison>) {
        match self {
            Predicate::Comparison(c) => out.push(c),
            Predicate::And(l, r) | Predicate::Or(l, r) => {
                l.collect_comparisons(out);
                r.collect_comparisons(out);
            }
            Predicate::Not(inner) => inner.collect_comparisons(out),
        }
    }

    /// Rebuild the tree with every comparison passed through `f`.
    ///
    /// The tree shape is preserved; the first error aborts the rewrite.
    pub fn try_map<E, F>(&self, f: &mut F) -> Result<Predicate, E>
    where
        F: FnMut(&Comparison) -> Result<Comparison, E>,
    {
        Ok(match self {
            Predicate::Comparison(c) => Predicate::Comparison(f(c)?),
            Predicate::And(l, r) => {
                Predicate::And(Box::new(l.try_map(f)?), Box::new(r.try_map(f)?))
            }
            Predicate::Or(l, r) => {
                Predicate::Or(Box::new(l.try_map(f)?), Box::new(r.try_map(f)?))
            }
            Predicate::Not(inner) => Predicate::Not(Box::new(inner.try_map(f)?)),
        })
    }
}

impl From<Comparison> for Predicate {
    fn from(comparison: Comparison) -> Self {
        Predicate::Comparison(comparison)
    }
}

impl Not for Predicate {
    type Output = Predicate;

    fn not(self) -> Self::Output {
        self.negate()
    }
}

impl fmt::Display for Comparison {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Comparison::Eq { field, value }
            | Comparison::Ne { field, value }
            | Comparison::Lt { field, value }
            | Comparison::Le { field, value }
            | Comparison::Gt { field, value }
            | Comparison::Ge { field, value } => {
                write!(f, "{} {} {}", field, self.operator(), value)
            }
            Comparison::In { field, values } => {
                let items: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{} IN ({})", field, items.join(", "))
            }
            Comparison::IsNull { field } | Comparison::IsNotNull { field } => {
                write!(f, "{} {}", field, self.operator())
            }
            Comparison::Like { field, pattern } => write!(f, "{} LIKE {}", field, pattern),
        }
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Predicate::Comparison(c) => write!(f, "{c}"),
            Predicate::And(l, r) => write!(f, "({l} AND {r})"),
            Predicate::Or(l, r) => write!(f, "({l} OR {r})"),
            Predicate::Not(inner) => write!(f, "(NOT {inner})"),
        }
    }
}
