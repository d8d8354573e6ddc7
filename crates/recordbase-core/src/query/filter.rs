//! Filter trees and their evaluation against record data.
//!
//! A [`Filter`] is either a group combining nested filters with `and`/`or`
//! logic or a single `{field, operator, value}` condition. The same tree
//! serves record-level access conditions and the aggregation `filter` stage.
//! Operands may reference a position attribute of the acting user; those
//! references must be bound with [`Filter::bind`] before evaluation.

use std::cmp::Ordering;
use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{Error, Result};

/// Logical combinator of a filter group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Logic {
    /// Every nested filter must match.
    #[default]
    And,
    /// At least one nested filter must match.
    Or,
}

/// Comparison operator of a leaf condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Operator {
    Eq,
    #[serde(alias = "ne")]
    Neq,
    Contains,
    DoesNotContain,
    StartsWith,
    EndsWith,
    Gt,
    Lt,
    Gte,
    Lte,
    IsNull,
    IsNotNull,
    IsEmpty,
    IsNotEmpty,
    In,
    NotIn,
}

impl Operator {
    /// Whether the operator ignores its operand.
    pub fn is_unary(&self) -> bool {
        matches!(
            self,
            Operator::IsNull | Operator::IsNotNull | Operator::IsEmpty | Operator::IsNotEmpty
        )
    }
}

/// Right-hand side of a condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Operand {
    /// Value of the acting user's position attribute with this category.
    Attribute {
        /// Position attribute category.
        attribute: String,
    },
    /// Literal JSON value.
    Literal(Value),
}

impl Default for Operand {
    fn default() -> Self {
        Operand::Literal(Value::Null)
    }
}

macro_rules! literal_operand {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for Operand {
                fn from(value: $ty) -> Self {
                    Operand::Literal(Value::from(value))
                }
            }
        )*
    };
}

literal_operand!(Value, &str, String, bool, i32, i64, u32, u64, f64);

/// Composite boolean filter over a record's `data`.
///
/// An empty object deserializes as [`Filter::match_all`]. Any other object
/// must be a complete group or condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Filter {
    /// Nested filters combined with `logic`. An empty group matches everything.
    Group {
        #[serde(default)]
        logic: Logic,
        filters: Vec<Filter>,
    },
    /// Single comparison.
    Condition {
        field: String,
        operator: Operator,
        #[serde(default)]
        value: Operand,
    },
}

/// Wire shapes accepted for a [`Filter`].
#[derive(Deserialize)]
#[serde(untagged)]
enum FilterRepr {
    Group {
        #[serde(default)]
        logic: Logic,
        filters: Vec<Filter>,
    },
    Condition {
        field: String,
        operator: Operator,
        #[serde(default)]
        value: Operand,
    },
    Empty(EmptyObject),
}

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct EmptyObject {}

impl<'de> Deserialize<'de> for Filter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        Ok(match FilterRepr::deserialize(deserializer)? {
            FilterRepr::Group { logic, filters } => Filter::Group { logic, filters },
            FilterRepr::Condition {
                field,
                operator,
                value,
            } => Filter::Condition {
                field,
                operator,
                value,
            },
            FilterRepr::Empty(_) => Filter::match_all(),
        })
    }
}

impl Filter {
    /// A filter matching every element.
    pub fn match_all() -> Self {
        Filter::Group {
            logic: Logic::And,
            filters: Vec::new(),
        }
    }

    /// All filters must match.
    pub fn and(filters: Vec<Filter>) -> Self {
        Filter::Group {
            logic: Logic::And,
            filters,
        }
    }

    /// Any filter must match.
    pub fn or(filters: Vec<Filter>) -> Self {
        Filter::Group {
            logic: Logic::Or,
            filters,
        }
    }

    /// Leaf condition.
    pub fn condition(field: impl Into<String>, operator: Operator, value: impl Into<Operand>) -> Self {
        Filter::Condition {
            field: field.into(),
            operator,
            value: value.into(),
        }
    }

    /// `field == value`.
    pub fn eq(field: impl Into<String>, value: impl Into<Operand>) -> Self {
        Self::condition(field, Operator::Eq, value)
    }

    /// `field == <user attribute of category>`.
    pub fn eq_attribute(field: impl Into<String>, category: impl Into<String>) -> Self {
        Filter::Condition {
            field: field.into(),
            operator: Operator::Eq,
            value: Operand::Attribute {
                attribute: category.into(),
            },
        }
    }

    /// Whether this filter trivially matches everything.
    pub fn is_match_all(&self) -> bool {
        matches!(self, Filter::Group { filters, .. } if filters.is_empty())
    }

    /// All field names referenced anywhere in the tree.
    pub fn fields(&self) -> BTreeSet<String> {
        let mut fields = BTreeSet::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields(&self, fields: &mut BTreeSet<String>) {
        match self {
            Filter::Group { filters, .. } => {
                for f in filters {
                    f.collect_fields(fields);
                }
            }
            Filter::Condition { field, .. } => {
                fields.insert(field.clone());
            }
        }
    }

    /// Replace attribute references with concrete values.
    ///
    /// Returns `None` if any referenced attribute cannot be resolved, in which
    /// case the filter cannot be satisfied for this user.
    pub fn bind<F>(&self, lookup: &F) -> Option<Filter>
    where
        F: Fn(&str) -> Option<Value>,
    {
        match self {
            Filter::Group { logic, filters } => {
                let bound: Option<Vec<Filter>> = filters.iter().map(|f| f.bind(lookup)).collect();
                Some(Filter::Group {
                    logic: *logic,
                    filters: bound?,
                })
            }
            Filter::Condition {
                field,
                operator,
                value,
            } => {
                let value = match value {
                    Operand::Attribute { attribute } => Operand::Literal(lookup(attribute)?),
                    literal => literal.clone(),
                };
                Some(Filter::Condition {
                    field: field.clone(),
                    operator: *operator,
                    value,
                })
            }
        }
    }

    /// Check structural validity of the tree.
    pub fn validate(&self) -> Result<()> {
        match self {
            Filter::Group { filters, .. } => filters.iter().try_for_each(Filter::validate),
            Filter::Condition {
                field,
                operator,
                value,
            } => {
                if field.is_empty() {
                    return Err(Error::Validation("filter condition without field".into()));
                }
                if matches!(operator, Operator::In | Operator::NotIn) {
                    if let Operand::Literal(v) = value {
                        if !v.is_array() {
                            return Err(Error::Validation(format!(
                                "operator {:?} on '{}' requires an array operand",
                                operator, field
                            )));
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

/// Evaluates filters against record data.
pub struct FilterEvaluator;

impl FilterEvaluator {
    /// Evaluate a filter against a data object.
    ///
    /// Fails only if the filter still holds unbound attribute references.
    pub fn evaluate(filter: &Filter, data: &Map<String, Value>) -> Result<bool> {
        match filter {
            Filter::Group { logic, filters } => match logic {
                _ if filters.is_empty() => Ok(true),
                Logic::And => {
                    for f in filters {
                        if !Self::evaluate(f, data)? {
                            return Ok(false);
                        }
                    }
                    Ok(true)
                }
                Logic::Or => {
                    for f in filters {
                        if Self::evaluate(f, data)? {
                            return Ok(true);
                        }
                    }
                    Ok(false)
                }
            },
            Filter::Condition {
                field,
                operator,
                value,
            } => {
                let operand = match value {
                    Operand::Literal(v) => v,
                    Operand::Attribute { attribute } => {
                        return Err(Error::Validation(format!(
                            "unbound attribute reference '{}' on field '{}'",
                            attribute, field
                        )))
                    }
                };
                Ok(Self::compare(data.get(field), *operator, operand))
            }
        }
    }

    fn compare(field_value: Option<&Value>, operator: Operator, operand: &Value) -> bool {
        let fv = field_value.unwrap_or(&Value::Null);
        match operator {
            Operator::Eq => Self::matches_eq(fv, operand),
            Operator::Neq => !Self::matches_eq(fv, operand),
            Operator::Contains => Self::contains(fv, operand),
            Operator::DoesNotContain => !Self::contains(fv, operand),
            Operator::StartsWith => match (fv, operand) {
                (Value::String(s), Value::String(p)) => {
                    s.to_lowercase().starts_with(&p.to_lowercase())
                }
                _ => false,
            },
            Operator::EndsWith => match (fv, operand) {
                (Value::String(s), Value::String(p)) => {
                    s.to_lowercase().ends_with(&p.to_lowercase())
                }
                _ => false,
            },
            Operator::Gt => Self::ordering(fv, operand).is_some_and(Ordering::is_gt),
            Operator::Lt => Self::ordering(fv, operand).is_some_and(Ordering::is_lt),
            Operator::Gte => Self::ordering(fv, operand).is_some_and(Ordering::is_ge),
            Operator::Lte => Self::ordering(fv, operand).is_some_and(Ordering::is_le),
            Operator::IsNull => fv.is_null(),
            Operator::IsNotNull => !fv.is_null(),
            Operator::IsEmpty => Self::is_empty(fv),
            Operator::IsNotEmpty => !Self::is_empty(fv),
            Operator::In => match operand {
                Value::Array(items) => items.iter().any(|item| Self::matches_eq(fv, item)),
                _ => false,
            },
            Operator::NotIn => match operand {
                Value::Array(items) => !items.iter().any(|item| Self::matches_eq(fv, item)),
                _ => true,
            },
        }
    }

    /// Equality with array semantics on either side: an array field matches
    /// when it holds the operand, an array operand matches when it holds the
    /// field value (multi-valued user attributes bind to arrays).
    fn matches_eq(fv: &Value, operand: &Value) -> bool {
        match (fv, operand) {
            (Value::Array(a), Value::Array(b)) => a == b,
            (Value::Array(items), scalar) => items.iter().any(|i| values_equal(i, scalar)),
            (scalar, Value::Array(items)) => items.iter().any(|i| values_equal(scalar, i)),
            (a, b) => values_equal(a, b),
        }
    }

    fn contains(fv: &Value, operand: &Value) -> bool {
        match (fv, operand) {
            (Value::String(s), Value::String(needle)) => {
                s.to_lowercase().contains(&needle.to_lowercase())
            }
            (Value::Array(items), Value::Array(needles)) => needles
                .iter()
                .all(|n| items.iter().any(|i| values_equal(i, n))),
            (Value::Array(items), needle) => items.iter().any(|i| values_equal(i, needle)),
            _ => false,
        }
    }

    fn is_empty(fv: &Value) -> bool {
        match fv {
            Value::Null => true,
            Value::String(s) => s.is_empty(),
            Value::Array(a) => a.is_empty(),
            Value::Object(o) => o.is_empty(),
            _ => false,
        }
    }

    fn ordering(a: &Value, b: &Value) -> Option<Ordering> {
        compare_values(a, b)
    }
}

/// Check two JSON values for equality, treating all numbers as floats.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64() == y.as_f64(),
        _ => a == b,
    }
}

/// Order two JSON values of compatible type.
///
/// Strings compare lexicographically, which orders ISO-8601 dates correctly.
/// Values of different kinds are incomparable.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x.as_f64()?.partial_cmp(&y.as_f64()?),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::Null, Value::Null) => Some(Ordering::Equal),
        _ => None,
    }
}
