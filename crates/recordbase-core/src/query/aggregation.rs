//! Declarative aggregation pipelines.
//!
//! An [`AggregationDef`] names the record fields it reads (`sourceFields`)
//! and an ordered list of [`Stage`]s. The whole pipeline is validated before
//! any stage runs so that a bad definition never yields partial output.

use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Number, Value};

use super::filter::{compare_values, Filter, FilterEvaluator};
use crate::error::{Error, Result};

/// A named aggregation over a resource's records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationDef {
    /// Aggregation name, unique within its resource.
    pub name: String,
    /// Record fields the pipeline may reference.
    #[serde(default, rename = "sourceFields")]
    pub source_fields: Vec<String>,
    /// Stages, executed in order.
    #[serde(default)]
    pub pipeline: Vec<Stage>,
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    #[default]
    Asc,
    Desc,
}

/// One pipeline stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Stage {
    /// Keep elements matching the filter.
    Filter { filter: Filter },
    /// Stable sort on one field.
    Sort {
        field: String,
        #[serde(default)]
        order: SortOrder,
    },
    /// Partition by key tuple and compute one row per bucket.
    Group {
        #[serde(rename = "groupBy")]
        group_by: Vec<GroupKey>,
        #[serde(default, rename = "addFields")]
        add_fields: Vec<Accumulation>,
    },
    /// Add or overwrite fields per element.
    AddFields { fields: Vec<NamedExpression> },
    /// Flatten an array-valued field into one element per entry.
    Unwind { field: String },
}

impl Stage {
    fn kind(&self) -> &'static str {
        match self {
            Stage::Filter { .. } => "filter",
            Stage::Sort { .. } => "sort",
            Stage::Group { .. } => "group",
            Stage::AddFields { .. } => "addFields",
            Stage::Unwind { .. } => "unwind",
        }
    }
}

/// A group key: a raw field or a derived expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GroupKey {
    Field(String),
    Derived { name: String, expression: Expression },
}

impl GroupKey {
    /// Output column name of the key.
    pub fn name(&self) -> &str {
        match self {
            GroupKey::Field(field) => field,
            GroupKey::Derived { name, .. } => name,
        }
    }

    fn evaluate(&self, row: &Map<String, Value>) -> Value {
        match self {
            GroupKey::Field(field) => row.get(field).cloned().unwrap_or(Value::Null),
            GroupKey::Derived { expression, .. } => expression.evaluate(row),
        }
    }
}

/// Aggregate function applied over a bucket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Accumulator {
    Sum,
    Avg,
    Count,
    Min,
    Max,
    First,
    Last,
    Push,
}

/// A computed column of a group stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Accumulation {
    /// Output column name.
    pub name: String,
    /// Aggregate function.
    #[serde(rename = "operator")]
    pub accumulator: Accumulator,
    /// Input field. Only `count` may omit it.
    #[serde(default)]
    pub field: Option<String>,
}

impl Accumulation {
    /// Build an accumulation.
    pub fn new(name: impl Into<String>, accumulator: Accumulator, field: Option<&str>) -> Self {
        Self {
            name: name.into(),
            accumulator,
            field: field.map(str::to_string),
        }
    }
}

/// Non-aggregate operator of an expression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExpressionOperator {
    Add,
    Subtract,
    Multiply,
    Divide,
    Concat,
    Year,
    Month,
    Day,
}

/// Per-element expression.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Expression {
    /// Value of a field of the current element.
    Field { field: String },
    /// Operator applied to operand expressions.
    Operation {
        operator: ExpressionOperator,
        operands: Vec<Expression>,
    },
    /// Constant.
    Literal(Value),
}

impl Expression {
    /// Field reference.
    pub fn field(name: impl Into<String>) -> Self {
        Expression::Field { field: name.into() }
    }

    /// Operator application.
    pub fn op(operator: ExpressionOperator, operands: Vec<Expression>) -> Self {
        Expression::Operation { operator, operands }
    }

    fn collect_fields(&self, out: &mut BTreeSet<String>) {
        match self {
            Expression::Field { field } => {
                out.insert(field.clone());
            }
            Expression::Operation { operands, .. } => {
                for operand in operands {
                    operand.collect_fields(out);
                }
            }
            Expression::Literal(_) => {}
        }
    }

    fn validate(&self) -> Result<()> {
        if let Expression::Operation { operator, operands } = self {
            let arity_ok = match operator {
                ExpressionOperator::Year | ExpressionOperator::Month | ExpressionOperator::Day => {
                    operands.len() == 1
                }
                ExpressionOperator::Subtract | ExpressionOperator::Divide => operands.len() == 2,
                _ => !operands.is_empty(),
            };
            if !arity_ok {
                return Err(Error::Validation(format!(
                    "operator {:?} given {} operand(s)",
                    operator,
                    operands.len()
                )));
            }
            operands.iter().try_for_each(Expression::validate)?;
        }
        Ok(())
    }

    /// Evaluate against one element. Type mismatches yield `null`.
    pub fn evaluate(&self, row: &Map<String, Value>) -> Value {
        match self {
            Expression::Field { field } => row.get(field).cloned().unwrap_or(Value::Null),
            Expression::Literal(v) => v.clone(),
            Expression::Operation { operator, operands } => {
                let values: Vec<Value> = operands.iter().map(|e| e.evaluate(row)).collect();
                apply_operator(*operator, &values)
            }
        }
    }
}

/// `name = expression` in an `addFields` stage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NamedExpression {
    pub name: String,
    pub expression: Expression,
}

fn apply_operator(operator: ExpressionOperator, values: &[Value]) -> Value {
    match operator {
        ExpressionOperator::Add => {
            let mut acc = NumericSum::default();
            for v in values {
                if !acc.push(v) {
                    return Value::Null;
                }
            }
            acc.into_value()
        }
        ExpressionOperator::Multiply => {
            let nums: Option<Vec<f64>> = values.iter().map(Value::as_f64).collect();
            let all_int = values.iter().all(|v| v.is_i64());
            match nums {
                Some(nums) if all_int => {
                    let product = values.iter().filter_map(Value::as_i64).try_fold(1i64, i64::checked_mul);
                    product
                        .map(Value::from)
                        .unwrap_or_else(|| float_value(nums.iter().product()))
                }
                Some(nums) => float_value(nums.iter().product()),
                None => Value::Null,
            }
        }
        ExpressionOperator::Subtract => {
            let [a, b] = values else {
                return Value::Null;
            };
            match (a.as_i64(), b.as_i64()) {
                (Some(x), Some(y)) if a.is_i64() && b.is_i64() => {
                    x.checked_sub(y).map(Value::from).unwrap_or(Value::Null)
                }
                _ => match (a.as_f64(), b.as_f64()) {
                    (Some(x), Some(y)) => float_value(x - y),
                    _ => Value::Null,
                },
            }
        }
        ExpressionOperator::Divide => {
            let [a, b] = values else {
                return Value::Null;
            };
            match (a.as_f64(), b.as_f64()) {
                (Some(_), Some(d)) if d == 0.0 => Value::Null,
                (Some(n), Some(d)) => float_value(n / d),
                _ => Value::Null,
            }
        }
        ExpressionOperator::Concat => {
            let mut out = String::new();
            for v in values {
                match v {
                    Value::Null => {}
                    Value::String(s) => out.push_str(s),
                    other => out.push_str(&other.to_string()),
                }
            }
            Value::String(out)
        }
        ExpressionOperator::Year | ExpressionOperator::Month | ExpressionOperator::Day => {
            let Some(date) = values.first().and_then(Value::as_str).and_then(parse_date) else {
                return Value::Null;
            };
            let part = match operator {
                ExpressionOperator::Year => date.year() as i64,
                ExpressionOperator::Month => date.month() as i64,
                _ => date.day() as i64,
            };
            Value::from(part)
        }
    }
}

fn parse_date(s: &str) -> Option<NaiveDate> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.date_naive())
        .ok()
        .or_else(|| NaiveDate::parse_from_str(s.get(..10)?, "%Y-%m-%d").ok())
}

fn float_value(f: f64) -> Value {
    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
}

/// Sum that stays integral while every input is an integer.
#[derive(Default)]
struct NumericSum {
    int: i64,
    float: f64,
    is_float: bool,
    count: usize,
}

impl NumericSum {
    /// Add a value; returns false if it is not numeric.
    fn push(&mut self, v: &Value) -> bool {
        let Some(f) = v.as_f64() else {
            return false;
        };
        self.count += 1;
        self.float += f;
        match v.as_i64().and_then(|i| self.int.checked_add(i)) {
            Some(sum) if !self.is_float => self.int = sum,
            _ => self.is_float = true,
        }
        true
    }

    fn into_value(self) -> Value {
        if self.is_float {
            float_value(self.float)
        } else {
            Value::from(self.int)
        }
    }
}

impl AggregationDef {
    /// Create an aggregation reading the given source fields.
    pub fn new(name: impl Into<String>, source_fields: Vec<String>, pipeline: Vec<Stage>) -> Self {
        Self {
            name: name.into(),
            source_fields,
            pipeline,
        }
    }

    /// Parse a definition from JSON; unknown stage types are validation errors.
    pub fn from_json(value: Value) -> Result<Self> {
        let def: Self = serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("invalid aggregation: {}", e)))?;
        def.validate()?;
        Ok(def)
    }

    /// Check that every stage is well formed and only references fields that
    /// are either declared source fields or produced by an earlier stage.
    pub fn validate(&self) -> Result<()> {
        let mut available: BTreeSet<String> = self.source_fields.iter().cloned().collect();

        for (index, stage) in self.pipeline.iter().enumerate() {
            let mut referenced = BTreeSet::new();
            match stage {
                Stage::Filter { filter } => {
                    filter.validate()?;
                    referenced.extend(filter.fields());
                }
                Stage::Sort { field, .. } | Stage::Unwind { field } => {
                    referenced.insert(field.clone());
                }
                Stage::Group {
                    group_by,
                    add_fields,
                } => {
                    if group_by.is_empty() {
                        return Err(Error::Validation(format!(
                            "{} stage #{} has no group keys",
                            stage.kind(),
                            index
                        )));
                    }
                    for key in group_by {
                        match key {
                            GroupKey::Field(field) => {
                                referenced.insert(field.clone());
                            }
                            GroupKey::Derived { expression, .. } => {
                                expression.validate()?;
                                expression.collect_fields(&mut referenced);
                            }
                        }
                    }
                    for acc in add_fields {
                        match (&acc.field, acc.accumulator) {
                            (Some(field), _) => {
                                referenced.insert(field.clone());
                            }
                            (None, Accumulator::Count) => {}
                            (None, other) => {
                                return Err(Error::Validation(format!(
                                    "accumulator {:?} for '{}' requires a field",
                                    other, acc.name
                                )))
                            }
                        }
                    }
                }
                Stage::AddFields { fields } => {
                    for named in fields {
                        named.expression.validate()?;
                        named.expression.collect_fields(&mut referenced);
                    }
                }
            }

            if let Some(missing) = referenced.iter().find(|f| !available.contains(*f)) {
                return Err(Error::Validation(format!(
                    "aggregation '{}' {} stage #{} references '{}' which is not a source field",
                    self.name,
                    stage.kind(),
                    index,
                    missing
                )));
            }

            match stage {
                Stage::Group {
                    group_by,
                    add_fields,
                } => {
                    available = group_by
                        .iter()
                        .map(|k| k.name().to_string())
                        .chain(add_fields.iter().map(|a| a.name.clone()))
                        .collect();
                }
                Stage::AddFields { fields } => {
                    available.extend(fields.iter().map(|f| f.name.clone()));
                }
                _ => {}
            }
        }
        Ok(())
    }

    /// Run the pipeline over a dataset. The input is left untouched.
    pub fn execute(&self, input: &[Map<String, Value>]) -> Result<Vec<Map<String, Value>>> {
        self.validate()?;
        let mut rows = input.to_vec();
        for stage in &self.pipeline {
            rows = run_stage(stage, rows)?;
        }
        Ok(rows)
    }
}

fn run_stage(stage: &Stage, rows: Vec<Map<String, Value>>) -> Result<Vec<Map<String, Value>>> {
    match stage {
        Stage::Filter { filter } => {
            let mut kept = Vec::with_capacity(rows.len());
            for row in rows {
                if FilterEvaluator::evaluate(filter, &row)? {
                    kept.push(row);
                }
            }
            Ok(kept)
        }
        Stage::Sort { field, order } => {
            let mut rows = rows;
            rows.sort_by(|a, b| {
                let ord = sort_key_cmp(a.get(field), b.get(field));
                match order {
                    SortOrder::Asc => ord,
                    SortOrder::Desc => ord.reverse(),
                }
            });
            Ok(rows)
        }
        Stage::Group {
            group_by,
            add_fields,
        } => Ok(group(rows, group_by, add_fields)),
        Stage::AddFields { fields } => Ok(rows
            .into_iter()
            .map(|mut row| {
                for named in fields {
                    let value = named.expression.evaluate(&row);
                    row.insert(named.name.clone(), value);
                }
                row
            })
            .collect()),
        Stage::Unwind { field } => {
            let mut out = Vec::with_capacity(rows.len());
            for row in rows {
                match row.get(field) {
                    Some(Value::Array(items)) => {
                        for item in items {
                            let mut copy = row.clone();
                            copy.insert(field.clone(), item.clone());
                            out.push(copy);
                        }
                    }
                    _ => out.push(row),
                }
            }
            Ok(out)
        }
    }
}

/// Missing and null values sort before everything else.
fn sort_key_cmp(a: Option<&Value>, b: Option<&Value>) -> std::cmp::Ordering {
    use std::cmp::Ordering;
    let a = a.unwrap_or(&Value::Null);
    let b = b.unwrap_or(&Value::Null);
    match (a.is_null(), b.is_null()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        (false, true) => Ordering::Greater,
        _ => compare_values(a, b).unwrap_or(Ordering::Equal),
    }
}

fn group(
    rows: Vec<Map<String, Value>>,
    group_by: &[GroupKey],
    add_fields: &[Accumulation],
) -> Vec<Map<String, Value>> {
    // Buckets keep first-appearance order.
    let mut index: HashMap<String, usize> = HashMap::new();
    let mut buckets: Vec<(Vec<Value>, Vec<Map<String, Value>>)> = Vec::new();

    for row in rows {
        let key: Vec<Value> = group_by.iter().map(|k| k.evaluate(&row)).collect();
        let fingerprint = Value::Array(key.clone()).to_string();
        match index.get(&fingerprint) {
            Some(&i) => buckets[i].1.push(row),
            None => {
                index.insert(fingerprint, buckets.len());
                buckets.push((key, vec![row]));
            }
        }
    }

    buckets
        .into_iter()
        .map(|(key, members)| {
            let mut out = Map::new();
            for (k, v) in group_by.iter().zip(key) {
                out.insert(k.name().to_string(), v);
            }
            for acc in add_fields {
                out.insert(acc.name.clone(), accumulate(acc, &members));
            }
            out
        })
        .collect()
}

fn accumulate(acc: &Accumulation, members: &[Map<String, Value>]) -> Value {
    let values: Vec<&Value> = match &acc.field {
        Some(field) => members
            .iter()
            .map(|m| m.get(field).unwrap_or(&Value::Null))
            .collect(),
        None => return Value::from(members.len()),
    };
    let present = || values.iter().copied().filter(|v| !v.is_null());

    match acc.accumulator {
        Accumulator::Sum => {
            let mut sum = NumericSum::default();
            for v in present() {
                sum.push(v);
            }
            sum.into_value()
        }
        Accumulator::Avg => {
            let mut sum = NumericSum::default();
            for v in present() {
                sum.push(v);
            }
            if sum.count == 0 {
                Value::Null
            } else {
                float_value(sum.float / sum.count as f64)
            }
        }
        Accumulator::Count => Value::from(present().count()),
        Accumulator::Min => present()
            .min_by(|a, b| compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
            .unwrap_or(Value::Null),
        Accumulator::Max => present()
            .max_by(|a, b| compare_values(a, b).unwrap_or(std::cmp::Ordering::Equal))
            .cloned()
            .unwrap_or(Value::Null),
        Accumulator::First => values.first().map(|v| (*v).clone()).unwrap_or(Value::Null),
        Accumulator::Last => values.last().map(|v| (*v).clone()).unwrap_or(Value::Null),
        Accumulator::Push => Value::Array(values.iter().map(|v| (*v).clone()).collect()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::filter::Operator;
    use serde_json::json;

    fn rows(value: Value) -> Vec<Map<String, Value>> {
        value
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_object().cloned().unwrap())
            .collect()
    }

    fn sales() -> Vec<Map<String, Value>> {
        rows(json!([
            {"country": "FR", "amount": 10},
            {"country": "FR", "amount": 5},
            {"country": "US", "amount": 7}
        ]))
    }

    fn fields(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_group_sum() {
        let def = AggregationDef::new(
            "totals",
            fields(&["country", "amount"]),
            vec![Stage::Group {
                group_by: vec![GroupKey::Field("country".into())],
                add_fields: vec![Accumulation::new("total", Accumulator::Sum, Some("amount"))],
            }],
        );
        let mut out = def.execute(&sales()).unwrap();
        out.sort_by(|a, b| a["country"].as_str().cmp(&b["country"].as_str()));
        assert_eq!(
            Value::Array(out.into_iter().map(Value::Object).collect()),
            json!([{"country": "FR", "total": 15}, {"country": "US", "total": 7}])
        );
    }

    #[test]
    fn test_group_other_accumulators() {
        let def = AggregationDef::new(
            "stats",
            fields(&["country", "amount"]),
            vec![
                Stage::Group {
                    group_by: vec![GroupKey::Field("country".into())],
                    add_fields: vec![
                        Accumulation::new("n", Accumulator::Count, None),
                        Accumulation::new("avg", Accumulator::Avg, Some("amount")),
                        Accumulation::new("min", Accumulator::Min, Some("amount")),
                        Accumulation::new("max", Accumulator::Max, Some("amount")),
                        Accumulation::new("all", Accumulator::Push, Some("amount")),
                    ],
                },
                Stage::Sort {
                    field: "country".into(),
                    order: SortOrder::Asc,
                },
            ],
        );
        let out = def.execute(&sales()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["n"], json!(2));
        assert_eq!(out[0]["avg"], json!(7.5));
        assert_eq!(out[0]["min"], json!(5));
        assert_eq!(out[0]["max"], json!(10));
        assert_eq!(out[0]["all"], json!([10, 5]));
        assert_eq!(out[1]["n"], json!(1));
    }

    #[test]
    fn test_filter_then_sort_desc() {
        let def = AggregationDef::new(
            "big",
            fields(&["country", "amount"]),
            vec![
                Stage::Filter {
                    filter: Filter::condition("amount", Operator::Gte, 7),
                },
                Stage::Sort {
                    field: "amount".into(),
                    order: SortOrder::Desc,
                },
            ],
        );
        let out = def.execute(&sales()).unwrap();
        let amounts: Vec<_> = out.iter().map(|r| r["amount"].clone()).collect();
        assert_eq!(amounts, vec![json!(10), json!(7)]);
    }

    #[test]
    fn test_sort_is_stable() {
        let input = rows(json!([
            {"k": 1, "tag": "a"},
            {"k": 0, "tag": "b"},
            {"k": 1, "tag": "c"},
            {"tag": "d"}
        ]));
        let def = AggregationDef::new(
            "s",
            fields(&["k", "tag"]),
            vec![Stage::Sort {
                field: "k".into(),
                order: SortOrder::Asc,
            }],
        );
        let out = def.execute(&input).unwrap();
        let tags: Vec<_> = out.iter().map(|r| r["tag"].as_str().unwrap()).collect();
        assert_eq!(tags, vec!["d", "b", "a", "c"]);
    }

    #[test]
    fn test_unwind() {
        let def = AggregationDef::new(
            "u",
            fields(&["tags"]),
            vec![Stage::Unwind {
                field: "tags".into(),
            }],
        );
        let out = def.execute(&rows(json!([{"tags": ["x", "y"]}]))).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["tags"], json!("x"));
        assert_eq!(out[1]["tags"], json!("y"));

        let scalar = rows(json!([{"tags": "x"}]));
        let out = def.execute(&scalar).unwrap();
        assert_eq!(out, scalar);
    }

    #[test]
    fn test_add_fields_expressions() {
        let def = AggregationDef::new(
            "calc",
            fields(&["price", "qty", "name", "date"]),
            vec![Stage::AddFields {
                fields: vec![
                    NamedExpression {
                        name: "total".into(),
                        expression: Expression::op(
                            ExpressionOperator::Multiply,
                            vec![Expression::field("price"), Expression::field("qty")],
                        ),
                    },
                    NamedExpression {
                        name: "label".into(),
                        expression: Expression::op(
                            ExpressionOperator::Concat,
                            vec![Expression::field("name"), Expression::Literal(json!("!"))],
                        ),
                    },
                    NamedExpression {
                        name: "year".into(),
                        expression: Expression::op(
                            ExpressionOperator::Year,
                            vec![Expression::field("date")],
                        ),
                    },
                ],
            }],
        );
        let input = rows(json!([{"price": 3, "qty": 4, "name": "box", "date": "2024-05-01"}]));
        let out = def.execute(&input).unwrap();
        assert_eq!(out[0]["total"], json!(12));
        assert_eq!(out[0]["label"], json!("box!"));
        assert_eq!(out[0]["year"], json!(2024));
        // input untouched
        assert!(!input[0].contains_key("total"));
    }

    #[test]
    fn test_group_by_derived_key() {
        let def = AggregationDef::new(
            "per_year",
            fields(&["date", "amount"]),
            vec![Stage::Group {
                group_by: vec![GroupKey::Derived {
                    name: "year".into(),
                    expression: Expression::op(
                        ExpressionOperator::Year,
                        vec![Expression::field("date")],
                    ),
                }],
                add_fields: vec![Accumulation::new("total", Accumulator::Sum, Some("amount"))],
            }],
        );
        let input = rows(json!([
            {"date": "2023-01-01", "amount": 1},
            {"date": "2023-06-01T10:00:00Z", "amount": 2},
            {"date": "2024-01-01", "amount": 4}
        ]));
        let out = def.execute(&input).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0]["year"], json!(2023));
        assert_eq!(out[0]["total"], json!(3));
    }

    #[test]
    fn test_field_not_in_source_fields() {
        let def = AggregationDef::new(
            "bad",
            fields(&["country"]),
            vec![Stage::Sort {
                field: "amount".into(),
                order: SortOrder::Asc,
            }],
        );
        let err = def.execute(&sales()).unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert!(err.to_string().contains("amount"));
    }

    #[test]
    fn test_fields_after_group_are_its_outputs() {
        let def = AggregationDef::new(
            "g",
            fields(&["country", "amount"]),
            vec![
                Stage::Group {
                    group_by: vec![GroupKey::Field("country".into())],
                    add_fields: vec![Accumulation::new("total", Accumulator::Sum, Some("amount"))],
                },
                Stage::Sort {
                    field: "amount".into(),
                    order: SortOrder::Asc,
                },
            ],
        );
        assert!(def.validate().is_err());
    }

    #[test]
    fn test_unknown_stage_type() {
        let err = AggregationDef::from_json(json!({
            "name": "x",
            "sourceFields": ["a"],
            "pipeline": [{"type": "lookup", "from": "other"}]
        }))
        .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }

    #[test]
    fn test_from_json() {
        let def = AggregationDef::from_json(json!({
            "name": "totals",
            "sourceFields": ["country", "amount"],
            "pipeline": [
                {"type": "filter", "filter": {"field": "amount", "operator": "gt", "value": 0}},
                {"type": "group", "groupBy": ["country"],
                 "addFields": [{"name": "total", "operator": "sum", "field": "amount"}]},
                {"type": "sort", "field": "total", "order": "desc"}
            ]
        }))
        .unwrap();
        let out = def.execute(&sales()).unwrap();
        assert_eq!(out[0]["country"], json!("FR"));
        assert_eq!(out[0]["total"], json!(15));
    }
}
