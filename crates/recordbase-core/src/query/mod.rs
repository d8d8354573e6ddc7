//! Query evaluation for recordbase.
//!
//! Filters decide which records an access rule or pipeline stage keeps;
//! aggregation pipelines derive datasets from record collections.

mod aggregation;
mod filter;

pub use aggregation::{
    Accumulation, Accumulator, AggregationDef, Expression, ExpressionOperator, GroupKey,
    NamedExpression, SortOrder, Stage,
};
pub use filter::{compare_values, values_equal, Filter, FilterEvaluator, Logic, Operand, Operator};
