pub mod query_plan;
pub mod validated_plan;

pub use query_plan::{Dimension, Filter, Measure, OrderBy, QueryPlan};
pub use validated_plan::{
    CompareOp, Predicate, SortDirection, ValidatedDimension, ValidatedFilter, ValidatedMeasure,
    ValidatedOrder, ValidatedPlan, ValidatedQuery,
};
