//! Audience filtering: a user-authored boolean condition tree evaluated
//! against recipient records with an explicit field allow-list.

pub mod evaluator;
pub mod filter;

pub use evaluator::{FilterEvaluator, DEFAULT_ALLOWED_FIELDS};
pub use filter::{Condition, ConditionOperator, FilterGroup, LogicalOperator};
