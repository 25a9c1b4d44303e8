//! User-authored audience filter: a recursively nested boolean tree of
//! field conditions.

use serde::{Deserialize, Serialize};

/// A group of conditions and nested sub-groups combined with one logical
/// operator. The tree is authored by end users in the campaign builder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FilterGroup {
    pub operator: LogicalOperator,
    #[serde(default)]
    pub conditions: Vec<Condition>,
    #[serde(default)]
    pub groups: Vec<FilterGroup>,
}

impl FilterGroup {
    pub fn all(conditions: Vec<Condition>) -> Self {
        Self {
            operator: LogicalOperator::And,
            conditions,
            groups: Vec::new(),
        }
    }

    pub fn any(conditions: Vec<Condition>) -> Self {
        Self {
            operator: LogicalOperator::Or,
            conditions,
            groups: Vec::new(),
        }
    }

    /// True when the tree contains no conditions at any depth.
    pub fn is_empty(&self) -> bool {
        self.conditions.is_empty() && self.groups.iter().all(|g| g.is_empty())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum LogicalOperator {
    And,
    Or,
}

/// One field comparison against a JSON value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    #[serde(default)]
    pub value: serde_json::Value,
}

impl Condition {
    pub fn new(
        field: impl Into<String>,
        operator: ConditionOperator,
        value: serde_json::Value,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    IsEmpty,
    IsNotEmpty,
    GreaterThan,
    LessThan,
    GreaterOrEqual,
    LessOrEqual,
    Between,
    In,
    NotIn,
}
