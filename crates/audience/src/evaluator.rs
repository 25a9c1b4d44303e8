//! Recursive-descent filter evaluation over recipient records.
//!
//! The evaluator compiles nothing; it walks the condition tree per member
//! so the same logic works against any storage backend that can hand it
//! recipient attribute maps.

use crate::filter::{Condition, ConditionOperator, FilterGroup, LogicalOperator};
use outreach_core::types::Recipient;
use serde_json::Value;
use std::collections::HashSet;
use tracing::debug;

/// Attribute names filter conditions may reference by default. Conditions
/// on any other field are silently skipped, which keeps user-authored
/// trees from reaching into arbitrary record attributes.
pub const DEFAULT_ALLOWED_FIELDS: &[&str] = &[
    "first_name",
    "last_name",
    "email",
    "phone",
    "city",
    "state",
    "country",
    "age",
    "active",
    "tags",
    "source",
    "language",
    "signup_date",
    "last_purchase_at",
    "total_orders",
];

pub struct FilterEvaluator {
    allowed_fields: HashSet<String>,
}

impl FilterEvaluator {
    pub fn new<I, S>(allowed_fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            allowed_fields: allowed_fields.into_iter().map(Into::into).collect(),
        }
    }

    /// Filter a recipient pool down to the members matching the tree.
    pub fn evaluate(&self, pool: &[Recipient], tree: &FilterGroup) -> Vec<Recipient> {
        pool.iter()
            .filter(|r| self.matches(r, tree))
            .cloned()
            .collect()
    }

    /// Audience-size preview: how many pool members match, without
    /// materializing records.
    pub fn count(&self, pool: &[Recipient], tree: &FilterGroup) -> usize {
        pool.iter().filter(|r| self.matches(r, tree)).count()
    }

    /// The per-member predicate. An AND group is a short-circuiting
    /// conjunction over its usable conditions and sub-groups; an OR group
    /// matches when any usable condition or sub-group does.
    pub fn matches(&self, recipient: &Recipient, group: &FilterGroup) -> bool {
        let usable: Vec<&Condition> = group
            .conditions
            .iter()
            .filter(|c| self.is_usable(c))
            .collect();

        match group.operator {
            LogicalOperator::And => {
                usable.iter().all(|c| evaluate_condition(recipient, c))
                    && group.groups.iter().all(|g| self.matches(recipient, g))
            }
            LogicalOperator::Or => {
                usable.iter().any(|c| evaluate_condition(recipient, c))
                    || group.groups.iter().any(|g| self.matches(recipient, g))
            }
        }
    }

    /// Skip policy: a condition is dropped from its group (as if never
    /// authored) when its field is not allow-listed, or when `between`
    /// carries anything but a 2-element array.
    fn is_usable(&self, condition: &Condition) -> bool {
        if !self.allowed_fields.contains(&condition.field) {
            debug!(field = %condition.field, "Skipping condition on disallowed field");
            return false;
        }
        if condition.operator == ConditionOperator::Between {
            let arity_ok = condition
                .value
                .as_array()
                .map(|a| a.len() == 2)
                .unwrap_or(false);
            if !arity_ok {
                debug!(field = %condition.field, "Skipping malformed between condition");
                return false;
            }
        }
        true
    }
}

impl Default for FilterEvaluator {
    fn default() -> Self {
        Self::new(DEFAULT_ALLOWED_FIELDS.iter().copied())
    }
}

fn evaluate_condition(recipient: &Recipient, condition: &Condition) -> bool {
    let actual = recipient
        .attributes
        .get(&condition.field)
        .cloned()
        .unwrap_or(Value::Null);
    let expected = &condition.value;

    match condition.operator {
        ConditionOperator::Equals => actual == *expected,
        ConditionOperator::NotEquals => actual != *expected,
        ConditionOperator::Contains => str_pair(&actual, expected)
            .map(|(a, e)| a.contains(e))
            .unwrap_or(false),
        ConditionOperator::NotContains => str_pair(&actual, expected)
            .map(|(a, e)| !a.contains(e))
            .unwrap_or(true),
        ConditionOperator::StartsWith => str_pair(&actual, expected)
            .map(|(a, e)| a.starts_with(e))
            .unwrap_or(false),
        ConditionOperator::EndsWith => str_pair(&actual, expected)
            .map(|(a, e)| a.ends_with(e))
            .unwrap_or(false),
        ConditionOperator::IsEmpty => is_empty_value(&actual),
        ConditionOperator::IsNotEmpty => !is_empty_value(&actual),
        ConditionOperator::GreaterThan => {
            numeric_cmp(&actual, expected).map_or(false, |o| o == std::cmp::Ordering::Greater)
        }
        ConditionOperator::LessThan => {
            numeric_cmp(&actual, expected).map_or(false, |o| o == std::cmp::Ordering::Less)
        }
        ConditionOperator::GreaterOrEqual => {
            numeric_cmp(&actual, expected).map_or(false, |o| o != std::cmp::Ordering::Less)
        }
        ConditionOperator::LessOrEqual => {
            numeric_cmp(&actual, expected).map_or(false, |o| o != std::cmp::Ordering::Greater)
        }
        ConditionOperator::Between => {
            // Arity already validated by the skip policy.
            let bounds = expected.as_array();
            match (actual.as_f64(), bounds) {
                (Some(n), Some(b)) => match (b[0].as_f64(), b[1].as_f64()) {
                    (Some(lo), Some(hi)) => n >= lo && n <= hi,
                    _ => false,
                },
                _ => false,
            }
        }
        ConditionOperator::In => expected
            .as_array()
            .map(|list| list.contains(&actual))
            .unwrap_or(false),
        ConditionOperator::NotIn => expected
            .as_array()
            .map(|list| !list.contains(&actual))
            .unwrap_or(true),
    }
}

fn str_pair<'a>(actual: &'a Value, expected: &'a Value) -> Option<(&'a str, &'a str)> {
    actual.as_str().zip(expected.as_str())
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        _ => false,
    }
}

fn numeric_cmp(a: &Value, b: &Value) -> Option<std::cmp::Ordering> {
    a.as_f64()?.partial_cmp(&b.as_f64()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::{Condition, ConditionOperator as Op, FilterGroup};
    use serde_json::json;
    use std::collections::HashMap;
    use uuid::Uuid;

    fn recipient(attrs: &[(&str, Value)]) -> Recipient {
        let attributes: HashMap<String, Value> = attrs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect();
        Recipient {
            id: Uuid::new_v4(),
            attributes,
            email: Some("r@example.com".to_string()),
            phone: None,
            group_jid: None,
        }
    }

    fn pool() -> Vec<Recipient> {
        vec![
            recipient(&[("city", json!("CDMX")), ("age", json!(25)), ("active", json!(true))]),
            recipient(&[("city", json!("CDMX")), ("age", json!(40)), ("active", json!(false))]),
            recipient(&[("city", json!("GDL")), ("age", json!(31)), ("active", json!(true))]),
            recipient(&[("city", json!("MTY")), ("age", json!(19)), ("active", json!(true))]),
        ]
    }

    #[test]
    fn test_and_is_intersection() {
        let evaluator = FilterEvaluator::default();
        let tree = FilterGroup::all(vec![
            Condition::new("city", Op::Equals, json!("CDMX")),
            Condition::new("active", Op::Equals, json!(true)),
        ]);

        let matched = evaluator.evaluate(&pool(), &tree);
        assert_eq!(matched.len(), 1);
        assert_eq!(matched[0].attributes["age"], json!(25));
    }

    #[test]
    fn test_or_is_union() {
        let evaluator = FilterEvaluator::default();
        let tree = FilterGroup::any(vec![
            Condition::new("city", Op::Equals, json!("GDL")),
            Condition::new("age", Op::LessThan, json!(26)),
        ]);

        assert_eq!(evaluator.count(&pool(), &tree), 3);
    }

    #[test]
    fn test_nested_groups() {
        let evaluator = FilterEvaluator::default();
        // active AND (city = GDL OR age between [18, 26])
        let tree = FilterGroup {
            operator: crate::filter::LogicalOperator::And,
            conditions: vec![Condition::new("active", Op::Equals, json!(true))],
            groups: vec![FilterGroup::any(vec![
                Condition::new("city", Op::Equals, json!("GDL")),
                Condition::new("age", Op::Between, json!([18, 26])),
            ])],
        };

        assert_eq!(evaluator.count(&pool(), &tree), 3);
    }

    #[test]
    fn test_disallowed_field_never_affects_result() {
        let evaluator = FilterEvaluator::default();
        let base = FilterGroup::all(vec![Condition::new("active", Op::Equals, json!(true))]);
        let mut injected = base.clone();
        injected
            .conditions
            .push(Condition::new("password_hash", Op::Equals, json!("x")));

        let members = pool();
        assert_eq!(
            evaluator.count(&members, &injected),
            evaluator.count(&members, &base)
        );

        // Same equivalence under OR.
        let base_or = FilterGroup::any(vec![Condition::new("city", Op::Equals, json!("MTY"))]);
        let mut injected_or = base_or.clone();
        injected_or
            .conditions
            .push(Condition::new("internal_score", Op::GreaterThan, json!(0)));
        assert_eq!(
            evaluator.count(&members, &injected_or),
            evaluator.count(&members, &base_or)
        );
    }

    #[test]
    fn test_malformed_between_is_skipped() {
        let evaluator = FilterEvaluator::default();
        let tree = FilterGroup::all(vec![
            Condition::new("age", Op::Between, json!([18])),
            Condition::new("city", Op::Equals, json!("CDMX")),
        ]);

        // The one-element between drops out; only the city condition holds.
        assert_eq!(evaluator.count(&pool(), &tree), 2);
    }

    #[test]
    fn test_string_and_membership_operators() {
        let evaluator = FilterEvaluator::default();
        let members = vec![
            recipient(&[("source", json!("facebook_ads")), ("tags", json!([]))]),
            recipient(&[("source", json!("organic")), ("tags", json!(["vip"]))]),
        ];

        let starts = FilterGroup::all(vec![Condition::new(
            "source",
            Op::StartsWith,
            json!("facebook"),
        )]);
        assert_eq!(evaluator.count(&members, &starts), 1);

        let empty_tags = FilterGroup::all(vec![Condition::new("tags", Op::IsEmpty, json!(null))]);
        assert_eq!(evaluator.count(&members, &empty_tags), 1);

        let in_list = FilterGroup::all(vec![Condition::new(
            "source",
            Op::In,
            json!(["organic", "referral"]),
        )]);
        assert_eq!(evaluator.count(&members, &in_list), 1);
    }

    #[test]
    fn test_missing_attribute_semantics() {
        let evaluator = FilterEvaluator::default();
        let members = vec![recipient(&[("city", json!("CDMX"))])];

        let missing_empty =
            FilterGroup::all(vec![Condition::new("phone", Op::IsEmpty, json!(null))]);
        assert_eq!(evaluator.count(&members, &missing_empty), 1);

        let missing_gt = FilterGroup::all(vec![Condition::new("age", Op::GreaterThan, json!(10))]);
        assert_eq!(evaluator.count(&members, &missing_gt), 0);
    }

    // Scenario: manual-audience campaign filtering on a custom allow-list,
    // 10 users of which 6 are active.
    #[test]
    fn test_count_active_users() {
        let evaluator = FilterEvaluator::new(["activo"]);
        let mut members = Vec::new();
        for i in 0..10 {
            members.push(recipient(&[("activo", json!(i < 6))]));
        }

        let tree = FilterGroup::all(vec![Condition::new("activo", Op::Equals, json!(true))]);
        assert_eq!(evaluator.count(&members, &tree), 6);
    }
}
