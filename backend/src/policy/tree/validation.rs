// Decision tree validation
//
// Run once when a policy is loaded; a policy that passes never fails for
// structural reasons at evaluation time. Checks:
// - node id uniqueness across all trees of the policy
// - depth limit
// - action vocabulary per tree kind
// - field and parameter references
// - literal action parameters
// - division by a literal zero

use crate::error::ConfigurationError;
use crate::models::agent::STATE_REGISTER_PREFIX;
use crate::models::transaction::{RtgsPriority, MAX_PRIORITY};
use crate::policy::tree::context::is_known_field;
use crate::policy::tree::interpreter::{literal_number, MAX_TREE_DEPTH};
use crate::policy::tree::types::{
    ActionType, Computation, DecisionTreeDef, Expression, TreeKind, TreeNode, Value,
};
use std::collections::{BTreeMap, BTreeSet};

pub type ValidationResult = Result<(), Vec<ConfigurationError>>;

/// Validate a whole policy, returning every problem found
pub fn validate_policy(def: &DecisionTreeDef) -> ValidationResult {
    let mut errors = Vec::new();
    let mut seen = BTreeSet::new();
    let mut reported = BTreeSet::new();

    for (kind, root) in def.trees() {
        let mut checker = NodeChecker {
            kind,
            params: &def.parameters,
            errors: &mut errors,
        };
        let mut max_depth = 0;
        let mut stack = vec![(root, 0usize)];

        while let Some((node, depth)) = stack.pop() {
            max_depth = max_depth.max(depth);
            let node_id = node.node_id();
            if !seen.insert(node_id.to_string()) && reported.insert(node_id.to_string()) {
                checker.errors.push(ConfigurationError::DuplicateNodeId {
                    policy_id: def.policy_id.clone(),
                    node_id: node_id.to_string(),
                });
            }

            match node {
                TreeNode::Condition {
                    condition,
                    on_true,
                    on_false,
                    ..
                } => {
                    checker.check_expression(node_id, condition);
                    stack.push((on_false, depth + 1));
                    stack.push((on_true, depth + 1));
                }
                TreeNode::Action {
                    action, parameters, ..
                } => checker.check_action(node_id, *action, parameters),
            }
        }

        if max_depth > MAX_TREE_DEPTH {
            errors.push(ConfigurationError::ExcessiveDepth {
                tree: kind.to_string(),
                depth: max_depth,
                max: MAX_TREE_DEPTH,
            });
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

/// Kinds of value an action parameter takes
#[derive(Clone, Copy, PartialEq)]
enum ParamKind {
    Number,
    Text,
    TextList,
    /// Band name or number
    RtgsPriority,
}

/// `(name, kind, required)` per action
fn action_schema(action: ActionType) -> &'static [(&'static str, ParamKind, bool)] {
    use ParamKind::*;
    match action {
        ActionType::Release | ActionType::ReleaseWithCredit => &[("rtgs_priority", RtgsPriority, false)],
        ActionType::Hold | ActionType::Drop => &[("reason", Text, false)],
        ActionType::Split => &[("num_splits", Number, true)],
        ActionType::Reprioritize => &[("new_priority", Number, true)],
        ActionType::SetReleaseBudget => &[
            ("max_value", Number, true),
            ("focus_counterparties", TextList, false),
            ("max_per_counterparty", Number, false),
        ],
        ActionType::SetState | ActionType::AddState => &[
            ("key", Text, true),
            ("value", Number, true),
            ("reason", Text, false),
        ],
        ActionType::PostCollateral => &[
            ("amount", Number, true),
            ("reason", Text, false),
            ("auto_withdraw_after_ticks", Number, false),
        ],
        ActionType::WithdrawCollateral => &[("amount", Number, true), ("reason", Text, false)],
        ActionType::NoAction | ActionType::HoldCollateral => &[],
    }
}

struct NodeChecker<'a> {
    kind: TreeKind,
    params: &'a BTreeMap<String, f64>,
    errors: &'a mut Vec<ConfigurationError>,
}

impl NodeChecker<'_> {
    fn invalid(&mut self, node_id: &str, name: &str, reason: impl Into<String>) {
        self.errors.push(ConfigurationError::InvalidParameter {
            node_id: node_id.to_string(),
            name: name.to_string(),
            reason: reason.into(),
        });
    }

    fn check_action(&mut self, node_id: &str, action: ActionType, parameters: &BTreeMap<String, Value>) {
        if !self.kind.allows(action) {
            self.errors.push(ConfigurationError::ActionNotAllowed {
                tree: self.kind.to_string(),
                node_id: node_id.to_string(),
                action: action.to_string(),
            });
            return;
        }

        let schema = action_schema(action);
        for (name, kind, required) in schema {
            match parameters.get(*name) {
                None if *required => self.invalid(node_id, name, "missing required parameter"),
                None => {}
                Some(value) => self.check_parameter(node_id, action, name, *kind, value),
            }
        }
        for name in parameters.keys() {
            if !schema.iter().any(|(known, _, _)| *known == name.as_str()) {
                self.invalid(node_id, name, format!("not a parameter of {}", action));
            }
        }
    }

    fn check_parameter(&mut self, node_id: &str, action: ActionType, name: &str, kind: ParamKind, value: &Value) {
        let literal = match value {
            Value::Literal { value } => value,
            computed => {
                if kind == ParamKind::Text || kind == ParamKind::TextList {
                    self.invalid(node_id, name, "must be a literal");
                } else {
                    self.check_value(node_id, computed);
                }
                return;
            }
        };

        match kind {
            ParamKind::Text => {
                let Some(text) = literal.as_str() else {
                    return self.invalid(node_id, name, "expected a string");
                };
                if name == "key" && !text.starts_with(STATE_REGISTER_PREFIX) {
                    self.invalid(
                        node_id,
                        name,
                        format!("register key '{}' must start with {}", text, STATE_REGISTER_PREFIX),
                    );
                }
            }
            ParamKind::TextList => {
                let ok = literal
                    .as_array()
                    .map(|items| items.iter().all(|item| item.is_string()))
                    .unwrap_or(false);
                if !ok {
                    self.invalid(node_id, name, "expected a list of strings");
                }
            }
            ParamKind::RtgsPriority => {
                if let Some(text) = literal.as_str() {
                    if text.parse::<RtgsPriority>().is_err() {
                        self.invalid(node_id, name, format!("unknown RTGS priority '{}'", text));
                    }
                } else {
                    match literal_number(literal) {
                        Some(n) if (0.0..=MAX_PRIORITY as f64).contains(&n) => {}
                        _ => self.invalid(node_id, name, "expected a band name or a priority 0-10"),
                    }
                }
            }
            ParamKind::Number => {
                let Some(number) = literal_number(literal) else {
                    return self.invalid(node_id, name, "expected a number");
                };
                let problem = match (action, name) {
                    (ActionType::Split, "num_splits") if number.round() < 2.0 => Some("must be at least 2"),
                    (ActionType::Reprioritize, "new_priority")
                        if !(0.0..=MAX_PRIORITY as f64).contains(&number) =>
                    {
                        Some("must be within 0-10")
                    }
                    (ActionType::PostCollateral, "auto_withdraw_after_ticks") if number < 1.0 => {
                        Some("must be at least 1")
                    }
                    (_, "amount" | "max_value" | "max_per_counterparty") if number < 0.0 => {
                        Some("must not be negative")
                    }
                    _ => None,
                };
                if let Some(reason) = problem {
                    self.invalid(node_id, name, reason);
                }
            }
        }
    }

    fn check_expression(&mut self, node_id: &str, expr: &Expression) {
        match expr {
            Expression::Equal { left, right }
            | Expression::NotEqual { left, right }
            | Expression::LessThan { left, right }
            | Expression::LessOrEqual { left, right }
            | Expression::GreaterThan { left, right }
            | Expression::GreaterOrEqual { left, right } => {
                self.check_value(node_id, left);
                self.check_value(node_id, right);
            }
            Expression::And { conditions } | Expression::Or { conditions } => {
                for condition in conditions {
                    self.check_expression(node_id, condition);
                }
            }
            Expression::Not { condition } => self.check_expression(node_id, condition),
        }
    }

    /// Numeric value position
    fn check_value(&mut self, node_id: &str, value: &Value) {
        match value {
            Value::Field { field } => {
                if !is_known_field(self.kind, field) {
                    self.errors.push(ConfigurationError::UnknownField {
                        tree: self.kind.to_string(),
                        node_id: node_id.to_string(),
                        field: field.clone(),
                    });
                }
            }
            Value::Param { param } => {
                if !self.params.contains_key(param) {
                    self.errors.push(ConfigurationError::UnknownParameter {
                        node_id: node_id.to_string(),
                        param: param.clone(),
                    });
                }
            }
            Value::Literal { value } => {
                if literal_number(value).is_none() {
                    self.invalid(node_id, "value", format!("{} is not numeric", value));
                }
            }
            Value::Compute { compute } => self.check_computation(node_id, compute),
        }
    }

    fn check_computation(&mut self, node_id: &str, computation: &Computation) {
        match computation {
            Computation::Divide { left, right } => {
                self.check_value(node_id, left);
                self.check_value(node_id, right);
                if self.is_constant_zero(right) {
                    self.errors.push(ConfigurationError::DivisionByZeroRisk {
                        node_id: node_id.to_string(),
                    });
                }
            }
            Computation::Add { left, right }
            | Computation::Subtract { left, right }
            | Computation::Multiply { left, right } => {
                self.check_value(node_id, left);
                self.check_value(node_id, right);
            }
            Computation::Max { values } | Computation::Min { values } => {
                if values.is_empty() {
                    self.invalid(node_id, "values", "min/max needs at least one value");
                }
                for value in values {
                    self.check_value(node_id, value);
                }
            }
            Computation::Ceil { value }
            | Computation::Floor { value }
            | Computation::Round { value }
            | Computation::Abs { value } => self.check_value(node_id, value),
            Computation::Clamp { value, min, max } => {
                self.check_value(node_id, value);
                self.check_value(node_id, min);
                self.check_value(node_id, max);
            }
            Computation::SafeDiv {
                numerator,
                denominator,
                default,
            } => {
                self.check_value(node_id, numerator);
                self.check_value(node_id, denominator);
                self.check_value(node_id, default);
            }
        }
    }

    /// Literal zero, or a parameter whose value is zero
    fn is_constant_zero(&self, value: &Value) -> bool {
        match value {
            Value::Literal { value } => literal_number(value).map(|n| n == 0.0).unwrap_or(false),
            Value::Param { param } => self.params.get(param).map(|n| *n == 0.0).unwrap_or(false),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy(value: serde_json::Value) -> DecisionTreeDef {
        serde_json::from_value(value).unwrap()
    }

    fn release(id: &str) -> serde_json::Value {
        json!({"type": "action", "node_id": id, "action": "Release"})
    }

    #[test]
    fn test_valid_policy() {
        let def = policy(json!({
            "policy_id": "ok",
            "parameters": {"threshold": 5.0},
            "payment_tree": {
                "type": "condition", "node_id": "N1",
                "condition": {"op": "<=", "left": {"field": "ticks_to_deadline"}, "right": {"param": "threshold"}},
                "on_true": release("A1"),
                "on_false": {"type": "action", "node_id": "A2", "action": "Hold"}
            },
            "bank_tree": {"type": "action", "node_id": "B1", "action": "NoAction"}
        }));
        assert_eq!(validate_policy(&def), Ok(()));
    }

    #[test]
    fn test_duplicate_node_id_across_trees() {
        let def = policy(json!({
            "policy_id": "dup",
            "payment_tree": release("N1"),
            "bank_tree": {"type": "action", "node_id": "N1", "action": "NoAction"}
        }));
        let errors = validate_policy(&def).unwrap_err();
        assert_eq!(
            errors,
            vec![ConfigurationError::DuplicateNodeId {
                policy_id: "dup".into(),
                node_id: "N1".into()
            }]
        );
    }

    #[test]
    fn test_action_not_allowed_for_kind() {
        let def = policy(json!({
            "policy_id": "bad",
            "bank_tree": release("B1")
        }));
        let errors = validate_policy(&def).unwrap_err();
        assert!(matches!(errors[0], ConfigurationError::ActionNotAllowed { .. }));
    }

    #[test]
    fn test_transaction_field_not_allowed_in_bank_tree() {
        let def = policy(json!({
            "policy_id": "bad",
            "bank_tree": {
                "type": "condition", "node_id": "B1",
                "condition": {"op": ">", "left": {"field": "amount"}, "right": {"value": 0}},
                "on_true": {"type": "action", "node_id": "B2", "action": "NoAction"},
                "on_false": {"type": "action", "node_id": "B3", "action": "NoAction"}
            }
        }));
        let errors = validate_policy(&def).unwrap_err();
        assert_eq!(
            errors,
            vec![ConfigurationError::UnknownField {
                tree: "bank_tree".into(),
                node_id: "B1".into(),
                field: "amount".into()
            }]
        );
    }

    #[test]
    fn test_unknown_param_and_division_by_zero() {
        let def = policy(json!({
            "policy_id": "bad",
            "parameters": {"zero": 0.0},
            "payment_tree": {
                "type": "condition", "node_id": "N1",
                "condition": {
                    "op": ">",
                    "left": {"compute": {"op": "/", "left": {"field": "balance"}, "right": {"param": "zero"}}},
                    "right": {"param": "missing"}
                },
                "on_true": release("A1"),
                "on_false": release("A2")
            }
        }));
        let errors = validate_policy(&def).unwrap_err();
        assert!(errors.contains(&ConfigurationError::DivisionByZeroRisk { node_id: "N1".into() }));
        assert!(errors.contains(&ConfigurationError::UnknownParameter {
            node_id: "N1".into(),
            param: "missing".into()
        }));
    }

    #[test]
    fn test_invalid_literal_parameters() {
        let def = policy(json!({
            "policy_id": "bad",
            "payment_tree": {"type": "action", "node_id": "A1", "action": "Split",
                             "parameters": {"num_splits": {"value": 1}}},
            "bank_tree": {"type": "action", "node_id": "B1", "action": "SetState",
                          "parameters": {"key": {"value": "counter"}, "value": {"value": 1}}}
        }));
        let errors = validate_policy(&def).unwrap_err();
        assert_eq!(errors.len(), 2);
        assert!(errors
            .iter()
            .all(|e| matches!(e, ConfigurationError::InvalidParameter { .. })));
    }

    #[test]
    fn test_missing_required_parameter() {
        let def = policy(json!({
            "policy_id": "bad",
            "strategic_collateral_tree": {"type": "action", "node_id": "C1", "action": "PostCollateral"}
        }));
        assert!(validate_policy(&def).is_err());
    }

    #[test]
    fn test_excessive_depth() {
        let mut node = TreeNode::Action {
            node_id: "leaf".into(),
            action: ActionType::Hold,
            parameters: BTreeMap::new(),
        };
        for i in 0..=MAX_TREE_DEPTH {
            node = TreeNode::Condition {
                node_id: format!("N{}", i),
                description: String::new(),
                condition: Expression::And { conditions: vec![] },
                on_true: Box::new(node),
                on_false: Box::new(TreeNode::Action {
                    node_id: format!("H{}", i),
                    action: ActionType::Hold,
                    parameters: BTreeMap::new(),
                }),
            };
        }
        let def = DecisionTreeDef {
            version: "1.0".into(),
            policy_id: "deep".into(),
            description: None,
            payment_tree: Some(node),
            bank_tree: None,
            strategic_collateral_tree: None,
            end_of_tick_collateral_tree: None,
            parameters: BTreeMap::new(),
        };
        let errors = validate_policy(&def).unwrap_err();
        assert!(matches!(
            errors[0],
            ConfigurationError::ExcessiveDepth { depth: 101, .. }
        ));
    }
}
