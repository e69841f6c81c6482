// Decision tree interpreter
//
// Evaluates expressions, walks a tree to its action node recording the
// decision path, and turns the action node into a typed decision. Nothing
// here touches simulation state.

use crate::models::agent::STATE_REGISTER_PREFIX;
use crate::models::transaction::{RtgsPriority, MAX_PRIORITY};
use crate::policy::tree::context::{ContextError, EvalContext};
use crate::policy::tree::types::{
    ActionType, Computation, DecisionPath, Expression, TreeNode, Value,
};
use crate::policy::{BankDecision, CollateralDecision, PaymentDecision};
use std::collections::BTreeMap;
use thiserror::Error;

/// Runtime evaluation errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum EvalError {
    #[error("Field not found: {0}")]
    FieldNotFound(String),

    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    #[error("Division by zero in computation")]
    DivisionByZero,

    #[error("Invalid value: {0}")]
    InvalidValueType(String),

    #[error("Tree traversal exceeded maximum depth ({max})")]
    ExcessiveDepth { max: usize },

    #[error("Invalid action parameter '{name}': {reason}")]
    InvalidActionParameter { name: String, reason: String },

    #[error("Action {action} cannot produce this decision")]
    UnexpectedAction { action: ActionType },
}

impl From<ContextError> for EvalError {
    fn from(err: ContextError) -> Self {
        match err {
            ContextError::FieldNotFound(field) => EvalError::FieldNotFound(field),
        }
    }
}

/// Tolerance for `==`, `!=`, `<=`, `>=` and zero denominators
pub const FLOAT_EPSILON: f64 = 1e-9;

/// Maximum number of condition nodes on any root-to-leaf path
pub const MAX_TREE_DEPTH: usize = 100;

// ============================================================================
// VALUE EVALUATION
// ============================================================================

/// Evaluate a value to a number.
///
/// Boolean literals read as 1.0/0.0; string literals are rejected.
///
/// ```rust
/// use rtgs_sim_core::policy::tree::{evaluate_value, EvalContext, Value};
/// use std::collections::BTreeMap;
///
/// let mut fields = BTreeMap::new();
/// fields.insert("balance".to_string(), 1_000.0);
/// let context = EvalContext::from_fields(fields);
///
/// let value = Value::field("balance");
/// assert_eq!(evaluate_value(&value, &context, &BTreeMap::new()), Ok(1_000.0));
/// ```
pub fn evaluate_value(
    value: &Value,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<f64, EvalError> {
    match value {
        Value::Field { field } => Ok(context.get_field(field)?),

        Value::Param { param } => params
            .get(param)
            .copied()
            .ok_or_else(|| EvalError::ParameterNotFound(param.clone())),

        Value::Literal { value: json_value } => literal_number(json_value)
            .ok_or_else(|| EvalError::InvalidValueType(json_value.to_string())),

        Value::Compute { compute } => evaluate_computation(compute, context, params),
    }
}

/// Numeric reading of a JSON literal
pub(crate) fn literal_number(value: &serde_json::Value) -> Option<f64> {
    if let Some(num) = value.as_f64() {
        Some(num)
    } else {
        value.as_bool().map(|b| if b { 1.0 } else { 0.0 })
    }
}

// ============================================================================
// COMPUTATION EVALUATION
// ============================================================================

pub fn evaluate_computation(
    computation: &Computation,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<f64, EvalError> {
    let eval = |value: &Value| evaluate_value(value, context, params);

    let result = match computation {
        Computation::Add { left, right } => eval(left)? + eval(right)?,
        Computation::Subtract { left, right } => eval(left)? - eval(right)?,
        Computation::Multiply { left, right } => eval(left)? * eval(right)?,
        Computation::Divide { left, right } => {
            let numerator = eval(left)?;
            let denominator = eval(right)?;
            if denominator.abs() < FLOAT_EPSILON {
                return Err(EvalError::DivisionByZero);
            }
            numerator / denominator
        }
        Computation::Max { values } => fold_values(values, context, params, f64::max)?,
        Computation::Min { values } => fold_values(values, context, params, f64::min)?,
        Computation::Ceil { value } => eval(value)?.ceil(),
        Computation::Floor { value } => eval(value)?.floor(),
        Computation::Round { value } => eval(value)?.round(),
        Computation::Abs { value } => eval(value)?.abs(),
        Computation::Clamp { value, min, max } => {
            let v = eval(value)?;
            let lo = eval(min)?;
            let hi = eval(max)?;
            if lo > hi {
                return Err(EvalError::InvalidValueType(format!(
                    "clamp bounds inverted: [{}, {}]",
                    lo, hi
                )));
            }
            v.max(lo).min(hi)
        }
        Computation::SafeDiv {
            numerator,
            denominator,
            default,
        } => {
            let den = eval(denominator)?;
            if den.abs() < FLOAT_EPSILON {
                eval(default)?
            } else {
                eval(numerator)? / den
            }
        }
    };

    if result.is_nan() {
        return Err(EvalError::InvalidValueType("computation produced NaN".into()));
    }
    Ok(result)
}

fn fold_values(
    values: &[Value],
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
    op: fn(f64, f64) -> f64,
) -> Result<f64, EvalError> {
    let mut iter = values.iter();
    let first = iter
        .next()
        .ok_or_else(|| EvalError::InvalidValueType("empty value list".into()))?;
    let mut acc = evaluate_value(first, context, params)?;
    for value in iter {
        acc = op(acc, evaluate_value(value, context, params)?);
    }
    Ok(acc)
}

// ============================================================================
// EXPRESSION EVALUATION
// ============================================================================

pub fn evaluate_expression(
    expr: &Expression,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<bool, EvalError> {
    let pair = |left: &Value, right: &Value| -> Result<(f64, f64), EvalError> {
        Ok((
            evaluate_value(left, context, params)?,
            evaluate_value(right, context, params)?,
        ))
    };

    match expr {
        Expression::Equal { left, right } => {
            let (l, r) = pair(left, right)?;
            Ok(approx_eq(l, r))
        }
        Expression::NotEqual { left, right } => {
            let (l, r) = pair(left, right)?;
            Ok(!approx_eq(l, r))
        }
        Expression::LessThan { left, right } => {
            let (l, r) = pair(left, right)?;
            Ok(l < r && !approx_eq(l, r))
        }
        Expression::LessOrEqual { left, right } => {
            let (l, r) = pair(left, right)?;
            Ok(l <= r || approx_eq(l, r))
        }
        Expression::GreaterThan { left, right } => {
            let (l, r) = pair(left, right)?;
            Ok(l > r && !approx_eq(l, r))
        }
        Expression::GreaterOrEqual { left, right } => {
            let (l, r) = pair(left, right)?;
            Ok(l >= r || approx_eq(l, r))
        }
        Expression::And { conditions } => {
            for condition in conditions {
                if !evaluate_expression(condition, context, params)? {
                    return Ok(false);
                }
            }
            Ok(true)
        }
        Expression::Or { conditions } => {
            for condition in conditions {
                if evaluate_expression(condition, context, params)? {
                    return Ok(true);
                }
            }
            Ok(false)
        }
        Expression::Not { condition } => Ok(!evaluate_expression(condition, context, params)?),
    }
}

fn approx_eq(a: f64, b: f64) -> bool {
    // infinities compare exactly
    a == b || (a - b).abs() < FLOAT_EPSILON
}

// ============================================================================
// TREE TRAVERSAL
// ============================================================================

/// Walk from `root` to an action node.
///
/// Every visited node id is appended to `path`, including the action node,
/// so on error `path` holds the nodes visited before the failure.
pub fn traverse<'a>(
    root: &'a TreeNode,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
    path: &mut DecisionPath,
) -> Result<&'a TreeNode, EvalError> {
    let mut node = root;
    let mut depth = 0;
    loop {
        path.push(node.node_id().to_string());
        match node {
            TreeNode::Action { .. } => return Ok(node),
            TreeNode::Condition {
                condition,
                on_true,
                on_false,
                ..
            } => {
                depth += 1;
                if depth > MAX_TREE_DEPTH {
                    return Err(EvalError::ExcessiveDepth {
                        max: MAX_TREE_DEPTH,
                    });
                }
                node = if evaluate_expression(condition, context, params)? {
                    on_true
                } else {
                    on_false
                };
            }
        }
    }
}

// ============================================================================
// ACTION PARAMETERS
// ============================================================================

fn action_parts(node: &TreeNode) -> (ActionType, Option<&BTreeMap<String, Value>>) {
    match node {
        TreeNode::Action {
            action, parameters, ..
        } => (*action, Some(parameters)),
        // traverse only returns action nodes
        TreeNode::Condition { .. } => (ActionType::NoAction, None),
    }
}

fn invalid(name: &str, reason: impl Into<String>) -> EvalError {
    EvalError::InvalidActionParameter {
        name: name.to_string(),
        reason: reason.into(),
    }
}

fn number_param(
    parameters: &BTreeMap<String, Value>,
    name: &str,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<Option<f64>, EvalError> {
    match parameters.get(name) {
        None => Ok(None),
        Some(value) => {
            let number = evaluate_value(value, context, params)?;
            if !number.is_finite() {
                return Err(invalid(name, format!("not finite: {}", number)));
            }
            Ok(Some(number))
        }
    }
}

fn required_number(
    parameters: &BTreeMap<String, Value>,
    name: &str,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<f64, EvalError> {
    number_param(parameters, name, context, params)?.ok_or_else(|| invalid(name, "missing"))
}

/// Non-negative amount in cents, rounded to the nearest cent
fn amount_param(
    parameters: &BTreeMap<String, Value>,
    name: &str,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<i64, EvalError> {
    let raw = required_number(parameters, name, context, params)?;
    if raw < 0.0 {
        return Err(invalid(name, format!("negative amount {}", raw)));
    }
    if raw >= i64::MAX as f64 {
        return Err(invalid(name, format!("amount {} out of range", raw)));
    }
    Ok(raw.round() as i64)
}

fn string_param(parameters: &BTreeMap<String, Value>, name: &str) -> Result<Option<String>, EvalError> {
    match parameters.get(name) {
        None => Ok(None),
        Some(Value::Literal { value }) => value
            .as_str()
            .map(|s| Some(s.to_string()))
            .ok_or_else(|| invalid(name, "expected a string literal")),
        Some(_) => Err(invalid(name, "expected a string literal")),
    }
}

fn string_list_param(
    parameters: &BTreeMap<String, Value>,
    name: &str,
) -> Result<Option<Vec<String>>, EvalError> {
    match parameters.get(name) {
        None => Ok(None),
        Some(Value::Literal {
            value: serde_json::Value::Array(items),
        }) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(str::to_string)
                    .ok_or_else(|| invalid(name, "expected a list of strings"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some),
        Some(_) => Err(invalid(name, "expected a list of strings")),
    }
}

/// `rtgs_priority` accepts a band name or a 0-10 internal priority
fn rtgs_priority_param(
    parameters: &BTreeMap<String, Value>,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<Option<RtgsPriority>, EvalError> {
    const NAME: &str = "rtgs_priority";
    match parameters.get(NAME) {
        None => Ok(None),
        Some(Value::Literal { value }) if value.is_string() => {
            let text = value.as_str().unwrap_or_default();
            text.parse::<RtgsPriority>()
                .map(Some)
                .map_err(|_| invalid(NAME, format!("unknown RTGS priority '{}'", text)))
        }
        Some(_) => {
            let raw = required_number(parameters, NAME, context, params)?;
            if !(0.0..=MAX_PRIORITY as f64).contains(&raw) {
                return Err(invalid(NAME, format!("priority {} out of range", raw)));
            }
            Ok(Some(RtgsPriority::from_internal(raw.round() as u8)))
        }
    }
}

fn register_key_param(parameters: &BTreeMap<String, Value>) -> Result<String, EvalError> {
    let key = string_param(parameters, "key")?.ok_or_else(|| invalid("key", "missing"))?;
    if !key.starts_with(STATE_REGISTER_PREFIX) {
        return Err(invalid("key", format!("'{}' must start with {}", key, STATE_REGISTER_PREFIX)));
    }
    Ok(key)
}

fn reason_param(parameters: &BTreeMap<String, Value>, default: &str) -> Result<String, EvalError> {
    Ok(string_param(parameters, "reason")?.unwrap_or_else(|| default.to_string()))
}

// ============================================================================
// DECISION BUILDING
// ============================================================================

pub fn build_payment_decision(
    node: &TreeNode,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<PaymentDecision, EvalError> {
    let (action, parameters) = action_parts(node);
    let empty = BTreeMap::new();
    let parameters = parameters.unwrap_or(&empty);

    match action {
        ActionType::Release => Ok(PaymentDecision::Release {
            rtgs_priority: rtgs_priority_param(parameters, context, params)?,
        }),
        ActionType::ReleaseWithCredit => Ok(PaymentDecision::ReleaseWithCredit {
            rtgs_priority: rtgs_priority_param(parameters, context, params)?,
        }),
        ActionType::Hold => Ok(PaymentDecision::Hold {
            reason: reason_param(parameters, "PolicyHold")?,
        }),
        ActionType::Drop => Ok(PaymentDecision::Drop {
            reason: reason_param(parameters, "PolicyDrop")?,
        }),
        ActionType::Split => {
            let raw = required_number(parameters, "num_splits", context, params)?;
            let num_splits = raw.round();
            if num_splits < 2.0 {
                return Err(invalid("num_splits", format!("must be at least 2, got {}", raw)));
            }
            if num_splits > u32::MAX as f64 {
                return Err(invalid("num_splits", format!("{} out of range", raw)));
            }
            Ok(PaymentDecision::Split {
                num_splits: num_splits as usize,
            })
        }
        ActionType::Reprioritize => {
            let raw = required_number(parameters, "new_priority", context, params)?;
            Ok(PaymentDecision::Reprioritize {
                new_priority: raw.round().clamp(0.0, MAX_PRIORITY as f64) as u8,
            })
        }
        other => Err(EvalError::UnexpectedAction { action: other }),
    }
}

pub fn build_bank_decision(
    node: &TreeNode,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<BankDecision, EvalError> {
    let (action, parameters) = action_parts(node);
    let empty = BTreeMap::new();
    let parameters = parameters.unwrap_or(&empty);

    match action {
        ActionType::SetReleaseBudget => {
            let max_value = amount_param(parameters, "max_value", context, params)?;
            let max_per_counterparty = match parameters.get("max_per_counterparty") {
                Some(_) => Some(amount_param(parameters, "max_per_counterparty", context, params)?),
                None => None,
            };
            Ok(BankDecision::SetReleaseBudget {
                max_value,
                focus_counterparties: string_list_param(parameters, "focus_counterparties")?,
                max_per_counterparty,
            })
        }
        ActionType::SetState => Ok(BankDecision::SetState {
            key: register_key_param(parameters)?,
            value: required_number(parameters, "value", context, params)?,
            reason: reason_param(parameters, "SetState")?,
        }),
        ActionType::AddState => Ok(BankDecision::AddState {
            key: register_key_param(parameters)?,
            delta: required_number(parameters, "value", context, params)?,
            reason: reason_param(parameters, "AddState")?,
        }),
        ActionType::NoAction => Ok(BankDecision::NoAction),
        other => Err(EvalError::UnexpectedAction { action: other }),
    }
}

pub fn build_collateral_decision(
    node: &TreeNode,
    context: &EvalContext,
    params: &BTreeMap<String, f64>,
) -> Result<CollateralDecision, EvalError> {
    let (action, parameters) = action_parts(node);
    let empty = BTreeMap::new();
    let parameters = parameters.unwrap_or(&empty);

    match action {
        ActionType::PostCollateral => {
            let auto_withdraw_after_ticks =
                match number_param(parameters, "auto_withdraw_after_ticks", context, params)? {
                    Some(raw) if raw >= 1.0 => Some(raw.round() as usize),
                    Some(raw) => {
                        return Err(invalid(
                            "auto_withdraw_after_ticks",
                            format!("must be at least 1, got {}", raw),
                        ))
                    }
                    None => None,
                };
            Ok(CollateralDecision::Post {
                amount: amount_param(parameters, "amount", context, params)?,
                reason: reason_param(parameters, "PolicyPost")?,
                auto_withdraw_after_ticks,
            })
        }
        ActionType::WithdrawCollateral => Ok(CollateralDecision::Withdraw {
            amount: amount_param(parameters, "amount", context, params)?,
            reason: reason_param(parameters, "PolicyWithdraw")?,
        }),
        ActionType::HoldCollateral => Ok(CollateralDecision::Hold),
        other => Err(EvalError::UnexpectedAction { action: other }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ctx(pairs: &[(&str, f64)]) -> EvalContext {
        EvalContext::from_fields(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    fn no_params() -> BTreeMap<String, f64> {
        BTreeMap::new()
    }

    fn node(value: serde_json::Value) -> TreeNode {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_arithmetic() {
        let c = ctx(&[("balance", 100.0)]);
        let comp: Computation = serde_json::from_value(json!({
            "op": "+",
            "left": {"field": "balance"},
            "right": {"compute": {"op": "*", "left": {"value": 2}, "right": {"value": 3.5}}}
        }))
        .unwrap();
        assert_eq!(evaluate_computation(&comp, &c, &no_params()), Ok(107.0));
    }

    #[test]
    fn test_division_by_zero() {
        let c = ctx(&[("zero", 0.0)]);
        let comp: Computation = serde_json::from_value(json!({
            "op": "/", "left": {"value": 1}, "right": {"field": "zero"}
        }))
        .unwrap();
        assert_eq!(
            evaluate_computation(&comp, &c, &no_params()),
            Err(EvalError::DivisionByZero)
        );

        let safe: Computation = serde_json::from_value(json!({
            "op": "div0", "numerator": {"value": 1}, "denominator": {"field": "zero"},
            "default": {"value": -1}
        }))
        .unwrap();
        assert_eq!(evaluate_computation(&safe, &c, &no_params()), Ok(-1.0));
    }

    #[test]
    fn test_min_max_clamp() {
        let c = ctx(&[("x", 15.0)]);
        let clamp: Computation = serde_json::from_value(json!({
            "op": "clamp", "value": {"field": "x"}, "min": {"value": 0}, "max": {"value": 10}
        }))
        .unwrap();
        assert_eq!(evaluate_computation(&clamp, &c, &no_params()), Ok(10.0));

        let max: Computation = serde_json::from_value(json!({
            "op": "max", "values": [{"value": 1}, {"field": "x"}, {"value": 3}]
        }))
        .unwrap();
        assert_eq!(evaluate_computation(&max, &c, &no_params()), Ok(15.0));

        let empty: Computation = serde_json::from_value(json!({"op": "min", "values": []})).unwrap();
        assert!(evaluate_computation(&empty, &c, &no_params()).is_err());
    }

    #[test]
    fn test_comparisons_use_epsilon() {
        let c = ctx(&[("a", 0.1 + 0.2)]);
        let eq: Expression = serde_json::from_value(json!({
            "op": "==", "left": {"field": "a"}, "right": {"value": 0.3}
        }))
        .unwrap();
        assert_eq!(evaluate_expression(&eq, &c, &no_params()), Ok(true));

        let lt: Expression = serde_json::from_value(json!({
            "op": "<", "left": {"field": "a"}, "right": {"value": 0.3}
        }))
        .unwrap();
        assert_eq!(evaluate_expression(&lt, &c, &no_params()), Ok(false));
    }

    #[test]
    fn test_logical_short_circuit() {
        let c = ctx(&[("x", 1.0)]);
        // second operand references a missing field; short-circuit skips it
        let or: Expression = serde_json::from_value(json!({
            "op": "or",
            "conditions": [
                {"op": "==", "left": {"field": "x"}, "right": {"value": 1}},
                {"op": "==", "left": {"field": "missing"}, "right": {"value": 1}}
            ]
        }))
        .unwrap();
        assert_eq!(evaluate_expression(&or, &c, &no_params()), Ok(true));

        let and: Expression = serde_json::from_value(json!({
            "op": "and",
            "conditions": [
                {"op": "==", "left": {"field": "x"}, "right": {"value": 1}},
                {"op": "==", "left": {"field": "missing"}, "right": {"value": 1}}
            ]
        }))
        .unwrap();
        assert_eq!(
            evaluate_expression(&and, &c, &no_params()),
            Err(EvalError::FieldNotFound("missing".into()))
        );
    }

    #[test]
    fn test_traverse_records_path() {
        let tree = node(json!({
            "type": "condition", "node_id": "N1",
            "condition": {"op": ">", "left": {"field": "balance"}, "right": {"param": "floor"}},
            "on_true": {
                "type": "condition", "node_id": "N2",
                "condition": {"op": "<", "left": {"field": "ticks_to_deadline"}, "right": {"value": 3}},
                "on_true": {"type": "action", "node_id": "A1", "action": "Release"},
                "on_false": {"type": "action", "node_id": "A2", "action": "Hold"}
            },
            "on_false": {"type": "action", "node_id": "A3", "action": "Hold"}
        }));
        let mut params = BTreeMap::new();
        params.insert("floor".to_string(), 50.0);
        let c = ctx(&[("balance", 100.0), ("ticks_to_deadline", 2.0)]);

        let mut path = Vec::new();
        let action = traverse(&tree, &c, &params, &mut path).unwrap();
        assert_eq!(action.node_id(), "A1");
        assert_eq!(path, vec!["N1", "N2", "A1"]);
    }

    #[test]
    fn test_traverse_error_keeps_partial_path() {
        let tree = node(json!({
            "type": "condition", "node_id": "N1",
            "condition": {"op": ">", "left": {"field": "nope"}, "right": {"value": 0}},
            "on_true": {"type": "action", "node_id": "A1", "action": "Release"},
            "on_false": {"type": "action", "node_id": "A2", "action": "Hold"}
        }));
        let mut path = Vec::new();
        assert!(traverse(&tree, &ctx(&[]), &no_params(), &mut path).is_err());
        assert_eq!(path, vec!["N1"]);
    }

    #[test]
    fn test_build_release_with_priority() {
        let action = node(json!({
            "type": "action", "node_id": "A1", "action": "Release",
            "parameters": {"rtgs_priority": {"value": "HighlyUrgent"}}
        }));
        assert_eq!(
            build_payment_decision(&action, &ctx(&[]), &no_params()),
            Ok(PaymentDecision::Release {
                rtgs_priority: Some(RtgsPriority::HighlyUrgent)
            })
        );
    }

    #[test]
    fn test_build_split_requires_two() {
        let action = node(json!({
            "type": "action", "node_id": "A1", "action": "Split",
            "parameters": {"num_splits": {"value": 1}}
        }));
        assert!(matches!(
            build_payment_decision(&action, &ctx(&[]), &no_params()),
            Err(EvalError::InvalidActionParameter { .. })
        ));
    }

    #[test]
    fn test_build_bank_budget() {
        let action = node(json!({
            "type": "action", "node_id": "B1", "action": "SetReleaseBudget",
            "parameters": {
                "max_value": {"compute": {"op": "*", "left": {"field": "balance"}, "right": {"value": 0.5}}},
                "focus_counterparties": {"value": ["B", "C"]}
            }
        }));
        let decision = build_bank_decision(&action, &ctx(&[("balance", 1_001.0)]), &no_params());
        assert_eq!(
            decision,
            Ok(BankDecision::SetReleaseBudget {
                max_value: 501,
                focus_counterparties: Some(vec!["B".into(), "C".into()]),
                max_per_counterparty: None,
            })
        );
    }

    #[test]
    fn test_build_state_rejects_bad_key() {
        let action = node(json!({
            "type": "action", "node_id": "B1", "action": "SetState",
            "parameters": {"key": {"value": "counter"}, "value": {"value": 1}}
        }));
        assert!(build_bank_decision(&action, &ctx(&[]), &no_params()).is_err());
    }

    #[test]
    fn test_build_collateral_post() {
        let action = node(json!({
            "type": "action", "node_id": "C1", "action": "PostCollateral",
            "parameters": {
                "amount": {"field": "queue1_liquidity_gap"},
                "reason": {"value": "cover gap"},
                "auto_withdraw_after_ticks": {"value": 5}
            }
        }));
        assert_eq!(
            build_collateral_decision(&action, &ctx(&[("queue1_liquidity_gap", 250.0)]), &no_params()),
            Ok(CollateralDecision::Post {
                amount: 250,
                reason: "cover gap".into(),
                auto_withdraw_after_ticks: Some(5),
            })
        );
    }

    #[test]
    fn test_wrong_vocabulary_is_error() {
        let action = node(json!({"type": "action", "node_id": "A1", "action": "Release"}));
        assert_eq!(
            build_bank_decision(&action, &ctx(&[]), &no_params()),
            Err(EvalError::UnexpectedAction {
                action: ActionType::Release
            })
        );
    }
}
