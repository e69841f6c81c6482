//! Built-in policies
//!
//! Each preset is an ordinary decision tree, so built-in and user policies
//! go through the same interpreter and produce decision paths the same way.
//!
//! - **FIFO**: release everything immediately.
//! - **Deadline**: release when urgent (`ticks_to_deadline <= urgency_threshold`)
//!   or when the payment is affordable; otherwise hold.
//! - **LiquidityAware**: release urgent payments regardless; otherwise release
//!   only while the remaining liquidity stays at or above `target_buffer`.

use crate::error::ConfigurationError;
use crate::policy::tree::DecisionTreeDef;
use serde_json::json;

fn from_json(value: serde_json::Value) -> Result<DecisionTreeDef, ConfigurationError> {
    serde_json::from_value(value).map_err(|e| ConfigurationError::PolicyParse(e.to_string()))
}

pub fn fifo() -> Result<DecisionTreeDef, ConfigurationError> {
    from_json(json!({
        "policy_id": "fifo",
        "description": "Release every transaction as soon as it is in Queue-1",
        "payment_tree": {"type": "action", "node_id": "fifo_release", "action": "Release"}
    }))
}

pub fn deadline(urgency_threshold: usize) -> Result<DecisionTreeDef, ConfigurationError> {
    from_json(json!({
        "policy_id": "deadline",
        "description": "Release urgent or affordable transactions",
        "parameters": {"urgency_threshold": urgency_threshold as f64},
        "payment_tree": {
            "type": "condition",
            "node_id": "deadline_is_urgent",
            "condition": {
                "op": "<=",
                "left": {"field": "ticks_to_deadline"},
                "right": {"param": "urgency_threshold"}
            },
            "on_true": {
                "type": "action",
                "node_id": "deadline_release_urgent",
                "action": "Release",
                "parameters": {"rtgs_priority": {"value": "Urgent"}}
            },
            "on_false": {
                "type": "condition",
                "node_id": "deadline_is_affordable",
                "condition": {
                    "op": ">=",
                    "left": {"field": "effective_liquidity"},
                    "right": {"field": "remaining_amount"}
                },
                "on_true": {"type": "action", "node_id": "deadline_release", "action": "Release"},
                "on_false": {
                    "type": "action",
                    "node_id": "deadline_hold",
                    "action": "Hold",
                    "parameters": {"reason": {"value": "InsufficientLiquidity"}}
                }
            }
        }
    }))
}

pub fn liquidity_aware(
    target_buffer: i64,
    urgency_threshold: usize,
) -> Result<DecisionTreeDef, ConfigurationError> {
    from_json(json!({
        "policy_id": "liquidity_aware",
        "description": "Preserve a liquidity buffer unless the payment is urgent",
        "parameters": {
            "target_buffer": target_buffer as f64,
            "urgency_threshold": urgency_threshold as f64
        },
        "payment_tree": {
            "type": "condition",
            "node_id": "la_is_urgent",
            "condition": {
                "op": "<=",
                "left": {"field": "ticks_to_deadline"},
                "right": {"param": "urgency_threshold"}
            },
            "on_true": {
                "type": "action",
                "node_id": "la_release_urgent",
                "action": "Release",
                "parameters": {"rtgs_priority": {"value": "Urgent"}}
            },
            "on_false": {
                "type": "condition",
                "node_id": "la_keeps_buffer",
                "condition": {
                    "op": ">=",
                    "left": {"field": "liquidity_after_release"},
                    "right": {"param": "target_buffer"}
                },
                "on_true": {"type": "action", "node_id": "la_release", "action": "Release"},
                "on_false": {
                    "type": "action",
                    "node_id": "la_hold",
                    "action": "Hold",
                    "parameters": {"reason": {"value": "BufferProtection"}}
                }
            }
        }
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::policy::tree::{validate_policy, EvalContext, TreePolicy};
    use crate::policy::PaymentDecision;

    fn ctx(pairs: &[(&str, f64)]) -> EvalContext {
        EvalContext::from_fields(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    #[test]
    fn test_presets_validate() {
        assert_eq!(validate_policy(&fifo().unwrap()), Ok(()));
        assert_eq!(validate_policy(&deadline(5).unwrap()), Ok(()));
        assert_eq!(validate_policy(&liquidity_aware(1_000, 5).unwrap()), Ok(()));
    }

    #[test]
    fn test_deadline_holds_unaffordable_non_urgent() {
        let policy = TreePolicy::new(deadline(3).unwrap()).unwrap();
        let eval = policy
            .evaluate_payment(&ctx(&[
                ("ticks_to_deadline", 10.0),
                ("effective_liquidity", 50.0),
                ("remaining_amount", 100.0),
            ]))
            .unwrap();
        assert!(matches!(eval.decision, Ok(PaymentDecision::Hold { .. })));
        assert_eq!(
            eval.path,
            vec!["deadline_is_urgent", "deadline_is_affordable", "deadline_hold"]
        );
    }

    #[test]
    fn test_liquidity_aware_releases_when_buffer_kept() {
        let policy = TreePolicy::new(liquidity_aware(100, 2).unwrap()).unwrap();
        let eval = policy
            .evaluate_payment(&ctx(&[
                ("ticks_to_deadline", 10.0),
                ("liquidity_after_release", 100.0),
            ]))
            .unwrap();
        assert_eq!(
            eval.decision,
            Ok(PaymentDecision::Release {
                rtgs_priority: None
            })
        );
    }
}
