// Tree policy executor
//
// A validated policy ready for per-tick evaluation. Construction is the only
// place validation happens.

use crate::error::ConfigurationError;
use crate::policy::tree::context::EvalContext;
use crate::policy::tree::interpreter::{
    build_bank_decision, build_collateral_decision, build_payment_decision, traverse, EvalError,
};
use crate::policy::tree::types::{DecisionPath, DecisionTreeDef, TreeKind, TreeNode};
use crate::policy::tree::validation::validate_policy;
use crate::policy::{BankDecision, CollateralDecision, PaymentDecision};
use std::collections::BTreeMap;

/// Result of evaluating one tree: the decision (or runtime error) and the
/// nodes visited on the way
#[derive(Debug, Clone, PartialEq)]
pub struct Evaluation<D> {
    pub decision: Result<D, EvalError>,
    pub path: DecisionPath,
}

type Builder<D> = fn(&TreeNode, &EvalContext, &BTreeMap<String, f64>) -> Result<D, EvalError>;

/// A policy whose trees passed validation
///
/// # Example
///
/// ```rust
/// use rtgs_sim_core::policy::tree::TreePolicy;
///
/// let json = r#"{
///   "policy_id": "always_release",
///   "payment_tree": {"type": "action", "node_id": "A1", "action": "Release"}
/// }"#;
/// let policy = TreePolicy::from_json(json).unwrap();
/// assert_eq!(policy.policy_id(), "always_release");
/// ```
#[derive(Debug, Clone)]
pub struct TreePolicy {
    tree: DecisionTreeDef,
}

impl TreePolicy {
    /// Validate and wrap a definition.
    ///
    /// # Errors
    /// The first validation problem; use
    /// [`validate_policy`](crate::policy::tree::validate_policy) to see all.
    pub fn new(tree: DecisionTreeDef) -> Result<Self, ConfigurationError> {
        if let Err(mut errors) = validate_policy(&tree) {
            return Err(errors.remove(0));
        }
        Ok(Self { tree })
    }

    pub fn from_json(json: &str) -> Result<Self, ConfigurationError> {
        Self::from_json_with_overrides(json, &BTreeMap::new())
    }

    /// Parse, apply parameter overrides, then validate
    pub fn from_json_with_overrides(
        json: &str,
        overrides: &BTreeMap<String, f64>,
    ) -> Result<Self, ConfigurationError> {
        let mut tree: DecisionTreeDef =
            serde_json::from_str(json).map_err(|e| ConfigurationError::PolicyParse(e.to_string()))?;
        for (name, value) in overrides {
            tree.parameters.insert(name.clone(), *value);
        }
        Self::new(tree)
    }

    pub fn policy_id(&self) -> &str {
        &self.tree.policy_id
    }

    pub fn tree(&self) -> &DecisionTreeDef {
        &self.tree
    }

    pub fn has_tree(&self, kind: TreeKind) -> bool {
        self.tree.tree(kind).is_some()
    }

    /// `None` when the policy has no payment tree
    pub fn evaluate_payment(&self, context: &EvalContext) -> Option<Evaluation<PaymentDecision>> {
        self.evaluate(TreeKind::Payment, context, build_payment_decision)
    }

    pub fn evaluate_bank(&self, context: &EvalContext) -> Option<Evaluation<BankDecision>> {
        self.evaluate(TreeKind::Bank, context, build_bank_decision)
    }

    /// `kind` must be one of the collateral kinds
    pub fn evaluate_collateral(
        &self,
        kind: TreeKind,
        context: &EvalContext,
    ) -> Option<Evaluation<CollateralDecision>> {
        match kind {
            TreeKind::StrategicCollateral | TreeKind::EndOfTickCollateral => {
                self.evaluate(kind, context, build_collateral_decision)
            }
            TreeKind::Payment | TreeKind::Bank => None,
        }
    }

    fn evaluate<D>(
        &self,
        kind: TreeKind,
        context: &EvalContext,
        build: Builder<D>,
    ) -> Option<Evaluation<D>> {
        let root = self.tree.tree(kind)?;
        let mut path = Vec::new();
        let decision = traverse(root, context, &self.tree.parameters, &mut path)
            .and_then(|action| build(action, context, &self.tree.parameters));
        Some(Evaluation { decision, path })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::transaction::RtgsPriority;

    fn ctx(pairs: &[(&str, f64)]) -> EvalContext {
        EvalContext::from_fields(pairs.iter().map(|(k, v)| (k.to_string(), *v)).collect())
    }

    const POLICY: &str = r#"{
        "policy_id": "threshold",
        "parameters": {"urgency": 3},
        "payment_tree": {
            "type": "condition", "node_id": "N1",
            "condition": {"op": "<=", "left": {"field": "ticks_to_deadline"}, "right": {"param": "urgency"}},
            "on_true": {"type": "action", "node_id": "A1", "action": "Release",
                        "parameters": {"rtgs_priority": {"value": "Urgent"}}},
            "on_false": {"type": "action", "node_id": "A2", "action": "Hold",
                         "parameters": {"reason": {"value": "NotUrgent"}}}
        }
    }"#;

    #[test]
    fn test_evaluate_payment() {
        let policy = TreePolicy::from_json(POLICY).unwrap();
        let eval = policy
            .evaluate_payment(&ctx(&[("ticks_to_deadline", 2.0)]))
            .unwrap();
        assert_eq!(
            eval.decision,
            Ok(PaymentDecision::Release {
                rtgs_priority: Some(RtgsPriority::Urgent)
            })
        );
        assert_eq!(eval.path, vec!["N1", "A1"]);
    }

    #[test]
    fn test_parameter_override() {
        let mut overrides = BTreeMap::new();
        overrides.insert("urgency".to_string(), 1.0);
        let policy = TreePolicy::from_json_with_overrides(POLICY, &overrides).unwrap();
        let eval = policy
            .evaluate_payment(&ctx(&[("ticks_to_deadline", 2.0)]))
            .unwrap();
        assert_eq!(
            eval.decision,
            Ok(PaymentDecision::Hold {
                reason: "NotUrgent".into()
            })
        );
    }

    #[test]
    fn test_missing_trees_evaluate_to_none() {
        let policy = TreePolicy::from_json(POLICY).unwrap();
        assert!(policy.evaluate_bank(&ctx(&[])).is_none());
        assert!(policy
            .evaluate_collateral(TreeKind::StrategicCollateral, &ctx(&[]))
            .is_none());
        assert!(policy.evaluate_collateral(TreeKind::Payment, &ctx(&[])).is_none());
    }

    #[test]
    fn test_parse_error() {
        assert!(matches!(
            TreePolicy::from_json("{not json"),
            Err(ConfigurationError::PolicyParse(_))
        ));
    }

    #[test]
    fn test_runtime_error_is_reported_with_path() {
        let policy = TreePolicy::from_json(POLICY).unwrap();
        let eval = policy.evaluate_payment(&ctx(&[])).unwrap();
        assert_eq!(
            eval.decision,
            Err(EvalError::FieldNotFound("ticks_to_deadline".into()))
        );
        assert_eq!(eval.path, vec!["N1"]);
    }

    #[test]
    fn test_failed_evaluation_is_cloneable() {
        let policy = TreePolicy::from_json(POLICY).unwrap();
        let eval = policy.evaluate_payment(&ctx(&[])).unwrap();
        let kept = eval.clone();
        assert_eq!(kept, eval);
        assert_eq!(
            kept.decision.unwrap_err().to_string(),
            "Field not found: ticks_to_deadline"
        );
    }
}
