// Policy DSL type definitions
//
// JSON decision tree format. Everything deserializes straight from policy
// JSON; structural checks happen in validation.rs.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// ============================================================================
// DECISION TREE DEFINITION
// ============================================================================

/// Complete policy definition: up to four trees sharing one parameter set.
///
/// Node ids must be unique across all four trees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecisionTreeDef {
    /// Schema version (currently "1.0")
    #[serde(default = "default_version")]
    pub version: String,

    pub policy_id: String,

    #[serde(default)]
    pub description: Option<String>,

    /// Queue-1 release decisions. Without it every transaction is released.
    #[serde(default)]
    pub payment_tree: Option<TreeNode>,

    /// Release budget and state registers, evaluated before payment decisions
    #[serde(default)]
    pub bank_tree: Option<TreeNode>,

    #[serde(default)]
    pub strategic_collateral_tree: Option<TreeNode>,

    #[serde(default)]
    pub end_of_tick_collateral_tree: Option<TreeNode>,

    /// Named constants referenced with `{"param": name}`
    #[serde(default)]
    pub parameters: BTreeMap<String, f64>,
}

fn default_version() -> String {
    "1.0".to_string()
}

impl DecisionTreeDef {
    pub fn tree(&self, kind: TreeKind) -> Option<&TreeNode> {
        match kind {
            TreeKind::Payment => self.payment_tree.as_ref(),
            TreeKind::Bank => self.bank_tree.as_ref(),
            TreeKind::StrategicCollateral => self.strategic_collateral_tree.as_ref(),
            TreeKind::EndOfTickCollateral => self.end_of_tick_collateral_tree.as_ref(),
        }
    }

    /// Present trees with their kind, in evaluation order
    pub fn trees(&self) -> impl Iterator<Item = (TreeKind, &TreeNode)> {
        TreeKind::ALL
            .into_iter()
            .filter_map(move |kind| self.tree(kind).map(|root| (kind, root)))
    }
}

/// The four tree roles
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TreeKind {
    Payment,
    Bank,
    StrategicCollateral,
    EndOfTickCollateral,
}

impl TreeKind {
    pub const ALL: [TreeKind; 4] = [
        TreeKind::Bank,
        TreeKind::Payment,
        TreeKind::StrategicCollateral,
        TreeKind::EndOfTickCollateral,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TreeKind::Payment => "payment_tree",
            TreeKind::Bank => "bank_tree",
            TreeKind::StrategicCollateral => "strategic_collateral_tree",
            TreeKind::EndOfTickCollateral => "end_of_tick_collateral_tree",
        }
    }

    pub fn allowed_actions(&self) -> &'static [ActionType] {
        match self {
            TreeKind::Payment => &[
                ActionType::Release,
                ActionType::ReleaseWithCredit,
                ActionType::Hold,
                ActionType::Drop,
                ActionType::Split,
                ActionType::Reprioritize,
            ],
            TreeKind::Bank => &[
                ActionType::SetReleaseBudget,
                ActionType::SetState,
                ActionType::AddState,
                ActionType::NoAction,
            ],
            TreeKind::StrategicCollateral | TreeKind::EndOfTickCollateral => &[
                ActionType::PostCollateral,
                ActionType::WithdrawCollateral,
                ActionType::HoldCollateral,
            ],
        }
    }

    pub fn allows(&self, action: ActionType) -> bool {
        self.allowed_actions().contains(&action)
    }
}

impl fmt::Display for TreeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// TREE NODES
// ============================================================================

/// A node in the decision tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum TreeNode {
    /// Conditional branch node
    Condition {
        node_id: String,

        #[serde(default)]
        description: String,

        condition: Expression,

        on_true: Box<TreeNode>,

        on_false: Box<TreeNode>,
    },

    /// Terminal action node
    Action {
        node_id: String,

        action: ActionType,

        #[serde(default)]
        parameters: BTreeMap<String, Value>,
    },
}

impl TreeNode {
    pub fn node_id(&self) -> &str {
        match self {
            TreeNode::Condition { node_id, .. } => node_id,
            TreeNode::Action { node_id, .. } => node_id,
        }
    }

    pub fn is_condition(&self) -> bool {
        matches!(self, TreeNode::Condition { .. })
    }

    pub fn is_action(&self) -> bool {
        matches!(self, TreeNode::Action { .. })
    }
}

// ============================================================================
// EXPRESSIONS
// ============================================================================

/// Boolean expression
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Expression {
    /// Equal within epsilon
    #[serde(rename = "==")]
    Equal { left: Value, right: Value },

    #[serde(rename = "!=")]
    NotEqual { left: Value, right: Value },

    #[serde(rename = "<")]
    LessThan { left: Value, right: Value },

    #[serde(rename = "<=")]
    LessOrEqual { left: Value, right: Value },

    #[serde(rename = ">")]
    GreaterThan { left: Value, right: Value },

    #[serde(rename = ">=")]
    GreaterOrEqual { left: Value, right: Value },

    /// Short-circuit; empty list is true
    #[serde(rename = "and")]
    And { conditions: Vec<Expression> },

    /// Short-circuit; empty list is false
    #[serde(rename = "or")]
    Or { conditions: Vec<Expression> },

    #[serde(rename = "not")]
    Not { condition: Box<Expression> },
}

// ============================================================================
// VALUES
// ============================================================================

/// A value in an expression or action parameter
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    /// Context field, e.g. `{"field": "balance"}`
    Field { field: String },

    /// Policy parameter, e.g. `{"param": "urgency_threshold"}`
    Param { param: String },

    /// Literal number or boolean; action parameters also accept strings and
    /// string arrays
    Literal { value: serde_json::Value },

    Compute { compute: Box<Computation> },
}

impl Value {
    pub fn literal(value: impl Into<serde_json::Value>) -> Self {
        Value::Literal {
            value: value.into(),
        }
    }

    pub fn field(name: &str) -> Self {
        Value::Field {
            field: name.to_string(),
        }
    }

    pub fn param(name: &str) -> Self {
        Value::Param {
            param: name.to_string(),
        }
    }
}

// ============================================================================
// COMPUTATIONS
// ============================================================================

/// Arithmetic over values
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op")]
pub enum Computation {
    #[serde(rename = "+")]
    Add { left: Value, right: Value },

    #[serde(rename = "-")]
    Subtract { left: Value, right: Value },

    #[serde(rename = "*")]
    Multiply { left: Value, right: Value },

    /// Runtime error on a zero denominator
    #[serde(rename = "/")]
    Divide { left: Value, right: Value },

    #[serde(rename = "max")]
    Max { values: Vec<Value> },

    #[serde(rename = "min")]
    Min { values: Vec<Value> },

    #[serde(rename = "ceil")]
    Ceil { value: Value },

    #[serde(rename = "floor")]
    Floor { value: Value },

    #[serde(rename = "round")]
    Round { value: Value },

    #[serde(rename = "abs")]
    Abs { value: Value },

    #[serde(rename = "clamp")]
    Clamp { value: Value, min: Value, max: Value },

    /// Division returning `default` when the denominator is zero
    #[serde(rename = "div0")]
    SafeDiv {
        numerator: Value,
        denominator: Value,
        default: Value,
    },
}

// ============================================================================
// ACTIONS
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    // payment tree
    Release,
    ReleaseWithCredit,
    Hold,
    Drop,
    Split,
    Reprioritize,

    // bank tree
    SetReleaseBudget,
    SetState,
    AddState,
    NoAction,

    // collateral trees
    PostCollateral,
    WithdrawCollateral,
    HoldCollateral,
}

impl ActionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::Release => "Release",
            ActionType::ReleaseWithCredit => "ReleaseWithCredit",
            ActionType::Hold => "Hold",
            ActionType::Drop => "Drop",
            ActionType::Split => "Split",
            ActionType::Reprioritize => "Reprioritize",
            ActionType::SetReleaseBudget => "SetReleaseBudget",
            ActionType::SetState => "SetState",
            ActionType::AddState => "AddState",
            ActionType::NoAction => "NoAction",
            ActionType::PostCollateral => "PostCollateral",
            ActionType::WithdrawCollateral => "WithdrawCollateral",
            ActionType::HoldCollateral => "HoldCollateral",
        }
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Ordered node ids visited during one evaluation
pub type DecisionPath = Vec<String>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_node_id_accessor() {
        let action = TreeNode::Action {
            node_id: "A1".to_string(),
            action: ActionType::Release,
            parameters: BTreeMap::new(),
        };
        assert_eq!(action.node_id(), "A1");
        assert!(action.is_action());
        assert!(!action.is_condition());
    }

    #[test]
    fn test_parse_minimal_tree() {
        let json = r#"{
            "version": "1.0",
            "policy_id": "minimal",
            "payment_tree": {
                "node_id": "N1",
                "type": "condition",
                "condition": {
                    "op": ">",
                    "left": {"field": "balance"},
                    "right": {"field": "amount"}
                },
                "on_true": {"node_id": "A1", "type": "action", "action": "Release"},
                "on_false": {"node_id": "A2", "type": "action", "action": "Hold"}
            },
            "parameters": {}
        }"#;

        let tree: DecisionTreeDef = serde_json::from_str(json).unwrap();
        assert_eq!(tree.policy_id, "minimal");
        assert!(tree.payment_tree.as_ref().unwrap().is_condition());
        assert!(tree.bank_tree.is_none());
    }

    #[test]
    fn test_parse_values_and_computations() {
        let json = r#"{
            "op": "and",
            "conditions": [
                {"op": "<=", "left": {"field": "ticks_to_deadline"}, "right": {"param": "urgency"}},
                {"op": ">=", "left": {"compute": {"op": "*", "left": {"field": "balance"}, "right": {"value": 0.5}}},
                 "right": {"value": 100}}
            ]
        }"#;
        let expr: Expression = serde_json::from_str(json).unwrap();
        match expr {
            Expression::And { conditions } => assert_eq!(conditions.len(), 2),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_action_parameters_accept_strings() {
        let json = r#"{
            "node_id": "A1",
            "type": "action",
            "action": "Release",
            "parameters": {"rtgs_priority": {"value": "Urgent"}}
        }"#;
        let node: TreeNode = serde_json::from_str(json).unwrap();
        match node {
            TreeNode::Action { parameters, .. } => {
                assert_eq!(parameters["rtgs_priority"], Value::literal("Urgent"));
            }
            _ => panic!("expected action"),
        }
    }

    #[test]
    fn test_tree_kind_vocabularies_are_disjoint() {
        for a in TreeKind::ALL {
            for b in TreeKind::ALL {
                let collateral_pair = matches!(
                    (a, b),
                    (TreeKind::StrategicCollateral, TreeKind::EndOfTickCollateral)
                        | (TreeKind::EndOfTickCollateral, TreeKind::StrategicCollateral)
                );
                if a == b || collateral_pair {
                    continue;
                }
                assert!(a.allowed_actions().iter().all(|act| !b.allows(*act)));
            }
        }
    }
}
