// Policy DSL decision trees
//
// - types.rs: tree definition (DecisionTreeDef, TreeNode, Expression, ...)
// - context.rs: field values from simulation state
// - interpreter.rs: expression evaluation, traversal, decision building
// - validation.rs: load-time checks
// - executor.rs: TreePolicy, a validated policy ready to evaluate

pub mod context;
pub mod executor;
pub mod interpreter;
pub mod types;
pub mod validation;

pub use context::{is_known_field, ContextError, EvalContext, AGENT_FIELDS, TRANSACTION_FIELDS};
pub use executor::{Evaluation, TreePolicy};
pub use interpreter::{
    build_bank_decision, build_collateral_decision, build_payment_decision, evaluate_computation,
    evaluate_expression, evaluate_value, traverse, EvalError, FLOAT_EPSILON, MAX_TREE_DEPTH,
};
pub use types::{
    ActionType, Computation, DecisionPath, DecisionTreeDef, Expression, TreeKind, TreeNode, Value,
};
pub use validation::{validate_policy, ValidationResult};
