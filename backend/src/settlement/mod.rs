//! Settlement Module
//!
//! Two-queue RTGS settlement plus liquidity-saving netting over Queue-2:
//! - [`rtgs`]: gross settlement, one ordered pass over Queue-2 per call
//! - [`lsm`]: bilateral offsetting and cycle settlement
//!
//! # Critical Invariants
//!
//! 1. **Atomicity**: a transaction, or a netted group, settles in full or
//!    not at all
//! 2. **Balance Conservation**: settlement never changes the system total
//! 3. **Queue Accounting**: nothing leaves Queue-2 without a settlement
//!    event naming it

pub mod lsm;
pub mod rtgs;

pub use lsm::{run_lsm_pass, LsmConfig, LsmPassResult, MAX_ROUNDS};
pub use rtgs::{
    process_queue, settle_queued, QueueProcessingResult, SettledTransaction, SettlementError,
};
