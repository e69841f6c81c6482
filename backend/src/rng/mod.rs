//! Deterministic random number generation
//!
//! All randomness in the engine goes through [`RngManager`]; there is no
//! global generator.

mod xorshift;

pub use xorshift::RngManager;
