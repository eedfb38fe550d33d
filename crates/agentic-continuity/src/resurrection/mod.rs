//! Resurrection — gated recovery of a snapshot into a running instance.

pub mod engine;
pub mod types;

pub use engine::ResurrectionEngine;
pub use types::{
    ReceiptId, ResurrectionFailure, ResurrectionOutcome, ResurrectionReceipt,
    ResurrectionRequest, ResurrectionState,
};
