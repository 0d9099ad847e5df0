//! # greentrace-state — Credit Lifecycle
//!
//! Runtime-checked state machines for carbon credits. A credit's holding
//! status moves one way (`issued → transferred → retired`, or straight to
//! `retired`), and its verification status is decided exactly once.
//!
//! Transitions are methods on [`CarbonCredit`] that validate the current
//! state, append a [`CreditTransitionRecord`], and return a [`CreditError`]
//! without mutating anything when the move is not allowed.

pub mod credit;

pub use credit::{
    validate_amount, CarbonCredit, CreditError, CreditStatus, CreditTransition,
    CreditTransitionRecord, NewCredit, VerificationStatus,
};
