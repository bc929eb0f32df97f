//! Pure reconciliation logic: no I/O, no clocks.

mod planner;
mod validator;

pub use planner::reconcile;
pub use validator::{validate, IssueSeverity, ValidationFailure};
