//! Compilation of a binary contraction into a loop nest.
//!
//! The planner classifies every dimension of a contraction by its role
//! (batch, left-only, right-only, contracted), orders the resulting
//! loops, absorbs the trailing contiguous ones into a single primitive
//! call, and decides which leading loops run in parallel.

mod loops;
mod roles;
mod threading;

pub use loops::{
    KernelShape, LoopPlan, LoopSpec, OperandLayout, PackPlan, plan_loops,
    preferred_child_orderings,
};
pub use roles::{DimRoles, classify};
pub use threading::plan_parallel;
