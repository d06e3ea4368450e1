//! # Transformation Checkers
//!
//! Two ways of checking that a change preserves observable behavior:
//!
//! - [`reorder`]: swapping two adjacent instructions, checked statically
//!   against a commute table and dynamically by exploring both orders
//! - [`twin`]: running one program under two allocator placements in
//!   lock-step to see whether its behavior depends on concrete addresses

pub mod reorder;
pub mod twin;

pub use reorder::{
    check_swap, has_data_dependency, may_commute, program_wellformed, reorderable_pairs,
    swap_at, validate_swap, ReorderReport, ReorderVerdict,
};
pub use twin::{compare, compare_configs, AddressPolicy, Divergence, TwinVerdict};
