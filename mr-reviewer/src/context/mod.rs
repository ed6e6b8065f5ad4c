//! On-demand code context sent alongside the patch.

pub mod callee;

pub use callee::{CalleeLocator, collect_callee_context, locator_for};
