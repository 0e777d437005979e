//! Physical planning: the operator tree, its cursors, the planner and the
//! cost model.

pub mod cost;
pub mod cursors;
pub mod physical;
pub mod planner;
pub mod pretty;

pub use physical::{Cursor, LogicalOperator};
pub use planner::make_plan;
