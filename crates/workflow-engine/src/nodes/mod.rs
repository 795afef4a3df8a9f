//! Built-in node executors
//!
//! The engine ships the control-flow node types every workflow needs: Start,
//! Output, End, Branch and Loop. Domain nodes (models, tools, integrations)
//! are registered by the host through [`crate::registry::NodeRegistry`].

pub mod control;
pub mod loop_node;
