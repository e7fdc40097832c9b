//! CLI command implementations

pub mod nodes;
pub mod status;
pub mod usage;
