//! Core graph logic: model, parsing, resolution, ordering, planning, execution.

pub mod error;
pub mod executor;
pub mod graph;
pub mod model;
pub mod parser;
pub mod planner;
pub mod resolver;
pub mod scheduler;
pub mod state;
pub mod types;
