pub mod config;
pub mod error;
pub mod evaluator;
pub mod git;
pub mod pipeline;
pub mod queue;
pub mod sandbox;
