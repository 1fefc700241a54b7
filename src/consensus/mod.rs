//! Consensus module - leader election, difficulty, validation and fork choice

mod difficulty;
mod engine;
mod validation;

pub use difficulty::*;
pub use engine::*;
pub use validation::*;
