pub mod advice;
pub mod tracker;

pub use advice::AdviceGenerator;
pub use tracker::{AdviceExample, AdviceKind, RewardEntry, RewardTracker};
