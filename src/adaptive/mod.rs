mod driver;
mod runner;
mod strategy;

pub use driver::{AdaptiveDriver, AdaptiveOutcome, IterationRecord, LoadRunner};
pub use runner::PoolRunner;
pub use strategy::{from_config, BinarySearch, LinearDecrease, SearchStep, SearchStrategy};
