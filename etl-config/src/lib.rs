//! Configuration types and the hierarchical loader shared by the sync engine and its runner.

mod environment;
mod load;
pub mod shared;

pub use environment::Environment;
pub use load::{Config, LoadConfigError, load_config, load_config_from};
