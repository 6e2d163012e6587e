mod runner;
pub mod shutdown;

pub use runner::{compose_router, run, HttpOptions, RunOptions, ShutdownOptions};
