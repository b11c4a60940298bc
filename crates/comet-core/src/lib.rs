pub mod config;
pub mod metrics;
pub mod wire;

pub use config::*;
pub use metrics::*;
