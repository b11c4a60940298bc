pub mod engine;
pub mod http;

pub use engine::{Broker, BrokerError};
