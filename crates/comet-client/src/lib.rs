pub mod connection;
pub mod controller;
pub mod sender;

pub use controller::Controller;
