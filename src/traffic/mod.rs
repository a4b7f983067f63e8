pub mod config;
pub mod driver;
pub mod logging;
pub mod patterns;

pub use config::TrafficConfig;
pub use driver::{DriverStats, TrafficDriver};
