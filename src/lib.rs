pub mod base;
pub mod fabric;
pub mod flit;
pub mod sim;
pub mod subnet;
pub mod timeq;
pub mod traffic;
pub mod ui;

pub use fabric::SuperNetwork;
pub use flit::{Credit, Flit, FlitClass, FlowId};
pub use timeq::Cycle;
