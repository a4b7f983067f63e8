pub mod module;
pub mod port;
