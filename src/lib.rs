pub mod config;
pub mod kafka;
pub mod shutdown;
