pub mod aggregate;
pub mod config;
pub mod error;
pub mod hub;
pub mod probe;
pub mod server;
pub mod system;
