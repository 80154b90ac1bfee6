pub mod collector;
pub mod history;
pub mod snapshot;
