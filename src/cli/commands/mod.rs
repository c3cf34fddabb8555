pub mod analyze;
pub mod cleanup;
pub mod config;
pub mod history;
pub mod stats;
