pub mod api;
pub mod config;
pub mod error;
pub mod index;
pub mod log;
pub mod query;
