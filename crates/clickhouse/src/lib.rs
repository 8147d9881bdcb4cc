//! ClickHouse execution backend for the query engine.

pub mod client;
pub mod config;
pub mod execute;
pub mod health;

pub use client::*;
pub use config::*;
pub use execute::encode_param;
