//! Token-launch sniper library
//!
//! Watches the chain for newly created tokens, gates candidates through
//! admission heuristics, buys through the swap aggregator, and exits via
//! a scheduled sell queue or mcap-driven exit engines.

pub mod analytics;
pub mod cli;
pub mod config;
pub mod constants;
pub mod engine;
pub mod error;
pub mod janitor;
pub mod limiter;
pub mod price;
pub mod rug;
pub mod stream;
pub mod swap;
pub mod wallet;

// Re-export commonly used types
pub use config::Config;
pub use error::{Error, Result};
