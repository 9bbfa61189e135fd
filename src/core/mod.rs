//! Core configuration and error types.
//!
//! - `config` - Configuration parsing and validation
//! - `error` - Error taxonomy for the subscription index

pub mod config;
pub mod error;

pub use config::*;
pub use error::*;
