//! Configuration module for Fetchmill
//!
//! Handles loading, parsing, and validating TOML configuration files.
//! Every knob has a default, so an empty file (or no file at all) yields a
//! working configuration. The parsed structs are passed explicitly to the
//! engine constructors; there is no ambient global configuration.
//!
//! # Example
//!
//! ```no_run
//! use fetchmill::config::load_config;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("fetchmill.toml")).unwrap();
//! println!("Workers: {}", config.engine.workers);
//! ```

mod parser;
mod types;

// Re-export types
pub use types::{
    Config, EngineConfig, FetchConfig, RetryConfig, RetryStrategy, StoreBackend, StoreConfig,
};

// Re-export parser functions
pub use parser::{load_config, validate};
