//! Configuration re-exported at the crate root.
//!
//! [`DatabaseConfig::load`] reads the `[database]` section of
//! `config/config.toml`, then `KEELSON__DATABASE__*` environment variables.

pub use crate::pool::config::*;
