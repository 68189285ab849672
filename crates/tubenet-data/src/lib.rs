//! Configuration loading for tubenet.
//!
//! A [`NetworkConfig`](tubenet_core::config::NetworkConfig) can be written
//! in RON, TOML or JSON; the format follows the file extension. Every field
//! is optional and falls back to its default.

pub mod config;
pub mod loader;

pub use config::{CONFIG_BASE_NAME, load_config, load_config_from_dir, validate_config};
pub use loader::{DataLoadError, Format};
