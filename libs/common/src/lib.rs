//! Shared service plumbing
//!
//! - logging initialisation and runtime level changes
//! - layered configuration loading
//! - shutdown signal handling

pub mod config_loader;
pub mod error;
pub mod logging;
pub mod shutdown;

pub use config_loader::{load_config, load_config_from_file};
pub use error::{Error, Result};
pub use logging::LogConfig;

// Re-export common dependencies
pub use anyhow;
pub use serde;
pub use tokio;
