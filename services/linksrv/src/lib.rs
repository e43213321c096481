//! linksrv - field device polling service
//!
//! Loads a device description, polls the devices through the Modbus
//! transport and logs every state change the engine publishes.

pub mod cli;
pub mod config;
pub mod consumer;
pub mod error;
pub mod service;

pub use cli::Args;
pub use config::LinksrvConfig;
pub use error::{LinksrvError, Result};
