//! Modbus transport for fieldlink-core
//!
//! Implements [`fieldlink_core::Transport`] on top of `tokio-modbus`.
//! TCP is always available; serial RTU needs the `modbus-rtu` feature.

pub mod client;
pub mod config;
#[cfg(feature = "modbus-rtu")]
pub mod rtu;
pub mod tcp;

use std::sync::Arc;

use fieldlink_core::{ConnectorError, Result, Transport};

pub use config::{ModbusTransportConfig, Parity, SerialConfig, TransportMode};
#[cfg(feature = "modbus-rtu")]
pub use rtu::ModbusRtuTransport;
pub use tcp::ModbusTcpTransport;

/// Build the transport selected by `config.mode`
pub fn from_config(config: &ModbusTransportConfig) -> Result<Arc<dyn Transport>> {
    config.validate()?;
    match config.mode {
        TransportMode::Tcp => Ok(Arc::new(ModbusTcpTransport::new(config.clone()))),
        #[cfg(feature = "modbus-rtu")]
        TransportMode::Rtu => Ok(Arc::new(ModbusRtuTransport::new(config.clone())?)),
        #[cfg(not(feature = "modbus-rtu"))]
        TransportMode::Rtu => Err(ConnectorError::config(
            "RTU transport requires the modbus-rtu feature",
        )),
    }
}
