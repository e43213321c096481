//! Modbus TCP transport
//!
//! Keeps one `tokio-modbus` context per `host:port`, created on first use.
//! Any failure other than a device exception drops the context, so the
//! next request to that endpoint reconnects.

use std::collections::hash_map::{Entry, HashMap};

use async_trait::async_trait;
use fieldlink_core::{DeviceAddress, Transport, TransportError};
use tokio::sync::Mutex;
use tokio::time::timeout;
use tokio_modbus::client::{tcp, Context};
use tokio_modbus::Slave;
use tracing::{debug, info, warn};

use crate::client::{self, Request, Response};
use crate::config::ModbusTransportConfig;

pub struct ModbusTcpTransport {
    config: ModbusTransportConfig,
    connections: Mutex<HashMap<String, Context>>,
}

impl ModbusTcpTransport {
    pub fn new(config: ModbusTransportConfig) -> Self {
        Self {
            config,
            connections: Mutex::new(HashMap::new()),
        }
    }

    /// Number of cached connections
    pub async fn connection_count(&self) -> usize {
        self.connections.lock().await.len()
    }

    async fn connect(&self, endpoint: &str, unit: u8) -> Result<Context, TransportError> {
        debug!("Connecting to Modbus TCP server at {}", endpoint);
        let limit = self.config.connect_timeout();
        let connect = async {
            let mut last_error = None;
            for addr in tokio::net::lookup_host(endpoint)
                .await
                .map_err(client::io_error)?
            {
                match tcp::connect_slave(addr, Slave(unit)).await {
                    Ok(ctx) => return Ok(ctx),
                    Err(e) => last_error = Some(client::io_error(e)),
                }
            }
            Err(last_error.unwrap_or_else(|| {
                TransportError::connection(format!("{} did not resolve to any address", endpoint))
            }))
        };

        match timeout(limit, connect).await {
            Ok(Ok(ctx)) => {
                info!("Connected to Modbus TCP server at {}", endpoint);
                Ok(ctx)
            },
            Ok(Err(e)) => Err(e),
            Err(_) => Err(TransportError::timeout(format!(
                "connection to {} timed out after {}ms",
                endpoint, self.config.connect_timeout_ms
            ))),
        }
    }

    async fn call(
        &self,
        station: &DeviceAddress,
        request: Request<'_>,
    ) -> Result<Response, TransportError> {
        let Some(endpoint) = station.endpoint() else {
            return Err(TransportError::connection(format!(
                "{} is not a TCP address",
                station
            )));
        };
        let unit = station.unit();

        let mut connections = self.connections.lock().await;
        let ctx = match connections.entry(endpoint.clone()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                entry.insert(self.connect(&endpoint, unit).await?)
            },
        };

        let result = client::dispatch(ctx, unit, request, self.config.request_timeout()).await;
        if let Err(e) = &result {
            if client::poisons_connection(e) {
                warn!("Dropping Modbus TCP connection to {}: {}", endpoint, e);
                connections.remove(&endpoint);
            }
        }
        result
    }
}

impl std::fmt::Debug for ModbusTcpTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusTcpTransport")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ModbusTcpTransport {
    fn name(&self) -> &str {
        "modbus-tcp"
    }

    async fn read_coils(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, TransportError> {
        self.call(station, Request::ReadCoils(start, quantity))
            .await?
            .into_bits()
    }

    async fn read_discrete_inputs(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<bool>, TransportError> {
        self.call(station, Request::ReadDiscreteInputs(start, quantity))
            .await?
            .into_bits()
    }

    async fn read_holding_registers(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.call(station, Request::ReadHoldingRegisters(start, quantity))
            .await?
            .into_words()
    }

    async fn read_input_registers(
        &self,
        station: &DeviceAddress,
        start: u16,
        quantity: u16,
    ) -> Result<Vec<u16>, TransportError> {
        self.call(station, Request::ReadInputRegisters(start, quantity))
            .await?
            .into_words()
    }

    async fn write_single_coil(
        &self,
        station: &DeviceAddress,
        address: u16,
        value: bool,
    ) -> Result<(), TransportError> {
        self.call(station, Request::WriteSingleCoil(address, value))
            .await?
            .into_written()
    }

    async fn write_single_holding(
        &self,
        station: &DeviceAddress,
        address: u16,
        value: u16,
    ) -> Result<(), TransportError> {
        self.call(station, Request::WriteSingleRegister(address, value))
            .await?
            .into_written()
    }

    async fn write_multiple_holding(
        &self,
        station: &DeviceAddress,
        address: u16,
        values: &[u16],
    ) -> Result<(), TransportError> {
        self.call(station, Request::WriteMultipleRegisters(address, values))
            .await?
            .into_written()
    }

    async fn close(&self) {
        let mut connections = self.connections.lock().await;
        let count = connections.len();
        connections.clear();
        debug!("Closed {} Modbus TCP connections", count);
    }
}
