//! Modbus RTU transport over a serial line
//!
//! All stations share one serial context; the unit id is switched before
//! every request.

use async_trait::async_trait;
use fieldlink_core::{ConnectorError, DeviceAddress, Transport, TransportError};
use tokio::sync::Mutex;
use tokio_modbus::client::{rtu, Context};
use tokio_modbus::Slave;
use tokio_serial::{SerialPortBuilder, SerialStream};
use tracing::{debug, info, warn};

use crate::client::{self, Request, Response};
use crate::config::{ModbusTransportConfig, Parity, SerialConfig};

pub struct ModbusRtuTransport {
    config: ModbusTransportConfig,
    serial: SerialConfig,
    context: Mutex<Option<Context>>,
}

impl ModbusRtuTransport {
    pub fn new(config: ModbusTransportConfig) -> fieldlink_core::Result<Self> {
        let serial = config
            .serial
            .clone()
            .ok_or_else(|| ConnectorError::config("RTU mode requires a serial section"))?;
        serial.validate()?;
        Ok(Self {
            config,
            serial,
            context: Mutex::new(None),
        })
    }

    fn port_builder(&self) -> SerialPortBuilder {
        let data_bits = match self.serial.data_bits {
            5 => tokio_serial::DataBits::Five,
            6 => tokio_serial::DataBits::Six,
            7 => tokio_serial::DataBits::Seven,
            _ => tokio_serial::DataBits::Eight,
        };
        let stop_bits = match self.serial.stop_bits {
            2 => tokio_serial::StopBits::Two,
            _ => tokio_serial::StopBits::One,
        };
        let parity = match self.serial.parity {
            Parity::None => tokio_serial::Parity::None,
            Parity::Even => tokio_serial::Parity::Even,
            Parity::Odd => tokio_serial::Parity::Odd,
        };
        tokio_serial::new(&self.serial.device, self.serial.baud_rate)
            .data_bits(data_bits)
            .stop_bits(stop_bits)
            .parity(parity)
            .flow_control(tokio_serial::FlowControl::None)
            .timeout(self.config.request_timeout())
    }

    fn open(&self, unit: u8) -> Result<Context, TransportError> {
        debug!("Opening serial port {}", self.serial.device);
        let port = SerialStream::open(&self.port_builder()).map_err(|e| {
            TransportError::connection(format!(
                "failed to open serial port {}: {}",
                self.serial.device, e
            ))
        })?;
        info!(
            "Serial port {} opened at {} baud",
            self.serial.device, self.serial.baud_rate
        );
        Ok(rtu::attach_slave(port, Slave(unit)))
    }

    async fn call(
        &self,
        station: &DeviceAddress,
        request: Request<'_>,
    ) -> Result<Response, TransportError> {
        let DeviceAddress::Station { unit } = station else {
            return Err(TransportError::connection(format!(
                "{} is not a serial station address",
                station
            )));
        };
        let unit = *unit;

        let mut guard = self.context.lock().await;
        if guard.is_none() {
            *guard = Some(self.open(unit)?);
        }
        let Some(ctx) = guard.as_mut() else {
            return Err(TransportError::connection("serial port unavailable"));
        };

        let result = client::dispatch(ctx, unit, request, self.config.request_timeout()).await;
        if let Err(e) = &result {
            if client::poisons_connection(e) {
                warn!("Closing serial port {}: {}", self.serial.device, e);
                *guard = None;
            }
        }
        result
    }
}

impl std::fmt::Debug for ModbusRtuTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModbusRtuTransport")
            .field("serial", &self.serial)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Transport for ModbusRtuTransport {
    fn name(&self) -> &str {
        "modbus-rtu"
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
        if self.context.lock().await.take().is_some() {
            debug!("Closed serial port {}", self.serial.device);
        }
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use crate::config::TransportMode;

    fn rtu_config(device: &str) -> ModbusTransportConfig {
        ModbusTransportConfig {
            mode: TransportMode::Rtu,
            serial: Some(SerialConfig {
                device: device.to_string(),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_missing_port_is_connection_failure() {
        let transport = ModbusRtuTransport::new(rtu_config("/dev/fieldlink-missing")).unwrap();
        let err = transport
            .read_holding_registers(&DeviceAddress::Station { unit: 1 }, 0, 1)
            .await
            .unwrap_err();
        assert!(err.is_connection_failure());
    }

    #[tokio::test]
    async fn test_ip_station_is_rejected() {
        let transport = ModbusRtuTransport::new(rtu_config("/dev/ttyUSB0")).unwrap();
        let station = DeviceAddress::Ip {
            host: "127.0.0.1".to_string(),
            port: 502,
            unit: 1,
        };
        assert!(transport.read_coils(&station, 0, 1).await.is_err());
    }
}
