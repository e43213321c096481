//! Request dispatch shared by the TCP and RTU transports

use std::io;
use std::time::Duration;

use fieldlink_core::TransportError;
use tokio::time::timeout;
use tokio_modbus::prelude::*;
use tokio_modbus::ExceptionCode;

/// One Modbus function call
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Request<'a> {
    ReadCoils(u16, u16),
    ReadDiscreteInputs(u16, u16),
    ReadHoldingRegisters(u16, u16),
    ReadInputRegisters(u16, u16),
    WriteSingleCoil(u16, bool),
    WriteSingleRegister(u16, u16),
    WriteMultipleRegisters(u16, &'a [u16]),
}

impl Request<'_> {
    pub fn function_name(&self) -> &'static str {
        match self {
            Request::ReadCoils(..) => "read_coils",
            Request::ReadDiscreteInputs(..) => "read_discrete_inputs",
            Request::ReadHoldingRegisters(..) => "read_holding_registers",
            Request::ReadInputRegisters(..) => "read_input_registers",
            Request::WriteSingleCoil(..) => "write_single_coil",
            Request::WriteSingleRegister(..) => "write_single_register",
            Request::WriteMultipleRegisters(..) => "write_multiple_registers",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Response {
    Bits(Vec<bool>),
    Words(Vec<u16>),
    Written,
}

impl Response {
    pub fn into_bits(self) -> Result<Vec<bool>, TransportError> {
        match self {
            Response::Bits(bits) => Ok(bits),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_words(self) -> Result<Vec<u16>, TransportError> {
        match self {
            Response::Words(words) => Ok(words),
            other => Err(unexpected(&other)),
        }
    }

    pub fn into_written(self) -> Result<(), TransportError> {
        match self {
            Response::Written => Ok(()),
            other => Err(unexpected(&other)),
        }
    }
}

fn unexpected(response: &Response) -> TransportError {
    TransportError::invalid_response(format!("unexpected response {:?}", response))
}

/// Execute one request on an established context, bounded by `limit`
pub async fn dispatch(
    ctx: &mut tokio_modbus::client::Context,
    unit: u8,
    request: Request<'_>,
    limit: Duration,
) -> Result<Response, TransportError> {
    ctx.set_slave(Slave(unit));
    let call = async {
        let response = match request {
            Request::ReadCoils(addr, qty) => ctx
                .read_coils(addr, qty)
                .await
                .map(|r| r.map(Response::Bits)),
            Request::ReadDiscreteInputs(addr, qty) => ctx
                .read_discrete_inputs(addr, qty)
                .await
                .map(|r| r.map(Response::Bits)),
            Request::ReadHoldingRegisters(addr, qty) => ctx
                .read_holding_registers(addr, qty)
                .await
                .map(|r| r.map(Response::Words)),
            Request::ReadInputRegisters(addr, qty) => ctx
                .read_input_registers(addr, qty)
                .await
                .map(|r| r.map(Response::Words)),
            Request::WriteSingleCoil(addr, value) => ctx
                .write_single_coil(addr, value)
                .await
                .map(|r| r.map(|()| Response::Written)),
            Request::WriteSingleRegister(addr, value) => ctx
                .write_single_register(addr, value)
                .await
                .map(|r| r.map(|()| Response::Written)),
            Request::WriteMultipleRegisters(addr, values) => ctx
                .write_multiple_registers(addr, values)
                .await
                .map(|r| r.map(|()| Response::Written)),
        };
        match response {
            Ok(Ok(response)) => Ok(response),
            Ok(Err(code)) => Err(exception_error(code)),
            Err(e) => Err(modbus_error(e)),
        }
    };

    match timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(TransportError::timeout(format!(
            "{} to unit {} timed out after {}ms",
            request.function_name(),
            unit,
            limit.as_millis()
        ))),
    }
}

/// Whether the connection should be dropped after this error
///
/// Only device exceptions leave the byte stream in a known state.
pub fn poisons_connection(error: &TransportError) -> bool {
    !matches!(error, TransportError::Exception { .. })
}

pub fn exception_code(code: ExceptionCode) -> u8 {
    match code {
        ExceptionCode::IllegalFunction => 0x01,
        ExceptionCode::IllegalDataAddress => 0x02,
        ExceptionCode::IllegalDataValue => 0x03,
        ExceptionCode::ServerDeviceFailure => 0x04,
        ExceptionCode::Acknowledge => 0x05,
        ExceptionCode::ServerDeviceBusy => 0x06,
        ExceptionCode::MemoryParityError => 0x08,
        ExceptionCode::GatewayPathUnavailable => 0x0A,
        ExceptionCode::GatewayTargetDevice => 0x0B,
        ExceptionCode::Custom(code) => code,
        #[allow(unreachable_patterns)]
        _ => 0xFF,
    }
}

pub fn exception_error(code: ExceptionCode) -> TransportError {
    TransportError::exception(exception_code(code), format!("{:?}", code))
}

pub fn modbus_error(error: tokio_modbus::Error) -> TransportError {
    match error {
        tokio_modbus::Error::Transport(e) => io_error(e),
        other => TransportError::invalid_response(other.to_string()),
    }
}

pub fn io_error(error: io::Error) -> TransportError {
    match error.kind() {
        io::ErrorKind::ConnectionRefused
        | io::ErrorKind::ConnectionReset
        | io::ErrorKind::ConnectionAborted
        | io::ErrorKind::NotConnected
        | io::ErrorKind::BrokenPipe
        | io::ErrorKind::UnexpectedEof
        | io::ErrorKind::AddrNotAvailable => TransportError::connection(error.to_string()),
        io::ErrorKind::TimedOut => TransportError::timeout(error.to_string()),
        _ => TransportError::from(error),
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;
    use fieldlink_core::FailureClass;

    // ========== error mapping tests ==========

    #[test]
    fn test_exception_codes() {
        assert_eq!(exception_code(ExceptionCode::IllegalDataAddress), 0x02);
        assert_eq!(exception_code(ExceptionCode::GatewayTargetDevice), 0x0B);
        assert_eq!(exception_code(ExceptionCode::Custom(0x42)), 0x42);
    }

    #[test]
    fn test_exception_classification() {
        let err = exception_error(ExceptionCode::IllegalDataValue);
        assert_eq!(err.failure_class(), FailureClass::Validation);
        assert!(!poisons_connection(&err));

        let err = exception_error(ExceptionCode::ServerDeviceBusy);
        assert_eq!(err.failure_class(), FailureClass::Unavailable);
    }

    #[test]
    fn test_io_error_kinds() {
        let refused = io_error(io::Error::from(io::ErrorKind::ConnectionRefused));
        assert!(matches!(refused, TransportError::Connection(_)));
        assert!(refused.is_connection_failure());
        assert!(poisons_connection(&refused));

        let timed_out = io_error(io::Error::from(io::ErrorKind::TimedOut));
        assert!(matches!(timed_out, TransportError::Timeout(_)));

        let other = io_error(io::Error::new(io::ErrorKind::InvalidData, "bad frame"));
        assert!(matches!(other, TransportError::Io(_)));
    }

    #[test]
    fn test_response_conversion() {
        assert_eq!(
            Response::Words(vec![1, 2]).into_words().unwrap(),
            vec![1, 2]
        );
        assert!(Response::Written.into_bits().is_err());
        assert!(Response::Bits(vec![true]).into_written().is_err());
    }
}
