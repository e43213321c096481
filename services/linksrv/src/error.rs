use fieldlink_core::{ChannelId, DeviceId, PropertyId};
use thiserror::Error;

/// linksrv errors
#[derive(Debug, Error)]
pub enum LinksrvError {
    #[error("Configuration error: {0}")]
    Config(#[from] common::Error),

    #[error("Duplicate device id {0}")]
    DuplicateDevice(DeviceId),

    #[error("Duplicate channel id {0}")]
    DuplicateChannel(ChannelId),

    #[error("Duplicate property id {0}")]
    DuplicateProperty(PropertyId),

    #[error(transparent)]
    Connector(#[from] fieldlink_core::ConnectorError),
}

pub type Result<T> = std::result::Result<T, LinksrvError>;
