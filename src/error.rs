use thiserror::Error;

#[derive(Debug, Error)]
pub enum BridgeError {
    #[error("Unrecognized heating/cooling mode: {0}")]
    UnrecognizedMode(u8),

    #[error("Send to CAN gateway channel failed")]
    SendToCanChannelFailed,

    #[error("Send to mqtt publisher channel failed")]
    SendToMqttPublisherChannelFailed,

    #[error("Bridge event channel closed")]
    EventChannelClosed,

    #[error("{0}")]
    Context(String),
}

#[derive(Debug, Error)]
pub enum CanError {
    #[error("I/O error")]
    IoError(#[from] std::io::Error),

    #[error("Invalid CAN gateway address")]
    InvalidGatewayAddress(String),

    #[error("Invalid CAN gateway port")]
    InvalidGatewayPort(String),

    #[error("Not connected")]
    NotConnected,

    #[error("Connection closed by CAN gateway")]
    ConnectionClosed,

    #[error("Invalid CAN frame: {0}")]
    InvalidFrame(String),

    #[error("{0}")]
    Context(String),
}

#[derive(Debug, Error)]
pub enum MqttError {
    #[error("MQTT client error")]
    ClientError(#[from] rumqttc::ClientError),

    #[error("MQTT connection error")]
    ConnectionError(#[from] rumqttc::ConnectionError),

    #[error("Invalid MQTT payload")]
    InvalidPayload(#[from] serde_json::Error),

    #[error("MQTT API error: {0} ({1})")]
    ApiError(String, String),

    #[error("Publisher channel closed")]
    ChannelClosed(#[from] async_channel::RecvError),

    #[error("{0}")]
    Context(String),
}
