use crate::climate::{Mode, StateReport};
use crate::frame::CanFrame;

/// Remote-control intents, already validated by whoever built them
#[derive(Debug, Clone, PartialEq)]
pub enum Intent {
    SetTargetTemperature(f64),
    SetFanSpeed(f64),
    SetMode(Mode),
    ToggleDefrost,
    ToggleRearDefrost,
}

/// Everything the bridge worker reacts to, in arrival order
#[derive(Debug)]
pub enum BridgeEvent {
    CanFrame(CanFrame),
    Intent(Intent),
}

#[derive(Debug)]
pub enum ToCanMessage {
    SendFrame(CanFrame),
}

#[derive(Debug)]
pub enum ToMqttPublisherMessage {
    StateReport(StateReport),
    Error(String),
    CanGatewayConnected(bool),
}
