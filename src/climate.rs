use core::fmt::{Display, Formatter};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::frame::{fifth_byte, first_byte, StatusBytes};

/// Heating/cooling mode, numbered as the accessory heating/cooling state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(into = "u8", try_from = "u8")]
pub enum Mode {
    #[default]
    Off,
    Heat,
    Cool,
    Auto,
}

impl Mode {
    pub fn code(self) -> u8 {
        match self {
            Mode::Off => 0,
            Mode::Heat => 1,
            Mode::Cool => 2,
            Mode::Auto => 3,
        }
    }
}

impl From<Mode> for u8 {
    fn from(mode: Mode) -> u8 {
        mode.code()
    }
}

impl TryFrom<u8> for Mode {
    type Error = BridgeError;

    fn try_from(code: u8) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(Mode::Off),
            1 => Ok(Mode::Heat),
            2 => Ok(Mode::Cool),
            3 => Ok(Mode::Auto),
            _ => Err(BridgeError::UnrecognizedMode(code)),
        }
    }
}

impl Display for Mode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Mode::Off => write!(f, "Off"),
            Mode::Heat => write!(f, "Heat"),
            Mode::Cool => write!(f, "Cool"),
            Mode::Auto => write!(f, "Auto"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Range {
    pub min: f64,
    pub max: f64,
    pub step: f64,
}

impl Range {
    /// Clamp to `[min, max]` and snap to the nearest step above `min`
    pub fn quantize(&self, value: f64) -> f64 {
        let clamped = value.clamp(self.min, self.max);
        let steps = ((clamped - self.min) / self.step).round();
        (self.min + steps * self.step).min(self.max)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateConfig {
    pub target_temperature: Range,
    pub initial_target_temperature: f64,
    pub fan_speed: Range,
    pub initial_fan_speed: f64,
}

impl Default for ClimateConfig {
    fn default() -> Self {
        ClimateConfig {
            target_temperature: Range { min: 15.0, max: 32.0, step: 0.5 },
            initial_target_temperature: 25.0,
            fan_speed: Range { min: 10.0, max: 70.0, step: 10.0 },
            initial_fan_speed: 10.0,
        }
    }
}

/// Discrete flags last reported by the status frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct StatusFlags {
    pub ac_on: bool,
    pub ac_max: bool,
    pub ac_recirculated: bool,
    pub defrost: bool,
    pub rear_defrost: bool,
    pub fan_front: bool,
    pub fan_down: bool,
    pub fan_window: bool,
}

impl StatusFlags {
    pub fn from_status_bytes(status: StatusBytes) -> Self {
        StatusFlags {
            ac_on: status.fifth & fifth_byte::AC_ON != 0,
            fan_down: status.fifth & fifth_byte::FAN_DOWN != 0,
            fan_front: status.fifth & fifth_byte::FAN_FRONT != 0,
            fan_window: status.fifth & fifth_byte::FAN_WINDOW != 0,
            ac_recirculated: status.first & first_byte::RECIRCULATION != 0,
            ac_max: status.first & first_byte::AC_MAX != 0,
            rear_defrost: status.first & first_byte::REAR_DEFROST != 0,
            defrost: status.first & first_byte::DEFROST != 0,
        }
    }
}

/// Derive the mode from the status bits, first matching rule wins.
/// Returns `None` when no rule matches, the caller keeps its previous mode.
pub fn derive_mode(status: StatusBytes, flags: &StatusFlags) -> Option<Mode> {
    if status.first == 0 && status.fifth == 0 {
        Some(Mode::Off)
    } else if !flags.ac_on {
        Some(Mode::Heat)
    } else if flags.ac_max {
        Some(Mode::Cool)
    } else if !flags.ac_recirculated {
        Some(Mode::Auto)
    } else {
        None
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClimateState {
    config: ClimateConfig,

    pub status: StatusBytes,
    pub flags: StatusFlags,
    pub mode: Mode,
    pub target_temperature: f64,
    pub fan_speed: f64,
}

impl ClimateState {
    pub fn new(config: ClimateConfig) -> Self {
        let target_temperature = config.target_temperature.quantize(config.initial_target_temperature);
        let fan_speed = config.fan_speed.quantize(config.initial_fan_speed);

        ClimateState {
            config,
            status: StatusBytes::default(),
            flags: StatusFlags::default(),
            mode: Mode::Off,
            target_temperature,
            fan_speed,
        }
    }

    pub fn apply_status_bits(&mut self, status: StatusBytes) {
        self.status = status;
        self.flags = StatusFlags::from_status_bytes(status);

        if let Some(mode) = derive_mode(status, &self.flags) {
            self.mode = mode;
        }
    }

    /// The unit is considered on when any tracked status bit is lit
    pub fn is_on(&self) -> bool {
        self.status.first != 0 || self.status.fifth != 0
    }

    pub fn set_target(&mut self, temperature: f64) -> f64 {
        self.target_temperature = self.config.target_temperature.quantize(temperature);
        self.target_temperature
    }

    pub fn set_fan_speed(&mut self, speed: f64) -> f64 {
        self.fan_speed = self.config.fan_speed.quantize(speed);
        self.fan_speed
    }
}

impl Default for ClimateState {
    fn default() -> Self {
        ClimateState::new(ClimateConfig::default())
    }
}

/// Current state as pushed to the remote-control surface
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StateReport {
    pub current_mode: Mode,
    pub target_mode: Mode,
    pub current_temperature: f64,
    pub target_temperature: f64,
    pub fan_speed: f64,
    pub defrost: bool,
    pub rear_defrost: bool,
    pub flags: StatusFlags,
}

impl StateReport {
    /// The bus reports neither temperature nor fan speed, so both are
    /// echoed from the locally held values.
    pub fn from_state(state: &ClimateState) -> Self {
        StateReport {
            current_mode: state.mode,
            target_mode: state.mode,
            current_temperature: state.target_temperature,
            target_temperature: state.target_temperature,
            fan_speed: state.fan_speed,
            defrost: state.flags.defrost,
            rear_defrost: state.flags.rear_defrost,
            flags: state.flags,
        }
    }

    pub fn with_mode(mut self, mode: Mode) -> Self {
        self.current_mode = mode;
        self.target_mode = mode;
        self
    }
}
