use core::fmt::{Display, Formatter};
use core::str::FromStr;
use embedded_can::{Frame, Id, StandardId};
use error_stack::{Report, Result};

use crate::error::CanError;

/// Status frame broadcast by the climate control unit
pub const STATUS_FRAME_ID: StandardId = standard_id(0x387);

/// Command frame sent by the bridge to the climate control unit
pub const COMMAND_FRAME_ID: StandardId = standard_id(0x398);

const fn standard_id(raw: u16) -> StandardId {
    match StandardId::new(raw) {
        Some(id) => id,
        None => panic!("CAN identifier does not fit in 11 bits"),
    }
}

/// Lowest temperature the bus can represent, anything below is sent as the floor
pub const TEMPERATURE_FLOOR: f64 = 17.0;

const TEMPERATURE_SCALE: f64 = 18.0;
const FAN_SPEED_UNIT: f64 = 10.0;
const FAN_CODE_STEP: u8 = 20;

/// Edge-triggered toggle codes, placed in byte 0 of a command frame.
/// Only one of them is ever sent in a single frame.
pub mod toggle {
    pub const NO_OP: u8 = 0x00;
    pub const RECIRCULATION: u8 = 0x01;
    pub const AC_MAX: u8 = 0x02;
    pub const AC: u8 = 0x04;
    pub const REAR_DEFROST: u8 = 0x08;
    pub const DEFROST: u8 = 0x10;
    pub const POWER: u8 = 0x40;
}

/// Bits of the first byte of a status frame
pub mod first_byte {
    pub const RECIRCULATION: u8 = 0x04;
    pub const AC_MAX: u8 = 0x08;
    pub const REAR_DEFROST: u8 = 0x10;
    pub const DEFROST: u8 = 0x20;
}

/// Bits of the fifth byte of a status frame
pub mod fifth_byte {
    pub const AC_ON: u8 = 0x10;
    pub const FAN_DOWN: u8 = 0x20;
    pub const FAN_FRONT: u8 = 0x40;
    pub const FAN_WINDOW: u8 = 0x80;
}

/// A classic CAN data frame with a standard (11 bit) identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CanFrame {
    id: StandardId,
    dlc: usize,
    data: [u8; 8],
}

/// The two status bytes tracked by the bridge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusBytes {
    pub first: u8,
    pub fifth: u8,
}

/// Field values carried by a command frame
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CommandFields {
    pub code: u8,
    pub target_temperature: f64,
    pub fan_speed: f64,
}

impl CanFrame {
    pub fn with_data(id: StandardId, data: [u8; 8]) -> Self {
        CanFrame { id, dlc: 8, data }
    }

    pub fn standard_id(&self) -> StandardId {
        self.id
    }

    pub fn is_status(&self) -> bool {
        self.id == STATUS_FRAME_ID
    }
}

impl Frame for CanFrame {
    fn new(id: impl Into<Id>, data: &[u8]) -> Option<Self> {
        let id = match id.into() {
            Id::Standard(id) => id,
            Id::Extended(_) => return None,
        };

        if data.len() > 8 {
            return None;
        }

        let mut bytes = [0u8; 8];
        bytes[..data.len()].copy_from_slice(data);

        Some(CanFrame {
            id,
            dlc: data.len(),
            data: bytes,
        })
    }

    // The gateway never carries remote frames
    fn new_remote(_id: impl Into<Id>, _dlc: usize) -> Option<Self> {
        None
    }

    fn is_extended(&self) -> bool {
        false
    }

    fn is_remote_frame(&self) -> bool {
        false
    }

    fn id(&self) -> Id {
        Id::Standard(self.id)
    }

    fn dlc(&self) -> usize {
        self.dlc
    }

    fn data(&self) -> &[u8] {
        &self.data[..self.dlc]
    }
}

/// Compact `cansend` form, e.g. `398#0200900014000000`
impl Display for CanFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:03X}#", self.id.as_raw())?;
        for byte in self.data() {
            write!(f, "{:02X}", byte)?;
        }
        Ok(())
    }
}

impl FromStr for CanFrame {
    type Err = Report<CanError>;

    fn from_str(s: &str) -> Result<CanFrame, CanError> {
        let invalid = || CanError::InvalidFrame(s.to_string());
        let (id, data) = s.trim().split_once('#').ok_or_else(invalid)?;

        let id = u16::from_str_radix(id, 16).map_err(|_| invalid())?;
        let id = StandardId::new(id).ok_or_else(invalid)?;

        if data.len() % 2 != 0 || !data.is_ascii() {
            return Err(invalid().into());
        }

        let bytes = (0..data.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&data[i..i + 2], 16))
            .collect::<std::result::Result<Vec<u8>, _>>()
            .map_err(|_| invalid())?;

        Ok(<CanFrame as Frame>::new(id, &bytes).ok_or_else(invalid)?)
    }
}

pub fn encode_temperature(target_temperature: f64) -> u16 {
    let temperature = target_temperature.max(TEMPERATURE_FLOOR);
    ((temperature - TEMPERATURE_FLOOR) * TEMPERATURE_SCALE).round() as u16
}

pub fn decode_temperature(raw: u16) -> f64 {
    TEMPERATURE_FLOOR + raw as f64 / TEMPERATURE_SCALE
}

pub fn encode_fan_speed(fan_speed: f64) -> u8 {
    // Float to int casts saturate, so speeds below one unit encode as 0
    (((fan_speed / FAN_SPEED_UNIT).floor() - 1.0) * FAN_CODE_STEP as f64) as u8
}

pub fn decode_fan_speed(code: u8) -> f64 {
    ((code / FAN_CODE_STEP) as f64 + 1.0) * FAN_SPEED_UNIT
}

/// Build the command frame `[code, temp_hi, temp_lo, 0, fan, 0, 0, 0]`
pub fn encode_command(code: u8, target_temperature: f64, fan_speed: f64) -> CanFrame {
    let raw_temperature = encode_temperature(target_temperature);
    let high_byte = ((raw_temperature >> 8) & 0xff) as u8;
    let low_byte = (raw_temperature & 0xff) as u8;

    CanFrame::with_data(
        COMMAND_FRAME_ID,
        [code, high_byte, low_byte, 0, encode_fan_speed(fan_speed), 0, 0, 0],
    )
}

pub fn decode_command(frame: &CanFrame) -> CommandFields {
    let raw_temperature = ((frame.data[1] as u16) << 8) | frame.data[2] as u16;

    CommandFields {
        code: frame.data[0],
        target_temperature: decode_temperature(raw_temperature),
        fan_speed: decode_fan_speed(frame.data[4]),
    }
}

/// Extract the two tracked bytes. Identifier filtering is up to the caller.
pub fn decode_status(frame: &CanFrame) -> StatusBytes {
    StatusBytes {
        first: frame.data[0],
        fifth: frame.data[4],
    }
}
