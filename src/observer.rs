use embedded_can::Frame;
use log::{debug, trace};

use crate::climate::{ClimateState, StateReport};
use crate::frame::{self, toggle, CanFrame};

/// Outcome of a status frame: the report for the remote-control surface and
/// the neutral frame the unit needs to keep its own display in sync.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub report: StateReport,
    pub echo: CanFrame,
}

/// Apply a frame received from the bus. Frames other than the status frame
/// leave the state untouched and produce nothing.
pub fn observe(state: &mut ClimateState, can_frame: &CanFrame) -> Option<Observation> {
    if !can_frame.is_status() {
        trace!("Ignoring CAN frame with id {:03x}", can_frame.standard_id().as_raw());
        return None;
    }

    let status = frame::decode_status(can_frame);
    let previous_mode = state.mode;
    state.apply_status_bits(status);

    debug!(
        "Status frame {} (dlc {}): bytes {:02x}/{:02x} flags {:?}",
        can_frame,
        can_frame.dlc(),
        status.first,
        status.fifth,
        state.flags
    );

    if state.mode != previous_mode {
        debug!("Mode changed from {} to {}", previous_mode, state.mode);
    }

    Some(Observation {
        report: StateReport::from_state(state),
        echo: frame::encode_command(toggle::NO_OP, state.target_temperature, state.fan_speed),
    })
}
