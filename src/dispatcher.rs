use log::{debug, info};

use crate::climate::{ClimateState, Mode, StateReport};
use crate::frame::{self, toggle, CanFrame};
use crate::messages::Intent;

/// What an intent turned into: at most one command frame and an optional
/// report for the remote-control surface.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Dispatch {
    pub frame: Option<CanFrame>,
    pub report: Option<StateReport>,
}

pub fn dispatch(state: &mut ClimateState, intent: &Intent) -> Dispatch {
    match intent {
        Intent::SetTargetTemperature(temperature) => set_target_temperature(state, *temperature),
        Intent::SetFanSpeed(speed) => set_fan_speed(state, *speed),
        Intent::SetMode(mode) => Dispatch {
            frame: mode_toggle(state, *mode).map(|code| command_frame(state, code)),
            report: None,
        },
        Intent::ToggleDefrost => {
            info!("Toggle defrost");
            pulse(state, toggle::DEFROST)
        }
        Intent::ToggleRearDefrost => {
            info!("Toggle rear defrost");
            pulse(state, toggle::REAR_DEFROST)
        }
    }
}

fn set_target_temperature(state: &mut ClimateState, temperature: f64) -> Dispatch {
    let temperature = state.set_target(temperature);

    // Low targets are shortcuts for maximum cooling. They only change what
    // is reported, the AC max toggle stays with an explicit Cool intent.
    let (fan_speed, force_cool) = if temperature < 16.0 {
        info!("MAX cooling with the highest fan speed");
        (30.0, true)
    } else if temperature < 17.0 {
        info!("MAX cooling with the second highest fan speed");
        (20.0, true)
    } else if temperature == 17.0 {
        info!("MAX cooling with the lowest fan speed");
        (10.0, true)
    } else {
        info!("Set target temperature to {}", temperature);
        (10.0, false)
    };

    state.set_fan_speed(fan_speed);

    let report = StateReport::from_state(state);

    Dispatch {
        frame: None,
        report: Some(if force_cool { report.with_mode(Mode::Cool) } else { report }),
    }
}

fn set_fan_speed(state: &mut ClimateState, speed: f64) -> Dispatch {
    let speed = state.set_fan_speed(speed);
    info!("Set fan speed to {}", speed);

    Dispatch {
        frame: None,
        report: Some(StateReport::from_state(state)),
    }
}

/// The toggle bit that moves the unit towards `mode`, or `None` when the
/// relevant flag already points that way. Sending a toggle in that case
/// would flip the unit away from the requested state.
pub fn mode_toggle(state: &ClimateState, mode: Mode) -> Option<u8> {
    let (code, needed) = match mode {
        Mode::Off => (toggle::POWER, state.is_on()),
        Mode::Heat => (toggle::AC, state.flags.ac_on),
        Mode::Cool => (toggle::AC_MAX, !state.flags.ac_max),
        Mode::Auto => (toggle::RECIRCULATION, state.flags.ac_recirculated),
    };

    if needed {
        info!("{} => toggling {:#04x}", mode, code);
        Some(code)
    } else {
        debug!("{} => unit already there, toggle {:#04x} suppressed", mode, code);
        None
    }
}

fn pulse(state: &ClimateState, code: u8) -> Dispatch {
    Dispatch {
        frame: Some(command_frame(state, code)),
        report: None,
    }
}

fn command_frame(state: &ClimateState, code: u8) -> CanFrame {
    frame::encode_command(code, state.target_temperature, state.fan_speed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::StatusBytes;
    use embedded_can::Frame;

    fn state_with(first: u8, fifth: u8) -> ClimateState {
        let mut state = ClimateState::default();
        state.apply_status_bits(StatusBytes { first, fifth });
        state
    }

    fn sent_code(dispatch: &Dispatch) -> Option<u8> {
        dispatch.frame.map(|frame| frame.data()[0])
    }

    #[test]
    fn test_max_cooling_shortcut() {
        let mut state = state_with(0x00, 0x10);
        let result = dispatch(&mut state, &Intent::SetTargetTemperature(15.5));

        assert_eq!(state.fan_speed, 30.0);
        assert_eq!(state.target_temperature, 15.5);
        let report = result.report.unwrap();
        assert_eq!(report.target_mode, Mode::Cool);
        assert_eq!(report.current_mode, Mode::Cool);
        assert_eq!(report.fan_speed, 30.0);

        // Reported only, the bus is left alone
        assert!(result.frame.is_none());
        assert_eq!(state.mode, Mode::Auto);
    }

    #[test]
    fn test_repeated_max_cooling_never_toggles() {
        let mut state = state_with(0x00, 0x10);

        let codes = [16.5, 15.5, 17.0]
            .iter()
            .filter_map(|&t| sent_code(&dispatch(&mut state, &Intent::SetTargetTemperature(t))))
            .collect::<Vec<_>>();
        assert!(codes.is_empty());
        assert!(!state.flags.ac_max);
    }

    #[test]
    fn test_thresholds_use_quantized_temperature() {
        let mut state = state_with(0x00, 0x10);

        // 16.9 is stored as 17.0, the lowest max cooling step
        let result = dispatch(&mut state, &Intent::SetTargetTemperature(16.9));
        assert_eq!(state.target_temperature, 17.0);
        assert_eq!(state.fan_speed, 10.0);
        assert_eq!(result.report.unwrap().target_mode, Mode::Cool);

        // 16.7 is stored as 16.5
        dispatch(&mut state, &Intent::SetTargetTemperature(16.7));
        assert_eq!(state.target_temperature, 16.5);
        assert_eq!(state.fan_speed, 20.0);

        // 17.2 is stored as 17.0
        let result = dispatch(&mut state, &Intent::SetTargetTemperature(17.2));
        assert_eq!(state.target_temperature, 17.0);
        assert_eq!(result.report.unwrap().target_mode, Mode::Cool);
    }

    #[test]
    fn test_max_cooling_thresholds() {
        let mut state = ClimateState::default();

        dispatch(&mut state, &Intent::SetTargetTemperature(16.5));
        assert_eq!(state.fan_speed, 20.0);

        let result = dispatch(&mut state, &Intent::SetTargetTemperature(17.0));
        assert_eq!(state.fan_speed, 10.0);
        assert_eq!(result.report.unwrap().target_mode, Mode::Cool);
    }

    #[test]
    fn test_max_cooling_with_ac_max_on() {
        let mut state = state_with(0x08, 0x10);
        let result = dispatch(&mut state, &Intent::SetTargetTemperature(15.0));

        assert!(result.frame.is_none());
        assert_eq!(result.report.unwrap().target_mode, Mode::Cool);
    }

    #[test]
    fn test_regular_target_temperature() {
        let mut state = state_with(0x00, 0x10);
        state.set_fan_speed(50.0);

        let result = dispatch(&mut state, &Intent::SetTargetTemperature(20.0));
        assert!(result.frame.is_none());
        assert_eq!(state.fan_speed, 10.0);
        assert_eq!(state.target_temperature, 20.0);
        let report = result.report.unwrap();
        assert_eq!(report.target_mode, Mode::Auto);
        assert_eq!(report.target_temperature, 20.0);
    }

    #[test]
    fn test_set_fan_speed() {
        let mut state = state_with(0x00, 0x10);
        let result = dispatch(&mut state, &Intent::SetFanSpeed(60.0));

        assert!(result.frame.is_none());
        assert_eq!(state.fan_speed, 60.0);
        assert_eq!(state.mode, Mode::Auto);
        assert_eq!(result.report.unwrap().fan_speed, 60.0);
    }

    #[test]
    fn test_mode_toggles_only_on_mismatch() {
        // Off
        assert_eq!(sent_code(&dispatch(&mut state_with(0x00, 0x10), &Intent::SetMode(Mode::Off))), Some(0x40));
        assert_eq!(sent_code(&dispatch(&mut state_with(0x00, 0x00), &Intent::SetMode(Mode::Off))), None);

        // Heat turns the AC off
        assert_eq!(sent_code(&dispatch(&mut state_with(0x00, 0x10), &Intent::SetMode(Mode::Heat))), Some(0x04));
        assert_eq!(sent_code(&dispatch(&mut state_with(0x04, 0x00), &Intent::SetMode(Mode::Heat))), None);

        // Cool turns AC max on
        assert_eq!(sent_code(&dispatch(&mut state_with(0x00, 0x10), &Intent::SetMode(Mode::Cool))), Some(0x02));
        assert_eq!(sent_code(&dispatch(&mut state_with(0x08, 0x10), &Intent::SetMode(Mode::Cool))), None);

        // Auto turns recirculation off
        assert_eq!(sent_code(&dispatch(&mut state_with(0x04, 0x10), &Intent::SetMode(Mode::Auto))), Some(0x01));
        assert_eq!(sent_code(&dispatch(&mut state_with(0x00, 0x10), &Intent::SetMode(Mode::Auto))), None);
    }

    #[test]
    fn test_toggle_is_never_sent_when_flag_matches() {
        for first in 0u8..=0xff {
            for fifth in [0x00u8, 0x10, 0x30, 0xf0] {
                let state = state_with(first, fifth);
                if let Some(code) = mode_toggle(&state, Mode::Cool) {
                    assert_eq!(code, toggle::AC_MAX);
                    assert!(!state.flags.ac_max);
                }
                if mode_toggle(&state, Mode::Heat).is_some() {
                    assert!(state.flags.ac_on);
                }
                if mode_toggle(&state, Mode::Auto).is_some() {
                    assert!(state.flags.ac_recirculated);
                }
                if mode_toggle(&state, Mode::Off).is_some() {
                    assert!(state.is_on());
                }
            }
        }
    }

    #[test]
    fn test_mode_intent_leaves_state_alone() {
        let mut state = state_with(0x00, 0x10);
        let before = state.clone();

        let result = dispatch(&mut state, &Intent::SetMode(Mode::Cool));
        assert!(result.report.is_none());
        assert_eq!(state, before);
    }

    #[test]
    fn test_defrost_is_always_pulsed() {
        for (first, fifth) in [(0x00, 0x00), (0x20, 0x10), (0x10, 0x00)] {
            let mut state = state_with(first, fifth);
            assert_eq!(sent_code(&dispatch(&mut state, &Intent::ToggleDefrost)), Some(0x10));
            assert_eq!(sent_code(&dispatch(&mut state, &Intent::ToggleRearDefrost)), Some(0x08));
        }
    }

    #[test]
    fn test_pulse_carries_current_values() {
        let mut state = ClimateState::default();
        state.set_target(25.0);
        state.set_fan_speed(40.0);

        let frame = dispatch(&mut state, &Intent::ToggleDefrost).frame.unwrap();
        assert_eq!(frame.data(), &[0x10, 0x00, 0x90, 0x00, 0x3c, 0x00, 0x00, 0x00]);
    }
}
