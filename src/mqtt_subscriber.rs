use async_channel::Sender;
use error_stack::{Report, Result};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use log::{debug, error, info};

use rumqttc::{self, Packet};
use crate::{
    climate::Mode,
    error::{BridgeError, MqttError},
    messages::{BridgeEvent, Intent, ToMqttPublisherMessage},
};

#[derive(Debug, Deserialize)]
#[serde(tag = "command")]
enum Action {
    SetTargetTemperature { temperature: f64 },
    SetFanSpeed { speed: f64 },
    SetMode { mode: u8 },
    ToggleDefrost,
    ToggleRearDefrost,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Command {
    Action(Action),
    ActionList(Vec<Action>),
}

pub async fn mqtt_subscriber_session(
    mut mqtt_event_loop: rumqttc::EventLoop,
    to_bridge_channel: Sender<BridgeEvent>,
    to_mqtt_publisher_channel: Sender<ToMqttPublisherMessage>,
    cancel_token: CancellationToken,
) -> Result<(), MqttError> {
    loop {
        let notification = tokio::select! {
            _ = cancel_token.cancelled() => return Ok(()),
            notification = mqtt_event_loop.poll() => notification.map_err(MqttError::ConnectionError)?,
        };

        if let rumqttc::Event::Incoming(Packet::Publish(publish_packet)) = notification {
            debug!("Received MQTT message: {:?}", publish_packet);

            match serde_json::from_slice::<Command>(&publish_packet.payload) {
                Ok(Command::Action(action)) => {
                    perform_action(action, &to_bridge_channel, &to_mqtt_publisher_channel).await?;
                }
                Ok(Command::ActionList(actions)) => {
                    for action in actions {
                        perform_action(action, &to_bridge_channel, &to_mqtt_publisher_channel).await?;
                    }
                }
                Err(e) => {
                    error!("Error parsing MQTT command message: {:?}", e);
                    let _ = to_mqtt_publisher_channel.try_send(ToMqttPublisherMessage::Error(format!(
                        "Error parsing MQTT command message: {:?}",
                        e
                    )));
                }
            }
        }
    }
}

async fn perform_action(
    action: Action,
    to_bridge_channel: &Sender<BridgeEvent>,
    to_mqtt_publisher_channel: &Sender<ToMqttPublisherMessage>,
) -> Result<(), MqttError> {
    match intent_from_action(action) {
        Ok(intent) => {
            info!("Remote intent {:?}", intent);
            to_bridge_channel
                .send(BridgeEvent::Intent(intent))
                .await
                .map_err(|_| Report::new(MqttError::Context("Bridge event channel closed".to_string())))
        }
        Err(e) => {
            error!("ERROR, {}", e);
            let _ = to_mqtt_publisher_channel.try_send(ToMqttPublisherMessage::Error(e.to_string()));
            Ok(())
        }
    }
}

fn intent_from_action(action: Action) -> std::result::Result<Intent, BridgeError> {
    Ok(match action {
        Action::SetTargetTemperature { temperature } => Intent::SetTargetTemperature(temperature),
        Action::SetFanSpeed { speed } => Intent::SetFanSpeed(speed),
        Action::SetMode { mode } => Intent::SetMode(Mode::try_from(mode)?),
        Action::ToggleDefrost => Intent::ToggleDefrost,
        Action::ToggleRearDefrost => Intent::ToggleRearDefrost,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(json: &str) -> Command {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_parse_single_action() {
        let Command::Action(action) = parse(r#"{"command": "SetTargetTemperature", "temperature": 21.5}"#) else {
            panic!("expected a single action");
        };
        assert_eq!(intent_from_action(action).unwrap(), Intent::SetTargetTemperature(21.5));

        let Command::Action(action) = parse(r#"{"command": "ToggleRearDefrost"}"#) else {
            panic!("expected a single action");
        };
        assert_eq!(intent_from_action(action).unwrap(), Intent::ToggleRearDefrost);
    }

    #[test]
    fn test_parse_action_list() {
        let Command::ActionList(actions) = parse(
            r#"[{"command": "SetMode", "mode": 2}, {"command": "SetFanSpeed", "speed": 40}]"#,
        ) else {
            panic!("expected an action list");
        };

        let intents = actions
            .into_iter()
            .map(|action| intent_from_action(action).unwrap())
            .collect::<Vec<_>>();
        assert_eq!(intents, vec![Intent::SetMode(Mode::Cool), Intent::SetFanSpeed(40.0)]);
    }

    #[test]
    fn test_unrecognized_mode() {
        let Command::Action(action) = parse(r#"{"command": "SetMode", "mode": 7}"#) else {
            panic!("expected a single action");
        };
        assert!(matches!(intent_from_action(action), Err(BridgeError::UnrecognizedMode(7))));
    }

    #[tokio::test]
    async fn test_unrecognized_mode_is_reported_not_forwarded() {
        let (to_bridge_tx, to_bridge_rx) = async_channel::bounded(10);
        let (to_mqtt_tx, to_mqtt_rx) = async_channel::bounded(10);

        perform_action(Action::SetMode { mode: 9 }, &to_bridge_tx, &to_mqtt_tx).await.unwrap();
        assert!(to_bridge_rx.is_empty());
        assert!(matches!(to_mqtt_rx.try_recv().unwrap(), ToMqttPublisherMessage::Error(_)));

        perform_action(Action::ToggleDefrost, &to_bridge_tx, &to_mqtt_tx).await.unwrap();
        assert!(matches!(
            to_bridge_rx.try_recv().unwrap(),
            BridgeEvent::Intent(Intent::ToggleDefrost)
        ));
    }
}
