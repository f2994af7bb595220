use async_channel::Receiver;
use error_stack::{Result, ResultExt};
use tokio_util::sync::CancellationToken;

use log::debug;

use crate::climate::StateReport;
use crate::error::MqttError;
use crate::messages::ToMqttPublisherMessage;

pub struct MqttPublisher {
    controller_name: String,
    last_report: Option<StateReport>,
    mqtt_client: rumqttc::AsyncClient,
    to_mqtt_publisher_channel: Receiver<ToMqttPublisherMessage>,
}

impl MqttPublisher {
    pub async fn mqtt_publisher_session(
        controller_name: String,
        mqtt_client: rumqttc::AsyncClient,
        to_mqtt_publisher_channel: Receiver<ToMqttPublisherMessage>,
        cancel_token: CancellationToken,
    ) -> Result<(), MqttError> {
        let mut mqtt_publisher =
            MqttPublisher::new(controller_name, mqtt_client, to_mqtt_publisher_channel);

        tokio::select! {
            _ = cancel_token.cancelled() => Ok(()),
            result = mqtt_publisher.run_session() => result,
        }
    }

    fn new(
        controller_name: String,
        mqtt_client: rumqttc::AsyncClient,
        to_mqtt_publisher_channel: Receiver<ToMqttPublisherMessage>,
    ) -> Self {
        MqttPublisher {
            controller_name,
            last_report: None,
            mqtt_client,
            to_mqtt_publisher_channel,
        }
    }

    async fn run_session(&mut self) -> Result<(), MqttError> {
        let into_context = || MqttError::Context("MQTT Publisher session".to_string());

        loop {
            let message = self
                .to_mqtt_publisher_channel
                .recv()
                .await
                .map_err(MqttError::ChannelClosed)
                .change_context_lazy(into_context)?;

            match message {
                ToMqttPublisherMessage::StateReport(report) => {
                    self.publish_if_modified(report).await.change_context_lazy(into_context)?;
                }

                ToMqttPublisherMessage::Error(error_message) => {
                    let topic = format!("Climate/Error/{}", self.controller_name);
                    debug!("Publishing to topic {} error_message: {}", topic, error_message);

                    self.publish_json(topic, &error_message)
                        .await
                        .change_context_lazy(into_context)?;
                }

                ToMqttPublisherMessage::CanGatewayConnected(connected) => {
                    let topic = format!("Climate/CanGateway/{}", self.controller_name);
                    debug!("Publishing to topic {} connected: {}", &topic, connected);

                    self.publish_json(topic, &connected)
                        .await
                        .change_context_lazy(into_context)?;
                }
            }
        }
    }

    /// Returns whether the report differed from the last one and was published
    async fn publish_if_modified(&mut self, report: StateReport) -> Result<bool, MqttError> {
        if self.last_report.as_ref() == Some(&report) {
            return Ok(false);
        }

        let topic = format!("Climate/State/{}", self.controller_name);
        debug!("Publishing to topic {} state: {:#?}", topic, report);

        self.publish_json(topic, &report).await?;
        self.last_report = Some(report);

        Ok(true)
    }

    async fn publish_json<T: serde::Serialize>(&self, topic: String, value: &T) -> Result<(), MqttError> {
        let payload = serde_json::to_vec(value).map_err(MqttError::InvalidPayload)?;

        self.mqtt_client
            .publish(&topic, rumqttc::QoS::AtLeastOnce, true, payload)
            .await
            .map_err(|e| MqttError::ApiError(e.to_string(), format!("Publish {topic}")).into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::climate::ClimateState;

    #[tokio::test]
    async fn test_publish_only_when_modified() {
        let options = rumqttc::MqttOptions::new("test", "localhost", 1883);
        // The event loop is never polled, requests just queue up in the client
        let (mqtt_client, _event_loop) = rumqttc::AsyncClient::new(options, 10);
        let (_tx, rx) = async_channel::bounded(1);
        let mut publisher = MqttPublisher::new("Mustang".to_string(), mqtt_client, rx);

        let mut state = ClimateState::default();
        let report = StateReport::from_state(&state);

        assert!(publisher.publish_if_modified(report.clone()).await.unwrap());
        assert!(!publisher.publish_if_modified(report).await.unwrap());

        state.set_fan_speed(40.0);
        assert!(publisher.publish_if_modified(StateReport::from_state(&state)).await.unwrap());
    }
}
