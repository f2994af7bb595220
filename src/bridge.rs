use async_channel::{Receiver, Sender, TrySendError};
use error_stack::{Result, ResultExt};
use log::{debug, info, warn};

use crate::climate::{ClimateConfig, ClimateState, StateReport};
use crate::dispatcher;
use crate::error::BridgeError;
use crate::frame::{self, CanFrame};
use crate::messages::{BridgeEvent, ToCanMessage, ToMqttPublisherMessage};
use crate::observer;

/// Owns the climate state. Bus frames and remote intents arrive on one
/// queue and are handled one at a time, so neither can observe the other
/// half applied.
pub struct Bridge {
    state: ClimateState,
    to_can_channel: Sender<ToCanMessage>,
    to_mqtt_publisher_channel: Sender<ToMqttPublisherMessage>,
}

impl Bridge {
    #[tracing::instrument(name = "bridge", skip_all)]
    pub async fn bridge_worker(
        config: ClimateConfig,
        events: Receiver<BridgeEvent>,
        to_can_channel: Sender<ToCanMessage>,
        to_mqtt_publisher_channel: Sender<ToMqttPublisherMessage>,
    ) {
        let mut bridge = Bridge::new(config, to_can_channel, to_mqtt_publisher_channel);

        match bridge.run(events).await {
            Ok(_) => info!("Bridge worker finished"),
            Err(e) => warn!("Bridge worker finished with error: {:?}", e),
        }
    }

    pub fn new(
        config: ClimateConfig,
        to_can_channel: Sender<ToCanMessage>,
        to_mqtt_publisher_channel: Sender<ToMqttPublisherMessage>,
    ) -> Self {
        Bridge {
            state: ClimateState::new(config),
            to_can_channel,
            to_mqtt_publisher_channel,
        }
    }

    async fn run(&mut self, events: Receiver<BridgeEvent>) -> Result<(), BridgeError> {
        loop {
            let event = events
                .recv()
                .await
                .change_context(BridgeError::EventChannelClosed)?;

            self.handle_event(event);
        }
    }

    pub fn handle_event(&mut self, event: BridgeEvent) {
        match event {
            BridgeEvent::CanFrame(frame) => {
                if let Some(observation) = observer::observe(&mut self.state, &frame) {
                    self.publish(observation.report);
                    self.send_frame(observation.echo);
                }
            }

            BridgeEvent::Intent(intent) => {
                debug!("Handling intent {:?}", intent);
                let dispatch = dispatcher::dispatch(&mut self.state, &intent);

                if let Some(report) = dispatch.report {
                    self.publish(report);
                }
                if let Some(frame) = dispatch.frame {
                    self.send_frame(frame);
                }
            }
        }
    }

    // Sends never wait: a frame the gateway cannot take right now is dropped
    fn send_frame(&self, frame: CanFrame) {
        debug!("Sending CAN frame {} {:?}", frame, frame::decode_command(&frame));
        if let Err(e) = self.to_can_channel.try_send(ToCanMessage::SendFrame(frame)) {
            let e = match e {
                TrySendError::Full(_) => BridgeError::Context(format!("CAN gateway busy, dropped frame {}", frame)),
                TrySendError::Closed(_) => BridgeError::SendToCanChannelFailed,
            };
            warn!("{}", e);
        }
    }

    fn publish(&self, report: StateReport) {
        if let Err(e) = self
            .to_mqtt_publisher_channel
            .try_send(ToMqttPublisherMessage::StateReport(report))
        {
            let e = match e {
                TrySendError::Full(_) => BridgeError::Context("MQTT publisher busy, dropped state report".to_string()),
                TrySendError::Closed(_) => BridgeError::SendToMqttPublisherChannelFailed,
            };
            warn!("{}", e);
        }
    }
}
