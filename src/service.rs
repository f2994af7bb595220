use async_channel::{Receiver, Sender};
use error_stack::{Result, ResultExt};
use log::info;
use rumqttc::{AsyncClient, EventLoop, LastWill, MqttOptions, QoS};
use serde::Serialize;
use std::marker::PhantomData;
use tokio::{task::JoinSet, time::Duration};
use tokio_util::sync::CancellationToken;

use crate::{
    bridge::Bridge,
    can_gateway::CanGateway,
    climate::ClimateConfig,
    error::MqttError,
    get_version,
    messages::{BridgeEvent, ToMqttPublisherMessage},
    mqtt_publisher::MqttPublisher,
    mqtt_subscriber,
};

pub struct Started {}
pub struct Stopped {}

pub struct ServiceConfig {
    pub mqtt_broker_address: String,
    pub controller_name: String,
    pub can_gateway_address: String,
    pub climate: ClimateConfig,
}

#[derive(Debug, Serialize)]
struct AccessoryInfo {
    name: &'static str,
    manufacturer: &'static str,
    model: &'static str,
}

const ACCESSORY_INFO: AccessoryInfo = AccessoryInfo {
    name: "Climate Control",
    manufacturer: "Ford",
    model: "2013",
};

pub struct Service<Status = Stopped> {
    config: ServiceConfig,

    workers: JoinSet<()>,
    _status: PhantomData<Status>,
}

impl Service {
    pub fn new(config: ServiceConfig) -> Service<Stopped> {
        Service {
            config,
            workers: JoinSet::new(),
            _status: PhantomData,
        }
    }

    async fn connect_to_mqtt_broker(
        mqtt_broker: &str,
        controller_name: &str,
    ) -> Result<(AsyncClient, EventLoop), MqttError> {
        let into_context =
            || MqttError::Context(format!("Connecting to MQTT broker '{}'", mqtt_broker));
        let client_id = format!("Climate-{}", controller_name);
        let mut mqtt_options = MqttOptions::new(client_id, mqtt_broker, 1883);
        let last_will_topic = format!("Climate/Active/{controller_name}");
        let last_will = LastWill::new(&last_will_topic, "false".as_bytes(), QoS::AtLeastOnce, true);
        mqtt_options
            .set_keep_alive(Duration::from_secs(5))
            .set_last_will(last_will);

        let (mqtt_client, event_loop) = AsyncClient::new(mqtt_options, 10);

        // Publish active state
        mqtt_client
            .publish(&last_will_topic, QoS::AtLeastOnce, true, "true".as_bytes())
            .await
            .change_context_lazy(into_context)?;

        mqtt_client
            .publish(
                &format!("Climate/Version/{controller_name}"),
                QoS::AtLeastOnce,
                true,
                get_version().as_bytes(),
            )
            .await
            .change_context_lazy(into_context)?;

        let accessory_info = serde_json::to_vec(&ACCESSORY_INFO).change_context_lazy(into_context)?;
        mqtt_client
            .publish(
                &format!("Climate/Accessory/{controller_name}"),
                QoS::AtLeastOnce,
                true,
                accessory_info,
            )
            .await
            .change_context_lazy(into_context)?;

        // Subscribe to commands
        mqtt_client
            .subscribe(format!("Climate/Command/{controller_name}"), QoS::AtLeastOnce)
            .await
            .change_context_lazy(into_context)?;
        Ok((mqtt_client, event_loop))
    }

    async fn mqtt_session(
        mqtt_broker: &str,
        controller_name: impl Into<String>,
        to_mqtt_publisher_rx: Receiver<ToMqttPublisherMessage>,
        to_mqtt_publisher_tx: Sender<ToMqttPublisherMessage>,
        to_bridge_tx: Sender<BridgeEvent>,
    ) {
        let controller_name = controller_name.into();
        let publisher_cancel_token = CancellationToken::new();
        let subscriber_cancel_token = publisher_cancel_token.clone();

        let (mqtt_client, event_loop) =
            match Service::connect_to_mqtt_broker(mqtt_broker, &controller_name).await {
                Ok((mqtt_client, event_loop)) => (mqtt_client, event_loop),
                Err(e) => {
                    info!("Error connecting to MQTT broker: {:?}", e);
                    return;
                }
            };

        let publish_handle = tokio::spawn(async move {
            match MqttPublisher::mqtt_publisher_session(
                controller_name,
                mqtt_client,
                to_mqtt_publisher_rx,
                publisher_cancel_token.clone(),
            )
            .await
            {
                Ok(_) => info!("MQTT publisher session finished"),
                Err(e) => info!("MQTT publisher session finished with error: {:?}", e),
            }

            // This should ensure that the subscriber session is also cancelled
            publisher_cancel_token.cancel();
        });

        let subscriber_handle = tokio::spawn(async move {
            match mqtt_subscriber::mqtt_subscriber_session(
                event_loop,
                to_bridge_tx,
                to_mqtt_publisher_tx,
                subscriber_cancel_token.clone(),
            )
            .await
            {
                Ok(_) => info!("MQTT subscriber session finished"),
                Err(e) => info!("MQTT subscriber session finished with error: {:?}", e),
            }

            // This should ensure that the publisher session is cancelled
            subscriber_cancel_token.cancel();
        });

        // At this stage, both the publisher and subscriber sessions should have been aborted
        let _ = publish_handle.await;
        let _ = subscriber_handle.await;
    }

    async fn mqtt_worker(
        mqtt_broker: &str,
        controller_name: &str,
        to_bridge_tx: Sender<BridgeEvent>,
        to_mqtt_publisher_rx: Receiver<ToMqttPublisherMessage>,
        to_mqtt_publisher_tx: Sender<ToMqttPublisherMessage>,
    ) {
        loop {
            info!("Starting MQTT session");
            Service::mqtt_session(
                mqtt_broker,
                controller_name,
                to_mqtt_publisher_rx.clone(),
                to_mqtt_publisher_tx.clone(),
                to_bridge_tx.clone(),
            )
            .await;

            info!("MQTT terminated, waiting 10 seconds before restarting");
            tokio::time::sleep(Duration::from_secs(10)).await;
        }
    }
}

impl Service<Stopped> {
    pub async fn start(mut self) -> Service<Started> {
        // Create the channels for the workers
        let (to_bridge_tx, to_bridge_rx) = async_channel::bounded(32);
        let (to_can_tx, to_can_rx) = async_channel::bounded(16);
        let (to_mqtt_publisher_tx, to_mqtt_publisher_rx) = async_channel::bounded(16);

        // Create bridge worker, the only owner of the climate state
        let climate = self.config.climate.clone();
        let to_mqtt_publisher_tx_instance = to_mqtt_publisher_tx.clone();
        self.workers.spawn(async move {
            Bridge::bridge_worker(climate, to_bridge_rx, to_can_tx, to_mqtt_publisher_tx_instance).await;
        });

        // Create CAN gateway worker
        let can_gateway_address = self.config.can_gateway_address.clone();
        let to_bridge_tx_instance = to_bridge_tx.clone();
        let to_mqtt_publisher_tx_instance = to_mqtt_publisher_tx.clone();
        self.workers.spawn(async move {
            CanGateway::can_gateway_worker(
                &can_gateway_address,
                to_can_rx,
                to_bridge_tx_instance,
                to_mqtt_publisher_tx_instance,
            )
            .await;
        });

        // Create mqtt worker
        let controller_name = self.config.controller_name.clone();
        let mqtt_broker = self.config.mqtt_broker_address.clone();

        self.workers.spawn(async move {
            Self::mqtt_worker(
                &mqtt_broker,
                &controller_name,
                to_bridge_tx,
                to_mqtt_publisher_rx,
                to_mqtt_publisher_tx,
            )
            .await
        });

        info!("Service started");
        Service {
            config: self.config,
            workers: self.workers,
            _status: PhantomData,
        }
    }
}

impl Service<Started> {
    pub async fn stop(mut self) -> Service<Stopped> {
        self.workers.shutdown().await;
        info!("Service stopped");

        Service {
            config: self.config,
            workers: self.workers,
            _status: PhantomData,
        }
    }
}
