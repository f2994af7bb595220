use async_channel::{Receiver, Sender};
use error_stack::{Result, ResultExt};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use log::{debug, error, info, warn};

use crate::error::CanError;
use crate::frame::CanFrame;
use crate::messages::{BridgeEvent, ToCanMessage, ToMqttPublisherMessage};

const DEFAULT_GATEWAY_PORT: &str = "29536";

/// Line oriented CAN gateway connection, one `ID#DATA` frame per line in
/// both directions.
pub struct CanGateway {
    stream: Option<TcpStream>,
}

impl CanGateway {
    #[tracing::instrument(name = "can_gateway", skip(to_can_channel, to_bridge_channel, to_mqtt_publisher_channel))]
    pub async fn can_gateway_worker(
        gateway_address: &str,
        to_can_channel: Receiver<ToCanMessage>,
        to_bridge_channel: Sender<BridgeEvent>,
        to_mqtt_publisher_channel: Sender<ToMqttPublisherMessage>,
    ) {
        let mut gateway = CanGateway::new();

        loop {
            let _ = to_mqtt_publisher_channel
                .try_send(ToMqttPublisherMessage::CanGatewayConnected(false));

            loop {
                // Reconnect loop
                match gateway.connect(gateway_address).await {
                    Ok(_) => {
                        info!("CAN gateway worker connected to {}", gateway_address);
                        let _ = to_mqtt_publisher_channel
                            .try_send(ToMqttPublisherMessage::CanGatewayConnected(true));
                        break;
                    }

                    Err(e) => {
                        info!("CAN gateway worker failed to connect to CAN gateway: {}", e);

                        let _ = to_mqtt_publisher_channel
                            .try_send(ToMqttPublisherMessage::Error(format!("{:#?}", e)));

                        tokio::time::sleep(std::time::Duration::from_secs(5)).await;
                        info!("CAN gateway worker retrying to connect to CAN gateway");
                    }
                }
            }

            // Frames queued while disconnected are stale
            let mut dropped = 0;
            while to_can_channel.try_recv().is_ok() {
                dropped += 1;
            }
            if dropped > 0 {
                warn!("Dropped {} frames queued while the CAN gateway was disconnected", dropped);
            }

            match gateway.session(&to_can_channel, &to_bridge_channel).await {
                Ok(_) => {
                    info!("CAN gateway worker finished");
                    return;
                }
                Err(e) => {
                    error!("CAN gateway session failed: {:?} - reconnecting", e);
                    let _ = to_mqtt_publisher_channel
                        .try_send(ToMqttPublisherMessage::Error(format!("{:#?}", e)));
                    gateway.stream = None;
                }
            }
        }
    }

    fn new() -> Self {
        CanGateway { stream: None }
    }

    fn split_host_port(host_port: &str) -> Result<(String, u16), CanError> {
        let mut host_port_parts = host_port.split(':');

        let host = host_port_parts
            .next()
            .filter(|host| !host.is_empty())
            .ok_or_else(|| CanError::InvalidGatewayAddress(host_port.to_string()))?;
        let port_string = host_port_parts.next().unwrap_or(DEFAULT_GATEWAY_PORT);
        let port = port_string
            .parse::<u16>()
            .map_err(|_| CanError::InvalidGatewayPort(host_port.to_string()))?;

        Ok((host.to_string(), port))
    }

    async fn connect(&mut self, address: &str) -> Result<(), CanError> {
        let into_context = || CanError::Context(format!("Connecting to CAN gateway at {}", address));
        let (host, port) = CanGateway::split_host_port(address).change_context_lazy(into_context)?;
        let stream = TcpStream::connect((host.as_str(), port))
            .await
            .map_err(CanError::IoError)
            .change_context_lazy(into_context)?;

        stream
            .set_nodelay(true)
            .map_err(CanError::IoError)
            .change_context_lazy(into_context)?;
        self.stream = Some(stream);

        Ok(())
    }

    /// Pump frames both ways until the connection fails. Returns `Ok` only
    /// when the bridge side has gone away.
    async fn session(
        &mut self,
        to_can_channel: &Receiver<ToCanMessage>,
        to_bridge_channel: &Sender<BridgeEvent>,
    ) -> Result<(), CanError> {
        let into_context = || CanError::Context("CAN gateway session".to_string());
        let stream = self.stream.take().ok_or(CanError::NotConnected)?;
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = line.map_err(CanError::IoError).change_context_lazy(into_context)?;
                    let line = line.ok_or(CanError::ConnectionClosed)?;

                    if let Some(frame) = CanGateway::parse_line(&line) {
                        if to_bridge_channel.send(BridgeEvent::CanFrame(frame)).await.is_err() {
                            return Ok(());
                        }
                    }
                }

                message = to_can_channel.recv() => {
                    let ToCanMessage::SendFrame(frame) = match message {
                        Ok(message) => message,
                        Err(_) => return Ok(()),
                    };

                    writer
                        .write_all(format!("{}\n", frame).as_bytes())
                        .await
                        .map_err(CanError::IoError)
                        .change_context_lazy(|| CanError::Context(format!("Sending frame {}", frame)))?;
                }
            }
        }
    }

    fn parse_line(line: &str) -> Option<CanFrame> {
        let line = line.trim();
        if line.is_empty() {
            return None;
        }

        match line.parse::<CanFrame>() {
            Ok(frame) => Some(frame),
            Err(e) => {
                debug!("Ignoring line from CAN gateway: {:?}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::TcpListener;

    use super::*;
    use crate::frame;

    #[test]
    fn test_split_host_port() {
        let (host, port) = CanGateway::split_host_port("10.0.1.70").unwrap();
        assert_eq!(host, "10.0.1.70");
        assert_eq!(port, 29536);

        let (host, port) = CanGateway::split_host_port("10.0.1.70:7777").unwrap();
        assert_eq!(host, "10.0.1.70");
        assert_eq!(port, 7777);

        assert!(CanGateway::split_host_port("10.0.1.70:abc").is_err());
        assert!(CanGateway::split_host_port(":7777").is_err());
    }

    #[test]
    fn test_parse_line() {
        assert!(CanGateway::parse_line("").is_none());
        assert!(CanGateway::parse_line("garbage").is_none());
        let frame = CanGateway::parse_line(" 387#0800000010000000\r").unwrap();
        assert!(frame.is_status());
    }

    #[tokio::test]
    async fn test_can_gateway_worker() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();

        let (to_can_tx, to_can_rx) = async_channel::bounded(10);
        let (to_bridge_tx, to_bridge_rx) = async_channel::bounded(10);
        let (to_mqtt_tx, to_mqtt_rx) = async_channel::bounded(10);

        let handle = tokio::spawn(async move {
            CanGateway::can_gateway_worker(&address, to_can_rx, to_bridge_tx, to_mqtt_tx).await;
        });

        let (socket, _) = listener.accept().await.unwrap();
        let (reader, mut writer) = socket.into_split();
        let mut lines = BufReader::new(reader).lines();

        writer.write_all(b"not a frame\n387#0800000010000000\n").await.unwrap();

        match to_bridge_rx.recv().await.unwrap() {
            BridgeEvent::CanFrame(frame) => assert_eq!(frame.to_string(), "387#0800000010000000"),
            other => panic!("unexpected event {:?}", other),
        }

        to_can_tx
            .send(ToCanMessage::SendFrame(frame::encode_command(frame::toggle::POWER, 25.0, 10.0)))
            .await
            .unwrap();
        let line = lines.next_line().await.unwrap().unwrap();
        assert_eq!(line, "398#4000900000000000");

        assert!(matches!(
            to_mqtt_rx.recv().await.unwrap(),
            ToMqttPublisherMessage::CanGatewayConnected(false)
        ));
        assert!(matches!(
            to_mqtt_rx.recv().await.unwrap(),
            ToMqttPublisherMessage::CanGatewayConnected(true)
        ));

        handle.abort();
    }
}
