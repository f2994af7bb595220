
mod error;
mod messages;
mod frame;
mod climate;
mod observer;
mod dispatcher;
mod bridge;
mod can_gateway;
mod service;
mod mqtt_publisher;
mod mqtt_subscriber;

use climate::ClimateConfig;
use rustop::opts;
use service::ServiceConfig;
use tracing_subscriber::EnvFilter;

pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub fn get_version() -> String {
    format!("{} (built {})", built_info::PKG_VERSION, built_info::BUILT_TIME_UTC)
}

#[tokio::main]
async fn main() {
    let (args, _) = opts! {
        synopsis "MQTT bridge for the Ford Mustang CAN climate control";
        param controller_name:String, desc: "Controller name";
        param mqtt:String, desc: "MQTT broker to connect";
        param can_gateway:String, desc: "CAN gateway address (host[:port])";
    }.parse_or_exit();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = ServiceConfig {
        controller_name: args.controller_name,
        mqtt_broker_address: args.mqtt,
        can_gateway_address: args.can_gateway,
        climate: ClimateConfig::default(),
    };

    let service = service::Service::new(config);

    let service = service.start().await;

    if let Err(e) = tokio::signal::ctrl_c().await {
        log::error!("Failed waiting for ctrl-c: {}", e);
    }
    let _ = service.stop().await;
}
