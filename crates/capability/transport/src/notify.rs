//! 农场通知出口

use std::time::Duration;

use async_trait::async_trait;
use domain::FarmNotification;
use rumqttc::{AsyncClient, MqttOptions, QoS};
use tracing::{info, warn};

use crate::error::TransportError;

/// 通知发布器抽象。
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: &FarmNotification) -> Result<(), TransportError>;
}

/// 仅写日志的通知器（默认）。
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, notification: &FarmNotification) -> Result<(), TransportError> {
        info!(
            target: "crop.notify",
            farm_id = notification.farm_id,
            device_id = notification.device_id,
            device_type = %notification.device_type,
            event_type = %notification.event_type,
            message = %notification.message,
            "farm_notification"
        );
        Ok(())
    }
}

/// MQTT 通知器配置。
#[derive(Debug, Clone)]
pub struct MqttNotifierConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    /// 实际发布到 `{topic}/{farm_id}`。
    pub topic: String,
    pub qos: u8,
}

/// MQTT 通知器：以 JSON 发布通知。
#[derive(Clone)]
pub struct MqttNotifier {
    client: AsyncClient,
    topic: String,
    qos: QoS,
}

impl MqttNotifier {
    pub fn connect(config: MqttNotifierConfig) -> (Self, tokio::task::JoinHandle<()>) {
        let client_id = format!("crop-notify-{}", uuid::Uuid::new_v4());
        let mut options = MqttOptions::new(client_id, config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let (client, mut eventloop) = AsyncClient::new(options, 10);
        let handle = tokio::spawn(async move {
            loop {
                if let Err(err) = eventloop.poll().await {
                    warn!(target: "crop.notify", error = %err, "mqtt_eventloop_error");
                    tokio::time::sleep(Duration::from_secs(1)).await;
                }
            }
        });
        (
            Self {
                client,
                topic: config.topic,
                qos: qos_from_u8(config.qos),
            },
            handle,
        )
    }

    pub fn topic_for(&self, farm_id: u64) -> String {
        topic_for(&self.topic, farm_id)
    }
}

#[async_trait]
impl Notifier for MqttNotifier {
    async fn notify(&self, notification: &FarmNotification) -> Result<(), TransportError> {
        let topic = self.topic_for(notification.farm_id);
        let payload = serde_json::to_vec(notification)
            .map_err(|err| TransportError::Notify(err.to_string()))?;
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| TransportError::Notify(err.to_string()))?;
        Ok(())
    }
}

fn topic_for(prefix: &str, farm_id: u64) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), farm_id)
}

fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn topic_appends_farm_id() {
        assert_eq!(topic_for("crop/notify/", 7), "crop/notify/7");
        assert_eq!(topic_for("crop/notify", 7), "crop/notify/7");
    }

    #[test]
    fn unknown_qos_defaults_to_at_least_once() {
        assert_eq!(qos_from_u8(9), QoS::AtLeastOnce);
        assert_eq!(qos_from_u8(0), QoS::AtMostOnce);
    }
}
