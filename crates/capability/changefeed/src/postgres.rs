//! Postgres LISTEN/NOTIFY 来源
//!
//! 触发器在 `farms`、`devices`、`device_states` 写入后以行主键为负载发出通知：
//!
//! ```sql
//! perform pg_notify('crop_farms', new.id::text);
//! perform pg_notify('crop_devices', new.id::text);
//! perform pg_notify('crop_device_states', new.device_id::text);
//! ```
//!
//! 通知负载只带主键（NOTIFY 负载上限 8000 字节），收到后按主键回读整行。
//! 行已被删除时跳过。

use async_trait::async_trait;
use domain::{DeviceConfig, DeviceState, FarmConfig};
use sqlx::postgres::PgListener;
use sqlx::types::Json;
use sqlx::{PgPool, Row};
use tracing::debug;

use crate::error::ChangeFeedError;
use crate::source::{ChangeEvent, ChangeSource, ChangeSubscription};

pub const FARMS_CHANNEL: &str = "crop_farms";
pub const DEVICES_CHANNEL: &str = "crop_devices";
pub const DEVICE_STATES_CHANNEL: &str = "crop_device_states";

pub struct PgNotifySource {
    pool: PgPool,
}

impl PgNotifySource {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChangeSource for PgNotifySource {
    async fn connect(&self) -> Result<Box<dyn ChangeSubscription>, ChangeFeedError> {
        let mut listener = PgListener::connect_with(&self.pool).await?;
        listener
            .listen_all([FARMS_CHANNEL, DEVICES_CHANNEL, DEVICE_STATES_CHANNEL])
            .await?;
        debug!(target: "crop.changefeed", "pg_listener_connected");
        Ok(Box::new(PgSubscription {
            listener,
            pool: self.pool.clone(),
        }))
    }
}

struct PgSubscription {
    listener: PgListener,
    pool: PgPool,
}

#[async_trait]
impl ChangeSubscription for PgSubscription {
    async fn recv(&mut self) -> Result<Option<ChangeEvent>, ChangeFeedError> {
        loop {
            let notification = self.listener.recv().await?;
            let channel = notification.channel().to_string();
            let id = parse_id(&channel, notification.payload())?;
            if let Some(event) = self.load(&channel, id).await? {
                return Ok(Some(event));
            }
            debug!(target: "crop.changefeed", channel = %channel, id, "changed_row_missing");
        }
    }
}

impl PgSubscription {
    async fn load(&self, channel: &str, id: u64) -> Result<Option<ChangeEvent>, ChangeFeedError> {
        let db_id = id as i64;
        let event = match channel {
            FARMS_CHANNEL => sqlx::query("select config from farms where id = $1")
                .bind(db_id)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| row.try_get::<Json<FarmConfig>, _>("config"))
                .transpose()?
                .map(|config| ChangeEvent::Farm(config.0)),
            DEVICES_CHANNEL => sqlx::query("select farm_id, config from devices where id = $1")
                .bind(db_id)
                .fetch_optional(&self.pool)
                .await?
                .map(|row| -> Result<ChangeEvent, sqlx::Error> {
                    Ok(ChangeEvent::Device {
                        farm_id: row.try_get::<i64, _>("farm_id")? as u64,
                        device: row.try_get::<Json<DeviceConfig>, _>("config")?.0,
                    })
                })
                .transpose()?,
            DEVICE_STATES_CHANNEL => {
                sqlx::query("select state from device_states where device_id = $1")
                    .bind(db_id)
                    .fetch_optional(&self.pool)
                    .await?
                    .map(|row| row.try_get::<Json<DeviceState>, _>("state"))
                    .transpose()?
                    .map(|state| ChangeEvent::DeviceState {
                        device_id: id,
                        state: state.0,
                    })
            }
            other => {
                return Err(ChangeFeedError::Decode {
                    channel: other.to_string(),
                    message: "unexpected channel".to_string(),
                });
            }
        };
        Ok(event)
    }
}

fn parse_id(channel: &str, payload: &str) -> Result<u64, ChangeFeedError> {
    let trimmed = payload.trim();
    trimmed
        .parse::<i64>()
        .map(|id| id as u64)
        .or_else(|_| {
            // 兼容触发器直接发 row_to_json 的写法
            serde_json::from_str::<serde_json::Value>(trimmed)
                .ok()
                .and_then(|row| {
                    row.get("id")
                        .or_else(|| row.get("device_id"))
                        .and_then(|id| id.as_i64())
                })
                .map(|id| id as u64)
                .ok_or(())
        })
        .map_err(|()| ChangeFeedError::Decode {
            channel: channel.to_string(),
            message: format!("payload is not a row id: {trimmed}"),
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_and_json_ids() {
        assert_eq!(parse_id(FARMS_CHANNEL, " 42 ").expect("plain"), 42);
        assert_eq!(
            parse_id(DEVICE_STATES_CHANNEL, r#"{"device_id": 7, "state": {}}"#).expect("json"),
            7
        );
        let err = parse_id(DEVICES_CHANNEL, "abc").expect_err("garbage");
        assert_eq!(err.kind(), domain::ErrorKind::InvalidInput);
    }
}
