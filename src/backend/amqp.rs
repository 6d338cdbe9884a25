//! An AMQP-backed backend: publishes zone-management verbs and cluster
//! flag updates to a broker, and runs a background consumer that applies
//! inbound cluster messages to the local Flag Store.
//!
//! `manage_zone`/`unmanage_zone` publish `ADDKEY <zone>`/`DELKEY <zone>` to
//! a per-host exchange with routing key `key_ops`. The channel is owned by
//! this struct rather than held as a process-global reached into from
//! anywhere — it is constructed once at startup and lives behind the
//! `Backend` trait object for the rest of the process.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use lapin::options::{BasicPublishOptions, ExchangeDeclareOptions};
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind};
use tracing::{error, info, warn};

use crate::error::BackendError;
use crate::flag::FlagValue;
use crate::store::FlagStore;

use super::{Backend, decode_cluster_message, encode_cluster_message};

#[derive(Clone, Debug)]
pub struct AmqpBackendConfig {
    pub broker_uri: String,
    pub key_ops_exchange: String,
    pub key_ops_routing_key: String,
    pub cluster_exchange: String,
}

#[derive(Clone)]
pub struct AmqpBackend {
    config: AmqpBackendConfig,
    channel: Channel,
}

impl AmqpBackend {
    pub async fn connect(config: AmqpBackendConfig) -> Result<Self, BackendError> {
        let conn = Connection::connect(&config.broker_uri, ConnectionProperties::default())
            .await
            .map_err(|err| BackendError::Amqp(err.to_string()))?;
        let channel = conn.create_channel().await.map_err(|err| BackendError::Amqp(err.to_string()))?;
        channel
            .exchange_declare(
                &config.key_ops_exchange,
                ExchangeKind::Direct,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| BackendError::Amqp(err.to_string()))?;
        channel
            .exchange_declare(
                &config.cluster_exchange,
                ExchangeKind::Fanout,
                ExchangeDeclareOptions::default(),
                FieldTable::default(),
            )
            .await
            .map_err(|err| BackendError::Amqp(err.to_string()))?;
        Ok(AmqpBackend { config, channel })
    }

    async fn publish_key_op(&self, verb: &str, zone: &str) -> Result<(), BackendError> {
        let body = format!("{verb} {zone}");
        self.channel
            .basic_publish(
                &self.config.key_ops_exchange,
                &self.config.key_ops_routing_key,
                BasicPublishOptions { mandatory: true, ..Default::default() },
                body.as_bytes(),
                BasicProperties::default(),
            )
            .await
            .map_err(|err| BackendError::Amqp(err.to_string()))?
            .await
            .map_err(|err| BackendError::Amqp(err.to_string()))?;
        Ok(())
    }

    /// Run the background consumer loop applying inbound cluster messages
    /// to `store`. Intended to be spawned once at startup and run for the
    /// life of the process.
    pub async fn run_cluster_consumer(&self, store: Arc<FlagStore>) {
        use futures::StreamExt;
        use lapin::options::{BasicAckOptions, BasicConsumeOptions, QueueDeclareOptions};

        let queue = match self
            .channel
            .queue_declare("", QueueDeclareOptions { exclusive: true, ..Default::default() }, FieldTable::default())
            .await
        {
            Ok(queue) => queue,
            Err(err) => {
                error!(%err, "failed to declare cluster consumer queue");
                return;
            }
        };
        if let Err(err) = self
            .channel
            .queue_bind(
                queue.name().as_str(),
                &self.config.cluster_exchange,
                "",
                Default::default(),
                FieldTable::default(),
            )
            .await
        {
            error!(%err, "failed to bind cluster consumer queue");
            return;
        }

        let mut consumer = match self
            .channel
            .basic_consume(
                queue.name().as_str(),
                "zonewardd-cluster-consumer",
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await
        {
            Ok(consumer) => consumer,
            Err(err) => {
                error!(%err, "failed to start cluster consumer");
                return;
            }
        };

        while let Some(delivery) = consumer.next().await {
            let Ok(delivery) = delivery else { continue };
            let Ok(text) = std::str::from_utf8(&delivery.data) else {
                warn!("dropping non-UTF-8 cluster message");
                let _ = delivery.ack(BasicAckOptions::default()).await;
                continue;
            };
            apply_cluster_message(&store, text);
            let _ = delivery.ack(BasicAckOptions::default()).await;
        }
    }
}

/// Apply one decoded cluster message to `store`, but only if the remote
/// timestamp is strictly newer than the local flag's mtime.
fn apply_cluster_message(store: &FlagStore, line: &str) {
    let Some(msg) = decode_cluster_message(line) else {
        warn!(%line, "dropping malformed cluster message");
        return;
    };
    let Some(zone) = crate::zonename::normalize(&msg.zone) else {
        warn!(zone = %msg.zone, "dropping cluster message for invalid zone name");
        return;
    };
    let Some(flag) = parse_flag_name(&msg.flag) else {
        warn!(flag = %msg.flag, "dropping cluster message for unknown flag");
        return;
    };

    let local_mtime = store.mtime(&zone, flag);
    let remote_newer = match local_mtime {
        None => true,
        Some(mtime) => {
            let local_epoch = mtime
                .duration_since(UNIX_EPOCH)
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            msg.epoch > local_epoch
        }
    };
    if !remote_newer {
        info!(zone = %zone, %flag, "ignoring stale cluster message");
        return;
    }

    let update = match msg.value {
        FlagValue::Absent => crate::flag::FlagUpdate::Clear,
        FlagValue::Present => crate::flag::FlagUpdate::Mark,
        FlagValue::Payload(p) => crate::flag::FlagUpdate::Payload(p),
    };
    store.set(&zone, flag, &update);
}

fn parse_flag_name(s: &str) -> Option<crate::flag::FlagName> {
    crate::flag::FlagName::ALL.into_iter().find(|f| f.as_str() == s)
}

impl Backend for AmqpBackend {
    async fn manage_zone(&self, zone: &str) -> Result<(), BackendError> {
        self.publish_key_op("ADDKEY", zone).await
    }

    async fn unmanage_zone(&self, zone: &str) -> Result<(), BackendError> {
        self.publish_key_op("DELKEY", zone).await
    }

    async fn cluster_update(&self, zone: &str, flag_long_name: &str, value: &FlagValue) -> bool {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs() as i64)
            .unwrap_or(0);
        let body = encode_cluster_message(now, zone, flag_long_name, value);
        let result = self
            .channel
            .basic_publish(
                &self.config.cluster_exchange,
                "",
                BasicPublishOptions::default(),
                body.as_bytes(),
                BasicProperties::default(),
            )
            .await;
        match result {
            Ok(confirm) => confirm.await.is_ok(),
            Err(err) => {
                warn!(%err, "cluster broadcast failed");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_known_flag_names() {
        assert!(parse_flag_name("signing").is_some());
        assert!(parse_flag_name("not-a-flag").is_none());
    }
}
