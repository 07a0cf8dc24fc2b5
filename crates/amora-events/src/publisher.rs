//! Event publisher.
//!
//! Publishes persistent JSON messages to the `dating.events` topic exchange
//! with the correlation ID in the AMQP headers table. Publish failures are
//! non-fatal by contract: the data mutation the event describes has already
//! committed, so the publisher logs, reports `false`, and moves on.

use chrono::Utc;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{
    BasicProperties, Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{BasicPublishOptions, ExchangeDeclareOptions},
};
use serde::Serialize;
use tracing::{error, info};

use crate::{EXCHANGE_NAME, EventBusError};

pub struct EventPublisher {
    // Held so the underlying broker connection outlives the channel.
    _connection: Connection,
    channel: Channel,
}

impl EventPublisher {
    /// Connect to the broker and declare the durable topic exchange.
    pub async fn connect(rabbitmq_url: &str) -> Result<Self, EventBusError> {
        let connection =
            Connection::connect(rabbitmq_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;

        channel
            .exchange_declare(
                EXCHANGE_NAME,
                ExchangeKind::Topic,
                ExchangeDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        info!(exchange = EXCHANGE_NAME, "connected to RabbitMQ");
        Ok(Self {
            _connection: connection,
            channel,
        })
    }

    /// Publish one event; `true` when the broker accepted it.
    ///
    /// Failures are logged and swallowed - the caller's write has already
    /// committed and at-least-once delivery is repaired by consumer
    /// idempotency, not by publisher rollback.
    pub async fn publish_event<P: Serialize>(
        &self,
        routing_key: &str,
        payload: &P,
        correlation_id: Option<&str>,
    ) -> bool {
        match self.try_publish(routing_key, payload, correlation_id).await {
            Ok(()) => {
                info!(
                    event_type = routing_key,
                    correlation_id, "published event"
                );
                true
            }
            Err(e) => {
                error!(
                    event_type = routing_key,
                    correlation_id,
                    error = %e,
                    "failed to publish event"
                );
                false
            }
        }
    }

    async fn try_publish<P: Serialize>(
        &self,
        routing_key: &str,
        payload: &P,
        correlation_id: Option<&str>,
    ) -> Result<(), EventBusError> {
        let body = serde_json::to_vec(payload)?;

        let mut headers = FieldTable::default();
        if let Some(id) = correlation_id {
            headers.insert("correlation_id".into(), AMQPValue::LongString(id.into()));
        }

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            // 2 = persistent
            .with_delivery_mode(2)
            .with_timestamp(Utc::now().timestamp() as u64)
            .with_headers(headers);

        self.channel
            .basic_publish(
                EXCHANGE_NAME,
                routing_key,
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;
        Ok(())
    }
}
