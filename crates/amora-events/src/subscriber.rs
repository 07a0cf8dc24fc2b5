//! Event subscriber.
//!
//! Each service owns one durable `<service>.events` queue bound to the
//! topic exchange by its registered patterns. Prefetch is bounded; a
//! delivery is acked only after its handler succeeds, otherwise it is
//! nacked back onto the queue (at-least-once).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{
    Channel, Connection, ConnectionProperties, ExchangeKind,
    options::{
        BasicAckOptions, BasicConsumeOptions, BasicNackOptions, BasicQosOptions,
        ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions,
    },
};
use serde_json::Value;
use tracing::{error, info, warn};

use crate::envelope::EventEnvelope;
use crate::routing::matches_pattern;
use crate::{EXCHANGE_NAME, EventBusError};

/// Bounded number of unacked deliveries per consumer.
const PREFETCH_COUNT: u16 = 10;

/// One subscription callback.
///
/// Handlers must be idempotent: the bus provides at-least-once delivery and
/// the same event may arrive more than once.
#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: EventEnvelope) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

pub struct EventSubscriber {
    rabbitmq_url: String,
    service_name: String,
    handlers: Vec<(String, Box<dyn EventHandler>)>,
}

impl EventSubscriber {
    pub fn new(rabbitmq_url: &str, service_name: &str) -> Self {
        Self {
            rabbitmq_url: rabbitmq_url.to_string(),
            service_name: service_name.to_string(),
            handlers: Vec::new(),
        }
    }

    /// Register a handler for a routing-key pattern (`match.*`,
    /// `message.sent`, ...).
    pub fn register_handler(&mut self, pattern: &str, handler: Box<dyn EventHandler>) {
        info!(pattern, service = %self.service_name, "registered event handler");
        self.handlers.push((pattern.to_string(), handler));
    }

    fn find_handler(&self, routing_key: &str) -> Option<&dyn EventHandler> {
        // Exact match wins over pattern scan.
        self.handlers
            .iter()
            .find(|(pattern, _)| pattern == routing_key)
            .or_else(|| {
                self.handlers
                    .iter()
                    .find(|(pattern, _)| matches_pattern(routing_key, pattern))
            })
            .map(|(_, handler)| handler.as_ref())
    }

    async fn setup_channel(&self) -> Result<(Connection, Channel), EventBusError> {
        let connection =
            Connection::connect(&self.rabbitmq_url, ConnectionProperties::default()).await?;
        let channel = connection.create_channel().await?;
        channel
            .basic_qos(PREFETCH_COUNT, BasicQosOptions::default())
            .await?;

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

        let queue_name = format!("{}.events", self.service_name);
        channel
            .queue_declare(
                &queue_name,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await?;

        for (pattern, _) in &self.handlers {
            channel
                .queue_bind(
                    &queue_name,
                    EXCHANGE_NAME,
                    pattern,
                    QueueBindOptions::default(),
                    FieldTable::default(),
                )
                .await?;
            info!(queue = %queue_name, pattern, "bound queue to pattern");
        }

        Ok((connection, channel))
    }

    /// Consume until the connection drops or the task is cancelled.
    pub async fn run(self) -> Result<(), EventBusError> {
        let (_connection, channel) = self.setup_channel().await?;
        let queue_name = format!("{}.events", self.service_name);
        let mut consumer = channel
            .basic_consume(
                &queue_name,
                &format!("{}-consumer", self.service_name),
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(queue = %queue_name, "started consuming events");

        while let Some(delivery) = consumer.next().await {
            let delivery = match delivery {
                Ok(delivery) => delivery,
                Err(e) => {
                    error!(error = %e, "consumer stream error");
                    continue;
                }
            };
            self.process(delivery).await;
        }
        Ok(())
    }

    async fn process(&self, delivery: Delivery) {
        let routing_key = delivery.routing_key.as_str().to_string();
        let correlation_id = header_string(delivery.properties.headers(), "correlation_id");
        let occurred_at = (*delivery.properties.timestamp())
            .and_then(|ts| DateTime::<Utc>::from_timestamp(ts as i64, 0))
            .unwrap_or_else(Utc::now);

        let payload: Value = match serde_json::from_slice(&delivery.data) {
            Ok(payload) => payload,
            Err(e) => {
                // Unparseable payloads can never succeed; drop instead of
                // requeueing forever.
                error!(routing_key, error = %e, "discarding malformed event");
                let _ = delivery.ack(BasicAckOptions::default()).await;
                return;
            }
        };

        info!(
            event_type = %routing_key,
            correlation_id = correlation_id.as_deref(),
            "received event"
        );

        let Some(handler) = self.find_handler(&routing_key) else {
            warn!(routing_key, "no handler for event");
            let _ = delivery.ack(BasicAckOptions::default()).await;
            return;
        };

        let event = EventEnvelope {
            routing_key: routing_key.clone(),
            correlation_id,
            occurred_at,
            payload,
        };

        match handler.handle(event).await {
            Ok(()) => {
                if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
                    error!(routing_key, error = %e, "failed to ack event");
                }
            }
            Err(e) => {
                error!(routing_key, error = %e, "event handler failed, requeueing");
                let nack = BasicNackOptions {
                    requeue: true,
                    ..Default::default()
                };
                if let Err(e) = delivery.nack(nack).await {
                    error!(routing_key, error = %e, "failed to nack event");
                }
            }
        }
    }
}

fn header_string(headers: &Option<FieldTable>, key: &str) -> Option<String> {
    headers.as_ref().and_then(|table| {
        table.inner().iter().find_map(|(name, value)| {
            if name.as_str() == key
                && let AMQPValue::LongString(s) = value
            {
                Some(String::from_utf8_lossy(s.as_bytes()).into_owned())
            } else {
                None
            }
        })
    })
}
