//! Shared per-service state: settings, the resilient data-collaborator
//! client, and the optional event publisher.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, warn};

use amora_core::client::ServiceClient;
use amora_core::config::ServiceSettings;
use amora_core::metrics::EVENTS_PUBLISHED;
use amora_core::resilience::{BreakerConfig, RetryPolicy};
use amora_events::EventPublisher;

struct ServiceInner {
    service_name: String,
    settings: ServiceSettings,
    data: ServiceClient,
    publisher: Option<EventPublisher>,
}

/// Cloneable handle shared by all handlers of one service process.
#[derive(Clone)]
pub struct ServiceState {
    inner: Arc<ServiceInner>,
}

impl ServiceState {
    /// Wire up the data-collaborator client and, when `RABBITMQ_URL` is
    /// configured, the event publisher. A broker that is down at startup
    /// degrades to publish-skipping rather than failing the service.
    pub async fn new(service_name: &str, settings: ServiceSettings) -> Self {
        let data = ServiceClient::new(
            service_name,
            "data-service",
            &settings.urls.data,
            BreakerConfig {
                fail_max: 3,
                timeout: Duration::from_secs(60),
            },
            Some(RetryPolicy::data_service()),
        );

        let publisher = match &settings.rabbitmq_url {
            Some(url) => match EventPublisher::connect(url).await {
                Ok(publisher) => Some(publisher),
                Err(e) => {
                    warn!(error = %e, "event publishing disabled - broker unavailable");
                    None
                }
            },
            None => {
                debug!("RABBITMQ_URL not set - event publishing disabled");
                None
            }
        };

        Self {
            inner: Arc::new(ServiceInner {
                service_name: service_name.to_string(),
                settings,
                data,
                publisher,
            }),
        }
    }

    pub fn service_name(&self) -> &str {
        &self.inner.service_name
    }

    pub fn settings(&self) -> &ServiceSettings {
        &self.inner.settings
    }

    pub fn data(&self) -> &ServiceClient {
        &self.inner.data
    }

    /// Publish a domain event after its write has committed.
    ///
    /// Publish failures never fail the request: at-least-once delivery is
    /// repaired by consumer idempotency, and the mutation already happened.
    pub async fn publish<P: Serialize>(
        &self,
        routing_key: &str,
        payload: &P,
        correlation_id: Option<&str>,
    ) {
        let Some(publisher) = &self.inner.publisher else {
            debug!(routing_key, "publisher not configured, skipping event");
            return;
        };
        let result = publisher
            .publish_event(routing_key, payload, correlation_id)
            .await;
        EVENTS_PUBLISHED
            .with_label_values(&[
                self.service_name(),
                routing_key,
                if result { "success" } else { "failure" },
            ])
            .inc();
    }
}
