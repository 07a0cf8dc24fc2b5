use amora_core::config::ServiceSettings;
use amora_core::middleware::FabricState;
use amora_services::notification::{self, NotificationState, SERVICE_NAME, build_subscriber};
use amora_services::state::ServiceState;
use tracing::error;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    amora_core::logging::init(SERVICE_NAME);

    let settings = ServiceSettings::from_env("NOTIFICATION_HOST", "NOTIFICATION_PORT", 8087)?;
    let service = ServiceState::new(SERVICE_NAME, settings.clone()).await;
    let state = NotificationState::new(service);
    let fabric = FabricState::new(SERVICE_NAME, Some(settings.jwt_secret.clone()));

    // The consumer runs beside the HTTP surface; a dead broker degrades to
    // HTTP-only operation rather than failing the service.
    if let Some(url) = settings.rabbitmq_url.clone() {
        let subscriber = build_subscriber(state.clone(), &url);
        tokio::spawn(async move {
            if let Err(e) = subscriber.run().await {
                error!(error = %e, "event subscriber stopped");
            }
        });
    }

    let app = notification::app(state, fabric);
    amora_services::serve(app, SERVICE_NAME, &settings.host, settings.port).await?;
    Ok(())
}
