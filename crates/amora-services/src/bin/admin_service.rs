use amora_core::config::ServiceSettings;
use amora_core::middleware::FabricState;
use amora_services::admin::{self, AdminState, SERVICE_NAME};
use amora_services::state::ServiceState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    amora_core::logging::init(SERVICE_NAME);

    let settings = ServiceSettings::from_env("ADMIN_HOST", "ADMIN_PORT", 8086)?;
    let service = ServiceState::new(SERVICE_NAME, settings.clone()).await;
    let state = AdminState::new(service)?;
    let fabric = FabricState::new(SERVICE_NAME, Some(settings.jwt_secret.clone()));
    let app = admin::app(state, fabric);

    amora_services::serve(app, SERVICE_NAME, &settings.host, settings.port).await?;
    Ok(())
}
