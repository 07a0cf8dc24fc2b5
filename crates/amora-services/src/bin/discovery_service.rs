use amora_core::config::ServiceSettings;
use amora_core::middleware::FabricState;
use amora_services::discovery::{self, SERVICE_NAME};
use amora_services::state::ServiceState;

#[tokio::main]
async fn main() -> eyre::Result<()> {
    amora_core::logging::init(SERVICE_NAME);

    let settings = ServiceSettings::from_env("DISCOVERY_HOST", "DISCOVERY_PORT", 8083)?;
    let state = ServiceState::new(SERVICE_NAME, settings.clone()).await;
    let fabric = FabricState::new(SERVICE_NAME, Some(settings.jwt_secret.clone()));
    let app = discovery::app(state, fabric);

    amora_services::serve(app, SERVICE_NAME, &settings.host, settings.port).await?;
    Ok(())
}
