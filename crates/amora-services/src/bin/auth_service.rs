use amora_core::config::{env_opt, env_or, env_port, require_env};
use amora_core::middleware::FabricState;
use amora_services::auth::{self, AuthState, SERVICE_NAME};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    amora_core::logging::init(SERVICE_NAME);

    let jwt_secret = require_env("JWT_SECRET")?;
    let telegram_secret = env_opt("TELEGRAM_BOT_SECRET_TOKEN");
    let host = env_or("AUTH_HOST", "0.0.0.0");
    let port = env_port("AUTH_PORT", 8081)?;

    let state = AuthState::new(jwt_secret.clone(), telegram_secret);
    let fabric = FabricState::new(SERVICE_NAME, Some(jwt_secret));
    let app = auth::app(state, fabric);

    amora_services::serve(app, SERVICE_NAME, &host, port).await?;
    Ok(())
}
