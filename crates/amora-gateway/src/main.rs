use amora_gateway::{GatewayConfig, GatewayServer};

#[tokio::main]
async fn main() -> eyre::Result<()> {
    amora_core::logging::init("api-gateway");

    let config = GatewayConfig::from_env()?;
    tracing::info!(
        event_type = "service_start",
        port = config.port,
        "starting api-gateway"
    );

    GatewayServer::new(config).start().await?;
    Ok(())
}
