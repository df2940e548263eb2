use gavel::{app::App, config::AppConfig, logger::init_tracing};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    sqlx::any::install_default_drivers();

    let is_production = std::env::var("APP_ENV").unwrap_or_default() == "production";
    init_tracing(is_production);

    tracing::info!("Starting gavel backend...");

    let config = AppConfig::from_env();
    let app = App::build(config).await?;
    app.start_background_jobs();

    tracing::info!("Backend started; waiting for shutdown signal");

    tokio::signal::ctrl_c().await?;
    tracing::info!("Shutdown signal received");

    app.shutdown().await;
    Ok(())
}
