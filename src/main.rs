use anyhow::Context;
use food_crawler::{api::routes::create_router, config::Config, AppState};
use tokio::net::TcpListener;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,food_crawler=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load().context("failed to load configuration")?;
    let server_addr = config.server_addr;

    let app_state = AppState::from_config(config)
        .await
        .context("failed to initialize application state")?;
    let app = create_router(app_state);

    let listener = TcpListener::bind(server_addr)
        .await
        .with_context(|| format!("failed to bind {}", server_addr))?;

    info!("listening on {}", server_addr);
    axum::serve(listener, app).await?;

    Ok(())
}
