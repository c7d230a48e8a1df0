use std::sync::Arc;

use reserva_infra::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    reserva_observability::init();

    let config = Config::from_env();
    let services = Arc::new(reserva_api::app::AppServices::connect(&config).await);
    let app = reserva_api::app::build_app(services);

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!(addr = %listener.local_addr()?, "listening");

    axum::serve(listener, app).await?;
    Ok(())
}
