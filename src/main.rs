use std::net::SocketAddr;

use ragflow_backend::config::AppPaths;
use ragflow_backend::logging;
use ragflow_backend::server::router::build_router;
use ragflow_backend::state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let paths = AppPaths::new();
    logging::init(&paths.log_dir);

    let state = AppState::initialize().await?;
    let port = state.config.server.port;

    let app = build_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr).await?;

    tracing::info!("Listening on {}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
