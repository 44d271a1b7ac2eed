mod handlers;
pub mod state;

use axum::extract::DefaultBodyLimit;
use axum::routing::{get, post};
use axum::Router;
use state::AppState;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Largest accepted upload body.
const MAX_UPLOAD_BYTES: usize = 16 * 1024 * 1024;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/uploads", post(handlers::upload))
        .route(
            "/api/uploads/{name}",
            get(handlers::get_upload).delete(handlers::delete_upload),
        )
        .route("/api/uploads/{name}/results.csv", get(handlers::download_csv))
        .route("/api/uploads/{name}/map.geojson", get(handlers::map_layer))
        .route("/api/resolve", get(handlers::resolve))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(state: AppState, host: &str, port: u16) -> std::io::Result<()> {
    let app = build_router(Arc::new(state));
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Store geocoder listening on http://{}", addr);
    axum::serve(listener, app).await
}
