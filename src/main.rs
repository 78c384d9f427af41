use std::sync::Arc;

use tower_http::cors::CorsLayer;

use skirmish_backend::api;
use skirmish_backend::config::Config;
use skirmish_backend::metrics;
use skirmish_backend::rate_limit::ActionRateLimiter;
use skirmish_backend::room::{spawn_sweeper, RoomRegistry};

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();
    metrics::register_metrics();

    let cfg = Config::load();

    let registry = Arc::new(RoomRegistry::new());
    let rate_limiter = ActionRateLimiter::new();

    // Background sweeper removes rooms that never started within the TTL.
    spawn_sweeper(registry.clone());

    let mut app = api::router(registry, rate_limiter)
        .layer(CorsLayer::permissive())
        .layer(axum::middleware::from_fn(api::metrics_middleware));

    // Serve static frontend files if a static directory is configured
    if let Some(ref static_dir) = cfg.static_dir {
        if static_dir.exists() {
            tracing::info!("Serving static files from: {}", static_dir.display());
            let serve_dir = tower_http::services::ServeDir::new(static_dir)
                .not_found_service(tower_http::services::ServeFile::new(
                    static_dir.join("index.html"),
                ));
            app = app.fallback_service(serve_dir);
        } else {
            tracing::warn!(
                "Static directory not found: {} - frontend will not be served",
                static_dir.display()
            );
        }
    }

    let addr = format!("0.0.0.0:{}", cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|_| panic!("Failed to bind to {}", addr));

    tracing::info!("Skirmish backend listening on port {}", cfg.port);
    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
