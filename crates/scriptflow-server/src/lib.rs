pub mod error;
pub mod identity;
pub mod routes;
pub mod state;

use axum::routing::{get, post, put};
use axum::Router;
use scriptflow_core::config::{Config, WarnLevel};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve_on()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(routes::health::health))
        // Events (SSE)
        .route("/api/events", get(routes::events::sse_events))
        // Webhook proxy
        .route("/api/webhook/{slug}", post(routes::webhook::forward))
        // Projects
        .route(
            "/api/projects",
            get(routes::projects::list_projects).post(routes::projects::create_project),
        )
        .route(
            "/api/projects/{id}",
            get(routes::projects::get_project)
                .patch(routes::projects::update_project)
                .delete(routes::projects::delete_project),
        )
        // Steps
        .route("/api/projects/{id}/steps", get(routes::steps::list_steps))
        .route(
            "/api/projects/{id}/steps/{n}",
            put(routes::steps::write_step),
        )
        .route(
            "/api/projects/{id}/steps/{n}/run",
            post(routes::steps::start_run).get(routes::steps::get_run),
        )
        // Prompts
        .route("/api/prompts", get(routes::prompts::list_prompts))
        .route(
            "/api/prompts/{n}",
            get(routes::prompts::get_prompt).put(routes::prompts::update_prompt),
        )
        .route(
            "/api/prompts/{n}/history",
            get(routes::prompts::prompt_history),
        )
        // Accounts
        .route("/api/accounts/me", put(routes::accounts::upsert_me))
        // Models
        .route("/api/models", get(routes::models::list_models))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(app_state)
}

/// Serve on a pre-bound listener until ctrl-c.
///
/// Accepting a bound listener lets the caller read the actual port first
/// (useful when `port = 0` and the OS picks a free port).
pub async fn serve_on(app_state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let shutdown = app_state.shutdown.clone();
    let app = build_router(app_state);

    tracing::info!("scriptflow server listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = tokio::signal::ctrl_c().await;
            tracing::info!("shutting down; cancelling active polls");
            shutdown.cancel();
        })
        .await?;
    Ok(())
}

/// Open the configured datastore, seed default prompts and serve on `port`.
pub async fn serve(config: Config, port: u16) -> anyhow::Result<()> {
    let mut fatal = Vec::new();
    for warning in config.validate() {
        tracing::warn!(level = ?warning.level, "{}", warning.message);
        if warning.level == WarnLevel::Error {
            fatal.push(warning.message);
        }
    }
    if !fatal.is_empty() {
        anyhow::bail!("invalid configuration: {}", fatal.join("; "));
    }
    let client = reqwest::Client::new();
    let store = scriptflow_core::store::open(&config.datastore, client.clone())?;
    let seeded = store.seed_prompts().await?;
    if !seeded.is_empty() {
        tracing::info!(count = seeded.len(), "seeded default prompts");
    }

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}")).await?;
    serve_on(AppState::new(config, store, client), listener).await
}
