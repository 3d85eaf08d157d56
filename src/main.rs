//! OBC Mission Backend
//!
//! REST backend coordinating on-board courier missions: publishing, courier
//! applications and assignment, and the stage-by-stage delivery timeline.

mod api;
mod assignment;
mod auth;
mod config;
mod db;
mod errors;
mod geo;
mod models;
mod status;
mod timeline;

use std::sync::Arc;
use std::time::Duration;

use axum::{
    middleware,
    routing::{delete, get, patch, post, put},
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use auth::{AccessKeys, Role};
use config::Config;
use db::Repository;
use geo::{DisabledLookup, LocationLookup, OverpassLookup};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub repo: Arc<Repository>,
    pub geo: Arc<dyn LocationLookup>,
    pub config: Arc<Config>,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    let config = Config::from_env()?;

    // Initialize logging
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting OBC Mission Backend");
    tracing::info!("Database path: {:?}", config.db_path);
    tracing::info!("Bind address: {}", config.bind_addr);

    if config.auth_disabled() {
        tracing::warn!(
            "No API keys configured (OBC_ADMIN_PSK, OBC_COURIER_PSK). Authentication is disabled!"
        );
    } else if config.admin_psk.is_none() {
        tracing::warn!("OBC_ADMIN_PSK is not set; admin routes are unreachable");
    }

    // Initialize database
    let pool = db::init_database(&config.db_path).await?;
    let repo = Arc::new(Repository::new(pool));

    // Location lookup
    let geo: Arc<dyn LocationLookup> = match &config.geocoder_url {
        Some(url) => {
            tracing::info!("Location lookup via {}", url);
            Arc::new(OverpassLookup::new(
                url.clone(),
                Duration::from_secs(config.geocoder_timeout_secs),
            )?)
        }
        None => {
            tracing::info!("OBC_GEOCODER_URL not set; stage locations fall back to coordinates");
            Arc::new(DisabledLookup)
        }
    };

    // Create application state
    let state = AppState {
        repo,
        geo,
        config: Arc::new(config.clone()),
    };

    // Build router
    let app = create_router(state);

    // Start server
    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    tracing::info!("Server listening on {}", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Create the application router with all routes.
pub fn create_router(state: AppState) -> Router {
    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let admin_keys = AccessKeys::from_config(&state.config);
    let courier_keys = admin_keys.clone();

    // Dashboard-only routes
    let admin_routes = Router::new()
        .route("/missions", post(api::create_mission))
        .route("/missions/{id}/status", put(api::change_mission_status))
        .route("/applications", get(api::list_applications))
        .route("/applications/{id}/approve", post(api::approve_application))
        .route("/applications/{id}/reject", post(api::reject_application))
        .route("/couriers/pending", get(api::list_pending_couriers))
        .route("/couriers/{obc_id}/approve", post(api::approve_courier))
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(admin_keys.clone(), Role::Admin, req, next)
        }));

    // Routes the courier app uses; the admin key opens them too
    let courier_routes = Router::new()
        .route("/revision", get(api::get_revision))
        // Missions
        .route("/missions", get(api::list_missions))
        .route("/missions/pending", get(api::list_pending_missions))
        .route("/missions/{id}", get(api::get_mission))
        // Timeline
        .route("/missions/{id}/timeline", get(api::get_timeline))
        .route(
            "/missions/{id}/timeline/{stage}",
            patch(api::update_stage),
        )
        .route(
            "/missions/{id}/timeline/{stage}/toggle",
            post(api::toggle_stage),
        )
        .route(
            "/missions/{id}/timeline/{stage}/attachments",
            post(api::attach_stage_files),
        )
        // Applications
        .route("/missions/{id}/applications", post(api::apply_for_mission))
        .route(
            "/missions/{id}/applications/{obc_id}",
            delete(api::withdraw_application),
        )
        // Couriers
        .route("/couriers", post(api::register_courier))
        .route("/couriers/{obc_id}", get(api::get_courier))
        .route("/couriers/{obc_id}/missions", get(api::list_courier_missions))
        .route(
            "/couriers/{obc_id}/active-mission",
            get(api::get_active_mission),
        )
        .route("/couriers/{obc_id}/location", get(api::get_courier_location))
        // Notifications
        .route(
            "/users/{user_id}/notifications",
            get(api::list_notifications),
        )
        .route(
            "/users/{user_id}/notifications/{id}/read",
            post(api::mark_notification_read),
        )
        .layer(middleware::from_fn(move |req, next| {
            auth::psk_auth_layer(courier_keys.clone(), Role::Courier, req, next)
        }));

    // Health check (no auth required)
    let health_routes = Router::new().route("/health", get(health_check));

    Router::new()
        .nest("/api", admin_routes.merge(courier_routes))
        .merge(health_routes)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Health check endpoint.
async fn health_check() -> &'static str {
    "OK"
}
