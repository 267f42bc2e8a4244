use axum::routing::get;
use axum::{Json, Router, middleware};
use lac_auth::config::{AuthConfig, debug_enabled, env_parse};
use lac_auth::{AppState, CurrentUser, RoleGuard, RoleRequirement, UserView, install, role_required};
use tower_http::trace::TraceLayer;
use tracing::Level;

/// Minimum role level for `/admin`.
const ADMIN_ROLE: i64 = 3;

async fn index(current: CurrentUser) -> Json<UserView> {
    Json(current.view())
}

async fn admin(current: CurrentUser) -> String {
    format!("Welcome to the admin area, {}.", current.username().unwrap_or("admin"))
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    let level = if debug_enabled() { Level::DEBUG } else { Level::INFO };
    tracing_subscriber::fmt().with_max_level(level).init();

    let config = AuthConfig::from_env().expect("invalid auth config");
    let port: u16 = env_parse("PORT", 3000);
    tracing::info!(service_url = %config.service_url, app_id = %config.app_id, "auth config loaded");

    let state = AppState::from_config(config).expect("auth client init failed");

    let admin_routes = Router::new()
        .route("/admin", get(admin))
        .route_layer(middleware::from_fn_with_state(
            RoleGuard::new(state.clone(), RoleRequirement::new(ADMIN_ROLE)),
            role_required,
        ));
    let app = Router::new()
        .route("/", get(index))
        .merge(admin_routes)
        .with_state(state.clone());
    let app = install(app, state.clone()).layer(TraceLayer::new_for_http());

    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{port}"))
        .await
        .expect("failed to bind");

    tracing::info!(%port, "lac-auth demo listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            tokio::signal::ctrl_c().await.ok();
            tracing::info!("shutdown requested");
        })
        .await
        .expect("server failed");

    state.verifier.shutdown();
}
