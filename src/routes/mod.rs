//! Router assembly.
//!
//! SYSTEM CONTEXT
//! ==============
//! An application builds its own router, protects routes with the guards in
//! [`guard`], and passes the result to [`install`]. `install` merges the
//! auth routes and wraps everything in the session layer, which must be the
//! outermost auth-related layer so guards and extractors can find it.

pub mod auth;
pub mod guard;

use axum::Router;
use axum::middleware;
use axum::routing::get;

use crate::state::AppState;

/// `/login`, `/auth_callback`, `/logout`, and `/secured_route` when enabled.
pub fn auth_routes(state: &AppState) -> Router<AppState> {
    let router = Router::new()
        .route(auth::LOGIN_PATH, get(auth::login))
        .route(auth::CALLBACK_PATH, get(auth::auth_callback))
        .route(auth::LOGOUT_PATH, get(auth::logout));

    if !state.config.secured_route {
        return router;
    }
    router.route(
        auth::SECURED_PATH,
        get(auth::secured_route).route_layer(middleware::from_fn_with_state(state.clone(), guard::login_required)),
    )
}

/// Merge the auth routes into `app` and install the session layer.
pub fn install(app: Router, state: AppState) -> Router {
    app.merge(auth_routes(&state).with_state(state.clone()))
        .layer(middleware::from_fn_with_state(state, guard::session_layer))
}

#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
