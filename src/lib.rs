//! Delegated authentication for axum apps.
//!
//! ARCHITECTURE
//! ============
//! Users log in at an external auth service. This crate sends the browser
//! there, receives the token on `/auth_callback`, keeps it in an encrypted
//! session cookie, and derives a per-request [`CurrentUser`] from it. Live
//! tokens are re-verified in the background until logout or shutdown.
//!
//! ```ignore
//! let state = AppState::from_config(AuthConfig::from_env()?)?;
//! let app = Router::new()
//!     .route("/reports", get(reports))
//!     .route_layer(middleware::from_fn_with_state(state.clone(), login_required))
//!     .with_state(state.clone());
//! let app = install(app, state);
//! ```

pub mod config;
pub mod error;
pub mod routes;
pub mod services;
pub mod session;
pub mod state;

pub use config::{AuthConfig, ConfigError};
pub use error::AuthError;
pub use routes::guard::{CurrentUser, RoleGuard, RoleRequirement, login_required, role_required};
pub use routes::install;
pub use services::user::{AuthState, UserView};
pub use session::Session;
pub use state::AppState;
