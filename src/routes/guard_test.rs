use super::*;
use crate::routes::install;
use crate::services::client::Endpoint;
use crate::session::format_expiry;
use crate::state::test_helpers::{MockService, response_session, session_cookie, test_app_state};
use axum::Router;
use axum::body::{Body, to_bytes};
use axum::http::header::{COOKIE, LOCATION};
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use serde_json::{Value, json};
use time::OffsetDateTime;
use tower::ServiceExt;

fn tomorrow() -> String {
    format_expiry(OffsetDateTime::now_utc() + time::Duration::days(1)).unwrap()
}

fn live_record() -> SessionRecord {
    SessionRecord { token: Some("abc".into()), expiry: Some(tomorrow()), logged_in: Some(true), next: None }
}

fn service_with_role(role: Value) -> Arc<MockService> {
    Arc::new(
        MockService::new()
            .reply(Endpoint::Verify, 200, json!({ "status_machine": "OK" }))
            .reply(
                Endpoint::UserInfo,
                200,
                json!({ "status_machine": "OK", "user_info": { "username": "a", "role": role } }),
            ),
    )
}

fn app(state: &AppState) -> Router {
    let protected = Router::new()
        .route("/reports", get(|| async { "reports" }))
        .route("/twice", get(|a: CurrentUser, b: CurrentUser| async move { format!("{} {}", *a, *b) }))
        .route_layer(from_fn_with_state(state.clone(), login_required));
    let admin = Router::new()
        .route("/admin", get(|| async { "admin" }))
        .route_layer(from_fn_with_state(RoleGuard::new(state.clone(), RoleRequirement::new(3)), role_required));
    let vip = Router::new()
        .route("/vip", get(|| async { "vip" }))
        .route_layer(from_fn_with_state(
            RoleGuard::new(state.clone(), RoleRequirement::new(3).or_redirect("/upgrade")),
            role_required,
        ));
    let open = Router::new().route("/whoami", get(|current: CurrentUser| async move { current.to_string() }));

    let app = protected
        .merge(admin)
        .merge(vip)
        .merge(open)
        .with_state(state.clone());
    install(app, state.clone())
}

async fn get_with(app: Router, uri: &str, cookie: Option<String>) -> Response {
    let mut builder = axum::http::Request::builder().uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(COOKIE, cookie);
    }
    app.oneshot(builder.body(Body::empty()).unwrap())
        .await
        .unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

// =============================================================================
// login_required
// =============================================================================

#[tokio::test]
async fn login_required_redirects_empty_session_with_next() {
    let state = test_app_state(Arc::new(MockService::new()));

    let response = get_with(app(&state), "/reports?page=2", None).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[LOCATION], "/login?next=%2Freports%3Fpage%3D2");
    let record = response_session(&state, &response).unwrap();
    assert_eq!(record.logged_in, Some(false));
}

#[tokio::test]
async fn login_required_allows_live_session() {
    let state = test_app_state(service_with_role(json!(1)));
    let cookie = session_cookie(&state, &live_record());

    let response = get_with(app(&state), "/reports", Some(cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_text(response).await, "reports");
}

#[tokio::test]
async fn auth_state_is_derived_once_per_request() {
    let mock = service_with_role(json!(1));
    let state = test_app_state(mock.clone());
    let cookie = session_cookie(&state, &live_record());

    let response = get_with(app(&state), "/twice", Some(cookie)).await;

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(mock.calls(Endpoint::UserInfo), 1);
}

#[tokio::test]
async fn unmodified_session_sets_no_cookie() {
    let state = test_app_state(service_with_role(json!(1)));
    let cookie = session_cookie(&state, &live_record());

    let response = get_with(app(&state), "/reports", Some(cookie)).await;

    assert!(response_session(&state, &response).is_none());
}

#[tokio::test]
async fn forged_cookie_is_ignored() {
    let state = test_app_state(Arc::new(MockService::new()));
    let mut foreign = crate::state::test_helpers::test_config();
    foreign.session_secret = Some("someone-else".into());
    let foreign_state = AppState::new(foreign, Arc::new(MockService::new()));
    let cookie = session_cookie(&foreign_state, &live_record());

    let response = get_with(app(&state), "/reports", Some(cookie)).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
}

// =============================================================================
// role_required
// =============================================================================

#[tokio::test]
async fn role_below_minimum_is_forbidden() {
    let state = test_app_state(service_with_role(json!(2)));
    let cookie = session_cookie(&state, &live_record());

    let response = get_with(app(&state), "/admin", Some(cookie)).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    let body = body_text(response).await;
    assert!(body.contains("Level required: 3"));
    assert!(body.contains("Your role: 2"));
}

#[tokio::test]
async fn role_at_or_above_minimum_is_allowed() {
    for role in [json!(3), json!(4), json!("3")] {
        let state = test_app_state(service_with_role(role.clone()));
        let cookie = session_cookie(&state, &live_record());

        let response = get_with(app(&state), "/admin", Some(cookie)).await;

        assert_eq!(response.status(), StatusCode::OK, "role {role} should pass");
    }
}

#[tokio::test]
async fn role_guard_redirects_logged_out_to_login() {
    let state = test_app_state(Arc::new(MockService::new()));

    let response = get_with(app(&state), "/admin", None).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[LOCATION], "/login?next=%2Fadmin");
}

#[tokio::test]
async fn role_guard_uses_fallback_route() {
    let state = test_app_state(service_with_role(json!(2)));
    let cookie = session_cookie(&state, &live_record());

    let response = get_with(app(&state), "/vip", Some(cookie)).await;

    assert_eq!(response.status(), StatusCode::TEMPORARY_REDIRECT);
    assert_eq!(response.headers()[LOCATION], "/upgrade");
}

#[tokio::test]
async fn missing_profile_denies_role() {
    let mock = Arc::new(
        MockService::new()
            .reply(Endpoint::Verify, 200, json!({ "status_machine": "OK" }))
            .fail(Endpoint::UserInfo),
    );
    let state = test_app_state(mock);
    let cookie = session_cookie(&state, &live_record());

    let response = get_with(app(&state), "/admin", Some(cookie)).await;

    assert_eq!(response.status(), StatusCode::FORBIDDEN);
    assert!(body_text(response).await.contains("Your role: None"));
}

// =============================================================================
// CurrentUser
// =============================================================================

#[tokio::test]
async fn current_user_reads_profile() {
    let state = test_app_state(service_with_role(json!(3)));
    let cookie = session_cookie(&state, &live_record());

    let response = get_with(app(&state), "/whoami", Some(cookie)).await;

    assert_eq!(body_text(response).await, "User(username=a, email=None, role=3, permissions=None)");
}

#[tokio::test]
async fn invalid_token_aborts_with_401_and_clears_token() {
    let mock = Arc::new(MockService::new().reply(Endpoint::UserInfo, 401, json!({ "status_machine": "INVALID" })));
    let state = test_app_state(mock);
    let cookie = session_cookie(&state, &live_record());

    let response = get_with(app(&state), "/whoami", Some(cookie)).await;

    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let record = response_session(&state, &response).unwrap();
    assert!(record.token.is_none());
    assert_eq!(body_text(response).await, "Invalid token. Please log in again.");
}

#[tokio::test]
async fn malformed_expiry_is_server_error() {
    let state = test_app_state(Arc::new(MockService::new()));
    let record = SessionRecord { expiry: Some("soon".into()), ..live_record() };
    let cookie = session_cookie(&state, &record);

    let response = get_with(app(&state), "/whoami", Some(cookie)).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

#[tokio::test]
async fn extractor_without_session_layer_fails_loudly() {
    let state = test_app_state(Arc::new(MockService::new()));
    let bare = Router::new()
        .route("/whoami", get(|current: CurrentUser| async move { current.to_string() }))
        .with_state(state);

    let response = get_with(bare, "/whoami", None).await;

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
}

// =============================================================================
// RoleRequirement::check
// =============================================================================

#[tokio::test]
async fn check_compares_role_levels() {
    for (role, allowed) in [(2, false), (3, true), (4, true)] {
        let state = test_app_state(service_with_role(json!(role)));
        let session = Session::new(live_record());
        let user = AuthState::derive(&state, &session).await.unwrap();

        let result = RoleRequirement::new(3).check(&user, "/admin");

        assert_eq!(result.is_ok(), allowed, "role {role}");
    }
}
