pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod users;

use axum::{
    Router,
    routing::{get, post},
};

use crate::auth::AppState;
use crate::middleware::require_auth;

/// Build the full application router over the given state. Everything
/// except registration and login sits behind the auth gate.
pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .with_state(state.clone());

    let protected = Router::new()
        .route("/users", get(users::list_users))
        .route("/users/{username}", get(users::get_user))
        .route("/users/{username}/to", get(users::messages_to))
        .route("/users/{username}/from", get(users::messages_from))
        .route("/messages", post(messages::send_message))
        .route("/messages/{id}", get(messages::get_message))
        .route("/messages/{id}/read", post(messages::mark_read))
        .layer(axum::middleware::from_fn_with_state(state.clone(), require_auth))
        .with_state(state);

    Router::new().merge(public).merge(protected)
}
