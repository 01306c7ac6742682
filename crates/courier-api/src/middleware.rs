use axum::{
    extract::{Request, State},
    http::header,
    middleware::Next,
    response::Response,
};
use jsonwebtoken::{DecodingKey, Validation, decode};

use courier_db::models::MessageRow;
use courier_types::api::Claims;

use crate::auth::AppState;
use crate::error::ApiError;

/// Extract and validate the bearer token; on success the claims are made
/// available to handlers through request extensions. The signing secret
/// comes from shared state, injected once at startup.
pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let auth_header = req
        .headers()
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

    let token = auth_header
        .strip_prefix("Bearer ")
        .ok_or_else(|| ApiError::Unauthorized("Missing bearer token".into()))?;

    let claims = verify_token(&state.jwt_secret, token)?;

    req.extensions_mut().insert(claims);
    Ok(next.run(req).await)
}

pub fn verify_token(secret: &str, token: &str) -> Result<Claims, ApiError> {
    decode::<Claims>(
        token,
        &DecodingKey::from_secret(secret.as_bytes()),
        &Validation::default(),
    )
    .map(|data| data.claims)
    .map_err(|_| ApiError::Unauthorized("Invalid token".into()))
}

/// Capability check: the caller must be the user named in the path.
pub fn require_self(claims: &Claims, username: &str) -> Result<(), ApiError> {
    if claims.sub != username {
        return Err(ApiError::Forbidden("Access denied".into()));
    }
    Ok(())
}

/// Capability check: the caller must be a participant of the message.
pub fn require_participant(claims: &Claims, message: &MessageRow) -> Result<(), ApiError> {
    if claims.sub != message.from_username && claims.sub != message.to_username {
        return Err(ApiError::Forbidden(
            "Access denied. Cannot read this message".into(),
        ));
    }
    Ok(())
}

/// Capability check: the caller must be the recipient of the message.
pub fn require_recipient(claims: &Claims, message: &MessageRow) -> Result<(), ApiError> {
    if claims.sub != message.to_username {
        return Err(ApiError::Forbidden(
            "Action denied. Only the recipient can mark a message read".into(),
        ));
    }
    Ok(())
}
