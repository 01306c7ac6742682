use std::sync::Arc;

use argon2::{
    Algorithm, Argon2, Params, PasswordHash, PasswordHasher, PasswordVerifier, Version,
    password_hash::{SaltString, rand_core::OsRng},
};
use axum::{Json, extract::State, http::StatusCode, response::IntoResponse};
use jsonwebtoken::{EncodingKey, Header, encode};

use courier_db::Database;
use courier_types::api::{Claims, LoginRequest, RegisterRequest, TokenResponse};

use crate::error::{ApiError, ApiResult};

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Database,
    pub jwt_secret: String,
    /// Argon2 time-cost work factor used when hashing new passwords.
    pub hash_time_cost: u32,
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> ApiResult<impl IntoResponse> {
    // Reject incomplete payloads before touching the store
    for (field, value) in [
        ("username", &req.username),
        ("password", &req.password),
        ("first_name", &req.first_name),
        ("last_name", &req.last_name),
        ("phone", &req.phone),
    ] {
        if value.trim().is_empty() {
            return Err(ApiError::Validation(format!("{field} is required")));
        }
    }

    let password_hash = hash_password(&req.password, state.hash_time_cost)?;

    // join_at and last_login_at both start at registration time
    let now = chrono::Utc::now();
    let username = req.username.clone();

    let db = state.clone();
    let inserted = tokio::task::spawn_blocking(move || {
        db.db.create_user(
            &req.username,
            &password_hash,
            &req.first_name,
            &req.last_name,
            &req.phone,
            now,
        )
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))?;

    if let Err(e) = inserted {
        if courier_db::is_unique_violation(&e) {
            return Err(ApiError::Conflict("Username taken. Please pick another.".into()));
        }
        return Err(ApiError::Internal(e));
    }

    let token = create_token(&state.jwt_secret, &username)?;

    Ok((StatusCode::CREATED, Json(TokenResponse { token })))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> ApiResult<Json<TokenResponse>> {
    if req.username.trim().is_empty() || req.password.trim().is_empty() {
        return Err(ApiError::Validation("username and password are required".into()));
    }

    let db = state.clone();
    let username = req.username.clone();
    let user = tokio::task::spawn_blocking(move || db.db.get_user(&username))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    // Unknown user and wrong password are the same failure to the caller
    let authenticated = match &user {
        Some(user) => verify_password(&req.password, &user.password),
        None => false,
    };
    if !authenticated {
        return Err(ApiError::Unauthorized("Invalid username or password".into()));
    }

    // Check the row returned by the UPDATE itself; None here means the user
    // vanished between the credential check and the timestamp bump.
    let db = state.clone();
    let username = req.username.clone();
    let now = chrono::Utc::now();
    let updated = tokio::task::spawn_blocking(move || db.db.touch_last_login(&username, now))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;
    if updated.is_none() {
        return Err(ApiError::NotFound(format!("No such user: {}", req.username)));
    }

    let token = create_token(&state.jwt_secret, &req.username)?;

    Ok(Json(TokenResponse { token }))
}

pub(crate) fn create_token(secret: &str, username: &str) -> anyhow::Result<String> {
    let claims = Claims {
        sub: username.to_string(),
        exp: (chrono::Utc::now() + chrono::Duration::days(30)).timestamp() as usize,
    };

    let token = encode(
        &Header::default(),
        &claims,
        &EncodingKey::from_secret(secret.as_bytes()),
    )?;

    Ok(token)
}

fn hash_password(password: &str, time_cost: u32) -> ApiResult<String> {
    let params = Params::new(Params::DEFAULT_M_COST, time_cost, Params::DEFAULT_P_COST, None)
        .map_err(|e| anyhow::anyhow!("bad argon2 params: {e}"))?;
    let argon2 = Argon2::new(Algorithm::Argon2id, Version::V0x13, params);

    let salt = SaltString::generate(&mut OsRng);
    let hash = argon2
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {e}"))?
        .to_string();

    Ok(hash)
}

/// Constant-time comparison is the hashing primitive's job; all we decide
/// here is verified-or-not.
fn verify_password(password: &str, stored_hash: &str) -> bool {
    let Ok(parsed) = PasswordHash::new(stored_hash) else {
        return false;
    };

    Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok()
}
