use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};

use courier_db::models::MessageRow;
use courier_types::api::{
    Claims, MessageCreated, MessageCreatedResponse, MessageDetailResponse, MessageRead,
    MessageReadResponse, SendMessageRequest,
};
use courier_types::models::{MessageDetail, UserProfile};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::{require_participant, require_recipient};
use crate::users::public_profile;

/// Message detail with both participant profiles. Participant-only.
pub async fn get_message(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MessageDetailResponse>> {
    let (row, from_user, to_user) = load_with_participants(&state, id).await?;
    require_participant(&claims, &row)?;

    Ok(Json(MessageDetailResponse {
        message: MessageDetail {
            id: row.id,
            body: row.body,
            sent_at: row.sent_at,
            read_at: row.read_at,
            from_user,
            to_user,
        },
    }))
}

/// Create a message from the authenticated caller to `to_username`.
pub async fn send_message(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> ApiResult<impl IntoResponse> {
    if req.to_username.trim().is_empty() || req.body.trim().is_empty() {
        return Err(ApiError::Validation("to_username and body are required".into()));
    }

    let SendMessageRequest { to_username, body } = req;
    let from_username = claims.sub;
    let now = chrono::Utc::now();

    let db = state.clone();
    let from = from_username.clone();
    let to = to_username.clone();
    let msg_body = body.clone();
    let id = tokio::task::spawn_blocking(move || {
        // The FK would reject an unknown recipient anyway; check first so the
        // caller gets a clean not-found instead of a constraint error
        if db.db.get_user(&to)?.is_none() {
            return Ok::<_, anyhow::Error>(None);
        }
        Ok(Some(db.db.insert_message(&from, &to, &msg_body, now)?))
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??
    .ok_or_else(|| ApiError::NotFound(format!("No such user: {to_username}")))?;

    Ok((
        StatusCode::CREATED,
        Json(MessageCreatedResponse {
            message: MessageCreated {
                id,
                from_username,
                to_username,
                body,
                sent_at: now,
            },
        }),
    ))
}

/// Stamp the read receipt. Recipient-only.
pub async fn mark_read(
    State(state): State<AppState>,
    Path(id): Path<i64>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<MessageReadResponse>> {
    let db = state.clone();
    let row = tokio::task::spawn_blocking(move || db.db.get_message(id))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??
        .ok_or_else(|| ApiError::NotFound(format!("No such message: {id}")))?;

    require_recipient(&claims, &row)?;

    let db = state.clone();
    let now = chrono::Utc::now();
    let read_at = tokio::task::spawn_blocking(move || db.db.mark_read(id, now))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??
        .ok_or_else(|| ApiError::NotFound(format!("No such message: {id}")))?;

    Ok(Json(MessageReadResponse {
        message: MessageRead { id, read_at },
    }))
}

async fn load_with_participants(
    state: &AppState,
    id: i64,
) -> ApiResult<(MessageRow, UserProfile, UserProfile)> {
    let db = state.clone();
    let (row, participants) = tokio::task::spawn_blocking(move || {
        let Some(row) = db.db.get_message(id)? else {
            return Ok::<_, anyhow::Error>((None, vec![]));
        };
        let participants =
            db.db.get_profiles(&[row.from_username.clone(), row.to_username.clone()])?;
        Ok((Some(row), participants))
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    let row = row.ok_or_else(|| ApiError::NotFound(format!("No such message: {id}")))?;

    let profiles: HashMap<String, UserProfile> = participants
        .iter()
        .map(|user| (user.username.clone(), public_profile(user)))
        .collect();

    let from_user = profiles
        .get(&row.from_username)
        .cloned()
        .ok_or_else(|| missing_participant(id, &row.from_username))?;
    let to_user = profiles
        .get(&row.to_username)
        .cloned()
        .ok_or_else(|| missing_participant(id, &row.to_username))?;

    Ok((row, from_user, to_user))
}

fn missing_participant(message_id: i64, username: &str) -> ApiError {
    ApiError::Internal(anyhow::anyhow!(
        "message {message_id} references missing user {username}"
    ))
}
