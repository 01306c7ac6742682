use std::collections::HashMap;

use axum::{
    Extension, Json,
    extract::{Path, State},
};

use courier_db::models::{MessageRow, UserRow};
use courier_types::api::{
    Claims, ReceivedMessagesResponse, SentMessagesResponse, UserResponse, UsersResponse,
};
use courier_types::models::{ReceivedMessage, SentMessage, UserDetail, UserProfile};

use crate::auth::AppState;
use crate::error::{ApiError, ApiResult};
use crate::middleware::require_self;

pub(crate) fn public_profile(row: &UserRow) -> UserProfile {
    UserProfile {
        username: row.username.clone(),
        first_name: row.first_name.clone(),
        last_name: row.last_name.clone(),
        phone: row.phone.clone(),
    }
}

pub async fn list_users(
    State(state): State<AppState>,
    Extension(_claims): Extension<Claims>,
) -> ApiResult<Json<UsersResponse>> {
    let db = state.clone();
    let rows = tokio::task::spawn_blocking(move || db.db.list_users())
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    let users = rows.iter().map(public_profile).collect();

    Ok(Json(UsersResponse { users }))
}

pub async fn get_user(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<UserResponse>> {
    require_self(&claims, &username)?;

    let db = state.clone();
    let name = username.clone();
    let row = tokio::task::spawn_blocking(move || db.db.get_user(&name))
        .await
        .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??
        .ok_or_else(|| ApiError::NotFound(format!("No such user: {username}")))?;

    Ok(Json(UserResponse {
        user: UserDetail {
            username: row.username,
            first_name: row.first_name,
            last_name: row.last_name,
            phone: row.phone,
            join_at: row.join_at,
            last_login_at: row.last_login_at,
        },
    }))
}

/// Messages addressed to the user, each carrying the sender's public profile.
pub async fn messages_to(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<ReceivedMessagesResponse>> {
    require_self(&claims, &username)?;

    let (rows, profiles) = fetch_with_counterparts(&state, username, Direction::To).await?;

    let messages = rows
        .into_iter()
        .map(|row| {
            let from_user = profiles
                .get(&row.from_username)
                .cloned()
                .ok_or_else(|| missing_counterpart(row.id, &row.from_username))?;
            Ok(ReceivedMessage {
                id: row.id,
                body: row.body,
                sent_at: row.sent_at,
                read_at: row.read_at,
                from_user,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(ReceivedMessagesResponse { messages }))
}

/// Messages authored by the user, each carrying the recipient's public profile.
pub async fn messages_from(
    State(state): State<AppState>,
    Path(username): Path<String>,
    Extension(claims): Extension<Claims>,
) -> ApiResult<Json<SentMessagesResponse>> {
    require_self(&claims, &username)?;

    let (rows, profiles) = fetch_with_counterparts(&state, username, Direction::From).await?;

    let messages = rows
        .into_iter()
        .map(|row| {
            let to_user = profiles
                .get(&row.to_username)
                .cloned()
                .ok_or_else(|| missing_counterpart(row.id, &row.to_username))?;
            Ok(SentMessage {
                id: row.id,
                body: row.body,
                sent_at: row.sent_at,
                read_at: row.read_at,
                to_user,
            })
        })
        .collect::<ApiResult<Vec<_>>>()?;

    Ok(Json(SentMessagesResponse { messages }))
}

#[derive(Clone, Copy)]
enum Direction {
    To,
    From,
}

/// Fetch all messages on one side of a user's threads plus the public
/// profiles of every distinct counterpart, in two queries. A user may
/// converse with many peers, so each row resolves its own counterpart.
async fn fetch_with_counterparts(
    state: &AppState,
    username: String,
    direction: Direction,
) -> ApiResult<(Vec<MessageRow>, HashMap<String, UserProfile>)> {
    let db = state.clone();
    let (rows, counterparts) = tokio::task::spawn_blocking(move || {
        let rows = match direction {
            Direction::To => db.db.messages_to(&username)?,
            Direction::From => db.db.messages_from(&username)?,
        };

        let mut distinct: Vec<String> = Vec::new();
        for row in &rows {
            let counterpart = match direction {
                Direction::To => &row.from_username,
                Direction::From => &row.to_username,
            };
            if !distinct.contains(counterpart) {
                distinct.push(counterpart.clone());
            }
        }

        let counterparts = db.db.get_profiles(&distinct)?;
        Ok::<_, anyhow::Error>((rows, counterparts))
    })
    .await
    .map_err(|e| anyhow::anyhow!("spawn_blocking join error: {e}"))??;

    let profiles = counterparts
        .iter()
        .map(|row| (row.username.clone(), public_profile(row)))
        .collect();

    Ok((rows, profiles))
}

fn missing_counterpart(message_id: i64, username: &str) -> ApiError {
    ApiError::Internal(anyhow::anyhow!(
        "message {message_id} references missing user {username}"
    ))
}
