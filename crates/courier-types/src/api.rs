use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::{MessageDetail, ReceivedMessage, SentMessage, UserDetail, UserProfile};

// -- JWT Claims --

/// JWT claims shared between token issuing (auth handlers) and the
/// require_auth middleware. Canonical definition lives here in courier-types.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    /// The authenticated username.
    pub sub: String,
    pub exp: usize,
}

// -- Auth --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RegisterRequest {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct TokenResponse {
    pub token: String,
}

// -- Users --

#[derive(Debug, Serialize)]
pub struct UsersResponse {
    pub users: Vec<UserProfile>,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub user: UserDetail,
}

#[derive(Debug, Serialize)]
pub struct SentMessagesResponse {
    pub messages: Vec<SentMessage>,
}

#[derive(Debug, Serialize)]
pub struct ReceivedMessagesResponse {
    pub messages: Vec<ReceivedMessage>,
}

// -- Messages --

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    pub to_username: String,
    pub body: String,
}

#[derive(Debug, Serialize)]
pub struct MessageCreated {
    pub id: i64,
    pub from_username: String,
    pub to_username: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageCreatedResponse {
    pub message: MessageCreated,
}

#[derive(Debug, Serialize)]
pub struct MessageDetailResponse {
    pub message: MessageDetail,
}

#[derive(Debug, Serialize)]
pub struct MessageRead {
    pub id: i64,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
pub struct MessageReadResponse {
    pub message: MessageRead,
}
