use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Public profile fields, safe to show to any logged-in user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserProfile {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
}

/// Full profile including timestamps, returned only to the user themself.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserDetail {
    pub username: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub join_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

/// A message as listed from the sender's side: counterpart under `to_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SentMessage {
    pub id: i64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub to_user: UserProfile,
}

/// A message as listed from the recipient's side: counterpart under `from_user`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub id: i64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub from_user: UserProfile,
}

/// Full message detail with both participants expanded.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageDetail {
    pub id: i64,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub from_user: UserProfile,
    pub to_user: UserProfile,
}
