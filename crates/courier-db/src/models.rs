//! Database row types mapping directly to SQLite rows. Kept separate from
//! the courier-types wire models so the DB layer stays independent.

use chrono::{DateTime, Utc};

pub struct UserRow {
    pub username: String,
    pub password: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: String,
    pub join_at: DateTime<Utc>,
    pub last_login_at: DateTime<Utc>,
}

pub struct MessageRow {
    pub id: i64,
    pub from_username: String,
    pub to_username: String,
    pub body: String,
    pub sent_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
}
