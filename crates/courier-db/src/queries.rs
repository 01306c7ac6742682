use crate::Database;
use crate::models::{MessageRow, UserRow};
use anyhow::Result;
use chrono::{DateTime, Utc};
use rusqlite::Connection;

impl Database {
    // -- Users --

    pub fn create_user(
        &self,
        username: &str,
        password_hash: &str,
        first_name: &str,
        last_name: &str,
        phone: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, first_name, last_name, phone, join_at, last_login_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                rusqlite::params![username, password_hash, first_name, last_name, phone, now, now],
            )?;
            Ok(())
        })
    }

    pub fn get_user(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, username))
    }

    pub fn list_users(&self) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT username, password, first_name, last_name, phone, join_at, last_login_at
                 FROM users
                 ORDER BY username",
            )?;

            let rows = stmt
                .query_map([], row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    /// Bump last_login_at and return the new value straight from the UPDATE's
    /// own returned row. None means the user does not exist.
    pub fn touch_last_login(
        &self,
        username: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let updated = conn
                .query_row(
                    "UPDATE users SET last_login_at = ?1 WHERE username = ?2
                     RETURNING last_login_at",
                    rusqlite::params![now, username],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(updated)
        })
    }

    /// Batch-fetch profiles for a set of usernames.
    pub fn get_profiles(&self, usernames: &[String]) -> Result<Vec<UserRow>> {
        if usernames.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=usernames.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT username, password, first_name, last_name, phone, join_at, last_login_at
                 FROM users WHERE username IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::types::ToSql> = usernames
                .iter()
                .map(|u| u as &dyn rusqlite::types::ToSql)
                .collect();

            let rows = stmt
                .query_map(params.as_slice(), row_to_user)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    pub fn insert_message(
        &self,
        from_username: &str,
        to_username: &str,
        body: &str,
        now: DateTime<Utc>,
    ) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages (from_username, to_username, body, sent_at, read_at)
                 VALUES (?1, ?2, ?3, ?4, NULL)",
                rusqlite::params![from_username, to_username, body, now],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_message(&self, id: i64) -> Result<Option<MessageRow>> {
        self.with_conn(|conn| {
            let row = conn
                .query_row(
                    "SELECT id, from_username, to_username, body, sent_at, read_at
                     FROM messages WHERE id = ?1",
                    [id],
                    row_to_message,
                )
                .optional()?;

            Ok(row)
        })
    }

    /// Stamp read_at and return it straight from the UPDATE. None means the
    /// message does not exist. Recipient-only enforcement is the caller's job.
    pub fn mark_read(&self, id: i64, now: DateTime<Utc>) -> Result<Option<DateTime<Utc>>> {
        self.with_conn(|conn| {
            let read_at = conn
                .query_row(
                    "UPDATE messages SET read_at = ?1 WHERE id = ?2 RETURNING read_at",
                    rusqlite::params![now, id],
                    |row| row.get(0),
                )
                .optional()?;

            Ok(read_at)
        })
    }

    pub fn messages_from(&self, username: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, "from_username", username))
    }

    pub fn messages_to(&self, username: &str) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| query_messages(conn, "to_username", username))
    }
}

/// True when the error is SQLite's UNIQUE-constraint violation, i.e. the
/// row collided with an existing key (duplicate username).
pub fn is_unique_violation(err: &anyhow::Error) -> bool {
    matches!(
        err.downcast_ref::<rusqlite::Error>(),
        Some(rusqlite::Error::SqliteFailure(e, _))
            if e.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
    )
}

fn query_user(conn: &Connection, username: &str) -> Result<Option<UserRow>> {
    let mut stmt = conn.prepare(
        "SELECT username, password, first_name, last_name, phone, join_at, last_login_at
         FROM users WHERE username = ?1",
    )?;

    let row = stmt.query_row([username], row_to_user).optional()?;

    Ok(row)
}

fn query_messages(conn: &Connection, side: &str, username: &str) -> Result<Vec<MessageRow>> {
    // `side` is one of our own column names, never caller input
    let sql = format!(
        "SELECT id, from_username, to_username, body, sent_at, read_at
         FROM messages WHERE {} = ?1
         ORDER BY id",
        side
    );

    let mut stmt = conn.prepare(&sql)?;
    let rows = stmt
        .query_map([username], row_to_message)?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn row_to_user(row: &rusqlite::Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        username: row.get(0)?,
        password: row.get(1)?,
        first_name: row.get(2)?,
        last_name: row.get(3)?,
        phone: row.get(4)?,
        join_at: row.get(5)?,
        last_login_at: row.get(6)?,
    })
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        from_username: row.get(1)?,
        to_username: row.get(2)?,
        body: row.get(3)?,
        sent_at: row.get(4)?,
        read_at: row.get(5)?,
    })
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn db_with_users(names: &[&str]) -> Database {
        let db = Database::open_in_memory().unwrap();
        for name in names {
            db.create_user(name, "hash", "First", "Last", "555-0100", Utc::now())
                .unwrap();
        }
        db
    }

    #[test]
    fn duplicate_username_is_unique_violation() {
        let db = db_with_users(&["alice"]);
        let before = db.get_user("alice").unwrap().unwrap();

        let err = db
            .create_user("alice", "other-hash", "A", "B", "555-0199", Utc::now())
            .unwrap_err();
        assert!(is_unique_violation(&err));

        // first registration untouched
        let after = db.get_user("alice").unwrap().unwrap();
        assert_eq!(after.password, before.password);
        assert_eq!(after.first_name, before.first_name);
        assert_eq!(after.join_at, before.join_at);
    }

    #[test]
    fn unrelated_errors_are_not_unique_violations() {
        let err = anyhow::anyhow!("something else");
        assert!(!is_unique_violation(&err));
    }

    #[test]
    fn touch_last_login_returns_the_updated_row() {
        let db = db_with_users(&["alice"]);
        let before = db.get_user("alice").unwrap().unwrap().last_login_at;

        let updated = db.touch_last_login("alice", Utc::now()).unwrap().unwrap();
        assert!(updated > before);

        let stored = db.get_user("alice").unwrap().unwrap().last_login_at;
        assert_eq!(stored, updated);

        assert!(db.touch_last_login("ghost", Utc::now()).unwrap().is_none());
    }

    #[test]
    fn list_users_ordered_by_username() {
        let db = db_with_users(&["carol", "alice", "bob"]);
        let names: Vec<String> = db
            .list_users()
            .unwrap()
            .into_iter()
            .map(|u| u.username)
            .collect();
        assert_eq!(names, ["alice", "bob", "carol"]);
    }

    #[test]
    fn messages_from_covers_every_counterpart() {
        let db = db_with_users(&["alice", "bob", "carol"]);
        db.insert_message("alice", "bob", "hi bob", Utc::now()).unwrap();
        db.insert_message("alice", "carol", "hi carol", Utc::now()).unwrap();

        let rows = db.messages_from("alice").unwrap();
        assert_eq!(rows.len(), 2);

        let counterparts: Vec<String> = rows.iter().map(|m| m.to_username.clone()).collect();
        let profiles = db.get_profiles(&counterparts).unwrap();
        let mut names: Vec<String> = profiles.into_iter().map(|p| p.username).collect();
        names.sort();
        assert_eq!(names, ["bob", "carol"]);
    }

    #[test]
    fn messages_to_lists_only_incoming() {
        let db = db_with_users(&["alice", "bob"]);
        db.insert_message("alice", "bob", "one", Utc::now()).unwrap();
        db.insert_message("bob", "alice", "two", Utc::now()).unwrap();

        let rows = db.messages_to("bob").unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].body, "one");
        assert_eq!(rows[0].from_username, "alice");
    }

    #[test]
    fn get_profiles_empty_input() {
        let db = db_with_users(&["alice"]);
        assert!(db.get_profiles(&[]).unwrap().is_empty());
    }

    #[test]
    fn mark_read_only_touches_the_given_message() {
        let db = db_with_users(&["alice", "bob"]);
        let first = db.insert_message("alice", "bob", "one", Utc::now()).unwrap();
        let second = db.insert_message("alice", "bob", "two", Utc::now()).unwrap();

        assert!(db.get_message(first).unwrap().unwrap().read_at.is_none());

        let read_at = db.mark_read(first, Utc::now()).unwrap().unwrap();
        assert_eq!(db.get_message(first).unwrap().unwrap().read_at, Some(read_at));

        // marking another message leaves the first untouched
        db.mark_read(second, Utc::now()).unwrap().unwrap();
        assert_eq!(db.get_message(first).unwrap().unwrap().read_at, Some(read_at));

        assert!(db.mark_read(999, Utc::now()).unwrap().is_none());
    }
}
