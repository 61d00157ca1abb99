//! Durable presence rows.
//!
//! These writes mirror the in-memory registry for "last seen" display.
//! They are best-effort by contract: callers log and swallow failures, and
//! delivery decisions never read this table.

use chrono::{DateTime, Utc};
use rusqlite::params;

use palaver_shared::UserId;

use crate::database::{fmt_ts, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::{PresenceRow, PresenceStatus};

impl Database {
    /// Record that `user` connected: status goes online, `last_seen`
    /// clears. Upserts so a user row exists after first contact.
    pub fn set_status_online(&self, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, status, last_seen) VALUES (?1, 'online', NULL)
             ON CONFLICT(id) DO UPDATE SET status = 'online', last_seen = NULL",
            params![user.to_string()],
        )?;
        Ok(())
    }

    /// Record that `user` disconnected at `last_seen`.
    pub fn set_status_offline(&self, user: UserId, last_seen: DateTime<Utc>) -> Result<()> {
        self.conn().execute(
            "INSERT INTO users (id, status, last_seen) VALUES (?1, 'offline', ?2)
             ON CONFLICT(id) DO UPDATE SET status = 'offline', last_seen = ?2",
            params![user.to_string(), fmt_ts(last_seen)],
        )?;
        Ok(())
    }

    /// Read a user's durable presence row.
    pub fn presence(&self, user: UserId) -> Result<PresenceRow> {
        self.conn()
            .query_row(
                "SELECT id, status, last_seen FROM users WHERE id = ?1",
                params![user.to_string()],
                |row| {
                    let id: String = row.get(0)?;
                    let status: String = row.get(1)?;
                    let last_seen: Option<String> = row.get(2)?;
                    Ok((id, status, last_seen))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
            .and_then(|(id, status, last_seen)| {
                Ok(PresenceRow {
                    user_id: UserId(uuid::Uuid::parse_str(&id)?),
                    status: status
                        .parse::<PresenceStatus>()
                        .unwrap_or(PresenceStatus::Offline),
                    last_seen: last_seen.map(|s| parse_ts(&s)).transpose()?,
                })
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_flips_and_last_seen_tracks_disconnect() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();
        let user = UserId::new();

        db.set_status_online(user).unwrap();
        let row = db.presence(user).unwrap();
        assert_eq!(row.status, PresenceStatus::Online);
        assert_eq!(row.last_seen, None);

        let when = Utc::now();
        db.set_status_offline(user, when).unwrap();
        let row = db.presence(user).unwrap();
        assert_eq!(row.status, PresenceStatus::Offline);
        assert_eq!(
            row.last_seen.unwrap().timestamp_micros(),
            when.timestamp_micros()
        );

        // Reconnecting clears last_seen again.
        db.set_status_online(user).unwrap();
        assert_eq!(db.presence(user).unwrap().last_seen, None);
    }

    #[test]
    fn unknown_user_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = Database::open_at(&dir.path().join("test.db")).unwrap();

        assert!(matches!(
            db.presence(UserId::new()),
            Err(StoreError::NotFound)
        ));
    }
}
