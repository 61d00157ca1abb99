//! Group membership.
//!
//! Just enough for the delivery core: fanout asks "who are the members of
//! this group", the typing relay asks "is this user a member". The
//! administrative workflow around groups lives elsewhere.

use chrono::Utc;
use rusqlite::params;

use palaver_shared::{GroupId, UserId};

use crate::database::{fmt_ts, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::Group;

impl Database {
    pub fn create_group(&self, name: &str) -> Result<Group> {
        let group = Group {
            id: GroupId::new(),
            name: name.to_string(),
            created_at: Utc::now(),
        };
        self.conn().execute(
            "INSERT INTO groups (id, name, created_at) VALUES (?1, ?2, ?3)",
            params![group.id.to_string(), group.name, fmt_ts(group.created_at)],
        )?;
        Ok(group)
    }

    pub fn get_group(&self, id: GroupId) -> Result<Group> {
        self.conn()
            .query_row(
                "SELECT id, name, created_at FROM groups WHERE id = ?1",
                params![id.to_string()],
                |row| {
                    let id: String = row.get(0)?;
                    let name: String = row.get(1)?;
                    let created_at: String = row.get(2)?;
                    Ok((id, name, created_at))
                },
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
            .and_then(|(id, name, created_at)| {
                Ok(Group {
                    id: GroupId(uuid::Uuid::parse_str(&id)?),
                    name,
                    created_at: parse_ts(&created_at)?,
                })
            })
    }

    /// Idempotent: re-adding an existing member is a no-op.
    pub fn add_group_member(&self, group: GroupId, user: UserId) -> Result<()> {
        self.conn().execute(
            "INSERT OR IGNORE INTO group_members (group_id, user_id) VALUES (?1, ?2)",
            params![group.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    pub fn remove_group_member(&self, group: GroupId, user: UserId) -> Result<()> {
        self.conn().execute(
            "DELETE FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.to_string(), user.to_string()],
        )?;
        Ok(())
    }

    /// All members of a group, in no particular order.
    pub fn group_members(&self, group: GroupId) -> Result<Vec<UserId>> {
        let mut stmt = self
            .conn()
            .prepare("SELECT user_id FROM group_members WHERE group_id = ?1")?;
        let rows = stmt.query_map(params![group.to_string()], |row| row.get::<_, String>(0))?;

        let mut members = Vec::new();
        for row in rows {
            members.push(UserId(uuid::Uuid::parse_str(&row?)?));
        }
        Ok(members)
    }

    pub fn is_group_member(&self, group: GroupId, user: UserId) -> Result<bool> {
        let count: u32 = self.conn().query_row(
            "SELECT COUNT(*) FROM group_members WHERE group_id = ?1 AND user_id = ?2",
            params![group.to_string(), user.to_string()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}
