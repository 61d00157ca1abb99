//! Message persistence: create, conversation-scoped pagination, edit,
//! soft-delete, and seen-state transitions.
//!
//! Authorization is enforced at this layer, not the transport: only the
//! sender edits, only the receiver flips `seen`, and deletion is
//! delete-for-everyone (either direct participant; sender only in groups).

use chrono::{DateTime, Utc};
use rusqlite::params;

use palaver_shared::{Conversation, Message, MessageId, UserId};

use crate::database::{fmt_ts, parse_ts, Database};
use crate::error::{Result, StoreError};
use crate::models::ConversationPage;

const MESSAGE_COLS: &str = "id, sender_id, receiver_id, group_id, content, kind, media_url, \
     seen, seen_at, edited, deleted, deleted_by, deleted_at, created_at";

impl Database {
    pub fn insert_message(&self, message: &Message) -> Result<()> {
        self.conn().execute(
            "INSERT INTO messages (id, sender_id, receiver_id, group_id, content, kind, \
             media_url, seen, seen_at, edited, deleted, deleted_by, deleted_at, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            params![
                message.id.to_string(),
                message.sender.to_string(),
                message.receiver.map(|u| u.to_string()),
                message.group.map(|g| g.to_string()),
                message.content,
                message.kind.to_string(),
                message.media_url,
                message.seen,
                message.seen_at.map(fmt_ts),
                message.edited,
                message.deleted,
                message.deleted_by.map(|u| u.to_string()),
                message.deleted_at.map(fmt_ts),
                fmt_ts(message.created_at),
            ],
        )?;
        Ok(())
    }

    pub fn get_message(&self, id: MessageId) -> Result<Message> {
        self.conn()
            .query_row(
                &format!("SELECT {MESSAGE_COLS} FROM messages WHERE id = ?1"),
                params![id.to_string()],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => StoreError::Sqlite(other),
            })
    }

    /// One page of conversation history for `viewer`.
    ///
    /// Returns at most `limit` messages strictly older than `before`,
    /// selected newest-first but returned oldest-first. `has_more` is true
    /// iff the page came back full.
    pub fn conversation_page(
        &self,
        viewer: UserId,
        conversation: Conversation,
        before: Option<DateTime<Utc>>,
        limit: u32,
    ) -> Result<ConversationPage> {
        let before_s = before.map(fmt_ts);

        let mut messages = match conversation {
            Conversation::Direct(peer) => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages
                     WHERE receiver_id IS NOT NULL
                       AND ((sender_id = ?1 AND receiver_id = ?2)
                         OR (sender_id = ?2 AND receiver_id = ?1))
                       AND (?3 IS NULL OR created_at < ?3)
                     ORDER BY created_at DESC
                     LIMIT ?4"
                ))?;
                let rows = stmt.query_map(
                    params![viewer.to_string(), peer.to_string(), before_s, limit],
                    row_to_message,
                )?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
            Conversation::Group(group) => {
                let mut stmt = self.conn().prepare(&format!(
                    "SELECT {MESSAGE_COLS} FROM messages
                     WHERE group_id = ?1
                       AND (?2 IS NULL OR created_at < ?2)
                     ORDER BY created_at DESC
                     LIMIT ?3"
                ))?;
                let rows = stmt.query_map(
                    params![group.to_string(), before_s, limit],
                    row_to_message,
                )?;
                rows.collect::<std::result::Result<Vec<_>, _>>()?
            }
        };

        let has_more = messages.len() as u32 == limit && limit > 0;

        // Oldest first for the consumer, which renders top-to-bottom.
        messages.reverse();

        Ok(ConversationPage { messages, has_more })
    }

    /// Rewrite a message's content. Sender only; deleted messages cannot
    /// be edited.
    pub fn edit_content(
        &self,
        id: MessageId,
        by: UserId,
        new_content: &str,
    ) -> Result<Message> {
        let mut message = self.get_message(id)?;

        if message.sender != by {
            return Err(StoreError::Forbidden("only the sender may edit a message"));
        }
        if message.deleted {
            return Err(StoreError::Forbidden("cannot edit a deleted message"));
        }

        self.conn().execute(
            "UPDATE messages SET content = ?1, edited = 1 WHERE id = ?2",
            params![new_content, id.to_string()],
        )?;

        message.content = new_content.to_string();
        message.edited = true;
        Ok(message)
    }

    /// Tombstone a message for everyone: content replaced, media URL no
    /// longer served. Monotonic; deleting an already-deleted message is a
    /// no-op that returns the current record.
    pub fn mark_deleted(&self, id: MessageId, by: UserId) -> Result<Message> {
        let mut message = self.get_message(id)?;

        if message.deleted {
            return Ok(message);
        }

        let allowed = match message.group {
            // Group history is shared; only the author retracts.
            Some(_) => message.sender == by,
            None => message.is_participant(by),
        };
        if !allowed {
            return Err(StoreError::Forbidden(
                "only a conversation participant may delete a message",
            ));
        }

        let now = Utc::now();
        message.tombstone(by, now);

        self.conn().execute(
            "UPDATE messages
             SET deleted = 1, deleted_by = ?1, deleted_at = ?2, content = ?3, media_url = NULL
             WHERE id = ?4",
            params![
                by.to_string(),
                fmt_ts(now),
                message.content,
                id.to_string()
            ],
        )?;

        Ok(message)
    }

    /// Flip a single message to seen. Receiver only, monotonic: returns
    /// `Some(seen_at)` on the false→true transition and `None` when the
    /// message was already seen (idempotent, not an error).
    pub fn mark_seen(&self, id: MessageId, receiver: UserId) -> Result<Option<DateTime<Utc>>> {
        let message = self.get_message(id)?;

        if message.group.is_some() {
            return Err(StoreError::Forbidden(
                "seen state is tracked for direct messages only",
            ));
        }
        if message.receiver != Some(receiver) {
            return Err(StoreError::Forbidden(
                "only the receiver may mark a message seen",
            ));
        }
        if message.seen {
            return Ok(None);
        }

        let now = Utc::now();
        self.conn().execute(
            "UPDATE messages SET seen = 1, seen_at = ?1 WHERE id = ?2 AND seen = 0",
            params![fmt_ts(now), id.to_string()],
        )?;
        Ok(Some(now))
    }

    /// Mark every unseen direct message from `sender` to `receiver` as
    /// seen. This is the coarse fetch-side path; returns the ids that
    /// actually transitioned so the caller can notify the sender.
    pub fn mark_seen_bulk(
        &self,
        receiver: UserId,
        sender: UserId,
    ) -> Result<(Vec<MessageId>, DateTime<Utc>)> {
        let now = Utc::now();

        let mut stmt = self.conn().prepare(
            "SELECT id FROM messages
             WHERE sender_id = ?1 AND receiver_id = ?2 AND seen = 0",
        )?;
        let ids: Vec<MessageId> = stmt
            .query_map(params![sender.to_string(), receiver.to_string()], |row| {
                row.get::<_, String>(0)
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|s| Ok(MessageId(uuid::Uuid::parse_str(&s)?)))
            .collect::<Result<Vec<_>>>()?;

        if !ids.is_empty() {
            self.conn().execute(
                "UPDATE messages SET seen = 1, seen_at = ?1
                 WHERE sender_id = ?2 AND receiver_id = ?3 AND seen = 0",
                params![fmt_ts(now), sender.to_string(), receiver.to_string()],
            )?;
        }

        Ok((ids, now))
    }

    /// Operational purge of the whole message table. Not reachable from
    /// the REST surface.
    pub fn delete_all_messages(&self) -> Result<usize> {
        let affected = self.conn().execute("DELETE FROM messages", [])?;
        Ok(affected)
    }
}

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<Message> {
    let parse_uuid = |idx: usize, s: String| {
        uuid::Uuid::parse_str(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };
    let parse_time = |idx: usize, s: String| {
        parse_ts(&s).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, rusqlite::types::Type::Text, Box::new(e))
        })
    };

    let id = MessageId(parse_uuid(0, row.get(0)?)?);
    let sender = UserId(parse_uuid(1, row.get(1)?)?);
    let receiver = row
        .get::<_, Option<String>>(2)?
        .map(|s| parse_uuid(2, s).map(UserId))
        .transpose()?;
    let group = row
        .get::<_, Option<String>>(3)?
        .map(|s| parse_uuid(3, s).map(palaver_shared::GroupId))
        .transpose()?;
    let content: String = row.get(4)?;
    let kind = row
        .get::<_, String>(5)?
        .parse()
        .map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(
                5,
                rusqlite::types::Type::Text,
                e.into(),
            )
        })?;
    let media_url: Option<String> = row.get(6)?;
    let seen: bool = row.get(7)?;
    let seen_at = row
        .get::<_, Option<String>>(8)?
        .map(|s| parse_time(8, s))
        .transpose()?;
    let edited: bool = row.get(9)?;
    let deleted: bool = row.get(10)?;
    let deleted_by = row
        .get::<_, Option<String>>(11)?
        .map(|s| parse_uuid(11, s).map(UserId))
        .transpose()?;
    let deleted_at = row
        .get::<_, Option<String>>(12)?
        .map(|s| parse_time(12, s))
        .transpose()?;
    let created_at = parse_time(13, row.get(13)?)?;

    Ok(Message {
        id,
        sender,
        receiver,
        group,
        content,
        kind,
        media_url,
        seen,
        seen_at,
        edited,
        deleted,
        deleted_by,
        deleted_at,
        created_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use palaver_shared::constants::TOMBSTONE_TEXT;
    use palaver_shared::MessageKind;

    fn open_db(dir: &tempfile::TempDir) -> Database {
        Database::open_at(&dir.path().join("test.db")).unwrap()
    }

    fn direct(sender: UserId, receiver: UserId, content: &str) -> Message {
        Message::new(
            sender,
            Conversation::Direct(receiver),
            content.to_string(),
            MessageKind::Text,
            None,
        )
    }

    #[test]
    fn insert_and_get_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let msg = direct(UserId::new(), UserId::new(), "hello");
        db.insert_message(&msg).unwrap();

        let restored = db.get_message(msg.id).unwrap();
        assert_eq!(restored.id, msg.id);
        assert_eq!(restored.content, "hello");
        assert!(!restored.seen);
        assert_eq!(
            restored.created_at.timestamp_micros(),
            msg.created_at.timestamp_micros()
        );
    }

    #[test]
    fn get_missing_message_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        assert!(matches!(
            db.get_message(MessageId::new()),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn page_is_oldest_first_with_cursor() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let alice = UserId::new();
        let bob = UserId::new();
        let base = Utc::now();

        for i in 0..5 {
            let mut msg = direct(alice, bob, &format!("msg-{i}"));
            msg.created_at = base + Duration::seconds(i);
            db.insert_message(&msg).unwrap();
        }

        let page = db
            .conversation_page(bob, Conversation::Direct(alice), None, 3)
            .unwrap();
        assert!(page.has_more);
        assert_eq!(
            page.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["msg-2", "msg-3", "msg-4"]
        );

        // Next page: strictly older than the oldest entry of the first.
        let cursor = page.messages[0].created_at;
        let older = db
            .conversation_page(bob, Conversation::Direct(alice), Some(cursor), 3)
            .unwrap();
        assert!(!older.has_more);
        assert_eq!(
            older.messages.iter().map(|m| m.content.as_str()).collect::<Vec<_>>(),
            vec!["msg-0", "msg-1"]
        );
    }

    #[test]
    fn page_covers_both_directions() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let alice = UserId::new();
        let bob = UserId::new();
        let carol = UserId::new();

        let mut a = direct(alice, bob, "from alice");
        a.created_at = Utc::now();
        let mut b = direct(bob, alice, "from bob");
        b.created_at = a.created_at + Duration::seconds(1);
        let mut noise = direct(alice, carol, "other conversation");
        noise.created_at = a.created_at + Duration::seconds(2);

        db.insert_message(&a).unwrap();
        db.insert_message(&b).unwrap();
        db.insert_message(&noise).unwrap();

        let page = db
            .conversation_page(alice, Conversation::Direct(bob), None, 20)
            .unwrap();
        assert_eq!(page.messages.len(), 2);
        assert!(!page.has_more);
    }

    #[test]
    fn only_sender_may_edit() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let alice = UserId::new();
        let bob = UserId::new();
        let msg = direct(alice, bob, "tpyo");
        db.insert_message(&msg).unwrap();

        assert!(matches!(
            db.edit_content(msg.id, bob, "typo"),
            Err(StoreError::Forbidden(_))
        ));

        let edited = db.edit_content(msg.id, alice, "typo").unwrap();
        assert!(edited.edited);
        assert_eq!(db.get_message(msg.id).unwrap().content, "typo");
    }

    #[test]
    fn deleted_message_cannot_be_edited() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let alice = UserId::new();
        let msg = direct(alice, UserId::new(), "oops");
        db.insert_message(&msg).unwrap();
        db.mark_deleted(msg.id, alice).unwrap();

        assert!(matches!(
            db.edit_content(msg.id, alice, "rewritten"),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn delete_tombstones_for_everyone() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let alice = UserId::new();
        let bob = UserId::new();
        let mut msg = direct(alice, bob, "embarrassing");
        msg.media_url = Some("/media/photo.png".to_string());
        msg.kind = MessageKind::Image;
        db.insert_message(&msg).unwrap();

        // Either participant may delete a direct message.
        let deleted = db.mark_deleted(msg.id, bob).unwrap();
        assert!(deleted.deleted);
        assert_eq!(deleted.deleted_by, Some(bob));

        // The original content and media URL are gone from the read path.
        let read_back = db.get_message(msg.id).unwrap();
        assert_eq!(read_back.content, TOMBSTONE_TEXT);
        assert_eq!(read_back.media_url, None);

        // Monotonic: a second delete is a no-op, not an error.
        let again = db.mark_deleted(msg.id, alice).unwrap();
        assert_eq!(again.deleted_by, Some(bob));
    }

    #[test]
    fn outsider_cannot_delete() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let msg = direct(UserId::new(), UserId::new(), "private");
        db.insert_message(&msg).unwrap();

        assert!(matches!(
            db.mark_deleted(msg.id, UserId::new()),
            Err(StoreError::Forbidden(_))
        ));
    }

    #[test]
    fn seen_is_monotonic_and_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let alice = UserId::new();
        let bob = UserId::new();
        let msg = direct(alice, bob, "hello");
        db.insert_message(&msg).unwrap();

        // Sender cannot mark their own message seen.
        assert!(matches!(
            db.mark_seen(msg.id, alice),
            Err(StoreError::Forbidden(_))
        ));

        let first = db.mark_seen(msg.id, bob).unwrap();
        assert!(first.is_some());

        // Second call is a no-op, and the stored seen_at does not move.
        let stored = db.get_message(msg.id).unwrap();
        let second = db.mark_seen(msg.id, bob).unwrap();
        assert!(second.is_none());
        assert_eq!(db.get_message(msg.id).unwrap().seen_at, stored.seen_at);
        assert!(db.get_message(msg.id).unwrap().seen);
    }

    #[test]
    fn bulk_seen_marks_only_unseen_from_sender() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_db(&dir);

        let alice = UserId::new();
        let bob = UserId::new();

        let m1 = direct(alice, bob, "one");
        let mut m2 = direct(alice, bob, "two");
        m2.created_at = m1.created_at + Duration::seconds(1);
        let m3 = direct(bob, alice, "reply");
        db.insert_message(&m1).unwrap();
        db.insert_message(&m2).unwrap();
        db.insert_message(&m3).unwrap();
        db.mark_seen(m1.id, bob).unwrap();

        let (ids, _) = db.mark_seen_bulk(bob, alice).unwrap();
        assert_eq!(ids, vec![m2.id]);

        // Idempotent: nothing left to transition.
        let (ids, _) = db.mark_seen_bulk(bob, alice).unwrap();
        assert!(ids.is_empty());

        // Bob's own message to Alice was untouched.
        assert!(!db.get_message(m3.id).unwrap().seen);
    }
}
