//! Domain model structs persisted in the database, beyond the shared
//! [`Message`] record (which is defined in `palaver-shared` because it is
//! also the wire shape).
//!
//! [`Message`]: palaver_shared::Message

use chrono::{DateTime, Utc};

use palaver_shared::{GroupId, Message, UserId};

// ---------------------------------------------------------------------------
// Presence
// ---------------------------------------------------------------------------

/// Durable presence status, mirrored from the in-memory registry on a
/// best-effort basis. Read paths use it for "last seen" display only;
/// delivery never consults it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PresenceStatus {
    Online,
    Offline,
}

impl PresenceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PresenceStatus::Online => "online",
            PresenceStatus::Offline => "offline",
        }
    }
}

impl std::str::FromStr for PresenceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "online" => Ok(PresenceStatus::Online),
            "offline" => Ok(PresenceStatus::Offline),
            other => Err(format!("unknown presence status: {other}")),
        }
    }
}

/// A user's durable presence row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PresenceRow {
    pub user_id: UserId,
    pub status: PresenceStatus,
    /// Set when the user goes offline, cleared while online.
    pub last_seen: Option<DateTime<Utc>>,
}

// ---------------------------------------------------------------------------
// Groups
// ---------------------------------------------------------------------------

/// A message group. Administrative CRUD lives elsewhere; the store only
/// needs enough to resolve fanout recipient sets.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub id: GroupId,
    pub name: String,
    pub created_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Pagination
// ---------------------------------------------------------------------------

/// One page of conversation history.
///
/// Messages are ordered oldest-first, ready to render top-to-bottom.
/// `has_more` is a heuristic (page was full), good enough to gate a
/// "load older" control.
#[derive(Debug, Clone)]
pub struct ConversationPage {
    pub messages: Vec<Message>,
    pub has_more: bool,
}
