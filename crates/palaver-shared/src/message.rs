//! The message record, in the exact shape it crosses the wire.
//!
//! The same struct is persisted by the store and pushed over the long-lived
//! channel, so there is a single source of truth for field names.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::TOMBSTONE_TEXT;
use crate::types::{Conversation, GroupId, MessageId, UserId};

/// What kind of content a message carries.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Video,
    File,
}

impl MessageKind {
    /// Placeholder text for a media message sent without a caption.
    pub fn placeholder_content(&self) -> &'static str {
        match self {
            MessageKind::Image => "📷 Photo",
            MessageKind::Video => "🎥 Video",
            MessageKind::File => "📎 File",
            MessageKind::Text => "",
        }
    }
}

impl std::fmt::Display for MessageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            MessageKind::Text => "text",
            MessageKind::Image => "image",
            MessageKind::Video => "video",
            MessageKind::File => "file",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for MessageKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(MessageKind::Text),
            "image" => Ok(MessageKind::Image),
            "video" => Ok(MessageKind::Video),
            "file" => Ok(MessageKind::File),
            other => Err(format!("unknown message kind: {other}")),
        }
    }
}

/// A single chat message.
///
/// Exactly one of `receiver` / `group` is set. `id`, `sender` and
/// `created_at` never change after creation; `seen` and `deleted` only move
/// false→true.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    pub sender: UserId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub receiver: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: MessageKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub seen: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seen_at: Option<DateTime<Utc>>,
    pub edited: bool,
    pub deleted: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_by: Option<UserId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deleted_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Message {
    /// Build a fresh, unseen message addressed to `conversation`.
    pub fn new(
        sender: UserId,
        conversation: Conversation,
        content: String,
        kind: MessageKind,
        media_url: Option<String>,
    ) -> Self {
        let (receiver, group) = match conversation {
            Conversation::Direct(peer) => (Some(peer), None),
            Conversation::Group(group) => (None, Some(group)),
        };
        Self {
            id: MessageId::new(),
            sender,
            receiver,
            group,
            content,
            kind,
            media_url,
            seen: false,
            seen_at: None,
            edited: false,
            deleted: false,
            deleted_by: None,
            deleted_at: None,
            created_at: Utc::now(),
        }
    }

    /// The conversation this message belongs to, from `viewer`'s side.
    /// `None` if the viewer is not a participant of a direct message.
    pub fn conversation_for(&self, viewer: UserId) -> Option<Conversation> {
        if let Some(group) = self.group {
            return Some(Conversation::Group(group));
        }
        let receiver = self.receiver?;
        if viewer == self.sender {
            Some(Conversation::Direct(receiver))
        } else if viewer == receiver {
            Some(Conversation::Direct(self.sender))
        } else {
            None
        }
    }

    /// Whether `user` is allowed to read (and delete) this message.
    pub fn is_participant(&self, user: UserId) -> bool {
        user == self.sender || self.receiver == Some(user)
    }

    /// Apply the delete-for-everyone mutation locally: tombstone the
    /// content and stop serving the media URL.
    pub fn tombstone(&mut self, by: UserId, at: DateTime<Utc>) {
        self.deleted = true;
        self.deleted_by = Some(by);
        self.deleted_at = Some(at);
        self.content = TOMBSTONE_TEXT.to_string();
        self.media_url = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serializes_with_wire_field_names() {
        let sender = UserId::new();
        let peer = UserId::new();
        let msg = Message::new(
            sender,
            Conversation::Direct(peer),
            "hello".to_string(),
            MessageKind::Text,
            None,
        );

        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["type"], "text");
        assert_eq!(json["createdAt"], serde_json::to_value(msg.created_at).unwrap());
        assert!(json.get("group").is_none());
        assert!(json.get("mediaUrl").is_none());
        assert_eq!(json["seen"], false);
    }

    #[test]
    fn conversation_is_symmetric_for_direct_messages() {
        let sender = UserId::new();
        let peer = UserId::new();
        let msg = Message::new(
            sender,
            Conversation::Direct(peer),
            "hi".to_string(),
            MessageKind::Text,
            None,
        );

        assert_eq!(msg.conversation_for(sender), Some(Conversation::Direct(peer)));
        assert_eq!(msg.conversation_for(peer), Some(Conversation::Direct(sender)));
        assert_eq!(msg.conversation_for(UserId::new()), None);
    }

    #[test]
    fn tombstone_clears_content_and_media() {
        let sender = UserId::new();
        let mut msg = Message::new(
            sender,
            Conversation::Direct(UserId::new()),
            "look at this".to_string(),
            MessageKind::Image,
            Some("/media/abc.png".to_string()),
        );

        msg.tombstone(sender, Utc::now());

        assert!(msg.deleted);
        assert_eq!(msg.content, TOMBSTONE_TEXT);
        assert_eq!(msg.media_url, None);
        assert_eq!(msg.deleted_by, Some(sender));
    }
}
