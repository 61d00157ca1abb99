//! Ingestion-boundary normalization.
//!
//! Some senders put a bare user id on the wire where others put an object
//! with id/name/avatar, and push payloads occasionally omit `createdAt`.
//! Everything is normalized into the shared [`Message`] shape here, once;
//! nothing downstream branches on payload shape.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use palaver_shared::protocol::ServerEvent;
use palaver_shared::{GroupId, Message, MessageId, MessageKind, UserId};

/// A user reference as it may appear on the wire: a bare id or an
/// expanded object.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum PeerRef {
    Id(UserId),
    Summary {
        #[serde(alias = "_id")]
        id: UserId,
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        avatar: Option<String>,
    },
}

impl PeerRef {
    pub fn id(&self) -> UserId {
        match self {
            PeerRef::Id(id) => *id,
            PeerRef::Summary { id, .. } => *id,
        }
    }
}

fn default_kind() -> MessageKind {
    MessageKind::Text
}

/// A message as received, before normalization.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(alias = "_id")]
    pub id: MessageId,
    pub sender: PeerRef,
    #[serde(default)]
    pub receiver: Option<PeerRef>,
    #[serde(default)]
    pub group: Option<GroupId>,
    #[serde(default)]
    pub content: String,
    #[serde(rename = "type", default = "default_kind")]
    pub kind: MessageKind,
    #[serde(default)]
    pub media_url: Option<String>,
    #[serde(default)]
    pub seen: bool,
    #[serde(default)]
    pub seen_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub edited: bool,
    #[serde(default)]
    pub deleted: bool,
    #[serde(default)]
    pub deleted_by: Option<PeerRef>,
    #[serde(default)]
    pub deleted_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl RawMessage {
    /// Collapse every wire shape into the canonical record. A missing
    /// `createdAt` falls back to `now` (arrival time).
    pub fn normalize(self, now: DateTime<Utc>) -> Message {
        Message {
            id: self.id,
            sender: self.sender.id(),
            receiver: self.receiver.map(|r| r.id()),
            group: self.group,
            content: self.content,
            kind: self.kind,
            media_url: self.media_url,
            seen: self.seen,
            seen_at: self.seen_at,
            edited: self.edited,
            deleted: self.deleted,
            deleted_by: self.deleted_by.map(|r| r.id()),
            deleted_at: self.deleted_at,
            created_at: self.created_at.unwrap_or(now),
        }
    }
}

/// Decode one push frame, normalizing any embedded message.
pub fn decode_event(text: &str, now: DateTime<Utc>) -> serde_json::Result<ServerEvent> {
    let value: serde_json::Value = serde_json::from_str(text)?;
    let event_name = value
        .get("event")
        .and_then(|e| e.as_str())
        .map(str::to_owned);

    // Message-bearing events go through RawMessage so duck-typed sender /
    // receiver fields are tolerated; everything else parses strictly.
    match event_name.as_deref() {
        Some("newMessage") => {
            let raw: RawMessage = serde_json::from_value(value["data"]["message"].clone())?;
            Ok(ServerEvent::NewMessage {
                message: raw.normalize(now),
            })
        }
        Some("messageDeleted") => {
            let raw: RawMessage = serde_json::from_value(value["data"]["message"].clone())?;
            Ok(ServerEvent::MessageDeleted {
                message: raw.normalize(now),
            })
        }
        _ => serde_json::from_value(value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bare_id_and_object_senders_normalize_identically() {
        let id = MessageId::new();
        let sender = UserId::new();
        let receiver = UserId::new();
        let now = Utc::now();

        let bare = serde_json::json!({
            "id": id,
            "sender": sender,
            "receiver": receiver,
            "content": "hi",
        });
        let expanded = serde_json::json!({
            "id": id,
            "sender": { "_id": sender, "name": "Alice", "avatar": null },
            "receiver": { "id": receiver },
            "content": "hi",
        });

        let a: RawMessage = serde_json::from_value(bare).unwrap();
        let b: RawMessage = serde_json::from_value(expanded).unwrap();

        assert_eq!(a.normalize(now), b.normalize(now));
    }

    #[test]
    fn missing_created_at_falls_back_to_arrival_time() {
        let now = Utc::now();
        let raw: RawMessage = serde_json::from_value(serde_json::json!({
            "id": MessageId::new(),
            "sender": UserId::new(),
            "receiver": UserId::new(),
            "content": "late",
        }))
        .unwrap();

        assert_eq!(raw.normalize(now).created_at, now);
    }

    #[test]
    fn decode_event_normalizes_new_message_payloads() {
        let now = Utc::now();
        let frame = serde_json::json!({
            "event": "newMessage",
            "data": { "message": {
                "id": MessageId::new(),
                "sender": { "_id": UserId::new(), "name": "Bob" },
                "receiver": UserId::new(),
                "content": "hello",
                "type": "text",
            }},
        });

        let event = decode_event(&frame.to_string(), now).unwrap();
        let ServerEvent::NewMessage { message } = event else {
            panic!("wrong event variant");
        };
        assert_eq!(message.content, "hello");
        assert_eq!(message.created_at, now);
    }

    #[test]
    fn decode_event_passes_plain_events_through() {
        let user = UserId::new();
        let frame = serde_json::json!({
            "event": "typing",
            "data": { "from": user },
        });

        let event = decode_event(&frame.to_string(), Utc::now()).unwrap();
        assert_eq!(event, ServerEvent::Typing { from: user });
    }
}
