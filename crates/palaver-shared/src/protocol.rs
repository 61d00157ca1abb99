//! Push-channel wire protocol.
//!
//! Every frame is a JSON object `{"event": <name>, "data": <payload>}`.
//! [`ServerEvent`] flows server→client over the long-lived channel;
//! [`ClientEvent`] flows client→server on the same socket.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::Message;
use crate::types::{GroupId, MessageId, UserId};

/// Events pushed from the server to connected clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerEvent {
    /// A new message was persisted. Also echoed to the sender's own
    /// connection, which is what lets an optimistic local entry reconcile
    /// against the authoritative record.
    NewMessage { message: Message },

    /// A message's content was rewritten by its sender.
    #[serde(rename_all = "camelCase")]
    MessageEdited {
        message_id: MessageId,
        new_content: String,
    },

    /// A message was tombstoned. Carries the full updated record so the
    /// client can replace its entry wholesale.
    MessageDeleted { message: Message },

    /// One or more messages were marked seen by `by`.
    #[serde(rename_all = "camelCase")]
    MessagesSeen {
        by: UserId,
        message_ids: Vec<MessageId>,
        seen_at: DateTime<Utc>,
    },

    /// The peer started typing in a direct conversation.
    Typing { from: UserId },

    /// The peer stopped typing.
    StopTyping { from: UserId },

    /// A member's typing state changed in a group.
    #[serde(rename_all = "camelCase")]
    GroupTyping {
        group_id: GroupId,
        from: UserId,
        user_name: String,
        is_typing: bool,
    },

    /// Full list of currently-online users. Sent to everyone on connect
    /// and in reply to an explicit pull.
    #[serde(rename = "online-users")]
    OnlineUsers { users: Vec<UserId> },

    /// A single user went offline. Deliberately not a full list rebroadcast.
    #[serde(rename = "user-offline", rename_all = "camelCase")]
    UserOffline { user_id: UserId },
}

/// Events sent by a client over its push connection.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientEvent {
    /// The sender started typing to `to`.
    Typing { to: UserId },

    /// The sender stopped typing to `to`.
    StopTyping { to: UserId },

    /// Typing state change inside a group.
    #[serde(rename_all = "camelCase")]
    GroupTyping {
        group_id: GroupId,
        is_typing: bool,
        user_name: String,
    },

    /// Ask for the current online list. Covers the race where a client
    /// connects just after the broadcast fired.
    #[serde(rename = "get-online-users")]
    GetOnlineUsers,

    /// Mark everything from `sender_id` addressed to this connection's
    /// user as seen.
    #[serde(rename_all = "camelCase")]
    MarkMessagesSeen { sender_id: UserId },

    /// Start receiving typing relays for a group.
    #[serde(rename_all = "camelCase")]
    JoinGroup { group_id: GroupId },

    /// Stop receiving typing relays for a group.
    #[serde(rename_all = "camelCase")]
    LeaveGroup { group_id: GroupId },
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::MessageKind;
    use crate::types::Conversation;

    #[test]
    fn server_event_roundtrip() {
        let msg = Message::new(
            UserId::new(),
            Conversation::Direct(UserId::new()),
            "hello".to_string(),
            MessageKind::Text,
            None,
        );
        let event = ServerEvent::NewMessage { message: msg };

        let json = serde_json::to_string(&event).unwrap();
        let restored: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, restored);
    }

    #[test]
    fn event_names_match_the_wire() {
        let ev = ServerEvent::OnlineUsers { users: vec![] };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "online-users");

        let ev = ServerEvent::UserOffline { user_id: UserId::new() };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "user-offline");

        let ev = ServerEvent::StopTyping { from: UserId::new() };
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "stopTyping");

        let ev = ClientEvent::GetOnlineUsers;
        let json = serde_json::to_value(&ev).unwrap();
        assert_eq!(json["event"], "get-online-users");
    }

    #[test]
    fn client_event_roundtrip() {
        let event = ClientEvent::MarkMessagesSeen { sender_id: UserId::new() };
        let json = serde_json::to_string(&event).unwrap();
        let restored: ClientEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(event, restored);
    }
}
