//! Delivery fanout: turn one persisted mutation into push events for every
//! reachable participant.
//!
//! Durability lives in the store, not the transport. There is no outbox
//! and no retry: an unreachable recipient is simply skipped and will pick
//! the state up on their next fetch. Ordering across recipients is not
//! guaranteed either; the client's re-sort by `createdAt` is the backstop.

use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use palaver_shared::protocol::ServerEvent;
use palaver_shared::{Message, MessageId, UserId};
use palaver_store::Database;

use crate::presence::PresenceRegistry;

/// What happened to one recipient's push. There is no failure state:
/// `Queued` means "offline now, will reconcile via fetch".
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Queued,
}

pub struct Fanout {
    registry: Arc<PresenceRegistry>,
    db: Arc<Mutex<Database>>,
}

impl Fanout {
    pub fn new(registry: Arc<PresenceRegistry>, db: Arc<Mutex<Database>>) -> Self {
        Self { registry, db }
    }

    /// A new message was persisted. Pushed to every recipient and echoed
    /// to the sender's own connection, so the sender's optimistic entry
    /// can reconcile against the authoritative record.
    pub fn message_created(&self, message: &Message) {
        let mut targets = self.recipients(message);
        targets.push(message.sender);

        for user in targets {
            self.push(user, ServerEvent::NewMessage { message: message.clone() });
        }
    }

    /// A message's content was rewritten. The actor already holds the
    /// result from their own request; only the other participants hear.
    pub fn message_edited(&self, message: &Message) {
        let event = ServerEvent::MessageEdited {
            message_id: message.id,
            new_content: message.content.clone(),
        };
        for user in self.recipients(message) {
            self.push(user, event.clone());
        }
    }

    /// A message was tombstoned. Everyone in the conversation hears,
    /// the deleting side included — either participant may have acted.
    pub fn message_deleted(&self, message: &Message) {
        let mut targets = self.recipients(message);
        if !targets.contains(&message.sender) {
            targets.push(message.sender);
        }

        for user in targets {
            self.push(user, ServerEvent::MessageDeleted { message: message.clone() });
        }
    }

    /// Messages were marked seen by `by`; tell the original sender.
    pub fn messages_seen(
        &self,
        sender: UserId,
        by: UserId,
        message_ids: Vec<MessageId>,
        seen_at: DateTime<Utc>,
    ) {
        if message_ids.is_empty() {
            return;
        }
        self.push(
            sender,
            ServerEvent::MessagesSeen { by, message_ids, seen_at },
        );
    }

    /// Resolve the recipient set of a mutation: the other participant for
    /// a direct message, all members except the actor for a group one.
    fn recipients(&self, message: &Message) -> Vec<UserId> {
        if let Some(receiver) = message.receiver {
            return vec![receiver];
        }

        let Some(group) = message.group else {
            return Vec::new();
        };

        // The sender's request already succeeded at the persistence layer;
        // a membership lookup failure only degrades delivery to "fetch on
        // next page load".
        match self.db.lock().expect("db lock poisoned").group_members(group) {
            Ok(members) => members.into_iter().filter(|m| *m != message.sender).collect(),
            Err(e) => {
                warn!(group = %group, error = %e, "failed to resolve group members for fanout");
                Vec::new()
            }
        }
    }

    fn push(&self, user: UserId, event: ServerEvent) -> DeliveryOutcome {
        if self.registry.send_to(user, event) {
            DeliveryOutcome::Delivered
        } else {
            debug!(user = %user, "recipient offline, queued for next fetch");
            DeliveryOutcome::Queued
        }
    }
}
