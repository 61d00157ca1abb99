//! One open conversation: the timeline plus every piece of ephemeral
//! state that must live and die with it.
//!
//! The session is the single ingestion point for all three message
//! sources (page fetches, optimistic sends, push events) and decides what
//! the view should do after each one. Fetches are bound to the
//! conversation they were issued for; a response landing after the user
//! switched away is discarded instead of corrupting the new view.

use std::time::Instant;

use tracing::debug;

use palaver_shared::protocol::ServerEvent;
use palaver_shared::{Conversation, Message, MessageId, MessageKind, UserId};

use crate::scroll::{ScrollAnchor, ScrollDirective};
use crate::seen::SeenTracker;
use crate::timeline::{MergeOutcome, Timeline};
use crate::typing::TypingIndicator;

/// Binds an in-flight fetch to the conversation (and session epoch) it
/// was issued for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchTicket {
    conversation: Conversation,
    epoch: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// The page was merged; `inserted` entries were actually new.
    Applied { inserted: usize },
    /// The fetch was superseded (conversation switch, reconnect); its
    /// result must not touch the timeline.
    Discarded,
}

/// What the view should do after ingesting one event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// A message entered the timeline; honor the scroll directive.
    Merged {
        merge: MergeOutcome,
        scroll: ScrollDirective,
    },
    /// An existing entry changed in place (edit, delete, seen).
    Updated,
    /// The typing indicator changed.
    TypingChanged,
    /// Not for this conversation (or not for the session at all).
    Ignored,
}

pub struct ChatSession {
    viewer: UserId,
    conversation: Conversation,
    pub timeline: Timeline,
    pub typing: TypingIndicator,
    pub seen: SeenTracker,
    pub scroll: ScrollAnchor,
    epoch: u64,
}

impl ChatSession {
    pub fn new(viewer: UserId, conversation: Conversation) -> Self {
        Self {
            viewer,
            conversation,
            timeline: Timeline::new(),
            typing: TypingIndicator::new(),
            seen: SeenTracker::new(viewer),
            scroll: ScrollAnchor::new(),
            epoch: 0,
        }
    }

    pub fn conversation(&self) -> Conversation {
        self.conversation
    }

    // ─── Fetch binding ───

    /// Stamp an outgoing fetch with this session's identity.
    pub fn begin_fetch(&self) -> FetchTicket {
        FetchTicket {
            conversation: self.conversation,
            epoch: self.epoch,
        }
    }

    /// Invalidate every in-flight fetch (reconnect, manual refresh).
    /// Ephemeral state is cleared with them.
    pub fn invalidate_fetches(&mut self) {
        self.epoch += 1;
        self.seen.reset();
        self.typing.clear();
    }

    /// Merge a fetched page, unless the ticket no longer matches.
    pub fn apply_page(
        &mut self,
        ticket: FetchTicket,
        messages: Vec<Message>,
        has_more: bool,
    ) -> PageOutcome {
        if ticket.conversation != self.conversation || ticket.epoch != self.epoch {
            debug!(
                expected = %self.conversation,
                got = %ticket.conversation,
                "discarding superseded fetch result"
            );
            return PageOutcome::Discarded;
        }

        let inserted = self.timeline.merge_page(messages);
        self.timeline.has_more = has_more;
        PageOutcome::Applied { inserted }
    }

    // ─── Sending ───

    /// Render a message locally before the server confirms it. The entry
    /// carries a temporary id and is reconciled against the authoritative
    /// copy when it arrives — via push echo or the send response,
    /// whichever lands first.
    pub fn optimistic_send(&mut self, content: &str) -> MessageId {
        let message = Message::new(
            self.viewer,
            self.conversation,
            content.to_string(),
            MessageKind::Text,
            None,
        );
        let id = message.id;
        self.timeline.merge(message, false);
        id
    }

    /// The send request returned: merge the authoritative record.
    pub fn confirm_send(&mut self, message: Message) -> MergeOutcome {
        self.timeline.merge(message, true)
    }

    /// The send request failed: roll the optimistic entry back and hand
    /// the drafted content to the caller, so the input box can be
    /// refilled and the user retries without retyping.
    pub fn fail_send(&mut self, temp_id: MessageId) -> Option<String> {
        self.timeline.remove(temp_id).map(|m| m.content)
    }

    // ─── Push ingestion ───

    pub fn apply_server_event(&mut self, event: ServerEvent, now: Instant) -> EventOutcome {
        match event {
            ServerEvent::NewMessage { message } => {
                if message.conversation_for(self.viewer) != Some(self.conversation) {
                    return EventOutcome::Ignored;
                }

                // A message from the peer supersedes their typing state.
                if message.sender != self.viewer {
                    self.typing.clear();
                }

                // Decide from the position before the merge grows the
                // view; our own sends always follow to the bottom.
                let scroll = if message.sender == self.viewer {
                    ScrollDirective::StickToBottom
                } else {
                    self.scroll.on_new_message()
                };

                let merge = self.timeline.merge(message, true);
                EventOutcome::Merged { merge, scroll }
            }

            ServerEvent::MessageEdited { message_id, new_content } => {
                if self.timeline.apply_edit(message_id, &new_content) {
                    EventOutcome::Updated
                } else {
                    EventOutcome::Ignored
                }
            }

            ServerEvent::MessageDeleted { message } => {
                if self.timeline.apply_delete(message) {
                    EventOutcome::Updated
                } else {
                    EventOutcome::Ignored
                }
            }

            ServerEvent::MessagesSeen { message_ids, seen_at, .. } => {
                if self.timeline.apply_seen(&message_ids, seen_at) > 0 {
                    EventOutcome::Updated
                } else {
                    EventOutcome::Ignored
                }
            }

            ServerEvent::Typing { from } => {
                if self.conversation == Conversation::Direct(from) {
                    self.typing.activate(from, None, now);
                    EventOutcome::TypingChanged
                } else {
                    EventOutcome::Ignored
                }
            }

            ServerEvent::StopTyping { from } => {
                if self.conversation == Conversation::Direct(from) && self.typing.is_typing() {
                    self.typing.clear();
                    EventOutcome::TypingChanged
                } else {
                    EventOutcome::Ignored
                }
            }

            ServerEvent::GroupTyping { group_id, from, user_name, is_typing } => {
                if self.conversation != Conversation::Group(group_id) || from == self.viewer {
                    return EventOutcome::Ignored;
                }
                if is_typing {
                    self.typing.activate(from, Some(user_name), now);
                } else {
                    self.typing.clear();
                }
                EventOutcome::TypingChanged
            }

            // Roster state belongs to the app shell, not a conversation.
            ServerEvent::OnlineUsers { .. } | ServerEvent::UserOffline { .. } => {
                EventOutcome::Ignored
            }
        }
    }

    // ─── Timers ───

    /// Advance session time: returns true when the typing indicator just
    /// auto-cleared (lost stop signal).
    pub fn tick(&mut self, now: Instant) -> bool {
        self.typing.tick(now)
    }

    /// Messages whose visibility debounce has run out and that should be
    /// marked seen now. Each id is yielded exactly once.
    pub fn due_seen_marks(&mut self, now: Instant) -> Vec<MessageId> {
        self.seen.due(&self.timeline, now)
    }
}
