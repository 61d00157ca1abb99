//! The per-conversation message timeline.
//!
//! One ordered, deduplicated sequence of messages, merged from three
//! sources: page fetches, optimistic local sends, and push events. The
//! transport guarantees no ordering across those sources, so the timeline
//! re-establishes a total order from `createdAt` after every merge — that
//! re-sort is load-bearing, not cosmetic.

use palaver_shared::constants::DEDUP_TOLERANCE_MS;
use palaver_shared::{Message, MessageId};

/// One timeline slot.
#[derive(Debug, Clone)]
pub struct TimelineEntry {
    pub message: Message,
    /// Whether `message.id` is server-assigned. An optimistic send starts
    /// false and flips when the authoritative copy arrives.
    pub authoritative: bool,
    /// Arrival order, the tie-breaker for equal timestamps.
    arrival: u64,
}

/// What a merge did with the incoming message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeOutcome {
    /// New entry appended (and the sequence re-sorted).
    Inserted,
    /// An existing placeholder was replaced by the authoritative copy.
    Confirmed,
    /// Duplicate of an entry we already trust; nothing changed.
    Dropped,
}

#[derive(Debug, Default)]
pub struct Timeline {
    entries: Vec<TimelineEntry>,
    next_arrival: u64,
    /// Whether older history remains beyond the oldest fetched page.
    pub has_more: bool,
}

impl Timeline {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            next_arrival: 0,
            has_more: true,
        }
    }

    /// Merge one incoming message.
    ///
    /// Duplicate detection is by id, or — when one of the two copies is
    /// still a local placeholder — by identical content within a small
    /// timestamp tolerance. The fuzzy rule is what reconciles an
    /// optimistic send with its server echo arriving before the HTTP
    /// response; it must not collapse two genuinely distinct messages
    /// that happen to say the same thing, hence the placeholder guard.
    pub fn merge(&mut self, incoming: Message, authoritative: bool) -> MergeOutcome {
        let existing = self.entries.iter_mut().find(|e| {
            if e.message.id == incoming.id {
                return true;
            }
            if e.authoritative && authoritative {
                return false;
            }
            e.message.content == incoming.content
                && (e.message.created_at - incoming.created_at)
                    .num_milliseconds()
                    .abs()
                    <= DEDUP_TOLERANCE_MS
        });

        let outcome = match existing {
            Some(entry) => {
                if authoritative && !entry.authoritative {
                    entry.message = incoming;
                    entry.authoritative = true;
                    MergeOutcome::Confirmed
                } else {
                    return MergeOutcome::Dropped;
                }
            }
            None => {
                self.entries.push(TimelineEntry {
                    message: incoming,
                    authoritative,
                    arrival: self.next_arrival,
                });
                self.next_arrival += 1;
                MergeOutcome::Inserted
            }
        };

        self.resort();
        outcome
    }

    /// Merge a fetched page (authoritative, already oldest-first).
    /// Returns how many entries were actually new.
    pub fn merge_page(&mut self, messages: Vec<Message>) -> usize {
        messages
            .into_iter()
            .filter(|m| self.merge(m.clone(), true) != MergeOutcome::Dropped)
            .count()
    }

    /// Rewrite an entry's content after an edit. Returns false when the
    /// message is not in view (nothing to do).
    pub fn apply_edit(&mut self, message_id: MessageId, new_content: &str) -> bool {
        match self.entry_mut(message_id) {
            Some(entry) => {
                entry.message.content = new_content.to_string();
                entry.message.edited = true;
                true
            }
            None => false,
        }
    }

    /// Replace an entry with its tombstoned record.
    pub fn apply_delete(&mut self, deleted: Message) -> bool {
        match self.entry_mut(deleted.id) {
            Some(entry) => {
                entry.message = deleted;
                entry.authoritative = true;
                true
            }
            None => false,
        }
    }

    /// Flip entries to seen. Monotonic: already-seen entries keep their
    /// original `seen_at`. Returns how many actually transitioned.
    pub fn apply_seen(
        &mut self,
        message_ids: &[MessageId],
        seen_at: chrono::DateTime<chrono::Utc>,
    ) -> usize {
        let mut changed = 0;
        for id in message_ids {
            if let Some(entry) = self.entry_mut(*id) {
                if !entry.message.seen {
                    entry.message.seen = true;
                    entry.message.seen_at = Some(seen_at);
                    changed += 1;
                }
            }
        }
        changed
    }

    /// Drop an entry outright. Only meant for rolling back a failed
    /// optimistic send; confirmed history is never removed, it is
    /// tombstoned.
    pub fn remove(&mut self, message_id: MessageId) -> Option<Message> {
        let idx = self
            .entries
            .iter()
            .position(|e| e.message.id == message_id)?;
        Some(self.entries.remove(idx).message)
    }

    pub fn get(&self, message_id: MessageId) -> Option<&Message> {
        self.entries
            .iter()
            .find(|e| e.message.id == message_id)
            .map(|e| &e.message)
    }

    pub fn entries(&self) -> &[TimelineEntry] {
        &self.entries
    }

    pub fn messages(&self) -> impl Iterator<Item = &Message> {
        self.entries.iter().map(|e| &e.message)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn entry_mut(&mut self, message_id: MessageId) -> Option<&mut TimelineEntry> {
        self.entries.iter_mut().find(|e| e.message.id == message_id)
    }

    // Equal timestamps keep arrival order.
    fn resort(&mut self) {
        self.entries
            .sort_by_key(|e| (e.message.created_at, e.arrival));
    }
}
