//! Per-message seen marking, driven by viewport visibility.
//!
//! A message becomes eligible once it has stayed visible for a debounce
//! interval, so fast scroll-through does not mark everything seen. This
//! is the fine-grained path; the conversation fetch performs its own
//! coarse bulk marking server-side. Both are idempotent and neither can
//! regress an already-seen message.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use palaver_shared::constants::SEEN_DEBOUNCE_MS;
use palaver_shared::{MessageId, UserId};

use crate::timeline::Timeline;

#[derive(Debug)]
pub struct SeenTracker {
    viewer: UserId,
    /// When each currently-visible message entered the viewport.
    visible_since: HashMap<MessageId, Instant>,
    /// Marks already sent this session, so a slow server round-trip does
    /// not trigger duplicates.
    requested: HashSet<MessageId>,
    debounce: Duration,
}

impl SeenTracker {
    pub fn new(viewer: UserId) -> Self {
        Self {
            viewer,
            visible_since: HashMap::new(),
            requested: HashSet::new(),
            debounce: Duration::from_millis(SEEN_DEBOUNCE_MS),
        }
    }

    /// A message entered the viewport. Re-entering does not reset the
    /// clock of a message that never left.
    pub fn message_visible(&mut self, message_id: MessageId, now: Instant) {
        self.visible_since.entry(message_id).or_insert(now);
    }

    /// A message scrolled out of the viewport before its debounce ran
    /// out: it no longer counts as read.
    pub fn message_hidden(&mut self, message_id: MessageId) {
        self.visible_since.remove(&message_id);
    }

    /// Messages whose visibility has been held long enough, filtered to
    /// the ones actually eligible: not our own, not already seen, not
    /// already requested. The returned ids are recorded as requested —
    /// calling this in a loop yields each id exactly once.
    pub fn due(&mut self, timeline: &Timeline, now: Instant) -> Vec<MessageId> {
        let mut due = Vec::new();

        for (&id, &since) in &self.visible_since {
            if now.duration_since(since) < self.debounce {
                continue;
            }
            if self.requested.contains(&id) {
                continue;
            }
            let Some(message) = timeline.get(id) else {
                continue;
            };
            if message.sender == self.viewer || message.seen {
                continue;
            }
            due.push(id);
        }

        for id in &due {
            self.requested.insert(*id);
        }
        due
    }

    /// Forget everything. Called on conversation switch or disconnect so
    /// no pending visibility clock fires into a torn-down view.
    pub fn reset(&mut self) {
        self.visible_since.clear();
        self.requested.clear();
    }
}
