//! Scroll anchoring.
//!
//! Hard invariant: a reader scrolled up into history is never yanked to
//! the bottom by an incoming message. Auto-scroll happens only when the
//! viewer was already effectively at the bottom before the merge.

use palaver_shared::constants::SCROLL_BOTTOM_THRESHOLD_PX;

/// What the view should do with its scroll position after a merge.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScrollDirective {
    /// Viewer was at (or near) the bottom: follow the new message.
    StickToBottom,
    /// Viewer is reading history: keep the position, imply an unread
    /// marker, do not force-scroll.
    Preserve,
}

/// Tracks how far the viewer is from the bottom of the message list.
#[derive(Debug, Clone)]
pub struct ScrollAnchor {
    distance_from_bottom: f64,
    threshold: f64,
}

impl ScrollAnchor {
    pub fn new() -> Self {
        Self {
            distance_from_bottom: 0.0,
            threshold: SCROLL_BOTTOM_THRESHOLD_PX,
        }
    }

    /// Feed the current scroll measurement (pixels above the bottom).
    /// The view reports this on every scroll event, throttled on its side.
    pub fn update(&mut self, distance_from_bottom: f64) {
        self.distance_from_bottom = distance_from_bottom.max(0.0);
    }

    pub fn is_at_bottom(&self) -> bool {
        self.distance_from_bottom < self.threshold
    }

    /// Decide what to do when a new message is merged in. The decision
    /// uses the position *before* the merge changed the content height.
    pub fn on_new_message(&self) -> ScrollDirective {
        if self.is_at_bottom() {
            ScrollDirective::StickToBottom
        } else {
            ScrollDirective::Preserve
        }
    }
}

impl Default for ScrollAnchor {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn at_bottom_sticks() {
        let mut anchor = ScrollAnchor::new();
        anchor.update(10.0);
        assert_eq!(anchor.on_new_message(), ScrollDirective::StickToBottom);
    }

    #[test]
    fn reading_history_is_never_force_scrolled() {
        let mut anchor = ScrollAnchor::new();
        anchor.update(400.0);
        assert_eq!(anchor.on_new_message(), ScrollDirective::Preserve);

        // Scrolling back down re-arms following.
        anchor.update(0.0);
        assert_eq!(anchor.on_new_message(), ScrollDirective::StickToBottom);
    }

    #[test]
    fn threshold_is_a_strict_boundary() {
        let mut anchor = ScrollAnchor::new();
        anchor.update(SCROLL_BOTTOM_THRESHOLD_PX);
        assert_eq!(anchor.on_new_message(), ScrollDirective::Preserve);

        anchor.update(SCROLL_BOTTOM_THRESHOLD_PX - 1.0);
        assert_eq!(anchor.on_new_message(), ScrollDirective::StickToBottom);
    }
}
