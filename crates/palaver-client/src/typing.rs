//! The typing indicator and its self-clearing timeout.
//!
//! A stop signal can be lost in transit; without a guard the indicator
//! would stick forever. Every activation arms a deadline, and the owner
//! ticks the indicator from its render/timer loop. The deadline is plain
//! state — dropping the session drops the timer with it.

use std::time::{Duration, Instant};

use palaver_shared::constants::TYPING_TIMEOUT_MS;
use palaver_shared::UserId;

#[derive(Debug, Clone)]
pub struct TypingIndicator {
    /// Who is typing (a group conversation can name the member).
    typist: Option<(UserId, Option<String>)>,
    clear_at: Option<Instant>,
    timeout: Duration,
}

impl TypingIndicator {
    pub fn new() -> Self {
        Self {
            typist: None,
            clear_at: None,
            timeout: Duration::from_millis(TYPING_TIMEOUT_MS),
        }
    }

    /// A typing signal arrived: light the indicator and (re-)arm the
    /// auto-clear deadline. Refreshes extend the deadline.
    pub fn activate(&mut self, from: UserId, name: Option<String>, now: Instant) {
        self.typist = Some((from, name));
        self.clear_at = Some(now + self.timeout);
    }

    /// An explicit stop signal arrived: clear immediately.
    pub fn clear(&mut self) {
        self.typist = None;
        self.clear_at = None;
    }

    /// Advance time. Returns true when the indicator just auto-cleared,
    /// i.e. the stop signal never arrived.
    pub fn tick(&mut self, now: Instant) -> bool {
        match self.clear_at {
            Some(deadline) if now >= deadline => {
                self.clear();
                true
            }
            _ => false,
        }
    }

    pub fn is_typing(&self) -> bool {
        self.typist.is_some()
    }

    /// Display name of the current typist, when one was provided.
    pub fn typist_name(&self) -> Option<&str> {
        self.typist
            .as_ref()
            .and_then(|(_, name)| name.as_deref())
    }

    pub fn typist(&self) -> Option<UserId> {
        self.typist.as_ref().map(|(id, _)| *id)
    }
}

impl Default for TypingIndicator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lost_stop_signal_clears_via_timeout() {
        let peer = UserId::new();
        let start = Instant::now();

        let mut indicator = TypingIndicator::new();
        indicator.activate(peer, None, start);
        assert!(indicator.is_typing());

        // Just before the deadline: still lit.
        assert!(!indicator.tick(start + Duration::from_millis(TYPING_TIMEOUT_MS - 1)));
        assert!(indicator.is_typing());

        // The stop signal was lost; the timeout clears it anyway.
        assert!(indicator.tick(start + Duration::from_millis(TYPING_TIMEOUT_MS)));
        assert!(!indicator.is_typing());
    }

    #[test]
    fn refresh_extends_the_deadline() {
        let peer = UserId::new();
        let start = Instant::now();

        let mut indicator = TypingIndicator::new();
        indicator.activate(peer, None, start);

        let refresh = start + Duration::from_millis(1500);
        indicator.activate(peer, None, refresh);

        // The original deadline passes without clearing.
        assert!(!indicator.tick(start + Duration::from_millis(TYPING_TIMEOUT_MS)));
        assert!(indicator.is_typing());

        assert!(indicator.tick(refresh + Duration::from_millis(TYPING_TIMEOUT_MS)));
    }

    #[test]
    fn explicit_stop_clears_immediately() {
        let peer = UserId::new();
        let now = Instant::now();

        let mut indicator = TypingIndicator::new();
        indicator.activate(peer, Some("Alice".to_string()), now);
        assert_eq!(indicator.typist_name(), Some("Alice"));

        indicator.clear();
        assert!(!indicator.is_typing());
        // Nothing left to fire later.
        assert!(!indicator.tick(now + Duration::from_secs(60)));
    }
}
