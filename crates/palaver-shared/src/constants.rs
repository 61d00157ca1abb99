//! Tuning constants the server and client must agree on.

/// Content shown in place of a deleted message's original content.
pub const TOMBSTONE_TEXT: &str = "This message was deleted";

/// How long a typing indicator stays lit without a refresh before the
/// client clears it on its own. Guards against a lost stop signal.
pub const TYPING_TIMEOUT_MS: u64 = 2000;

/// How long a message must stay visible in the viewport before the client
/// marks it seen. Prevents marking-seen on fast scroll-through.
pub const SEEN_DEBOUNCE_MS: u64 = 300;

/// Two messages with identical content whose timestamps differ by at most
/// this much are treated as the same message during timeline merge. This is
/// what reconciles an optimistic local send with its server echo.
pub const DEDUP_TOLERANCE_MS: i64 = 1000;

/// A viewer within this many pixels of the bottom of the message list is
/// considered "at the bottom" for scroll anchoring.
pub const SCROLL_BOTTOM_THRESHOLD_PX: f64 = 50.0;

/// Maximum message content length, enforced on send.
pub const MAX_CONTENT_LEN: usize = 2000;

/// Default page size for conversation history fetches.
pub const DEFAULT_PAGE_LIMIT: u32 = 20;
