//! # palaver-client
//!
//! Client-side reconciliation engine for palaver.
//!
//! A conversation view receives messages from three sources: the initial
//! page fetch, its own optimistic sends, and inbound push events — in no
//! guaranteed order and with duplicates. This crate merges them into one
//! ordered, deduplicated, mutable timeline per conversation, and owns the
//! ephemeral UI state that hangs off it: scroll anchoring, per-message
//! seen debouncing, and the typing indicator with its self-clearing
//! timeout.
//!
//! All timers are explicit deadlines driven by a caller-supplied clock,
//! so every one of them dies with the session that owns it — nothing
//! fires into a torn-down view.

pub mod api;
pub mod scroll;
pub mod seen;
pub mod session;
pub mod timeline;
pub mod typing;
pub mod wire;

mod error;

pub use api::ChatApi;
pub use error::ClientError;
pub use session::ChatSession;
pub use timeline::Timeline;
