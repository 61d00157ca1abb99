//! # palaver-shared
//!
//! Types shared between the palaver server and client crates: identifiers,
//! the message record, the push-channel wire protocol, and the handful of
//! tuning constants both sides must agree on.

pub mod constants;
pub mod message;
pub mod protocol;
pub mod types;

pub use message::{Message, MessageKind};
pub use types::{Conversation, GroupId, MessageId, UserId};
