//! Conversation model
//!
//! Messages exchanged with the completion service and the history that
//! owns them for the lifetime of a session.

mod history;
mod message;

pub use history::{ConversationHistory, Snapshot};
pub use message::{Message, ToolCallRequest};
