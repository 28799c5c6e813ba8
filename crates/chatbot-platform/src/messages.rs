//! User-facing message catalogue

/// Every degraded chat reply starts with this prefix.
pub const ERROR_PREFIX: &str = "Error: ";

/// Returned by `get_context` when neither a summary nor recent turns exist.
pub const NO_HISTORY_SENTINEL: &str = "No conversation history available.";

pub struct ErrorMessages;

impl ErrorMessages {
    pub const LLM_RESPONSE_FAILED: &'static str = "Failed to generate AI response";
    pub const LLM_INVALID_MESSAGE_FORMAT: &'static str = "Invalid message format provided";
    pub const LLM_EMPTY_RESPONSE: &'static str = "AI returned an empty response";

    pub const SESSION_NOT_FOUND: &'static str = "Session not found";
    pub const SESSION_UNAUTHORIZED: &'static str = "Unauthorized access to this session";
    pub const SESSION_DELETE_FAILED: &'static str = "Failed to delete chat session";

    pub const MEMORY_LOAD_FAILED: &'static str = "Failed to load conversation memory";
    pub const MEMORY_SAVE_FAILED: &'static str = "Failed to save message to database";
    pub const MEMORY_SUMMARIZE_FAILED: &'static str = "Failed to summarize conversation";
}

pub fn error_reply(reason: impl std::fmt::Display) -> String {
    format!("{}{}", ERROR_PREFIX, reason)
}

pub fn is_error_reply(reply: &str) -> bool {
    reply.starts_with(ERROR_PREFIX)
}
