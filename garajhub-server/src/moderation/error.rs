/// Everything a moderation operation can refuse with.
///
/// The first five variants are caller mistakes and carry a message meant to
/// be shown as-is. `Store` wraps a persistence failure; surfaces log it and
/// show a generic message instead.
#[derive(Debug, thiserror::Error)]
pub enum ModerationError {
    #[error("{0}")]
    Validation(String),
    #[error("not allowed: {0}")]
    Unauthorized(String),
    #[error("not possible right now: {0}")]
    InvalidState(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("a join request for this startup is already pending")]
    AlreadyPending,
    #[error("storage error: {0}")]
    Store(#[from] rusqlite::Error),
}

impl ModerationError {
    /// Stable machine-readable tag, used in API error bodies.
    pub fn kind(&self) -> &'static str {
        match self {
            ModerationError::Validation(_) => "validation",
            ModerationError::Unauthorized(_) => "unauthorized",
            ModerationError::InvalidState(_) => "invalid_state",
            ModerationError::NotFound(_) => "not_found",
            ModerationError::AlreadyPending => "already_pending",
            ModerationError::Store(_) => "internal",
        }
    }

    /// Text safe to show to an end user.
    pub fn user_message(&self) -> String {
        match self {
            ModerationError::Store(_) => "Something went wrong, please try again later.".to_string(),
            other => other.to_string(),
        }
    }
}

pub type Result<T, E = ModerationError> = std::result::Result<T, E>;
