use thiserror::Error;

/// Domain errors surfaced by the match engine.
///
/// Duplicate likes and lost match races never show up here — both collapse
/// into an idempotent success inside `swipe`.
#[derive(Error, Debug)]
pub enum MatchError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Not a participant of this match")]
    Unauthorized,

    #[error("Invalid request: {0}")]
    Invalid(String),

    /// Durable store failure. Retryable from the caller's perspective.
    #[error("Storage unavailable")]
    Unavailable(#[from] anyhow::Error),
}
