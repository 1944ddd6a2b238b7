use thiserror::Error;

/// Errors raised by the event repository's SQL operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("event {0} not found")]
    NotFound(i64),

    #[error("invalid state transition on event {id}: expected status {expected}, found {found}")]
    InvalidTransition {
        id: i64,
        expected: &'static str,
        found: String,
    },
}

/// Errors raised by the notification listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("listener could not reconnect after exhausting backoff")]
    ReconnectExhausted,
}

/// Errors raised by the system facade's lifecycle operations.
#[derive(Debug, Error)]
pub enum SystemError {
    #[error("event system is already started")]
    AlreadyStarted,

    #[error("event system has not been started")]
    NotStarted,

    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),

    #[error("listener error: {0}")]
    Listener(#[from] ListenerError),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

/// Errors a handler can raise. The core never inspects these beyond `Display` —
/// the text becomes `last_error` and the occurrence drives retry/fail routing.
pub type HandlerError = anyhow::Error;
