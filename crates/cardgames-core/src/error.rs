use thiserror::Error;

/// Contract violations raised by the card model and the game environment.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GameError {
    #[error("invalid card token '{token}'")]
    InvalidToken { token: String },
    #[error("invalid argument: {message}")]
    InvalidArgument { message: String },
    #[error("card '{id}' not found in hand '{hand}'")]
    NotFound { id: String, hand: String },
    #[error("requested {requested} cards but only {available} remain")]
    InsufficientCards { requested: usize, available: usize },
    #[error("invalid state: {message}")]
    InvalidState { message: String },
}

impl GameError {
    pub(crate) fn invalid_argument(message: impl Into<String>) -> Self {
        GameError::InvalidArgument {
            message: message.into(),
        }
    }

    pub(crate) fn invalid_state(message: impl Into<String>) -> Self {
        GameError::InvalidState {
            message: message.into(),
        }
    }
}
