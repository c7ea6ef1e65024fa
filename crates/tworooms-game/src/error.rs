//! Error types for game operations.
//!
//! Every failure falls into one of five kinds. The kind decides the
//! `code()` and `status()` reported to the client; the message is free text.

use tworooms_registry::RegistryError;

/// Errors that can occur during lobby, round, leadership, voting or
/// exchange operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GameError {
    /// The room, player, game, round or vote does not exist.
    #[error("{0}")]
    NotFound(String),

    /// The request is well formed but clashes with the current state,
    /// e.g. starting a game that is already running.
    #[error("{0}")]
    Conflict(String),

    /// The request itself is invalid.
    #[error("{0}")]
    InvalidInput(String),

    /// The acting player is not allowed to do this.
    #[error("{0}")]
    Forbidden(String),

    /// A server-side invariant broke.
    #[error("{0}")]
    Internal(String),
}

impl GameError {
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn forbidden(msg: impl Into<String>) -> Self {
        Self::Forbidden(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Stable machine-readable code sent in `ERROR` replies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::InvalidInput(_) => "INVALID_INPUT",
            Self::Forbidden(_) => "FORBIDDEN",
            Self::Internal(_) => "INTERNAL",
        }
    }

    /// HTTP-style status for the error kind.
    pub fn status(&self) -> u16 {
        match self {
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::InvalidInput(_) => 400,
            Self::Forbidden(_) => 403,
            Self::Internal(_) => 500,
        }
    }
}

impl From<RegistryError> for GameError {
    fn from(e: RegistryError) -> Self {
        match e {
            RegistryError::NotFound(_) => Self::NotFound(e.to_string()),
            RegistryError::CodeExists(_) => Self::Conflict(e.to_string()),
        }
    }
}
