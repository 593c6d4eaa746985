//! Error types for the escrow lifecycle engine
//!
//! One error enum covers the whole taxonomy: validation failures that are
//! rejected before any state mutation, invalid stage transitions, external
//! collaborator failures, and lookup misses. Nothing in this crate is fatal;
//! every failure is recoverable by retry or user re-action.

use thiserror::Error;
use uuid::Uuid;

/// Main error type for escrow operations
#[derive(Error, Debug)]
pub enum EscrowError {
    /// Input validation errors, rejected before any state change
    #[error("Validation error: {0}")]
    Validation(String),

    /// Stage transition outside the defined edges
    #[error("Invalid stage transition: {from} -> {to}: {reason}")]
    StateTransition {
        from: String,
        to: String,
        reason: String,
    },

    /// Payment capture/verification errors
    #[error("Payment error: {0}")]
    Payment(String),

    /// A payment link was already consumed by another transaction
    #[error("Payment link {0} has already been used")]
    LinkConsumed(Uuid),

    /// Record lookup failures
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: Uuid },

    /// Backend transaction API errors
    #[error("External API error: {0}")]
    ExternalApi(String),

    /// HTTP transport errors talking to collaborators
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// UUID parsing errors
    #[error("UUID parsing error: {0}")]
    Uuid(#[from] uuid::Error),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),
}

impl EscrowError {
    /// Create a validation error
    pub fn validation<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a stage transition error
    pub fn transition<S: Into<String>>(from: S, to: S, reason: S) -> Self {
        Self::StateTransition {
            from: from.into(),
            to: to.into(),
            reason: reason.into(),
        }
    }

    /// Create a payment error
    pub fn payment<S: Into<String>>(msg: S) -> Self {
        Self::Payment(msg.into())
    }

    /// Create a not-found error for a payment link
    pub fn link_not_found(id: Uuid) -> Self {
        Self::NotFound { kind: "link", id }
    }

    /// Create a not-found error for a transaction
    pub fn transaction_not_found(id: Uuid) -> Self {
        Self::NotFound {
            kind: "transaction",
            id,
        }
    }

    /// Create an external API error
    pub fn external_api<S: Into<String>>(msg: S) -> Self {
        Self::ExternalApi(msg.into())
    }

    /// Create a configuration error
    pub fn config<S: Into<String>>(msg: S) -> Self {
        Self::Config(msg.into())
    }
}
