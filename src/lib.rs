//! Escrow transaction lifecycle engine
//!
//! This crate implements the core of a payment-link escrow product:
//! - Single-use payment links a seller shares to receive escrowed payment
//! - A staged transaction state machine with dispute/refund side exits
//! - Decimal-safe fee computation in integer kobo
//! - Inspection-deadline auto-release driven by a scheduled sweep
//! - An append-only dispute, evidence, and chat model
//!
//! Payment capture and fund custody are delegated to an external gateway
//! and backend API behind trait seams; nothing here advances state without
//! an explicit success signal from them.

pub mod backend;
pub mod config;
pub mod engine;
pub mod error;
pub mod gateway;
pub mod models;
pub mod money;
pub mod node;
pub mod store;
pub mod sweep;

use error::EscrowError;

/// Result type alias for escrow operations
pub type EscrowResult<T> = Result<T, EscrowError>;

pub use engine::{CreateLinkRequest, DisputeOutcome, EngineConfig, LifecycleEngine, RecordPaymentRequest};
pub use models::{ChatMessage, ChatSender, KycLevel, PaymentLink, Transaction, TransactionStage};
pub use money::{FeeBreakdown, FeeSchedule, FeeSplit, Money};
pub use node::EscrowNode;
