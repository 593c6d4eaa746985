//! Core data models for the escrow lifecycle
//!
//! Payment links, transactions, the stage state machine, and the
//! append-only dispute chat. Stage transitions are validated here so every
//! caller (engine, sweeper, host service) shares one transition table.

use crate::error::EscrowError;
use crate::money::{FeeSplit, Money};
use crate::EscrowResult;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Transaction stage state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStage {
    /// Created but payment not yet captured
    AwaitingPayment,
    /// Buyer payment captured and held in escrow
    FundsSecured,
    /// Seller has shipped; waybill recorded
    InTransit,
    /// Delivered; inspection window running
    Inspection,
    /// Funds released to the seller
    Completed,
    /// Funds returned to the buyer
    Refunded,
    /// Frozen pending adjudication
    Disputed,
}

impl TransactionStage {
    /// Terminal stages admit no further transitions
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Refunded)
    }

    /// Active stages are those a dispute or refund can exit from
    pub fn is_active(&self) -> bool {
        matches!(self, Self::FundsSecured | Self::InTransit | Self::Inspection)
    }

    /// Whether `self -> to` is a defined edge of the state machine
    pub fn can_transition_to(&self, to: TransactionStage) -> bool {
        use TransactionStage::*;
        match (self, to) {
            (AwaitingPayment, FundsSecured) => true,
            (FundsSecured, InTransit) => true,
            (InTransit, Inspection) => true,
            (Inspection, Completed) => true,
            (Inspection, Refunded) => true,
            // Side exits from any active stage
            (from, Disputed) if from.is_active() => true,
            (from, Refunded) if from.is_active() => true,
            // Adjudication exits
            (Disputed, Completed) => true,
            (Disputed, Refunded) => true,
            _ => false,
        }
    }
}

/// Identity-verification tier gating transaction size
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KycLevel {
    None,
    /// Verified phone number
    Level1,
    /// Verified national ID
    Level2,
}

/// Payment link lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LinkStatus {
    Active,
    Draft,
    Unclaimed,
    Used,
}

/// Who authored a dispute chat message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatSender {
    Buyer,
    Seller,
    System,
}

/// A shareable, single-use offer a seller creates to receive escrowed payment
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentLink {
    pub id: Uuid,
    pub item_name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub price: Money,
    pub shipping_cost: Money,
    pub inspection_period_hours: u32,
    pub fee_split: FeeSplit,
    pub status: LinkStatus,

    // Seller identity and reputation
    pub seller_name: Option<String>,
    pub seller_phone: Option<String>,
    pub seller_email: Option<String>,
    pub seller_rating: Option<f32>,
    pub seller_verified: bool,
    pub seller_trust_score: Option<u32>,
    pub seller_completed_transactions: u32,

    // Consumption: at most one transaction per link
    pub used: bool,
    pub transaction_id: Option<Uuid>,

    pub created_at: DateTime<Utc>,
}

impl PaymentLink {
    /// Create a fresh, unused link
    pub fn new(
        item_name: String,
        price: Money,
        shipping_cost: Money,
        inspection_period_hours: u32,
        fee_split: FeeSplit,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            item_name,
            description: None,
            image_url: None,
            price,
            shipping_cost,
            inspection_period_hours,
            fee_split,
            status: LinkStatus::Active,
            seller_name: None,
            seller_phone: None,
            seller_email: None,
            seller_rating: None,
            seller_verified: false,
            seller_trust_score: None,
            seller_completed_transactions: 0,
            used: false,
            transaction_id: None,
            created_at: Utc::now(),
        }
    }

    /// Consume the link for a transaction. Fails if it was already used.
    pub fn consume(&mut self, transaction_id: Uuid) -> EscrowResult<()> {
        if self.used {
            return Err(EscrowError::LinkConsumed(self.id));
        }
        self.used = true;
        self.transaction_id = Some(transaction_id);
        self.status = LinkStatus::Used;
        Ok(())
    }
}

/// One message in a dispute thread. Append-only, owned by its transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub id: Uuid,
    pub sender: ChatSender,
    pub message: String,
    pub timestamp: DateTime<Utc>,
    pub attachments: Vec<String>,
}

impl ChatMessage {
    pub fn new(sender: ChatSender, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            message,
            timestamp: Utc::now(),
            attachments: Vec::new(),
        }
    }
}

/// A single escrowed deal between buyer and seller
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub link_id: Uuid,
    pub item_name: String,
    pub price: Money,
    pub shipping_cost: Money,
    /// Price plus shipping, before fees
    pub total_amount: Money,
    /// Full escrow fee per the schedule in force at creation
    pub fee_amount: Money,
    pub fee_split: FeeSplit,
    pub stage: TransactionStage,

    pub inspection_period_hours: u32,
    /// Set once, at delivery confirmation; immutable afterwards
    pub inspection_deadline: Option<DateTime<Utc>>,

    pub buyer_kyc_level: KycLevel,
    pub seller_kyc_level: KycLevel,
    pub buyer_phone: Option<String>,
    pub seller_phone: Option<String>,

    pub waybill_number: Option<String>,
    pub proof_of_delivery: Option<String>,

    pub is_disputed: bool,
    pub dispute_reason: Option<String>,
    pub evidence: Vec<String>,
    pub chat_messages: Vec<ChatMessage>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Transaction {
    /// Create a transaction from a consumed link, already in `funds_secured`.
    ///
    /// Callers must only reach this after an explicit payment success signal.
    pub fn from_link(link: &PaymentLink, fee_amount: Money, buyer_phone: Option<String>, buyer_kyc_level: KycLevel) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            link_id: link.id,
            item_name: link.item_name.clone(),
            price: link.price,
            shipping_cost: link.shipping_cost,
            total_amount: link.price + link.shipping_cost,
            fee_amount,
            fee_split: link.fee_split,
            stage: TransactionStage::FundsSecured,
            inspection_period_hours: link.inspection_period_hours,
            inspection_deadline: None,
            buyer_kyc_level,
            seller_kyc_level: if link.seller_verified {
                KycLevel::Level2
            } else {
                KycLevel::Level1
            },
            buyer_phone,
            seller_phone: link.seller_phone.clone(),
            waybill_number: None,
            proof_of_delivery: None,
            is_disputed: false,
            dispute_reason: None,
            evidence: Vec::new(),
            chat_messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Validate that moving to `to` is a defined edge from the current stage
    pub fn validate_transition(&self, to: TransactionStage) -> EscrowResult<()> {
        if self.stage.can_transition_to(to) {
            Ok(())
        } else {
            Err(EscrowError::transition(
                format!("{:?}", self.stage),
                format!("{:?}", to),
                "Edge not defined in the stage state machine".to_string(),
            ))
        }
    }

    /// Apply a validated transition, bumping the update timestamp
    pub fn advance(&mut self, to: TransactionStage) -> EscrowResult<()> {
        self.validate_transition(to)?;
        self.stage = to;
        self.updated_at = Utc::now();
        Ok(())
    }

    /// Append a chat message, bumping the update timestamp
    pub fn push_message(&mut self, message: ChatMessage) {
        self.chat_messages.push(message);
        self.updated_at = Utc::now();
    }
}

/// Append-only audit record of a lifecycle mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LifecycleEvent {
    pub id: Uuid,
    pub event_type: String,
    pub transaction_id: Option<Uuid>,
    pub link_id: Option<Uuid>,
    pub actor: Option<ChatSender>,
    pub detail: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
}

impl LifecycleEvent {
    pub fn new(event_type: &str, transaction_id: Option<Uuid>, link_id: Option<Uuid>) -> Self {
        Self {
            id: Uuid::new_v4(),
            event_type: event_type.to_string(),
            transaction_id,
            link_id,
            actor: None,
            detail: None,
            created_at: Utc::now(),
        }
    }

    pub fn with_actor(mut self, actor: ChatSender) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_detail(mut self, detail: serde_json::Value) -> Self {
        self.detail = Some(detail);
        self
    }
}
