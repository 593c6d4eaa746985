//! Lifecycle engine: coordinates link consumption and stage transitions
//!
//! This is the one place transactions are mutated. Every operation loads an
//! aggregate from the repository, validates, applies the transition, and
//! persists, leaving an audit event behind. Payment capture, fund release,
//! and refunds are signaled through the [`PaymentGateway`] seam and a
//! transaction only ever advances on an explicit success signal.

use crate::error::EscrowError;
use crate::gateway::{PaymentGateway, PaymentVerification};
use crate::models::{
    ChatMessage, ChatSender, KycLevel, LifecycleEvent, PaymentLink, Transaction, TransactionStage,
};
use crate::money::{FeeBreakdown, FeeSchedule, FeeSplit, Money};
use crate::store::{LinkRepository, TransactionRepository};
use crate::EscrowResult;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

/// Configuration for the lifecycle engine
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Fee schedule for seller-created links
    pub link_fee: FeeSchedule,
    /// Fee schedule for buyer-initiated intents
    pub intent_fee: FeeSchedule,
    /// Inspection window applied when a link does not specify one
    pub default_inspection_hours: u32,
    /// Deals above this total require a level-2 verified buyer
    pub level2_threshold: Money,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            link_fee: FeeSchedule::seller_link(),
            intent_fee: FeeSchedule::buyer_intent(),
            default_inspection_hours: 48,
            level2_threshold: Money::from_naira(2_000_000),
        }
    }
}

/// Request to create a seller payment link
#[derive(Debug, Clone)]
pub struct CreateLinkRequest {
    pub item_name: String,
    pub description: Option<String>,
    pub image_url: Option<String>,
    pub price: Money,
    pub shipping_cost: Money,
    pub inspection_period_hours: Option<u32>,
    pub fee_split: FeeSplit,
    pub seller_name: Option<String>,
    pub seller_phone: Option<String>,
    pub seller_email: Option<String>,
}

/// Request to record a captured buyer payment against a link
#[derive(Debug, Clone)]
pub struct RecordPaymentRequest {
    pub link_id: Uuid,
    /// Gateway reference to verify before any state changes
    pub payment_reference: String,
    pub buyer_phone: Option<String>,
    pub buyer_kyc_level: KycLevel,
}

/// Outcome of an external dispute adjudication
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisputeOutcome {
    /// Funds released to the seller
    ReleaseToSeller,
    /// Funds returned to the buyer
    RefundBuyer,
}

/// Main lifecycle engine
pub struct LifecycleEngine {
    config: EngineConfig,
    links: Arc<dyn LinkRepository>,
    transactions: Arc<dyn TransactionRepository>,
    gateway: Arc<dyn PaymentGateway>,
}

impl LifecycleEngine {
    pub fn new(
        config: EngineConfig,
        links: Arc<dyn LinkRepository>,
        transactions: Arc<dyn TransactionRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        Self {
            config,
            links,
            transactions,
            gateway,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Fee quote for a buyer-initiated intent, under the intent schedule
    /// (2.5% with clamp bounds by default)
    pub fn quote_intent(
        &self,
        price: Money,
        shipping: Money,
        split: FeeSplit,
    ) -> EscrowResult<FeeBreakdown> {
        self.config.intent_fee.quote(price, shipping, split)
    }

    /// Create a payment link for a seller
    pub async fn create_link(&self, request: CreateLinkRequest) -> EscrowResult<PaymentLink> {
        if request.item_name.trim().is_empty() {
            return Err(EscrowError::validation("Item name cannot be empty"));
        }
        if request.price <= Money::ZERO {
            return Err(EscrowError::validation("Price must be greater than zero"));
        }
        if request.shipping_cost.is_negative() {
            return Err(EscrowError::validation("Shipping cost cannot be negative"));
        }

        let mut link = PaymentLink::new(
            request.item_name,
            request.price,
            request.shipping_cost,
            request
                .inspection_period_hours
                .unwrap_or(self.config.default_inspection_hours),
            request.fee_split,
        );
        link.description = request.description;
        link.image_url = request.image_url;
        link.seller_name = request.seller_name;
        link.seller_phone = request.seller_phone;
        link.seller_email = request.seller_email;

        self.links.insert_link(link.clone()).await?;
        self.transactions
            .append_event(
                LifecycleEvent::new("link.created", None, Some(link.id)).with_detail(
                    serde_json::json!({
                        "item_name": link.item_name,
                        "price": link.price,
                    }),
                ),
            )
            .await?;

        info!(link_id = %link.id, "created payment link");
        Ok(link)
    }

    /// Record a buyer payment: verify the gateway reference, consume the
    /// link, and open the transaction in `funds_secured`.
    pub async fn record_payment(&self, request: RecordPaymentRequest) -> EscrowResult<Transaction> {
        if request.payment_reference.trim().is_empty() {
            return Err(EscrowError::validation("Payment reference cannot be empty"));
        }

        let mut link = self.links.get_link(request.link_id).await?;
        if link.used {
            return Err(EscrowError::LinkConsumed(link.id));
        }

        let quote = self
            .config
            .link_fee
            .quote(link.price, link.shipping_cost, link.fee_split)?;

        if quote.subtotal > self.config.level2_threshold
            && request.buyer_kyc_level < KycLevel::Level2
        {
            return Err(EscrowError::validation(format!(
                "Deals above {} require level-2 buyer verification",
                self.config.level2_threshold
            )));
        }

        // Never advance optimistically: the gateway must confirm capture.
        match self.gateway.verify_payment(&request.payment_reference).await? {
            PaymentVerification::Success => {}
            PaymentVerification::Failed => {
                return Err(EscrowError::payment(format!(
                    "Payment reference {} did not verify",
                    request.payment_reference
                )));
            }
        }

        let txn = Transaction::from_link(
            &link,
            quote.fee,
            request.buyer_phone,
            request.buyer_kyc_level,
        );
        link.consume(txn.id)?;

        self.transactions.insert_transaction(txn.clone()).await?;
        self.links.update_link(link).await?;
        self.append_event(
            "payment.recorded",
            &txn,
            Some(ChatSender::Buyer),
            Some(serde_json::json!({
                "reference": request.payment_reference,
                "buyer_total": quote.buyer_total,
            })),
        )
        .await?;

        info!(transaction_id = %txn.id, link_id = %txn.link_id, "funds secured");
        Ok(txn)
    }

    /// Record the seller's waybill and move the deal in transit.
    ///
    /// Idempotent per waybill: repeating the call with the same number is a
    /// no-op; a different number on a shipped deal is rejected.
    pub async fn mark_shipped(
        &self,
        transaction_id: Uuid,
        waybill_number: &str,
        proof_of_delivery: Option<String>,
    ) -> EscrowResult<Transaction> {
        if waybill_number.trim().is_empty() {
            return Err(EscrowError::validation("Waybill number cannot be empty"));
        }

        let mut txn = self.transactions.get_transaction(transaction_id).await?;
        if txn.stage.is_terminal() {
            return Ok(txn);
        }
        if txn.stage == TransactionStage::InTransit {
            if txn.waybill_number.as_deref() == Some(waybill_number) {
                return Ok(txn);
            }
            return Err(EscrowError::validation(format!(
                "Transaction already shipped under waybill {}",
                txn.waybill_number.as_deref().unwrap_or("?")
            )));
        }

        txn.advance(TransactionStage::InTransit)?;
        txn.waybill_number = Some(waybill_number.to_string());
        txn.proof_of_delivery = proof_of_delivery;

        self.transactions.update_transaction(txn.clone()).await?;
        self.append_event(
            "transaction.shipped",
            &txn,
            Some(ChatSender::Seller),
            Some(serde_json::json!({ "waybill": waybill_number })),
        )
        .await?;

        info!(transaction_id = %txn.id, waybill = waybill_number, "in transit");
        Ok(txn)
    }

    /// Confirm delivery and open the inspection window.
    ///
    /// The inspection deadline is anchored here, exactly once.
    pub async fn confirm_delivery(&self, transaction_id: Uuid) -> EscrowResult<Transaction> {
        let mut txn = self.transactions.get_transaction(transaction_id).await?;
        if txn.stage.is_terminal() {
            return Ok(txn);
        }

        txn.advance(TransactionStage::Inspection)?;
        if txn.inspection_deadline.is_none() {
            txn.inspection_deadline =
                Some(Utc::now() + Duration::hours(txn.inspection_period_hours as i64));
        }

        self.transactions.update_transaction(txn.clone()).await?;
        self.append_event(
            "delivery.confirmed",
            &txn,
            None,
            Some(serde_json::json!({ "inspection_deadline": txn.inspection_deadline })),
        )
        .await?;

        info!(transaction_id = %txn.id, deadline = ?txn.inspection_deadline, "inspection window open");
        Ok(txn)
    }

    /// Buyer explicitly accepts the item: release funds and complete.
    ///
    /// Not available on a disputed deal; those exit only through
    /// [`resolve_dispute`](Self::resolve_dispute).
    pub async fn accept(&self, transaction_id: Uuid) -> EscrowResult<Transaction> {
        let txn = self.transactions.get_transaction(transaction_id).await?;
        if txn.stage.is_terminal() {
            return Ok(txn);
        }
        if txn.stage == TransactionStage::Disputed {
            return Err(EscrowError::transition(
                "Disputed".to_string(),
                "Completed".to_string(),
                "Disputed transactions exit only through adjudication".to_string(),
            ));
        }
        txn.validate_transition(TransactionStage::Completed)?;
        self.release(txn, "funds.released").await
    }

    /// Buyer explicitly rejects the item during inspection.
    ///
    /// If the deadline has already elapsed the auto-release path wins the
    /// race and the deal completes instead.
    pub async fn reject(&self, transaction_id: Uuid, reason: &str) -> EscrowResult<Transaction> {
        if reason.trim().is_empty() {
            return Err(EscrowError::validation("Rejection reason cannot be empty"));
        }

        let mut txn = self.transactions.get_transaction(transaction_id).await?;
        if txn.stage.is_terminal() {
            return Ok(txn);
        }
        if txn.stage == TransactionStage::Disputed {
            return Err(EscrowError::transition(
                "Disputed".to_string(),
                "Refunded".to_string(),
                "Disputed transactions exit only through adjudication".to_string(),
            ));
        }

        if self.release_due(&txn, Utc::now()) {
            warn!(transaction_id = %txn.id, "rejection raced an elapsed deadline; auto-release wins");
            return self.release(txn, "funds.auto_released").await;
        }

        txn.validate_transition(TransactionStage::Refunded)?;
        self.gateway.request_refund(&txn.id.to_string()).await?;
        txn.advance(TransactionStage::Refunded)?;
        txn.push_message(ChatMessage::new(
            ChatSender::System,
            format!("Buyer rejected the item: {reason}"),
        ));

        self.transactions.update_transaction(txn.clone()).await?;
        self.append_event(
            "transaction.refunded",
            &txn,
            Some(ChatSender::Buyer),
            Some(serde_json::json!({ "reason": reason })),
        )
        .await?;

        info!(transaction_id = %txn.id, "refunded");
        Ok(txn)
    }

    /// Raise a dispute from any active stage, freezing the deal.
    pub async fn raise_dispute(
        &self,
        transaction_id: Uuid,
        raised_by: ChatSender,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        if reason.trim().is_empty() {
            return Err(EscrowError::validation("Dispute reason cannot be empty"));
        }

        let mut txn = self.transactions.get_transaction(transaction_id).await?;
        if txn.stage.is_terminal() {
            return Ok(txn);
        }

        txn.advance(TransactionStage::Disputed)?;
        txn.is_disputed = true;
        txn.dispute_reason = Some(reason.to_string());
        txn.push_message(ChatMessage::new(
            ChatSender::System,
            format!("Dispute raised by {:?}: {reason}", raised_by),
        ));

        self.transactions.update_transaction(txn.clone()).await?;
        self.append_event(
            "dispute.raised",
            &txn,
            Some(raised_by),
            Some(serde_json::json!({ "reason": reason })),
        )
        .await?;

        warn!(transaction_id = %txn.id, "disputed; auto-release disabled");
        Ok(txn)
    }

    /// Append an evidence reference to a disputed deal
    pub async fn add_evidence(
        &self,
        transaction_id: Uuid,
        evidence_url: &str,
    ) -> EscrowResult<Transaction> {
        if evidence_url.trim().is_empty() {
            return Err(EscrowError::validation("Evidence reference cannot be empty"));
        }

        let mut txn = self.transactions.get_transaction(transaction_id).await?;
        if !txn.is_disputed {
            return Err(EscrowError::validation(
                "Evidence can only be added to disputed transactions",
            ));
        }

        txn.evidence.push(evidence_url.to_string());
        txn.updated_at = Utc::now();

        self.transactions.update_transaction(txn.clone()).await?;
        self.append_event(
            "evidence.added",
            &txn,
            None,
            Some(serde_json::json!({ "url": evidence_url })),
        )
        .await?;

        Ok(txn)
    }

    /// Append a message to the dispute thread
    pub async fn add_chat_message(
        &self,
        transaction_id: Uuid,
        sender: ChatSender,
        message: &str,
    ) -> EscrowResult<Transaction> {
        if message.trim().is_empty() {
            return Err(EscrowError::validation("Chat message cannot be empty"));
        }

        let mut txn = self.transactions.get_transaction(transaction_id).await?;
        if !txn.is_disputed {
            return Err(EscrowError::validation(
                "Chat is only open on disputed transactions",
            ));
        }
        txn.push_message(ChatMessage::new(sender, message.to_string()));

        self.transactions.update_transaction(txn.clone()).await?;
        self.append_event("chat.message", &txn, Some(sender), None)
            .await?;

        Ok(txn)
    }

    /// Apply an external adjudication outcome to a disputed deal
    pub async fn resolve_dispute(
        &self,
        transaction_id: Uuid,
        outcome: DisputeOutcome,
    ) -> EscrowResult<Transaction> {
        let mut txn = self.transactions.get_transaction(transaction_id).await?;
        if txn.stage.is_terminal() {
            return Ok(txn);
        }
        if txn.stage != TransactionStage::Disputed {
            return Err(EscrowError::transition(
                format!("{:?}", txn.stage),
                "Completed/Refunded".to_string(),
                "Only disputed transactions can be adjudicated".to_string(),
            ));
        }

        let (to, event_type) = match outcome {
            DisputeOutcome::ReleaseToSeller => {
                self.gateway.release_funds(&txn.id.to_string()).await?;
                (TransactionStage::Completed, "dispute.resolved.released")
            }
            DisputeOutcome::RefundBuyer => {
                self.gateway.request_refund(&txn.id.to_string()).await?;
                (TransactionStage::Refunded, "dispute.resolved.refunded")
            }
        };

        txn.advance(to)?;
        txn.push_message(ChatMessage::new(
            ChatSender::System,
            format!("Dispute resolved: {:?}", outcome),
        ));

        self.transactions.update_transaction(txn.clone()).await?;
        self.append_event(event_type, &txn, None, None).await?;

        info!(transaction_id = %txn.id, ?outcome, "dispute resolved");
        Ok(txn)
    }

    /// Evaluate the inspection deadline for one transaction, releasing
    /// funds if it elapsed without rejection or dispute.
    pub async fn check_auto_release(
        &self,
        transaction_id: Uuid,
        now: DateTime<Utc>,
    ) -> EscrowResult<Transaction> {
        let txn = self.transactions.get_transaction(transaction_id).await?;
        if !self.release_due(&txn, now) {
            return Ok(txn);
        }

        // Re-read before finalizing: a dispute raised in the window between
        // deadline-elapsed and release-processed must win.
        let txn = self.transactions.get_transaction(transaction_id).await?;
        if !self.release_due(&txn, now) {
            return Ok(txn);
        }

        info!(transaction_id = %txn.id, "inspection deadline elapsed; auto-releasing");
        self.release(txn, "funds.auto_released").await
    }

    /// Evaluate every inspection-stage transaction against `now`.
    /// Returns the ids that were released.
    pub async fn sweep_due(&self, now: DateTime<Utc>) -> EscrowResult<Vec<Uuid>> {
        let candidates = self
            .transactions
            .transactions_in_stage(TransactionStage::Inspection)
            .await?;

        let mut released = Vec::new();
        for txn in candidates {
            if !self.release_due(&txn, now) {
                continue;
            }
            match self.check_auto_release(txn.id, now).await {
                Ok(updated) if updated.stage == TransactionStage::Completed => {
                    released.push(updated.id);
                }
                Ok(_) => {}
                Err(err) => {
                    // One stuck transaction must not stall the sweep.
                    warn!(transaction_id = %txn.id, error = %err, "auto-release failed");
                }
            }
        }
        Ok(released)
    }

    pub async fn get_link(&self, id: Uuid) -> EscrowResult<PaymentLink> {
        self.links.get_link(id).await
    }

    pub async fn get_transaction(&self, id: Uuid) -> EscrowResult<Transaction> {
        self.transactions.get_transaction(id).await
    }

    pub async fn transaction_events(&self, id: Uuid) -> EscrowResult<Vec<LifecycleEvent>> {
        self.transactions.events_for(id).await
    }

    /// Whether the auto-release transition is due for this transaction
    fn release_due(&self, txn: &Transaction, now: DateTime<Utc>) -> bool {
        txn.stage == TransactionStage::Inspection
            && !txn.is_disputed
            && txn.inspection_deadline.map_or(false, |d| now > d)
    }

    /// Shared completion path for explicit acceptance and auto-release
    async fn release(&self, mut txn: Transaction, event_type: &str) -> EscrowResult<Transaction> {
        self.gateway.release_funds(&txn.id.to_string()).await?;
        txn.advance(TransactionStage::Completed)?;

        self.transactions.update_transaction(txn.clone()).await?;
        self.append_event(event_type, &txn, None, None).await?;

        info!(transaction_id = %txn.id, "completed");
        Ok(txn)
    }

    async fn append_event(
        &self,
        event_type: &str,
        txn: &Transaction,
        actor: Option<ChatSender>,
        detail: Option<serde_json::Value>,
    ) -> EscrowResult<()> {
        let mut event = LifecycleEvent::new(event_type, Some(txn.id), Some(txn.link_id));
        if let Some(actor) = actor {
            event = event.with_actor(actor);
        }
        if let Some(detail) = detail {
            event = event.with_detail(detail);
        }
        self.transactions.append_event(event).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::StubGateway;
    use crate::store::MemoryStore;
    use std::sync::atomic::Ordering;

    struct Harness {
        engine: LifecycleEngine,
        gateway: Arc<StubGateway>,
        store: Arc<MemoryStore>,
    }

    fn harness(gateway: StubGateway) -> Harness {
        let store = Arc::new(MemoryStore::new());
        let gateway = Arc::new(gateway);
        let engine = LifecycleEngine::new(
            EngineConfig::default(),
            store.clone(),
            store.clone(),
            gateway.clone(),
        );
        Harness {
            engine,
            gateway,
            store,
        }
    }

    fn link_request(price: Money) -> CreateLinkRequest {
        CreateLinkRequest {
            item_name: "iPhone 15 Pro Max".to_string(),
            description: None,
            image_url: None,
            price,
            shipping_cost: Money::from_naira(5_000),
            inspection_period_hours: Some(48),
            fee_split: FeeSplit::Split,
            seller_name: Some("Tiwa Adebayo".to_string()),
            seller_phone: Some("+2348098765432".to_string()),
            seller_email: None,
        }
    }

    async fn secured(h: &Harness, price: Money) -> Transaction {
        let link = h.engine.create_link(link_request(price)).await.unwrap();
        h.engine
            .record_payment(RecordPaymentRequest {
                link_id: link.id,
                payment_reference: "ref_ok".to_string(),
                buyer_phone: Some("+2348012345678".to_string()),
                buyer_kyc_level: KycLevel::Level2,
            })
            .await
            .unwrap()
    }

    async fn in_inspection(h: &Harness) -> Transaction {
        let txn = secured(h, Money::from_naira(1_800_000)).await;
        h.engine
            .mark_shipped(txn.id, "DHL123456789", None)
            .await
            .unwrap();
        h.engine.confirm_delivery(txn.id).await.unwrap()
    }

    #[tokio::test]
    async fn happy_path_reaches_completed() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;
        assert_eq!(txn.stage, TransactionStage::Inspection);
        assert!(txn.inspection_deadline.is_some());

        let done = h.engine.accept(txn.id).await.unwrap();
        assert_eq!(done.stage, TransactionStage::Completed);
        assert_eq!(h.gateway.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn payment_link_is_single_use() {
        let h = harness(StubGateway::succeeding());
        let txn = secured(&h, Money::from_naira(1_800_000)).await;

        let err = h
            .engine
            .record_payment(RecordPaymentRequest {
                link_id: txn.link_id,
                payment_reference: "ref_again".to_string(),
                buyer_phone: None,
                buyer_kyc_level: KycLevel::Level2,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::LinkConsumed(id) if id == txn.link_id));
    }

    #[tokio::test]
    async fn failed_verification_leaves_link_unused() {
        let h = harness(StubGateway::failing());
        let link = h
            .engine
            .create_link(link_request(Money::from_naira(525_000)))
            .await
            .unwrap();

        let err = h
            .engine
            .record_payment(RecordPaymentRequest {
                link_id: link.id,
                payment_reference: "ref_bad".to_string(),
                buyer_phone: None,
                buyer_kyc_level: KycLevel::Level1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Payment(_)));

        let link = h.engine.get_link(link.id).await.unwrap();
        assert!(!link.used);
    }

    #[tokio::test]
    async fn kyc_threshold_gates_large_deals() {
        let h = harness(StubGateway::succeeding());
        let link = h
            .engine
            .create_link(link_request(Money::from_naira(3_750_000)))
            .await
            .unwrap();

        let err = h
            .engine
            .record_payment(RecordPaymentRequest {
                link_id: link.id,
                payment_reference: "ref_ok".to_string(),
                buyer_phone: None,
                buyer_kyc_level: KycLevel::Level1,
            })
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));
        assert!(!h.engine.get_link(link.id).await.unwrap().used);
    }

    #[tokio::test]
    async fn mark_shipped_is_idempotent_per_waybill() {
        let h = harness(StubGateway::succeeding());
        let txn = secured(&h, Money::from_naira(1_800_000)).await;

        let first = h
            .engine
            .mark_shipped(txn.id, "DHL123456789", None)
            .await
            .unwrap();
        let second = h
            .engine
            .mark_shipped(txn.id, "DHL123456789", None)
            .await
            .unwrap();
        assert_eq!(first.stage, TransactionStage::InTransit);
        assert_eq!(second.stage, TransactionStage::InTransit);
        assert_eq!(second.waybill_number.as_deref(), Some("DHL123456789"));

        let err = h
            .engine
            .mark_shipped(txn.id, "FEDEX987654321", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));
    }

    #[tokio::test]
    async fn deadline_elapsed_auto_releases() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;
        let deadline = txn.inspection_deadline.unwrap();

        // An hour before the deadline nothing happens.
        let unchanged = h
            .engine
            .check_auto_release(txn.id, deadline - Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(unchanged.stage, TransactionStage::Inspection);

        // Hour 49 of a 48-hour window: release.
        let released = h
            .engine
            .check_auto_release(txn.id, deadline + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(released.stage, TransactionStage::Completed);
        assert_eq!(h.gateway.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn dispute_blocks_auto_release() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;
        let deadline = txn.inspection_deadline.unwrap();

        h.engine
            .raise_dispute(txn.id, ChatSender::Buyer, "Battery health is 65%, not 95%")
            .await
            .unwrap();

        let after = h
            .engine
            .check_auto_release(txn.id, deadline + Duration::hours(1))
            .await
            .unwrap();
        assert_eq!(after.stage, TransactionStage::Disputed);
        assert!(after.is_disputed);
        assert_eq!(h.gateway.releases.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn rejection_before_deadline_refunds() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;

        let refunded = h
            .engine
            .reject(txn.id, "Screen has deep scratches")
            .await
            .unwrap();
        assert_eq!(refunded.stage, TransactionStage::Refunded);
        assert_eq!(h.gateway.refunds.load(Ordering::SeqCst), 1);
        assert_eq!(h.gateway.releases.load(Ordering::SeqCst), 0);

        // Rejecting a refunded deal is a no-op reporting current state.
        let again = h.engine.reject(txn.id, "still bad").await.unwrap();
        assert_eq!(again.stage, TransactionStage::Refunded);
        assert_eq!(h.gateway.refunds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn rejection_after_elapsed_deadline_loses_to_auto_release() {
        use crate::store::TransactionRepository;

        let h = harness(StubGateway::succeeding());
        let mut txn = in_inspection(&h).await;

        // Backdate the deadline so it has already elapsed.
        txn.inspection_deadline = Some(Utc::now() - Duration::hours(1));
        h.store.update_transaction(txn.clone()).await.unwrap();

        let result = h.engine.reject(txn.id, "too late").await.unwrap();
        assert_eq!(result.stage, TransactionStage::Completed);
        assert_eq!(h.gateway.releases.load(Ordering::SeqCst), 1);
        assert_eq!(h.gateway.refunds.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dispute_requires_a_reason() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;

        let err = h
            .engine
            .raise_dispute(txn.id, ChatSender::Buyer, "   ")
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));

        let unchanged = h.engine.get_transaction(txn.id).await.unwrap();
        assert_eq!(unchanged.stage, TransactionStage::Inspection);
        assert!(!unchanged.is_disputed);
    }

    #[tokio::test]
    async fn dispute_appends_system_message_and_evidence() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;

        let disputed = h
            .engine
            .raise_dispute(txn.id, ChatSender::Buyer, "Counterfeit stitching")
            .await
            .unwrap();
        assert_eq!(disputed.chat_messages.len(), 1);
        assert_eq!(disputed.chat_messages[0].sender, ChatSender::System);

        h.engine
            .add_evidence(txn.id, "evidence_1.jpg")
            .await
            .unwrap();
        let with_chat = h
            .engine
            .add_chat_message(txn.id, ChatSender::Seller, "Shipped in perfect condition")
            .await
            .unwrap();
        assert_eq!(with_chat.evidence, vec!["evidence_1.jpg".to_string()]);
        assert_eq!(with_chat.chat_messages.len(), 2);
    }

    #[tokio::test]
    async fn evidence_requires_a_dispute() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;

        let err = h.engine.add_evidence(txn.id, "photo.jpg").await.unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));
    }

    #[tokio::test]
    async fn chat_requires_a_dispute() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;

        let err = h
            .engine
            .add_chat_message(txn.id, ChatSender::Buyer, "Where is my refund?")
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::Validation(_)));
        assert!(h
            .engine
            .get_transaction(txn.id)
            .await
            .unwrap()
            .chat_messages
            .is_empty());
    }

    #[tokio::test]
    async fn intent_quote_uses_clamped_schedule() {
        let h = harness(StubGateway::succeeding());

        let quote = h
            .engine
            .quote_intent(Money::from_naira(10_000), Money::ZERO, FeeSplit::Buyer)
            .unwrap();
        assert_eq!(quote.fee, Money::from_naira(500));
        assert_eq!(quote.buyer_total, Money::from_naira(10_500));
    }

    #[tokio::test]
    async fn adjudication_exits_disputed_both_ways() {
        let h = harness(StubGateway::succeeding());

        let txn = in_inspection(&h).await;
        h.engine
            .raise_dispute(txn.id, ChatSender::Seller, "Buyer is stalling")
            .await
            .unwrap();
        let done = h
            .engine
            .resolve_dispute(txn.id, DisputeOutcome::ReleaseToSeller)
            .await
            .unwrap();
        assert_eq!(done.stage, TransactionStage::Completed);
        assert_eq!(h.gateway.releases.load(Ordering::SeqCst), 1);

        let txn = in_inspection(&h).await;
        h.engine
            .raise_dispute(txn.id, ChatSender::Buyer, "Item not as described")
            .await
            .unwrap();
        let back = h
            .engine
            .resolve_dispute(txn.id, DisputeOutcome::RefundBuyer)
            .await
            .unwrap();
        assert_eq!(back.stage, TransactionStage::Refunded);
        assert_eq!(h.gateway.refunds.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn accept_cannot_exit_a_dispute() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;
        h.engine
            .raise_dispute(txn.id, ChatSender::Buyer, "Serial number does not match")
            .await
            .unwrap();

        let err = h.engine.accept(txn.id).await.unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));
        assert_eq!(h.gateway.releases.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.engine.get_transaction(txn.id).await.unwrap().stage,
            TransactionStage::Disputed
        );
    }

    #[tokio::test]
    async fn reject_cannot_exit_a_dispute() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;
        h.engine
            .raise_dispute(txn.id, ChatSender::Seller, "Buyer damaged the item")
            .await
            .unwrap();

        let err = h.engine.reject(txn.id, "refund me").await.unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));
        assert_eq!(h.gateway.refunds.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.engine.get_transaction(txn.id).await.unwrap().stage,
            TransactionStage::Disputed
        );
    }

    #[tokio::test]
    async fn resolve_requires_disputed_stage() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;

        let err = h
            .engine
            .resolve_dispute(txn.id, DisputeOutcome::RefundBuyer)
            .await
            .unwrap_err();
        assert!(matches!(err, EscrowError::StateTransition { .. }));
    }

    #[tokio::test]
    async fn accept_on_completed_is_a_noop() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;
        h.engine.accept(txn.id).await.unwrap();

        let again = h.engine.accept(txn.id).await.unwrap();
        assert_eq!(again.stage, TransactionStage::Completed);
        // No second release signal.
        assert_eq!(h.gateway.releases.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn sweep_releases_only_due_undisputed_deals() {
        let h = harness(StubGateway::succeeding());

        let due = in_inspection(&h).await;
        let disputed = in_inspection(&h).await;
        h.engine
            .raise_dispute(disputed.id, ChatSender::Buyer, "Wrong color")
            .await
            .unwrap();
        let not_due = secured(&h, Money::from_naira(100_000)).await;

        let far_future = due.inspection_deadline.unwrap() + Duration::hours(1);
        let released = h.engine.sweep_due(far_future).await.unwrap();
        assert_eq!(released, vec![due.id]);

        assert_eq!(
            h.engine.get_transaction(due.id).await.unwrap().stage,
            TransactionStage::Completed
        );
        assert_eq!(
            h.engine.get_transaction(disputed.id).await.unwrap().stage,
            TransactionStage::Disputed
        );
        assert_eq!(
            h.engine.get_transaction(not_due.id).await.unwrap().stage,
            TransactionStage::FundsSecured
        );
    }

    #[tokio::test]
    async fn audit_trail_records_each_mutation() {
        let h = harness(StubGateway::succeeding());
        let txn = in_inspection(&h).await;
        h.engine.accept(txn.id).await.unwrap();

        let events = h.engine.transaction_events(txn.id).await.unwrap();
        let types: Vec<&str> = events.iter().map(|e| e.event_type.as_str()).collect();
        assert_eq!(
            types,
            vec![
                "payment.recorded",
                "transaction.shipped",
                "delivery.confirmed",
                "funds.released",
            ]
        );
    }
}
