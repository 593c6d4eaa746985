//! Escrow node: wires the engine, store, gateway, and sweeper together
//!
//! Hosts embed this facade rather than assembling the parts themselves.
//! State lives behind the repository traits, the backend client doubles as
//! the payment gateway, and the sweeper runs on the node's runtime.

use crate::backend::BackendClient;
use crate::config::NodeConfig;
use crate::engine::{CreateLinkRequest, DisputeOutcome, LifecycleEngine, RecordPaymentRequest};
use crate::gateway::PaymentGateway;
use crate::models::{ChatSender, PaymentLink, Transaction};
use crate::store::{LinkRepository, MemoryStore, TransactionRepository};
use crate::sweep::{ReleaseSweeper, SweeperConfig};
use crate::EscrowResult;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::info;
use uuid::Uuid;

/// Main escrow node coordinating all components
pub struct EscrowNode {
    engine: Arc<LifecycleEngine>,
    sweeper_config: SweeperConfig,
}

impl EscrowNode {
    /// Build a node from configuration: in-memory store, HTTP backend as
    /// the gateway.
    pub fn new(config: NodeConfig) -> EscrowResult<Self> {
        let store = Arc::new(MemoryStore::new());
        let backend = Arc::new(BackendClient::new(config.backend.clone())?);
        Ok(Self::with_parts(config, store.clone(), store, backend))
    }

    /// Build a node from explicit parts (custom store or gateway)
    pub fn with_parts(
        config: NodeConfig,
        links: Arc<dyn LinkRepository>,
        transactions: Arc<dyn TransactionRepository>,
        gateway: Arc<dyn PaymentGateway>,
    ) -> Self {
        let engine = Arc::new(LifecycleEngine::new(
            config.engine,
            links,
            transactions,
            gateway,
        ));
        info!("escrow node initialized");
        Self {
            engine,
            sweeper_config: config.sweeper,
        }
    }

    /// The underlying lifecycle engine
    pub fn engine(&self) -> Arc<LifecycleEngine> {
        self.engine.clone()
    }

    /// Start the periodic deadline sweep on the current runtime
    pub fn start_sweeper(&self) -> JoinHandle<()> {
        ReleaseSweeper::new(self.sweeper_config.clone(), self.engine.clone()).spawn()
    }

    pub async fn create_link(&self, request: CreateLinkRequest) -> EscrowResult<PaymentLink> {
        self.engine.create_link(request).await
    }

    pub async fn record_payment(&self, request: RecordPaymentRequest) -> EscrowResult<Transaction> {
        self.engine.record_payment(request).await
    }

    pub async fn mark_shipped(
        &self,
        transaction_id: Uuid,
        waybill_number: &str,
        proof_of_delivery: Option<String>,
    ) -> EscrowResult<Transaction> {
        self.engine
            .mark_shipped(transaction_id, waybill_number, proof_of_delivery)
            .await
    }

    pub async fn confirm_delivery(&self, transaction_id: Uuid) -> EscrowResult<Transaction> {
        self.engine.confirm_delivery(transaction_id).await
    }

    pub async fn accept(&self, transaction_id: Uuid) -> EscrowResult<Transaction> {
        self.engine.accept(transaction_id).await
    }

    pub async fn reject(&self, transaction_id: Uuid, reason: &str) -> EscrowResult<Transaction> {
        self.engine.reject(transaction_id, reason).await
    }

    pub async fn raise_dispute(
        &self,
        transaction_id: Uuid,
        raised_by: ChatSender,
        reason: &str,
    ) -> EscrowResult<Transaction> {
        self.engine.raise_dispute(transaction_id, raised_by, reason).await
    }

    pub async fn resolve_dispute(
        &self,
        transaction_id: Uuid,
        outcome: DisputeOutcome,
    ) -> EscrowResult<Transaction> {
        self.engine.resolve_dispute(transaction_id, outcome).await
    }

    pub async fn get_transaction(&self, transaction_id: Uuid) -> EscrowResult<Transaction> {
        self.engine.get_transaction(transaction_id).await
    }
}
