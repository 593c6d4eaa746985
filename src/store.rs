//! Repositories for links, transactions, and the audit trail
//!
//! The engine operates only through these traits so that a host can put a
//! real database behind them; transition serialization per transaction is
//! the store's concern. `MemoryStore` is the bundled implementation used in
//! tests and offline tooling.

use crate::error::EscrowError;
use crate::models::{LifecycleEvent, PaymentLink, Transaction, TransactionStage};
use crate::EscrowResult;
use async_trait::async_trait;
use std::{collections::HashMap, sync::Arc};
use tokio::sync::RwLock;
use uuid::Uuid;

/// Storage for payment links
#[async_trait]
pub trait LinkRepository: Send + Sync {
    async fn insert_link(&self, link: PaymentLink) -> EscrowResult<()>;
    async fn get_link(&self, id: Uuid) -> EscrowResult<PaymentLink>;
    async fn update_link(&self, link: PaymentLink) -> EscrowResult<()>;
    /// Unclaimed/draft links addressed to a seller phone number
    async fn unclaimed_links_by_phone(&self, phone: &str) -> EscrowResult<Vec<PaymentLink>>;
}

/// Storage for transactions and their audit trail
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    async fn insert_transaction(&self, txn: Transaction) -> EscrowResult<()>;
    async fn get_transaction(&self, id: Uuid) -> EscrowResult<Transaction>;
    async fn update_transaction(&self, txn: Transaction) -> EscrowResult<()>;
    /// All transactions currently in the given stage (sweep input)
    async fn transactions_in_stage(&self, stage: TransactionStage) -> EscrowResult<Vec<Transaction>>;
    async fn append_event(&self, event: LifecycleEvent) -> EscrowResult<()>;
    async fn events_for(&self, transaction_id: Uuid) -> EscrowResult<Vec<LifecycleEvent>>;
}

/// In-memory store backed by `RwLock`ed maps
#[derive(Default)]
pub struct MemoryStore {
    links: Arc<RwLock<HashMap<Uuid, PaymentLink>>>,
    transactions: Arc<RwLock<HashMap<Uuid, Transaction>>>,
    events: Arc<RwLock<Vec<LifecycleEvent>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LinkRepository for MemoryStore {
    async fn insert_link(&self, link: PaymentLink) -> EscrowResult<()> {
        self.links.write().await.insert(link.id, link);
        Ok(())
    }

    async fn get_link(&self, id: Uuid) -> EscrowResult<PaymentLink> {
        self.links
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EscrowError::link_not_found(id))
    }

    async fn update_link(&self, link: PaymentLink) -> EscrowResult<()> {
        let mut links = self.links.write().await;
        if !links.contains_key(&link.id) {
            return Err(EscrowError::link_not_found(link.id));
        }
        links.insert(link.id, link);
        Ok(())
    }

    async fn unclaimed_links_by_phone(&self, phone: &str) -> EscrowResult<Vec<PaymentLink>> {
        use crate::models::LinkStatus;
        let links = self.links.read().await;
        Ok(links
            .values()
            .filter(|l| {
                l.seller_phone.as_deref() == Some(phone)
                    && matches!(l.status, LinkStatus::Unclaimed | LinkStatus::Draft)
            })
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TransactionRepository for MemoryStore {
    async fn insert_transaction(&self, txn: Transaction) -> EscrowResult<()> {
        self.transactions.write().await.insert(txn.id, txn);
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> EscrowResult<Transaction> {
        self.transactions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or_else(|| EscrowError::transaction_not_found(id))
    }

    async fn update_transaction(&self, txn: Transaction) -> EscrowResult<()> {
        let mut transactions = self.transactions.write().await;
        if !transactions.contains_key(&txn.id) {
            return Err(EscrowError::transaction_not_found(txn.id));
        }
        transactions.insert(txn.id, txn);
        Ok(())
    }

    async fn transactions_in_stage(&self, stage: TransactionStage) -> EscrowResult<Vec<Transaction>> {
        let transactions = self.transactions.read().await;
        Ok(transactions
            .values()
            .filter(|t| t.stage == stage)
            .cloned()
            .collect())
    }

    async fn append_event(&self, event: LifecycleEvent) -> EscrowResult<()> {
        self.events.write().await.push(event);
        Ok(())
    }

    async fn events_for(&self, transaction_id: Uuid) -> EscrowResult<Vec<LifecycleEvent>> {
        let events = self.events.read().await;
        Ok(events
            .iter()
            .filter(|e| e.transaction_id == Some(transaction_id))
            .cloned()
            .collect())
    }
}
