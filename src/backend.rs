//! Backend transaction API client
//!
//! Typed `reqwest` client for the authoritative transaction store. The
//! backend speaks camelCase JSON in `{success, data, error}` envelopes and
//! a SCREAMING_SNAKE_CASE status vocabulary that maps 1:1 onto
//! [`TransactionStage`]. The backend is the system of record; nothing here
//! caches state.

use crate::error::EscrowError;
use crate::gateway::{PaymentGateway, PaymentSession, PaymentVerification};
use crate::models::TransactionStage;
use crate::money::{FeeSplit, Money};
use crate::EscrowResult;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Configuration for the backend client
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendConfig {
    /// Base URL of the backend API
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:3001".to_string(),
            timeout_secs: 15,
        }
    }
}

/// Backend status vocabulary
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BackendStatus {
    Pending,
    AwaitingPayment,
    AwaitingSellerAcceptance,
    Paid,
    Shipped,
    Delivered,
    Released,
    Disputed,
}

impl BackendStatus {
    /// Map the backend vocabulary onto the engine's stage vocabulary
    pub fn stage(&self) -> TransactionStage {
        match self {
            BackendStatus::Pending
            | BackendStatus::AwaitingPayment
            | BackendStatus::AwaitingSellerAcceptance => TransactionStage::AwaitingPayment,
            BackendStatus::Paid => TransactionStage::FundsSecured,
            BackendStatus::Shipped => TransactionStage::InTransit,
            BackendStatus::Delivered => TransactionStage::Inspection,
            BackendStatus::Released => TransactionStage::Completed,
            BackendStatus::Disputed => TransactionStage::Disputed,
        }
    }
}

/// Response envelope the backend wraps every payload in
#[derive(Debug, Deserialize)]
struct Envelope<T> {
    success: bool,
    data: Option<T>,
    error: Option<String>,
}

/// Request to create a seller payment link
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateLinkRequest {
    pub item_name: String,
    pub amount: Money,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub fee_split: FeeSplit,
}

/// A created payment link, addressable by tracking id
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedLink {
    pub tracking_id: String,
    pub tracking_url: String,
    pub transaction_id: String,
    pub amount: Money,
    pub item_name: String,
}

/// Current state of a tracked transaction as the backend sees it
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSnapshot {
    pub status: BackendStatus,
    pub amount: Money,
    pub item_name: String,
    pub seller_name: Option<String>,
    pub waybill_number: Option<String>,
    /// Auto-release anchor the backend computed at delivery confirmation
    pub auto_release_at: Option<DateTime<Utc>>,
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
}

/// Status update pushed to the backend
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusUpdate {
    pub status: BackendStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub waybill_number: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
struct InitializePaymentRequest<'a> {
    tracking_id: &'a str,
    email: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    phone: Option<&'a str>,
    amount: Money,
}

#[derive(Debug, Deserialize)]
struct VerificationData {
    status: String,
}

/// Request to open a buyer-initiated deal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateIntentRequest {
    pub item_name: String,
    pub amount: Money,
    pub buyer_phone: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub seller_phone: Option<String>,
    pub fee_split: FeeSplit,
}

/// A created buyer intent
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatedIntent {
    pub tracking_id: String,
    pub deal_url: String,
    pub transaction_id: String,
    pub amount: Money,
    pub item_name: String,
    pub buyer_phone: String,
    pub seller_phone: Option<String>,
}

/// Seller bank details submitted when accepting a deal
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AcceptDealRequest {
    pub seller_phone: String,
    pub account_name: String,
    pub account_number: String,
    pub bank_code: String,
}

/// Deal summary returned on fetch/accept
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DealSummary {
    pub tracking_id: String,
    pub item_name: String,
    pub amount: Money,
    pub status: BackendStatus,
    pub buyer_phone: Option<String>,
    pub seller_phone: Option<String>,
}

/// A settlement bank, for seller payout selection
#[derive(Debug, Clone, Deserialize)]
pub struct Bank {
    pub id: u64,
    pub name: String,
    pub code: String,
}

/// HTTP client for the backend transaction API
pub struct BackendClient {
    config: BackendConfig,
    http: reqwest::Client,
}

impl BackendClient {
    pub fn new(config: BackendConfig) -> EscrowResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { config, http })
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Unwrap a backend envelope, surfacing its error string on failure.
    ///
    /// Error bodies are not guaranteed to be JSON (a proxy can answer with
    /// an HTML error page), so the status is checked before decoding.
    async fn read_envelope<T: DeserializeOwned>(
        response: reqwest::Response,
    ) -> EscrowResult<T> {
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let message = serde_json::from_str::<Envelope<serde_json::Value>>(&body)
                .ok()
                .and_then(|envelope| envelope.error)
                .unwrap_or_else(|| format!("Backend returned HTTP {}", status));
            warn!(%status, "backend call failed: {}", message);
            return Err(EscrowError::external_api(message));
        }

        let envelope: Envelope<T> = response.json().await?;
        if !envelope.success {
            let message = envelope
                .error
                .unwrap_or_else(|| "Backend reported failure without detail".to_string());
            warn!(%status, "backend call failed: {}", message);
            return Err(EscrowError::external_api(message));
        }
        envelope
            .data
            .ok_or_else(|| EscrowError::external_api("Backend envelope missing data"))
    }

    /// Create a seller payment link
    pub async fn create_payment_link(&self, request: &CreateLinkRequest) -> EscrowResult<CreatedLink> {
        debug!(item = %request.item_name, "creating payment link");
        let response = self
            .http
            .post(self.url("/api/links/create"))
            .json(request)
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    /// Fetch the authoritative status of a tracked transaction
    pub async fn get_transaction_status(&self, tracking_id: &str) -> EscrowResult<TrackingSnapshot> {
        let response = self
            .http
            .get(self.url(&format!("/api/tracking/{tracking_id}")))
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    /// Push a status change (shipment, delivery, dispute) to the backend
    pub async fn update_transaction_status(
        &self,
        tracking_id: &str,
        update: &StatusUpdate,
    ) -> EscrowResult<TrackingSnapshot> {
        debug!(%tracking_id, status = ?update.status, "updating transaction status");
        let response = self
            .http
            .patch(self.url(&format!("/api/transactions/{tracking_id}/status")))
            .json(update)
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    /// Open a buyer-initiated deal
    pub async fn create_buyer_intent(&self, request: &CreateIntentRequest) -> EscrowResult<CreatedIntent> {
        debug!(item = %request.item_name, "creating buyer intent");
        let response = self
            .http
            .post(self.url("/api/links/create-intent"))
            .json(request)
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    /// Fetch deal details for seller acceptance
    pub async fn get_deal(&self, tracking_id: &str) -> EscrowResult<DealSummary> {
        let response = self
            .http
            .get(self.url(&format!("/api/deals/{tracking_id}")))
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    /// Accept a buyer-initiated deal with the seller's payout details
    pub async fn accept_deal(
        &self,
        tracking_id: &str,
        request: &AcceptDealRequest,
    ) -> EscrowResult<DealSummary> {
        let response = self
            .http
            .post(self.url(&format!("/api/deals/{tracking_id}/accept")))
            .json(request)
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    /// List settlement banks
    pub async fn get_banks(&self) -> EscrowResult<Vec<Bank>> {
        let response = self.http.get(self.url("/api/paystack/banks")).send().await?;
        Self::read_envelope(response).await
    }
}

#[async_trait]
impl PaymentGateway for BackendClient {
    async fn initialize_payment(
        &self,
        tracking_id: &str,
        email: &str,
        phone: Option<&str>,
        amount: Money,
    ) -> EscrowResult<PaymentSession> {
        let request = InitializePaymentRequest {
            tracking_id,
            email,
            phone,
            amount,
        };
        let response = self
            .http
            .post(self.url("/api/payments/initialize"))
            .json(&request)
            .send()
            .await?;
        Self::read_envelope(response).await
    }

    async fn verify_payment(&self, reference: &str) -> EscrowResult<PaymentVerification> {
        let response = self
            .http
            .get(self.url(&format!("/api/payments/verify/{reference}")))
            .send()
            .await?;
        let data: VerificationData = Self::read_envelope(response).await?;
        Ok(if data.status == "success" {
            PaymentVerification::Success
        } else {
            PaymentVerification::Failed
        })
    }

    async fn release_funds(&self, tracking_id: &str) -> EscrowResult<()> {
        debug!(%tracking_id, "releasing funds");
        let response = self
            .http
            .patch(self.url(&format!("/api/transactions/{tracking_id}/release")))
            .send()
            .await?;
        let _: serde_json::Value = Self::read_envelope(response).await?;
        Ok(())
    }

    async fn request_refund(&self, tracking_id: &str) -> EscrowResult<()> {
        // The backend models a buyer rejection as a DISPUTED status update;
        // the refund itself is adjudicated there.
        let update = StatusUpdate {
            status: BackendStatus::Disputed,
            waybill_number: None,
            notes: Some("Buyer rejected item during inspection".to_string()),
        };
        self.update_transaction_status(tracking_id, &update).await?;
        Ok(())
    }
}
