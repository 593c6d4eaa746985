//! Payment gateway seam
//!
//! The engine never talks to a gateway directly; it goes through this trait
//! so a transaction only ever advances past `awaiting_payment` on an
//! explicit, verified success signal. `BackendClient` implements it over
//! HTTP; tests plug in a scripted stub.

use crate::money::Money;
use crate::EscrowResult;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// A payment authorization session handed to the buyer
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentSession {
    pub authorization_url: String,
    pub access_code: String,
    pub reference: String,
    pub public_key: String,
}

/// Outcome of verifying a payment reference
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentVerification {
    Success,
    Failed,
}

/// External payment collaborator: authorize, verify, release, refund
#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Start a checkout session for the buyer
    async fn initialize_payment(
        &self,
        tracking_id: &str,
        email: &str,
        phone: Option<&str>,
        amount: Money,
    ) -> EscrowResult<PaymentSession>;

    /// Check whether a payment reference actually captured
    async fn verify_payment(&self, reference: &str) -> EscrowResult<PaymentVerification>;

    /// Signal release of held funds to the seller
    async fn release_funds(&self, tracking_id: &str) -> EscrowResult<()>;

    /// Signal a refund of held funds to the buyer
    async fn request_refund(&self, tracking_id: &str) -> EscrowResult<()>;
}

#[cfg(test)]
pub mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Scripted gateway for engine tests: verification outcome is fixed,
    /// release/refund calls are counted.
    #[derive(Default)]
    pub struct StubGateway {
        pub fail_verification: bool,
        pub releases: AtomicUsize,
        pub refunds: AtomicUsize,
    }

    impl StubGateway {
        pub fn succeeding() -> Self {
            Self::default()
        }

        pub fn failing() -> Self {
            Self {
                fail_verification: true,
                ..Self::default()
            }
        }
    }

    #[async_trait]
    impl PaymentGateway for StubGateway {
        async fn initialize_payment(
            &self,
            tracking_id: &str,
            _email: &str,
            _phone: Option<&str>,
            _amount: Money,
        ) -> EscrowResult<PaymentSession> {
            Ok(PaymentSession {
                authorization_url: format!("https://checkout.test/{tracking_id}"),
                access_code: "access_test".to_string(),
                reference: format!("ref_{tracking_id}"),
                public_key: "pk_test".to_string(),
            })
        }

        async fn verify_payment(&self, _reference: &str) -> EscrowResult<PaymentVerification> {
            Ok(if self.fail_verification {
                PaymentVerification::Failed
            } else {
                PaymentVerification::Success
            })
        }

        async fn release_funds(&self, _tracking_id: &str) -> EscrowResult<()> {
            self.releases.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn request_refund(&self, _tracking_id: &str) -> EscrowResult<()> {
            self.refunds.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }
}
