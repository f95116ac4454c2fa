//! Outbound refund collaborator.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use thiserror::Error;
use tokio::sync::Mutex;

use crate::model::Payment;

#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("refund declined: {0}")]
    Declined(String),
    #[error("payment provider unreachable: {0}")]
    Unreachable(String),
}

#[async_trait]
pub trait PaymentGateway: Send + Sync {
    /// Ask the provider to refund the full amount of `payment`.
    async fn request_refund(&self, payment: &Payment) -> Result<(), GatewayError>;
}

/// Logs refund requests and reports success. Used by the daemon until a real
/// provider client is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingGateway;

#[async_trait]
impl PaymentGateway for LoggingGateway {
    async fn request_refund(&self, payment: &Payment) -> Result<(), GatewayError> {
        tracing::info!(
            payment = %payment.id,
            provider_id = %payment.provider_payment_id,
            amount_cents = payment.amount_cents,
            currency = %payment.currency,
            "refund requested"
        );
        Ok(())
    }
}

/// Records refund requests; can be told to decline them.
#[derive(Debug, Default)]
pub struct InMemoryGateway {
    refunded: Mutex<Vec<String>>,
    fail_refunds: AtomicBool,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_fail_refunds(&self, fail: bool) {
        self.fail_refunds.store(fail, Ordering::SeqCst);
    }

    /// Provider ids refunded so far, in request order.
    pub async fn refunded(&self) -> Vec<String> {
        self.refunded.lock().await.clone()
    }
}

#[async_trait]
impl PaymentGateway for InMemoryGateway {
    async fn request_refund(&self, payment: &Payment) -> Result<(), GatewayError> {
        if self.fail_refunds.load(Ordering::SeqCst) {
            return Err(GatewayError::Declined(format!(
                "refund of {} declined",
                payment.provider_payment_id
            )));
        }
        self.refunded
            .lock()
            .await
            .push(payment.provider_payment_id.clone());
        Ok(())
    }
}
