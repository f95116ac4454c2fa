//! Payment provider webhook boundary.
//!
//! Signature verification happens before this point. `decode` turns the raw
//! JSON envelope into a [`PaymentOutcome`] once, so nothing downstream ever
//! switches on event-type strings.

use serde::Deserialize;
use thiserror::Error;

use crate::limits::MAX_PROVIDER_ID_LEN;

const SUCCEEDED: &str = "payment_intent.succeeded";
const FAILED: &str = "payment_intent.payment_failed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentOutcome {
    Succeeded {
        provider_payment_id: String,
    },
    Failed {
        provider_payment_id: String,
        failure_reason: Option<String>,
    },
}

impl PaymentOutcome {
    pub fn provider_payment_id(&self) -> &str {
        match self {
            PaymentOutcome::Succeeded { provider_payment_id }
            | PaymentOutcome::Failed { provider_payment_id, .. } => provider_payment_id,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            PaymentOutcome::Succeeded { .. } => "succeeded",
            PaymentOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("malformed webhook payload: {0}")]
    Malformed(#[from] serde_json::Error),
    #[error("webhook payload missing payment id")]
    MissingPaymentId,
    #[error("payment id too long")]
    PaymentIdTooLong,
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    data: serde_json::Value,
}

#[derive(Deserialize)]
struct Data {
    object: Intent,
}

#[derive(Deserialize)]
struct Intent {
    #[serde(default)]
    id: String,
    #[serde(default)]
    last_payment_error: Option<PaymentError>,
}

#[derive(Deserialize)]
struct PaymentError {
    message: Option<String>,
}

/// Decode a provider event. Event types we do not act on yield `Ok(None)`.
pub fn decode(payload: &[u8]) -> Result<Option<PaymentOutcome>, WebhookError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    if envelope.kind != SUCCEEDED && envelope.kind != FAILED {
        tracing::debug!(event_type = %envelope.kind, "ignoring webhook event");
        return Ok(None);
    }

    let Data { object: intent } = serde_json::from_value(envelope.data)?;
    if intent.id.is_empty() {
        return Err(WebhookError::MissingPaymentId);
    }
    if intent.id.len() > MAX_PROVIDER_ID_LEN {
        return Err(WebhookError::PaymentIdTooLong);
    }

    let outcome = if envelope.kind == SUCCEEDED {
        PaymentOutcome::Succeeded {
            provider_payment_id: intent.id,
        }
    } else {
        PaymentOutcome::Failed {
            provider_payment_id: intent.id,
            failure_reason: intent.last_payment_error.and_then(|e| e.message),
        }
    };
    Ok(Some(outcome))
}
