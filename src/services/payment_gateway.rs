use std::time::Duration;

use async_trait::async_trait;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use tracing::{error, info, instrument};
use uuid::Uuid;

use crate::config::PaymentGatewayConfig;
use crate::errors::ServiceError;

type HmacSha256 = Hmac<Sha256>;

/// What the hosted checkout needs to open a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateSessionInput {
    /// Amount to charge, net of any discount and including the deposit leg
    pub amount_cents: i64,
    pub deposit_cents: i64,
    pub currency: String,
    pub listing_item_id: Uuid,
    pub order_id: Uuid,
    /// Our checkout session id
    pub session_ref: Uuid,
    pub coupon_id: Option<Uuid>,
    pub coupon_code: Option<String>,
    pub discount_cents: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostedSession {
    pub session_id: String,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundRequest {
    /// Our session id; the gateway refunds at most once per key
    pub idempotency_key: Uuid,
    pub external_session_id: String,
    pub amount_cents: i64,
    pub currency: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RefundReceipt {
    pub refund_id: String,
    pub amount_cents: i64,
}

/// The hosted payment checkout. Delivers results later through the payment
/// webhook, at least once.
#[async_trait]
pub trait CheckoutSessionBridge: Send + Sync {
    async fn create_session(&self, input: &CreateSessionInput)
        -> Result<HostedSession, ServiceError>;

    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, ServiceError>;
}

/// `reqwest` client for the gateway's REST API.
#[derive(Debug, Clone)]
pub struct HttpCheckoutBridge {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCheckoutBridge {
    pub fn new(config: &PaymentGatewayConfig) -> Result<Self, ServiceError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| ServiceError::InternalError(format!("http client: {e}")))?;
        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
        })
    }

    async fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        idempotency_key: Uuid,
        body: &B,
    ) -> Result<R, ServiceError> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .header("idempotency-key", idempotency_key.to_string())
            .json(body)
            .send()
            .await
            .map_err(|e| {
                error!(url = %url, error = %e, "Checkout gateway request failed");
                ServiceError::ExternalServiceError(format!("checkout gateway unreachable: {e}"))
            })?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            error!(url = %url, status = %status, body = %text, "Checkout gateway rejected request");
            return Err(ServiceError::ExternalServiceError(format!(
                "checkout gateway returned {status}"
            )));
        }

        response.json::<R>().await.map_err(|e| {
            ServiceError::ExternalServiceError(format!("invalid checkout gateway response: {e}"))
        })
    }
}

#[async_trait]
impl CheckoutSessionBridge for HttpCheckoutBridge {
    #[instrument(skip(self, input), fields(order_id = %input.order_id))]
    async fn create_session(
        &self,
        input: &CreateSessionInput,
    ) -> Result<HostedSession, ServiceError> {
        let session: HostedSession = self
            .post("/checkout/sessions", input.session_ref, input)
            .await?;
        info!(session_id = %session.session_id, "Hosted checkout session created");
        Ok(session)
    }

    #[instrument(skip(self, request), fields(session = %request.idempotency_key))]
    async fn refund(&self, request: &RefundRequest) -> Result<RefundReceipt, ServiceError> {
        let receipt: RefundReceipt = self
            .post("/refunds", request.idempotency_key, request)
            .await?;
        info!(refund_id = %receipt.refund_id, amount_cents = receipt.amount_cents, "Refund issued");
        Ok(receipt)
    }
}

/// Hex HMAC-SHA256 over `"{timestamp}.{body}"`.
pub fn sign_payload(secret: &str, timestamp: i64, body: &[u8]) -> Result<String, ServiceError> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| ServiceError::InternalError(format!("hmac key: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(body);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Checks a webhook signature and its timestamp against the allowed skew.
pub fn verify_signature(
    secret: &str,
    timestamp: &str,
    signature: &str,
    body: &[u8],
    tolerance_secs: i64,
    now: i64,
) -> bool {
    let Ok(ts) = timestamp.trim().parse::<i64>() else {
        return false;
    };
    if (now - ts).abs() > tolerance_secs {
        return false;
    }
    match sign_payload(secret, ts, body) {
        Ok(expected) => constant_time_eq(&expected, signature.trim()),
        Err(_) => false,
    }
}

fn constant_time_eq(a: &str, b: &str) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut res = 0u8;
    for (x, y) in a.as_bytes().iter().zip(b.as_bytes()) {
        res |= x ^ y;
    }
    res == 0
}
