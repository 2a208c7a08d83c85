//! Stripe client for checkout sessions, and webhook signature verification.

use std::future::Future;

use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;

use crate::config::BillingConfig;
use crate::error::{Result, SitesmithError};

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_BASE_URL: &str = "https://api.stripe.com";

/// What the checkout page should charge for.
#[derive(Debug, Clone)]
pub struct CheckoutRequest {
    pub product_name: String,
    pub amount_cents: i64,
    pub currency: String,
    pub success_url: String,
    pub cancel_url: String,
    /// Unix seconds.
    pub expires_at: i64,
    pub metadata: CheckoutMetadata,
}

/// Metadata stamped on a checkout session and echoed back by payment events.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckoutMetadata {
    #[serde(rename = "transactionId", default)]
    pub transaction_id: Option<String>,
    #[serde(rename = "appId", default)]
    pub app_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    pub url: Option<String>,
    #[serde(default)]
    pub metadata: CheckoutMetadata,
}

/// Payment collaborator. The web layer injects [`StripeClient`]; tests use fakes.
pub trait PaymentProvider: Send + Sync {
    fn create_checkout_session(
        &self,
        request: &CheckoutRequest,
    ) -> impl Future<Output = Result<CheckoutSession>> + Send;

    /// Metadata of the checkout session that produced a payment intent.
    fn metadata_for_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> impl Future<Output = Result<Option<CheckoutMetadata>>> + Send;
}

pub struct StripeClient {
    secret_key: Option<String>,
    base_url: String,
    client: reqwest::Client,
}

impl std::fmt::Debug for StripeClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StripeClient")
            .field("base_url", &self.base_url)
            .field("configured", &self.secret_key.is_some())
            .finish()
    }
}

impl StripeClient {
    /// Build a client. A missing secret key is allowed; checkout calls then
    /// fail with a configuration error.
    pub fn from_config(config: &BillingConfig) -> Self {
        let secret_key = config.resolve_secret_key();
        if secret_key.is_none() {
            tracing::warn!(
                env_var = %config.secret_key_env,
                "no Stripe secret key configured, credit purchases are disabled"
            );
        }
        Self {
            secret_key,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            client: reqwest::Client::new(),
        }
    }

    fn key(&self) -> Result<&str> {
        self.secret_key
            .as_deref()
            .ok_or_else(|| SitesmithError::Config("payments are not configured".into()))
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url.trim_end_matches('/'))
    }
}

impl PaymentProvider for StripeClient {
    /// POST /v1/checkout/sessions
    async fn create_checkout_session(&self, request: &CheckoutRequest) -> Result<CheckoutSession> {
        let key = self.key()?;

        let mut form: Vec<(&str, String)> = vec![
            ("mode", "payment".into()),
            ("success_url", request.success_url.clone()),
            ("cancel_url", request.cancel_url.clone()),
            ("expires_at", request.expires_at.to_string()),
            ("line_items[0][quantity]", "1".into()),
            ("line_items[0][price_data][currency]", request.currency.clone()),
            ("line_items[0][price_data][unit_amount]", request.amount_cents.to_string()),
            (
                "line_items[0][price_data][product_data][name]",
                request.product_name.clone(),
            ),
        ];
        if let Some(id) = &request.metadata.transaction_id {
            form.push(("metadata[transactionId]", id.clone()));
        }
        if let Some(app) = &request.metadata.app_id {
            form.push(("metadata[appId]", app.clone()));
        }
        let body = serde_urlencoded::to_string(&form)
            .map_err(|e| SitesmithError::Internal(format!("failed to encode checkout form: {e}")))?;

        let resp = self
            .client
            .post(self.url("/v1/checkout/sessions"))
            .header("Authorization", format!("Bearer {key}"))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(body)
            .send()
            .await
            .map_err(|e| SitesmithError::Upstream(format!("Stripe request failed: {e}")))?;

        read_json(resp).await
    }

    /// GET /v1/checkout/sessions?payment_intent=...
    async fn metadata_for_payment_intent(
        &self,
        payment_intent_id: &str,
    ) -> Result<Option<CheckoutMetadata>> {
        #[derive(Deserialize)]
        struct SessionList {
            data: Vec<CheckoutSession>,
        }

        let key = self.key()?;
        let query = serde_urlencoded::to_string(&[("payment_intent", payment_intent_id)])
            .map_err(|e| SitesmithError::Internal(format!("failed to encode query: {e}")))?;

        let resp = self
            .client
            .get(format!("{}?{query}", self.url("/v1/checkout/sessions")))
            .header("Authorization", format!("Bearer {key}"))
            .send()
            .await
            .map_err(|e| SitesmithError::Upstream(format!("Stripe request failed: {e}")))?;

        let list: SessionList = read_json(resp).await?;
        Ok(list.data.into_iter().next().map(|s| s.metadata))
    }
}

async fn read_json<T: serde::de::DeserializeOwned>(resp: reqwest::Response) -> Result<T> {
    if !resp.status().is_success() {
        let status = resp.status();
        let text = resp.text().await.unwrap_or_default();
        return Err(SitesmithError::Upstream(format!("Stripe error {status}: {text}")));
    }
    resp.json()
        .await
        .map_err(|e| SitesmithError::Upstream(format!("Stripe response parse error: {e}")))
}

// -- Webhooks --

/// A webhook event envelope. Only the fields the billing flow reads.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookEvent {
    #[serde(default)]
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub data: EventData,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventData {
    pub object: serde_json::Value,
}

/// Verify a `Stripe-Signature` header (`t=<unix>,v1=<hex>[,v1=...]`) over the
/// raw request body. Any matching `v1` signature is accepted.
pub fn verify_signature(
    payload: &[u8],
    header: &str,
    secret: &str,
    now: i64,
    tolerance_secs: i64,
) -> Result<()> {
    let invalid = |why: &str| SitesmithError::InvalidInput(format!("invalid webhook signature: {why}"));

    let mut timestamp = None;
    let mut signatures = Vec::new();
    for part in header.split(',') {
        match part.trim().split_once('=') {
            Some(("t", value)) => timestamp = value.parse::<i64>().ok(),
            Some(("v1", value)) => signatures.push(value),
            _ => {}
        }
    }

    let timestamp = timestamp.ok_or_else(|| invalid("missing timestamp"))?;
    if signatures.is_empty() {
        return Err(invalid("no v1 signature"));
    }
    if (now - timestamp).abs() > tolerance_secs {
        return Err(invalid("timestamp outside tolerance"));
    }

    let mac = signed_payload_mac(payload, secret, timestamp)?;
    let matched = signatures.iter().any(|sig| match hex::decode(sig) {
        Ok(bytes) => mac.clone().verify_slice(&bytes).is_ok(),
        Err(_) => false,
    });

    if matched {
        Ok(())
    } else {
        Err(invalid("no matching signature"))
    }
}

/// Produce a `Stripe-Signature` header value for `payload`.
pub fn signature_header(payload: &[u8], secret: &str, timestamp: i64) -> Result<String> {
    let mac = signed_payload_mac(payload, secret, timestamp)?;
    Ok(format!(
        "t={timestamp},v1={}",
        hex::encode(mac.finalize().into_bytes())
    ))
}

fn signed_payload_mac(payload: &[u8], secret: &str, timestamp: i64) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| SitesmithError::Config(format!("invalid webhook secret: {e}")))?;
    mac.update(timestamp.to_string().as_bytes());
    mac.update(b".");
    mac.update(payload);
    Ok(mac)
}
