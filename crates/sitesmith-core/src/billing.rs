//! Credit purchases: checkout initiation and payment confirmation.
//!
//! A purchase is a pending [`Transaction`] until a verified webhook confirms
//! payment. Confirmation flips `isPaid` and credits the user in one store
//! transaction, so a redelivered event never credits twice.

use chrono::{Duration, Utc};
use uuid::Uuid;

use crate::config::SitesmithConfig;
use crate::error::{Result, SitesmithError};
use crate::model::{find_plan, Transaction};
use crate::storage::StorageBackend;
use crate::stripe::{verify_signature, CheckoutMetadata, CheckoutRequest, PaymentProvider, WebhookEvent};

const CHECKOUT_TTL_MINUTES: i64 = 30;

/// Result of processing one webhook delivery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WebhookOutcome {
    Credited {
        transaction_id: Uuid,
        user_id: String,
        credits: i64,
    },
    AlreadyApplied(Uuid),
    Ignored(String),
}

/// Record a pending purchase of `plan_id` and open a checkout page for it.
/// Returns the payment link.
pub async fn start_checkout(
    storage: &impl StorageBackend,
    payments: &impl PaymentProvider,
    config: &SitesmithConfig,
    user_id: &str,
    plan_id: &str,
) -> Result<String> {
    let plan = find_plan(plan_id)
        .ok_or_else(|| SitesmithError::InvalidInput(format!("Invalid plan: {plan_id}")))?;
    let user = match storage.get_user(user_id).await {
        Ok(user) => user,
        Err(SitesmithError::NotFound(_)) => {
            return Err(SitesmithError::Unauthorized("unknown user".into()))
        }
        Err(e) => return Err(e),
    };

    let transaction = Transaction::for_plan(&user.id, plan);
    storage.save_transaction(&transaction).await?;

    let public_url = config.web.public_url.trim_end_matches('/');
    let request = CheckoutRequest {
        product_name: format!("Sitesmith {} - {} credits", plan.name, plan.credits),
        amount_cents: plan.price_cents,
        currency: config.billing.currency.clone(),
        success_url: format!("{public_url}/loading"),
        cancel_url: format!("{public_url}/pricing"),
        expires_at: (Utc::now() + Duration::minutes(CHECKOUT_TTL_MINUTES)).timestamp(),
        metadata: CheckoutMetadata {
            transaction_id: Some(transaction.id.to_string()),
            app_id: Some(config.billing.app_id.clone()),
        },
    };

    let session = payments.create_checkout_session(&request).await?;
    tracing::info!(
        user_id,
        transaction_id = %transaction.id,
        plan = plan.id,
        session_id = %session.id,
        "checkout started"
    );

    session
        .url
        .ok_or_else(|| SitesmithError::Upstream("checkout session has no url".into()))
}

/// Verify and apply a payment webhook delivery.
pub async fn handle_webhook(
    storage: &impl StorageBackend,
    payments: &impl PaymentProvider,
    config: &SitesmithConfig,
    payload: &[u8],
    signature: Option<&str>,
) -> Result<WebhookOutcome> {
    let secret = config
        .billing
        .resolve_webhook_secret()
        .ok_or_else(|| SitesmithError::Config("webhook secret is not configured".into()))?;
    let signature = signature
        .ok_or_else(|| SitesmithError::InvalidInput("missing Stripe-Signature header".into()))?;
    verify_signature(
        payload,
        signature,
        &secret,
        Utc::now().timestamp(),
        config.billing.webhook_tolerance_secs,
    )?;

    let event: WebhookEvent = serde_json::from_slice(payload)
        .map_err(|e| SitesmithError::InvalidInput(format!("malformed webhook event: {e}")))?;
    tracing::debug!(event_id = %event.id, kind = %event.kind, "webhook received");

    let metadata = match event.kind.as_str() {
        "checkout.session.completed" => {
            serde_json::from_value::<CheckoutMetadata>(event.data.object["metadata"].clone())
                .unwrap_or_default()
        }
        "payment_intent.succeeded" => {
            let Some(intent_id) = event.data.object["id"].as_str() else {
                return Ok(WebhookOutcome::Ignored("payment intent without id".into()));
            };
            match payments.metadata_for_payment_intent(intent_id).await? {
                Some(metadata) => metadata,
                None => {
                    return Ok(WebhookOutcome::Ignored(format!(
                        "no checkout session for {intent_id}"
                    )))
                }
            }
        }
        other => {
            tracing::debug!(kind = other, "unhandled webhook event");
            return Ok(WebhookOutcome::Ignored(format!("unhandled event type {other}")));
        }
    };

    apply_payment(storage, &metadata, &config.billing.app_id).await
}

/// Settle the transaction named in `metadata` if it belongs to this app.
pub async fn apply_payment(
    storage: &impl StorageBackend,
    metadata: &CheckoutMetadata,
    app_id: &str,
) -> Result<WebhookOutcome> {
    if metadata.app_id.as_deref() != Some(app_id) {
        return Ok(WebhookOutcome::Ignored("event for another app".into()));
    }
    let Some(raw_id) = metadata.transaction_id.as_deref() else {
        return Ok(WebhookOutcome::Ignored("no transaction id".into()));
    };
    let Ok(transaction_id) = Uuid::parse_str(raw_id) else {
        tracing::warn!(transaction_id = raw_id, "malformed transaction id in payment metadata");
        return Ok(WebhookOutcome::Ignored(format!("malformed transaction id {raw_id}")));
    };

    match storage.settle_transaction(transaction_id).await {
        Ok(Some(tx)) => {
            tracing::info!(
                %transaction_id,
                user_id = %tx.user_id,
                credits = tx.credits,
                "payment applied"
            );
            Ok(WebhookOutcome::Credited {
                transaction_id,
                user_id: tx.user_id,
                credits: tx.credits,
            })
        }
        Ok(None) => {
            tracing::info!(%transaction_id, "payment already applied");
            Ok(WebhookOutcome::AlreadyApplied(transaction_id))
        }
        Err(SitesmithError::NotFound(what)) => {
            tracing::warn!(%transaction_id, missing = %what, "payment for unknown transaction");
            Ok(WebhookOutcome::Ignored(format!("{what} not found")))
        }
        Err(e) => Err(e),
    }
}
