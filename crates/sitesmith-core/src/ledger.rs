//! Per-user credit balance. Every mutation is one conditional or unconditional
//! increment in the store; nothing here reads a balance and writes it back.

use crate::error::{Result, SitesmithError};
use crate::retry::{with_retry, RetryPolicy};
use crate::storage::StorageBackend;

/// Current balance.
pub async fn balance(storage: &impl StorageBackend, user_id: &str) -> Result<i64> {
    Ok(storage.get_user(user_id).await?.credits)
}

/// Debit `amount`, failing with `InsufficientCredits` if the balance is short.
/// Returns the new balance.
pub async fn debit(storage: &impl StorageBackend, user_id: &str, amount: i64) -> Result<i64> {
    let remaining = storage.debit_credits(user_id, amount, false).await?;
    tracing::debug!(user_id, amount, remaining, "credits debited");
    Ok(remaining)
}

/// Debit for a new project: also counts it towards the user's `totalCreation`.
pub async fn debit_for_creation(
    storage: &impl StorageBackend,
    user_id: &str,
    amount: i64,
) -> Result<i64> {
    let remaining = storage.debit_credits(user_id, amount, true).await?;
    tracing::debug!(user_id, amount, remaining, "credits debited for new project");
    Ok(remaining)
}

pub async fn credit(storage: &impl StorageBackend, user_id: &str, amount: i64) -> Result<i64> {
    if amount < 0 {
        return Err(SitesmithError::InvalidInput(format!(
            "cannot credit a negative amount ({amount})"
        )));
    }
    let balance = storage.add_credits(user_id, amount).await?;
    tracing::debug!(user_id, amount, balance, "credits added");
    Ok(balance)
}

/// Give back a debit after a failed run. Transient store errors are retried;
/// a refund that still fails is logged with the amount owed.
pub async fn refund(storage: &impl StorageBackend, user_id: &str, amount: i64) -> Result<i64> {
    match with_retry(&RetryPolicy::REFUND, "refund", || {
        storage.add_credits(user_id, amount)
    })
    .await
    {
        Ok(balance) => {
            tracing::info!(user_id, amount, balance, "credits refunded");
            Ok(balance)
        }
        Err(e) => {
            tracing::error!(user_id, amount_owed = amount, error = %e, "refund failed");
            Err(e)
        }
    }
}
