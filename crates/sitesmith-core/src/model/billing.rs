use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A purchasable credit bundle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct CreditPlan {
    pub id: &'static str,
    pub name: &'static str,
    pub credits: i64,
    /// Price in the smallest currency unit (cents).
    pub price_cents: i64,
}

pub const CREDIT_PLANS: &[CreditPlan] = &[
    CreditPlan {
        id: "basic",
        name: "Basic",
        credits: 100,
        price_cents: 500,
    },
    CreditPlan {
        id: "pro",
        name: "Pro",
        credits: 400,
        price_cents: 1900,
    },
    CreditPlan {
        id: "enterprise",
        name: "Enterprise",
        credits: 1000,
        price_cents: 4900,
    },
];

/// Look up a plan by id (case-insensitive).
pub fn find_plan(id: &str) -> Option<&'static CreditPlan> {
    CREDIT_PLANS
        .iter()
        .find(|p| p.id.eq_ignore_ascii_case(id.trim()))
}

/// A credit purchase. Credits are applied only once the payment is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "planId")]
    pub plan_id: String,
    /// Price in cents.
    pub amount: i64,
    pub credits: i64,
    #[serde(rename = "isPaid")]
    pub is_paid: bool,
    #[serde(rename = "createdAt")]
    pub created_at: DateTime<Utc>,
}

impl Transaction {
    pub fn for_plan(user_id: impl Into<String>, plan: &CreditPlan) -> Self {
        Self {
            id: Uuid::now_v7(),
            user_id: user_id.into(),
            plan_id: plan.id.to_string(),
            amount: plan.price_cents,
            credits: plan.credits,
            is_paid: false,
            created_at: Utc::now(),
        }
    }
}
