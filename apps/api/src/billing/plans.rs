//! Plan catalog: static tier → feature-limit table.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Personal,
    Business,
}

impl Tier {
    /// Total order used for "best wins" comparisons.
    pub fn rank(self) -> u8 {
        match self {
            Tier::Business => 3,
            Tier::Personal => 2,
            Tier::Free => 1,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Personal => "personal",
            Tier::Business => "business",
        }
    }

    /// Strict parse of a requested tier name (not a plan string).
    pub fn parse(raw: &str) -> Option<Tier> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "free" => Some(Tier::Free),
            "personal" => Some(Tier::Personal),
            "business" => Some(Tier::Business),
            _ => None,
        }
    }

    /// Loose mapping from stored plan identifiers, tolerant of legacy values:
    /// `business*` → business; `*personal*`, `monthly`, `annual`, `*referral*` → personal;
    /// anything else → free.
    pub fn from_plan_string(plan: &str) -> Tier {
        let plan = plan.to_lowercase();
        if plan.contains("business") {
            Tier::Business
        } else if plan.contains("personal")
            || plan == "monthly"
            || plan == "annual"
            || plan.contains("referral")
        {
            Tier::Personal
        } else {
            Tier::Free
        }
    }

    pub fn is_paid(self) -> bool {
        !matches!(self, Tier::Free)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BillingCycle {
    Monthly,
    Annual,
}

impl BillingCycle {
    pub fn as_str(self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Annual => "annual",
        }
    }

    pub fn parse(raw: &str) -> Option<BillingCycle> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "monthly" | "month" => Some(BillingCycle::Monthly),
            "annual" | "annually" | "yearly" | "year" => Some(BillingCycle::Annual),
            _ => None,
        }
    }

    pub fn months(self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Annual => 12,
        }
    }
}

/// Stored plan identifier for a paid tier and cycle, e.g. `business_monthly`.
pub fn plan_identifier(tier: Tier, cycle: BillingCycle) -> String {
    format!("{}_{}", tier.as_str(), cycle.as_str())
}

/// Resolves the requested tier and cycle from the loosely-typed request fields.
/// Explicit `tier` / `billingCycle` win over what a `plan` string implies.
pub fn requested_plan(
    plan: Option<&str>,
    tier: Option<&str>,
    billing_cycle: Option<&str>,
) -> Option<(Tier, BillingCycle)> {
    let plan = plan.map(str::trim).filter(|p| !p.is_empty());
    let tier = match tier.map(str::trim).filter(|t| !t.is_empty()) {
        Some(t) => Tier::parse(t)?,
        None => Tier::from_plan_string(plan?),
    };
    let cycle = match billing_cycle.map(str::trim).filter(|c| !c.is_empty()) {
        Some(c) => BillingCycle::parse(c)?,
        None => match plan {
            Some(p) if p.to_lowercase().contains("annual") || p.to_lowercase().contains("year") => {
                BillingCycle::Annual
            }
            _ => BillingCycle::Monthly,
        },
    };
    Some((tier, cycle))
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanFeatures {
    pub tier: Tier,
    pub label: &'static str,
    pub daily_order_limit: u32,
    pub weekly_order_limit: u32,
    pub retention_hours: u32,
    pub seat_limit: u32,
    pub email_notifications_enabled: bool,
}

pub fn features_for(tier: Tier) -> PlanFeatures {
    match tier {
        Tier::Free => PlanFeatures {
            tier,
            label: "Free",
            daily_order_limit: 1,
            weekly_order_limit: 3,
            retention_hours: 24,
            seat_limit: 1,
            email_notifications_enabled: false,
        },
        Tier::Personal => PlanFeatures {
            tier,
            label: "Personal",
            daily_order_limit: 10,
            weekly_order_limit: 50,
            retention_hours: 168,
            seat_limit: 1,
            email_notifications_enabled: true,
        },
        Tier::Business => PlanFeatures {
            tier,
            label: "Business",
            daily_order_limit: 50,
            weekly_order_limit: 250,
            retention_hours: 720,
            seat_limit: 5,
            email_notifications_enabled: true,
        },
    }
}

/// Every tier, lowest rank first.
pub fn catalog() -> Vec<PlanFeatures> {
    [Tier::Free, Tier::Personal, Tier::Business]
        .into_iter()
        .map(features_for)
        .collect()
}
