//! SaaS pricing tiers. Seeded into the plans table at startup.

use tracing::info;

use crate::config::PlanPrices;
use crate::database::{BillingInterval, Plan, Storage, StorageResult};

struct Tier {
    id: &'static str,
    name: &'static str,
    description: &'static str,
    price_cents: i64,
    features: &'static [&'static str],
}

const TIERS: [Tier; 3] = [
    Tier {
        id: "starter",
        name: "Starter",
        description: "For owner-operators launching their first maintenance plans",
        price_cents: 4900,
        features: &[
            "Up to 3 service plans",
            "Embeddable signup widget",
            "Stripe payouts",
            "Email support",
        ],
    },
    Tier {
        id: "professional",
        name: "Professional",
        description: "For growing teams selling memberships across service areas",
        price_cents: 9900,
        features: &[
            "Unlimited service plans",
            "Custom widget branding",
            "Subscription invite links",
            "Zapier integration",
            "Priority support",
        ],
    },
    Tier {
        id: "enterprise",
        name: "Enterprise",
        description: "For multi-location operators with custom billing needs",
        price_cents: 24900,
        features: &[
            "Everything in Professional",
            "Multiple locations",
            "Dedicated onboarding",
            "Phone support",
        ],
    },
];

/// Builds the plan rows, pairing each tier with its configured Stripe price.
pub fn saas_plans(prices: &PlanPrices) -> Vec<Plan> {
    TIERS
        .iter()
        .zip(1..)
        .map(|(tier, sort_order)| Plan {
            id: tier.id.to_string(),
            name: tier.name.to_string(),
            description: tier.description.to_string(),
            price_cents: tier.price_cents,
            interval: BillingInterval::Month,
            stripe_price_id: match tier.id {
                "starter" => prices.starter.clone(),
                "professional" => prices.professional.clone(),
                _ => prices.enterprise.clone(),
            },
            features: tier.features.iter().map(|f| f.to_string()).collect(),
            sort_order,
        })
        .collect()
}

pub async fn seed_plans(storage: &dyn Storage, prices: &PlanPrices) -> StorageResult<()> {
    for plan in saas_plans(prices) {
        storage.upsert_plan(&plan).await?;
    }
    info!("Seeded {} plans", TIERS.len());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plans_use_configured_prices() {
        let prices = PlanPrices {
            starter: "price_a".into(),
            professional: "price_b".into(),
            enterprise: "price_c".into(),
        };
        let plans = saas_plans(&prices);
        let pairs: Vec<(&str, &str)> = plans
            .iter()
            .map(|p| (p.id.as_str(), p.stripe_price_id.as_str()))
            .collect();
        assert_eq!(
            pairs,
            vec![("starter", "price_a"), ("professional", "price_b"), ("enterprise", "price_c")]
        );
        assert!(plans.windows(2).all(|w| w[0].sort_order < w[1].sort_order));
        assert!(plans.windows(2).all(|w| w[0].price_cents < w[1].price_cents));
    }
}
