use serde::{Deserialize, Serialize};

use super::LedgerError;
use super::tier::TierPolicy;

pub const MAX_CREDITS_PER_EXECUTION: u64 = 100;

const BASE_COST: u64 = 1;
const SECONDS_PER_DURATION_CREDIT: u64 = 30;
const NODES_PER_COMPLEXITY_CREDIT: u64 = 10;

#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EstimateInput {
    #[serde(default)]
    pub node_count: u32,
    #[serde(default)]
    pub estimated_duration_seconds: u32,
    #[serde(default)]
    pub premium_nodes: Vec<PremiumNodeUse>,
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct PremiumNodeUse {
    #[serde(rename = "type")]
    pub node_type: String,
    pub count: u32,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEstimate {
    pub base_cost: u64,
    pub duration_cost: u64,
    pub complexity_cost: u64,
    pub premium_cost: u64,
    #[serde(rename = "tierMultiplier")]
    pub multiplier: f64,
    pub raw_total: u64,
    pub estimated_total: u64,
}

/// Deterministic credit cost for one workflow execution. Pure arithmetic over
/// the inputs and the tier policy; unknown premium node types fail instead of
/// pricing at zero.
pub fn estimate(input: &EstimateInput, policy: &TierPolicy) -> Result<CostEstimate, LedgerError> {
    let duration_cost = u64::from(input.estimated_duration_seconds) / SECONDS_PER_DURATION_CREDIT;
    let complexity_cost = u64::from(input.node_count) / NODES_PER_COMPLEXITY_CREDIT;

    let mut premium_cost: u64 = 0;
    for node in &input.premium_nodes {
        let per_node = policy.premium_node_cost(&node.node_type)?;
        let node_total = u64::from(node.count).saturating_mul(u64::from(per_node));
        premium_cost = premium_cost.saturating_add(node_total);
    }

    let subtotal = BASE_COST
        .saturating_add(duration_cost)
        .saturating_add(complexity_cost)
        .saturating_add(premium_cost);
    let raw_total = apply_multiplier(subtotal, policy.multiplier_hundredths);

    Ok(CostEstimate {
        base_cost: BASE_COST,
        duration_cost,
        complexity_cost,
        premium_cost,
        multiplier: policy.multiplier(),
        raw_total,
        estimated_total: raw_total.min(MAX_CREDITS_PER_EXECUTION),
    })
}

// Ceiling division so fractional multipliers never round an execution down to
// a cheaper integer total.
fn apply_multiplier(subtotal: u64, multiplier_hundredths: u32) -> u64 {
    let scaled = subtotal.saturating_mul(u64::from(multiplier_hundredths));
    scaled.saturating_add(99) / 100
}

#[cfg(test)]
mod tests {
    use super::super::tier::{Tier, TierPolicyTable};
    use super::*;

    fn policy_table() -> TierPolicyTable {
        TierPolicyTable::builtin()
    }

    #[test]
    fn worked_example_on_free_tier() {
        let table = policy_table();
        let input = EstimateInput {
            node_count: 10,
            estimated_duration_seconds: 60,
            premium_nodes: Vec::new(),
        };
        let breakdown = estimate(&input, table.policy_for(Tier::Free)).expect("estimate");
        assert_eq!(breakdown.base_cost, 1);
        assert_eq!(breakdown.duration_cost, 2);
        assert_eq!(breakdown.complexity_cost, 1);
        assert_eq!(breakdown.premium_cost, 0);
        assert_eq!(breakdown.multiplier, 2.0);
        assert_eq!(breakdown.estimated_total, 8);
    }

    #[test]
    fn identical_inputs_estimate_identically() {
        let table = policy_table();
        let policy = table.policy_for(Tier::Maker);
        let input = EstimateInput {
            node_count: 23,
            estimated_duration_seconds: 95,
            premium_nodes: vec![PremiumNodeUse {
                node_type: "ai_image".to_string(),
                count: 2,
            }],
        };
        let first = estimate(&input, policy).expect("estimate");
        let second = estimate(&input, policy).expect("estimate");
        assert_eq!(first, second);
    }

    #[test]
    fn tier_multipliers_order_totals() {
        let table = policy_table();
        let input = EstimateInput {
            node_count: 30,
            estimated_duration_seconds: 120,
            premium_nodes: vec![PremiumNodeUse {
                node_type: "ai_text".to_string(),
                count: 3,
            }],
        };
        let totals: Vec<u64> = [Tier::Free, Tier::Maker, Tier::Pro, Tier::Agency]
            .into_iter()
            .map(|tier| {
                estimate(&input, table.policy_for(tier))
                    .expect("estimate")
                    .estimated_total
            })
            .collect();
        for pair in totals.windows(2) {
            assert!(pair[0] >= pair[1], "totals not monotone: {totals:?}");
        }
    }

    #[test]
    fn fractional_multiplier_rounds_up() {
        let table = policy_table();
        let policy = table.policy_for(Tier::Maker);
        // subtotal 3 (base 1 + duration 2) at 1.5x is 4.5 and charges 5.
        let input = EstimateInput {
            node_count: 0,
            estimated_duration_seconds: 60,
            premium_nodes: Vec::new(),
        };
        let breakdown = estimate(&input, policy).expect("estimate");
        assert_eq!(breakdown.raw_total, 5);
    }

    #[test]
    fn cap_applies_to_any_inputs() {
        let table = policy_table();
        let input = EstimateInput {
            node_count: u32::MAX,
            estimated_duration_seconds: u32::MAX,
            premium_nodes: vec![PremiumNodeUse {
                node_type: "ai_image".to_string(),
                count: u32::MAX,
            }],
        };
        for tier in Tier::ALL {
            let breakdown = estimate(&input, table.policy_for(tier)).expect("estimate");
            assert!(breakdown.estimated_total <= MAX_CREDITS_PER_EXECUTION);
        }
    }

    #[test]
    fn unknown_premium_node_fails_instead_of_zero_pricing() {
        let table = policy_table();
        let input = EstimateInput {
            node_count: 1,
            estimated_duration_seconds: 1,
            premium_nodes: vec![PremiumNodeUse {
                node_type: "mystery_node".to_string(),
                count: 1,
            }],
        };
        let err = estimate(&input, table.policy_for(Tier::Pro)).expect_err("must fail");
        assert!(matches!(err, LedgerError::UnknownPremiumNode { .. }));
    }

    #[test]
    fn admin_tier_estimates_to_zero() {
        let table = policy_table();
        let input = EstimateInput {
            node_count: 50,
            estimated_duration_seconds: 600,
            premium_nodes: Vec::new(),
        };
        let breakdown = estimate(&input, table.policy_for(Tier::Admin)).expect("estimate");
        assert_eq!(breakdown.estimated_total, 0);
    }
}
