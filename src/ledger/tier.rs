use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::LedgerError;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    Free,
    Maker,
    Pro,
    Agency,
    Admin,
}

impl Tier {
    pub const ALL: [Tier; 5] = [Tier::Free, Tier::Maker, Tier::Pro, Tier::Agency, Tier::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Tier::Free => "free",
            Tier::Maker => "maker",
            Tier::Pro => "pro",
            Tier::Agency => "agency",
            Tier::Admin => "admin",
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Tier {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "free" => Ok(Tier::Free),
            "maker" => Ok(Tier::Maker),
            "pro" => Ok(Tier::Pro),
            "agency" => Ok(Tier::Agency),
            "admin" => Ok(Tier::Admin),
            _ => Err(LedgerError::UnknownTier {
                tier: raw.to_string(),
            }),
        }
    }
}

/// Pricing policy for a single tier. Multipliers are stored as integer
/// hundredths so credit totals stay exact; `2.0` becomes `200`.
#[derive(Clone, Debug)]
pub struct TierPolicy {
    pub multiplier_hundredths: u32,
    pub free_executions_per_day: u32,
    pub starting_credits: i64,
    pub premium_node_costs: BTreeMap<String, u32>,
}

impl TierPolicy {
    pub fn multiplier(&self) -> f64 {
        f64::from(self.multiplier_hundredths) / 100.0
    }

    pub fn premium_node_cost(&self, node_type: &str) -> Result<u32, LedgerError> {
        self.premium_node_costs
            .get(node_type)
            .copied()
            .ok_or_else(|| LedgerError::UnknownPremiumNode {
                node_type: node_type.to_string(),
            })
    }
}

/// Per-tier policy override as it appears in the config file. Absent fields
/// keep the built-in value.
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct TierPolicyOverride {
    pub multiplier: Option<f64>,
    pub free_executions_per_day: Option<u32>,
    pub starting_credits: Option<i64>,
    pub premium_node_costs: Option<BTreeMap<String, u32>>,
}

/// Immutable tier -> policy lookup, loaded at startup. One policy per
/// [`Tier::ALL`] entry, indexed by discriminant; config overrides replace
/// fields, never remove tiers.
#[derive(Clone, Debug)]
pub struct TierPolicyTable {
    policies: [TierPolicy; Tier::ALL.len()],
}

impl TierPolicyTable {
    pub fn builtin() -> Self {
        let premium = default_premium_node_costs();
        let policy = |multiplier_hundredths, free_executions_per_day, starting_credits| TierPolicy {
            multiplier_hundredths,
            free_executions_per_day,
            starting_credits,
            premium_node_costs: premium.clone(),
        };
        Self {
            policies: [
                policy(200, 5, 100),     // free
                policy(150, 25, 500),    // maker
                policy(100, 100, 2000),  // pro
                policy(50, 500, 10_000), // agency
                policy(0, u32::MAX, 0),  // admin
            ],
        }
    }

    pub fn with_overrides(
        overrides: &BTreeMap<String, TierPolicyOverride>,
    ) -> Result<Self, LedgerError> {
        let mut table = Self::builtin();
        for (name, override_) in overrides {
            let tier = Tier::from_str(name)?;
            let policy = &mut table.policies[tier as usize];
            if let Some(multiplier) = override_.multiplier {
                policy.multiplier_hundredths = multiplier_to_hundredths(tier, multiplier)?;
            }
            if let Some(free_executions_per_day) = override_.free_executions_per_day {
                policy.free_executions_per_day = free_executions_per_day;
            }
            if let Some(starting_credits) = override_.starting_credits {
                policy.starting_credits = starting_credits.max(0);
            }
            if let Some(premium_node_costs) = override_.premium_node_costs.as_ref() {
                policy.premium_node_costs = premium_node_costs.clone();
            }
        }
        Ok(table)
    }

    pub fn policy_for(&self, tier: Tier) -> &TierPolicy {
        &self.policies[tier as usize]
    }
}

impl Default for TierPolicyTable {
    fn default() -> Self {
        Self::builtin()
    }
}

fn default_premium_node_costs() -> BTreeMap<String, u32> {
    let mut costs = BTreeMap::new();
    costs.insert("ai_text".to_string(), 2);
    costs.insert("ai_image".to_string(), 5);
    costs.insert("ai_audio".to_string(), 4);
    costs.insert("external_api".to_string(), 1);
    costs
}

fn multiplier_to_hundredths(tier: Tier, multiplier: f64) -> Result<u32, LedgerError> {
    if !multiplier.is_finite() || multiplier < 0.0 {
        return Err(LedgerError::InvalidMultiplier {
            tier: tier.to_string(),
        });
    }
    let hundredths = (multiplier * 100.0).round();
    if hundredths > f64::from(u32::MAX) {
        return Err(LedgerError::InvalidMultiplier {
            tier: tier.to_string(),
        });
    }
    Ok(hundredths as u32)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builtin_multipliers_match_pricing_sheet() {
        let table = TierPolicyTable::builtin();
        let expect = [
            (Tier::Free, 200),
            (Tier::Maker, 150),
            (Tier::Pro, 100),
            (Tier::Agency, 50),
            (Tier::Admin, 0),
        ];
        for (tier, hundredths) in expect {
            let policy = table.policy_for(tier);
            assert_eq!(policy.multiplier_hundredths, hundredths, "{tier}");
        }
    }

    #[test]
    fn policy_lookup_is_total_over_the_tier_enum() {
        let table = TierPolicyTable::default();
        for tier in Tier::ALL {
            assert!(table.policy_for(tier).free_executions_per_day > 0, "{tier}");
        }
    }

    #[test]
    fn unknown_tier_name_fails_loud() {
        let err = Tier::from_str("platinum").expect_err("must fail");
        assert!(matches!(err, LedgerError::UnknownTier { tier } if tier == "platinum"));
    }

    #[test]
    fn override_replaces_fields_and_keeps_the_rest() {
        let mut overrides = BTreeMap::new();
        overrides.insert(
            "free".to_string(),
            TierPolicyOverride {
                multiplier: Some(3.0),
                starting_credits: Some(50),
                ..TierPolicyOverride::default()
            },
        );
        let table = TierPolicyTable::with_overrides(&overrides).expect("table");
        let free = table.policy_for(Tier::Free);
        assert_eq!(free.multiplier_hundredths, 300);
        assert_eq!(free.starting_credits, 50);
        assert_eq!(free.free_executions_per_day, 5);
        let maker = table.policy_for(Tier::Maker);
        assert_eq!(maker.multiplier_hundredths, 150);
    }

    #[test]
    fn override_rejects_bad_multiplier() {
        for bad in [f64::NAN, f64::INFINITY, -1.0] {
            let mut overrides = BTreeMap::new();
            overrides.insert(
                "pro".to_string(),
                TierPolicyOverride {
                    multiplier: Some(bad),
                    ..TierPolicyOverride::default()
                },
            );
            let err = TierPolicyTable::with_overrides(&overrides).expect_err("must fail");
            assert!(matches!(err, LedgerError::InvalidMultiplier { .. }));
        }
    }

    #[test]
    fn premium_node_lookup_fails_for_unknown_type() {
        let table = TierPolicyTable::builtin();
        let policy = table.policy_for(Tier::Free);
        assert_eq!(policy.premium_node_cost("ai_image").expect("cost"), 5);
        let err = policy.premium_node_cost("quantum_rig").expect_err("must fail");
        assert!(matches!(err, LedgerError::UnknownPremiumNode { node_type } if node_type == "quantum_rig"));
    }
}
