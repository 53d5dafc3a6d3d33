use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::LedgerError;
use super::tier::Tier;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionKind {
    Generation,
    Purchase,
    Bonus,
    AdminAdjustment,
    Refund,
}

impl TransactionKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionKind::Generation => "generation",
            TransactionKind::Purchase => "purchase",
            TransactionKind::Bonus => "bonus",
            TransactionKind::AdminAdjustment => "admin_adjustment",
            TransactionKind::Refund => "refund",
        }
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionKind {
    type Err = LedgerError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw {
            "generation" => Ok(TransactionKind::Generation),
            "purchase" => Ok(TransactionKind::Purchase),
            "bonus" => Ok(TransactionKind::Bonus),
            "admin_adjustment" => Ok(TransactionKind::AdminAdjustment),
            "refund" => Ok(TransactionKind::Refund),
            _ => Err(LedgerError::UnknownTransactionKind {
                kind: raw.to_string(),
            }),
        }
    }
}

/// One append-only ledger row. Negative amounts are deductions, positive
/// amounts are credits; `balance_after` snapshots the balance the mutation
/// left behind.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LedgerTransactionRecord {
    pub id: i64,
    pub account_id: String,
    pub amount: i64,
    pub kind: TransactionKind,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
    pub reason: String,
    pub balance_after: i64,
    pub created_at_ms: i64,
}

impl LedgerTransactionRecord {
    pub fn is_deduction(&self) -> bool {
        self.amount < 0
    }

    pub fn is_credit(&self) -> bool {
        self.amount > 0
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct AccountRecord {
    pub account_id: String,
    pub api_token: String,
    pub tier: Tier,
    pub credits_remaining: i64,
    pub initial_grant: i64,
    pub archived: bool,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

impl fmt::Debug for AccountRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountRecord")
            .field("account_id", &self.account_id)
            .field("api_token", &"<redacted>")
            .field("tier", &self.tier)
            .field("credits_remaining", &self.credits_remaining)
            .field("initial_grant", &self.initial_grant)
            .field("archived", &self.archived)
            .field("created_at_ms", &self.created_at_ms)
            .field("updated_at_ms", &self.updated_at_ms)
            .finish()
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub remaining: i64,
    pub tier: Tier,
    pub daily_limit: u32,
    pub used_today: u32,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CheckOutcome {
    pub available: bool,
    pub remaining: i64,
    pub required: i64,
    pub deficit: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeductOutcome {
    pub deducted: i64,
    pub remaining: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AddOutcome {
    pub added: i64,
    pub new_balance: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdjustOutcome {
    pub adjustment: i64,
    pub new_balance: i64,
}
