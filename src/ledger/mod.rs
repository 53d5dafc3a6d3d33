//! Credit ledger core: balances, tier policy, cost estimation, the
//! append-only transaction log and the rollups derived from it.

pub mod analytics;
pub mod config;
pub mod estimator;
pub mod http;
pub mod sqlite_store;
pub mod tier;
pub mod transaction;

use std::sync::Arc;

use thiserror::Error;

use analytics::{UnifiedOverview, UsageSummary};
use config::AccountSeed;
use estimator::{CostEstimate, EstimateInput};
use sqlite_store::{ReconcileDrift, SqliteStore};
use tier::{Tier, TierPolicyTable};
use transaction::{
    AccountRecord, AddOutcome, AdjustOutcome, BalanceView, CheckOutcome, DeductOutcome,
    LedgerTransactionRecord, TransactionKind,
};

pub use estimator::MAX_CREDITS_PER_EXECUTION;

pub type Result<T, E = LedgerError> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("amount must be a positive integer")]
    InvalidAmount,
    #[error("account not found: {account_id}")]
    AccountNotFound { account_id: String },
    #[error("account archived: {account_id}")]
    AccountArchived { account_id: String },
    #[error("api token already in use by account {account_id}")]
    TokenInUse { account_id: String },
    #[error("insufficient credits: required={required} remaining={remaining}")]
    InsufficientCredits { required: i64, remaining: i64 },
    #[error("admin capability required")]
    Forbidden,
    #[error("unknown tier: {tier}")]
    UnknownTier { tier: String },
    #[error("invalid multiplier for tier {tier}: must be a finite non-negative number")]
    InvalidMultiplier { tier: String },
    #[error("unknown premium node type: {node_type}")]
    UnknownPremiumNode { node_type: String },
    #[error("unknown transaction kind: {kind}")]
    UnknownTransactionKind { kind: String },
    #[error("ledger contention after {attempts} attempts")]
    LedgerContention { attempts: u32 },
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
    #[error("storage join error: {0}")]
    StorageJoin(#[from] tokio::task::JoinError),
}

impl LedgerError {
    pub fn deficit(&self) -> Option<i64> {
        match self {
            LedgerError::InsufficientCredits {
                required,
                remaining,
            } => Some(required.saturating_sub(*remaining).max(0)),
            _ => None,
        }
    }
}

pub trait Clock: Send + Sync {
    fn now_epoch_millis(&self) -> i64;
}

#[derive(Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_epoch_millis(&self) -> i64 {
        let now = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_else(|_| std::time::Duration::from_secs(0));
        now.as_millis() as i64
    }
}

#[derive(Clone, Debug)]
pub struct DeductRequest {
    pub account_id: String,
    pub amount: i64,
    pub kind: TransactionKind,
    pub reason: String,
    pub reference_type: Option<String>,
    pub reference_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AddRequest {
    pub account_id: String,
    pub amount: i64,
    pub kind: TransactionKind,
    pub reason: String,
    pub reference_id: Option<String>,
}

#[derive(Clone, Debug)]
pub struct AdjustRequest {
    pub account_id: String,
    pub amount: i64,
    pub reason: String,
    pub notes: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct HistoryFilter {
    pub limit: usize,
    pub offset: usize,
    pub kind: Option<TransactionKind>,
}

/// Service facade over the balance store, tier policy table and transaction
/// log. Cloneable; all shared state lives in SQLite, so concurrent callers
/// coordinate through the store's transactions rather than a process lock.
#[derive(Clone)]
pub struct CreditLedger {
    store: SqliteStore,
    policies: Arc<TierPolicyTable>,
    clock: Arc<dyn Clock>,
}

impl CreditLedger {
    pub fn new(store: SqliteStore, policies: TierPolicyTable) -> Self {
        Self::with_clock(store, policies, Arc::new(SystemClock))
    }

    pub fn with_clock(
        store: SqliteStore,
        policies: TierPolicyTable,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            policies: Arc::new(policies),
            clock,
        }
    }

    pub fn store(&self) -> &SqliteStore {
        &self.store
    }

    pub fn policies(&self) -> &TierPolicyTable {
        &self.policies
    }

    fn now_ms(&self) -> i64 {
        self.clock.now_epoch_millis()
    }

    pub async fn account_by_token(&self, api_token: &str) -> Result<Option<AccountRecord>> {
        self.store.find_account_by_token(api_token).await
    }

    pub async fn account(&self, account_id: &str) -> Result<AccountRecord> {
        self.store.get_account(account_id).await
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountRecord>> {
        self.store.list_accounts().await
    }

    pub async fn balance(&self, account_id: &str) -> Result<BalanceView> {
        let account = self.store.get_account(account_id).await?;
        let policy = self.policies.policy_for(account.tier);
        let now_ms = self.now_ms();
        let day_start_ms = analytics::utc_day_start_ms(now_ms);
        let used_today = self
            .store
            .count_deductions_since(account_id, TransactionKind::Generation, day_start_ms)
            .await?;
        Ok(BalanceView {
            remaining: account.credits_remaining,
            tier: account.tier,
            daily_limit: policy.free_executions_per_day,
            used_today: used_today.clamp(0, i64::from(u32::MAX)) as u32,
        })
    }

    pub async fn check_sufficient(&self, account_id: &str, amount: i64) -> Result<CheckOutcome> {
        if amount < 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let account = self.store.get_account(account_id).await?;
        let remaining = account.credits_remaining;
        Ok(CheckOutcome {
            available: remaining >= amount,
            remaining,
            required: amount,
            deficit: amount.saturating_sub(remaining).max(0),
        })
    }

    pub fn estimate_for(&self, tier: Tier, input: &EstimateInput) -> Result<CostEstimate> {
        estimator::estimate(input, self.policies.policy_for(tier))
    }

    pub async fn deduct(&self, request: DeductRequest) -> Result<DeductOutcome> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let now_ms = self.now_ms();
        let outcome = self.store.deduct(&request, now_ms).await?;
        tracing::debug!(
            account_id = %request.account_id,
            deducted = outcome.deducted,
            remaining = outcome.remaining,
            kind = %request.kind,
            "credits deducted"
        );
        Ok(outcome)
    }

    pub async fn add(&self, request: AddRequest) -> Result<AddOutcome> {
        if request.amount <= 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let now_ms = self.now_ms();
        let outcome = self.store.add(&request, now_ms).await?;
        tracing::debug!(
            account_id = %request.account_id,
            added = outcome.added,
            new_balance = outcome.new_balance,
            kind = %request.kind,
            "credits added"
        );
        Ok(outcome)
    }

    pub async fn adjust(&self, request: AdjustRequest) -> Result<AdjustOutcome> {
        if request.amount == 0 {
            return Err(LedgerError::InvalidAmount);
        }
        let now_ms = self.now_ms();
        let outcome = self.store.adjust(&request, now_ms).await?;
        tracing::info!(
            account_id = %request.account_id,
            adjustment = outcome.adjustment,
            new_balance = outcome.new_balance,
            "admin adjustment applied"
        );
        Ok(outcome)
    }

    pub async fn history(
        &self,
        account_id: &str,
        filter: HistoryFilter,
    ) -> Result<(Vec<LedgerTransactionRecord>, u64)> {
        self.store.list_transactions(account_id, &filter).await
    }

    /// Transaction log narrowed to one reference type, for surfaces that show
    /// a single product's spend (workflow executions, generation runs).
    pub async fn reference_history(
        &self,
        account_id: &str,
        reference_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<LedgerTransactionRecord>, u64)> {
        self.store
            .list_reference_transactions(account_id, reference_type, limit, offset)
            .await
    }

    pub async fn usage_summary(&self, account_id: &str, days: u32) -> Result<UsageSummary> {
        let now_ms = self.now_ms();
        let window = analytics::UsageWindow::ending_now(days, now_ms);
        let rollup = self
            .store
            .usage_rollup(account_id, window.start_ms())
            .await?;
        Ok(analytics::build_usage_summary(&window, rollup))
    }

    pub async fn unified_overview(&self, account_id: &str) -> Result<UnifiedOverview> {
        let credits = self.balance(account_id).await?;
        let now_ms = self.now_ms();
        let window = analytics::UsageWindow::ending_now(analytics::UNIFIED_WINDOW_DAYS, now_ms);
        let by_reference = self
            .store
            .reference_rollup(account_id, window.start_ms())
            .await?;
        Ok(analytics::build_unified_overview(credits, &by_reference))
    }

    pub async fn reconcile(&self) -> Result<(u64, Vec<ReconcileDrift>)> {
        self.store.reconcile().await
    }

    pub async fn provision_account(&self, seed: &AccountSeed) -> Result<(AccountRecord, bool)> {
        let policy = self.policies.policy_for(seed.tier);
        let starting_credits = seed.starting_credits.unwrap_or(policy.starting_credits);
        let now_ms = self.now_ms();
        let (account, inserted) = self
            .store
            .upsert_account(seed, starting_credits, now_ms)
            .await?;
        if inserted {
            tracing::info!(
                account_id = %account.account_id,
                tier = %account.tier,
                starting_credits,
                "account provisioned"
            );
        }
        Ok((account, inserted))
    }

    pub async fn seed_accounts(&self, seeds: &[AccountSeed]) -> Result<usize> {
        let mut inserted = 0;
        for seed in seeds {
            let (_, was_inserted) = self.provision_account(seed).await?;
            if was_inserted {
                inserted += 1;
            }
        }
        Ok(inserted)
    }

    pub async fn archive_account(&self, account_id: &str) -> Result<()> {
        self.store.set_archived(account_id, true).await?;
        tracing::info!(account_id = %account_id, "account archived");
        Ok(())
    }
}
