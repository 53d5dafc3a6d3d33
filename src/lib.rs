pub mod ledger;

pub use ledger::analytics::{DailyUsage, KindTotal, UnifiedOverview, UsagePeriod, UsageSummary};
pub use ledger::config::{AccountSeed, ConfigError, LedgerConfig};
pub use ledger::estimator::{
    CostEstimate, EstimateInput, MAX_CREDITS_PER_EXECUTION, PremiumNodeUse, estimate,
};
pub use ledger::http::{LedgerHttpState, router};
pub use ledger::sqlite_store::SqliteStore;
pub use ledger::tier::{Tier, TierPolicy, TierPolicyTable};
pub use ledger::transaction::{
    AccountRecord, DeductOutcome, LedgerTransactionRecord, TransactionKind,
};
pub use ledger::{
    AddRequest, AdjustRequest, Clock, CreditLedger, DeductRequest, HistoryFilter, LedgerError,
    Result, SystemClock,
};
