//! Read-only rollups over the transaction log. The store returns sparse
//! SQL aggregates; this module turns them into gap-free, wire-shaped
//! summaries.

use chrono::{DateTime, Days, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use super::transaction::{BalanceView, TransactionKind};

pub const DEFAULT_USAGE_WINDOW_DAYS: u32 = 30;
pub const MAX_USAGE_WINDOW_DAYS: u32 = 365;
pub const UNIFIED_WINDOW_DAYS: u32 = 30;

/// Inclusive range of UTC calendar days ending on the day containing
/// `now_ms`. Day boundaries are UTC midnight; `usedToday` and the daily
/// buckets both key off this.
#[derive(Clone, Copy, Debug)]
pub struct UsageWindow {
    days: u32,
    start_day: NaiveDate,
    end_day: NaiveDate,
}

impl UsageWindow {
    pub fn ending_now(days: u32, now_ms: i64) -> Self {
        let days = days.clamp(1, MAX_USAGE_WINDOW_DAYS);
        let end_day = utc_date(now_ms);
        let start_day = end_day
            .checked_sub_days(Days::new(u64::from(days - 1)))
            .unwrap_or(end_day);
        Self {
            days,
            start_day,
            end_day,
        }
    }

    pub fn days(&self) -> u32 {
        self.days
    }

    pub fn start_day(&self) -> NaiveDate {
        self.start_day
    }

    pub fn end_day(&self) -> NaiveDate {
        self.end_day
    }

    /// Epoch millis of the window's first instant (start day, UTC midnight).
    pub fn start_ms(&self) -> i64 {
        day_start_ms(self.start_day)
    }
}

pub fn utc_date(now_ms: i64) -> NaiveDate {
    DateTime::<Utc>::from_timestamp_millis(now_ms)
        .unwrap_or_default()
        .date_naive()
}

/// UTC midnight of the day containing `now_ms`, as epoch millis.
pub fn utc_day_start_ms(now_ms: i64) -> i64 {
    day_start_ms(utc_date(now_ms))
}

fn day_start_ms(day: NaiveDate) -> i64 {
    day.and_time(NaiveTime::MIN).and_utc().timestamp_millis()
}

/// Sparse per-day aggregate as produced by the store; `day` is the SQLite
/// `date()` string (`YYYY-MM-DD`, UTC).
#[derive(Clone, Debug)]
pub struct DailyRollupRow {
    pub day: String,
    pub credits_used: i64,
    pub credits_added: i64,
}

#[derive(Clone, Debug)]
pub struct KindRollupRow {
    pub kind: TransactionKind,
    pub total: i64,
    pub count: u64,
}

#[derive(Clone, Debug)]
pub struct UsageRollup {
    pub total_used: i64,
    pub total_added: i64,
    pub transaction_count: u64,
    pub daily: Vec<DailyRollupRow>,
    pub by_kind: Vec<KindRollupRow>,
}

#[derive(Clone, Debug)]
pub struct ReferenceRollup {
    pub reference_type: String,
    pub count: u64,
    pub credits_spent: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsagePeriod {
    pub days: u32,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageTotals {
    pub total_used: i64,
    pub total_added: i64,
    pub net_change: i64,
    pub transaction_count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub credits_used: i64,
    pub credits_added: i64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct KindTotal {
    #[serde(rename = "type")]
    pub kind: TransactionKind,
    pub total: i64,
    pub count: u64,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageSummary {
    pub period: UsagePeriod,
    pub summary: UsageTotals,
    pub daily: Vec<DailyUsage>,
    pub by_type: Vec<KindTotal>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferenceStats {
    pub count: u64,
    pub credits_spent: i64,
}

/// Cross-product view: current balance next to what AI generations and
/// workflow executions spent over the unified window.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnifiedOverview {
    pub credits: BalanceView,
    pub ai: ReferenceStats,
    pub workflow: ReferenceStats,
    pub window_days: u32,
}

pub const AI_REFERENCE_TYPE: &str = "ai_generation";
pub const WORKFLOW_REFERENCE_TYPE: &str = "workflow_execution";

/// Expands the sparse rollup into one bucket per calendar day in the window.
/// Days with no transactions appear with zero totals.
pub fn build_usage_summary(window: &UsageWindow, rollup: UsageRollup) -> UsageSummary {
    let by_day: std::collections::BTreeMap<&str, (i64, i64)> = rollup
        .daily
        .iter()
        .map(|row| (row.day.as_str(), (row.credits_used, row.credits_added)))
        .collect();

    let mut daily = Vec::with_capacity(window.days() as usize);
    for day in window.start_day().iter_days().take(window.days() as usize) {
        let key = day.format("%Y-%m-%d").to_string();
        let (credits_used, credits_added) = by_day.get(key.as_str()).copied().unwrap_or((0, 0));
        daily.push(DailyUsage {
            date: day,
            credits_used,
            credits_added,
        });
    }

    let by_type = rollup
        .by_kind
        .into_iter()
        .map(|row| KindTotal {
            kind: row.kind,
            total: row.total,
            count: row.count,
        })
        .collect();

    UsageSummary {
        period: UsagePeriod {
            days: window.days(),
            start_date: window.start_day(),
            end_date: window.end_day(),
        },
        summary: UsageTotals {
            total_used: rollup.total_used,
            total_added: rollup.total_added,
            net_change: rollup.total_added.saturating_sub(rollup.total_used),
            transaction_count: rollup.transaction_count,
        },
        daily,
        by_type,
    }
}

pub fn build_unified_overview(
    credits: BalanceView,
    by_reference: &[ReferenceRollup],
) -> UnifiedOverview {
    let stats_for = |reference_type: &str| {
        by_reference
            .iter()
            .find(|row| row.reference_type == reference_type)
            .map(|row| ReferenceStats {
                count: row.count,
                credits_spent: row.credits_spent,
            })
            .unwrap_or(ReferenceStats {
                count: 0,
                credits_spent: 0,
            })
    };
    UnifiedOverview {
        credits,
        ai: stats_for(AI_REFERENCE_TYPE),
        workflow: stats_for(WORKFLOW_REFERENCE_TYPE),
        window_days: UNIFIED_WINDOW_DAYS,
    }
}
