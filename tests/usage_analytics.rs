use std::sync::Arc;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::NaiveDate;
use synthstack_credits::{
    AccountSeed, AddRequest, Clock, CreditLedger, DeductRequest, SqliteStore, Tier,
    TierPolicyTable, TransactionKind,
};

const MS_PER_HOUR: i64 = 3_600_000;
const MS_PER_DAY: i64 = 24 * MS_PER_HOUR;

/// Clock that only moves when a test pushes it.
struct StoppedClock {
    now_ms: AtomicI64,
}

impl StoppedClock {
    fn starting_at(date: NaiveDate, hour: u32) -> Arc<Self> {
        let now_ms = date
            .and_hms_opt(hour, 0, 0)
            .unwrap()
            .and_utc()
            .timestamp_millis();
        Arc::new(Self {
            now_ms: AtomicI64::new(now_ms),
        })
    }

    fn advance(&self, delta_ms: i64) {
        self.now_ms.fetch_add(delta_ms, Ordering::SeqCst);
    }
}

impl Clock for StoppedClock {
    fn now_epoch_millis(&self) -> i64 {
        self.now_ms.load(Ordering::SeqCst)
    }
}

fn day(year: i32, month: u32, dom: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(year, month, dom).unwrap()
}

async fn ledger_at(dir: &tempfile::TempDir, clock: Arc<StoppedClock>) -> CreditLedger {
    let store = SqliteStore::new(dir.path().join("credits.sqlite"));
    store.init().await.unwrap();
    let ledger = CreditLedger::with_clock(store, TierPolicyTable::builtin(), clock);
    ledger
        .seed_accounts(&[AccountSeed {
            id: "acct-1".to_string(),
            token: "ck-1".to_string(),
            tier: Tier::Free,
            starting_credits: None,
        }])
        .await
        .unwrap();
    ledger
}

fn spend(amount: i64, reference_type: &str) -> DeductRequest {
    DeductRequest {
        account_id: "acct-1".to_string(),
        amount,
        kind: TransactionKind::Generation,
        reason: "workflow execution".to_string(),
        reference_type: Some(reference_type.to_string()),
        reference_id: Some("exec-1".to_string()),
    }
}

fn grant(amount: i64) -> AddRequest {
    AddRequest {
        account_id: "acct-1".to_string(),
        amount,
        kind: TransactionKind::Purchase,
        reason: "credit pack".to_string(),
        reference_id: None,
    }
}

#[tokio::test]
async fn used_today_resets_at_utc_midnight() {
    let dir = tempfile::tempdir().unwrap();
    let clock = StoppedClock::starting_at(day(2026, 3, 9), 23);
    let ledger = ledger_at(&dir, Arc::clone(&clock)).await;

    ledger.deduct(spend(2, "workflow_execution")).await.unwrap();
    ledger.deduct(spend(3, "workflow_execution")).await.unwrap();
    ledger.add(grant(10)).await.unwrap();

    let balance = ledger.balance("acct-1").await.unwrap();
    assert_eq!(balance.used_today, 2, "grants do not count toward the daily tally");

    // Two hours later it is the next UTC day.
    clock.advance(2 * MS_PER_HOUR);
    let balance = ledger.balance("acct-1").await.unwrap();
    assert_eq!(balance.used_today, 0);
    assert_eq!(balance.remaining, 105);
}

#[tokio::test]
async fn summary_buckets_each_calendar_day_in_order() {
    let dir = tempfile::tempdir().unwrap();
    let clock = StoppedClock::starting_at(day(2026, 3, 8), 10);
    let ledger = ledger_at(&dir, Arc::clone(&clock)).await;

    ledger.deduct(spend(5, "workflow_execution")).await.unwrap();
    clock.advance(MS_PER_DAY);
    ledger.deduct(spend(3, "workflow_execution")).await.unwrap();
    ledger.add(grant(10)).await.unwrap();
    clock.advance(MS_PER_DAY);

    let summary = ledger.usage_summary("acct-1", 3).await.unwrap();
    assert_eq!(summary.period.days, 3);
    assert_eq!(summary.period.start_date, day(2026, 3, 8));
    assert_eq!(summary.period.end_date, day(2026, 3, 10));

    let wire = serde_json::to_value(&summary).unwrap();
    assert_eq!(wire["period"]["startDate"], "2026-03-08");
    assert_eq!(wire["period"]["endDate"], "2026-03-10");

    assert_eq!(summary.summary.total_used, 8);
    assert_eq!(summary.summary.total_added, 10);
    assert_eq!(summary.summary.net_change, 2);
    assert_eq!(summary.summary.transaction_count, 3);

    assert_eq!(summary.daily.len(), 3);
    assert_eq!(summary.daily[0].date, day(2026, 3, 8));
    assert_eq!(summary.daily[0].credits_used, 5);
    assert_eq!(summary.daily[0].credits_added, 0);
    assert_eq!(summary.daily[1].date, day(2026, 3, 9));
    assert_eq!(summary.daily[1].credits_used, 3);
    assert_eq!(summary.daily[1].credits_added, 10);
    assert_eq!(summary.daily[2].date, day(2026, 3, 10));
    assert_eq!(summary.daily[2].credits_used, 0);

    let generation = summary
        .by_type
        .iter()
        .find(|entry| entry.kind == TransactionKind::Generation)
        .unwrap();
    assert_eq!(generation.total, 8);
    assert_eq!(generation.count, 2);
    let purchase = summary
        .by_type
        .iter()
        .find(|entry| entry.kind == TransactionKind::Purchase)
        .unwrap();
    assert_eq!(purchase.total, 10);
    assert_eq!(purchase.count, 1);
}

#[tokio::test]
async fn rows_older_than_the_window_fall_out() {
    let dir = tempfile::tempdir().unwrap();
    let clock = StoppedClock::starting_at(day(2026, 3, 1), 10);
    let ledger = ledger_at(&dir, Arc::clone(&clock)).await;

    ledger.deduct(spend(5, "workflow_execution")).await.unwrap();
    clock.advance(10 * MS_PER_DAY);

    let summary = ledger.usage_summary("acct-1", 3).await.unwrap();
    assert_eq!(summary.summary.total_used, 0);
    assert_eq!(summary.summary.transaction_count, 0);
    assert_eq!(summary.daily.len(), 3);
    assert!(summary.daily.iter().all(|bucket| bucket.credits_used == 0));
    assert!(summary.by_type.is_empty());
}

#[tokio::test]
async fn unified_overview_honors_the_thirty_day_window() {
    let dir = tempfile::tempdir().unwrap();
    let clock = StoppedClock::starting_at(day(2026, 1, 5), 10);
    let ledger = ledger_at(&dir, Arc::clone(&clock)).await;

    ledger.deduct(spend(4, "workflow_execution")).await.unwrap();
    clock.advance(40 * MS_PER_DAY);
    ledger.deduct(spend(3, "ai_generation")).await.unwrap();

    let overview = ledger.unified_overview("acct-1").await.unwrap();
    assert_eq!(overview.window_days, 30);
    assert_eq!(overview.credits.remaining, 93);
    assert_eq!(overview.ai.count, 1);
    assert_eq!(overview.ai.credits_spent, 3);
    assert_eq!(overview.workflow.count, 0, "forty-day-old spend is outside the window");
    assert_eq!(overview.workflow.credits_spent, 0);
}
