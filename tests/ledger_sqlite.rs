use std::path::Path;

use synthstack_credits::{
    AccountSeed, AdjustRequest, CreditLedger, DeductRequest, HistoryFilter, LedgerError,
    SqliteStore, Tier, TierPolicyTable, TransactionKind,
};

fn seed(id: &str, token: &str, tier: Tier, starting: Option<i64>) -> AccountSeed {
    AccountSeed {
        id: id.to_string(),
        token: token.to_string(),
        tier,
        starting_credits: starting,
    }
}

async fn open_ledger(path: &Path) -> CreditLedger {
    let store = SqliteStore::new(path);
    store.init().await.unwrap();
    CreditLedger::new(store, TierPolicyTable::builtin())
}

fn spend(account_id: &str, amount: i64) -> DeductRequest {
    DeductRequest {
        account_id: account_id.to_string(),
        amount,
        kind: TransactionKind::Generation,
        reason: "workflow execution".to_string(),
        reference_type: Some("workflow_execution".to_string()),
        reference_id: Some("exec-1".to_string()),
    }
}

#[tokio::test]
async fn balances_and_history_survive_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credits.sqlite");

    {
        let ledger = open_ledger(&path).await;
        ledger
            .seed_accounts(&[seed("acct-1", "ck-1", Tier::Free, None)])
            .await
            .unwrap();
        ledger.deduct(spend("acct-1", 30)).await.unwrap();
    }

    let reopened = open_ledger(&path).await;
    let balance = reopened.balance("acct-1").await.unwrap();
    assert_eq!(balance.remaining, 70);

    let account = reopened.account("acct-1").await.unwrap();
    assert_eq!(account.initial_grant, 100);
    assert_eq!(account.tier, Tier::Free);

    let filter = HistoryFilter {
        limit: 10,
        ..HistoryFilter::default()
    };
    let (transactions, total) = reopened.history("acct-1", filter).await.unwrap();
    assert_eq!(total, 1);
    assert!(transactions[0].is_deduction());
    assert_eq!(transactions[0].amount, -30);
    assert_eq!(transactions[0].balance_after, 70);
}

#[tokio::test]
async fn reseeding_never_touches_an_existing_account() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credits.sqlite");
    let seeds = [
        seed("acct-1", "ck-1", Tier::Free, Some(40)),
        seed("acct-2", "ck-2", Tier::Pro, None),
    ];

    {
        let ledger = open_ledger(&path).await;
        let inserted = ledger.seed_accounts(&seeds).await.unwrap();
        assert_eq!(inserted, 2);
        ledger.deduct(spend("acct-1", 15)).await.unwrap();
    }

    // A restart replays the same seed list; balances already on disk win.
    let reopened = open_ledger(&path).await;
    let inserted = reopened.seed_accounts(&seeds).await.unwrap();
    assert_eq!(inserted, 0);
    let balance = reopened.balance("acct-1").await.unwrap();
    assert_eq!(balance.remaining, 25);
}

#[tokio::test]
async fn provisioning_reports_whether_the_account_is_new() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir.path().join("credits.sqlite")).await;

    let template = seed("acct-1", "ck-1", Tier::Maker, None);
    let (record, created) = ledger.provision_account(&template).await.unwrap();
    assert!(created);
    assert_eq!(record.credits_remaining, 500);
    assert_eq!(record.initial_grant, 500);

    let (record, created) = ledger.provision_account(&template).await.unwrap();
    assert!(!created);
    assert_eq!(record.credits_remaining, 500);
}

#[tokio::test]
async fn adjust_folds_notes_and_refuses_overdraw() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = open_ledger(&dir.path().join("credits.sqlite")).await;
    ledger
        .seed_accounts(&[seed("acct-1", "ck-1", Tier::Free, Some(10))])
        .await
        .unwrap();

    let outcome = ledger
        .adjust(AdjustRequest {
            account_id: "acct-1".to_string(),
            amount: -4,
            reason: "support correction".to_string(),
            notes: Some("ticket 4411".to_string()),
        })
        .await
        .unwrap();
    assert_eq!(outcome.adjustment, -4);
    assert_eq!(outcome.new_balance, 6);

    let filter = HistoryFilter {
        limit: 10,
        ..HistoryFilter::default()
    };
    let (transactions, _) = ledger.history("acct-1", filter).await.unwrap();
    assert_eq!(transactions[0].kind, TransactionKind::AdminAdjustment);
    assert_eq!(transactions[0].reason, "support correction (ticket 4411)");

    let err = ledger
        .adjust(AdjustRequest {
            account_id: "acct-1".to_string(),
            amount: -7,
            reason: "support correction".to_string(),
            notes: None,
        })
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientCredits {
            required: 7,
            remaining: 6
        }
    ));
    let balance = ledger.balance("acct-1").await.unwrap();
    assert_eq!(balance.remaining, 6, "a refused adjustment must not mutate");
}

#[tokio::test]
async fn archive_flag_survives_a_reopen() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("credits.sqlite");

    {
        let ledger = open_ledger(&path).await;
        ledger
            .seed_accounts(&[seed("acct-1", "ck-1", Tier::Free, None)])
            .await
            .unwrap();
        ledger.archive_account("acct-1").await.unwrap();
    }

    let reopened = open_ledger(&path).await;
    let err = reopened.deduct(spend("acct-1", 1)).await.unwrap_err();
    assert!(matches!(err, LedgerError::AccountArchived { .. }));

    // Reads still work on archived accounts.
    let balance = reopened.balance("acct-1").await.unwrap();
    assert_eq!(balance.remaining, 100);
}
