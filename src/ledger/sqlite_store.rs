use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use rusqlite::{OptionalExtension, TransactionBehavior};
use serde::{Deserialize, Serialize};

use super::analytics::{DailyRollupRow, KindRollupRow, ReferenceRollup, UsageRollup};
use super::config::AccountSeed;
use super::tier::Tier;
use super::transaction::{
    AccountRecord, AddOutcome, AdjustOutcome, DeductOutcome, LedgerTransactionRecord,
    TransactionKind,
};
use super::{AddRequest, AdjustRequest, DeductRequest, HistoryFilter, LedgerError, Result};

/// Balance mutations run as immediate transactions and retry this many times
/// on a lock conflict before surfacing `LedgerContention`.
const WRITE_ATTEMPTS: u32 = 3;

#[derive(Clone, Debug)]
pub struct SqliteStore {
    path: PathBuf,
}

/// One account whose transaction log does not add up to
/// `credits_remaining - initial_grant`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReconcileDrift {
    pub account_id: String,
    pub credits_remaining: i64,
    pub initial_grant: i64,
    pub transaction_sum: i64,
    pub drift: i64,
}

impl SqliteStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn init(&self) -> Result<()> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            Ok(())
        })
        .await?
    }

    /// Inserts the account if it does not exist yet; existing rows are left
    /// untouched so balances survive re-seeding on restart. Returns the row
    /// and whether this call created it. A new account id with a token that
    /// another account already holds fails with `TokenInUse`.
    pub async fn upsert_account(
        &self,
        seed: &AccountSeed,
        starting_credits: i64,
        now_ms: i64,
    ) -> Result<(AccountRecord, bool)> {
        let path = self.path.clone();
        let seed = seed.clone();
        let starting_credits = starting_credits.max(0);
        tokio::task::spawn_blocking(move || -> Result<(AccountRecord, bool)> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let inserted = conn.execute(
                "INSERT OR IGNORE INTO accounts
                     (account_id, api_token, tier, credits_remaining, initial_grant, archived,
                      created_at_ms, updated_at_ms)
                 VALUES (?1, ?2, ?3, ?4, ?4, 0, ?5, ?5)",
                rusqlite::params![seed.id, seed.token, seed.tier.as_str(), starting_credits, now_ms],
            )? > 0;

            let Some(account) = select_account(&conn, &seed.id)? else {
                // The insert was ignored yet no row carries this id, so the
                // conflict came from the api_token unique index.
                return Err(match select_token_holder(&conn, &seed.token)? {
                    Some(account_id) => LedgerError::TokenInUse { account_id },
                    None => LedgerError::AccountNotFound { account_id: seed.id },
                });
            };
            Ok((account, inserted))
        })
        .await?
    }

    pub async fn get_account(&self, account_id: &str) -> Result<AccountRecord> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<AccountRecord> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;
            select_account(&conn, &account_id)?.ok_or(LedgerError::AccountNotFound { account_id })
        })
        .await?
    }

    pub async fn find_account_by_token(&self, api_token: &str) -> Result<Option<AccountRecord>> {
        let path = self.path.clone();
        let api_token = api_token.to_string();
        tokio::task::spawn_blocking(move || -> Result<Option<AccountRecord>> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let row: Option<AccountRow> = conn
                .query_row(
                    "SELECT account_id, api_token, tier, credits_remaining, initial_grant,
                            archived, created_at_ms, updated_at_ms
                     FROM accounts WHERE api_token=?1",
                    rusqlite::params![api_token],
                    read_account_row,
                )
                .optional()?;
            row.map(account_from_row).transpose()
        })
        .await?
    }

    pub async fn list_accounts(&self) -> Result<Vec<AccountRecord>> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<Vec<AccountRecord>> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let mut stmt = conn.prepare(
                "SELECT account_id, api_token, tier, credits_remaining, initial_grant,
                        archived, created_at_ms, updated_at_ms
                 FROM accounts ORDER BY account_id",
            )?;
            let rows = stmt.query_map([], read_account_row)?;

            let mut out = Vec::new();
            for row in rows {
                out.push(account_from_row(row?)?);
            }
            Ok(out)
        })
        .await?
    }

    pub async fn set_archived(&self, account_id: &str, archived: bool) -> Result<()> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let changed = conn.execute(
                "UPDATE accounts SET archived=?2 WHERE account_id=?1",
                rusqlite::params![account_id, archived as i64],
            )?;
            if changed == 0 {
                return Err(LedgerError::AccountNotFound { account_id });
            }
            Ok(())
        })
        .await?
    }

    /// Atomic check-and-decrement: the balance check, the balance write and
    /// the ledger append commit together or not at all. A failed check
    /// mutates nothing and appends nothing.
    pub async fn deduct(&self, request: &DeductRequest, now_ms: i64) -> Result<DeductOutcome> {
        let path = self.path.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || -> Result<DeductOutcome> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            with_write_retry(|| deduct_once(&mut conn, &request, now_ms))
        })
        .await?
    }

    pub async fn add(&self, request: &AddRequest, now_ms: i64) -> Result<AddOutcome> {
        let path = self.path.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || -> Result<AddOutcome> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            with_write_retry(|| add_once(&mut conn, &request, now_ms))
        })
        .await?
    }

    pub async fn adjust(&self, request: &AdjustRequest, now_ms: i64) -> Result<AdjustOutcome> {
        let path = self.path.clone();
        let request = request.clone();
        tokio::task::spawn_blocking(move || -> Result<AdjustOutcome> {
            let mut conn = open_connection(path)?;
            init_schema(&conn)?;
            with_write_retry(|| adjust_once(&mut conn, &request, now_ms))
        })
        .await?
    }

    pub async fn count_deductions_since(
        &self,
        account_id: &str,
        kind: TransactionKind,
        since_ms: i64,
    ) -> Result<i64> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<i64> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM ledger_transactions
                 WHERE account_id=?1 AND kind=?2 AND amount < 0 AND created_at_ms >= ?3",
                rusqlite::params![account_id, kind.as_str(), since_ms],
                |row| row.get(0),
            )?;
            Ok(count)
        })
        .await?
    }

    /// Newest-first page of the account's transaction log plus the total row
    /// count for the same filter.
    pub async fn list_transactions(
        &self,
        account_id: &str,
        filter: &HistoryFilter,
    ) -> Result<(Vec<LedgerTransactionRecord>, u64)> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        let limit = i64::try_from(filter.limit.max(1)).unwrap_or(i64::MAX);
        let offset = i64::try_from(filter.offset).unwrap_or(i64::MAX);
        let kind = filter.kind;
        tokio::task::spawn_blocking(move || -> Result<(Vec<LedgerTransactionRecord>, u64)> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let mut out = Vec::new();
            let total: i64;
            if let Some(kind) = kind {
                total = conn.query_row(
                    "SELECT COUNT(*) FROM ledger_transactions WHERE account_id=?1 AND kind=?2",
                    rusqlite::params![account_id, kind.as_str()],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare(
                    "SELECT id, account_id, amount, kind, reference_type, reference_id, reason,
                            balance_after, created_at_ms
                     FROM ledger_transactions
                     WHERE account_id=?1 AND kind=?2
                     ORDER BY id DESC
                     LIMIT ?3 OFFSET ?4",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![account_id, kind.as_str(), limit, offset],
                    read_transaction_row,
                )?;
                for row in rows {
                    out.push(transaction_from_row(row?)?);
                }
            } else {
                total = conn.query_row(
                    "SELECT COUNT(*) FROM ledger_transactions WHERE account_id=?1",
                    rusqlite::params![account_id],
                    |row| row.get(0),
                )?;
                let mut stmt = conn.prepare(
                    "SELECT id, account_id, amount, kind, reference_type, reference_id, reason,
                            balance_after, created_at_ms
                     FROM ledger_transactions
                     WHERE account_id=?1
                     ORDER BY id DESC
                     LIMIT ?2 OFFSET ?3",
                )?;
                let rows = stmt.query_map(
                    rusqlite::params![account_id, limit, offset],
                    read_transaction_row,
                )?;
                for row in rows {
                    out.push(transaction_from_row(row?)?);
                }
            }
            Ok((out, clamp_count(total)))
        })
        .await?
    }

    pub async fn list_reference_transactions(
        &self,
        account_id: &str,
        reference_type: &str,
        limit: usize,
        offset: usize,
    ) -> Result<(Vec<LedgerTransactionRecord>, u64)> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        let reference_type = reference_type.to_string();
        let limit = i64::try_from(limit.max(1)).unwrap_or(i64::MAX);
        let offset = i64::try_from(offset).unwrap_or(i64::MAX);
        tokio::task::spawn_blocking(move || -> Result<(Vec<LedgerTransactionRecord>, u64)> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let total: i64 = conn.query_row(
                "SELECT COUNT(*) FROM ledger_transactions
                 WHERE account_id=?1 AND reference_type=?2",
                rusqlite::params![account_id, reference_type],
                |row| row.get(0),
            )?;
            let mut stmt = conn.prepare(
                "SELECT id, account_id, amount, kind, reference_type, reference_id, reason,
                        balance_after, created_at_ms
                 FROM ledger_transactions
                 WHERE account_id=?1 AND reference_type=?2
                 ORDER BY id DESC
                 LIMIT ?3 OFFSET ?4",
            )?;
            let rows = stmt.query_map(
                rusqlite::params![account_id, reference_type, limit, offset],
                read_transaction_row,
            )?;

            let mut out = Vec::new();
            for row in rows {
                out.push(transaction_from_row(row?)?);
            }
            Ok((out, clamp_count(total)))
        })
        .await?
    }

    /// Window totals, per-day buckets and per-kind buckets in one pass. Daily
    /// buckets are keyed by UTC calendar date; gap filling happens in the
    /// analytics layer.
    pub async fn usage_rollup(&self, account_id: &str, start_ms: i64) -> Result<UsageRollup> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<UsageRollup> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let (total_used, total_added, transaction_count): (i64, i64, i64) = conn.query_row(
                "SELECT COALESCE(SUM(CASE WHEN amount < 0 THEN -amount ELSE 0 END), 0),
                        COALESCE(SUM(CASE WHEN amount > 0 THEN amount ELSE 0 END), 0),
                        COUNT(*)
                 FROM ledger_transactions
                 WHERE account_id=?1 AND created_at_ms >= ?2",
                rusqlite::params![account_id, start_ms],
                |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
            )?;

            let mut stmt = conn.prepare(
                "SELECT date(created_at_ms / 1000, 'unixepoch') AS day,
                        SUM(CASE WHEN amount < 0 THEN -amount ELSE 0 END),
                        SUM(CASE WHEN amount > 0 THEN amount ELSE 0 END)
                 FROM ledger_transactions
                 WHERE account_id=?1 AND created_at_ms >= ?2
                 GROUP BY day
                 ORDER BY day",
            )?;
            let rows = stmt.query_map(rusqlite::params![account_id, start_ms], |row| {
                Ok(DailyRollupRow {
                    day: row.get(0)?,
                    credits_used: row.get(1)?,
                    credits_added: row.get(2)?,
                })
            })?;
            let mut daily = Vec::new();
            for row in rows {
                daily.push(row?);
            }

            let mut stmt = conn.prepare(
                "SELECT kind, SUM(ABS(amount)), COUNT(*)
                 FROM ledger_transactions
                 WHERE account_id=?1 AND created_at_ms >= ?2
                 GROUP BY kind
                 ORDER BY kind",
            )?;
            let rows = stmt.query_map(rusqlite::params![account_id, start_ms], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;
            let mut by_kind = Vec::new();
            for row in rows {
                let (kind_raw, total, count) = row?;
                by_kind.push(KindRollupRow {
                    kind: TransactionKind::from_str(&kind_raw)?,
                    total,
                    count: clamp_count(count),
                });
            }

            Ok(UsageRollup {
                total_used,
                total_added,
                transaction_count: clamp_count(transaction_count),
                daily,
                by_kind,
            })
        })
        .await?
    }

    pub async fn reference_rollup(
        &self,
        account_id: &str,
        start_ms: i64,
    ) -> Result<Vec<ReferenceRollup>> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Vec<ReferenceRollup>> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let mut stmt = conn.prepare(
                "SELECT reference_type, COUNT(*),
                        SUM(CASE WHEN amount < 0 THEN -amount ELSE 0 END)
                 FROM ledger_transactions
                 WHERE account_id=?1 AND created_at_ms >= ?2 AND reference_type IS NOT NULL
                 GROUP BY reference_type
                 ORDER BY reference_type",
            )?;
            let rows = stmt.query_map(rusqlite::params![account_id, start_ms], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                ))
            })?;

            let mut out = Vec::new();
            for row in rows {
                let (reference_type, count, credits_spent) = row?;
                out.push(ReferenceRollup {
                    reference_type,
                    count: clamp_count(count),
                    credits_spent,
                });
            }
            Ok(out)
        })
        .await?
    }

    /// Scans every account against its transaction log. Returns the number of
    /// accounts scanned and the ones whose log does not reconcile.
    pub async fn reconcile(&self) -> Result<(u64, Vec<ReconcileDrift>)> {
        let path = self.path.clone();
        tokio::task::spawn_blocking(move || -> Result<(u64, Vec<ReconcileDrift>)> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let mut stmt = conn.prepare(
                "SELECT a.account_id, a.credits_remaining, a.initial_grant,
                        COALESCE(t.total, 0)
                 FROM accounts a
                 LEFT JOIN (SELECT account_id, SUM(amount) AS total
                            FROM ledger_transactions GROUP BY account_id) t
                   ON t.account_id = a.account_id
                 ORDER BY a.account_id",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            })?;

            let mut scanned = 0u64;
            let mut drifts = Vec::new();
            for row in rows {
                let (account_id, credits_remaining, initial_grant, transaction_sum) = row?;
                scanned += 1;
                let expected = credits_remaining.saturating_sub(initial_grant);
                if expected != transaction_sum {
                    drifts.push(ReconcileDrift {
                        account_id,
                        credits_remaining,
                        initial_grant,
                        transaction_sum,
                        drift: expected.saturating_sub(transaction_sum),
                    });
                }
            }
            Ok((scanned, drifts))
        })
        .await?
    }

    pub async fn count_transactions(&self, account_id: &str) -> Result<u64> {
        let path = self.path.clone();
        let account_id = account_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<u64> {
            let conn = open_connection(path)?;
            init_schema(&conn)?;

            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM ledger_transactions WHERE account_id=?1",
                rusqlite::params![account_id],
                |row| row.get(0),
            )?;
            Ok(clamp_count(count))
        })
        .await?
    }
}

fn deduct_once(
    conn: &mut rusqlite::Connection,
    request: &DeductRequest,
    now_ms: i64,
) -> Result<DeductOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (remaining, archived) = load_balance_for_update(&tx, &request.account_id)?;
    if archived {
        return Err(LedgerError::AccountArchived {
            account_id: request.account_id.clone(),
        });
    }
    if remaining < request.amount {
        return Err(LedgerError::InsufficientCredits {
            required: request.amount,
            remaining,
        });
    }

    let balance_after = remaining - request.amount;
    tx.execute(
        "UPDATE accounts SET credits_remaining=?2, updated_at_ms=?3 WHERE account_id=?1",
        rusqlite::params![request.account_id, balance_after, now_ms],
    )?;
    append_transaction(
        &tx,
        &request.account_id,
        -request.amount,
        request.kind,
        request.reference_type.as_deref(),
        request.reference_id.as_deref(),
        &request.reason,
        balance_after,
        now_ms,
    )?;

    tx.commit()?;
    Ok(DeductOutcome {
        deducted: request.amount,
        remaining: balance_after,
    })
}

fn add_once(
    conn: &mut rusqlite::Connection,
    request: &AddRequest,
    now_ms: i64,
) -> Result<AddOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (remaining, archived) = load_balance_for_update(&tx, &request.account_id)?;
    if archived {
        return Err(LedgerError::AccountArchived {
            account_id: request.account_id.clone(),
        });
    }

    let balance_after = remaining.saturating_add(request.amount);
    tx.execute(
        "UPDATE accounts SET credits_remaining=?2, updated_at_ms=?3 WHERE account_id=?1",
        rusqlite::params![request.account_id, balance_after, now_ms],
    )?;
    append_transaction(
        &tx,
        &request.account_id,
        request.amount,
        request.kind,
        None,
        request.reference_id.as_deref(),
        &request.reason,
        balance_after,
        now_ms,
    )?;

    tx.commit()?;
    Ok(AddOutcome {
        added: request.amount,
        new_balance: balance_after,
    })
}

fn adjust_once(
    conn: &mut rusqlite::Connection,
    request: &AdjustRequest,
    now_ms: i64,
) -> Result<AdjustOutcome> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let (remaining, archived) = load_balance_for_update(&tx, &request.account_id)?;
    if archived {
        return Err(LedgerError::AccountArchived {
            account_id: request.account_id.clone(),
        });
    }

    let balance_after = remaining.saturating_add(request.amount);
    if balance_after < 0 {
        return Err(LedgerError::InsufficientCredits {
            required: request.amount.saturating_abs(),
            remaining,
        });
    }

    let reason = match request.notes.as_deref() {
        Some(notes) if !notes.is_empty() => format!("{} ({notes})", request.reason),
        _ => request.reason.clone(),
    };
    tx.execute(
        "UPDATE accounts SET credits_remaining=?2, updated_at_ms=?3 WHERE account_id=?1",
        rusqlite::params![request.account_id, balance_after, now_ms],
    )?;
    append_transaction(
        &tx,
        &request.account_id,
        request.amount,
        TransactionKind::AdminAdjustment,
        None,
        None,
        &reason,
        balance_after,
        now_ms,
    )?;

    tx.commit()?;
    Ok(AdjustOutcome {
        adjustment: request.amount,
        new_balance: balance_after,
    })
}

fn load_balance_for_update(tx: &rusqlite::Transaction<'_>, account_id: &str) -> Result<(i64, bool)> {
    let row: Option<(i64, i64)> = tx
        .query_row(
            "SELECT credits_remaining, archived FROM accounts WHERE account_id=?1",
            rusqlite::params![account_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )
        .optional()?;
    let Some((remaining, archived)) = row else {
        return Err(LedgerError::AccountNotFound {
            account_id: account_id.to_string(),
        });
    };
    Ok((remaining, archived != 0))
}

#[allow(clippy::too_many_arguments)]
fn append_transaction(
    tx: &rusqlite::Transaction<'_>,
    account_id: &str,
    amount: i64,
    kind: TransactionKind,
    reference_type: Option<&str>,
    reference_id: Option<&str>,
    reason: &str,
    balance_after: i64,
    now_ms: i64,
) -> Result<()> {
    tx.execute(
        "INSERT INTO ledger_transactions
             (account_id, amount, kind, reference_type, reference_id, reason, balance_after,
              created_at_ms)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
        rusqlite::params![
            account_id,
            amount,
            kind.as_str(),
            reference_type,
            reference_id,
            reason,
            balance_after,
            now_ms
        ],
    )?;
    Ok(())
}

fn with_write_retry<T>(mut op: impl FnMut() -> Result<T>) -> Result<T> {
    let mut attempt = 0;
    loop {
        attempt += 1;
        match op() {
            Err(LedgerError::Storage(err)) if is_busy(&err) => {
                if attempt >= WRITE_ATTEMPTS {
                    return Err(LedgerError::LedgerContention { attempts: attempt });
                }
            }
            other => return other,
        }
    }
}

fn is_busy(err: &rusqlite::Error) -> bool {
    matches!(
        err,
        rusqlite::Error::SqliteFailure(code, _)
            if code.code == rusqlite::ErrorCode::DatabaseBusy
                || code.code == rusqlite::ErrorCode::DatabaseLocked
    )
}

type AccountRow = (String, String, String, i64, i64, i64, i64, i64);

fn read_account_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<AccountRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
    ))
}

fn account_from_row(row: AccountRow) -> Result<AccountRecord> {
    let (
        account_id,
        api_token,
        tier_raw,
        credits_remaining,
        initial_grant,
        archived,
        created_at_ms,
        updated_at_ms,
    ) = row;
    Ok(AccountRecord {
        account_id,
        api_token,
        tier: Tier::from_str(&tier_raw)?,
        credits_remaining,
        initial_grant,
        archived: archived != 0,
        created_at_ms,
        updated_at_ms,
    })
}

fn select_account(conn: &rusqlite::Connection, account_id: &str) -> Result<Option<AccountRecord>> {
    let row: Option<AccountRow> = conn
        .query_row(
            "SELECT account_id, api_token, tier, credits_remaining, initial_grant,
                    archived, created_at_ms, updated_at_ms
             FROM accounts WHERE account_id=?1",
            rusqlite::params![account_id],
            read_account_row,
        )
        .optional()?;
    row.map(account_from_row).transpose()
}

fn select_token_holder(conn: &rusqlite::Connection, api_token: &str) -> Result<Option<String>> {
    let holder = conn
        .query_row(
            "SELECT account_id FROM accounts WHERE api_token=?1",
            rusqlite::params![api_token],
            |row| row.get(0),
        )
        .optional()?;
    Ok(holder)
}

type TransactionRow = (
    i64,
    String,
    i64,
    String,
    Option<String>,
    Option<String>,
    String,
    i64,
    i64,
);

fn read_transaction_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransactionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
        row.get(7)?,
        row.get(8)?,
    ))
}

fn transaction_from_row(row: TransactionRow) -> Result<LedgerTransactionRecord> {
    let (
        id,
        account_id,
        amount,
        kind_raw,
        reference_type,
        reference_id,
        reason,
        balance_after,
        created_at_ms,
    ) = row;
    Ok(LedgerTransactionRecord {
        id,
        account_id,
        amount,
        kind: TransactionKind::from_str(&kind_raw)?,
        reference_type,
        reference_id,
        reason,
        balance_after,
        created_at_ms,
    })
}

fn clamp_count(value: i64) -> u64 {
    if value <= 0 { 0 } else { value as u64 }
}

fn init_schema(conn: &rusqlite::Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS accounts (
            account_id TEXT PRIMARY KEY NOT NULL,
            api_token TEXT NOT NULL,
            tier TEXT NOT NULL,
            credits_remaining INTEGER NOT NULL DEFAULT 0,
            initial_grant INTEGER NOT NULL DEFAULT 0,
            archived INTEGER NOT NULL DEFAULT 0,
            created_at_ms INTEGER NOT NULL,
            updated_at_ms INTEGER NOT NULL
        );
        CREATE UNIQUE INDEX IF NOT EXISTS idx_accounts_api_token
            ON accounts(api_token);

        CREATE TABLE IF NOT EXISTS ledger_transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            account_id TEXT NOT NULL,
            amount INTEGER NOT NULL,
            kind TEXT NOT NULL,
            reference_type TEXT,
            reference_id TEXT,
            reason TEXT NOT NULL,
            balance_after INTEGER NOT NULL,
            created_at_ms INTEGER NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_ledger_transactions_account_created
            ON ledger_transactions(account_id, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_ledger_transactions_account_kind
            ON ledger_transactions(account_id, kind, created_at_ms);
        CREATE INDEX IF NOT EXISTS idx_ledger_transactions_account_reference
            ON ledger_transactions(account_id, reference_type, created_at_ms);",
    )?;
    Ok(())
}

fn open_connection(path: PathBuf) -> Result<rusqlite::Connection, rusqlite::Error> {
    let conn = rusqlite::Connection::open(path)?;
    let _ = conn.busy_timeout(Duration::from_secs(5));
    let _ = conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;");
    Ok(conn)
}
