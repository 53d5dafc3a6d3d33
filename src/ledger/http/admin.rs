use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::ledger::config::AccountSeed;
use crate::ledger::sqlite_store::ReconcileDrift;
use crate::ledger::tier::Tier;
use crate::ledger::transaction::AccountRecord;

use super::{
    ensure_admin, error_response, format_timestamp, map_ledger_error, ErrorResponse,
    LedgerHttpState,
};

const MAX_ACCOUNT_LIST_LIMIT: usize = 500;

#[derive(Debug, Deserialize)]
pub(super) struct AccountListQuery {
    #[serde(default)]
    limit: Option<usize>,
    #[serde(default)]
    offset: usize,
    #[serde(default)]
    include_tokens: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct AccountView {
    account_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    token: Option<String>,
    tier: Tier,
    credits_remaining: i64,
    initial_grant: i64,
    archived: bool,
    created_at: String,
    updated_at: String,
}

impl AccountView {
    fn from_record(record: AccountRecord, include_token: bool) -> Self {
        Self {
            account_id: record.account_id,
            token: include_token.then_some(record.api_token),
            tier: record.tier,
            credits_remaining: record.credits_remaining,
            initial_grant: record.initial_grant,
            archived: record.archived,
            created_at: format_timestamp(record.created_at_ms),
            updated_at: format_timestamp(record.updated_at_ms),
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct AccountListResponse {
    accounts: Vec<AccountView>,
    total: u64,
}

pub(super) async fn list_accounts(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<AccountListQuery>,
) -> Result<Json<AccountListResponse>, (StatusCode, Json<ErrorResponse>)> {
    ensure_admin(&state, &headers).await?;
    let limit = query
        .limit
        .unwrap_or(MAX_ACCOUNT_LIST_LIMIT)
        .clamp(1, MAX_ACCOUNT_LIST_LIMIT);

    let accounts = state.ledger.list_accounts().await.map_err(map_ledger_error)?;
    let total = accounts.len() as u64;
    let page = accounts
        .into_iter()
        .skip(query.offset)
        .take(limit)
        .map(|record| AccountView::from_record(record, query.include_tokens))
        .collect();
    Ok(Json(AccountListResponse {
        accounts: page,
        total,
    }))
}

pub(super) async fn provision_account(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Json(seed): Json<AccountSeed>,
) -> Result<(StatusCode, Json<AccountView>), (StatusCode, Json<ErrorResponse>)> {
    ensure_admin(&state, &headers).await?;
    if seed.id.is_empty() || seed.token.is_empty() {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "account id and token are required",
        ));
    }
    if seed.starting_credits.is_some_and(|credits| credits < 0) {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_AMOUNT",
            "starting credits must be non-negative",
        ));
    }

    let (record, inserted) = state
        .ledger
        .provision_account(&seed)
        .await
        .map_err(map_ledger_error)?;
    let status = if inserted {
        StatusCode::CREATED
    } else {
        StatusCode::OK
    };
    Ok((status, Json(AccountView::from_record(record, true))))
}

pub(super) async fn archive_account(
    State(state): State<LedgerHttpState>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
) -> Result<StatusCode, (StatusCode, Json<ErrorResponse>)> {
    ensure_admin(&state, &headers).await?;
    state
        .ledger
        .archive_account(&account_id)
        .await
        .map_err(map_ledger_error)?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Serialize)]
pub(super) struct ReconcileResponse {
    scanned: u64,
    consistent: bool,
    drifts: Vec<ReconcileDrift>,
}

/// Full-ledger audit: every account's transaction log is summed and compared
/// against its live balance.
pub(super) async fn reconcile_ledger(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
) -> Result<Json<ReconcileResponse>, (StatusCode, Json<ErrorResponse>)> {
    ensure_admin(&state, &headers).await?;
    let (scanned, drifts) = state.ledger.reconcile().await.map_err(map_ledger_error)?;
    if !drifts.is_empty() {
        tracing::warn!(drifted = drifts.len(), scanned, "ledger reconciliation found drift");
    }
    Ok(Json(ReconcileResponse {
        scanned,
        consistent: drifts.is_empty(),
        drifts,
    }))
}
