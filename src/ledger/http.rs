mod admin;

use std::collections::BTreeMap;
use std::str::FromStr;

use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};

use super::analytics::{UnifiedOverview, UsageSummary, WORKFLOW_REFERENCE_TYPE};
use super::estimator::{CostEstimate, EstimateInput, MAX_CREDITS_PER_EXECUTION};
use super::tier::Tier;
use super::transaction::{
    AccountRecord, AddOutcome, AdjustOutcome, BalanceView, CheckOutcome, DeductOutcome,
    LedgerTransactionRecord, TransactionKind,
};
use super::{AddRequest, AdjustRequest, CreditLedger, DeductRequest, HistoryFilter, LedgerError};

const DEFAULT_HISTORY_LIMIT: usize = 50;
const MAX_HISTORY_LIMIT: usize = 200;

#[derive(Clone)]
pub struct LedgerHttpState {
    ledger: CreditLedger,
    admin_tokens: Vec<String>,
    internal_tokens: Vec<String>,
}

impl LedgerHttpState {
    pub fn new(ledger: CreditLedger) -> Self {
        Self {
            ledger,
            admin_tokens: Vec::new(),
            internal_tokens: Vec::new(),
        }
    }

    pub fn with_admin_token(mut self, token: impl Into<String>) -> Self {
        self.admin_tokens.push(token.into());
        self
    }

    pub fn with_admin_tokens(mut self, tokens: impl IntoIterator<Item = String>) -> Self {
        self.admin_tokens.extend(tokens);
        self
    }

    pub fn with_internal_token(mut self, token: impl Into<String>) -> Self {
        self.internal_tokens.push(token.into());
        self
    }

    pub fn with_internal_tokens(mut self, tokens: impl IntoIterator<Item = String>) -> Self {
        self.internal_tokens.extend(tokens);
        self
    }

    pub fn ledger(&self) -> &CreditLedger {
        &self.ledger
    }
}

#[derive(Debug, Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    required: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    remaining: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    deficit: Option<i64>,
}

#[derive(Debug, Serialize)]
struct ErrorResponse {
    error: ErrorDetail,
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
}

pub fn router(state: LedgerHttpState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/api/v1/credits", get(get_balance))
        .route("/api/v1/credits/", get(get_balance))
        .route("/api/v1/credits/check", get(check_credits))
        .route("/api/v1/credits/estimate", post(estimate_cost))
        .route("/api/v1/credits/deduct", post(deduct_credits))
        .route("/api/v1/credits/add", post(add_credits))
        .route("/api/v1/credits/:account_id/adjust", post(adjust_credits))
        .route("/api/v1/credits/history", get(get_history))
        .route("/api/v1/credits/usage", get(get_usage))
        .route("/api/v1/credits/workflow/config", get(workflow_config))
        .route("/api/v1/credits/workflow/history", get(workflow_history))
        .route("/api/v1/credits/unified", get(get_unified))
        .route(
            "/admin/accounts",
            get(admin::list_accounts).post(admin::provision_account),
        )
        .route(
            "/admin/accounts/:account_id",
            delete(admin::archive_account),
        )
        .route("/admin/reconcile", post(admin::reconcile_ledger))
        .with_state(state)
}

async fn healthz() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

async fn get_balance(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
) -> Result<Json<BalanceView>, (StatusCode, Json<ErrorResponse>)> {
    let account = authenticate_account(&state, &headers).await?;
    state
        .ledger
        .balance(&account.account_id)
        .await
        .map(Json)
        .map_err(map_ledger_error)
}

#[derive(Debug, Deserialize)]
struct CheckQuery {
    amount: Option<i64>,
}

async fn check_credits(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<CheckQuery>,
) -> Result<Json<CheckOutcome>, (StatusCode, Json<ErrorResponse>)> {
    let account = authenticate_account(&state, &headers).await?;
    let Some(amount) = query.amount else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_AMOUNT",
            "amount query parameter is required",
        ));
    };
    state
        .ledger
        .check_sufficient(&account.account_id, amount)
        .await
        .map(Json)
        .map_err(map_ledger_error)
}

async fn estimate_cost(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Json(input): Json<EstimateInput>,
) -> Result<Json<CostEstimate>, (StatusCode, Json<ErrorResponse>)> {
    let account = authenticate_account(&state, &headers).await?;
    state
        .ledger
        .estimate_for(account.tier, &input)
        .map(Json)
        .map_err(map_ledger_error)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeductBody {
    #[serde(alias = "user_id")]
    user_id: Option<String>,
    amount: Option<i64>,
    #[serde(default, rename = "type")]
    kind: Option<TransactionKind>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    reference_type: Option<String>,
    #[serde(default)]
    reference_id: Option<String>,
}

async fn deduct_credits(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Json(body): Json<DeductBody>,
) -> Result<Json<DeductOutcome>, (StatusCode, Json<ErrorResponse>)> {
    ensure_internal(&state, &headers)?;
    let account_id = require_user_id(body.user_id)?;
    let amount = require_amount(body.amount)?;
    let request = DeductRequest {
        account_id,
        amount,
        kind: body.kind.unwrap_or(TransactionKind::Generation),
        reason: body.reason.unwrap_or_else(|| "credit deduction".to_string()),
        reference_type: body.reference_type,
        reference_id: body.reference_id,
    };
    state
        .ledger
        .deduct(request)
        .await
        .map(Json)
        .map_err(map_ledger_error)
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AddBody {
    #[serde(alias = "user_id")]
    user_id: Option<String>,
    amount: Option<i64>,
    #[serde(default, rename = "type")]
    kind: Option<TransactionKind>,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    reference_id: Option<String>,
}

async fn add_credits(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Json(body): Json<AddBody>,
) -> Result<Json<AddOutcome>, (StatusCode, Json<ErrorResponse>)> {
    ensure_internal(&state, &headers)?;
    let account_id = require_user_id(body.user_id)?;
    let amount = require_amount(body.amount)?;
    let request = AddRequest {
        account_id,
        amount,
        kind: body.kind.unwrap_or(TransactionKind::Purchase),
        reason: body.reason.unwrap_or_else(|| "credit grant".to_string()),
        reference_id: body.reference_id,
    };
    state
        .ledger
        .add(request)
        .await
        .map(Json)
        .map_err(map_ledger_error)
}

#[derive(Debug, Deserialize)]
struct AdjustBody {
    amount: Option<i64>,
    reason: Option<String>,
    #[serde(default)]
    notes: Option<String>,
}

async fn adjust_credits(
    State(state): State<LedgerHttpState>,
    Path(account_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<AdjustBody>,
) -> Result<Json<AdjustOutcome>, (StatusCode, Json<ErrorResponse>)> {
    let caller = ensure_admin(&state, &headers).await?;
    let amount = require_amount(body.amount)?;
    let Some(reason) = body.reason.filter(|reason| !reason.is_empty()) else {
        return Err(error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "reason is required",
        ));
    };
    tracing::info!(
        account_id = %account_id,
        amount,
        actor = caller.account_id.as_deref().unwrap_or("operator"),
        "admin adjustment requested"
    );
    let request = AdjustRequest {
        account_id,
        amount,
        reason,
        notes: body.notes,
    };
    state
        .ledger
        .adjust(request)
        .await
        .map(Json)
        .map_err(map_ledger_error)
}

#[derive(Debug, Deserialize)]
struct HistoryQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
    #[serde(default, rename = "type")]
    kind: Option<String>,
}

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct TransactionView {
    id: i64,
    amount: i64,
    #[serde(rename = "type")]
    kind: TransactionKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    reference_id: Option<String>,
    reason: String,
    balance_after: i64,
    created_at: String,
}

impl From<LedgerTransactionRecord> for TransactionView {
    fn from(record: LedgerTransactionRecord) -> Self {
        Self {
            id: record.id,
            amount: record.amount,
            kind: record.kind,
            reference_type: record.reference_type,
            reference_id: record.reference_id,
            reason: record.reason,
            balance_after: record.balance_after,
            created_at: format_timestamp(record.created_at_ms),
        }
    }
}

#[derive(Debug, Serialize)]
struct Pagination {
    limit: usize,
    offset: usize,
    total: u64,
}

#[derive(Debug, Serialize)]
struct HistoryResponse {
    transactions: Vec<TransactionView>,
    pagination: Pagination,
}

async fn get_history(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, Json<ErrorResponse>)> {
    let account = authenticate_account(&state, &headers).await?;
    let kind = match query.kind.as_deref() {
        Some(raw) => Some(TransactionKind::from_str(raw).map_err(map_ledger_error)?),
        None => None,
    };
    let filter = HistoryFilter {
        limit: query.limit.clamp(1, MAX_HISTORY_LIMIT),
        offset: query.offset,
        kind,
    };
    let (records, total) = state
        .ledger
        .history(&account.account_id, filter.clone())
        .await
        .map_err(map_ledger_error)?;
    Ok(Json(HistoryResponse {
        transactions: records.into_iter().map(TransactionView::from).collect(),
        pagination: Pagination {
            limit: filter.limit,
            offset: filter.offset,
            total,
        },
    }))
}

#[derive(Debug, Deserialize)]
struct UsageQuery {
    #[serde(default = "default_usage_days")]
    days: u32,
}

fn default_usage_days() -> u32 {
    super::analytics::DEFAULT_USAGE_WINDOW_DAYS
}

async fn get_usage(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<UsageQuery>,
) -> Result<Json<UsageSummary>, (StatusCode, Json<ErrorResponse>)> {
    let account = authenticate_account(&state, &headers).await?;
    state
        .ledger
        .usage_summary(&account.account_id, query.days)
        .await
        .map(Json)
        .map_err(map_ledger_error)
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WorkflowConfigView {
    tier: Tier,
    multiplier: f64,
    free_executions_per_day: u32,
    premium_node_costs: BTreeMap<String, u32>,
    max_credits_per_execution: u64,
}

async fn workflow_config(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
) -> Result<Json<WorkflowConfigView>, (StatusCode, Json<ErrorResponse>)> {
    let account = authenticate_account(&state, &headers).await?;
    let policy = state.ledger.policies().policy_for(account.tier);
    Ok(Json(WorkflowConfigView {
        tier: account.tier,
        multiplier: policy.multiplier(),
        free_executions_per_day: policy.free_executions_per_day,
        premium_node_costs: policy.premium_node_costs.clone(),
        max_credits_per_execution: MAX_CREDITS_PER_EXECUTION,
    }))
}

#[derive(Debug, Deserialize)]
struct PageQuery {
    #[serde(default = "default_history_limit")]
    limit: usize,
    #[serde(default)]
    offset: usize,
}

async fn workflow_history(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
    Query(query): Query<PageQuery>,
) -> Result<Json<HistoryResponse>, (StatusCode, Json<ErrorResponse>)> {
    let account = authenticate_account(&state, &headers).await?;
    let limit = query.limit.clamp(1, MAX_HISTORY_LIMIT);
    let (records, total) = state
        .ledger
        .reference_history(
            &account.account_id,
            WORKFLOW_REFERENCE_TYPE,
            limit,
            query.offset,
        )
        .await
        .map_err(map_ledger_error)?;
    Ok(Json(HistoryResponse {
        transactions: records.into_iter().map(TransactionView::from).collect(),
        pagination: Pagination {
            limit,
            offset: query.offset,
            total,
        },
    }))
}

async fn get_unified(
    State(state): State<LedgerHttpState>,
    headers: HeaderMap,
) -> Result<Json<UnifiedOverview>, (StatusCode, Json<ErrorResponse>)> {
    let account = authenticate_account(&state, &headers).await?;
    state
        .ledger
        .unified_overview(&account.account_id)
        .await
        .map(Json)
        .map_err(map_ledger_error)
}

async fn authenticate_account(
    state: &LedgerHttpState,
    headers: &HeaderMap,
) -> Result<AccountRecord, (StatusCode, Json<ErrorResponse>)> {
    let Some(token) = extract_bearer(headers).or_else(|| extract_header(headers, "x-api-key"))
    else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing API token",
        ));
    };
    let account = state
        .ledger
        .account_by_token(&token)
        .await
        .map_err(map_ledger_error)?;
    account.ok_or_else(|| {
        error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "unknown API token",
        )
    })
}

/// Internal service endpoints (deduct, add) act on behalf of any account, so
/// they take a shared service token instead of an account token.
fn ensure_internal(
    state: &LedgerHttpState,
    headers: &HeaderMap,
) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if state.internal_tokens.is_empty() && state.admin_tokens.is_empty() {
        return Err(error_response(
            StatusCode::NOT_FOUND,
            "NOT_CONFIGURED",
            "internal api not configured",
        ));
    }
    let provided = extract_header(headers, "x-internal-token")
        .or_else(|| extract_bearer(headers))
        .unwrap_or_default();
    let accepted = state
        .internal_tokens
        .iter()
        .chain(state.admin_tokens.iter())
        .any(|expected| *expected == provided);
    if accepted {
        Ok(())
    } else {
        Err(error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "invalid internal token",
        ))
    }
}

struct AdminCaller {
    /// None when authenticated with an operator token rather than an
    /// admin-tier account.
    account_id: Option<String>,
}

async fn ensure_admin(
    state: &LedgerHttpState,
    headers: &HeaderMap,
) -> Result<AdminCaller, (StatusCode, Json<ErrorResponse>)> {
    let Some(provided) =
        extract_header(headers, "x-admin-token").or_else(|| extract_bearer(headers))
    else {
        return Err(error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "missing admin token",
        ));
    };

    if state.admin_tokens.iter().any(|token| *token == provided) {
        return Ok(AdminCaller { account_id: None });
    }

    match state
        .ledger
        .account_by_token(&provided)
        .await
        .map_err(map_ledger_error)?
    {
        Some(account) if account.tier == Tier::Admin => Ok(AdminCaller {
            account_id: Some(account.account_id),
        }),
        Some(_) => Err(error_response(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "admin capability required",
        )),
        None => Err(error_response(
            StatusCode::UNAUTHORIZED,
            "UNAUTHORIZED",
            "invalid admin token",
        )),
    }
}

fn require_user_id(
    user_id: Option<String>,
) -> Result<String, (StatusCode, Json<ErrorResponse>)> {
    user_id.filter(|id| !id.is_empty()).ok_or_else(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_REQUEST",
            "user_id is required",
        )
    })
}

fn require_amount(amount: Option<i64>) -> Result<i64, (StatusCode, Json<ErrorResponse>)> {
    amount.ok_or_else(|| {
        error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_AMOUNT",
            "amount is required",
        )
    })
}

fn extract_header(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn extract_bearer(headers: &HeaderMap) -> Option<String> {
    let auth = headers
        .get("authorization")
        .and_then(|value| value.to_str().ok())?
        .trim()
        .to_string();
    let rest = auth
        .strip_prefix("Bearer ")
        .or_else(|| auth.strip_prefix("bearer "))?;
    let token = rest.trim();
    (!token.is_empty()).then(|| token.to_string())
}

fn format_timestamp(ms: i64) -> String {
    DateTime::<Utc>::from_timestamp_millis(ms)
        .unwrap_or_default()
        .to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn map_ledger_error(err: LedgerError) -> (StatusCode, Json<ErrorResponse>) {
    match err {
        LedgerError::InvalidAmount => error_response(
            StatusCode::BAD_REQUEST,
            "INVALID_AMOUNT",
            "amount must be a positive integer",
        ),
        LedgerError::AccountNotFound { account_id } => error_response(
            StatusCode::NOT_FOUND,
            "ACCOUNT_NOT_FOUND",
            format!("account not found: {account_id}"),
        ),
        LedgerError::AccountArchived { account_id } => error_response(
            StatusCode::FORBIDDEN,
            "ACCOUNT_ARCHIVED",
            format!("account archived: {account_id}"),
        ),
        LedgerError::TokenInUse { account_id } => error_response(
            StatusCode::CONFLICT,
            "TOKEN_IN_USE",
            format!("api token already in use by account {account_id}"),
        ),
        LedgerError::InsufficientCredits {
            required,
            remaining,
        } => {
            let deficit = required.saturating_sub(remaining).max(0);
            (
                StatusCode::PAYMENT_REQUIRED,
                Json(ErrorResponse {
                    error: ErrorDetail {
                        code: "INSUFFICIENT_CREDITS",
                        message: format!(
                            "insufficient credits: required={required} remaining={remaining}"
                        ),
                        required: Some(required),
                        remaining: Some(remaining),
                        deficit: Some(deficit),
                    },
                }),
            )
        }
        LedgerError::Forbidden => error_response(
            StatusCode::FORBIDDEN,
            "FORBIDDEN",
            "admin capability required",
        ),
        LedgerError::UnknownTier { tier } => error_response(
            StatusCode::BAD_REQUEST,
            "UNKNOWN_TIER",
            format!("unknown tier: {tier}"),
        ),
        LedgerError::InvalidMultiplier { tier } => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "INVALID_MULTIPLIER",
            format!("invalid multiplier for tier {tier}"),
        ),
        LedgerError::UnknownPremiumNode { node_type } => error_response(
            StatusCode::BAD_REQUEST,
            "UNKNOWN_PREMIUM_NODE",
            format!("unknown premium node type: {node_type}"),
        ),
        LedgerError::UnknownTransactionKind { kind } => error_response(
            StatusCode::BAD_REQUEST,
            "UNKNOWN_TRANSACTION_KIND",
            format!("unknown transaction type: {kind}"),
        ),
        LedgerError::LedgerContention { attempts } => error_response(
            StatusCode::CONFLICT,
            "LEDGER_CONTENTION",
            format!("ledger contention after {attempts} attempts"),
        ),
        LedgerError::Storage(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORAGE_ERROR",
            err.to_string(),
        ),
        LedgerError::StorageJoin(err) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            "STORAGE_ERROR",
            err.to_string(),
        ),
    }
}

fn error_response(
    status: StatusCode,
    code: &'static str,
    message: impl Into<String>,
) -> (StatusCode, Json<ErrorResponse>) {
    (
        status,
        Json(ErrorResponse {
            error: ErrorDetail {
                code,
                message: message.into(),
                required: None,
                remaining: None,
                deficit: None,
            },
        }),
    )
}
