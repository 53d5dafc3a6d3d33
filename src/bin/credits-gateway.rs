use tracing_subscriber::Layer as _;
use tracing_subscriber::layer::SubscriberExt as _;
use tracing_subscriber::util::SubscriberInitExt as _;

use synthstack_credits::{
    CreditLedger, LedgerConfig, LedgerHttpState, SqliteStore, TierPolicyTable, router,
};

const USAGE: &str = "usage: credits-gateway --sqlite PATH [--config config.json] \
[--listen HOST:PORT] [--admin-token TOKEN] [--internal-token TOKEN] [--json-logs]";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);

    let mut listen = "127.0.0.1:8080".to_string();
    let mut sqlite_path: Option<std::path::PathBuf> = None;
    let mut config_path: Option<std::path::PathBuf> = None;
    let mut admin_tokens: Vec<String> = Vec::new();
    let mut internal_tokens: Vec<String> = Vec::new();
    let mut json_logs = false;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--listen" | "--addr" => {
                listen = args.next().ok_or("missing value for --listen/--addr")?;
            }
            "--sqlite" => {
                sqlite_path = Some(args.next().ok_or("missing value for --sqlite")?.into());
            }
            "--config" => {
                config_path = Some(args.next().ok_or("missing value for --config")?.into());
            }
            "--admin-token" => {
                admin_tokens.push(args.next().ok_or("missing value for --admin-token")?);
            }
            "--internal-token" => {
                internal_tokens.push(args.next().ok_or("missing value for --internal-token")?);
            }
            "--json-logs" => {
                json_logs = true;
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            other => {
                return Err(format!("unknown argument: {other}\n{USAGE}").into());
            }
        }
    }

    init_tracing(json_logs)?;

    let Some(sqlite_path) = sqlite_path else {
        return Err(USAGE.into());
    };

    let config = match config_path {
        Some(path) => LedgerConfig::from_file(path)?,
        None => LedgerConfig::default(),
    };
    let policies = TierPolicyTable::with_overrides(&config.tiers)?;

    let store = SqliteStore::new(&sqlite_path);
    store.init().await?;
    let ledger = CreditLedger::new(store, policies);

    let seeded = ledger.seed_accounts(&config.accounts).await?;
    if seeded > 0 {
        tracing::info!(seeded, "provisioned accounts from config");
    }

    let state = LedgerHttpState::new(ledger)
        .with_admin_tokens(config.admin_tokens)
        .with_admin_tokens(admin_tokens)
        .with_internal_tokens(config.internal_tokens)
        .with_internal_tokens(internal_tokens);

    let app = router(state);
    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!(listen = %listen, sqlite = %sqlite_path.display(), "credits-gateway listening");
    axum::serve(listener, app).await?;
    Ok(())
}

fn init_tracing(json_logs: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = if json_logs {
        tracing_subscriber::fmt::layer()
            .json()
            .with_target(false)
            .boxed()
    } else {
        tracing_subscriber::fmt::layer().with_target(false).boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}
