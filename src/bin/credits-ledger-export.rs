use tokio::io::AsyncWriteExt as _;

use synthstack_credits::{HistoryFilter, LedgerTransactionRecord, SqliteStore};

const USAGE: &str = concat!(
    "usage: credits-ledger-export \\\n",
    "  --sqlite PATH \\\n",
    "  --output PATH|- \\\n",
    "  [--format jsonl|csv] [--account ID] [--limit N] [--since-ts-ms MS]\n",
);

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let mut args = std::env::args().skip(1);

    let mut sqlite_path: Option<std::path::PathBuf> = None;
    let mut output: Option<String> = None;
    let mut format = "jsonl".to_string();
    let mut account: Option<String> = None;
    let mut limit: usize = 1000;
    let mut since_ts_ms: Option<i64> = None;

    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--sqlite" => {
                sqlite_path = Some(args.next().ok_or("missing value for --sqlite")?.into())
            }
            "--output" => output = Some(args.next().ok_or("missing value for --output")?),
            "--format" => format = args.next().ok_or("missing value for --format")?,
            "--account" => account = Some(args.next().ok_or("missing value for --account")?),
            "--limit" => limit = args.next().ok_or("missing value for --limit")?.parse()?,
            "--since-ts-ms" => {
                since_ts_ms = Some(
                    args.next()
                        .ok_or("missing value for --since-ts-ms")?
                        .parse()?,
                )
            }
            "--help" | "-h" => {
                println!("{USAGE}");
                return Ok(());
            }
            other => return Err(format!("unknown arg: {other}").into()),
        }
    }

    let sqlite_path = sqlite_path.ok_or(USAGE)?;
    let output = output.ok_or(USAGE)?;

    let format = format.trim().to_ascii_lowercase();
    if format != "jsonl" && format != "ndjson" && format != "csv" {
        return Err(format!("unsupported format: {format}").into());
    }

    let store = SqliteStore::new(&sqlite_path);

    let accounts: Vec<String> = match account {
        Some(id) => vec![id],
        None => store
            .list_accounts()
            .await?
            .into_iter()
            .map(|record| record.account_id)
            .collect(),
    };

    let filter = HistoryFilter {
        limit,
        offset: 0,
        kind: None,
    };
    let mut transactions: Vec<LedgerTransactionRecord> = Vec::new();
    for account_id in &accounts {
        let (rows, _) = store.list_transactions(account_id, &filter).await?;
        transactions.extend(
            rows.into_iter()
                .filter(|row| since_ts_ms.is_none_or(|since| row.created_at_ms >= since)),
        );
    }
    transactions.sort_by(|a, b| b.id.cmp(&a.id));
    transactions.truncate(limit);

    let mut lines = Vec::<String>::with_capacity(transactions.len().saturating_add(1));
    match format.as_str() {
        "csv" => {
            lines.push(
                "id,account_id,amount,kind,reference_type,reference_id,reason,balance_after,created_at_ms\n"
                    .to_string(),
            );
            for tx in &transactions {
                lines.push(format!(
                    "{},{},{},{},{},{},{},{},{}\n",
                    tx.id,
                    csv_escape(&tx.account_id),
                    tx.amount,
                    tx.kind,
                    csv_escape(tx.reference_type.as_deref().unwrap_or("")),
                    csv_escape(tx.reference_id.as_deref().unwrap_or("")),
                    csv_escape(&tx.reason),
                    tx.balance_after,
                    tx.created_at_ms,
                ));
            }
        }
        _ => {
            for tx in &transactions {
                let mut line = serde_json::to_string(tx)?;
                line.push('\n');
                lines.push(line);
            }
        }
    }

    if output == "-" {
        use std::io::Write as _;

        let mut stdout = std::io::stdout();
        for line in &lines {
            stdout.write_all(line.as_bytes())?;
        }
        stdout.flush()?;
        eprintln!("wrote {} transactions to stdout", transactions.len());
        return Ok(());
    }

    let mut file = tokio::fs::File::create(&output).await?;
    for line in &lines {
        file.write_all(line.as_bytes()).await?;
    }
    file.flush().await?;
    eprintln!("wrote {} transactions to {output}", transactions.len());
    Ok(())
}

fn csv_escape(value: &str) -> String {
    if !value.contains([',', '"', '\n', '\r']) {
        return value.to_string();
    }
    let escaped = value.replace('"', "\"\"");
    format!("\"{escaped}\"")
}
