use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::error;

use audit_hub::config::{Config, StorageConfig};
use audit_hub::coordinator::{Coordinator, IngestPayload};
use audit_hub::extractor;
use audit_hub::logging;
use audit_hub::server;
use audit_hub::types::{field_map_from_json, field_map_to_json, Locale, QueryFilter};

#[derive(Parser)]
#[command(name = "audit-hub")]
#[command(about = "Append-only audit trail with locale-aware field extraction")]
#[command(version = "0.1.0")]
struct Cli {
    /// Override the storage root from config.toml
    #[arg(long)]
    data_root: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract fields from raw text without recording anything
    Parse {
        /// Locale rule set to apply (en, ja)
        #[arg(long, default_value = "en")]
        locale: String,
        /// Raw text to extract from
        #[arg(long)]
        text: String,
    },
    /// Durably record one event
    Ingest {
        /// Source identifier for the event
        #[arg(long)]
        source: String,
        /// JSON object of scalar fields, or raw text when --locale is given
        #[arg(long)]
        payload: String,
        /// Treat the payload as raw text and extract with this locale
        #[arg(long)]
        locale: Option<String>,
    },
    /// Look up recorded events
    Query {
        #[arg(long)]
        source: Option<String>,
        /// RFC3339 lower bound on capture time
        #[arg(long)]
        since: Option<String>,
        /// RFC3339 upper bound on capture time
        #[arg(long)]
        until: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
    },
    /// Substring search over stored fields, newest first
    Search {
        /// Text to look for in the indexed field JSON
        #[arg(long)]
        term: String,
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show the most recent entries, newest first
    Tail {
        #[arg(long, default_value_t = 10)]
        n: usize,
    },
    /// Count committed entries and index rows
    Stats,
    /// Drop the index and replay it from the journal
    Rebuild,
    /// Serve the hub over HTTP
    Serve {
        /// Override the port from config.toml
        #[arg(long)]
        port: Option<u16>,
    },
}

fn storage_config(cli_root: Option<PathBuf>, config: &Config) -> StorageConfig {
    match cli_root {
        Some(root) => StorageConfig::at_root(root),
        None => config.storage.clone(),
    }
}

fn print_json(value: &serde_json::Value) {
    println!("{}", serde_json::to_string_pretty(value).unwrap_or_default());
}

fn rows_json(outcome: &audit_hub::coordinator::QueryOutcome) -> serde_json::Value {
    serde_json::json!({
        "rows": outcome.rows.iter().map(|row| serde_json::json!({
            "sequence_id": row.sequence_id,
            "source": row.source,
            "ts": row.ts.to_rfc3339(),
            "fields": field_map_to_json(&row.fields),
        })).collect::<Vec<_>>(),
        "index_stale": outcome.index_stale,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    logging::init_logging();

    let cli = Cli::parse();
    let config = Config::load()?;

    match cli.command {
        Commands::Parse { locale, text } => {
            // Stateless; no storage is opened.
            let locale: Locale = locale.parse()?;
            let record = extractor::extract(&text, locale);
            print_json(&serde_json::json!({
                "locale": record.locale,
                "tokens": record.tokens,
                "fields": field_map_to_json(&record.fields),
                "matched_rule": record.matched_rule,
            }));
        }
        Commands::Ingest {
            source,
            payload,
            locale,
        } => {
            let storage = storage_config(cli.data_root, &config);
            let coordinator = Coordinator::open(&storage)?;
            let ingest_payload = match locale {
                Some(locale) => IngestPayload::Text {
                    raw: payload,
                    locale: Some(locale.parse()?),
                },
                None => {
                    let value: serde_json::Value = serde_json::from_str(&payload)?;
                    IngestPayload::Structured(field_map_from_json(&value)?)
                }
            };
            match coordinator.ingest(&source, ingest_payload) {
                Ok(sequence_id) => {
                    print_json(&serde_json::json!({ "sequence_id": sequence_id }));
                }
                Err(e) => {
                    error!("ingest failed: {e}");
                    eprintln!("❌ Ingest failed: {e}");
                    std::process::exit(1);
                }
            }
            coordinator.close()?;
        }
        Commands::Query {
            source,
            since,
            until,
            limit,
        } => {
            let storage = storage_config(cli.data_root, &config);
            let coordinator = Coordinator::open(&storage)?;
            let filter = QueryFilter {
                source,
                since: parse_ts(since.as_deref())?,
                until: parse_ts(until.as_deref())?,
                limit,
                ..Default::default()
            };
            let outcome = coordinator.query(&filter)?;
            print_json(&rows_json(&outcome));
            coordinator.close()?;
        }
        Commands::Search { term, limit } => {
            let storage = storage_config(cli.data_root, &config);
            let coordinator = Coordinator::open(&storage)?;
            let outcome = coordinator.search(&term, limit)?;
            print_json(&rows_json(&outcome));
            coordinator.close()?;
        }
        Commands::Tail { n } => {
            let storage = storage_config(cli.data_root, &config);
            let coordinator = Coordinator::open(&storage)?;
            let outcome = coordinator.tail(n)?;
            print_json(&rows_json(&outcome));
            coordinator.close()?;
        }
        Commands::Stats => {
            let storage = storage_config(cli.data_root, &config);
            let coordinator = Coordinator::open(&storage)?;
            let stats = coordinator.stats()?;
            print_json(&serde_json::json!({
                "journal_entries": stats.journal_entries,
                "index_rows": stats.index_rows,
                "index_stale": stats.index_stale,
            }));
            coordinator.close()?;
        }
        Commands::Rebuild => {
            let storage = storage_config(cli.data_root, &config);
            let coordinator = Coordinator::open(&storage)?;
            let applied = coordinator.rebuild_index()?;
            println!("✅ Index rebuilt: {applied} rows");
            coordinator.close()?;
        }
        Commands::Serve { port } => {
            let storage = storage_config(cli.data_root, &config);
            let coordinator = Arc::new(Coordinator::open(&storage)?);
            let port = port.unwrap_or(config.hub.port);
            if let Err(e) = server::start_server(coordinator, port).await {
                error!("server failed: {e}");
                eprintln!("❌ Server failed: {e}");
                std::process::exit(1);
            }
        }
    }
    Ok(())
}

fn parse_ts(raw: Option<&str>) -> anyhow::Result<Option<chrono::DateTime<chrono::Utc>>> {
    match raw {
        None => Ok(None),
        Some(raw) => Ok(Some(
            chrono::DateTime::parse_from_rfc3339(raw)?.with_timezone(&chrono::Utc),
        )),
    }
}
