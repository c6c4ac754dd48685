//! Command implementations for hachimi.
//!
//! Every command opens the store, runs one engine operation and prints
//! JSON on stdout. Logs go to stderr.

use std::fs;
use std::io::{Read, Write};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use serde_json::json;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{info, warn};

use hachimi_engine::{
    lab, Dispatcher, DispatcherHandle, HistoryQuery, Request, ResonanceEngine, Response,
};
use hachimi_storage::Storage;
use hachimi_types::{ContentRecord, PartialContentRecord, Settings};

use crate::cli::{Cli, Commands};

/// Load settings and apply CLI overrides (highest precedence).
pub fn load_settings(
    config_path: Option<&str>,
    db_path_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Settings> {
    let mut settings = Settings::load(config_path).context("Failed to load configuration")?;

    if let Some(db_path) = db_path_override {
        settings.db_path = db_path.to_string();
    }
    if let Some(log_level) = log_level_override {
        settings.log_level = log_level.to_string();
    }
    Ok(settings)
}

/// Install the global tracing subscriber, writing to stderr.
pub fn init_logging(settings: &Settings) -> Result<()> {
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&settings.log_level)),
        )
        .with_writer(std::io::stderr)
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;
    Ok(())
}

/// Open storage and build the engine.
pub fn open_engine(settings: &Settings) -> Result<Arc<ResonanceEngine>> {
    let db_path = settings.expanded_db_path();
    info!("Opening storage at {:?}", db_path);

    if let Some(parent) = db_path.parent() {
        fs::create_dir_all(parent).context("Failed to create database directory")?;
    }

    let storage = Storage::open(&db_path).context("Failed to open storage")?;
    Ok(Arc::new(ResonanceEngine::new(Arc::new(storage), settings)))
}

/// Entry point used by the binary.
pub async fn run(cli: Cli) -> Result<()> {
    let settings = load_settings(
        cli.config.as_deref(),
        cli.db_path.as_deref(),
        cli.log_level.as_deref(),
    )?;
    init_logging(&settings)?;
    let engine = open_engine(&settings)?;

    if let Commands::Serve = cli.command {
        let handle = Dispatcher::spawn(engine);
        let stdin = tokio::io::BufReader::new(tokio::io::stdin());
        return tokio::select! {
            result = serve(&handle, stdin, tokio::io::stdout()) => result,
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down...");
                Ok(())
            }
        };
    }

    let mut stdout = std::io::stdout().lock();
    execute(&engine, &settings, cli.command, &mut stdout)
}

fn print_json<W: Write, T: Serialize>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value).context("Failed to write output")?;
    writeln!(out)?;
    Ok(())
}

fn require_record(engine: &ResonanceEngine, id: &str) -> Result<ContentRecord> {
    engine
        .get(id)?
        .with_context(|| format!("Record not found: {}", id))
}

/// Read observations: an object, an array of objects, or `null`.
pub fn parse_observations(input: &str) -> Result<Vec<Option<PartialContentRecord>>> {
    let value: serde_json::Value =
        serde_json::from_str(input).context("Observation input is not valid JSON")?;
    let items = match value {
        serde_json::Value::Array(items) => items,
        other => vec![other],
    };
    items
        .into_iter()
        .map(|item| {
            serde_json::from_value::<Option<PartialContentRecord>>(item)
                .context("Invalid observation")
        })
        .collect()
}

fn read_input(input: &str) -> Result<String> {
    if input == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        Ok(buf)
    } else {
        fs::read_to_string(input).with_context(|| format!("Failed to read {}", input))
    }
}

/// Run a one-shot command against `engine`, writing JSON to `out`.
pub fn execute<W: Write>(
    engine: &ResonanceEngine,
    settings: &Settings,
    command: Commands,
    out: &mut W,
) -> Result<()> {
    execute_at(engine, settings, command, Utc::now(), out)
}

/// `execute` at a fixed instant, for commands that depend on the clock.
pub fn execute_at<W: Write>(
    engine: &ResonanceEngine,
    settings: &Settings,
    command: Commands,
    now: DateTime<Utc>,
    out: &mut W,
) -> Result<()> {
    match command {
        Commands::Observe { input } => {
            let observations = parse_observations(&read_input(&input)?)?;
            let mut outcomes = Vec::with_capacity(observations.len());
            for observation in observations {
                outcomes.push(engine.observe_at(observation, now)?);
            }
            print_json(out, &outcomes)
        }
        Commands::Exists { id } => {
            let exists = engine.exists(&id)?;
            print_json(out, &json!({ "id": id, "exists": exists }))
        }
        Commands::Exempt { id } => {
            let removed = engine.exempt(&id)?;
            print_json(out, &json!({ "id": id, "removed": removed }))
        }
        Commands::Resonance { count } => {
            let count = count.unwrap_or(settings.sampler.default_count);
            let shown = engine.resonance_selection_at(count, now, &mut rand::rng())?;
            print_json(out, &shown)
        }
        Commands::Click { id } => {
            let changed = engine.report_click_at(&id, now)?;
            print_json(out, &json!({ "id": id, "changed": changed }))
        }
        Commands::Hover { id } => {
            let changed = engine.report_hover(&id)?;
            print_json(out, &json!({ "id": id, "changed": changed }))
        }
        Commands::Score { id } => {
            let record = require_record(engine, &id)?;
            let score = engine.score(&record);
            print_json(
                out,
                &json!({
                    "id": id,
                    "score": score,
                    "level": hachimi_types::score_level(score),
                }),
            )
        }
        Commands::Weight { id } => {
            let record = require_record(engine, &id)?;
            let breakdown = engine.weight_breakdown_at(&record, now);
            print_json(out, &json!({ "id": id, "breakdown": breakdown }))
        }
        Commands::Recent { limit } => print_json(out, &engine.recent(limit)?),
        Commands::History {
            window,
            min_score,
            max_score,
            interactions,
            platforms,
            sort,
            order,
            limit,
        } => {
            let query = HistoryQuery {
                window,
                min_score,
                max_score,
                interactions,
                platforms,
                sort_field: sort,
                sort_order: order,
                limit,
            };
            print_json(out, &engine.history_at(&query, now)?)
        }
        Commands::Prune { before } => {
            let cutoff = DateTime::from_timestamp_millis(before)
                .with_context(|| format!("Cutoff out of range: {}", before))?;
            let deleted = engine.delete_before(cutoff)?;
            print_json(out, &json!({ "deleted": deleted }))
        }
        Commands::Clear { yes } => {
            if !yes {
                bail!("Refusing to delete every record without --yes");
            }
            let deleted = engine.delete_all()?;
            print_json(out, &json!({ "deleted": deleted }))
        }
        Commands::Stats => print_json(out, &engine.stats()?),
        Commands::Lab { rounds, mock, seed } => {
            let records = if mock {
                lab::mock_pool(now)
            } else {
                engine.all_records()?
            };
            let mut rng = match seed {
                Some(seed) => StdRng::seed_from_u64(seed),
                None => StdRng::from_os_rng(),
            };
            let rows = lab::simulate(&records, rounds, engine.scorer(), now, &mut rng);
            print_json(out, &json!({ "rounds": rounds, "rows": rows }))
        }
        Commands::Serve => bail!("serve runs through the dispatcher, not execute"),
    }
}

/// Answer one JSON request per input line until EOF.
///
/// Unparseable lines get a `Failure` response; blank lines are ignored.
pub async fn serve<R, W>(handle: &DispatcherHandle, reader: R, mut writer: W) -> Result<()>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = reader.lines();
    while let Some(line) = lines.next_line().await.context("Failed to read request")? {
        if line.trim().is_empty() {
            continue;
        }
        let response = match serde_json::from_str::<Request>(&line) {
            Ok(request) => handle.call(request).await?,
            Err(e) => {
                warn!(error = %e, "Malformed request");
                Response::Failure {
                    error: format!("malformed request: {}", e),
                }
            }
        };
        let mut encoded = serde_json::to_vec(&response).context("Failed to encode response")?;
        encoded.push(b'\n');
        writer.write_all(&encoded).await?;
        writer.flush().await?;
    }
    Ok(())
}
