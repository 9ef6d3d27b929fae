//! `reflect-signals`: record and inspect versioned signals from the shell.
//!
//! Build: `cargo build --features cli --bin reflect-signals`
//! Logging follows `RUST_LOG` (default `info`); results go to stdout as JSON.

use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use serde::Deserialize;

use reflection_signals::config::{load_config, load_config_from, Config};
use reflection_signals::signals::{Observation, Provenance, SignalQuery};
use reflection_signals::{open_engine, IngestErrorReport, SignalError};

#[derive(Parser, Debug)]
#[command(name = "reflect-signals", version, about = "Record and query versioned journal signals")]
struct Cli {
    /// Config file (defaults to ~/.reflect/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Database path, overriding the config file
    #[arg(long, global = true)]
    db: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one observation as the next version of its key
    Add {
        user: String,
        entry: String,
        key: String,
        #[arg(allow_negative_numbers = true)]
        value: f64,
        #[arg(allow_negative_numbers = true)]
        confidence: f64,
        model: String,
        #[command(flatten)]
        provenance: ProvenanceArgs,
    },
    /// Record a JSON batch file
    Ingest { file: PathBuf },
    /// List a user's signals
    List {
        user: String,
        #[arg(long)]
        entry: Option<String>,
        #[arg(long)]
        key: Option<String>,
        #[arg(long)]
        min_version: Option<u32>,
        #[arg(long)]
        run: Option<String>,
        #[arg(long)]
        limit: Option<usize>,
        #[arg(long)]
        newest_first: bool,
    },
    /// Every version of one key, oldest first
    History { user: String, entry: String, key: String },
    /// Latest unexpired version of each key
    Current {
        user: String,
        #[arg(long)]
        entry: Option<String>,
    },
}

#[derive(Args, Debug)]
struct ProvenanceArgs {
    /// Capture that triggered this observation
    #[arg(long)]
    trigger: Option<String>,
    /// Lookback window in days the model considered
    #[arg(long)]
    window: Option<u32>,
    /// Inference run id
    #[arg(long)]
    run: Option<String>,
}

/// Batch file layout accepted by `ingest`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct BatchFile {
    user_id: String,
    model: String,
    #[serde(flatten)]
    provenance: Provenance,
    observations: Vec<Observation>,
}

fn resolve_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => load_config_from(path).map_err(anyhow::Error::msg)?,
        None => load_config().unwrap_or_else(|e| {
            log::info!("Using default config: {}", e);
            Config::default()
        }),
    };
    if let Some(db) = &cli.db {
        config.database_path = Some(db.clone());
    }
    Ok(config)
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn run(cli: Cli) -> Result<()> {
    let config = resolve_config(&cli)?;
    let engine = open_engine(&config).context("Failed to open signal database")?;

    match cli.command {
        Command::Add {
            user,
            entry,
            key,
            value,
            confidence,
            model,
            provenance,
        } => {
            let id = engine.add_signal(
                &user,
                &entry,
                &key,
                value,
                confidence,
                &model,
                provenance.trigger.as_deref(),
                provenance.window,
                provenance.run.as_deref(),
            )?;
            print_json(&serde_json::json!({ "id": id }))
        }
        Command::Ingest { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let batch: BatchFile = serde_json::from_str(&raw)
                .with_context(|| format!("Failed to parse {}", file.display()))?;
            let ids = engine.add_signals_batch(
                &batch.user_id,
                &batch.observations,
                &batch.model,
                &batch.provenance,
            )?;
            print_json(&serde_json::json!({ "ids": ids }))
        }
        Command::List {
            user,
            entry,
            key,
            min_version,
            run,
            limit,
            newest_first,
        } => {
            let mut query = SignalQuery {
                entry_id: entry,
                key,
                min_version,
                llm_run_id: run,
                limit,
                ..SignalQuery::default()
            };
            if newest_first {
                query = query.newest_first();
            }
            print_json(&engine.get_signals(&user, &query)?)
        }
        Command::History { user, entry, key } => {
            print_json(&engine.signal_history(&user, &entry, &key)?)
        }
        Command::Current { user, entry } => {
            let query = SignalQuery {
                entry_id: entry,
                ..SignalQuery::default()
            };
            print_json(&engine.current_signals(&user, &query)?)
        }
    }
}

fn main() -> ExitCode {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match run(Cli::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            match err.downcast_ref::<SignalError>() {
                Some(signal_err) => {
                    let report = IngestErrorReport::from(signal_err);
                    match serde_json::to_string_pretty(&report) {
                        Ok(json) => eprintln!("{json}"),
                        Err(_) => eprintln!("{}", report.message),
                    }
                }
                None => log::error!("{:#}", err),
            }
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_batch_file_flattens_provenance() {
        let batch: BatchFile = serde_json::from_str(
            r#"{
                "userId": "u1",
                "model": "m1",
                "triggerCaptureId": "cap-9",
                "sourceWindowDays": 7,
                "llmRunId": "run-3",
                "observations": [
                    { "entryId": "e1", "key": "mood", "value": 0.4, "confidence": 0.8 },
                    { "entryId": "e1", "key": "energy", "value": -0.2, "confidence": 0.6 }
                ]
            }"#,
        )
        .expect("parse batch file");

        assert_eq!(batch.user_id, "u1");
        assert_eq!(batch.model, "m1");
        assert_eq!(batch.provenance, Provenance::new(Some("cap-9"), Some(7), Some("run-3")));
        assert_eq!(batch.observations.len(), 2);
        assert_eq!(batch.observations[1], Observation::new("e1", "energy", -0.2, 0.6));
    }

    #[test]
    fn test_batch_file_provenance_is_optional() {
        let batch: BatchFile =
            serde_json::from_str(r#"{ "userId": "u1", "model": "m1", "observations": [] }"#)
                .expect("parse batch file");
        assert_eq!(batch.provenance, Provenance::default());
        assert!(batch.observations.is_empty());
    }

    #[test]
    fn test_add_accepts_negative_values_and_provenance_flags() {
        let cli = Cli::try_parse_from([
            "reflect-signals",
            "--db",
            "/tmp/s.db",
            "add",
            "u1",
            "e1",
            "mood",
            "-0.5",
            "0.9",
            "m1",
            "--window",
            "14",
            "--run",
            "run-1",
        ])
        .expect("parse args");

        assert_eq!(cli.db.as_deref(), Some("/tmp/s.db"));
        match cli.command {
            Command::Add {
                value,
                confidence,
                provenance,
                ..
            } => {
                assert_eq!(value, -0.5);
                assert_eq!(confidence, 0.9);
                assert_eq!(provenance.window, Some(14));
                assert_eq!(provenance.run.as_deref(), Some("run-1"));
                assert!(provenance.trigger.is_none());
            }
            other => panic!("expected add, got {other:?}"),
        }
    }
}
