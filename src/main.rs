use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use review_tunnel::adjudication::{ExternalClassifier, HostedClassifier, UnconfiguredClassifier};
use review_tunnel::config::{default_config_path, Config};
use review_tunnel::tunnel::{RawSuggestion, Suggestion};
use review_tunnel::Pipeline;

/// Critical-only routing for code-review suggestions.
#[derive(Parser, Debug)]
#[command(name = "review-tunnel", version, about)]
struct Cli {
    /// Config file (defaults to the platform config directory).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Route a JSON array of suggestions through a channel
    Ingest {
        /// JSON file containing an array of suggestions
        #[arg(long)]
        file: PathBuf,
        /// Channel name or id
        #[arg(long)]
        channel: String,
        /// Name for the created bin
        #[arg(long)]
        bin_name: Option<String>,
    },

    /// Run the evaluation scheduler until Ctrl-C
    Daemon {
        /// Also ingest newline-delimited JSON suggestions from stdin into
        /// this channel (name or id). A line is one suggestion or an array.
        #[arg(long)]
        channel: Option<String>,
    },

    /// Show the top agents from the ledger journal
    Leaderboard {
        #[arg(long, default_value_t = 10)]
        top: usize,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show,
    /// Print the JSON schema for the config file
    Schema,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Schema => println!("{}", Config::json_schema()?),
            ConfigAction::Show => {
                let mut config = Config::load(cli.config.as_deref())?;
                if config.classifier.api_key.is_some() {
                    config.classifier.api_key = Some("<redacted>".into());
                }
                if let Some(path) = cli.config.clone().or_else(default_config_path) {
                    println!("# {}", path.display());
                }
                println!("{}", toml::to_string_pretty(&config)?);
            }
        },
        Commands::Ingest {
            file,
            channel,
            bin_name,
        } => {
            let config = Config::load(cli.config.as_deref())?;
            let pipeline = Pipeline::from_config(&config, classifier(&config))?;

            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {}", file.display()))?;
            let suggestions = parse_suggestions(&raw)
                .with_context(|| format!("Failed to parse {}", file.display()))?;

            let outcome = pipeline
                .ingest_and_adjudicate(suggestions, &channel, bin_name.as_deref())
                .await?;
            println!("{}", serde_json::to_string_pretty(&outcome)?);
        }
        Commands::Daemon { channel } => {
            let config = Config::load(cli.config.as_deref())?;
            if config.ledger.journal_path.is_none() {
                tracing::warn!(
                    "No ledger.journal_path configured; awards will not survive restart"
                );
            }
            let pipeline = Pipeline::from_config(&config, classifier(&config))?;
            if let Some(channel) = &channel {
                pipeline.resolve_channel(channel)?;
            }
            if !pipeline.start() {
                anyhow::bail!("Evaluation scheduler is disabled; set scheduler.enabled = true");
            }

            let (tx, mut rx) = tokio::sync::mpsc::channel::<Vec<Suggestion>>(INGEST_QUEUE);
            if channel.is_some() {
                spawn_stdin_reader(tx);
            } else {
                drop(tx);
            }

            let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());
            loop {
                tokio::select! {
                    res = &mut shutdown => {
                        res.context("Failed to listen for Ctrl-C")?;
                        break;
                    }
                    Some(batch) = rx.recv() => {
                        let Some(channel) = channel.as_deref() else { continue };
                        match pipeline.ingest_and_adjudicate(batch, channel, None).await {
                            Ok(out) => tracing::info!(
                                status = ?out.ingest.status,
                                critical = out.ingest.critical_count,
                                bin_id = out.ingest.bin_id.as_deref().unwrap_or("-"),
                                "Ingested batch"
                            ),
                            Err(e) => tracing::warn!(error = %e, "Batch ingestion failed"),
                        }
                    }
                }
            }
            tracing::info!("Shutting down");
            pipeline.shutdown().await;
        }
        Commands::Leaderboard { top } => {
            let config = Config::load(cli.config.as_deref())?;
            if config.ledger.journal_path.is_none() {
                anyhow::bail!("Leaderboard needs ledger.journal_path in config");
            }
            let ledger = review_tunnel::rewards::RewardLedger::open(&config.ledger)?;
            for (rank, agent) in ledger.get_leaderboard(top).iter().enumerate() {
                println!("{:>3}. {:<32} {:>8}", rank + 1, agent.agent_id, agent.total_tokens);
            }
        }
    }
    Ok(())
}

/// Batches buffered between the stdin reader and the daemon loop.
const INGEST_QUEUE: usize = 64;

/// One suggestion object or an array of them.
fn parse_suggestions(raw: &str) -> Result<Vec<Suggestion>> {
    let parsed: Vec<RawSuggestion> = if raw.trim_start().starts_with('[') {
        serde_json::from_str(raw)?
    } else {
        vec![serde_json::from_str(raw)?]
    };
    Ok(parsed
        .into_iter()
        .map(Suggestion::try_from)
        .collect::<Result<Vec<_>, _>>()?)
}

/// Read stdin on a plain thread and forward each parsed line. Bad lines
/// are logged and skipped; EOF closes the queue.
fn spawn_stdin_reader(tx: tokio::sync::mpsc::Sender<Vec<Suggestion>>) {
    std::thread::spawn(move || {
        for (lineno, line) in std::io::stdin().lines().enumerate() {
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    tracing::warn!(error = %e, "Stopped reading stdin");
                    break;
                }
            };
            if line.trim().is_empty() {
                continue;
            }
            match parse_suggestions(&line) {
                Ok(batch) => {
                    if tx.blocking_send(batch).is_err() {
                        break;
                    }
                }
                Err(e) => tracing::warn!(line = lineno + 1, error = %e, "Skipping bad input line"),
            }
        }
        tracing::debug!("Stdin closed");
    });
}

fn classifier(config: &Config) -> Arc<dyn ExternalClassifier> {
    match HostedClassifier::from_config(&config.classifier) {
        Some(hosted) => Arc::new(hosted),
        None => {
            tracing::warn!(
                env = review_tunnel::config::API_KEY_ENV,
                "No classifier API key; examinations will be degraded"
            );
            Arc::new(UnconfiguredClassifier)
        }
    }
}
