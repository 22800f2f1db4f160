//! ots-engine - OpenTimestamps stamping, upgrading and verification

use anyhow::Context;
use clap::{Parser, Subcommand};
use ots_engine::config::split_urls;
use ots_engine::{codec, commitment, OtsConfig, ProofOrchestrator, TimestampRecord, TimestampState};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "ots-engine")]
#[command(about = "OpenTimestamps proof engine: stamp, upgrade and verify files")]
struct Args {
    /// Comma-separated list of calendar URLs (overrides `OTS_CALENDAR_URLS`)
    #[arg(long, global = true)]
    calendars: Option<String>,

    /// Comma-separated list of Esplora explorer URLs, tried in order
    /// (overrides `OTS_EXPLORER_URLS`)
    #[arg(long, global = true)]
    explorers: Option<String>,

    /// Timeout per network request in seconds (overrides `OTS_TIMEOUT_SECS`)
    #[arg(long, global = true)]
    timeout_secs: Option<u64>,

    /// Log level
    #[arg(long, env = "OTS_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Submit a file's hash to the calendars and write `<file>.ots`
    Stamp {
        file: PathBuf,

        /// Keep the answers of every calendar in the proof
        #[arg(long)]
        redundant: bool,
    },

    /// Replace a pending proof with a Bitcoin-attested one when available
    Upgrade {
        file: PathBuf,

        /// Proof path (default: `<file>.ots`)
        #[arg(long)]
        proof: Option<PathBuf>,
    },

    /// Verify a proof against Bitcoin and print the result as JSON
    Verify {
        file: PathBuf,

        /// Proof path (default: `<file>.ots`)
        #[arg(long)]
        proof: Option<PathBuf>,
    },

    /// Print the contents of a proof
    Info { proof: PathBuf },
}

impl Args {
    /// Environment configuration with command-line flags applied on top
    fn config(&self) -> OtsConfig {
        let mut config = OtsConfig::from_env();
        if let Some(timeout_secs) = self.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        if let Some(urls) = &self.calendars {
            config.calendar_urls = split_urls(urls);
        }
        if let Some(urls) = &self.explorers {
            config.explorer_urls = split_urls(urls);
        }
        config
    }
}

fn default_proof_path(file: &Path) -> PathBuf {
    let mut path = file.as_os_str().to_owned();
    path.push(".ots");
    PathBuf::from(path)
}

fn read(path: &Path) -> anyhow::Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn write(path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
    std::fs::write(path, bytes).with_context(|| format!("failed to write {}", path.display()))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Parse CLI args
    let args = Args::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(&args.log_level))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = args.config();
    tracing::debug!(?config, "Loaded configuration");

    match args.command {
        Command::Stamp { file, redundant } => {
            let orchestrator = ProofOrchestrator::from_config(&config)?;
            let hash = commitment::hash_content(&read(&file)?);

            let record = if redundant {
                orchestrator.submit_redundant(hash).await?
            } else {
                orchestrator.submit_hash(hash).await?
            };

            let proof = record.proof.context("calendar returned no proof")?;
            let out = default_proof_path(&file);
            write(&out, &proof)?;

            println!("{}", out.display());
        }

        Command::Upgrade { file, proof } => {
            let orchestrator = ProofOrchestrator::from_config(&config)?;
            let proof_path = proof.unwrap_or_else(|| default_proof_path(&file));
            let hash = commitment::hash_content(&read(&file)?);
            let blob = read(&proof_path)?;
            let parsed = codec::parse(&blob).context("invalid proof")?;

            if parsed.is_complete() {
                println!("proof already complete");
                return Ok(());
            }

            let record = TimestampRecord {
                state: TimestampState::Submitted,
                calendar_url: parsed.pending_calendars().into_iter().next(),
                proof: Some(blob),
                ..TimestampRecord::new(hash)
            };

            let upgraded = orchestrator.check_and_upgrade(&record).await;

            if upgraded.state == TimestampState::Submitted {
                println!("pending: not yet anchored in Bitcoin");
                return Ok(());
            }

            if let Some(proof) = &upgraded.proof {
                write(&proof_path, proof)?;
            }
            println!("{}", serde_json::to_string_pretty(&upgraded)?);
        }

        Command::Verify { file, proof } => {
            let orchestrator = ProofOrchestrator::from_config(&config)?;
            let proof_path = proof.unwrap_or_else(|| default_proof_path(&file));
            let hash = commitment::hash_content(&read(&file)?);

            let report = orchestrator.verify_proof(&read(&proof_path)?, &hash).await;

            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Command::Info { proof } => {
            let parsed = codec::parse(&read(&proof)?).context("invalid proof")?;
            print!("{parsed}");
        }
    }

    Ok(())
}
