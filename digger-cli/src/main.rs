use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use digger_core::{DiggerConfig, SchemaDigger};
use digger_extract::{extract_fields, ExtractionStrategy};
use digger_store::snapshot;
use digger_types::{RequestBody, TrafficEvent};

#[derive(Parser)]
#[command(name = "digger", about = "Infer a query-language schema from captured traffic")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Feed newline-delimited traffic events and print the resulting schema.
    Ingest {
        /// JSONL file of events, or `-` for stdin.
        events: PathBuf,
        /// Registry snapshot to load before and save after ingesting.
        #[arg(long)]
        state: Option<PathBuf>,
        #[arg(long)]
        strategy: Option<ExtractionStrategy>,
        /// Print only this origin.
        #[arg(long)]
        origin: Option<String>,
    },
    /// Print the fields referenced by operation text.
    Extract {
        input: Option<PathBuf>,
        #[arg(long, default_value_t = ExtractionStrategy::TokenSweep)]
        strategy: ExtractionStrategy,
    },
    /// Show how one request body would be classified.
    Classify {
        url: String,
        input: Option<PathBuf>,
        #[arg(long, default_value = "POST")]
        method: String,
    },
}

#[derive(Debug, Default, PartialEq, Eq)]
struct IngestStats {
    recorded: usize,
    ignored: usize,
    malformed: usize,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "warn,digger_cli=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let mut cfg = DiggerConfig::from_env()?;

    match cli.command {
        Command::Ingest {
            events,
            state,
            strategy,
            origin,
        } => {
            if let Some(strategy) = strategy {
                cfg.extraction = strategy;
            }
            let digger = SchemaDigger::from_config(&cfg);
            if let Some(path) = &state {
                digger.aggregator().restore(snapshot::load(path)?);
            }

            let reader = BufReader::new(open_input(Some(events.as_path()))?);
            let stats = ingest_events(&digger, reader)?;
            info!(
                recorded = stats.recorded,
                ignored = stats.ignored,
                malformed = stats.malformed,
                "ingest finished"
            );

            if let Some(path) = &state {
                snapshot::save(path, &digger.registry())?;
            }
            let out = match origin {
                Some(origin) => serde_json::to_string_pretty(&digger.get_schema(&origin))?,
                None => serde_json::to_string_pretty(&digger.registry())?,
            };
            println!("{out}");
        }
        Command::Extract { input, strategy } => {
            let text = read_input(input.as_deref())?;
            for field in extract_fields(&text, strategy) {
                println!("{field}");
            }
        }
        Command::Classify { url, input, method } => {
            let body = RequestBody::Text(read_input(input.as_deref())?);
            let digger = SchemaDigger::from_config(&cfg);
            match digger.classifier().try_classify(&method, &body) {
                Ok(record) => println!("{}", serde_json::to_string_pretty(&record)?),
                Err(reason) => println!("not an operation ({url}): {reason}"),
            }
        }
    }

    Ok(())
}

/// Feed every line of `reader` through the digger. Blank lines are skipped and
/// lines that are not events are counted, never fatal.
fn ingest_events(digger: &SchemaDigger, reader: impl BufRead) -> anyhow::Result<IngestStats> {
    let mut stats = IngestStats::default();
    for (idx, line) in reader.lines().enumerate() {
        let line = line.with_context(|| format!("reading line {}", idx + 1))?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<TrafficEvent>(&line) {
            Ok(event) => {
                if digger.observe(&event).is_recorded() {
                    stats.recorded += 1;
                } else {
                    stats.ignored += 1;
                }
            }
            Err(e) => {
                warn!(line = idx + 1, "skipping malformed event: {e}");
                stats.malformed += 1;
            }
        }
    }
    Ok(stats)
}

fn open_input(path: Option<&Path>) -> anyhow::Result<Box<dyn Read>> {
    match path {
        None => Ok(Box::new(std::io::stdin())),
        Some(p) if p == Path::new("-") => Ok(Box::new(std::io::stdin())),
        Some(p) => {
            let file = std::fs::File::open(p).with_context(|| format!("opening {}", p.display()))?;
            Ok(Box::new(file))
        }
    }
}

fn read_input(path: Option<&Path>) -> anyhow::Result<String> {
    let mut text = String::new();
    open_input(path)?.read_to_string(&mut text)?;
    Ok(text)
}
