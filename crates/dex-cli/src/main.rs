//! DEX CLI - Command-line interface
//!
//! Usage:
//!   dex extract <text>
//!   dex batch <file> --mode auto
//!   dex classify <text>
//!   dex presets
//!   dex merge legal code

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use dex_core::config::{AppConfig, LoggingConfig};
use dex_core::{BatchExtractionResult, DexError, ErrorReport};
use dex_extractor::{AutoDomainOptions, ExtractOptions, ExtractionPipeline, ExtractionTypes};

#[derive(Parser)]
#[command(name = "dex")]
#[command(about = "Domain-aware entity and relation extraction")]
#[command(version)]
struct Cli {
    /// Configuration file (TOML); environment variables override it
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Args, Clone, Copy)]
struct OutputFlags {
    /// Leave confidence scores out
    #[arg(long)]
    no_confidence: bool,

    /// Leave character spans out
    #[arg(long)]
    no_spans: bool,
}

impl From<OutputFlags> for ExtractOptions {
    fn from(flags: OutputFlags) -> Self {
        Self {
            include_confidence: !flags.no_confidence,
            include_spans: !flags.no_spans,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Extract entities and relations from one text
    Extract {
        text: String,

        /// Entity types to extract (comma separated); defaults from presets
        #[arg(long, value_delimiter = ',')]
        entity_types: Option<Vec<String>>,

        /// Skip relation extraction
        #[arg(long)]
        no_relations: bool,

        /// Keep only items at or above the configured confidence threshold
        #[arg(long)]
        high_confidence: bool,

        #[command(flatten)]
        output: OutputFlags,
    },
    /// Extract from every non-empty line of a file
    Batch {
        file: PathBuf,

        #[arg(long, value_enum, default_value_t = BatchMode::Auto)]
        mode: BatchMode,

        #[arg(long)]
        batch_size: Option<usize>,

        /// Domain detection threshold (auto mode)
        #[arg(long)]
        threshold: Option<f32>,

        /// Domains merged per text (auto mode)
        #[arg(long)]
        max_domains: Option<usize>,

        #[command(flatten)]
        output: OutputFlags,
    },
    /// Detect the domains of a text, or of every line of a file
    Classify {
        #[arg(required_unless_present = "file")]
        text: Option<String>,

        #[arg(long, conflicts_with = "text")]
        file: Option<PathBuf>,

        #[arg(long)]
        threshold: Option<f32>,

        /// Texts per classification call
        #[arg(long, default_value_t = 64)]
        group_size: usize,
    },
    /// Show the loaded domain presets
    Presets,
    /// Show the merged entity/relation types of some domains
    Merge {
        #[arg(required = true)]
        domains: Vec<String>,
    },
    /// Show the effective configuration
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum BatchMode {
    /// Default entity/relation types for every text
    Fixed,
    /// Every domain's types, no classification
    All,
    /// Classify, then group texts by detected domains
    Auto,
}

fn load_config(path: Option<&Path>) -> anyhow::Result<AppConfig> {
    let config = match path {
        Some(path) => AppConfig::from_file(path)?.with_env_override()?,
        None => AppConfig::from_env()?,
    };
    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "dex={0},dex_core={0},dex_extractor={0}",
            logging.level
        )
        .into()
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_file(logging.include_location)
        .with_line_number(logging.include_location);

    if logging.json_format {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn read_lines(path: &Path) -> anyhow::Result<Vec<String>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(String::from)
        .collect())
}

fn print_json<T: Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn run(cli: Cli, config: AppConfig) -> anyhow::Result<()> {
    let pipeline = ExtractionPipeline::from_config(&config);
    let processing = &config.processing;

    match cli.command {
        Commands::Extract {
            text,
            entity_types,
            no_relations,
            high_confidence,
            output,
        } => {
            let mut types = ExtractionTypes {
                entity_types,
                relation_types: None,
            };
            if no_relations {
                types = types.with_relations(Default::default());
            }

            let result = pipeline.extract_one(&text, &types, output.into()).await?;
            let result = if high_confidence {
                result.filtered_by_confidence(processing.confidence_threshold)
            } else {
                result
            };
            print_json(&result)?;
        }
        Commands::Batch {
            file,
            mode,
            batch_size,
            threshold,
            max_domains,
            output,
        } => {
            let texts = read_lines(&file)?;
            let batch_size = batch_size.unwrap_or(processing.batch_size);
            let options = ExtractOptions::from(output);
            let start = Instant::now();

            let results = match mode {
                BatchMode::Fixed => {
                    pipeline
                        .extract_batch(&texts, &ExtractionTypes::defaults(), batch_size, options)
                        .await?
                }
                BatchMode::All => {
                    pipeline
                        .extract_batch_all_domains(&texts, batch_size, options)
                        .await?
                }
                BatchMode::Auto => {
                    let auto = AutoDomainOptions {
                        batch_size,
                        domain_threshold: threshold.unwrap_or(processing.domain_threshold),
                        max_domains: max_domains.unwrap_or(processing.max_domains),
                    };
                    pipeline
                        .extract_batch_auto_domains(&texts, auto, options)
                        .await?
                }
            };

            print_json(&BatchExtractionResult {
                texts_processed: results.len(),
                results,
                total_processing_time_ms: start.elapsed().as_secs_f64() * 1000.0,
            })?;
        }
        Commands::Classify {
            text,
            file,
            threshold,
            group_size,
        } => {
            let threshold = threshold.unwrap_or(processing.domain_threshold);
            match (text, file) {
                (_, Some(file)) => {
                    let texts = read_lines(&file)?;
                    print_json(&pipeline.classify_batch(&texts, threshold, group_size).await)?;
                }
                (Some(text), None) => {
                    print_json(&pipeline.classify_one(&text, threshold).await)?;
                }
                (None, None) => anyhow::bail!("Either a text or --file is required"),
            }
        }
        Commands::Presets => {
            let snapshot = pipeline.presets().snapshot().await;
            print_json(snapshot.as_ref())?;
        }
        Commands::Merge { domains } => {
            print_json(&pipeline.merge_presets(domains.as_slice()).await)?;
        }
        Commands::Config => {
            print_json(&config)?;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    init_tracing(&config.logging);

    if let Err(e) = run(cli, config).await {
        if let Some(err) = e.downcast_ref::<DexError>() {
            eprintln!("{}", serde_json::to_string(&ErrorReport::from(err))?);
            std::process::exit(1);
        }
        return Err(e);
    }

    Ok(())
}
