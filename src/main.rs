//! Marginalia command line
//!
//! Segments articles, renders annotation overlays as markup and drives
//! insight generation streams against a reader backend.

use anyhow::Context;
use clap::{Parser, Subcommand};
use marginalia_core::{
    config::ENV_LOG,
    services::{ApiClient, GenerationStatus, InsightGeneration, InsightRequest},
    stream::{
        Completion, Notification, NotificationSubscriber, StreamClient, StreamFailure, StreamHandler,
    },
    AnalysisReport, InsightHistoryItem, LensResult, ReaderConfig, ReadingSession,
};
use serde::de::DeserializeOwned;
use std::io::Write;
use std::path::{Path, PathBuf};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "marginalia")]
#[command(about = "Sentence anchoring, annotation overlays and streamed insights", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log level (overrides config and MARGINALIA_LOG)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long, env = "MARGINALIA_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Split an article into numbered paragraphs and sentences
    Segment {
        /// Article text file
        file: PathBuf,

        /// Print paragraphs as JSON
        #[arg(long)]
        json: bool,
    },

    /// Render an article with annotation overlays as markup
    Annotate {
        /// Article text file
        file: PathBuf,

        /// Analysis report JSON (concept and argument sparks)
        #[arg(long)]
        report: Option<PathBuf>,

        /// Thinking lens result JSON (repeatable)
        #[arg(long)]
        lens: Vec<PathBuf>,

        /// Insight history JSON array to replay
        #[arg(long)]
        history: Option<PathBuf>,

        /// One indicator per sentence instead of wrapping spark text
        #[arg(long)]
        aggregate: bool,
    },

    /// Fetch an article's analysis report from the backend
    Report {
        /// Article id
        article_id: i64,
    },

    /// Stream an insight for a request body
    Generate {
        /// Request body JSON (selected_text, context, intent, ...)
        #[arg(long)]
        body: PathBuf,

        /// Endpoint path, defaults to stream.generate_path
        #[arg(long)]
        path: Option<String>,
    },

    /// Follow analysis notifications until an article completes
    Watch {
        /// Article id
        article_id: i64,

        /// User id for the notification channel
        #[arg(long)]
        user_id: i64,

        /// Article text file; once analysis completes its report is
        /// fetched and rendered over this text
        #[arg(long)]
        article: Option<PathBuf>,
    },
}

fn load_config(path: Option<&Path>) -> anyhow::Result<ReaderConfig> {
    let mut config = match path {
        Some(path) => ReaderConfig::from_file(path)
            .with_context(|| format!("loading config from {}", path.display()))?,
        None => ReaderConfig::default(),
    };
    config.apply_env_overrides();
    config.validate()?;
    Ok(config)
}

fn read_json<T: DeserializeOwned>(path: &Path) -> anyhow::Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("parsing {}", path.display()))
}

/// Echoes deltas to stdout while accumulating the insight
struct Printer {
    generation: InsightGeneration,
}

impl StreamHandler for Printer {
    fn on_start(&mut self, request_id: Option<&str>) {
        debug!(request_id = request_id.unwrap_or("-"), "Generation started");
        self.generation.on_start(request_id);
    }

    fn on_delta(&mut self, content: &str) {
        print!("{}", content);
        let _ = std::io::stdout().flush();
        self.generation.on_delta(content);
    }

    fn on_reasoning(&mut self, content: &str) {
        self.generation.on_reasoning(content);
    }

    fn on_complete(&mut self, completion: &Completion) {
        println!();
        self.generation.on_complete(completion);
    }

    fn on_error(&mut self, failure: &StreamFailure) {
        eprintln!("\nGeneration failed: {}", failure);
        self.generation.on_error(failure);
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    // RUST_LOG wins, then --log-level, then MARGINALIA_LOG / config
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let directive = cli
            .log_level
            .as_deref()
            .map(|level| format!("marginalia={level},marginalia_core={level}"))
            .unwrap_or_else(|| config.logging.filter.clone());
        EnvFilter::new(directive)
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!(
        "Marginalia v{} starting ({} = {:?})",
        env!("CARGO_PKG_VERSION"),
        ENV_LOG,
        config.logging.filter
    );

    match cli.command {
        Commands::Segment { file, json } => {
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;
            let paragraphs = marginalia_core::segment(&text);
            if json {
                println!("{}", serde_json::to_string_pretty(&paragraphs)?);
            } else {
                for paragraph in &paragraphs {
                    for sentence in &paragraph.sentences {
                        println!("[{}.{}] {}", paragraph.index, sentence.index, sentence.text);
                    }
                }
            }
        }

        Commands::Annotate {
            file,
            report,
            lens,
            history,
            aggregate,
        } => {
            let mut config = config;
            config.overlay.aggregate_sparks |= aggregate;
            let text = std::fs::read_to_string(&file)
                .with_context(|| format!("reading {}", file.display()))?;

            let mut session = ReadingSession::new(config);
            session.load_article(&text)?;

            if let Some(path) = report {
                let report: AnalysisReport = read_json(&path)?;
                let outcome = session.apply_report(&report)?;
                for (key, applied) in &outcome.layers {
                    info!(
                        layer = %key,
                        applied = applied.applied_count(),
                        skipped = applied.skipped_count(),
                        "Layer applied"
                    );
                }
                if outcome.indicators > 0 {
                    info!(indicators = outcome.indicators, "Indicators applied");
                }
            }
            for path in &lens {
                let result: LensResult = read_json(path)?;
                if let Some(applied) = session.toggle_lens(&result)? {
                    info!(
                        lens = %result.lens_type,
                        applied = applied.applied_count(),
                        skipped = applied.skipped_count(),
                        "Lens applied"
                    );
                }
            }
            if let Some(path) = history {
                let items: Vec<InsightHistoryItem> = read_json(&path)?;
                let applied = session.show_replay(&items)?;
                info!(
                    applied = applied.applied_count(),
                    skipped = applied.skipped_count(),
                    "Replay applied"
                );
            }

            println!("{}", session.document().to_markup());
        }

        Commands::Report { article_id } => {
            let api = ApiClient::new(&config)?;
            let report = api.analysis_report(article_id).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }

        Commands::Generate { body, path } => {
            let request: InsightRequest = read_json(&body)?;
            let path = path.unwrap_or_else(|| config.stream.generate_path.clone());
            let client = StreamClient::new(&config)?;

            let mut printer = Printer {
                generation: InsightGeneration::new(),
            };
            let state = client.stream(&path, &request, &mut printer).await;
            info!(state = ?state, "Stream finished");

            if printer.generation.status != GenerationStatus::Done {
                anyhow::bail!(
                    "generation did not complete: {}",
                    printer.generation.error.as_deref().unwrap_or("no error reported")
                );
            }
        }

        Commands::Watch {
            article_id,
            user_id,
            article,
        } => {
            let mut session = match article {
                Some(path) => {
                    let text = std::fs::read_to_string(&path)
                        .with_context(|| format!("reading {}", path.display()))?;
                    let mut session = ReadingSession::new(config.clone());
                    session.load_article(&text)?;
                    Some(session)
                }
                None => None,
            };

            let subscriber = NotificationSubscriber::new(&config, user_id);
            let mut watch = subscriber.watch(article_id);
            let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
            let runner = tokio::spawn(subscriber.run(shutdown_rx));

            let mut completed = false;
            while let Some(notification) = watch.next().await {
                println!("{}", serde_json::to_string(&notification)?);
                if matches!(notification, Notification::AnalysisComplete { .. }) {
                    completed = true;
                    break;
                }
            }

            if let (true, Some(session)) = (completed, session.as_mut()) {
                let api = ApiClient::new(&config)?;
                let outcome = session.fetch_report(&api, article_id).await?;
                println!("{}", session.document().to_markup());
                println!(
                    "sparks: {} (layers: {}, indicators: {})",
                    session.report().map_or(0, |report| report.spark_count()),
                    outcome.layers.len(),
                    outcome.indicators
                );
            } else if !completed {
                warn!(article_id, "Notification feed closed before analysis completed");
            }

            let _ = shutdown_tx.send(());
            match runner.await? {
                Ok(()) => {}
                Err(e) => warn!(error = %e, "Notification channel ended with error"),
            }
        }
    }

    Ok(())
}
