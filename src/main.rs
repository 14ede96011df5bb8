//! nerd-reader - Elo-based article relevance ranking
//!
//! Command line entry point: ingest and rate articles, record reader
//! feedback, inspect rankings and criteria generations, and run the daily
//! criteria refinement.

use anyhow::{bail, Context};
use async_trait::async_trait;
use clap::{Parser, Subcommand, ValueEnum};
use reader_core::{
    error::JudgeError, ArticleId, ArticlePayload, BackgroundScheduler, Characterization,
    FeedbackItem, GenerationId, InboxQuery, Judge, Judgment, LlmJudge, NewArticle,
    ReaderConfig, ReaderService, RefinementJob, RefinementOutcome, Schedule, ScheduledJob,
    ThumbsRating,
};
use std::io::Read;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn, Level};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "nerd-reader")]
#[command(about = "Elo-based article ranking with self-refining relevance criteria", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Set log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Database path (overrides the configured path)
    #[arg(long, env = "READER_DB_PATH")]
    db_path: Option<String>,

    /// Configuration file (TOML)
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize database and seed the default criteria
    Init,

    /// Store an article and run its rating round
    Ingest {
        /// Article title
        #[arg(short, long)]
        title: String,

        /// Where the article came from (feed, newsletter, ...)
        #[arg(short, long)]
        source: String,

        /// Markdown file with the content (reads stdin if omitted)
        #[arg(short, long)]
        file: Option<PathBuf>,

        #[arg(long)]
        url: Option<String>,

        #[arg(long)]
        author: Option<String>,

        /// Output format (text/json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Run or resume a rating round
    Rate {
        /// Article to rate
        id: Option<i64>,

        /// Rate every article without comparisons
        #[arg(long, conflicts_with = "id")]
        pending: bool,
    },

    /// Record a thumbs rating
    Thumbs {
        id: i64,

        #[arg(value_enum)]
        rating: ThumbsArg,
    },

    /// Record detailed feedback on an article
    Feedback {
        id: i64,

        /// What you thought of the article
        text: String,
    },

    /// Show confident articles ranked by rating
    Inbox {
        /// Include articles below the median rating
        #[arg(short, long)]
        all: bool,

        /// Only articles rated under these generations
        #[arg(short, long)]
        generation: Vec<i64>,

        /// Maximum results
        #[arg(short = 'n', long)]
        limit: Option<usize>,

        /// Output format (text/json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// Percentile of an article or of a raw rating
    Percentile {
        id: Option<i64>,

        #[arg(long, conflicts_with = "id")]
        rating: Option<f64>,
    },

    /// Comparison history of an article
    History {
        id: i64,

        /// Output format (text/json)
        #[arg(long, default_value = "text")]
        format: String,
    },

    /// List criteria generations
    Generations {
        /// Print each generation's diff against its predecessor
        #[arg(long)]
        diff: bool,

        /// Show the feedback consumed by one generation
        #[arg(long)]
        feedback: Option<i64>,
    },

    /// Run one refinement cycle now
    Refine,

    /// Run the refinement scheduler until interrupted
    Schedule {
        /// Run every N seconds instead of at UTC midnight
        #[arg(long)]
        interval: Option<u64>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ThumbsArg {
    Up,
    Down,
    Clear,
}

impl From<ThumbsArg> for ThumbsRating {
    fn from(arg: ThumbsArg) -> Self {
        match arg {
            ThumbsArg::Up => ThumbsRating::Up,
            ThumbsArg::Down => ThumbsRating::Down,
            ThumbsArg::Clear => ThumbsRating::Unrated,
        }
    }
}

/// Stands in when no LLM backend is configured, so read-only commands
/// still work; every judge call fails as unavailable.
struct UnconfiguredJudge {
    reason: String,
}

#[async_trait]
impl Judge for UnconfiguredJudge {
    fn name(&self) -> &str {
        "unconfigured"
    }

    async fn compare(
        &self,
        _criteria: &str,
        _a: &ArticlePayload,
        _b: &ArticlePayload,
    ) -> Result<Judgment, JudgeError> {
        Err(JudgeError::Unavailable(self.reason.clone()))
    }

    async fn characterize(&self, _article: &ArticlePayload) -> Result<Characterization, JudgeError> {
        Err(JudgeError::Unavailable(self.reason.clone()))
    }

    async fn refine(&self, _criteria: &str, _feedback: &[FeedbackItem]) -> Result<String, JudgeError> {
        Err(JudgeError::Unavailable(self.reason.clone()))
    }
}

fn build_judge(config: &ReaderConfig) -> Arc<dyn Judge> {
    match LlmJudge::new(&config.llm) {
        Ok(judge) => {
            debug!("LLM judge initialized: {:?}", judge.backend());
            Arc::new(judge)
        }
        Err(e) => {
            debug!("LLM judge not configured: {}", e);
            Arc::new(UnconfiguredJudge {
                reason: format!("LLM judge not configured: {}", e),
            })
        }
    }
}

fn read_content(file: Option<PathBuf>) -> anyhow::Result<String> {
    match file {
        Some(path) => std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display())),
        None => {
            let mut content = String::new();
            std::io::stdin()
                .read_to_string(&mut content)
                .context("Failed to read article content from stdin")?;
            Ok(content)
        }
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let level = match cli.log_level.as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" => Level::WARN,
        "error" => Level::ERROR,
        _ => Level::INFO,
    };

    // Our crates at the requested level, HTTP and database internals quieter
    let filter = EnvFilter::new(format!(
        "reader_core={level},nerd_reader={level},hyper=warn,reqwest=warn,libsql=warn",
        level = level.as_str().to_lowercase()
    ));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    debug!("nerd-reader v{} starting...", env!("CARGO_PKG_VERSION"));

    let mut config =
        ReaderConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;
    if let Some(db_path) = cli.db_path {
        config.database.path = db_path;
    }
    debug!("Database path: {}", config.database.path);

    let judge = build_judge(&config);
    let create_if_missing = matches!(cli.command, Commands::Init);
    let service = ReaderService::open(config, judge, create_if_missing)
        .await
        .context("Failed to open reader database")?;

    match cli.command {
        Commands::Init => {
            let generation = service.active_generation().await?;
            println!("✓ Database initialized: {}", service.config().database.path);
            println!("  Active generation: {}", generation.id);
        }

        Commands::Ingest {
            title,
            source,
            file,
            url,
            author,
            format,
        } => {
            let content = read_content(file)?;
            if content.trim().is_empty() {
                bail!("Article content is empty");
            }
            let mut article = NewArticle::new(source, title, content);
            article.url = url;
            article.author = author;

            let report = service
                .ingest_and_rate(article)
                .await
                .context("Failed to ingest article")?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!("✓ Article {} stored", report.article_id);
                println!(
                    "  Rating: {:.1} after {} comparisons ({} skipped){}",
                    report.final_rating,
                    report.comparisons,
                    report.skipped.len(),
                    if report.confident { ", confident" } else { "" }
                );
            }
        }

        Commands::Rate { id, pending } => {
            if pending {
                let reports = service.rate_pending().await?;
                println!("Rated {} articles", reports.len());
                for report in reports {
                    println!(
                        "  {}: {:.1} ({} comparisons)",
                        report.article_id, report.final_rating, report.comparisons
                    );
                }
            } else {
                let Some(id) = id else {
                    bail!("Pass an article id or --pending");
                };
                let report = service.rate_article(ArticleId(id)).await?;
                println!(
                    "Article {}: {:.1} after {} comparisons ({} new, {} skipped)",
                    report.article_id,
                    report.final_rating,
                    report.comparisons,
                    report.completed,
                    report.skipped.len()
                );
                for skipped in &report.skipped {
                    println!("  skipped {}: {}", skipped.opponent, skipped.reason);
                }
            }
        }

        Commands::Thumbs { id, rating } => {
            service.record_thumbs(ArticleId(id), rating.into()).await?;
            println!("✓ Recorded rating for article {}", id);
        }

        Commands::Feedback { id, text } => {
            let item = service.record_feedback(ArticleId(id), &text).await?;
            println!("✓ Feedback {} recorded for article {}", item.id, id);
            match &item.characterization {
                Some(characterization) => println!("  {}", characterization),
                None => println!("  (stored without characterization)"),
            }
        }

        Commands::Inbox {
            all,
            generation,
            limit,
            format,
        } => {
            let query = InboxQuery {
                show_all: all,
                generations: if generation.is_empty() {
                    None
                } else {
                    Some(generation.into_iter().map(GenerationId).collect())
                },
                limit,
            };
            let ranked = service.inbox(&query).await?;

            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&ranked)?);
            } else if ranked.is_empty() {
                println!("No confident articles yet");
            } else {
                for (i, entry) in ranked.iter().enumerate() {
                    let article = &entry.article;
                    println!(
                        "{}. {} ({:.0}, p{:.0})",
                        i + 1,
                        article.title,
                        article.elo_rating,
                        entry.percentile
                    );
                    println!("   ID: {}  Source: {}", article.id, article.source);
                    if let Some(url) = &article.url {
                        println!("   {}", url);
                    }
                }
            }
        }

        Commands::Percentile { id, rating } => match (id, rating) {
            (Some(id), _) => {
                let article = service.get_article(ArticleId(id)).await?;
                let percentile = service.article_percentile(article.id).await?;
                println!(
                    "Article {} ({:.1}{}): {:.1}th percentile",
                    article.id,
                    article.elo_rating,
                    if article.elo_confidence { "" } else { ", not yet confident" },
                    percentile
                );
            }
            (None, Some(rating)) => {
                println!("{:.1}", service.percentile_for(rating).await?);
            }
            (None, None) => bail!("Pass an article id or --rating"),
        },

        Commands::History { id, format } => {
            let comparisons = service.comparison_history(ArticleId(id)).await?;
            if format == "json" {
                println!("{}", serde_json::to_string_pretty(&comparisons)?);
            } else if comparisons.is_empty() {
                println!("Article {} has no comparisons", id);
            } else {
                for comparison in &comparisons {
                    let opponent = if comparison.article_a_id == ArticleId(id) {
                        comparison.article_b_id
                    } else {
                        comparison.article_a_id
                    };
                    let (before, after) = comparison
                        .ratings_for(ArticleId(id))
                        .unwrap_or((f64::NAN, f64::NAN));
                    println!(
                        "{} vs {} [{}] {:.1} -> {:.1} (generation {})",
                        comparison.created_at.format("%Y-%m-%d %H:%M"),
                        opponent,
                        comparison.outcome,
                        before,
                        after,
                        comparison
                            .generation_id
                            .map(|g| g.to_string())
                            .unwrap_or_else(|| "-".to_string())
                    );
                    println!("   {}", preview(&comparison.rationale, 160));
                }
            }
        }

        Commands::Generations { diff, feedback } => {
            if let Some(generation) = feedback {
                let items = service.generation_feedback(GenerationId(generation)).await?;
                println!("Generation {} consumed {} feedback items", generation, items.len());
                for item in items {
                    println!("  #{} (article {}): {}", item.id, item.article_id, item.text);
                }
            } else {
                for generation in service.generation_history().await? {
                    println!(
                        "{}{} created {} from {} feedback items",
                        generation.id,
                        if generation.active { " (active)" } else { "" },
                        generation.created_at.format("%Y-%m-%d %H:%M"),
                        generation.feedback_count
                    );
                    println!("   {}", preview(&generation.criteria_text, 120));
                    if diff {
                        if let Some(text) = &generation.diff_from_previous {
                            println!("   {}", text);
                        }
                    }
                }
            }
        }

        Commands::Refine => match service.refine_now().await? {
            RefinementOutcome::NoOp => println!("No new feedback, criteria unchanged"),
            RefinementOutcome::NewGeneration(generation) => {
                println!(
                    "✓ Generation {} created from {} feedback items",
                    generation.id, generation.feedback_count
                );
                if let Some(diff) = &generation.diff_from_previous {
                    println!("  {}", diff);
                }
            }
        },

        Commands::Schedule { interval } => {
            if !service.config().refinement.enabled {
                warn!("Refinement is disabled in the configuration, nothing to schedule");
                return Ok(());
            }

            let job: Arc<dyn ScheduledJob> = match interval {
                Some(seconds) => {
                    let config = service
                        .config()
                        .clone()
                        .with_refinement_interval(Duration::from_secs(seconds))
                        .context("Invalid --interval")?;
                    Arc::new(RefinementJob::new(
                        service.refiner(),
                        Schedule::Every(config.refinement.interval),
                        config.refinement.max_duration,
                    ))
                }
                None => Arc::new(service.refinement_job()),
            };
            let mut scheduler = BackgroundScheduler::new().with_poll_interval(Duration::from_secs(1));
            scheduler.register_job(job);
            let scheduler = Arc::new(scheduler);

            let runner = scheduler.clone();
            let task = tokio::spawn(async move { runner.start().await });

            tokio::signal::ctrl_c()
                .await
                .context("Failed to listen for shutdown signal")?;
            info!("Received shutdown signal, stopping scheduler...");
            scheduler.stop();
            if let Err(e) = task.await? {
                warn!("Scheduler stopped with error: {}", e);
            }

            for run in scheduler.get_job_history(None, 10) {
                println!("{} {} {:?}", run.started_at.format("%Y-%m-%d %H:%M"), run.job_name, run.status);
            }
        }
    }

    Ok(())
}
