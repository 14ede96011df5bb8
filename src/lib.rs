//! nerd-reader - Elo-based article relevance ranking
//!
//! Every ingested article is placed on a shared Elo scale by asking an LLM
//! judge which of two articles better matches the current relevance
//! criteria. Reader feedback is folded back into those criteria once a day,
//! producing a new immutable criteria generation.
//!
//! # Architecture
//!
//! - **Types**: articles, comparisons, generations, feedback
//! - **Storage**: libSQL persistence behind [`ReaderStorage`]
//! - **Judge**: LLM capability behind [`Judge`] (Anthropic or Ollama)
//! - **Rating**: Elo arithmetic, opponent selection, rating rounds
//! - **Feedback** / **Refiner**: reader input and criteria refinement
//! - **Scheduler**: the daily refinement job
//!
//! # Example
//!
//! ```ignore
//! use reader_core::{LlmJudge, NewArticle, ReaderConfig, ReaderService};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> reader_core::Result<()> {
//!     let config = ReaderConfig::load(None)?;
//!     let judge = Arc::new(LlmJudge::new(&config.llm)?);
//!     let service = ReaderService::open(config, judge, true).await?;
//!
//!     let report = service
//!         .ingest_and_rate(NewArticle::new("hn", "Writing a B-tree", "..."))
//!         .await?;
//!     println!("rated {:.0}", report.final_rating);
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod error;
pub mod feedback;
pub mod judge;
pub mod rating;
pub mod refiner;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod types;

// Re-export commonly used types
pub use config::ReaderConfig;
pub use error::{JudgeError, ReaderError, Result};
pub use feedback::{FeedbackCapture, FeedbackStore};
pub use judge::{Judge, LlmBackend, LlmJudge};
pub use rating::{RatingOrchestrator, RoundReport};
pub use refiner::{GenerationRefiner, RefinementOutcome};
pub use scheduler::{BackgroundScheduler, RefinementJob, Schedule, ScheduledJob};
pub use service::{InboxQuery, RankedArticle, ReaderService};
pub use storage::{ConnectionMode, LibsqlStorage, ReaderStorage};
pub use types::{
    Article, ArticleId, ArticlePayload, Characterization, Comparison, FeedbackItem, Generation,
    GenerationFilter, GenerationId, Judgment, NewArticle, Outcome, ThumbsRating,
};
