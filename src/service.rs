//! Reader service facade
//!
//! Wires storage, the judge, the rating orchestrator, feedback capture and
//! the refiner together behind the operations the ingestion side, the UI and
//! the scheduler call.

use crate::config::ReaderConfig;
use crate::error::{ReaderError, Result};
use crate::feedback::FeedbackCapture;
use crate::judge::prompts::DEFAULT_CRITERIA;
use crate::judge::Judge;
use crate::rating::{
    median, percentile, Comparator, OpponentSelector, RatingOrchestrator, RoundReport,
};
use crate::refiner::{GenerationRefiner, RefinementOutcome};
use crate::scheduler::{RefinementJob, Schedule};
use crate::storage::{ConnectionMode, LibsqlStorage, ReaderStorage};
use crate::types::{
    Article, ArticleId, Comparison, FeedbackItem, Generation, GenerationFilter, GenerationId,
    NewArticle, ThumbsRating,
};
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Inbox listing options
#[derive(Debug, Clone, Default)]
pub struct InboxQuery {
    /// Include articles below the median rating
    pub show_all: bool,
    /// Restrict to articles rated under these generations (`None` = any)
    pub generations: Option<Vec<GenerationId>>,
    pub limit: Option<usize>,
}

/// Confident article with its place in the population
#[derive(Debug, Clone, Serialize)]
pub struct RankedArticle {
    pub article: Article,
    pub percentile: f64,
}

pub struct ReaderService {
    config: ReaderConfig,
    storage: Arc<dyn ReaderStorage>,
    orchestrator: Arc<RatingOrchestrator>,
    capture: FeedbackCapture,
    refiner: Arc<GenerationRefiner>,
}

impl ReaderService {
    /// Open the configured database and seed the default criteria if needed.
    ///
    /// The database file must exist unless `create_if_missing` is set.
    pub async fn open(
        config: ReaderConfig,
        judge: Arc<dyn Judge>,
        create_if_missing: bool,
    ) -> Result<Self> {
        let mode = ConnectionMode::from_path(&config.database.path);
        let storage = LibsqlStorage::new_with_validation(mode, create_if_missing).await?;
        Self::with_storage(config, Arc::new(storage), judge).await
    }

    pub async fn with_storage(
        config: ReaderConfig,
        storage: Arc<dyn ReaderStorage>,
        judge: Arc<dyn Judge>,
    ) -> Result<Self> {
        config.validate()?;

        let seed = storage.seed_generation(DEFAULT_CRITERIA).await?;
        debug!("Active generation {} (judge: {})", seed.id, judge.name());

        let rating = &config.rating;
        let comparator = Comparator::new(judge.clone(), rating.preview_chars, rating.judge_timeout);
        let orchestrator = RatingOrchestrator::new(
            storage.clone(),
            comparator,
            OpponentSelector::new(rating.opponents_per_round),
            rating.k_factor,
            rating.confidence_threshold,
        );
        let capture = FeedbackCapture::new(
            storage.clone(),
            judge.clone(),
            rating.preview_chars,
            rating.judge_timeout,
        );
        let refiner = GenerationRefiner::new(
            storage.clone(),
            judge,
            config.refinement.window,
            config.refinement.min_criteria_chars,
        );

        Ok(Self {
            config,
            storage,
            orchestrator: Arc::new(orchestrator),
            capture,
            refiner: Arc::new(refiner),
        })
    }

    pub fn config(&self) -> &ReaderConfig {
        &self.config
    }

    pub fn storage(&self) -> Arc<dyn ReaderStorage> {
        self.storage.clone()
    }

    pub fn refiner(&self) -> Arc<GenerationRefiner> {
        self.refiner.clone()
    }

    /// Store an article and start its rating round in the background.
    ///
    /// The id is available as soon as the article is stored; the handle
    /// resolves to the round report.
    pub async fn ingest(
        &self,
        article: NewArticle,
    ) -> Result<(ArticleId, JoinHandle<Result<RoundReport>>)> {
        let id = self.storage.insert_article(&article).await?;
        info!("Ingested article {} from {}", id, article.source);

        let orchestrator = self.orchestrator.clone();
        let handle = tokio::spawn(async move { orchestrator.rate_article(id).await });
        Ok((id, handle))
    }

    /// Store an article and wait for its rating round
    pub async fn ingest_and_rate(&self, article: NewArticle) -> Result<RoundReport> {
        let id = self.storage.insert_article(&article).await?;
        info!("Ingested article {} from {}", id, article.source);
        self.orchestrator.rate_article(id).await
    }

    /// Run (or resume) the rating round of one article
    pub async fn rate_article(&self, id: ArticleId) -> Result<RoundReport> {
        self.orchestrator.rate_article(id).await
    }

    /// Rate every article without comparisons, oldest first.
    ///
    /// A failed round is logged and does not stop the others.
    pub async fn rate_pending(&self) -> Result<Vec<RoundReport>> {
        let pending = self.storage.unrated_articles().await?;
        info!("{} articles waiting for a rating round", pending.len());

        let mut reports = Vec::with_capacity(pending.len());
        for article in pending {
            match self.orchestrator.rate_article(article.id).await {
                Ok(report) => reports.push(report),
                Err(e) => warn!("Rating round for article {} failed: {}", article.id, e),
            }
        }
        Ok(reports)
    }

    pub async fn get_article(&self, id: ArticleId) -> Result<Article> {
        self.storage.get_article(id).await
    }

    pub async fn list_articles(&self, limit: usize) -> Result<Vec<Article>> {
        self.storage.list_articles(limit).await
    }

    pub async fn delete_article(&self, id: ArticleId) -> Result<()> {
        self.storage.delete_article(id).await
    }

    pub async fn record_thumbs(&self, id: ArticleId, rating: ThumbsRating) -> Result<()> {
        self.capture.record_thumbs(id, rating).await
    }

    /// Record detailed feedback, characterizing the article when possible
    pub async fn record_feedback(&self, id: ArticleId, text: &str) -> Result<FeedbackItem> {
        self.capture.capture_feedback(id, text).await
    }

    pub async fn article_feedback(&self, id: ArticleId) -> Result<Vec<FeedbackItem>> {
        self.storage.get_article(id).await?;
        self.capture.store().for_article(id).await
    }

    /// Confident articles matching `filter`, highest rating first
    pub async fn confident_articles(&self, filter: &GenerationFilter) -> Result<Vec<Article>> {
        self.storage.confident_articles(filter).await
    }

    /// Percentile of `rating` among all confident articles
    pub async fn percentile_for(&self, rating: f64) -> Result<f64> {
        let population = self.storage.confident_ratings().await?;
        Ok(percentile(rating, &population))
    }

    pub async fn article_percentile(&self, id: ArticleId) -> Result<f64> {
        let article = self.storage.get_article(id).await?;
        self.percentile_for(article.elo_rating).await
    }

    /// Confident articles ranked for reading.
    ///
    /// Unless `show_all` is set only articles rated at or above the median of
    /// the confident population are kept.
    pub async fn inbox(&self, query: &InboxQuery) -> Result<Vec<RankedArticle>> {
        let filter = match &query.generations {
            Some(generations) => GenerationFilter::In(generations.clone()),
            None => GenerationFilter::Any,
        };
        let population = self.storage.confident_ratings().await?;
        let mut articles = self.storage.confident_articles(&filter).await?;

        if !query.show_all {
            if let Some(cutoff) = median(&population) {
                articles.retain(|article| article.elo_rating >= cutoff);
            }
        }
        if let Some(limit) = query.limit {
            articles.truncate(limit);
        }

        Ok(articles
            .into_iter()
            .map(|article| RankedArticle {
                percentile: percentile(article.elo_rating, &population),
                article,
            })
            .collect())
    }

    /// Comparisons of an article, oldest first
    pub async fn comparison_history(&self, id: ArticleId) -> Result<Vec<Comparison>> {
        self.storage.get_article(id).await?;
        self.storage.comparisons_for_article(id).await
    }

    pub async fn active_generation(&self) -> Result<Generation> {
        self.storage
            .active_generation()
            .await?
            .ok_or(ReaderError::NoActiveGeneration)
    }

    /// All generations, newest first
    pub async fn generation_history(&self) -> Result<Vec<Generation>> {
        self.storage.list_generations().await
    }

    /// Feedback consumed by a generation
    pub async fn generation_feedback(&self, id: GenerationId) -> Result<Vec<FeedbackItem>> {
        self.storage.get_generation(id).await?;
        self.capture.store().for_generation(id).await
    }

    /// Run one refinement cycle now
    pub async fn refine_now(&self) -> Result<RefinementOutcome> {
        self.refiner.run_cycle().await
    }

    /// The refinement cycle as a job for [`crate::scheduler::BackgroundScheduler`]
    pub fn refinement_job(&self) -> RefinementJob {
        let refinement = &self.config.refinement;
        let schedule = if refinement.align_to_midnight {
            Schedule::DailyAtMidnightUtc
        } else {
            Schedule::Every(refinement.interval)
        };
        RefinementJob::new(self.refiner.clone(), schedule, refinement.max_duration)
    }
}
