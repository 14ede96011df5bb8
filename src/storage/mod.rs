//! Storage layer for the rating core
//!
//! Persists articles with their rating state, the comparison audit trail,
//! criteria generations and reader feedback.

pub mod libsql;

use crate::error::Result;
use crate::types::{
    Article, ArticleId, Characterization, Comparison, FeedbackId, FeedbackItem, Generation,
    GenerationFilter, GenerationId, NewArticle, NewComparison, PoolEntry, ThumbsRating,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashSet;

pub use self::libsql::{ConnectionMode, LibsqlStorage};

/// Everything a refinement commit writes in one transaction
#[derive(Debug, Clone)]
pub struct GenerationCommit {
    /// Generation that must still be active when the commit lands
    pub expected_active: GenerationId,
    pub criteria_text: String,
    pub diff_from_previous: String,
    pub feedback_ids: Vec<FeedbackId>,
}

/// Storage backend trait defining all required operations
#[async_trait]
pub trait ReaderStorage: Send + Sync {
    /// Store a newly ingested article with default rating state
    async fn insert_article(&self, article: &NewArticle) -> Result<ArticleId>;

    async fn get_article(&self, id: ArticleId) -> Result<Article>;

    /// Delete an article together with its comparisons and feedback
    async fn delete_article(&self, id: ArticleId) -> Result<()>;

    /// Reset rating state and stamp the generation, only while the article
    /// has no comparisons. Returns whether the reset happened.
    async fn initialize_rating(&self, id: ArticleId, generation: GenerationId) -> Result<bool>;

    /// Every article that has entered rating: stamped with a generation or
    /// compared at least once
    async fn rated_pool(&self) -> Result<Vec<PoolEntry>>;

    /// Articles `id` already has a recorded comparison with
    async fn compared_opponents(&self, id: ArticleId) -> Result<HashSet<ArticleId>>;

    /// Persist a comparison and both new ratings atomically.
    ///
    /// Fails with `ConcurrentMutation` when the stored ratings no longer match
    /// the comparison's before-ratings.
    async fn apply_comparison(
        &self,
        comparison: &NewComparison,
        confidence_threshold: u32,
    ) -> Result<Comparison>;

    /// Set the confidence flag if the comparison count has reached `threshold`
    async fn mark_confident_if_stable(&self, id: ArticleId, threshold: u32) -> Result<bool>;

    /// Comparisons involving `id`, oldest first
    async fn comparisons_for_article(&self, id: ArticleId) -> Result<Vec<Comparison>>;

    /// Ratings of all confident articles
    async fn confident_ratings(&self) -> Result<Vec<f64>>;

    /// Confident articles matching the filter, highest rating first
    async fn confident_articles(&self, filter: &GenerationFilter) -> Result<Vec<Article>>;

    /// Articles without a single comparison yet, oldest first
    async fn unrated_articles(&self) -> Result<Vec<Article>>;

    /// All articles, highest rating first
    async fn list_articles(&self, limit: usize) -> Result<Vec<Article>>;

    async fn set_user_rating(&self, id: ArticleId, rating: ThumbsRating) -> Result<()>;

    async fn mark_rating_refined(&self, id: ArticleId) -> Result<()>;

    /// Create the first generation if none exists and return the active one
    async fn seed_generation(&self, criteria_text: &str) -> Result<Generation>;

    async fn active_generation(&self) -> Result<Option<Generation>>;

    async fn get_generation(&self, id: GenerationId) -> Result<Generation>;

    /// All generations, newest first
    async fn list_generations(&self) -> Result<Vec<Generation>>;

    /// Insert a generation, make it active and link the consumed feedback
    async fn commit_generation(&self, commit: &GenerationCommit) -> Result<Generation>;

    async fn insert_feedback(
        &self,
        article_id: ArticleId,
        characterization: Option<&Characterization>,
        text: &str,
    ) -> Result<FeedbackItem>;

    /// Unlinked feedback created at or after `since`, oldest first
    async fn unlinked_feedback_since(&self, since: DateTime<Utc>) -> Result<Vec<FeedbackItem>>;

    /// Link still-unlinked items to `generation`; returns how many changed
    async fn link_feedback(&self, ids: &[FeedbackId], generation: GenerationId) -> Result<u64>;

    async fn feedback_for_generation(&self, generation: GenerationId) -> Result<Vec<FeedbackItem>>;

    async fn feedback_for_article(&self, article_id: ArticleId) -> Result<Vec<FeedbackItem>>;
}
