//! Rating rounds
//!
//! A round takes one article through its comparisons against the selected
//! opponents, one at a time. The judge is called without any lock held; the
//! rating update then happens under both articles' locks against freshly
//! read ratings and is persisted in a single transaction.

use crate::error::{ReaderError, Result};
use crate::rating::comparator::Comparator;
use crate::rating::elo;
use crate::rating::locks::ArticleLocks;
use crate::rating::opponents::OpponentSelector;
use crate::storage::ReaderStorage;
use crate::types::{ArticleId, GenerationId, NewComparison};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Opponent whose comparison did not happen
#[derive(Debug, Clone, Serialize)]
pub struct SkippedComparison {
    pub opponent: ArticleId,
    pub reason: String,
}

/// Summary of one rating round
#[derive(Debug, Clone, Serialize)]
pub struct RoundReport {
    pub article_id: ArticleId,
    /// Generation whose criteria the whole round used
    pub generation_id: GenerationId,
    /// False when the article already had comparisons (resumed round)
    pub fresh_start: bool,
    pub attempted: usize,
    pub completed: usize,
    pub skipped: Vec<SkippedComparison>,
    pub final_rating: f64,
    pub comparisons: u32,
    pub confident: bool,
}

pub struct RatingOrchestrator {
    storage: Arc<dyn ReaderStorage>,
    comparator: Comparator,
    selector: OpponentSelector,
    k_factor: f64,
    confidence_threshold: u32,
    round_locks: ArticleLocks,
    article_locks: ArticleLocks,
}

impl RatingOrchestrator {
    pub fn new(
        storage: Arc<dyn ReaderStorage>,
        comparator: Comparator,
        selector: OpponentSelector,
        k_factor: f64,
        confidence_threshold: u32,
    ) -> Self {
        Self {
            storage,
            comparator,
            selector,
            k_factor,
            confidence_threshold,
            round_locks: ArticleLocks::new(),
            article_locks: ArticleLocks::new(),
        }
    }

    /// Run the rating round for `article_id`.
    ///
    /// Judge failures skip the affected comparison. Storage failures abort the
    /// round; comparisons already persisted stay, and running the round again
    /// resumes against opponents not yet compared.
    pub async fn rate_article(&self, article_id: ArticleId) -> Result<RoundReport> {
        let _round = self.round_locks.lock(article_id).await;

        // Captured once: a refinement landing mid-round does not change criteria
        let generation = self
            .storage
            .active_generation()
            .await?
            .ok_or(ReaderError::NoActiveGeneration)?;

        let fresh_start = self
            .storage
            .initialize_rating(article_id, generation.id)
            .await?;
        let target = self.storage.get_article(article_id).await?;

        let pool = self.storage.rated_pool().await?;
        let already_compared = self.storage.compared_opponents(article_id).await?;
        let wanted = self.selector.count().saturating_sub(already_compared.len());
        let opponents = {
            let mut rng = rand::thread_rng();
            OpponentSelector::new(wanted).select(
                article_id,
                generation.id,
                &pool,
                &already_compared,
                &mut rng,
            )
        };

        info!(
            "Rating article {} against {} opponents (generation {}, {})",
            article_id,
            opponents.len(),
            generation.id,
            if fresh_start { "fresh" } else { "resumed" }
        );

        let mut completed = 0;
        let mut skipped = Vec::new();

        for opponent_id in &opponents {
            let opponent_id = *opponent_id;
            let opponent = match self.storage.get_article(opponent_id).await {
                Ok(opponent) => opponent,
                Err(ReaderError::ArticleNotFound(_)) => {
                    warn!("Opponent {} disappeared before comparison", opponent_id);
                    skipped.push(SkippedComparison {
                        opponent: opponent_id,
                        reason: "article deleted".to_string(),
                    });
                    continue;
                }
                Err(e) => return Err(e),
            };

            let judgment = match self
                .comparator
                .compare(&target, &opponent, &generation.criteria_text)
                .await
            {
                Ok(judgment) => judgment,
                Err(e) => {
                    warn!(
                        "Skipping comparison {} vs {}: {}",
                        article_id, opponent_id, e
                    );
                    skipped.push(SkippedComparison {
                        opponent: opponent_id,
                        reason: e.to_string(),
                    });
                    continue;
                }
            };

            let _pair = self.article_locks.lock_pair(article_id, opponent_id).await;
            let rating_a = self.storage.get_article(article_id).await?.elo_rating;
            let rating_b = self.storage.get_article(opponent_id).await?.elo_rating;
            let update = elo::update(rating_a, rating_b, judgment.outcome, self.k_factor);

            let comparison = NewComparison {
                article_a_id: article_id,
                article_b_id: opponent_id,
                outcome: judgment.outcome,
                rationale: judgment.rationale,
                article_a_elo_before: rating_a,
                article_a_elo_after: update.rating_a,
                article_b_elo_before: rating_b,
                article_b_elo_after: update.rating_b,
                k_factor: self.k_factor,
                generation_id: generation.id,
            };
            self.storage
                .apply_comparison(&comparison, self.confidence_threshold)
                .await?;
            completed += 1;

            debug!(
                "Article {}: {:.1} -> {:.1} ({} vs {})",
                article_id, rating_a, update.rating_a, judgment.outcome, opponent_id
            );
        }

        self.storage
            .mark_confident_if_stable(article_id, self.confidence_threshold)
            .await?;
        let rated = self.storage.get_article(article_id).await?;

        info!(
            "Finished rating article {}: {:.1} after {} comparisons ({} skipped, confident: {})",
            article_id,
            rated.elo_rating,
            rated.elo_comparisons,
            skipped.len(),
            rated.elo_confidence
        );

        Ok(RoundReport {
            article_id,
            generation_id: generation.id,
            fresh_start,
            attempted: opponents.len(),
            completed,
            skipped,
            final_rating: rated.elo_rating,
            comparisons: rated.elo_comparisons,
            confident: rated.elo_confidence,
        })
    }
}
