//! Reader feedback collection
//!
//! Feedback is stored unlinked and stays that way until a refinement cycle
//! consumes it. Linking happens once: an item that already belongs to a
//! generation is never moved to another.

use crate::error::{ReaderError, Result};
use crate::judge::Judge;
use crate::storage::ReaderStorage;
use crate::types::{
    ArticleId, ArticlePayload, Characterization, FeedbackId, FeedbackItem, GenerationId,
    ThumbsRating,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Storage facade for feedback items
#[derive(Clone)]
pub struct FeedbackStore {
    storage: Arc<dyn ReaderStorage>,
}

impl FeedbackStore {
    pub fn new(storage: Arc<dyn ReaderStorage>) -> Self {
        Self { storage }
    }

    /// Record one feedback item; an article may collect any number of them
    pub async fn record_feedback(
        &self,
        article_id: ArticleId,
        characterization: Option<&Characterization>,
        text: &str,
    ) -> Result<FeedbackItem> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ReaderError::Validation(
                "feedback text must not be empty".to_string(),
            ));
        }

        let item = self
            .storage
            .insert_feedback(article_id, characterization, text)
            .await?;
        debug!(
            "Recorded feedback {} for article {} (characterized: {})",
            item.id,
            article_id,
            characterization.is_some()
        );
        Ok(item)
    }

    /// Unlinked items created at or after `window_start`
    pub async fn unlinked_since(&self, window_start: DateTime<Utc>) -> Result<Vec<FeedbackItem>> {
        self.storage.unlinked_feedback_since(window_start).await
    }

    /// Link still-unlinked items to `generation`; returns how many changed
    pub async fn link_to_generation(
        &self,
        ids: &[FeedbackId],
        generation: GenerationId,
    ) -> Result<u64> {
        let linked = self.storage.link_feedback(ids, generation).await?;
        if linked < ids.len() as u64 {
            warn!(
                "{} of {} feedback items were already linked",
                ids.len() as u64 - linked,
                ids.len()
            );
        }
        Ok(linked)
    }

    /// Items consumed by `generation`
    pub async fn for_generation(&self, generation: GenerationId) -> Result<Vec<FeedbackItem>> {
        self.storage.feedback_for_generation(generation).await
    }

    pub async fn for_article(&self, article_id: ArticleId) -> Result<Vec<FeedbackItem>> {
        self.storage.feedback_for_article(article_id).await
    }
}

/// Captures reader judgments on articles: thumbs ratings, and detailed
/// feedback enriched with a characterization from the judge
pub struct FeedbackCapture {
    store: FeedbackStore,
    storage: Arc<dyn ReaderStorage>,
    judge: Arc<dyn Judge>,
    preview_chars: usize,
    timeout: Duration,
}

impl FeedbackCapture {
    pub fn new(
        storage: Arc<dyn ReaderStorage>,
        judge: Arc<dyn Judge>,
        preview_chars: usize,
        timeout: Duration,
    ) -> Self {
        Self {
            store: FeedbackStore::new(storage.clone()),
            storage,
            judge,
            preview_chars,
            timeout,
        }
    }

    pub fn store(&self) -> &FeedbackStore {
        &self.store
    }

    pub async fn record_thumbs(&self, article_id: ArticleId, rating: ThumbsRating) -> Result<()> {
        self.storage.set_user_rating(article_id, rating).await?;
        info!("Article {} rated {:?}", article_id, rating);
        Ok(())
    }

    /// Ask the judge to characterize the article; `None` if that fails
    async fn characterize(&self, article_id: ArticleId) -> Result<Option<Characterization>> {
        let article = self.storage.get_article(article_id).await?;
        let payload = ArticlePayload::from_article(&article, self.preview_chars);

        match tokio::time::timeout(self.timeout, self.judge.characterize(&payload)).await {
            Ok(Ok(characterization)) => Ok(Some(characterization)),
            Ok(Err(e)) => {
                warn!("Characterization of article {} failed: {}", article_id, e);
                Ok(None)
            }
            Err(_) => {
                warn!(
                    "Characterization of article {} timed out after {:?}",
                    article_id, self.timeout
                );
                Ok(None)
            }
        }
    }

    /// Record detailed feedback. The article is characterized first; when the
    /// judge cannot do that the feedback is still kept, text only.
    pub async fn capture_feedback(&self, article_id: ArticleId, text: &str) -> Result<FeedbackItem> {
        if text.trim().is_empty() {
            return Err(ReaderError::Validation(
                "feedback text must not be empty".to_string(),
            ));
        }

        let characterization = self.characterize(article_id).await?;
        let item = self
            .store
            .record_feedback(article_id, characterization.as_ref(), text)
            .await?;
        self.storage.mark_rating_refined(article_id).await?;

        info!(
            "Captured feedback {} for article {}{}",
            item.id,
            article_id,
            if item.characterization.is_some() { "" } else { " (text only)" }
        );
        Ok(item)
    }
}
