//! Criteria refinement from reader feedback
//!
//! One cycle turns the unlinked feedback of a time window into at most one
//! new generation. Nothing is written unless the judge returns usable
//! criteria; the new generation, the active-pointer flip and the feedback
//! links then land in a single transaction. Unconsumed feedback simply stays
//! unlinked and is picked up by the next cycle.

pub mod diff;

use crate::error::{ReaderError, Result};
use crate::feedback::FeedbackStore;
use crate::judge::Judge;
use crate::storage::{GenerationCommit, ReaderStorage};
use crate::types::Generation;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

pub use diff::word_diff;

/// What one refinement cycle did
#[derive(Debug, Clone)]
pub enum RefinementOutcome {
    /// No unlinked feedback in the window
    NoOp,
    NewGeneration(Generation),
}

pub struct GenerationRefiner {
    storage: Arc<dyn ReaderStorage>,
    feedback: FeedbackStore,
    judge: Arc<dyn Judge>,
    window: Duration,
    min_criteria_chars: usize,
}

impl GenerationRefiner {
    pub fn new(
        storage: Arc<dyn ReaderStorage>,
        judge: Arc<dyn Judge>,
        window: Duration,
        min_criteria_chars: usize,
    ) -> Self {
        Self {
            feedback: FeedbackStore::new(storage.clone()),
            storage,
            judge,
            window,
            min_criteria_chars,
        }
    }

    /// Refine from the feedback of the window ending now
    pub async fn run_cycle(&self) -> Result<RefinementOutcome> {
        self.run_cycle_at(Utc::now()).await
    }

    /// Refine from unlinked feedback created in `[now - window, now]` or later.
    ///
    /// Judge failures and implausible criteria abort the cycle with
    /// `RefinementAborted`, leaving generations and feedback untouched.
    pub async fn run_cycle_at(&self, now: DateTime<Utc>) -> Result<RefinementOutcome> {
        let window = chrono::Duration::from_std(self.window)
            .map_err(|e| ReaderError::Validation(format!("refinement window out of range: {}", e)))?;
        let items = self.feedback.unlinked_since(now - window).await?;
        if items.is_empty() {
            info!("No unlinked feedback since {}, nothing to refine", now - window);
            return Ok(RefinementOutcome::NoOp);
        }

        let active = self
            .storage
            .active_generation()
            .await?
            .ok_or(ReaderError::NoActiveGeneration)?;
        info!(
            "Refining generation {} from {} feedback items",
            active.id,
            items.len()
        );

        let proposed = match self.judge.refine(&active.criteria_text, &items).await {
            Ok(text) => text,
            Err(e) => {
                warn!("Refinement of generation {} failed: {}", active.id, e);
                return Err(ReaderError::RefinementAborted(e.to_string()));
            }
        };
        let criteria_text = proposed.trim();
        if criteria_text.chars().count() < self.min_criteria_chars {
            warn!(
                "Rejecting refined criteria of {} characters (minimum {})",
                criteria_text.chars().count(),
                self.min_criteria_chars
            );
            return Err(ReaderError::RefinementAborted(format!(
                "refined criteria too short ({} characters)",
                criteria_text.chars().count()
            )));
        }

        let commit = GenerationCommit {
            expected_active: active.id,
            criteria_text: criteria_text.to_string(),
            diff_from_previous: word_diff(&active.criteria_text, criteria_text),
            feedback_ids: items.iter().map(|item| item.id).collect(),
        };
        let generation = self.storage.commit_generation(&commit).await?;

        info!(
            "Created generation {} from {} feedback items",
            generation.id, generation.feedback_count
        );
        Ok(RefinementOutcome::NewGeneration(generation))
    }
}
