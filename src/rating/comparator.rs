//! One pairwise relevance judgment

use crate::error::JudgeError;
use crate::judge::Judge;
use crate::types::{Article, ArticlePayload, Judgment};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

pub struct Comparator {
    judge: Arc<dyn Judge>,
    preview_chars: usize,
    timeout: Duration,
}

impl Comparator {
    pub fn new(judge: Arc<dyn Judge>, preview_chars: usize, timeout: Duration) -> Self {
        Self {
            judge,
            preview_chars,
            timeout,
        }
    }

    /// Ask the judge which of `a` and `b` better fits `criteria`.
    ///
    /// A hung judge is cut off after the configured timeout and reported as
    /// unavailable.
    pub async fn compare(
        &self,
        a: &Article,
        b: &Article,
        criteria: &str,
    ) -> Result<Judgment, JudgeError> {
        let payload_a = ArticlePayload::from_article(a, self.preview_chars);
        let payload_b = ArticlePayload::from_article(b, self.preview_chars);

        let judgment = tokio::time::timeout(
            self.timeout,
            self.judge.compare(criteria, &payload_a, &payload_b),
        )
        .await
        .map_err(|_| JudgeError::timed_out(self.timeout))??;

        debug!(
            "{} judged {} vs {}: {}",
            self.judge.name(),
            a.id,
            b.id,
            judgment.outcome
        );
        Ok(judgment)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ArticleId, Characterization, FeedbackItem, Outcome, ThumbsRating};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::Mutex;

    /// Records the payloads it sees and answers after `delay`
    struct RecordingJudge {
        delay: Duration,
        seen: Mutex<Vec<(String, ArticlePayload, ArticlePayload)>>,
    }

    #[async_trait]
    impl Judge for RecordingJudge {
        fn name(&self) -> &str {
            "recording"
        }

        async fn compare(
            &self,
            criteria: &str,
            a: &ArticlePayload,
            b: &ArticlePayload,
        ) -> Result<Judgment, JudgeError> {
            self.seen
                .lock()
                .unwrap()
                .push((criteria.to_string(), a.clone(), b.clone()));
            tokio::time::sleep(self.delay).await;
            Ok(Judgment {
                outcome: Outcome::Tie,
                rationale: "even".into(),
            })
        }

        async fn characterize(&self, _: &ArticlePayload) -> Result<Characterization, JudgeError> {
            Err(JudgeError::Unavailable("unused".into()))
        }

        async fn refine(&self, _: &str, _: &[FeedbackItem]) -> Result<String, JudgeError> {
            Err(JudgeError::Unavailable("unused".into()))
        }
    }

    fn article(id: i64, content: &str) -> Article {
        Article {
            id: ArticleId(id),
            source: "feed".into(),
            title: format!("article {}", id),
            url: None,
            author: None,
            content_markdown: content.to_string(),
            word_count: None,
            received_at: Utc::now(),
            elo_rating: 1500.0,
            elo_comparisons: 0,
            elo_confidence: false,
            generation_id: None,
            user_rating: ThumbsRating::Unrated,
            rated_at: None,
            rating_refined: false,
        }
    }

    #[tokio::test]
    async fn test_payload_is_truncated_and_criteria_forwarded() {
        let judge = Arc::new(RecordingJudge {
            delay: Duration::ZERO,
            seen: Mutex::new(Vec::new()),
        });
        let comparator = Comparator::new(judge.clone(), 10, Duration::from_secs(5));

        let judgment = comparator
            .compare(&article(1, &"x".repeat(50)), &article(2, "short"), "criteria v2")
            .await
            .unwrap();

        assert_eq!(judgment.outcome, Outcome::Tie);
        let seen = judge.seen.lock().unwrap();
        assert_eq!(seen[0].0, "criteria v2");
        assert_eq!(seen[0].1.preview.len(), 10);
        assert_eq!(seen[0].2.preview, "short");
    }

    #[tokio::test]
    async fn test_slow_judge_times_out() {
        let judge = Arc::new(RecordingJudge {
            delay: Duration::from_secs(10),
            seen: Mutex::new(Vec::new()),
        });
        let comparator = Comparator::new(judge, 1000, Duration::from_millis(20));

        let result = comparator.compare(&article(1, "a"), &article(2, "b"), "c").await;

        assert!(matches!(result, Err(JudgeError::Unavailable(_))));
    }
}
