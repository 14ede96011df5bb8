//! Common test utilities and helpers

#![allow(dead_code)]

use async_trait::async_trait;
use reader_core::{
    error::JudgeError, ArticleId, ArticlePayload, Characterization, ConnectionMode, FeedbackItem,
    GenerationId, Judge, Judgment, LibsqlStorage, NewArticle, Outcome, ReaderConfig,
    ReaderService, ReaderStorage,
};
use reader_core::types::NewComparison;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

type Preference = dyn Fn(&ArticlePayload, &ArticlePayload) -> Result<Outcome, JudgeError> + Send + Sync;

/// Scripted judge with deterministic replies
pub struct StubJudge {
    preference: Box<Preference>,
    characterization: Mutex<Result<Characterization, JudgeError>>,
    refinement: Mutex<Result<String, JudgeError>>,
    compare_calls: AtomicUsize,
    refine_calls: Mutex<Vec<usize>>,
    compare_delay: Mutex<Duration>,
}

impl StubJudge {
    pub fn new<F>(preference: F) -> Self
    where
        F: Fn(&ArticlePayload, &ArticlePayload) -> Result<Outcome, JudgeError> + Send + Sync + 'static,
    {
        Self {
            preference: Box::new(preference),
            characterization: Mutex::new(Ok(sample_characterization())),
            refinement: Mutex::new(Ok(REFINED_CRITERIA.to_string())),
            compare_calls: AtomicUsize::new(0),
            refine_calls: Mutex::new(Vec::new()),
            compare_delay: Mutex::new(Duration::ZERO),
        }
    }

    /// Every comparison ends with the same outcome
    pub fn always(outcome: Outcome) -> Self {
        Self::new(move |_, _| Ok(outcome))
    }

    /// Articles whose title contains `marker` beat the rest
    pub fn preferring(marker: &'static str) -> Self {
        Self::new(move |a, b| {
            Ok(match (a.title.contains(marker), b.title.contains(marker)) {
                (true, false) => Outcome::AWins,
                (false, true) => Outcome::BWins,
                _ => Outcome::Tie,
            })
        })
    }

    pub fn set_characterization(&self, reply: Result<Characterization, JudgeError>) {
        *self.characterization.lock().unwrap() = reply;
    }

    pub fn set_refinement(&self, reply: Result<String, JudgeError>) {
        *self.refinement.lock().unwrap() = reply;
    }

    pub fn set_compare_delay(&self, delay: Duration) {
        *self.compare_delay.lock().unwrap() = delay;
    }

    pub fn compare_calls(&self) -> usize {
        self.compare_calls.load(Ordering::SeqCst)
    }

    /// Feedback batch sizes seen by `refine`, in call order
    pub fn refine_calls(&self) -> Vec<usize> {
        self.refine_calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl Judge for StubJudge {
    fn name(&self) -> &str {
        "stub"
    }

    async fn compare(
        &self,
        _criteria: &str,
        a: &ArticlePayload,
        b: &ArticlePayload,
    ) -> Result<Judgment, JudgeError> {
        self.compare_calls.fetch_add(1, Ordering::SeqCst);
        let delay = *self.compare_delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        let outcome = (self.preference)(a, b)?;
        Ok(Judgment {
            outcome,
            rationale: format!("{} vs {}: {}", a.title, b.title, outcome),
        })
    }

    async fn characterize(&self, _article: &ArticlePayload) -> Result<Characterization, JudgeError> {
        self.characterization.lock().unwrap().clone()
    }

    async fn refine(&self, _criteria: &str, feedback: &[FeedbackItem]) -> Result<String, JudgeError> {
        self.refine_calls.lock().unwrap().push(feedback.len());
        self.refinement.lock().unwrap().clone()
    }
}

pub const REFINED_CRITERIA: &str = "Prefer deep technical writing about storage engines, \
compilers and distributed systems. Avoid product announcements and listicles.";

pub fn sample_characterization() -> Characterization {
    Characterization {
        topic: "databases".to_string(),
        style: "tutorial".to_string(),
        depth: "deep".to_string(),
        emotion: "neutral".to_string(),
        level: "advanced".to_string(),
    }
}

/// Configuration suited to tests: default rating parameters, short judge
/// timeout, database inside `dir`
pub fn test_config(dir: &TempDir) -> ReaderConfig {
    let mut config = ReaderConfig::default();
    config.database.path = dir.path().join("reader.db").to_string_lossy().to_string();
    config.rating.judge_timeout = Duration::from_secs(5);
    config
}

/// Create a file-backed LibSQL storage inside a fresh temp dir
pub async fn create_test_storage() -> (Arc<LibsqlStorage>, TempDir) {
    let dir = TempDir::new().expect("Failed to create temp dir");
    let path = dir.path().join("reader.db").to_string_lossy().to_string();
    let storage = LibsqlStorage::new_with_validation(ConnectionMode::Local(path), true)
        .await
        .expect("Failed to create test storage");
    (Arc::new(storage), dir)
}

/// Service over a fresh database with the given judge
pub async fn create_test_service(judge: Arc<StubJudge>) -> (ReaderService, Arc<LibsqlStorage>, TempDir) {
    let (storage, dir) = create_test_storage().await;
    let service = ReaderService::with_storage(test_config(&dir), storage.clone(), judge)
        .await
        .expect("Failed to create test service");
    (service, storage, dir)
}

pub fn sample_article(title: &str) -> NewArticle {
    NewArticle::new(
        "test-feed",
        title,
        format!("# {}\n\nSome body text about {}.", title, title.to_lowercase()),
    )
}

/// Insert articles and drive them to confidence at exactly the given
/// ratings, by recording pairwise comparisons among them. Needs at least
/// two ratings.
pub async fn seed_confident_ratings(
    storage: &dyn ReaderStorage,
    generation: GenerationId,
    ratings: &[f64],
    threshold: u32,
) -> Vec<ArticleId> {
    assert!(ratings.len() >= 2, "need at least two articles to compare");

    let mut ids = Vec::with_capacity(ratings.len());
    for (i, _) in ratings.iter().enumerate() {
        let id = storage
            .insert_article(&sample_article(&format!("Seeded {}", i)))
            .await
            .unwrap();
        storage.initialize_rating(id, generation).await.unwrap();
        ids.push(id);
    }

    let per_pass = (ratings.len() - 1) as u32;
    let passes = threshold.div_ceil(per_pass);
    for _ in 0..passes {
        for i in 0..ids.len() {
            for j in (i + 1)..ids.len() {
                let before_a = storage.get_article(ids[i]).await.unwrap().elo_rating;
                let before_b = storage.get_article(ids[j]).await.unwrap().elo_rating;
                let comparison = NewComparison {
                    article_a_id: ids[i],
                    article_b_id: ids[j],
                    outcome: Outcome::Tie,
                    rationale: "seeded".to_string(),
                    article_a_elo_before: before_a,
                    article_a_elo_after: ratings[i],
                    article_b_elo_before: before_b,
                    article_b_elo_after: ratings[j],
                    k_factor: 32.0,
                    generation_id: generation,
                };
                storage.apply_comparison(&comparison, threshold).await.unwrap();
            }
        }
    }
    ids
}
