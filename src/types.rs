//! Core data types for the rating core
//!
//! Articles, pairwise comparisons, criteria generations and the feedback
//! that drives refinement. Identifiers are thin newtypes over the storage
//! row ids so an article id cannot be passed where a generation id is
//! expected.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Rating every article starts from
pub const DEFAULT_RATING: f64 = 1500.0;

/// Successful comparisons needed before a rating is trusted
pub const DEFAULT_CONFIDENCE_THRESHOLD: u32 = 7;

/// Default K-factor for rating updates
pub const DEFAULT_K_FACTOR: f64 = 32.0;

macro_rules! row_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub i64);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl From<i64> for $name {
            fn from(id: i64) -> Self {
                Self(id)
            }
        }
    };
}

row_id!(
    /// Identifier of an article row
    ArticleId
);
row_id!(
    /// Identifier of a criteria generation (sequential, starting at 1)
    GenerationId
);
row_id!(
    /// Identifier of a recorded comparison
    ComparisonId
);
row_id!(
    /// Identifier of a feedback item
    FeedbackId
);

/// Article handed over by ingestion
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewArticle {
    pub source: String,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub content_markdown: String,
    pub word_count: Option<i64>,
}

impl NewArticle {
    pub fn new(
        source: impl Into<String>,
        title: impl Into<String>,
        content_markdown: impl Into<String>,
    ) -> Self {
        let content_markdown = content_markdown.into();
        let word_count = Some(content_markdown.split_whitespace().count() as i64);
        Self {
            source: source.into(),
            title: title.into(),
            url: None,
            author: None,
            content_markdown,
            word_count,
        }
    }
}

/// Stored article together with its rating state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Article {
    pub id: ArticleId,
    pub source: String,
    pub title: String,
    pub url: Option<String>,
    pub author: Option<String>,
    pub content_markdown: String,
    pub word_count: Option<i64>,
    pub received_at: DateTime<Utc>,
    pub elo_rating: f64,
    pub elo_comparisons: u32,
    pub elo_confidence: bool,
    /// Generation the article was rated under
    pub generation_id: Option<GenerationId>,
    pub user_rating: ThumbsRating,
    pub rated_at: Option<DateTime<Utc>>,
    /// Detailed feedback was captured for this article
    pub rating_refined: bool,
}

/// Lightweight view of a rated article used for opponent selection
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PoolEntry {
    pub id: ArticleId,
    pub generation_id: Option<GenerationId>,
    pub elo_rating: f64,
    pub elo_comparisons: u32,
    pub elo_confidence: bool,
}

/// Explicit thumbs judgment from the reader
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThumbsRating {
    Down,
    #[default]
    Unrated,
    Up,
}

impl ThumbsRating {
    pub fn as_i64(self) -> i64 {
        match self {
            ThumbsRating::Down => -1,
            ThumbsRating::Unrated => 0,
            ThumbsRating::Up => 1,
        }
    }

    /// Convert a stored value, rejecting anything outside -1..=1
    pub fn from_i64(value: i64) -> Option<Self> {
        match value {
            -1 => Some(ThumbsRating::Down),
            0 => Some(ThumbsRating::Unrated),
            1 => Some(ThumbsRating::Up),
            _ => None,
        }
    }
}

/// Result of one pairwise contest, from article A's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    AWins,
    BWins,
    Tie,
}

impl Outcome {
    /// Score `S` for article A: 1 for a win, 0 for a loss, 0.5 for a tie
    pub fn score(self) -> f64 {
        match self {
            Outcome::AWins => 1.0,
            Outcome::BWins => 0.0,
            Outcome::Tie => 0.5,
        }
    }

    /// Same contest seen from article B
    pub fn swapped(self) -> Self {
        match self {
            Outcome::AWins => Outcome::BWins,
            Outcome::BWins => Outcome::AWins,
            Outcome::Tie => Outcome::Tie,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::AWins => "a_wins",
            Outcome::BWins => "b_wins",
            Outcome::Tie => "tie",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "a_wins" => Some(Outcome::AWins),
            "b_wins" => Some(Outcome::BWins),
            "tie" => Some(Outcome::Tie),
            _ => None,
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A judge's verdict on one pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Judgment {
    pub outcome: Outcome,
    pub rationale: String,
}

/// Immutable record of one comparison
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Comparison {
    pub id: ComparisonId,
    pub article_a_id: ArticleId,
    pub article_b_id: ArticleId,
    /// `None` for a tie
    pub winner_id: Option<ArticleId>,
    pub outcome: Outcome,
    pub rationale: String,
    pub article_a_elo_before: f64,
    pub article_a_elo_after: f64,
    pub article_b_elo_before: f64,
    pub article_b_elo_after: f64,
    pub k_factor: f64,
    pub generation_id: Option<GenerationId>,
    pub created_at: DateTime<Utc>,
}

impl Comparison {
    /// Rating of `article` before and after this comparison
    pub fn ratings_for(&self, article: ArticleId) -> Option<(f64, f64)> {
        if article == self.article_a_id {
            Some((self.article_a_elo_before, self.article_a_elo_after))
        } else if article == self.article_b_id {
            Some((self.article_b_elo_before, self.article_b_elo_after))
        } else {
            None
        }
    }
}

/// Comparison about to be persisted
#[derive(Debug, Clone)]
pub struct NewComparison {
    pub article_a_id: ArticleId,
    pub article_b_id: ArticleId,
    pub outcome: Outcome,
    pub rationale: String,
    pub article_a_elo_before: f64,
    pub article_a_elo_after: f64,
    pub article_b_elo_before: f64,
    pub article_b_elo_after: f64,
    pub k_factor: f64,
    pub generation_id: GenerationId,
}

impl NewComparison {
    pub fn winner_id(&self) -> Option<ArticleId> {
        match self.outcome {
            Outcome::AWins => Some(self.article_a_id),
            Outcome::BWins => Some(self.article_b_id),
            Outcome::Tie => None,
        }
    }
}

/// Immutable version of the relevance criteria
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Generation {
    pub id: GenerationId,
    pub criteria_text: String,
    pub created_at: DateTime<Utc>,
    /// Word diff against the predecessor, absent for the seed
    pub diff_from_previous: Option<String>,
    pub feedback_count: u32,
    pub parent_id: Option<GenerationId>,
    pub active: bool,
}

/// Which generations a listing should include
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum GenerationFilter {
    #[default]
    Any,
    /// Only articles rated under one of these generations
    In(Vec<GenerationId>),
    /// Articles rated under this generation or a later one
    AtLeast(GenerationId),
}

/// Structured description of an article
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Characterization {
    pub topic: String,
    pub style: String,
    pub depth: String,
    pub emotion: String,
    pub level: String,
}

impl fmt::Display for Characterization {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "topic={}, style={}, depth={}, emotion={}, level={}",
            self.topic, self.style, self.depth, self.emotion, self.level
        )
    }
}

/// Reader feedback waiting for (or consumed by) a refinement cycle
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FeedbackItem {
    pub id: FeedbackId,
    pub article_id: ArticleId,
    pub characterization: Option<Characterization>,
    pub text: String,
    pub created_at: DateTime<Utc>,
    /// Set once by the refinement that consumed the item
    pub generation_id: Option<GenerationId>,
}

/// Content sent to the judge for one side of a comparison
#[derive(Debug, Clone, PartialEq)]
pub struct ArticlePayload {
    pub title: String,
    pub source: String,
    pub preview: String,
}

impl ArticlePayload {
    /// Build a payload, truncating the content to `preview_chars` characters
    pub fn from_article(article: &Article, preview_chars: usize) -> Self {
        Self {
            title: article.title.clone(),
            source: article.source.clone(),
            preview: article.content_markdown.chars().take(preview_chars).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_scores() {
        assert_eq!(Outcome::AWins.score(), 1.0);
        assert_eq!(Outcome::BWins.score(), 0.0);
        assert_eq!(Outcome::Tie.score(), 0.5);
        assert_eq!(Outcome::AWins.swapped(), Outcome::BWins);
        assert_eq!(Outcome::Tie.swapped(), Outcome::Tie);
    }

    #[test]
    fn test_outcome_strings() {
        for outcome in [Outcome::AWins, Outcome::BWins, Outcome::Tie] {
            assert_eq!(Outcome::parse(outcome.as_str()), Some(outcome));
        }
        assert_eq!(Outcome::parse("draw"), None);
    }

    #[test]
    fn test_thumbs_rating_range() {
        assert_eq!(ThumbsRating::from_i64(-1), Some(ThumbsRating::Down));
        assert_eq!(ThumbsRating::from_i64(1), Some(ThumbsRating::Up));
        assert_eq!(ThumbsRating::from_i64(2), None);
        assert_eq!(ThumbsRating::default().as_i64(), 0);
    }

    #[test]
    fn test_payload_truncates_on_char_boundary() {
        let article = Article {
            id: ArticleId(1),
            source: "feed".into(),
            title: "Title".into(),
            url: None,
            author: None,
            content_markdown: "é".repeat(1200),
            word_count: None,
            received_at: Utc::now(),
            elo_rating: DEFAULT_RATING,
            elo_comparisons: 0,
            elo_confidence: false,
            generation_id: None,
            user_rating: ThumbsRating::Unrated,
            rated_at: None,
            rating_refined: false,
        };
        let payload = ArticlePayload::from_article(&article, 1000);
        assert_eq!(payload.preview.chars().count(), 1000);
    }

    #[test]
    fn test_new_article_counts_words() {
        let article = NewArticle::new("feed", "t", "one two  three\nfour");
        assert_eq!(article.word_count, Some(4));
    }
}
