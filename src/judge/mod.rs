//! LLM judge capability
//!
//! Every call that needs a language model goes through [`Judge`]: pairwise
//! comparisons, article characterization and criteria refinement. The HTTP
//! implementation lives in [`llm`]; tests substitute a scripted judge.

pub mod llm;
pub mod parse;
pub mod prompts;

use crate::error::JudgeError;
use crate::types::{ArticlePayload, Characterization, FeedbackItem, Judgment};
use async_trait::async_trait;

pub use llm::{LlmBackend, LlmJudge};

/// Source of relevance judgments
#[async_trait]
pub trait Judge: Send + Sync {
    /// Judge name (for logging)
    fn name(&self) -> &str;

    /// Decide which article better matches `criteria`
    async fn compare(
        &self,
        criteria: &str,
        a: &ArticlePayload,
        b: &ArticlePayload,
    ) -> Result<Judgment, JudgeError>;

    /// Describe an article along the five feedback dimensions
    async fn characterize(&self, article: &ArticlePayload) -> Result<Characterization, JudgeError>;

    /// Produce new criteria text from the current criteria and feedback
    async fn refine(&self, criteria: &str, feedback: &[FeedbackItem]) -> Result<String, JudgeError>;
}
