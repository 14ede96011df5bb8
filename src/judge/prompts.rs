//! Prompt templates for judge calls

use crate::types::{ArticlePayload, FeedbackItem};

/// Criteria of the seed generation
pub const DEFAULT_CRITERIA: &str = "\
The reader is a software engineering manager with deep technical interests.

Prefer, roughly in this order:
- Systems programming, low-level performance and kernel work
- Rust, distributed systems and infrastructure
- Weather and meteorology data and APIs
- Engineering management frameworks and practice
- Deep technical explanations over surface-level news
- Long-form analysis over breaking-news hot takes

Penalize:
- Product announcements that reveal no interesting technical decision
- Political hot takes and inflammatory content
- Duplicate coverage of a story already covered elsewhere
- Clickbait headlines
- Shallow introductions aimed at beginners";

fn article_block(label: &str, article: &ArticlePayload) -> String {
    format!(
        "Article {label}: {title}\nSource: {source}\nPreview: {preview}",
        label = label,
        title = article.title,
        source = article.source,
        preview = article.preview
    )
}

pub fn comparison_prompt(criteria: &str, a: &ArticlePayload, b: &ArticlePayload) -> String {
    format!(
        r#"You are ranking articles for one reader's personal reading list.

Reader criteria:
---
{criteria}
---

{article_a}

{article_b}

Which of the two articles matters more to this reader under the criteria above?
Weigh topical fit, substance, writing quality and novelty.

Reply with JSON only:
{{
  "choice": "A" | "B" | "TIE",
  "rationale": "one or two sentences"
}}

Use "TIE" only when neither article is clearly preferable."#,
        criteria = criteria.trim(),
        article_a = article_block("A", a),
        article_b = article_block("B", b),
    )
}

pub fn characterization_prompt(article: &ArticlePayload) -> String {
    format!(
        r#"Characterize this article along five dimensions, each in two to five words.

Title: {title}
Source: {source}
Preview: {preview}

- topic: what it is about (e.g. "Rust memory management")
- style: how it is written (e.g. "tutorial", "opinion piece", "news report")
- depth: how deep it goes (e.g. "surface level", "expert level")
- emotion: its emotional register (e.g. "neutral", "alarming", "inspiring")
- level: who it is written for (e.g. "beginner friendly", "advanced technical")

Reply with JSON only:
{{
  "topic": "...",
  "style": "...",
  "depth": "...",
  "emotion": "...",
  "level": "..."
}}"#,
        title = article.title,
        source = article.source,
        preview = article.preview,
    )
}

/// Numbered feedback listing used inside the refinement prompt
pub fn format_feedback_items(feedback: &[FeedbackItem]) -> String {
    feedback
        .iter()
        .enumerate()
        .map(|(i, item)| {
            let mut entry = format!("Feedback #{}:\n  Reader comment: {}", i + 1, item.text.trim());
            if let Some(characterization) = &item.characterization {
                entry.push_str(&format!("\n  Article: {}", characterization));
            }
            entry
        })
        .collect::<Vec<_>>()
        .join("\n\n")
}

pub fn refinement_prompt(criteria: &str, feedback: &[FeedbackItem]) -> String {
    format!(
        r#"You maintain the criteria used to rank articles for one reader.

Current criteria:
---
{criteria}
---

Reader feedback collected since the last revision ({count} items):
{items}

Revise the criteria so future rankings reflect this feedback. Look for
patterns in what the reader valued or rejected and which article traits go
with each.

Reply with JSON only:
{{
  "analysis": "two or three sentences on the feedback",
  "changes": ["each concrete change"],
  "new_criteria": "the complete revised criteria text"
}}

Keep revisions incremental. If the feedback shows no clear pattern, return
the current criteria with minimal edits."#,
        criteria = criteria.trim(),
        count = feedback.len(),
        items = format_feedback_items(feedback),
    )
}
