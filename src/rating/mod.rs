//! Elo rating subsystem
//!
//! - [`elo`]: rating arithmetic
//! - [`comparator`]: one judge call per pair
//! - [`opponents`]: who a new article is compared against
//! - [`orchestrator`]: the sequential comparison round
//! - [`locks`]: per-article exclusive access
//! - [`percentile`]: population-relative view of a rating

pub mod comparator;
pub mod elo;
pub mod locks;
pub mod opponents;
pub mod orchestrator;
pub mod percentile;

pub use comparator::Comparator;
pub use elo::{expected_score, EloUpdate};
pub use locks::ArticleLocks;
pub use opponents::OpponentSelector;
pub use orchestrator::{RatingOrchestrator, RoundReport, SkippedComparison};
pub use percentile::{median, percentile};
