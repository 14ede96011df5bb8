//! Opponent selection for a rating round
//!
//! Confident articles rated under the active generation come first, since
//! their ratings reflect the current criteria. When there are not enough of
//! them the set is topped up from anything else that has been compared at
//! least once, and only then from articles that entered rating but have no
//! comparisons yet. Without that last tier a fresh database never gets its
//! first comparison.

use crate::types::{ArticleId, GenerationId, PoolEntry};
use rand::seq::SliceRandom;
use rand::Rng;
use std::collections::HashSet;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct OpponentSelector {
    count: usize,
}

impl OpponentSelector {
    pub fn new(count: usize) -> Self {
        Self { count }
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Choose up to `count` distinct opponents for `target`.
    ///
    /// `pool` holds every article that has entered rating. `already_compared`
    /// holds articles the target has a recorded comparison with; they are
    /// never chosen again. Returns fewer than `count` ids (down to none) when
    /// the pool is small.
    pub fn select<R: Rng + ?Sized>(
        &self,
        target: ArticleId,
        active_generation: GenerationId,
        pool: &[PoolEntry],
        already_compared: &HashSet<ArticleId>,
        rng: &mut R,
    ) -> Vec<ArticleId> {
        let eligible =
            |entry: &PoolEntry| entry.id != target && !already_compared.contains(&entry.id);

        let preferred: Vec<ArticleId> = pool
            .iter()
            .filter(|e| eligible(*e))
            .filter(|e| e.elo_confidence && e.generation_id == Some(active_generation))
            .map(|e| e.id)
            .collect();

        let mut chosen: Vec<ArticleId> = preferred
            .choose_multiple(rng, self.count)
            .copied()
            .collect();

        let tiers: [fn(&PoolEntry) -> bool; 2] = [
            |e| e.elo_comparisons > 0,
            |e| e.elo_comparisons == 0 && e.generation_id.is_some(),
        ];
        for tier in tiers {
            if chosen.len() >= self.count {
                break;
            }
            let taken: HashSet<ArticleId> = chosen.iter().copied().collect();
            let mut fallback: Vec<ArticleId> = pool
                .iter()
                .filter(|e| eligible(*e) && tier(*e))
                .map(|e| e.id)
                .filter(|id| !taken.contains(id))
                .collect();
            fallback.sort_unstable();
            fallback.dedup();
            fallback.shuffle(rng);
            let missing = self.count - chosen.len();
            chosen.extend(fallback.into_iter().take(missing));
        }

        debug!(
            "Selected {} opponents for article {} ({} preferred candidates)",
            chosen.len(),
            target,
            preferred.len()
        );
        chosen
    }
}
