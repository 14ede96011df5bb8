//! Percentile normalization over the confident population
//!
//! Ratings are only meaningful relative to each other, so the UI shows a
//! percentile instead. Computed on demand and never stored.

/// Percentile reported when there is nothing to compare against
pub const EMPTY_POPULATION_PERCENTILE: f64 = 50.0;

/// Share of the population strictly below `rating`, in `[0, 100]`
pub fn percentile(rating: f64, population: &[f64]) -> f64 {
    if population.is_empty() {
        return EMPTY_POPULATION_PERCENTILE;
    }
    let below = population.iter().filter(|&&r| r < rating).count();
    100.0 * below as f64 / population.len() as f64
}

/// Lower median of the population (`sorted[(n - 1) / 2]`)
pub fn median(population: &[f64]) -> Option<f64> {
    if population.is_empty() {
        return None;
    }
    let mut sorted = population.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    Some(sorted[(sorted.len() - 1) / 2])
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_population() {
        assert_eq!(percentile(1500.0, &[]), 50.0);
        assert_eq!(median(&[]), None);
    }

    #[test]
    fn test_minimum_is_zero_and_above_all_is_hundred() {
        let population = [1400.0, 1480.0, 1500.0, 1520.0, 1600.0];
        assert_eq!(percentile(1400.0, &population), 0.0);
        assert_eq!(percentile(1700.0, &population), 100.0);
        assert_eq!(percentile(1500.0, &population), 40.0);
    }

    #[test]
    fn test_median_odd_and_even() {
        assert_eq!(median(&[1600.0, 1400.0, 1500.0, 1480.0, 1520.0]), Some(1500.0));
        assert_eq!(median(&[1400.0, 1500.0, 1600.0, 1700.0]), Some(1500.0));
        assert_eq!(median(&[1234.0]), Some(1234.0));
    }

    proptest! {
        #[test]
        fn prop_percentile_bounded(
            rating in 0.0f64..3000.0,
            population in proptest::collection::vec(0.0f64..3000.0, 0..50),
        ) {
            let p = percentile(rating, &population);
            prop_assert!((0.0..=100.0).contains(&p));
        }
    }
}
