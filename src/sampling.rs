//! Background tile subsampling.

use rand::rngs::StdRng;
use rand::seq::index;
use rand::SeedableRng;

/// Number of background tiles to keep so that backgrounds make up roughly
/// `target_ratio` of the final set, capped at what is available.
pub fn background_quota(positive_count: usize, target_ratio: f64, available: usize) -> usize {
    if target_ratio <= 0.0 || target_ratio >= 1.0 {
        return 0;
    }
    let wanted = (positive_count as f64 * target_ratio / (1.0 - target_ratio)).round() as usize;
    wanted.min(available)
}

/// Draw `amount` distinct indices out of `0..len` with a seeded generator.
/// Returned indices are sorted so callers keep their original order.
pub fn sample_indices(len: usize, amount: usize, seed: u64) -> Vec<usize> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut picked = index::sample(&mut rng, len, amount.min(len)).into_vec();
    picked.sort_unstable();
    picked
}

/// Keep every positive item and a seeded random subset of the background ones.
///
/// `is_background` classifies each item; the result preserves input order.
pub fn balance_background<T, F>(items: Vec<T>, target_ratio: f64, seed: u64, is_background: F) -> Vec<T>
where
    F: Fn(&T) -> bool,
{
    let background_positions: Vec<usize> = items
        .iter()
        .enumerate()
        .filter(|(_, item)| is_background(item))
        .map(|(i, _)| i)
        .collect();
    let positive_count = items.len() - background_positions.len();
    let quota = background_quota(positive_count, target_ratio, background_positions.len());

    let mut keep = vec![true; items.len()];
    for &pos in &background_positions {
        keep[pos] = false;
    }
    for picked in sample_indices(background_positions.len(), quota, seed) {
        keep[background_positions[picked]] = true;
    }

    items
        .into_iter()
        .zip(keep)
        .filter_map(|(item, kept)| kept.then_some(item))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quota_matches_target_ratio() {
        assert_eq!(background_quota(850, 0.15, 10_000), 150);
    }

    #[test]
    fn quota_is_capped_by_available_backgrounds() {
        assert_eq!(background_quota(850, 0.15, 40), 40);
    }

    #[test]
    fn degenerate_ratios_keep_no_background() {
        assert_eq!(background_quota(100, 0.0, 50), 0);
        assert_eq!(background_quota(100, 1.0, 50), 0);
    }

    #[test]
    fn balance_keeps_all_positives() {
        // true = background
        let items: Vec<(usize, bool)> = (0..1000).map(|i| (i, i % 10 != 0)).collect();
        let kept = balance_background(items, 0.5, 7, |item| item.1);
        let positives = kept.iter().filter(|item| !item.1).count();
        let backgrounds = kept.iter().filter(|item| item.1).count();
        assert_eq!(positives, 100);
        assert_eq!(backgrounds, 100);
        assert!(kept.windows(2).all(|w| w[0].0 < w[1].0));
    }

    #[test]
    fn same_seed_same_draw() {
        assert_eq!(sample_indices(500, 20, 42), sample_indices(500, 20, 42));
    }
}
