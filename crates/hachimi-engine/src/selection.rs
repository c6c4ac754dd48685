//! Weighted selection without replacement.
//!
//! Each round recomputes the weight of every remaining candidate, draws a
//! point in `[0, total)` and walks the pool until the running sum passes
//! it. O(count * candidates), which is fine for a sampled pool.

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use hachimi_types::{ContentRecord, ResonanceScorer};

/// Pick `min(count, candidates.len())` distinct records, favouring heavier
/// weights.
///
/// When the pool is no larger than `count` it is returned unchanged. When
/// every remaining weight is zero the pick falls back to uniform.
pub fn select<R: Rng + ?Sized>(
    mut candidates: Vec<ContentRecord>,
    count: usize,
    scorer: &ResonanceScorer,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<ContentRecord> {
    if candidates.len() <= count {
        return candidates;
    }

    let mut selected = Vec::with_capacity(count);
    while selected.len() < count && !candidates.is_empty() {
        let weights: Vec<f64> = candidates.iter().map(|c| scorer.weight(c, now)).collect();
        let pick = pick_index(&weights, rng);
        selected.push(candidates.swap_remove(pick));
    }
    selected
}

/// Index chosen by one weighted draw over `weights` (non-empty).
fn pick_index<R: Rng + ?Sized>(weights: &[f64], rng: &mut R) -> usize {
    let total: f64 = weights.iter().sum();
    if total <= 0.0 || !total.is_finite() {
        debug!(pool = weights.len(), "All weights zero, picking uniformly");
        return rng.random_range(0..weights.len());
    }

    let point = rng.random::<f64>() * total;
    let mut cumulative = 0.0;
    for (i, weight) in weights.iter().enumerate() {
        cumulative += weight;
        if cumulative > point {
            return i;
        }
    }
    // Float rounding can leave `point` at the very end; take the last
    // candidate with any weight.
    weights.iter().rposition(|w| *w > 0.0).unwrap_or(weights.len() - 1)
}
