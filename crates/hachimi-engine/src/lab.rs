//! Monte Carlo view of the selection weights.
//!
//! Repeatedly draws a single item from a fixed pool and counts hits, so the
//! effect of energy, cooling and immunity can be compared side by side.
//! Nothing here touches storage or writes feedback back.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use hachimi_types::{
    ActionType, Author, ContentRecord, Platform, ResonanceScorer, UserAction, WeightBreakdown,
};

use crate::selection::select;

/// Rounds the dashboard lab runs by default.
pub const DEFAULT_ROUNDS: usize = 1000;

/// Per-record outcome of a simulation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LabRow {
    pub id: String,
    pub title: String,
    pub breakdown: WeightBreakdown,
    pub hits: usize,
    /// `hits / rounds`
    pub frequency: f64,
}

/// Run `rounds` single-item selections over `records`.
///
/// Rows come back in input order.
pub fn simulate<R: Rng + ?Sized>(
    records: &[ContentRecord],
    rounds: usize,
    scorer: &ResonanceScorer,
    now: DateTime<Utc>,
    rng: &mut R,
) -> Vec<LabRow> {
    let mut hits = vec![0usize; records.len()];
    if records.len() > 1 {
        for _ in 0..rounds {
            if let Some(picked) = select(records.to_vec(), 1, scorer, now, rng).pop() {
                if let Some(i) = records.iter().position(|r| r.id == picked.id) {
                    hits[i] += 1;
                }
            }
        }
    } else if records.len() == 1 {
        hits[0] = rounds;
    }

    records
        .iter()
        .zip(hits)
        .map(|(record, hits)| LabRow {
            id: record.id.clone(),
            title: record.title.clone(),
            breakdown: scorer.breakdown(record, now),
            hits,
            frequency: if rounds == 0 {
                0.0
            } else {
                hits as f64 / rounds as f64
            },
        })
        .collect()
}

#[allow(clippy::too_many_arguments)]
fn mock(
    now: DateTime<Utc>,
    id: &str,
    title: &str,
    rating: i64,
    shown_hours_ago: Option<f64>,
    shows: u32,
    clicks: u32,
    actions: &[ActionType],
) -> ContentRecord {
    let mut record = ContentRecord::new(id, Platform::Bilibili, now);
    record.title = title.to_string();
    record.url = format!("https://example.com/{}", id);
    record.author = Author::named("Mock Author");
    record.content_excerpt = "Mock Content".to_string();
    record.actions = actions.iter().map(|a| UserAction::new(*a, now)).collect();
    record.metadata.score = rating;
    record.metadata.manual_score = Some(rating);
    record.metadata.last_shown_at =
        shown_hours_ago.map(|h| now - Duration::milliseconds((h * 3_600_000.0) as i64));
    record.metadata.capsule_show_count = Some(shows);
    record.metadata.capsule_click_count = Some(clicks);
    record
}

/// Fixed pool covering the interesting corners of the weight function.
pub fn mock_pool(now: DateTime<Utc>) -> Vec<ContentRecord> {
    use ActionType::*;
    vec![
        mock(now, "high-fresh", "High Energy Fresh", 10, None, 0, 0, &[Coin, Triple]),
        mock(now, "high-stale", "High Energy Stale (24h ago)", 10, Some(24.0), 5, 2, &[Coin]),
        mock(now, "high-ignored", "High Energy Ignored", 10, Some(48.0), 20, 0, &[Coin]),
        mock(now, "mid-normal", "Mid Energy Normal", 7, Some(12.0), 2, 1, &[]),
        mock(now, "low-spam", "Low Energy Spam", 3, None, 0, 0, &[]),
        mock(now, "clicked-recently", "Recently Clicked", 8, Some(0.1), 10, 8, &[Like]),
        mock(now, "old-favorite", "Old Favorite", 9, Some(72.0), 5, 5, &[Favorite]),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_706_540_400_000).unwrap()
    }

    #[test]
    fn test_hits_sum_to_rounds() {
        let scorer = ResonanceScorer::with_defaults();
        let mut rng = StdRng::seed_from_u64(1);
        let rows = simulate(&mock_pool(now()), 500, &scorer, now(), &mut rng);
        assert_eq!(rows.len(), 7);
        assert_eq!(rows.iter().map(|r| r.hits).sum::<usize>(), 500);
    }

    #[test]
    fn test_fresh_high_energy_dominates_ignored() {
        let scorer = ResonanceScorer::with_defaults();
        let mut rng = StdRng::seed_from_u64(2);
        let rows = simulate(&mock_pool(now()), DEFAULT_ROUNDS, &scorer, now(), &mut rng);
        let hits = |id: &str| rows.iter().find(|r| r.id == id).unwrap().hits;

        assert!(hits("high-fresh") > hits("high-ignored"));
        assert!(hits("high-fresh") > hits("low-spam"));
    }

    #[test]
    fn test_low_rating_hits_energy_floor() {
        let scorer = ResonanceScorer::with_defaults();
        let pool = mock_pool(now());
        let spam = pool.iter().find(|r| r.id == "low-spam").unwrap();
        // 1 + (3 - 5) * 5 = -9, clamped.
        assert!((scorer.energy(spam) - 0.1).abs() < 1e-12);
    }

    #[test]
    fn test_degenerate_pools() {
        let scorer = ResonanceScorer::with_defaults();
        let mut rng = StdRng::seed_from_u64(3);
        assert!(simulate(&[], 10, &scorer, now(), &mut rng).is_empty());

        let single = &mock_pool(now())[..1];
        let rows = simulate(single, 10, &scorer, now(), &mut rng);
        assert_eq!(rows[0].hits, 10);
        assert!((rows[0].frequency - 1.0).abs() < f64::EPSILON);
    }
}
