//! Resonance weighting for resurfacing past content.
//!
//! Every candidate gets a non-negative weight from three factors:
//!
//! ```text
//! weight = energy * cooling * immunity
//!
//! energy   = max(energy_floor,
//!                1 + (manual_score - midpoint) * multiplier
//!                  + sum(energy_weight(t) for each distinct action type t))
//! cooling  = 1                          if never shown
//!            1 - exp(-gap / K)          K = cooling_window / max(1, energy)
//! immunity = 1 / max(immunity_floor, 1 + shows - click_offset * clicks)
//! ```
//!
//! High-energy items cool down faster after being shown. Items shown
//! repeatedly without a click are suppressed; each click recovers three
//! shows' worth of suppression.
//!
//! Weights depend on the current time and on feedback counters, so they are
//! computed fresh on every sampling pass.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::record::{ActionType, ContentRecord};

/// Largest `f64` below 1, the ceiling for a shown record's cooling.
pub const MAX_COOLING: f64 = 1.0 - f64::EPSILON / 2.0;

/// Energy contributed by a distinct action type. Unlisted types add 0.
pub fn energy_weight(action: ActionType) -> f64 {
    match action {
        // high energy
        ActionType::Copy => 5.0,
        ActionType::Share => 15.0,
        ActionType::Triple => 15.0,
        ActionType::Coin => 5.0,
        // medium
        ActionType::Favorite => 8.0,
        ActionType::Star => 8.0,
        ActionType::Comment => 8.0,
        ActionType::Danmaku => 8.0,
        ActionType::OpenComment => 4.0,
        // basic
        ActionType::Upvote => 5.0,
        ActionType::Like => 3.0,
        // consumption
        ActionType::Read30s => 5.0,
        ActionType::Play90 => 8.0,
        ActionType::Play50 => 3.0,
        _ => 0.0,
    }
}

/// Tunables for the resonance weight.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ResonanceConfig {
    /// Lower clamp on energy. Low manual ratings can push the raw energy
    /// to zero or below.
    #[serde(default = "default_energy_floor")]
    pub energy_floor: f64,

    /// Neutral manual rating; ratings below it reduce energy.
    #[serde(default = "default_manual_midpoint")]
    pub manual_midpoint: f64,

    /// Energy per rating point away from the midpoint.
    #[serde(default = "default_manual_multiplier")]
    pub manual_multiplier: f64,

    /// Characteristic cooling time for an item of energy 1 (ms).
    #[serde(default = "default_cooling_window_ms")]
    pub cooling_window_ms: u64,

    /// Lower clamp on the immunity denominator.
    #[serde(default = "default_immunity_floor")]
    pub immunity_floor: f64,

    /// Shows forgiven per click.
    #[serde(default = "default_click_offset")]
    pub click_offset: f64,
}

fn default_energy_floor() -> f64 {
    0.1
}

fn default_manual_midpoint() -> f64 {
    5.0
}

fn default_manual_multiplier() -> f64 {
    5.0
}

fn default_cooling_window_ms() -> u64 {
    24 * 60 * 60 * 1000
}

fn default_immunity_floor() -> f64 {
    0.1
}

fn default_click_offset() -> f64 {
    3.0
}

impl Default for ResonanceConfig {
    fn default() -> Self {
        Self {
            energy_floor: default_energy_floor(),
            manual_midpoint: default_manual_midpoint(),
            manual_multiplier: default_manual_multiplier(),
            cooling_window_ms: default_cooling_window_ms(),
            immunity_floor: default_immunity_floor(),
            click_offset: default_click_offset(),
        }
    }
}

impl ResonanceConfig {
    /// Validate configuration values.
    pub fn validate(&self) -> Result<(), String> {
        if !(self.energy_floor > 0.0) {
            return Err(format!(
                "energy_floor must be positive, got {}",
                self.energy_floor
            ));
        }
        if self.cooling_window_ms == 0 {
            return Err("cooling_window_ms must be greater than 0".to_string());
        }
        if !(self.immunity_floor > 0.0) {
            return Err(format!(
                "immunity_floor must be positive, got {}",
                self.immunity_floor
            ));
        }
        if self.click_offset < 0.0 {
            return Err(format!(
                "click_offset must be non-negative, got {}",
                self.click_offset
            ));
        }
        Ok(())
    }
}

/// Per-factor view of a weight, for diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct WeightBreakdown {
    pub energy: f64,
    pub cooling: f64,
    pub immunity: f64,
    pub weight: f64,
}

/// Computes resonance weights under a fixed configuration.
#[derive(Debug, Clone, Default)]
pub struct ResonanceScorer {
    config: ResonanceConfig,
}

impl ResonanceScorer {
    pub fn new(config: ResonanceConfig) -> Self {
        Self { config }
    }

    pub fn with_defaults() -> Self {
        Self::new(ResonanceConfig::default())
    }

    pub fn config(&self) -> &ResonanceConfig {
        &self.config
    }

    /// Interaction strength of a record, clamped to `energy_floor`.
    pub fn energy(&self, record: &ContentRecord) -> f64 {
        let mut energy = 1.0;

        if let Some(manual) = record.metadata.manual_score {
            energy += (manual as f64 - self.config.manual_midpoint) * self.config.manual_multiplier;
        }

        let distinct: HashSet<ActionType> = record.actions.iter().map(|a| a.action_type).collect();
        energy += distinct.into_iter().map(energy_weight).sum::<f64>();

        energy.max(self.config.energy_floor)
    }

    /// Eligibility recovered since the record was last shown.
    ///
    /// In `[0, 1)` once shown, exactly 1 if never shown. Long gaps would
    /// round to 1.0 in `f64`, so the result is capped at [`MAX_COOLING`].
    pub fn cooling(&self, record: &ContentRecord, energy: f64, now: DateTime<Utc>) -> f64 {
        let Some(last_shown) = record.metadata.last_shown_at else {
            return 1.0;
        };

        let gap_ms = (now - last_shown).num_milliseconds();
        if gap_ms <= 0 {
            return 0.0;
        }

        let k = self.config.cooling_window_ms as f64 / energy.max(1.0);
        (-(-(gap_ms as f64) / k).exp_m1()).min(MAX_COOLING)
    }

    /// Feedback dampening from show and click counts.
    pub fn immunity(&self, record: &ContentRecord) -> f64 {
        let shows = record.metadata.capsule_show_count.unwrap_or(0) as f64;
        let clicks = record.metadata.capsule_click_count.unwrap_or(0) as f64;
        let denominator =
            (1.0 + shows - self.config.click_offset * clicks).max(self.config.immunity_floor);
        1.0 / denominator
    }

    /// All three factors and their product at `now`.
    pub fn breakdown(&self, record: &ContentRecord, now: DateTime<Utc>) -> WeightBreakdown {
        let energy = self.energy(record);
        let cooling = self.cooling(record, energy, now);
        let immunity = self.immunity(record);
        WeightBreakdown {
            energy,
            cooling,
            immunity,
            weight: energy * cooling * immunity,
        }
    }

    /// Resonance weight of a record at `now`. Always `>= 0`.
    pub fn weight(&self, record: &ContentRecord, now: DateTime<Utc>) -> f64 {
        self.breakdown(record, now).weight
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{Platform, UserAction};
    use chrono::{Duration, TimeZone};

    fn now() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_706_540_400_000).unwrap()
    }

    fn record(actions: &[ActionType]) -> ContentRecord {
        let mut record = ContentRecord::new("r1", Platform::Bilibili, now());
        record.actions = actions.iter().map(|a| UserAction::new(*a, now())).collect();
        record
    }

    #[test]
    fn test_energy_counts_distinct_types() {
        let scorer = ResonanceScorer::with_defaults();
        let once = record(&[ActionType::Coin]);
        let repeated = record(&[ActionType::Coin, ActionType::Coin, ActionType::View]);
        assert!((scorer.energy(&once) - 6.0).abs() < 1e-9);
        assert!((scorer.energy(&repeated) - 6.0).abs() < 1e-9);
    }

    #[test]
    fn test_energy_manual_adjustment() {
        let scorer = ResonanceScorer::with_defaults();
        let mut rated = record(&[ActionType::View]);
        rated.metadata.manual_score = Some(9);
        // 1 + (9 - 5) * 5
        assert!((scorer.energy(&rated) - 21.0).abs() < 1e-9);
    }

    #[test]
    fn test_low_manual_score_is_clamped() {
        let scorer = ResonanceScorer::with_defaults();
        let mut rated = record(&[]);
        rated.metadata.manual_score = Some(0);
        assert!((scorer.energy(&rated) - 0.1).abs() < 1e-9);

        rated.metadata.last_shown_at = Some(now() - Duration::hours(1));
        let weight = scorer.weight(&rated, now());
        assert!(weight.is_finite());
        assert!(weight > 0.0);
    }

    #[test]
    fn test_cooling_never_shown_is_one() {
        let scorer = ResonanceScorer::with_defaults();
        let r = record(&[ActionType::Like]);
        let energy = scorer.energy(&r);
        assert_eq!(scorer.cooling(&r, energy, now()), 1.0);
    }

    #[test]
    fn test_cooling_bounds() {
        let scorer = ResonanceScorer::with_defaults();
        let mut r = record(&[ActionType::Like]);
        let energy = scorer.energy(&r);

        for minutes in [1, 30, 60, 6 * 60, 24 * 60, 3 * 24 * 60] {
            r.metadata.last_shown_at = Some(now() - Duration::minutes(minutes));
            let c = scorer.cooling(&r, energy, now());
            assert!((0.0..1.0).contains(&c), "cooling {} out of range", c);
        }

        r.metadata.last_shown_at = Some(now());
        assert_eq!(scorer.cooling(&r, energy, now()), 0.0);
    }

    #[test]
    fn test_cooling_stays_below_one_for_long_gaps() {
        let scorer = ResonanceScorer::with_defaults();
        let mut r = record(&[ActionType::Share, ActionType::Triple, ActionType::Coin]);
        let energy = scorer.energy(&r);

        for gap in [Duration::days(2), Duration::days(30), Duration::days(3650)] {
            r.metadata.last_shown_at = Some(now() - gap);
            let c = scorer.cooling(&r, energy, now());
            assert!(c < 1.0, "cooling {} reached 1 after {:?}", c, gap);
            assert_eq!(c, MAX_COOLING);
        }
    }

    #[test]
    fn test_high_energy_cools_faster() {
        let scorer = ResonanceScorer::with_defaults();
        let shown = Some(now() - Duration::hours(2));
        let mut low = record(&[]);
        let mut high = record(&[ActionType::Share, ActionType::Triple]);
        low.metadata.last_shown_at = shown;
        high.metadata.last_shown_at = shown;

        let c_low = scorer.cooling(&low, scorer.energy(&low), now());
        let c_high = scorer.cooling(&high, scorer.energy(&high), now());
        assert!(c_high > c_low);
    }

    #[test]
    fn test_cooling_matches_formula() {
        let scorer = ResonanceScorer::with_defaults();
        let mut r = record(&[]);
        r.metadata.last_shown_at = Some(now() - Duration::hours(24));
        // energy 1, K = 24h, gap = 24h
        let expected = 1.0 - (-1.0f64).exp();
        assert!((scorer.cooling(&r, 1.0, now()) - expected).abs() < 1e-12);
    }

    #[test]
    fn test_immunity_recovers_with_clicks() {
        let scorer = ResonanceScorer::with_defaults();
        let mut ignored = record(&[ActionType::Coin]);
        ignored.metadata.capsule_show_count = Some(5);
        ignored.metadata.capsule_click_count = Some(0);

        let mut clicked = ignored.clone();
        clicked.metadata.capsule_click_count = Some(2);

        assert!((scorer.immunity(&ignored) - 1.0 / 6.0).abs() < 1e-12);
        assert!(scorer.weight(&clicked, now()) > scorer.weight(&ignored, now()));
    }

    #[test]
    fn test_immunity_denominator_floor() {
        let scorer = ResonanceScorer::with_defaults();
        let mut r = record(&[]);
        r.metadata.capsule_show_count = Some(1);
        r.metadata.capsule_click_count = Some(10);
        assert!((scorer.immunity(&r) - 10.0).abs() < 1e-9);
    }

    #[test]
    fn test_weight_monotonic_in_manual_score() {
        let scorer = ResonanceScorer::with_defaults();
        let shown = Some(now() - Duration::hours(6));
        let mut lower = record(&[ActionType::Like]);
        lower.metadata.manual_score = Some(7);
        lower.metadata.last_shown_at = shown;
        lower.metadata.capsule_show_count = Some(2);
        let mut higher = lower.clone();
        higher.metadata.manual_score = Some(11);

        assert!(scorer.weight(&higher, now()) >= scorer.weight(&lower, now()));
    }

    #[test]
    fn test_config_validate() {
        assert!(ResonanceConfig::default().validate().is_ok());
        let bad = ResonanceConfig {
            energy_floor: 0.0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
        let bad = ResonanceConfig {
            cooling_window_ms: 0,
            ..Default::default()
        };
        assert!(bad.validate().is_err());
    }
}
