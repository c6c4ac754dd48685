//! Stratified candidate sampling.
//!
//! The store is split by score into a high-value stratum and a normal one.
//! Up to `stratum_cap` ids are drawn uniformly without replacement from
//! each, using only the score index, and the union is fetched in one
//! multi-get. The weighting pass downstream therefore costs O(cap) no
//! matter how large the history is, and neither stratum can starve the
//! other.

use rand::seq::index;
use rand::Rng;
use tracing::debug;

use hachimi_storage::Storage;
use hachimi_types::{ContentRecord, SamplerConfig};

use crate::error::EngineError;

/// Draws a bounded candidate pool from storage.
#[derive(Debug, Clone, Default)]
pub struct StratifiedSampler {
    config: SamplerConfig,
}

impl StratifiedSampler {
    pub fn new(config: SamplerConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    /// Uniformly pick up to `stratum_cap` of `keys`.
    pub fn draw<R: Rng + ?Sized>(&self, keys: Vec<String>, rng: &mut R) -> Vec<String> {
        let cap = self.config.stratum_cap;
        if keys.len() <= cap {
            return keys;
        }
        let mut slots: Vec<Option<String>> = keys.into_iter().map(Some).collect();
        index::sample(rng, slots.len(), cap)
            .into_iter()
            .filter_map(|i| slots[i].take())
            .collect()
    }

    /// Sample the candidate pool.
    ///
    /// Ids deleted between the index scan and the fetch are dropped.
    pub fn candidates<R: Rng + ?Sized>(
        &self,
        storage: &Storage,
        rng: &mut R,
    ) -> Result<Vec<ContentRecord>, EngineError> {
        let threshold = self.config.high_value_threshold;
        let high = storage.keys_in_score_range(Some(threshold), None)?;
        let normal = storage.keys_in_score_range(None, Some(threshold))?;
        let (high_total, normal_total) = (high.len(), normal.len());

        let mut ids = self.draw(high, rng);
        ids.extend(self.draw(normal, rng));

        let records = storage.get_records(&ids)?;
        debug!(
            high_total,
            normal_total,
            sampled = ids.len(),
            fetched = records.len(),
            "Sampled candidates"
        );
        Ok(records)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::HashSet;

    fn sampler(cap: usize) -> StratifiedSampler {
        StratifiedSampler::new(SamplerConfig {
            stratum_cap: cap,
            ..Default::default()
        })
    }

    #[test]
    fn test_draw_takes_all_when_under_cap() {
        let mut rng = StdRng::seed_from_u64(1);
        let keys: Vec<String> = (0..5).map(|i| format!("k{}", i)).collect();
        assert_eq!(sampler(10).draw(keys.clone(), &mut rng), keys);
    }

    #[test]
    fn test_draw_caps_without_duplicates() {
        let mut rng = StdRng::seed_from_u64(7);
        let keys: Vec<String> = (0..200).map(|i| format!("k{}", i)).collect();
        let drawn = sampler(50).draw(keys.clone(), &mut rng);

        assert_eq!(drawn.len(), 50);
        let unique: HashSet<_> = drawn.iter().collect();
        assert_eq!(unique.len(), 50);
        assert!(drawn.iter().all(|k| keys.contains(k)));
    }
}
