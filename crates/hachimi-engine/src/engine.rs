//! Consumer-facing engine over the record store.
//!
//! Every operation re-reads from storage; nothing is cached between calls.
//! Read-modify-write operations (observe, feedback) run inside a per-record
//! exclusive section so concurrent callers never lose actions or counter
//! increments. A failed commit applies nothing.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use hachimi_storage::Storage;
use hachimi_types::{
    compute_score, merge_record, ContentMetadata, ContentRecord, PartialContentRecord,
    ResonanceConfig, ResonanceScorer, SamplerConfig, Settings, WeightBreakdown,
};

use crate::error::EngineError;
use crate::history::HistoryQuery;
use crate::log::{LogEntry, LogHub, LogLevel};
use crate::sampler::StratifiedSampler;
use crate::selection::select;

/// Result of feeding one observation to the engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "record", rename_all = "lowercase")]
pub enum ObserveOutcome {
    /// The collector could not extract anything; nothing was written
    Skipped,
    Created(ContentRecord),
    Merged(ContentRecord),
}

impl ObserveOutcome {
    pub fn record(&self) -> Option<&ContentRecord> {
        match self {
            ObserveOutcome::Skipped => None,
            ObserveOutcome::Created(r) | ObserveOutcome::Merged(r) => Some(r),
        }
    }
}

/// Summary counts over the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total: u64,
    pub by_platform: BTreeMap<String, u64>,
    /// Records at or above the high-value threshold
    pub high_value: u64,
    pub disk_usage_bytes: u64,
}

/// Resonance engine: observation, resurfacing, feedback and retention.
pub struct ResonanceEngine {
    storage: Arc<Storage>,
    scorer: ResonanceScorer,
    sampler: StratifiedSampler,
    logs: Arc<LogHub>,
}

impl ResonanceEngine {
    /// Create an engine configured from `settings`, with its own log hub.
    pub fn new(storage: Arc<Storage>, settings: &Settings) -> Self {
        Self::with_parts(
            storage,
            settings.resonance.clone(),
            settings.sampler.clone(),
            Arc::new(LogHub::new(settings.log_capacity)),
        )
    }

    pub fn with_parts(
        storage: Arc<Storage>,
        resonance: ResonanceConfig,
        sampler: SamplerConfig,
        logs: Arc<LogHub>,
    ) -> Self {
        Self {
            storage,
            scorer: ResonanceScorer::new(resonance),
            sampler: StratifiedSampler::new(sampler),
            logs,
        }
    }

    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    pub fn scorer(&self) -> &ResonanceScorer {
        &self.scorer
    }

    pub fn sampler(&self) -> &StratifiedSampler {
        &self.sampler
    }

    pub fn logs(&self) -> &Arc<LogHub> {
        &self.logs
    }

    fn logged<T>(&self, op: &str, result: Result<T, EngineError>) -> Result<T, EngineError> {
        if let Err(e) = &result {
            self.logs.error(format!("{} failed: {}", op, e));
        }
        result
    }

    // ==================== Observation ====================

    /// Merge an observation into the store. `None` is a skipped extraction.
    pub fn observe(
        &self,
        observation: Option<PartialContentRecord>,
    ) -> Result<ObserveOutcome, EngineError> {
        self.observe_at(observation, Utc::now())
    }

    #[instrument(skip(self, observation), fields(id = observation.as_ref().map(|o| o.id.as_str())))]
    pub fn observe_at(
        &self,
        observation: Option<PartialContentRecord>,
        now: DateTime<Utc>,
    ) -> Result<ObserveOutcome, EngineError> {
        let Some(observation) = observation else {
            debug!("Extraction skipped");
            return Ok(ObserveOutcome::Skipped);
        };

        let result = observation
            .validate()
            .map_err(EngineError::InvalidInput)
            .and_then(|()| {
                let id = observation.id.clone();
                self.storage.run_exclusive(&id, |txn| {
                    let existing = txn.take_current();
                    let created = existing.is_none();
                    let merged = merge_record(existing, observation, now)?;
                    txn.put(merged.clone());
                    Ok::<_, EngineError>(if created {
                        ObserveOutcome::Created(merged)
                    } else {
                        ObserveOutcome::Merged(merged)
                    })
                })
            });
        let outcome = self.logged("observe", result)?;

        if let Some(record) = outcome.record() {
            let verb = match outcome {
                ObserveOutcome::Created(_) => "Saved",
                _ => "Updated",
            };
            let mut entry = LogEntry::new(
                LogLevel::Success,
                format!("{} [{}] {}", verb, record.platform, record.title),
            )
            .with_data(serde_json::json!({
                "id": record.id,
                "score": record.metadata.score,
                "level": record.level(),
            }));
            if !record.content_excerpt.is_empty() {
                entry = entry.with_excerpt(record.content_excerpt.clone());
            }
            self.logs.push(entry);
        }
        Ok(outcome)
    }

    /// Whether a record with this id is stored.
    pub fn exists(&self, id: &str) -> Result<bool, EngineError> {
        Ok(self.storage.exists(id)?)
    }

    pub fn get(&self, id: &str) -> Result<Option<ContentRecord>, EngineError> {
        Ok(self.storage.get_record(id)?)
    }

    /// Delete a record so it can be observed afresh later.
    ///
    /// Returns false if nothing was stored under `id`.
    pub fn exempt(&self, id: &str) -> Result<bool, EngineError> {
        let result = self.storage.delete_record(id).map_err(EngineError::from);
        let removed = self.logged("exempt", result)?;
        if removed {
            self.logs.info(format!("Exempted {}", id));
        }
        Ok(removed)
    }

    // ==================== Resurfacing ====================

    /// Pick up to `count` records to resurface and mark them shown.
    pub fn resonance_selection(&self, count: usize) -> Result<Vec<ContentRecord>, EngineError> {
        self.resonance_selection_at(count, Utc::now(), &mut rand::rng())
    }

    /// Sample, select and write back `lastShownAt` plus the show count.
    ///
    /// The write-back for every picked record is one batch: either all are
    /// marked shown or none are. Records deleted between selection and
    /// write-back are dropped from the result.
    #[instrument(skip(self, rng))]
    pub fn resonance_selection_at<R: Rng + ?Sized>(
        &self,
        count: usize,
        now: DateTime<Utc>,
        rng: &mut R,
    ) -> Result<Vec<ContentRecord>, EngineError> {
        let candidates = self.logged(
            "resonance selection",
            self.sampler.candidates(&self.storage, rng),
        )?;
        let pool = candidates.len();
        let picked = select(candidates, count, &self.scorer, now, rng);

        let ids: Vec<String> = picked.into_iter().map(|r| r.id).collect();
        let updated = self.storage.run_exclusive_many(&ids, |txns| {
            let mut marked = HashMap::with_capacity(txns.len());
            for txn in txns.iter_mut() {
                if let Some(mut record) = txn.take_current() {
                    mark_shown(&mut record.metadata, now);
                    txn.put(record.clone());
                    marked.insert(record.id.clone(), record);
                }
            }
            Ok::<_, EngineError>(marked)
        });
        let mut marked = self.logged("resonance selection", updated)?;

        let shown: Vec<ContentRecord> = ids.iter().filter_map(|id| marked.remove(id)).collect();
        info!(pool, selected = shown.len(), "Resonance selection");
        Ok(shown)
    }

    fn update_feedback<F>(&self, id: &str, update: F) -> Result<Option<ContentRecord>, EngineError>
    where
        F: FnOnce(&mut ContentMetadata),
    {
        self.storage.run_exclusive(id, |txn| {
            let Some(mut record) = txn.take_current() else {
                return Ok(None);
            };
            update(&mut record.metadata);
            txn.put(record.clone());
            Ok::<_, EngineError>(Some(record))
        })
    }

    /// Count a click on a resurfaced record and restart its cooling clock.
    ///
    /// Returns false if the record is gone.
    pub fn report_click(&self, id: &str) -> Result<bool, EngineError> {
        self.report_click_at(id, Utc::now())
    }

    pub fn report_click_at(&self, id: &str, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let updated = self.update_feedback(id, |m| {
            m.capsule_click_count = Some(bump(m.capsule_click_count));
            m.last_shown_at = Some(now);
        });
        Ok(self.logged("click", updated)?.is_some())
    }

    /// Count a hover on a resurfaced record. Returns false if it is gone.
    pub fn report_hover(&self, id: &str) -> Result<bool, EngineError> {
        let updated = self.update_feedback(id, |m| {
            m.capsule_hover_count = Some(bump(m.capsule_hover_count));
        });
        Ok(self.logged("hover", updated)?.is_some())
    }

    // ==================== Diagnostics ====================

    pub fn score(&self, record: &ContentRecord) -> i64 {
        compute_score(record)
    }

    pub fn weight(&self, record: &ContentRecord) -> f64 {
        self.weight_at(record, Utc::now())
    }

    pub fn weight_at(&self, record: &ContentRecord, now: DateTime<Utc>) -> f64 {
        self.scorer.weight(record, now)
    }

    pub fn weight_breakdown_at(&self, record: &ContentRecord, now: DateTime<Utc>) -> WeightBreakdown {
        self.scorer.breakdown(record, now)
    }

    // ==================== History ====================

    /// Most recently updated records, newest first.
    pub fn recent(&self, limit: usize) -> Result<Vec<ContentRecord>, EngineError> {
        Ok(self.storage.recent_records(limit)?)
    }

    pub fn history(&self, query: &HistoryQuery) -> Result<Vec<ContentRecord>, EngineError> {
        self.history_at(query, Utc::now())
    }

    pub fn history_at(
        &self,
        query: &HistoryQuery,
        now: DateTime<Utc>,
    ) -> Result<Vec<ContentRecord>, EngineError> {
        let records = self.storage.all_records()?;
        Ok(query.apply(records, now))
    }

    pub fn all_records(&self) -> Result<Vec<ContentRecord>, EngineError> {
        Ok(self.storage.all_records()?)
    }

    // ==================== Retention ====================

    /// Delete every record last updated at or before `cutoff`.
    pub fn delete_before(&self, cutoff: DateTime<Utc>) -> Result<usize, EngineError> {
        let result = self
            .storage
            .delete_updated_before(cutoff.timestamp_millis())
            .map_err(EngineError::from);
        let count = self.logged("delete before", result)?;
        self.logs
            .info(format!("Deleted {} records updated before {}", count, cutoff));
        Ok(count)
    }

    pub fn delete_many(&self, ids: &[String]) -> Result<usize, EngineError> {
        let result = self.storage.delete_many(ids).map_err(EngineError::from);
        let count = self.logged("delete many", result)?;
        self.logs.info(format!("Deleted {} records", count));
        Ok(count)
    }

    pub fn delete_all(&self) -> Result<usize, EngineError> {
        let result = self.storage.delete_all().map_err(EngineError::from);
        let count = self.logged("delete all", result)?;
        self.logs.info(format!("Cleared {} records", count));
        Ok(count)
    }

    pub fn stats(&self) -> Result<EngineStats, EngineError> {
        let threshold = self.sampler.config().high_value_threshold;
        let high_value = self.storage.keys_in_score_range(Some(threshold), None)?.len() as u64;

        let mut by_platform = BTreeMap::new();
        for record in self.storage.all_records()? {
            *by_platform.entry(record.platform.to_string()).or_insert(0) += 1;
        }

        let storage = self.storage.get_stats()?;
        Ok(EngineStats {
            total: storage.record_count,
            by_platform,
            high_value,
            disk_usage_bytes: storage.disk_usage_bytes,
        })
    }
}

/// Increment a feedback counter, saturating at `u32::MAX`.
fn bump(count: Option<u32>) -> u32 {
    count.unwrap_or(0).saturating_add(1)
}

fn mark_shown(metadata: &mut ContentMetadata, now: DateTime<Utc>) {
    metadata.last_shown_at = Some(now);
    metadata.capsule_show_count = Some(bump(metadata.capsule_show_count));
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};
    use hachimi_types::{ActionType, Platform, UserAction};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use tempfile::TempDir;

    fn create_test_engine() -> (ResonanceEngine, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let storage = Arc::new(Storage::open(temp_dir.path()).unwrap());
        let engine = ResonanceEngine::with_parts(
            storage,
            ResonanceConfig::default(),
            SamplerConfig::default(),
            Arc::new(LogHub::new(100)),
        );
        (engine, temp_dir)
    }

    fn t0() -> DateTime<Utc> {
        Utc.timestamp_millis_opt(1_706_540_400_000).unwrap()
    }

    #[test]
    fn test_observe_none_is_skipped() {
        let (engine, _temp) = create_test_engine();
        assert_eq!(engine.observe(None).unwrap(), ObserveOutcome::Skipped);
        assert!(engine.logs().is_empty());
    }

    #[test]
    fn test_observe_creates_then_merges() {
        let (engine, _temp) = create_test_engine();
        let first = engine
            .observe_at(
                Some(PartialContentRecord::new("x1", Platform::Zhihu).with_title("T")),
                t0(),
            )
            .unwrap();
        let record = match first {
            ObserveOutcome::Created(r) => r,
            other => panic!("expected Created, got {:?}", other),
        };
        assert_eq!(record.metadata.score, 1);
        assert_eq!(record.actions.len(), 1);
        assert_eq!(record.first_seen, record.last_updated);

        let second = engine
            .observe_at(
                Some(
                    PartialContentRecord::new("x1", Platform::Zhihu)
                        .with_action(UserAction::new(ActionType::Like, t0())),
                ),
                t0() + Duration::minutes(1),
            )
            .unwrap();
        assert!(matches!(second, ObserveOutcome::Merged(ref r) if r.metadata.score == 3));

        let logs = engine.logs().snapshot();
        assert_eq!(logs.len(), 2);
        assert!(logs[0].message.starts_with("Saved"));
        let data = logs[1].data.as_ref().unwrap();
        assert_eq!(data["id"], "x1");
        assert_eq!(data["score"], 3);
        assert_eq!(data["level"], 2);
    }

    #[test]
    fn test_observe_rejects_invalid_and_logs_error() {
        let (engine, _temp) = create_test_engine();
        let result = engine.observe(Some(
            PartialContentRecord::new("x1", Platform::Zhihu).with_manual_score(-2),
        ));
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        assert!(!engine.exists("x1").unwrap());
        assert_eq!(engine.logs().snapshot()[0].level, crate::log::LogLevel::Error);
    }

    #[test]
    fn test_platform_mismatch_leaves_record_untouched() {
        let (engine, _temp) = create_test_engine();
        engine
            .observe_at(Some(PartialContentRecord::new("x1", Platform::Zhihu)), t0())
            .unwrap();
        let result = engine.observe(Some(
            PartialContentRecord::new("x1", Platform::Bilibili).with_title("other"),
        ));
        assert!(matches!(result, Err(EngineError::InvalidInput(_))));
        assert_eq!(engine.get("x1").unwrap().unwrap().title, "");
    }

    #[test]
    fn test_feedback_on_missing_record_is_noop() {
        let (engine, _temp) = create_test_engine();
        assert!(!engine.report_click("ghost").unwrap());
        assert!(!engine.report_hover("ghost").unwrap());
        assert!(!engine.exempt("ghost").unwrap());
        assert!(!engine.exists("ghost").unwrap());
    }

    #[test]
    fn test_click_and_hover_counters() {
        let (engine, _temp) = create_test_engine();
        engine
            .observe_at(Some(PartialContentRecord::new("x1", Platform::Bilibili)), t0())
            .unwrap();

        let clicked_at = t0() + Duration::hours(1);
        assert!(engine.report_click_at("x1", clicked_at).unwrap());
        assert!(engine.report_hover("x1").unwrap());
        assert!(engine.report_hover("x1").unwrap());

        let stored = engine.get("x1").unwrap().unwrap();
        assert_eq!(stored.metadata.capsule_click_count, Some(1));
        assert_eq!(stored.metadata.capsule_hover_count, Some(2));
        assert_eq!(stored.metadata.capsule_show_count, None);
        assert_eq!(stored.metadata.last_shown_at, Some(clicked_at));
        // Feedback is not engagement.
        assert_eq!(stored.last_updated, t0());
    }

    #[test]
    fn test_selection_writes_back_show_state() {
        let (engine, _temp) = create_test_engine();
        for i in 0..6 {
            engine
                .observe_at(
                    Some(PartialContentRecord::new(format!("r{}", i), Platform::Zhihu)),
                    t0(),
                )
                .unwrap();
        }

        let now = t0() + Duration::days(1);
        let mut rng = StdRng::seed_from_u64(17);
        let shown = engine.resonance_selection_at(3, now, &mut rng).unwrap();
        assert_eq!(shown.len(), 3);

        for record in &shown {
            let stored = engine.get(&record.id).unwrap().unwrap();
            assert_eq!(stored.metadata.last_shown_at, Some(now));
            assert_eq!(stored.metadata.capsule_show_count, Some(1));
            assert_eq!(&stored, record);
        }
    }

    #[test]
    fn test_exempt_allows_fresh_observation() {
        let (engine, _temp) = create_test_engine();
        engine
            .observe_at(
                Some(PartialContentRecord::new("x1", Platform::Zhihu).with_read_duration(40.0)),
                t0(),
            )
            .unwrap();
        assert!(engine.exempt("x1").unwrap());
        assert!(!engine.exists("x1").unwrap());

        let outcome = engine
            .observe(Some(PartialContentRecord::new("x1", Platform::Zhihu)))
            .unwrap();
        match outcome {
            ObserveOutcome::Created(r) => assert_eq!(r.metadata.user_read_duration, None),
            other => panic!("expected Created, got {:?}", other),
        }
    }

    #[test]
    fn test_stats() {
        let (engine, _temp) = create_test_engine();
        engine
            .observe_at(
                Some(PartialContentRecord::new("a", Platform::Zhihu).with_manual_score(9)),
                t0(),
            )
            .unwrap();
        engine
            .observe_at(Some(PartialContentRecord::new("b", Platform::Bilibili)), t0())
            .unwrap();

        let stats = engine.stats().unwrap();
        assert_eq!(stats.total, 2);
        assert_eq!(stats.high_value, 1);
        assert_eq!(stats.by_platform.get("zhihu"), Some(&1));
        assert_eq!(stats.by_platform.get("bilibili"), Some(&1));
    }
}
