//! Signal scoring for engaged content.
//!
//! The signal score summarizes how strongly the user engaged with a record.
//! It is recomputed by the merge engine after every observation and is never
//! accepted from collectors.
//!
//! ## Scoring Formula
//!
//! ```text
//! signal = max(1, sum(points(platform, t) for each distinct action type t))
//! score  = signal + manual_score.unwrap_or(0)
//! ```
//!
//! - Each action type counts once per pass, so repeated views don't inflate
//!   the score.
//! - `manual_score` actions are skipped; the rating lives in metadata.
//! - The floor of 1 means a stored record always counts as seen.

use std::collections::HashSet;

use crate::record::{ActionType, ContentRecord, Platform};

/// Minimum signal score of any stored record.
pub const MIN_SIGNAL_SCORE: i64 = 1;

/// Score at which a record counts as high value (level 3 and above).
pub const HIGH_VALUE_SCORE: i64 = 7;

/// Points awarded for an action type on the Q&A site.
fn zhihu_points(action: ActionType) -> i64 {
    match action {
        ActionType::View => 1,
        ActionType::Read30s => 1,
        ActionType::Like => 2,
        ActionType::Star => 2,
        ActionType::Comment => 3,
        ActionType::OpenComment => 1,
        ActionType::Share => 3,
        _ => 0,
    }
}

/// Points awarded for an action type on the video site.
fn bilibili_points(action: ActionType) -> i64 {
    match action {
        ActionType::View => 1,
        ActionType::Play50 => 1,
        ActionType::Play90 => 2,
        ActionType::Like => 2,
        ActionType::Coin => 3,
        ActionType::Star => 2,
        ActionType::Triple => 6,
        ActionType::Danmaku => 2,
        ActionType::Comment => 3,
        ActionType::Share => 3,
        _ => 0,
    }
}

/// Table lookup of signal points. Unlisted types score 0.
pub fn signal_points(platform: Platform, action: ActionType) -> i64 {
    match platform {
        Platform::Zhihu => zhihu_points(action),
        Platform::Bilibili => bilibili_points(action),
    }
}

/// Deduplicated, table-driven signal score, floored at [`MIN_SIGNAL_SCORE`].
///
/// Excludes the manual rating.
pub fn signal_score(record: &ContentRecord) -> i64 {
    let mut seen = HashSet::new();
    let sum: i64 = record
        .actions
        .iter()
        .filter(|a| a.action_type != ActionType::ManualScore)
        .filter(|a| seen.insert(a.action_type))
        .map(|a| signal_points(record.platform, a.action_type))
        .sum();

    sum.max(MIN_SIGNAL_SCORE)
}

/// Compute the stored score of a record: signal score plus manual rating.
///
/// The manual rating is added unclamped and is not deduplicated. The sum
/// saturates at `i64::MAX`.
pub fn compute_score(record: &ContentRecord) -> i64 {
    signal_score(record).saturating_add(record.metadata.manual_score.unwrap_or(0))
}

/// Map a score to its display level.
///
/// - 4: active / high value (>= 10)
/// - 3: strong interaction (>= 7)
/// - 2: interaction (>= 3)
/// - 1: viewed
pub fn score_level(score: i64) -> u8 {
    if score >= 10 {
        4
    } else if score >= HIGH_VALUE_SCORE {
        3
    } else if score >= 3 {
        2
    } else {
        1
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::UserAction;
    use chrono::{Duration, TimeZone, Utc};

    fn record_with(platform: Platform, actions: &[ActionType]) -> ContentRecord {
        let base = Utc.timestamp_millis_opt(1_706_540_400_000).unwrap();
        let mut record = ContentRecord::new("r1", platform, base);
        for (i, action) in actions.iter().enumerate() {
            record
                .actions
                .push(UserAction::new(*action, base + Duration::seconds(i as i64)));
        }
        record
    }

    #[test]
    fn test_zero_actions_scores_floor() {
        let record = record_with(Platform::Zhihu, &[]);
        assert_eq!(compute_score(&record), 1);
    }

    #[test]
    fn test_unlisted_actions_still_floor() {
        let record = record_with(Platform::Zhihu, &[ActionType::Upvote, ActionType::Coin]);
        assert_eq!(compute_score(&record), 1);
    }

    #[test]
    fn test_duplicate_actions_count_once() {
        let once = record_with(Platform::Bilibili, &[ActionType::View, ActionType::Coin]);
        let many = record_with(
            Platform::Bilibili,
            &[
                ActionType::View,
                ActionType::Coin,
                ActionType::View,
                ActionType::Coin,
                ActionType::View,
            ],
        );
        assert_eq!(compute_score(&once), 4);
        assert_eq!(compute_score(&once), compute_score(&many));
    }

    #[test]
    fn test_platform_tables_differ() {
        let actions = [ActionType::View, ActionType::Triple];
        assert_eq!(compute_score(&record_with(Platform::Bilibili, &actions)), 7);
        assert_eq!(compute_score(&record_with(Platform::Zhihu, &actions)), 1);
    }

    #[test]
    fn test_manual_score_is_additive() {
        // view(1) + coin(3) = 4 signal, plus rating 9
        let mut record = record_with(Platform::Bilibili, &[ActionType::View, ActionType::Coin]);
        record.metadata.manual_score = Some(9);
        assert_eq!(signal_score(&record), 4);
        assert_eq!(compute_score(&record), 13);
    }

    #[test]
    fn test_manual_score_action_is_not_table_scored() {
        let mut record = record_with(Platform::Zhihu, &[ActionType::View, ActionType::ManualScore]);
        record.metadata.manual_score = Some(10);
        assert_eq!(compute_score(&record), 11);
    }

    #[test]
    fn test_huge_manual_score_saturates() {
        let mut record = record_with(Platform::Bilibili, &[ActionType::View, ActionType::Coin]);
        record.metadata.manual_score = Some(i64::MAX);
        assert_eq!(compute_score(&record), i64::MAX);
        assert_eq!(score_level(compute_score(&record)), 4);
    }

    #[test]
    fn test_score_level_thresholds() {
        assert_eq!(score_level(1), 1);
        assert_eq!(score_level(3), 2);
        assert_eq!(score_level(6), 2);
        assert_eq!(score_level(7), 3);
        assert_eq!(score_level(10), 4);
        assert_eq!(score_level(26), 4);
    }
}
