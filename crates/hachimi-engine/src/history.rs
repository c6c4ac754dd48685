//! History browsing: filter and sort stored records.
//!
//! A query combines a time window on `lastUpdated`, an inclusive score
//! range, an any-of interaction filter and a platform filter. Empty
//! filters match everything.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use hachimi_types::{ActionType, ContentRecord, Platform};

/// Engaged time (seconds) above which a record counts as read even without
/// a `read_30s` action.
pub const READ_SEEN_SECONDS: f64 = 10.0;

/// Age window on `lastUpdated`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeWindow {
    #[serde(rename = "1h")]
    Hour,
    #[serde(rename = "4h")]
    FourHours,
    #[serde(rename = "12h")]
    TwelveHours,
    #[serde(rename = "1d")]
    Day,
    #[serde(rename = "1w")]
    Week,
    #[serde(rename = "1m")]
    Month,
    #[default]
    #[serde(rename = "all")]
    All,
}

impl TimeWindow {
    /// Maximum age, or `None` for unbounded.
    pub fn max_age(&self) -> Option<Duration> {
        match self {
            TimeWindow::Hour => Some(Duration::hours(1)),
            TimeWindow::FourHours => Some(Duration::hours(4)),
            TimeWindow::TwelveHours => Some(Duration::hours(12)),
            TimeWindow::Day => Some(Duration::days(1)),
            TimeWindow::Week => Some(Duration::weeks(1)),
            TimeWindow::Month => Some(Duration::days(30)),
            TimeWindow::All => None,
        }
    }
}

impl FromStr for TimeWindow {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1h" => Ok(TimeWindow::Hour),
            "4h" => Ok(TimeWindow::FourHours),
            "12h" => Ok(TimeWindow::TwelveHours),
            "1d" => Ok(TimeWindow::Day),
            "1w" => Ok(TimeWindow::Week),
            "1m" => Ok(TimeWindow::Month),
            "all" => Ok(TimeWindow::All),
            other => Err(format!(
                "unknown time window '{}', expected one of 1h, 4h, 12h, 1d, 1w, 1m, all",
                other
            )),
        }
    }
}

/// One interaction a record can be filtered on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum InteractionFilter {
    /// Manual rating equal to the value (`score_9`)
    ManualScore(i64),
    /// Action of this type present
    Action(ActionType),
    /// Favorited on either platform (`favorite` or `star`)
    Favorite,
    /// Read for a while without reaching `read_30s`
    ReadSeen,
}

impl InteractionFilter {
    pub fn matches(&self, record: &ContentRecord) -> bool {
        match self {
            InteractionFilter::ManualScore(score) => record.metadata.manual_score == Some(*score),
            InteractionFilter::Action(action) => record.has_action(*action),
            InteractionFilter::Favorite => {
                record.has_action(ActionType::Favorite) || record.has_action(ActionType::Star)
            }
            InteractionFilter::ReadSeen => {
                !record.has_action(ActionType::Read30s)
                    && record.metadata.user_read_duration.unwrap_or(0.0) > READ_SEEN_SECONDS
            }
        }
    }
}

impl fmt::Display for InteractionFilter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            InteractionFilter::ManualScore(score) => write!(f, "score_{}", score),
            InteractionFilter::Action(action) => write!(f, "{}", action),
            InteractionFilter::Favorite => f.write_str("favorite"),
            InteractionFilter::ReadSeen => f.write_str("read_seen"),
        }
    }
}

impl FromStr for InteractionFilter {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "favorite" => return Ok(InteractionFilter::Favorite),
            "read_seen" => return Ok(InteractionFilter::ReadSeen),
            _ => {}
        }
        if let Some(score) = s.strip_prefix("score_") {
            return score
                .parse()
                .map(InteractionFilter::ManualScore)
                .map_err(|_| format!("invalid manual score filter '{}'", s));
        }
        s.parse::<ActionType>()
            .map(InteractionFilter::Action)
            .map_err(|_| format!("unknown interaction '{}'", s))
    }
}

impl TryFrom<String> for InteractionFilter {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<InteractionFilter> for String {
    fn from(filter: InteractionFilter) -> Self {
        filter.to_string()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortField {
    #[default]
    Time,
    Score,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl FromStr for SortField {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "time" => Ok(SortField::Time),
            "score" => Ok(SortField::Score),
            other => Err(format!("unknown sort field '{}', expected time or score", other)),
        }
    }
}

impl FromStr for SortOrder {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "asc" => Ok(SortOrder::Asc),
            "desc" => Ok(SortOrder::Desc),
            other => Err(format!("unknown sort order '{}', expected asc or desc", other)),
        }
    }
}

/// Filter and sort options for browsing history.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct HistoryQuery {
    pub window: TimeWindow,
    pub min_score: Option<i64>,
    pub max_score: Option<i64>,
    /// Any-of; empty matches all
    pub interactions: Vec<InteractionFilter>,
    /// Any-of; empty matches all
    pub platforms: Vec<Platform>,
    pub sort_field: SortField,
    pub sort_order: SortOrder,
    pub limit: Option<usize>,
}

impl HistoryQuery {
    /// Whether `record` passes every filter at `now`.
    pub fn matches(&self, record: &ContentRecord, now: DateTime<Utc>) -> bool {
        if let Some(max_age) = self.window.max_age() {
            if now - record.last_updated > max_age {
                return false;
            }
        }

        let score = record.metadata.score;
        if self.min_score.is_some_and(|min| score < min)
            || self.max_score.is_some_and(|max| score > max)
        {
            return false;
        }

        if !self.interactions.is_empty() && !self.interactions.iter().any(|i| i.matches(record)) {
            return false;
        }

        self.platforms.is_empty() || self.platforms.contains(&record.platform)
    }

    /// Filter, sort and truncate `records`.
    pub fn apply(&self, records: Vec<ContentRecord>, now: DateTime<Utc>) -> Vec<ContentRecord> {
        let mut matched: Vec<_> = records
            .into_iter()
            .filter(|r| self.matches(r, now))
            .collect();

        matched.sort_by(|a, b| {
            let ordering = match self.sort_field {
                SortField::Time => a.last_updated.cmp(&b.last_updated),
                SortField::Score => a.metadata.score.cmp(&b.metadata.score),
            }
            .then_with(|| a.id.cmp(&b.id));
            match self.sort_order {
                SortOrder::Asc => ordering,
                SortOrder::Desc => ordering.reverse(),
            }
        });

        if let Some(limit) = self.limit {
            matched.truncate(limit);
        }
        matched
    }
}
