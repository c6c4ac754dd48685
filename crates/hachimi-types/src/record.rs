//! Content record types.
//!
//! A `ContentRecord` is the unit of persistence: one record per observed
//! piece of content, keyed by its platform-scoped id. Collectors produce
//! `PartialContentRecord` observations which the merge engine folds into
//! the stored record.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::scoring::score_level;

/// Placeholder excerpt emitted by collectors when no body text was found.
///
/// Treated as absent by the merge engine.
pub const NO_EXCERPT_PLACEHOLDER: &str = "无正文内容";

/// Content platform a record was observed on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Platform {
    /// Q&A site (answers and articles)
    Zhihu,
    /// Video site
    Bilibili,
}

impl Platform {
    /// All known platforms.
    pub const ALL: [Platform; 2] = [Platform::Zhihu, Platform::Bilibili];

    /// Stable lowercase name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Zhihu => "zhihu",
            Platform::Bilibili => "bilibili",
        }
    }
}

impl std::fmt::Display for Platform {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "zhihu" => Ok(Platform::Zhihu),
            "bilibili" => Ok(Platform::Bilibili),
            other => Err(format!("unknown platform: {}", other)),
        }
    }
}

/// Kind of user interaction recorded against a piece of content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    #[serde(rename = "view")]
    View,
    #[serde(rename = "read_30s")]
    Read30s,
    #[serde(rename = "play_50")]
    Play50,
    #[serde(rename = "play_90")]
    Play90,
    #[serde(rename = "upvote")]
    Upvote,
    #[serde(rename = "unvote")]
    Unvote,
    #[serde(rename = "like")]
    Like,
    #[serde(rename = "unlike")]
    Unlike,
    #[serde(rename = "favorite")]
    Favorite,
    /// Legacy spelling of favorite, kept for stored data
    #[serde(rename = "star")]
    Star,
    #[serde(rename = "coin")]
    Coin,
    #[serde(rename = "share")]
    Share,
    #[serde(rename = "comment")]
    Comment,
    #[serde(rename = "open_comment")]
    OpenComment,
    #[serde(rename = "danmaku")]
    Danmaku,
    #[serde(rename = "triple")]
    Triple,
    /// Reserved: a manual rating event. Never scored from the action table.
    #[serde(rename = "manual_score")]
    ManualScore,
    #[serde(rename = "copy")]
    Copy,
}

impl ActionType {
    /// Wire name of the action.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionType::View => "view",
            ActionType::Read30s => "read_30s",
            ActionType::Play50 => "play_50",
            ActionType::Play90 => "play_90",
            ActionType::Upvote => "upvote",
            ActionType::Unvote => "unvote",
            ActionType::Like => "like",
            ActionType::Unlike => "unlike",
            ActionType::Favorite => "favorite",
            ActionType::Star => "star",
            ActionType::Coin => "coin",
            ActionType::Share => "share",
            ActionType::Comment => "comment",
            ActionType::OpenComment => "open_comment",
            ActionType::Danmaku => "danmaku",
            ActionType::Triple => "triple",
            ActionType::ManualScore => "manual_score",
            ActionType::Copy => "copy",
        }
    }
}

impl std::fmt::Display for ActionType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ActionType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        serde_json::from_value(serde_json::Value::String(s.to_string()))
            .map_err(|_| format!("unknown action type: {}", s))
    }
}

/// A single recorded interaction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAction {
    #[serde(rename = "type")]
    pub action_type: ActionType,

    /// When the interaction happened
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,

    /// Optional action payload (e.g. the value of a manual rating)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl UserAction {
    pub fn new(action_type: ActionType, timestamp: DateTime<Utc>) -> Self {
        Self {
            action_type,
            timestamp,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }
}

/// Content author.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Author {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub followers: Option<u64>,
    /// Author headline (Q&A site only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
}

impl Author {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

/// Derived and accumulated metadata for a stored record.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentMetadata {
    /// Signal score, recomputed on every merge
    #[serde(default)]
    pub score: i64,

    /// Explicit user rating, additive to the signal score
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_score: Option<i64>,

    /// Total engaged time in seconds, summed across observations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_read_duration: Option<f64>,

    /// Video length in seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u64>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,

    /// Last time the record was resurfaced
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_shown_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capsule_show_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capsule_hover_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capsule_click_count: Option<u32>,
}

/// A stored piece of engaged content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    /// Platform-scoped identifier (answer id, video id). Primary key.
    pub id: String,

    /// Immutable after creation
    pub platform: Platform,

    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default)]
    pub author: Author,
    #[serde(default)]
    pub content_excerpt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,

    #[serde(default)]
    pub metadata: ContentMetadata,

    /// Append-only interaction log
    #[serde(default)]
    pub actions: Vec<UserAction>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_updated: DateTime<Utc>,

    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub first_seen: DateTime<Utc>,
}

impl ContentRecord {
    /// Create an empty record seen for the first time at `now`.
    ///
    /// The score is left at zero; records reach storage through the merge
    /// engine, which computes it.
    pub fn new(id: impl Into<String>, platform: Platform, now: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            platform,
            title: String::new(),
            url: String::new(),
            cover: None,
            author: Author::default(),
            content_excerpt: String::new(),
            full_content: None,
            metadata: ContentMetadata::default(),
            actions: Vec::new(),
            last_updated: now,
            first_seen: now,
        }
    }

    /// Display level derived from the signal score (1-4).
    pub fn level(&self) -> u8 {
        score_level(self.metadata.score)
    }

    /// Whether any action of the given type was recorded.
    pub fn has_action(&self, action_type: ActionType) -> bool {
        self.actions.iter().any(|a| a.action_type == action_type)
    }

    /// Serialize record to JSON bytes for storage
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize record from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

/// Metadata carried by an observation. Every field is optional; `score`
/// is never accepted from collectors.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manual_score: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_read_duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub views: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub vote_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comment_count: Option<u64>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub publish_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tags: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_shown_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capsule_show_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capsule_hover_count: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub capsule_click_count: Option<u32>,
}

/// A single observation of a piece of content, as produced by a collector.
///
/// `platform` is required when the id is not yet stored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PartialContentRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<Platform>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cover: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<Author>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_excerpt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub full_content: Option<String>,
    #[serde(default)]
    pub metadata: PartialMetadata,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actions: Option<Vec<UserAction>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub first_seen: Option<DateTime<Utc>>,
    #[serde(
        default,
        with = "chrono::serde::ts_milliseconds_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_updated: Option<DateTime<Utc>>,
}

impl PartialContentRecord {
    /// Start an observation for `id` on `platform`.
    pub fn new(id: impl Into<String>, platform: Platform) -> Self {
        Self {
            id: id.into(),
            platform: Some(platform),
            ..Default::default()
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_excerpt(mut self, excerpt: impl Into<String>) -> Self {
        self.content_excerpt = Some(excerpt.into());
        self
    }

    pub fn with_action(mut self, action: UserAction) -> Self {
        self.actions.get_or_insert_with(Vec::new).push(action);
        self
    }

    pub fn with_manual_score(mut self, score: i64) -> Self {
        self.metadata.manual_score = Some(score);
        self
    }

    pub fn with_read_duration(mut self, seconds: f64) -> Self {
        self.metadata.user_read_duration = Some(seconds);
        self
    }

    /// Reject observations that can never be stored.
    pub fn validate(&self) -> Result<(), String> {
        if self.id.trim().is_empty() {
            return Err("id must not be empty".to_string());
        }
        if let Some(score) = self.metadata.manual_score {
            if score < 0 {
                return Err(format!("manualScore must be >= 0, got {}", score));
            }
        }
        if let Some(duration) = self.metadata.user_read_duration {
            if !duration.is_finite() || duration < 0.0 {
                return Err(format!(
                    "userReadDuration must be a non-negative number, got {}",
                    duration
                ));
            }
        }
        Ok(())
    }

    /// Serialize observation to JSON bytes
    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }

    /// Deserialize observation from JSON bytes
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_action_type_wire_names() {
        let json = serde_json::to_string(&ActionType::Read30s).unwrap();
        assert_eq!(json, "\"read_30s\"");
        assert_eq!("play_90".parse::<ActionType>().unwrap(), ActionType::Play90);
        assert_eq!(ActionType::OpenComment.as_str(), "open_comment");
        assert!("dance".parse::<ActionType>().is_err());
    }

    #[test]
    fn test_platform_parse() {
        assert_eq!("zhihu".parse::<Platform>().unwrap(), Platform::Zhihu);
        assert_eq!(Platform::Bilibili.to_string(), "bilibili");
        assert!("youtube".parse::<Platform>().is_err());
    }

    #[test]
    fn test_record_uses_camel_case_and_millis() {
        let ts = Utc.timestamp_millis_opt(1_706_540_400_000).unwrap();
        let mut record = ContentRecord::new("BV1xx", Platform::Bilibili, ts);
        record.metadata.user_read_duration = Some(12.5);
        record.actions.push(UserAction::new(ActionType::Coin, ts));

        let value: serde_json::Value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["firstSeen"], 1_706_540_400_000i64);
        assert_eq!(value["metadata"]["userReadDuration"], 12.5);
        assert_eq!(value["actions"][0]["type"], "coin");
        assert!(value["metadata"].get("lastShownAt").is_none());
    }

    #[test]
    fn test_partial_from_collector_json() {
        let json = r#"{
            "id": "x1",
            "platform": "zhihu",
            "title": "T",
            "metadata": { "score": 99, "userReadDuration": 10 }
        }"#;
        let partial = PartialContentRecord::from_bytes(json.as_bytes()).unwrap();
        assert_eq!(partial.platform, Some(Platform::Zhihu));
        assert_eq!(partial.metadata.user_read_duration, Some(10.0));
        assert!(partial.actions.is_none());
    }

    #[test]
    fn test_partial_validate() {
        assert!(PartialContentRecord::new("x1", Platform::Zhihu).validate().is_ok());
        assert!(PartialContentRecord::new("  ", Platform::Zhihu).validate().is_err());
        assert!(PartialContentRecord::new("x1", Platform::Zhihu)
            .with_manual_score(-1)
            .validate()
            .is_err());
        assert!(PartialContentRecord::new("x1", Platform::Zhihu)
            .with_read_duration(f64::NAN)
            .validate()
            .is_err());
    }
}
