//! # hachimi-types
//!
//! Shared domain types and pure algorithms for the hachimi engagement
//! history.
//!
//! This crate defines:
//! - Records: `ContentRecord`, observations (`PartialContentRecord`), actions
//! - Scoring: deduplicated signal score plus manual rating
//! - Merge: field-by-field accumulation of repeated observations
//! - Resonance: energy x cooling x immunity weights for resurfacing
//! - Settings: layered configuration
//!
//! ## Usage
//!
//! ```rust
//! use chrono::Utc;
//! use hachimi_types::{merge_record, PartialContentRecord, Platform};
//!
//! let observed = PartialContentRecord::new("x1", Platform::Zhihu).with_title("T");
//! let record = merge_record(None, observed, Utc::now()).unwrap();
//! assert_eq!(record.metadata.score, 1);
//! ```

pub mod config;
pub mod error;
pub mod merge;
pub mod record;
pub mod resonance;
pub mod scoring;

pub use config::{SamplerConfig, Settings};
pub use error::HachimiError;
pub use merge::merge_record;
pub use record::{
    ActionType, Author, ContentMetadata, ContentRecord, PartialContentRecord, PartialMetadata,
    Platform, UserAction, NO_EXCERPT_PLACEHOLDER,
};
pub use resonance::{
    energy_weight, ResonanceConfig, ResonanceScorer, WeightBreakdown, MAX_COOLING,
};
pub use scoring::{compute_score, score_level, signal_points, signal_score, HIGH_VALUE_SCORE};
