//! Merge engine: fold an observation into the stored record.
//!
//! Repeated observations of the same content accumulate rather than
//! overwrite. The policy, field by field:
//!
//! | field | policy |
//! |-------|--------|
//! | title, url, cover, excerpt, full content, author sub-fields | incoming wins only if present and non-empty |
//! | descriptive metadata (views, tags, ...) | incoming wins only if present |
//! | `userReadDuration` | summed |
//! | `manualScore` | incoming wins only if present |
//! | resurfacing counters | incoming wins only if present |
//! | `actions` | existing followed by incoming |
//! | `firstSeen` | existing, never changes |
//! | `lastUpdated` | now |
//! | `score` | recomputed last |
//!
//! The functions here are pure; the storage layer wraps them in a
//! per-record exclusive section so concurrent observations of the same id
//! never lose actions.

use chrono::{DateTime, Utc};

use crate::error::HachimiError;
use crate::record::{
    ActionType, Author, ContentMetadata, ContentRecord, PartialContentRecord, PartialMetadata,
    UserAction, NO_EXCERPT_PLACEHOLDER,
};
use crate::scoring::compute_score;

/// Keep a text value only if it carries information.
fn present(value: Option<String>) -> Option<String> {
    value.filter(|v| {
        let trimmed = v.trim();
        !trimmed.is_empty() && trimmed != NO_EXCERPT_PLACEHOLDER
    })
}

fn overwrite(target: &mut String, incoming: Option<String>) {
    if let Some(value) = present(incoming) {
        *target = value;
    }
}

fn overwrite_opt(target: &mut Option<String>, incoming: Option<String>) {
    if let Some(value) = present(incoming) {
        *target = Some(value);
    }
}

fn overwrite_if_some<T>(target: &mut Option<T>, incoming: Option<T>) {
    if incoming.is_some() {
        *target = incoming;
    }
}

fn sum_durations(existing: Option<f64>, incoming: Option<f64>) -> Option<f64> {
    match (existing, incoming) {
        (None, None) => None,
        (a, b) => Some(a.unwrap_or(0.0) + b.unwrap_or(0.0)),
    }
}

fn merge_author(existing: &mut Author, incoming: Author) {
    overwrite(&mut existing.name, Some(incoming.name));
    overwrite_opt(&mut existing.url, incoming.url);
    overwrite_opt(&mut existing.id, incoming.id);
    overwrite_opt(&mut existing.avatar, incoming.avatar);
    overwrite_opt(&mut existing.title, incoming.title);
    overwrite_if_some(&mut existing.followers, incoming.followers);
}

fn metadata_from_partial(partial: PartialMetadata) -> ContentMetadata {
    ContentMetadata {
        score: 0,
        manual_score: partial.manual_score,
        user_read_duration: partial.user_read_duration,
        duration: partial.duration,
        views: partial.views,
        vote_count: partial.vote_count,
        comment_count: partial.comment_count,
        publish_time: partial.publish_time,
        tags: partial.tags.unwrap_or_default(),
        category: partial.category,
        last_shown_at: partial.last_shown_at,
        capsule_show_count: partial.capsule_show_count,
        capsule_hover_count: partial.capsule_hover_count,
        capsule_click_count: partial.capsule_click_count,
    }
}

fn merge_metadata(existing: &mut ContentMetadata, incoming: PartialMetadata) {
    existing.user_read_duration =
        sum_durations(existing.user_read_duration, incoming.user_read_duration);
    overwrite_if_some(&mut existing.manual_score, incoming.manual_score);

    overwrite_if_some(&mut existing.duration, incoming.duration);
    overwrite_if_some(&mut existing.views, incoming.views);
    overwrite_if_some(&mut existing.vote_count, incoming.vote_count);
    overwrite_if_some(&mut existing.comment_count, incoming.comment_count);
    overwrite_if_some(&mut existing.publish_time, incoming.publish_time);
    overwrite_opt(&mut existing.category, incoming.category);
    if let Some(tags) = incoming.tags.filter(|t| !t.is_empty()) {
        existing.tags = tags;
    }

    // Resurfacing feedback: only explicit values replace stored ones.
    overwrite_if_some(&mut existing.last_shown_at, incoming.last_shown_at);
    overwrite_if_some(&mut existing.capsule_show_count, incoming.capsule_show_count);
    overwrite_if_some(&mut existing.capsule_hover_count, incoming.capsule_hover_count);
    overwrite_if_some(&mut existing.capsule_click_count, incoming.capsule_click_count);
}

/// Build the record for a previously unknown id.
fn create_record(
    incoming: PartialContentRecord,
    now: DateTime<Utc>,
) -> Result<ContentRecord, HachimiError> {
    let platform = incoming.platform.ok_or_else(|| {
        HachimiError::InvalidInput(format!(
            "platform is required to create record {}",
            incoming.id
        ))
    })?;

    let first_seen = incoming.first_seen.unwrap_or(now);
    let last_updated = incoming.last_updated.unwrap_or(now).max(first_seen);

    let actions = match incoming.actions {
        Some(actions) if !actions.is_empty() => actions,
        _ => vec![UserAction::new(ActionType::View, first_seen)],
    };

    let mut record = ContentRecord {
        id: incoming.id,
        platform,
        title: incoming.title.unwrap_or_default(),
        url: incoming.url.unwrap_or_default(),
        cover: incoming.cover,
        author: incoming.author.unwrap_or_default(),
        content_excerpt: incoming.content_excerpt.unwrap_or_default(),
        full_content: incoming.full_content,
        metadata: metadata_from_partial(incoming.metadata),
        actions,
        last_updated,
        first_seen,
    };
    record.metadata.score = compute_score(&record);
    Ok(record)
}

/// Merge an observation into an existing record (or create one).
///
/// # Errors
///
/// - `InvalidInput` if a new record has no platform
/// - `InvalidInput` if the observation's id or platform disagrees with the
///   existing record
pub fn merge_record(
    existing: Option<ContentRecord>,
    incoming: PartialContentRecord,
    now: DateTime<Utc>,
) -> Result<ContentRecord, HachimiError> {
    let mut record = match existing {
        None => return create_record(incoming, now),
        Some(record) => record,
    };

    if record.id != incoming.id {
        return Err(HachimiError::InvalidInput(format!(
            "cannot merge observation {} into record {}",
            incoming.id, record.id
        )));
    }
    if let Some(platform) = incoming.platform {
        if platform != record.platform {
            return Err(HachimiError::InvalidInput(format!(
                "record {} belongs to {}, observation claims {}",
                record.id, record.platform, platform
            )));
        }
    }

    overwrite(&mut record.title, incoming.title);
    overwrite(&mut record.url, incoming.url);
    overwrite_opt(&mut record.cover, incoming.cover);
    overwrite(&mut record.content_excerpt, incoming.content_excerpt);
    overwrite_opt(&mut record.full_content, incoming.full_content);
    if let Some(author) = incoming.author {
        merge_author(&mut record.author, author);
    }

    merge_metadata(&mut record.metadata, incoming.metadata);

    if let Some(actions) = incoming.actions {
        record.actions.extend(actions);
    }

    // firstSeen is immutable; the max keeps firstSeen <= lastUpdated even
    // if the clock stepped backwards.
    record.last_updated = now.max(record.first_seen);
    record.metadata.score = compute_score(&record);

    Ok(record)
}
