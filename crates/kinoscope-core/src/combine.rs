//! Combination policy
//!
//! Deterministic merge of per-segment analysis artifacts into one combined
//! artifact, independent of segment completion order. Fields are merged by
//! name where the policy knows them and by JSON shape otherwise:
//!
//! - paragraph fields: concatenation in segment-index order, single space
//! - "primary" free-text fields: first non-empty value in index order
//! - arrays: union across segments, preserving first-seen order
//! - objects carrying a numeric `confidence`: highest confidence wins,
//!   ties broken by the earliest segment index
//! - other strings: mode across segments, ties by first occurrence
//! - remaining scalars: first non-null value

use serde_json::{Map, Value};
use std::collections::HashSet;

/// Paragraph fields concatenated in index order.
const PARAGRAPH_FIELDS: &[&str] = &["summary", "narrative", "transcript_summary"];

/// Free-text fields taking the first non-empty value.
const PRIMARY_FIELDS: &[&str] = &["language", "title_suggestion", "primary_topic"];

/// Merge per-segment artifacts, ordered by segment index.
///
/// Input pairs are `(segment_index, artifact)`; they are sorted internally
/// so callers may pass completion order. Non-object artifacts are skipped.
#[must_use]
pub fn combine_segments(artifacts: &[(u32, Value)]) -> Value {
    let mut ordered: Vec<&(u32, Value)> = artifacts.iter().collect();
    ordered.sort_by_key(|(index, _)| *index);

    let objects: Vec<&Map<String, Value>> = ordered
        .iter()
        .filter_map(|(_, value)| value.as_object())
        .collect();

    let mut keys: Vec<&String> = Vec::new();
    let mut seen_keys = HashSet::new();
    for object in &objects {
        for key in object.keys() {
            if seen_keys.insert(key.as_str()) {
                keys.push(key);
            }
        }
    }

    let mut combined = Map::new();
    for key in keys {
        let values: Vec<&Value> = objects.iter().filter_map(|o| o.get(key.as_str())).collect();
        if let Some(merged) = merge_field(key, &values) {
            combined.insert(key.clone(), merged);
        }
    }
    Value::Object(combined)
}

fn merge_field(key: &str, values: &[&Value]) -> Option<Value> {
    if PARAGRAPH_FIELDS.contains(&key) {
        return merge_paragraphs(values);
    }
    if PRIMARY_FIELDS.contains(&key) {
        return first_non_empty_string(values);
    }

    let first_present = values.iter().find(|v| !v.is_null())?;
    match first_present {
        Value::Array(_) => Some(merge_union(values)),
        Value::Object(o) if o.get("confidence").is_some_and(Value::is_number) => {
            merge_by_confidence(values)
        }
        Value::String(_) => merge_mode(values),
        _ => values.iter().find(|v| !v.is_null()).map(|v| (*v).clone()),
    }
}

fn merge_paragraphs(values: &[&Value]) -> Option<Value> {
    let joined = values
        .iter()
        .filter_map(|v| v.as_str())
        .filter(|s| !s.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    if joined.is_empty() {
        None
    } else {
        Some(Value::String(joined))
    }
}

fn first_non_empty_string(values: &[&Value]) -> Option<Value> {
    values
        .iter()
        .filter_map(|v| v.as_str())
        .find(|s| !s.is_empty())
        .map(|s| Value::String(s.to_string()))
}

/// Union of array elements, first-seen order, deduplicated by serialized form.
fn merge_union(values: &[&Value]) -> Value {
    let mut seen = HashSet::new();
    let mut union = Vec::new();
    for value in values {
        let Some(items) = value.as_array() else {
            continue;
        };
        for item in items {
            let fingerprint = item.to_string();
            if seen.insert(fingerprint) {
                union.push(item.clone());
            }
        }
    }
    Value::Array(union)
}

/// Strictly-greater comparison keeps the earliest occurrence on ties.
fn merge_by_confidence(values: &[&Value]) -> Option<Value> {
    let mut best: Option<(&Value, f64)> = None;
    for value in values {
        let Some(confidence) = value.get("confidence").and_then(Value::as_f64) else {
            continue;
        };
        if best.is_none_or(|(_, c)| confidence > c) {
            best = Some((value, confidence));
        }
    }
    best.map(|(v, _)| v.clone())
}

/// Most frequent string; ties broken by first occurrence in index order.
fn merge_mode(values: &[&Value]) -> Option<Value> {
    let strings: Vec<&str> = values.iter().filter_map(|v| v.as_str()).collect();
    let mut best: Option<(&str, usize)> = None;
    for (position, candidate) in strings.iter().enumerate() {
        if strings[..position].contains(candidate) {
            continue;
        }
        let count = strings.iter().filter(|s| *s == candidate).count();
        if best.is_none_or(|(_, c)| count > c) {
            best = Some((candidate, count));
        }
    }
    best.map(|(s, _)| Value::String(s.to_string()))
}
