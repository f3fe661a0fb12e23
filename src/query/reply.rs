//! Parsing of oracle replies into phase decisions.
//!
//! Models wrap JSON in Markdown fences, surround it with prose, emit trailing
//! commas, or answer with a one-element array. The parser isolates the
//! outermost JSON value, and on failure retries once with explanation lines
//! removed and trailing commas stripped. Anything that still does not fit the
//! phase's shape is a schema violation.

use std::sync::LazyLock;

use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::id::EntityId;
use crate::temporal::{TimeRange, Timestamp};

use super::{Phase, QueryError, QueryResult};

static RE_TRAILING_COMMA: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r",\s*([}\]])").unwrap());

/// The outermost `{...}` or `[...]` in `raw`, or `raw` trimmed if there is none.
pub fn isolate_json(raw: &str) -> &str {
    let Some(start) = raw.find(['{', '[']) else {
        return raw.trim();
    };
    let close = if raw[start..].starts_with('{') { '}' } else { ']' };
    match raw.rfind(close) {
        Some(end) if end > start => &raw[start..=end],
        _ => raw.trim(),
    }
}

/// Drop lines mentioning `explanation` and strip trailing commas.
pub fn remove_explanations(raw: &str) -> String {
    let kept: Vec<&str> = raw
        .lines()
        .filter(|line| !line.contains("explanation"))
        .collect();
    RE_TRAILING_COMMA.replace_all(&kept.join("\n"), "$1").into_owned()
}

fn parse_value(raw: &str) -> Option<serde_json::Value> {
    serde_json::from_str(isolate_json(raw)).ok()
}

/// Parse `raw` into the phase's reply shape.
pub fn parse_reply<T: DeserializeOwned>(raw: &str, phase: Phase) -> QueryResult<T> {
    let value = parse_value(raw)
        .or_else(|| parse_value(&remove_explanations(raw)))
        .ok_or_else(|| QueryError::SchemaViolation {
            phase,
            message: "reply contains no parseable JSON".into(),
        })?;

    let value = match value {
        serde_json::Value::Array(mut items) if items.len() == 1 => items.remove(0),
        serde_json::Value::Array(items) => {
            return Err(QueryError::SchemaViolation {
                phase,
                message: format!("expected one reply object, got an array of {}", items.len()),
            });
        }
        other => other,
    };
    serde_json::from_value(value).map_err(|e| QueryError::SchemaViolation {
        phase,
        message: e.to_string(),
    })
}

// ---------------------------------------------------------------------------
// Phase 1
// ---------------------------------------------------------------------------

/// A calendar field as models emit it: a number, or text such as `"inf"`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(untagged)]
pub enum CalendarField {
    Number(f64),
    Text(String),
}

impl CalendarField {
    fn is_inf(&self) -> bool {
        matches!(self, Self::Text(t) if t.trim().eq_ignore_ascii_case("inf"))
    }
}

/// Phase-1 reply: a local wall-clock window and the locations to keep.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TimeLocationReply {
    #[serde(default)]
    pub start_year: Option<CalendarField>,
    #[serde(default)]
    pub start_month: Option<CalendarField>,
    #[serde(default)]
    pub start_day: Option<CalendarField>,
    #[serde(default)]
    pub start_hour: Option<CalendarField>,
    #[serde(default)]
    pub start_minute: Option<CalendarField>,
    #[serde(default)]
    pub end_year: Option<CalendarField>,
    #[serde(default)]
    pub end_month: Option<CalendarField>,
    #[serde(default)]
    pub end_day: Option<CalendarField>,
    #[serde(default)]
    pub end_hour: Option<CalendarField>,
    #[serde(default)]
    pub end_minute: Option<CalendarField>,
    pub locations: Vec<String>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Decision extracted from a phase-1 reply.
#[derive(Debug, Clone, PartialEq)]
pub struct TimeLocationSelection {
    pub range: TimeRange,
    pub locations: Vec<String>,
}

fn violation(message: String) -> QueryError {
    QueryError::SchemaViolation {
        phase: Phase::TimeLocation,
        message,
    }
}

fn whole(value: Option<&CalendarField>, default: u32, field: &str) -> QueryResult<u32> {
    match value {
        None => Ok(default),
        Some(CalendarField::Number(v))
            if v.is_finite() && v.fract() == 0.0 && *v >= 0.0 && *v <= f64::from(u32::MAX) =>
        {
            Ok(*v as u32)
        }
        Some(CalendarField::Number(v)) => Err(violation(format!(
            "{field} must be a non-negative whole number, got {v}"
        ))),
        Some(CalendarField::Text(t)) => Err(violation(format!(
            "{field} must be a number, got \"{t}\""
        ))),
    }
}

fn local_time(year: u32, parts: [Option<&CalendarField>; 4], prefix: &str) -> QueryResult<Timestamp> {
    let month = whole(parts[0], 1, &format!("{prefix}_month"))?;
    let day = whole(parts[1], 1, &format!("{prefix}_day"))?;
    let hour = whole(parts[2], 0, &format!("{prefix}_hour"))?;
    let minute = whole(parts[3], 0, &format!("{prefix}_minute"))?;
    let year = i32::try_from(year)
        .map_err(|_| violation(format!("{prefix}_year {year} is out of range")))?;
    Timestamp::from_local_parts(year, month, day, hour, minute).map_err(|e| violation(e.to_string()))
}

impl TimeLocationReply {
    /// Convert to a time range. No start (or year 0) means the beginning of
    /// time; no end (or `"inf"`) means no upper bound. Missing month and day
    /// default to 1, missing hour and minute to 0.
    pub fn selection(&self) -> QueryResult<TimeLocationSelection> {
        let min = match whole(self.start_year.as_ref(), 0, "start_year")? {
            0 => Timestamp::ZERO,
            year => local_time(
                year,
                [
                    self.start_month.as_ref(),
                    self.start_day.as_ref(),
                    self.start_hour.as_ref(),
                    self.start_minute.as_ref(),
                ],
                "start",
            )?,
        };
        let max = match &self.end_year {
            None => Timestamp::MAX,
            Some(year) if year.is_inf() => Timestamp::MAX,
            Some(year) => local_time(
                whole(Some(year), 0, "end_year")?,
                [
                    self.end_month.as_ref(),
                    self.end_day.as_ref(),
                    self.end_hour.as_ref(),
                    self.end_minute.as_ref(),
                ],
                "end",
            )?,
        };
        let range = TimeRange::new(min, max).map_err(|e| violation(e.to_string()))?;
        Ok(TimeLocationSelection {
            range,
            locations: self.locations.clone(),
        })
    }
}

// ---------------------------------------------------------------------------
// Phase 2
// ---------------------------------------------------------------------------

/// Phase-2 reply: ids of the objects and events worth exploring.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct NodeSelectionReply {
    pub object_nodes: Vec<serde_json::Number>,
    pub event_nodes: Vec<serde_json::Number>,
    #[serde(default)]
    pub explanation: Option<String>,
}

/// Decision extracted from a phase-2 reply.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct NodeSelection {
    pub object_ids: Vec<EntityId>,
    pub event_ids: Vec<EntityId>,
}

fn entity_ids(numbers: &[serde_json::Number], field: &str) -> QueryResult<Vec<EntityId>> {
    numbers
        .iter()
        .map(|n| {
            let raw = n.as_u64().or_else(|| {
                n.as_f64()
                    .filter(|f| f.is_finite() && f.fract() == 0.0 && *f >= 0.0 && *f <= u64::MAX as f64)
                    .map(|f| f as u64)
            });
            raw.and_then(EntityId::new)
                .ok_or_else(|| QueryError::SchemaViolation {
                    phase: Phase::NodeSelection,
                    message: format!("{field} must hold positive whole ids, got {n}"),
                })
        })
        .collect()
}

impl NodeSelectionReply {
    pub fn selection(&self) -> QueryResult<NodeSelection> {
        Ok(NodeSelection {
            object_ids: entity_ids(&self.object_nodes, "object_nodes")?,
            event_ids: entity_ids(&self.event_nodes, "event_nodes")?,
        })
    }
}

// ---------------------------------------------------------------------------
// Phase 3
// ---------------------------------------------------------------------------

/// The oracle's answer to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FinalAnswer {
    /// Shape depends on the modality: a string, a list of node names, a position...
    pub answer: serde_json::Value,
    pub modality: String,
    pub confidence: f64,
    #[serde(default)]
    pub explanation: String,
}
