use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

pub const DATE_FORMAT: &str = "%Y-%m-%d";
pub const TIME_FORMAT: &str = "%H:%M";

/// Records that take part in local/remote reconciliation.
pub trait SyncRecord: Clone + PartialEq + Send + Sync + 'static {
    fn record_id(&self) -> &str;
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Space {
    pub id: String,
    pub name: String,
    pub color: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

impl Space {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "space.id")?;
        validate_non_empty(&self.name, "space.name")?;
        validate_non_empty(&self.color, "space.color")?;
        Ok(())
    }

    pub fn apply(&mut self, patch: &SpacePatch) {
        if let Some(name) = &patch.name {
            self.name = name.trim().to_string();
        }
        if let Some(color) = &patch.color {
            self.color = color.clone();
        }
        if let Some(icon) = &patch.icon {
            self.icon = icon.clone();
        }
    }
}

impl SyncRecord for Space {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpacePatch {
    pub name: Option<String>,
    pub color: Option<String>,
    pub icon: Option<Option<String>>,
}

impl SpacePatch {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.color.is_none() && self.icon.is_none()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
    pub id: String,
    pub space_id: String,
    pub date: String,
    pub duration: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_time: Option<String>,
    #[serde(default)]
    pub description: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub is_ongoing: Option<bool>,
}

impl TimeEntry {
    pub fn validate(&self) -> Result<(), String> {
        validate_non_empty(&self.id, "entry.id")?;
        validate_non_empty(&self.space_id, "entry.space_id")?;
        validate_date(&self.date, "entry.date")?;
        if let Some(start_time) = &self.start_time {
            validate_hhmm(start_time, "entry.start_time")?;
        }
        if let Some(end_time) = &self.end_time {
            validate_hhmm(end_time, "entry.end_time")?;
        }
        if !self.is_ongoing() && !(self.duration > 0.0) {
            return Err("entry.duration must be > 0".to_string());
        }
        if self.tags.iter().any(|tag| tag.trim().is_empty()) {
            return Err("entry.tags[] must not be empty".to_string());
        }
        Ok(())
    }

    pub fn day(&self) -> Option<NaiveDate> {
        parse_date(&self.date)
    }

    pub fn is_ongoing(&self) -> bool {
        self.is_ongoing.unwrap_or(false)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.iter().any(|candidate| candidate == tag)
    }

    /// Hours shown for this entry at `now`. A running recording counts from
    /// its start time; finished entries use the stored duration.
    pub fn effective_duration(&self, now: NaiveDateTime) -> f64 {
        if self.is_ongoing() {
            if let Some(started_at) = self.started_at() {
                let elapsed = (now - started_at).num_seconds() as f64 / 3600.0;
                return elapsed.max(0.0);
            }
        }
        sanitize_hours(self.duration)
    }

    pub fn started_at(&self) -> Option<NaiveDateTime> {
        let day = self.day()?;
        let start = parse_hhmm(self.start_time.as_deref()?)?;
        Some(day.and_time(start))
    }

    pub fn apply(&mut self, patch: &TimeEntryPatch) {
        if let Some(date) = &patch.date {
            self.date = date.clone();
        }
        if let Some(duration) = patch.duration {
            self.duration = duration;
        }
        if let Some(start_time) = &patch.start_time {
            self.start_time = start_time.clone();
        }
        if let Some(end_time) = &patch.end_time {
            self.end_time = end_time.clone();
        }
        if let Some(description) = &patch.description {
            self.description = description.clone();
        }
        if let Some(tags) = &patch.tags {
            self.tags = normalize_tags(tags.iter().map(String::as_str));
        }
        if let Some(icon) = &patch.icon {
            self.icon = icon.clone();
        }
        if let Some(is_ongoing) = patch.is_ongoing {
            self.is_ongoing = is_ongoing.then_some(true);
        }
    }
}

impl SyncRecord for TimeEntry {
    fn record_id(&self) -> &str {
        &self.id
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct TimeEntryPatch {
    pub date: Option<String>,
    pub duration: Option<f64>,
    pub start_time: Option<Option<String>>,
    pub end_time: Option<Option<String>>,
    pub description: Option<String>,
    pub tags: Option<Vec<String>>,
    pub icon: Option<Option<String>>,
    pub is_ongoing: Option<bool>,
}

impl TimeEntryPatch {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

/// How the user expressed the amount of time for a new entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum DurationInput {
    Hours { value: f64 },
    Text { value: String },
    Range { start: String, end: String },
    Ongoing { start: String },
}

impl DurationInput {
    /// Resolves the input into `(hours, start_time, end_time, ongoing)`.
    pub fn resolve(&self) -> Result<(f64, Option<String>, Option<String>, bool), String> {
        match self {
            Self::Hours { value } => Ok((positive_hours(*value)?, None, None, false)),
            Self::Text { value } => {
                let hours = parse_duration_text(value)
                    .ok_or_else(|| "duration must be hours or H:MM".to_string())?;
                Ok((positive_hours(hours)?, None, None, false))
            }
            Self::Range { start, end } => {
                validate_hhmm(start, "entry.start_time")?;
                validate_hhmm(end, "entry.end_time")?;
                let hours = range_hours(start, end);
                Ok((
                    positive_hours(hours)?,
                    Some(start.clone()),
                    Some(end.clone()),
                    false,
                ))
            }
            Self::Ongoing { start } => {
                validate_hhmm(start, "entry.start_time")?;
                Ok((0.0, Some(start.clone()), None, true))
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Session {
    pub user_id: String,
    pub email: Option<String>,
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn is_valid_at(&self, now: DateTime<Utc>, leeway_seconds: i64) -> bool {
        self.expires_at > now + chrono::Duration::seconds(leeway_seconds)
            && !self.access_token.trim().is_empty()
    }
}

/// Accepts `1.5`, `1,5` and `1:30`.
pub fn parse_duration_text(value: &str) -> Option<f64> {
    let value = value.trim();
    if value.is_empty() {
        return None;
    }
    if let Some((hours, minutes)) = value.split_once(':') {
        let hours = if hours.trim().is_empty() { 0 } else { hours.trim().parse::<u32>().ok()? };
        let minutes = if minutes.trim().is_empty() { 0 } else { minutes.trim().parse::<u32>().ok()? };
        return Some(hours as f64 + minutes as f64 / 60.0);
    }
    value.replace(',', ".").parse::<f64>().ok().filter(|hours| hours.is_finite())
}

/// Hours between two `HH:mm` times on the same day; zero when `end` is not
/// after `start`.
pub fn range_hours(start: &str, end: &str) -> f64 {
    let (Some(start), Some(end)) = (parse_hhmm(start), parse_hhmm(end)) else {
        return 0.0;
    };
    if end <= start {
        return 0.0;
    }
    (end - start).num_seconds() as f64 / 3600.0
}

/// Trims tags, drops empties and repeated values, keeping first-seen order.
pub fn normalize_tags<'a>(tags: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::new();
    for tag in tags {
        let tag = tag.trim();
        if !tag.is_empty() && !normalized.iter().any(|existing| existing == tag) {
            normalized.push(tag.to_string());
        }
    }
    normalized
}

/// NaN, infinite and negative hour values count as zero.
pub fn sanitize_hours(hours: f64) -> f64 {
    if hours.is_finite() && hours > 0.0 { hours } else { 0.0 }
}

/// Renders hours as `H:MM`.
pub fn format_hours(hours: f64) -> String {
    if !hours.is_finite() || hours < 0.0 {
        return "0:00".to_string();
    }
    let total_minutes = (hours * 60.0).round() as u64;
    format!("{}:{:02}", total_minutes / 60, total_minutes % 60)
}

pub fn parse_date(value: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(value.trim(), DATE_FORMAT).ok()
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

pub fn parse_hhmm(value: &str) -> Option<NaiveTime> {
    NaiveTime::parse_from_str(value.trim(), TIME_FORMAT).ok()
}

fn positive_hours(hours: f64) -> Result<f64, String> {
    if hours.is_finite() && hours > 0.0 {
        Ok(hours)
    } else {
        Err("entry.duration must be > 0".to_string())
    }
}

fn validate_non_empty(value: &str, field_name: &str) -> Result<(), String> {
    if value.trim().is_empty() {
        return Err(format!("{field_name} must not be empty"));
    }
    Ok(())
}

fn validate_hhmm(value: &str, field_name: &str) -> Result<(), String> {
    let mut split = value.split(':');
    let Some(hour_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    let Some(minute_str) = split.next() else {
        return Err(format!("{field_name} must be HH:MM"));
    };
    if split.next().is_some() {
        return Err(format!("{field_name} must be HH:MM"));
    }

    let hour = hour_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    let minute = minute_str
        .parse::<u8>()
        .map_err(|_| format!("{field_name} must be HH:MM"))?;
    if hour > 23 || minute > 59 {
        return Err(format!("{field_name} must be HH:MM"));
    }
    Ok(())
}

fn validate_date(value: &str, field_name: &str) -> Result<(), String> {
    NaiveDate::parse_from_str(value, DATE_FORMAT)
        .map_err(|_| format!("{field_name} must be YYYY-MM-DD"))?;
    Ok(())
}
