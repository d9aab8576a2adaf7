use crate::domain::models::{parse_date, Space, SpacePatch, TimeEntry, TimeEntryPatch};
use crate::infrastructure::error::InfraError;
use serde_json::{Map, Value};

pub const COLUMN_USER_ID: &str = "user_id";

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq, Eq)]
pub struct SpaceRow {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub name: String,
    pub color: String,
    #[serde(default)]
    pub icon: Option<String>,
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize, PartialEq)]
pub struct TimeEntryRow {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub space_id: String,
    pub date: String,
    pub duration: f64,
    #[serde(default)]
    pub start_time: Option<String>,
    #[serde(default)]
    pub end_time: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub tags: Option<Vec<String>>,
    #[serde(default)]
    pub icon: Option<String>,
    #[serde(default)]
    pub is_ongoing: Option<bool>,
}

pub fn encode_space(space: &Space, user_id: &str) -> SpaceRow {
    SpaceRow {
        id: space.id.clone(),
        user_id: Some(user_id.to_string()),
        name: space.name.clone(),
        color: space.color.clone(),
        icon: space.icon.clone(),
    }
}

pub fn decode_space(row: SpaceRow) -> Result<Space, InfraError> {
    let space = Space {
        id: row.id,
        name: row.name,
        color: row.color,
        icon: row.icon.filter(|icon| !icon.trim().is_empty()),
    };
    space
        .validate()
        .map_err(|message| InfraError::Remote(format!("invalid space row: {message}")))?;
    Ok(space)
}

pub fn encode_entry(entry: &TimeEntry, user_id: &str) -> TimeEntryRow {
    TimeEntryRow {
        id: entry.id.clone(),
        user_id: Some(user_id.to_string()),
        space_id: entry.space_id.clone(),
        date: entry.date.clone(),
        duration: entry.duration,
        start_time: entry.start_time.clone(),
        end_time: entry.end_time.clone(),
        description: Some(entry.description.clone()),
        tags: Some(entry.tags.clone()),
        icon: entry.icon.clone(),
        is_ongoing: Some(entry.is_ongoing()),
    }
}

/// Rows are accepted as long as they carry ids and a date; duration oddities
/// are left for aggregation to clamp.
pub fn decode_entry(row: TimeEntryRow) -> Result<TimeEntry, InfraError> {
    if row.id.trim().is_empty() || row.space_id.trim().is_empty() {
        return Err(InfraError::Remote(
            "invalid time entry row: missing id or space_id".to_string(),
        ));
    }
    if parse_date(&row.date).is_none() {
        return Err(InfraError::Remote(format!(
            "invalid time entry row {}: date '{}' is not YYYY-MM-DD",
            row.id, row.date
        )));
    }

    Ok(TimeEntry {
        id: row.id,
        space_id: row.space_id,
        date: row.date,
        duration: row.duration,
        start_time: row.start_time,
        end_time: row.end_time,
        description: row.description.unwrap_or_default(),
        tags: row.tags.unwrap_or_default(),
        icon: row.icon,
        is_ongoing: row.is_ongoing.filter(|ongoing| *ongoing),
    })
}

/// Only the fields present in the patch.
pub fn encode_space_patch(patch: &SpacePatch) -> Map<String, Value> {
    let mut columns = Map::new();
    if let Some(name) = &patch.name {
        columns.insert("name".to_string(), Value::from(name.trim()));
    }
    if let Some(color) = &patch.color {
        columns.insert("color".to_string(), Value::from(color.as_str()));
    }
    if let Some(icon) = &patch.icon {
        columns.insert("icon".to_string(), optional_string(icon.as_deref()));
    }
    columns
}

pub fn encode_entry_patch(patch: &TimeEntryPatch) -> Map<String, Value> {
    let mut columns = Map::new();
    if let Some(date) = &patch.date {
        columns.insert("date".to_string(), Value::from(date.as_str()));
    }
    if let Some(duration) = patch.duration {
        columns.insert("duration".to_string(), Value::from(duration));
    }
    if let Some(start_time) = &patch.start_time {
        columns.insert("start_time".to_string(), optional_string(start_time.as_deref()));
    }
    if let Some(end_time) = &patch.end_time {
        columns.insert("end_time".to_string(), optional_string(end_time.as_deref()));
    }
    if let Some(description) = &patch.description {
        columns.insert("description".to_string(), Value::from(description.as_str()));
    }
    if let Some(tags) = &patch.tags {
        columns.insert("tags".to_string(), Value::from(tags.clone()));
    }
    if let Some(icon) = &patch.icon {
        columns.insert("icon".to_string(), optional_string(icon.as_deref()));
    }
    if let Some(is_ongoing) = patch.is_ongoing {
        columns.insert("is_ongoing".to_string(), Value::from(is_ongoing));
    }
    columns
}

fn optional_string(value: Option<&str>) -> Value {
    value.map(Value::from).unwrap_or(Value::Null)
}
