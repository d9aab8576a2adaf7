use crate::domain::models::{Space, TimeEntry};
use crate::infrastructure::error::InfraError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};

pub const EXPORT_FORMAT_VERSION: &str = "1.0";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportMetadata {
    pub version: String,
    pub exported_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportDocument {
    pub metadata: ExportMetadata,
    pub spaces: Vec<Space>,
    pub time_entries: Vec<TimeEntry>,
}

/// Records ready to be added after an import, with fresh ids.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportBatch {
    pub spaces: Vec<Space>,
    pub entries: Vec<TimeEntry>,
    pub dropped_entries: usize,
}

/// Builds a backup of `selected` spaces (all when `None`) and their entries.
pub fn build_export(
    spaces: &[Space],
    entries: &[TimeEntry],
    selected: Option<&[String]>,
    user_id: Option<&str>,
    exported_at: DateTime<Utc>,
) -> ExportDocument {
    let wanted: Option<BTreeSet<&str>> = selected.map(|ids| ids.iter().map(String::as_str).collect());
    let spaces: Vec<Space> = spaces
        .iter()
        .filter(|space| wanted.as_ref().is_none_or(|wanted| wanted.contains(space.id.as_str())))
        .cloned()
        .collect();
    let kept: BTreeSet<&str> = spaces.iter().map(|space| space.id.as_str()).collect();
    let time_entries = entries
        .iter()
        .filter(|entry| kept.contains(entry.space_id.as_str()))
        .cloned()
        .collect();

    ExportDocument {
        metadata: ExportMetadata {
            version: EXPORT_FORMAT_VERSION.to_string(),
            exported_at,
            user_id: user_id.map(ToOwned::to_owned),
        },
        spaces,
        time_entries,
    }
}

pub fn export_file_name(date: NaiveDate) -> String {
    format!("spacelog_backup_{}.json", date.format("%Y-%m-%d"))
}

/// Parses a backup document and re-keys every record with ids from `next_id`,
/// keeping the space linkage. Entries pointing at a space missing from the
/// document are dropped.
pub fn prepare_import(raw: &str, mut next_id: impl FnMut() -> String) -> Result<ImportBatch, InfraError> {
    let document: serde_json::Value = serde_json::from_str(raw)
        .map_err(|error| InfraError::Validation(format!("import file is not valid JSON: {error}")))?;
    let spaces = document
        .get("spaces")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| InfraError::Validation("import file must contain a spaces array".to_string()))?;
    let entries = document
        .get("timeEntries")
        .and_then(serde_json::Value::as_array)
        .ok_or_else(|| InfraError::Validation("import file must contain a timeEntries array".to_string()))?;

    let mut id_map = HashMap::new();
    let mut imported_spaces = Vec::with_capacity(spaces.len());
    for (index, raw_space) in spaces.iter().enumerate() {
        let mut space: Space = serde_json::from_value(raw_space.clone())
            .map_err(|error| InfraError::Validation(format!("spaces[{index}]: {error}")))?;
        space.validate().map_err(InfraError::Validation)?;
        let new_id = next_id();
        id_map.insert(std::mem::replace(&mut space.id, new_id.clone()), new_id);
        imported_spaces.push(space);
    }

    let mut imported_entries = Vec::new();
    let mut dropped_entries = 0;
    for (index, raw_entry) in entries.iter().enumerate() {
        let mut entry: TimeEntry = serde_json::from_value(raw_entry.clone())
            .map_err(|error| InfraError::Validation(format!("timeEntries[{index}]: {error}")))?;
        let Some(space_id) = id_map.get(&entry.space_id) else {
            dropped_entries += 1;
            continue;
        };
        entry.space_id = space_id.clone();
        entry.id = next_id();
        entry.validate().map_err(InfraError::Validation)?;
        imported_entries.push(entry);
    }

    Ok(ImportBatch {
        spaces: imported_spaces,
        entries: imported_entries,
        dropped_entries,
    })
}

pub fn new_record_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn space(id: &str) -> Space {
        Space {
            id: id.to_string(),
            name: format!("Space {id}"),
            color: "#ff8800".to_string(),
            icon: Some("💼".to_string()),
        }
    }

    fn entry(id: &str, space_id: &str) -> TimeEntry {
        TimeEntry {
            id: id.to_string(),
            space_id: space_id.to_string(),
            date: "2024-06-03".to_string(),
            duration: 2.0,
            start_time: None,
            end_time: None,
            description: "Review".to_string(),
            tags: vec!["Design".to_string()],
            icon: None,
            is_ongoing: None,
        }
    }

    fn counter_ids() -> impl FnMut() -> String {
        let mut next = 0;
        move || {
            next += 1;
            format!("new-{next}")
        }
    }

    #[test]
    fn export_of_selected_spaces_carries_only_their_entries() {
        let exported_at = Utc.with_ymd_and_hms(2024, 6, 10, 8, 0, 0).single().expect("time");
        let document = build_export(
            &[space("a"), space("b")],
            &[entry("1", "a"), entry("2", "b")],
            Some(&["b".to_string()]),
            Some("user-1"),
            exported_at,
        );

        assert_eq!(document.spaces, vec![space("b")]);
        assert_eq!(document.time_entries, vec![entry("2", "b")]);

        let json = serde_json::to_value(&document).expect("serialize");
        assert_eq!(json["metadata"]["version"], "1.0");
        assert_eq!(json["metadata"]["user_id"], "user-1");
        assert_eq!(json["metadata"]["exported_at"], "2024-06-10T08:00:00Z");
        assert_eq!(json["timeEntries"][0]["spaceId"], "b");
    }

    #[test]
    fn guest_export_omits_user_id() {
        let document = build_export(&[space("a")], &[], None, None, Utc::now());
        let json = serde_json::to_value(&document).expect("serialize");
        assert!(json["metadata"].get("user_id").is_none());
    }

    #[test]
    fn import_rekeys_records_and_keeps_linkage() {
        let raw = serde_json::to_string(&build_export(
            &[space("a"), space("b")],
            &[entry("1", "a"), entry("2", "b"), entry("3", "a")],
            None,
            None,
            Utc::now(),
        ))
        .expect("serialize");

        let batch = prepare_import(&raw, counter_ids()).expect("import");

        assert_eq!(
            batch.spaces.iter().map(|space| space.id.as_str()).collect::<Vec<_>>(),
            vec!["new-1", "new-2"]
        );
        assert_eq!(batch.spaces[0].name, "Space a");
        let links: Vec<(&str, &str)> = batch
            .entries
            .iter()
            .map(|entry| (entry.id.as_str(), entry.space_id.as_str()))
            .collect();
        assert_eq!(links, vec![("new-3", "new-1"), ("new-4", "new-2"), ("new-5", "new-1")]);
        assert_eq!(batch.dropped_entries, 0);
    }

    #[test]
    fn import_drops_entries_of_unknown_spaces() {
        let raw = r##"{"spaces":[{"id":"a","name":"A","color":"#000"}],
            "timeEntries":[{"id":"1","spaceId":"zzz","date":"2024-06-03","duration":1}]}"##;
        let batch = prepare_import(raw, counter_ids()).expect("import");
        assert_eq!(batch.spaces.len(), 1);
        assert!(batch.entries.is_empty());
        assert_eq!(batch.dropped_entries, 1);
    }

    #[test]
    fn import_rejects_documents_without_arrays() {
        for raw in [r#"{"timeEntries":[]}"#, r#"{"spaces":{},"timeEntries":[]}"#, r#"{"spaces":[]}"#, "not json"] {
            assert!(
                matches!(prepare_import(raw, counter_ids()), Err(InfraError::Validation(_))),
                "expected rejection for {raw}"
            );
        }
    }

    #[test]
    fn import_rejects_blank_space_names() {
        let raw = r##"{"spaces":[{"id":"a","name":"","color":"#000"}],"timeEntries":[]}"##;
        assert!(matches!(prepare_import(raw, counter_ids()), Err(InfraError::Validation(_))));
    }

    #[test]
    fn backup_file_name_uses_the_date() {
        let date = NaiveDate::from_ymd_opt(2024, 6, 10).expect("date");
        assert_eq!(export_file_name(date), "spacelog_backup_2024-06-10.json");
    }

    #[test]
    fn fresh_ids_are_unique() {
        assert_ne!(new_record_id(), new_record_id());
    }
}
