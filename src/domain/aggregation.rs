use crate::domain::insight::{select_insight, Insight, InsightInputs};
use crate::domain::models::{sanitize_hours, TimeEntry};
use crate::domain::period::{DateRange, PeriodKind, PeriodSpec, PeriodWindow};
use chrono::{Datelike, NaiveDate, Weekday};
use serde::{Deserialize, Serialize};

pub const TOP_ACTIVITY_LIMIT: usize = 5;
const DENSE_CUSTOM_LABEL_DAYS: usize = 14;
const SPARSE_LABEL_STRIDE: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", content = "label", rename_all = "snake_case")]
pub enum ActivityKey {
    Tag(String),
    Description(String),
    /// Untagged entries with an empty description.
    Untitled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityShare {
    pub key: ActivityKey,
    pub hours: f64,
    pub percentage: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum DayLabel {
    Weekday(Weekday),
    DayOfMonth(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DailyBucket {
    pub date: NaiveDate,
    pub hours: f64,
    pub label: Option<DayLabel>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PeriodStatistics {
    pub window: PeriodWindow,
    pub total_hours: f64,
    pub previous_hours: f64,
    pub diff_hours: f64,
    pub top_activities: Vec<ActivityShare>,
    pub daily: Vec<DailyBucket>,
    pub max_daily_hours: f64,
    pub insight: Option<Insight>,
}

/// Hours per tag in first-seen order, plus hours of untagged entries. An
/// entry counts in full towards each of its tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TagSummary {
    pub by_tag: Vec<(String, f64)>,
    pub unlabeled_hours: f64,
}

impl TagSummary {
    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a TimeEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            let hours = sanitize_hours(entry.duration);
            if entry.tags.is_empty() {
                summary.unlabeled_hours += hours;
                continue;
            }
            for tag in &entry.tags {
                add_hours(&mut summary.by_tag, tag.clone(), hours);
            }
        }
        summary
    }

    /// Tags ordered by hours, largest first; ties keep first-seen order.
    pub fn ranked(&self) -> Vec<(String, f64)> {
        let mut ranked = self.by_tag.clone();
        ranked.sort_by(|left, right| right.1.total_cmp(&left.1));
        ranked
    }

    pub fn top_tag(&self) -> Option<(String, f64)> {
        self.ranked().into_iter().next()
    }
}

pub fn entries_in_range<'a>(entries: &'a [TimeEntry], range: &DateRange) -> Vec<&'a TimeEntry> {
    entries
        .iter()
        .filter(|entry| entry.day().is_some_and(|day| range.contains_day(day)))
        .collect()
}

pub fn total_hours<'a>(entries: impl IntoIterator<Item = &'a TimeEntry>) -> f64 {
    entries
        .into_iter()
        .map(|entry| sanitize_hours(entry.duration))
        .sum()
}

pub fn top_activities(entries: &[&TimeEntry], total_hours: f64) -> Vec<ActivityShare> {
    let mut buckets: Vec<(ActivityKey, f64)> = Vec::new();
    for entry in entries {
        let hours = sanitize_hours(entry.duration);
        if entry.tags.is_empty() {
            let key = if entry.description.trim().is_empty() {
                ActivityKey::Untitled
            } else {
                ActivityKey::Description(entry.description.clone())
            };
            add_hours(&mut buckets, key, hours);
        } else {
            for tag in &entry.tags {
                add_hours(&mut buckets, ActivityKey::Tag(tag.clone()), hours);
            }
        }
    }

    buckets.sort_by(|left, right| right.1.total_cmp(&left.1));
    buckets
        .into_iter()
        .take(TOP_ACTIVITY_LIMIT)
        .map(|(key, hours)| ActivityShare {
            key,
            hours,
            percentage: if total_hours > 0.0 {
                hours / total_hours * 100.0
            } else {
                0.0
            },
        })
        .collect()
}

pub fn daily_buckets(entries: &[&TimeEntry], kind: PeriodKind, range: &DateRange) -> Vec<DailyBucket> {
    let bucket_count = range.bucket_count();
    range
        .days()
        .enumerate()
        .map(|(index, date)| {
            let hours = total_hours(
                entries
                    .iter()
                    .copied()
                    .filter(|entry| entry.day() == Some(date)),
            );
            DailyBucket {
                date,
                hours,
                label: day_label(kind, index, bucket_count, date),
            }
        })
        .collect()
}

pub fn max_daily_hours(buckets: &[DailyBucket]) -> f64 {
    buckets
        .iter()
        .map(|bucket| bucket.hours)
        .fold(1.0, f64::max)
}

/// Sorted distinct tags used by `entries`.
pub fn available_tags<'a>(entries: impl IntoIterator<Item = &'a TimeEntry>) -> Vec<String> {
    entries
        .into_iter()
        .flat_map(|entry| entry.tags.iter().cloned())
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect()
}

/// Full statistics for one space's entries over a period and its predecessor.
pub fn compute_statistics(entries: &[TimeEntry], spec: &PeriodSpec) -> Result<PeriodStatistics, String> {
    let window = spec.resolve()?;
    let current = entries_in_range(entries, &window.current);
    let previous = entries_in_range(entries, &window.previous);

    let total = total_hours(current.iter().copied());
    let previous_total = total_hours(previous.iter().copied());
    let daily = daily_buckets(&current, window.kind, &window.current);
    let max_daily = max_daily_hours(&daily);
    let insight = select_insight(&InsightInputs::from_entries(&current, &previous));

    Ok(PeriodStatistics {
        window,
        total_hours: total,
        previous_hours: previous_total,
        diff_hours: total - previous_total,
        top_activities: top_activities(&current, total),
        daily,
        max_daily_hours: max_daily,
        insight,
    })
}

fn day_label(kind: PeriodKind, index: usize, bucket_count: usize, date: NaiveDate) -> Option<DayLabel> {
    let is_edge = index == 0 || index + 1 == bucket_count;
    let labeled = match kind {
        PeriodKind::Week => return Some(DayLabel::Weekday(date.weekday())),
        PeriodKind::Month => is_edge || (index + 1) % SPARSE_LABEL_STRIDE == 1,
        PeriodKind::Custom => {
            bucket_count <= DENSE_CUSTOM_LABEL_DAYS || is_edge || index % SPARSE_LABEL_STRIDE == 0
        }
    };
    labeled.then(|| DayLabel::DayOfMonth(date.day()))
}

fn add_hours<K: PartialEq>(buckets: &mut Vec<(K, f64)>, key: K, hours: f64) {
    match buckets.iter_mut().find(|(existing, _)| *existing == key) {
        Some((_, total)) => *total += hours,
        None => buckets.push((key, hours)),
    }
}
