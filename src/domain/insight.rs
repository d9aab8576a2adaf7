//! Picks at most one observation about a period compared to the previous
//! one. Rules are evaluated in order and the first match wins.

use crate::domain::aggregation::{total_hours, TagSummary};
use crate::domain::models::{sanitize_hours, TimeEntry};
use chrono::{Datelike, Weekday};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

const SILENCE_BELOW_HOURS: f64 = 2.0;
const VOLUME_HOURS: f64 = 5.0;
const STEADY_VOLUME_HOURS: f64 = 10.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InsightKind {
    Focus,
    Surge,
    Drop,
    Shift,
    Weekend,
    Consistency,
    Attention,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Insight {
    pub kind: InsightKind,
    pub icon: String,
    pub text_key: String,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub params: BTreeMap<String, String>,
}

impl Insight {
    fn new(kind: InsightKind, icon: &str, text_key: &str) -> Self {
        Self {
            kind,
            icon: icon.to_string(),
            text_key: text_key.to_string(),
            params: BTreeMap::new(),
        }
    }

    fn with_param(mut self, name: &str, value: impl Into<String>) -> Self {
        self.params.insert(name.to_string(), value.into());
        self
    }
}

/// Aggregated numbers the rules look at.
#[derive(Debug, Clone, PartialEq)]
pub struct InsightInputs {
    pub total_hours: f64,
    pub previous_hours: f64,
    /// Current-period top tag with its hours.
    pub top_tag: Option<(String, f64)>,
    /// Previous-period hours of the current top tag.
    pub top_tag_previous_hours: f64,
    pub weekend_hours: f64,
    pub unlabeled_hours: f64,
}

impl InsightInputs {
    pub fn from_entries(current: &[&TimeEntry], previous: &[&TimeEntry]) -> Self {
        let summary = TagSummary::from_entries(current.iter().copied());
        let top_tag = summary.top_tag();
        let top_tag_previous_hours = top_tag
            .as_ref()
            .map(|(tag, _)| {
                total_hours(previous.iter().copied().filter(|entry| entry.has_tag(tag)))
            })
            .unwrap_or(0.0);
        let weekend_hours = current
            .iter()
            .filter(|entry| {
                entry
                    .day()
                    .is_some_and(|day| matches!(day.weekday(), Weekday::Sat | Weekday::Sun))
            })
            .map(|entry| sanitize_hours(entry.duration))
            .sum();

        Self {
            total_hours: total_hours(current.iter().copied()),
            previous_hours: total_hours(previous.iter().copied()),
            top_tag,
            top_tag_previous_hours,
            weekend_hours,
            unlabeled_hours: summary.unlabeled_hours,
        }
    }

    pub fn diff_hours(&self) -> f64 {
        self.total_hours - self.previous_hours
    }

    /// Relative change against the previous period; 100 when there was none.
    pub fn diff_percent(&self) -> f64 {
        if self.previous_hours > 0.0 {
            self.diff_hours() / self.previous_hours * 100.0
        } else {
            100.0
        }
    }

    fn share(&self, hours: f64) -> f64 {
        if self.total_hours > 0.0 { hours / self.total_hours } else { 0.0 }
    }
}

pub struct InsightRule {
    pub kind: InsightKind,
    pub applies: fn(&InsightInputs) -> bool,
    pub build: fn(&InsightInputs) -> Insight,
}

pub static INSIGHT_RULES: &[InsightRule] = &[
    InsightRule {
        kind: InsightKind::Focus,
        applies: |inputs| {
            inputs.total_hours >= VOLUME_HOURS
                && inputs
                    .top_tag
                    .as_ref()
                    .is_some_and(|(_, hours)| inputs.share(*hours) >= 0.60)
        },
        build: |inputs| {
            let tag = inputs.top_tag.as_ref().map(|(tag, _)| tag.clone()).unwrap_or_default();
            Insight::new(InsightKind::Focus, "center_focus_strong", "insight_focus").with_param("tag", tag)
        },
    },
    InsightRule {
        kind: InsightKind::Surge,
        applies: |inputs| inputs.diff_hours() >= 2.0 && inputs.diff_percent() >= 20.0,
        build: |inputs| {
            Insight::new(InsightKind::Surge, "trending_up", "insight_surge")
                .with_param("diff", format!("{}", inputs.diff_hours().round() as i64))
        },
    },
    InsightRule {
        kind: InsightKind::Drop,
        applies: |inputs| {
            inputs.previous_hours > 10.0 && inputs.diff_percent() <= -30.0 && inputs.diff_hours() <= -3.0
        },
        build: |_| Insight::new(InsightKind::Drop, "battery_charging_full", "insight_drop"),
    },
    InsightRule {
        kind: InsightKind::Shift,
        applies: |inputs| {
            let Some((_, hours)) = inputs.top_tag.as_ref() else {
                return false;
            };
            let previous = inputs.top_tag_previous_hours;
            let growth = hours - previous;
            inputs.total_hours >= VOLUME_HOURS && growth >= 2.0 && (previous < 2.0 || growth / previous > 0.5)
        },
        build: |inputs| {
            let tag = inputs.top_tag.as_ref().map(|(tag, _)| tag.clone()).unwrap_or_default();
            Insight::new(InsightKind::Shift, "swap_vert", "insight_shift").with_param("tag", tag)
        },
    },
    InsightRule {
        kind: InsightKind::Weekend,
        applies: |inputs| inputs.total_hours >= VOLUME_HOURS && inputs.share(inputs.weekend_hours) >= 0.30,
        build: |_| Insight::new(InsightKind::Weekend, "weekend", "insight_weekend"),
    },
    InsightRule {
        kind: InsightKind::Consistency,
        applies: |inputs| inputs.total_hours >= STEADY_VOLUME_HOURS && inputs.diff_percent().abs() <= 10.0,
        build: |_| Insight::new(InsightKind::Consistency, "fitness_center", "insight_consistency"),
    },
    InsightRule {
        kind: InsightKind::Attention,
        applies: |inputs| inputs.total_hours >= VOLUME_HOURS && inputs.share(inputs.unlabeled_hours) > 0.80,
        build: |_| Insight::new(InsightKind::Attention, "label_off", "insight_unlabeled"),
    },
];

pub fn select_insight(inputs: &InsightInputs) -> Option<Insight> {
    if inputs.total_hours < SILENCE_BELOW_HOURS {
        return None;
    }
    INSIGHT_RULES
        .iter()
        .find(|rule| (rule.applies)(inputs))
        .map(|rule| (rule.build)(inputs))
}
