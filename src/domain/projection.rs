use crate::domain::aggregation::{entries_in_range, total_hours};
use crate::domain::models::TimeEntry;
use crate::domain::period::{DateRange, PeriodSpec};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

pub const MIN_DAYS_IN_RANGE: i64 = 7;
pub const MIN_ACTIVE_DAYS: usize = 3;
const DAYS_PER_MONTH: f64 = 30.0;
const DAYS_PER_YEAR: f64 = 365.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum Projection {
    /// No positive rate was given.
    Hidden,
    /// Too few days to extrapolate from.
    Locked {
        days_in_range: i64,
        active_days: usize,
    },
    Available {
        daily_average_hours: f64,
        monthly: f64,
        yearly: f64,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FinancialSummary {
    pub range: DateRange,
    pub total_hours: f64,
    pub earnings: Option<f64>,
    pub projection: Projection,
    pub available_tags: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct FinancialRequest<'a> {
    pub period: PeriodSpec,
    pub tag: Option<&'a str>,
    pub hourly_rate: f64,
}

pub fn calculate(entries: &[TimeEntry], request: &FinancialRequest<'_>) -> Result<FinancialSummary, String> {
    let range = request.period.range()?;
    let in_range = entries_in_range(entries, &range);
    let available_tags = in_range
        .iter()
        .flat_map(|entry| entry.tags.iter().cloned())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect::<Vec<_>>();

    let filtered = in_range
        .into_iter()
        .filter(|entry| request.tag.is_none_or(|tag| entry.has_tag(tag)))
        .collect::<Vec<_>>();
    let hours = total_hours(filtered.iter().copied());
    let rate = if request.hourly_rate.is_finite() && request.hourly_rate > 0.0 {
        Some(request.hourly_rate)
    } else {
        None
    };

    let projection = match rate {
        None => Projection::Hidden,
        Some(rate) => {
            let days_in_range = range.days_in_range();
            let active_days = filtered
                .iter()
                .map(|entry| entry.date.as_str())
                .collect::<BTreeSet<_>>()
                .len();
            if days_in_range < MIN_DAYS_IN_RANGE || active_days < MIN_ACTIVE_DAYS {
                Projection::Locked {
                    days_in_range,
                    active_days,
                }
            } else {
                let daily_average_hours = hours / days_in_range as f64;
                Projection::Available {
                    daily_average_hours,
                    monthly: daily_average_hours * rate * DAYS_PER_MONTH,
                    yearly: daily_average_hours * rate * DAYS_PER_YEAR,
                }
            }
        }
    };

    Ok(FinancialSummary {
        range,
        total_hours: hours,
        earnings: rate.map(|rate| hours * rate),
        projection,
        available_tags,
    })
}
