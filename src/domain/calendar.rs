use crate::domain::models::{sanitize_hours, TimeEntry};
use crate::domain::period::month_end;
use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarDay {
    pub date: NaiveDate,
    pub total_hours: f64,
    pub entry_count: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CalendarMonth {
    pub year: i32,
    pub month: u32,
    /// Empty cells before day one in a Monday-first grid.
    pub leading_blanks: u32,
    pub days: Vec<CalendarDay>,
}

impl CalendarMonth {
    pub fn day_count(&self) -> usize {
        self.days.len()
    }
}

pub fn month_view(entries: &[TimeEntry], year: i32, month: u32) -> Result<CalendarMonth, String> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)
        .ok_or_else(|| format!("invalid calendar month {year}-{month:02}"))?;
    let last = month_end(first);

    let days = first
        .iter_days()
        .take_while(|date| *date <= last)
        .map(|date| {
            let on_day = entries_on(entries, date);
            CalendarDay {
                date,
                total_hours: on_day.iter().map(|entry| sanitize_hours(entry.duration)).sum(),
                entry_count: on_day.len(),
            }
        })
        .collect();

    Ok(CalendarMonth {
        year,
        month,
        leading_blanks: first.weekday().num_days_from_monday(),
        days,
    })
}

/// Entries logged on `date`, in stored order.
pub fn entries_on(entries: &[TimeEntry], date: NaiveDate) -> Vec<&TimeEntry> {
    entries
        .iter()
        .filter(|entry| entry.day() == Some(date))
        .collect()
}
