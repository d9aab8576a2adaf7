use chrono::{Datelike, Duration, Months, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PeriodKind {
    Week,
    Month,
    Custom,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodSpec {
    Week { anchor: NaiveDate },
    Month { anchor: NaiveDate },
    Custom { start: NaiveDate, end: NaiveDate },
}

impl PeriodSpec {
    pub fn kind(&self) -> PeriodKind {
        match self {
            Self::Week { .. } => PeriodKind::Week,
            Self::Month { .. } => PeriodKind::Month,
            Self::Custom { .. } => PeriodKind::Custom,
        }
    }

    /// The current window only; used by callers that do not compare periods.
    pub fn range(&self) -> Result<DateRange, String> {
        match *self {
            Self::Week { anchor } => {
                let start = week_start(anchor);
                Ok(DateRange::from_days(start, start + Duration::days(6)))
            }
            Self::Month { anchor } => {
                let start = month_start(anchor);
                Ok(DateRange::from_days(start, month_end(start)))
            }
            Self::Custom { start, end } => {
                if end < start {
                    return Err(format!("period end {end} must not precede start {start}"));
                }
                Ok(DateRange::from_days(start, end))
            }
        }
    }

    pub fn resolve(&self) -> Result<PeriodWindow, String> {
        let current = self.range()?;
        let (previous, label) = match *self {
            Self::Week { .. } => {
                let previous_start = current.start_day() - Duration::days(7);
                (
                    DateRange::from_days(previous_start, previous_start + Duration::days(6)),
                    PeriodLabel::Week {
                        start: current.start_day(),
                        end: current.end_day(),
                    },
                )
            }
            Self::Month { .. } => {
                let previous_start = current
                    .start_day()
                    .checked_sub_months(Months::new(1))
                    .ok_or_else(|| "month period out of range".to_string())?;
                (
                    DateRange::from_days(previous_start, month_end(previous_start)),
                    PeriodLabel::Month {
                        year: current.start_day().year(),
                        month: current.start_day().month(),
                    },
                )
            }
            Self::Custom { start, end } => {
                let span = current.end - current.start;
                let previous_end = current.start - Duration::milliseconds(1);
                (
                    DateRange {
                        start: previous_end - span,
                        end: previous_end,
                    },
                    PeriodLabel::Custom { start, end },
                )
            }
        };

        Ok(PeriodWindow {
            kind: self.kind(),
            current,
            previous,
            label,
        })
    }
}

/// Inclusive millisecond-precision window; the end of a whole-day range is
/// pinned to 23:59:59.999.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl DateRange {
    pub fn from_days(start: NaiveDate, end: NaiveDate) -> Self {
        Self {
            start: start.and_time(NaiveTime::MIN),
            end: end_of_day(end),
        }
    }

    pub fn start_day(&self) -> NaiveDate {
        self.start.date()
    }

    pub fn end_day(&self) -> NaiveDate {
        self.end.date()
    }

    /// A calendar date belongs to the range when its noon does.
    pub fn contains_day(&self, day: NaiveDate) -> bool {
        let Some(noon) = day.and_hms_opt(12, 0, 0) else {
            return false;
        };
        noon >= self.start && noon <= self.end
    }

    /// Number of chart buckets: whole days spanned, at least one.
    pub fn bucket_count(&self) -> usize {
        ceil_days(self.end - self.start).max(1) as usize
    }

    /// Day count used by the projection gate: `ceil(span / day) + 1`.
    pub fn days_in_range(&self) -> i64 {
        ceil_days(self.end - self.start) + 1
    }

    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        let start = self.start_day();
        (0..self.bucket_count()).map(move |offset| start + Duration::days(offset as i64))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PeriodLabel {
    Week { start: NaiveDate, end: NaiveDate },
    Month { year: i32, month: u32 },
    Custom { start: NaiveDate, end: NaiveDate },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeriodWindow {
    pub kind: PeriodKind,
    pub current: DateRange,
    pub previous: DateRange,
    pub label: PeriodLabel,
}

/// Monday of the week containing `anchor`; Sunday belongs to the preceding
/// Monday.
pub fn week_start(anchor: NaiveDate) -> NaiveDate {
    let offset = (anchor.weekday().num_days_from_sunday() + 6) % 7;
    anchor - Duration::days(offset as i64)
}

pub fn month_start(anchor: NaiveDate) -> NaiveDate {
    anchor.with_day(1).unwrap_or(anchor)
}

pub fn month_end(month_start: NaiveDate) -> NaiveDate {
    month_start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(month_start)
}

pub fn end_of_day(day: NaiveDate) -> NaiveDateTime {
    day.and_hms_milli_opt(23, 59, 59, 999)
        .unwrap_or_else(|| day.and_time(NaiveTime::MIN))
}

fn ceil_days(span: Duration) -> i64 {
    let day_ms = Duration::days(1).num_milliseconds();
    let span_ms = span.num_milliseconds();
    if span_ms <= 0 {
        return 0;
    }
    (span_ms + day_ms - 1) / day_ms
}
