//! Canonical UTC period boundaries and keys.
//!
//! Every aggregate that is scoped to a calendar period (entry stats, health
//! trends) is addressed by a *period key*: `{cadence}-{yyyy}-{mm}-{dd}` of the
//! period's canonical start date. Keys are always computed in UTC so that the
//! same entry maps to the same period regardless of where the host runs.

use crate::error::InsightsError;
use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The four recognized aggregation cadences.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Cadence {
    Weekly,
    Monthly,
    Quarterly,
    Annual,
}

impl Cadence {
    /// All cadences, in the order period-scoped aggregates are updated.
    pub const ALL: [Cadence; 4] = [
        Cadence::Weekly,
        Cadence::Monthly,
        Cadence::Quarterly,
        Cadence::Annual,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Cadence::Weekly => "weekly",
            Cadence::Monthly => "monthly",
            Cadence::Quarterly => "quarterly",
            Cadence::Annual => "annual",
        }
    }
}

impl fmt::Display for Cadence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Cadence {
    type Err = InsightsError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "weekly" => Ok(Cadence::Weekly),
            "monthly" => Ok(Cadence::Monthly),
            "quarterly" => Ok(Cadence::Quarterly),
            "annual" => Ok(Cadence::Annual),
            other => Err(InsightsError::InvalidCadence(other.to_string())),
        }
    }
}

/// An inclusive UTC time range covering one calendar period.
/// `end` is the last representable millisecond of the period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeriodRange {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

fn day_start(date: NaiveDate) -> DateTime<Utc> {
    Utc.from_utc_datetime(&date.and_time(NaiveTime::MIN))
}

/// Monday of the ISO week containing `date`.
fn week_start(date: NaiveDate) -> NaiveDate {
    let offset = date.weekday().num_days_from_monday() as i64;
    date - Duration::days(offset)
}

fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

fn quarter_start(date: NaiveDate) -> NaiveDate {
    let qs_month = ((date.month0() / 3) * 3) + 1;
    NaiveDate::from_ymd_opt(date.year(), qs_month, 1).unwrap_or(date)
}

fn year_start(date: NaiveDate) -> NaiveDate {
    NaiveDate::from_ymd_opt(date.year(), 1, 1).unwrap_or(date)
}

/// First day of the period *after* the one starting at `start`.
fn next_period_start(start: NaiveDate, cadence: Cadence) -> NaiveDate {
    match cadence {
        Cadence::Weekly => start + Duration::days(7),
        Cadence::Monthly | Cadence::Quarterly => {
            let step = if cadence == Cadence::Monthly { 1 } else { 3 };
            let month0 = start.month0() + step;
            let (year, month0) = (start.year() + (month0 / 12) as i32, month0 % 12);
            NaiveDate::from_ymd_opt(year, month0 + 1, 1).unwrap_or(start)
        }
        Cadence::Annual => NaiveDate::from_ymd_opt(start.year() + 1, 1, 1).unwrap_or(start),
    }
}

/// Canonical start date of the period containing `date` for the given cadence.
pub fn period_start(date: DateTime<Utc>, cadence: Cadence) -> NaiveDate {
    let naive = date.date_naive();
    match cadence {
        Cadence::Weekly => week_start(naive),
        Cadence::Monthly => month_start(naive),
        Cadence::Quarterly => quarter_start(naive),
        Cadence::Annual => year_start(naive),
    }
}

fn range(date: DateTime<Utc>, cadence: Cadence) -> PeriodRange {
    let start = period_start(date, cadence);
    PeriodRange {
        start: day_start(start),
        end: day_start(next_period_start(start, cadence)) - Duration::milliseconds(1),
    }
}

/// ISO week containing `date`: Monday 00:00:00.000 to Sunday 23:59:59.999 UTC.
pub fn week_range(date: DateTime<Utc>) -> PeriodRange {
    range(date, Cadence::Weekly)
}

/// Calendar month containing `date`, UTC.
pub fn month_range(date: DateTime<Utc>) -> PeriodRange {
    range(date, Cadence::Monthly)
}

/// Calendar quarter containing `date` (Jan/Apr/Jul/Oct blocks), UTC.
pub fn quarter_range(date: DateTime<Utc>) -> PeriodRange {
    range(date, Cadence::Quarterly)
}

/// Calendar year containing `date`, UTC.
pub fn year_range(date: DateTime<Utc>) -> PeriodRange {
    range(date, Cadence::Annual)
}

/// Canonical period key: `{cadence}-{yyyy}-{mm}-{dd}` of the period start.
/// Stable under any time-of-day (or day-of-period) variation within the period.
pub fn period_key(date: DateTime<Utc>, cadence: Cadence) -> String {
    let start = period_start(date, cadence);
    format!(
        "{}-{:04}-{:02}-{:02}",
        cadence.as_str(),
        start.year(),
        start.month(),
        start.day()
    )
}
