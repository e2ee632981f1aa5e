//! Cycle calculator.
//!
//! Pure calendar arithmetic that resolves a [`CycleSchedule`] and a reference
//! instant into the concrete window currently in effect. All arithmetic runs
//! in UTC. A window's `end` is the last millisecond before the next window
//! begins, so `[2025-07-01T00:00:00Z, 2025-09-30T23:59:59.999Z]` is Q3 2025.

use chrono::{Datelike, Months, NaiveDate, TimeDelta};
use serde::Serialize;

use crate::benefit::{CycleSchedule, FixedWindow, Frequency};
use crate::types::Timestamp;

/// Lifetime granted to a one-time benefit from its activation.
pub const ONE_TIME_LIFETIME_YEARS: u32 = 10;

/// Errors raised by the calculator. Both indicate a defect in the inputs or
/// the arithmetic and must abort the caller's unit of work.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CycleError {
    #[error("Frequency {0} has no recurring cycle")]
    UnsupportedFrequency(Frequency),

    #[error("Invalid cycle: {0}")]
    InvalidCycle(String),
}

/// A `[start, end]` window during which one benefit occurrence is claimable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Cycle {
    pub start: Timestamp,
    pub end: Timestamp,
}

impl Cycle {
    /// Build a window, rejecting `end <= start`.
    pub fn new(start: Timestamp, end: Timestamp) -> Result<Self, CycleError> {
        if end <= start {
            return Err(CycleError::InvalidCycle(format!(
                "end {end} is not after start {start}"
            )));
        }
        Ok(Self { start, end })
    }

    /// Whether `instant` falls inside the window (both bounds inclusive).
    pub fn contains(&self, instant: Timestamp) -> bool {
        self.start <= instant && instant <= self.end
    }
}

/// Compute the cycle in effect for `schedule` at `reference`.
///
/// `opened` is the account's opened date; it only matters for
/// anniversary-anchored yearly schedules. One-time schedules have no cycle
/// and fail with [`CycleError::UnsupportedFrequency`]; use
/// [`one_time_window`] for them.
pub fn compute_cycle(
    schedule: &CycleSchedule,
    reference: Timestamp,
    opened: Option<NaiveDate>,
) -> Result<Cycle, CycleError> {
    let year = reference.year();
    let month = reference.month();

    match *schedule {
        CycleSchedule::CalendarFixed { window, .. } => fixed_cycle(window, reference),
        CycleSchedule::Monthly => month_window(year, month, 1),
        CycleSchedule::Quarterly => {
            let quarter_start = (month - 1) / 3 * 3 + 1;
            month_window(year, quarter_start, 3)
        }
        CycleSchedule::Yearly => match opened {
            Some(opened) => {
                let anniversary = opened.month();
                let start_year = if month >= anniversary { year } else { year - 1 };
                month_window(start_year, anniversary, 12)
            }
            None => month_window(year, 1, 12),
        },
        CycleSchedule::OneTime => Err(CycleError::UnsupportedFrequency(Frequency::OneTime)),
    }
}

/// Usable lifetime of a one-time benefit: `[activation, activation + 10 years]`.
///
/// Calendar-month arithmetic clamps the day of month, so a Feb 29 activation
/// ends on Feb 28 when the target year is not a leap year.
pub fn one_time_window(activation: Timestamp) -> Result<Cycle, CycleError> {
    let end = activation
        .checked_add_months(Months::new(ONE_TIME_LIFETIME_YEARS * 12))
        .ok_or_else(|| {
            CycleError::InvalidCycle(format!("one-time lifetime overflows from {activation}"))
        })?;
    Cycle::new(activation, end)
}

/// The fixed window anchored at the reference year; rolls forward a year once
/// the reference has passed it. Windows crossing December also consider the
/// occurrence that began the previous year.
fn fixed_cycle(window: FixedWindow, reference: Timestamp) -> Result<Cycle, CycleError> {
    let year = reference.year();
    let (start_month, duration) = (window.start_month(), window.duration_months());

    if window.crosses_year_end() {
        let previous = month_window(year - 1, start_month, duration)?;
        if previous.contains(reference) {
            return Ok(previous);
        }
    }

    let current = month_window(year, start_month, duration)?;
    if reference <= current.end {
        return Ok(current);
    }
    month_window(year + 1, start_month, duration)
}

/// `months` calendar months starting on the first of `start_month`.
fn month_window(year: i32, start_month: u32, months: u32) -> Result<Cycle, CycleError> {
    let first = NaiveDate::from_ymd_opt(year, start_month, 1).ok_or_else(|| {
        CycleError::InvalidCycle(format!("no calendar date for {year}-{start_month:02}-01"))
    })?;
    let next = first.checked_add_months(Months::new(months)).ok_or_else(|| {
        CycleError::InvalidCycle(format!("window of {months} months from {first} overflows"))
    })?;

    let start = midnight(first)?;
    let end = midnight(next)? - TimeDelta::milliseconds(1);
    Cycle::new(start, end)
}

fn midnight(date: NaiveDate) -> Result<Timestamp, CycleError> {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .ok_or_else(|| CycleError::InvalidCycle(format!("no UTC midnight for {date}")))
}
