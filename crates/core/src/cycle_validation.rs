//! Structural cross-checks between a benefit's description and its cycle.
//!
//! A fixed-window benefit carries its window twice: once as
//! `fixedCycleStartMonth` and once in the human-readable description
//! ("Q3: Jul-Sep"). These checks catch the two drifting apart, e.g. a Q3
//! benefit silently receiving Q1 dates.
//!
//! Advisory at runtime, a hard gate during migration pre-flight.

use std::sync::LazyLock;

use chrono::Datelike;
use regex::Regex;

use crate::cycle::Cycle;

/// Matches a "Q{n}: MonA-MonB" marker anywhere in a description.
const QUARTER_LABEL_PATTERN: &str = r"(?i)\bQ([1-4])\s*:\s*[a-z]{3}[a-z]*\s*[-–]\s*[a-z]{3}";

static QUARTER_LABEL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(QUARTER_LABEL_PATTERN).expect("valid regex"));

const MONTH_ABBREVIATIONS: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

/// A computed cycle disagrees with the structure declared in the description.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{reason}")]
pub struct CycleMismatch {
    pub reason: String,
}

/// Run every structural check; the first failure wins.
pub fn validate_cycle(description: &str, cycle: &Cycle) -> Result<(), CycleMismatch> {
    check_quarter_label(description, cycle)?;
    check_december(description, cycle)?;
    Ok(())
}

/// Canonical start month for quarter `n` (Q1 -> 1, Q4 -> 10). `None` outside 1..=4.
fn quarter_start_month(quarter: u32) -> Option<u32> {
    (1..=4).contains(&quarter).then(|| (quarter - 1) * 3 + 1)
}

fn check_quarter_label(description: &str, cycle: &Cycle) -> Result<(), CycleMismatch> {
    let Some((quarter, expected_start)) = QUARTER_LABEL_RE
        .captures(description)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse::<u32>().ok())
        .and_then(|quarter| Some((quarter, quarter_start_month(quarter)?)))
    else {
        return Ok(());
    };

    let actual_start = cycle.start.month();
    if actual_start != expected_start {
        return Err(CycleMismatch {
            reason: format!(
                "Q{quarter} cycle starts in the wrong month. Expected: {expected_start} ({}), \
                 Got: {actual_start} ({})",
                month_name(expected_start),
                month_name(actual_start),
            ),
        });
    }

    // Day-count variation may push the last instant into the neighbouring month.
    let expected_end = expected_start + 2;
    let actual_end = cycle.end.month();
    if month_distance(expected_end, actual_end) > 1 {
        return Err(CycleMismatch {
            reason: format!(
                "Q{quarter} cycle ends in the wrong month. Expected: {expected_end} ({}), \
                 Got: {actual_end} ({})",
                month_name(expected_end),
                month_name(actual_end),
            ),
        });
    }

    Ok(())
}

fn check_december(description: &str, cycle: &Cycle) -> Result<(), CycleMismatch> {
    if !description.to_lowercase().contains("december") {
        return Ok(());
    }

    let (start, end) = (cycle.start.month(), cycle.end.month());
    if start != 12 || end != 12 {
        return Err(CycleMismatch {
            reason: format!(
                "December benefit must start and end in December. Expected: 12, Got: {start}-{end}"
            ),
        });
    }
    Ok(())
}

/// Distance between two months on the 12-month circle.
fn month_distance(a: u32, b: u32) -> u32 {
    let diff = a.abs_diff(b);
    diff.min(12 - diff)
}

fn month_name(month: u32) -> &'static str {
    MONTH_ABBREVIATIONS
        .get((month as usize).wrapping_sub(1))
        .copied()
        .unwrap_or("?")
}
