//! Benefit definitions and their recurrence schedule.
//!
//! The wire and database forms describe a schedule with four loose fields
//! (`frequency`, `cycleAlignment`, `fixedCycleStartMonth`,
//! `fixedCycleDurationMonths`). Inside the crate those collapse into the
//! closed [`CycleSchedule`] sum type, so a combination such as fixed-month
//! fields without `CALENDAR_FIXED` cannot be represented past the parse step.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Labels
// ---------------------------------------------------------------------------

/// How often a benefit renews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Frequency {
    Monthly,
    Quarterly,
    Yearly,
    OneTime,
}

impl Frequency {
    /// Database / wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Monthly => "MONTHLY",
            Self::Quarterly => "QUARTERLY",
            Self::Yearly => "YEARLY",
            Self::OneTime => "ONE_TIME",
        }
    }
}

impl fmt::Display for Frequency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Frequency {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "MONTHLY" => Ok(Self::Monthly),
            "QUARTERLY" => Ok(Self::Quarterly),
            "YEARLY" => Ok(Self::Yearly),
            "ONE_TIME" => Ok(Self::OneTime),
            other => Err(CoreError::Validation(format!(
                "Unknown frequency: '{other}'. Valid values: MONTHLY, QUARTERLY, YEARLY, ONE_TIME"
            ))),
        }
    }
}

/// How a cycle's start is anchored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CycleAlignment {
    #[default]
    CardAnniversary,
    CalendarFixed,
}

impl CycleAlignment {
    /// Database / wire label.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CardAnniversary => "CARD_ANNIVERSARY",
            Self::CalendarFixed => "CALENDAR_FIXED",
        }
    }
}

impl fmt::Display for CycleAlignment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CycleAlignment {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CARD_ANNIVERSARY" => Ok(Self::CardAnniversary),
            "CALENDAR_FIXED" => Ok(Self::CalendarFixed),
            other => Err(CoreError::Validation(format!(
                "Unknown cycle alignment: '{other}'. Valid values: CARD_ANNIVERSARY, CALENDAR_FIXED"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Schedule
// ---------------------------------------------------------------------------

/// A calendar window that repeats every year, e.g. "Jul-Sep".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct FixedWindow {
    start_month: u32,
    duration_months: u32,
}

impl FixedWindow {
    /// Build a window. `start_month` is 1-based; a window spans at most a year.
    pub fn new(start_month: u32, duration_months: u32) -> Result<Self, CoreError> {
        if !(1..=12).contains(&start_month) {
            return Err(CoreError::Validation(format!(
                "fixedCycleStartMonth must be between 1 and 12, got {start_month}"
            )));
        }
        if !(1..=12).contains(&duration_months) {
            return Err(CoreError::Validation(format!(
                "fixedCycleDurationMonths must be between 1 and 12, got {duration_months}"
            )));
        }
        Ok(Self {
            start_month,
            duration_months,
        })
    }

    pub fn start_month(self) -> u32 {
        self.start_month
    }

    pub fn duration_months(self) -> u32 {
        self.duration_months
    }

    /// Whether the window runs past December into the following year.
    pub fn crosses_year_end(self) -> bool {
        self.start_month + self.duration_months > 13
    }
}

/// The recurrence rule of a benefit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CycleSchedule {
    /// Calendar month containing the reference instant.
    Monthly,
    /// Calendar quarter (Jan/Apr/Jul/Oct blocks).
    Quarterly,
    /// Twelve months from the account's anniversary month, or the calendar
    /// year when the opened date is unknown.
    Yearly,
    /// A fixed calendar window repeating yearly. `declared` keeps the
    /// frequency label the benefit was published with.
    CalendarFixed {
        declared: Frequency,
        window: FixedWindow,
    },
    /// Claimable once; has a lifetime rather than a cycle.
    OneTime,
}

/// The loose four-field representation used on the wire and in the database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduleParts {
    pub frequency: Frequency,
    pub alignment: CycleAlignment,
    pub fixed_start_month: Option<i32>,
    pub fixed_duration_months: Option<i32>,
}

impl CycleSchedule {
    /// Collapse the loose fields into a schedule, rejecting illegal combinations.
    pub fn from_parts(parts: ScheduleParts) -> Result<Self, CoreError> {
        let ScheduleParts {
            frequency,
            alignment,
            fixed_start_month,
            fixed_duration_months,
        } = parts;

        match alignment {
            CycleAlignment::CalendarFixed => {
                if frequency == Frequency::OneTime {
                    return Err(CoreError::Validation(
                        "ONE_TIME benefits cannot use CALENDAR_FIXED alignment".to_string(),
                    ));
                }
                let (Some(start), Some(duration)) = (fixed_start_month, fixed_duration_months)
                else {
                    return Err(CoreError::Validation(
                        "CALENDAR_FIXED alignment requires both fixedCycleStartMonth and \
                         fixedCycleDurationMonths"
                            .to_string(),
                    ));
                };
                let window = FixedWindow::new(month_field(start)?, month_field(duration)?)?;
                Ok(Self::CalendarFixed {
                    declared: frequency,
                    window,
                })
            }
            CycleAlignment::CardAnniversary => {
                if fixed_start_month.is_some() || fixed_duration_months.is_some() {
                    return Err(CoreError::Validation(
                        "fixedCycleStartMonth / fixedCycleDurationMonths require CALENDAR_FIXED \
                         alignment"
                            .to_string(),
                    ));
                }
                Ok(match frequency {
                    Frequency::Monthly => Self::Monthly,
                    Frequency::Quarterly => Self::Quarterly,
                    Frequency::Yearly => Self::Yearly,
                    Frequency::OneTime => Self::OneTime,
                })
            }
        }
    }

    /// Expand back into the loose four-field form.
    pub fn to_parts(self) -> ScheduleParts {
        match self {
            Self::CalendarFixed { declared, window } => ScheduleParts {
                frequency: declared,
                alignment: CycleAlignment::CalendarFixed,
                fixed_start_month: Some(window.start_month as i32),
                fixed_duration_months: Some(window.duration_months as i32),
            },
            other => ScheduleParts {
                frequency: other.frequency(),
                alignment: CycleAlignment::CardAnniversary,
                fixed_start_month: None,
                fixed_duration_months: None,
            },
        }
    }

    /// The frequency label this schedule is published under.
    pub fn frequency(self) -> Frequency {
        match self {
            Self::Monthly => Frequency::Monthly,
            Self::Quarterly => Frequency::Quarterly,
            Self::Yearly => Frequency::Yearly,
            Self::CalendarFixed { declared, .. } => declared,
            Self::OneTime => Frequency::OneTime,
        }
    }

    /// Whether the window depends on the account's opened date.
    pub fn is_anniversary_anchored(self) -> bool {
        matches!(self, Self::Yearly)
    }
}

fn month_field(value: i32) -> Result<u32, CoreError> {
    u32::try_from(value).map_err(|_| {
        CoreError::Validation(format!("Month fields must be positive, got {value}"))
    })
}

// ---------------------------------------------------------------------------
// BenefitDefinition
// ---------------------------------------------------------------------------

/// Template for a recurring perk.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "BenefitDefinitionDoc", into = "BenefitDefinitionDoc")]
pub struct BenefitDefinition {
    pub category: String,
    /// Free text. May carry structural hints such as "Q3: Jul-Sep".
    pub description: String,
    pub percentage: f64,
    /// Monetary cap per occurrence.
    pub max_amount: Option<f64>,
    pub schedule: CycleSchedule,
    /// Independent claimable instances sharing one cycle window.
    pub occurrences_in_cycle: u32,
}

impl BenefitDefinition {
    /// Start a definition with one occurrence per cycle and no cap.
    pub fn new(
        category: impl Into<String>,
        description: impl Into<String>,
        schedule: CycleSchedule,
    ) -> Self {
        Self {
            category: category.into(),
            description: description.into(),
            percentage: 0.0,
            max_amount: None,
            schedule,
            occurrences_in_cycle: 1,
        }
    }

    pub fn percentage(mut self, percentage: f64) -> Self {
        self.percentage = percentage;
        self
    }

    pub fn max_amount(mut self, amount: f64) -> Self {
        self.max_amount = Some(amount);
        self
    }

    pub fn occurrences(mut self, occurrences: u32) -> Self {
        self.occurrences_in_cycle = occurrences;
        self
    }

    /// Whether `other` describes the same perk (category and description).
    pub fn same_perk(&self, category: &str, description: &str) -> bool {
        self.category == category && self.description == description
    }
}

/// Wire shape of a benefit definition.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct BenefitDefinitionDoc {
    #[validate(length(min = 1, message = "category must not be empty"))]
    category: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    #[validate(range(min = 0.0, message = "percentage must not be negative"))]
    percentage: f64,
    #[validate(range(min = 0.0, message = "maxAmount must not be negative"))]
    max_amount: Option<f64>,
    frequency: Frequency,
    #[serde(default)]
    cycle_alignment: CycleAlignment,
    #[validate(range(min = 1, max = 12))]
    fixed_cycle_start_month: Option<i32>,
    #[validate(range(min = 1, max = 12))]
    fixed_cycle_duration_months: Option<i32>,
    #[serde(default = "default_occurrences")]
    #[validate(range(min = 1, message = "occurrencesInCycle must be at least 1"))]
    occurrences_in_cycle: i32,
}

fn default_occurrences() -> i32 {
    1
}

impl TryFrom<BenefitDefinitionDoc> for BenefitDefinition {
    type Error = CoreError;

    fn try_from(doc: BenefitDefinitionDoc) -> Result<Self, Self::Error> {
        doc.validate().map_err(|e| {
            CoreError::Validation(format!("Invalid benefit '{}': {e}", doc.category))
        })?;

        let schedule = CycleSchedule::from_parts(ScheduleParts {
            frequency: doc.frequency,
            alignment: doc.cycle_alignment,
            fixed_start_month: doc.fixed_cycle_start_month,
            fixed_duration_months: doc.fixed_cycle_duration_months,
        })
        .map_err(|CoreError::Validation(msg)| {
            CoreError::Validation(format!("Invalid benefit '{}': {msg}", doc.category))
        })?;

        Ok(Self {
            category: doc.category,
            description: doc.description,
            percentage: doc.percentage,
            max_amount: doc.max_amount,
            schedule,
            occurrences_in_cycle: doc.occurrences_in_cycle as u32,
        })
    }
}

impl From<BenefitDefinition> for BenefitDefinitionDoc {
    fn from(def: BenefitDefinition) -> Self {
        let parts = def.schedule.to_parts();
        Self {
            category: def.category,
            description: def.description,
            percentage: def.percentage,
            max_amount: def.max_amount,
            frequency: parts.frequency,
            cycle_alignment: parts.alignment,
            fixed_cycle_start_month: parts.fixed_start_month,
            fixed_cycle_duration_months: parts.fixed_duration_months,
            occurrences_in_cycle: def.occurrences_in_cycle as i32,
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    fn parts(
        frequency: Frequency,
        alignment: CycleAlignment,
        start: Option<i32>,
        duration: Option<i32>,
    ) -> ScheduleParts {
        ScheduleParts {
            frequency,
            alignment,
            fixed_start_month: start,
            fixed_duration_months: duration,
        }
    }

    #[test]
    fn anniversary_frequencies_map_directly() {
        let cases = [
            (Frequency::Monthly, CycleSchedule::Monthly),
            (Frequency::Quarterly, CycleSchedule::Quarterly),
            (Frequency::Yearly, CycleSchedule::Yearly),
            (Frequency::OneTime, CycleSchedule::OneTime),
        ];
        for (frequency, expected) in cases {
            let schedule = CycleSchedule::from_parts(parts(
                frequency,
                CycleAlignment::CardAnniversary,
                None,
                None,
            ))
            .unwrap();
            assert_eq!(schedule, expected);
        }
    }

    #[test]
    fn calendar_fixed_keeps_declared_frequency() {
        let schedule = CycleSchedule::from_parts(parts(
            Frequency::Quarterly,
            CycleAlignment::CalendarFixed,
            Some(7),
            Some(3),
        ))
        .unwrap();
        assert_matches!(
            schedule,
            CycleSchedule::CalendarFixed { declared: Frequency::Quarterly, window }
                if window.start_month() == 7 && window.duration_months() == 3
        );
        assert_eq!(schedule.frequency(), Frequency::Quarterly);
    }

    #[test]
    fn fixed_fields_without_calendar_fixed_rejected() {
        let result = CycleSchedule::from_parts(parts(
            Frequency::Yearly,
            CycleAlignment::CardAnniversary,
            Some(1),
            None,
        ));
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("require CALENDAR_FIXED"));
    }

    #[test]
    fn calendar_fixed_without_both_fields_rejected() {
        let result = CycleSchedule::from_parts(parts(
            Frequency::Yearly,
            CycleAlignment::CalendarFixed,
            Some(1),
            None,
        ));
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn one_time_calendar_fixed_rejected() {
        let result = CycleSchedule::from_parts(parts(
            Frequency::OneTime,
            CycleAlignment::CalendarFixed,
            Some(1),
            Some(6),
        ));
        assert_matches!(result, Err(CoreError::Validation(msg)) if msg.contains("ONE_TIME"));
    }

    #[test]
    fn out_of_range_window_rejected() {
        assert!(FixedWindow::new(0, 3).is_err());
        assert!(FixedWindow::new(13, 3).is_err());
        assert!(FixedWindow::new(1, 0).is_err());
        assert!(FixedWindow::new(1, 13).is_err());
        assert!(FixedWindow::new(12, 12).is_ok());
    }

    #[test]
    fn crosses_year_end() {
        assert!(!FixedWindow::new(1, 12).unwrap().crosses_year_end());
        assert!(!FixedWindow::new(10, 3).unwrap().crosses_year_end());
        assert!(FixedWindow::new(11, 3).unwrap().crosses_year_end());
    }

    #[test]
    fn parts_round_trip_for_fixed_schedule() {
        let original = parts(
            Frequency::Yearly,
            CycleAlignment::CalendarFixed,
            Some(1),
            Some(6),
        );
        let schedule = CycleSchedule::from_parts(original).unwrap();
        assert_eq!(schedule.to_parts(), original);
    }

    #[test]
    fn frequency_labels_parse() {
        assert_eq!("ONE_TIME".parse::<Frequency>().unwrap(), Frequency::OneTime);
        assert_eq!(
            "CALENDAR_FIXED".parse::<CycleAlignment>().unwrap(),
            CycleAlignment::CalendarFixed
        );
        assert!("WEEKLY".parse::<Frequency>().is_err());
    }

    #[test]
    fn definition_deserializes_from_wire_shape() {
        let json = r#"{
            "category": "Dining",
            "description": "Q3: Jul-Sep dining credit",
            "percentage": 0,
            "maxAmount": 50.0,
            "frequency": "QUARTERLY",
            "cycleAlignment": "CALENDAR_FIXED",
            "fixedCycleStartMonth": 7,
            "fixedCycleDurationMonths": 3,
            "occurrencesInCycle": 2
        }"#;
        let def: BenefitDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.occurrences_in_cycle, 2);
        assert_eq!(def.max_amount, Some(50.0));
        assert_matches!(def.schedule, CycleSchedule::CalendarFixed { .. });
    }

    #[test]
    fn definition_defaults_alignment_and_occurrences() {
        let json = r#"{"category": "Travel", "description": "Annual credit", "frequency": "YEARLY"}"#;
        let def: BenefitDefinition = serde_json::from_str(json).unwrap();
        assert_eq!(def.schedule, CycleSchedule::Yearly);
        assert_eq!(def.occurrences_in_cycle, 1);
    }

    #[test]
    fn definition_rejects_zero_occurrences() {
        let json = r#"{"category": "Travel", "frequency": "YEARLY", "occurrencesInCycle": 0}"#;
        let err = serde_json::from_str::<BenefitDefinition>(json).unwrap_err();
        assert!(err.to_string().contains("Invalid benefit 'Travel'"));
    }

    #[test]
    fn definition_rejects_illegal_combination() {
        let json = r#"{
            "category": "Lounge",
            "frequency": "YEARLY",
            "fixedCycleStartMonth": 1
        }"#;
        let err = serde_json::from_str::<BenefitDefinition>(json).unwrap_err();
        assert!(err.to_string().contains("require CALENDAR_FIXED"));
    }

    #[test]
    fn definition_serializes_to_wire_shape() {
        let def = BenefitDefinition::new(
            "Streaming",
            "Monthly streaming credit",
            CycleSchedule::Monthly,
        )
        .max_amount(15.0);
        let value = serde_json::to_value(&def).unwrap();
        assert_eq!(value["frequency"], "MONTHLY");
        assert_eq!(value["cycleAlignment"], "CARD_ANNIVERSARY");
        assert_eq!(value["occurrencesInCycle"], 1);
        assert!(value["fixedCycleStartMonth"].is_null());
    }
}
