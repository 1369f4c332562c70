//! Raw request checking for the query surface. Turns the loosely typed
//! `(date, days)` a client sends into a [`Candidate`], collecting every
//! problem rather than stopping at the first.

use std::fmt;
use std::sync::LazyLock;

use chrono::NaiveDate;
use regex::Regex;
use thiserror::Error;

use crate::clock::days_after;
use crate::limits::{DEFAULT_DAYS, MAX_ADVANCE_DAYS, MAX_DAYS, MIN_DAYS};
use crate::model::{Candidate, Day};

pub const DATE_FORMAT: &str = "%Y-%m-%d";

static DATE_SHAPE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(19|20)\d\d-(0[1-9]|1[012])-(0[1-9]|[12][0-9]|3[01])$")
        .expect("date pattern is valid")
});

/// Fields as received, before any checks.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReservationRequest {
    pub date: Option<String>,
    pub days: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Issue {
    pub field: &'static str,
    pub message: String,
}

impl fmt::Display for Issue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid reservation request: {}", render(.issues))]
pub struct ValidationError {
    pub issues: Vec<Issue>,
}

fn render(issues: &[Issue]) -> String {
    issues
        .iter()
        .map(Issue::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Parse a `yyyy-mm-dd` day. `None` for anything else, including impossible
/// dates like `2026-02-30`.
pub fn parse_day(raw: &str) -> Option<Day> {
    if !DATE_SHAPE.is_match(raw) {
        return None;
    }
    NaiveDate::parse_from_str(raw, DATE_FORMAT).ok()
}

pub fn validate(request: &ReservationRequest, today: Day) -> Result<Candidate, ValidationError> {
    let mut issues = Vec::new();

    let raw_days = request.days.unwrap_or(i64::from(DEFAULT_DAYS));
    let days = u32::try_from(raw_days)
        .ok()
        .filter(|d| (MIN_DAYS..=MAX_DAYS).contains(d));
    if days.is_none() {
        issues.push(Issue {
            field: "days",
            message: format!("must be between {MIN_DAYS} and {MAX_DAYS}"),
        });
    }

    let date = match request.date.as_deref().map(str::trim) {
        None | Some("") => {
            issues.push(Issue {
                field: "date",
                message: "date is required".into(),
            });
            None
        }
        Some(raw) => match parse_day(raw) {
            None => {
                issues.push(Issue {
                    field: "date",
                    message: "invalid format, expected a date in yyyy-mm-dd format".into(),
                });
                None
            }
            Some(date) => {
                let horizon = days_after(today, MAX_ADVANCE_DAYS as i64);
                if date > horizon {
                    issues.push(Issue {
                        field: "date",
                        message: format!(
                            "cannot be more than {MAX_ADVANCE_DAYS} days in advance ({horizon})"
                        ),
                    });
                }
                if date <= today {
                    issues.push(Issue {
                        field: "date",
                        message: format!("must be at least one day after today ({today})"),
                    });
                }
                Some(date)
            }
        },
    };

    match (date, days) {
        (Some(date), Some(days)) if issues.is_empty() => Ok(Candidate::new(date, days)),
        _ => Err(ValidationError { issues }),
    }
}
