use chrono::{Days, NaiveDate, Utc};

use crate::model::Day;

/// Source of "today". Injected so tests (and operators) can pin the date.
pub trait Clock: Send + Sync {
    fn today(&self) -> Day;
}

/// Current UTC calendar day.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> Day {
        Utc::now().date_naive()
    }
}

/// Always reports the same day.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub Day);

impl Clock for FixedClock {
    fn today(&self) -> Day {
        self.0
    }
}

/// `today` shifted by `n` days (negative goes back).
pub fn days_after(today: Day, n: i64) -> Day {
    let shifted = if n >= 0 {
        today.checked_add_days(Days::new(n.unsigned_abs()))
    } else {
        today.checked_sub_days(Days::new(n.unsigned_abs()))
    };
    shifted.unwrap_or(if n >= 0 { NaiveDate::MAX } else { NaiveDate::MIN })
}
