//! Calendar clock capability.
//!
//! Date-window comparisons depend on the invocation-time calendar date, so
//! "today" is injected rather than read ambiently — tests supply a pinned
//! date instead of depending on wall-clock time.

use chrono::{NaiveDate, Utc};

/// Source of the current calendar date.
pub trait Clock {
    /// Current date, truncated to day granularity.
    fn today(&self) -> NaiveDate;
}

/// Wall-clock backed implementation used in production wiring.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn today(&self) -> NaiveDate {
        Utc::now().date_naive()
    }
}

/// Clock pinned to a fixed date, for deterministic tests.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock {
    date: NaiveDate,
}

impl FixedClock {
    pub fn new(date: NaiveDate) -> Self {
        Self { date }
    }
}

impl Clock for FixedClock {
    fn today(&self) -> NaiveDate {
        self.date
    }
}
