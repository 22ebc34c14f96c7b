//! Calendar arithmetic and the source of "now".
//!
//! Everything here is pure except [`SystemClock`]. Business hours are a value
//! handed to the engine, not a global, so they can become per-provider later.

use chrono::{Datelike, FixedOffset, NaiveDate, NaiveDateTime, NaiveTime, Offset, Timelike, Utc};

use crate::model::Minute;

pub const MINUTES_PER_DAY: Minute = 24 * 60;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClockError {
    /// A slot start carrying seconds.
    NotWholeMinute(NaiveTime),
    OpenAfterClose,
    BadGranularity(Minute),
}

impl std::fmt::Display for ClockError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClockError::NotWholeMinute(time) => write!(f, "time {time} is not on a whole minute"),
            ClockError::OpenAfterClose => write!(f, "opening time is after closing time"),
            ClockError::BadGranularity(g) => write!(f, "bad slot granularity: {g}"),
        }
    }
}

impl std::error::Error for ClockError {}

/// Opening hours and slot granularity shared by every provider of a tenant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusinessHours {
    /// First bookable start.
    pub open: Minute,
    /// Last bookable start (inclusive).
    pub close: Minute,
    pub granularity: Minute,
}

impl Default for BusinessHours {
    /// 10:00–21:00 inclusive, every 15 minutes: 45 slots.
    fn default() -> Self {
        Self {
            open: 10 * 60,
            close: 21 * 60,
            granularity: 15,
        }
    }
}

impl BusinessHours {
    pub fn new(open: NaiveTime, close: NaiveTime, granularity: Minute) -> Result<Self, ClockError> {
        let open = minute_of(open)?;
        let close = minute_of(close)?;
        if open > close {
            return Err(ClockError::OpenAfterClose);
        }
        if granularity <= 0 || granularity > MINUTES_PER_DAY {
            return Err(ClockError::BadGranularity(granularity));
        }
        Ok(Self { open, close, granularity })
    }

    pub fn slot_grid(&self) -> SlotGrid {
        slot_grid(self.open, self.close, self.granularity)
    }

    pub fn is_on_grid(&self, minute: Minute) -> bool {
        minute >= self.open
            && minute <= self.close
            && (minute - self.open) % self.granularity == 0
    }
}

/// Ordered start times from `open` to `close` inclusive. `Clone` it to restart.
#[derive(Debug, Clone)]
pub struct SlotGrid {
    next: Minute,
    close: Minute,
    step: Minute,
}

impl Iterator for SlotGrid {
    type Item = Minute;

    fn next(&mut self) -> Option<Minute> {
        if self.next > self.close {
            return None;
        }
        let current = self.next;
        self.next += self.step;
        Some(current)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let n = if self.next > self.close {
            0
        } else {
            ((self.close - self.next) / self.step + 1) as usize
        };
        (n, Some(n))
    }
}

impl ExactSizeIterator for SlotGrid {}

pub fn slot_grid(open: Minute, close: Minute, granularity: Minute) -> SlotGrid {
    SlotGrid {
        next: open,
        close,
        step: granularity.max(1),
    }
}

/// 0 = Monday … 6 = Sunday.
pub fn weekday_of(date: NaiveDate) -> u8 {
    date.weekday().num_days_from_monday() as u8
}

/// Minute offset of a slot start. Slot starts carry no seconds.
pub fn minute_of(time: NaiveTime) -> Result<Minute, ClockError> {
    if time.second() != 0 || time.nanosecond() != 0 {
        return Err(ClockError::NotWholeMinute(time));
    }
    Ok((time.hour() * 60 + time.minute()) as Minute)
}

/// `None` outside a single day.
pub fn time_of(minute: Minute) -> Option<NaiveTime> {
    if !(0..MINUTES_PER_DAY).contains(&minute) {
        return None;
    }
    NaiveTime::from_hms_opt((minute / 60) as u32, (minute % 60) as u32, 0)
}

/// `HH:MM`, tolerating minutes past midnight (e.g. a booking ending at 24:30).
pub fn format_minute(minute: Minute) -> String {
    format!("{:02}:{:02}", minute / 60, minute % 60)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MonthStep {
    Previous,
    Next,
}

/// Stateless month pagination for calendar views.
pub fn step_month(year: i32, month: u32, step: MonthStep) -> (i32, u32) {
    match step {
        MonthStep::Next if month >= 12 => (year + 1, 1),
        MonthStep::Next => (year, month + 1),
        MonthStep::Previous if month <= 1 => (year - 1, 12),
        MonthStep::Previous => (year, month - 1),
    }
}

/// Every date of a month, or `None` for an invalid year/month.
pub fn days_of_month(year: i32, month: u32) -> Option<Vec<NaiveDate>> {
    let first = NaiveDate::from_ymd_opt(year, month, 1)?;
    let (ny, nm) = step_month(year, month, MonthStep::Next);
    let next_first = NaiveDate::from_ymd_opt(ny, nm, 1)?;
    Some(first.iter_days().take_while(|d| *d < next_first).collect())
}

/// Local wall-clock time of the studio.
pub trait Clock: Send + Sync {
    fn now(&self) -> NaiveDateTime;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    offset: FixedOffset,
}

impl SystemClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self { offset }
    }

    pub fn utc() -> Self {
        Self::new(Utc.fix())
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::utc()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> NaiveDateTime {
        Utc::now().with_timezone(&self.offset).naive_local()
    }
}

/// A clock stuck at one instant.
#[derive(Debug, Clone, Copy)]
pub struct FixedClock(pub NaiveDateTime);

impl Clock for FixedClock {
    fn now(&self) -> NaiveDateTime {
        self.0
    }
}
