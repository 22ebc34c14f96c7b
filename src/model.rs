use std::collections::{BTreeMap, HashMap};

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use ulid::Ulid;

/// Minutes since local midnight; the only time-of-day type inside the engine.
pub type Minute = i32;

/// Half-open interval `[start, end)` of minutes within one calendar day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Span {
    pub start: Minute,
    pub end: Minute,
}

impl Span {
    pub fn new(start: Minute, end: Minute) -> Self {
        debug_assert!(start < end, "Span start must be before end");
        Self { start, end }
    }

    pub fn duration(&self) -> Minute {
        self.end - self.start
    }

    pub fn overlaps(&self, other: &Span) -> bool {
        self.start < other.end && other.start < self.end
    }

    pub fn contains_instant(&self, t: Minute) -> bool {
        self.start <= t && t < self.end
    }

    /// True if `self` strictly surrounds `other` on both sides.
    pub fn strictly_contains(&self, other: &Span) -> bool {
        self.start < other.start && other.end < self.end
    }
}

/// Mon–Fri working, Sat–Sun off.
pub const DEFAULT_WORKING_DAYS: [bool; 7] = [true, true, true, true, true, false, false];

/// Working flag per weekday, Monday = 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeeklyTemplate([bool; 7]);

impl Default for WeeklyTemplate {
    fn default() -> Self {
        Self(DEFAULT_WORKING_DAYS)
    }
}

impl WeeklyTemplate {
    pub fn new(days: [bool; 7]) -> Self {
        Self(days)
    }

    /// Unknown weekdays fail closed.
    pub fn is_working(&self, weekday: u8) -> bool {
        self.0.get(weekday as usize).copied().unwrap_or(false)
    }

    pub fn set(&mut self, weekday: u8, working: bool) {
        if let Some(slot) = self.0.get_mut(weekday as usize) {
            *slot = working;
        }
    }

    pub fn days(&self) -> [bool; 7] {
        self.0
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub name: String,
    pub category: Option<String>,
    /// Minutes, always positive.
    pub duration: Minute,
    /// Minor currency units, always positive.
    pub price: i64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Client {
    pub id: Ulid,
    pub name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Booking {
    pub id: Ulid,
    pub provider_id: Ulid,
    pub client_id: Ulid,
    pub service_id: Ulid,
    pub date: NaiveDate,
    pub start: Minute,
    /// Copied from the service when the booking was committed.
    pub duration: Minute,
}

impl Booking {
    pub fn span(&self) -> Span {
        Span::new(self.start, self.start + self.duration)
    }
}

/// How a candidate start time relates to "now" and the day's bookings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SlotStatus {
    Free,
    Past,
    /// The candidate would start during an existing booking.
    ForwardConflict,
    /// The candidate would run into, or across, an existing booking.
    BackwardConflict,
}

impl SlotStatus {
    pub fn is_free(&self) -> bool {
        matches!(self, SlotStatus::Free)
    }

    /// Collapsed view: both directions are the same overlap invariant.
    pub fn is_conflict(&self) -> bool {
        matches!(self, SlotStatus::ForwardConflict | SlotStatus::BackwardConflict)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SlotStatus::Free => "free",
            SlotStatus::Past => "past",
            SlotStatus::ForwardConflict => "forward_conflict",
            SlotStatus::BackwardConflict => "backward_conflict",
        }
    }
}

impl std::fmt::Display for SlotStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub time: Minute,
    pub status: SlotStatus,
    /// The booking responsible for a conflict status.
    pub blocked_by: Option<Ulid>,
}

/// Schedule and bookings of one provider. Guarded by a per-provider lock.
#[derive(Debug, Clone)]
pub struct ProviderState {
    pub id: Ulid,
    pub name: Option<String>,
    pub template: WeeklyTemplate,
    /// Date exceptions; presence always beats the template.
    pub exceptions: BTreeMap<NaiveDate, bool>,
    /// Bookings per date, sorted by `start`.
    bookings: BTreeMap<NaiveDate, Vec<Booking>>,
    booking_dates: HashMap<Ulid, NaiveDate>,
    /// Set once the provider is deleted; holders of a stale Arc must not write.
    pub retired: bool,
}

impl ProviderState {
    pub fn new(id: Ulid, name: Option<String>, template: WeeklyTemplate) -> Self {
        Self {
            id,
            name,
            template,
            exceptions: BTreeMap::new(),
            bookings: BTreeMap::new(),
            booking_dates: HashMap::new(),
            retired: false,
        }
    }

    pub fn bookings_on(&self, date: NaiveDate) -> &[Booking] {
        self.bookings.get(&date).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn all_bookings(&self) -> impl Iterator<Item = &Booking> {
        self.bookings.values().flatten()
    }

    pub fn booking_count(&self) -> usize {
        self.booking_dates.len()
    }

    /// True if a booking already starts at exactly `(date, start)`.
    pub fn has_start(&self, date: NaiveDate, start: Minute) -> bool {
        self.bookings_on(date)
            .binary_search_by_key(&start, |b| b.start)
            .is_ok()
    }

    /// Insert keeping start order. Refuses a second booking on the same
    /// `(date, start)` key and hands the booking back.
    pub fn insert_booking(&mut self, booking: Booking) -> Result<(), Booking> {
        let day = self.bookings.entry(booking.date).or_default();
        match day.binary_search_by_key(&booking.start, |b| b.start) {
            Ok(_) => Err(booking),
            Err(pos) => {
                self.booking_dates.insert(booking.id, booking.date);
                day.insert(pos, booking);
                Ok(())
            }
        }
    }

    pub fn remove_booking(&mut self, id: Ulid) -> Option<Booking> {
        let date = self.booking_dates.remove(&id)?;
        let day = self.bookings.get_mut(&date)?;
        let pos = day.iter().position(|b| b.id == id)?;
        let removed = day.remove(pos);
        if day.is_empty() {
            self.bookings.remove(&date);
        }
        Some(removed)
    }

    /// Drop every booking matching `pred`, returning their ids.
    pub fn remove_bookings_where(&mut self, pred: impl Fn(&Booking) -> bool) -> Vec<Ulid> {
        let ids: Vec<Ulid> = self.all_bookings().filter(|b| pred(b)).map(|b| b.id).collect();
        for id in &ids {
            self.remove_booking(*id);
        }
        ids
    }
}

/// The event types, flat with no nesting. This is the WAL record format.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Event {
    ProviderCreated {
        id: Ulid,
        name: Option<String>,
        template: WeeklyTemplate,
    },
    ProviderDeleted {
        id: Ulid,
    },
    WorkingDaySet {
        provider_id: Ulid,
        weekday: u8,
        working: bool,
    },
    OverrideSet {
        provider_id: Ulid,
        date: NaiveDate,
        working: bool,
    },
    OverrideCleared {
        provider_id: Ulid,
        date: NaiveDate,
    },
    ServiceCreated {
        id: Ulid,
        provider_id: Ulid,
        name: String,
        category: Option<String>,
        duration: Minute,
        price: i64,
    },
    ServiceUpdated {
        id: Ulid,
        provider_id: Ulid,
        name: String,
        category: Option<String>,
        duration: Minute,
        price: i64,
    },
    ServiceDeleted {
        id: Ulid,
        provider_id: Ulid,
    },
    ClientRegistered {
        id: Ulid,
        name: Option<String>,
    },
    ClientDeleted {
        id: Ulid,
    },
    BookingCommitted {
        id: Ulid,
        provider_id: Ulid,
        client_id: Ulid,
        service_id: Ulid,
        date: NaiveDate,
        start: Minute,
        duration: Minute,
    },
    BookingCancelled {
        id: Ulid,
        provider_id: Ulid,
    },
}

// ── Query result types ───────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderInfo {
    pub id: Ulid,
    pub name: Option<String>,
    pub template: WeeklyTemplate,
}

/// One day of a month calendar.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DaySchedule {
    pub date: NaiveDate,
    pub working: bool,
    /// An exception, not the template, decided `working`.
    pub overridden: bool,
}
