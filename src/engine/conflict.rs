use chrono::{NaiveDate, NaiveDateTime, Timelike};
use ulid::Ulid;

use crate::limits::*;
use crate::model::*;

use super::EngineError;

pub(crate) fn validate_duration(duration: Minute) -> Result<(), EngineError> {
    if duration <= 0 {
        return Err(EngineError::Validation(format!("duration must be positive, got {duration}")));
    }
    if duration > MAX_SERVICE_DURATION_MIN {
        return Err(EngineError::LimitExceeded("duration too long"));
    }
    Ok(())
}

/// A slot is past when its date is before today, or it is today and the
/// start lies strictly before the current time of day.
fn is_past(date: NaiveDate, start: Minute, now: NaiveDateTime) -> bool {
    let today = now.date();
    if date != today {
        return date < today;
    }
    (start as i64) * 60 < now.time().num_seconds_from_midnight() as i64
}

/// Classify one candidate `[start, start + duration)` against the day's
/// bookings. Exact minute arithmetic, no grid assumptions about `bookings`.
///
/// Precedence: past, then forward (start falls inside a booking) over every
/// booking, then backward (end falls inside, or the candidate spans one).
pub fn classify(
    start: Minute,
    duration: Minute,
    date: NaiveDate,
    bookings: &[Booking],
    now: NaiveDateTime,
) -> (SlotStatus, Option<Ulid>) {
    if is_past(date, start, now) {
        return (SlotStatus::Past, None);
    }
    let candidate = Span::new(start, start + duration);

    if let Some(b) = bookings.iter().find(|b| b.span().contains_instant(candidate.start)) {
        return (SlotStatus::ForwardConflict, Some(b.id));
    }

    let backward = bookings.iter().find(|b| {
        let existing = b.span();
        let ends_inside = existing.start < candidate.end && candidate.end <= existing.end;
        ends_inside || candidate.strictly_contains(&existing)
    });
    if let Some(b) = backward {
        debug_assert!(candidate.overlaps(&b.span()));
        return (SlotStatus::BackwardConflict, Some(b.id));
    }

    debug_assert!(bookings.iter().all(|b| !candidate.overlaps(&b.span())));
    (SlotStatus::Free, None)
}

/// Status of every legal slot for a candidate of `duration` minutes.
pub fn available_slots(
    legal_slots: impl IntoIterator<Item = Minute>,
    bookings: &[Booking],
    duration: Minute,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Vec<Slot> {
    legal_slots
        .into_iter()
        .map(|time| {
            let (status, blocked_by) = classify(time, duration, date, bookings, now);
            Slot { time, status, blocked_by }
        })
        .collect()
}

/// Commit-time re-validation of one candidate against freshly derived slots.
pub(crate) fn check_candidate(
    legal_slots: &[Minute],
    bookings: &[Booking],
    start: Minute,
    duration: Minute,
    date: NaiveDate,
    now: NaiveDateTime,
) -> Result<(), EngineError> {
    let slots = available_slots(legal_slots.iter().copied(), bookings, duration, date, now);
    let slot = slots
        .iter()
        .find(|s| s.time == start)
        .ok_or_else(|| EngineError::Validation(format!("{} is not a bookable slot", crate::clock::format_minute(start))))?;
    if slot.status.is_free() {
        Ok(())
    } else {
        Err(EngineError::Conflict {
            status: slot.status,
            booking: slot.blocked_by,
        })
    }
}
