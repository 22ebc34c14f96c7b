use chrono::NaiveDate;

use crate::clock::{self, BusinessHours};
use crate::model::*;

/// An exception for the date wins in either direction; otherwise the weekly
/// template decides.
pub fn is_working_day(provider: &ProviderState, date: NaiveDate) -> bool {
    match provider.exceptions.get(&date) {
        Some(&working) => working,
        None => provider.template.is_working(clock::weekday_of(date)),
    }
}

/// Every start time the provider could take on `date`, ignoring bookings.
pub fn legal_slots(provider: &ProviderState, hours: &BusinessHours, date: NaiveDate) -> Vec<Minute> {
    if is_working_day(provider, date) {
        hours.slot_grid().collect()
    } else {
        Vec::new()
    }
}

pub fn day_schedule(provider: &ProviderState, date: NaiveDate) -> DaySchedule {
    DaySchedule {
        date,
        working: is_working_day(provider, date),
        overridden: provider.exceptions.contains_key(&date),
    }
}

/// The exception value a toggle would create: the opposite of the template.
pub fn inverse_of_template(provider: &ProviderState, date: NaiveDate) -> bool {
    !provider.template.is_working(clock::weekday_of(date))
}
