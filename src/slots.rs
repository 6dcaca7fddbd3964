use crate::backend::{BackendError, BookingBackend};
use chrono::NaiveDate;
use std::collections::HashSet;

pub const OPENING_HOUR: u32 = 8;
pub const CLOSING_HOUR: u32 = 18;
pub const SLOT_MINUTES: usize = 30;

/// Every bookable `HH:MM` label of a working day, ascending.
pub fn candidate_times() -> Vec<String> {
    (OPENING_HOUR..CLOSING_HOUR)
        .flat_map(|hour| {
            (0..60)
                .step_by(SLOT_MINUTES)
                .map(move |minute| format!("{hour:02}:{minute:02}"))
        })
        .collect()
}

pub fn is_candidate_time(label: &str) -> bool {
    candidate_times().iter().any(|candidate| candidate == label)
}

/// Candidate labels of the day minus the ones already held by `scheduled`
/// appointments of the barber. Past times of today are not filtered.
pub fn available_times<T: BookingBackend>(
    backend: &T,
    barber_id: i32,
    date: NaiveDate,
) -> Result<Vec<String>, BackendError> {
    let booked: HashSet<String> = backend.booked_times(barber_id, date)?.into_iter().collect();

    Ok(candidate_times()
        .into_iter()
        .filter(|time| !booked.contains(time))
        .collect())
}
