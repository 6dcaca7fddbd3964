use crate::{
    backend::{BackendError, BookingBackend},
    clock::ShopClock,
    error::AppError,
    slots::is_candidate_time,
    types::{Appointment, AppointmentStatus, NewAppointment},
};
use chrono::{NaiveDate, NaiveTime, TimeDelta};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use validator::Validate;

/// Minimum notice for a client cancellation.
pub const CANCELLATION_NOTICE_HOURS: i64 = 2;

lazy_static! {
    static ref DATE_PATTERN: Regex = Regex::new(r"^\d{4}-\d{2}-\d{2}$").unwrap();
    static ref TIME_PATTERN: Regex = Regex::new(r"^\d{2}:\d{2}$").unwrap();
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct BookingRequest {
    #[validate(range(min = 1, message = "barberId must be a positive integer"))]
    pub barber_id: i32,
    #[validate(range(min = 1, message = "specialtyId must be a positive integer"))]
    pub specialty_id: i32,
    #[validate(regex(path = *DATE_PATTERN, message = "date must be formatted as YYYY-MM-DD"))]
    pub date: String,
    #[validate(regex(path = *TIME_PATTERN, message = "time must be formatted as HH:MM"))]
    pub time: String,
}

impl BookingRequest {
    fn slot(&self) -> Result<(NaiveDate, NaiveTime), AppError> {
        self.validate()?;
        let date = NaiveDate::parse_from_str(&self.date, "%Y-%m-%d")
            .map_err(|_| AppError::Validation(format!("{} is not a calendar date", self.date)))?;
        let time = NaiveTime::parse_from_str(&self.time, "%H:%M")
            .map_err(|_| AppError::Validation(format!("{} is not a time of day", self.time)))?;
        if !is_candidate_time(&self.time) {
            return Err(AppError::Validation(format!(
                "{} is not a bookable slot (08:00 to 17:30, every 30 minutes)",
                self.time
            )));
        }
        Ok((date, time))
    }
}

/// Creates, cancels and completes appointments while keeping at most one
/// `scheduled` appointment per barber and slot.
#[derive(Debug, Clone)]
pub struct BookingGuard<T: BookingBackend> {
    backend: T,
    clock: ShopClock,
}

impl<T: BookingBackend> BookingGuard<T> {
    pub fn new(backend: T, clock: ShopClock) -> Self {
        Self { backend, clock }
    }

    pub fn book(&self, user_id: i32, request: &BookingRequest) -> Result<Appointment, AppError> {
        let (date, _) = request.slot()?;

        if self.backend.barber(request.barber_id)?.is_none() {
            return Err(AppError::NotFound("Barber not found".into()));
        }
        if self.backend.specialty(request.specialty_id)?.is_none() {
            return Err(AppError::NotFound("Specialty not found".into()));
        }

        let new_appointment = NewAppointment {
            user_id,
            barber_id: request.barber_id,
            specialty_id: request.specialty_id,
            date,
            time: request.time.clone(),
        };

        match self.backend.insert_appointment(new_appointment) {
            Ok(appointment) => {
                info!(
                    appointment_id = appointment.id,
                    barber_id = appointment.barber_id,
                    %date,
                    time = %appointment.time,
                    "Appointment booked"
                );
                Ok(appointment)
            }
            Err(BackendError::Conflict(_)) => {
                warn!(
                    barber_id = request.barber_id,
                    %date,
                    time = %request.time,
                    "Slot already taken"
                );
                Err(AppError::Conflict("Time slot is not available".into()))
            }
            Err(BackendError::Referenced(_)) => Err(AppError::NotFound(
                "Barber or specialty no longer exists".into(),
            )),
            Err(err) => Err(err.into()),
        }
    }

    /// Cancels an appointment of `user_id`. Appointments of other users are
    /// reported as missing.
    pub fn cancel(&self, user_id: i32, appointment_id: i32) -> Result<(), AppError> {
        let appointment = self
            .backend
            .user_appointment(appointment_id, user_id)?
            .ok_or_else(|| AppError::NotFound("Appointment not found".into()))?;

        if appointment.status.is_terminal() {
            return Err(AppError::Policy(format!(
                "Appointment is already {}",
                appointment.status
            )));
        }

        let time = appointment.start_time().ok_or_else(|| {
            AppError::Internal(format!(
                "Appointment {} has malformed time '{}'",
                appointment.id, appointment.time
            ))
        })?;
        let starts_at = self.clock.starts_at(appointment.date, time);
        if starts_at - self.clock.now() < TimeDelta::hours(CANCELLATION_NOTICE_HOURS) {
            warn!(appointment_id, %starts_at, "Cancellation inside notice period");
            return Err(AppError::Policy(format!(
                "Appointments can only be cancelled at least \
                 {CANCELLATION_NOTICE_HOURS} hours in advance"
            )));
        }

        self.transition(appointment_id, AppointmentStatus::Cancelled)?;
        info!(appointment_id, user_id, "Appointment cancelled");
        Ok(())
    }

    /// Marks a scheduled appointment as completed.
    pub fn complete(&self, appointment_id: i32) -> Result<(), AppError> {
        let appointment = self
            .backend
            .appointment(appointment_id)?
            .ok_or_else(|| AppError::NotFound("Appointment not found".into()))?;

        if appointment.status.is_terminal() {
            return Err(AppError::Policy(format!(
                "Appointment is already {}",
                appointment.status
            )));
        }

        self.transition(appointment_id, AppointmentStatus::Completed)?;
        info!(appointment_id, "Appointment completed");
        Ok(())
    }

    fn transition(&self, appointment_id: i32, to: AppointmentStatus) -> Result<(), AppError> {
        let changed = self.backend.transition_appointment(
            appointment_id,
            AppointmentStatus::Scheduled,
            to,
        )?;
        if !changed {
            // Status moved between the read and the update.
            return Err(AppError::Policy("Appointment is no longer scheduled".into()));
        }
        Ok(())
    }
}
