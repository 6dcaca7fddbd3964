use crate::types::{
    Admin, AdminCredentials, Appointment, AppointmentDetails, AppointmentStatus, Barber,
    BarberData, NewAdmin, NewAppointment, NewUser, Specialty, SpecialtyData, Stats, User,
    UserCredentials,
};
use chrono::NaiveDate;
use uuid::Uuid;

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum BackendError {
    /// A uniqueness rule rejected the write.
    #[error("Conflict: {0}")]
    Conflict(String),
    /// The write touched a record that other records still reference, or
    /// referenced a record that does not exist.
    #[error("Referenced record: {0}")]
    Referenced(String),
    #[error("Database error: {0}")]
    Database(String),
    #[error("Storage lock poisoned")]
    LockPoisoned,
}

/// Storage seam of the service. Implemented by `DatabaseInterface`
/// (PostgreSQL) and `LocalStore` (in memory).
pub trait BookingBackend: Clone + Send + Sync + 'static {
    /// Time labels of the `scheduled` appointments of a barber on a date.
    fn booked_times(&self, barber_id: i32, date: NaiveDate) -> Result<Vec<String>, BackendError>;
    /// Inserts a `scheduled` appointment unless the (barber, date, time)
    /// tuple is already taken by a `scheduled` one, in which case
    /// `BackendError::Conflict` is returned. Check and insert are atomic.
    fn insert_appointment(&self, appointment: NewAppointment)
        -> Result<Appointment, BackendError>;
    fn appointment(&self, id: i32) -> Result<Option<Appointment>, BackendError>;
    fn user_appointment(&self, id: i32, user_id: i32) -> Result<Option<Appointment>, BackendError>;
    /// Moves an appointment from `from` to `to`. Returns `false` when the
    /// appointment is missing or no longer in `from`.
    fn transition_appointment(
        &self,
        id: i32,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<bool, BackendError>;
    /// All appointments of a user, latest first.
    fn user_appointments(&self, user_id: i32) -> Result<Vec<AppointmentDetails>, BackendError>;
    /// All appointments on a date, ordered by time.
    fn appointments_on(&self, date: NaiveDate) -> Result<Vec<AppointmentDetails>, BackendError>;
    /// All appointments strictly after a date, ordered by date and time.
    fn appointments_after(&self, date: NaiveDate)
        -> Result<Vec<AppointmentDetails>, BackendError>;
    fn scheduled_for_barber_from(&self, barber_id: i32, date: NaiveDate)
        -> Result<i64, BackendError>;
    fn scheduled_for_specialty_from(
        &self,
        specialty_id: i32,
        date: NaiveDate,
    ) -> Result<i64, BackendError>;
    fn stats(&self, today: NaiveDate) -> Result<Stats, BackendError>;

    fn barbers(&self) -> Result<Vec<Barber>, BackendError>;
    fn barbers_by_specialty(&self, specialty_id: i32) -> Result<Vec<Barber>, BackendError>;
    fn barber(&self, id: i32) -> Result<Option<Barber>, BackendError>;
    fn add_barber(&self, barber: BarberData) -> Result<Barber, BackendError>;
    fn update_barber(&self, id: i32, barber: BarberData) -> Result<Option<Barber>, BackendError>;
    fn remove_barber(&self, id: i32) -> Result<bool, BackendError>;
    /// Associates the given specialties with a barber, skipping existing
    /// associations. Returns the number of new associations.
    fn add_barber_specialties(
        &self,
        barber_id: i32,
        specialty_ids: &[i32],
    ) -> Result<usize, BackendError>;
    fn remove_barber_specialty(&self, barber_id: i32, specialty_id: i32)
        -> Result<bool, BackendError>;

    fn specialties(&self) -> Result<Vec<Specialty>, BackendError>;
    fn specialties_by_ids(&self, ids: &[i32]) -> Result<Vec<Specialty>, BackendError>;
    fn specialty(&self, id: i32) -> Result<Option<Specialty>, BackendError>;
    fn add_specialty(&self, specialty: SpecialtyData) -> Result<Specialty, BackendError>;
    fn update_specialty(
        &self,
        id: i32,
        specialty: SpecialtyData,
    ) -> Result<Option<Specialty>, BackendError>;
    fn remove_specialty(&self, id: i32) -> Result<bool, BackendError>;

    /// Fails with `BackendError::Conflict` when the email is taken.
    fn add_user(&self, user: NewUser) -> Result<User, BackendError>;
    fn user(&self, id: i32) -> Result<Option<User>, BackendError>;
    fn user_credentials(&self, email: &str) -> Result<Option<UserCredentials>, BackendError>;

    /// Fails with `BackendError::Conflict` when the email is taken.
    fn add_admin(&self, admin: NewAdmin) -> Result<Admin, BackendError>;
    fn admin(&self, id: Uuid) -> Result<Option<Admin>, BackendError>;
    fn admin_credentials(&self, email: &str) -> Result<Option<AdminCredentials>, BackendError>;
}
