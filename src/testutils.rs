use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, AtomicU64, Ordering},
        Arc, Mutex,
    },
    thread,
    time::Duration,
};

use chrono::{FixedOffset, NaiveDate};
use uuid::Uuid;

use crate::{
    backend::{BackendError, BookingBackend},
    configuration::{AdminAccount, Configuration},
    local_store::LocalStore,
    types::{
        Admin, AdminCredentials, Appointment, AppointmentDetails, AppointmentStatus, Barber,
        BarberData, NewAdmin, NewAppointment, NewUser, Specialty, SpecialtyData, Stats, User,
        UserCredentials,
    },
};

pub const TEST_SECRET: &str = "test-secret";
pub const TEST_ITERATIONS: u32 = 1_000;

pub fn seed_barber(store: &LocalStore, name: &str) -> i32 {
    store
        .add_barber(BarberData {
            name: name.into(),
            age: 30,
            hire_date: NaiveDate::from_ymd_opt(2020, 1, 15).unwrap(),
        })
        .unwrap()
        .id
}

pub fn seed_specialty(store: &LocalStore, name: &str) -> i32 {
    store
        .add_specialty(SpecialtyData {
            name: name.into(),
            description: None,
            price: 35.0,
            duration: 30,
        })
        .unwrap()
        .id
}

pub fn seed_user(store: &LocalStore, email: &str) -> i32 {
    store
        .add_user(NewUser {
            name: "Client".into(),
            email: email.into(),
            password_hash: "not-a-real-hash".into(),
        })
        .unwrap()
        .id
}

#[derive(Debug, Clone)]
pub struct TestConfiguration {
    pub admin_account: Option<AdminAccount>,
    pub rate_limit_max_requests: u32,
}

impl Default for TestConfiguration {
    fn default() -> Self {
        Self {
            admin_account: Some(AdminAccount {
                name: "Administrator".into(),
                email: "admin@example.com".into(),
                password: "admin-password".into(),
            }),
            rate_limit_max_requests: 100,
        }
    }
}

impl Configuration for TestConfiguration {
    fn port(&self) -> String {
        "0".into()
    }

    fn database_url(&self) -> Option<String> {
        None
    }

    fn jwt_secret(&self) -> String {
        TEST_SECRET.into()
    }

    fn frontend_url(&self) -> Option<String> {
        None
    }

    fn utc_offset(&self) -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn password_hash_iterations(&self) -> u32 {
        TEST_ITERATIONS
    }

    fn admin_account(&self) -> Option<AdminAccount> {
        self.admin_account.clone()
    }

    fn database_pool_size(&self) -> u32 {
        1
    }

    fn rate_limit_max_requests(&self) -> u32 {
        self.rate_limit_max_requests
    }

    fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(15 * 60)
    }
}

/// In-memory backend that counts calls per method and can be switched to
/// fail every call. `delay_ms` makes every call block its thread first.
pub struct MockBookingBackendInner {
    pub success: AtomicBool,
    pub delay_ms: AtomicU64,
    pub store: LocalStore,
    calls: Mutex<HashMap<&'static str, u64>>,
}

#[derive(Clone)]
pub struct MockBookingBackend(pub Arc<MockBookingBackendInner>);

impl MockBookingBackend {
    pub fn new() -> Self {
        Self(Arc::new(MockBookingBackendInner {
            success: AtomicBool::new(true),
            delay_ms: AtomicU64::new(0),
            store: LocalStore::default(),
            calls: Mutex::default(),
        }))
    }

    pub fn calls(&self, method: &str) -> u64 {
        self.0
            .calls
            .lock()
            .unwrap()
            .get(method)
            .copied()
            .unwrap_or_default()
    }

    pub fn total_calls(&self) -> u64 {
        self.0.calls.lock().unwrap().values().sum()
    }

    fn call(&self, method: &'static str) -> Result<&LocalStore, BackendError> {
        *self.0.calls.lock().unwrap().entry(method).or_default() += 1;
        let delay = self.0.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            thread::sleep(Duration::from_millis(delay));
        }
        match self.0.success.load(Ordering::SeqCst) {
            true => Ok(&self.0.store),
            false => Err(BackendError::Database("Supposed to fail".into())),
        }
    }
}

impl BookingBackend for MockBookingBackend {
    fn booked_times(&self, barber_id: i32, date: NaiveDate) -> Result<Vec<String>, BackendError> {
        self.call("booked_times")?.booked_times(barber_id, date)
    }

    fn insert_appointment(&self, appointment: NewAppointment) -> Result<Appointment, BackendError> {
        self.call("insert_appointment")?.insert_appointment(appointment)
    }

    fn appointment(&self, id: i32) -> Result<Option<Appointment>, BackendError> {
        self.call("appointment")?.appointment(id)
    }

    fn user_appointment(&self, id: i32, user_id: i32) -> Result<Option<Appointment>, BackendError> {
        self.call("user_appointment")?.user_appointment(id, user_id)
    }

    fn transition_appointment(
        &self,
        id: i32,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<bool, BackendError> {
        self.call("transition_appointment")?
            .transition_appointment(id, from, to)
    }

    fn user_appointments(&self, user_id: i32) -> Result<Vec<AppointmentDetails>, BackendError> {
        self.call("user_appointments")?.user_appointments(user_id)
    }

    fn appointments_on(&self, date: NaiveDate) -> Result<Vec<AppointmentDetails>, BackendError> {
        self.call("appointments_on")?.appointments_on(date)
    }

    fn appointments_after(&self, date: NaiveDate) -> Result<Vec<AppointmentDetails>, BackendError> {
        self.call("appointments_after")?.appointments_after(date)
    }

    fn scheduled_for_barber_from(
        &self,
        barber_id: i32,
        date: NaiveDate,
    ) -> Result<i64, BackendError> {
        self.call("scheduled_for_barber_from")?
            .scheduled_for_barber_from(barber_id, date)
    }

    fn scheduled_for_specialty_from(
        &self,
        specialty_id: i32,
        date: NaiveDate,
    ) -> Result<i64, BackendError> {
        self.call("scheduled_for_specialty_from")?
            .scheduled_for_specialty_from(specialty_id, date)
    }

    fn stats(&self, today: NaiveDate) -> Result<Stats, BackendError> {
        self.call("stats")?.stats(today)
    }

    fn barbers(&self) -> Result<Vec<Barber>, BackendError> {
        self.call("barbers")?.barbers()
    }

    fn barbers_by_specialty(&self, specialty_id: i32) -> Result<Vec<Barber>, BackendError> {
        self.call("barbers_by_specialty")?
            .barbers_by_specialty(specialty_id)
    }

    fn barber(&self, id: i32) -> Result<Option<Barber>, BackendError> {
        self.call("barber")?.barber(id)
    }

    fn add_barber(&self, barber: BarberData) -> Result<Barber, BackendError> {
        self.call("add_barber")?.add_barber(barber)
    }

    fn update_barber(&self, id: i32, barber: BarberData) -> Result<Option<Barber>, BackendError> {
        self.call("update_barber")?.update_barber(id, barber)
    }

    fn remove_barber(&self, id: i32) -> Result<bool, BackendError> {
        self.call("remove_barber")?.remove_barber(id)
    }

    fn add_barber_specialties(
        &self,
        barber_id: i32,
        specialty_ids: &[i32],
    ) -> Result<usize, BackendError> {
        self.call("add_barber_specialties")?
            .add_barber_specialties(barber_id, specialty_ids)
    }

    fn remove_barber_specialty(
        &self,
        barber_id: i32,
        specialty_id: i32,
    ) -> Result<bool, BackendError> {
        self.call("remove_barber_specialty")?
            .remove_barber_specialty(barber_id, specialty_id)
    }

    fn specialties(&self) -> Result<Vec<Specialty>, BackendError> {
        self.call("specialties")?.specialties()
    }

    fn specialties_by_ids(&self, ids: &[i32]) -> Result<Vec<Specialty>, BackendError> {
        self.call("specialties_by_ids")?.specialties_by_ids(ids)
    }

    fn specialty(&self, id: i32) -> Result<Option<Specialty>, BackendError> {
        self.call("specialty")?.specialty(id)
    }

    fn add_specialty(&self, specialty: SpecialtyData) -> Result<Specialty, BackendError> {
        self.call("add_specialty")?.add_specialty(specialty)
    }

    fn update_specialty(
        &self,
        id: i32,
        specialty: SpecialtyData,
    ) -> Result<Option<Specialty>, BackendError> {
        self.call("update_specialty")?.update_specialty(id, specialty)
    }

    fn remove_specialty(&self, id: i32) -> Result<bool, BackendError> {
        self.call("remove_specialty")?.remove_specialty(id)
    }

    fn add_user(&self, user: NewUser) -> Result<User, BackendError> {
        self.call("add_user")?.add_user(user)
    }

    fn user(&self, id: i32) -> Result<Option<User>, BackendError> {
        self.call("user")?.user(id)
    }

    fn user_credentials(&self, email: &str) -> Result<Option<UserCredentials>, BackendError> {
        self.call("user_credentials")?.user_credentials(email)
    }

    fn add_admin(&self, admin: NewAdmin) -> Result<Admin, BackendError> {
        self.call("add_admin")?.add_admin(admin)
    }

    fn admin(&self, id: Uuid) -> Result<Option<Admin>, BackendError> {
        self.call("admin")?.admin(id)
    }

    fn admin_credentials(&self, email: &str) -> Result<Option<AdminCredentials>, BackendError> {
        self.call("admin_credentials")?.admin_credentials(email)
    }
}
