use crate::{
    backend::{BackendError, BookingBackend},
    types::{
        Admin, AdminCredentials, Appointment, AppointmentDetails, AppointmentStatus, Barber,
        BarberData, BarberRef, NewAdmin, NewAppointment, NewUser, Specialty, SpecialtyData,
        SpecialtyRef, SpecialtySummary, Stats, User, UserCredentials, UserRef,
    },
};
use chrono::{DateTime, NaiveDate, Utc};
use std::{
    collections::{BTreeMap, BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct BarberRecord {
    id: i32,
    name: String,
    age: i32,
    hire_date: NaiveDate,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct LocalState {
    last_id: i32,
    users: BTreeMap<i32, UserCredentials>,
    admins: HashMap<Uuid, AdminCredentials>,
    barbers: BTreeMap<i32, BarberRecord>,
    specialties: BTreeMap<i32, Specialty>,
    barber_specialties: BTreeSet<(i32, i32)>,
    appointments: BTreeMap<i32, Appointment>,
}

impl LocalState {
    fn next_id(&mut self) -> i32 {
        self.last_id += 1;
        self.last_id
    }

    fn barber(&self, record: &BarberRecord) -> Barber {
        let specialties = self
            .barber_specialties
            .range((record.id, i32::MIN)..=(record.id, i32::MAX))
            .filter_map(|(_, specialty_id)| self.specialties.get(specialty_id))
            .map(|specialty| SpecialtySummary {
                id: specialty.id,
                name: specialty.name.clone(),
            })
            .collect();

        Barber {
            id: record.id,
            name: record.name.clone(),
            age: record.age,
            hire_date: record.hire_date,
            created_at: record.created_at,
            specialties,
        }
    }

    fn sorted_barbers<'a>(&self, records: impl Iterator<Item = &'a BarberRecord>) -> Vec<Barber> {
        let mut barbers: Vec<Barber> = records.map(|record| self.barber(record)).collect();
        barbers.sort_by(|a, b| a.name.cmp(&b.name));
        barbers
    }

    fn details(&self, appointment: &Appointment) -> Option<AppointmentDetails> {
        let barber = self.barbers.get(&appointment.barber_id)?;
        let specialty = self.specialties.get(&appointment.specialty_id)?;
        let user = self.users.get(&appointment.user_id)?;

        Some(AppointmentDetails {
            id: appointment.id,
            date: appointment.date,
            time: appointment.time.clone(),
            status: appointment.status,
            created_at: appointment.created_at,
            barber: BarberRef {
                id: barber.id,
                name: barber.name.clone(),
            },
            specialty: SpecialtyRef {
                id: specialty.id,
                name: specialty.name.clone(),
                price: specialty.price,
                duration: specialty.duration,
            },
            user: UserRef {
                id: user.user.id,
                name: user.user.name.clone(),
            },
        })
    }

    fn details_where(&self, predicate: impl Fn(&Appointment) -> bool) -> Vec<AppointmentDetails> {
        self.appointments
            .values()
            .filter(|appointment| predicate(appointment))
            .filter_map(|appointment| self.details(appointment))
            .collect()
    }

    fn count_scheduled(&self, predicate: impl Fn(&Appointment) -> bool) -> i64 {
        self.appointments
            .values()
            .filter(|appointment| appointment.status == AppointmentStatus::Scheduled)
            .filter(|appointment| predicate(appointment))
            .count() as i64
    }
}

/// In-memory backend used when no database is configured. A single mutex
/// guards the whole state, which makes every operation atomic.
#[derive(Debug, Clone, Default)]
pub struct LocalStore {
    state: Arc<Mutex<LocalState>>,
}

impl LocalStore {
    fn lock(&self) -> Result<MutexGuard<'_, LocalState>, BackendError> {
        self.state.lock().map_err(|_| BackendError::LockPoisoned)
    }
}

impl BookingBackend for LocalStore {
    fn booked_times(&self, barber_id: i32, date: NaiveDate) -> Result<Vec<String>, BackendError> {
        Ok(self
            .lock()?
            .appointments
            .values()
            .filter(|a| {
                a.barber_id == barber_id
                    && a.date == date
                    && a.status == AppointmentStatus::Scheduled
            })
            .map(|a| a.time.clone())
            .collect())
    }

    fn insert_appointment(
        &self,
        appointment: NewAppointment,
    ) -> Result<Appointment, BackendError> {
        let mut state = self.lock()?;

        if !state.barbers.contains_key(&appointment.barber_id)
            || !state.specialties.contains_key(&appointment.specialty_id)
            || !state.users.contains_key(&appointment.user_id)
        {
            return Err(BackendError::Referenced(
                "Appointment references a missing record".into(),
            ));
        }

        let taken = state.appointments.values().any(|existing| {
            existing.barber_id == appointment.barber_id
                && existing.date == appointment.date
                && existing.time == appointment.time
                && existing.status == AppointmentStatus::Scheduled
        });
        if taken {
            return Err(BackendError::Conflict(
                "A scheduled appointment already holds this slot".into(),
            ));
        }

        let id = state.next_id();
        let created = Appointment {
            id,
            user_id: appointment.user_id,
            barber_id: appointment.barber_id,
            specialty_id: appointment.specialty_id,
            date: appointment.date,
            time: appointment.time,
            status: AppointmentStatus::Scheduled,
            created_at: Utc::now(),
        };
        state.appointments.insert(id, created.clone());
        Ok(created)
    }

    fn appointment(&self, id: i32) -> Result<Option<Appointment>, BackendError> {
        Ok(self.lock()?.appointments.get(&id).cloned())
    }

    fn user_appointment(
        &self,
        id: i32,
        user_id: i32,
    ) -> Result<Option<Appointment>, BackendError> {
        Ok(self
            .lock()?
            .appointments
            .get(&id)
            .filter(|appointment| appointment.user_id == user_id)
            .cloned())
    }

    fn transition_appointment(
        &self,
        id: i32,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<bool, BackendError> {
        let mut state = self.lock()?;
        match state.appointments.get_mut(&id) {
            Some(appointment) if appointment.status == from => {
                appointment.status = to;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn user_appointments(&self, user_id: i32) -> Result<Vec<AppointmentDetails>, BackendError> {
        let mut appointments = self.lock()?.details_where(|a| a.user_id == user_id);
        appointments.sort_by(|a, b| (b.date, &b.time).cmp(&(a.date, &a.time)));
        Ok(appointments)
    }

    fn appointments_on(&self, date: NaiveDate) -> Result<Vec<AppointmentDetails>, BackendError> {
        let mut appointments = self.lock()?.details_where(|a| a.date == date);
        appointments.sort_by(|a, b| a.time.cmp(&b.time));
        Ok(appointments)
    }

    fn appointments_after(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AppointmentDetails>, BackendError> {
        let mut appointments = self.lock()?.details_where(|a| a.date > date);
        appointments.sort_by(|a, b| (a.date, &a.time).cmp(&(b.date, &b.time)));
        Ok(appointments)
    }

    fn scheduled_for_barber_from(
        &self,
        barber_id: i32,
        date: NaiveDate,
    ) -> Result<i64, BackendError> {
        Ok(self
            .lock()?
            .count_scheduled(|a| a.barber_id == barber_id && a.date >= date))
    }

    fn scheduled_for_specialty_from(
        &self,
        specialty_id: i32,
        date: NaiveDate,
    ) -> Result<i64, BackendError> {
        Ok(self
            .lock()?
            .count_scheduled(|a| a.specialty_id == specialty_id && a.date >= date))
    }

    fn stats(&self, today: NaiveDate) -> Result<Stats, BackendError> {
        let state = self.lock()?;
        Ok(Stats {
            appointments_today: state.count_scheduled(|a| a.date == today),
            total_barbers: state.barbers.len() as i64,
            total_specialties: state.specialties.len() as i64,
            total_users: state.users.len() as i64,
        })
    }

    fn barbers(&self) -> Result<Vec<Barber>, BackendError> {
        let state = self.lock()?;
        Ok(state.sorted_barbers(state.barbers.values()))
    }

    fn barbers_by_specialty(&self, specialty_id: i32) -> Result<Vec<Barber>, BackendError> {
        let state = self.lock()?;
        Ok(state.sorted_barbers(
            state
                .barbers
                .values()
                .filter(|b| state.barber_specialties.contains(&(b.id, specialty_id))),
        ))
    }

    fn barber(&self, id: i32) -> Result<Option<Barber>, BackendError> {
        let state = self.lock()?;
        Ok(state.barbers.get(&id).map(|record| state.barber(record)))
    }

    fn add_barber(&self, barber: BarberData) -> Result<Barber, BackendError> {
        let mut state = self.lock()?;
        let id = state.next_id();
        let record = BarberRecord {
            id,
            name: barber.name,
            age: barber.age,
            hire_date: barber.hire_date,
            created_at: Utc::now(),
        };
        state.barbers.insert(id, record.clone());
        Ok(state.barber(&record))
    }

    fn update_barber(&self, id: i32, barber: BarberData) -> Result<Option<Barber>, BackendError> {
        let mut state = self.lock()?;
        let Some(record) = state.barbers.get_mut(&id) else {
            return Ok(None);
        };
        record.name = barber.name;
        record.age = barber.age;
        record.hire_date = barber.hire_date;
        let record = record.clone();
        Ok(Some(state.barber(&record)))
    }

    fn remove_barber(&self, id: i32) -> Result<bool, BackendError> {
        let mut state = self.lock()?;
        if state.appointments.values().any(|a| a.barber_id == id) {
            return Err(BackendError::Referenced(
                "Barber is still referenced by appointments".into(),
            ));
        }
        state.barber_specialties.retain(|(barber_id, _)| *barber_id != id);
        Ok(state.barbers.remove(&id).is_some())
    }

    fn add_barber_specialties(
        &self,
        barber_id: i32,
        specialty_ids: &[i32],
    ) -> Result<usize, BackendError> {
        let mut state = self.lock()?;
        if !state.barbers.contains_key(&barber_id) {
            return Err(BackendError::Referenced("Barber does not exist".into()));
        }
        let known: Vec<i32> = specialty_ids
            .iter()
            .copied()
            .filter(|id| state.specialties.contains_key(id))
            .collect();
        Ok(known
            .into_iter()
            .filter(|specialty_id| state.barber_specialties.insert((barber_id, *specialty_id)))
            .count())
    }

    fn remove_barber_specialty(
        &self,
        barber_id: i32,
        specialty_id: i32,
    ) -> Result<bool, BackendError> {
        Ok(self
            .lock()?
            .barber_specialties
            .remove(&(barber_id, specialty_id)))
    }

    fn specialties(&self) -> Result<Vec<Specialty>, BackendError> {
        let mut specialties: Vec<Specialty> = self.lock()?.specialties.values().cloned().collect();
        specialties.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(specialties)
    }

    fn specialties_by_ids(&self, ids: &[i32]) -> Result<Vec<Specialty>, BackendError> {
        let state = self.lock()?;
        Ok(state
            .specialties
            .values()
            .filter(|specialty| ids.contains(&specialty.id))
            .cloned()
            .collect())
    }

    fn specialty(&self, id: i32) -> Result<Option<Specialty>, BackendError> {
        Ok(self.lock()?.specialties.get(&id).cloned())
    }

    fn add_specialty(&self, specialty: SpecialtyData) -> Result<Specialty, BackendError> {
        let mut state = self.lock()?;
        let id = state.next_id();
        let created = Specialty {
            id,
            name: specialty.name,
            description: specialty.description,
            price: specialty.price,
            duration: specialty.duration,
            created_at: Utc::now(),
        };
        state.specialties.insert(id, created.clone());
        Ok(created)
    }

    fn update_specialty(
        &self,
        id: i32,
        specialty: SpecialtyData,
    ) -> Result<Option<Specialty>, BackendError> {
        let mut state = self.lock()?;
        Ok(state.specialties.get_mut(&id).map(|existing| {
            existing.name = specialty.name;
            existing.description = specialty.description;
            existing.price = specialty.price;
            existing.duration = specialty.duration;
            existing.clone()
        }))
    }

    fn remove_specialty(&self, id: i32) -> Result<bool, BackendError> {
        let mut state = self.lock()?;
        if state.appointments.values().any(|a| a.specialty_id == id) {
            return Err(BackendError::Referenced(
                "Specialty is still referenced by appointments".into(),
            ));
        }
        state.barber_specialties.retain(|(_, specialty_id)| *specialty_id != id);
        Ok(state.specialties.remove(&id).is_some())
    }

    fn add_user(&self, user: NewUser) -> Result<User, BackendError> {
        let mut state = self.lock()?;
        if state.users.values().any(|u| u.user.email == user.email) {
            return Err(BackendError::Conflict("Email already registered".into()));
        }
        let id = state.next_id();
        let created = User {
            id,
            name: user.name,
            email: user.email,
            phone: None,
            created_at: Utc::now(),
        };
        state.users.insert(
            id,
            UserCredentials {
                user: created.clone(),
                password_hash: user.password_hash,
            },
        );
        Ok(created)
    }

    fn user(&self, id: i32) -> Result<Option<User>, BackendError> {
        Ok(self.lock()?.users.get(&id).map(|c| c.user.clone()))
    }

    fn user_credentials(&self, email: &str) -> Result<Option<UserCredentials>, BackendError> {
        Ok(self
            .lock()?
            .users
            .values()
            .find(|c| c.user.email == email)
            .cloned())
    }

    fn add_admin(&self, admin: NewAdmin) -> Result<Admin, BackendError> {
        let mut state = self.lock()?;
        if state.admins.values().any(|a| a.admin.email == admin.email) {
            return Err(BackendError::Conflict("Email already registered".into()));
        }
        let created = Admin {
            id: Uuid::new_v4(),
            name: admin.name,
            email: admin.email,
            phone: None,
            created_at: Utc::now(),
        };
        state.admins.insert(
            created.id,
            AdminCredentials {
                admin: created.clone(),
                password_hash: admin.password_hash,
            },
        );
        Ok(created)
    }

    fn admin(&self, id: Uuid) -> Result<Option<Admin>, BackendError> {
        Ok(self.lock()?.admins.get(&id).map(|c| c.admin.clone()))
    }

    fn admin_credentials(&self, email: &str) -> Result<Option<AdminCredentials>, BackendError> {
        Ok(self
            .lock()?
            .admins
            .values()
            .find(|c| c.admin.email == email)
            .cloned())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testutils::{seed_barber, seed_specialty, seed_user};

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, day).unwrap()
    }

    fn new_appointment(
        user_id: i32,
        barber_id: i32,
        specialty_id: i32,
        day: u32,
        time: &str,
    ) -> NewAppointment {
        NewAppointment {
            user_id,
            barber_id,
            specialty_id,
            date: date(day),
            time: time.into(),
        }
    }

    #[test]
    fn test_insert_and_transition_appointment() {
        let store = LocalStore::default();
        let barber = seed_barber(&store, "Carlos");
        let specialty = seed_specialty(&store, "Haircut");
        let user = seed_user(&store, "ana@example.com");

        let created = store
            .insert_appointment(new_appointment(user, barber, specialty, 10, "09:00"))
            .unwrap();
        assert_eq!(created.status, AppointmentStatus::Scheduled);

        store
            .insert_appointment(new_appointment(user, barber, specialty, 10, "09:00"))
            .unwrap_err();

        assert!(store
            .transition_appointment(
                created.id,
                AppointmentStatus::Scheduled,
                AppointmentStatus::Completed
            )
            .unwrap());
        assert!(!store
            .transition_appointment(
                created.id,
                AppointmentStatus::Scheduled,
                AppointmentStatus::Cancelled
            )
            .unwrap());
        assert_eq!(
            store.appointment(created.id).unwrap().unwrap().status,
            AppointmentStatus::Completed
        );
    }

    #[test]
    fn test_insert_with_missing_references_fails() {
        let store = LocalStore::default();
        let user = seed_user(&store, "ana@example.com");
        let err = store
            .insert_appointment(new_appointment(user, 99, 98, 10, "09:00"))
            .unwrap_err();
        assert!(matches!(err, BackendError::Referenced(_)));
    }

    #[test]
    fn test_appointment_listings_are_ordered() {
        let store = LocalStore::default();
        let barber = seed_barber(&store, "Carlos");
        let specialty = seed_specialty(&store, "Haircut");
        let ana = seed_user(&store, "ana@example.com");
        let bruno = seed_user(&store, "bruno@example.com");

        for (day, time) in [(11, "10:00"), (10, "15:00"), (12, "08:00"), (10, "09:00")] {
            store
                .insert_appointment(new_appointment(ana, barber, specialty, day, time))
                .unwrap();
        }
        store
            .insert_appointment(new_appointment(bruno, barber, specialty, 10, "11:00"))
            .unwrap();

        let mine: Vec<(NaiveDate, String)> = store
            .user_appointments(ana)
            .unwrap()
            .into_iter()
            .map(|a| (a.date, a.time))
            .collect();
        assert_eq!(
            mine,
            vec![
                (date(12), "08:00".into()),
                (date(11), "10:00".into()),
                (date(10), "15:00".into()),
                (date(10), "09:00".into()),
            ]
        );

        let on_tenth: Vec<String> = store
            .appointments_on(date(10))
            .unwrap()
            .into_iter()
            .map(|a| a.time)
            .collect();
        assert_eq!(on_tenth, vec!["09:00", "11:00", "15:00"]);

        let after_tenth: Vec<NaiveDate> = store
            .appointments_after(date(10))
            .unwrap()
            .into_iter()
            .map(|a| a.date)
            .collect();
        assert_eq!(after_tenth, vec![date(11), date(12)]);
    }

    #[test]
    fn test_barber_specialty_associations() {
        let store = LocalStore::default();
        let carlos = seed_barber(&store, "Carlos");
        let andre = seed_barber(&store, "Andre");
        let haircut = seed_specialty(&store, "Haircut");
        let shave = seed_specialty(&store, "Shave");

        assert_eq!(store.add_barber_specialties(carlos, &[haircut, shave, 404]).unwrap(), 2);
        assert_eq!(store.add_barber_specialties(carlos, &[haircut]).unwrap(), 0);
        assert_eq!(store.add_barber_specialties(andre, &[shave]).unwrap(), 1);

        let barbers = store.barbers().unwrap();
        assert_eq!(barbers[0].name, "Andre");
        assert_eq!(barbers[1].specialties.len(), 2);

        let shavers: Vec<String> = store
            .barbers_by_specialty(shave)
            .unwrap()
            .into_iter()
            .map(|b| b.name)
            .collect();
        assert_eq!(shavers, vec!["Andre", "Carlos"]);

        assert!(store.remove_barber_specialty(carlos, shave).unwrap());
        assert!(!store.remove_barber_specialty(carlos, shave).unwrap());
        assert_eq!(store.barbers_by_specialty(shave).unwrap().len(), 1);
    }

    #[test]
    fn test_referenced_barber_cannot_be_removed() {
        let store = LocalStore::default();
        let barber = seed_barber(&store, "Carlos");
        let specialty = seed_specialty(&store, "Haircut");
        let user = seed_user(&store, "ana@example.com");
        store
            .insert_appointment(new_appointment(user, barber, specialty, 10, "09:00"))
            .unwrap();

        assert!(matches!(
            store.remove_barber(barber).unwrap_err(),
            BackendError::Referenced(_)
        ));
        assert!(matches!(
            store.remove_specialty(specialty).unwrap_err(),
            BackendError::Referenced(_)
        ));
        assert!(!store.remove_barber(barber + 100).unwrap());
    }

    #[test]
    fn test_duplicate_email_is_a_conflict() {
        let store = LocalStore::default();
        seed_user(&store, "ana@example.com");
        let err = store
            .add_user(NewUser {
                name: "Ana".into(),
                email: "ana@example.com".into(),
                password_hash: "x".into(),
            })
            .unwrap_err();
        assert!(matches!(err, BackendError::Conflict(_)));
    }

    #[test]
    fn test_stats_count_scheduled_today() {
        let store = LocalStore::default();
        let barber = seed_barber(&store, "Carlos");
        let specialty = seed_specialty(&store, "Haircut");
        let user = seed_user(&store, "ana@example.com");
        let cancelled = store
            .insert_appointment(new_appointment(user, barber, specialty, 10, "09:00"))
            .unwrap();
        store
            .transition_appointment(
                cancelled.id,
                AppointmentStatus::Scheduled,
                AppointmentStatus::Cancelled
            )
            .unwrap();
        store
            .insert_appointment(new_appointment(user, barber, specialty, 10, "10:00"))
            .unwrap();
        store
            .insert_appointment(new_appointment(user, barber, specialty, 11, "10:00"))
            .unwrap();

        let stats = store.stats(date(10)).unwrap();
        assert_eq!(
            stats,
            Stats {
                appointments_today: 1,
                total_barbers: 1,
                total_specialties: 1,
                total_users: 1,
            }
        );
    }
}
