use crate::backend::{BackendError, BookingBackend};
use crate::schema::{admins, appointments, barber_specialties, barbers, specialties, users};
use crate::types::{
    Admin, AdminCredentials, Appointment, AppointmentDetails, AppointmentStatus, Barber,
    BarberData, BarberRef, NewAdmin, NewAppointment, NewUser, Specialty, SpecialtyData,
    SpecialtyRef, SpecialtySummary, Stats, User, UserCredentials, UserRef,
};
use chrono::{DateTime, NaiveDate, Utc};
use diesel::dsl::exists;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use diesel::r2d2::{ConnectionManager, Pool, PooledConnection};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, info};
use uuid::Uuid;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);

type PgPool = Pool<ConnectionManager<PgConnection>>;
type PgPooledConnection = PooledConnection<ConnectionManager<PgConnection>>;

#[derive(Queryable, Selectable)]
#[diesel(table_name = appointments, check_for_backend(Pg))]
struct AppointmentRow {
    id: i32,
    user_id: i32,
    barber_id: i32,
    specialty_id: i32,
    appointment_date: NaiveDate,
    appointment_time: String,
    status: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AppointmentRow> for Appointment {
    type Error = BackendError;

    fn try_from(row: AppointmentRow) -> Result<Self, Self::Error> {
        Ok(Appointment {
            id: row.id,
            user_id: row.user_id,
            barber_id: row.barber_id,
            specialty_id: row.specialty_id,
            date: row.appointment_date,
            time: row.appointment_time,
            status: row.status.parse().map_err(BackendError::Database)?,
            created_at: row.created_at,
        })
    }
}

#[derive(Insertable)]
#[diesel(table_name = appointments)]
struct NewAppointmentRow<'a> {
    user_id: i32,
    barber_id: i32,
    specialty_id: i32,
    appointment_date: NaiveDate,
    appointment_time: &'a str,
    status: &'a str,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = barbers, check_for_backend(Pg))]
struct BarberRow {
    id: i32,
    name: String,
    age: i32,
    hire_date: NaiveDate,
    created_at: DateTime<Utc>,
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = barbers)]
struct BarberChanges<'a> {
    name: &'a str,
    age: i32,
    hire_date: NaiveDate,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = specialties, check_for_backend(Pg))]
struct SpecialtyRow {
    id: i32,
    name: String,
    description: Option<String>,
    price: f64,
    duration: i32,
    created_at: DateTime<Utc>,
}

impl From<SpecialtyRow> for Specialty {
    fn from(row: SpecialtyRow) -> Self {
        Specialty {
            id: row.id,
            name: row.name,
            description: row.description,
            price: row.price,
            duration: row.duration,
            created_at: row.created_at,
        }
    }
}

#[derive(Insertable, AsChangeset)]
#[diesel(table_name = specialties, treat_none_as_null = true)]
struct SpecialtyChanges<'a> {
    name: &'a str,
    description: Option<&'a str>,
    price: f64,
    duration: i32,
}

impl<'a> From<&'a SpecialtyData> for SpecialtyChanges<'a> {
    fn from(data: &'a SpecialtyData) -> Self {
        SpecialtyChanges {
            name: &data.name,
            description: data.description.as_deref(),
            price: data.price,
            duration: data.duration,
        }
    }
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = users, check_for_backend(Pg))]
struct UserRow {
    id: i32,
    name: String,
    email: String,
    password_hash: String,
    phone: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<UserRow> for UserCredentials {
    fn from(row: UserRow) -> Self {
        UserCredentials {
            user: User {
                id: row.id,
                name: row.name,
                email: row.email,
                phone: row.phone,
                created_at: row.created_at,
            },
            password_hash: row.password_hash,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = users)]
struct NewUserRow<'a> {
    name: &'a str,
    email: &'a str,
    password_hash: &'a str,
}

#[derive(Queryable, Selectable)]
#[diesel(table_name = admins, check_for_backend(Pg))]
struct AdminRow {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
    phone: Option<String>,
    created_at: DateTime<Utc>,
}

impl From<AdminRow> for AdminCredentials {
    fn from(row: AdminRow) -> Self {
        AdminCredentials {
            admin: Admin {
                id: row.id,
                name: row.name,
                email: row.email,
                phone: row.phone,
                created_at: row.created_at,
            },
            password_hash: row.password_hash,
        }
    }
}

#[derive(Insertable)]
#[diesel(table_name = admins)]
struct NewAdminRow<'a> {
    id: Uuid,
    name: &'a str,
    email: &'a str,
    password_hash: &'a str,
}

type DetailsRow = (
    AppointmentRow,
    (i32, String),
    (i32, String, f64, i32),
    (i32, String),
);

fn into_details(row: DetailsRow) -> Result<AppointmentDetails, BackendError> {
    let (appointment, (barber_id, barber_name), specialty, (user_id, user_name)) = row;
    let (specialty_id, specialty_name, price, duration) = specialty;
    let appointment = Appointment::try_from(appointment)?;
    Ok(AppointmentDetails {
        id: appointment.id,
        date: appointment.date,
        time: appointment.time,
        status: appointment.status,
        created_at: appointment.created_at,
        barber: BarberRef {
            id: barber_id,
            name: barber_name,
        },
        specialty: SpecialtyRef {
            id: specialty_id,
            name: specialty_name,
            price,
            duration,
        },
        user: UserRef {
            id: user_id,
            name: user_name,
        },
    })
}

macro_rules! details_query {
    () => {
        appointments::table
            .inner_join(barbers::table)
            .inner_join(specialties::table)
            .inner_join(users::table)
            .select((
                AppointmentRow::as_select(),
                (barbers::id, barbers::name),
                (
                    specialties::id,
                    specialties::name,
                    specialties::price,
                    specialties::duration,
                ),
                (users::id, users::name),
            ))
    };
}

impl From<DieselError> for BackendError {
    fn from(err: DieselError) -> Self {
        match &err {
            DieselError::DatabaseError(kind, info) => {
                debug!(?kind, message = info.message(), "Database operation failed");
                match kind {
                    DatabaseErrorKind::UniqueViolation => {
                        BackendError::Conflict(info.message().to_string())
                    }
                    DatabaseErrorKind::ForeignKeyViolation => {
                        BackendError::Referenced(info.message().to_string())
                    }
                    _ => BackendError::Database(err.to_string()),
                }
            }
            _ => BackendError::Database(err.to_string()),
        }
    }
}

/// PostgreSQL backend over a blocking r2d2 pool. Calls block the current
/// thread, so async callers run them on the blocking pool. The slot
/// invariant itself is enforced by the partial unique index
/// `appointments_one_scheduled_per_slot`.
#[derive(Clone)]
pub struct DatabaseInterface {
    pool: PgPool,
}

impl DatabaseInterface {
    /// Builds the pool and applies pending migrations. Connections are
    /// checked on checkout, so a restarted server is reconnected to.
    pub fn new(database_url: &str, pool_size: u32) -> Result<Self, BackendError> {
        let pool = Pool::builder()
            .max_size(pool_size)
            .connection_timeout(CONNECTION_TIMEOUT)
            .test_on_check_out(true)
            .build(ConnectionManager::<PgConnection>::new(database_url))
            .map_err(|err| BackendError::Database(format!("Failed to build pool: {err}")))?;
        let database_interface = Self { pool };

        let mut connection = database_interface.connection()?;
        let applied = connection
            .run_pending_migrations(MIGRATIONS)
            .map_err(|err| BackendError::Database(format!("Failed to migrate: {err}")))?;
        for version in applied {
            info!(%version, "Applied database migration");
        }
        drop(connection);

        info!(pool_size, "Database pool ready");
        Ok(database_interface)
    }

    fn connection(&self) -> Result<PgPooledConnection, BackendError> {
        self.pool.get().map_err(|err| {
            BackendError::Database(format!("Failed to check out a connection: {err}"))
        })
    }

    fn with_specialties(
        conn: &mut PgConnection,
        rows: Vec<BarberRow>,
    ) -> Result<Vec<Barber>, BackendError> {
        let ids: Vec<i32> = rows.iter().map(|row| row.id).collect();
        let links: Vec<(i32, i32, String)> = barber_specialties::table
            .inner_join(specialties::table)
            .filter(barber_specialties::barber_id.eq_any(ids))
            .order(specialties::id.asc())
            .select((
                barber_specialties::barber_id,
                specialties::id,
                specialties::name,
            ))
            .load(conn)?;

        let mut by_barber: HashMap<i32, Vec<SpecialtySummary>> = HashMap::new();
        for (barber_id, id, name) in links {
            by_barber
                .entry(barber_id)
                .or_default()
                .push(SpecialtySummary { id, name });
        }

        Ok(rows
            .into_iter()
            .map(|row| Barber {
                specialties: by_barber.remove(&row.id).unwrap_or_default(),
                id: row.id,
                name: row.name,
                age: row.age,
                hire_date: row.hire_date,
                created_at: row.created_at,
            })
            .collect())
    }
}

impl BookingBackend for DatabaseInterface {
    fn booked_times(&self, barber_id: i32, date: NaiveDate) -> Result<Vec<String>, BackendError> {
        let mut connection = self.connection()?;
        Ok(appointments::table
            .filter(appointments::barber_id.eq(barber_id))
            .filter(appointments::appointment_date.eq(date))
            .filter(appointments::status.eq(AppointmentStatus::Scheduled.as_str()))
            .select(appointments::appointment_time)
            .load(&mut *connection)?)
    }

    fn insert_appointment(
        &self,
        appointment: NewAppointment,
    ) -> Result<Appointment, BackendError> {
        let mut connection = self.connection()?;

        // A concurrent writer on another connection that slips past the
        // check still hits the unique index and fails with a conflict.
        connection.transaction::<_, BackendError, _>(|conn| {
            let taken: bool = diesel::select(exists(
                appointments::table
                    .filter(appointments::barber_id.eq(appointment.barber_id))
                    .filter(appointments::appointment_date.eq(appointment.date))
                    .filter(appointments::appointment_time.eq(&appointment.time))
                    .filter(appointments::status.eq(AppointmentStatus::Scheduled.as_str())),
            ))
            .get_result(conn)?;
            if taken {
                return Err(BackendError::Conflict(
                    "A scheduled appointment already holds this slot".into(),
                ));
            }

            let row = diesel::insert_into(appointments::table)
                .values(&NewAppointmentRow {
                    user_id: appointment.user_id,
                    barber_id: appointment.barber_id,
                    specialty_id: appointment.specialty_id,
                    appointment_date: appointment.date,
                    appointment_time: &appointment.time,
                    status: AppointmentStatus::Scheduled.as_str(),
                })
                .returning(AppointmentRow::as_returning())
                .get_result(conn)?;
            Appointment::try_from(row)
        })
    }

    fn appointment(&self, id: i32) -> Result<Option<Appointment>, BackendError> {
        let mut connection = self.connection()?;
        appointments::table
            .find(id)
            .select(AppointmentRow::as_select())
            .first(&mut *connection)
            .optional()?
            .map(Appointment::try_from)
            .transpose()
    }

    fn user_appointment(
        &self,
        id: i32,
        user_id: i32,
    ) -> Result<Option<Appointment>, BackendError> {
        let mut connection = self.connection()?;
        appointments::table
            .filter(appointments::id.eq(id))
            .filter(appointments::user_id.eq(user_id))
            .select(AppointmentRow::as_select())
            .first(&mut *connection)
            .optional()?
            .map(Appointment::try_from)
            .transpose()
    }

    fn transition_appointment(
        &self,
        id: i32,
        from: AppointmentStatus,
        to: AppointmentStatus,
    ) -> Result<bool, BackendError> {
        let mut connection = self.connection()?;
        let updated = diesel::update(
            appointments::table
                .filter(appointments::id.eq(id))
                .filter(appointments::status.eq(from.as_str())),
        )
        .set(appointments::status.eq(to.as_str()))
        .execute(&mut *connection)?;
        Ok(updated == 1)
    }

    fn user_appointments(&self, user_id: i32) -> Result<Vec<AppointmentDetails>, BackendError> {
        let mut connection = self.connection()?;
        let rows: Vec<DetailsRow> = details_query!()
            .filter(appointments::user_id.eq(user_id))
            .order((
                appointments::appointment_date.desc(),
                appointments::appointment_time.desc(),
            ))
            .load(&mut *connection)?;
        rows.into_iter().map(into_details).collect()
    }

    fn appointments_on(&self, date: NaiveDate) -> Result<Vec<AppointmentDetails>, BackendError> {
        let mut connection = self.connection()?;
        let rows: Vec<DetailsRow> = details_query!()
            .filter(appointments::appointment_date.eq(date))
            .order(appointments::appointment_time.asc())
            .load(&mut *connection)?;
        rows.into_iter().map(into_details).collect()
    }

    fn appointments_after(
        &self,
        date: NaiveDate,
    ) -> Result<Vec<AppointmentDetails>, BackendError> {
        let mut connection = self.connection()?;
        let rows: Vec<DetailsRow> = details_query!()
            .filter(appointments::appointment_date.gt(date))
            .order((
                appointments::appointment_date.asc(),
                appointments::appointment_time.asc(),
            ))
            .load(&mut *connection)?;
        rows.into_iter().map(into_details).collect()
    }

    fn scheduled_for_barber_from(
        &self,
        barber_id: i32,
        date: NaiveDate,
    ) -> Result<i64, BackendError> {
        let mut connection = self.connection()?;
        Ok(appointments::table
            .filter(appointments::barber_id.eq(barber_id))
            .filter(appointments::appointment_date.ge(date))
            .filter(appointments::status.eq(AppointmentStatus::Scheduled.as_str()))
            .count()
            .get_result(&mut *connection)?)
    }

    fn scheduled_for_specialty_from(
        &self,
        specialty_id: i32,
        date: NaiveDate,
    ) -> Result<i64, BackendError> {
        let mut connection = self.connection()?;
        Ok(appointments::table
            .filter(appointments::specialty_id.eq(specialty_id))
            .filter(appointments::appointment_date.ge(date))
            .filter(appointments::status.eq(AppointmentStatus::Scheduled.as_str()))
            .count()
            .get_result(&mut *connection)?)
    }

    fn stats(&self, today: NaiveDate) -> Result<Stats, BackendError> {
        let mut connection = self.connection()?;
        let conn = &mut *connection;
        Ok(Stats {
            appointments_today: appointments::table
                .filter(appointments::appointment_date.eq(today))
                .filter(appointments::status.eq(AppointmentStatus::Scheduled.as_str()))
                .count()
                .get_result(conn)?,
            total_barbers: barbers::table.count().get_result(conn)?,
            total_specialties: specialties::table.count().get_result(conn)?,
            total_users: users::table.count().get_result(conn)?,
        })
    }

    fn barbers(&self) -> Result<Vec<Barber>, BackendError> {
        let mut connection = self.connection()?;
        let rows = barbers::table
            .order(barbers::name.asc())
            .select(BarberRow::as_select())
            .load(&mut *connection)?;
        Self::with_specialties(&mut connection, rows)
    }

    fn barbers_by_specialty(&self, specialty_id: i32) -> Result<Vec<Barber>, BackendError> {
        let mut connection = self.connection()?;
        let rows = barbers::table
            .filter(
                barbers::id.eq_any(
                    barber_specialties::table
                        .filter(barber_specialties::specialty_id.eq(specialty_id))
                        .select(barber_specialties::barber_id),
                ),
            )
            .order(barbers::name.asc())
            .select(BarberRow::as_select())
            .load(&mut *connection)?;
        Self::with_specialties(&mut connection, rows)
    }

    fn barber(&self, id: i32) -> Result<Option<Barber>, BackendError> {
        let mut connection = self.connection()?;
        let row = barbers::table
            .find(id)
            .select(BarberRow::as_select())
            .first(&mut *connection)
            .optional()?;
        match row {
            Some(row) => Ok(Self::with_specialties(&mut connection, vec![row])?.pop()),
            None => Ok(None),
        }
    }

    fn add_barber(&self, barber: BarberData) -> Result<Barber, BackendError> {
        let mut connection = self.connection()?;
        let row = diesel::insert_into(barbers::table)
            .values(&BarberChanges {
                name: &barber.name,
                age: barber.age,
                hire_date: barber.hire_date,
            })
            .returning(BarberRow::as_returning())
            .get_result(&mut *connection)?;
        info!(barber_id = row.id, "Barber added");
        Self::with_specialties(&mut connection, vec![row])?
            .pop()
            .ok_or_else(|| BackendError::Database("Inserted barber vanished".into()))
    }

    fn update_barber(&self, id: i32, barber: BarberData) -> Result<Option<Barber>, BackendError> {
        let mut connection = self.connection()?;
        let row = diesel::update(barbers::table.find(id))
            .set(&BarberChanges {
                name: &barber.name,
                age: barber.age,
                hire_date: barber.hire_date,
            })
            .returning(BarberRow::as_returning())
            .get_result(&mut *connection)
            .optional()?;
        match row {
            Some(row) => Ok(Self::with_specialties(&mut connection, vec![row])?.pop()),
            None => Ok(None),
        }
    }

    fn remove_barber(&self, id: i32) -> Result<bool, BackendError> {
        let mut connection = self.connection()?;
        let deleted = diesel::delete(barbers::table.find(id)).execute(&mut *connection)?;
        Ok(deleted > 0)
    }

    fn add_barber_specialties(
        &self,
        barber_id: i32,
        specialty_ids: &[i32],
    ) -> Result<usize, BackendError> {
        let mut connection = self.connection()?;
        connection.transaction::<_, BackendError, _>(|conn| {
            let known: Vec<i32> = specialties::table
                .filter(specialties::id.eq_any(specialty_ids))
                .select(specialties::id)
                .load(conn)?;
            let rows: Vec<_> = known
                .into_iter()
                .map(|specialty_id| {
                    (
                        barber_specialties::barber_id.eq(barber_id),
                        barber_specialties::specialty_id.eq(specialty_id),
                    )
                })
                .collect();
            Ok(diesel::insert_into(barber_specialties::table)
                .values(&rows)
                .on_conflict_do_nothing()
                .execute(conn)?)
        })
    }

    fn remove_barber_specialty(
        &self,
        barber_id: i32,
        specialty_id: i32,
    ) -> Result<bool, BackendError> {
        let mut connection = self.connection()?;
        let deleted = diesel::delete(
            barber_specialties::table
                .filter(barber_specialties::barber_id.eq(barber_id))
                .filter(barber_specialties::specialty_id.eq(specialty_id)),
        )
        .execute(&mut *connection)?;
        Ok(deleted > 0)
    }

    fn specialties(&self) -> Result<Vec<Specialty>, BackendError> {
        let mut connection = self.connection()?;
        let rows = specialties::table
            .order(specialties::name.asc())
            .select(SpecialtyRow::as_select())
            .load(&mut *connection)?;
        Ok(rows.into_iter().map(Specialty::from).collect())
    }

    fn specialties_by_ids(&self, ids: &[i32]) -> Result<Vec<Specialty>, BackendError> {
        let mut connection = self.connection()?;
        let rows = specialties::table
            .filter(specialties::id.eq_any(ids))
            .select(SpecialtyRow::as_select())
            .load(&mut *connection)?;
        Ok(rows.into_iter().map(Specialty::from).collect())
    }

    fn specialty(&self, id: i32) -> Result<Option<Specialty>, BackendError> {
        let mut connection = self.connection()?;
        let row = specialties::table
            .find(id)
            .select(SpecialtyRow::as_select())
            .first(&mut *connection)
            .optional()?;
        Ok(row.map(Specialty::from))
    }

    fn add_specialty(&self, specialty: SpecialtyData) -> Result<Specialty, BackendError> {
        let mut connection = self.connection()?;
        let row = diesel::insert_into(specialties::table)
            .values(&SpecialtyChanges::from(&specialty))
            .returning(SpecialtyRow::as_returning())
            .get_result(&mut *connection)?;
        info!(specialty_id = row.id, "Specialty added");
        Ok(Specialty::from(row))
    }

    fn update_specialty(
        &self,
        id: i32,
        specialty: SpecialtyData,
    ) -> Result<Option<Specialty>, BackendError> {
        let mut connection = self.connection()?;
        let row = diesel::update(specialties::table.find(id))
            .set(&SpecialtyChanges::from(&specialty))
            .returning(SpecialtyRow::as_returning())
            .get_result(&mut *connection)
            .optional()?;
        Ok(row.map(Specialty::from))
    }

    fn remove_specialty(&self, id: i32) -> Result<bool, BackendError> {
        let mut connection = self.connection()?;
        let deleted = diesel::delete(specialties::table.find(id)).execute(&mut *connection)?;
        Ok(deleted > 0)
    }

    fn add_user(&self, user: NewUser) -> Result<User, BackendError> {
        let mut connection = self.connection()?;
        let row = diesel::insert_into(users::table)
            .values(&NewUserRow {
                name: &user.name,
                email: &user.email,
                password_hash: &user.password_hash,
            })
            .returning(UserRow::as_returning())
            .get_result(&mut *connection)?;
        Ok(UserCredentials::from(row).user)
    }

    fn user(&self, id: i32) -> Result<Option<User>, BackendError> {
        let mut connection = self.connection()?;
        let row = users::table
            .find(id)
            .select(UserRow::as_select())
            .first(&mut *connection)
            .optional()?;
        Ok(row.map(|row| UserCredentials::from(row).user))
    }

    fn user_credentials(&self, email: &str) -> Result<Option<UserCredentials>, BackendError> {
        let mut connection = self.connection()?;
        let row = users::table
            .filter(users::email.eq(email))
            .select(UserRow::as_select())
            .first(&mut *connection)
            .optional()?;
        Ok(row.map(UserCredentials::from))
    }

    fn add_admin(&self, admin: NewAdmin) -> Result<Admin, BackendError> {
        let mut connection = self.connection()?;
        let row = diesel::insert_into(admins::table)
            .values(&NewAdminRow {
                id: Uuid::new_v4(),
                name: &admin.name,
                email: &admin.email,
                password_hash: &admin.password_hash,
            })
            .returning(AdminRow::as_returning())
            .get_result(&mut *connection)?;
        Ok(AdminCredentials::from(row).admin)
    }

    fn admin(&self, id: Uuid) -> Result<Option<Admin>, BackendError> {
        let mut connection = self.connection()?;
        let row = admins::table
            .find(id)
            .select(AdminRow::as_select())
            .first(&mut *connection)
            .optional()?;
        Ok(row.map(|row| AdminCredentials::from(row).admin))
    }

    fn admin_credentials(&self, email: &str) -> Result<Option<AdminCredentials>, BackendError> {
        let mut connection = self.connection()?;
        let row = admins::table
            .filter(admins::email.eq(email))
            .select(AdminRow::as_select())
            .first(&mut *connection)
            .optional()?;
        Ok(row.map(AdminCredentials::from))
    }
}
