use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};
use uuid::Uuid;
use validator::Validate;

/// Lifecycle of an appointment. `Cancelled` and `Completed` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppointmentStatus {
    Scheduled,
    Cancelled,
    Completed,
}

impl AppointmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AppointmentStatus::Scheduled => "scheduled",
            AppointmentStatus::Cancelled => "cancelled",
            AppointmentStatus::Completed => "completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, AppointmentStatus::Scheduled)
    }
}

impl fmt::Display for AppointmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AppointmentStatus {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "scheduled" => Ok(AppointmentStatus::Scheduled),
            "cancelled" => Ok(AppointmentStatus::Cancelled),
            "completed" => Ok(AppointmentStatus::Completed),
            other => Err(format!("Unknown appointment status '{other}'")),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Appointment {
    pub id: i32,
    pub user_id: i32,
    pub barber_id: i32,
    pub specialty_id: i32,
    pub date: NaiveDate,
    pub time: String,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
}

impl Appointment {
    /// Parses the stored `HH:MM` label.
    pub fn start_time(&self) -> Option<NaiveTime> {
        NaiveTime::parse_from_str(&self.time, "%H:%M").ok()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAppointment {
    pub user_id: i32,
    pub barber_id: i32,
    pub specialty_id: i32,
    pub date: NaiveDate,
    pub time: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BarberRef {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialtyRef {
    pub id: i32,
    pub name: String,
    pub price: f64,
    pub duration: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRef {
    pub id: i32,
    pub name: String,
}

/// Appointment joined with the records it references, as shown to clients
/// and administrators.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppointmentDetails {
    pub id: i32,
    pub date: NaiveDate,
    pub time: String,
    pub status: AppointmentStatus,
    pub created_at: DateTime<Utc>,
    pub barber: BarberRef,
    pub specialty: SpecialtyRef,
    pub user: UserRef,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Specialty {
    pub id: i32,
    pub name: String,
    pub description: Option<String>,
    pub price: f64,
    pub duration: i32,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct SpecialtyData {
    #[validate(length(min = 2, message = "name must have at least 2 characters"))]
    pub name: String,
    pub description: Option<String>,
    #[validate(range(exclusive_min = 0.0, message = "price must be positive"))]
    pub price: f64,
    #[validate(range(min = 1, message = "duration must be a positive number of minutes"))]
    pub duration: i32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpecialtySummary {
    pub id: i32,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Barber {
    pub id: i32,
    pub name: String,
    pub age: i32,
    pub hire_date: NaiveDate,
    pub created_at: DateTime<Utc>,
    pub specialties: Vec<SpecialtySummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
pub struct BarberData {
    #[validate(length(min = 2, message = "name must have at least 2 characters"))]
    pub name: String,
    #[validate(range(min = 18, max = 80, message = "age must be between 18 and 80"))]
    pub age: i32,
    pub hire_date: NaiveDate,
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct AssociateSpecialtiesRequest {
    #[validate(length(min = 1, message = "at least one specialty is required"))]
    pub specialties: Vec<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i32,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UserCredentials {
    pub user: User,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewUser {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Admin {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub phone: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AdminCredentials {
    pub admin: Admin,
    pub password_hash: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewAdmin {
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct RegisterRequest {
    #[validate(length(min = 2, message = "name must have at least 2 characters"))]
    pub name: String,
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 6, message = "password must have at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct LoginRequest {
    #[validate(email(message = "email must be a valid address"))]
    pub email: String,
    #[validate(length(min = 6, message = "password must have at least 6 characters"))]
    pub password: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    pub appointments_today: i64,
    pub total_barbers: i64,
    pub total_specialties: i64,
    pub total_users: i64,
}

#[cfg(test)]
mod test {
    use super::*;
    use test_case::test_case;

    #[test_case("scheduled", AppointmentStatus::Scheduled)]
    #[test_case("cancelled", AppointmentStatus::Cancelled)]
    #[test_case("completed", AppointmentStatus::Completed)]
    fn status_parses_stored_value(value: &str, expected: AppointmentStatus) {
        assert_eq!(value.parse::<AppointmentStatus>().unwrap(), expected);
        assert_eq!(expected.as_str(), value);
    }

    #[test]
    fn unknown_status_is_rejected() {
        "agendado".parse::<AppointmentStatus>().unwrap_err();
    }

    #[test]
    fn only_scheduled_is_not_terminal() {
        assert!(!AppointmentStatus::Scheduled.is_terminal());
        assert!(AppointmentStatus::Cancelled.is_terminal());
        assert!(AppointmentStatus::Completed.is_terminal());
    }

    #[test]
    fn appointment_details_serialize_in_interchange_shape() {
        let details = AppointmentDetails {
            id: 7,
            date: NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
            time: "09:00".into(),
            status: AppointmentStatus::Scheduled,
            created_at: Utc::now(),
            barber: BarberRef {
                id: 1,
                name: "Carlos".into(),
            },
            specialty: SpecialtyRef {
                id: 2,
                name: "Haircut".into(),
                price: 35.0,
                duration: 30,
            },
            user: UserRef {
                id: 3,
                name: "Ana".into(),
            },
        };

        let json = serde_json::to_value(&details).unwrap();
        assert_eq!(json["date"], "2025-03-10");
        assert_eq!(json["time"], "09:00");
        assert_eq!(json["status"], "scheduled");
        assert_eq!(json["barber"]["name"], "Carlos");
        assert_eq!(json["specialty"]["duration"], 30);
        assert_eq!(json["user"]["id"], 3);
        assert!(json.get("createdAt").is_some());
    }

    #[test]
    fn barber_data_rejects_underage_barber() {
        let data = BarberData {
            name: "Jo".into(),
            age: 17,
            hire_date: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap(),
        };
        assert!(data.validate().is_err());
    }

    #[test]
    fn specialty_data_requires_positive_price() {
        let data = SpecialtyData {
            name: "Shave".into(),
            description: None,
            price: 0.0,
            duration: 20,
        };
        assert!(data.validate().is_err());
    }
}
