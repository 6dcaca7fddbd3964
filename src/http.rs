use crate::{
    auth::{require_admin, require_auth, PasswordHasher, Principal, Role, TokenIssuer},
    backend::{BackendError, BookingBackend},
    booking::{BookingGuard, BookingRequest},
    clock::ShopClock,
    configuration::Configuration,
    error::AppError,
    rate_limit::{limit_requests, RateLimiter},
    slots::available_times,
    types::{
        AppointmentDetails, AssociateSpecialtiesRequest, Barber, BarberData, LoginRequest,
        NewUser, RegisterRequest, Specialty, SpecialtyData, Stats,
    },
    AppState,
};
use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        DefaultBodyLimit, FromRequest, FromRequestParts, Path, Query, Request, State,
    },
    http::{
        header::{REFERRER_POLICY, X_CONTENT_TYPE_OPTIONS, X_FRAME_OPTIONS},
        request::Parts,
        HeaderValue, StatusCode,
    },
    middleware,
    response::IntoResponse,
    routing::{delete, get, patch, post, put},
    Extension, Json, Router,
};
use axum_valid::{Valid, ValidRejection};
use chrono::{NaiveDate, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tower_http::{
    cors::{Any, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing::{info, warn};
use uuid::Uuid;
use validator::Validate;

pub const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// JSON body that passed `Validate`. Malformed bodies and rule violations
/// are both reported as `VALIDATION_ERROR`; bodies over the limit as 413.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    T: DeserializeOwned + Validate,
    S: Send + Sync,
    Json<T>: FromRequest<S, Rejection = JsonRejection>,
{
    type Rejection = AppError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(request, state)
            .await
            .map_err(|rejection| match rejection.status() {
                StatusCode::PAYLOAD_TOO_LARGE => AppError::PayloadTooLarge,
                _ => AppError::Validation(rejection.body_text()),
            })?;
        value.validate()?;
        Ok(Self(value))
    }
}

/// Query string checked by `Validate`, rejected as `VALIDATION_ERROR`.
pub struct ValidatedQuery<T>(pub T);

impl<S, T> FromRequestParts<S> for ValidatedQuery<T>
where
    S: Send + Sync,
    Valid<Query<T>>: FromRequestParts<S, Rejection = ValidRejection<QueryRejection>>,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Valid(Query(value)) = Valid::<Query<T>>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| match rejection {
                ValidRejection::Valid(errors) => AppError::from(errors),
                ValidRejection::Inner(rejection) => AppError::Validation(rejection.body_text()),
            })?;
        Ok(Self(value))
    }
}

/// Path parameters, rejected as `VALIDATION_ERROR` when they do not parse.
pub struct PathParams<T>(pub T);

impl<S, T> FromRequestParts<S> for PathParams<T>
where
    T: DeserializeOwned + Send,
    S: Send + Sync,
{
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(value) = Path::<T>::from_request_parts(parts, state)
            .await
            .map_err(|rejection| AppError::Validation(rejection.body_text()))?;
        Ok(Self(value))
    }
}

/// Runs storage and password hashing work on tokio's blocking pool.
async fn blocking<R, F>(work: F) -> Result<R, AppError>
where
    F: FnOnce() -> Result<R, AppError> + Send + 'static,
    R: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|err| AppError::Internal(format!("Blocking task failed: {err}")))?
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
struct AvailableTimesQuery {
    #[validate(range(min = 1, message = "barberId must be a positive integer"))]
    barber_id: i32,
    date: NaiveDate,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum AccountId {
    User(i32),
    Admin(Uuid),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Account {
    id: AccountId,
    name: String,
    email: String,
    #[serde(rename = "type")]
    role: Role,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct AuthResponse {
    token: String,
    user: Account,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct DailyAppointments {
    date: NaiveDate,
    time_zone: String,
    count: usize,
    appointments: Vec<AppointmentDetails>,
}

pub fn create_app<T: BookingBackend, C: Configuration>(backend: T, configuration: C) -> Router {
    let clock = ShopClock::new(configuration.utc_offset());
    let state = AppState {
        booking: BookingGuard::new(backend.clone(), clock.clone()),
        backend,
        clock,
        tokens: TokenIssuer::new(&configuration.jwt_secret()),
        passwords: PasswordHasher::new(configuration.password_hash_iterations()),
        rate_limiter: Arc::new(Mutex::new(RateLimiter::new(
            configuration.rate_limit_max_requests(),
            configuration.rate_limit_window(),
        ))),
    };

    let public = Router::new()
        .route("/health", get(health))
        .route("/api/specialties", get(list_specialties::<T>))
        .route("/api/barbers", get(list_barbers::<T>))
        .route(
            "/api/barbers/specialty/{specialty_id}",
            get(barbers_by_specialty::<T>),
        )
        .route(
            "/api/appointments/available-times",
            get(get_available_times::<T>),
        )
        .route("/api/auth/register", post(register::<T>))
        .route("/api/auth/login", post(login::<T>))
        .route("/api/auth/admin/login", post(admin_login::<T>));

    let authenticated = Router::new()
        .route("/api/auth/me", get(me::<T>))
        .route("/api/appointments", post(book_appointment::<T>))
        .route("/api/appointments/my", get(my_appointments::<T>))
        .route("/api/appointments/my-appointments", get(my_appointments::<T>))
        .route("/api/appointments/{id}/cancel", patch(cancel_appointment::<T>))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth::<T>,
        ));

    let admin = Router::new()
        .route("/stats", get(stats::<T>))
        .route("/appointments/today", get(todays_appointments::<T>))
        .route("/appointments/future", get(future_appointments::<T>))
        .route(
            "/appointments/{id}/complete",
            patch(complete_appointment::<T>),
        )
        .route("/barbers", get(list_barbers::<T>).post(add_barber::<T>))
        .route(
            "/barbers/{id}",
            put(update_barber::<T>).delete(remove_barber::<T>),
        )
        .route(
            "/barbers/{id}/specialties",
            post(add_barber_specialties::<T>),
        )
        .route(
            "/barbers/{id}/specialties/{specialty_id}",
            delete(remove_barber_specialty::<T>),
        )
        .route(
            "/specialties",
            get(list_specialties::<T>).post(add_specialty::<T>),
        )
        .route(
            "/specialties/{id}",
            put(update_specialty::<T>).delete(remove_specialty::<T>),
        )
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_auth::<T>,
        ));

    Router::new()
        .merge(public)
        .merge(authenticated)
        .nest("/api/admin", admin)
        .fallback(route_not_found)
        .layer(middleware::from_fn_with_state(
            state.clone(),
            limit_requests::<T>,
        ))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .with_state(state)
        .layer(SetResponseHeaderLayer::overriding(
            X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            X_FRAME_OPTIONS,
            HeaderValue::from_static("SAMEORIGIN"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(cors_layer(configuration.frontend_url()))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(frontend_url: Option<String>) -> CorsLayer {
    let cors = CorsLayer::new().allow_methods(Any).allow_headers(Any);
    match frontend_url.map(|url| url.parse::<HeaderValue>()) {
        Some(Ok(origin)) => cors.allow_origin(origin),
        Some(Err(err)) => {
            warn!(?err, "Invalid frontend URL, allowing any origin");
            cors.allow_origin(Any)
        }
        None => cors.allow_origin(Any),
    }
}

async fn route_not_found() -> AppError {
    AppError::NotFound("Route not found".into())
}

async fn health() -> impl IntoResponse {
    Json(json!({ "status": "OK", "timestamp": Utc::now() }))
}

async fn list_specialties<T: BookingBackend>(
    State(state): State<AppState<T>>,
) -> Result<Json<Vec<Specialty>>, AppError> {
    blocking(move || Ok(state.backend.specialties()?))
        .await
        .map(Json)
}

async fn list_barbers<T: BookingBackend>(
    State(state): State<AppState<T>>,
) -> Result<Json<Vec<Barber>>, AppError> {
    blocking(move || Ok(state.backend.barbers()?)).await.map(Json)
}

async fn barbers_by_specialty<T: BookingBackend>(
    State(state): State<AppState<T>>,
    PathParams(specialty_id): PathParams<i32>,
) -> Result<Json<Vec<Barber>>, AppError> {
    blocking(move || Ok(state.backend.barbers_by_specialty(specialty_id)?))
        .await
        .map(Json)
}

async fn get_available_times<T: BookingBackend>(
    State(state): State<AppState<T>>,
    ValidatedQuery(query): ValidatedQuery<AvailableTimesQuery>,
) -> Result<impl IntoResponse, AppError> {
    let times =
        blocking(move || Ok(available_times(&state.backend, query.barber_id, query.date)?))
            .await?;
    Ok(Json(json!({ "availableTimes": times })))
}

async fn register<T: BookingBackend>(
    State(state): State<AppState<T>>,
    ValidatedJson(request): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let response = blocking(move || {
        let user = state
            .backend
            .add_user(NewUser {
                name: request.name,
                email: request.email,
                password_hash: state.passwords.hash(&request.password),
            })
            .map_err(|err| match err {
                BackendError::Conflict(_) => {
                    AppError::Conflict("Email already registered".into())
                }
                other => other.into(),
            })?;
        info!(user_id = user.id, "User registered");

        Ok(AuthResponse {
            token: state.tokens.issue(&Principal::User(user.id))?,
            user: Account {
                id: AccountId::User(user.id),
                name: user.name,
                email: user.email,
                role: Role::User,
            },
        })
    })
    .await?;
    Ok((StatusCode::CREATED, Json(response)))
}

fn invalid_credentials() -> AppError {
    AppError::Unauthorized("Invalid email or password".into())
}

async fn login<T: BookingBackend>(
    State(state): State<AppState<T>>,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    blocking(move || {
        let credentials = state
            .backend
            .user_credentials(&request.email)?
            .ok_or_else(invalid_credentials)?;
        if !state
            .passwords
            .verify(&request.password, &credentials.password_hash)
        {
            warn!(email = %request.email, "Failed login");
            return Err(invalid_credentials());
        }

        let user = credentials.user;
        Ok(AuthResponse {
            token: state.tokens.issue(&Principal::User(user.id))?,
            user: Account {
                id: AccountId::User(user.id),
                name: user.name,
                email: user.email,
                role: Role::User,
            },
        })
    })
    .await
    .map(Json)
}

async fn admin_login<T: BookingBackend>(
    State(state): State<AppState<T>>,
    ValidatedJson(request): ValidatedJson<LoginRequest>,
) -> Result<Json<AuthResponse>, AppError> {
    blocking(move || {
        let credentials = state
            .backend
            .admin_credentials(&request.email)?
            .ok_or_else(invalid_credentials)?;
        if !state
            .passwords
            .verify(&request.password, &credentials.password_hash)
        {
            warn!(email = %request.email, "Failed administrator login");
            return Err(invalid_credentials());
        }

        let admin = credentials.admin;
        Ok(AuthResponse {
            token: state.tokens.issue(&Principal::Admin(admin.id))?,
            user: Account {
                id: AccountId::Admin(admin.id),
                name: admin.name,
                email: admin.email,
                role: Role::Admin,
            },
        })
    })
    .await
    .map(Json)
}

async fn me<T: BookingBackend>(
    State(state): State<AppState<T>>,
    Extension(principal): Extension<Principal>,
) -> Result<impl IntoResponse, AppError> {
    let account = blocking(move || {
        let account = match principal {
            Principal::User(id) => state.backend.user(id)?.map(|user| Account {
                id: AccountId::User(user.id),
                name: user.name,
                email: user.email,
                role: Role::User,
            }),
            Principal::Admin(id) => state.backend.admin(id)?.map(|admin| Account {
                id: AccountId::Admin(admin.id),
                name: admin.name,
                email: admin.email,
                role: Role::Admin,
            }),
        };
        account.ok_or_else(|| AppError::NotFound("Account not found".into()))
    })
    .await?;
    Ok(Json(json!({ "user": account })))
}

async fn book_appointment<T: BookingBackend>(
    State(state): State<AppState<T>>,
    Extension(principal): Extension<Principal>,
    ValidatedJson(request): ValidatedJson<BookingRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = principal.user_id()?;
    let appointment = blocking(move || state.booking.book(user_id, &request)).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({
            "message": "Appointment booked successfully",
            "appointment": appointment,
        })),
    ))
}

async fn my_appointments<T: BookingBackend>(
    State(state): State<AppState<T>>,
    Extension(principal): Extension<Principal>,
) -> Result<Json<Vec<AppointmentDetails>>, AppError> {
    let user_id = principal.user_id()?;
    blocking(move || Ok(state.backend.user_appointments(user_id)?))
        .await
        .map(Json)
}

async fn cancel_appointment<T: BookingBackend>(
    State(state): State<AppState<T>>,
    Extension(principal): Extension<Principal>,
    PathParams(id): PathParams<i32>,
) -> Result<impl IntoResponse, AppError> {
    let user_id = principal.user_id()?;
    blocking(move || state.booking.cancel(user_id, id)).await?;
    Ok(Json(json!({ "message": "Appointment cancelled successfully" })))
}

async fn stats<T: BookingBackend>(
    State(state): State<AppState<T>>,
) -> Result<Json<Stats>, AppError> {
    blocking(move || Ok(state.backend.stats(state.clock.today())?))
        .await
        .map(Json)
}

async fn todays_appointments<T: BookingBackend>(
    State(state): State<AppState<T>>,
) -> Result<Json<DailyAppointments>, AppError> {
    let date = state.clock.today();
    let time_zone = state.clock.time_zone();
    let appointments = blocking(move || Ok(state.backend.appointments_on(date)?)).await?;
    Ok(Json(DailyAppointments {
        date,
        time_zone,
        count: appointments.len(),
        appointments,
    }))
}

async fn future_appointments<T: BookingBackend>(
    State(state): State<AppState<T>>,
) -> Result<Json<Vec<AppointmentDetails>>, AppError> {
    let today = state.clock.today();
    blocking(move || Ok(state.backend.appointments_after(today)?))
        .await
        .map(Json)
}

async fn complete_appointment<T: BookingBackend>(
    State(state): State<AppState<T>>,
    PathParams(id): PathParams<i32>,
) -> Result<impl IntoResponse, AppError> {
    blocking(move || state.booking.complete(id)).await?;
    Ok(Json(json!({ "message": "Appointment completed successfully" })))
}

async fn add_barber<T: BookingBackend>(
    State(state): State<AppState<T>>,
    ValidatedJson(barber): ValidatedJson<BarberData>,
) -> Result<impl IntoResponse, AppError> {
    let barber = blocking(move || Ok(state.backend.add_barber(barber)?)).await?;
    Ok((StatusCode::CREATED, Json(barber)))
}

async fn update_barber<T: BookingBackend>(
    State(state): State<AppState<T>>,
    PathParams(id): PathParams<i32>,
    ValidatedJson(barber): ValidatedJson<BarberData>,
) -> Result<Json<Barber>, AppError> {
    blocking(move || {
        state
            .backend
            .update_barber(id, barber)?
            .ok_or_else(|| AppError::NotFound("Barber not found".into()))
    })
    .await
    .map(Json)
}

async fn remove_barber<T: BookingBackend>(
    State(state): State<AppState<T>>,
    PathParams(id): PathParams<i32>,
) -> Result<impl IntoResponse, AppError> {
    blocking(move || {
        if state.backend.barber(id)?.is_none() {
            return Err(AppError::NotFound("Barber not found".into()));
        }
        if state
            .backend
            .scheduled_for_barber_from(id, state.clock.today())?
            > 0
        {
            return Err(AppError::Policy(
                "Barber has scheduled appointments and cannot be deleted".into(),
            ));
        }
        if !state.backend.remove_barber(id)? {
            return Err(AppError::NotFound("Barber not found".into()));
        }
        info!(barber_id = id, "Barber deleted");
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "message": "Barber deleted successfully" })))
}

async fn add_barber_specialties<T: BookingBackend>(
    State(state): State<AppState<T>>,
    PathParams(id): PathParams<i32>,
    ValidatedJson(request): ValidatedJson<AssociateSpecialtiesRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (added, barber) = blocking(move || {
        if state.backend.barber(id)?.is_none() {
            return Err(AppError::NotFound("Barber not found".into()));
        }
        let known: Vec<i32> = state
            .backend
            .specialties_by_ids(&request.specialties)?
            .into_iter()
            .map(|specialty| specialty.id)
            .collect();
        if known.is_empty() {
            return Err(AppError::NotFound("No valid specialties found".into()));
        }

        let added = state.backend.add_barber_specialties(id, &known)?;
        let barber = state
            .backend
            .barber(id)?
            .ok_or_else(|| AppError::NotFound("Barber not found".into()))?;
        Ok((added, barber))
    })
    .await?;
    Ok(Json(json!({
        "message": format!("{added} specialties associated"),
        "barber": barber,
    })))
}

async fn remove_barber_specialty<T: BookingBackend>(
    State(state): State<AppState<T>>,
    PathParams((id, specialty_id)): PathParams<(i32, i32)>,
) -> Result<impl IntoResponse, AppError> {
    let removed =
        blocking(move || Ok(state.backend.remove_barber_specialty(id, specialty_id)?)).await?;
    if !removed {
        return Err(AppError::NotFound(
            "Barber specialty association not found".into(),
        ));
    }
    Ok(Json(json!({ "message": "Specialty removed from barber" })))
}

async fn add_specialty<T: BookingBackend>(
    State(state): State<AppState<T>>,
    ValidatedJson(specialty): ValidatedJson<SpecialtyData>,
) -> Result<impl IntoResponse, AppError> {
    let specialty = blocking(move || Ok(state.backend.add_specialty(specialty)?)).await?;
    Ok((StatusCode::CREATED, Json(specialty)))
}

async fn update_specialty<T: BookingBackend>(
    State(state): State<AppState<T>>,
    PathParams(id): PathParams<i32>,
    ValidatedJson(specialty): ValidatedJson<SpecialtyData>,
) -> Result<Json<Specialty>, AppError> {
    blocking(move || {
        state
            .backend
            .update_specialty(id, specialty)?
            .ok_or_else(|| AppError::NotFound("Specialty not found".into()))
    })
    .await
    .map(Json)
}

async fn remove_specialty<T: BookingBackend>(
    State(state): State<AppState<T>>,
    PathParams(id): PathParams<i32>,
) -> Result<impl IntoResponse, AppError> {
    blocking(move || {
        if state.backend.specialty(id)?.is_none() {
            return Err(AppError::NotFound("Specialty not found".into()));
        }
        if state
            .backend
            .scheduled_for_specialty_from(id, state.clock.today())?
            > 0
        {
            return Err(AppError::Policy(
                "Specialty has scheduled appointments and cannot be deleted".into(),
            ));
        }
        if !state.backend.remove_specialty(id)? {
            return Err(AppError::NotFound("Specialty not found".into()));
        }
        info!(specialty_id = id, "Specialty deleted");
        Ok(())
    })
    .await?;
    Ok(Json(json!({ "message": "Specialty deleted successfully" })))
}
