use crate::{
    backend::{BackendError, BookingBackend},
    configuration::AdminAccount,
    error::AppError,
    types::NewAdmin,
    AppState,
};
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};
use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use chrono::{TimeDelta, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::{debug, info};
use uuid::Uuid;

pub const TOKEN_LIFETIME_HOURS: i64 = 24;
const HASH_SCHEME: &str = "pbkdf2-sha256";
const SALT_LENGTH: usize = 16;
const HASH_LENGTH: usize = 32;

/// PBKDF2-HMAC-SHA256 password hashing. Hashes are self-describing:
/// `pbkdf2-sha256$<iterations>$<salt>$<hash>`, so the iteration count can
/// change without invalidating stored passwords.
#[derive(Debug, Clone, Copy)]
pub struct PasswordHasher {
    iterations: u32,
}

impl PasswordHasher {
    pub fn new(iterations: u32) -> Self {
        Self { iterations }
    }

    pub fn hash(&self, password: &str) -> String {
        let mut salt = [0u8; SALT_LENGTH];
        rand::thread_rng().fill_bytes(&mut salt);
        let hash = derive(password, &salt, self.iterations);
        format!(
            "{HASH_SCHEME}${}${}${}",
            self.iterations,
            STANDARD_NO_PAD.encode(salt),
            STANDARD_NO_PAD.encode(hash)
        )
    }

    pub fn verify(&self, password: &str, encoded: &str) -> bool {
        let mut parts = encoded.split('$');
        let (Some(HASH_SCHEME), Some(iterations), Some(salt), Some(expected), None) = (
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
            parts.next(),
        ) else {
            debug!("Stored password hash has an unknown format");
            return false;
        };
        let (Ok(iterations), Ok(salt), Ok(expected)) = (
            iterations.parse::<u32>(),
            STANDARD_NO_PAD.decode(salt),
            STANDARD_NO_PAD.decode(expected),
        ) else {
            debug!("Stored password hash could not be decoded");
            return false;
        };

        derive(password, &salt, iterations)
            .as_slice()
            .ct_eq(expected.as_slice())
            .into()
    }
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> [u8; HASH_LENGTH] {
    let mut hash = [0u8; HASH_LENGTH];
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut hash);
    hash
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Admin,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: String,
    pub role: Role,
    pub iat: i64,
    pub exp: i64,
}

/// Identity of the caller, injected into request extensions by
/// `require_auth`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Principal {
    User(i32),
    Admin(Uuid),
}

impl Principal {
    pub fn role(&self) -> Role {
        match self {
            Principal::User(_) => Role::User,
            Principal::Admin(_) => Role::Admin,
        }
    }

    fn subject(&self) -> String {
        match self {
            Principal::User(id) => id.to_string(),
            Principal::Admin(id) => id.to_string(),
        }
    }

    fn from_claims(claims: &Claims) -> Option<Self> {
        match claims.role {
            Role::User => claims.sub.parse().ok().map(Principal::User),
            Role::Admin => claims.sub.parse().ok().map(Principal::Admin),
        }
    }

    /// Appointments belong to client accounts only.
    pub fn user_id(&self) -> Result<i32, AppError> {
        match self {
            Principal::User(id) => Ok(*id),
            Principal::Admin(_) => Err(AppError::Forbidden(
                "Only client accounts can manage their appointments".into(),
            )),
        }
    }
}

/// Issues and verifies HS256 JSON Web Tokens.
#[derive(Clone)]
pub struct TokenIssuer {
    encoding: EncodingKey,
    decoding: DecodingKey,
}

impl TokenIssuer {
    pub fn new(secret: &str) -> Self {
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
        }
    }

    pub fn issue(&self, principal: &Principal) -> Result<String, AppError> {
        let now = Utc::now();
        let claims = Claims {
            sub: principal.subject(),
            role: principal.role(),
            iat: now.timestamp(),
            exp: (now + TimeDelta::hours(TOKEN_LIFETIME_HOURS)).timestamp(),
        };
        encode(&Header::new(Algorithm::HS256), &claims, &self.encoding)
            .map_err(|err| AppError::Internal(format!("Failed to sign token: {err}")))
    }

    pub fn verify(&self, token: &str) -> Result<Principal, AppError> {
        let data = decode::<Claims>(token, &self.decoding, &Validation::new(Algorithm::HS256))
            .map_err(|err| {
                debug!(?err, "Rejected access token");
                AppError::Forbidden("Invalid token".into())
            })?;
        Principal::from_claims(&data.claims)
            .ok_or_else(|| AppError::Forbidden("Invalid token".into()))
    }
}

/// Requires `Authorization: Bearer <token>` and injects the `Principal`.
pub async fn require_auth<T: BookingBackend>(
    State(state): State<AppState<T>>,
    mut request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let token = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| AppError::Unauthorized("Access token required".into()))?;

    let principal = state.tokens.verify(token)?;
    request.extensions_mut().insert(principal);
    Ok(next.run(request).await)
}

/// Must run after `require_auth`.
pub async fn require_admin(request: Request, next: Next) -> Result<Response, AppError> {
    match request.extensions().get::<Principal>() {
        Some(Principal::Admin(_)) => Ok(next.run(request).await),
        Some(Principal::User(_)) => Err(AppError::Forbidden(
            "Administrator privileges required".into(),
        )),
        None => Err(AppError::Unauthorized("Access token required".into())),
    }
}

/// Creates the configured administrator unless an admin with that email
/// already exists.
pub fn seed_admin<T: BookingBackend>(
    backend: &T,
    passwords: &PasswordHasher,
    account: &AdminAccount,
) -> Result<(), BackendError> {
    if backend.admin_credentials(&account.email)?.is_some() {
        debug!(email = %account.email, "Administrator already present");
        return Ok(());
    }
    let admin = backend.add_admin(NewAdmin {
        name: account.name.clone(),
        email: account.email.clone(),
        password_hash: passwords.hash(&account.password),
    })?;
    info!(admin_id = %admin.id, email = %admin.email, "Administrator account created");
    Ok(())
}
