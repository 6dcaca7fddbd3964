use crate::configuration::{AdminAccount, Configuration};
use chrono::{FixedOffset, Offset, Utc};
use clap::Parser;
use std::time::Duration;
use tracing::debug;

const SECONDS_PER_HOUR: i32 = 3600;

#[derive(Debug, Clone, Parser)]
#[command(name = "barbershop_manager", about = "Barbershop appointment booking service")]
pub struct ConfigurationHandler {
    /// Port the HTTP server listens on
    #[arg(long, env = "PORT", default_value = "3001")]
    port: String,

    /// PostgreSQL connection URL. Without it appointments are kept in memory
    #[arg(long, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Maximum number of pooled database connections
    #[arg(
        long,
        env = "DATABASE_POOL_SIZE",
        default_value_t = 10,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    database_pool_size: u32,

    /// Secret used to sign access tokens
    #[arg(long, env = "JWT_SECRET", hide_env_values = true)]
    jwt_secret: String,

    /// Origin allowed to call the API from a browser
    #[arg(long, env = "FRONTEND_URL")]
    frontend_url: Option<String>,

    /// Offset of the shop's local time from UTC, in hours
    #[arg(
        long,
        env = "SHOP_UTC_OFFSET_HOURS",
        default_value_t = -3,
        allow_negative_numbers = true,
        value_parser = clap::value_parser!(i32).range(-12..=14)
    )]
    utc_offset_hours: i32,

    /// PBKDF2 iterations for newly hashed passwords
    #[arg(long, env = "PASSWORD_HASH_ITERATIONS", default_value_t = 210_000)]
    password_hash_iterations: u32,

    /// Requests a single client may send per window
    #[arg(long, env = "RATE_LIMIT_MAX_REQUESTS", default_value_t = 100)]
    rate_limit_max_requests: u32,

    /// Length of the rate-limit window, in seconds
    #[arg(
        long,
        env = "RATE_LIMIT_WINDOW_SECS",
        default_value_t = 900,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    rate_limit_window_secs: u64,

    #[arg(long, env = "ADMIN_NAME", default_value = "Administrator")]
    admin_name: String,

    /// Email of an administrator to create at start-up
    #[arg(long, env = "ADMIN_EMAIL", requires = "admin_password")]
    admin_email: Option<String>,

    #[arg(long, env = "ADMIN_PASSWORD", hide_env_values = true, requires = "admin_email")]
    admin_password: Option<String>,
}

impl ConfigurationHandler {
    /// Loads `.env` when present, then parses flags and environment.
    pub fn parse_arguments() -> Self {
        if let Err(err) = dotenvy::dotenv() {
            debug!(?err, "No .env file loaded");
        }
        Self::parse()
    }
}

impl Configuration for ConfigurationHandler {
    fn port(&self) -> String {
        self.port.clone()
    }

    fn database_url(&self) -> Option<String> {
        self.database_url.clone()
    }

    fn database_pool_size(&self) -> u32 {
        self.database_pool_size
    }

    fn jwt_secret(&self) -> String {
        self.jwt_secret.clone()
    }

    fn frontend_url(&self) -> Option<String> {
        self.frontend_url.clone()
    }

    fn utc_offset(&self) -> FixedOffset {
        FixedOffset::east_opt(self.utc_offset_hours * SECONDS_PER_HOUR).unwrap_or_else(|| Utc.fix())
    }

    fn password_hash_iterations(&self) -> u32 {
        self.password_hash_iterations
    }

    fn admin_account(&self) -> Option<AdminAccount> {
        match (&self.admin_email, &self.admin_password) {
            (Some(email), Some(password)) => Some(AdminAccount {
                name: self.admin_name.clone(),
                email: email.clone(),
                password: password.clone(),
            }),
            _ => None,
        }
    }

    fn rate_limit_max_requests(&self) -> u32 {
        self.rate_limit_max_requests
    }

    fn rate_limit_window(&self) -> Duration {
        Duration::from_secs(self.rate_limit_window_secs)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn parse(args: &[&str]) -> ConfigurationHandler {
        let mut argv = vec!["barbershop_manager", "--jwt-secret", "secret"];
        argv.extend_from_slice(args);
        ConfigurationHandler::try_parse_from(argv).unwrap()
    }

    #[test]
    fn test_defaults() {
        let configuration = parse(&[]);
        assert_eq!(configuration.jwt_secret(), "secret");
        assert_eq!(configuration.utc_offset(), FixedOffset::west_opt(3 * 3600).unwrap());
        assert_eq!(configuration.password_hash_iterations(), 210_000);
        assert_eq!(configuration.admin_account(), None);
        assert_eq!(configuration.database_pool_size(), 10);
        assert_eq!(configuration.rate_limit_max_requests(), 100);
        assert_eq!(configuration.rate_limit_window(), Duration::from_secs(15 * 60));
    }

    #[test]
    fn test_empty_pool_is_rejected() {
        ConfigurationHandler::try_parse_from([
            "barbershop_manager",
            "--jwt-secret",
            "secret",
            "--database-pool-size",
            "0",
        ])
        .unwrap_err();
    }

    #[test]
    fn test_negative_and_positive_offsets() {
        assert_eq!(
            parse(&["--utc-offset-hours", "-5"]).utc_offset(),
            FixedOffset::west_opt(5 * 3600).unwrap()
        );
        assert_eq!(
            parse(&["--utc-offset-hours", "1"]).utc_offset(),
            FixedOffset::east_opt(3600).unwrap()
        );
    }

    #[test]
    fn test_out_of_range_offset_is_rejected() {
        ConfigurationHandler::try_parse_from([
            "barbershop_manager",
            "--jwt-secret",
            "secret",
            "--utc-offset-hours",
            "20",
        ])
        .unwrap_err();
    }

    #[test]
    fn test_admin_account_needs_email_and_password() {
        let configuration = parse(&[
            "--admin-email",
            "owner@example.com",
            "--admin-password",
            "owner-password",
        ]);
        assert_eq!(
            configuration.admin_account(),
            Some(AdminAccount {
                name: "Administrator".into(),
                email: "owner@example.com".into(),
                password: "owner-password".into(),
            })
        );

        ConfigurationHandler::try_parse_from([
            "barbershop_manager",
            "--jwt-secret",
            "secret",
            "--admin-email",
            "owner@example.com",
        ])
        .unwrap_err();
    }
}
