use chrono::FixedOffset;
use std::time::Duration;

/// Administrator created at start-up when configured.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AdminAccount {
    pub name: String,
    pub email: String,
    pub password: String,
}

pub trait Configuration: Clone + Send + Sync + 'static {
    fn port(&self) -> String;
    fn database_url(&self) -> Option<String>;
    /// Upper bound of pooled database connections.
    fn database_pool_size(&self) -> u32;
    fn jwt_secret(&self) -> String;
    /// Allowed CORS origin; any origin when unset.
    fn frontend_url(&self) -> Option<String>;
    /// Offset of the shop's local time from UTC.
    fn utc_offset(&self) -> FixedOffset;
    fn password_hash_iterations(&self) -> u32;
    fn admin_account(&self) -> Option<AdminAccount>;
    /// Requests a client may send per rate-limit window.
    fn rate_limit_max_requests(&self) -> u32;
    fn rate_limit_window(&self) -> Duration;
}
