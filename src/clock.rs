//! Shop-local time. Every "today" and every (date, time) to instant
//! conversion in the service goes through `ShopClock`, so slot listings,
//! bookings, cancellations and the admin views agree on dates.

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta, TimeZone, Utc};
use std::{fmt, sync::Arc};

#[cfg_attr(test, mockall::automock)]
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

#[derive(Clone)]
pub struct ShopClock {
    offset: FixedOffset,
    clock: Arc<dyn Clock>,
}

impl fmt::Debug for ShopClock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ShopClock")
            .field("offset", &self.offset)
            .finish_non_exhaustive()
    }
}

impl ShopClock {
    pub fn new(offset: FixedOffset) -> Self {
        Self::with_clock(offset, Arc::new(SystemClock))
    }

    pub fn with_clock(offset: FixedOffset, clock: Arc<dyn Clock>) -> Self {
        Self { offset, clock }
    }

    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Current calendar date at the shop.
    pub fn today(&self) -> NaiveDate {
        self.now().with_timezone(&self.offset).date_naive()
    }

    /// Instant at which a shop-local date and time of day begins.
    pub fn starts_at(&self, date: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let local = date.and_time(time);
        let utc = local - TimeDelta::seconds(i64::from(self.offset.local_minus_utc()));
        Utc.from_utc_datetime(&utc)
    }

    /// `+HH:MM` form of the shop offset.
    pub fn time_zone(&self) -> String {
        self.offset.to_string()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn sao_paulo() -> FixedOffset {
        FixedOffset::west_opt(3 * 3600).unwrap()
    }

    fn clock_at(now: DateTime<Utc>) -> ShopClock {
        let mut clock = MockClock::new();
        clock.expect_now().return_const(now);
        ShopClock::with_clock(sao_paulo(), Arc::new(clock))
    }

    #[test]
    fn today_follows_shop_offset() {
        // 01:30 UTC is still the previous evening at UTC-3.
        let now = Utc.with_ymd_and_hms(2025, 3, 11, 1, 30, 0).unwrap();
        let clock = clock_at(now);
        assert_eq!(clock.today(), NaiveDate::from_ymd_opt(2025, 3, 10).unwrap());
    }

    #[test]
    fn starts_at_converts_local_time_to_utc() {
        let clock = ShopClock::new(sao_paulo());
        let date = NaiveDate::from_ymd_opt(2025, 3, 10).unwrap();
        let time = NaiveTime::from_hms_opt(9, 0, 0).unwrap();
        assert_eq!(
            clock.starts_at(date, time),
            Utc.with_ymd_and_hms(2025, 3, 10, 12, 0, 0).unwrap()
        );
    }

    #[test]
    fn time_zone_is_formatted_as_offset() {
        assert_eq!(ShopClock::new(sao_paulo()).time_zone(), "-03:00");
    }
}
