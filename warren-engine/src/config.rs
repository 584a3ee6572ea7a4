// Copyright © 2026 The Warren Contributors
//
// This file is part of warren, distributed under the GPLv3 with Warren
// Linking Exception. For full terms see the included LICENSE file.

//! Engine configuration: tunables, the preferences view, and the
//! time-of-day location-sharing policy.

use std::{collections::HashSet, time::Duration};

use chrono::{NaiveDateTime, NaiveTime, Timelike as _, Weekday};

/// Size of each of the two worker pools (locally-initiated tasks and
/// peer-request handlers).
pub const THREAD_POOL_SIZE: usize = 30;

/// Retry delay for a failed ask-pull or ask-location nudge.
pub const FRIEND_REQUEST_DELAY: Duration = Duration::from_secs(30);

/// Period of the download-retry tick.
pub const DOWNLOAD_RETRY_PERIOD: Duration = Duration::from_secs(10 * 60);

/// Idle window the preference-change restart debounces on.
pub const PREF_RESTART_DELAY: Duration = Duration::from_secs(5);

/// Watchdog timeout while no circuit has been established yet.
pub const NOT_CONNECTED_TIMEOUT: Duration = Duration::from_secs(5 * 60);

/// Watchdog timeout since the last confirmed peer interaction.
pub const NO_COMM_TIMEOUT: Duration = Duration::from_secs(120 * 60);

/// Tunables of a running engine. `Default` is the production
/// configuration; tests shrink the durations.
#[derive(Clone, Debug)]
pub struct RunConfig {
    pub thread_pool_size: usize,
    pub friend_request_delay: Duration,
    pub download_retry_period: Duration,
    pub pref_restart_delay: Duration,
    pub not_connected_timeout: Duration,
    pub no_comm_timeout: Duration,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            thread_pool_size: THREAD_POOL_SIZE,
            friend_request_delay: FRIEND_REQUEST_DELAY,
            download_retry_period: DOWNLOAD_RETRY_PERIOD,
            pref_restart_delay: PREF_RESTART_DELAY,
            not_connected_timeout: NOT_CONNECTED_TIMEOUT,
            no_comm_timeout: NO_COMM_TIMEOUT,
        }
    }
}

/// The preference keys the engine recognizes.
pub mod keys {
    pub const EXCHANGE_FILES_WIFI_ONLY: &str = "exchange-files-wifi-only";
    pub const AUTOMATIC_LOCATION_SHARING: &str = "automatic-location-sharing";
    pub const LIMIT_LOCATION_SHARING_TIME: &str = "limit-location-sharing-time";
    pub const LIMIT_LOCATION_SHARING_TIME_NOT_BEFORE: &str = "limit-location-sharing-time-not-before";
    pub const LIMIT_LOCATION_SHARING_TIME_NOT_AFTER: &str = "limit-location-sharing-time-not-after";
    pub const LIMIT_LOCATION_SHARING_DAY: &str = "limit-location-sharing-day";
}

/// Read-only view onto the application preferences.
///
/// Implementations are expected to answer from memory; the engine reads
/// preferences while holding its state lock.
pub trait Preferences: Send + Sync + 'static {
    fn flag(&self, key: &str) -> bool;
    fn value(&self, key: &str) -> Option<String>;
    fn values(&self, key: &str) -> HashSet<String>;
}

/// Whether a location fix may be shared with a requesting friend right
/// now.
///
/// True iff automatic location sharing is on, and -- when the time window
/// gate is on -- the local time lies within `[not-before, not-after]` at
/// minute resolution (both boundaries inclusive) and the current weekday
/// is in the allowed set.
pub fn currently_sharing_location(prefs: &dyn Preferences) -> bool {
    sharing_location_at(prefs, chrono::Local::now().naive_local())
}

fn sharing_location_at(prefs: &dyn Preferences, now: NaiveDateTime) -> bool {
    if !prefs.flag(keys::AUTOMATIC_LOCATION_SHARING) {
        return false;
    }
    if !prefs.flag(keys::LIMIT_LOCATION_SHARING_TIME) {
        return true;
    }

    let not_before = minute_of_day(prefs.value(keys::LIMIT_LOCATION_SHARING_TIME_NOT_BEFORE), 0);
    let not_after = minute_of_day(
        prefs.value(keys::LIMIT_LOCATION_SHARING_TIME_NOT_AFTER),
        23 * 60 + 59,
    );
    let minute = now.time().hour() * 60 + now.time().minute();
    if minute < not_before || minute > not_after {
        return false;
    }

    let days = prefs.values(keys::LIMIT_LOCATION_SHARING_DAY);
    days.is_empty() || days.contains(weekday_name(chrono::Datelike::weekday(&now)))
}

fn minute_of_day(value: Option<String>, fallback: u32) -> u32 {
    value
        .and_then(|v| NaiveTime::parse_from_str(&v, "%H:%M").ok())
        .map_or(fallback, |t| t.hour() * 60 + t.minute())
}

fn weekday_name(day: Weekday) -> &'static str {
    match day {
        Weekday::Mon => "Monday",
        Weekday::Tue => "Tuesday",
        Weekday::Wed => "Wednesday",
        Weekday::Thu => "Thursday",
        Weekday::Fri => "Friday",
        Weekday::Sat => "Saturday",
        Weekday::Sun => "Sunday",
    }
}
