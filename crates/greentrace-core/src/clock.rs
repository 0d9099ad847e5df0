//! Record timestamps.
//!
//! Timestamps are kept at microsecond precision so a Postgres round trip
//! returns them unchanged. `updated_at` strictly increases on every change,
//! which lets it act as the record's version in conditional writes.

use chrono::{DateTime, Duration, SubsecRound, Utc};

/// Current time at storage precision.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// Next `updated_at` after `previous`, never equal to it.
pub fn advance(previous: DateTime<Utc>) -> DateTime<Utc> {
    let now = now();
    if now > previous {
        now
    } else {
        previous + Duration::microseconds(1)
    }
}
