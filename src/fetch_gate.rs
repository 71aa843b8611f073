use chrono::{DateTime, NaiveDate, Utc};
use chrono_tz::Tz;

use crate::models::RetailerLink;

/// Once-per-calendar-day throttle for retailer links.
///
/// Days are compared in a fixed zone rather than the host's local zone, so a
/// pass just after midnight in the catalog's market sees a fresh day no
/// matter where the process runs.
#[derive(Debug, Clone, Copy)]
pub struct FetchGate {
    zone: Tz,
}

impl FetchGate {
    pub fn new(zone: Tz) -> Self {
        Self { zone }
    }

    pub fn zone(&self) -> Tz {
        self.zone
    }

    pub fn is_due(&self, link: &RetailerLink, now: DateTime<Utc>) -> bool {
        is_due(link, now, self.zone)
    }
}

pub fn is_due(link: &RetailerLink, now: DateTime<Utc>, zone: Tz) -> bool {
    if link.fetch_target().is_none() {
        return false;
    }
    match link.last_attempted_at {
        Some(last) => local_date(last, zone) != local_date(now, zone),
        None => true,
    }
}

pub fn local_date(at: DateTime<Utc>, zone: Tz) -> NaiveDate {
    at.with_timezone(&zone).date_naive()
}
