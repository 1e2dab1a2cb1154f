use chrono::{DateTime, Duration, NaiveDateTime, SubsecRound, Utc};

/// Stamps readings at receipt time, producers never send one.
///
/// The zone runs on a fixed offset from UTC and readings are kept
/// with whole-second precision.
#[derive(Debug, Clone, Copy)]
pub struct ZoneClock {
    offset: Duration,
}

impl ZoneClock {
    pub fn new(offset_secs: i64) -> Self {
        ZoneClock {
            offset: Duration::seconds(offset_secs),
        }
    }

    pub fn now(&self) -> NaiveDateTime {
        self.stamp(Utc::now())
    }

    pub fn stamp(&self, received_at: DateTime<Utc>) -> NaiveDateTime {
        (received_at.naive_utc() + self.offset).trunc_subsecs(0)
    }
}

impl Default for ZoneClock {
    fn default() -> Self {
        ZoneClock::new(3600)
    }
}
