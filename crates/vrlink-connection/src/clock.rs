//! Timestamps attached to every message

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use vrlink_core::{Message, MessageVisitor, WireError};

const MICROS_PER_SECOND: i64 = 1_000_000;

/// Seconds and microseconds since the Unix epoch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TimeValue {
    pub seconds: i64,
    pub microseconds: i32,
}

impl TimeValue {
    pub fn new(seconds: i64, microseconds: i32) -> Self {
        let mut value = Self {
            seconds,
            microseconds,
        };
        value.normalize();
        value
    }

    pub fn now() -> Self {
        Self::from(Utc::now())
    }

    /// Carry whole seconds out of `microseconds` so it lies in 0..1_000_000
    pub fn normalize(&mut self) {
        let total = i64::from(self.microseconds);
        self.seconds += total.div_euclid(MICROS_PER_SECOND);
        // rem_euclid of a 1e6 modulus always fits in i32
        self.microseconds = total.rem_euclid(MICROS_PER_SECOND) as i32;
    }

    pub fn as_micros(&self) -> i64 {
        self.seconds * MICROS_PER_SECOND + i64::from(self.microseconds)
    }

    pub fn to_datetime(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_opt(self.seconds, self.microseconds.max(0) as u32 * 1000)
            .single()
    }
}

impl From<DateTime<Utc>> for TimeValue {
    fn from(time: DateTime<Utc>) -> Self {
        Self {
            seconds: time.timestamp(),
            microseconds: time.timestamp_subsec_micros() as i32,
        }
    }
}

impl Message for TimeValue {
    fn process_message<V: MessageVisitor>(&mut self, visitor: &mut V) -> Result<(), WireError> {
        visitor.visit(&mut self.seconds)?;
        visitor.visit(&mut self.microseconds)
    }
}

/// Source of message timestamps
pub trait Clock: Send + Sync {
    fn now(&self) -> TimeValue;
}

/// Wall-clock time
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> TimeValue {
        TimeValue::now()
    }
}

/// Always reports the same instant
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedClock(pub TimeValue);

impl Clock for FixedClock {
    fn now(&self) -> TimeValue {
        self.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vrlink_core::wire::{from_bytes, to_bytes};

    #[test]
    fn test_normalize() {
        assert_eq!(TimeValue::new(1, 1_500_000), TimeValue::new(2, 500_000));
        assert_eq!(
            TimeValue::new(1, -1),
            TimeValue {
                seconds: 0,
                microseconds: 999_999
            }
        );
    }

    #[test]
    fn test_datetime_conversion() {
        let time = Utc.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        let value = TimeValue::from(time);
        assert_eq!(value.seconds, 1_700_000_000);
        assert_eq!(value.microseconds, 250_000);
        assert_eq!(value.to_datetime(), Some(time));
    }

    #[test]
    fn test_wire_layout() {
        let mut value = TimeValue::new(1, 2);
        let bytes = to_bytes(&mut value).unwrap();
        assert_eq!(bytes, vec![0, 0, 0, 0, 0, 0, 0, 1, 0, 0, 0, 2]);
        assert_eq!(from_bytes::<TimeValue>(&bytes).unwrap(), value);
    }

    #[test]
    fn test_fixed_clock() {
        let clock = FixedClock(TimeValue::new(5, 0));
        assert_eq!(clock.now(), clock.now());
        assert!(SystemClock.now().seconds > 0);
    }
}
