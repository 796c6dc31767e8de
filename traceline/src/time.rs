//! Wall-clock helpers.
//!
//! Timestamps travel on the wire as fractional seconds since the unix epoch
//! with millisecond precision.
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Current wall-clock time.
#[doc(hidden)]
pub fn now() -> SystemTime {
    SystemTime::now()
}

/// Converts a timestamp into seconds since the unix epoch, truncated to whole
/// milliseconds. Times before the epoch clamp to zero.
pub fn to_seconds(time: SystemTime) -> f64 {
    let millis = time
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_millis();
    millis as f64 / 1000.0
}

/// Converts seconds since the unix epoch back into a timestamp.
///
/// Negative or non-finite input yields the epoch.
pub fn from_seconds(seconds: f64) -> SystemTime {
    if !seconds.is_finite() || seconds <= 0.0 {
        return UNIX_EPOCH;
    }
    UNIX_EPOCH + Duration::from_millis((seconds * 1000.0).round() as u64)
}

/// `#[serde(with = "traceline::time::seconds")]` for `SystemTime` fields.
pub mod seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::SystemTime;

    /// Serializes a timestamp as float seconds.
    pub fn serialize<S: Serializer>(time: &SystemTime, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(super::to_seconds(*time))
    }

    /// Deserializes a timestamp from float seconds.
    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<SystemTime, D::Error> {
        f64::deserialize(deserializer).map(super::from_seconds)
    }
}

/// `#[serde(with = "traceline::time::seconds_opt")]` for `Option<SystemTime>` fields.
pub mod seconds_opt {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::SystemTime;

    /// Serializes an optional timestamp as float seconds or null.
    pub fn serialize<S: Serializer>(
        time: &Option<SystemTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match time {
            Some(time) => serializer.serialize_some(&super::to_seconds(*time)),
            None => serializer.serialize_none(),
        }
    }

    /// Deserializes an optional timestamp.
    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<SystemTime>, D::Error> {
        Ok(Option::<f64>::deserialize(deserializer)?.map(super::from_seconds))
    }
}
