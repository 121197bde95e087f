use serde_derive::{Deserialize, Serialize};
use tokio::time::Instant;

/// One calibrated sample of the meter's transducers.
#[derive(Default, Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensorReading {
    /// Wall-clock capture time in milliseconds since the Unix epoch
    pub timestamp: i64,
    /// Volts
    pub voltage: f64,
    /// Amps
    pub current: f64,
    pub power_factor: f64,
    /// Hz
    pub frequency: f64,
    /// Celsius
    pub temperature: f64,
    /// Percentage
    pub humidity: f64,
    /// Monotonic capture instant, local to this process and never serialised.
    /// `None` for readings that came off the wire.
    #[serde(skip)]
    pub captured_at: Option<Instant>,
}

impl SensorReading {
    /// The "sensor unavailable" sentinel: every physical field is zeroed.
    pub fn unavailable(timestamp: i64) -> Self {
        Self {
            timestamp,
            captured_at: Some(Instant::now()),
            ..Self::default()
        }
    }

    /// Zero voltage means the transducers could not be read, energy must not accrue.
    pub fn is_fault(&self) -> bool {
        self.voltage <= 0.0
    }
}

pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_is_fault() {
        let reading = SensorReading::unavailable(1_700_000_000_000);
        assert!(reading.is_fault());
        assert_eq!(reading.timestamp, 1_700_000_000_000);
        assert_eq!(reading.power_factor, 0.0);
        assert_eq!(reading.frequency, 0.0);
        assert!(reading.captured_at.is_some());
    }

    #[test]
    fn test_capture_instant_is_not_serialised() {
        let reading = SensorReading::unavailable(42);
        let json = serde_json::to_value(&reading).unwrap();
        assert!(json.get("captured_at").is_none());

        let back: SensorReading = serde_json::from_value(json).unwrap();
        assert_eq!(back.timestamp, 42);
        assert!(back.captured_at.is_none());
    }

    #[test]
    fn test_live_reading_is_not_fault() {
        let reading = SensorReading {
            timestamp: 1,
            voltage: 229.8,
            current: 4.1,
            power_factor: 0.95,
            frequency: 50.0,
            temperature: 25.0,
            humidity: 45.0,
            captured_at: None,
        };
        assert!(!reading.is_fault());
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(229.876, 2), 229.88);
        assert_eq!(round_to(45.04, 1), 45.0);
        assert_eq!(round_to(0.0, 2), 0.0);
    }
}
