use std::time::Duration;

use serde_derive::{Deserialize, Serialize};
use tokio::time::{sleep, timeout_at, Instant};
use tracing::warn;

use crate::reading::{round_to, SensorReading};
use crate::sensor::SensorSource;

pub const DIAGNOSTIC_READINGS: usize = 5;
pub const DIAGNOSTIC_SPACING: Duration = Duration::from_millis(100);
/// Upper bound for the whole check, however slow the hardware is to answer.
pub const DIAGNOSTIC_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SensorStatus {
    #[serde(rename = "OK")]
    Ok,
    #[serde(rename = "ERROR")]
    Error,
}

/// Result of a sampling-only health check. Never touches the collector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiagnosticReport {
    pub meter_id: String,
    /// RFC 3339, UTC
    pub timestamp: String,
    pub voltage_avg: f64,
    pub current_avg: f64,
    pub sensor_status: SensorStatus,
    pub readings_taken: usize,
    pub cumulative_energy_wh: f64,
}

/// Takes [`DIAGNOSTIC_READINGS`] quick readings and averages them.
pub async fn run_diagnostic<S: SensorSource>(
    source: &mut S,
    meter_id: &str,
    cumulative_energy_wh: f64,
) -> DiagnosticReport {
    run_diagnostic_within(source, meter_id, cumulative_energy_wh, DIAGNOSTIC_DEADLINE).await
}

/// Like [`run_diagnostic`], but stops sampling once `deadline` has passed.
/// A reading still pending at the deadline is dropped and not counted.
pub async fn run_diagnostic_within<S: SensorSource>(
    source: &mut S,
    meter_id: &str,
    cumulative_energy_wh: f64,
    deadline: Duration,
) -> DiagnosticReport {
    let deadline = Instant::now() + deadline;
    let mut readings: Vec<SensorReading> = Vec::with_capacity(DIAGNOSTIC_READINGS);
    for i in 0..DIAGNOSTIC_READINGS {
        match timeout_at(deadline, source.read()).await {
            Ok(reading) => readings.push(reading),
            Err(_) => {
                warn!(
                    readings_taken = readings.len(),
                    "sensor diagnostic ran out of time"
                );
                break;
            }
        }
        if i + 1 < DIAGNOSTIC_READINGS {
            sleep(DIAGNOSTIC_SPACING).await;
        }
    }
    summarize(&readings, meter_id, cumulative_energy_wh)
}

fn summarize(
    readings: &[SensorReading],
    meter_id: &str,
    cumulative_energy_wh: f64,
) -> DiagnosticReport {
    let count = readings.len().max(1) as f64;
    let voltage_avg = readings.iter().map(|r| r.voltage).sum::<f64>() / count;
    let current_avg = readings.iter().map(|r| r.current).sum::<f64>() / count;

    DiagnosticReport {
        meter_id: meter_id.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        voltage_avg: round_to(voltage_avg, 2),
        current_avg: round_to(current_avg, 2),
        sensor_status: if voltage_avg > 0.0 {
            SensorStatus::Ok
        } else {
            SensorStatus::Error
        },
        readings_taken: readings.len(),
        cumulative_energy_wh,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sensor::{Calibration, SimulatedSource};

    #[tokio::test]
    async fn test_diagnostic_averages_readings() {
        let mut source = SimulatedSource::new(
            vec![
                (100.0, 1.0),
                (110.0, 2.0),
                (120.0, 3.0),
                (130.0, 4.0),
                (140.0, 5.0),
            ],
            Calibration::default(),
        );

        let report = run_diagnostic(&mut source, "meter_001", 12.5).await;

        assert_eq!(report.voltage_avg, 120.0);
        assert_eq!(report.current_avg, 3.0);
        assert_eq!(report.sensor_status, SensorStatus::Ok);
        assert_eq!(report.readings_taken, 5);
        assert_eq!(report.meter_id, "meter_001");
        assert_eq!(report.cumulative_energy_wh, 12.5);
        assert!(chrono::DateTime::parse_from_rfc3339(&report.timestamp).is_ok());
    }

    #[tokio::test]
    async fn test_diagnostic_flags_dead_sensor() {
        let mut source = SimulatedSource::constant(0.0, 0.0, Calibration::default());
        let report = run_diagnostic(&mut source, "meter_001", 0.0).await;

        assert_eq!(report.voltage_avg, 0.0);
        assert_eq!(report.sensor_status, SensorStatus::Error);
    }

    #[tokio::test]
    async fn test_diagnostic_is_quick() {
        let mut source = SimulatedSource::constant(230.0, 1.0, Calibration::default());
        let started = std::time::Instant::now();
        run_diagnostic(&mut source, "meter_001", 0.0).await;
        let elapsed = started.elapsed();
        assert!(elapsed >= DIAGNOSTIC_SPACING * 4);
        assert!(elapsed < Duration::from_secs(2));
    }

    /// Answers every read, but only after `delay`
    struct SlowSource {
        delay: Duration,
    }

    impl SensorSource for SlowSource {
        async fn read(&mut self) -> SensorReading {
            sleep(self.delay).await;
            SensorReading::unavailable(crate::reading::now_millis())
        }
    }

    #[tokio::test]
    async fn test_diagnostic_respects_deadline() {
        let mut source = SlowSource {
            delay: Duration::from_secs(10),
        };
        let started = std::time::Instant::now();
        let report =
            run_diagnostic_within(&mut source, "meter_001", 0.0, Duration::from_millis(300)).await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert_eq!(report.readings_taken, 0);
        assert_eq!(report.sensor_status, SensorStatus::Error);
    }

    #[tokio::test]
    async fn test_diagnostic_keeps_readings_taken_before_deadline() {
        let mut source = SlowSource {
            delay: Duration::from_millis(200),
        };
        let report =
            run_diagnostic_within(&mut source, "meter_001", 0.0, Duration::from_millis(700)).await;

        // 200 ms read plus 100 ms spacing: two full readings fit, the third is cut off
        assert_eq!(report.readings_taken, 2);
    }

    #[test]
    fn test_report_json_shape() {
        let report = summarize(&[], "m", 0.0);
        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["sensor_status"], "ERROR");
        assert_eq!(json["readings_taken"], 0);
        assert_eq!(json["voltage_avg"], 0.0);
    }
}
