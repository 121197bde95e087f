use std::future::Future;

use tokio::time::Instant;

use crate::modbus_adc::ModbusAdcSource;
use crate::reading::{now_millis, round_to, SensorReading};

/// ADS1115 full-scale positive count
const ADC_FULL_SCALE: f64 = 32767.0;
/// ADC reference voltage
const ADC_REFERENCE_VOLTS: f64 = 3.3;

/// Produces calibrated readings. Must not fail: faults come back as
/// [`SensorReading::unavailable`].
pub trait SensorSource {
    fn read(&mut self) -> impl Future<Output = SensorReading> + Send;
}

/// Per-device calibration, injected from configuration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Calibration {
    pub voltage_scale: f64,
    pub current_scale: f64,
    pub power_factor: f64,
    pub grid_frequency: f64,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            voltage_scale: 230.0 / ADC_REFERENCE_VOLTS,
            current_scale: 100.0 / ADC_REFERENCE_VOLTS,
            power_factor: 0.95,
            grid_frequency: 50.0,
        }
    }
}

/// Raw channel values as they come off the converter.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AdcSample {
    pub voltage_raw: i16,
    pub current_raw: i16,
    /// Tenths of a degree Celsius
    pub temperature_decis: i16,
    /// Tenths of a percent
    pub humidity_decis: u16,
}

impl Calibration {
    pub fn apply(&self, sample: AdcSample, timestamp: i64) -> SensorReading {
        let voltage = adc_volts(sample.voltage_raw) * self.voltage_scale;
        let current = adc_volts(sample.current_raw) * self.current_scale;
        SensorReading {
            timestamp,
            voltage: round_to(voltage.max(0.0), 2),
            current: round_to(current.max(0.0), 2),
            power_factor: self.power_factor,
            frequency: self.grid_frequency,
            temperature: round_to(f64::from(sample.temperature_decis) / 10.0, 1),
            humidity: round_to((f64::from(sample.humidity_decis) / 10.0).clamp(0.0, 100.0), 1),
            captured_at: Some(Instant::now()),
        }
    }
}

fn adc_volts(raw: i16) -> f64 {
    f64::from(raw) * ADC_REFERENCE_VOLTS / ADC_FULL_SCALE
}

/// Replays a fixed list of (voltage, current) pairs, wrapping around at the end.
/// For bench runs without hardware.
#[derive(Debug, Clone)]
pub struct SimulatedSource {
    samples: Vec<(f64, f64)>,
    calibration: Calibration,
    next: usize,
}

impl SimulatedSource {
    pub fn new(samples: Vec<(f64, f64)>, calibration: Calibration) -> Self {
        Self {
            samples,
            calibration,
            next: 0,
        }
    }

    pub fn constant(voltage: f64, current: f64, calibration: Calibration) -> Self {
        Self::new(vec![(voltage, current)], calibration)
    }

    fn next_reading(&mut self) -> SensorReading {
        let timestamp = now_millis();
        let Some(&(voltage, current)) = self.samples.get(self.next) else {
            return SensorReading::unavailable(timestamp);
        };
        self.next = (self.next + 1) % self.samples.len();

        if voltage <= 0.0 {
            return SensorReading::unavailable(timestamp);
        }
        SensorReading {
            timestamp,
            voltage,
            current: current.max(0.0),
            power_factor: self.calibration.power_factor,
            frequency: self.calibration.grid_frequency,
            temperature: 25.0,
            humidity: 45.0,
            captured_at: Some(Instant::now()),
        }
    }
}

impl SensorSource for SimulatedSource {
    async fn read(&mut self) -> SensorReading {
        self.next_reading()
    }
}

/// The source chosen by the `sensor` section of the config file.
pub enum ConfiguredSource {
    Modbus(ModbusAdcSource),
    Simulated(SimulatedSource),
}

impl SensorSource for ConfiguredSource {
    async fn read(&mut self) -> SensorReading {
        match self {
            ConfiguredSource::Modbus(source) => source.read().await,
            ConfiguredSource::Simulated(source) => source.read().await,
        }
    }
}
