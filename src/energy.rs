use tokio::time::Instant;

use crate::reading::SensorReading;

const SECONDS_PER_HOUR: f64 = 3600.0;

/// Running energy total for one meter.
#[derive(Debug, Clone, Copy)]
pub struct EnergyState {
    pub cumulative_energy_wh: f64,
    pub last_reading_time: Instant,
}

/// Turns instantaneous samples into energy. The only writer of the cumulative total.
#[derive(Debug)]
pub struct EnergyIntegrator {
    state: EnergyState,
}

impl EnergyIntegrator {
    pub fn new() -> Self {
        Self::starting_at(Instant::now())
    }

    pub fn starting_at(start: Instant) -> Self {
        Self {
            state: EnergyState {
                cumulative_energy_wh: 0.0,
                last_reading_time: start,
            },
        }
    }

    /// Energy for one reading held over `time_delta_seconds`.
    /// Negative or non-finite results clamp to zero.
    pub fn energy_for(reading: &SensorReading, time_delta_seconds: f64) -> f64 {
        let apparent_power = reading.voltage * reading.current;
        let real_power = apparent_power * reading.power_factor;
        let energy_wh = real_power * time_delta_seconds / SECONDS_PER_HOUR;
        if energy_wh.is_finite() {
            energy_wh.max(0.0)
        } else {
            0.0
        }
    }

    /// Computes this interval's increment and adds it to the cumulative total.
    pub fn accumulate(&mut self, reading: &SensorReading, time_delta_seconds: f64) -> f64 {
        let increment = Self::energy_for(reading, time_delta_seconds);
        self.state.cumulative_energy_wh += increment;
        increment
    }

    /// Seconds elapsed since the previous call (or construction), then moves the clock to `now`.
    pub fn advance_clock(&mut self, now: Instant) -> f64 {
        let elapsed = now
            .saturating_duration_since(self.state.last_reading_time)
            .as_secs_f64();
        self.state.last_reading_time = now;
        elapsed
    }

    pub fn cumulative_energy_wh(&self) -> f64 {
        self.state.cumulative_energy_wh
    }

    pub fn state(&self) -> EnergyState {
        self.state
    }
}

impl Default for EnergyIntegrator {
    fn default() -> Self {
        Self::new()
    }
}
