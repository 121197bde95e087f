use std::sync::Arc;
use std::time::Duration;

use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::diagnostic::{run_diagnostic, DiagnosticReport};
use crate::energy::EnergyIntegrator;
use crate::error::{ConfigError, CycleError};
use crate::packet::{DeviceIdentity, PacketBuilder, PoEPacket};
use crate::reading::{now_millis, round_to};
use crate::reading_buffer::{ReadingBuffer, DEFAULT_BUFFER_SIZE};
use crate::sensor::{ConfiguredSource, SensorSource};
use crate::submitter::Submitter;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    Idle,
    Sampling,
    Integrating,
    SkipCycle,
    Building,
    Signing,
    Submitting,
    Sleeping,
    Stopped,
}

/// Timing knobs for the cycle loop.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AgentSettings {
    pub interval: Duration,
    pub failure_cooldown: Duration,
    pub buffer_size: usize,
}

impl Default for AgentSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(300),
            failure_cooldown: Duration::from_secs(60),
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum CycleOutcome {
    /// A packet was built, signed and accepted by the collector
    Submitted { energy_wh: f64 },
    /// Nothing to report this interval
    Skipped,
}

enum PreparedCycle {
    Skipped,
    Ready { packet: PoEPacket, energy_wh: f64 },
}

/// Counters reported when the agent stops.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionSummary {
    pub sent: u64,
    pub failed: u64,
    pub cycles_completed: u64,
    pub cycles_skipped: u64,
    pub cycles_failed: u64,
    pub cumulative_energy_wh: f64,
}

/// Drives one meter: sample, integrate, build, sign, submit, sleep.
///
/// Each instance owns its own energy total and reading buffer, so running
/// several meters means running several agents.
pub struct MeterAgent<S> {
    source: S,
    integrator: EnergyIntegrator,
    buffer: ReadingBuffer,
    builder: PacketBuilder,
    submitter: Submitter,
    settings: AgentSettings,
    state: AgentState,
    cycles_completed: u64,
    cycles_skipped: u64,
    cycles_failed: u64,
}

impl MeterAgent<ConfiguredSource> {
    pub fn from_config(cfg: &AgentConfig) -> Result<Self, ConfigError> {
        let signer = Arc::new(cfg.signer()?);
        let identity = DeviceIdentity::new(&cfg.meter_id, &cfg.manufacturer, &cfg.serial_number);
        let builder =
            PacketBuilder::new(identity, signer).with_firmware_version(&cfg.firmware_version);
        let submitter = Submitter::new(&cfg.oracle_url, cfg.submit_timeout())
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let settings = AgentSettings {
            interval: cfg.interval(),
            failure_cooldown: cfg.cooldown(),
            buffer_size: cfg.buffer_size,
        };
        Ok(Self::new(cfg.sensor_source()?, builder, submitter, settings))
    }
}

impl<S: SensorSource> MeterAgent<S> {
    pub fn new(
        source: S,
        builder: PacketBuilder,
        submitter: Submitter,
        settings: AgentSettings,
    ) -> Self {
        Self {
            source,
            integrator: EnergyIntegrator::new(),
            buffer: ReadingBuffer::new(settings.buffer_size),
            builder,
            submitter,
            settings,
            state: AgentState::Idle,
            cycles_completed: 0,
            cycles_skipped: 0,
            cycles_failed: 0,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    pub fn meter_id(&self) -> &str {
        &self.builder.identity().meter_id
    }

    pub fn cumulative_energy_wh(&self) -> f64 {
        self.integrator.cumulative_energy_wh()
    }

    pub fn buffer(&self) -> &ReadingBuffer {
        &self.buffer
    }

    pub fn submitter(&self) -> &Submitter {
        &self.submitter
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            sent: self.submitter.sent(),
            failed: self.submitter.failed(),
            cycles_completed: self.cycles_completed,
            cycles_skipped: self.cycles_skipped,
            cycles_failed: self.cycles_failed,
            cumulative_energy_wh: self.integrator.cumulative_energy_wh(),
        }
    }

    fn transition(&mut self, next: AgentState) {
        debug!(from = ?self.state, to = ?next, "agent state");
        self.state = next;
    }

    /// Sampling-only health check; never builds or submits a packet.
    pub async fn diagnostic(&mut self) -> DiagnosticReport {
        let meter_id = self.meter_id().to_string();
        let cumulative = self.integrator.cumulative_energy_wh();
        run_diagnostic(&mut self.source, &meter_id, cumulative).await
    }

    /// One pass of sample, integrate and, when there is energy to report,
    /// build, sign and submit.
    pub async fn run_cycle(&mut self) -> Result<CycleOutcome, CycleError> {
        match self.prepare_cycle().await? {
            PreparedCycle::Skipped => Ok(CycleOutcome::Skipped),
            PreparedCycle::Ready { packet, energy_wh } => self.submit(packet, energy_wh).await,
        }
    }

    /// Everything up to the network: sampling, integration, building and
    /// signing. Dropping this future never leaves a packet half delivered.
    async fn prepare_cycle(&mut self) -> Result<PreparedCycle, CycleError> {
        self.transition(AgentState::Sampling);
        let reading = self.source.read().await;
        let now = reading.captured_at.unwrap_or_else(Instant::now);
        self.buffer.push(reading.clone());

        self.transition(AgentState::Integrating);
        let time_delta = self.integrator.advance_clock(now);
        let energy_wh = if reading.is_fault() {
            warn!("sensor unavailable, skipping energy accrual this cycle");
            0.0
        } else {
            self.integrator.accumulate(&reading, time_delta)
        };

        info!(
            voltage = reading.voltage,
            current = reading.current,
            energy_wh = round_to(energy_wh, 2),
            total_wh = self.integrator.cumulative_energy_wh().round(),
            "cycle reading"
        );

        if energy_wh <= 0.0 {
            self.transition(AgentState::SkipCycle);
            self.cycles_skipped += 1;
            return Ok(PreparedCycle::Skipped);
        }

        self.transition(AgentState::Building);
        let record = self.builder.record_at(
            now_millis(),
            energy_wh,
            self.integrator.cumulative_energy_wh(),
            &self.buffer,
        );

        self.transition(AgentState::Signing);
        let packet = self.builder.seal(record)?;
        Ok(PreparedCycle::Ready { packet, energy_wh })
    }

    /// Sends one sealed packet. Bounded by the submitter's timeout, so it is
    /// always allowed to finish and land in the counters.
    async fn submit(
        &mut self,
        packet: PoEPacket,
        energy_wh: f64,
    ) -> Result<CycleOutcome, CycleError> {
        self.transition(AgentState::Submitting);
        let result = self.submitter.send(&packet).await;
        if !result.is_success() {
            return Err(CycleError::Submission(result));
        }

        self.cycles_completed += 1;
        Ok(CycleOutcome::Submitted { energy_wh })
    }

    /// Runs cycles until `shutdown` fires, then reports the session counters.
    pub async fn run(&mut self, shutdown: CancellationToken) -> SessionSummary {
        info!(
            meter_id = %self.meter_id(),
            interval_secs = self.settings.interval.as_secs_f64(),
            endpoint = %self.submitter.endpoint_url(),
            "starting smart meter agent"
        );

        tokio::select! {
            biased;
            _ = shutdown.cancelled() => {}
            report = self.diagnostic() => match serde_json::to_string(&report) {
                Ok(json) => info!(diagnostic = %json, "startup diagnostic"),
                Err(e) => warn!("could not encode startup diagnostic: {e}"),
            },
        }

        while !shutdown.is_cancelled() {
            let cycle_start = Instant::now();

            let prepared = tokio::select! {
                biased;
                _ = shutdown.cancelled() => {
                    info!("shutdown requested, abandoning in-flight cycle");
                    break;
                }
                prepared = self.prepare_cycle() => prepared,
            };

            let outcome = match prepared {
                Ok(PreparedCycle::Skipped) => Ok(CycleOutcome::Skipped),
                Ok(PreparedCycle::Ready { .. }) if shutdown.is_cancelled() => {
                    info!("shutdown requested, signed packet not submitted");
                    break;
                }
                // Once on the wire the send runs to completion
                Ok(PreparedCycle::Ready { packet, energy_wh }) => {
                    self.submit(packet, energy_wh).await
                }
                Err(e) => Err(e),
            };

            let pause = match outcome {
                Ok(_) => {
                    let cycle_time = cycle_start.elapsed();
                    match self.settings.interval.checked_sub(cycle_time) {
                        Some(remaining) if !remaining.is_zero() => remaining,
                        _ => {
                            warn!(
                                cycle_secs = cycle_time.as_secs_f64(),
                                "cycle took longer than interval"
                            );
                            Duration::ZERO
                        }
                    }
                }
                Err(e) => {
                    self.cycles_failed += 1;
                    error!(
                        cooldown_secs = self.settings.failure_cooldown.as_secs_f64(),
                        "error in cycle: {e}"
                    );
                    self.settings.failure_cooldown
                }
            };

            self.transition(AgentState::Sleeping);
            tokio::select! {
                biased;
                _ = shutdown.cancelled() => break,
                _ = sleep(pause) => {}
            }
        }

        self.transition(AgentState::Stopped);
        let summary = self.summary();
        info!(
            sent = summary.sent,
            failed = summary.failed,
            cycles_failed = summary.cycles_failed,
            total_wh = summary.cumulative_energy_wh.round(),
            "session complete"
        );
        summary
    }
}
