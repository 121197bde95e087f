//! Proof-of-Energy Smart Meter Agent
//!
//! Samples a meter's voltage and current on a fixed period, integrates the
//! readings into energy, and submits each interval as a signed
//! Proof-of-Energy packet to a remote collector.

pub mod agent;
pub mod config;
pub mod diagnostic;
pub mod energy;
pub mod error;
pub mod modbus_adc;
pub mod packet;
pub mod reading;
pub mod reading_buffer;
pub mod sensor;
pub mod signer;
pub mod submitter;

// Re-export commonly used types for easier access
pub use agent::{AgentSettings, AgentState, CycleOutcome, MeterAgent, SessionSummary};
pub use config::AgentConfig;
pub use diagnostic::DiagnosticReport;
pub use energy::EnergyIntegrator;
pub use packet::{DeviceIdentity, PacketBuilder, PoEPacket};
pub use reading::SensorReading;
pub use sensor::{SensorSource, SimulatedSource};
pub use signer::{PacketSigner, Secp256k1Signer};
pub use submitter::{SubmissionResult, Submitter};
