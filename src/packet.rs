use std::sync::Arc;

use serde_derive::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::SigningError;
use crate::reading::{now_millis, SensorReading};
use crate::reading_buffer::ReadingBuffer;
use crate::signer::{canonical_bytes, PacketSigner};

pub const FIRMWARE_VERSION: &str = "1.0.0";
pub const PROTOCOL_VERSION: &str = "poe-v1";

/// Who the meter is. `device_id` is derived once and never stored elsewhere.
#[derive(Debug, Clone, PartialEq)]
pub struct DeviceIdentity {
    pub meter_id: String,
    pub manufacturer: String,
    pub serial_number: String,
    device_id: String,
}

impl DeviceIdentity {
    pub fn new(
        meter_id: impl Into<String>,
        manufacturer: impl Into<String>,
        serial_number: impl Into<String>,
    ) -> Self {
        let meter_id = meter_id.into();
        let manufacturer = manufacturer.into();
        let serial_number = serial_number.into();
        let device_info = format!("{meter_id}:{manufacturer}:{serial_number}");
        let device_id = hex::encode(Sha256::digest(device_info.as_bytes()));
        Self {
            meter_id,
            manufacturer,
            serial_number,
            device_id,
        }
    }

    /// Hex SHA-256 of `meter_id:manufacturer:serial_number`
    pub fn device_id(&self) -> &str {
        &self.device_id
    }
}

/// The signed portion of a packet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoERecord {
    pub device_id: String,
    pub timestamp: i64,
    pub energy_wh: u64,
    pub cumulative_energy: u64,
    pub sensor_readings: Vec<SensorReading>,
    pub firmware_version: String,
    pub protocol_version: String,
}

/// A signed Proof-of-Energy record, as posted to the collector.
///
/// Fields are private so nothing can change the record once it has been signed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoEPacket {
    #[serde(flatten)]
    record: PoERecord,
    signature: String,
    meter_id: String,
}

impl PoEPacket {
    pub fn record(&self) -> &PoERecord {
        &self.record
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn meter_id(&self) -> &str {
        &self.meter_id
    }

    pub fn energy_wh(&self) -> u64 {
        self.record.energy_wh
    }

    /// Re-encodes the record and checks the attached signature against it.
    pub fn verify(&self, signer: &dyn PacketSigner) -> bool {
        let Ok(signature) = hex::decode(&self.signature) else {
            return false;
        };
        match canonical_bytes(&self.record) {
            Ok(message) => signer.verify(&message, &signature),
            Err(_) => false,
        }
    }
}

/// Assembles and signs packets for one device.
pub struct PacketBuilder {
    identity: DeviceIdentity,
    signer: Arc<dyn PacketSigner>,
    firmware_version: String,
}

impl PacketBuilder {
    pub fn new(identity: DeviceIdentity, signer: Arc<dyn PacketSigner>) -> Self {
        Self {
            identity,
            signer,
            firmware_version: FIRMWARE_VERSION.to_string(),
        }
    }

    pub fn with_firmware_version(mut self, firmware_version: impl Into<String>) -> Self {
        self.firmware_version = firmware_version.into();
        self
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    pub fn build(
        &self,
        energy_wh_increment: f64,
        cumulative_energy_wh: f64,
        readings: &ReadingBuffer,
    ) -> Result<PoEPacket, SigningError> {
        self.build_at(
            now_millis(),
            energy_wh_increment,
            cumulative_energy_wh,
            readings,
        )
    }

    /// Same as [`PacketBuilder::build`] with an explicit wall-clock timestamp.
    pub fn build_at(
        &self,
        timestamp: i64,
        energy_wh_increment: f64,
        cumulative_energy_wh: f64,
        readings: &ReadingBuffer,
    ) -> Result<PoEPacket, SigningError> {
        self.seal(self.record_at(
            timestamp,
            energy_wh_increment,
            cumulative_energy_wh,
            readings,
        ))
    }

    /// The unsigned record for one interval.
    pub fn record_at(
        &self,
        timestamp: i64,
        energy_wh_increment: f64,
        cumulative_energy_wh: f64,
        readings: &ReadingBuffer,
    ) -> PoERecord {
        PoERecord {
            device_id: self.identity.device_id().to_string(),
            timestamp,
            energy_wh: whole_watt_hours(energy_wh_increment),
            cumulative_energy: whole_watt_hours(cumulative_energy_wh),
            sensor_readings: readings.snapshot(),
            firmware_version: self.firmware_version.clone(),
            protocol_version: PROTOCOL_VERSION.to_string(),
        }
    }

    /// Signs the canonical encoding of `record` and wraps it into a packet.
    pub fn seal(&self, record: PoERecord) -> Result<PoEPacket, SigningError> {
        let message = canonical_bytes(&record)?;
        let signature = hex::encode(self.signer.sign(&message)?);

        // Signature and meter_id go on last, the record is frozen from here
        Ok(PoEPacket {
            record,
            signature,
            meter_id: self.identity.meter_id.clone(),
        })
    }
}

/// Truncates towards zero, negative and non-finite values become 0.
fn whole_watt_hours(energy_wh: f64) -> u64 {
    if energy_wh.is_finite() && energy_wh > 0.0 {
        energy_wh.trunc() as u64
    } else {
        0
    }
}
