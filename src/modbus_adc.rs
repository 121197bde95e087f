use std::future::Future;
use std::net::SocketAddr;
use std::time::Duration;

use tokio::time::{sleep, timeout};
use tokio_modbus::prelude::*;
use tracing::{debug, warn};

use crate::reading::{now_millis, SensorReading};
use crate::sensor::{AdcSample, Calibration, SensorSource};

pub const DEFAULT_HARDWARE_TIMEOUT: Duration = Duration::from_secs(2);
const MAX_CONNECT_ATTEMPTS: u32 = 3;
/// voltage, current, temperature, humidity
const CHANNEL_COUNT: u16 = 4;

/// Reads the meter's transducers through a Modbus-TCP ADC bridge.
///
/// Input registers starting at `base_register`:
/// 0 voltage channel count, 1 current channel count (both signed 16 bit),
/// 2 temperature in 0.1 °C (signed), 3 relative humidity in 0.1 %.
pub struct ModbusAdcSource {
    target_address: SocketAddr,
    unit_id: u8,
    base_register: u16,
    calibration: Calibration,
    hardware_timeout: Duration,
    connection: Option<client::Context>,
}

impl ModbusAdcSource {
    pub fn new(
        target_address: SocketAddr,
        unit_id: u8,
        base_register: u16,
        calibration: Calibration,
    ) -> Self {
        Self {
            target_address,
            unit_id,
            base_register,
            calibration,
            hardware_timeout: DEFAULT_HARDWARE_TIMEOUT,
            connection: None,
        }
    }

    pub fn with_hardware_timeout(mut self, hardware_timeout: Duration) -> Self {
        self.hardware_timeout = hardware_timeout;
        self
    }

    /// Reads one sample, reconnecting first if the previous read dropped the link.
    ///
    /// The connection is taken out for the duration of the request, so a read
    /// cancelled halfway leaves no half-answered transaction behind.
    async fn read_sample(&mut self) -> Result<AdcSample, String> {
        let mut connection = match self.connection.take() {
            Some(connection) => connection,
            None => self
                .connect_with_retry()
                .await
                .ok_or("ADC bridge unreachable")?,
        };

        // On error the connection is dropped, forcing a reconnect next time
        let sample = self.read_channels(&mut connection).await?;
        self.connection = Some(connection);
        Ok(sample)
    }

    /// Whether a bridge connection is currently held open.
    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    fn connect_with_retry(&self) -> impl Future<Output = Option<client::Context>> + Send {
        let target_address = self.target_address;
        let unit_id = self.unit_id;
        let hardware_timeout = self.hardware_timeout;
        async move {
            for attempt in 1..=MAX_CONNECT_ATTEMPTS {
                debug!(
                    address = %target_address,
                    attempt, "connecting to ADC bridge"
                );

                let connect = tcp::connect_slave(target_address, Slave(unit_id));
                match timeout(hardware_timeout, connect).await {
                    Ok(Ok(connection)) => return Some(connection),
                    Ok(Err(e)) => warn!(attempt, "ADC bridge connection failed: {e}"),
                    Err(_) => warn!(attempt, "ADC bridge connection timed out"),
                }
                if attempt < MAX_CONNECT_ATTEMPTS {
                    sleep(Duration::from_millis(100 << (attempt - 1))).await; // Exponential backoff
                }
            }

            None
        }
    }

    fn read_channels<'a>(
        &self,
        connection: &'a mut client::Context,
    ) -> impl Future<Output = Result<AdcSample, String>> + Send + 'a {
        let hardware_timeout = self.hardware_timeout;
        let base_register = self.base_register;
        async move {
            let registers = match timeout(
                hardware_timeout,
                connection.read_input_registers(base_register, CHANNEL_COUNT),
            )
            .await
            {
                Ok(Ok(Ok(registers))) => registers,
                Ok(Ok(Err(exception))) => return Err(format!("Modbus exception: {exception:?}")),
                Ok(Err(io_error)) => return Err(format!("IO error: {io_error:?}")),
                Err(_) => return Err("ADC read timed out".to_string()),
            };

            decode_channels(&registers)
        }
    }
}

impl SensorSource for ModbusAdcSource {
    async fn read(&mut self) -> SensorReading {
        let timestamp = now_millis();
        match self.read_sample().await {
            Ok(sample) => {
                let reading = self.calibration.apply(sample, timestamp);
                debug!(?reading, "sensor reading");
                reading
            }
            Err(e) => {
                warn!(address = %self.target_address, "error reading sensors: {e}");
                SensorReading::unavailable(timestamp)
            }
        }
    }
}

/// Registers carry two's-complement values for the signed channels.
fn decode_channels(registers: &[u16]) -> Result<AdcSample, String> {
    match registers {
        [voltage, current, temperature, humidity, ..] => Ok(AdcSample {
            voltage_raw: *voltage as i16,
            current_raw: *current as i16,
            temperature_decis: *temperature as i16,
            humidity_decis: *humidity,
        }),
        _ => Err(format!(
            "expected {CHANNEL_COUNT} registers, got {}",
            registers.len()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_channels() {
        let sample = decode_channels(&[16384, 1000, 253, 471]).unwrap();
        assert_eq!(sample.voltage_raw, 16384);
        assert_eq!(sample.current_raw, 1000);
        assert_eq!(sample.temperature_decis, 253);
        assert_eq!(sample.humidity_decis, 471);
    }

    #[test]
    fn test_decode_negative_channels() {
        let sample = decode_channels(&[0xFFFF, 0xFF38, (-55i16) as u16, 0]).unwrap();
        assert_eq!(sample.voltage_raw, -1);
        assert_eq!(sample.current_raw, -200);
        assert_eq!(sample.temperature_decis, -55);
    }

    #[test]
    fn test_decode_short_response() {
        assert!(decode_channels(&[1, 2]).is_err());
        assert!(decode_channels(&[]).is_err());
    }

    #[tokio::test]
    async fn test_unreachable_bridge_returns_sentinel() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let mut source = ModbusAdcSource::new(addr, 1, 0, Calibration::default())
            .with_hardware_timeout(Duration::from_millis(200));
        let reading = source.read().await;

        assert!(reading.is_fault());
        assert_eq!(reading.current, 0.0);
        assert_eq!(reading.power_factor, 0.0);
        assert!(reading.timestamp > 0);
        assert!(!source.is_connected());
    }

    #[tokio::test]
    async fn test_cancelled_read_drops_connection() {
        // Accepts connections but never answers
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let mut held = Vec::new();
            while let Ok((stream, _)) = listener.accept().await {
                held.push(stream);
            }
        });

        let mut source = ModbusAdcSource::new(addr, 1, 0, Calibration::default());
        let cancelled = timeout(Duration::from_millis(300), source.read()).await;

        assert!(cancelled.is_err());
        assert!(!source.is_connected());
    }
}
