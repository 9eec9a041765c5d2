use crate::enrich::enrich;
use crate::protocol::{self as proto, DecodedReading, FieldValue};
use crate::scheduler::Mode;
use crate::tokio_common::{Error, Result};
use crate::tokio_sync::{Classic, RegisterReader};
use log::{debug, error, warn};
use std::net::ToSocketAddrs;
use std::time::Duration;

/// Opens connections to the controller.
pub trait Connector {
    type Connection: RegisterReader;

    fn connect(&mut self) -> Result<Self::Connection>;
}

/// MODBUS/TCP connector.
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    unit_id: u8,
    timeout: Duration,
}

impl TcpConnector {
    /// # Examples
    ///
    /// ```no_run
    /// use classic_mqtt_lib::scheduler::Mode;
    /// use classic_mqtt_lib::tokio_sync_client::{DataSource, TcpConnector};
    /// use std::time::Duration;
    ///
    /// # fn main() -> std::result::Result<(), Box<dyn std::error::Error>> {
    /// let connector = TcpConnector::new("192.168.0.225", 502, 10, Duration::from_secs(5));
    /// let mut source = DataSource::new(connector, "192.168.0.225");
    /// let reading = source.fetch(Mode::Snoozing)?;
    /// println!("Charge state: {:?}", reading.text("ChargeStateText"));
    /// # Ok(())
    /// # }
    /// ```
    pub fn new(host: impl Into<String>, port: u16, unit_id: u8, timeout: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            unit_id,
            timeout,
        }
    }
}

impl Connector for TcpConnector {
    type Connection = tokio_modbus::client::sync::Context;

    fn connect(&mut self) -> Result<Self::Connection> {
        let socket_addr = (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    format!("Cannot resolve {}:{}", self.host, self.port),
                )
            })?;
        let mut ctx = tokio_modbus::client::sync::tcp::connect_slave(
            socket_addr,
            tokio_modbus::Slave(self.unit_id),
        )?;
        ctx.set_timeout(Some(self.timeout));
        Ok(ctx)
    }
}

/// Owns the connection to the controller and produces enriched readings.
///
/// The connection is opened lazily and checked with a probe read. It stays open
/// between fetches while awake and is dropped after a snoozing fetch or any
/// transport failure.
pub struct DataSource<C: Connector> {
    connector: C,
    host: String,
    conn: Option<C::Connection>,
}

impl<C: Connector> DataSource<C> {
    pub fn new(connector: C, host: impl Into<String>) -> Self {
        Self {
            connector,
            host: host.into(),
            conn: None,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.is_some()
    }

    /// Drops the connection; the next fetch reconnects and probes again.
    pub fn disconnect(&mut self) {
        if self.conn.take().is_some() {
            debug!("Closing the modbus connection to {}", self.host);
        }
    }

    fn open(&mut self) -> Result<C::Connection> {
        debug!("Opening the modbus connection to {}", self.host);
        let mut conn = self.connector.connect()?;
        if let Err(err) = Classic::probe(&mut conn) {
            error!("MODBUS probe of {} failed: {err}", self.host);
            return Err(err);
        }
        Ok(conn)
    }

    /// Reads all register blocks and returns the merged, enriched reading.
    ///
    /// A block that fails to read is left out of the reading.
    ///
    /// # Errors
    ///
    /// * Connect or probe failures.
    /// * [`Error::NoData`] when no block could be read.
    pub fn fetch(&mut self, mode: Mode) -> Result<DecodedReading> {
        let mut conn = match self.conn.take() {
            Some(conn) => conn,
            None => self.open()?,
        };

        let mut reading = DecodedReading::new();
        let mut blocks_read = 0;
        let mut transport_failed = false;
        for layout in proto::BLOCKS.iter() {
            match Classic::read_block(&mut conn, layout) {
                Ok(block) => {
                    reading.merge(block);
                    blocks_read += 1;
                }
                Err(err) => {
                    warn!("Register block {} unavailable: {err}", layout.address);
                    transport_failed |= err.is_transport();
                }
            }
        }

        if mode == Mode::Awake && !transport_failed {
            self.conn = Some(conn);
        } else {
            debug!("Closing the modbus connection ({mode})");
        }

        if blocks_read == 0 {
            return Err(Error::NoData);
        }
        debug!(
            "Got {blocks_read} of {} blocks from {}",
            proto::BLOCKS.len(),
            self.host
        );
        let mut reading = enrich(reading);
        reading.insert("IP", FieldValue::Text(self.host.clone()));
        Ok(reading)
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::collections::{HashMap, HashSet};
    use std::sync::{Arc, Mutex};

    /// Shared behaviour and call log of the fake device.
    #[derive(Default)]
    pub(crate) struct FakeDevice {
        pub(crate) blocks: HashMap<u16, Vec<u16>>,
        pub(crate) failing: HashSet<u16>,
        pub(crate) refuse_connect: bool,
        pub(crate) connects: usize,
        pub(crate) reads: Vec<u16>,
    }

    impl FakeDevice {
        /// Every block present and zeroed.
        pub(crate) fn zeroed() -> Self {
            let blocks = proto::BLOCKS
                .iter()
                .map(|layout| (layout.address, vec![0u16; layout.quantity as usize]))
                .collect();
            Self {
                blocks,
                ..Default::default()
            }
        }
    }

    #[derive(Clone)]
    pub(crate) struct FakeConnector(pub(crate) Arc<Mutex<FakeDevice>>);

    pub(crate) struct FakeConnection(Arc<Mutex<FakeDevice>>);

    impl RegisterReader for FakeConnection {
        fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
            let mut device = self.0.lock().unwrap();
            device.reads.push(address);
            if device.failing.contains(&address) {
                return Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout").into());
            }
            match device.blocks.get(&address) {
                Some(registers) => Ok(registers.clone()),
                None => Ok(vec![0; quantity as usize]),
            }
        }
    }

    impl Connector for FakeConnector {
        type Connection = FakeConnection;

        fn connect(&mut self) -> Result<FakeConnection> {
            let mut device = self.0.lock().unwrap();
            if device.refuse_connect {
                return Err(std::io::Error::from(std::io::ErrorKind::ConnectionRefused).into());
            }
            device.connects += 1;
            Ok(FakeConnection(self.0.clone()))
        }
    }

    fn data_source(device: FakeDevice) -> (DataSource<FakeConnector>, Arc<Mutex<FakeDevice>>) {
        let device = Arc::new(Mutex::new(device));
        (
            DataSource::new(FakeConnector(device.clone()), "192.168.0.225"),
            device,
        )
    }

    #[test]
    fn probe_then_all_blocks() {
        let (mut source, device) = data_source(FakeDevice::zeroed());
        let reading = source.fetch(Mode::Awake).unwrap();
        assert_eq!(reading.text("IP"), Some("192.168.0.225"));
        assert_eq!(reading.text("ChargeStateText"), Some("Resting"));
        assert_eq!(
            device.lock().unwrap().reads,
            [4163, 4100, 4360, 4163, 4209, 4213, 4243, 16386]
        );
        assert!(source.is_connected());
    }

    #[test]
    fn awake_keeps_and_snoozing_drops_connection() {
        let (mut source, device) = data_source(FakeDevice::zeroed());
        source.fetch(Mode::Awake).unwrap();
        source.fetch(Mode::Awake).unwrap();
        assert_eq!(device.lock().unwrap().connects, 1);

        source.fetch(Mode::Snoozing).unwrap();
        assert!(!source.is_connected());
        source.fetch(Mode::Snoozing).unwrap();
        assert_eq!(device.lock().unwrap().connects, 2);
    }

    #[test]
    fn disconnect_forces_new_probe() {
        let (mut source, device) = data_source(FakeDevice::zeroed());
        source.fetch(Mode::Awake).unwrap();
        source.disconnect();
        assert!(!source.is_connected());
        source.disconnect();
        source.fetch(Mode::Awake).unwrap();
        let device = device.lock().unwrap();
        assert_eq!(device.connects, 2);
        assert_eq!(
            device.reads.iter().filter(|&&a| a == proto::PROBE_REG_ADDR).count(),
            4
        );
    }

    #[test]
    fn failed_block_is_left_out() {
        let mut device = FakeDevice::zeroed();
        device.failing.insert(4360);
        let (mut source, _device) = data_source(device);
        let reading = source.fetch(Mode::Awake).unwrap();
        assert!(reading.contains("BatVoltage"));
        assert!(!reading.contains("SOC"));
        assert!(!reading.contains("SOCicon"));
        // transport failure forces a reconnect
        assert!(!source.is_connected());
    }

    #[test]
    fn wrong_length_block_is_left_out() {
        let mut device = FakeDevice::zeroed();
        device.blocks.insert(4209, vec![0; 2]);
        let (mut source, _device) = data_source(device);
        let reading = source.fetch(Mode::Awake).unwrap();
        assert!(!reading.contains("Name"));
        assert!(reading.contains("MAC"));
        assert!(source.is_connected());
    }

    #[test]
    fn probe_and_connect_failures() {
        let mut device = FakeDevice::zeroed();
        device.refuse_connect = true;
        let (mut source, _device) = data_source(device);
        assert_matches!(source.fetch(Mode::Awake), Err(Error::Io(_)));

        let mut device = FakeDevice::zeroed();
        device.failing.insert(proto::PROBE_REG_ADDR);
        let (mut source, device) = data_source(device);
        assert_matches!(source.fetch(Mode::Awake), Err(Error::Io(_)));
        assert_eq!(device.lock().unwrap().reads, [4163]);
        assert!(!source.is_connected());
    }

    #[test]
    fn every_block_failing_is_no_data() {
        let mut device = FakeDevice::zeroed();
        for layout in proto::BLOCKS.iter() {
            if layout.address != proto::PROBE_REG_ADDR {
                device.failing.insert(layout.address);
            }
        }
        device.blocks.insert(proto::PROBE_REG_ADDR, vec![0; 3]);
        let (mut source, _device) = data_source(device);
        assert_matches!(source.fetch(Mode::Awake), Err(Error::NoData));
    }
}
