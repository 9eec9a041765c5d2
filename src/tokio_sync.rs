//! Synchronous `tokio-modbus` access to the Classic charge controller.
//!
//! The functions here are stateless; the connection is passed in by the caller.
//! Anything implementing [`RegisterReader`] can be used, which is how the data
//! source is exercised without a device.
//!
//! ```no_run
//! use classic_mqtt_lib::protocol::STATUS_BLOCK;
//! use classic_mqtt_lib::tokio_sync::Classic;
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let socket_addr = "192.168.0.225:502".parse()?;
//!     let slave = tokio_modbus::Slave(10);
//!     let mut modbus_ctx = tokio_modbus::client::sync::tcp::connect_slave(socket_addr, slave)?;
//!     modbus_ctx.set_timeout(Some(Duration::from_secs(5)));
//!
//!     Classic::probe(&mut modbus_ctx)?;
//!     let status = Classic::read_block(&mut modbus_ctx, &STATUS_BLOCK)?;
//!     println!("Battery: {:?} V", status.float("BatVoltage"));
//!     Ok(())
//! }
//! ```

use crate::{protocol as proto, tokio_common::Result};
use tokio_modbus::prelude::SyncReader;

/// Reads a run of holding registers.
pub trait RegisterReader {
    fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>>;
}

impl RegisterReader for tokio_modbus::client::sync::Context {
    fn read_registers(&mut self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        Classic::map_tokio_result(self.read_holding_registers(address, quantity))
    }
}

/// Stateless register access for the Classic.
#[derive(Debug)]
pub struct Classic;

impl Classic {
    /// Helper function to map tokio result to our result.
    fn map_tokio_result<T>(result: tokio_modbus::Result<T>) -> Result<T> {
        match result {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err)) => Err(err.into()), // Modbus exception
            Err(err) => Err(err.into()),     // IO error
        }
    }

    /// Reads the MPPT mode registers to check that a connection answers.
    pub fn probe<R: RegisterReader + ?Sized>(ctx: &mut R) -> Result<()> {
        ctx.read_registers(proto::PROBE_REG_ADDR, proto::PROBE_REG_QUAN)
            .map(|_| ())
    }

    /// Reads one register block and decodes it.
    ///
    /// # Errors
    ///
    /// * Transport and MODBUS exception errors from the read.
    /// * [`proto::Error`] when the device returns a different register count.
    pub fn read_block<R: RegisterReader + ?Sized>(
        ctx: &mut R,
        layout: &proto::BlockLayout,
    ) -> Result<proto::DecodedReading> {
        let registers = ctx.read_registers(layout.address, layout.quantity)?;
        Ok(proto::decode(layout, &registers)?)
    }
}
