//! A library for reading a Midnite Classic solar charge controller via MODBUS/TCP
//! and publishing its data.
//!
//! The crate is layered:
//!
//! 1.  **Protocol**: the register block layouts and a decoder turning raw
//!     registers into named values, see [`protocol`]. [`enrich`] derives the
//!     human readable fields (texts, icons, dates, MAC address).
//! 2.  **Device access**: stateless register reads in [`tokio_sync`] and the
//!     connection owning [`tokio_sync_client::DataSource`].
//! 3.  **Publishing**: the adaptive rate [`scheduler`], the JSON [`payload`]s,
//!     the broker independent [`publisher`] and the [`supervisor`] driving the
//!     periodic loop. Inbound commands are parsed by [`command`].
//!
//! ## Quick Start
//!
//! ```no_run
//! use classic_mqtt_lib::scheduler::Mode;
//! use classic_mqtt_lib::tokio_sync_client::{DataSource, TcpConnector};
//! use std::time::Duration;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let connector = TcpConnector::new("192.168.0.225", 502, 10, Duration::from_secs(5));
//!     let mut source = DataSource::new(connector, "192.168.0.225");
//!     let reading = source.fetch(Mode::Awake)?;
//!
//!     println!("{}", classic_mqtt_lib::payload::readings_json(&reading)?);
//!     Ok(())
//! }
//! ```

pub mod command;
pub mod enrich;
pub mod payload;
pub mod protocol;
pub mod publisher;
pub mod scheduler;

#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_common;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_sync;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod tokio_sync_client;

#[cfg_attr(docsrs, doc(cfg(feature = "tokio-tcp-sync")))]
#[cfg(feature = "tokio-tcp-sync")]
pub mod supervisor;
