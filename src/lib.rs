#![cfg_attr(docsrs, feature(doc_cfg))]
//! # jbdbms_lib
//!
//! Driver for JBD (Jiabaida) battery management systems on an RS485 or UART link.
//!
//! The BMS answers four commands: status, cell voltages, hardware id and a
//! write command switching the charge/discharge mosfets. Communication is half
//! duplex with one outstanding command at a time.
//!
//! ```no_run
//! # #[cfg(feature = "serialport")]
//! # fn main() -> Result<(), jbdbms_lib::Error> {
//! use jbdbms_lib::{serialport, JbdBms, DEFAULT_DELAY};
//! use std::time::Duration;
//!
//! let port = serialport::open("/dev/ttyUSB0", 9600, Duration::from_millis(500))?;
//! let mut bms = JbdBms::open(port, DEFAULT_DELAY);
//! let status = bms.get_status()?;
//! println!("{} x 10mV, {} %", status.voltage, status.state_of_charge);
//! # Ok(())
//! # }
//! # #[cfg(not(feature = "serialport"))]
//! # fn main() {}
//! ```
//!
//! ## Features
//!
//! - `default`: Enables `bin-dependencies`, which is intended for compiling the `jbdbms` command-line tool and pulls in `serialport` and `serde`.
//! - `serialport`: Serial port backend with RTS direction control using the `serialport` crate.
//! - `serde`: Enables `serde` support for the record types.

pub mod checksum;
mod client;
mod error;
pub mod frame;
/// Records exchanged with the BMS.
pub mod protocol;
pub mod transport;
pub mod wire;

pub use client::JbdBms;
pub use error::{Error, ProtocolError, Result};
pub use protocol::{
    CellVoltages, Fault, HardwareId, MosfetMask, ProductionDate, Status, TemperatureOrder,
    DEFAULT_DELAY,
};
pub use transport::{AutoDirection, BmsStream, Clock, DirectionControl, SystemClock, Transport};

/// Serial port backend.
#[cfg_attr(docsrs, doc(cfg(feature = "serialport")))]
#[cfg(feature = "serialport")]
pub mod serialport;
