use crate::transport::{BmsStream, DirectionControl, SystemClock, Transport};
use crate::{JbdBms, Result};
use serialport::{ClearBuffer, SerialPort};
use std::io;
use std::time::Duration;

pub type SerialJbdBms = JbdBms<Box<dyn SerialPort>, RtsDirection>;

/// Opens `device` with the 8N1 framing the BMS expects.
///
/// `timeout` bounds every read; a reply that does not arrive in time is a short read.
pub fn open(device: &str, baud_rate: u32, timeout: Duration) -> Result<Box<dyn SerialPort>> {
    let port = serialport::new(device, baud_rate)
        .data_bits(serialport::DataBits::Eight)
        .parity(serialport::Parity::None)
        .stop_bits(serialport::StopBits::One)
        .flow_control(serialport::FlowControl::None)
        .timeout(timeout)
        .open()?;
    log::debug!("opened {device} at {baud_rate} baud, timeout {timeout:?}");
    Ok(port)
}

impl BmsStream for Box<dyn SerialPort> {
    fn clear_input(&mut self) -> io::Result<()> {
        let pending = self.bytes_to_read().map_err(io::Error::from)?;
        if pending > 0 {
            log::trace!("Discard {} pending bytes", pending);
            self.clear(ClearBuffer::Input).map_err(io::Error::from)?;
        }
        Ok(())
    }
}

/// Uses the RTS line of the port as DE/!RE of the transceiver.
pub struct RtsDirection {
    port: Box<dyn SerialPort>,
    transmit_level: bool,
}

impl RtsDirection {
    /// `port` is usually a `try_clone()` of the data port.
    /// `transmit_level` is the RTS level that enables the driver.
    pub fn new(port: Box<dyn SerialPort>, transmit_level: bool) -> Self {
        Self {
            port,
            transmit_level,
        }
    }
}

impl DirectionControl for RtsDirection {
    fn set_transmit(&mut self) -> io::Result<()> {
        self.port
            .write_request_to_send(self.transmit_level)
            .map_err(io::Error::from)
    }

    fn set_receive(&mut self) -> io::Result<()> {
        self.port
            .write_request_to_send(!self.transmit_level)
            .map_err(io::Error::from)
    }
}

impl SerialJbdBms {
    /// Opens `device` for a BMS driver.
    ///
    /// With `rts_transmit_level` set, RTS drives DE/!RE and is held at that
    /// level while transmitting. Without it the adapter switches direction by itself.
    pub fn open_serial(
        device: &str,
        baud_rate: u32,
        timeout: Duration,
        rts_transmit_level: Option<bool>,
        command_delay: Duration,
    ) -> Result<Self> {
        let port = open(device, baud_rate, timeout)?;
        match rts_transmit_level {
            Some(level) => {
                let rts = RtsDirection::new(port.try_clone()?, level);
                JbdBms::open_with_direction(port, rts, command_delay)
            }
            None => Ok(JbdBms::from_transport(Transport::with_parts(
                port,
                None,
                SystemClock::default(),
                command_delay,
            ))),
        }
    }
}
