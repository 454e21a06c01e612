use crate::frame::Direction;
use crate::protocol::*;
use crate::transport::{AutoDirection, BmsStream, Clock, DirectionControl, SystemClock, Transport};
use crate::Result;
use std::time::Duration;

/// A JBD BMS on a half duplex bus.
///
/// Every command blocks until the reply is validated or has failed. There are
/// no retries; poll again on the next cycle.
#[derive(Debug)]
pub struct JbdBms<S, D = AutoDirection, C = SystemClock> {
    transport: Transport<S, D, C>,
    temperature_order: TemperatureOrder,
}

impl<S: BmsStream> JbdBms<S> {
    /// For RS485 adapters that switch direction by themselves.
    pub fn open(stream: S, command_delay: Duration) -> Self {
        Self::from_transport(Transport::new(stream, command_delay))
    }
}

impl<S: BmsStream, D: DirectionControl> JbdBms<S, D> {
    /// For RS485 adapters with an explicit DE/!RE line.
    pub fn open_with_direction(stream: S, direction: D, command_delay: Duration) -> Result<Self> {
        Ok(Self::from_transport(Transport::with_direction(
            stream,
            direction,
            command_delay,
        )?))
    }
}

impl<S: BmsStream, D: DirectionControl, C: Clock> JbdBms<S, D, C> {
    pub fn from_transport(transport: Transport<S, D, C>) -> Self {
        Self {
            transport,
            temperature_order: TemperatureOrder::default(),
        }
    }

    pub fn set_delay(&mut self, delay: Duration) {
        self.transport.set_delay(delay);
    }

    pub fn set_temperature_order(&mut self, order: TemperatureOrder) {
        self.temperature_order = order;
    }

    pub fn transport(&self) -> &Transport<S, D, C> {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut Transport<S, D, C> {
        &mut self.transport
    }

    pub fn into_transport(self) -> Transport<S, D, C> {
        self.transport
    }

    /// Voltage, current, capacities, balance and fault bits, mosfets and temperatures.
    pub fn get_status(&mut self) -> Result<Status> {
        log::trace!("get status");
        let mut rx_buffer = [0; Status::CAPACITY];
        let len = self
            .transport
            .execute(Direction::Read, Status::COMMAND, &[], &mut rx_buffer)?;
        Status::decode(&rx_buffer[..len], self.temperature_order)
    }

    /// Cell voltages in mV. Only the first [`Status::cells`] are meaningful.
    pub fn get_cells(&mut self) -> Result<CellVoltages> {
        log::trace!("get cell voltages");
        let mut rx_buffer = [0; CellVoltages::CAPACITY];
        let len = self
            .transport
            .execute(Direction::Read, CellVoltages::COMMAND, &[], &mut rx_buffer)?;
        CellVoltages::decode(&rx_buffer[..len])
    }

    pub fn get_hardware(&mut self) -> Result<HardwareId> {
        log::trace!("get hardware id");
        let mut rx_buffer = [0; HardwareId::CAPACITY];
        let len = self
            .transport
            .execute(Direction::Read, HardwareId::COMMAND, &[], &mut rx_buffer)?;
        HardwareId::decode(&rx_buffer[..len])
    }

    /// Switches the charge and discharge mosfets.
    pub fn set_mosfet_status(&mut self, mask: MosfetMask) -> Result<()> {
        log::trace!("set mosfets to {mask}");
        self.transport.execute(
            Direction::Write,
            MosfetMask::COMMAND,
            &mask.payload(),
            &mut [],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::{encode_response, return_code};
    use crate::transport::tests::{Event, FakeClock, MockStream, RecordingLine};
    use crate::{Error, ProtocolError};

    fn bms(clock: &FakeClock, replies: Vec<Vec<u8>>) -> JbdBms<MockStream, RecordingLine, FakeClock> {
        JbdBms::from_transport(Transport::with_parts(
            MockStream::new(clock, replies),
            Some(RecordingLine(clock.log.clone())),
            clock.clone(),
            Duration::from_millis(20),
        ))
    }

    fn written(clock: &FakeClock) -> Vec<Vec<u8>> {
        clock
            .log
            .borrow()
            .iter()
            .filter_map(|event| match event {
                Event::Write(_, bytes) => Some(bytes.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn get_cells() {
        let clock = FakeClock::default();
        let reply = encode_response(0x04, return_code::OK, &[0x0D, 0x05, 0x0D, 0x07]);
        let mut bms = bms(&clock, vec![reply]);

        let cells = bms.get_cells().unwrap();
        assert_eq!(cells.as_slice(), &[3333, 3335]);
        assert_eq!(
            written(&clock),
            vec![vec![0xDD, 0xA5, 0x04, 0x00, 0xFF, 0xFC, 0x77]]
        );
    }

    #[test]
    fn get_hardware() {
        let clock = FakeClock::default();
        let reply = encode_response(0x05, return_code::OK, b"SP04S020");
        let mut bms = bms(&clock, vec![reply]);

        assert_eq!(bms.get_hardware().unwrap().as_str(), Some("SP04S020"));
    }

    #[test]
    fn set_mosfet_status() {
        let clock = FakeClock::default();
        let reply = encode_response(0xE1, return_code::OK, &[]);
        let mut bms = bms(&clock, vec![reply]);

        bms.set_mosfet_status(MosfetMask::Charge).unwrap();
        assert_eq!(
            written(&clock),
            vec![vec![0xDD, 0x5A, 0xE1, 0x02, 0x00, 0x01, 0xFF, 0x1C, 0x77]]
        );
    }

    #[test]
    fn get_status_short_reply() {
        let clock = FakeClock::default();
        let reply = encode_response(0x03, return_code::OK, &[0; 10]);
        let mut bms = bms(&clock, vec![reply]);

        assert!(matches!(
            bms.get_status(),
            Err(Error::Protocol(ProtocolError::ReplySize {
                required: 23,
                received: 10
            }))
        ));
    }

    #[test]
    fn failure_does_not_poison_next_command() {
        let clock = FakeClock::default();
        let mut garbled = encode_response(0x05, return_code::OK, b"X");
        garbled[4] ^= 0x01;
        let good = encode_response(0x05, return_code::OK, b"X");
        let mut bms = bms(&clock, vec![garbled, good]);

        assert!(matches!(
            bms.get_hardware(),
            Err(Error::Protocol(ProtocolError::ChecksumMismatch { .. }))
        ));
        assert_eq!(bms.get_hardware().unwrap().to_string(), "X");
    }

    #[test]
    fn open_with_direction_releases_the_bus_first() {
        let clock = FakeClock::default();
        let reply = encode_response(0x05, return_code::OK, b"X");
        let mut bms = JbdBms::open_with_direction(
            MockStream::new(&clock, vec![reply]),
            RecordingLine(clock.log.clone()),
            Duration::ZERO,
        )
        .unwrap();
        assert_eq!(*clock.log.borrow(), vec![Event::Receive]);

        bms.get_hardware().unwrap();
        assert_eq!(
            &clock.log.borrow()[..6],
            &[
                Event::Receive,
                Event::Clear,
                Event::Transmit,
                Event::Write(0, vec![0xDD, 0xA5, 0x05, 0x00, 0xFF, 0xFB, 0x77]),
                Event::Flush,
                Event::Receive,
            ]
        );
    }
}
