//! Half duplex command execution on a byte stream.

use crate::frame::{self, Command, Direction, HEADER_LENGTH, TRAILER_LENGTH};
use crate::{Error, Result};
use std::io::{self, Read, Write};
use std::time::{Duration, Instant};

/// Byte stream to the BMS.
pub trait BmsStream: Read + Write {
    /// Drops bytes that arrived outside of a command, e.g. the tail of a
    /// reply that was given up on.
    fn clear_input(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl BmsStream for std::net::TcpStream {}

impl<T: BmsStream + ?Sized> BmsStream for &mut T {
    fn clear_input(&mut self) -> io::Result<()> {
        (**self).clear_input()
    }
}

/// Drives the DE/!RE line of an RS485 transceiver.
pub trait DirectionControl {
    fn set_transmit(&mut self) -> io::Result<()>;
    fn set_receive(&mut self) -> io::Result<()>;
}

/// Used when the RS485 adapter switches direction by itself. It has no
/// values, a transport of this type never toggles anything.
#[derive(Debug)]
pub enum AutoDirection {}

impl DirectionControl for AutoDirection {
    fn set_transmit(&mut self) -> io::Result<()> {
        match *self {}
    }

    fn set_receive(&mut self) -> io::Result<()> {
        match *self {}
    }
}

/// Wrapping millisecond clock.
pub trait Clock {
    fn now_ms(&self) -> u32;
    fn sleep_ms(&mut self, ms: u32);
}

#[derive(Debug, Clone)]
pub struct SystemClock {
    origin: Instant,
}

impl Default for SystemClock {
    fn default() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Clock for SystemClock {
    fn now_ms(&self) -> u32 {
        // truncation wraps after ~49 days, elapsed times use wrapping_sub
        self.origin.elapsed().as_millis() as u32
    }

    fn sleep_ms(&mut self, ms: u32) {
        std::thread::sleep(Duration::from_millis(u64::from(ms)));
    }
}

/// Reads until `buf` is full, the stream ends or the read times out.
fn read_full<S: Read + ?Sized>(stream: &mut S, buf: &mut [u8]) -> Result<usize> {
    let mut received = 0;
    while received < buf.len() {
        match stream.read(&mut buf[received..]) {
            Ok(0) => break,
            Ok(n) => received += n,
            Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
            Err(err) if err.kind() == io::ErrorKind::TimedOut => {
                log::debug!("Read timed out after {} of {} bytes", received, buf.len());
                break;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(received)
}

/// Owns the bus: the stream, the optional direction line and the time the
/// last command finished.
#[derive(Debug)]
pub struct Transport<S, D = AutoDirection, C = SystemClock> {
    stream: S,
    direction: Option<D>,
    clock: C,
    delay_ms: u32,
    last_command: u32,
}

impl<S: BmsStream> Transport<S> {
    pub fn new(stream: S, command_delay: Duration) -> Self {
        Self::with_parts(stream, None, SystemClock::default(), command_delay)
    }
}

impl<S: BmsStream, D: DirectionControl> Transport<S, D> {
    /// Puts the direction line into receive mode right away.
    pub fn with_direction(stream: S, direction: D, command_delay: Duration) -> Result<Self> {
        let mut transport =
            Self::with_parts(stream, Some(direction), SystemClock::default(), command_delay);
        transport.release_bus()?;
        Ok(transport)
    }
}

impl<S: BmsStream, D: DirectionControl, C: Clock> Transport<S, D, C> {
    pub fn with_parts(stream: S, direction: Option<D>, clock: C, command_delay: Duration) -> Self {
        let delay_ms = delay_to_ms(command_delay);
        // the first command must not wait
        let last_command = clock.now_ms().wrapping_sub(delay_ms);
        Self {
            stream,
            direction,
            clock,
            delay_ms,
            last_command,
        }
    }

    pub fn set_delay(&mut self, command_delay: Duration) {
        self.delay_ms = delay_to_ms(command_delay);
        log::trace!("set delay to {}ms", self.delay_ms);
    }

    pub fn delay(&self) -> Duration {
        Duration::from_millis(u64::from(self.delay_ms))
    }

    pub fn has_direction_control(&self) -> bool {
        self.direction.is_some()
    }

    pub fn stream(&self) -> &S {
        &self.stream
    }

    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    pub fn into_inner(self) -> (S, Option<D>) {
        (self.stream, self.direction)
    }

    /// Sends one command and receives its reply.
    ///
    /// The reply payload is copied into `result`, which must hold at least the
    /// length the device declares. Returns the payload length.
    pub fn execute(
        &mut self,
        direction: Direction,
        command: Command,
        payload: &[u8],
        result: &mut [u8],
    ) -> Result<usize> {
        let tx_buffer = frame::encode_request(direction, command, payload)?;
        self.await_delay();
        let outcome = self.transfer(command, &tx_buffer, result);
        // failed commands occupy the bus as well
        self.last_command = self.clock.now_ms();
        if let Err(err) = &outcome {
            log::debug!("Command {:?} failed: {}", command, err);
        }
        outcome
    }

    fn await_delay(&mut self) {
        let elapsed = self.clock.now_ms().wrapping_sub(self.last_command);
        if elapsed < self.delay_ms {
            let remaining = self.delay_ms - elapsed;
            log::trace!("wait {}ms before next command", remaining);
            self.clock.sleep_ms(remaining);
        }
    }

    fn transfer(&mut self, command: Command, tx_buffer: &[u8], result: &mut [u8]) -> Result<usize> {
        self.stream.clear_input()?;

        let sent = self.send_bytes(tx_buffer);
        // the line goes back to receive even if the write failed
        let released = self.release_bus();
        sent?;
        released?;

        self.receive_reply(command, result)
    }

    fn send_bytes(&mut self, tx_buffer: &[u8]) -> Result<()> {
        if let Some(direction) = &mut self.direction {
            direction.set_transmit().map_err(Error::DirectionControl)?;
        }

        log::trace!("write bytes: {:02X?}", tx_buffer);
        let written = self.stream.write(tx_buffer);
        // the last stop bit has to leave the UART before the direction switches,
        // also after a partial write
        let flushed = self.stream.flush();
        let written = written?;
        if written != tx_buffer.len() {
            log::warn!(
                "Short write - written={} expected={}",
                written,
                tx_buffer.len()
            );
            return Err(Error::ShortWrite {
                written,
                expected: tx_buffer.len(),
            });
        }
        flushed?;
        Ok(())
    }

    fn release_bus(&mut self) -> Result<()> {
        if let Some(direction) = &mut self.direction {
            direction.set_receive().map_err(Error::DirectionControl)?;
        }
        Ok(())
    }

    fn receive_reply(&mut self, command: Command, result: &mut [u8]) -> Result<usize> {
        let mut header = [0; HEADER_LENGTH];
        let received = read_full(&mut self.stream, &mut header)?;
        if received < HEADER_LENGTH {
            log::warn!("Short header - received={:02X?}", &header[..received]);
            return Err(Error::ShortRead {
                received,
                expected: HEADER_LENGTH,
            });
        }

        let length = frame::check_header(&header)?;
        if length > result.len() {
            return Err(Error::BufferTooSmall {
                required: length,
                capacity: result.len(),
            });
        }

        let mut rx_buffer = vec![0; HEADER_LENGTH + length + TRAILER_LENGTH];
        rx_buffer[..HEADER_LENGTH].copy_from_slice(&header);
        let received = read_full(&mut self.stream, &mut rx_buffer[HEADER_LENGTH..])?;
        rx_buffer.truncate(HEADER_LENGTH + received);
        log::trace!("receive_bytes: {:02X?}", rx_buffer);

        let response = frame::decode_response(&rx_buffer)?;
        if response.command != command as u8 {
            log::debug!(
                "Reply echoes command {:#04x} instead of {:#04x}",
                response.command,
                command as u8
            );
        }
        if !response.is_ok() {
            log::warn!(
                "Command {:#04x} rejected with return code {:#04x}",
                command as u8,
                response.return_code
            );
            return Err(Error::Device {
                command: command as u8,
                code: response.return_code,
            });
        }

        result[..response.payload.len()].copy_from_slice(response.payload);
        Ok(response.payload.len())
    }
}

fn delay_to_ms(delay: Duration) -> u32 {
    u32::try_from(delay.as_millis()).unwrap_or(u32::MAX)
}
