//! Request and response frames.
//!
//! ```text
//! request:  [0xDD][direction][command][len][payload..][crc hi][crc lo][0x77]
//! response: [0xDD][command][returncode][len][payload..][crc hi][crc lo][0x77]
//! ```

use crate::{checksum, error::ProtocolError, wire, Result};

pub const START_BYTE: u8 = 0xDD;
pub const STOP_BYTE: u8 = 0x77;
/// Start, command, return code and length.
pub const HEADER_LENGTH: usize = 4;
/// Checksum and stop byte.
pub const TRAILER_LENGTH: usize = 3;
/// Largest payload a response may declare.
pub const MAX_PAYLOAD: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Direction {
    Read = 0xA5,
    Write = 0x5A,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Status = 0x03,
    Cells = 0x04,
    Hardware = 0x05,
    Mosfet = 0xE1,
}

pub mod return_code {
    pub const OK: u8 = 0x00;
    pub const ERR: u8 = 0x80;
}

/// A validated response, borrowing its payload from the received bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response<'a> {
    pub command: u8,
    pub return_code: u8,
    pub payload: &'a [u8],
}

impl Response<'_> {
    pub fn is_ok(&self) -> bool {
        self.return_code == return_code::OK
    }
}

/// Builds a complete request frame.
///
/// Fails only if the payload is too long for the checksum.
pub fn encode_request(direction: Direction, command: Command, payload: &[u8]) -> Result<Vec<u8>> {
    let length = u8::try_from(payload.len())
        .map_err(|_| crate::Error::PayloadTooLong(payload.len()))?;
    let crc = checksum::compute(command as u8, length, payload)?;

    let mut tx_buffer = Vec::with_capacity(HEADER_LENGTH + payload.len() + TRAILER_LENGTH);
    tx_buffer.push(START_BYTE);
    tx_buffer.push(direction as u8);
    tx_buffer.push(command as u8);
    tx_buffer.push(length);
    tx_buffer.extend_from_slice(payload);
    tx_buffer.extend_from_slice(&checksum::to_wire_bytes(crc));
    tx_buffer.push(STOP_BYTE);
    Ok(tx_buffer)
}

/// Validates start byte and declared length of a response header and
/// returns the payload length that follows it.
pub fn check_header(header: &[u8; HEADER_LENGTH]) -> std::result::Result<usize, ProtocolError> {
    if header[0] != START_BYTE {
        log::warn!("Invalid start byte - header={:02X?}", header);
        return Err(ProtocolError::BadStart(header[0]));
    }
    let length = header[3];
    if usize::from(length) > MAX_PAYLOAD {
        log::warn!("Invalid length - header={:02X?}", header);
        return Err(ProtocolError::Oversized(length));
    }
    Ok(usize::from(length))
}

/// Validates a complete response frame.
///
/// Checks are applied in wire order: start byte, declared length, completeness,
/// checksum and finally the stop byte. A nonzero return code is *not* an error
/// here, the frame itself is well formed.
pub fn decode_response(rx_buffer: &[u8]) -> std::result::Result<Response<'_>, ProtocolError> {
    let header: &[u8; HEADER_LENGTH] = rx_buffer
        .first_chunk()
        .ok_or(ProtocolError::ShortRead {
            expected: HEADER_LENGTH + TRAILER_LENGTH,
            received: rx_buffer.len(),
        })?;
    let length = check_header(header)?;

    let frame_length = HEADER_LENGTH + length + TRAILER_LENGTH;
    if rx_buffer.len() < frame_length {
        log::warn!(
            "Frame truncated - required={} received={} buffer={:02X?}",
            frame_length,
            rx_buffer.len(),
            rx_buffer
        );
        return Err(ProtocolError::ShortRead {
            expected: frame_length,
            received: rx_buffer.len(),
        });
    }

    let return_code = header[2];
    let payload = &rx_buffer[HEADER_LENGTH..HEADER_LENGTH + length];
    let calculated = checksum::compute(return_code, header[3], payload)
        .map_err(|_| ProtocolError::Unverifiable(header[3]))?;
    let received = wire::read_u16(rx_buffer, HEADER_LENGTH + length);
    if calculated != received {
        log::warn!(
            "Invalid checksum - calculated={:04X?} received={:04X?} buffer={:02X?}",
            calculated,
            received,
            rx_buffer
        );
        return Err(ProtocolError::ChecksumMismatch {
            calculated,
            received,
        });
    }

    let stop = rx_buffer[frame_length - 1];
    if stop != STOP_BYTE {
        log::warn!("Invalid stop byte - buffer={:02X?}", rx_buffer);
        return Err(ProtocolError::BadStop(stop));
    }

    Ok(Response {
        command: header[1],
        return_code,
        payload,
    })
}

#[cfg(test)]
pub(crate) fn encode_response(command: u8, return_code: u8, payload: &[u8]) -> Vec<u8> {
    let length = payload.len() as u8;
    let crc = checksum::compute(return_code, length, payload).unwrap();
    let mut frame = vec![START_BYTE, command, return_code, length];
    frame.extend_from_slice(payload);
    frame.extend_from_slice(&checksum::to_wire_bytes(crc));
    frame.push(STOP_BYTE);
    frame
}
