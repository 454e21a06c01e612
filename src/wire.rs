//! Byte order and field packing of the JBD wire format.
//!
//! Every multi byte number travels big endian. Fields are swapped exactly once:
//! after receipt with [`to_host_order`], before transmission with [`to_wire_order`].

use crate::protocol::ProductionDate;

/// Offset between 0.1 K and 0.1 °C.
pub const DECIKELVIN_OFFSET: i32 = 2731;

pub fn to_host_order(value: u16) -> u16 {
    u16::from_be(value)
}

pub fn to_wire_order(value: u16) -> u16 {
    value.to_be()
}

/// Reads the big endian field at `offset`. Callers check the length beforehand.
pub fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    to_host_order(u16::from_ne_bytes([bytes[offset], bytes[offset + 1]]))
}

/// Signed fields are swapped as their unsigned bit pattern.
pub fn read_i16(bytes: &[u8], offset: usize) -> i16 {
    read_u16(bytes, offset) as i16
}

/// Unpacks `|7 bit year since 2000|4 bit month|5 bit day|`.
pub fn decode_date(value: u16) -> ProductionDate {
    ProductionDate {
        year: 2000 + (value >> 9),
        month: ((value >> 5) & 0x0F) as u8,
        day: (value & 0x1F) as u8,
    }
}

/// Converts 0.1 K to 0.1 °C, saturating above 3276.7 °C.
pub fn decode_temperature(raw: u16) -> i16 {
    i16::try_from(i32::from(raw) - DECIKELVIN_OFFSET).unwrap_or(i16::MAX)
}
