use crate::{wire, Error, Result};

/// Regions of this many bytes or more are refused by [`compute`].
pub const CHECKSUM_LIMIT: usize = 31;

/// Computes the 16 bit frame checksum: the two's complement of
/// `byte + length + sum(data)`.
///
/// `byte` is the command for requests and the return code for responses.
/// `length` has to describe `data` exactly.
pub fn compute(byte: u8, length: u8, data: &[u8]) -> Result<u16> {
    let len = usize::from(length);
    if len >= CHECKSUM_LIMIT || len != data.len() {
        log::warn!(
            "Cannot calculate checksum - length={} data={}",
            length,
            data.len()
        );
        return Err(Error::PayloadTooLong(len.max(data.len())));
    }
    let sum = data
        .iter()
        .fold(u16::from(byte).wrapping_add(u16::from(length)), |acc, b| {
            acc.wrapping_add(u16::from(*b))
        });
    Ok(sum.wrapping_neg())
}

/// The checksum as it is placed on the wire, high byte first.
pub fn to_wire_bytes(checksum: u16) -> [u8; 2] {
    wire::to_wire_order(checksum).to_ne_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_request_checksums() {
        assert_eq!(compute(0x03, 0, &[]).unwrap(), 0xFFFD);
        assert_eq!(compute(0x04, 0, &[]).unwrap(), 0xFFFC);
        assert_eq!(compute(0x05, 0, &[]).unwrap(), 0xFFFB);
    }

    #[test]
    fn mosfet_request_checksum() {
        assert_eq!(compute(0xE1, 2, &[0x00, 0x03]).unwrap(), 0xFF1A);
        assert_eq!(to_wire_bytes(0xFF1A), [0xFF, 0x1A]);
    }

    #[test]
    fn sum_wraps_at_16_bits() {
        let data = [0xFF; 30];
        // 0x00 + 30 + 30 * 0xFF = 0x1E + 0x1DE2
        assert_eq!(compute(0x00, 30, &data).unwrap(), 0x1E00u16.wrapping_neg());
    }

    #[test]
    fn zero_sum_gives_zero() {
        assert_eq!(compute(0x00, 0, &[]).unwrap(), 0);
    }

    #[test]
    fn refuses_regions_at_the_limit() {
        assert!(compute(0x03, 30, &[0; 30]).is_ok());
        assert!(matches!(
            compute(0x03, 31, &[0; 31]),
            Err(Error::PayloadTooLong(31))
        ));
    }

    #[test]
    fn refuses_missing_data() {
        assert!(matches!(
            compute(0x03, 2, &[]),
            Err(Error::PayloadTooLong(2))
        ));
    }

    #[test]
    fn return_code_is_covered() {
        assert_ne!(
            compute(0x00, 2, &[0x01, 0x02]).unwrap(),
            compute(0x80, 2, &[0x01, 0x02]).unwrap()
        );
    }
}
