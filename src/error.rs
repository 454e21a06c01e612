/// Reasons a response frame, or the payload inside it, is rejected.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("invalid start byte {0:#04x}")]
    BadStart(u8),
    #[error("declared length {0} exceeds the 64 byte frame limit")]
    Oversized(u8),
    #[error("frame truncated - required={expected} received={received}")]
    ShortRead { expected: usize, received: usize },
    #[error("checksum mismatch - calculated={calculated:#06x} received={received:#06x}")]
    ChecksumMismatch { calculated: u16, received: u16 },
    #[error("invalid stop byte {0:#04x}")]
    BadStop(u8),
    /// The checksum routine refuses regions of 31 bytes or more.
    #[error("payload of {0} bytes is too long to verify its checksum")]
    Unverifiable(u8),
    #[error("reply too short for record - required={required} received={received}")]
    ReplySize { required: usize, received: usize },
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("short write - written={written} expected={expected}")]
    ShortWrite { written: usize, expected: usize },
    #[error("short read - received={received} expected={expected}")]
    ShortRead { received: usize, expected: usize },
    #[error("result buffer too small - required={required} capacity={capacity}")]
    BufferTooSmall { required: usize, capacity: usize },
    #[error("cannot switch bus direction: {0}")]
    DirectionControl(std::io::Error),
    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),
    #[error("device rejected command {command:#04x} with return code {code:#04x}")]
    Device { command: u8, code: u8 },
    #[error("payload of {0} bytes exceeds the checksum limit")]
    PayloadTooLong(usize),
    #[cfg(feature = "serialport")]
    #[error("serial port error: {0}")]
    Serial(#[from] serialport::Error),
}

impl Error {
    /// True when the device answered with a well formed frame but refused the command.
    pub fn is_device_error(&self) -> bool {
        matches!(self, Error::Device { .. })
    }
}

pub type Result<T> = std::result::Result<T, Error>;
