use crate::error::ProtocolError;
use crate::frame::{Command, MAX_PAYLOAD};
use crate::{wire, Result};
use std::fmt;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

// Some USB - RS485 dongles need a few milliseconds to switch between TX and RX
pub const DEFAULT_DELAY: std::time::Duration = std::time::Duration::from_millis(20);

pub const MAX_CELLS: usize = 32;
pub const HARDWARE_ID_CAPACITY: usize = 32;

macro_rules! read_bit {
    ($value:expr,$position:expr) => {
        ($value >> $position) & 1 != 0
    };
}

fn validate_len(payload: &[u8], required: usize) -> std::result::Result<(), ProtocolError> {
    if payload.len() < required {
        log::warn!(
            "Invalid payload size - required={} received={}",
            required,
            payload.len()
        );
        return Err(ProtocolError::ReplySize {
            required,
            received: payload.len(),
        });
    }
    Ok(())
}

/// Packed production date of the BMS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ProductionDate {
    pub year: u16,
    pub month: u8,
    pub day: u8,
}

impl fmt::Display for ProductionDate {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:04}-{:02}-{:02}", self.year, self.month, self.day)
    }
}

/// Which of the charge and discharge mosfets are switched on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[repr(u8)]
pub enum MosfetMask {
    None = 0,
    Charge = 1,
    Discharge = 2,
    Both = 3,
}

impl MosfetMask {
    pub const COMMAND: Command = Command::Mosfet;

    /// Only the lower two bits carry the mosfet state.
    pub fn from_bits(bits: u8) -> Self {
        match bits & 0b11 {
            0 => MosfetMask::None,
            1 => MosfetMask::Charge,
            2 => MosfetMask::Discharge,
            _ => MosfetMask::Both,
        }
    }

    pub fn bits(self) -> u8 {
        self as u8
    }

    pub fn charge(self) -> bool {
        read_bit!(self.bits(), 0)
    }

    pub fn discharge(self) -> bool {
        read_bit!(self.bits(), 1)
    }

    pub fn with_charge(self, enable: bool) -> Self {
        Self::from_bits(if enable {
            self.bits() | 0b01
        } else {
            self.bits() & !0b01
        })
    }

    pub fn with_discharge(self, enable: bool) -> Self {
        Self::from_bits(if enable {
            self.bits() | 0b10
        } else {
            self.bits() & !0b10
        })
    }

    pub fn toggle_charge(self) -> Self {
        Self::from_bits(self.bits() ^ 0b01)
    }

    /// Payload of the mosfet write command.
    pub fn payload(self) -> [u8; 2] {
        [0, self.bits()]
    }
}

impl fmt::Display for MosfetMask {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            MosfetMask::None => write!(f, "none"),
            MosfetMask::Charge => write!(f, "charge"),
            MosfetMask::Discharge => write!(f, "discharge"),
            MosfetMask::Both => write!(f, "charge+discharge"),
        }
    }
}

/// Byte order of the NTC temperature array in the status reply.
///
/// Older firmware libraries swapped every status field except the temperatures.
/// `Unswapped` reproduces that and reads them little endian.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum TemperatureOrder {
    #[default]
    BigEndian,
    Unswapped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Status {
    /// in 10 mV
    pub voltage: u16,
    /// in 10 mA, positive means charging
    pub current: i16,
    /// in 10 mAh
    pub remaining_capacity: u16,
    /// in 10 mAh
    pub nominal_capacity: u16,
    pub cycles: u16,
    /// packed, see [`Status::production_date`]
    pub production_date: u16,
    /// cells 1..16
    pub balance_low: u16,
    /// cells 17..32
    pub balance_high: u16,
    pub fault: u16,
    pub version: u8,
    /// state of charge in percent
    pub state_of_charge: u8,
    pub mosfet_status: u8,
    pub cells: u8,
    pub ntcs: u8,
    /// in 0.1 K
    pub temperatures: Vec<u16>,
}

impl Status {
    pub const COMMAND: Command = Command::Status;
    /// Length of the reply before the temperature array.
    pub const FIXED_LENGTH: usize = 23;
    pub const CAPACITY: usize = MAX_PAYLOAD;

    pub fn decode(payload: &[u8], order: TemperatureOrder) -> Result<Self> {
        validate_len(payload, Self::FIXED_LENGTH)?;
        let ntcs = payload[22];
        validate_len(payload, Self::FIXED_LENGTH + 2 * usize::from(ntcs))?;

        let temperatures = (0..usize::from(ntcs))
            .map(|i| {
                let offset = Self::FIXED_LENGTH + 2 * i;
                match order {
                    TemperatureOrder::BigEndian => wire::read_u16(payload, offset),
                    TemperatureOrder::Unswapped => {
                        u16::from_le_bytes([payload[offset], payload[offset + 1]])
                    }
                }
            })
            .collect();

        Ok(Self {
            voltage: wire::read_u16(payload, 0),
            current: wire::read_i16(payload, 2),
            remaining_capacity: wire::read_u16(payload, 4),
            nominal_capacity: wire::read_u16(payload, 6),
            cycles: wire::read_u16(payload, 8),
            production_date: wire::read_u16(payload, 10),
            balance_low: wire::read_u16(payload, 12),
            balance_high: wire::read_u16(payload, 14),
            fault: wire::read_u16(payload, 16),
            version: payload[18],
            state_of_charge: payload[19],
            mosfet_status: payload[20],
            cells: payload[21],
            ntcs,
            temperatures,
        })
    }

    pub fn production_date(&self) -> ProductionDate {
        wire::decode_date(self.production_date)
    }

    pub fn mosfet(&self) -> MosfetMask {
        MosfetMask::from_bits(self.mosfet_status)
    }

    pub fn temperatures_decicelsius(&self) -> Vec<i16> {
        self.temperatures
            .iter()
            .map(|t| wire::decode_temperature(*t))
            .collect()
    }

    /// Balance bits of all 32 cells, cell 1 in bit 0.
    pub fn balance(&self) -> u32 {
        (u32::from(self.balance_high) << 16) | u32::from(self.balance_low)
    }

    /// `cell` counts from 1.
    pub fn is_balancing(&self, cell: u8) -> bool {
        (1..=MAX_CELLS as u8).contains(&cell) && read_bit!(self.balance(), cell - 1)
    }

    /// One '0' or '1' per cell, cell 1 first.
    pub fn balance_string(&self) -> String {
        (1..=self.cells.min(MAX_CELLS as u8))
            .map(|cell| if self.is_balancing(cell) { '1' } else { '0' })
            .collect()
    }

    pub fn faults(&self) -> Vec<Fault> {
        Fault::decode(self.fault)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct CellVoltages {
    millivolts: [u16; MAX_CELLS],
    len: u8,
}

impl CellVoltages {
    pub const COMMAND: Command = Command::Cells;
    pub const CAPACITY: usize = 2 * MAX_CELLS;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        if payload.len() % 2 != 0 {
            log::warn!("Odd cell voltage payload - received={}", payload.len());
            return Err(ProtocolError::ReplySize {
                required: payload.len() + 1,
                received: payload.len(),
            }
            .into());
        }
        let len = (payload.len() / 2).min(MAX_CELLS);
        let mut millivolts = [0; MAX_CELLS];
        for (n_cell, volt) in millivolts.iter_mut().take(len).enumerate() {
            *volt = wire::read_u16(payload, 2 * n_cell);
            log::trace!("Cell #{} mV={}", n_cell + 1, volt);
        }
        Ok(Self {
            millivolts,
            len: len as u8,
        })
    }

    /// All voltages the device sent.
    pub fn as_slice(&self) -> &[u16] {
        &self.millivolts[..usize::from(self.len)]
    }

    /// The first `cells` voltages, `cells` taken from [`Status::cells`].
    pub fn meaningful(&self, cells: u8) -> &[u16] {
        &self.millivolts[..usize::from(cells.min(self.len))]
    }

    pub fn len(&self) -> usize {
        usize::from(self.len)
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn min(&self) -> Option<u16> {
        self.as_slice().iter().copied().min()
    }

    pub fn max(&self) -> Option<u16> {
        self.as_slice().iter().copied().max()
    }

    /// Difference between the highest and lowest cell in mV.
    pub fn spread(&self) -> Option<u16> {
        Some(self.max()? - self.min()?)
    }
}

/// Identifier the BMS reports for itself, ASCII without terminator.
#[derive(Clone, PartialEq, Eq)]
pub struct HardwareId {
    id: [u8; HARDWARE_ID_CAPACITY],
    len: u8,
}

impl HardwareId {
    pub const COMMAND: Command = Command::Hardware;
    pub const CAPACITY: usize = HARDWARE_ID_CAPACITY;

    pub fn decode(payload: &[u8]) -> Result<Self> {
        let len = payload.len().min(HARDWARE_ID_CAPACITY);
        let mut id = [0; HARDWARE_ID_CAPACITY];
        id[..len].copy_from_slice(&payload[..len]);
        Ok(Self { id, len: len as u8 })
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.id[..usize::from(self.len)]
    }

    /// `None` if the device sent something that is not UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        std::str::from_utf8(self.as_bytes()).ok()
    }
}

impl fmt::Display for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(self.as_bytes()))
    }
}

impl fmt::Debug for HardwareId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "HardwareId({:?})", String::from_utf8_lossy(self.as_bytes()))
    }
}

#[cfg(feature = "serde")]
impl Serialize for HardwareId {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

pub fn is_cell_overvoltage(fault: u16) -> bool {
    read_bit!(fault, 0)
}
pub fn is_cell_undervoltage(fault: u16) -> bool {
    read_bit!(fault, 1)
}
pub fn is_overvoltage(fault: u16) -> bool {
    read_bit!(fault, 2)
}
pub fn is_undervoltage(fault: u16) -> bool {
    read_bit!(fault, 3)
}
pub fn is_charge_overtemperature(fault: u16) -> bool {
    read_bit!(fault, 4)
}
pub fn is_charge_undertemperature(fault: u16) -> bool {
    read_bit!(fault, 5)
}
pub fn is_discharge_overtemperature(fault: u16) -> bool {
    read_bit!(fault, 6)
}
pub fn is_discharge_undertemperature(fault: u16) -> bool {
    read_bit!(fault, 7)
}
pub fn is_charge_overcurrent(fault: u16) -> bool {
    read_bit!(fault, 8)
}
pub fn is_discharge_overcurrent(fault: u16) -> bool {
    read_bit!(fault, 9)
}
pub fn is_short_circuit(fault: u16) -> bool {
    read_bit!(fault, 10)
}
pub fn is_ic_error(fault: u16) -> bool {
    read_bit!(fault, 11)
}
pub fn is_mosfet_software_lock(fault: u16) -> bool {
    read_bit!(fault, 12)
}

/// A protection the BMS has triggered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Fault {
    CellOvervoltage,
    CellUndervoltage,
    Overvoltage,
    Undervoltage,
    ChargeOvertemperature,
    ChargeUndertemperature,
    DischargeOvertemperature,
    DischargeUndertemperature,
    ChargeOvercurrent,
    DischargeOvercurrent,
    ShortCircuit,
    IcError,
    MosfetSoftwareLock,
}

impl Fault {
    pub fn decode(fault: u16) -> Vec<Self> {
        let mut result = Vec::new();

        macro_rules! ck_and_add {
            ($check:expr,$enum_type:expr) => {
                if $check(fault) {
                    result.push($enum_type);
                }
            };
        }

        ck_and_add!(is_cell_overvoltage, Fault::CellOvervoltage);
        ck_and_add!(is_cell_undervoltage, Fault::CellUndervoltage);
        ck_and_add!(is_overvoltage, Fault::Overvoltage);
        ck_and_add!(is_undervoltage, Fault::Undervoltage);
        ck_and_add!(is_charge_overtemperature, Fault::ChargeOvertemperature);
        ck_and_add!(is_charge_undertemperature, Fault::ChargeUndertemperature);
        ck_and_add!(is_discharge_overtemperature, Fault::DischargeOvertemperature);
        ck_and_add!(is_discharge_undertemperature, Fault::DischargeUndertemperature);
        ck_and_add!(is_charge_overcurrent, Fault::ChargeOvercurrent);
        ck_and_add!(is_discharge_overcurrent, Fault::DischargeOvercurrent);
        ck_and_add!(is_short_circuit, Fault::ShortCircuit);
        ck_and_add!(is_ic_error, Fault::IcError);
        ck_and_add!(is_mosfet_software_lock, Fault::MosfetSoftwareLock);

        result
    }
}

impl fmt::Display for Fault {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Fault::CellOvervoltage => write!(f, "Cell overvoltage protection"),
            Fault::CellUndervoltage => write!(f, "Cell undervoltage protection"),
            Fault::Overvoltage => write!(f, "Pack overvoltage protection"),
            Fault::Undervoltage => write!(f, "Pack undervoltage protection"),
            Fault::ChargeOvertemperature => write!(f, "Charging overtemperature protection"),
            Fault::ChargeUndertemperature => write!(f, "Charging undertemperature protection"),
            Fault::DischargeOvertemperature => {
                write!(f, "Discharging overtemperature protection")
            }
            Fault::DischargeUndertemperature => {
                write!(f, "Discharging undertemperature protection")
            }
            Fault::ChargeOvercurrent => write!(f, "Charging overcurrent protection"),
            Fault::DischargeOvercurrent => write!(f, "Discharging overcurrent protection"),
            Fault::ShortCircuit => write!(f, "Short circuit protection"),
            Fault::IcError => write!(f, "Front-end IC error"),
            Fault::MosfetSoftwareLock => write!(f, "Mosfets locked by software"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;

    // 4 cells, 2 NTCs, 13.27 V, -2.00 A, 2022-03-14
    const STATUS_PAYLOAD: [u8; 27] = [
        0x05, 0x2F, // voltage 1327
        0xFF, 0x38, // current -200
        0x0F, 0xA0, // remaining 4000
        0x13, 0x88, // nominal 5000
        0x00, 0x2A, // cycles 42
        0x2C, 0x6E, // date
        0x00, 0x05, // balance low, cells 1 and 3
        0x00, 0x00, // balance high
        0x02, 0x01, // fault
        0x1B, // version
        0x50, // soc 80%
        0x03, // mosfets
        0x04, // cells
        0x02, // ntcs
        0x0B, 0xB8, // 3000
        0x0A, 0xAB, // 2731
    ];

    #[test]
    fn decode_status() {
        let status = Status::decode(&STATUS_PAYLOAD, TemperatureOrder::BigEndian).unwrap();
        assert_eq!(status.voltage, 1327);
        assert_eq!(status.current, -200);
        assert_eq!(status.remaining_capacity, 4000);
        assert_eq!(status.nominal_capacity, 5000);
        assert_eq!(status.cycles, 42);
        assert_eq!(
            status.production_date(),
            ProductionDate {
                year: 2022,
                month: 3,
                day: 14
            }
        );
        assert_eq!(status.production_date().to_string(), "2022-03-14");
        assert_eq!(status.version, 0x1B);
        assert_eq!(status.state_of_charge, 80);
        assert_eq!(status.mosfet(), MosfetMask::Both);
        assert_eq!(status.cells, 4);
        assert_eq!(status.temperatures, vec![3000, 2731]);
        assert_eq!(status.temperatures_decicelsius(), vec![269, 0]);
        assert_eq!(
            status.faults(),
            vec![Fault::CellOvervoltage, Fault::DischargeOvercurrent]
        );
    }

    #[test]
    fn decode_status_unswapped_temperatures() {
        let status = Status::decode(&STATUS_PAYLOAD, TemperatureOrder::Unswapped).unwrap();
        assert_eq!(status.temperatures, vec![0xB80B, 0xAB0A]);
        assert_eq!(status.voltage, 1327);
    }

    #[test]
    fn status_too_short() {
        assert!(matches!(
            Status::decode(&STATUS_PAYLOAD[..22], TemperatureOrder::BigEndian),
            Err(Error::Protocol(ProtocolError::ReplySize {
                required: 23,
                received: 22
            }))
        ));
        // announces two NTCs but carries one
        assert!(matches!(
            Status::decode(&STATUS_PAYLOAD[..25], TemperatureOrder::BigEndian),
            Err(Error::Protocol(ProtocolError::ReplySize {
                required: 27,
                received: 25
            }))
        ));
    }

    #[test]
    fn balance_bits() {
        let mut status = Status::decode(&STATUS_PAYLOAD, TemperatureOrder::BigEndian).unwrap();
        assert_eq!(status.balance_string(), "1010");
        assert!(status.is_balancing(1));
        assert!(!status.is_balancing(2));
        assert!(!status.is_balancing(0));
        assert!(!status.is_balancing(33));

        status.balance_high = 0x8000;
        assert!(status.is_balancing(32));
        assert_eq!(status.balance(), 0x8000_0005);
    }

    #[test]
    fn decode_cells() {
        let cells = CellVoltages::decode(&[0x0C, 0xE4, 0x0C, 0xF0, 0x0C, 0xDA]).unwrap();
        assert_eq!(cells.as_slice(), &[3300, 3312, 3290]);
        assert_eq!(cells.meaningful(2), &[3300, 3312]);
        assert_eq!(cells.meaningful(10), &[3300, 3312, 3290]);
        assert_eq!(cells.min(), Some(3290));
        assert_eq!(cells.max(), Some(3312));
        assert_eq!(cells.spread(), Some(22));
    }

    #[test]
    fn decode_cells_empty_and_odd() {
        let cells = CellVoltages::decode(&[]).unwrap();
        assert!(cells.is_empty());
        assert_eq!(cells.spread(), None);
        assert!(CellVoltages::decode(&[0x0C, 0xE4, 0x0C]).is_err());
    }

    #[test]
    fn decode_hardware() {
        let id = HardwareId::decode(b"JBD-SP04S034").unwrap();
        assert_eq!(id.as_str(), Some("JBD-SP04S034"));
        assert_eq!(id.to_string(), "JBD-SP04S034");
        assert_eq!(id.as_bytes().len(), 12);
    }

    #[test]
    fn mosfet_mask() {
        assert_eq!(MosfetMask::from_bits(0b111), MosfetMask::Both);
        assert!(MosfetMask::Charge.charge());
        assert!(!MosfetMask::Charge.discharge());
        assert_eq!(MosfetMask::Both.with_charge(false), MosfetMask::Discharge);
        assert_eq!(MosfetMask::None.with_discharge(true), MosfetMask::Discharge);
        assert_eq!(MosfetMask::Discharge.toggle_charge(), MosfetMask::Both);
        assert_eq!(MosfetMask::Both.toggle_charge(), MosfetMask::Discharge);
    }

    #[test]
    fn mosfet_payload() {
        assert_eq!(MosfetMask::Both.payload(), [0x00, 0x03]);
        assert_eq!(MosfetMask::Charge.payload(), [0x00, 0x01]);
        assert_eq!(MosfetMask::COMMAND as u8, 0xE1);
    }

    #[test]
    fn fault_accessors() {
        let accessors: [fn(u16) -> bool; 13] = [
            is_cell_overvoltage,
            is_cell_undervoltage,
            is_overvoltage,
            is_undervoltage,
            is_charge_overtemperature,
            is_charge_undertemperature,
            is_discharge_overtemperature,
            is_discharge_undertemperature,
            is_charge_overcurrent,
            is_discharge_overcurrent,
            is_short_circuit,
            is_ic_error,
            is_mosfet_software_lock,
        ];
        for (bit, accessor) in accessors.iter().enumerate() {
            assert!(accessor(1 << bit));
            assert!(!accessor(!(1 << bit)));
        }
        assert_eq!(Fault::decode(0x1FFF).len(), 13);
        assert!(Fault::decode(0xE000).is_empty());
    }
}
