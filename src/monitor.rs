use anyhow::{bail, Result};
use jbdbms_lib::serialport::SerialJbdBms;
use jbdbms_lib::{CellVoltages, HardwareId, Status};
use log::{error, info};
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use crate::commandline::OutputFormat;

#[derive(Debug, Clone, PartialEq)]
pub enum FetchedData {
    Status(Status),
    Cells(CellVoltages),
    Hardware(HardwareId),
}

impl FetchedData {
    fn to_json_value(&self) -> Result<serde_json::Value> {
        match self {
            FetchedData::Status(s) => Ok(json!({
                "raw": serde_json::to_value(s)?,
                "production_date": s.production_date().to_string(),
                "balance": s.balance_string(),
                "temperatures_decicelsius": s.temperatures_decicelsius(),
                "faults": s.faults().iter().map(|f| f.to_string()).collect::<Vec<_>>(),
            })),
            FetchedData::Cells(c) => Ok(serde_json::to_value(c.as_slice())?),
            FetchedData::Hardware(h) => Ok(serde_json::to_value(h)?),
        }
    }

    fn as_text(&self) -> String {
        match self {
            FetchedData::Status(s) => format_status(s),
            FetchedData::Cells(c) => format_cells(c),
            FetchedData::Hardware(h) => format!("Hardware: {h}"),
        }
    }
}

/// Signed value in hundredths, e.g. 10 mV steps as volts.
fn hundredths(value: i32) -> String {
    let sign = if value < 0 { "-" } else { "" };
    format!("{sign}{}.{:02}", value.unsigned_abs() / 100, value.unsigned_abs() % 100)
}

fn tenths(value: i16) -> String {
    let value = i32::from(value);
    let sign = if value < 0 { "-" } else { "" };
    format!("{sign}{}.{}", value.unsigned_abs() / 10, value.unsigned_abs() % 10)
}

pub fn format_status(status: &Status) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "Voltage: {} V", hundredths(i32::from(status.voltage)));
    let _ = writeln!(out, "Current: {} A", hundredths(i32::from(status.current)));
    let _ = writeln!(
        out,
        "Capacity: {} / {} Ah ({} %)",
        hundredths(i32::from(status.remaining_capacity)),
        hundredths(i32::from(status.nominal_capacity)),
        status.state_of_charge
    );
    let _ = writeln!(out, "Cycles: {}", status.cycles);
    let _ = writeln!(out, "Production date: {}", status.production_date());
    let _ = writeln!(out, "Firmware version: {:#04x}", status.version);
    let _ = writeln!(out, "Mosfets: {}", status.mosfet());
    let _ = writeln!(out, "Cells: {} balancing: {}", status.cells, status.balance_string());
    let temperatures: Vec<String> = status
        .temperatures_decicelsius()
        .into_iter()
        .map(|t| format!("{} °C", tenths(t)))
        .collect();
    let _ = writeln!(out, "Temperatures: [{}]", temperatures.join(", "));
    let _ = write!(out, "{}", format_faults(status));
    out
}

pub fn format_faults(status: &Status) -> String {
    let faults = status.faults();
    if faults.is_empty() {
        return String::from("Faults: none");
    }
    let faults: Vec<String> = faults.iter().map(|f| f.to_string()).collect();
    format!("Faults: {}", faults.join(", "))
}

pub fn format_cells(cells: &CellVoltages) -> String {
    let mut out = String::new();
    for (n_cell, mv) in cells.as_slice().iter().enumerate() {
        let _ = writeln!(out, "Cell #{:02}: {} mV", n_cell + 1, mv);
    }
    if let (Some(min), Some(max), Some(spread)) = (cells.min(), cells.max(), cells.spread()) {
        let _ = write!(out, "Min: {min} mV Max: {max} mV Spread: {spread} mV");
    }
    out
}

type Fetch = fn(&mut SerialJbdBms) -> jbdbms_lib::Result<FetchedData>;

fn get_metrics() -> BTreeMap<&'static str, Fetch> {
    let mut metrics: BTreeMap<&'static str, Fetch> = BTreeMap::new();
    metrics.insert("status", |bms| bms.get_status().map(FetchedData::Status));
    metrics.insert("cells", |bms| bms.get_cells().map(FetchedData::Cells));
    metrics.insert("hardware", |bms| bms.get_hardware().map(FetchedData::Hardware));
    metrics
}

/// Resolves "all" and rejects unknown names before the first poll.
fn select_metrics(requested: &[String]) -> Result<Vec<&'static str>> {
    let available = get_metrics();
    if requested.iter().any(|m| m == "all") {
        return Ok(available.keys().copied().collect());
    }
    requested
        .iter()
        .map(|name| match available.get_key_value(name.as_str()) {
            Some((key, _)) => Ok(*key),
            None => bail!("Unknown metric name '{}'", name),
        })
        .collect()
}

/// Drops readings equal to the previous cycle and remembers the new ones.
fn retain_changes(
    fetched: &mut Vec<(&'static str, FetchedData)>,
    previous: &mut HashMap<&'static str, FetchedData>,
) {
    fetched.retain(|(name, data)| previous.get(name) != Some(data));
    for (name, data) in fetched.iter() {
        previous.insert(*name, data.clone());
    }
}

pub fn run(
    mut bms: SerialJbdBms,
    interval: std::time::Duration,
    metrics: Vec<String>,
    format: OutputFormat,
    changes_only: bool,
) -> Result<()> {
    let selected = select_metrics(&metrics)?;
    info!("Starting monitor: interval={interval:?}, metrics={selected:?}, format={format:?}");
    let available = get_metrics();
    let mut previous: HashMap<&'static str, FetchedData> = HashMap::new();

    loop {
        let mut fetched: Vec<(&'static str, FetchedData)> = Vec::new();
        for &name in &selected {
            let fetch = available[&name];
            match fetch(&mut bms) {
                Ok(data) => fetched.push((name, data)),
                Err(e) => error!("Error fetching metric '{name}': {e}"),
            }
        }
        if changes_only {
            retain_changes(&mut fetched, &mut previous);
        }

        if !fetched.is_empty() {
            match format {
                OutputFormat::Text => {
                    println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
                    for (_, data) in &fetched {
                        println!("{}", data.as_text());
                    }
                    println!("--------------------------");
                }
                OutputFormat::Json => {
                    let mut data_to_print = serde_json::Map::new();
                    data_to_print.insert(
                        "timestamp".to_string(),
                        json!(chrono::Utc::now().to_rfc3339()),
                    );
                    for (name, data) in &fetched {
                        match data.to_json_value() {
                            Ok(val) => {
                                data_to_print.insert(name.to_string(), val);
                            }
                            Err(e) => error!("Failed to serialize '{name}': {e}"),
                        }
                    }
                    println!("{}", serde_json::Value::Object(data_to_print));
                }
            }
        }
        std::thread::sleep(interval);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_selection() {
        assert_eq!(
            select_metrics(&["all".to_string()]).unwrap(),
            vec!["cells", "hardware", "status"]
        );
        assert_eq!(
            select_metrics(&["status".to_string(), "cells".to_string()]).unwrap(),
            vec!["status", "cells"]
        );
        assert!(select_metrics(&["soc".to_string()]).is_err());
    }

    #[test]
    fn unchanged_readings_are_dropped() {
        let hardware = HardwareId::decode(b"JBD").unwrap();
        let cells = CellVoltages::decode(&[0x0C, 0xE4]).unwrap();
        let mut previous = HashMap::new();

        let mut fetched = vec![
            ("hardware", FetchedData::Hardware(hardware.clone())),
            ("cells", FetchedData::Cells(cells)),
        ];
        retain_changes(&mut fetched, &mut previous);
        assert_eq!(fetched.len(), 2);

        let changed = CellVoltages::decode(&[0x0C, 0xE5]).unwrap();
        let mut fetched = vec![
            ("hardware", FetchedData::Hardware(hardware)),
            ("cells", FetchedData::Cells(changed.clone())),
        ];
        retain_changes(&mut fetched, &mut previous);
        assert_eq!(fetched, vec![("cells", FetchedData::Cells(changed))]);
    }

    #[test]
    fn fixed_point_formatting() {
        assert_eq!(hundredths(1327), "13.27");
        assert_eq!(hundredths(-205), "-2.05");
        assert_eq!(hundredths(-5), "-0.05");
        assert_eq!(tenths(269), "26.9");
        assert_eq!(tenths(-131), "-13.1");
    }

    #[test]
    fn cells_text() {
        let cells = CellVoltages::decode(&[0x0C, 0xE4, 0x0C, 0xF0]).unwrap();
        assert_eq!(
            format_cells(&cells),
            "Cell #01: 3300 mV\nCell #02: 3312 mV\nMin: 3300 mV Max: 3312 mV Spread: 12 mV"
        );
    }

    #[test]
    fn hardware_json() {
        let hardware = FetchedData::Hardware(HardwareId::decode(b"SP04S020").unwrap());
        assert_eq!(hardware.to_json_value().unwrap(), json!("SP04S020"));
    }
}
