use anyhow::Result;
use bmchain_lib::signal::Signaling;
use bmchain_lib::transport::Transport;
use bmchain_lib::{BmChain, BoardAddress, BoardReading};
use log::{error, info};
use serde_json::json;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use crate::commandline::OutputFormat;

/// Latest telemetry per board. A reading missing from a cycle keeps the
/// previous value instead of clearing it.
#[derive(Debug, Default)]
pub struct TelemetryTable(BTreeMap<BoardAddress, BoardReading>);

impl TelemetryTable {
    pub fn update(&mut self, readings: Vec<BoardReading>) {
        for reading in readings {
            match self.0.get_mut(&reading.address) {
                Some(known) => {
                    if reading.voltages.is_some() {
                        known.voltages = reading.voltages;
                    }
                    if reading.summary.is_some() {
                        known.summary = reading.summary;
                    }
                }
                None => {
                    self.0.insert(reading.address, reading);
                }
            }
        }
    }

    pub fn readings(&self) -> impl Iterator<Item = &BoardReading> {
        self.0.values()
    }
}

fn print_console(table: &TelemetryTable) {
    println!("--- Data at {} ---", chrono::Local::now().to_rfc3339());
    for reading in table.readings() {
        match &reading.voltages {
            Some(voltages) => println!(
                "{} voltages: {:?} min={} max={} total={} mV",
                reading.address,
                voltages.cells(),
                voltages.min(),
                voltages.max(),
                voltages.total()
            ),
            None => println!("{} voltages: n/a", reading.address),
        }
        match &reading.summary {
            Some(summary) => println!("{} summary: {:?}", reading.address, summary),
            None => println!("{} summary: n/a", reading.address),
        }
    }
    println!("--------------------------");
}

fn print_json(table: &TelemetryTable) -> Result<()> {
    let boards: Vec<&BoardReading> = table.readings().collect();
    let payload = json!({
        "timestamp": chrono::Utc::now().to_rfc3339(),
        "boards": boards,
    });
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

pub fn run<T: Transport, S: Signaling>(
    mut chain: BmChain<T, S>,
    interval: Duration,
    format: OutputFormat,
) -> Result<()> {
    info!(
        "Starting daemon mode: interval={interval:?}, format={format:?}, boards={:02X?}",
        chain.boards()
    );
    let mut table = TelemetryTable::default();

    loop {
        let started = Instant::now();
        match chain.poll_all() {
            Ok(readings) => {
                table.update(readings);
                match format {
                    OutputFormat::Console => print_console(&table),
                    OutputFormat::Json => {
                        if let Err(e) = print_json(&table) {
                            error!("Failed to serialize readings: {e}");
                        }
                    }
                }
            }
            Err(e) => error!("Poll cycle failed: {e}"),
        }
        std::thread::sleep(interval.saturating_sub(started.elapsed()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bmchain_lib::telemetry::CellVoltageSet;

    fn reading(address: u8, cell: Option<u16>) -> BoardReading {
        BoardReading {
            address: BoardAddress::raw(address),
            voltages: cell.map(|v| CellVoltageSet::new([v; 12])),
            summary: None,
        }
    }

    #[test]
    fn missing_readings_keep_previous_values() {
        let mut table = TelemetryTable::default();
        table.update(vec![reading(0xAD, Some(3300)), reading(0xBC, None)]);
        table.update(vec![reading(0xAD, None), reading(0xBC, Some(3400))]);
        let cells: Vec<Option<u16>> = table
            .readings()
            .map(|r| r.voltages.map(|v| v.cells()[0]))
            .collect();
        assert_eq!(cells, vec![Some(3300), Some(3400)]);
    }
}
