// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! `nvs-poll`: list the IIO sensors of a board and print their events.
//!
//! Without `--sensor` entries the default board is used. `RUST_LOG=debug`
//! shows channel discovery and sensor list population.

use clap::Parser;
use log::{debug, error, info, warn};
use nvs::{
    constants::*,
    hal::{wait_readable, BoardSensor, SensorHal},
    NvsConfig, SensorEvent,
};
use std::process::ExitCode;

const SENSOR_COUNT_MAX: usize = 32;
const EVENT_BUFFER: usize = 16;

fn default_board() -> Vec<BoardSensor> {
    vec![
        BoardSensor::new("jsa1127", "illuminance", SENSOR_TYPE_LIGHT),
        BoardSensor::new("cm3217", "illuminance", SENSOR_TYPE_LIGHT),
        BoardSensor::new("max4400x", "illuminance", SENSOR_TYPE_LIGHT),
        BoardSensor::new("max4400x", "proximity", SENSOR_TYPE_PROXIMITY).linked(),
        BoardSensor::new("bmpX80", "pressure", SENSOR_TYPE_PRESSURE),
        BoardSensor::new("bmpX80", "temp", SENSOR_TYPE_AMBIENT_TEMPERATURE).linked(),
        BoardSensor::new("ak89xx", "magn", SENSOR_TYPE_MAGNETIC_FIELD),
        BoardSensor::new("mpu6xxx", "accel", SENSOR_TYPE_ACCELEROMETER),
        BoardSensor::new("mpu6xxx", "anglvel", SENSOR_TYPE_GYROSCOPE).linked(),
        BoardSensor::new("mpu6xxx", "temp", SENSOR_TYPE_AMBIENT_TEMPERATURE)
            .linked()
            .unlisted(),
    ]
}

/// List the IIO sensors of a board and print their events
#[derive(Parser, Debug)]
#[command(name = "nvs-poll", version)]
#[command(about = "List the IIO sensors of a board and print their events", long_about = None)]
struct Cli {
    /// Board sensor; repeat for more. A device named twice is opened once.
    #[arg(
        long = "sensor",
        num_args = 3,
        value_names = ["DEVICE", "CHANNELS", "TYPE"],
        allow_negative_numbers = true
    )]
    sensors: Vec<String>,

    /// Sample period requested from every sensor
    #[arg(long, default_value_t = 100, value_parser = clap::value_parser!(u32).range(1..=60_000))]
    period_ms: u32,

    /// Stop after this many events
    #[arg(long, value_parser = clap::value_parser!(u64).range(1..))]
    count: Option<u64>,
}

impl Cli {
    fn board(&self) -> Result<Vec<BoardSensor>, String> {
        if self.sensors.is_empty() {
            return Ok(default_board());
        }
        let mut board: Vec<BoardSensor> = Vec::new();
        for triple in self.sensors.chunks(3) {
            let [device, channels, sensor_type] = triple else {
                return Err("sensors are given as DEVICE CHANNELS TYPE".into());
            };
            let sensor_type = sensor_type
                .parse()
                .map_err(|_| format!("bad sensor type {}", sensor_type))?;
            let mut entry = BoardSensor::new(device, channels, sensor_type);
            if board.iter().any(|b| b.device == entry.device) {
                entry = entry.linked();
            }
            board.push(entry);
        }
        Ok(board)
    }

    fn period_ns(&self) -> i64 {
        i64::from(self.period_ms) * 1_000_000
    }

    fn poll_timeout_ms(&self) -> i32 {
        i32::try_from(self.period_ms.saturating_mul(2)).unwrap_or(i32::MAX)
    }
}

fn print_event(ev: &SensorEvent) {
    if ev.is_flush_complete() {
        println!("flush complete sensor={}", ev.meta_data.sensor);
        return;
    }
    match ev.sensor_type {
        SENSOR_TYPE_ACCELEROMETER
        | SENSOR_TYPE_MAGNETIC_FIELD
        | SENSOR_TYPE_GYROSCOPE
        | SENSOR_TYPE_GRAVITY
        | SENSOR_TYPE_LINEAR_ACCELERATION => {
            let [x, y, z] = ev.vector();
            println!(
                "{:>3} t={} [{:9.4} {:9.4} {:9.4}] status={}",
                ev.sensor, ev.timestamp, x, y, z, ev.status
            );
        }
        SENSOR_TYPE_STEP_COUNTER => {
            println!("{:>3} t={} steps={}", ev.sensor, ev.timestamp, ev.counter());
        }
        _ => println!("{:>3} t={} {}", ev.sensor, ev.timestamp, ev.value()),
    }
}

fn main() -> ExitCode {
    env_logger::init();

    let cli = Cli::parse();
    let board = match cli.board() {
        Ok(board) => board,
        Err(e) => {
            eprintln!("nvs-poll: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let config = NvsConfig::default();
    let mut hal = SensorHal::from_board(&config, &board);
    let list = hal.get_sensor_list(SENSOR_COUNT_MAX).to_vec();
    if list.is_empty() {
        error!("no sensors found under {}", config.sysfs_root.display());
        return ExitCode::FAILURE;
    }
    for info in &list {
        println!(
            "{:>3} {:<24} {:<40} range={} resolution={} {}mA",
            info.handle,
            info.name,
            info.string_type.as_deref().unwrap_or("-"),
            info.max_range,
            info.resolution,
            info.power
        );
    }

    for info in &list {
        if let Err(e) = hal.batch(info.handle, 0, cli.period_ns(), 0) {
            warn!("{} batch: {}", info.name, e);
        }
        if let Err(e) = hal.enable(info.handle, true) {
            warn!("{} enable: {}", info.name, e);
        }
    }

    let targets = hal.init_fds();
    info!("polling {} descriptor(s)", targets.len());
    let mut events = Vec::with_capacity(EVENT_BUFFER);
    let mut printed = 0u64;
    loop {
        if let Err(e) = wait_readable(&targets, cli.poll_timeout_ms()) {
            error!("poll: {}", e);
            break;
        }
        events.clear();
        hal.poll(&mut events, EVENT_BUFFER);
        for ev in &events {
            print_event(ev);
        }
        printed += events.len() as u64;
        if cli.count.map_or(false, |c| printed >= c) {
            break;
        }
    }

    for info in &list {
        if let Err(e) = hal.enable(info.handle, false) {
            debug!("{} disable: {}", info.name, e);
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let cli = Cli::try_parse_from(["nvs-poll"]).unwrap();
        assert_eq!(cli.period_ms, 100);
        assert_eq!(cli.count, None);
        assert_eq!(cli.board().unwrap().len(), default_board().len());
    }

    #[test]
    fn test_sensor_triples_link_repeated_devices() {
        let cli = Cli::try_parse_from([
            "nvs-poll", "--sensor", "mpu6xxx", "accel", "1", "--sensor", "cm3217",
            "illuminance", "5", "--sensor", "mpu6xxx", "anglvel", "4",
        ])
        .unwrap();
        let board = cli.board().unwrap();
        let summary: Vec<(&str, i32, bool)> = board
            .iter()
            .map(|b| (b.channels.as_str(), b.sensor_type, b.link))
            .collect();
        assert_eq!(
            summary,
            vec![("accel", 1, false), ("illuminance", 5, false), ("anglvel", 4, true)]
        );
    }

    #[test]
    fn test_incomplete_triple_rejected() {
        assert!(Cli::try_parse_from(["nvs-poll", "--sensor", "mpu6xxx", "accel"]).is_err());
    }

    #[test]
    fn test_bad_sensor_type_rejected() {
        let cli = Cli::try_parse_from(["nvs-poll", "--sensor", "mpu6xxx", "accel", "x"]).unwrap();
        assert!(cli.board().is_err());
    }

    #[test]
    fn test_period_range() {
        assert!(Cli::try_parse_from(["nvs-poll", "--period-ms", "2000000000"]).is_err());
        assert!(Cli::try_parse_from(["nvs-poll", "--period-ms", "-5"]).is_err());
        assert!(Cli::try_parse_from(["nvs-poll", "--period-ms", "0"]).is_err());
        assert!(Cli::try_parse_from(["nvs-poll", "--count", "0"]).is_err());

        let cli = Cli::try_parse_from(["nvs-poll", "--period-ms", "60000"]).unwrap();
        assert_eq!(cli.period_ns(), 60_000_000_000);
        assert_eq!(cli.poll_timeout_ms(), 120_000);
    }
}
