// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Hardware integration tests against the IIO devices of a real board
//!
//! These tests require real hardware and are marked with #[ignore].
//! Run with: RUST_LOG=debug cargo test -- --ignored --test-threads=1
//!
//! Buffer enable needs write access to sysfs, run as root or with the
//! device attributes made writable.

use nvs::{
    constants::*,
    hal::{wait_readable, BoardSensor, SensorHal},
    interface::iio::IioDevice,
    Nvs, NvsConfig, Sensor, SensorEvent,
};
use std::{
    sync::Once,
    time::{Duration, Instant},
};

static INIT: Once = Once::new();

/// Initialize logger for tests (only once)
fn init_logger() {
    INIT.call_once(|| {
        env_logger::init();
    });
}

const TEST_IMU_DEVICE: &str = "mpu6xxx";
const TEST_LIGHT_DEVICE: &str = "cm3217";
const SAMPLE_PERIOD_NS: i64 = 20_000_000;
const READ_TIMEOUT: Duration = Duration::from_secs(2);

fn imu_device(config: &NvsConfig) -> u32 {
    IioDevice::find_device(config, TEST_IMU_DEVICE)
        .expect("Failed to scan IIO devices")
        .expect("IMU not found")
}

/// Poll `sensor` until `want` events arrived or the timeout passed.
fn collect(sensor: &mut Nvs, handle: i32, want: usize) -> Vec<SensorEvent> {
    let target = sensor
        .init_fd()
        .expect("Failed to prepare descriptor")
        .expect("Sensor has no descriptor");
    let start = Instant::now();
    let mut events = Vec::new();
    while events.len() < want && start.elapsed() < READ_TIMEOUT {
        wait_readable(&[target], 100).expect("poll failed");
        let remaining = want - events.len();
        sensor
            .read_events(&mut events, remaining, handle)
            .expect("read failed");
    }
    events
}

// =============================================================================
// Discovery
// =============================================================================

#[test]
#[ignore]
fn test_imu_discovery() {
    init_logger();
    let config = NvsConfig::default();
    let num = imu_device(&config);

    let accel = Nvs::new(&config, num, "accel", SENSOR_TYPE_ACCELEROMETER)
        .expect("Failed to open accelerometer");
    assert_eq!(accel.channel_count(), 3);
    let gyro = accel
        .link("anglvel", SENSOR_TYPE_GYROSCOPE)
        .expect("Failed to open gyroscope");
    assert_eq!(gyro.channel_count(), 3);

    println!("✓ {} at iio:device{}", TEST_IMU_DEVICE, num);
}

#[test]
#[ignore]
fn test_sensor_list() {
    init_logger();
    let config = NvsConfig::default();
    let num = imu_device(&config);
    let mut accel = Nvs::new(&config, num, "accel", SENSOR_TYPE_ACCELEROMETER).unwrap();

    let mut list = Vec::new();
    assert_eq!(accel.get_sensor_list(&mut list, 1), 1);
    let info = &list[0];
    assert_eq!(info.handle, 1);
    assert!(info.max_range > 0.0, "max range not reported");
    assert!(info.min_delay >= 0);

    println!(
        "✓ {} vendor={} range={} resolution={} {}mA",
        info.name, info.vendor, info.max_range, info.resolution, info.power
    );
}

// =============================================================================
// Streaming
// =============================================================================

#[test]
#[ignore]
fn test_accelerometer_stream() {
    init_logger();
    let config = NvsConfig::default();
    let num = imu_device(&config);
    let mut accel = Nvs::new(&config, num, "accel", SENSOR_TYPE_ACCELEROMETER).unwrap();
    let mut list = Vec::new();
    accel.get_sensor_list(&mut list, 1);

    accel.batch(1, 0, SAMPLE_PERIOD_NS, 0).expect("batch failed");
    accel.enable(1, true).expect("enable failed");
    let events = collect(&mut accel, 1, 10);
    accel.enable(1, false).expect("disable failed");

    assert!(events.len() >= 10, "only {} events", events.len());
    for pair in events.windows(2) {
        assert!(pair[1].timestamp > pair[0].timestamp);
    }
    // the device is at rest, gravity dominates
    let [x, y, z] = events[events.len() - 1].vector();
    let magnitude = (x * x + y * y + z * z).sqrt();
    assert!(
        (magnitude - GRAVITY_EARTH).abs() < 2.0,
        "magnitude {} m/s^2",
        magnitude
    );

    println!("✓ {} accel events, |a| = {:.2}", events.len(), magnitude);
}

#[test]
#[ignore]
fn test_flush_completes() {
    init_logger();
    let config = NvsConfig::default();
    let num = imu_device(&config);
    let mut accel = Nvs::new(&config, num, "accel", SENSOR_TYPE_ACCELEROMETER).unwrap();
    let mut list = Vec::new();
    accel.get_sensor_list(&mut list, 1);

    assert!(accel.flush(1).is_err(), "flush must fail while disabled");
    accel.enable(1, true).unwrap();
    accel.flush(1).expect("flush failed");
    let events = collect(&mut accel, 1, 50);
    accel.enable(1, false).unwrap();

    assert!(
        events.iter().any(|e| e.is_flush_complete()),
        "no flush complete event"
    );
    println!("✓ flush complete");
}

#[test]
#[ignore]
fn test_board_hal_poll() {
    init_logger();
    let board = vec![
        BoardSensor::new(TEST_LIGHT_DEVICE, "illuminance", SENSOR_TYPE_LIGHT),
        BoardSensor::new(TEST_IMU_DEVICE, "accel", SENSOR_TYPE_ACCELEROMETER),
        BoardSensor::new(TEST_IMU_DEVICE, "anglvel", SENSOR_TYPE_GYROSCOPE).linked(),
    ];
    let mut hal = SensorHal::from_board(&NvsConfig::default(), &board);
    let list = hal.get_sensor_list(16).to_vec();
    assert!(!list.is_empty(), "no board sensors found");

    for info in &list {
        hal.batch(info.handle, 0, SAMPLE_PERIOD_NS, 0).unwrap();
        hal.enable(info.handle, true).unwrap();
    }
    let targets = hal.init_fds();
    let start = Instant::now();
    let mut events = Vec::new();
    while events.len() < 20 && start.elapsed() < READ_TIMEOUT {
        wait_readable(&targets, 100).unwrap();
        let remaining = 20 - events.len();
        hal.poll(&mut events, remaining);
    }
    for info in &list {
        hal.enable(info.handle, false).unwrap();
    }

    assert!(!events.is_empty(), "no events from the board");
    for ev in &events {
        assert!(list.iter().any(|s| s.handle == ev.sensor));
    }
    println!("✓ {} events from {} sensors", events.len(), list.len());
}
