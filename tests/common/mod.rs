// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Shared fixtures: a fake IIO sysfs tree, a scripted physical sensor and a
//! recording fusion engine.

#![allow(dead_code)]

use nvs::{
    driver::{PhysicalSensor, Sensor},
    fusion::{
        engine::{FusionEngine, FusionMessages, FusionOutput, RateTarget},
        mask::SensorIndex,
    },
    NvsConfig, Result, SensorEvent, SensorInfo,
};
use std::{
    cell::RefCell,
    collections::{HashMap, VecDeque},
    fs::{self, OpenOptions},
    io::Write,
    os::unix::io::RawFd,
    path::{Path, PathBuf},
    rc::Rc,
    sync::Once,
};
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize logger for tests (only once)
pub fn init_logger() {
    INIT.call_once(|| {
        let _ = env_logger::builder().is_test(true).try_init();
    });
}

// =============================================================================
// Fake IIO tree
// =============================================================================

/// `(full name, scan index, type descriptor)`
pub type ChannelSpec<'a> = (&'a str, u32, &'a str);

/// A sysfs root and a dev root under one temporary directory. The device
/// node is a regular file; reading past its last record is a short read.
pub struct FakeIio {
    dir: TempDir,
}

impl FakeIio {
    pub fn new() -> Self {
        let dir = tempfile::tempdir().expect("tempdir");
        fs::create_dir_all(dir.path().join("sys")).unwrap();
        fs::create_dir_all(dir.path().join("dev")).unwrap();
        Self { dir }
    }

    pub fn config(&self) -> NvsConfig {
        NvsConfig::default()
            .with_sysfs_root(self.dir.path().join("sys"))
            .with_dev_root(self.dir.path().join("dev"))
            .with_calibration_path(self.dir.path().join("cal.bin"))
    }

    pub fn device_dir(&self, num: u32) -> PathBuf {
        self.dir.path().join("sys").join(format!("iio:device{}", num))
    }

    pub fn node(&self, num: u32) -> PathBuf {
        self.dir.path().join("dev").join(format!("iio:device{}", num))
    }

    /// Create device `num` named `name` with `channels` in its scan set.
    pub fn add_device(&self, num: u32, name: &str, channels: &[ChannelSpec]) -> PathBuf {
        let dev = self.device_dir(num);
        let scan = dev.join("scan_elements");
        fs::create_dir_all(&scan).unwrap();
        fs::create_dir_all(dev.join("buffer")).unwrap();
        fs::write(dev.join("name"), format!("{}\n", name)).unwrap();
        fs::write(dev.join("enable"), "0\n").unwrap();
        fs::write(dev.join("buffer").join("enable"), "0\n").unwrap();
        for (full, index, ty) in channels {
            fs::write(scan.join(format!("{}_en", full)), "0\n").unwrap();
            fs::write(scan.join(format!("{}_index", full)), format!("{}\n", index)).unwrap();
            fs::write(scan.join(format!("{}_type", full)), format!("{}\n", ty)).unwrap();
        }
        fs::write(self.node(num), b"").unwrap();
        dev
    }

    /// Write a device attribute file.
    pub fn attr(&self, num: u32, file: &str, value: &str) {
        fs::write(self.device_dir(num).join(file), format!("{}\n", value)).unwrap();
    }

    pub fn read_attr(&self, num: u32, file: &str) -> String {
        fs::read_to_string(self.device_dir(num).join(file))
            .unwrap()
            .trim()
            .to_string()
    }

    pub fn channel_enabled(&self, num: u32, full: &str) -> bool {
        let path = self
            .device_dir(num)
            .join("scan_elements")
            .join(format!("{}_en", full));
        fs::read_to_string(path).unwrap().trim() == "1"
    }

    /// Queue scan records behind whatever was already read.
    pub fn push_records(&self, num: u32, records: &[Vec<u8>]) {
        let mut node = OpenOptions::new().append(true).open(self.node(num)).unwrap();
        for rec in records {
            node.write_all(rec).unwrap();
        }
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }
}

/// Little-endian record builder.
pub struct Record(Vec<u8>);

impl Record {
    pub fn new(size: usize) -> Self {
        Self(vec![0; size])
    }

    pub fn i16_at(mut self, at: usize, v: i16) -> Self {
        self.0[at..at + 2].copy_from_slice(&v.to_le_bytes());
        self
    }

    pub fn u32_at(mut self, at: usize, v: u32) -> Self {
        self.0[at..at + 4].copy_from_slice(&v.to_le_bytes());
        self
    }

    pub fn i64_at(mut self, at: usize, v: i64) -> Self {
        self.0[at..at + 8].copy_from_slice(&v.to_le_bytes());
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.0
    }
}

// =============================================================================
// Scripted physical sensor
// =============================================================================

pub type CallLog = Rc<RefCell<Vec<String>>>;

pub fn call_log() -> CallLog {
    Rc::new(RefCell::new(Vec::new()))
}

/// Stand-in for an accel, gyro, temperature or compass `Nvs`.
pub struct FakePhysical {
    pub label: &'static str,
    pub info: SensorInfo,
    pub handle: i32,
    pub enabled: bool,
    pub scale: f32,
    pub offset: f32,
    pub max_range: f32,
    pub matrix: [i8; 9],
    pub queue: Rc<RefCell<VecDeque<SensorEvent>>>,
    pub calls: CallLog,
}

impl FakePhysical {
    pub fn new(label: &'static str, sensor_type: i32, calls: &CallLog) -> Self {
        Self {
            label,
            info: SensorInfo {
                name: label.to_string(),
                vendor: "test".to_string(),
                version: 1,
                sensor_type,
                max_range: 20.0,
                resolution: 0.01,
                power: 0.5,
                min_delay: 2_000,
                fifo_reserved_event_count: 0,
                fifo_max_event_count: 100,
                ..Default::default()
            },
            handle: 0,
            enabled: false,
            scale: 1.0,
            offset: 0.0,
            max_range: 20.0,
            matrix: [1, 0, 0, 0, 1, 0, 0, 0, 1],
            queue: Rc::new(RefCell::new(VecDeque::new())),
            calls: calls.clone(),
        }
    }

    fn log(&self, call: String) {
        self.calls.borrow_mut().push(format!("{} {}", self.label, call));
    }
}

impl Sensor for FakePhysical {
    fn enable(&mut self, handle: i32, enable: bool) -> Result<()> {
        self.log(format!("enable {} {}", handle, enable));
        self.enabled = enable;
        Ok(())
    }

    fn batch(&mut self, handle: i32, _flags: i32, period: i64, latency: i64) -> Result<()> {
        self.log(format!("batch {} {} {}", handle, period, latency));
        Ok(())
    }

    fn flush(&mut self, handle: i32) -> Result<()> {
        self.log(format!("flush {}", handle));
        Ok(())
    }

    fn read_events(
        &mut self,
        out: &mut Vec<SensorEvent>,
        count: usize,
        _handle: i32,
    ) -> Result<usize> {
        let mut n = 0;
        while n < count {
            match self.queue.borrow_mut().pop_front() {
                Some(ev) => out.push(ev),
                None => break,
            }
            n += 1;
        }
        Ok(n)
    }

    fn get_sensor_list(&mut self, list: &mut Vec<SensorInfo>, limit: usize) -> usize {
        if limit == 0 {
            return 0;
        }
        self.handle = list.len() as i32 + 1;
        self.info.handle = self.handle;
        list.push(self.info.clone());
        1
    }

    fn sensor_list(&self) -> Vec<SensorInfo> {
        vec![self.info.clone()]
    }

    fn fd(&self) -> Option<RawFd> {
        Some(3)
    }
}

impl PhysicalSensor for FakePhysical {
    fn handle(&self) -> i32 {
        self.handle
    }

    fn bind_handle(&mut self, handle: i32) {
        self.handle = handle;
    }

    fn get_enable(&self, _channel: Option<usize>) -> Result<bool> {
        Ok(self.enabled)
    }

    fn get_max_range(&mut self) -> Result<f32> {
        Ok(self.max_range)
    }

    fn get_scale(&mut self, _channel: Option<usize>) -> Result<f32> {
        Ok(self.scale)
    }

    fn get_offset(&mut self, _channel: Option<usize>) -> Result<f32> {
        Ok(self.offset)
    }

    fn set_offset(&mut self, offset: f32, channel: Option<usize>) -> Result<()> {
        self.log(format!("offset {:?} {}", channel, offset));
        Ok(())
    }

    fn get_matrix(&mut self) -> Result<[i8; 9]> {
        Ok(self.matrix)
    }

    fn set_matrix(&mut self, matrix: [i8; 9]) {
        self.matrix = matrix;
    }

    fn sensor_info(&self) -> Option<SensorInfo> {
        (self.handle > 0).then(|| self.info.clone())
    }

    fn update_sensor_info(&mut self, update: &mut dyn FnMut(&mut SensorInfo)) {
        update(&mut self.info);
    }

    fn read_raw(&mut self, _channel: Option<usize>) -> Result<i32> {
        Ok(0)
    }
}

/// Sample event as a physical sensor emits it.
pub fn sample(handle: i32, sensor_type: i32, data: [f32; 3], timestamp: i64) -> SensorEvent {
    let mut ev = SensorEvent::new(handle, sensor_type);
    ev.set_vector(data);
    ev.timestamp = timestamp;
    ev
}

// =============================================================================
// Recording fusion engine
// =============================================================================

#[derive(Default)]
pub struct EngineLog {
    pub init_compass: Option<bool>,
    pub rates: Vec<(RateTarget, i64)>,
    pub accel: Vec<[i64; 3]>,
    pub gyro: Vec<[i16; 3]>,
    pub compass: Vec<[i64; 3]>,
    pub temp: Vec<i64>,
    pub executed: usize,
    pub turned_off: Vec<&'static str>,
    pub stored: usize,
    pub gyro_orientation: Option<(u16, i64)>,
    pub accel_orientation: Option<(u16, i64)>,
}

/// A fusion engine whose outputs are set by the test.
#[derive(Default)]
pub struct MockEngine {
    pub log: EngineLog,
    pub outputs: HashMap<SensorIndex, FusionOutput>,
    pub messages: FusionMessages,
    pub accel_accuracy: i8,
    pub mag_accuracy: i8,
    pub mpl_gyro_bias: [i64; 3],
    pub factory_gyro_bias: [i64; 3],
}

impl MockEngine {
    pub fn set_output(&mut self, index: SensorIndex, values: [f32; 5], update: i32) {
        self.outputs.insert(
            index,
            FusionOutput {
                values,
                status: 0,
                timestamp: 42,
                update,
            },
        );
    }
}

impl FusionEngine for MockEngine {
    fn version(&self) -> String {
        "mock fusion 1.0".to_string()
    }

    fn init(&mut self, compass: bool) -> Result<()> {
        self.log.init_compass = Some(compass);
        Ok(())
    }

    fn set_sample_rate(&mut self, target: RateTarget, period_us: i64) {
        self.log.rates.push((target, period_us));
    }

    fn set_gyro_orientation_and_scale(&mut self, orientation: u16, scale: i64) {
        self.log.gyro_orientation = Some((orientation, scale));
    }

    fn set_accel_orientation_and_scale(&mut self, orientation: u16, scale: i64) {
        self.log.accel_orientation = Some((orientation, scale));
    }

    fn set_compass_orientation_and_scale(&mut self, _orientation: u16, _sensitivity: i64) {}

    fn build_accel(&mut self, data: [i64; 3], _status: i32, _timestamp: i64) {
        self.log.accel.push(data);
    }

    fn build_gyro(&mut self, data: [i16; 3], _timestamp: i64) {
        self.log.gyro.push(data);
    }

    fn build_compass(&mut self, data: [i64; 3], _status: i32, _timestamp: i64) {
        self.log.compass.push(data);
    }

    fn build_temp(&mut self, temperature: i64, _timestamp: i64) {
        self.log.temp.push(temperature);
    }

    fn execute_on_data(&mut self) -> Result<()> {
        self.log.executed += 1;
        Ok(())
    }

    fn take_messages(&mut self) -> FusionMessages {
        std::mem::take(&mut self.messages)
    }

    fn accel_accuracy(&self) -> i8 {
        self.accel_accuracy
    }

    fn mag_accuracy(&self) -> i8 {
        self.mag_accuracy
    }

    fn accel_was_turned_off(&mut self) {
        self.log.turned_off.push("accel");
    }

    fn gyro_was_turned_off(&mut self) {
        self.log.turned_off.push("gyro");
    }

    fn compass_was_turned_off(&mut self) {
        self.log.turned_off.push("compass");
    }

    fn load_calibration(&mut self) -> Result<()> {
        Ok(())
    }

    fn store_calibration(&mut self) -> Result<()> {
        self.log.stored += 1;
        Ok(())
    }

    fn compass_bias(&self) -> [i64; 3] {
        [0; 3]
    }

    fn compass_sensitivity(&self) -> i64 {
        0
    }

    fn gyro_bias(&self) -> [i64; 3] {
        self.factory_gyro_bias
    }

    fn accel_bias(&self) -> [i64; 3] {
        [0; 3]
    }

    fn mpl_gyro_bias(&self) -> [i64; 3] {
        self.mpl_gyro_bias
    }

    fn gyro_bias_dmp_units(&self) -> [i64; 3] {
        [0; 3]
    }

    fn gyro_sensitivity(&self) -> i64 {
        0
    }

    fn mpl_accel_bias(&self) -> [i64; 3] {
        [0; 3]
    }

    fn sensor_output(&mut self, index: SensorIndex) -> FusionOutput {
        self.outputs.get(&index).copied().unwrap_or_default()
    }
}
