// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sensor fusion arbitration.
//!
//! [`FusionArbiter`] owns the physical accelerometer, gyroscope, gyro
//! temperature and magnetometer sensors and exposes them, their uncalibrated
//! variants and the fused virtual sensors through one [`Sensor`] surface.
//! Enabling any sensor switches on exactly the physical sensors the enabled
//! set needs. Samples read from the physical sensors are fed to a
//! [`FusionEngine`]; each poll runs one fusion step and a per-sensor handler
//! turns the library outputs into events.
//!
//! Flush requests that need physical flushes complete only once every
//! physical sensor involved has reported its own flush-complete event.

pub mod engine;
pub mod mask;

use crate::{
    config::NvsConfig,
    constants::*,
    driver::{PhysicalSensor, Sensor},
    interface::PollTarget,
    reports::{SensorEvent, SensorInfo},
    Error, Result,
};
use engine::{convert_to_body, orientation_to_scalar, FusionEngine, FusionMessages, RateTarget};
use log::{debug, error, info, trace, warn};
use mask::{SensorIndex, SensorMask};
use std::{f32::consts::PI, os::unix::io::RawFd};

const N: usize = SensorIndex::COUNT;

/// Handle given to the gyro temperature sensor when it was not bound.
pub const GYRO_TEMP_HANDLE: i32 = UNLISTED_HANDLE_BASE;

/// The physical sensors handed to a [`FusionArbiter`].
#[derive(Default)]
pub struct FusionSensors {
    pub accel: Option<Box<dyn PhysicalSensor>>,
    pub gyro: Option<Box<dyn PhysicalSensor>>,
    pub gyro_temp: Option<Box<dyn PhysicalSensor>>,
    pub compass: Option<Box<dyn PhysicalSensor>>,
    /// Part name of the motion chip, e.g. `mpu6050`
    pub part: Option<String>,
}

type Handler<E> = fn(&mut FusionArbiter<E>, SensorIndex) -> bool;

/// Sensors of the motion chip read on each data poll.
#[derive(Debug, Clone, Copy)]
enum MpuSource {
    Accel,
    Gyro,
    Temperature,
}

/// Description of the sensor at `index` as the fusion library provides it.
fn mpl_sensor_info(index: SensorIndex) -> SensorInfo {
    let (name, max_range, resolution, power) = match index {
        SensorIndex::Gyro | SensorIndex::RawGyro => ("MPL Gyroscope", 2000.0, 1.0, 0.5),
        SensorIndex::Accelerometer => ("MPL Accelerometer", 10240.0, 1.0, 0.5),
        SensorIndex::MagneticField => ("MPL Magnetic Field", 10240.0, 1.0, 0.5),
        SensorIndex::RawMagneticField => ("MPL Raw Magnetic Field", 10240.0, 1.0, 0.5),
        SensorIndex::Orientation => ("MPL Orientation", 360.0, 0.00001, 1.0),
        SensorIndex::RotationVector => ("MPL Rotation Vector", 1.0, 0.00001, 1.0),
        SensorIndex::GameRotationVector => ("MPL Game Rotation Vector", 1.0, 0.00001, 0.7),
        SensorIndex::LinearAccel => ("MPL Linear Acceleration", 10240.0, 1.0, 0.5),
        SensorIndex::Gravity => ("MPL Gravity", 9.81, 0.00001, 0.5),
        SensorIndex::GeomagneticRotationVector => ("MPL Geomagnetic RV", 1.0, 0.00001, 0.5),
    };
    let sensor_type = index.sensor_type();
    SensorInfo {
        name: name.to_string(),
        vendor: MPL_VENDOR.to_string(),
        version: 1,
        handle: index.index() as i32,
        sensor_type,
        max_range,
        resolution,
        power,
        min_delay: MPL_MIN_DELAY_US,
        string_type: sensor_string_type(sensor_type).map(str::to_string),
        max_delay: MPL_MAX_DELAY_US,
        ..Default::default()
    }
}

fn gyro_scale_for_range(range: f32) -> Option<i32> {
    match range {
        r if r > 30.0 => Some(2000),
        r if r > 15.0 => Some(1000),
        r if r > 7.0 => Some(500),
        r if r > 3.0 => Some(250),
        _ => None,
    }
}

fn accel_scale_for_range(range: f32) -> Option<i32> {
    match range {
        r if r > 120.0 => Some(16),
        r if r > 60.0 => Some(8),
        r if r > 30.0 => Some(4),
        r if r > 15.0 => Some(2),
        _ => None,
    }
}

/// Difference between raw and calibrated vectors.
fn calculate_bias(cal: &[f32], raw: &[f32]) -> [f32; 3] {
    [raw[0] - cal[0], raw[1] - cal[1], raw[2] - cal[2]]
}

/// Multiplexes physical motion sensors into calibrated, uncalibrated and
/// fused virtual sensors.
pub struct FusionArbiter<E: FusionEngine> {
    engine: E,
    config: NvsConfig,
    accel: Option<Box<dyn PhysicalSensor>>,
    gyro: Option<Box<dyn PhysicalSensor>>,
    gyro_temp: Option<Box<dyn PhysicalSensor>>,
    compass: Option<Box<dyn PhysicalSensor>>,

    /// Listed description per index, `None` when not available
    sensor_list: [Option<SensorInfo>; N],
    /// Event template per index, `sensor` holds the handle
    pending: [SensorEvent; N],
    handlers: [Handler<E>; N],
    period_hw: [i64; N],
    period_ns: [i64; N],
    max_latency_ns: [i64; N],

    enabled: SensorMask,
    /// Meta events owed
    flush: SensorMask,
    /// Physical flushes each sensor still waits for
    flush_sensor: [SensorMask; N],
    /// Physical flushes seen during the current read
    flush_physical: SensorMask,
    has_pending_event: bool,

    have_good_cal: bool,
    gyro_accuracy: i8,
    accel_accuracy: i8,
    compass_accuracy: i8,

    gyro_scale: i32,
    gyro_self_test_scale: i32,
    accel_scale: i32,
    accel_self_test_scale: i32,
    compass_scale: i64,
    gyro_orientation: [i8; 9],
    accel_orientation: [i8; 9],

    factory_gyro_bias: [i64; 3],
    factory_gyro_bias_available: bool,
    gyro_bias: [f32; 3],
    gyro_bias_available: bool,
    gyro_chip_bias: [i64; 3],
    factory_accel_bias: [i64; 3],
    factory_accel_bias_available: bool,
    accel_bias: [i64; 3],
    accel_bias_available: bool,
    compass_bias: [f32; 3],
}

impl<E: FusionEngine> FusionArbiter<E> {
    pub fn new(engine: E, sensors: FusionSensors, config: &NvsConfig) -> Self {
        let FusionSensors {
            accel,
            gyro,
            mut gyro_temp,
            compass,
            part,
        } = sensors;

        if let Some(temp) = gyro_temp.as_mut() {
            // unlisted, but its channels are switched by handle
            if temp.handle() == 0 {
                temp.bind_handle(GYRO_TEMP_HANDLE);
            }
        }

        let handlers: [Handler<E>; N] = [
            Self::handle_gyro,
            Self::handle_raw_gyro,
            Self::handle_accelerometer,
            Self::handle_magnetic_field,
            Self::handle_raw_magnetic_field,
            Self::handle_orientation,
            Self::handle_rotation_vector,
            Self::handle_game_rotation_vector,
            Self::handle_linear_accel,
            Self::handle_gravity,
            Self::handle_geomagnetic_rotation_vector,
        ];
        let pending = SensorIndex::ALL.map(|idx| {
            let mut ev = SensorEvent::new(0, idx.sensor_type());
            ev.status = SENSOR_STATUS_ACCURACY_HIGH;
            ev
        });

        let mut arbiter = Self {
            engine,
            config: config.clone(),
            accel,
            gyro,
            gyro_temp,
            compass,
            sensor_list: Default::default(),
            pending,
            handlers,
            period_hw: [0; N],
            period_ns: [DEFAULT_SAMPLE_PERIOD_NS; N],
            max_latency_ns: [0; N],
            enabled: SensorMask::empty(),
            flush: SensorMask::empty(),
            flush_sensor: [SensorMask::empty(); N],
            flush_physical: SensorMask::empty(),
            has_pending_event: false,
            have_good_cal: false,
            gyro_accuracy: 0,
            accel_accuracy: 0,
            compass_accuracy: 0,
            gyro_scale: 2000,
            gyro_self_test_scale: GYRO_SELF_TEST_SCALE,
            accel_scale: 2,
            accel_self_test_scale: ACCEL_SELF_TEST_SCALE,
            compass_scale: 0,
            gyro_orientation: [0; 9],
            accel_orientation: [0; 9],
            factory_gyro_bias: [0; 3],
            factory_gyro_bias_available: false,
            gyro_bias: [0.0; 3],
            gyro_bias_available: false,
            gyro_chip_bias: [0; 3],
            factory_accel_bias: [0; 3],
            factory_accel_bias_available: false,
            accel_bias: [0; 3],
            accel_bias_available: false,
            compass_bias: [0.0; 3],
        };

        if let Some(gyro) = arbiter.gyro.as_mut() {
            if let Some(scale) = gyro.get_max_range().ok().and_then(gyro_scale_for_range) {
                arbiter.gyro_scale = scale;
            }
            debug!("gyro FSR used {}", arbiter.gyro_scale);
        }
        if let Some(accel) = arbiter.accel.as_mut() {
            let version = accel.sensor_info().map_or(0, |info| info.version);
            if version > 2 {
                if let Some(scale) = accel.get_max_range().ok().and_then(accel_scale_for_range) {
                    arbiter.accel_scale = scale;
                }
            }
            debug!("accel FSR used {}", arbiter.accel_scale);
        }
        if part.as_deref() == Some("mpu6050") {
            arbiter.accel_self_test_scale = ACCEL_SELF_TEST_SCALE_MPU6050;
        }

        arbiter.init_bias();
        info!("{}", arbiter.engine.version());
        let has_compass = arbiter.compass.is_some();
        if let Err(e) = arbiter.engine.init(has_compass) {
            error!("fusion init failed: {}", e);
        }
        arbiter.set_device_properties();

        match arbiter.engine.load_calibration() {
            Ok(()) => {
                debug!("calibration loaded from {}", arbiter.config.calibration_path().display());
                arbiter.get_compass_bias();
                arbiter.get_gyro_bias();
                if arbiter.gyro_bias_available {
                    arbiter.set_gyro_bias();
                }
                arbiter.get_accel_bias();
                arbiter.get_factory_gyro_bias();
                if arbiter.factory_gyro_bias_available {
                    arbiter.set_factory_gyro_bias();
                }
                arbiter.get_factory_accel_bias();
                if arbiter.factory_accel_bias_available {
                    arbiter.set_factory_accel_bias();
                }
            }
            Err(e) => error!(
                "could not load calibration from {}: {}",
                arbiter.config.calibration_path().display(),
                e
            ),
        }

        for phys in SensorIndex::PHYSICAL {
            let on = arbiter
                .physical(phys)
                .map_or(false, |s| s.get_enable(None).unwrap_or(false));
            if on {
                arbiter.enabled |= phys.mask();
            }
        }
        arbiter
    }

    pub fn engine(&self) -> &E {
        &self.engine
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    pub fn enabled(&self) -> SensorMask {
        self.enabled
    }

    /// Handle listed for `index`, 0 when not listed.
    pub fn handle_of(&self, index: SensorIndex) -> i32 {
        self.pending[index.index()].sensor
    }

    pub fn gyro_bias(&self) -> [f32; 3] {
        self.gyro_bias
    }

    pub fn compass_bias(&self) -> [f32; 3] {
        self.compass_bias
    }

    /// Accel bias tracked by the library, mg, once one was reported.
    pub fn accel_bias(&self) -> Option<[i64; 3]> {
        self.accel_bias_available.then_some(self.accel_bias)
    }

    fn physical(&self, index: SensorIndex) -> Option<&dyn PhysicalSensor> {
        match index {
            SensorIndex::Accelerometer => self.accel.as_deref(),
            SensorIndex::Gyro => self.gyro.as_deref(),
            SensorIndex::MagneticField => self.compass.as_deref(),
            _ => None,
        }
    }

    fn physical_mut(&mut self, index: SensorIndex) -> Option<&mut Box<dyn PhysicalSensor>> {
        match index {
            SensorIndex::Accelerometer => self.accel.as_mut(),
            SensorIndex::Gyro => self.gyro.as_mut(),
            SensorIndex::MagneticField => self.compass.as_mut(),
            _ => None,
        }
    }

    fn index_of(&self, handle: i32) -> Result<SensorIndex> {
        SensorIndex::ALL
            .into_iter()
            .filter(|_| handle > 0)
            .find(|idx| self.pending[idx.index()].sensor == handle)
            .ok_or_else(|| {
                error!("unknown handle {}", handle);
                Error::UnknownHandle(handle)
            })
    }

    fn init_bias(&mut self) {
        for sensor in [self.accel.as_deref_mut(), self.gyro.as_deref_mut()]
            .into_iter()
            .flatten()
        {
            for axis in 0..3 {
                if let Err(e) = sensor.set_offset(0.0, Some(axis)) {
                    debug!("zero offset channel {}: {}", axis, e);
                }
            }
        }
    }

    /// Hand the mounting matrices and full scales to the library. The
    /// per-sensor matrices are disabled once the library rotates the data.
    fn set_device_properties(&mut self) {
        if let Some(gyro) = self.gyro.as_mut() {
            if let Ok(m) = gyro.get_matrix() {
                self.gyro_orientation = m;
            }
            gyro.set_matrix([0; 9]);
        }
        if let Some(accel) = self.accel.as_mut() {
            if let Ok(m) = accel.get_matrix() {
                self.accel_orientation = m;
            }
            accel.set_matrix([0; 9]);
        }

        self.engine
            .set_sample_rate(RateTarget::Gyro, DEFAULT_MPL_GYRO_RATE_US);
        self.engine
            .set_sample_rate(RateTarget::Compass, DEFAULT_MPL_COMPASS_RATE_US);

        let orient = orientation_to_scalar(&self.gyro_orientation);
        let scale = i64::from(self.gyro_scale) << 15;
        self.engine.set_gyro_orientation_and_scale(orient, scale);
        debug!("gyro scale {}", scale);

        let orient = orientation_to_scalar(&self.accel_orientation);
        let scale = i64::from(self.accel_scale) << 15;
        self.engine.set_accel_orientation_and_scale(orient, scale);
        debug!("accel scale {}", scale);

        if let Some(compass) = self.compass.as_mut() {
            let m = compass.get_matrix().unwrap_or([0; 9]);
            compass.set_matrix([0; 9]);
            let scale = compass.get_scale(None).unwrap_or(0.0);
            let sensitivity = (scale * (1u64 << 30) as f32) as i64;
            self.engine
                .set_compass_orientation_and_scale(orientation_to_scalar(&m), sensitivity);
            self.compass_scale = sensitivity;
            debug!("compass scale {}", sensitivity);
        }
    }

    fn store_calibration(&mut self) {
        if self.have_good_cal || self.accel_accuracy >= 2 || self.compass_accuracy >= 3 {
            match self.engine.store_calibration() {
                Ok(()) => debug!("calibration stored"),
                Err(e) => error!("cannot store calibration: {}", e),
            }
        }
    }

    fn get_compass_bias(&mut self) {
        let Some(compass) = self.compass.as_mut() else {
            return;
        };
        let m = compass.get_matrix().unwrap_or([0; 9]);
        compass.set_matrix([0; 9]);
        let orient = orientation_to_scalar(&m);

        let bias = self.engine.compass_bias();
        let body = convert_to_body(orient, bias);
        let sensitivity = match self.engine.compass_sensitivity() {
            0 => self.compass_scale,
            s => s,
        };
        let unit = sensitivity as f32 / (1u64 << 30) as f32;
        for (out, b) in self.compass_bias.iter_mut().zip(body) {
            *out = b as f32 * unit / 65536.0;
        }
        trace!("compass bias {:?} body {:?} uT {:?}", bias, body, self.compass_bias);
    }

    fn get_gyro_bias(&mut self) {
        self.gyro_chip_bias = self.engine.mpl_gyro_bias();
        let orient = orientation_to_scalar(&self.gyro_orientation);
        let body = convert_to_body(orient, self.gyro_chip_bias);
        let sensitivity = match self.engine.gyro_sensitivity() {
            0 => i64::from(self.gyro_scale),
            s => s,
        };
        let unit = sensitivity as f32 / (1u64 << 30) as f32;
        for (out, b) in self.gyro_bias.iter_mut().zip(body) {
            *out = b as f32 * unit / 65536.0 / 180.0 * PI;
            if *out != 0.0 {
                self.gyro_bias_available = true;
            }
        }
        trace!("gyro bias {:?} rad/s {:?}", body, self.gyro_bias);
    }

    fn set_gyro_bias(&mut self) {
        if !self.gyro_bias_available {
            return;
        }
        self.gyro_chip_bias = self.engine.gyro_bias_dmp_units();
        debug!("gyro bias (dmp units) {:?}", self.gyro_chip_bias);
    }

    fn get_accel_bias(&mut self) {
        self.accel_bias = self.engine.mpl_accel_bias();
        self.accel_bias_available = true;
        trace!("accel bias (mg) {:?}", self.accel_bias);
    }

    fn get_factory_gyro_bias(&mut self) {
        self.factory_gyro_bias = self.engine.gyro_bias();
        self.factory_gyro_bias_available = true;
        debug!("factory gyro bias {:?}", self.factory_gyro_bias);
    }

    fn get_factory_accel_bias(&mut self) {
        self.factory_accel_bias = self.engine.accel_bias();
        self.factory_accel_bias_available = true;
        debug!("factory accel bias (mg) {:?}", self.factory_accel_bias);
    }

    /// Apply the factory gyro bias as channel offsets.
    fn set_factory_gyro_bias(&mut self) {
        if !self.factory_gyro_bias_available {
            return;
        }
        let ratio = (self.gyro_scale / self.gyro_self_test_scale) as f32;
        let bias = self.factory_gyro_bias;
        let Some(gyro) = self.gyro.as_mut() else {
            return;
        };
        let mut failed = false;
        for (axis, b) in bias.iter().enumerate() {
            let offset = (*b as f32 / 65536.0 * ratio) * -1.0 / GYRO_OFFSET_SCALE;
            if let Err(e) = gyro.set_offset(offset, Some(axis)) {
                error!("gyro offset {} -> channel {} ERR: {}", offset, axis, e);
                failed = true;
            }
        }
        if !failed {
            self.factory_gyro_bias_available = false;
            debug!("factory gyro bias applied");
        }
    }

    /// Apply the factory accel bias as channel offsets.
    fn set_factory_accel_bias(&mut self) {
        if !self.factory_accel_bias_available {
            return;
        }
        let ratio = (self.accel_scale / self.accel_self_test_scale) as f32;
        let bias = self.factory_accel_bias;
        let Some(accel) = self.accel.as_mut() else {
            return;
        };
        let mut failed = false;
        for (axis, b) in bias.iter().enumerate() {
            let offset = -(*b as f32) / 65536.0 * ratio / ACCEL_OFFSET_SCALE;
            if let Err(e) = accel.set_offset(offset, Some(axis)) {
                error!("accel offset channel {} ERR: {}", axis, e);
                failed = true;
            }
        }
        if !failed {
            self.factory_accel_bias_available = false;
            debug!("factory accel bias applied");
        }
    }

    fn compass_disabled(&self) -> bool {
        self.compass.as_ref().map_or(true, |c| c.fd().is_none())
    }

    // =========================================================================
    // Handlers: library outputs to Android events
    // =========================================================================

    fn output_into(&mut self, source: SensorIndex, target: SensorIndex, len: usize) -> i32 {
        let out = self.engine.sensor_output(source);
        let ev = &mut self.pending[target.index()];
        ev.data[..len].copy_from_slice(&out.values[..len]);
        ev.timestamp = out.timestamp;
        out.update
    }

    fn handle_gyro(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 3);
        self.pending[idx.index()].status = self.gyro_accuracy;
        update != 0
    }

    fn handle_raw_gyro(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 3);
        let cal = self.engine.sensor_output(SensorIndex::Gyro);
        let ev = &mut self.pending[idx.index()];
        let bias = if self.gyro_accuracy != 0 {
            calculate_bias(&cal.values, &ev.data)
        } else {
            [0.0; 3]
        };
        if update != 0 {
            ev.set_bias(bias);
        }
        ev.status = SENSOR_STATUS_UNRELIABLE;
        update != 0
    }

    fn handle_accelerometer(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 3);
        self.pending[idx.index()].status = self.accel_accuracy;
        update != 0
    }

    fn handle_magnetic_field(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 3);
        self.pending[idx.index()].status = self.compass_accuracy;
        update != 0
    }

    fn handle_raw_magnetic_field(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 3);
        let cal = self.engine.sensor_output(SensorIndex::MagneticField);
        let ev = &mut self.pending[idx.index()];
        let bias = if self.compass_accuracy != 0 {
            calculate_bias(&cal.values, &ev.data)
        } else {
            [0.0; 3]
        };
        if update != 0 {
            ev.set_bias(bias);
        }
        ev.status = SENSOR_STATUS_UNRELIABLE;
        update != 0
    }

    fn handle_orientation(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 3);
        self.pending[idx.index()].status = self.compass_accuracy;
        update != 0 || self.compass_disabled()
    }

    fn handle_rotation_vector(&mut self, idx: SensorIndex) -> bool {
        self.output_into(idx, idx, 5);
        self.pending[idx.index()].status = self.compass_accuracy;
        true
    }

    fn handle_game_rotation_vector(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 5);
        self.pending[idx.index()].status = self.accel_accuracy;
        update != 0
    }

    fn handle_linear_accel(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 3);
        self.pending[idx.index()].status = self.accel_accuracy;
        update != 0 || self.compass_disabled()
    }

    fn handle_gravity(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 3);
        self.pending[idx.index()].status = self.compass_accuracy;
        update != 0 || self.compass_disabled()
    }

    fn handle_geomagnetic_rotation_vector(&mut self, idx: SensorIndex) -> bool {
        let update = self.output_into(idx, idx, 5);
        self.pending[idx.index()].status = self.compass_accuracy;
        update >= 1
    }

    // =========================================================================
    // Physical sample intake
    // =========================================================================

    /// Feed one event from the accel, gyro or temperature sensor. Returns the
    /// number of events forwarded to `out`.
    fn mpu_event(&mut self, out: &mut Vec<SensorEvent>, source: MpuSource) -> usize {
        let sensor = match source {
            MpuSource::Accel => self.accel.as_mut(),
            MpuSource::Gyro => self.gyro.as_mut(),
            MpuSource::Temperature => self.gyro_temp.as_mut(),
        };
        let Some(sensor) = sensor else {
            return 0;
        };
        let mut events = Vec::with_capacity(1);
        if !matches!(sensor.read_events(&mut events, 1, -1), Ok(n) if n > 0) {
            return 0;
        }
        let Some(ev) = events.pop() else {
            return 0;
        };

        if ev.is_meta() {
            let from = ev.meta_data.sensor;
            if from == self.handle_of(SensorIndex::Accelerometer) {
                self.flush_physical |= SensorMask::ACCELEROMETER;
                self.has_pending_event = true;
            } else if from == self.handle_of(SensorIndex::Gyro) {
                self.flush_physical |= SensorMask::GYRO;
                self.has_pending_event = true;
            } else {
                out.push(ev);
                return 1;
            }
            return 0;
        }

        match ev.sensor_type {
            SENSOR_TYPE_ACCELEROMETER => {
                let data = ev.vector().map(|v| v as i64);
                self.engine.build_accel(data, 0, ev.timestamp);
                trace!("accel data: {:?} - {}", data, ev.timestamp);
                self.has_pending_event = true;
                0
            }
            SENSOR_TYPE_GYROSCOPE => {
                let data = ev.vector().map(|v| v as i16);
                self.engine.build_gyro(data, ev.timestamp);
                trace!("gyro data: {:?} - {}", data, ev.timestamp);
                self.has_pending_event = true;
                0
            }
            SENSOR_TYPE_AMBIENT_TEMPERATURE | SENSOR_TYPE_TEMPERATURE => {
                let raw = ev.value() as i64;
                let mut temperature = raw << 16;
                if let Some(temp) = self.gyro_temp.as_mut() {
                    if let Ok(scale) = temp.get_scale(None) {
                        temperature = (temperature as f32 * scale) as i64;
                    }
                    if let Ok(offset) = temp.get_offset(None) {
                        temperature = (temperature as f32 + offset) as i64;
                    }
                }
                trace!("temperature raw {} -> {} - {}", raw, temperature, ev.timestamp);
                self.engine.build_temp(temperature, ev.timestamp);
                0
            }
            _ => {
                out.push(ev);
                1
            }
        }
    }

    fn build_mpu_event(&mut self, out: &mut Vec<SensorEvent>, count: usize) -> usize {
        let mut n = 0;
        for source in [MpuSource::Accel, MpuSource::Gyro, MpuSource::Temperature] {
            if n >= count {
                break;
            }
            n += self.mpu_event(out, source);
        }
        n
    }

    fn build_compass_event(&mut self, out: &mut Vec<SensorEvent>, count: usize) -> usize {
        if count < 1 {
            return 0;
        }
        let Some(compass) = self.compass.as_mut() else {
            return 0;
        };
        let mut events = Vec::with_capacity(1);
        if !matches!(compass.read_events(&mut events, 1, -1), Ok(n) if n > 0) {
            return 0;
        }
        let Some(ev) = events.pop() else {
            return 0;
        };

        if ev.is_meta() {
            if ev.meta_data.sensor == self.handle_of(SensorIndex::MagneticField) {
                self.flush_physical |= SensorMask::MAGNETIC_FIELD;
                self.has_pending_event = true;
                return 0;
            }
        } else if ev.sensor_type == SENSOR_TYPE_GEOMAGNETIC_FIELD {
            let data = ev.vector().map(|v| v as i64);
            self.engine.build_compass(data, 0, ev.timestamp);
            trace!("compass data: {:?} - {}", data, ev.timestamp);
            self.has_pending_event = true;
            return 0;
        }
        out.push(ev);
        1
    }

    /// Settle physical flush completions against the sensors waiting on them.
    fn redistribute_flushes(&mut self) {
        if self.flush_physical.is_empty() {
            return;
        }
        for idx in SensorIndex::ALL {
            let waiting = &mut self.flush_sensor[idx.index()];
            if waiting.intersects(self.flush_physical) {
                waiting.remove(self.flush_physical);
                if waiting.is_empty() {
                    self.flush |= idx.mask();
                }
            }
        }
        self.flush_physical = SensorMask::empty();
    }

    fn process_messages(&mut self) {
        let msg = self.engine.take_messages();
        if msg.is_empty() {
            return;
        }
        if msg.contains(FusionMessages::MOTION) {
            debug!("motion");
        }
        if msg.contains(FusionMessages::NO_MOTION) {
            debug!("no motion");
            // the gyro is calibrated after the first no motion
            self.gyro_accuracy = SENSOR_STATUS_ACCURACY_HIGH;
            self.have_good_cal = true;
        }
        if msg.contains(FusionMessages::NEW_AB) {
            debug!("new accel bias");
            self.get_accel_bias();
            self.accel_accuracy = self.engine.accel_accuracy();
        }
        if msg.contains(FusionMessages::NEW_GB) {
            debug!("new gyro bias");
            self.get_gyro_bias();
            self.set_gyro_bias();
        }
        if msg.contains(FusionMessages::NEW_FGB) {
            debug!("new factory gyro bias");
            self.get_factory_gyro_bias();
        }
        if msg.contains(FusionMessages::NEW_FAB) {
            debug!("new factory accel bias");
            self.get_factory_accel_bias();
        }
        if msg.contains(FusionMessages::NEW_CB) {
            debug!("new compass bias");
            self.get_compass_bias();
            self.compass_accuracy = self.engine.mag_accuracy();
        }
    }

    /// Append one listed sensor and record it. Returns false once `limit`
    /// entries have been appended.
    fn push_listed(
        &mut self,
        list: &mut Vec<SensorInfo>,
        idx: SensorIndex,
        mut info: SensorInfo,
        start: usize,
        limit: usize,
    ) -> bool {
        info.handle = list.len() as i32 + 1;
        self.pending[idx.index()].sensor = info.handle;
        self.sensor_list[idx.index()] = Some(info.clone());
        list.push(info);
        list.len() - start < limit
    }

    /// Power and FIFO fields of a virtual sensor built on `physical`.
    fn virtual_info(&self, idx: SensorIndex) -> SensorInfo {
        let mut info = mpl_sensor_info(idx);
        let sources: Vec<&SensorInfo> = idx
            .physical_mask()
            .indices()
            .filter_map(|p| self.sensor_list[p.index()].as_ref())
            .collect();
        info.power = sources.iter().map(|s| s.power).sum();
        if !self.config.fifo_zeroed_for_fusion {
            info.fifo_reserved_event_count = sources
                .iter()
                .map(|s| s.fifo_reserved_event_count)
                .min()
                .unwrap_or(0);
            info.fifo_max_event_count = sources
                .iter()
                .map(|s| s.fifo_max_event_count)
                .min()
                .unwrap_or(0);
        }
        if idx == SensorIndex::LinearAccel {
            if let Some(accel) = &self.sensor_list[SensorIndex::Accelerometer.index()] {
                info.resolution = accel.resolution;
                info.max_range = accel.max_range;
            }
        }
        info
    }

    /// List one physical sensor and adjust its description for fusion use.
    fn list_physical(&mut self, list: &mut Vec<SensorInfo>, phys: SensorIndex, limit: usize) {
        let zero_fifo = self.config.fifo_zeroed_for_fusion;
        let Some(sensor) = self.physical_mut(phys) else {
            return;
        };
        if limit == 0 || sensor.get_sensor_list(list, limit) == 0 {
            error!("no {:?} in sensor list", phys);
            self.drop_physical(phys);
            return;
        }
        let Some(sensor) = self.physical_mut(phys) else {
            return;
        };
        sensor.update_sensor_info(&mut |info: &mut SensorInfo| {
            if phys == SensorIndex::Accelerometer && info.version < 3 {
                info.max_range *= GRAVITY_EARTH;
                info.resolution *= GRAVITY_EARTH;
            }
            if zero_fifo {
                info.fifo_reserved_event_count = 0;
                info.fifo_max_event_count = 0;
            }
        });
        let Some(info) = sensor.sensor_info() else {
            self.drop_physical(phys);
            return;
        };
        if let Some(slot) = list.get_mut((info.handle - 1) as usize) {
            *slot = info.clone();
        }
        self.pending[phys.index()].sensor = info.handle;
        self.sensor_list[phys.index()] = Some(info);
    }

    fn drop_physical(&mut self, phys: SensorIndex) {
        match phys {
            SensorIndex::Accelerometer => self.accel = None,
            SensorIndex::Gyro => self.gyro = None,
            SensorIndex::MagneticField => self.compass = None,
            _ => {}
        }
    }
}

impl<E: FusionEngine> Sensor for FusionArbiter<E> {
    fn enable(&mut self, handle: i32, enable: bool) -> Result<()> {
        trace!("enable handle={} enable={}", handle, enable);
        let idx = self.index_of(handle)?;

        let mut enable_mask = self.enabled;
        enable_mask.set(idx.mask(), enable);
        let was = self.enabled.physical_requirements();
        let need = enable_mask.physical_requirements();
        let change = was ^ need;

        let mut failed = false;
        let mut store_cal = true;
        for phys in SensorIndex::PHYSICAL {
            if !change.has(phys) {
                continue;
            }
            let on = need.has(phys);
            let Some(sensor) = self.physical_mut(phys) else {
                continue;
            };
            match sensor.enable(0, on) {
                Err(e) => {
                    error!("{:?} enable={} ERR: {}", phys, on, e);
                    failed = true;
                }
                Ok(()) if on => debug!("{:?} enabled", phys),
                Ok(()) => {
                    debug!("{:?} was turned off", phys);
                    match phys {
                        SensorIndex::Accelerometer => self.engine.accel_was_turned_off(),
                        SensorIndex::Gyro => self.engine.gyro_was_turned_off(),
                        _ => self.engine.compass_was_turned_off(),
                    }
                    if store_cal {
                        self.store_calibration();
                        store_cal = false;
                    }
                }
            }
            if phys == SensorIndex::Gyro {
                // the gyro temperature follows the gyro
                if let Some(temp) = self.gyro_temp.as_mut() {
                    if let Err(e) = temp.enable(0, on) {
                        debug!("gyro temperature enable={}: {}", on, e);
                    }
                }
            }
        }

        if failed {
            return Err(Error::InvalidArgument("physical sensor enable failed"));
        }
        self.enabled = enable_mask;
        let i = idx.index();
        if let Err(e) = self.batch(handle, 0, self.period_ns[i], self.max_latency_ns[i]) {
            warn!("batch after enable handle={}: {}", handle, e);
        }
        Ok(())
    }

    fn batch(
        &mut self,
        handle: i32,
        flags: i32,
        sampling_period_ns: i64,
        max_report_latency_ns: i64,
    ) -> Result<()> {
        trace!(
            "batch handle={} flags={} period={} latency={}",
            handle,
            flags,
            sampling_period_ns,
            max_report_latency_ns
        );
        let idx = self.index_of(handle)?;

        // fastest rate of the enabled sensors, no faster than they allow
        let mut period = sampling_period_ns;
        let mut min_delay_us = 0i64;
        for i in self.enabled.indices().map(SensorIndex::index) {
            if let Some(info) = &self.sensor_list[i] {
                min_delay_us = min_delay_us.max(i64::from(info.min_delay));
            }
            if self.period_ns[i] != 0 && self.period_ns[i] < period {
                period = self.period_ns[i];
            }
        }
        period = period.max(min_delay_us * 1000);

        let running = self.enabled.physical_requirements();
        let mut result = Ok(());
        for phys in SensorIndex::PHYSICAL {
            let p = phys.index();
            if !running.has(phys) || self.period_hw[p] == period {
                continue;
            }
            let Some(sensor) = self.physical_mut(phys) else {
                continue;
            };
            let h = sensor.handle();
            match sensor.batch(h, flags, period, max_report_latency_ns) {
                Ok(()) => self.period_hw[p] = period,
                Err(e) => {
                    error!("{:?} batch period={} ERR: {}", phys, period, e);
                    result = Err(e);
                }
            }
        }

        self.period_ns[idx.index()] = period;
        self.max_latency_ns[idx.index()] = max_report_latency_ns;
        if result.is_ok() {
            for target in RateTarget::ALL {
                self.engine.set_sample_rate(target, period / 1000);
            }
        }
        result
    }

    fn flush(&mut self, handle: i32) -> Result<()> {
        let idx = self.index_of(handle)?;
        if !self.enabled.has(idx) {
            return Err(Error::InvalidArgument("flush while disabled"));
        }
        if let Some(info) = &self.sensor_list[idx.index()] {
            if info.fifo_max_event_count == 0 {
                // no batching, the meta event goes out on the next read
                self.flush |= idx.mask();
                return Ok(());
            }
        }

        let needed = idx.physical_mask();
        let mut waiting = needed;
        for phys in needed.indices() {
            let flushed = self
                .physical_mut(phys)
                .map_or(false, |s| {
                    let h = s.handle();
                    s.flush(h).is_ok()
                });
            if !flushed {
                waiting.remove(phys.mask());
            }
        }
        self.flush_sensor[idx.index()] = waiting;
        if waiting.is_empty() {
            self.flush |= idx.mask();
        }
        debug!(
            "flush handle={} {:?} waiting={:?} flush={:?}",
            handle, idx, waiting, self.flush
        );
        Ok(())
    }

    fn read_events(
        &mut self,
        out: &mut Vec<SensorEvent>,
        count: usize,
        handle: i32,
    ) -> Result<usize> {
        let mut n = 0;
        for idx in SensorIndex::ALL {
            if n >= count || self.flush.is_empty() {
                break;
            }
            if self.flush.has(idx) {
                self.flush.remove(idx.mask());
                let ev = SensorEvent::meta_flush(self.handle_of(idx));
                debug!("flush complete {:?} sensor={}", idx, ev.meta_data.sensor);
                out.push(ev);
                n += 1;
            }
        }
        if n >= count {
            return Ok(n);
        }

        if handle > 0 {
            let idx = self.index_of(handle)?;
            n += match idx {
                SensorIndex::MagneticField | SensorIndex::RawMagneticField => {
                    self.build_compass_event(out, count - n)
                }
                _ => self.build_mpu_event(out, count - n),
            };
            self.redistribute_flushes();
            return Ok(n);
        }

        self.has_pending_event = false;
        if let Err(e) = self.engine.execute_on_data() {
            warn!("fusion step: {}", e);
        }
        self.process_messages();

        for idx in self.enabled.indices() {
            let handler = self.handlers[idx.index()];
            if handler(self, idx) && n < count {
                out.push(self.pending[idx.index()]);
                n += 1;
            }
        }
        Ok(n)
    }

    fn get_sensor_list(&mut self, list: &mut Vec<SensorInfo>, limit: usize) -> usize {
        let start = list.len();
        for phys in SensorIndex::PHYSICAL {
            let room = limit.saturating_sub(list.len() - start);
            self.list_physical(list, phys, room);
        }
        if list.len() - start >= limit {
            return list.len() - start;
        }

        let has = |s: &Self, i: SensorIndex| s.sensor_list[i.index()].is_some();
        let mut listing: Vec<(SensorIndex, SensorInfo)> = Vec::new();
        if let Some(gyro) = &self.sensor_list[SensorIndex::Gyro.index()] {
            let mut info = gyro.clone();
            info.sensor_type = SENSOR_TYPE_GYROSCOPE_UNCALIBRATED;
            info.string_type = sensor_string_type(info.sensor_type).map(str::to_string);
            listing.push((SensorIndex::RawGyro, info));
        }
        if let Some(mag) = &self.sensor_list[SensorIndex::MagneticField.index()] {
            let mut info = mag.clone();
            info.sensor_type = SENSOR_TYPE_MAGNETIC_FIELD_UNCALIBRATED;
            info.string_type = sensor_string_type(info.sensor_type).map(str::to_string);
            listing.push((SensorIndex::RawMagneticField, info));
        }
        let accel = has(self, SensorIndex::Accelerometer);
        let gyro = has(self, SensorIndex::Gyro);
        let mag = has(self, SensorIndex::MagneticField);
        if accel && gyro && mag {
            for idx in [
                SensorIndex::Orientation,
                SensorIndex::RotationVector,
                SensorIndex::LinearAccel,
                SensorIndex::Gravity,
            ] {
                listing.push((idx, self.virtual_info(idx)));
            }
        }
        if accel && mag {
            let idx = SensorIndex::GeomagneticRotationVector;
            listing.push((idx, self.virtual_info(idx)));
        }
        if accel && gyro {
            let idx = SensorIndex::GameRotationVector;
            listing.push((idx, self.virtual_info(idx)));
        }

        for (idx, info) in listing {
            if !self.push_listed(list, idx, info, start, limit) {
                break;
            }
        }

        for (i, info) in list[start..].iter().enumerate() {
            debug!(
                "fusion sensor[{}] {} handle={} type={} range={} resolution={} power={} \
                 min_delay={} fifo={}/{}",
                start + i,
                info.name,
                info.handle,
                info.sensor_type,
                info.max_range,
                info.resolution,
                info.power,
                info.min_delay,
                info.fifo_reserved_event_count,
                info.fifo_max_event_count
            );
        }
        list.len() - start
    }

    fn sensor_list(&self) -> Vec<SensorInfo> {
        self.sensor_list.iter().flatten().cloned().collect()
    }

    fn poll_handles(&self) -> Vec<i32> {
        // one read of the motion chip drains accel, gyro and temperature
        let mpu = match self.handle_of(SensorIndex::Accelerometer) {
            0 => self.handle_of(SensorIndex::Gyro),
            h => h,
        };
        [mpu, self.handle_of(SensorIndex::MagneticField)]
            .into_iter()
            .filter(|h| *h > 0)
            .collect()
    }

    fn has_pending_events(&self) -> bool {
        self.has_pending_event
    }

    fn fd(&self) -> Option<RawFd> {
        None
    }

    fn init_fd(&mut self) -> Result<Option<PollTarget>> {
        Ok(None)
    }
}
