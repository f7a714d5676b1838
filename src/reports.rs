// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sensor events and sensor descriptions.
//!
//! This module contains the records handed across the sensor HAL surface:
//! [`SensorEvent`] for samples and meta events, and [`SensorInfo`] for the
//! static description of each sensor in the sensor list.

use crate::constants::{
    SensorFlags, META_DATA_FLUSH_COMPLETE, META_DATA_VERSION, SENSORS_EVENT_VERSION,
    SENSOR_TYPE_META_DATA,
};

/// Payload of a meta data event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetaData {
    /// What happened, e.g. [`META_DATA_FLUSH_COMPLETE`]
    pub what: i32,
    /// Handle of the sensor the event is about
    pub sensor: i32,
}

/// One sensor sample or meta event.
///
/// The float and u64 payloads overlay each other in the HAL ABI; here they
/// are kept apart and a sensor only fills the one its channels use.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct SensorEvent {
    pub version: i32,
    /// Handle of the sensor producing the event
    pub sensor: i32,
    pub sensor_type: i32,
    /// Nanoseconds, CLOCK_MONOTONIC
    pub timestamp: i64,
    pub data: [f32; 16],
    pub u64_data: [u64; 8],
    /// Accuracy status of vector events
    pub status: i8,
    pub meta_data: MetaData,
}

impl SensorEvent {
    /// Empty data event template for a sensor.
    pub fn new(sensor: i32, sensor_type: i32) -> Self {
        Self {
            version: SENSORS_EVENT_VERSION,
            sensor,
            sensor_type,
            ..Default::default()
        }
    }

    /// Flush-complete meta event for the sensor with handle `sensor`.
    pub fn meta_flush(sensor: i32) -> Self {
        Self {
            version: META_DATA_VERSION,
            sensor: 0,
            sensor_type: SENSOR_TYPE_META_DATA,
            meta_data: MetaData {
                what: META_DATA_FLUSH_COMPLETE,
                sensor,
            },
            ..Default::default()
        }
    }

    pub fn is_meta(&self) -> bool {
        self.sensor_type == SENSOR_TYPE_META_DATA
    }

    pub fn is_flush_complete(&self) -> bool {
        self.is_meta() && self.meta_data.what == META_DATA_FLUSH_COMPLETE
    }

    /// `[x, y, z]`
    pub fn vector(&self) -> [f32; 3] {
        [self.data[0], self.data[1], self.data[2]]
    }

    pub fn set_vector(&mut self, v: [f32; 3]) {
        self.data[..3].copy_from_slice(&v);
    }

    /// Uncalibrated `[x, y, z]`
    pub fn uncalib(&self) -> [f32; 3] {
        self.vector()
    }

    /// Bias estimate accompanying uncalibrated data
    pub fn bias(&self) -> [f32; 3] {
        [self.data[3], self.data[4], self.data[5]]
    }

    pub fn set_bias(&mut self, bias: [f32; 3]) {
        self.data[3..6].copy_from_slice(&bias);
    }

    /// Heart rate in beats per minute
    pub fn bpm(&self) -> f32 {
        self.data[0]
    }

    /// Scalar sensors (light, pressure, proximity, temperature, ...)
    pub fn value(&self) -> f32 {
        self.data[0]
    }

    /// Counter sensors (step counter)
    pub fn counter(&self) -> u64 {
        self.u64_data[0]
    }
}

/// Static description of a sensor as it appears in the sensor list.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SensorInfo {
    pub name: String,
    pub vendor: String,
    pub version: i32,
    /// 1-based position in the sensor list
    pub handle: i32,
    pub sensor_type: i32,
    pub max_range: f32,
    pub resolution: f32,
    /// Current draw in mA
    pub power: f32,
    /// Microseconds; 0 means on-change, negative means one-shot
    pub min_delay: i32,
    pub fifo_reserved_event_count: u32,
    pub fifo_max_event_count: u32,
    pub string_type: Option<String>,
    pub required_permission: Option<String>,
    /// Microseconds
    pub max_delay: i32,
    pub flags: SensorFlags,
}

impl SensorInfo {
    /// On-change sensors only report when a value moves.
    pub fn reports_on_change(&self) -> bool {
        self.min_delay == 0 || self.flags.is_on_change()
    }

    pub fn is_one_shot(&self) -> bool {
        self.min_delay < 0 || self.flags.is_one_shot()
    }
}

/// Current CLOCK_MONOTONIC time in nanoseconds.
pub fn monotonic_ns() -> i64 {
    let mut ts = libc::timespec {
        tv_sec: 0,
        tv_nsec: 0,
    };
    // SAFETY: ts is a valid, writable timespec
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SENSOR_TYPE_ACCELEROMETER;

    #[test]
    fn test_meta_flush_event() {
        let ev = SensorEvent::meta_flush(7);
        assert!(ev.is_meta());
        assert!(ev.is_flush_complete());
        assert_eq!(ev.version, META_DATA_VERSION);
        assert_eq!(ev.meta_data.sensor, 7);
        assert_eq!(ev.sensor, 0);
    }

    #[test]
    fn test_vector_accessors() {
        let mut ev = SensorEvent::new(1, SENSOR_TYPE_ACCELEROMETER);
        assert_eq!(ev.version, SENSORS_EVENT_VERSION);
        assert!(!ev.is_meta());
        ev.set_vector([1.0, 2.0, 3.0]);
        ev.set_bias([0.1, 0.2, 0.3]);
        assert_eq!(ev.uncalib(), [1.0, 2.0, 3.0]);
        assert_eq!(ev.bias(), [0.1, 0.2, 0.3]);
    }

    #[test]
    fn test_reporting_modes() {
        let mut info = SensorInfo {
            min_delay: 10_000,
            ..Default::default()
        };
        assert!(!info.reports_on_change());
        info.flags = SensorFlags::ON_CHANGE_MODE;
        assert!(info.reports_on_change());
        info.flags = SensorFlags::empty();
        info.min_delay = -1;
        assert!(info.is_one_shot());
    }

    #[test]
    fn test_monotonic_clock_advances() {
        let a = monotonic_ns();
        let b = monotonic_ns();
        assert!(a > 0);
        assert!(b >= a);
    }
}
