// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Constants for the NVS sensor framework.
//!
//! This module contains the Android sensor type and string-type tables, the
//! reporting-mode flags, the IIO sysfs attribute names NVS understands, and
//! the channel suffix table used to route IIO channels into event fields.

use bitflags::bitflags;

/// Value written to the `flush` attribute to start a flush
pub const FLUSH_CMD_FLUSH: f32 = 1.0;
/// Full name of the IIO timestamp channel
pub const CHANNEL_TIMESTAMP: &str = "in_timestamp";
/// Standard gravity in m/s^2
pub const GRAVITY_EARTH: f32 = 9.806_65;

// =============================================================================
// Android Sensor Types
// =============================================================================

pub const SENSOR_TYPE_META_DATA: i32 = 0;
pub const SENSOR_TYPE_ACCELEROMETER: i32 = 1;
pub const SENSOR_TYPE_MAGNETIC_FIELD: i32 = 2;
/// Alias used by the fusion path
pub const SENSOR_TYPE_GEOMAGNETIC_FIELD: i32 = SENSOR_TYPE_MAGNETIC_FIELD;
pub const SENSOR_TYPE_ORIENTATION: i32 = 3;
pub const SENSOR_TYPE_GYROSCOPE: i32 = 4;
pub const SENSOR_TYPE_LIGHT: i32 = 5;
pub const SENSOR_TYPE_PRESSURE: i32 = 6;
pub const SENSOR_TYPE_TEMPERATURE: i32 = 7;
pub const SENSOR_TYPE_PROXIMITY: i32 = 8;
pub const SENSOR_TYPE_GRAVITY: i32 = 9;
pub const SENSOR_TYPE_LINEAR_ACCELERATION: i32 = 10;
pub const SENSOR_TYPE_ROTATION_VECTOR: i32 = 11;
pub const SENSOR_TYPE_RELATIVE_HUMIDITY: i32 = 12;
pub const SENSOR_TYPE_AMBIENT_TEMPERATURE: i32 = 13;
pub const SENSOR_TYPE_MAGNETIC_FIELD_UNCALIBRATED: i32 = 14;
pub const SENSOR_TYPE_GAME_ROTATION_VECTOR: i32 = 15;
pub const SENSOR_TYPE_GYROSCOPE_UNCALIBRATED: i32 = 16;
pub const SENSOR_TYPE_SIGNIFICANT_MOTION: i32 = 17;
pub const SENSOR_TYPE_STEP_DETECTOR: i32 = 18;
pub const SENSOR_TYPE_STEP_COUNTER: i32 = 19;
pub const SENSOR_TYPE_GEOMAGNETIC_ROTATION_VECTOR: i32 = 20;
pub const SENSOR_TYPE_HEART_RATE: i32 = 21;
pub const SENSOR_TYPE_TILT_DETECTOR: i32 = 22;
pub const SENSOR_TYPE_WAKE_GESTURE: i32 = 23;
pub const SENSOR_TYPE_GLANCE_GESTURE: i32 = 24;
pub const SENSOR_TYPE_PICK_UP_GESTURE: i32 = 25;

/// String type per sensor type, indexed by the type value. Index 0
/// (meta data) has no string type.
const SENSOR_STRING_TYPES: [Option<&str>; 26] = [
    None,
    Some("android.sensor.accelerometer"),
    Some("android.sensor.magnetic_field"),
    Some("android.sensor.orientation"),
    Some("android.sensor.gyroscope"),
    Some("android.sensor.light"),
    Some("android.sensor.pressure"),
    Some("android.sensor.temperature"),
    Some("android.sensor.proximity"),
    Some("android.sensor.gravity"),
    Some("android.sensor.linear_acceleration"),
    Some("android.sensor.rotation_vector"),
    Some("android.sensor.relative_humidity"),
    Some("android.sensor.ambient_temperature"),
    Some("android.sensor.magnetic_field_uncalibrated"),
    Some("android.sensor.game_rotation_vector"),
    Some("android.sensor.gyroscope_uncalibrated"),
    Some("android.sensor.significant_motion"),
    Some("android.sensor.step_detector"),
    Some("android.sensor.step_counter"),
    Some("android.sensor.geomagnetic_rotation_vector"),
    Some("android.sensor.heart_rate"),
    Some("android.sensor.tilt_detector"),
    Some("android.sensor.wake_gesture"),
    Some("android.sensor.glance_gesture"),
    Some("android.sensor.pick_up_gesture"),
];

/// Android string type for a sensor type, if the type is known.
pub fn sensor_string_type(sensor_type: i32) -> Option<&'static str> {
    usize::try_from(sensor_type)
        .ok()
        .and_then(|i| SENSOR_STRING_TYPES.get(i).copied().flatten())
}

// =============================================================================
// Event Status and Meta Data
// =============================================================================

pub const SENSOR_STATUS_NO_CONTACT: i8 = -1;
pub const SENSOR_STATUS_UNRELIABLE: i8 = 0;
pub const SENSOR_STATUS_ACCURACY_LOW: i8 = 1;
pub const SENSOR_STATUS_ACCURACY_MEDIUM: i8 = 2;
pub const SENSOR_STATUS_ACCURACY_HIGH: i8 = 3;

/// Meta data event: flush completed
pub const META_DATA_FLUSH_COMPLETE: i32 = 1;
/// Version field carried by meta data events
pub const META_DATA_VERSION: i32 = 2;
/// Version field carried by data events
pub const SENSORS_EVENT_VERSION: i32 = 104;

bitflags! {
    /// `sensor_t.flags` bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SensorFlags: u32 {
        const WAKE_UP = 0x1;
        const ON_CHANGE_MODE = 0x2;
        const ONE_SHOT_MODE = 0x4;
        const SPECIAL_REPORTING_MODE = 0x6;
    }
}

impl SensorFlags {
    /// Reporting-mode test as the HAL does it: any on-change bit set.
    pub fn is_on_change(self) -> bool {
        self.intersects(Self::ON_CHANGE_MODE)
    }

    pub fn is_one_shot(self) -> bool {
        self.intersects(Self::ONE_SHOT_MODE)
    }
}

// =============================================================================
// IIO Channel Attributes
// =============================================================================

/// The sysfs attributes NVS probes for every channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Attr {
    BatchFlags = 0,
    BatchPeriod,
    BatchTimeout,
    Delay,
    Flush,
    MaxRange,
    Offset,
    Raw,
    Resolution,
    Scale,
}

/// Number of attributes in [`Attr`]
pub const ATTR_N: usize = 10;

impl Attr {
    pub const ALL: [Attr; ATTR_N] = [
        Attr::BatchFlags,
        Attr::BatchPeriod,
        Attr::BatchTimeout,
        Attr::Delay,
        Attr::Flush,
        Attr::MaxRange,
        Attr::Offset,
        Attr::Raw,
        Attr::Resolution,
        Attr::Scale,
    ];

    /// The sysfs file suffix for this attribute.
    pub fn sysfs_name(self) -> &'static str {
        match self {
            Attr::BatchFlags => "batch_flags",
            Attr::BatchPeriod => "batch_period",
            Attr::BatchTimeout => "batch_timeout",
            Attr::Delay => "sampling_frequency",
            Attr::Flush => "flush",
            Attr::MaxRange => "peak_raw",
            Attr::Offset => "offset",
            Attr::Raw => "raw",
            Attr::Resolution => "peak_scale",
            Attr::Scale => "scale",
        }
    }

    pub fn index(self) -> usize {
        self as usize
    }
}

// =============================================================================
// Event Data Routing
// =============================================================================

/// Which part of the output event a channel fills.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DataType {
    #[default]
    Unknown,
    /// Scalar stored as float, scale and offset applied
    Float,
    /// Unscaled 64-bit value (counters)
    U64,
    /// Axis of a 3-vector
    Vec,
    /// Uncalibrated axis
    Uncal,
    /// Bias axis accompanying uncalibrated data
    Bias,
    /// Heart rate bpm or status
    Heart,
}

/// Channel post-name suffixes and where their data lands in the event.
pub const DATA_TYPE_TABLE: [(&str, DataType, usize); 10] = [
    ("x", DataType::Vec, 0),
    ("y", DataType::Vec, 1),
    ("z", DataType::Vec, 2),
    ("x_uncalib", DataType::Uncal, 0),
    ("y_uncalib", DataType::Uncal, 1),
    ("z_uncalib", DataType::Uncal, 2),
    ("x_bias", DataType::Bias, 3),
    ("y_bias", DataType::Bias, 4),
    ("z_bias", DataType::Bias, 5),
    ("bpm", DataType::Heart, 0),
];

/// Look up the event routing for a channel post-name.
pub fn data_type_for(post_name: &str) -> Option<(DataType, usize)> {
    DATA_TYPE_TABLE
        .iter()
        .find(|(name, _, _)| *name == post_name)
        .map(|&(_, dt, idx)| (dt, idx))
}

// =============================================================================
// Fusion Defaults
// =============================================================================

/// Default fusion gyro rate in microseconds
pub const DEFAULT_MPL_GYRO_RATE_US: i64 = 20_000;
/// Default fusion compass rate in microseconds
pub const DEFAULT_MPL_COMPASS_RATE_US: i64 = 20_000;
/// Initial sample period for every fusion index
pub const DEFAULT_SAMPLE_PERIOD_NS: i64 = 1_000_000_000;
/// Gyro full scale the factory bias was measured at (dps)
pub const GYRO_SELF_TEST_SCALE: i32 = 250;
/// Accel full scale the factory bias was measured at (g)
pub const ACCEL_SELF_TEST_SCALE: i32 = 2;
/// Accel self-test scale for the mpu6050 part
pub const ACCEL_SELF_TEST_SCALE_MPU6050: i32 = 8;
/// Hardware divisor of the gyro offset register
pub const GYRO_OFFSET_SCALE: f32 = 4.0;
/// Hardware divisor of the accel offset register
pub const ACCEL_OFFSET_SCALE: f32 = 16.0;
/// Vendor string for fusion-provided sensors
pub const MPL_VENDOR: &str = "Invensense";
pub const MPL_MIN_DELAY_US: i32 = 10_000;
pub const MPL_MAX_DELAY_US: i32 = 255_000;

/// First handle given to sensors that are not in the sensor list
pub const UNLISTED_HANDLE_BASE: i32 = 0x1000;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_type_table() {
        assert_eq!(sensor_string_type(SENSOR_TYPE_META_DATA), None);
        assert_eq!(
            sensor_string_type(SENSOR_TYPE_ACCELEROMETER),
            Some("android.sensor.accelerometer")
        );
        assert_eq!(
            sensor_string_type(SENSOR_TYPE_PICK_UP_GESTURE),
            Some("android.sensor.pick_up_gesture")
        );
        assert_eq!(sensor_string_type(-3), None);
        assert_eq!(sensor_string_type(99), None);
    }

    #[test]
    fn test_attr_names_in_order() {
        for (i, attr) in Attr::ALL.iter().enumerate() {
            assert_eq!(attr.index(), i, "attribute {:?} out of order", attr);
        }
        assert_eq!(Attr::Delay.sysfs_name(), "sampling_frequency");
        assert_eq!(Attr::MaxRange.sysfs_name(), "peak_raw");
        assert_eq!(Attr::Resolution.sysfs_name(), "peak_scale");
    }

    #[test]
    fn test_data_type_lookup() {
        assert_eq!(data_type_for("y"), Some((DataType::Vec, 1)));
        assert_eq!(data_type_for("z_bias"), Some((DataType::Bias, 5)));
        assert_eq!(data_type_for("bpm"), Some((DataType::Heart, 0)));
        // prefix matches do not count
        assert_eq!(data_type_for("x_"), None);
        assert_eq!(data_type_for("raw"), None);
    }

    #[test]
    fn test_reporting_mode() {
        let flags = SensorFlags::from_bits_retain(0x2 | 0x1);
        assert!(flags.is_on_change());
        assert!(!flags.is_one_shot());
        assert!(SensorFlags::ONE_SHOT_MODE.is_one_shot());
        assert!(!SensorFlags::WAKE_UP.is_on_change());
    }
}
