// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Sensor indices of the fusion arbiter and bit sets over them.

use crate::constants::*;
use bitflags::bitflags;

/// Sensors the fusion arbiter exposes, physical ones included.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum SensorIndex {
    Gyro = 0,
    RawGyro,
    Accelerometer,
    MagneticField,
    RawMagneticField,
    Orientation,
    RotationVector,
    GameRotationVector,
    LinearAccel,
    Gravity,
    GeomagneticRotationVector,
}

impl SensorIndex {
    pub const COUNT: usize = 11;

    pub const ALL: [SensorIndex; Self::COUNT] = [
        SensorIndex::Gyro,
        SensorIndex::RawGyro,
        SensorIndex::Accelerometer,
        SensorIndex::MagneticField,
        SensorIndex::RawMagneticField,
        SensorIndex::Orientation,
        SensorIndex::RotationVector,
        SensorIndex::GameRotationVector,
        SensorIndex::LinearAccel,
        SensorIndex::Gravity,
        SensorIndex::GeomagneticRotationVector,
    ];

    /// Physical sensors in the order they are switched.
    pub const PHYSICAL: [SensorIndex; 3] = [
        SensorIndex::Accelerometer,
        SensorIndex::Gyro,
        SensorIndex::MagneticField,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn mask(self) -> SensorMask {
        SensorMask::from_bits_retain(1 << self as u32)
    }

    /// Physical sensors that must run for this sensor to produce data.
    pub fn physical_mask(self) -> SensorMask {
        match self {
            SensorIndex::Gyro | SensorIndex::RawGyro => SensorMask::GYRO,
            SensorIndex::Accelerometer => SensorMask::ACCELEROMETER,
            SensorIndex::MagneticField | SensorIndex::RawMagneticField => {
                SensorMask::MAGNETIC_FIELD
            }
            SensorIndex::Orientation
            | SensorIndex::RotationVector
            | SensorIndex::LinearAccel
            | SensorIndex::Gravity => SensorMask::PHYSICAL,
            SensorIndex::GameRotationVector => SensorMask::ACCELEROMETER | SensorMask::GYRO,
            SensorIndex::GeomagneticRotationVector => {
                SensorMask::ACCELEROMETER | SensorMask::MAGNETIC_FIELD
            }
        }
    }

    pub fn sensor_type(self) -> i32 {
        match self {
            SensorIndex::Gyro => SENSOR_TYPE_GYROSCOPE,
            SensorIndex::RawGyro => SENSOR_TYPE_GYROSCOPE_UNCALIBRATED,
            SensorIndex::Accelerometer => SENSOR_TYPE_ACCELEROMETER,
            SensorIndex::MagneticField => SENSOR_TYPE_MAGNETIC_FIELD,
            SensorIndex::RawMagneticField => SENSOR_TYPE_MAGNETIC_FIELD_UNCALIBRATED,
            SensorIndex::Orientation => SENSOR_TYPE_ORIENTATION,
            SensorIndex::RotationVector => SENSOR_TYPE_ROTATION_VECTOR,
            SensorIndex::GameRotationVector => SENSOR_TYPE_GAME_ROTATION_VECTOR,
            SensorIndex::LinearAccel => SENSOR_TYPE_LINEAR_ACCELERATION,
            SensorIndex::Gravity => SENSOR_TYPE_GRAVITY,
            SensorIndex::GeomagneticRotationVector => SENSOR_TYPE_GEOMAGNETIC_ROTATION_VECTOR,
        }
    }
}

bitflags! {
    /// Set of [`SensorIndex`] values, one bit per index.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct SensorMask: u32 {
        const GYRO = 1 << 0;
        const RAW_GYRO = 1 << 1;
        const ACCELEROMETER = 1 << 2;
        const MAGNETIC_FIELD = 1 << 3;
        const RAW_MAGNETIC_FIELD = 1 << 4;
        const ORIENTATION = 1 << 5;
        const ROTATION_VECTOR = 1 << 6;
        const GAME_ROTATION_VECTOR = 1 << 7;
        const LINEAR_ACCEL = 1 << 8;
        const GRAVITY = 1 << 9;
        const GEOMAGNETIC_ROTATION_VECTOR = 1 << 10;

        const PHYSICAL = Self::ACCELEROMETER.bits()
            | Self::GYRO.bits()
            | Self::MAGNETIC_FIELD.bits();
        const VIRTUAL_9AXES = Self::ORIENTATION.bits()
            | Self::ROTATION_VECTOR.bits()
            | Self::LINEAR_ACCEL.bits()
            | Self::GRAVITY.bits();
    }
}

impl SensorMask {
    pub fn has(self, index: SensorIndex) -> bool {
        self.contains(index.mask())
    }

    /// Indices in the set, lowest first.
    pub fn indices(self) -> impl Iterator<Item = SensorIndex> {
        SensorIndex::ALL.into_iter().filter(move |i| self.has(*i))
    }

    /// Union of the physical requirements of every sensor in the set.
    pub fn physical_requirements(self) -> SensorMask {
        self.indices()
            .fold(SensorMask::empty(), |acc, i| acc | i.physical_mask())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_index_bits_match_flags() {
        assert_eq!(SensorIndex::Gyro.mask(), SensorMask::GYRO);
        assert_eq!(SensorIndex::Accelerometer.mask(), SensorMask::ACCELEROMETER);
        assert_eq!(
            SensorIndex::GeomagneticRotationVector.mask(),
            SensorMask::GEOMAGNETIC_ROTATION_VECTOR
        );
        for (i, idx) in SensorIndex::ALL.iter().enumerate() {
            assert_eq!(idx.index(), i);
        }
    }

    #[test]
    fn test_physical_requirements() {
        let game = SensorIndex::GameRotationVector.mask();
        assert_eq!(
            game.physical_requirements(),
            SensorMask::ACCELEROMETER | SensorMask::GYRO
        );
        let set = SensorMask::RAW_GYRO | SensorMask::GEOMAGNETIC_ROTATION_VECTOR;
        assert_eq!(set.physical_requirements(), SensorMask::PHYSICAL);
        assert!(SensorMask::empty().physical_requirements().is_empty());
        for idx in SensorMask::VIRTUAL_9AXES.indices() {
            assert_eq!(idx.physical_mask(), SensorMask::PHYSICAL);
        }
    }

    #[test]
    fn test_indices_in_order() {
        let set = SensorMask::GRAVITY | SensorMask::GYRO | SensorMask::MAGNETIC_FIELD;
        let v: Vec<_> = set.indices().collect();
        assert_eq!(
            v,
            vec![
                SensorIndex::Gyro,
                SensorIndex::MagneticField,
                SensorIndex::Gravity
            ]
        );
    }

    #[test]
    fn test_change_mask() {
        // the physical sensors whose state flips
        let before = SensorMask::GAME_ROTATION_VECTOR.physical_requirements();
        let after = SensorMask::ROTATION_VECTOR.physical_requirements();
        assert_eq!(before ^ after, SensorMask::MAGNETIC_FIELD);
    }
}
