// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Contract with the motion processing library.
//!
//! The arbiter treats the fusion library as an opaque collaborator: it is
//! configured with sample rates and mounting orientation, fed raw samples,
//! and queried for fused outputs, bias estimates and calibration state.
//! Vectors in and out of the library are fixed point with 16 fractional bits
//! unless noted otherwise.

use super::mask::SensorIndex;
use crate::Result;
use bitflags::bitflags;

bitflags! {
    /// Level 0 messages raised by the library during
    /// [`FusionEngine::execute_on_data`].
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct FusionMessages: u32 {
        const MOTION = 0x0001;
        const NO_MOTION = 0x0002;
        /// New accel bias
        const NEW_AB = 0x0004;
        /// New gyro bias
        const NEW_GB = 0x0008;
        /// New factory gyro bias
        const NEW_FGB = 0x0010;
        /// New factory accel bias
        const NEW_FAB = 0x0020;
        /// New compass bias
        const NEW_CB = 0x0040;
    }
}

/// Sample rate targets of the library.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RateTarget {
    Accel,
    Gyro,
    Compass,
    Orientation,
    RotationVector,
    RotationVector6Axis,
    OrientationGeomagnetic,
    LinearAcceleration,
    Gravity,
    GeomagneticRotationVector,
}

impl RateTarget {
    pub const ALL: [RateTarget; 10] = [
        RateTarget::Accel,
        RateTarget::Gyro,
        RateTarget::Compass,
        RateTarget::Orientation,
        RateTarget::RotationVector,
        RateTarget::RotationVector6Axis,
        RateTarget::OrientationGeomagnetic,
        RateTarget::LinearAcceleration,
        RateTarget::Gravity,
        RateTarget::GeomagneticRotationVector,
    ];
}

/// One fused output in Android units.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct FusionOutput {
    /// Up to five components; rotation vectors use all of them
    pub values: [f32; 5],
    pub status: i8,
    pub timestamp: i64,
    /// Non-zero when the output changed since the last query
    pub update: i32,
}

/// The motion processing library.
pub trait FusionEngine {
    /// Library version banner.
    fn version(&self) -> String;

    /// Initialize with the default feature set and start processing.
    /// Compass features are only enabled when `compass` is true.
    fn init(&mut self, compass: bool) -> Result<()>;

    fn set_sample_rate(&mut self, target: RateTarget, period_us: i64);

    fn set_gyro_orientation_and_scale(&mut self, orientation: u16, scale: i64);

    fn set_accel_orientation_and_scale(&mut self, orientation: u16, scale: i64);

    fn set_compass_orientation_and_scale(&mut self, orientation: u16, sensitivity: i64);

    fn build_accel(&mut self, data: [i64; 3], status: i32, timestamp: i64);

    fn build_gyro(&mut self, data: [i16; 3], timestamp: i64);

    fn build_compass(&mut self, data: [i64; 3], status: i32, timestamp: i64);

    /// Die temperature, q16 degrees C. Ignored by libraries without
    /// temperature compensation.
    fn build_temp(&mut self, _temperature: i64, _timestamp: i64) {}

    /// Run the fusion step over the samples built since the last call.
    fn execute_on_data(&mut self) -> Result<()>;

    /// Pending level 0 messages; reading clears them.
    fn take_messages(&mut self) -> FusionMessages;

    fn accel_accuracy(&self) -> i8;

    fn mag_accuracy(&self) -> i8;

    fn accel_was_turned_off(&mut self);

    fn gyro_was_turned_off(&mut self);

    fn compass_was_turned_off(&mut self);

    fn load_calibration(&mut self) -> Result<()>;

    fn store_calibration(&mut self) -> Result<()>;

    /// Compass bias, chip frame
    fn compass_bias(&self) -> [i64; 3];

    /// 0 when unknown
    fn compass_sensitivity(&self) -> i64;

    /// Factory gyro bias from the calibration data
    fn gyro_bias(&self) -> [i64; 3];

    /// Factory accel bias from the calibration data, mg
    fn accel_bias(&self) -> [i64; 3];

    /// Gyro bias currently tracked by the library, chip frame
    fn mpl_gyro_bias(&self) -> [i64; 3];

    /// Gyro bias in DMP units
    fn gyro_bias_dmp_units(&self) -> [i64; 3];

    /// 0 when unknown
    fn gyro_sensitivity(&self) -> i64;

    /// Accel bias currently tracked by the library, mg
    fn mpl_accel_bias(&self) -> [i64; 3];

    /// Fused output for `index`.
    fn sensor_output(&mut self, index: SensorIndex) -> FusionOutput;
}

fn row_to_scalar(row: &[i8]) -> u16 {
    match row {
        [r, ..] if *r > 0 => 0,
        [r, ..] if *r < 0 => 4,
        [_, r, ..] if *r > 0 => 1,
        [_, r, ..] if *r < 0 => 5,
        [_, _, r, ..] if *r > 0 => 2,
        [_, _, r, ..] if *r < 0 => 6,
        _ => 7,
    }
}

/// Compact mounting matrix encoding: 3 bits per row, the column of the
/// non-zero entry plus 4 when it is negative.
pub fn orientation_to_scalar(matrix: &[i8; 9]) -> u16 {
    row_to_scalar(&matrix[0..3])
        | row_to_scalar(&matrix[3..6]) << 3
        | row_to_scalar(&matrix[6..9]) << 6
}

/// Rotate a chip frame vector into the body frame.
pub fn convert_to_body(orientation: u16, input: [i64; 3]) -> [i64; 3] {
    let axis = |shift: u16| {
        let v = input[usize::from((orientation >> shift) & 0x03).min(2)];
        if orientation & (0x004 << shift) != 0 {
            -v
        } else {
            v
        }
    };
    [axis(0), axis(3), axis(6)]
}
