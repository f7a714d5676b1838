// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Proximity reporting helper for proximity drivers.
//!
//! The driver reads its hardware, stores the count in [`Proximity::hw`] and
//! the sample time in [`Proximity::timestamp`], then calls
//! [`Proximity::read`]. This module decides whether and what to report,
//! maintains the hardware thresholds and computes the next poll delay. The
//! returned [`ReadOutcome`] tells the driver what to do next.
//!
//! Two output modes exist. With `max_range` and `resolution` both exactly
//! 1.0 the sensor is binary: 1 means far and 0 means near, and the
//! thresholds are absolute hardware counts. Otherwise the hardware count is
//! converted to a distance and interpolated through the calibration points,
//! and the thresholds form a hysteresis window around the last reported
//! count.

use crate::constants::SensorFlags;
use log::trace;

pub const FLOAT_SIGNIFICANCE_MICRO: u64 = 1_000_000;
pub const FLOAT_SIGNIFICANCE_NANO: u64 = 1_000_000_000;

/// Fixed point value: integer part and fraction in significance units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NvsFloat {
    pub ival: i32,
    pub fval: i32,
}

impl NvsFloat {
    pub const fn new(ival: i32, fval: i32) -> Self {
        Self { ival, fval }
    }

    /// Exactly 1.0
    pub fn is_one(&self) -> bool {
        self.ival == 1 && self.fval == 0
    }
}

/// Units of [`NvsFloat::fval`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FloatSignificance {
    #[default]
    Micro,
    Nano,
}

impl FloatSignificance {
    pub fn units(self) -> u64 {
        match self {
            FloatSignificance::Micro => FLOAT_SIGNIFICANCE_MICRO,
            FloatSignificance::Nano => FLOAT_SIGNIFICANCE_NANO,
        }
    }
}

/// Board configuration of a proximity sensor.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProximityConfig {
    /// Extra reports while inside the threshold window; 0 means 1
    pub report_n: u32,
    /// Hardware counts
    pub thresh_lo: u32,
    pub thresh_hi: u32,
    pub max_range: NvsFloat,
    pub resolution: NvsFloat,
    pub scale: NvsFloat,
    pub offset: NvsFloat,
    pub float_significance: FloatSignificance,
    /// Interpolation points, values before scale and offset
    pub uncal_lo: i32,
    pub uncal_hi: i32,
    pub cal_lo: i32,
    pub cal_hi: i32,
    pub delay_us_min: u32,
    pub flags: SensorFlags,
}

impl ProximityConfig {
    /// Board configuration hook. Proximity always reports on change.
    pub fn of_dt(&mut self) {
        self.flags = SensorFlags::ON_CHANGE_MODE;
    }
}

/// What the driver should do after [`Proximity::read`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// Poll the hardware after `poll_delay_ms`, interrupts or not.
    PollNext,
    /// Nothing to change.
    NoChange,
    /// Program `hw_thresh_lo`/`hw_thresh_hi` into the hardware.
    HwUpdate,
}

impl ReadOutcome {
    /// Kernel return convention: -1, 0 or 1.
    pub fn code(self) -> i32 {
        match self {
            ReadOutcome::PollNext => -1,
            ReadOutcome::NoChange => 0,
            ReadOutcome::HwUpdate => 1,
        }
    }
}

/// Linear interpolation of `x2` between `(x1, y1)` and `(x3, y3)`, floored
/// at 0. A degenerate x range passes `x2` through.
pub fn interpolate(x1: i32, x2: i64, x3: i32, y1: i32, y3: i32) -> u32 {
    let divisor = i64::from(x3) - i64::from(x1);
    if divisor == 0 {
        return x2 as u32;
    }
    let y2 = (x2 - i64::from(x1)) * (i64::from(y3) - i64::from(y1)) / divisor + i64::from(y1);
    y2.max(0) as u32
}

/// Shared state between a proximity driver and the reporting logic.
#[derive(Debug, Clone)]
pub struct Proximity {
    pub cfg: ProximityConfig,
    /// Latest hardware count
    pub hw: u32,
    /// Largest hardware count
    pub hw_mask: u32,
    pub hw_thresh_lo: u32,
    pub hw_thresh_hi: u32,
    /// Sample time of `hw`, nanoseconds
    pub timestamp: i64,
    pub timestamp_report: i64,
    /// Requested report period
    pub delay_us: u32,
    pub poll_delay_ms: u32,
    /// Reports left before the threshold window gates reporting again
    pub report: u32,
    /// Last reported value
    pub proximity: u32,
    pub proximity_binary_en: bool,
    pub calibration_en: bool,
    pub thresh_valid_lo: bool,
    pub thresh_valid_hi: bool,
    pub thresholds_valid: bool,
    pub hw_limit_lo: bool,
    pub hw_limit_hi: bool,
}

impl Proximity {
    pub fn new(cfg: ProximityConfig, hw_mask: u32) -> Self {
        Self {
            cfg,
            hw: 0,
            hw_mask,
            hw_thresh_lo: u32::MAX,
            hw_thresh_hi: 0,
            timestamp: 0,
            timestamp_report: 0,
            delay_us: 0,
            poll_delay_ms: 0,
            report: 0,
            proximity: 1,
            proximity_binary_en: false,
            calibration_en: false,
            thresh_valid_lo: false,
            thresh_valid_hi: false,
            thresholds_valid: false,
            hw_limit_lo: false,
            hw_limit_hi: false,
        }
    }

    /// Reset reporting state when the device is enabled.
    pub fn enable(&mut self) {
        if self.cfg.report_n == 0 {
            self.cfg.report_n = 1;
        }
        self.report = self.cfg.report_n;
        self.timestamp_report = 0;
        self.hw_thresh_hi = 0;
        self.hw_thresh_lo = u32::MAX;
        self.proximity = 1;
        self.proximity_binary_en = self.cfg.resolution.is_one() && self.cfg.max_range.is_one();
        self.calibration_en = self.cfg.scale.is_one();
        let delay_us = if self.delay_us != 0 {
            self.delay_us
        } else {
            self.cfg.delay_us_min
        };
        self.poll_delay_ms = delay_us / 1000;
        trace!(
            "proximity enable binary={} calibration={} poll={}ms",
            self.proximity_binary_en,
            self.calibration_en,
            self.poll_delay_ms
        );
    }

    /// Hardware count to distance in reporting units, before calibration.
    fn distance(&self, hw_distance: u32) -> i64 {
        let hw_distance = u64::from(hw_distance);
        let cfg = &self.cfg;
        let scale_f = cfg.scale.fval.max(0) as u64;

        let mut calc_f = 0;
        if cfg.resolution.fval != 0 {
            calc_f = hw_distance.wrapping_mul(cfg.resolution.fval as u64);
            if scale_f != 0 {
                calc_f /= scale_f;
            }
        }
        let mut calc_i = 0;
        if cfg.resolution.ival != 0 {
            let significance = cfg.float_significance.units();
            calc_i = if scale_f != 0 {
                significance / scale_f
            } else {
                significance
            };
            calc_i = calc_i.wrapping_mul(hw_distance.wrapping_mul(cfg.resolution.ival as u64));
        }
        calc_i.wrapping_add(calc_f) as i64
    }

    /// Process the sample in `hw`. `report` is called with the value and
    /// timestamp of each report.
    pub fn read(&mut self, mut report: impl FnMut(u32, i64)) -> ReadOutcome {
        let mut report_delay_min = true;
        let mut poll_delay: u32 = 0;

        if self.calibration_en {
            self.report = self.cfg.report_n;
        }
        if self.report < self.cfg.report_n {
            // rate limit everything but the first sample
            let elapsed = self.timestamp - self.timestamp_report;
            let delay = i64::from(self.delay_us) * 1000;
            if elapsed < delay {
                poll_delay = ((delay - elapsed) / 1000) as u32;
                report_delay_min = false;
            }
        }

        let mut thresh_lo = self.cfg.thresh_lo;
        let mut thresh_hi = self.cfg.thresh_hi;
        self.thresh_valid_lo = thresh_lo < self.hw_mask;
        if !self.thresh_valid_lo {
            thresh_lo = 0;
        }
        self.thresh_valid_hi = thresh_hi < self.hw_mask;
        if !self.thresh_valid_hi {
            thresh_hi = 0;
        }
        self.thresholds_valid = self.thresh_valid_lo && self.thresh_valid_hi;

        self.hw_limit_lo = self.hw < thresh_lo || self.hw == 0;
        self.hw_limit_hi = if self.proximity_binary_en {
            self.hw > thresh_hi
        } else {
            self.hw == self.hw_mask || self.hw > self.hw_mask - thresh_hi
        };

        let mut outcome = ReadOutcome::NoChange;
        if self.proximity_binary_en {
            if !self.thresholds_valid {
                // binary output needs a trigger, use mid range
                thresh_lo = self.hw_mask / 2;
                thresh_hi = thresh_lo;
                self.report = self.cfg.report_n;
            }
            if self.hw < self.hw_thresh_lo {
                self.proximity = 1;
                self.report = self.cfg.report_n;
                self.hw_thresh_lo = 0;
                self.hw_thresh_hi = thresh_hi;
            } else if self.hw > self.hw_thresh_hi {
                self.proximity = 0;
                self.report = self.cfg.report_n;
                self.hw_thresh_hi = self.hw_mask;
                self.hw_thresh_lo = thresh_lo;
            }
            if self.calibration_en {
                self.proximity = self.hw;
            }
            if self.report > 0 && report_delay_min {
                self.report -= 1;
                self.timestamp_report = self.timestamp;
                report(self.proximity, self.timestamp_report);
                outcome = ReadOutcome::HwUpdate;
            }
        } else {
            if !self.thresholds_valid
                || self.hw < self.hw_thresh_lo
                || self.hw > self.hw_thresh_hi
            {
                self.report = self.cfg.report_n;
            }
            if self.report > 0 && report_delay_min {
                self.report -= 1;
                self.timestamp_report = self.timestamp;
                // more reflected light means closer
                let calc = self.distance(self.hw_mask - self.hw);
                self.proximity = if self.calibration_en {
                    calc as u32
                } else {
                    interpolate(
                        self.cfg.uncal_lo,
                        calc,
                        self.cfg.uncal_hi,
                        self.cfg.cal_lo,
                        self.cfg.cal_hi,
                    )
                };
                report(self.proximity, self.timestamp_report);

                if self.thresholds_valid && self.report == 0 {
                    self.hw_thresh_lo = self.hw.saturating_sub(thresh_lo);
                    let hi = u64::from(self.hw) + u64::from(thresh_hi);
                    self.hw_thresh_hi = if hi > u64::from(self.hw_mask) {
                        self.hw_mask
                    } else {
                        hi as u32
                    };
                    outcome = ReadOutcome::HwUpdate;
                }
            }
        }

        if report_delay_min {
            poll_delay = self.delay_us;
        }
        if poll_delay < self.cfg.delay_us_min || self.calibration_en {
            poll_delay = self.cfg.delay_us_min;
        }
        self.poll_delay_ms = poll_delay / 1000;
        if self.report > 0 || self.calibration_en {
            outcome = ReadOutcome::PollNext;
        }
        trace!(
            "proximity hw={} value={} thresh={}..{} poll={}ms {:?}",
            self.hw,
            self.proximity,
            self.hw_thresh_lo,
            self.hw_thresh_hi,
            self.poll_delay_ms,
            outcome
        );
        outcome
    }
}
