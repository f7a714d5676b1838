// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Filesystem locations and board-level switches.

use std::path::{Path, PathBuf};

/// Root of the IIO device directories in sysfs
pub const DEFAULT_SYSFS_ROOT: &str = "/sys/bus/iio/devices";
/// Directory holding the IIO character devices
pub const DEFAULT_DEV_ROOT: &str = "/dev";
/// Fusion calibration blob
pub const DEFAULT_CALIBRATION_PATH: &str = "/data/inv_cal_data.bin";

/// Where the stack finds its devices and files.
///
/// The defaults are the production locations. Tests point `sysfs_root` and
/// `dev_root` at a temporary tree instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NvsConfig {
    /// Directory containing `iio:device<N>` sysfs nodes
    pub sysfs_root: PathBuf,
    /// Directory containing `iio:device<N>` character devices
    pub dev_root: PathBuf,
    /// Calibration blob handed to the fusion engine
    pub calibration_path: PathBuf,
    /// Zero the FIFO fields of physical sensors placed behind fusion
    pub fifo_zeroed_for_fusion: bool,
}

impl Default for NvsConfig {
    fn default() -> Self {
        Self {
            sysfs_root: PathBuf::from(DEFAULT_SYSFS_ROOT),
            dev_root: PathBuf::from(DEFAULT_DEV_ROOT),
            calibration_path: PathBuf::from(DEFAULT_CALIBRATION_PATH),
            fifo_zeroed_for_fusion: true,
        }
    }
}

impl NvsConfig {
    pub fn with_sysfs_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.sysfs_root = root.into();
        self
    }

    pub fn with_dev_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.dev_root = root.into();
        self
    }

    pub fn with_calibration_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.calibration_path = path.into();
        self
    }

    pub fn with_fifo_zeroed_for_fusion(mut self, zeroed: bool) -> Self {
        self.fifo_zeroed_for_fusion = zeroed;
        self
    }

    /// sysfs directory of IIO device `dev_num`
    pub fn device_sysfs_path(&self, dev_num: u32) -> PathBuf {
        self.sysfs_root.join(format!("iio:device{}", dev_num))
    }

    /// Character device of IIO device `dev_num`
    pub fn device_node_path(&self, dev_num: u32) -> PathBuf {
        self.dev_root.join(format!("iio:device{}", dev_num))
    }

    pub fn calibration_path(&self) -> &Path {
        &self.calibration_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_paths() {
        let cfg = NvsConfig::default();
        assert_eq!(
            cfg.device_sysfs_path(3),
            PathBuf::from("/sys/bus/iio/devices/iio:device3")
        );
        assert_eq!(cfg.device_node_path(0), PathBuf::from("/dev/iio:device0"));
        assert!(cfg.fifo_zeroed_for_fusion);
    }

    #[test]
    fn test_overrides() {
        let cfg = NvsConfig::default()
            .with_sysfs_root("/tmp/sys")
            .with_dev_root("/tmp/dev")
            .with_calibration_path("/tmp/cal.bin");
        assert_eq!(cfg.device_sysfs_path(1), PathBuf::from("/tmp/sys/iio:device1"));
        assert_eq!(cfg.device_node_path(1), PathBuf::from("/tmp/dev/iio:device1"));
        assert_eq!(cfg.calibration_path(), Path::new("/tmp/cal.bin"));
    }
}
