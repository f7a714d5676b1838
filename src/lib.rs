// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! NVS sensor framework.
//!
//! A driver-independent sensor layer over the Linux IIO subsystem. Channels
//! are discovered from `scan_elements`, raw scan records are decoded into
//! typed values, and the result is presented through an Android-style sensor
//! HAL surface (sensor list, enable, batch, flush, read events). Physical
//! accel, gyro and magnetometer sensors can be placed behind a
//! [`fusion::FusionArbiter`] which multiplexes them into virtual sensors.

pub mod config;
pub mod constants;
pub mod device;
pub mod driver;
pub mod fusion;
pub mod hal;
pub mod interface;
pub mod proximity;
pub mod reports;

use std::{io, path::PathBuf};
use thiserror::Error;

pub use config::NvsConfig;
pub use driver::{Nvs, PhysicalSensor, Sensor};
pub use reports::{MetaData, SensorEvent, SensorInfo};

/// Errors in this crate
#[derive(Debug, Error)]
pub enum Error {
    /// The attribute has no sysfs representation on this device
    #[error("attribute has no sysfs path")]
    NoAttribute,
    /// Opening, reading or writing a file failed
    #[error("{}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    /// A read or write transferred nothing
    #[error("short transfer on {}", .0.display())]
    ShortIo(PathBuf),
    /// File contents did not parse as the expected scalar
    #[error("cannot parse {value:?} from {}", path.display())]
    Parse { path: PathBuf, value: String },
    /// The device node does not exist or has no channels
    #[error("no such device")]
    NoDevice,
    /// Channel discovery found nothing usable
    #[error("no device channels")]
    NoChannels,
    /// Request rejected by the sensor protocol
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),
    /// No sensor owns this handle
    #[error("unknown sensor handle {0}")]
    UnknownHandle(i32),
    /// Error code returned by the fusion engine
    #[error("fusion engine error {0}")]
    Fusion(i32),
}

impl Error {
    /// Negative errno equivalent as reported through the sensor HAL ABI.
    pub fn errno(&self) -> i32 {
        match self {
            Error::NoAttribute | Error::InvalidArgument(_) | Error::UnknownHandle(_) => {
                -libc::EINVAL
            }
            Error::Io { source, .. } => -source.raw_os_error().unwrap_or(libc::ENOENT),
            Error::ShortIo(_) | Error::Parse { .. } => -libc::EIO,
            Error::NoDevice | Error::NoChannels => -libc::ENODEV,
            Error::Fusion(code) => -code.abs(),
        }
    }

    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_errno_mapping() {
        assert_eq!(Error::NoAttribute.errno(), -libc::EINVAL);
        assert_eq!(Error::InvalidArgument("flush").errno(), -libc::EINVAL);
        assert_eq!(Error::NoDevice.errno(), -libc::ENODEV);
        assert_eq!(Error::ShortIo(PathBuf::from("/x")).errno(), -libc::EIO);
        let e = Error::io("/x", io::Error::from_raw_os_error(libc::EACCES));
        assert_eq!(e.errno(), -libc::EACCES);
    }
}
