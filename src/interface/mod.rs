// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Physical device backends.
//!
//! A backend owns the channel table of one kernel device and knows how to
//! switch channels on and off, fetch raw scan records and pull channel values
//! out of them. [`iio::IioDevice`] is the production backend; anything that
//! can present channels the same way can sit behind [`DeviceBackend`].

pub mod channel;
pub mod iio;
pub mod sysfs;

use crate::{Error, Result};
use channel::Channel;
use std::{os::unix::io::RawFd, path::Path};

/// A file descriptor and the poll events it signals readiness with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollTarget {
    pub fd: RawFd,
    pub events: i16,
}

/// Contract between a physical device and the sensors built on it.
pub trait DeviceBackend {
    /// sysfs directory of the device
    fn sysfs_path(&self) -> &Path;

    fn channels(&self) -> &[Channel];

    fn channels_mut(&mut self) -> &mut [Channel];

    /// Indices of the channels that belong to sensor `name`, or of every
    /// channel when `name` is `None`.
    fn chan_info(&self, name: Option<&str>) -> Result<Vec<usize>> {
        if self.channels().is_empty() {
            return Err(Error::NoChannels);
        }
        Ok(self
            .channels()
            .iter()
            .enumerate()
            .filter(|(_, ch)| name.map_or(true, |n| ch.dev_name == n))
            .map(|(i, _)| i)
            .collect())
    }

    /// Number of channels [`DeviceBackend::chan_info`] would return.
    fn chan_count(&self, name: Option<&str>) -> Result<usize> {
        self.chan_info(name).map(|v| v.len())
    }

    /// Enable or disable channels.
    ///
    /// With `channel` set only that channel changes; otherwise every channel
    /// tagged with `handle` does.
    fn chan_able(&mut self, handle: i32, channel: Option<usize>, enable: bool) -> Result<()>;

    /// Size in bytes of one scan record with the current channel set
    fn scan_size(&self) -> usize;

    /// Read one scan record. Returns the number of bytes transferred.
    fn read_scan(&mut self, buf: &mut [u8]) -> Result<usize>;

    /// Value of `channel` inside a scan record.
    fn chan_data(&self, channel: usize, buf: &[u8]) -> Result<u64> {
        self.channels()
            .get(channel)
            .ok_or(Error::InvalidArgument("channel out of range"))?
            .format
            .decode(buf)
    }

    /// True once after the buffer was re-enabled, when any partially walked
    /// record must be abandoned.
    fn take_walk_reset(&mut self) -> bool {
        false
    }

    /// Kernel timestamp of a scan record, if the device has one.
    fn timestamp(&self, _buf: &[u8]) -> Option<i64> {
        None
    }

    /// Descriptor to poll for new records.
    fn fd(&self) -> Option<RawFd> {
        None
    }

    /// Prepare the descriptor for polling.
    fn init_fd(&mut self) -> Result<Option<PollTarget>> {
        Ok(self.fd().map(|fd| PollTarget {
            fd,
            events: libc::POLLIN,
        }))
    }
}
