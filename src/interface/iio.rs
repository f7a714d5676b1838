// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! IIO backend.
//!
//! Channel enable and disable follow the buffered IIO protocol with one
//! extension. To change the channel set the buffer is disabled, the channel
//! `_en` files are written, the record layout is recomputed from the enabled
//! channels and the buffer is enabled again. When no data channel is left
//! enabled the buffer stays off and the device-wide `enable` attribute is
//! cleared instead, which lets a multi-sensor device stay powered while any
//! one of its sensors is in use.

use super::{
    channel::{pack_scan, AttrSlot, Channel, ScanFormat},
    sysfs, DeviceBackend, PollTarget,
};
use crate::{
    config::NvsConfig,
    constants::{data_type_for, Attr, DataType, CHANNEL_TIMESTAMP},
    Error, Result,
};
use log::{debug, error, trace};
use std::{
    fs::{self, File},
    io::Read,
    os::unix::io::{AsRawFd, RawFd},
    path::{Path, PathBuf},
};

const ENABLE_SUFFIX: &str = "_en";

/// One IIO device: its sysfs directory and character device.
pub struct IioDevice {
    sysfs_path: PathBuf,
    node: File,
    channels: Vec<Channel>,
    /// Index of the timestamp channel
    timestamp: Option<usize>,
    scan_size: usize,
    walk_reset: bool,
    path_enable: PathBuf,
    path_buf_enable: PathBuf,
}

impl IioDevice {
    /// Open IIO device `dev_num` and discover its channels.
    pub fn open(config: &NvsConfig, dev_num: u32) -> Result<Self> {
        let sysfs_path = config.device_sysfs_path(dev_num);
        let node_path = config.device_node_path(dev_num);
        let node = File::open(&node_path).map_err(|e| {
            error!("open {} ERR: {}", node_path.display(), e);
            Error::io(&node_path, e)
        })?;

        let mut channels = discover_channels(&sysfs_path)?;
        // stable sort, so equal indices keep directory order
        channels.sort_by_key(|ch| ch.index);
        let scan_size = pack_scan(&mut channels, false);
        let timestamp = channels.iter().position(|ch| ch.full_name == CHANNEL_TIMESTAMP);

        let dev = Self {
            path_enable: sysfs_path.join("enable"),
            path_buf_enable: sysfs_path.join("buffer").join("enable"),
            sysfs_path,
            node,
            channels,
            timestamp,
            scan_size,
            walk_reset: false,
        };
        dev.dump_channels();
        Ok(dev)
    }

    /// Number of the IIO device whose `name` attribute equals `name`.
    pub fn find_device(config: &NvsConfig, name: &str) -> Result<Option<u32>> {
        let root = &config.sysfs_root;
        let entries = fs::read_dir(root).map_err(|e| Error::io(root, e))?;
        let mut found: Vec<u32> = entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let file_name = entry.file_name();
                let num = file_name.to_str()?.strip_prefix("iio:device")?.parse().ok()?;
                let dev_name = sysfs::read_str(&entry.path().join("name")).ok()?;
                (dev_name == name).then_some(num)
            })
            .collect();
        found.sort_unstable();
        Ok(found.first().copied())
    }

    fn buf_disable(&self) -> Result<()> {
        sysfs::write_int(&self.path_buf_enable, 0).map_err(|e| {
            error!("0 -> {} ERR: {}", self.path_buf_enable.display(), e);
            e
        })
    }

    /// Recompute the record layout over the enabled channels and turn the
    /// buffer back on if a data channel is enabled, or when forced.
    fn buf_enable(&mut self, force: bool) -> Result<()> {
        let data_enabled = self.channels.iter().any(|ch| ch.enabled && ch.handle != 0);
        self.scan_size = pack_scan(&mut self.channels, true);
        if data_enabled || force {
            self.walk_reset = true;
            sysfs::write_int(&self.path_buf_enable, 1).map_err(|e| {
                error!("1 -> {} ERR: {}", self.path_buf_enable.display(), e);
                e
            })
        } else {
            // the master enable is optional
            if let Err(e) = sysfs::write_int(&self.path_enable, 0) {
                debug!("0 -> {}: {}", self.path_enable.display(), e);
            }
            Ok(())
        }
    }

    fn write_enable(ch: &mut Channel, enable: bool) -> Result<()> {
        sysfs::write_int(&ch.enable_path, enable as i32).map_err(|e| {
            error!("{} -> {} ERR: {}", enable as i32, ch.enable_path.display(), e);
            e
        })?;
        ch.enabled = enable;
        Ok(())
    }

    fn dump_channels(&self) {
        debug!(
            "{} number of channels={}",
            self.sysfs_path.display(),
            self.channels.len()
        );
        for (i, ch) in self.channels.iter().enumerate() {
            debug!(
                "channel[{}] {} handle={} enabled={} type={:?}[{}] index={} {:?}",
                i,
                ch.full_name,
                ch.handle,
                ch.enabled,
                ch.data_type,
                ch.data_index,
                ch.index,
                ch.format
            );
            for attr in Attr::ALL {
                let slot = ch.attr(attr);
                if let Some(path) = slot.path() {
                    trace!(
                        "channel[{}] {} = {} (shared={})",
                        i,
                        path.display(),
                        slot.value(),
                        slot.is_shared()
                    );
                }
            }
        }
    }
}

impl DeviceBackend for IioDevice {
    fn sysfs_path(&self) -> &Path {
        &self.sysfs_path
    }

    fn channels(&self) -> &[Channel] {
        &self.channels
    }

    fn channels_mut(&mut self) -> &mut [Channel] {
        &mut self.channels
    }

    fn chan_info(&self, name: Option<&str>) -> Result<Vec<usize>> {
        if self.channels.is_empty() {
            error!("no device channels");
            return Err(Error::NoChannels);
        }
        Ok(self
            .channels
            .iter()
            .enumerate()
            .filter(|(_, ch)| match name {
                Some(n) => ch.dev_name == n,
                None => !ch.is_timestamp(),
            })
            .map(|(i, _)| i)
            .collect())
    }

    fn chan_able(&mut self, handle: i32, channel: Option<usize>, enable: bool) -> Result<()> {
        trace!(
            "chan_able handle={} channel={:?} enable={}",
            handle,
            channel,
            enable
        );
        if self.channels.is_empty() {
            error!("chan_able ERR: no device");
            return Err(Error::NoDevice);
        }

        self.buf_disable()?;

        let mut result = Ok(());
        match channel {
            None if handle > 0 => {
                let mut found = false;
                for ch in self.channels.iter_mut().filter(|ch| ch.handle == handle) {
                    found = true;
                    if let Err(e) = Self::write_enable(ch, enable) {
                        result = Err(e);
                    }
                }
                if !found {
                    error!("chan_able ERR: handle {} not found", handle);
                    result = Err(Error::InvalidArgument("handle not found"));
                }
            }
            Some(i) if i < self.channels.len() => {
                result = Self::write_enable(&mut self.channels[i], enable);
            }
            _ => {
                error!(
                    "chan_able ERR: handle={} channel={:?} enable={}",
                    handle, channel, enable
                );
                result = Err(Error::InvalidArgument("no channel selected"));
            }
        }

        let buf = self.buf_enable(false);
        result.and(buf)
    }

    fn scan_size(&self) -> usize {
        self.scan_size
    }

    fn read_scan(&mut self, buf: &mut [u8]) -> Result<usize> {
        let n = self
            .node
            .read(buf)
            .map_err(|e| Error::io(&self.sysfs_path, e))?;
        trace!("read {} bytes (record size {})", n, self.scan_size);
        Ok(n)
    }

    fn take_walk_reset(&mut self) -> bool {
        std::mem::take(&mut self.walk_reset)
    }

    fn timestamp(&self, buf: &[u8]) -> Option<i64> {
        let ch = &self.channels[self.timestamp?];
        let raw = buf.get(ch.format.location..ch.format.location + 8)?;
        let mut word = [0u8; 8];
        word.copy_from_slice(raw);
        Some(i64::from_ne_bytes(word))
    }

    fn fd(&self) -> Option<RawFd> {
        Some(self.node.as_raw_fd())
    }

    fn init_fd(&mut self) -> Result<Option<PollTarget>> {
        let fd = self.node.as_raw_fd();
        // SAFETY: fd is owned by self.node and stays open for the call
        let ret = unsafe {
            let flags = libc::fcntl(fd, libc::F_GETFL);
            if flags < 0 {
                flags
            } else {
                libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK)
            }
        };
        if ret < 0 {
            return Err(Error::io(
                &self.sysfs_path,
                std::io::Error::last_os_error(),
            ));
        }
        Ok(Some(PollTarget {
            fd,
            events: libc::POLLIN,
        }))
    }
}

/// Build the channel table from `<sysfs_path>/scan_elements`.
fn discover_channels(sysfs_path: &Path) -> Result<Vec<Channel>> {
    let scan_dir = sysfs_path.join("scan_elements");
    let entries = fs::read_dir(&scan_dir).map_err(|_| Error::NoDevice)?;
    let mut names: Vec<String> = entries
        .filter_map(|entry| entry.ok())
        .filter_map(|entry| entry.file_name().into_string().ok())
        .filter(|name| name.ends_with(ENABLE_SUFFIX))
        .collect();
    if names.is_empty() {
        return Err(Error::NoChannels);
    }
    names.sort();

    names
        .iter()
        .map(|file_name| {
            let full_name = &file_name[..file_name.len() - ENABLE_SUFFIX.len()];
            build_channel(sysfs_path, &scan_dir, full_name, scan_dir.join(file_name))
        })
        .collect()
}

fn build_channel(
    sysfs_path: &Path,
    scan_dir: &Path,
    full_name: &str,
    enable_path: PathBuf,
) -> Result<Channel> {
    let enabled = sysfs::read_int(&enable_path)? != 0;
    let mut ch = Channel::new(full_name, enable_path).ok_or_else(|| Error::Parse {
        path: scan_dir.to_path_buf(),
        value: full_name.to_string(),
    })?;
    ch.enabled = enabled;

    let index_path = scan_dir.join(format!("{}_index", full_name));
    let index = sysfs::read_int(&index_path)?;
    ch.index = u32::try_from(index).map_err(|_| Error::Parse {
        path: index_path,
        value: index.to_string(),
    })?;
    let type_path = scan_dir.join(format!("{}_type", full_name));
    let type_text = sysfs::read_str(&type_path)?;
    ch.format = ScanFormat::parse(&type_text).ok_or(Error::Parse {
        path: type_path,
        value: type_text,
    })?;

    if full_name == CHANNEL_TIMESTAMP {
        // the timestamp always rides along
        if sysfs::write_int(&ch.enable_path, 1).is_ok() {
            ch.enabled = true;
        }
        return Ok(ch);
    }

    let (data_type, data_index) = ch
        .post_name
        .as_deref()
        .and_then(data_type_for)
        .unwrap_or(if ch.format.bytes <= 4 {
            (DataType::Float, 0)
        } else {
            (DataType::U64, 0)
        });
    ch.data_type = data_type;
    ch.data_index = data_index;

    for attr in Attr::ALL {
        let shared = sysfs_path.join(format!("{}_{}", ch.pre_name, attr.sysfs_name()));
        let own = sysfs_path.join(format!("{}_{}", ch.full_name, attr.sysfs_name()));
        ch.attrs[attr.index()] = if shared.exists() {
            AttrSlot::backed(shared, true)
        } else if own.exists() {
            AttrSlot::backed(own, false)
        } else {
            AttrSlot::cached()
        };
    }
    for attr in [Attr::Offset, Attr::Scale] {
        if let Err(e) = ch.attr_mut(attr).refresh() {
            debug!("{} {:?} read ERR: {}", ch.full_name, attr, e);
        }
    }
    Ok(ch)
}
