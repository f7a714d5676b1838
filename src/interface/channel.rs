// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Channel descriptors: scan format, event routing and attribute slots.

use crate::{
    constants::{Attr, DataType, ATTR_N, CHANNEL_TIMESTAMP},
    interface::sysfs,
    Error, Result,
};
use std::path::{Path, PathBuf};

/// Raw layout of one channel inside a scan record, parsed from the
/// `scan_elements/<chan>_type` descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ScanFormat {
    pub big_endian: bool,
    pub signed: bool,
    /// Number of valid bits
    pub realbits: u32,
    /// Storage width in bytes
    pub bytes: usize,
    /// Right shift applied before masking
    pub shift: u32,
    pub mask: u64,
    /// Byte offset inside the packed scan record
    pub location: usize,
}

impl ScanFormat {
    /// Parse a descriptor such as `le:s12/16>>4`.
    pub fn parse(text: &str) -> Option<Self> {
        let text = text.trim();
        let mut chars = text.chars();
        let endian = chars.next()?;
        let rest = chars.as_str().strip_prefix("e:")?;
        let mut chars = rest.chars();
        let sign = chars.next()?;
        let rest = chars.as_str();

        let (realbits, rest) = rest.split_once('/')?;
        let (storage, shift) = rest.split_once(">>")?;
        // newer kernels append a repeat count, e.g. "16X2"
        let storage = storage.split('X').next()?;

        let realbits: u32 = realbits.parse().ok()?;
        let storage: usize = storage.parse().ok()?;
        let shift: u32 = shift.trim().parse().ok()?;
        if realbits > 64 {
            return None;
        }

        let mask = if realbits == 64 {
            !0
        } else {
            (1u64 << realbits) - 1
        };
        Some(Self {
            big_endian: endian == 'b',
            signed: sign == 's',
            realbits,
            bytes: storage / 8,
            shift,
            mask,
            location: 0,
        })
    }

    /// Extract this channel's value from a scan record.
    ///
    /// The value is right shifted, masked to `realbits` and, for signed
    /// channels, sign extended to 64 bits.
    pub fn decode(&self, buf: &[u8]) -> Result<u64> {
        if self.bytes > std::mem::size_of::<u64>() {
            return Err(Error::InvalidArgument("channel wider than 64 bits"));
        }
        let end = self.location + self.bytes;
        let raw = buf
            .get(self.location..end)
            .ok_or(Error::InvalidArgument("channel outside scan record"))?;

        let mut word = [0u8; 8];
        if self.big_endian {
            for (dst, src) in word.iter_mut().zip(raw.iter().rev()) {
                *dst = *src;
            }
        } else {
            word[..self.bytes].copy_from_slice(raw);
        }
        let mut value = u64::from_le_bytes(word);
        value = value.checked_shr(self.shift).unwrap_or(0);
        value &= self.mask;
        if self.signed && self.realbits > 0 && self.realbits < 64 {
            let shift = 64 - self.realbits;
            value = (((value << shift) as i64) >> shift) as u64;
        }
        Ok(value)
    }
}

/// Where an attribute value comes from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttrSource {
    /// A sysfs file exists for the attribute
    Backed(PathBuf),
    /// No kernel representation; the value only lives in memory
    Cached,
}

/// One attribute of one channel.
#[derive(Debug, Clone, PartialEq)]
pub struct AttrSlot {
    source: AttrSource,
    /// The file is shared by every channel of the device
    shared: bool,
    value: f32,
    cached: bool,
}

impl Default for AttrSlot {
    fn default() -> Self {
        Self::cached()
    }
}

impl AttrSlot {
    pub fn backed(path: PathBuf, shared: bool) -> Self {
        Self {
            source: AttrSource::Backed(path),
            shared,
            value: 0.0,
            cached: false,
        }
    }

    pub fn cached() -> Self {
        Self {
            source: AttrSource::Cached,
            shared: false,
            value: 0.0,
            cached: false,
        }
    }

    pub fn source(&self) -> &AttrSource {
        &self.source
    }

    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            AttrSource::Backed(path) => Some(path),
            AttrSource::Cached => None,
        }
    }

    pub fn is_shared(&self) -> bool {
        self.shared
    }

    pub fn is_cached(&self) -> bool {
        self.cached
    }

    /// Last known value, valid or not.
    pub fn value(&self) -> f32 {
        self.value
    }

    /// Read straight from sysfs, bypassing the cache.
    pub fn read_fresh(&self) -> Result<f32> {
        match &self.source {
            AttrSource::Backed(path) => sysfs::read_float(path),
            AttrSource::Cached => Err(Error::NoAttribute),
        }
    }

    /// Read from sysfs into the cache.
    pub fn refresh(&mut self) -> Result<f32> {
        let value = self.read_fresh()?;
        self.value = value;
        self.cached = true;
        Ok(value)
    }

    /// Cached value, filling the cache from sysfs on a miss.
    pub fn get(&mut self) -> Result<f32> {
        if self.cached {
            return Ok(self.value);
        }
        self.refresh()
    }

    /// Write a value.
    ///
    /// A backed attribute is written and read back; a failed read-back only
    /// invalidates the cache. An attribute without a file stores the value.
    pub fn set(&mut self, value: f32) -> Result<()> {
        match &self.source {
            AttrSource::Backed(path) => {
                sysfs::write_float(path, value)?;
                match sysfs::read_float(path) {
                    Ok(v) => {
                        self.value = v;
                        self.cached = true;
                    }
                    Err(_) => self.cached = false,
                }
            }
            AttrSource::Cached => {
                self.value = value;
                self.cached = true;
            }
        }
        Ok(())
    }
}

/// One scalar data lane of a physical device.
#[derive(Debug, Clone)]
pub struct Channel {
    /// Sensor name the channel belongs to, e.g. `accel`
    pub dev_name: String,
    /// `in_accel`
    pub pre_name: String,
    /// `x`, `x_uncalib`, ...
    pub post_name: Option<String>,
    /// `in_accel_x`
    pub full_name: String,
    /// `scan_elements/<full_name>_en`
    pub enable_path: PathBuf,
    /// IIO scan index, orders the channels inside a record
    pub index: u32,
    pub format: ScanFormat,
    pub data_type: DataType,
    /// Slot of the output event this channel fills
    pub data_index: usize,
    pub enabled: bool,
    /// HAL handle of the sensor owning the channel, 0 when unassigned
    pub handle: i32,
    pub attrs: [AttrSlot; ATTR_N],
}

impl Channel {
    /// Build a channel from its full sysfs name.
    pub fn new(full_name: &str, enable_path: PathBuf) -> Option<Self> {
        let (pre, name, post) = split_name(full_name)?;
        Some(Self {
            dev_name: name.to_string(),
            pre_name: format!("{}_{}", pre, name),
            post_name: post.map(str::to_string),
            full_name: full_name.to_string(),
            enable_path,
            index: 0,
            format: ScanFormat::default(),
            data_type: DataType::Unknown,
            data_index: 0,
            enabled: false,
            handle: 0,
            attrs: Default::default(),
        })
    }

    pub fn is_timestamp(&self) -> bool {
        self.pre_name == CHANNEL_TIMESTAMP
    }

    pub fn attr(&self, attr: Attr) -> &AttrSlot {
        &self.attrs[attr.index()]
    }

    pub fn attr_mut(&mut self, attr: Attr) -> &mut AttrSlot {
        &mut self.attrs[attr.index()]
    }
}

/// Split `in_accel_x_bias` into (`in`, `accel`, Some(`x_bias`)).
pub fn split_name(full_name: &str) -> Option<(&str, &str, Option<&str>)> {
    let mut parts = full_name.splitn(3, '_');
    let pre = parts.next().filter(|s| !s.is_empty())?;
    let name = parts.next().filter(|s| !s.is_empty())?;
    let post = parts.next().filter(|s| !s.is_empty());
    Some((pre, name, post))
}

/// Assign naturally aligned byte offsets to `channels` in order and return
/// the record size. With `enabled_only`, disabled channels are skipped.
pub fn pack_scan(channels: &mut [Channel], enabled_only: bool) -> usize {
    let mut size = 0;
    for ch in channels
        .iter_mut()
        .filter(|ch| !enabled_only || ch.enabled)
    {
        let bytes = ch.format.bytes;
        ch.format.location = if bytes == 0 || size % bytes == 0 {
            size
        } else {
            size - size % bytes + bytes
        };
        size = ch.format.location + bytes;
    }
    size
}
