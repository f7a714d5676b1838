// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! NVS logical sensor driver.
//!
//! This module contains [`Nvs`], one logical sensor over a subset of the
//! channels of a physical device, together with the [`Sensor`] trait every
//! HAL driver implements and the [`PhysicalSensor`] trait the fusion layer
//! needs from the sensors it sits on.

use crate::{
    config::NvsConfig,
    constants::{
        sensor_string_type, Attr, DataType, SensorFlags, FLUSH_CMD_FLUSH,
    },
    device::{PhysicalDevice, SharedDevice},
    interface::{channel::Channel, iio::IioDevice, sysfs, DeviceBackend, PollTarget},
    reports::{monotonic_ns, SensorEvent, SensorInfo},
    Error, Result,
};
use log::{debug, error, info, trace};
use std::{
    os::unix::io::RawFd,
    path::{Path, PathBuf},
};

/// Marker file of a device that is a single sensor
const VIRTUAL_DEVICE_MARKER: &str = "nvs";

/// The sensor HAL surface.
pub trait Sensor {
    /// Turn the sensor with `handle` on or off.
    fn enable(&mut self, handle: i32, enable: bool) -> Result<()>;

    /// Deprecated rate call; same as `batch` with no report latency.
    fn set_delay(&mut self, handle: i32, period_ns: i64) -> Result<()> {
        self.batch(handle, 0, period_ns, 0)
    }

    fn batch(
        &mut self,
        handle: i32,
        flags: i32,
        sampling_period_ns: i64,
        max_report_latency_ns: i64,
    ) -> Result<()>;

    /// Request a flush-complete meta event for `handle`.
    fn flush(&mut self, handle: i32) -> Result<()>;

    /// Append up to `count` events to `out`. Returns how many were added.
    fn read_events(&mut self, out: &mut Vec<SensorEvent>, count: usize, handle: i32)
        -> Result<usize>;

    /// Append this driver's sensors to `list`, at most `limit` of them.
    ///
    /// Handles are list positions plus one. Returns the number appended.
    fn get_sensor_list(&mut self, list: &mut Vec<SensorInfo>, limit: usize) -> usize;

    /// Current descriptions of the sensors this driver listed.
    fn sensor_list(&self) -> Vec<SensorInfo>;

    /// Handles to pass to `read_events` when this driver's descriptor is
    /// readable.
    fn poll_handles(&self) -> Vec<i32> {
        self.sensor_list().first().map(|s| s.handle).into_iter().collect()
    }

    /// Events are waiting that do not depend on the descriptor.
    fn has_pending_events(&self) -> bool {
        false
    }

    fn fd(&self) -> Option<RawFd>;

    fn init_fd(&mut self) -> Result<Option<PollTarget>> {
        Ok(None)
    }
}

/// Operations the fusion arbiter performs on the accel, gyro, magnetometer
/// and temperature sensors it owns.
pub trait PhysicalSensor: Sensor {
    /// HAL handle, 0 until the sensor is listed or bound
    fn handle(&self) -> i32;

    /// Give an unlisted sensor a handle so its channels can be switched.
    fn bind_handle(&mut self, handle: i32);

    fn get_enable(&self, channel: Option<usize>) -> Result<bool>;

    fn get_max_range(&mut self) -> Result<f32>;

    fn get_scale(&mut self, channel: Option<usize>) -> Result<f32>;

    fn get_offset(&mut self, channel: Option<usize>) -> Result<f32>;

    fn set_offset(&mut self, offset: f32, channel: Option<usize>) -> Result<()>;

    /// Re-read the mounting matrix from sysfs.
    fn get_matrix(&mut self) -> Result<[i8; 9]>;

    fn set_matrix(&mut self, matrix: [i8; 9]);

    fn sensor_info(&self) -> Option<SensorInfo>;

    fn update_sensor_info(&mut self, update: &mut dyn FnMut(&mut SensorInfo));

    fn read_raw(&mut self, channel: Option<usize>) -> Result<i32>;
}

/// Component of the mounting matrix for `axis`: +1, -1 or nothing.
fn pick(m: i8, v: f32) -> f32 {
    match m {
        1 => v,
        -1 => -v,
        _ => 0.0,
    }
}

/// Rotate one output axis through the mounting matrix.
pub fn matrix_axis(matrix: &[i8; 9], v: [f32; 3], axis: usize) -> f32 {
    pick(matrix[axis], v[0]) + pick(matrix[3 + axis], v[1]) + pick(matrix[6 + axis], v[2])
}

/// Parse `m0,m1,...,m8`. Parsing stops at the first bad entry.
pub fn parse_matrix(text: &str) -> [i8; 9] {
    let mut matrix = [0i8; 9];
    for (slot, tok) in matrix.iter_mut().zip(text.trim().split(',')) {
        match tok.trim().parse() {
            Ok(v) => *slot = v,
            Err(_) => break,
        }
    }
    matrix
}

/// Per-sensor state of one logical sensor, owned by its physical device.
pub(crate) struct SensorView {
    name: String,
    /// Indices into the device channel table
    channels: Vec<usize>,
    /// The device directory holds one sensor and uses unprefixed names
    virtual_device: bool,
    enabled: bool,
    flush: bool,
    first_event: bool,
    calibration_mode: bool,
    matrix: [i8; 9],
    matrix_enabled: bool,
    event: SensorEvent,
    info: Option<SensorInfo>,
}

impl SensorView {
    fn new(dev: &dyn DeviceBackend, name: &str, sensor_type: i32) -> Result<Self> {
        let virtual_device = dev.sysfs_path().join(VIRTUAL_DEVICE_MARKER).exists();
        let channels = if virtual_device {
            dev.chan_info(None)?
        } else {
            dev.chan_info(Some(name))?
        };
        if channels.is_empty() {
            error!("{}: no channels on {}", name, dev.sysfs_path().display());
            return Err(Error::NoChannels);
        }

        let mut view = Self {
            name: name.to_string(),
            channels,
            virtual_device,
            enabled: false,
            flush: false,
            first_event: false,
            calibration_mode: false,
            matrix: [0; 9],
            matrix_enabled: false,
            event: SensorEvent::new(0, sensor_type),
            info: None,
        };
        if let Ok(matrix) = view.read_matrix(dev) {
            view.matrix = matrix;
        }
        view.matrix_validate();
        Ok(view)
    }

    fn handle(&self) -> i32 {
        self.event.sensor
    }

    /// Per-sensor device file: unprefixed on a virtual device.
    fn device_file(&self, dev: &dyn DeviceBackend, attr: &str) -> PathBuf {
        if self.virtual_device {
            dev.sysfs_path().join(attr)
        } else {
            dev.sysfs_path().join(format!("{}_{}", self.name, attr))
        }
    }

    fn first_channel<'a>(&self, dev: &'a dyn DeviceBackend) -> &'a Channel {
        &dev.channels()[self.channels[0]]
    }

    fn attr_path(&self, dev: &dyn DeviceBackend, attr: Attr) -> Option<PathBuf> {
        self.first_channel(dev).attr(attr).path().map(Path::to_path_buf)
    }

    fn device_channel(&self, channel: Option<usize>) -> Result<Option<usize>> {
        match channel {
            None => Ok(None),
            Some(c) => self
                .channels
                .get(c)
                .copied()
                .map(Some)
                .ok_or(Error::InvalidArgument("channel out of range")),
        }
    }

    fn enable(
        &mut self,
        dev: &mut dyn DeviceBackend,
        handle: i32,
        enable: bool,
        channel: Option<usize>,
    ) -> Result<()> {
        trace!(
            "{} enable handle={} enable={} channel={:?}",
            self.name,
            handle,
            enable,
            channel
        );
        let handle = if handle < 1 { self.handle() } else { handle };
        let dev_channel = self.device_channel(channel)?;
        if let Err(e) = dev.chan_able(handle, dev_channel, enable) {
            error!("{}: {} -> handle {} ERR: {}", self.name, enable, handle, e);
            return Err(e);
        }

        self.enabled = enable;
        if enable {
            self.first_event = true;
            // scale == 1 selects live calibration: scale and offset are
            // re-read on every sample until the sensor is disabled
            let scale = self.first_channel(dev).attr(Attr::Scale).read_fresh();
            if matches!(scale, Ok(s) if s == 1.0) {
                self.calibration_mode = true;
                info!(
                    "{} handle={} channel={:?} calibration mode ENABLED",
                    self.name, handle, channel
                );
            }
        } else if self.calibration_mode {
            let channels = dev.channels_mut();
            for &ci in &self.channels {
                let ch = &mut channels[ci];
                for attr in [Attr::Scale, Attr::Offset] {
                    if let Err(e) = ch.attr_mut(attr).refresh() {
                        debug!("{} {} {:?}: {}", self.name, ch.full_name, attr, e);
                    }
                }
            }
            self.calibration_mode = false;
            info!(
                "{} handle={} channel={:?} calibration mode DISABLED",
                self.name, handle, channel
            );
        }
        Ok(())
    }

    fn get_enable(&self, dev: &dyn DeviceBackend, channel: Option<usize>) -> Result<bool> {
        let ci = self.device_channel(channel)?.unwrap_or(self.channels[0]);
        Ok(dev.channels()[ci].enabled)
    }

    fn set_attr(
        &mut self,
        dev: &mut dyn DeviceBackend,
        channel: Option<usize>,
        attr: Attr,
        value: f32,
    ) -> Result<()> {
        trace!(
            "{} set_attr channel={:?} {:?}={}",
            self.name,
            channel,
            attr,
            value
        );
        let n = self.channels.len();
        if matches!(channel, Some(c) if c >= n) {
            return Err(Error::InvalidArgument("channel out of range"));
        }
        let shared = self.first_channel(dev).attr(attr).is_shared();
        let targets = match channel {
            None if !shared => 0..n,
            Some(c) if !shared => c..c + 1,
            _ => 0..1,
        };

        let channels = dev.channels_mut();
        let mut result = Ok(());
        for i in targets {
            let ch = &mut channels[self.channels[i]];
            if let Err(e) = ch.attr_mut(attr).set(value) {
                error!("{}: {} -> {:?} ERR: {}", ch.full_name, value, attr, e);
                result = Err(e);
            }
        }
        result
    }

    fn get_attr(
        &mut self,
        dev: &mut dyn DeviceBackend,
        channel: Option<usize>,
        attr: Attr,
    ) -> Result<f32> {
        let ci = self.device_channel(channel)?.unwrap_or(self.channels[0]);
        dev.channels_mut()[ci].attr_mut(attr).get()
    }

    /// Rate attribute: `sampling_frequency` when present, else `batch_period`.
    fn delay_attr(&self, dev: &dyn DeviceBackend) -> Attr {
        if self.attr_path(dev, Attr::Delay).is_some() {
            Attr::Delay
        } else {
            Attr::BatchPeriod
        }
    }

    fn batch(
        &mut self,
        dev: &mut dyn DeviceBackend,
        period_ns: i64,
        latency_ns: i64,
    ) -> Result<()> {
        let period_us = (period_ns / 1000) as f32;
        let timeout_us = latency_ns as f32 / 1000.0;

        // without a FIFO there is no batch_timeout and the kernel assumes 0
        let timeout = if self.attr_path(dev, Attr::BatchTimeout).is_none() && latency_ns != 0 {
            Err(Error::NoAttribute)
        } else {
            self.set_attr(dev, None, Attr::BatchTimeout, timeout_us)
        };
        if let Err(e) = timeout {
            if latency_ns != 0 {
                error!(
                    "{} batch ERR: period={}ns latency={}ns: {}",
                    self.name, period_ns, latency_ns, e
                );
                return Err(Error::InvalidArgument("report latency not supported"));
            }
        }

        let attr = if self.attr_path(dev, Attr::BatchPeriod).is_some() {
            Attr::BatchPeriod
        } else {
            Attr::Delay
        };
        self.set_attr(dev, None, attr, period_us)
            .map_err(|_| Error::InvalidArgument("sampling period rejected"))?;
        debug!(
            "{} batch period={}ns latency={}ns",
            self.name, period_ns, latency_ns
        );
        Ok(())
    }

    fn fifo_max_event_count(&self) -> u32 {
        self.info.as_ref().map_or(0, |info| info.fifo_max_event_count)
    }

    fn flush(&mut self, dev: &mut dyn DeviceBackend) -> Result<()> {
        if !self.enabled {
            return Err(Error::InvalidArgument("flush while disabled"));
        }
        self.flush = true;
        let written = self.set_attr(dev, None, Attr::Flush, FLUSH_CMD_FLUSH);
        if self.fifo_max_event_count() == 0 {
            // no FIFO to drain, the meta event is queued for the next read
            if let Err(e) = written {
                debug!("{} flush without FIFO: {}", self.name, e);
            }
            return Ok(());
        }
        match written {
            Ok(()) | Err(Error::NoAttribute) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// A flush on a sensor without FIFO completes as soon as it is read.
    pub(crate) fn flush_pending(&self) -> bool {
        self.flush && self.fifo_max_event_count() == 0
    }

    pub(crate) fn take_pending_flush(&mut self) -> Option<SensorEvent> {
        self.flush_pending().then(|| self.meta_flush())
    }

    fn read_matrix(&self, dev: &dyn DeviceBackend) -> Result<[i8; 9]> {
        let path = self.device_file(dev, "matrix");
        let text = sysfs::read_str(&path)?;
        let matrix = parse_matrix(&text);
        debug!("{} = {:?}", path.display(), matrix);
        Ok(matrix)
    }

    fn matrix_validate(&mut self) {
        self.matrix_enabled = self.matrix.iter().any(|&m| m != 0);
        debug!("{} matrix enabled = {}", self.name, self.matrix_enabled);
    }

    fn apply_matrix(&mut self, index: usize) {
        if !self.matrix_enabled {
            return;
        }
        let d = &mut self.event.data;
        let v = [d[index], d[index + 1], d[index + 2]];
        for axis in 0..3 {
            d[index + axis] = matrix_axis(&self.matrix, v, axis);
        }
    }

    fn scale_offset(&self, ch: &Channel, value: f32) -> f32 {
        if self.calibration_mode {
            let scale = ch.attr(Attr::Scale).read_fresh().unwrap_or(0.0);
            let offset = ch.attr(Attr::Offset).read_fresh().unwrap_or(0.0);
            if scale != 0.0 {
                let out = value * scale + offset;
                info!(
                    "calibration: data={} * scale={} + offset={} == {}",
                    value, scale, offset, out
                );
                out
            } else {
                info!(
                    "calibration: data={} * NO SCALE + offset={} == {}",
                    value,
                    offset,
                    value + offset
                );
                value + offset
            }
        } else {
            let mut out = value;
            let scale = ch.attr(Attr::Scale).value();
            if scale != 0.0 {
                out *= scale;
            }
            let offset = ch.attr(Attr::Offset).value();
            if offset != 0.0 {
                out += offset;
            }
            out
        }
    }

    /// Decode this sensor's channels from `buf` into the pending event.
    ///
    /// Scale and offset are applied only for `handle > 0`; fusion reads with
    /// a non-positive handle and scales the raw values itself. Returns false
    /// when an on-change sensor saw no change.
    fn event_data(&mut self, dev: &dyn DeviceBackend, buf: &[u8], handle: i32) -> bool {
        let channels = dev.channels();
        let mut changed = false;

        for &ci in &self.channels {
            let ch = &channels[ci];
            if !ch.enabled || ch.format.bytes == 0 {
                continue;
            }
            let raw = match dev.chan_data(ci, buf) {
                Ok(raw) => raw,
                Err(e) => {
                    trace!("{} decode: {}", ch.full_name, e);
                    continue;
                }
            };
            let idx = ch.data_index;
            let value = raw as i64 as f32;
            match ch.data_type {
                DataType::Vec => {
                    if idx < 3 {
                        self.event.data[idx] = if handle > 0 {
                            self.scale_offset(ch, value)
                        } else {
                            value
                        };
                    } else {
                        self.event.status = raw as i8;
                    }
                }
                DataType::Uncal | DataType::Bias => {
                    if idx < 6 {
                        self.event.data[idx] = value;
                    }
                }
                DataType::Heart => {
                    if idx != 0 {
                        self.event.status = raw as i64 as i8;
                    } else {
                        self.event.data[0] = value;
                    }
                }
                DataType::Float | DataType::U64 | DataType::Unknown => {
                    if ch.format.bytes == std::mem::size_of::<u64>() {
                        self.event.u64_data[idx] = raw;
                    } else {
                        let value = if handle > 0 {
                            self.scale_offset(ch, value)
                        } else {
                            value
                        };
                        if self.event.data[idx] != value {
                            changed = true;
                        }
                        self.event.data[idx] = value;
                    }
                }
            }
        }

        let last = &channels[self.channels[self.channels.len() - 1]];
        match last.data_type {
            DataType::Vec => self.apply_matrix(0),
            DataType::Uncal | DataType::Bias => {
                self.apply_matrix(0);
                self.apply_matrix(3);
            }
            DataType::Heart => {}
            _ if last.format.bytes == std::mem::size_of::<u64>() => {}
            _ => {
                let on_change = self.info.as_ref().map_or(false, SensorInfo::reports_on_change);
                if on_change && !changed && !self.first_event && !self.calibration_mode {
                    trace!("{} same data dropped", self.name);
                    return false;
                }
            }
        }
        trace!(
            "{} event sensor={} type={} ts={} data={:?} status={}",
            self.name,
            self.event.sensor,
            self.event.sensor_type,
            self.event.timestamp,
            &self.event.data[..6],
            self.event.status
        );
        true
    }

    fn meta_flush(&mut self) -> SensorEvent {
        self.flush = false;
        let event = SensorEvent::meta_flush(self.handle());
        debug!("{} flush complete sensor={}", self.name, self.handle());
        event
    }

    pub(crate) fn process_event(
        &mut self,
        dev: &dyn DeviceBackend,
        buf: &[u8],
        handle: i32,
    ) -> Option<SensorEvent> {
        if self.channels.is_empty() {
            return None;
        }
        self.event.timestamp = dev.timestamp(buf).unwrap_or_else(monotonic_ns);
        if self.event.timestamp == 0 {
            // a zero timestamp ends a flush or marks invalid data
            if self.flush {
                return Some(self.meta_flush());
            }
            debug!("{} data dropped - no timestamp", self.name);
            return None;
        }

        if !self.enabled || !self.event_data(dev, buf, handle) {
            return None;
        }
        self.first_event = false;
        if self.info.as_ref().map_or(false, SensorInfo::is_one_shot) {
            self.enabled = false;
        }
        Some(self.event)
    }

    fn bind_handle(&mut self, dev: &mut dyn DeviceBackend, handle: i32) {
        self.event.sensor = handle;
        let channels = dev.channels_mut();
        for &ci in &self.channels {
            channels[ci].handle = handle;
        }
    }

    fn populate_info(&mut self, dev: &mut dyn DeviceBackend, index: usize) -> SensorInfo {
        let handle = index as i32 + 1;
        self.bind_handle(dev, handle);

        let read_nonempty = |path: PathBuf| sysfs::read_str(&path).ok().filter(|s| !s.is_empty());
        let name = read_nonempty(self.device_file(dev, "part"))
            .or_else(|| read_nonempty(dev.sysfs_path().join("name")))
            .unwrap_or_else(|| self.name.clone());
        let sensor_type = self.event.sensor_type;
        let info = SensorInfo {
            name,
            vendor: read_nonempty(self.device_file(dev, "vendor")).unwrap_or_default(),
            version: sysfs::read_int(&self.device_file(dev, "version")).unwrap_or(0),
            handle,
            sensor_type,
            string_type: read_nonempty(self.device_file(dev, "string_type"))
                .or_else(|| sensor_string_type(sensor_type).map(str::to_string)),
            flags: sysfs::read_int(&self.device_file(dev, "flags"))
                .map(|f| SensorFlags::from_bits_retain(f as u32))
                .unwrap_or_default(),
            ..Default::default()
        };
        self.info = Some(info);
        self.set_sensor_list(dev);
        self.info.clone().unwrap_or_default()
    }

    /// Refresh the run-time fields of the sensor description. Some of them
    /// can only be read while the device is off.
    fn set_sensor_list(&mut self, dev: &mut dyn DeviceBackend) {
        let Some(mut info) = self.info.take() else {
            return;
        };
        let was_enabled = self.enabled;
        if was_enabled {
            let _ = self.enable(dev, info.handle, false, None);
        }

        if let Ok(v) = self.get_attr(dev, None, Attr::MaxRange) {
            info.max_range = v;
        }
        if let Ok(v) = self.get_attr(dev, None, Attr::Resolution) {
            info.resolution = v;
        }
        if let Ok(v) = sysfs::read_float(&self.device_file(dev, "milliamp")) {
            info.power = v;
        }
        if let Some(path) = self.attr_path(dev, Attr::BatchPeriod) {
            if let Ok(v) = sysfs::read_int(&path) {
                info.min_delay = v;
            }
        }
        if let Ok(v) = sysfs::read_int(&self.device_file(dev, "fifo_reserved_event_count")) {
            info.fifo_reserved_event_count = v.max(0) as u32;
        }
        if let Ok(v) = sysfs::read_int(&self.device_file(dev, "fifo_max_event_count")) {
            info.fifo_max_event_count = v.max(0) as u32;
        }
        info.max_delay = 0;
        if let Some(path) = self.attr_path(dev, Attr::BatchTimeout) {
            if let Ok(v) = sysfs::read_int(&path) {
                info.max_delay = v;
            }
        }

        if was_enabled {
            let _ = self.enable(dev, info.handle, true, None);
        }
        debug!("{} sensor_t {:?}", self.name, info);
        self.info = Some(info);
    }

    fn read_raw(&self, dev: &dyn DeviceBackend, channel: Option<usize>) -> Result<i32> {
        let ci = self.device_channel(channel)?.unwrap_or(self.channels[0]);
        let path = dev.channels()[ci]
            .attr(Attr::Raw)
            .path()
            .ok_or(Error::NoAttribute)?;
        let raw = sysfs::read_int(path)?;
        trace!("{} raw channel={:?} data={}", self.name, channel, raw);
        Ok(raw)
    }
}

/// A logical sensor over some or all channels of a physical device.
///
/// Several `Nvs` can share one device (accel, gyro and temperature of an
/// IMU); create the first with [`Nvs::new`] and the others with
/// [`Nvs::link`].
pub struct Nvs {
    device: SharedDevice,
    view: usize,
}

impl Nvs {
    /// Open IIO device `dev_num` and build the sensor `name` on it.
    pub fn new(config: &NvsConfig, dev_num: u32, name: &str, sensor_type: i32) -> Result<Self> {
        let backend = IioDevice::open(config, dev_num)?;
        Self::with_backend(Box::new(backend), name, sensor_type)
    }

    pub fn with_backend(
        backend: Box<dyn DeviceBackend>,
        name: &str,
        sensor_type: i32,
    ) -> Result<Self> {
        Self::attach(PhysicalDevice::shared(backend), name, sensor_type)
    }

    /// Another sensor on the same physical device.
    pub fn link(&self, name: &str, sensor_type: i32) -> Result<Self> {
        Self::attach(self.device.clone(), name, sensor_type)
    }

    pub(crate) fn attach(device: SharedDevice, name: &str, sensor_type: i32) -> Result<Self> {
        let view = {
            let mut dev = device.borrow_mut();
            let state = SensorView::new(dev.backend(), name, sensor_type)?;
            dev.add_view(state)
        };
        Ok(Self { device, view })
    }

    fn with_view<R>(&self, f: impl FnOnce(&mut SensorView, &mut dyn DeviceBackend) -> R) -> R {
        let mut dev = self.device.borrow_mut();
        let PhysicalDevice { backend, views, .. } = &mut *dev;
        f(&mut views[self.view], backend.as_mut())
    }

    pub(crate) fn shared_device(&self) -> SharedDevice {
        self.device.clone()
    }

    pub fn name(&self) -> String {
        self.with_view(|v, _| v.name.clone())
    }

    pub fn sensor_type(&self) -> i32 {
        self.with_view(|v, _| v.event.sensor_type)
    }

    pub fn sysfs_path(&self) -> PathBuf {
        self.device.borrow().backend().sysfs_path().to_path_buf()
    }

    pub fn channel_count(&self) -> usize {
        self.with_view(|v, _| v.channels.len())
    }

    /// Entries this sensor contributes to the sensor list.
    pub fn sensor_count(&self) -> usize {
        1
    }

    pub fn is_calibration_mode(&self) -> bool {
        self.with_view(|v, _| v.calibration_mode)
    }

    pub fn is_matrix_enabled(&self) -> bool {
        self.with_view(|v, _| v.matrix_enabled)
    }

    /// Enable or disable, optionally a single channel of this sensor.
    pub fn enable_channel(&mut self, handle: i32, enable: bool, channel: Option<usize>) -> Result<()> {
        self.with_view(|v, dev| v.enable(dev, handle, enable, channel))
    }

    pub fn set_attr(&mut self, channel: Option<usize>, attr: Attr, value: f32) -> Result<()> {
        self.with_view(|v, dev| v.set_attr(dev, channel, attr, value))
    }

    pub fn get_attr(&mut self, channel: Option<usize>, attr: Attr) -> Result<f32> {
        self.with_view(|v, dev| v.get_attr(dev, channel, attr))
    }

    /// Write an attribute that also shows up in the sensor description.
    fn set_listed_attr(&mut self, channel: Option<usize>, attr: Attr, value: f32) -> Result<()> {
        self.with_view(|v, dev| {
            v.set_attr(dev, channel, attr, value)?;
            v.set_sensor_list(dev);
            Ok(())
        })
    }

    /// Sample period in nanoseconds.
    pub fn get_delay(&mut self, channel: Option<usize>) -> Result<i64> {
        self.with_view(|v, dev| {
            let attr = v.delay_attr(dev);
            v.get_attr(dev, channel, attr).map(|us| us as i64 * 1000)
        })
    }

    pub fn set_offset(&mut self, offset: f32, channel: Option<usize>) -> Result<()> {
        self.set_listed_attr(channel, Attr::Offset, offset)
    }

    pub fn get_offset(&mut self, channel: Option<usize>) -> Result<f32> {
        self.get_attr(channel, Attr::Offset)
    }

    pub fn set_max_range(&mut self, max_range: f32, channel: Option<usize>) -> Result<()> {
        self.set_listed_attr(channel, Attr::MaxRange, max_range)
    }

    pub fn get_max_range(&mut self, channel: Option<usize>) -> Result<f32> {
        self.get_attr(channel, Attr::MaxRange)
    }

    pub fn set_resolution(&mut self, resolution: f32, channel: Option<usize>) -> Result<()> {
        self.set_listed_attr(channel, Attr::Resolution, resolution)
    }

    pub fn get_resolution(&mut self, channel: Option<usize>) -> Result<f32> {
        self.get_attr(channel, Attr::Resolution)
    }

    pub fn set_scale(&mut self, scale: f32, channel: Option<usize>) -> Result<()> {
        self.set_listed_attr(channel, Attr::Scale, scale)
    }

    pub fn get_scale(&mut self, channel: Option<usize>) -> Result<f32> {
        self.get_attr(channel, Attr::Scale)
    }

    pub fn matrix(&self) -> [i8; 9] {
        self.with_view(|v, _| v.matrix)
    }
}

impl Sensor for Nvs {
    fn enable(&mut self, handle: i32, enable: bool) -> Result<()> {
        self.enable_channel(handle, enable, None)
    }

    fn batch(
        &mut self,
        handle: i32,
        flags: i32,
        sampling_period_ns: i64,
        max_report_latency_ns: i64,
    ) -> Result<()> {
        trace!(
            "batch handle={} flags={} period={} latency={}",
            handle,
            flags,
            sampling_period_ns,
            max_report_latency_ns
        );
        self.with_view(|v, dev| v.batch(dev, sampling_period_ns, max_report_latency_ns))
    }

    fn flush(&mut self, handle: i32) -> Result<()> {
        trace!("flush handle={}", handle);
        self.with_view(|v, dev| v.flush(dev))
    }

    fn read_events(
        &mut self,
        out: &mut Vec<SensorEvent>,
        count: usize,
        handle: i32,
    ) -> Result<usize> {
        Ok(self.device.borrow_mut().read_events(out, count, handle))
    }

    fn has_pending_events(&self) -> bool {
        self.device.borrow().views.iter().any(SensorView::flush_pending)
    }

    fn get_sensor_list(&mut self, list: &mut Vec<SensorInfo>, limit: usize) -> usize {
        if limit < 1 {
            return 0;
        }
        let index = list.len();
        let info = self.with_view(|v, dev| v.populate_info(dev, index));
        list.push(info);
        1
    }

    fn sensor_list(&self) -> Vec<SensorInfo> {
        self.with_view(|v, _| v.info.clone().into_iter().collect())
    }

    fn fd(&self) -> Option<RawFd> {
        self.device.borrow().backend().fd()
    }

    fn init_fd(&mut self) -> Result<Option<PollTarget>> {
        self.device.borrow_mut().backend.init_fd()
    }
}

impl PhysicalSensor for Nvs {
    fn handle(&self) -> i32 {
        self.with_view(|v, _| v.handle())
    }

    fn bind_handle(&mut self, handle: i32) {
        self.with_view(|v, dev| v.bind_handle(dev, handle))
    }

    fn get_enable(&self, channel: Option<usize>) -> Result<bool> {
        self.with_view(|v, dev| v.get_enable(dev, channel))
    }

    fn get_max_range(&mut self) -> Result<f32> {
        Nvs::get_max_range(self, None)
    }

    fn get_scale(&mut self, channel: Option<usize>) -> Result<f32> {
        Nvs::get_scale(self, channel)
    }

    fn get_offset(&mut self, channel: Option<usize>) -> Result<f32> {
        Nvs::get_offset(self, channel)
    }

    fn set_offset(&mut self, offset: f32, channel: Option<usize>) -> Result<()> {
        Nvs::set_offset(self, offset, channel)
    }

    fn get_matrix(&mut self) -> Result<[i8; 9]> {
        self.with_view(|v, dev| {
            let matrix = v.read_matrix(dev)?;
            v.matrix = matrix;
            Ok(matrix)
        })
    }

    fn set_matrix(&mut self, matrix: [i8; 9]) {
        self.with_view(|v, _| {
            v.matrix = matrix;
            v.matrix_validate();
        })
    }

    fn sensor_info(&self) -> Option<SensorInfo> {
        self.with_view(|v, _| v.info.clone())
    }

    fn update_sensor_info(&mut self, update: &mut dyn FnMut(&mut SensorInfo)) {
        self.with_view(|v, _| {
            if let Some(info) = v.info.as_mut() {
                update(info);
            }
        })
    }

    fn read_raw(&mut self, channel: Option<usize>) -> Result<i32> {
        self.with_view(|v, dev| v.read_raw(dev, channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::SENSOR_STATUS_UNRELIABLE;

    #[test]
    fn test_parse_matrix() {
        assert_eq!(
            parse_matrix("0,1,0,-1,0,0,0,0,1\n"),
            [0, 1, 0, -1, 0, 0, 0, 0, 1]
        );
        // stops at the first bad entry like scanf
        assert_eq!(parse_matrix("1,0,x,1"), [1, 0, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_matrix_axis_swaps_and_negates() {
        // x' = y, y' = -x, z' = z
        let m = [0, -1, 0, 1, 0, 0, 0, 0, 1];
        let v = [1.0, 2.0, 3.0];
        assert_eq!(matrix_axis(&m, v, 0), 2.0);
        assert_eq!(matrix_axis(&m, v, 1), -1.0);
        assert_eq!(matrix_axis(&m, v, 2), 3.0);
    }

    #[test]
    fn test_matrix_ignores_other_values() {
        let m = [2, 0, 0, 0, 1, 0, 0, 0, 1];
        assert_eq!(matrix_axis(&m, [5.0, 6.0, 7.0], 0), 0.0);
    }

    #[test]
    fn test_status_default() {
        assert_eq!(SensorEvent::default().status, SENSOR_STATUS_UNRELIABLE);
    }
}
