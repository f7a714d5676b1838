// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! Board sensor HAL.
//!
//! [`SensorHal`] is built from an ordered board description. Each entry names
//! the IIO device by its `name` attribute and the channel prefix of the
//! sensor on it; an entry can share the device of an earlier entry, feed the
//! fusion arbiter, or stay out of the sensor list. The HAL assembles the
//! sensor list with sequential handles, routes enable, batch, flush and
//! set-delay calls to the driver owning a handle, and reads events from
//! every driver on each poll.

use crate::{
    config::NvsConfig,
    device::SharedDevice,
    driver::{Nvs, PhysicalSensor, Sensor},
    fusion::{engine::FusionEngine, FusionArbiter, FusionSensors},
    interface::{iio::IioDevice, PollTarget},
    reports::{SensorEvent, SensorInfo},
    Error, Result,
};
use log::{debug, error, info, trace, warn};
use std::{collections::HashMap, os::unix::io::RawFd};

/// What a fusion client provides to the arbiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FusionRole {
    Accel,
    Gyro,
    GyroTemperature,
    Compass,
}

/// One sensor of the board.
#[derive(Debug, Clone, PartialEq)]
pub struct BoardSensor {
    /// Contents of the IIO device `name` attribute
    pub device: String,
    /// Channel prefix, e.g. `accel` for `in_accel_x`
    pub channels: String,
    pub sensor_type: i32,
    /// Share the device opened for an earlier entry with the same `device`
    pub link: bool,
    pub fusion: Option<FusionRole>,
    /// Opened, but neither listed nor polled by the HAL
    pub no_list: bool,
}

impl BoardSensor {
    pub fn new(device: &str, channels: &str, sensor_type: i32) -> Self {
        Self {
            device: device.to_string(),
            channels: channels.to_string(),
            sensor_type,
            link: false,
            fusion: None,
            no_list: false,
        }
    }

    pub fn linked(mut self) -> Self {
        self.link = true;
        self
    }

    pub fn fusion_client(mut self, role: FusionRole) -> Self {
        self.fusion = Some(role);
        self
    }

    pub fn unlisted(mut self) -> Self {
        self.no_list = true;
        self
    }
}

struct HalDriver {
    name: String,
    sensor: Box<dyn Sensor>,
}

/// The sensor HAL of one board.
#[derive(Default)]
pub struct SensorHal {
    drivers: Vec<HalDriver>,
    /// handle -> index into `drivers`
    handles: HashMap<i32, usize>,
    list: Vec<SensorInfo>,
}

impl SensorHal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a driver. Drivers are listed and polled in insertion order.
    pub fn add_driver(&mut self, name: &str, sensor: Box<dyn Sensor>) {
        debug!("driver[{}] {}", self.drivers.len(), name);
        self.drivers.push(HalDriver {
            name: name.to_string(),
            sensor,
        });
    }

    /// Open every sensor of `board` that exists on this system.
    ///
    /// Missing devices are skipped. Fusion clients are listed like any other
    /// sensor.
    pub fn from_board(config: &NvsConfig, board: &[BoardSensor]) -> Self {
        Self::open_board(config, board, false).0
    }

    /// Like [`SensorHal::from_board`], but fusion clients are handed to a
    /// [`FusionArbiter`] appended after the other drivers.
    pub fn from_board_with_fusion<E>(config: &NvsConfig, board: &[BoardSensor], engine: E) -> Self
    where
        E: FusionEngine + 'static,
    {
        let (mut hal, fusion) = Self::open_board(config, board, true);
        if fusion.accel.is_some() || fusion.gyro.is_some() || fusion.compass.is_some() {
            let arbiter = FusionArbiter::new(engine, fusion, config);
            hal.add_driver("fusion", Box::new(arbiter));
        } else {
            info!("no fusion clients, fusion disabled");
        }
        hal
    }

    fn open_board(
        config: &NvsConfig,
        board: &[BoardSensor],
        with_fusion: bool,
    ) -> (Self, FusionSensors) {
        let mut hal = Self::new();
        let mut devices: HashMap<String, SharedDevice> = HashMap::new();
        let mut fusion = FusionSensors::default();

        for entry in board {
            let nvs = match open_entry(config, entry, &devices) {
                Ok(nvs) => nvs,
                Err(e) => {
                    debug!("{}:{} not available: {}", entry.device, entry.channels, e);
                    continue;
                }
            };
            devices
                .entry(entry.device.clone())
                .or_insert_with(|| nvs.shared_device());
            let name = format!("{}:{}", entry.device, entry.channels);

            match entry.fusion {
                Some(role) if with_fusion => {
                    info!("{} -> fusion {:?}", name, role);
                    let sensor: Option<Box<dyn PhysicalSensor>> = Some(Box::new(nvs));
                    match role {
                        FusionRole::Accel => {
                            fusion.part = Some(entry.device.clone());
                            fusion.accel = sensor;
                        }
                        FusionRole::Gyro => fusion.gyro = sensor,
                        FusionRole::GyroTemperature => fusion.gyro_temp = sensor,
                        FusionRole::Compass => fusion.compass = sensor,
                    }
                }
                _ if entry.no_list => debug!("{} not listed", name),
                _ => hal.add_driver(&name, Box::new(nvs)),
            }
        }
        (hal, fusion)
    }

    pub fn driver_count(&self) -> usize {
        self.drivers.len()
    }

    /// Build the sensor list. Handles are positions in the list plus one.
    pub fn get_sensor_list(&mut self, limit: usize) -> &[SensorInfo] {
        self.list.clear();
        self.handles.clear();
        for (i, driver) in self.drivers.iter_mut().enumerate() {
            let room = limit.saturating_sub(self.list.len());
            if room == 0 {
                warn!("sensor list full, {} not listed", driver.name);
                continue;
            }
            let start = self.list.len();
            let n = driver.sensor.get_sensor_list(&mut self.list, room);
            for info in &self.list[start..] {
                self.handles.insert(info.handle, i);
            }
            debug!("{} listed {} sensor(s)", driver.name, n);
        }
        &self.list
    }

    pub fn sensor_list(&self) -> &[SensorInfo] {
        &self.list
    }

    fn driver(&mut self, handle: i32) -> Result<&mut HalDriver> {
        let i = *self.handles.get(&handle).ok_or_else(|| {
            error!("unknown handle {}", handle);
            Error::UnknownHandle(handle)
        })?;
        Ok(&mut self.drivers[i])
    }

    pub fn enable(&mut self, handle: i32, enable: bool) -> Result<()> {
        trace!("enable handle={} enable={}", handle, enable);
        self.driver(handle)?.sensor.enable(handle, enable)
    }

    pub fn set_delay(&mut self, handle: i32, period_ns: i64) -> Result<()> {
        self.driver(handle)?.sensor.set_delay(handle, period_ns)
    }

    pub fn batch(
        &mut self,
        handle: i32,
        flags: i32,
        sampling_period_ns: i64,
        max_report_latency_ns: i64,
    ) -> Result<()> {
        self.driver(handle)?
            .sensor
            .batch(handle, flags, sampling_period_ns, max_report_latency_ns)
    }

    pub fn flush(&mut self, handle: i32) -> Result<()> {
        self.driver(handle)?.sensor.flush(handle)
    }

    /// Prepare every driver descriptor for polling.
    pub fn init_fds(&mut self) -> Vec<PollTarget> {
        let mut targets: Vec<PollTarget> = Vec::new();
        for driver in &mut self.drivers {
            match driver.sensor.init_fd() {
                Ok(Some(t)) if !targets.iter().any(|p| p.fd == t.fd) => targets.push(t),
                Ok(_) => {}
                Err(e) => warn!("{} init fd: {}", driver.name, e),
            }
        }
        targets
    }

    /// Read up to `count` events from all drivers into `out`.
    ///
    /// Drivers sharing one device descriptor are read once per call. A
    /// driver reporting pending events gets a second read with handle 0.
    pub fn poll(&mut self, out: &mut Vec<SensorEvent>, count: usize) -> usize {
        let mut n = 0;
        let mut seen: Vec<RawFd> = Vec::new();
        for driver in &mut self.drivers {
            if n >= count {
                break;
            }
            if let Some(fd) = driver.sensor.fd() {
                if seen.contains(&fd) {
                    continue;
                }
                seen.push(fd);
            }
            for handle in driver.sensor.poll_handles() {
                if n >= count {
                    break;
                }
                match driver.sensor.read_events(out, count - n, handle) {
                    Ok(got) => n += got,
                    Err(e) => debug!("{} read handle={}: {}", driver.name, handle, e),
                }
            }
            if n < count && driver.sensor.has_pending_events() {
                match driver.sensor.read_events(out, count - n, 0) {
                    Ok(got) => n += got,
                    Err(e) => debug!("{} read pending: {}", driver.name, e),
                }
            }
        }
        n
    }
}

fn open_entry(
    config: &NvsConfig,
    entry: &BoardSensor,
    devices: &HashMap<String, SharedDevice>,
) -> Result<Nvs> {
    if entry.link {
        if let Some(device) = devices.get(&entry.device) {
            return Nvs::attach(device.clone(), &entry.channels, entry.sensor_type);
        }
    }
    let dev_num = IioDevice::find_device(config, &entry.device)?.ok_or(Error::NoDevice)?;
    Nvs::new(config, dev_num, &entry.channels, entry.sensor_type)
}

/// Wait until one of `targets` is readable or `timeout_ms` passes.
/// Returns the number of ready descriptors.
pub fn wait_readable(targets: &[PollTarget], timeout_ms: i32) -> Result<usize> {
    let mut fds: Vec<libc::pollfd> = targets
        .iter()
        .map(|t| libc::pollfd {
            fd: t.fd,
            events: t.events,
            revents: 0,
        })
        .collect();
    // SAFETY: fds is a valid array of fds.len() pollfd entries
    let ret = unsafe { libc::poll(fds.as_mut_ptr(), fds.len() as libc::nfds_t, timeout_ms) };
    if ret < 0 {
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::Interrupted {
            return Ok(0);
        }
        return Err(Error::io("poll", err));
    }
    Ok(ret as usize)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{SENSOR_TYPE_ACCELEROMETER, SENSOR_TYPE_LIGHT};
    use std::{cell::RefCell, rc::Rc};

    /// Records calls and hands out canned events.
    struct Scripted {
        sensor_type: i32,
        listed: Vec<SensorInfo>,
        calls: Rc<RefCell<Vec<String>>>,
        queue: Vec<SensorEvent>,
        pending: bool,
    }

    impl Scripted {
        fn new(sensor_type: i32, calls: &Rc<RefCell<Vec<String>>>) -> Self {
            Self {
                sensor_type,
                listed: Vec::new(),
                calls: calls.clone(),
                queue: Vec::new(),
                pending: false,
            }
        }
    }

    impl Sensor for Scripted {
        fn enable(&mut self, handle: i32, enable: bool) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("enable {} {}", handle, enable));
            Ok(())
        }

        fn batch(&mut self, handle: i32, _: i32, period: i64, _: i64) -> Result<()> {
            self.calls
                .borrow_mut()
                .push(format!("batch {} {}", handle, period));
            Ok(())
        }

        fn flush(&mut self, handle: i32) -> Result<()> {
            self.calls.borrow_mut().push(format!("flush {}", handle));
            Ok(())
        }

        fn read_events(
            &mut self,
            out: &mut Vec<SensorEvent>,
            count: usize,
            handle: i32,
        ) -> Result<usize> {
            self.calls.borrow_mut().push(format!("read {}", handle));
            if handle == 0 {
                self.pending = false;
            }
            let n = count.min(self.queue.len());
            out.extend(self.queue.drain(..n));
            Ok(n)
        }

        fn get_sensor_list(&mut self, list: &mut Vec<SensorInfo>, limit: usize) -> usize {
            if limit == 0 {
                return 0;
            }
            let info = SensorInfo {
                handle: list.len() as i32 + 1,
                sensor_type: self.sensor_type,
                ..Default::default()
            };
            self.listed = vec![info.clone()];
            list.push(info);
            1
        }

        fn sensor_list(&self) -> Vec<SensorInfo> {
            self.listed.clone()
        }

        fn has_pending_events(&self) -> bool {
            self.pending
        }

        fn fd(&self) -> Option<RawFd> {
            None
        }
    }

    #[test]
    fn test_sequential_handles_and_dispatch() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut hal = SensorHal::new();
        hal.add_driver("light", Box::new(Scripted::new(SENSOR_TYPE_LIGHT, &calls)));
        hal.add_driver(
            "accel",
            Box::new(Scripted::new(SENSOR_TYPE_ACCELEROMETER, &calls)),
        );

        let list = hal.get_sensor_list(16);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].handle, 1);
        assert_eq!(list[1].handle, 2);
        assert_eq!(list[1].sensor_type, SENSOR_TYPE_ACCELEROMETER);

        hal.enable(2, true).unwrap();
        hal.set_delay(1, 5_000_000).unwrap();
        hal.flush(2).unwrap();
        assert_eq!(
            *calls.borrow(),
            vec!["enable 2 true", "batch 1 5000000", "flush 2"]
        );

        assert!(matches!(hal.enable(9, true), Err(Error::UnknownHandle(9))));
    }

    #[test]
    fn test_sensor_list_limit() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut hal = SensorHal::new();
        for _ in 0..3 {
            hal.add_driver("light", Box::new(Scripted::new(SENSOR_TYPE_LIGHT, &calls)));
        }
        assert_eq!(hal.get_sensor_list(2).len(), 2);
        assert!(hal.enable(3, true).is_err());
    }

    #[test]
    fn test_poll_respects_count_and_pending() {
        let calls = Rc::new(RefCell::new(Vec::new()));
        let mut first = Scripted::new(SENSOR_TYPE_LIGHT, &calls);
        first.queue = vec![SensorEvent::new(1, SENSOR_TYPE_LIGHT); 3];
        let mut second = Scripted::new(SENSOR_TYPE_ACCELEROMETER, &calls);
        second.pending = true;
        second.queue = vec![SensorEvent::new(2, SENSOR_TYPE_ACCELEROMETER); 1];

        let mut hal = SensorHal::new();
        hal.add_driver("light", Box::new(first));
        hal.add_driver("accel", Box::new(second));
        hal.get_sensor_list(16);
        calls.borrow_mut().clear();

        let mut out = Vec::new();
        assert_eq!(hal.poll(&mut out, 2), 2);
        assert_eq!(*calls.borrow(), vec!["read 1"]);

        out.clear();
        calls.borrow_mut().clear();
        assert_eq!(hal.poll(&mut out, 8), 2);
        assert_eq!(out[1].sensor, 2);
        assert_eq!(*calls.borrow(), vec!["read 1", "read 2", "read 0"]);
    }
}
