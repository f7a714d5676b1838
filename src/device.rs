// Copyright 2025 Au-Zone Technologies Inc.
// SPDX-License-Identifier: Apache-2.0

//! One physical device shared by the logical sensors built on it.
//!
//! The device owns the backend, the scan record buffer and the per-sensor
//! state of every view. Each record read from the backend is offered to the
//! views in registration order; a view that produces an event consumes one
//! slot of the caller's budget. When the budget runs out in the middle of a
//! record, the walk resumes at the next view on the following call before a
//! new record is read.

use crate::{driver::SensorView, interface::DeviceBackend, reports::SensorEvent};
use log::{debug, trace};
use std::{cell::RefCell, rc::Rc};

pub type SharedDevice = Rc<RefCell<PhysicalDevice>>;

pub struct PhysicalDevice {
    pub(crate) backend: Box<dyn DeviceBackend>,
    pub(crate) views: Vec<SensorView>,
    /// Next view to offer the current record to
    walk: Option<usize>,
    scan: Vec<u8>,
}

impl PhysicalDevice {
    pub fn new(backend: Box<dyn DeviceBackend>) -> Self {
        Self {
            backend,
            views: Vec::new(),
            walk: None,
            scan: Vec::new(),
        }
    }

    pub fn shared(backend: Box<dyn DeviceBackend>) -> SharedDevice {
        Rc::new(RefCell::new(Self::new(backend)))
    }

    pub(crate) fn add_view(&mut self, view: SensorView) -> usize {
        self.views.push(view);
        self.views.len() - 1
    }

    pub fn backend(&self) -> &dyn DeviceBackend {
        self.backend.as_ref()
    }

    pub fn view_count(&self) -> usize {
        self.views.len()
    }

    /// Read up to `count` events into `out` and return how many were added.
    ///
    /// Queued flush completions go out first. A `handle` of 0 only drains
    /// those and leaves the backend alone. Otherwise reading stops early when
    /// the backend has no complete record available.
    pub fn read_events(&mut self, out: &mut Vec<SensorEvent>, count: usize, handle: i32) -> usize {
        if self.backend.take_walk_reset() {
            self.walk = None;
        }

        let mut n = 0;
        for view in &mut self.views {
            if n >= count {
                break;
            }
            if let Some(event) = view.take_pending_flush() {
                out.push(event);
                n += 1;
            }
        }
        if handle == 0 {
            return n;
        }

        while n < count {
            let idx = match self.walk {
                Some(idx) => idx,
                None => {
                    let size = self.backend.scan_size();
                    if size == 0 || self.views.is_empty() {
                        break;
                    }
                    self.scan.resize(size, 0);
                    match self.backend.read_scan(&mut self.scan) {
                        Ok(got) if got >= size => {}
                        Ok(got) => {
                            trace!("read {} of {} bytes, no record", got, size);
                            break;
                        }
                        Err(e) => {
                            debug!("read: {}", e);
                            break;
                        }
                    }
                    0
                }
            };

            let event = self.views[idx].process_event(self.backend.as_ref(), &self.scan, handle);
            if let Some(event) = event {
                out.push(event);
                n += 1;
            }
            self.walk = (idx + 1 < self.views.len()).then_some(idx + 1);
        }
        n
    }
}
