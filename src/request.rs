// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The request object handed to a server-side handler.

use crate::{
    device::{Device, PointRef},
    error::Result,
};

/// A received SunSpec server request.
///
/// For reads the handler may update the affected point values directly
/// through [`Request::device_mut`]; the server flushes them into the
/// response afterwards. For writes the inbound register bytes are applied
/// to the points once the handler returns; a handler that needs the new
/// values earlier calls [`Request::ingest`] itself.
pub struct Request<'a> {
    device: &'a mut Device,
    points: Vec<PointRef>,
    writing: bool,
    buffer: Vec<u8>,
}

impl<'a> Request<'a> {
    pub(crate) fn new(
        device: &'a mut Device,
        points: Vec<PointRef>,
        writing: bool,
        buffer: Vec<u8>,
    ) -> Self {
        Self {
            device,
            points,
            writing,
            buffer,
        }
    }

    /// Specifies whether the request is attempting to set point values.
    #[must_use]
    pub const fn writing(&self) -> bool {
        self.writing
    }

    /// Returns all points affected by the request.
    #[must_use]
    pub fn points(&self) -> &[PointRef] {
        &self.points
    }

    /// Returns the served device.
    #[must_use]
    pub fn device(&self) -> &Device {
        self.device
    }

    /// Returns the served device for point mutation.
    #[must_use]
    pub fn device_mut(&mut self) -> &mut Device {
        self.device
    }

    /// Updates the affected point values in accordance to the request.
    ///
    /// For read requests no change is applied to the points. Ingesting is
    /// idempotent.
    pub fn ingest(&mut self) -> Result<()> {
        if !self.writing {
            return Ok(());
        }
        self.device.decode(&self.points, &self.buffer)
    }

    /// Encodes the current point values back into the response buffer.
    pub fn flush(&mut self) -> Result<()> {
        self.device.encode(&self.points, &mut self.buffer)
    }

    pub(crate) fn into_buffer(self) -> Vec<u8> {
        self.buffer
    }
}
