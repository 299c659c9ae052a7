// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Common imports for working with this crate.
//!
//! ```
//! use tokio_sunspec::prelude::*;
//! ```

pub use crate::{
    cancel::Signal,
    modbus,
    Client, Config, Device, Error, Exception, Group, Handler, Index, Model, ModelDef, Point,
    PointRef, Request, Result, Server, Value,
};
