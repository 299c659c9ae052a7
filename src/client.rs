// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SunSpec client (master).

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use log::{debug, info};

use crate::{
    cancel::Signal,
    device::{chunk, Device, PointRef},
    error::{Error, Result},
    index::{Address, Index},
    modbus,
    model::{Model, ModelDef, PointReader},
    point::PointId,
};

/// The well-known base addresses probed for the `SunS` marker, in order.
const BASE_ADDRESSES: [Address; 3] = [0, 40000, 50000];

/// The 4 ASCII bytes identifying the start of a SunSpec address map.
const MARKER: &[u8] = b"SunS";

/// Holding registers carried by one read transaction.
const READ_LIMIT: u16 = 125;

/// Holding registers carried by one write transaction.
const WRITE_LIMIT: u16 = 123;

/// A SunSpec compliant client.
///
/// [`Client::scan`] discovers the served device; afterwards point values
/// are exchanged range-wise with [`Client::read`] and [`Client::write`]
/// and inspected through [`Client::device`].
///
/// ```no_run
/// use tokio_sunspec::{cancel::Signal, Config, Index};
///
/// # async fn demo(defs: Vec<tokio_sunspec::ModelDef>) -> tokio_sunspec::Result<()> {
/// let mut client = Config::new("localhost:502").client()?;
/// client.connect().await?;
///
/// let ctx = Signal::new();
/// client.scan(&ctx, &defs).await?;
/// let range = client.device().model(1).expect("device lacks the common model").index();
/// let (points, outcome) = client.read(&ctx, &[range]).await;
/// outcome?;
/// for at in points {
///     println!("{}: {:?}", client.device().point(at).name(), client.device().value(at));
/// }
/// # Ok(())
/// # }
/// ```
pub struct Client {
    mb: modbus::Client,
    device: Device,
}

impl Client {
    pub(crate) fn new(mb: modbus::Client) -> Self {
        Self {
            mb,
            device: Device::new(),
        }
    }

    /// Starts the underlying server-connection.
    pub async fn connect(&mut self) -> Result<()> {
        self.mb.connect().await
    }

    /// Stops the underlying server-connection.
    pub async fn disconnect(&mut self) -> Result<()> {
        self.mb.disconnect().await
    }

    /// Returns the device discovered by the last scan.
    #[must_use]
    pub fn device(&self) -> &Device {
        &self.device
    }

    /// Returns the discovered device for point mutation.
    #[must_use]
    pub fn device_mut(&mut self) -> &mut Device {
        &mut self.device
    }

    /// Analyses the server, retrieving its device.
    ///
    /// The address map is walked header by header starting behind the
    /// `SunS` marker until the `0xFFFF` terminator. A header whose id
    /// matches one of the given definitions is instantiated (reading wire
    /// values as needed for dynamic repeat counts) and verified; any other
    /// header is retained as an opaque placeholder.
    pub async fn scan(&mut self, ctx: &Signal, defs: &[ModelDef]) -> Result<()> {
        let base = self.marker(ctx).await?;
        let mut device = Device::new();
        let mut address = base + 2;
        loop {
            let header = self.mb.read_holding_registers(ctx, address, 2).await?;
            let id = BigEndian::read_u16(&header[0..2]);
            let length = BigEndian::read_u16(&header[2..4]);
            if id == 0xFFFF {
                break;
            }
            let model = match defs.iter().find(|def| def.id() == id) {
                Some(def) => {
                    debug!("instantiating model {id} at address {address}");
                    let mut reader = WireReader { mb: &self.mb, ctx };
                    let model = def.instance(address, &mut reader).await?;
                    model.verify()?;
                    model
                }
                None => {
                    debug!("retaining unknown model {id} at address {address}");
                    Model::header(address, id, length)
                }
            };
            device.push(model);
            address = u16::try_from(u32::from(address) + u32::from(length) + 2)
                .map_err(|_| Error::InvalidParameter("device exceeds the address space"))?;
        }
        self.device = device;
        Ok(())
    }

    // Locates the base address of the address map by probing the
    // well-known candidates for the marker bytes.
    async fn marker(&self, ctx: &Signal) -> Result<Address> {
        for address in BASE_ADDRESSES {
            match self.mb.read_holding_registers(ctx, address, 2).await {
                Ok(bytes) if bytes == MARKER => {
                    info!("marker located at address {address}");
                    return Ok(address);
                }
                Ok(_) => {}
                Err(Error::Cancelled) => return Err(Error::Cancelled),
                Err(err) => debug!("no marker at address {address}: {err}"),
            }
        }
        Err(Error::MarkerNotFound)
    }

    /// Requests all point values in the given address ranges from the
    /// server.
    ///
    /// Returns the points processed so far together with the outcome, so
    /// partial progress stays observable on failure.
    pub async fn read(&mut self, ctx: &Signal, indexes: &[Index]) -> (Vec<PointRef>, Result<()>) {
        let sel = match self.device.collect(indexes) {
            Ok(sel) => sel,
            Err(err) => return (Vec::new(), Err(err)),
        };
        let runs = chunk(&self.device, &sel, READ_LIMIT);
        let mut done = 0;
        for run in runs {
            let span = self.device.span(&sel[run.clone()]);
            let outcome = self
                .mb
                .read_holding_registers(ctx, span.address(), span.quantity())
                .await
                .and_then(|bytes| self.device.decode(&sel[run.clone()], &bytes));
            if let Err(err) = outcome {
                return (sel[..done].to_vec(), Err(err));
            }
            done = run.end;
        }
        (sel, Ok(()))
    }

    /// Sends all point values in the given address ranges to the server.
    ///
    /// Read-only points are silently skipped; a selection without any
    /// writable point fails with
    /// [`Error::NoWritablePoints`]. Returns the points processed so far
    /// together with the outcome.
    pub async fn write(&mut self, ctx: &Signal, indexes: &[Index]) -> (Vec<PointRef>, Result<()>) {
        let sel = match self.device.collect(indexes) {
            Ok(sel) => sel,
            Err(err) => return (Vec::new(), Err(err)),
        };
        let sel: Vec<PointRef> = sel
            .into_iter()
            .filter(|&at| self.device.point(at).writable())
            .collect();
        if sel.is_empty() {
            return (Vec::new(), Err(Error::NoWritablePoints));
        }
        let runs = chunk(&self.device, &sel, WRITE_LIMIT);
        let mut done = 0;
        for run in runs {
            let span = self.device.span(&sel[run.clone()]);
            let mut bytes = vec![0_u8; usize::from(span.quantity()) * 2];
            if let Err(err) = self.device.encode(&sel[run.clone()], &mut bytes) {
                return (sel[..done].to_vec(), Err(err));
            }
            if let Err(err) = self
                .mb
                .write_multiple_registers(ctx, span.address(), &bytes)
                .await
            {
                return (sel[..done].to_vec(), Err(err));
            }
            done = run.end;
        }
        (sel, Ok(()))
    }
}

// Reads freshly laid-out points over the wire during model instantiation.
// The points of one callback are contiguous by construction, so chunking
// only has to respect the read limit.
struct WireReader<'a> {
    mb: &'a modbus::Client,
    ctx: &'a Signal,
}

#[async_trait]
impl PointReader for WireReader<'_> {
    async fn fill(&mut self, model: &mut Model, points: &[PointId]) -> Result<()> {
        let mut start = 0;
        while start < points.len() {
            let address = model.point(points[start]).address();
            let mut quantity = model.point(points[start]).quantity();
            let mut end = start + 1;
            while end < points.len() {
                let next = model.point(points[end]).quantity();
                if quantity + next > READ_LIMIT {
                    break;
                }
                quantity += next;
                end += 1;
            }
            let bytes = self
                .mb
                .read_holding_registers(self.ctx, address, quantity)
                .await?;
            model.decode_points(&points[start..end], &bytes)?;
            start = end;
        }
        Ok(())
    }
}
