// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SunSpec server (slave).

use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::Mutex;

use crate::{
    cancel::Signal,
    device::Device,
    error::{Error, Exception, Result},
    index::{Address, Index},
    modbus,
    model::{Model, ModelDef, NopReader},
    request::Request,
};

/// Handles SunSpec server requests.
///
/// The handler is called for every inbound read or write touching the
/// served device, after range planning and (for writes) the
/// valid-and-writable check. Implementations must be safe for concurrent
/// invocation.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Processes one request.
    ///
    /// Any error is reported to the remote side as a device failure.
    async fn handle(&self, ctx: &Signal, req: &mut Request<'_>) -> Result<()>;
}

/// A SunSpec compliant server.
///
/// [`Server::serve`] instantiates the given model definitions into a
/// contiguous address map behind the `SunS` marker, appends the `0xFFFF`
/// terminator and serves the device over _Modbus_ TCP.
pub struct Server {
    mb: modbus::Server,
    base: Address,
    device: Arc<Mutex<Device>>,
}

impl Server {
    pub(crate) fn new(mb: modbus::Server, base: Address) -> Self {
        Self {
            mb,
            base,
            device: Arc::default(),
        }
    }

    /// Returns a handle to the served device.
    ///
    /// The device is populated by [`Server::serve`]; the application may
    /// lock it at any time to seed or update point values while serving.
    #[must_use]
    pub fn device(&self) -> Arc<Mutex<Device>> {
        Arc::clone(&self.device)
    }

    /// Instantiates the models declared by the definitions and starts
    /// serving them to connected clients until the signal is cancelled.
    pub async fn serve<H>(&self, ctx: &Signal, handler: H, defs: &[ModelDef]) -> Result<()>
    where
        H: Handler + 'static,
    {
        {
            let mut device = self.device.lock().await;
            *device = Device::new();
            device.push(Model::marker(self.base));
            let mut address = u32::from(self.base) + 2;
            for def in defs {
                debug!("instantiating model {} at address {address}", def.id());
                let at = u16::try_from(address)
                    .map_err(|_| Error::InvalidParameter("device exceeds the address space"))?;
                let model = def.instance(at, &mut NopReader).await?;
                model.verify()?;
                address += u32::from(model.quantity());
                device.push(model);
            }
            let at = u16::try_from(address)
                .map_err(|_| Error::InvalidParameter("device exceeds the address space"))?;
            device.push(Model::header(at, 0xFFFF, 0));
        }

        let handler = Arc::new(handler);
        let mux = modbus::Mux::new()
            .read_holding_registers({
                let device = Arc::clone(&self.device);
                let handler = Arc::clone(&handler);
                move |ctx, address, quantity| {
                    let device = Arc::clone(&device);
                    let handler = Arc::clone(&handler);
                    async move {
                        debug!("read request for address {address} with quantity {quantity}");
                        let mut device = device.lock().await;
                        let sel = device
                            .collect(&[Index::new(address, quantity)])
                            .map_err(|_| Exception::IllegalDataAddress)?;
                        let size: usize = sel
                            .iter()
                            .map(|&at| usize::from(device.point(at).quantity()) * 2)
                            .sum();
                        let mut req = Request::new(&mut device, sel, false, vec![0; size]);
                        handler
                            .handle(&ctx, &mut req)
                            .await
                            .map_err(|_| Exception::SlaveDeviceFailure)?;
                        req.flush().map_err(|_| Exception::SlaveDeviceFailure)?;
                        Ok(req.into_buffer())
                    }
                }
            })
            .write_multiple_registers({
                let device = Arc::clone(&self.device);
                let handler = Arc::clone(&handler);
                move |ctx, address, values| {
                    let device = Arc::clone(&device);
                    let handler = Arc::clone(&handler);
                    async move {
                        debug!("write request for address {address} with {} bytes", values.len());
                        let mut device = device.lock().await;
                        let quantity = (values.len() / 2) as u16;
                        let sel = device
                            .collect(&[Index::new(address, quantity)])
                            .map_err(|_| Exception::IllegalDataAddress)?;
                        // ref 6.5.1 / 6.5.3: unimplemented and read-only
                        // registers refuse the write
                        for &at in &sel {
                            let point = device.point(at);
                            if !point.valid() || !point.writable() {
                                return Err(Exception::IllegalDataAddress);
                            }
                        }
                        let mut req = Request::new(&mut device, sel, true, values);
                        handler
                            .handle(&ctx, &mut req)
                            .await
                            .map_err(|_| Exception::SlaveDeviceFailure)?;
                        req.ingest().map_err(|_| Exception::SlaveDeviceFailure)?;
                        Ok(())
                    }
                }
            });
        self.mb.serve(ctx, Arc::new(mux)).await
    }
}
