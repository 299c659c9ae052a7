// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Server-side request dispatch.

use async_trait::async_trait;
use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use futures_util::future::BoxFuture;
use std::future::Future;

use crate::{
    cancel::Signal,
    error::Exception,
    index::{Address, Quantity},
};

use super::{bools_to_bytes, bound_check, byte_count, bytes_to_bools, FunctionCode};

/// Handles inbound server requests.
///
/// Implementations must be safe for concurrent invocation: every in-flight
/// request on every connection calls into the same handler.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Produces the response data for a request, or the exception to reply
    /// with.
    async fn handle(
        &self,
        ctx: &Signal,
        code: FunctionCode,
        req: &[u8],
    ) -> Result<Vec<u8>, Exception>;
}

type ReadBitsFn =
    Box<dyn Fn(Signal, Address, Quantity) -> BoxFuture<'static, Result<Vec<bool>, Exception>> + Send + Sync>;
type ReadBytesFn =
    Box<dyn Fn(Signal, Address, Quantity) -> BoxFuture<'static, Result<Vec<u8>, Exception>> + Send + Sync>;
type WriteBitFn =
    Box<dyn Fn(Signal, Address, bool) -> BoxFuture<'static, Result<(), Exception>> + Send + Sync>;
type WriteRegisterFn =
    Box<dyn Fn(Signal, Address, u16) -> BoxFuture<'static, Result<(), Exception>> + Send + Sync>;
type WriteBitsFn =
    Box<dyn Fn(Signal, Address, Vec<bool>) -> BoxFuture<'static, Result<(), Exception>> + Send + Sync>;
type WriteBytesFn =
    Box<dyn Fn(Signal, Address, Vec<u8>) -> BoxFuture<'static, Result<(), Exception>> + Send + Sync>;
type ReadWriteFn = Box<
    dyn Fn(Signal, Address, Quantity, Address, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, Exception>>
        + Send
        + Sync,
>;
type FallbackFn = Box<
    dyn Fn(Signal, FunctionCode, Vec<u8>) -> BoxFuture<'static, Result<Vec<u8>, Exception>>
        + Send
        + Sync,
>;

/// A server-side request multiplexer.
///
/// Redirects each inbound message to the callback registered for its
/// function code, decoding and validating the PDU beforehand and encoding
/// the response afterwards. An absent callback yields
/// [`Exception::IllegalFunction`]; unknown function codes go to the
/// `fallback` callback, if any.
///
/// All callbacks must be safe for concurrent invocation.
#[derive(Default)]
pub struct Mux {
    fallback: Option<FallbackFn>,
    read_coils: Option<ReadBitsFn>,
    read_discrete_inputs: Option<ReadBitsFn>,
    read_holding_registers: Option<ReadBytesFn>,
    read_input_registers: Option<ReadBytesFn>,
    write_single_coil: Option<WriteBitFn>,
    write_single_register: Option<WriteRegisterFn>,
    write_multiple_coils: Option<WriteBitsFn>,
    write_multiple_registers: Option<WriteBytesFn>,
    read_write_multiple_registers: Option<ReadWriteFn>,
}

impl Mux {
    /// Creates a multiplexer without any registered callbacks.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the callback for requests with unknown function codes.
    #[must_use]
    pub fn fallback<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, FunctionCode, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, Exception>> + Send + 'static,
    {
        self.fallback = Some(Box::new(move |ctx, code, req| Box::pin(f(ctx, code, req))));
        self
    }

    /// Registers the ReadCoils (0x01) callback.
    #[must_use]
    pub fn read_coils<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, Quantity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<bool>, Exception>> + Send + 'static,
    {
        self.read_coils = Some(Box::new(move |ctx, adr, qty| Box::pin(f(ctx, adr, qty))));
        self
    }

    /// Registers the ReadDiscreteInputs (0x02) callback.
    #[must_use]
    pub fn read_discrete_inputs<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, Quantity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<bool>, Exception>> + Send + 'static,
    {
        self.read_discrete_inputs = Some(Box::new(move |ctx, adr, qty| Box::pin(f(ctx, adr, qty))));
        self
    }

    /// Registers the ReadHoldingRegisters (0x03) callback.
    ///
    /// The callback must return exactly `2 × quantity` bytes.
    #[must_use]
    pub fn read_holding_registers<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, Quantity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, Exception>> + Send + 'static,
    {
        self.read_holding_registers = Some(Box::new(move |ctx, adr, qty| Box::pin(f(ctx, adr, qty))));
        self
    }

    /// Registers the ReadInputRegisters (0x04) callback.
    ///
    /// The callback must return exactly `2 × quantity` bytes.
    #[must_use]
    pub fn read_input_registers<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, Quantity) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, Exception>> + Send + 'static,
    {
        self.read_input_registers = Some(Box::new(move |ctx, adr, qty| Box::pin(f(ctx, adr, qty))));
        self
    }

    /// Registers the WriteSingleCoil (0x05) callback.
    #[must_use]
    pub fn write_single_coil<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, bool) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Exception>> + Send + 'static,
    {
        self.write_single_coil = Some(Box::new(move |ctx, adr, status| Box::pin(f(ctx, adr, status))));
        self
    }

    /// Registers the WriteSingleRegister (0x06) callback.
    #[must_use]
    pub fn write_single_register<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, u16) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Exception>> + Send + 'static,
    {
        self.write_single_register = Some(Box::new(move |ctx, adr, value| Box::pin(f(ctx, adr, value))));
        self
    }

    /// Registers the WriteMultipleCoils (0x0F) callback.
    #[must_use]
    pub fn write_multiple_coils<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, Vec<bool>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Exception>> + Send + 'static,
    {
        self.write_multiple_coils = Some(Box::new(move |ctx, adr, status| Box::pin(f(ctx, adr, status))));
        self
    }

    /// Registers the WriteMultipleRegisters (0x10) callback.
    #[must_use]
    pub fn write_multiple_registers<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), Exception>> + Send + 'static,
    {
        self.write_multiple_registers = Some(Box::new(move |ctx, adr, values| Box::pin(f(ctx, adr, values))));
        self
    }

    /// Registers the ReadWriteMultipleRegisters (0x17) callback.
    ///
    /// The callback must return exactly `2 × read_quantity` bytes.
    #[must_use]
    pub fn read_write_multiple_registers<F, Fut>(mut self, f: F) -> Self
    where
        F: Fn(Signal, Address, Quantity, Address, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<u8>, Exception>> + Send + 'static,
    {
        self.read_write_multiple_registers = Some(Box::new(move |ctx, radr, rqty, wadr, values| {
            Box::pin(f(ctx, radr, rqty, wadr, values))
        }));
        self
    }

    async fn read_bits(
        callback: Option<&ReadBitsFn>,
        ctx: &Signal,
        req: &[u8],
        limit: u16,
    ) -> Result<Vec<u8>, Exception> {
        let Some(callback) = callback else {
            return Err(Exception::IllegalFunction);
        };
        if req.len() != 4 {
            return Err(Exception::IllegalDataAddress);
        }
        let address = BigEndian::read_u16(&req[0..]);
        let quantity = BigEndian::read_u16(&req[2..]);
        bound_check(address, quantity, limit)?;
        let status = callback(ctx.clone(), address, quantity).await?;
        if status.len() != usize::from(quantity) {
            return Err(Exception::SlaveDeviceFailure);
        }
        let packed = bools_to_bytes(&status);
        let mut res = BytesMut::with_capacity(1 + packed.len());
        res.put_u8(byte_count(quantity) as u8);
        res.put_slice(&packed);
        Ok(res.to_vec())
    }

    async fn read_registers(
        callback: Option<&ReadBytesFn>,
        ctx: &Signal,
        req: &[u8],
    ) -> Result<Vec<u8>, Exception> {
        let Some(callback) = callback else {
            return Err(Exception::IllegalFunction);
        };
        if req.len() != 4 {
            return Err(Exception::IllegalDataAddress);
        }
        let address = BigEndian::read_u16(&req[0..]);
        let quantity = BigEndian::read_u16(&req[2..]);
        bound_check(address, quantity, 125)?;
        let values = callback(ctx.clone(), address, quantity).await?;
        if values.len() != usize::from(quantity) * 2 {
            return Err(Exception::SlaveDeviceFailure);
        }
        let mut res = BytesMut::with_capacity(1 + values.len());
        res.put_u8(values.len() as u8);
        res.put_slice(&values);
        Ok(res.to_vec())
    }

    async fn write_coil(&self, ctx: &Signal, req: &[u8]) -> Result<Vec<u8>, Exception> {
        let Some(callback) = &self.write_single_coil else {
            return Err(Exception::IllegalFunction);
        };
        if req.len() != 4 {
            return Err(Exception::IllegalDataAddress);
        }
        let address = BigEndian::read_u16(&req[0..]);
        let status = match BigEndian::read_u16(&req[2..]) {
            0x0000 => false,
            0xFF00 => true,
            _ => return Err(Exception::IllegalDataValue),
        };
        callback(ctx.clone(), address, status).await?;
        Ok(req.to_vec())
    }

    async fn write_register(&self, ctx: &Signal, req: &[u8]) -> Result<Vec<u8>, Exception> {
        let Some(callback) = &self.write_single_register else {
            return Err(Exception::IllegalFunction);
        };
        if req.len() != 4 {
            return Err(Exception::IllegalDataAddress);
        }
        let address = BigEndian::read_u16(&req[0..]);
        let value = BigEndian::read_u16(&req[2..]);
        callback(ctx.clone(), address, value).await?;
        Ok(req.to_vec())
    }

    async fn write_coils(&self, ctx: &Signal, req: &[u8]) -> Result<Vec<u8>, Exception> {
        let Some(callback) = &self.write_multiple_coils else {
            return Err(Exception::IllegalFunction);
        };
        if req.len() < 6 {
            return Err(Exception::IllegalDataAddress);
        }
        let address = BigEndian::read_u16(&req[0..]);
        let quantity = BigEndian::read_u16(&req[2..]);
        if req[5..].len() != usize::from(req[4]) || usize::from(req[4]) != byte_count(quantity) {
            return Err(Exception::IllegalDataValue);
        }
        bound_check(address, quantity, 1968)?;
        callback(ctx.clone(), address, bytes_to_bools(quantity, &req[5..])).await?;
        Ok(req[..4].to_vec())
    }

    async fn write_registers(&self, ctx: &Signal, req: &[u8]) -> Result<Vec<u8>, Exception> {
        let Some(callback) = &self.write_multiple_registers else {
            return Err(Exception::IllegalFunction);
        };
        if req.len() < 6 {
            return Err(Exception::IllegalDataAddress);
        }
        let address = BigEndian::read_u16(&req[0..]);
        let quantity = BigEndian::read_u16(&req[2..]);
        if usize::from(quantity) * 2 != usize::from(req[4]) || usize::from(req[4]) != req[5..].len()
        {
            return Err(Exception::IllegalDataValue);
        }
        bound_check(address, quantity, 123)?;
        callback(ctx.clone(), address, req[5..].to_vec()).await?;
        Ok(req[..4].to_vec())
    }

    async fn read_write_registers(&self, ctx: &Signal, req: &[u8]) -> Result<Vec<u8>, Exception> {
        let Some(callback) = &self.read_write_multiple_registers else {
            return Err(Exception::IllegalFunction);
        };
        if req.len() < 11 {
            return Err(Exception::IllegalDataAddress);
        }
        let read_address = BigEndian::read_u16(&req[0..]);
        let read_quantity = BigEndian::read_u16(&req[2..]);
        let write_address = BigEndian::read_u16(&req[4..]);
        let write_quantity = BigEndian::read_u16(&req[6..]);
        if usize::from(write_quantity) * 2 != usize::from(req[8])
            || usize::from(req[8]) != req[9..].len()
        {
            return Err(Exception::IllegalDataValue);
        }
        bound_check(read_address, read_quantity, 125)?;
        bound_check(write_address, write_quantity, 121)?;
        let values = callback(
            ctx.clone(),
            read_address,
            read_quantity,
            write_address,
            req[9..].to_vec(),
        )
        .await?;
        if values.len() != usize::from(read_quantity) * 2 {
            return Err(Exception::SlaveDeviceFailure);
        }
        let mut res = BytesMut::with_capacity(1 + values.len());
        res.put_u8(values.len() as u8);
        res.put_slice(&values);
        Ok(res.to_vec())
    }
}

#[async_trait]
impl Handler for Mux {
    async fn handle(
        &self,
        ctx: &Signal,
        code: FunctionCode,
        req: &[u8],
    ) -> Result<Vec<u8>, Exception> {
        match code {
            0x01 => Self::read_bits(self.read_coils.as_ref(), ctx, req, 2000).await,
            0x02 => Self::read_bits(self.read_discrete_inputs.as_ref(), ctx, req, 2000).await,
            0x03 => Self::read_registers(self.read_holding_registers.as_ref(), ctx, req).await,
            0x04 => Self::read_registers(self.read_input_registers.as_ref(), ctx, req).await,
            0x05 => self.write_coil(ctx, req).await,
            0x06 => self.write_register(ctx, req).await,
            0x0F => self.write_coils(ctx, req).await,
            0x10 => self.write_registers(ctx, req).await,
            0x17 => self.read_write_registers(ctx, req).await,
            code => match &self.fallback {
                Some(callback) => callback(ctx.clone(), code, req.to_vec()).await,
                None => Err(Exception::IllegalFunction),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn absent_callbacks_yield_illegal_function() {
        let mux = Mux::new();
        let ctx = Signal::new();
        for code in [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x0F, 0x10, 0x17, 0x42] {
            assert_eq!(
                mux.handle(&ctx, code, &[0, 0, 0, 1]).await,
                Err(Exception::IllegalFunction),
                "code {code:#04x}"
            );
        }
    }

    #[tokio::test]
    async fn read_holding_registers_validates_and_encodes() {
        let mux = Mux::new().read_holding_registers(|_ctx, address, quantity| async move {
            assert_eq!(address, 0x10);
            Ok(vec![0xAB; usize::from(quantity) * 2])
        });
        let ctx = Signal::new();

        let res = mux.handle(&ctx, 0x03, &[0x00, 0x10, 0x00, 0x02]).await.unwrap();
        assert_eq!(res, vec![4, 0xAB, 0xAB, 0xAB, 0xAB]);

        // truncated PDU
        assert_eq!(
            mux.handle(&ctx, 0x03, &[0x00, 0x10, 0x00]).await,
            Err(Exception::IllegalDataAddress)
        );
        // quantity beyond the read limit
        assert_eq!(
            mux.handle(&ctx, 0x03, &[0x00, 0x10, 0x00, 0x7E]).await,
            Err(Exception::IllegalDataValue)
        );
    }

    #[tokio::test]
    async fn short_callback_responses_become_device_failures() {
        let mux = Mux::new().read_holding_registers(|_ctx, _address, _quantity| async move {
            Ok(vec![0x00])
        });
        let ctx = Signal::new();
        assert_eq!(
            mux.handle(&ctx, 0x03, &[0x00, 0x00, 0x00, 0x02]).await,
            Err(Exception::SlaveDeviceFailure)
        );
    }

    #[tokio::test]
    async fn write_multiple_registers_checks_byte_count() {
        let mux = Mux::new().write_multiple_registers(|_ctx, _address, values| async move {
            assert_eq!(values, vec![0x12, 0x34]);
            Ok(())
        });
        let ctx = Signal::new();

        let res = mux
            .handle(&ctx, 0x10, &[0x00, 0x05, 0x00, 0x01, 0x02, 0x12, 0x34])
            .await
            .unwrap();
        // echo of address and quantity
        assert_eq!(res, vec![0x00, 0x05, 0x00, 0x01]);

        // byte count disagrees with quantity
        assert_eq!(
            mux.handle(&ctx, 0x10, &[0x00, 0x05, 0x00, 0x02, 0x02, 0x12, 0x34])
                .await,
            Err(Exception::IllegalDataValue)
        );
    }

    #[tokio::test]
    async fn write_single_coil_rejects_malformed_values() {
        let mux = Mux::new().write_single_coil(|_ctx, _address, status| async move {
            assert!(status);
            Ok(())
        });
        let ctx = Signal::new();
        let res = mux.handle(&ctx, 0x05, &[0x00, 0x01, 0xFF, 0x00]).await.unwrap();
        assert_eq!(res, vec![0x00, 0x01, 0xFF, 0x00]);
        assert_eq!(
            mux.handle(&ctx, 0x05, &[0x00, 0x01, 0x12, 0x34]).await,
            Err(Exception::IllegalDataValue)
        );
    }

    #[tokio::test]
    async fn fallback_sees_unknown_codes() {
        let mux = Mux::new().fallback(|_ctx, code, req| async move {
            assert_eq!(code, 0x2B);
            Ok(req)
        });
        let ctx = Signal::new();
        let res = mux.handle(&ctx, 0x2B, &[0x0E, 0x01]).await.unwrap();
        assert_eq!(res, vec![0x0E, 0x01]);
    }
}
