// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! _Modbus_ TCP transport.
//!
//! A request/response framing engine with transaction-id multiplexing:
//! multiple requests may be in flight on one shared connection, responses
//! are dispatched to their callers through a fan-out listener registry.
//! The [`Client`] is the master side, the [`Server`] the slave side with a
//! per-function-code [`Mux`] dispatcher.

pub(crate) mod config;
pub(crate) mod connection;
pub(crate) mod frame;

mod client;
mod handler;
mod server;

pub use self::{
    client::Client,
    config::{Config, Kind, Mode},
    handler::{Handler, Mux},
    server::Server,
};

use crate::error::Exception;

/// A _Modbus_ function code is represented by an unsigned 8 bit integer.
pub type FunctionCode = u8;

/// Validates an address/quantity pair against a per-function register or
/// coil limit.
///
/// A quantity of zero or beyond the limit is an [`IllegalDataValue`]
/// (`Exception::IllegalDataValue`); a range wrapping around the 16-bit
/// address space is an [`IllegalDataAddress`](Exception::IllegalDataAddress).
pub(crate) fn bound_check(address: u16, quantity: u16, limit: u16) -> Result<(), Exception> {
    if quantity < 1 || quantity > limit {
        return Err(Exception::IllegalDataValue);
    }
    if u32::from(address) + u32::from(quantity) - 1 > u32::from(u16::MAX) {
        return Err(Exception::IllegalDataAddress);
    }
    Ok(())
}

/// Returns the number of bytes required to pack the given number of bits.
pub(crate) fn byte_count(bits: u16) -> usize {
    usize::from(bits).div_ceil(8)
}

/// Unpacks `quantity` coil states from their byte representation,
/// least-significant bit first.
pub(crate) fn bytes_to_bools(quantity: u16, bytes: &[u8]) -> Vec<bool> {
    (0..usize::from(quantity))
        .map(|i| bytes.get(i / 8).is_some_and(|byte| byte & (1 << (i % 8)) != 0))
        .collect()
}

/// Packs coil states into their byte representation, least-significant bit
/// first.
pub(crate) fn bools_to_bytes(status: &[bool]) -> Vec<u8> {
    let mut bytes = vec![0_u8; byte_count(status.len() as u16)];
    for (i, set) in status.iter().enumerate() {
        if *set {
            bytes[i / 8] |= 1 << (i % 8);
        }
    }
    bytes
}
