// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Error types.

use std::{error, fmt, io};

use thiserror::Error;

/// Result alias with the crate-wide [`Error`] type.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Error type for all fallible operations of this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// The server answered with a _Modbus_ exception.
    #[error("exception: {0}")]
    Exception(#[from] Exception),

    /// A received response did not carry the transaction id of the request.
    ///
    /// On a shared TCP connection multiple requests may be in flight and
    /// responses are correlated by transaction id. A mismatch only means the
    /// frame was meant for another caller; the request keeps waiting for the
    /// next frame and this error never escalates out of the crate.
    #[error("mismatch of transaction id")]
    MismatchedTransactionId,

    /// The protocol identifier of a response differs from its request.
    #[error("mismatch of protocol id")]
    MismatchedProtocolId,

    /// The unit identifier of a response differs from its request.
    #[error("mismatch of unit id")]
    MismatchedUnitId,

    /// The payload does not fit into a single _Modbus_ ADU.
    #[error("data size exceeds limit")]
    DataSizeExceeded,

    /// A received ADU is too short to carry an MBAP header and function code.
    #[error("malformed frame")]
    InvalidFrame,

    /// A configuration or argument violates a restriction.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The client is not connected.
    #[error("not connected")]
    NotConnected,

    /// The client is already connected.
    #[error("already connected")]
    AlreadyConnected,

    /// The operation was cancelled through its [`Signal`](crate::cancel::Signal).
    #[error("cancelled")]
    Cancelled,

    /// The given address ranges do not reference any points in the device.
    #[error("no points selected by the given ranges")]
    NoPointsSelected,

    /// An atomic group cannot be partially addressed.
    #[error("atomic group cannot be partially addressed")]
    AtomicGroupPartialAccess,

    /// A range touches a point without fully containing it.
    #[error("point not fully contained by the given range")]
    PointNotFullyContained,

    /// The model's register layout is not contiguous.
    #[error("model address space is not continuous")]
    AddressNotContinuous,

    /// A group, point or symbol name violates the `[A-Za-z0-9_]+` rule.
    #[error("name violates the SunSpec identifier rule: {0:?}")]
    InvalidName(String),

    /// A group carries no points, or a model lacks its `ID`/`L` header.
    #[error("group is missing its points")]
    MissingPoints,

    /// The `L` header does not match the model's register count.
    #[error("length header does not match the model quantity")]
    LengthMismatch,

    /// No probed base address exposed the `SunS` marker.
    #[error("could not locate the SunS marker")]
    MarkerNotFound,

    /// A write selection contains no writable points.
    #[error("no writable points in the given ranges")]
    NoWritablePoints,

    /// The underlying transport failed.
    #[error(transparent)]
    Io(#[from] io::Error),
}

// The read loop broadcasts a single terminal error to every registered
// listener, so errors must be duplicable. `io::Error` is not `Clone`;
// it is rebuilt from its kind and message.
impl Clone for Error {
    fn clone(&self) -> Self {
        use Error::*;

        match self {
            Exception(ex) => Exception(*ex),
            MismatchedTransactionId => MismatchedTransactionId,
            MismatchedProtocolId => MismatchedProtocolId,
            MismatchedUnitId => MismatchedUnitId,
            DataSizeExceeded => DataSizeExceeded,
            InvalidFrame => InvalidFrame,
            InvalidParameter(what) => InvalidParameter(what),
            NotConnected => NotConnected,
            AlreadyConnected => AlreadyConnected,
            Cancelled => Cancelled,
            NoPointsSelected => NoPointsSelected,
            AtomicGroupPartialAccess => AtomicGroupPartialAccess,
            PointNotFullyContained => PointNotFullyContained,
            AddressNotContinuous => AddressNotContinuous,
            InvalidName(name) => InvalidName(name.clone()),
            MissingPoints => MissingPoints,
            LengthMismatch => LengthMismatch,
            MarkerNotFound => MarkerNotFound,
            NoWritablePoints => NoWritablePoints,
            Io(err) => Io(io::Error::new(err.kind(), err.to_string())),
        }
    }
}

/// A server (slave) exception as defined by the _Modbus_ specification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Exception {
    /// 0x01: The function code is not an allowable action for the server.
    IllegalFunction,
    /// 0x02: The data address is not an allowable address for the server.
    IllegalDataAddress,
    /// 0x03: A value in the query data field is not allowable for the server.
    IllegalDataValue,
    /// 0x04: An unrecoverable error occurred while performing the action.
    SlaveDeviceFailure,
    /// 0x05: The request was accepted but needs a long time to process.
    Acknowledge,
    /// 0x06: The server is busy processing a long-duration command.
    SlaveDeviceBusy,
    /// 0x08: The extended file area failed to pass a consistency check.
    MemoryParityError,
    /// 0x0A: The gateway was unable to allocate an internal path.
    GatewayPathUnavailable,
    /// 0x0B: No response was obtained from the target device.
    GatewayTargetDeviceFailedToRespond,
    /// An exception code outside the values defined by the _Modbus_
    /// specification.
    Undefined(u8),
}

impl Exception {
    /// Returns the wire representation of the exception.
    #[must_use]
    pub const fn code(self) -> u8 {
        use Exception::*;

        match self {
            IllegalFunction => 0x01,
            IllegalDataAddress => 0x02,
            IllegalDataValue => 0x03,
            SlaveDeviceFailure => 0x04,
            Acknowledge => 0x05,
            SlaveDeviceBusy => 0x06,
            MemoryParityError => 0x08,
            GatewayPathUnavailable => 0x0A,
            GatewayTargetDeviceFailedToRespond => 0x0B,
            Undefined(code) => code,
        }
    }
}

impl From<u8> for Exception {
    fn from(code: u8) -> Self {
        use Exception::*;

        match code {
            0x01 => IllegalFunction,
            0x02 => IllegalDataAddress,
            0x03 => IllegalDataValue,
            0x04 => SlaveDeviceFailure,
            0x05 => Acknowledge,
            0x06 => SlaveDeviceBusy,
            0x08 => MemoryParityError,
            0x0A => GatewayPathUnavailable,
            0x0B => GatewayTargetDeviceFailedToRespond,
            code => Undefined(code),
        }
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use Exception::*;

        match *self {
            IllegalFunction => write!(f, "Illegal function"),
            IllegalDataAddress => write!(f, "Illegal data address"),
            IllegalDataValue => write!(f, "Illegal data value"),
            SlaveDeviceFailure => write!(f, "Slave device failure"),
            Acknowledge => write!(f, "Acknowledge"),
            SlaveDeviceBusy => write!(f, "Slave device busy"),
            MemoryParityError => write!(f, "Memory parity error"),
            GatewayPathUnavailable => write!(f, "Gateway path unavailable"),
            GatewayTargetDeviceFailedToRespond => {
                write!(f, "Gateway target device failed to respond")
            }
            Undefined(code) => write!(f, "Undefined exception code {code}"),
        }
    }
}

impl error::Error for Exception {}
