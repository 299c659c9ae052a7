// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The typed point kernel.
//!
//! Every SunSpec data point is a [`Point`]: a named, addressed register slot
//! with a typed payload ([`Value`]), an optional scale factor and an optional
//! symbol table. Payloads encode to and decode from big-endian register
//! buffers (two bytes per register) and each type variant carries its own
//! "not implemented" sentinel.

use std::net::{Ipv4Addr, Ipv6Addr};

use byteorder::{BigEndian, ByteOrder};
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    group::GroupId,
    index::{Address, Index, Quantity},
    symbol::{SymbolDef, Symbols},
};

/// The typed payload of a point.
///
/// All variants share the register codec (`encode`/`decode`), a register
/// count and a validity check against the per-type sentinel. Variant-specific
/// behavior is reachable through the typed accessors or by matching on the
/// value directly.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Uint16(u16),
    Uint32(u32),
    Uint64(u64),
    Acc16(u16),
    Acc32(u32),
    Acc64(u64),
    Count(u16),
    Sunssf(i16),
    Bitfield16(u16),
    Bitfield32(u32),
    Bitfield64(u64),
    Enum16(u16),
    Enum32(u32),
    /// Fixed-capacity string; the buffer length is always `2 × size`.
    String(Vec<u8>),
    Float32(f32),
    Float64(f64),
    Ipaddr([u8; 4]),
    Ipv6addr([u8; 16]),
    Eui48([u8; 8]),
    Pad,
}

impl Value {
    /// Returns the number of registers required to store the value.
    #[must_use]
    pub fn quantity(&self) -> Quantity {
        use Value::*;

        match self {
            Int16(_) | Uint16(_) | Acc16(_) | Count(_) | Sunssf(_) | Bitfield16(_)
            | Enum16(_) | Pad => 1,
            Int32(_) | Uint32(_) | Acc32(_) | Bitfield32(_) | Enum32(_) | Float32(_)
            | Ipaddr(_) => 2,
            Int64(_) | Uint64(_) | Acc64(_) | Bitfield64(_) | Float64(_) | Eui48(_) => 4,
            Ipv6addr(_) => 8,
            String(bytes) => (bytes.len() / 2) as Quantity,
        }
    }

    /// Specifies whether the underlying value is implemented by the device.
    #[must_use]
    pub fn valid(&self) -> bool {
        use Value::*;

        match self {
            Int16(v) => *v != i16::MIN,
            Int32(v) => *v != i32::MIN,
            Int64(v) => *v != i64::MIN,
            Uint16(v) => *v != u16::MAX,
            Uint32(v) => *v != u32::MAX,
            Uint64(v) => *v != u64::MAX,
            Acc16(v) => *v != 0,
            Acc32(v) => *v != 0,
            Acc64(v) => *v != 0,
            Count(v) => *v != 0,
            Sunssf(v) => *v != i16::MIN,
            Bitfield16(v) => *v != u16::MAX,
            Bitfield32(v) => *v != u32::MAX,
            Bitfield64(v) => *v != u64::MAX,
            Enum16(v) => *v != u16::MAX,
            Enum32(v) => *v != u32::MAX,
            String(bytes) => bytes.iter().any(|b| *b != 0),
            Float32(v) => !v.is_nan(),
            Float64(v) => !v.is_nan(),
            Ipaddr(v) => *v != [0; 4],
            Ipv6addr(v) => *v != [0; 16],
            Eui48(_) => true,
            Pad => false,
        }
    }

    /// Puts the value into a register buffer.
    ///
    /// The buffer must hold at least `2 × quantity` bytes.
    pub(crate) fn encode(&self, buf: &mut [u8]) {
        use Value::*;

        match self {
            Int16(v) => BigEndian::write_i16(buf, *v),
            Int32(v) => BigEndian::write_i32(buf, *v),
            Int64(v) => BigEndian::write_i64(buf, *v),
            Uint16(v) | Acc16(v) | Count(v) | Bitfield16(v) | Enum16(v) => {
                BigEndian::write_u16(buf, *v);
            }
            Uint32(v) | Acc32(v) | Bitfield32(v) | Enum32(v) => BigEndian::write_u32(buf, *v),
            Uint64(v) | Acc64(v) | Bitfield64(v) => BigEndian::write_u64(buf, *v),
            Sunssf(v) => BigEndian::write_i16(buf, *v),
            String(bytes) => buf[..bytes.len()].copy_from_slice(bytes),
            Float32(v) => BigEndian::write_f32(buf, *v),
            Float64(v) => BigEndian::write_f64(buf, *v),
            Ipaddr(v) => buf[..4].copy_from_slice(v),
            Ipv6addr(v) => buf[..16].copy_from_slice(v),
            Eui48(v) => buf[..8].copy_from_slice(v),
            Pad => BigEndian::write_u16(buf, 0x8000),
        }
    }

    /// Sets the value from a register buffer.
    ///
    /// The buffer must hold at least `2 × quantity` bytes. Fails for a
    /// `sunssf` wire value outside `[-10, 10]` that is not the
    /// not-implemented sentinel.
    pub(crate) fn decode(&mut self, buf: &[u8]) -> Result<()> {
        use Value::*;

        match self {
            Int16(v) => *v = BigEndian::read_i16(buf),
            Int32(v) => *v = BigEndian::read_i32(buf),
            Int64(v) => *v = BigEndian::read_i64(buf),
            Uint16(v) | Acc16(v) | Count(v) | Bitfield16(v) | Enum16(v) => {
                *v = BigEndian::read_u16(buf);
            }
            Uint32(v) | Acc32(v) | Bitfield32(v) | Enum32(v) => *v = BigEndian::read_u32(buf),
            Uint64(v) | Acc64(v) | Bitfield64(v) => *v = BigEndian::read_u64(buf),
            Sunssf(v) => {
                let raw = BigEndian::read_i16(buf);
                if raw != i16::MIN && !(-10..=10).contains(&raw) {
                    return Err(Error::InvalidParameter("sunssf factor out of range"));
                }
                *v = raw;
            }
            String(bytes) => {
                let len = bytes.len();
                bytes.copy_from_slice(&buf[..len]);
            }
            Float32(v) => *v = BigEndian::read_f32(buf),
            Float64(v) => *v = BigEndian::read_f64(buf),
            Ipaddr(v) => v.copy_from_slice(&buf[..4]),
            Ipv6addr(v) => v.copy_from_slice(&buf[..16]),
            Eui48(v) => v.copy_from_slice(&buf[..8]),
            Pad => {}
        }
        Ok(())
    }

    /// Coerces any integer-family payload to `u64`.
    ///
    /// Used to resolve dynamic repetition counts against an already
    /// instantiated point.
    #[must_use]
    pub fn as_unsigned(&self) -> Option<u64> {
        use Value::*;

        match self {
            Int16(v) => Some(*v as u64),
            Int32(v) => Some(*v as u64),
            Int64(v) => Some(*v as u64),
            Uint16(v) | Acc16(v) | Count(v) => Some(u64::from(*v)),
            Uint32(v) | Acc32(v) => Some(u64::from(*v)),
            Uint64(v) | Acc64(v) => Some(*v),
            _ => None,
        }
    }

    /// Returns the raw numeric value of a scalable payload.
    ///
    /// Only the integer and accumulator families are scalable.
    #[must_use]
    pub fn raw(&self) -> Option<f64> {
        use Value::*;

        match self {
            Int16(v) => Some(f64::from(*v)),
            Int32(v) => Some(f64::from(*v)),
            Int64(v) => Some(*v as f64),
            Uint16(v) | Acc16(v) => Some(f64::from(*v)),
            Uint32(v) | Acc32(v) => Some(f64::from(*v)),
            Uint64(v) | Acc64(v) => Some(*v as f64),
            _ => None,
        }
    }
}

/// The scale factor attribute of a point.
///
/// A string reference is resolved lazily against the nearest `sunssf`
/// sibling (walking the group tree upward) and cached as [`Scale::Resolved`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Scale {
    /// The point is unscaled; the factor is 0.
    #[default]
    None,
    /// A literal exponent.
    Fixed(i16),
    /// An unresolved reference to a sibling `sunssf` point.
    Named(String),
    /// A resolved and cached reference to a `sunssf` point.
    Resolved(PointId),
}

impl Scale {
    /// Specifies whether the point carries a scale factor.
    #[must_use]
    pub fn scaled(&self) -> bool {
        !matches!(self, Scale::None)
    }
}

/// Stable arena index of a point within its [`Model`](crate::model::Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PointId(pub(crate) usize);

/// A typed, addressable field in a model.
#[derive(Debug, Clone, PartialEq)]
pub struct Point {
    name: String,
    address: Address,
    fixed: bool,
    writable: bool,
    origin: GroupId,
    value: Value,
    scale: Scale,
    symbols: Symbols,
}

impl Point {
    pub(crate) fn new(
        name: impl Into<String>,
        address: Address,
        fixed: bool,
        writable: bool,
        origin: GroupId,
        value: Value,
        scale: Scale,
        symbols: Symbols,
    ) -> Self {
        Self {
            name: name.into(),
            address,
            fixed,
            writable,
            origin,
            value,
            scale,
            symbols,
        }
    }

    /// Returns the point's identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the _Modbus_ starting address of the point.
    #[must_use]
    pub const fn address(&self) -> Address {
        self.address
    }

    /// Returns the number of registers required to store the value.
    #[must_use]
    pub fn quantity(&self) -> Quantity {
        self.value.quantity()
    }

    /// Returns the register range covered by the point.
    #[must_use]
    pub fn index(&self) -> Index {
        Index::new(self.address, self.quantity())
    }

    /// Specifies whether the underlying value is implemented by the device.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.value.valid()
    }

    /// Specifies whether the value is expected to stay constant over time.
    #[must_use]
    pub const fn is_static(&self) -> bool {
        self.fixed
    }

    /// Specifies whether the point can be written to.
    #[must_use]
    pub const fn writable(&self) -> bool {
        self.writable
    }

    /// Returns the group containing this point.
    #[must_use]
    pub const fn origin(&self) -> GroupId {
        self.origin
    }

    /// Returns the typed payload.
    #[must_use]
    pub const fn value(&self) -> &Value {
        &self.value
    }

    /// Returns the scale attribute.
    #[must_use]
    pub const fn scale(&self) -> &Scale {
        &self.scale
    }

    pub(crate) fn set_scale(&mut self, scale: Scale) {
        self.scale = scale;
    }

    /// Returns the symbol table of an enumerated or bitfield point.
    #[must_use]
    pub const fn symbols(&self) -> &Symbols {
        &self.symbols
    }

    pub(crate) fn encode(&self, buf: &mut [u8]) {
        self.value.encode(buf);
    }

    pub(crate) fn decode(&mut self, buf: &[u8]) -> Result<()> {
        self.value.decode(buf)
    }

    /// Returns the value of an `int16` point.
    #[must_use]
    pub fn as_i16(&self) -> Option<i16> {
        match self.value {
            Value::Int16(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value of a `uint16`, `acc16` or `count` point.
    #[must_use]
    pub fn as_u16(&self) -> Option<u16> {
        match self.value {
            Value::Uint16(v) | Value::Acc16(v) | Value::Count(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the value of a `uint32` or `acc32` point.
    #[must_use]
    pub fn as_u32(&self) -> Option<u32> {
        match self.value {
            Value::Uint32(v) | Value::Acc32(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the exponent of a `sunssf` point.
    #[must_use]
    pub fn as_sunssf(&self) -> Option<i16> {
        match self.value {
            Value::Sunssf(v) => Some(v),
            _ => None,
        }
    }

    /// Returns the trimmed text of a `string` point.
    ///
    /// Trailing NUL fill bytes are stripped; non-UTF-8 bytes are replaced.
    #[must_use]
    pub fn as_str(&self) -> Option<String> {
        match &self.value {
            Value::String(bytes) => {
                let end = bytes.iter().rposition(|b| *b != 0).map_or(0, |i| i + 1);
                Some(String::from_utf8_lossy(&bytes[..end]).into_owned())
            }
            _ => None,
        }
    }

    /// Returns the address of an `ipaddr` point.
    #[must_use]
    pub fn as_ipv4(&self) -> Option<Ipv4Addr> {
        match self.value {
            Value::Ipaddr(v) => Some(Ipv4Addr::from(v)),
            _ => None,
        }
    }

    /// Returns the address of an `ipv6addr` point.
    #[must_use]
    pub fn as_ipv6(&self) -> Option<Ipv6Addr> {
        match self.value {
            Value::Ipv6addr(v) => Some(Ipv6Addr::from(v)),
            _ => None,
        }
    }

    /// Returns the raw 8-byte view of an `eui48` point.
    ///
    /// The first two bytes are padding, the remaining six the hardware
    /// address.
    #[must_use]
    pub fn as_eui48(&self) -> Option<[u8; 8]> {
        match self.value {
            Value::Eui48(v) => Some(v),
            _ => None,
        }
    }

    /// Sets the value of an `int16` point.
    pub fn set_i16(&mut self, v: i16) -> Result<()> {
        match &mut self.value {
            Value::Int16(data) => {
                *data = v;
                Ok(())
            }
            _ => Err(Error::InvalidParameter("point type mismatch")),
        }
    }

    /// Sets the value of a `uint16`, `acc16`, `count`, `bitfield16` or
    /// `enum16` point.
    pub fn set_u16(&mut self, v: u16) -> Result<()> {
        match &mut self.value {
            Value::Uint16(data)
            | Value::Acc16(data)
            | Value::Count(data)
            | Value::Bitfield16(data)
            | Value::Enum16(data) => {
                *data = v;
                Ok(())
            }
            _ => Err(Error::InvalidParameter("point type mismatch")),
        }
    }

    /// Sets the exponent of a `sunssf` point.
    ///
    /// Values outside `[-10, 10]` are rejected.
    pub fn set_sunssf(&mut self, v: i16) -> Result<()> {
        match &mut self.value {
            Value::Sunssf(data) => {
                if !(-10..=10).contains(&v) {
                    return Err(Error::InvalidParameter("sunssf factor out of range"));
                }
                *data = v;
                Ok(())
            }
            _ => Err(Error::InvalidParameter("point type mismatch")),
        }
    }

    /// Sets the text of a `string` point.
    ///
    /// The buffer is zero-filled first; input beyond the fixed capacity is
    /// silently truncated.
    pub fn set_str(&mut self, v: &str) -> Result<()> {
        match &mut self.value {
            Value::String(bytes) => {
                let len = v.len().min(bytes.len());
                bytes.fill(0);
                bytes[..len].copy_from_slice(&v.as_bytes()[..len]);
                Ok(())
            }
            _ => Err(Error::InvalidParameter("point type mismatch")),
        }
    }

    /// Replaces the typed payload with a matching variant.
    pub fn set_value(&mut self, value: Value) -> Result<()> {
        if std::mem::discriminant(&value) != std::mem::discriminant(&self.value)
            || value.quantity() != self.value.quantity()
        {
            return Err(Error::InvalidParameter("point type mismatch"));
        }
        self.value = value;
        Ok(())
    }

    /// Sets the bit at position `pos` of a bitfield point to `v`.
    pub fn flip(&mut self, pos: u32, v: bool) -> Result<()> {
        match &mut self.value {
            Value::Bitfield16(data) if pos < 16 => {
                if v {
                    *data |= 1 << pos;
                } else {
                    *data &= !(1 << pos);
                }
                Ok(())
            }
            Value::Bitfield32(data) if pos < 32 => {
                if v {
                    *data |= 1 << pos;
                } else {
                    *data &= !(1 << pos);
                }
                Ok(())
            }
            Value::Bitfield64(data) if pos < 64 => {
                if v {
                    *data |= 1 << pos;
                } else {
                    *data &= !(1 << pos);
                }
                Ok(())
            }
            Value::Bitfield16(_) | Value::Bitfield32(_) | Value::Bitfield64(_) => {
                Err(Error::InvalidParameter("bit position out of bounds"))
            }
            _ => Err(Error::InvalidParameter("point type mismatch")),
        }
    }

    /// Returns the individual bit values of a bitfield point.
    #[must_use]
    pub fn field(&self) -> Option<Vec<bool>> {
        let (bits, width) = match self.value {
            Value::Bitfield16(v) => (u64::from(v), 16),
            Value::Bitfield32(v) => (u64::from(v), 32),
            Value::Bitfield64(v) => (v, 64),
            _ => return None,
        };
        Some((0..width).map(|b| bits & (1 << b) != 0).collect())
    }

    /// Returns all active enumerated states of a bitfield point,
    /// correlating each set bit position to its symbol.
    #[must_use]
    pub fn states(&self) -> Vec<&str> {
        if !self.valid() {
            return Vec::new();
        }
        let Some(field) = self.field() else {
            return Vec::new();
        };
        field
            .iter()
            .enumerate()
            .filter(|(_, set)| **set)
            .filter_map(|(pos, _)| self.symbols.get(pos as u32).map(|s| s.name()))
            .collect()
    }

    /// Returns the currently active enumerated state of an enum point.
    #[must_use]
    pub fn state(&self) -> Option<&str> {
        let value = match self.value {
            Value::Enum16(v) => u32::from(v),
            Value::Enum32(v) => v,
            _ => return None,
        };
        self.symbols.get(value).map(|s| s.name())
    }
}

/// The type tag of a point definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PointKind {
    Int16,
    Int32,
    Int64,
    Uint16,
    Uint32,
    Uint64,
    Acc16,
    Acc32,
    Acc64,
    Count,
    Sunssf,
    Bitfield16,
    Bitfield32,
    Bitfield64,
    Enum16,
    Enum32,
    String,
    Float32,
    Float64,
    Ipaddr,
    Ipv6addr,
    Eui48,
    Pad,
}

/// The access attribute of a point definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Access {
    #[default]
    #[serde(rename = "R")]
    ReadOnly,
    #[serde(rename = "RW")]
    ReadWrite,
}

/// The mandatory attribute of a point definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Mandatory {
    #[default]
    #[serde(rename = "O")]
    Optional,
    #[serde(rename = "M")]
    Mandatory,
}

/// The static attribute of a point definition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Stability {
    #[default]
    #[serde(rename = "D")]
    Dynamic,
    #[serde(rename = "S")]
    Static,
}

/// A repetition count: either a literal or a reference to an earlier
/// sibling point whose current value provides the count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Repeat {
    Fixed(u16),
    Named(String),
}

impl Default for Repeat {
    fn default() -> Self {
        Self::Fixed(1)
    }
}

/// A scale factor definition: a literal exponent or a reference to a
/// sibling `sunssf` point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScaleDef {
    Fixed(i16),
    Named(String),
}

/// The definition of a point element in a model schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointDef {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: PointKind,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub value: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<Repeat>,
    #[serde(default)]
    pub size: u16,
    #[serde(default, rename = "sf", skip_serializing_if = "Option::is_none")]
    pub scale: Option<ScaleDef>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub units: Option<String>,
    #[serde(default, rename = "access")]
    pub access: Access,
    #[serde(default)]
    pub mandatory: Mandatory,
    #[serde(default, rename = "static")]
    pub stability: Stability,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, rename = "desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub comments: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub symbols: Vec<SymbolDef>,
}

impl PointDef {
    /// Derives a new point from the definition at the given address.
    pub(crate) fn instance(&self, address: Address, origin: GroupId) -> Point {
        let scale = match &self.scale {
            None => Scale::None,
            Some(ScaleDef::Fixed(f)) => Scale::Fixed(*f),
            Some(ScaleDef::Named(name)) => Scale::Named(name.clone()),
        };
        let value = self.initial_value();
        Point::new(
            self.name.clone(),
            address,
            self.stability == Stability::Static,
            self.access == Access::ReadWrite,
            origin,
            value,
            scale,
            Symbols::from(self.symbols.as_slice()),
        )
    }

    fn initial_value(&self) -> Value {
        use PointKind::*;

        let v = &self.value;
        match self.kind {
            Int16 => Value::Int16(to_i64(v) as i16),
            Int32 => Value::Int32(to_i64(v) as i32),
            Int64 => Value::Int64(to_i64(v)),
            Uint16 => Value::Uint16(to_u64(v) as u16),
            Uint32 => Value::Uint32(to_u64(v) as u32),
            Uint64 => Value::Uint64(to_u64(v)),
            Acc16 => Value::Acc16(to_u64(v) as u16),
            Acc32 => Value::Acc32(to_u64(v) as u32),
            Acc64 => Value::Acc64(to_u64(v)),
            Count => Value::Count(to_u64(v) as u16),
            Sunssf => Value::Sunssf(to_i64(v) as i16),
            Bitfield16 => Value::Bitfield16(to_u64(v) as u16),
            Bitfield32 => Value::Bitfield32(to_u64(v) as u32),
            Bitfield64 => Value::Bitfield64(to_u64(v)),
            Enum16 => Value::Enum16(to_u64(v) as u16),
            Enum32 => Value::Enum32(to_u64(v) as u32),
            String => {
                let mut bytes = vec![0_u8; usize::from(self.size) * 2];
                if let Some(text) = v.as_str() {
                    let len = text.len().min(bytes.len());
                    bytes[..len].copy_from_slice(&text.as_bytes()[..len]);
                }
                Value::String(bytes)
            }
            Float32 => Value::Float32(to_f64(v) as f32),
            Float64 => Value::Float64(to_f64(v)),
            Ipaddr => Value::Ipaddr([0; 4]),
            Ipv6addr => Value::Ipv6addr([0; 16]),
            Eui48 => Value::Eui48([0; 8]),
            Pad => Value::Pad,
        }
    }
}

// Initial values in schemas are free-form JSON; incompatible shapes fall
// back to zero.
fn to_i64(v: &serde_json::Value) -> i64 {
    v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)).unwrap_or(0)
}

fn to_u64(v: &serde_json::Value) -> u64 {
    v.as_u64().or_else(|| v.as_f64().map(|f| f as u64)).unwrap_or(0)
}

fn to_f64(v: &serde_json::Value) -> f64 {
    v.as_f64().unwrap_or(0.0)
}
