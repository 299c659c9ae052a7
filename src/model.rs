// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The SunSpec model engine.
//!
//! A [`ModelDef`] is an immutable JSON-defined schema; [`ModelDef::instance`]
//! walks it once and lays out a typed point tree in a contiguous register
//! range. Repetition counts may reference just-instantiated points, so the
//! walk is interleaved with a [`PointReader`] callback that lets the caller
//! fetch wire values for freshly laid-out points before any dependent
//! sibling is sized.

use async_trait::async_trait;
use futures_util::future::BoxFuture;
use serde::{Deserialize, Serialize};

use crate::{
    error::{Error, Result},
    group::{Group, GroupDef, GroupId, GroupKind},
    index::{Address, Index, Quantity},
    point::{Point, PointId, Repeat, Scale, Value},
    symbol::Symbols,
};

/// Reads wire values into freshly instantiated points.
///
/// Invoked by [`ModelDef::instance`] after the immediate points of each
/// group have been laid out and before any dynamic repetition count of a
/// following sibling is resolved.
#[async_trait]
pub trait PointReader: Send {
    /// Fills the given points of the model under construction.
    async fn fill(&mut self, model: &mut Model, points: &[PointId]) -> Result<()>;
}

/// A [`PointReader`] that leaves every point at its schema-defined initial
/// value. Used by the server side, where no wire values exist yet.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopReader;

#[async_trait]
impl PointReader for NopReader {
    async fn fill(&mut self, _model: &mut Model, _points: &[PointId]) -> Result<()> {
        Ok(())
    }
}

/// The definition of a SunSpec model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelDef {
    pub id: u16,
    pub group: GroupDef,
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
}

impl ModelDef {
    /// Returns the model identifier of the definition.
    #[must_use]
    pub const fn id(&self) -> u16 {
        self.id
    }

    /// Derives a new usable [`Model`] from the definition.
    ///
    /// The layout starts at `address` and advances a rolling cursor point by
    /// point. After each group's immediate points are placed, `reader` is
    /// asked to fill them, so that a `count` referencing one of them resolves
    /// against the actual device value. The mandatory `ID` and `L` header
    /// points are set from the definition id and the computed register span.
    pub async fn instance<R>(&self, address: Address, reader: &mut R) -> Result<Model>
    where
        R: PointReader + ?Sized,
    {
        let mut model = Model::empty();
        let mut cursor = u32::from(address);
        build(&mut model, &self.group, None, &mut cursor, reader).await?;

        let id = model
            .named_in(model.root(), "ID")
            .ok_or(Error::MissingPoints)?;
        let len = model
            .named_in(model.root(), "L")
            .ok_or(Error::MissingPoints)?;
        let quantity = model.quantity();
        model.point_mut(id).set_u16(self.id)?;
        model.point_mut(len).set_u16(quantity - 2)?;

        model.resolve_scales();
        Ok(model)
    }
}

fn build<'a, R>(
    model: &'a mut Model,
    def: &'a GroupDef,
    origin: Option<GroupId>,
    cursor: &'a mut u32,
    reader: &'a mut R,
) -> BoxFuture<'a, Result<GroupId>>
where
    R: PointReader + ?Sized,
{
    Box::pin(async move {
        let gid = GroupId(model.groups.len());
        model
            .groups
            .push(Group::new(&def.name, def.kind == GroupKind::Sync, origin));

        let mut fresh = Vec::new();
        for pdef in &def.points {
            for _ in 0..model.resolve_repeat(gid, pdef.count.as_ref()) {
                let address = u16::try_from(*cursor)
                    .map_err(|_| Error::InvalidParameter("model exceeds the address space"))?;
                let point = pdef.instance(address, gid);
                *cursor += u32::from(point.quantity());
                let pid = PointId(model.points.len());
                model.points.push(point);
                model.groups[gid.0].push_point(pid);
                fresh.push(pid);
            }
        }
        reader.fill(model, &fresh).await?;

        for gdef in &def.groups {
            for _ in 0..model.resolve_repeat(gid, gdef.count.as_ref()) {
                let child = build(model, gdef, Some(gid), cursor, reader).await?;
                model.groups[gid.0].push_group(child);
            }
        }
        Ok(gid)
    })
}

/// An instantiated SunSpec model: a group tree backed by flat arenas.
#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    root: GroupId,
    groups: Vec<Group>,
    points: Vec<Point>,
}

impl Model {
    fn empty() -> Self {
        Self {
            root: GroupId(0),
            groups: Vec::new(),
            points: Vec::new(),
        }
    }

    /// Returns a dummy model representing the magic identifier `SunS`.
    #[must_use]
    pub fn marker(address: Address) -> Self {
        let mut model = Self::empty();
        model.groups.push(Group::new("marker", false, None));
        model.points.push(Point::new(
            "SunS",
            address,
            true,
            false,
            GroupId(0),
            Value::String(b"SunS".to_vec()),
            Scale::None,
            Symbols::default(),
        ));
        model.groups[0].push_point(PointId(0));
        model
    }

    /// Returns a prototype identifying a model by the minimum requirements:
    /// its `ID` and `L` header points.
    #[must_use]
    pub fn header(address: Address, id: u16, l: u16) -> Self {
        let mut model = Self::empty();
        model.groups.push(Group::new("header", false, None));
        for (i, (name, value)) in [("ID", id), ("L", l)].into_iter().enumerate() {
            model.points.push(Point::new(
                name,
                address + i as Address,
                true,
                false,
                GroupId(0),
                Value::Uint16(value),
                Scale::None,
                Symbols::default(),
            ));
            model.groups[0].push_point(PointId(i));
        }
        model
    }

    /// Returns the model identifier as defined by the point `ID`.
    #[must_use]
    pub fn id(&self) -> Option<u16> {
        self.named_in(self.root, "ID")
            .and_then(|pid| self.point(pid).as_u16())
    }

    /// Returns the model length as defined by the point `L`.
    #[must_use]
    pub fn length(&self) -> Option<u16> {
        self.named_in(self.root, "L")
            .and_then(|pid| self.point(pid).as_u16())
    }

    /// Returns the root group of the model.
    #[must_use]
    pub const fn root(&self) -> GroupId {
        self.root
    }

    /// Returns the group behind an id.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this model.
    #[must_use]
    pub fn group(&self, id: GroupId) -> &Group {
        &self.groups[id.0]
    }

    /// Returns the point behind an id.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this model.
    #[must_use]
    pub fn point(&self, id: PointId) -> &Point {
        &self.points[id.0]
    }

    /// Returns the mutable point behind an id.
    ///
    /// # Panics
    ///
    /// Panics if the id does not belong to this model.
    #[must_use]
    pub fn point_mut(&mut self, id: PointId) -> &mut Point {
        &mut self.points[id.0]
    }

    /// Returns all groups of the model in tree (address) order.
    #[must_use]
    pub fn walk(&self) -> Vec<GroupId> {
        let mut order = Vec::with_capacity(self.groups.len());
        let mut stack = vec![self.root];
        while let Some(gid) = stack.pop() {
            order.push(gid);
            stack.extend(self.group(gid).groups().iter().rev());
        }
        order
    }

    /// Returns all points of the model in address order.
    #[must_use]
    pub fn all_points(&self) -> Vec<PointId> {
        self.walk()
            .into_iter()
            .flat_map(|gid| self.group(gid).points().iter().copied())
            .collect()
    }

    /// Returns the first immediate point of `group` identified by name.
    #[must_use]
    pub fn named_in(&self, group: GroupId, name: &str) -> Option<PointId> {
        self.group(group)
            .points()
            .iter()
            .copied()
            .find(|&pid| self.point(pid).name() == name)
    }

    /// Returns the first point in the model identified by name, searching
    /// in address order.
    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<PointId> {
        self.all_points()
            .into_iter()
            .find(|&pid| self.point(pid).name() == name)
    }

    /// Returns the starting address of the model.
    #[must_use]
    pub fn address(&self) -> Address {
        self.all_points()
            .first()
            .map_or(0, |&pid| self.point(pid).address())
    }

    /// Returns the total number of registers covered by the model.
    #[must_use]
    pub fn quantity(&self) -> Quantity {
        self.points.iter().map(Point::quantity).sum()
    }

    /// Returns the register range covered by the model.
    #[must_use]
    pub fn index(&self) -> Index {
        Index::new(self.address(), self.quantity())
    }

    /// Returns the register range covered by the immediate points of a group.
    pub(crate) fn group_points_index(&self, group: GroupId) -> Option<Index> {
        let points = self.group(group).points();
        let first = points.first()?;
        let quantity = points.iter().map(|&pid| self.point(pid).quantity()).sum();
        Some(Index::new(self.point(*first).address(), quantity))
    }

    /// Returns the scale exponent currently in effect for a point.
    #[must_use]
    pub fn factor(&self, id: PointId) -> i16 {
        match self.point(id).scale() {
            Scale::None | Scale::Named(_) => 0,
            Scale::Fixed(f) => *f,
            Scale::Resolved(sf) => self.point(*sf).as_sunssf().unwrap_or(0),
        }
    }

    /// Returns the scaled value `raw × 10^factor` of a numeric point.
    #[must_use]
    pub fn value(&self, id: PointId) -> Option<f64> {
        let raw = self.point(id).value().raw()?;
        Some(raw * 10_f64.powi(i32::from(self.factor(id))))
    }

    // Scale references bind to the nearest sunssf sibling, walking from the
    // point's own group upward. Resolution happens once; the tree is
    // immutable afterwards.
    fn resolve_scales(&mut self) {
        for idx in 0..self.points.len() {
            let Scale::Named(name) = self.points[idx].scale() else {
                continue;
            };
            let name = name.clone();
            let mut walk = Some(self.points[idx].origin());
            while let Some(gid) = walk {
                let hit = self.group(gid).points().iter().copied().find(|&pid| {
                    self.point(pid).name() == name
                        && matches!(self.point(pid).value(), Value::Sunssf(_))
                });
                if let Some(sf) = hit {
                    self.points[idx].set_scale(Scale::Resolved(sf));
                    break;
                }
                walk = self.group(gid).origin();
            }
        }
    }

    // Resolves the number of occurrences of a point or group. A named count
    // looks up an already instantiated point in the current group or any of
    // its parents; an unresolvable name counts as a single occurrence.
    fn resolve_repeat(&self, group: GroupId, repeat: Option<&Repeat>) -> u16 {
        match repeat {
            None => 1,
            Some(Repeat::Fixed(n)) => *n,
            Some(Repeat::Named(name)) => {
                let mut walk = Some(group);
                while let Some(gid) = walk {
                    for &pid in self.group(gid).points() {
                        if self.point(pid).name() == name {
                            if let Some(v) = self.point(pid).value().as_unsigned() {
                                return v as u16;
                            }
                        }
                    }
                    walk = self.group(gid).origin();
                }
                1
            }
        }
    }

    /// Puts the values of the given points into the buffer, packed in order.
    pub(crate) fn encode_points(&self, ids: &[PointId], buf: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        for &id in ids {
            let point = self.point(id);
            let len = usize::from(point.quantity()) * 2;
            let Some(chunk) = buf.get_mut(offset..offset + len) else {
                return Err(Error::InvalidParameter("buffer size mismatch"));
            };
            point.encode(chunk);
            offset += len;
        }
        Ok(())
    }

    /// Sets the values of the given points from the buffer, packed in order.
    pub(crate) fn decode_points(&mut self, ids: &[PointId], buf: &[u8]) -> Result<()> {
        let mut offset = 0;
        for &id in ids {
            let len = usize::from(self.point(id).quantity()) * 2;
            let Some(chunk) = buf.get(offset..offset + len) else {
                return Err(Error::InvalidParameter("buffer size mismatch"));
            };
            self.point_mut(id).decode(chunk)?;
            offset += len;
        }
        Ok(())
    }

    /// Validates the model against the SunSpec compliance rules: strict
    /// register contiguity, `[A-Za-z0-9_]+` identifiers, no point-less
    /// groups and a matching `L` header.
    pub fn verify(&self) -> Result<()> {
        let length = self.length().ok_or(Error::MissingPoints)?;
        if u32::from(length) + 2 != u32::from(self.quantity()) {
            return Err(Error::LengthMismatch);
        }
        let mut address = u32::from(self.address());
        for gid in self.walk() {
            let group = self.group(gid);
            if group.points().is_empty() {
                return Err(Error::MissingPoints);
            }
            if !valid_name(group.name()) {
                return Err(Error::InvalidName(group.name().to_owned()));
            }
            if u32::from(self.point(group.points()[0]).address()) != address {
                return Err(Error::AddressNotContinuous);
            }
            for &pid in group.points() {
                let point = self.point(pid);
                if u32::from(point.address()) != address {
                    return Err(Error::AddressNotContinuous);
                }
                if !valid_name(point.name()) {
                    return Err(Error::InvalidName(point.name().to_owned()));
                }
                address += u32::from(point.quantity());
            }
        }
        Ok(())
    }
}

// ref 4.2.1: an identifier consists of alphanumeric characters and the
// underscore only.
fn valid_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}
