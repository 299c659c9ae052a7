// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A SunSpec compliant device and the address-range planner.
//!
//! [`Device::collect`] translates caller-supplied register ranges into the
//! concrete points they address, honoring atomic groups and rejecting
//! partially covered points. [`chunk`] then splits a selection into the
//! contiguous runs a single _Modbus_ transaction can carry.

use std::ops::Range;

use crate::{
    error::{Error, Result},
    index::{merge, Index, Quantity},
    model::Model,
    point::{Point, PointId},
};

/// A handle to a point within a [`Device`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PointRef {
    model: usize,
    point: PointId,
}

impl PointRef {
    /// Returns the position of the owning model in the device.
    #[must_use]
    pub const fn model(&self) -> usize {
        self.model
    }

    /// Returns the point id within the owning model.
    #[must_use]
    pub const fn point(&self) -> PointId {
        self.point
    }
}

/// An ordered list of models forming one SunSpec device.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Device {
    models: Vec<Model>,
}

impl Device {
    /// Creates an empty device.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, model: Model) {
        self.models.push(model);
    }

    /// Returns all models of the device in address order.
    #[must_use]
    pub fn models(&self) -> &[Model] {
        &self.models
    }

    /// Returns the first model identified by id.
    #[must_use]
    pub fn model(&self, id: u16) -> Option<&Model> {
        self.models.iter().find(|m| m.id() == Some(id))
    }

    /// Returns the first model identified by id for mutation.
    #[must_use]
    pub fn model_mut(&mut self, id: u16) -> Option<&mut Model> {
        self.models.iter_mut().find(|m| m.id() == Some(id))
    }

    /// Returns the point behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not belong to this device.
    #[must_use]
    pub fn point(&self, at: PointRef) -> &Point {
        self.models[at.model].point(at.point)
    }

    /// Returns the mutable point behind a handle.
    ///
    /// # Panics
    ///
    /// Panics if the handle does not belong to this device.
    #[must_use]
    pub fn point_mut(&mut self, at: PointRef) -> &mut Point {
        self.models[at.model].point_mut(at.point)
    }

    /// Returns the scaled value `raw × 10^factor` of a numeric point.
    #[must_use]
    pub fn value(&self, at: PointRef) -> Option<f64> {
        self.models[at.model].value(at.point)
    }

    /// Retrieves all distinct points in the given address ranges.
    ///
    /// Ranges are merged first, so invalid ranges may become valid once
    /// combined. Within each intersecting model the group tree is walked:
    /// a fully covered group contributes all of its immediate points, a
    /// partially covered atomic group fails, and otherwise every touched
    /// point must be fully contained.
    pub fn collect(&self, indexes: &[Index]) -> Result<Vec<PointRef>> {
        let mut selected = Vec::new();
        for idx in merge(indexes.to_vec()) {
            for (pos, model) in self.models.iter().enumerate() {
                if !idx.intersects(&model.index()) {
                    continue;
                }
                for gid in model.walk() {
                    let Some(points) = model.group_points_index(gid) else {
                        continue;
                    };
                    if !idx.intersects(&points) {
                        continue;
                    }
                    if idx.contains(&points) {
                        selected.extend(
                            model
                                .group(gid)
                                .points()
                                .iter()
                                .map(|&point| PointRef { model: pos, point }),
                        );
                        continue;
                    }
                    if model.group(gid).atomic() {
                        return Err(Error::AtomicGroupPartialAccess);
                    }
                    for &point in model.group(gid).points() {
                        let pidx = model.point(point).index();
                        if !idx.intersects(&pidx) {
                            continue;
                        }
                        if !idx.contains(&pidx) {
                            return Err(Error::PointNotFullyContained);
                        }
                        selected.push(PointRef { model: pos, point });
                    }
                }
            }
        }
        if selected.is_empty() {
            return Err(Error::NoPointsSelected);
        }
        Ok(selected)
    }

    /// Returns the contiguous register range covered by a selection run.
    ///
    /// Only meaningful for runs produced by [`chunk`].
    pub(crate) fn span(&self, run: &[PointRef]) -> Index {
        let address = self.point(run[0]).address();
        let quantity: Quantity = run.iter().map(|&at| self.point(at).quantity()).sum();
        Index::new(address, quantity)
    }

    /// Puts the values of the selected points into the buffer, packed in
    /// order.
    pub(crate) fn encode(&self, sel: &[PointRef], buf: &mut [u8]) -> Result<()> {
        let mut offset = 0;
        for &at in sel {
            let point = self.point(at);
            let len = usize::from(point.quantity()) * 2;
            let Some(chunk) = buf.get_mut(offset..offset + len) else {
                return Err(Error::InvalidParameter("buffer size mismatch"));
            };
            point.encode(chunk);
            offset += len;
        }
        Ok(())
    }

    /// Sets the values of the selected points from the buffer, packed in
    /// order.
    pub(crate) fn decode(&mut self, sel: &[PointRef], buf: &[u8]) -> Result<()> {
        let mut offset = 0;
        for &at in sel {
            let len = usize::from(self.point(at).quantity()) * 2;
            let Some(chunk) = buf.get(offset..offset + len) else {
                return Err(Error::InvalidParameter("buffer size mismatch"));
            };
            self.point_mut(at).decode(chunk)?;
            offset += len;
        }
        Ok(())
    }
}

/// Splits a selection into maximal contiguous runs.
///
/// Within each run every successive point starts exactly at the previous
/// point's ceiling and the total register span stays within `limit`
/// (125 registers for reads, 123 for writes).
pub(crate) fn chunk(device: &Device, sel: &[PointRef], limit: Quantity) -> Vec<Range<usize>> {
    let mut runs = Vec::new();
    let mut start = 0;
    while start < sel.len() {
        let base = u32::from(device.point(sel[start]).address());
        let mut ceiling = device.point(sel[start]).index().ceiling();
        let mut end = start + 1;
        while end < sel.len() {
            let index = device.point(sel[end]).index();
            if u32::from(index.address()) != ceiling || index.ceiling() - base > u32::from(limit) {
                break;
            }
            ceiling = index.ceiling();
            end += 1;
        }
        runs.push(start..end);
        start = end;
    }
    runs
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::NopReader;

    async fn device() -> Device {
        // two contiguous models: 0..7 and 7..12
        let first: crate::ModelDef = serde_json::from_value(serde_json::json!({
            "id": 1,
            "group": {
                "name": "first",
                "points": [
                    { "name": "ID", "type": "uint16" },
                    { "name": "L", "type": "uint16" },
                    { "name": "A", "type": "uint16" },
                    { "name": "B", "type": "uint32" },
                    { "name": "C", "type": "uint32" }
                ]
            }
        }))
        .unwrap();
        let second: crate::ModelDef = serde_json::from_value(serde_json::json!({
            "id": 2,
            "group": {
                "name": "second",
                "points": [
                    { "name": "ID", "type": "uint16" },
                    { "name": "L", "type": "uint16" }
                ],
                "groups": [{
                    "name": "sync",
                    "type": "sync",
                    "points": [
                        { "name": "X", "type": "uint16" },
                        { "name": "Y", "type": "uint16" },
                        { "name": "Z", "type": "uint16" }
                    ]
                }]
            }
        }))
        .unwrap();
        let mut device = Device::new();
        let first = first.instance(0, &mut NopReader).await.unwrap();
        let second = second.instance(7, &mut NopReader).await.unwrap();
        device.push(first);
        device.push(second);
        device
    }

    #[tokio::test]
    async fn collect_returns_only_contained_points() {
        let device = device().await;
        let sel = device.collect(&[Index::new(2, 5)]).unwrap();
        let names: Vec<_> = sel.iter().map(|&at| device.point(at).name().to_owned()).collect();
        assert_eq!(names, ["A", "B", "C"]);
        for &at in &sel {
            let idx = device.point(at).index();
            assert!(idx.address() >= 2 && idx.ceiling() <= 7);
        }
    }

    #[tokio::test]
    async fn collect_merges_adjacent_ranges() {
        let device = device().await;
        // individually partial over B, valid once merged
        let sel = device
            .collect(&[Index::new(2, 2), Index::new(3, 4)])
            .unwrap();
        let names: Vec<_> = sel.iter().map(|&at| device.point(at).name().to_owned()).collect();
        assert_eq!(names, ["A", "B", "C"]);
    }

    #[tokio::test]
    async fn collect_rejects_partial_points() {
        let device = device().await;
        // range splits the uint32 point B
        assert!(matches!(
            device.collect(&[Index::new(2, 2)]),
            Err(Error::PointNotFullyContained)
        ));
    }

    #[tokio::test]
    async fn collect_rejects_partial_atomic_groups() {
        let device = device().await;
        // covers X only, not Y and Z
        assert!(matches!(
            device.collect(&[Index::new(9, 1)]),
            Err(Error::AtomicGroupPartialAccess)
        ));
        // whole group is fine
        let sel = device.collect(&[Index::new(9, 3)]).unwrap();
        assert_eq!(sel.len(), 3);
    }

    #[tokio::test]
    async fn collect_skips_disjoint_atomic_groups() {
        let device = device().await;
        // header of the second model only; the sync group stays untouched
        let sel = device.collect(&[Index::new(7, 2)]).unwrap();
        assert_eq!(sel.len(), 2);
    }

    #[tokio::test]
    async fn collect_without_hits_fails() {
        let device = device().await;
        assert!(matches!(
            device.collect(&[Index::new(1000, 4)]),
            Err(Error::NoPointsSelected)
        ));
    }

    #[tokio::test]
    async fn chunk_splits_at_the_register_limit() {
        let def: crate::ModelDef = serde_json::from_value(serde_json::json!({
            "id": 3,
            "group": {
                "name": "wide",
                "points": [
                    { "name": "ID", "type": "uint16" },
                    { "name": "L", "type": "uint16" },
                    { "name": "V", "type": "uint16", "count": 126 }
                ]
            }
        }))
        .unwrap();
        let mut device = Device::new();
        device.push(def.instance(0, &mut NopReader).await.unwrap());
        // the 126 single-register points behind the header
        let sel = device.collect(&[Index::new(2, 126)]).unwrap();
        assert_eq!(sel.len(), 126);
        let runs = chunk(&device, &sel, 125);
        assert_eq!(runs, vec![0..125, 125..126]);
        assert_eq!(device.span(&sel[runs[0].clone()]).quantity(), 125);
    }

    #[tokio::test]
    async fn chunk_breaks_on_address_gaps() {
        let device = device().await;
        // A (addr 2) and the second model header (addr 7) leave a gap
        let sel = device
            .collect(&[Index::new(2, 1), Index::new(7, 2)])
            .unwrap();
        let runs = chunk(&device, &sel, 125);
        assert_eq!(runs.len(), 2);
    }
}
