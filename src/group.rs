// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Containers for points.
//!
//! Groups and points form a tree with back-references: each point knows the
//! group it lives in and each group knows its parent. The tree is stored in
//! flat arenas owned by the [`Model`](crate::model::Model); [`GroupId`] and
//! [`PointId`](crate::point::PointId) are stable indices into those arenas,
//! so back-edges never own anything.

use serde::{Deserialize, Serialize};

use crate::point::{PointDef, PointId, Repeat};

/// Stable arena index of a group within its [`Model`](crate::model::Model).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct GroupId(pub(crate) usize);

/// A container for points.
#[derive(Debug, Clone, PartialEq)]
pub struct Group {
    name: String,
    atomic: bool,
    origin: Option<GroupId>,
    points: Vec<PointId>,
    groups: Vec<GroupId>,
}

impl Group {
    pub(crate) fn new(name: impl Into<String>, atomic: bool, origin: Option<GroupId>) -> Self {
        Self {
            name: name.into(),
            atomic,
            origin,
            points: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Returns the group's identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Specifies whether all immediate points of the group must be read or
    /// written in one transaction.
    #[must_use]
    pub const fn atomic(&self) -> bool {
        self.atomic
    }

    /// Returns the group's parent container, or `None` for the model root.
    #[must_use]
    pub const fn origin(&self) -> Option<GroupId> {
        self.origin
    }

    /// Returns the immediate points of the group in address order.
    #[must_use]
    pub fn points(&self) -> &[PointId] {
        &self.points
    }

    /// Returns the immediate sub-groups of the group in address order.
    #[must_use]
    pub fn groups(&self) -> &[GroupId] {
        &self.groups
    }

    pub(crate) fn push_point(&mut self, id: PointId) {
        self.points.push(id);
    }

    pub(crate) fn push_group(&mut self, id: GroupId) {
        self.groups.push(id);
    }
}

/// The type attribute of a group definition; `sync` marks an atomic group.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    #[default]
    Group,
    Sync,
}

/// The definition of a group element in a model schema.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupDef {
    pub name: String,
    #[serde(default, rename = "type")]
    pub kind: GroupKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<Repeat>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub points: Vec<PointDef>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupDef>,
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_encodes_as_group_or_sync() {
        let def: GroupDef = serde_json::from_value(serde_json::json!({
            "name": "repeating",
            "type": "sync",
            "points": [{ "name": "A", "type": "int16" }]
        }))
        .unwrap();
        assert_eq!(def.kind, GroupKind::Sync);
        let json = serde_json::to_value(&def).unwrap();
        assert_eq!(json["type"], "sync");

        let def: GroupDef = serde_json::from_value(serde_json::json!({ "name": "model" })).unwrap();
        assert_eq!(def.kind, GroupKind::Group);
    }
}
