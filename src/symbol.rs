// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Named constants of enumerated and bitfield points.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// A named constant within the enumeration of a point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Symbol {
    name: String,
    value: u32,
}

impl Symbol {
    /// Returns the symbol's identifier.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the symbol's numeric value.
    #[must_use]
    pub const fn value(&self) -> u32 {
        self.value
    }
}

/// The definition of a symbol element in a model schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolDef {
    pub name: String,
    pub value: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default, rename = "desc", skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

/// A value-keyed collection of symbols.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Symbols(HashMap<u32, Symbol>);

impl Symbols {
    /// Returns the symbol carrying the given value.
    #[must_use]
    pub fn get(&self, value: u32) -> Option<&Symbol> {
        self.0.get(&value)
    }

    /// Returns the first symbol identified by name.
    #[must_use]
    pub fn symbol(&self, name: &str) -> Option<&Symbol> {
        self.0.values().find(|s| s.name() == name)
    }

    /// Returns `true` if the collection holds no symbols.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&[SymbolDef]> for Symbols {
    fn from(defs: &[SymbolDef]) -> Self {
        Self(
            defs.iter()
                .map(|def| {
                    (
                        def.value,
                        Symbol {
                            name: def.name.clone(),
                            value: def.value,
                        },
                    )
                })
                .collect(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn defs() -> Vec<SymbolDef> {
        serde_json::from_value(serde_json::json!([
            { "name": "OFF", "value": 1 },
            { "name": "SLEEPING", "value": 2, "label": "Sleeping" },
            { "name": "MPPT", "value": 4 }
        ]))
        .unwrap()
    }

    #[test]
    fn lookup_by_value_and_name() {
        let symbols = Symbols::from(defs().as_slice());
        assert_eq!(symbols.get(2).unwrap().name(), "SLEEPING");
        assert_eq!(symbols.symbol("MPPT").unwrap().value(), 4);
        assert!(symbols.get(3).is_none());
        assert!(symbols.symbol("UNKNOWN").is_none());
    }
}
