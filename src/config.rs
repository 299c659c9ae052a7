// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SunSpec endpoint configuration.

use crate::{client::Client, error::Result, index::Address, modbus, server::Server};

/// Configuration of a SunSpec [`Client`] or [`Server`].
///
/// Communication runs over _Modbus_ TCP; the reserved framing modes of the
/// transport layer are not reachable from here.
#[derive(Debug, Clone)]
pub struct Config {
    /// The SunSpec host in `host:port` notation: the endpoint to connect
    /// to (client) or to listen on (server).
    pub endpoint: String,
    /// The base address a server lays its `SunS` marker at. Clients probe
    /// the well-known candidates `0`, `40000` and `50000` instead.
    pub base: Address,
}

impl Config {
    /// Creates a configuration for the given endpoint with the marker base
    /// at address 0.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            base: 0,
        }
    }

    /// Places the server's `SunS` marker at the given base address.
    #[must_use]
    pub const fn base(mut self, base: Address) -> Self {
        self.base = base;
        self
    }

    /// Instantiates a new SunSpec client from the configuration.
    pub fn client(self) -> Result<Client> {
        let mb = modbus::Config::new(self.endpoint).client()?;
        Ok(Client::new(mb))
    }

    /// Instantiates a new SunSpec server from the configuration.
    pub fn server(self) -> Result<Server> {
        let mb = modbus::Config::new(self.endpoint.clone()).server()?;
        Ok(Server::new(mb, self.base))
    }
}
