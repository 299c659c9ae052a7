// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! _Modbus_ transport configuration.

use crate::error::{Error, Result};

use super::{Client, Server};

/// The message framing of a connection.
///
/// Only [`Mode::Tcp`] is implemented; the other modes are reserved and
/// rejected during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Mode {
    #[default]
    Tcp,
    Rtu,
    Ascii,
}

/// The underlying network layer of a connection.
///
/// Only [`Kind::Tcp`] is implemented; the other kinds are reserved and
/// rejected during validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Kind {
    #[default]
    Tcp,
    Udp,
    Serial,
}

/// Configuration of a _Modbus_ client or server.
#[derive(Debug, Clone)]
pub struct Config {
    /// The endpoint to connect to (client) or listen on (server), in
    /// `host:port` notation.
    pub endpoint: String,
    /// The message framing.
    pub mode: Mode,
    /// The network layer.
    pub kind: Kind,
}

impl Config {
    /// Creates a TCP/TCP configuration for the given endpoint.
    #[must_use]
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into(),
            mode: Mode::default(),
            kind: Kind::default(),
        }
    }

    /// Validates the configuration, checking for unsupported parameters.
    pub fn verify(&self) -> Result<()> {
        if self.mode != Mode::Tcp {
            return Err(Error::InvalidParameter("unsupported framing mode"));
        }
        if self.kind != Kind::Tcp {
            return Err(Error::InvalidParameter("unsupported network kind"));
        }
        Ok(())
    }

    /// Instantiates a new client (master) from the configuration.
    pub fn client(self) -> Result<Client> {
        self.verify()?;
        Ok(Client::new(self))
    }

    /// Instantiates a new server (slave) from the configuration.
    pub fn server(self) -> Result<Server> {
        self.verify()?;
        Ok(Server::new(self))
    }
}
