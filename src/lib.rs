// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A pure [Rust](https://www.rust-lang.org)
//! [SunSpec](https://sunspec.org) device abstraction over
//! [Modbus](https://en.wikipedia.org/wiki/Modbus) TCP based on
//! [tokio](https://tokio.rs).
//!
//! SunSpec models photovoltaic and energy devices as trees of typed,
//! scale-aware data points laid out in a _Modbus_ register map. This crate
//! lets a client (master) discover and exchange point values with such a
//! device, and lets a server (slave) expose one according to JSON-defined
//! model schemas.
//!
//! ## Features
//!
//! - async (non-blocking) client & server
//! - JSON model definitions with dynamic repeat counts
//! - typed point kernel with not-implemented sentinels and scale factors
//! - address-range planning against atomic groups and transaction limits
//! - concurrent in-flight requests multiplexed by transaction id
//! - Open Source (MIT/Apache-2.0)
//!
//! # Examples
//!
//! ## Client
//!
//! ```rust,no_run
//! use tokio_sunspec::{cancel::Signal, Config, ModelDef};
//!
//! #[tokio::main]
//! async fn main() -> tokio_sunspec::Result<()> {
//!     let defs: Vec<ModelDef> =
//!         vec![serde_json::from_str(include_str!("../demos/model_1.json")).unwrap()];
//!
//!     let mut client = Config::new("192.168.0.222:502").client()?;
//!     client.connect().await?;
//!
//!     let ctx = Signal::new().timeout(std::time::Duration::from_secs(10));
//!     client.scan(&ctx, &defs).await?;
//!
//!     let range = client.device().model(1).expect("common model missing").index();
//!     let (points, outcome) = client.read(&ctx, &[range]).await;
//!     outcome?;
//!     for at in points {
//!         let point = client.device().point(at);
//!         println!("{} = {:?}", point.name(), client.device().value(at));
//!     }
//!     client.disconnect().await
//! }
//! ```
//!
//! ## Server
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use tokio_sunspec::{cancel::Signal, Config, Handler, ModelDef, Request};
//!
//! struct Echo;
//!
//! #[async_trait]
//! impl Handler for Echo {
//!     async fn handle(&self, _ctx: &Signal, req: &mut Request<'_>) -> tokio_sunspec::Result<()> {
//!         // point values may be refreshed here before they are flushed
//!         // into the response
//!         Ok(())
//!     }
//! }
//!
//! #[tokio::main]
//! async fn main() -> tokio_sunspec::Result<()> {
//!     let defs: Vec<ModelDef> =
//!         vec![serde_json::from_str(include_str!("../demos/model_1.json")).unwrap()];
//!
//!     let server = Config::new("0.0.0.0:502").server()?;
//!     server.serve(&Signal::new(), Echo, &defs).await
//! }
//! ```

pub mod cancel;
pub mod modbus;

mod client;
mod config;
mod device;
mod error;
mod group;
mod index;
mod model;
mod point;
mod request;
mod server;
mod symbol;

pub mod prelude;

pub use self::{
    client::Client,
    config::Config,
    device::{Device, PointRef},
    error::{Error, Exception, Result},
    group::{Group, GroupDef, GroupId, GroupKind},
    index::{merge, Address, Index, Quantity},
    model::{Model, ModelDef, NopReader, PointReader},
    point::{
        Access, Mandatory, Point, PointDef, PointId, PointKind, Repeat, Scale, ScaleDef,
        Stability, Value,
    },
    request::Request,
    server::{Handler, Server},
    symbol::{Symbol, SymbolDef, Symbols},
};
