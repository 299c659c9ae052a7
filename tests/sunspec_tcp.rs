// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! SunSpec end-to-end scenarios over real TCP sockets.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use tokio::time::{sleep, timeout};

use tokio_sunspec::{
    cancel::Signal, Client, Config, Error, Handler, Index, ModelDef, Request, Result, Server,
};

const STARTUP: Duration = Duration::from_millis(150);
const GUARD: Duration = Duration::from_secs(10);

fn common_def() -> ModelDef {
    serde_json::from_str(include_str!("../demos/model_1.json")).unwrap()
}

struct Echo;

#[async_trait]
impl Handler for Echo {
    async fn handle(&self, _ctx: &Signal, _req: &mut Request<'_>) -> Result<()> {
        Ok(())
    }
}

async fn start<H>(endpoint: &str, base: u16, handler: H, defs: Vec<ModelDef>) -> (Arc<Server>, Signal)
where
    H: Handler + 'static,
{
    let server = Arc::new(Config::new(endpoint).base(base).server().unwrap());
    let ctx = Signal::new();
    {
        let ctx = ctx.clone();
        let server = Arc::clone(&server);
        tokio::spawn(async move { server.serve(&ctx, handler, &defs).await });
    }
    sleep(STARTUP).await;
    (server, ctx)
}

async fn connect(endpoint: &str) -> Client {
    let mut client = Config::new(endpoint).client().unwrap();
    client.connect().await.expect("client connection refused");
    client
}

#[tokio::test]
async fn marker_discovery_at_alternate_base() {
    let endpoint = "127.0.0.1:43502";
    let (server, ctx) = start(endpoint, 40000, Echo, vec![common_def()]).await;
    let mut client = connect(endpoint).await;

    // a scan without definitions retains the model as a raw header
    timeout(GUARD, client.scan(&ctx, &[])).await.unwrap().unwrap();
    let models = client.device().models();
    assert_eq!(models.len(), 1);
    assert_eq!(models[0].address(), 40002);
    assert_eq!(models[0].id(), Some(1));
    assert_eq!(models[0].length(), Some(66));

    // the served address map ends with the terminator right behind the model
    let device = server.device();
    let served = device.lock().await;
    let last = served.models().last().unwrap();
    assert_eq!(last.id(), Some(0xFFFF));
    assert_eq!(last.address(), 40002 + 66 + 2);
    drop(served);

    client.disconnect().await.unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn scan_without_marker_fails() {
    // a bare modbus server without any SunSpec address map
    let endpoint = "127.0.0.1:43508";
    let mb = tokio_sunspec::modbus::Config::new(endpoint).server().unwrap();
    let ctx = Signal::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            mb.serve(&ctx, Arc::new(tokio_sunspec::modbus::Mux::new())).await
        });
    }
    sleep(STARTUP).await;

    let mut client = connect(endpoint).await;
    let outcome = timeout(GUARD, client.scan(&ctx, &[])).await.unwrap();
    assert!(matches!(outcome, Err(Error::MarkerNotFound)));
    client.disconnect().await.unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn common_model_round_trip() {
    let endpoint = "127.0.0.1:43503";
    let (server, ctx) = start(endpoint, 0, Echo, vec![common_def()]).await;

    {
        let device = server.device();
        let mut device = device.lock().await;
        let model = device.model_mut(1).unwrap();
        let mn = model.lookup("Mn").unwrap();
        model.point_mut(mn).set_str("TRICERA energy").unwrap();
    }

    let mut client = connect(endpoint).await;
    timeout(GUARD, client.scan(&ctx, &[common_def()]))
        .await
        .unwrap()
        .unwrap();

    let model = client.device().model(1).expect("common model missing");
    let mn = model.lookup("Mn").unwrap();
    assert_eq!(model.point(mn).as_str().unwrap(), "TRICERA energy");

    // a fresh range read keeps the value intact
    let range = model.index();
    let (points, outcome) = timeout(GUARD, client.read(&ctx, &[range])).await.unwrap();
    outcome.unwrap();
    assert!(!points.is_empty());
    let model = client.device().model(1).unwrap();
    let mn = model.lookup("Mn").unwrap();
    assert_eq!(model.point(mn).as_str().unwrap(), "TRICERA energy");

    client.disconnect().await.unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn scale_factors_resolve_against_siblings() {
    let def: ModelDef = serde_json::from_value(serde_json::json!({
        "id": 101,
        "group": {
            "name": "inverter",
            "points": [
                { "name": "ID", "type": "uint16", "static": "S" },
                { "name": "L", "type": "uint16", "static": "S" },
                { "name": "A_SF", "type": "sunssf", "value": -2 },
                { "name": "A", "type": "int16", "sf": "A_SF", "value": 1234 }
            ]
        }
    }))
    .unwrap();
    let endpoint = "127.0.0.1:43504";
    let (_server, ctx) = start(endpoint, 0, Echo, vec![def.clone()]).await;

    let mut client = connect(endpoint).await;
    timeout(GUARD, client.scan(&ctx, &[def])).await.unwrap().unwrap();

    let model = client.device().model(101).unwrap();
    let a = model.lookup("A").unwrap();
    let value = model.value(a).unwrap();
    assert!((value - 12.34).abs() < 1e-9, "got {value}");

    client.disconnect().await.unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn atomic_groups_refuse_partial_access() {
    let def: ModelDef = serde_json::from_value(serde_json::json!({
        "id": 64000,
        "group": {
            "name": "control",
            "points": [
                { "name": "ID", "type": "uint16", "static": "S" },
                { "name": "L", "type": "uint16", "static": "S" }
            ],
            "groups": [{
                "name": "pair",
                "type": "sync",
                "points": [
                    { "name": "X", "type": "uint16" },
                    { "name": "Y", "type": "uint16" }
                ]
            }]
        }
    }))
    .unwrap();
    let endpoint = "127.0.0.1:43505";
    let (_server, ctx) = start(endpoint, 0, Echo, vec![def.clone()]).await;

    let mut client = connect(endpoint).await;
    timeout(GUARD, client.scan(&ctx, &[def])).await.unwrap().unwrap();

    // marker occupies 0..2, the model header 2..4, the pair 4..6
    let (points, outcome) = client.read(&ctx, &[Index::new(4, 1)]).await;
    assert!(points.is_empty());
    assert!(matches!(outcome, Err(Error::AtomicGroupPartialAccess)));

    // the whole group reads fine
    let (points, outcome) = timeout(GUARD, client.read(&ctx, &[Index::new(4, 2)]))
        .await
        .unwrap();
    outcome.unwrap();
    assert_eq!(points.len(), 2);

    client.disconnect().await.unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn write_skips_read_only_points() {
    let def: ModelDef = serde_json::from_value(serde_json::json!({
        "id": 64001,
        "group": {
            "name": "settings",
            "points": [
                { "name": "ID", "type": "uint16", "static": "S" },
                { "name": "L", "type": "uint16", "static": "S" },
                { "name": "RO", "type": "uint16", "value": 5 },
                { "name": "RW", "type": "uint16", "access": "RW", "value": 6 }
            ]
        }
    }))
    .unwrap();
    let endpoint = "127.0.0.1:43506";
    let (server, ctx) = start(endpoint, 0, Echo, vec![def.clone()]).await;

    let mut client = connect(endpoint).await;
    timeout(GUARD, client.scan(&ctx, &[def])).await.unwrap().unwrap();

    {
        let model = client.device_mut().model_mut(64001).unwrap();
        let ro = model.lookup("RO").unwrap();
        let rw = model.lookup("RW").unwrap();
        model.point_mut(ro).set_u16(50).unwrap();
        model.point_mut(rw).set_u16(60).unwrap();
    }

    // the range covers both points; only the writable one goes on the wire
    let range = client.device().model(64001).unwrap().index();
    let (written, outcome) = timeout(GUARD, client.write(&ctx, &[range])).await.unwrap();
    outcome.unwrap();
    let names: Vec<_> = written
        .iter()
        .map(|&at| client.device().point(at).name().to_owned())
        .collect();
    assert_eq!(names, ["RW"]);

    let device = server.device();
    let served = device.lock().await;
    let model = served.model(64001).unwrap();
    assert_eq!(model.point(model.lookup("RO").unwrap()).as_u16(), Some(5));
    assert_eq!(model.point(model.lookup("RW").unwrap()).as_u16(), Some(60));
    drop(served);

    // a pure read-only selection yields no write at all
    let ro_range = {
        let model = client.device().model(64001).unwrap();
        let ro = model.lookup("RO").unwrap();
        model.point(ro).index()
    };
    let (written, outcome) = client.write(&ctx, &[ro_range]).await;
    assert!(written.is_empty());
    assert!(matches!(outcome, Err(Error::NoWritablePoints)));

    client.disconnect().await.unwrap();
    ctx.cancel();
}

struct Slow(Arc<AtomicBool>);

#[async_trait]
impl Handler for Slow {
    async fn handle(&self, _ctx: &Signal, _req: &mut Request<'_>) -> Result<()> {
        if self.0.load(Ordering::SeqCst) {
            sleep(Duration::from_millis(500)).await;
        }
        Ok(())
    }
}

#[tokio::test]
async fn cancelled_reads_leave_the_connection_usable() {
    let armed = Arc::new(AtomicBool::new(false));
    let endpoint = "127.0.0.1:43507";
    let (_server, server_ctx) =
        start(endpoint, 0, Slow(Arc::clone(&armed)), vec![common_def()]).await;

    let mut client = connect(endpoint).await;
    let ctx = Signal::new();
    timeout(GUARD, client.scan(&ctx, &[common_def()]))
        .await
        .unwrap()
        .unwrap();
    let range = client.device().model(1).unwrap().index();

    // delay the response beyond the caller's timeout
    armed.store(true, Ordering::SeqCst);
    let slow = Signal::new().timeout(Duration::from_millis(50));
    let (points, outcome) = timeout(GUARD, client.read(&slow, &[range])).await.unwrap();
    assert!(points.is_empty());
    assert!(matches!(outcome, Err(Error::Cancelled)));

    // the same connection serves the next request
    armed.store(false, Ordering::SeqCst);
    let ctx = Signal::new();
    let (points, outcome) = timeout(GUARD, client.read(&ctx, &[range])).await.unwrap();
    outcome.unwrap();
    assert!(!points.is_empty());

    client.disconnect().await.unwrap();
    server_ctx.cancel();
}
