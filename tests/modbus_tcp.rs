// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Transport-level end-to-end tests over real TCP sockets.

use std::{sync::Arc, time::Duration};

use tokio::time::{sleep, timeout};

use tokio_sunspec::{cancel::Signal, modbus, Error, Exception};

const STARTUP: Duration = Duration::from_millis(150);
const GUARD: Duration = Duration::from_secs(10);

// Starts a server for the given mux and returns a connected client
// together with the signal cancelling the server.
async fn start(port: u16, mux: modbus::Mux) -> (modbus::Client, Signal) {
    let endpoint = format!("127.0.0.1:{port}");
    let server = modbus::Config::new(&endpoint).server().unwrap();
    let ctx = Signal::new();
    {
        let ctx = ctx.clone();
        tokio::spawn(async move { server.serve(&ctx, Arc::new(mux)).await });
    }
    sleep(STARTUP).await;
    let mut client = modbus::Config::new(&endpoint).client().unwrap();
    client.connect().await.expect("client connection refused");
    (client, ctx)
}

#[tokio::test]
async fn read_holding_registers_round_trip() {
    let mux = modbus::Mux::new().read_holding_registers(|_ctx, address, quantity| async move {
        let mut values = Vec::with_capacity(usize::from(quantity) * 2);
        for i in 0..quantity {
            values.extend_from_slice(&(address + i).to_be_bytes());
        }
        Ok(values)
    });
    let (client, ctx) = start(42502, mux).await;

    let res = client.read_holding_registers(&ctx, 0x10, 3).await.unwrap();
    assert_eq!(res, vec![0x00, 0x10, 0x00, 0x11, 0x00, 0x12]);

    // bounds are checked before any request is sent
    assert!(matches!(
        client.read_holding_registers(&ctx, 0, 126).await,
        Err(Error::Exception(Exception::IllegalDataValue))
    ));
    assert!(matches!(
        client.read_holding_registers(&ctx, 0xFFFF, 2).await,
        Err(Error::Exception(Exception::IllegalDataAddress))
    ));
    ctx.cancel();
}

#[tokio::test]
async fn coils_round_trip() {
    let mux = modbus::Mux::new()
        .read_coils(|_ctx, _address, quantity| async move {
            Ok((0..quantity).map(|i| i % 2 == 0).collect())
        })
        .write_multiple_coils(|_ctx, address, status| async move {
            assert_eq!(address, 20);
            assert_eq!(status, vec![true, false, true]);
            Ok(())
        });
    let (client, ctx) = start(42503, mux).await;

    let res = client.read_coils(&ctx, 0, 5).await.unwrap();
    assert_eq!(res, vec![true, false, true, false, true]);

    client
        .write_multiple_coils(&ctx, 20, &[true, false, true])
        .await
        .unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn single_writes_echo() {
    let mux = modbus::Mux::new()
        .write_single_register(|_ctx, address, value| async move {
            assert_eq!((address, value), (7, 0xABCD));
            Ok(())
        })
        .write_single_coil(|_ctx, address, status| async move {
            assert_eq!((address, status), (3, true));
            Ok(())
        });
    let (client, ctx) = start(42504, mux).await;

    client.write_single_register(&ctx, 7, 0xABCD).await.unwrap();
    client.write_single_coil(&ctx, 3, true).await.unwrap();
    ctx.cancel();
}

#[tokio::test]
async fn write_then_read_multiple_registers() {
    let mux = modbus::Mux::new()
        .write_multiple_registers(|_ctx, address, values| async move {
            assert_eq!(address, 40);
            assert_eq!(values, vec![0x12, 0x34, 0x56, 0x78]);
            Ok(())
        })
        .read_write_multiple_registers(|_ctx, _radr, rqty, wadr, values| async move {
            assert_eq!(wadr, 60);
            assert_eq!(values, vec![0xAA, 0xBB]);
            Ok(vec![0x00; usize::from(rqty) * 2])
        });
    let (client, ctx) = start(42505, mux).await;

    client
        .write_multiple_registers(&ctx, 40, &[0x12, 0x34, 0x56, 0x78])
        .await
        .unwrap();

    let res = client
        .read_write_multiple_registers(&ctx, 50, 2, 60, &[0xAA, 0xBB])
        .await
        .unwrap();
    assert_eq!(res, vec![0x00; 4]);
    ctx.cancel();
}

#[tokio::test]
async fn exceptions_are_surfaced_as_typed_errors() {
    let mux = modbus::Mux::new()
        .read_coils(|_ctx, _address, _quantity| async move { Err(Exception::Acknowledge) })
        .read_holding_registers(|_ctx, _address, _quantity| async move {
            Err(Exception::SlaveDeviceBusy)
        });
    let (client, ctx) = start(42506, mux).await;

    assert!(matches!(
        client.read_coils(&ctx, 0, 1).await,
        Err(Error::Exception(Exception::Acknowledge))
    ));
    assert!(matches!(
        client.read_holding_registers(&ctx, 0, 1).await,
        Err(Error::Exception(Exception::SlaveDeviceBusy))
    ));
    // no callback registered
    assert!(matches!(
        client.read_input_registers(&ctx, 0, 1).await,
        Err(Error::Exception(Exception::IllegalFunction))
    ));
    ctx.cancel();
}

#[tokio::test]
async fn oversized_responses_become_device_failures() {
    let mux = modbus::Mux::new().fallback(|_ctx, _code, _req| async move { Ok(vec![0; 300]) });
    let (client, ctx) = start(42507, mux).await;

    assert!(matches!(
        client.request(&ctx, 0x2B, &[]).await,
        Err(Error::Exception(Exception::SlaveDeviceFailure))
    ));
    ctx.cancel();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_requests_are_correlated_by_transaction_id() {
    let mux = modbus::Mux::new().read_holding_registers(|_ctx, address, quantity| async move {
        // stagger responses so later requests overtake earlier ones
        sleep(Duration::from_millis(u64::from(100 - address))).await;
        let mut values = Vec::with_capacity(usize::from(quantity) * 2);
        for i in 0..quantity {
            values.extend_from_slice(&(address + i).to_be_bytes());
        }
        Ok(values)
    });
    let (client, ctx) = start(42508, mux).await;
    let client = Arc::new(client);

    let mut tasks = Vec::new();
    for address in 0..8_u16 {
        let client = Arc::clone(&client);
        let ctx = ctx.clone();
        tasks.push(tokio::spawn(async move {
            let res = client.read_holding_registers(&ctx, address, 1).await?;
            Ok::<_, Error>((address, res))
        }));
    }
    for task in tasks {
        let (address, res) = timeout(GUARD, task).await.unwrap().unwrap().unwrap();
        assert_eq!(res, address.to_be_bytes().to_vec(), "address {address}");
    }
    ctx.cancel();
}

#[tokio::test]
async fn cancellation_unblocks_a_pending_request() {
    let mux = modbus::Mux::new().read_holding_registers(|_ctx, address, quantity| async move {
        if address == 0 {
            sleep(Duration::from_millis(500)).await;
        }
        Ok(vec![0xAB; usize::from(quantity) * 2])
    });
    let (client, server_ctx) = start(42509, mux).await;

    let ctx = Signal::new().timeout(Duration::from_millis(50));
    let outcome = timeout(GUARD, client.read_holding_registers(&ctx, 0, 1)).await;
    assert!(matches!(outcome, Ok(Err(Error::Cancelled))));

    // the connection stays usable for subsequent requests
    let ctx = Signal::new();
    let res = timeout(GUARD, client.read_holding_registers(&ctx, 1, 1))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(res, vec![0xAB, 0xAB]);
    server_ctx.cancel();
}

#[tokio::test]
async fn server_shutdown_stops_accepting() {
    let mux = modbus::Mux::new()
        .read_holding_registers(|_ctx, _address, quantity| async move {
            Ok(vec![0; usize::from(quantity) * 2])
        });
    let endpoint = "127.0.0.1:42510";
    let server = modbus::Config::new(endpoint).server().unwrap();
    let ctx = Signal::new();
    let serve = {
        let ctx = ctx.clone();
        tokio::spawn(async move { server.serve(&ctx, Arc::new(mux)).await })
    };
    sleep(STARTUP).await;

    let mut client = modbus::Config::new(endpoint).client().unwrap();
    client.connect().await.unwrap();
    client
        .read_holding_registers(&Signal::new(), 0, 1)
        .await
        .unwrap();

    ctx.cancel();
    timeout(GUARD, serve).await.unwrap().unwrap().unwrap();

    // a fresh connection attempt must fail once the listener is closed
    sleep(Duration::from_millis(50)).await;
    let mut late = modbus::Config::new(endpoint).client().unwrap();
    assert!(late.connect().await.is_err());
}

#[tokio::test]
async fn lifecycle_errors() {
    let mux = modbus::Mux::new();
    let (mut client, ctx) = start(42511, mux).await;

    assert!(matches!(client.connect().await, Err(Error::AlreadyConnected)));
    client.disconnect().await.unwrap();
    // disconnecting twice is a no-op
    client.disconnect().await.unwrap();
    assert!(matches!(
        client.read_holding_registers(&ctx, 0, 1).await,
        Err(Error::NotConnected)
    ));
    ctx.cancel();
}
