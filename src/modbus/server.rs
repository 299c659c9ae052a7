// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! _Modbus_ server (slave).

use std::sync::Arc;

use bytes::Bytes;
use log::{debug, error, trace};
use tokio::net::{TcpListener, TcpStream};
use tokio_util::task::TaskTracker;

use crate::{
    cancel::Signal,
    error::{Exception, Result},
};

use super::{
    config::Config,
    connection::Connection,
    frame::{Framer, MAX_DATA_LEN},
    handler::Handler,
};

/// A _Modbus_ slave listening on a TCP endpoint.
///
/// Connections are accepted concurrently and served independently; every
/// inbound request runs on its own task. Generally the intended use is as
/// follows:
///
/// ```no_run
/// use std::sync::Arc;
/// use tokio_sunspec::{cancel::Signal, modbus};
///
/// # async fn demo() -> tokio_sunspec::Result<()> {
/// let server = modbus::Config::new("localhost:502").server()?;
/// let mux = modbus::Mux::new().read_holding_registers(|_ctx, _address, quantity| async move {
///     Ok(vec![0; usize::from(quantity) * 2])
/// });
///
/// let ctx = Signal::new();
/// server.serve(&ctx, Arc::new(mux)).await?;
/// # Ok(())
/// # }
/// ```
pub struct Server {
    cfg: Config,
}

impl Server {
    pub(crate) fn new(cfg: Config) -> Self {
        Self { cfg }
    }

    /// Binds the configured endpoint and serves inbound requests until the
    /// given signal is cancelled.
    ///
    /// The handler is called for every decodable request; it must be safe
    /// for concurrent invocation. Cancellation closes the listener and
    /// returns once all pending handlers have completed.
    pub async fn serve<H>(&self, ctx: &Signal, handler: Arc<H>) -> Result<()>
    where
        H: Handler + 'static,
    {
        let listener = TcpListener::bind(&self.cfg.endpoint).await?;
        debug!("listening on {}", self.cfg.endpoint);
        let connections = TaskTracker::new();
        loop {
            tokio::select! {
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            trace!("accepted connection from {peer}");
                            let ctx = Signal::new().propagate(ctx);
                            let handler = Arc::clone(&handler);
                            connections.spawn(async move {
                                serve_connection(ctx, stream, handler).await;
                            });
                        }
                        Err(err) => error!("accept failed: {err}"),
                    }
                }
                () = ctx.cancelled() => break,
            }
        }
        connections.close();
        connections.wait().await;
        Ok(())
    }
}

// One read loop per connection. The attached listener only copies the
// frame and spawns the actual handling, keeping the broadcast critical
// section short.
async fn serve_connection<H>(ctx: Signal, stream: TcpStream, handler: Arc<H>)
where
    H: Handler + 'static,
{
    let (reader, writer) = stream.into_split();
    let conn = Connection::new(writer);
    let framer = Arc::new(Framer::default());
    let requests = TaskTracker::new();
    let _listener = {
        let ctx = ctx.clone();
        let conn = conn.clone();
        let framer = Arc::clone(&framer);
        let requests = requests.clone();
        conn.clone()
            .listen(Box::new(move |msg| match msg {
                // a read error terminates the connection; deregister
                Err(_) => true,
                Ok(adu) => {
                    let task = handle_request(
                        ctx.clone(),
                        conn.clone(),
                        Arc::clone(&framer),
                        Arc::clone(&handler),
                        adu.clone(),
                    );
                    requests.spawn(task);
                    false
                }
            }))
            .await
    };
    conn.read_loop(&ctx, reader).await;
    requests.close();
    requests.wait().await;
    trace!("connection closed");
}

async fn handle_request<H>(
    ctx: Signal,
    conn: Connection,
    framer: Arc<Framer>,
    handler: Arc<H>,
    adu: Bytes,
) where
    H: Handler,
{
    // malformed requests and stray exception frames are dropped
    let Ok((code, data)) = Framer::decode(&adu) else {
        return;
    };
    let (code, payload) = match handler.handle(&ctx, code, &data).await {
        Ok(res) if res.len() > MAX_DATA_LEN => {
            (code | 0x80, vec![Exception::SlaveDeviceFailure.code()])
        }
        Ok(res) => (code, res),
        Err(ex) => (code | 0x80, vec![ex.code()]),
    };
    let Ok(res) = framer.reply(code, &payload, &adu) else {
        return;
    };
    if let Err(err) = conn.write(&ctx, &res).await {
        debug!("response write failed: {err}");
    }
}
