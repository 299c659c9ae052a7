// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! A shared TCP connection with broadcast-read fan-out and serialized
//! writes.
//!
//! One task owns the read half and reassembles complete ADUs; every frame
//! (or the terminal error) is broadcast to an ordered registry of listener
//! callbacks. Writes and the registry share a single mutex, so the write
//! critical section and the broadcast critical section serialize against
//! each other while socket reads happen outside the lock. Callbacks are
//! invoked under the lock: they must be short, non-blocking and must not
//! re-enter the connection.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::tcp::{OwnedReadHalf, OwnedWriteHalf},
    sync::{oneshot, Mutex},
};

use crate::{
    cancel::Signal,
    error::{Error, Result},
};

use super::frame::{Framer, MBAP_HEADER_LEN};

/// A listener callback.
///
/// Invoked for every broadcast frame or terminal error; returning `true`
/// dismisses the listener and signals its completion handle.
pub(crate) type Callback = Box<dyn FnMut(std::result::Result<&Bytes, &Error>) -> bool + Send>;

struct Listener {
    id: u64,
    callback: Callback,
    done: oneshot::Sender<()>,
}

struct Shared {
    writer: OwnedWriteHalf,
    listeners: Vec<Listener>,
    next_id: u64,
}

/// Cloneable handle to one TCP connection.
#[derive(Clone)]
pub(crate) struct Connection {
    shared: Arc<Mutex<Shared>>,
}

impl Connection {
    pub(crate) fn new(writer: OwnedWriteHalf) -> Self {
        Self {
            shared: Arc::new(Mutex::new(Shared {
                writer,
                listeners: Vec::new(),
                next_id: 0,
            })),
        }
    }

    /// Sends the given ADU to the connected endpoint.
    ///
    /// Writes are serialized against each other and against broadcasts.
    pub(crate) async fn write(&self, ctx: &Signal, adu: &[u8]) -> Result<()> {
        let mut shared = self.shared.lock().await;
        tokio::select! {
            res = shared.writer.write_all(adu) => res.map_err(Into::into),
            () = ctx.cancelled() => Err(Error::Cancelled),
        }
    }

    /// Shuts down the write direction of the connection.
    pub(crate) async fn close(&self) -> Result<()> {
        let mut shared = self.shared.lock().await;
        shared.writer.shutdown().await.map_err(Into::into)
    }

    /// Attaches a callback to the connection.
    ///
    /// The callback stays registered until it returns `true` or the
    /// returned handle removes it.
    pub(crate) async fn listen(&self, callback: Callback) -> ListenerHandle {
        let (done, wait) = oneshot::channel();
        let mut shared = self.shared.lock().await;
        let id = shared.next_id;
        shared.next_id += 1;
        shared.listeners.push(Listener { id, callback, done });
        ListenerHandle {
            id,
            wait,
            shared: Arc::clone(&self.shared),
        }
    }

    /// Continuously reads ADUs from the connection and broadcasts them to
    /// all attached listeners. Terminates by broadcasting the first error,
    /// including cancellation of `ctx`.
    pub(crate) async fn read_loop(&self, ctx: &Signal, mut reader: OwnedReadHalf) {
        let err = loop {
            match read_adu(ctx, &mut reader).await {
                Ok(adu) => self.broadcast(Ok(&adu)).await,
                Err(err) => break err,
            }
        };
        self.broadcast(Err(&err)).await;
    }

    async fn broadcast(&self, msg: std::result::Result<&Bytes, &Error>) {
        let mut shared = self.shared.lock().await;
        let mut i = 0;
        while i < shared.listeners.len() {
            if (shared.listeners[i].callback)(msg) {
                let listener = shared.listeners.remove(i);
                let _ = listener.done.send(());
            } else {
                i += 1;
            }
        }
    }
}

// One complete ADU per call: header first, then exactly the advertised
// body.
async fn read_adu(ctx: &Signal, reader: &mut OwnedReadHalf) -> Result<Bytes> {
    let mut header = [0_u8; MBAP_HEADER_LEN];
    tokio::select! {
        res = reader.read_exact(&mut header) => {
            res?;
        }
        () = ctx.cancelled() => return Err(Error::Cancelled),
    }
    let mut body = vec![0_u8; Framer::body_len(&header)?];
    tokio::select! {
        res = reader.read_exact(&mut body) => {
            res?;
        }
        () = ctx.cancelled() => return Err(Error::Cancelled),
    }
    let mut adu = BytesMut::with_capacity(header.len() + body.len());
    adu.extend_from_slice(&header);
    adu.extend_from_slice(&body);
    Ok(adu.freeze())
}

/// Completion handle of a registered listener.
pub(crate) struct ListenerHandle {
    id: u64,
    wait: oneshot::Receiver<()>,
    shared: Arc<Mutex<Shared>>,
}

impl ListenerHandle {
    /// Waits until the callback dismissed itself or `ctx` is cancelled.
    ///
    /// On cancellation the listener is removed from the registry; the
    /// removal races safely against a concurrent broadcast because both
    /// paths take the registry out exactly once under the lock.
    pub(crate) async fn wait(mut self, ctx: &Signal) -> Result<()> {
        let cancelled = tokio::select! {
            _ = &mut self.wait => false,
            () = ctx.cancelled() => true,
        };
        if cancelled {
            self.deregister().await;
            return Err(Error::Cancelled);
        }
        Ok(())
    }

    /// Removes the listener without waiting for a frame.
    pub(crate) async fn abort(self) {
        self.deregister().await;
    }

    async fn deregister(&self) {
        let mut shared = self.shared.lock().await;
        shared.listeners.retain(|listener| listener.id != self.id);
    }
}
