// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! _Modbus_ client (master).

use std::sync::{Arc, Mutex};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, BytesMut};
use log::debug;
use tokio::net::TcpStream;

use crate::{
    cancel::Signal,
    error::{Error, Exception, Result},
    index::{Address, Quantity},
};

use super::{
    bools_to_bytes, bound_check, byte_count, bytes_to_bools,
    config::Config,
    connection::Connection,
    frame::Framer,
    FunctionCode,
};

/// A _Modbus_ master over a shared TCP connection.
///
/// Multiple requests may be issued concurrently; responses are correlated
/// by transaction id. Generally the intended use is as follows:
///
/// ```no_run
/// use tokio_sunspec::{cancel::Signal, modbus};
///
/// # async fn demo() -> tokio_sunspec::Result<()> {
/// let mut client = modbus::Config::new("localhost:502").client()?;
/// client.connect().await?;
///
/// let ctx = Signal::new();
/// let registers = client.read_holding_registers(&ctx, 0x9C40, 2).await?;
/// println!("{registers:?}");
///
/// client.disconnect().await?;
/// # Ok(())
/// # }
/// ```
pub struct Client {
    cfg: Config,
    framer: Framer,
    active: Option<Active>,
}

struct Active {
    conn: Connection,
    halt: Signal,
}

impl Client {
    pub(crate) fn new(cfg: Config) -> Self {
        Self {
            cfg,
            framer: Framer::default(),
            active: None,
        }
    }

    /// Dials the configured endpoint and starts the read loop.
    pub async fn connect(&mut self) -> Result<()> {
        if self.active.is_some() {
            return Err(Error::AlreadyConnected);
        }
        let stream = TcpStream::connect(&self.cfg.endpoint).await?;
        debug!("connected to {}", self.cfg.endpoint);
        let (reader, writer) = stream.into_split();
        let conn = Connection::new(writer);
        let halt = Signal::new();
        {
            let conn = conn.clone();
            let halt = halt.clone();
            tokio::spawn(async move { conn.read_loop(&halt, reader).await });
        }
        self.active = Some(Active { conn, halt });
        Ok(())
    }

    /// Shuts down the connection.
    ///
    /// All in-flight requests are cancelled as a result. Disconnecting an
    /// unconnected client is a no-op.
    pub async fn disconnect(&mut self) -> Result<()> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };
        active.halt.cancel();
        active.conn.close().await
    }

    fn conn(&self) -> Result<&Connection> {
        self.active
            .as_ref()
            .map(|active| &active.conn)
            .ok_or(Error::NotConnected)
    }

    /// Encodes the request into an ADU, sends it and awaits the matching
    /// response.
    ///
    /// Only function codes below `0x80` are accepted. A response frame with
    /// a foreign transaction id keeps the request listening; cancellation
    /// of `ctx` deregisters the listener and yields
    /// [`Error::Cancelled`].
    pub async fn request(
        &self,
        ctx: &Signal,
        code: FunctionCode,
        data: &[u8],
    ) -> Result<Vec<u8>> {
        if code == 0 || code >= 0x80 {
            return Err(Exception::IllegalFunction.into());
        }
        let conn = self.conn()?;
        let adu = self.framer.encode(code, data)?;

        let slot: Arc<Mutex<Option<Result<Vec<u8>>>>> = Arc::default();
        let outcome = Arc::clone(&slot);
        let request = adu.clone();
        let handle = conn
            .listen(Box::new(move |msg| {
                let response = match msg {
                    Err(err) => Err(err.clone()),
                    Ok(frame) => match Framer::verify(&request, frame) {
                        Ok(()) => Framer::decode(frame).map(|(_, data)| data),
                        Err(Error::MismatchedTransactionId) => return false,
                        Err(err) => Err(err),
                    },
                };
                *outcome.lock().expect("listener slot poisoned") = Some(response);
                true
            }))
            .await;

        if let Err(err) = conn.write(ctx, &adu).await {
            handle.abort().await;
            return Err(err);
        }
        handle.wait(ctx).await?;
        if ctx.is_cancelled() {
            return Err(Error::Cancelled);
        }
        let result = slot
            .lock()
            .expect("listener slot poisoned")
            .take()
            .unwrap_or(Err(Error::Cancelled));
        result
    }

    /// Requests 1 to 2000 contiguous coil states starting at `address`
    /// (0x01).
    pub async fn read_coils(
        &self,
        ctx: &Signal,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<bool>> {
        bound_check(address, quantity, 2000)?;
        let res = self.request(ctx, 0x01, &addressed(address, quantity)).await?;
        if res.len() != 1 + byte_count(quantity) || usize::from(res[0]) != res.len() - 1 {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        Ok(bytes_to_bools(quantity, &res[1..]))
    }

    /// Requests 1 to 2000 contiguous discrete inputs starting at `address`
    /// (0x02).
    pub async fn read_discrete_inputs(
        &self,
        ctx: &Signal,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<bool>> {
        bound_check(address, quantity, 2000)?;
        let res = self.request(ctx, 0x02, &addressed(address, quantity)).await?;
        if res.len() != 1 + byte_count(quantity) || usize::from(res[0]) != res.len() - 1 {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        Ok(bytes_to_bools(quantity, &res[1..]))
    }

    /// Reads 1 to 125 contiguous holding registers starting at `address`
    /// (0x03).
    ///
    /// On success the returned buffer is `2 × quantity` bytes long.
    pub async fn read_holding_registers(
        &self,
        ctx: &Signal,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<u8>> {
        bound_check(address, quantity, 125)?;
        let mut res = self.request(ctx, 0x03, &addressed(address, quantity)).await?;
        if res.len() != 1 + usize::from(quantity) * 2 || usize::from(res[0]) != res.len() - 1 {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        res.remove(0);
        Ok(res)
    }

    /// Reads 1 to 125 contiguous input registers starting at `address`
    /// (0x04).
    ///
    /// On success the returned buffer is `2 × quantity` bytes long.
    pub async fn read_input_registers(
        &self,
        ctx: &Signal,
        address: Address,
        quantity: Quantity,
    ) -> Result<Vec<u8>> {
        bound_check(address, quantity, 125)?;
        let mut res = self.request(ctx, 0x04, &addressed(address, quantity)).await?;
        if res.len() != 1 + usize::from(quantity) * 2 || usize::from(res[0]) != res.len() - 1 {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        res.remove(0);
        Ok(res)
    }

    /// Sets the output of the coil at `address` to ON (`true`) or OFF
    /// (`false`) (0x05).
    pub async fn write_single_coil(
        &self,
        ctx: &Signal,
        address: Address,
        status: bool,
    ) -> Result<()> {
        let value: u16 = if status { 0xFF00 } else { 0x0000 };
        let res = self.request(ctx, 0x05, &addressed(address, value)).await?;
        if res.len() != 4 || BigEndian::read_u16(&res) != address {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        Ok(())
    }

    /// Writes a value to the single holding register at `address` (0x06).
    pub async fn write_single_register(
        &self,
        ctx: &Signal,
        address: Address,
        value: u16,
    ) -> Result<()> {
        let res = self.request(ctx, 0x06, &addressed(address, value)).await?;
        if res.len() != 4
            || BigEndian::read_u16(&res) != address
            || BigEndian::read_u16(&res[2..]) != value
        {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        Ok(())
    }

    /// Sets the state of 1 to 1968 coils starting at `address` (0x0F).
    pub async fn write_multiple_coils(
        &self,
        ctx: &Signal,
        address: Address,
        status: &[bool],
    ) -> Result<()> {
        let quantity = status.len() as Quantity;
        bound_check(address, quantity, 1968)?;
        let packed = bools_to_bytes(status);
        let mut data = BytesMut::with_capacity(5 + packed.len());
        data.put_u16(address);
        data.put_u16(quantity);
        data.put_u8(packed.len() as u8);
        data.put_slice(&packed);
        let res = self.request(ctx, 0x0F, &data).await?;
        if res.len() != 4
            || BigEndian::read_u16(&res) != address
            || BigEndian::read_u16(&res[2..]) != quantity
        {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        Ok(())
    }

    /// Writes register values to the holding registers starting at
    /// `address` (0x10).
    ///
    /// The buffer length must be even and cover 1 to 123 registers.
    pub async fn write_multiple_registers(
        &self,
        ctx: &Signal,
        address: Address,
        values: &[u8],
    ) -> Result<()> {
        if values.len() % 2 != 0 {
            return Err(Exception::IllegalDataValue.into());
        }
        let quantity = (values.len() / 2) as Quantity;
        bound_check(address, quantity, 123)?;
        let mut data = BytesMut::with_capacity(5 + values.len());
        data.put_u16(address);
        data.put_u16(quantity);
        data.put_u8(values.len() as u8);
        data.put_slice(values);
        let res = self.request(ctx, 0x10, &data).await?;
        if res.len() != 4
            || BigEndian::read_u16(&res) != address
            || BigEndian::read_u16(&res[2..]) != quantity
        {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        Ok(())
    }

    /// Writes `values` at `write_address`, then reads `read_quantity`
    /// holding registers starting at `read_address`, in one transaction
    /// (0x17).
    pub async fn read_write_multiple_registers(
        &self,
        ctx: &Signal,
        read_address: Address,
        read_quantity: Quantity,
        write_address: Address,
        values: &[u8],
    ) -> Result<Vec<u8>> {
        if values.len() % 2 != 0 {
            return Err(Exception::IllegalDataValue.into());
        }
        let write_quantity = (values.len() / 2) as Quantity;
        bound_check(read_address, read_quantity, 125)?;
        bound_check(write_address, write_quantity, 121)?;
        let mut data = BytesMut::with_capacity(9 + values.len());
        data.put_u16(read_address);
        data.put_u16(read_quantity);
        data.put_u16(write_address);
        data.put_u16(write_quantity);
        data.put_u8(values.len() as u8);
        data.put_slice(values);
        let mut res = self.request(ctx, 0x17, &data).await?;
        if res.len() != 1 + usize::from(read_quantity) * 2
            || usize::from(res[0]) != res.len() - 1
        {
            return Err(Exception::SlaveDeviceFailure.into());
        }
        res.remove(0);
        Ok(res)
    }
}

fn addressed(address: Address, value: u16) -> [u8; 4] {
    let mut data = [0_u8; 4];
    BigEndian::write_u16(&mut data[0..2], address);
    BigEndian::write_u16(&mut data[2..4], value);
    data
}
