// SPDX-FileCopyrightText: Copyright (c) 2017-2025 slowtec GmbH <post@slowtec.de>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! _Modbus_ TCP (MBAP) framing.
//!
//! An application data unit is `[transaction id:2][protocol id:2]`
//! `[length:2][unit id:1][function code:1][data…]` with every multi-byte
//! field in big-endian order. The length field counts the unit id, the
//! function code and the data.

use std::sync::atomic::{AtomicU16, Ordering};

use byteorder::{BigEndian, ByteOrder};
use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Error, Exception, Result};

use super::FunctionCode;

/// Size of the MBAP header in bytes.
pub(crate) const MBAP_HEADER_LEN: usize = 7;

/// Maximum size of one ADU in bytes.
pub(crate) const MAX_ADU_LEN: usize = 260;

/// Maximum size of the data trailing the function code.
pub(crate) const MAX_DATA_LEN: usize = 252;

const PROTOCOL_ID: u16 = 0x0000;
const UNIT_ID: u8 = 0x00;

/// TCP framer with a per-connection monotonic transaction counter.
#[derive(Debug, Default)]
pub(crate) struct Framer {
    transaction_id: AtomicU16,
}

impl Framer {
    /// Encodes a request into a complete ADU, stamping a fresh transaction
    /// id.
    pub(crate) fn encode(&self, code: FunctionCode, data: &[u8]) -> Result<Bytes> {
        Ok(self.assemble(code, data)?.freeze())
    }

    /// Encodes a response to `request`, preserving its transaction id.
    pub(crate) fn reply(
        &self,
        code: FunctionCode,
        data: &[u8],
        request: &[u8],
    ) -> Result<Bytes> {
        let mut adu = self.assemble(code, data)?;
        adu[0..2].copy_from_slice(&request[0..2]);
        Ok(adu.freeze())
    }

    fn assemble(&self, code: FunctionCode, data: &[u8]) -> Result<BytesMut> {
        if data.len() > MAX_DATA_LEN {
            return Err(Error::DataSizeExceeded);
        }
        let mut adu = BytesMut::with_capacity(MBAP_HEADER_LEN + 1 + data.len());
        adu.put_u16(self.transaction_id.fetch_add(1, Ordering::Relaxed));
        adu.put_u16(PROTOCOL_ID);
        adu.put_u16(2 + data.len() as u16);
        adu.put_u8(UNIT_ID);
        adu.put_u8(code);
        adu.put_slice(data);
        Ok(adu)
    }

    /// Splits an ADU into its function code and data.
    ///
    /// A function byte with the high bit set carries a _Modbus_ exception in
    /// its first data byte, surfaced as a typed error.
    pub(crate) fn decode(adu: &[u8]) -> Result<(FunctionCode, Vec<u8>)> {
        if adu.len() < MBAP_HEADER_LEN + 1 {
            return Err(Error::InvalidFrame);
        }
        let code = adu[7];
        if code >= 0x80 {
            let ex = *adu.get(8).ok_or(Error::InvalidFrame)?;
            return Err(Exception::from(ex).into());
        }
        Ok((code, adu[8..].to_vec()))
    }

    /// Checks that a response belongs to the given request.
    ///
    /// A transaction id mismatch is recoverable: the frame was meant for
    /// another in-flight request and the caller keeps listening. The other
    /// mismatches are fatal for the request.
    pub(crate) fn verify(request: &[u8], response: &[u8]) -> Result<()> {
        if response.len() < MBAP_HEADER_LEN {
            return Err(Error::InvalidFrame);
        }
        if request[0..2] != response[0..2] {
            return Err(Error::MismatchedTransactionId);
        }
        if request[2..4] != response[2..4] {
            return Err(Error::MismatchedProtocolId);
        }
        if request[6] != response[6] {
            return Err(Error::MismatchedUnitId);
        }
        Ok(())
    }

    /// Extracts the payload length field of a header, in bytes following
    /// the unit id.
    pub(crate) fn body_len(header: &[u8; MBAP_HEADER_LEN]) -> Result<usize> {
        let length = usize::from(BigEndian::read_u16(&header[4..6]));
        // the unit id counts towards the length field
        if length == 0 || length > MAX_ADU_LEN - (MBAP_HEADER_LEN - 1) {
            return Err(Error::InvalidFrame);
        }
        Ok(length - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_writes_header_and_payload() {
        let framer = Framer::default();
        let adu = framer.encode(0x03, &[0x9C, 0x42, 0x00, 0x02]).unwrap();
        assert_eq!(
            adu.as_ref(),
            &[0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00, 0x03, 0x9C, 0x42, 0x00, 0x02]
        );
    }

    #[test]
    fn transaction_ids_are_distinct() {
        let framer = Framer::default();
        let a = framer.encode(0x03, &[]).unwrap();
        let b = framer.encode(0x03, &[]).unwrap();
        assert_ne!(a[0..2], b[0..2]);
    }

    #[test]
    fn encode_rejects_oversized_payloads() {
        let framer = Framer::default();
        assert!(framer.encode(0x03, &[0; MAX_DATA_LEN]).is_ok());
        assert!(matches!(
            framer.encode(0x03, &[0; MAX_DATA_LEN + 1]),
            Err(Error::DataSizeExceeded)
        ));
    }

    #[test]
    fn decode_splits_code_and_data() {
        let (code, data) =
            Framer::decode(&[0x00, 0x07, 0x00, 0x00, 0x00, 0x04, 0x00, 0x03, 0x02, 0xAB])
                .unwrap();
        assert_eq!(code, 0x03);
        assert_eq!(data, vec![0x02, 0xAB]);
    }

    #[test]
    fn decode_surfaces_exceptions() {
        let err = Framer::decode(&[0x00, 0x07, 0x00, 0x00, 0x00, 0x03, 0x00, 0x83, 0x02])
            .unwrap_err();
        assert!(matches!(
            err,
            Error::Exception(Exception::IllegalDataAddress)
        ));
    }

    #[test]
    fn decode_rejects_short_frames() {
        assert!(matches!(
            Framer::decode(&[0x00, 0x01, 0x00]),
            Err(Error::InvalidFrame)
        ));
    }

    #[test]
    fn verify_field_mismatches() {
        let framer = Framer::default();
        let req = framer.encode(0x03, &[0x00, 0x00, 0x00, 0x01]).unwrap();

        let mut res = req.to_vec();
        res[1] ^= 0xFF;
        assert!(matches!(
            Framer::verify(&req, &res),
            Err(Error::MismatchedTransactionId)
        ));

        let mut res = req.to_vec();
        res[3] ^= 0xFF;
        assert!(matches!(
            Framer::verify(&req, &res),
            Err(Error::MismatchedProtocolId)
        ));

        let mut res = req.to_vec();
        res[6] ^= 0xFF;
        assert!(matches!(
            Framer::verify(&req, &res),
            Err(Error::MismatchedUnitId)
        ));

        assert!(Framer::verify(&req, &req).is_ok());
    }

    #[test]
    fn reply_preserves_the_request_transaction_id() {
        let framer = Framer::default();
        let req = [0xAB, 0xCD, 0x00, 0x00, 0x00, 0x06, 0x00, 0x03, 0x00, 0x00, 0x00, 0x01];
        let res = framer.reply(0x03, &[0x02, 0x12, 0x34], &req).unwrap();
        assert_eq!(&res[0..2], &[0xAB, 0xCD]);
        assert_eq!(res[7], 0x03);
    }

    #[test]
    fn body_len_checks_the_length_field() {
        let mut header = [0x00, 0x00, 0x00, 0x00, 0x00, 0x06, 0x00];
        assert_eq!(Framer::body_len(&header).unwrap(), 5);
        header[4..6].copy_from_slice(&[0x00, 0x00]);
        assert!(Framer::body_len(&header).is_err());
        header[4..6].copy_from_slice(&[0x01, 0x00]);
        assert!(Framer::body_len(&header).is_err());
    }
}
