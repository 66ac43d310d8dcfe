// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Modbus-TCP framing for the four supported functions.
//!
//! A frame is a 7-byte MBAP header (transaction id, protocol id 0, length of
//! what follows, unit id) and a PDU starting with the function code. All
//! multi-byte fields are big-endian.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use pinball_core::BusError;

pub const MBAP_LEN: usize = 7;
pub const MAX_PDU_LEN: usize = 253;
pub const MAX_READ_COILS: u16 = 2000;
pub const MAX_READ_REGISTERS: u16 = 125;

const COIL_ON: u16 = 0xFF00;
const COIL_OFF: u16 = 0x0000;
const EXCEPTION_FLAG: u8 = 0x80;

pub const EXCEPTION_ILLEGAL_FUNCTION: u8 = 0x01;
pub const EXCEPTION_ILLEGAL_ADDRESS: u8 = 0x02;
pub const EXCEPTION_ILLEGAL_VALUE: u8 = 0x03;
pub const EXCEPTION_DEVICE_FAILURE: u8 = 0x04;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FunctionCode {
    ReadCoils = 0x01,
    ReadHoldingRegisters = 0x03,
    ReadInputRegisters = 0x04,
    WriteSingleCoil = 0x05,
}

impl FunctionCode {
    pub fn from_u8(code: u8) -> Option<Self> {
        match code {
            0x01 => Some(Self::ReadCoils),
            0x03 => Some(Self::ReadHoldingRegisters),
            0x04 => Some(Self::ReadInputRegisters),
            0x05 => Some(Self::WriteSingleCoil),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    ReadCoils { address: u16, count: u16 },
    ReadInputRegisters { address: u16, count: u16 },
    ReadHoldingRegisters { address: u16, count: u16 },
    WriteSingleCoil { address: u16, value: bool },
}

impl Request {
    pub fn function(&self) -> FunctionCode {
        match self {
            Request::ReadCoils { .. } => FunctionCode::ReadCoils,
            Request::ReadInputRegisters { .. } => FunctionCode::ReadInputRegisters,
            Request::ReadHoldingRegisters { .. } => FunctionCode::ReadHoldingRegisters,
            Request::WriteSingleCoil { .. } => FunctionCode::WriteSingleCoil,
        }
    }

    /// Operation name for timeout errors.
    pub fn label(&self) -> &'static str {
        match self {
            Request::ReadCoils { .. } => "read coils",
            Request::ReadInputRegisters { .. } => "read input registers",
            Request::ReadHoldingRegisters { .. } => "read holding registers",
            Request::WriteSingleCoil { .. } => "write single coil",
        }
    }

    fn check_count(&self) -> Result<(), u8> {
        let (count, max) = match *self {
            Request::ReadCoils { count, .. } => (count, MAX_READ_COILS),
            Request::ReadInputRegisters { count, .. }
            | Request::ReadHoldingRegisters { count, .. } => (count, MAX_READ_REGISTERS),
            Request::WriteSingleCoil { .. } => return Ok(()),
        };
        if count == 0 || count > max {
            return Err(EXCEPTION_ILLEGAL_VALUE);
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Response {
    Coils(Vec<bool>),
    Registers(Vec<u16>),
    CoilWritten { address: u16, value: bool },
    /// Exception code sent back by a controller.
    Exception(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MbapHeader {
    pub transaction_id: u16,
    pub protocol_id: u16,
    /// Bytes following the length field: unit id plus PDU.
    pub length: u16,
    pub unit_id: u8,
}

impl MbapHeader {
    pub fn parse(mut buf: &[u8]) -> Result<Self, BusError> {
        if buf.len() < MBAP_LEN {
            return Err(BusError::Protocol(format!(
                "short MBAP header ({} bytes)",
                buf.len()
            )));
        }
        let header = Self {
            transaction_id: buf.get_u16(),
            protocol_id: buf.get_u16(),
            length: buf.get_u16(),
            unit_id: buf.get_u8(),
        };
        if header.protocol_id != 0 {
            return Err(BusError::Protocol(format!(
                "unexpected protocol id {}",
                header.protocol_id
            )));
        }
        if header.length < 2 || usize::from(header.length) - 1 > MAX_PDU_LEN {
            return Err(BusError::Protocol(format!(
                "invalid MBAP length {}",
                header.length
            )));
        }
        Ok(header)
    }

    pub fn pdu_len(&self) -> usize {
        usize::from(self.length) - 1
    }
}

fn frame(transaction_id: u16, unit_id: u8, pdu: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(MBAP_LEN + pdu.len());
    buf.put_u16(transaction_id);
    buf.put_u16(0);
    buf.put_u16((pdu.len() + 1) as u16);
    buf.put_u8(unit_id);
    buf.put_slice(pdu);
    buf.freeze()
}

/// Encode a client request frame.
pub fn encode_request(
    transaction_id: u16,
    unit_id: u8,
    request: &Request,
) -> Result<Bytes, BusError> {
    request.check_count().map_err(|_| {
        BusError::Protocol(format!("{}: item count out of range", request.label()))
    })?;

    let mut pdu = BytesMut::with_capacity(5);
    pdu.put_u8(request.function() as u8);
    match *request {
        Request::ReadCoils { address, count }
        | Request::ReadInputRegisters { address, count }
        | Request::ReadHoldingRegisters { address, count } => {
            pdu.put_u16(address);
            pdu.put_u16(count);
        }
        Request::WriteSingleCoil { address, value } => {
            pdu.put_u16(address);
            pdu.put_u16(if value { COIL_ON } else { COIL_OFF });
        }
    }
    Ok(frame(transaction_id, unit_id, &pdu))
}

/// Decode the PDU answering `request`.
///
/// Exception replies are returned as [`BusError::Exception`]; anything that
/// does not match the request is a protocol error.
pub fn decode_response(request: &Request, pdu: &[u8]) -> Result<Response, BusError> {
    let function = request.function() as u8;
    let Some((&code, mut body)) = pdu.split_first() else {
        return Err(BusError::Protocol("empty response PDU".to_string()));
    };

    if code == function | EXCEPTION_FLAG {
        let exception = body
            .first()
            .copied()
            .ok_or_else(|| BusError::Protocol("exception reply without code".to_string()))?;
        return Err(BusError::Exception {
            function,
            code: exception,
        });
    }
    if code != function {
        return Err(BusError::Protocol(format!(
            "function code mismatch: sent {:#04x}, got {:#04x}",
            function, code
        )));
    }

    match *request {
        Request::ReadCoils { count, .. } => {
            let data = read_payload(&mut body, usize::from(count).div_ceil(8))?;
            Ok(Response::Coils(
                (0..usize::from(count))
                    .map(|i| data[i / 8] & (1 << (i % 8)) != 0)
                    .collect(),
            ))
        }
        Request::ReadInputRegisters { count, .. }
        | Request::ReadHoldingRegisters { count, .. } => {
            let mut data = read_payload(&mut body, usize::from(count) * 2)?;
            Ok(Response::Registers(
                (0..count).map(|_| data.get_u16()).collect(),
            ))
        }
        Request::WriteSingleCoil { address, value } => {
            if body.len() != 4 {
                return Err(BusError::Protocol(format!(
                    "write coil echo has {} bytes",
                    body.len()
                )));
            }
            let echo_address = body.get_u16();
            let echo_value = body.get_u16();
            let expected = if value { COIL_ON } else { COIL_OFF };
            if echo_address != address || echo_value != expected {
                return Err(BusError::Protocol(format!(
                    "write coil echo mismatch: {:#06x}={:#06x}",
                    echo_address, echo_value
                )));
            }
            Ok(Response::CoilWritten { address, value })
        }
    }
}

/// Take the byte-count-prefixed payload of a read reply.
fn read_payload<'a>(body: &mut &'a [u8], expected: usize) -> Result<&'a [u8], BusError> {
    let Some((&byte_count, rest)) = body.split_first() else {
        return Err(BusError::Protocol("read reply without byte count".to_string()));
    };
    if usize::from(byte_count) != expected || rest.len() != expected {
        return Err(BusError::Protocol(format!(
            "read reply byte count {} (payload {}), expected {}",
            byte_count,
            rest.len(),
            expected
        )));
    }
    *body = &[];
    Ok(rest)
}

/// Decode a request PDU on the controller side. `Err` carries the exception
/// code to send back.
pub fn decode_request(pdu: &[u8]) -> Result<Request, (u8, u8)> {
    let Some((&code, mut body)) = pdu.split_first() else {
        return Err((0, EXCEPTION_ILLEGAL_FUNCTION));
    };
    let Some(function) = FunctionCode::from_u8(code) else {
        return Err((code, EXCEPTION_ILLEGAL_FUNCTION));
    };
    if body.len() != 4 {
        return Err((code, EXCEPTION_ILLEGAL_VALUE));
    }
    let address = body.get_u16();
    let operand = body.get_u16();
    let request = match function {
        FunctionCode::ReadCoils => Request::ReadCoils {
            address,
            count: operand,
        },
        FunctionCode::ReadInputRegisters => Request::ReadInputRegisters {
            address,
            count: operand,
        },
        FunctionCode::ReadHoldingRegisters => Request::ReadHoldingRegisters {
            address,
            count: operand,
        },
        FunctionCode::WriteSingleCoil => match operand {
            COIL_ON => Request::WriteSingleCoil {
                address,
                value: true,
            },
            COIL_OFF => Request::WriteSingleCoil {
                address,
                value: false,
            },
            _ => return Err((code, EXCEPTION_ILLEGAL_VALUE)),
        },
    };
    request.check_count().map_err(|e| (code, e))?;
    Ok(request)
}

/// Encode a controller reply frame for a request with function code
/// `function`.
pub fn encode_response(transaction_id: u16, unit_id: u8, function: u8, response: &Response) -> Bytes {
    let mut pdu = BytesMut::new();
    match response {
        Response::Coils(bits) => {
            let mut packed = vec![0u8; bits.len().div_ceil(8)];
            for (i, bit) in bits.iter().enumerate() {
                if *bit {
                    packed[i / 8] |= 1 << (i % 8);
                }
            }
            pdu.put_u8(function);
            pdu.put_u8(packed.len() as u8);
            pdu.put_slice(&packed);
        }
        Response::Registers(values) => {
            pdu.put_u8(function);
            pdu.put_u8((values.len() * 2) as u8);
            for value in values {
                pdu.put_u16(*value);
            }
        }
        Response::CoilWritten { address, value } => {
            pdu.put_u8(function);
            pdu.put_u16(*address);
            pdu.put_u16(if *value { COIL_ON } else { COIL_OFF });
        }
        Response::Exception(code) => {
            pdu.put_u8(function | EXCEPTION_FLAG);
            pdu.put_u8(*code);
        }
    }
    frame(transaction_id, unit_id, &pdu)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_read_coils() {
        let frame = encode_request(
            0x0102,
            1,
            &Request::ReadCoils {
                address: 4,
                count: 1,
            },
        )
        .unwrap();
        assert_eq!(
            &frame[..],
            &[0x01, 0x02, 0x00, 0x00, 0x00, 0x06, 0x01, 0x01, 0x00, 0x04, 0x00, 0x01]
        );
    }

    #[test]
    fn test_encode_write_coil_values() {
        let on = encode_request(
            7,
            3,
            &Request::WriteSingleCoil {
                address: 0x0010,
                value: true,
            },
        )
        .unwrap();
        assert_eq!(&on[6..], &[0x03, 0x05, 0x00, 0x10, 0xFF, 0x00]);

        let off = encode_request(
            8,
            3,
            &Request::WriteSingleCoil {
                address: 0x0010,
                value: false,
            },
        )
        .unwrap();
        assert_eq!(&off[10..], &[0x00, 0x00]);
    }

    #[test]
    fn test_encode_rejects_bad_count() {
        let err = encode_request(
            1,
            1,
            &Request::ReadInputRegisters {
                address: 0,
                count: 126,
            },
        )
        .unwrap_err();
        assert!(matches!(err, BusError::Protocol(_)));
    }

    #[test]
    fn test_decode_coils_lsb_first() {
        let request = Request::ReadCoils {
            address: 0,
            count: 10,
        };
        let response = decode_response(&request, &[0x01, 0x02, 0b0000_0101, 0b0000_0010]).unwrap();
        assert_eq!(
            response,
            Response::Coils(vec![
                true, false, true, false, false, false, false, false, false, true
            ])
        );
    }

    #[test]
    fn test_decode_registers() {
        let request = Request::ReadHoldingRegisters {
            address: 2,
            count: 2,
        };
        let response =
            decode_response(&request, &[0x03, 0x04, 0x00, 0x2A, 0x12, 0x34]).unwrap();
        assert_eq!(response, Response::Registers(vec![42, 0x1234]));
    }

    #[test]
    fn test_decode_exception() {
        let request = Request::ReadInputRegisters {
            address: 99,
            count: 1,
        };
        let err = decode_response(&request, &[0x84, 0x02]).unwrap_err();
        assert!(matches!(
            err,
            BusError::Exception {
                function: 0x04,
                code: 0x02
            }
        ));
    }

    #[test]
    fn test_decode_mismatches() {
        let request = Request::ReadInputRegisters {
            address: 0,
            count: 1,
        };
        assert!(matches!(
            decode_response(&request, &[0x03, 0x02, 0x00, 0x01]),
            Err(BusError::Protocol(_))
        ));
        assert!(matches!(
            decode_response(&request, &[0x04, 0x04, 0x00, 0x01]),
            Err(BusError::Protocol(_))
        ));
        assert!(matches!(
            decode_response(&request, &[]),
            Err(BusError::Protocol(_))
        ));

        let write = Request::WriteSingleCoil {
            address: 5,
            value: true,
        };
        assert!(matches!(
            decode_response(&write, &[0x05, 0x00, 0x05, 0x00, 0x00]),
            Err(BusError::Protocol(_))
        ));
        assert!(decode_response(&write, &[0x05, 0x00, 0x05, 0xFF, 0x00]).is_ok());
    }

    #[test]
    fn test_parse_header() {
        let header = MbapHeader::parse(&[0x00, 0x09, 0x00, 0x00, 0x00, 0x05, 0x01]).unwrap();
        assert_eq!(header.transaction_id, 9);
        assert_eq!(header.unit_id, 1);
        assert_eq!(header.pdu_len(), 4);

        assert!(MbapHeader::parse(&[0x00, 0x09, 0x00, 0x01, 0x00, 0x05, 0x01]).is_err());
        assert!(MbapHeader::parse(&[0x00, 0x09, 0x00, 0x00, 0x00, 0x01, 0x01]).is_err());
        assert!(MbapHeader::parse(&[0x00, 0x09]).is_err());
    }

    #[test]
    fn test_decode_request_side() {
        assert_eq!(
            decode_request(&[0x05, 0x00, 0x0A, 0xFF, 0x00]),
            Ok(Request::WriteSingleCoil {
                address: 10,
                value: true
            })
        );
        assert_eq!(
            decode_request(&[0x05, 0x00, 0x0A, 0x12, 0x34]),
            Err((0x05, EXCEPTION_ILLEGAL_VALUE))
        );
        assert_eq!(
            decode_request(&[0x10, 0x00, 0x00, 0x00, 0x01]),
            Err((0x10, EXCEPTION_ILLEGAL_FUNCTION))
        );
        assert_eq!(
            decode_request(&[0x01, 0x00, 0x00, 0x00, 0x00]),
            Err((0x01, EXCEPTION_ILLEGAL_VALUE))
        );
    }

    #[test]
    fn test_controller_reply_decodes() {
        let request = Request::ReadHoldingRegisters {
            address: 0,
            count: 1,
        };
        let reply = encode_response(
            5,
            1,
            request.function() as u8,
            &Response::Registers(vec![7]),
        );
        let header = MbapHeader::parse(&reply).unwrap();
        assert_eq!(header.transaction_id, 5);
        assert_eq!(header.pdu_len(), reply.len() - MBAP_LEN);
        let pdu = &reply[MBAP_LEN..];
        assert_eq!(
            decode_response(&request, pdu).unwrap(),
            Response::Registers(vec![7])
        );

        let coils = Request::ReadCoils {
            address: 0,
            count: 9,
        };
        let mut bits = vec![false; 9];
        bits[8] = true;
        let reply = encode_response(6, 1, coils.function() as u8, &Response::Coils(bits.clone()));
        assert_eq!(
            decode_response(&coils, &reply[MBAP_LEN..]).unwrap(),
            Response::Coils(bits)
        );

        let reply = encode_response(7, 1, 0x04, &Response::Exception(EXCEPTION_ILLEGAL_ADDRESS));
        assert_eq!(&reply[MBAP_LEN..], &[0x84, 0x02]);
    }
}
