// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Modbus-TCP client.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::{timeout, Duration};
use tracing::{debug, info};

use pinball_core::bus::BusFuture;
use pinball_core::{BusError, FieldBus};

use crate::codec::{decode_response, encode_request, MbapHeader, Request, Response, MBAP_LEN};

/// One persistent connection to a controller.
///
/// The socket is opened on first use and dropped after any transport or
/// framing error, so the next call reconnects. Nothing is retried here.
pub struct ModbusTcp {
    addr: String,
    unit_id: u8,
    timeout: Duration,
    stream: Option<TcpStream>,
    next_transaction: u16,
}

impl ModbusTcp {
    pub fn new(addr: &str, unit_id: u8, timeout: Duration) -> Self {
        Self {
            addr: addr.to_string(),
            unit_id,
            timeout,
            stream: None,
            next_transaction: 0,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    async fn stream(&mut self) -> Result<&mut TcpStream, BusError> {
        if self.stream.is_none() {
            let stream = TcpStream::connect(&self.addr).await?;
            stream.set_nodelay(true)?;
            info!("Connected to Modbus controller at {}", self.addr);
            self.stream = Some(stream);
        }
        self.stream.as_mut().ok_or(BusError::Closed)
    }

    async fn transact(&mut self, request: Request) -> Result<Response, BusError> {
        let result = match timeout(self.timeout, self.exchange(request)).await {
            Ok(result) => result,
            Err(_) => Err(BusError::Timeout(request.label())),
        };
        match &result {
            // The controller answered in frame; the link is fine.
            Err(BusError::Exception { .. }) | Ok(_) => {}
            Err(e) => {
                if self.stream.take().is_some() {
                    debug!("Dropping Modbus connection to {}: {}", self.addr, e);
                }
            }
        }
        result
    }

    async fn exchange(&mut self, request: Request) -> Result<Response, BusError> {
        self.next_transaction = self.next_transaction.wrapping_add(1);
        let transaction_id = self.next_transaction;
        let unit_id = self.unit_id;
        let frame = encode_request(transaction_id, unit_id, &request)?;

        let stream = self.stream().await?;
        stream.write_all(&frame).await?;
        stream.flush().await?;

        let mut header = [0u8; MBAP_LEN];
        stream.read_exact(&mut header).await?;
        let header = MbapHeader::parse(&header)?;
        let mut pdu = vec![0u8; header.pdu_len()];
        stream.read_exact(&mut pdu).await?;

        if header.transaction_id != transaction_id {
            return Err(BusError::Protocol(format!(
                "transaction id mismatch: sent {}, got {}",
                transaction_id, header.transaction_id
            )));
        }
        if header.unit_id != unit_id {
            return Err(BusError::Protocol(format!(
                "unit id mismatch: sent {}, got {}",
                unit_id, header.unit_id
            )));
        }
        decode_response(&request, &pdu)
    }

    fn unexpected(response: Response) -> BusError {
        BusError::Protocol(format!("unexpected response {:?}", response))
    }
}

impl FieldBus for ModbusTcp {
    fn endpoint(&self) -> String {
        format!("modbus://{} (unit {})", self.addr, self.unit_id)
    }

    fn read_coils<'a>(&'a mut self, address: u16, count: u16) -> BusFuture<'a, Vec<bool>> {
        Box::pin(async move {
            match self.transact(Request::ReadCoils { address, count }).await? {
                Response::Coils(bits) => Ok(bits),
                other => Err(Self::unexpected(other)),
            }
        })
    }

    fn read_input_registers<'a>(
        &'a mut self,
        address: u16,
        count: u16,
    ) -> BusFuture<'a, Vec<u16>> {
        Box::pin(async move {
            match self
                .transact(Request::ReadInputRegisters { address, count })
                .await?
            {
                Response::Registers(values) => Ok(values),
                other => Err(Self::unexpected(other)),
            }
        })
    }

    fn read_holding_registers<'a>(
        &'a mut self,
        address: u16,
        count: u16,
    ) -> BusFuture<'a, Vec<u16>> {
        Box::pin(async move {
            match self
                .transact(Request::ReadHoldingRegisters { address, count })
                .await?
            {
                Response::Registers(values) => Ok(values),
                other => Err(Self::unexpected(other)),
            }
        })
    }

    fn write_single_coil<'a>(&'a mut self, address: u16, value: bool) -> BusFuture<'a, ()> {
        Box::pin(async move {
            match self
                .transact(Request::WriteSingleCoil { address, value })
                .await?
            {
                Response::CoilWritten { .. } => Ok(()),
                other => Err(Self::unexpected(other)),
            }
        })
    }

    fn close<'a>(&'a mut self) -> BusFuture<'a, ()> {
        Box::pin(async move {
            if let Some(mut stream) = self.stream.take() {
                stream.shutdown().await?;
                info!("Closed Modbus connection to {}", self.addr);
            }
            Ok(())
        })
    }
}
