// SPDX-FileCopyrightText: 2025 Stanislaw Grams <stanislawgrams@gmail.com>
//
// SPDX-License-Identifier: BSD-2-Clause

//! Modbus-TCP front for a [`SimController`], so the bridge can be run end to
//! end against a fake cabinet.

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use pinball_core::{BusError, FieldBus};

use crate::codec::{
    decode_request, encode_response, MbapHeader, Request, Response, EXCEPTION_DEVICE_FAILURE,
    MBAP_LEN,
};
use crate::sim::SimController;

/// Accept connections until `shutdown_rx` turns true.
pub async fn serve_sim(
    listener: TcpListener,
    controller: SimController,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    info!("Simulated controller listening on {}", listener.local_addr()?);
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer) = accepted?;
                info!("Client connected: {}", peer);
                let controller = controller.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    if let Err(e) = handle_client(socket, controller, shutdown_rx).await {
                        debug!("Client {} closed: {}", peer, e);
                    }
                });
            }
            changed = shutdown_rx.changed() => {
                if changed.is_err() || *shutdown_rx.borrow() {
                    info!("Simulated controller shutting down");
                    return Ok(());
                }
            }
        }
    }
}

async fn handle_client(
    mut socket: TcpStream,
    controller: SimController,
    mut shutdown_rx: watch::Receiver<bool>,
) -> std::io::Result<()> {
    let mut bus = controller.bus();
    loop {
        let mut header = [0u8; MBAP_LEN];
        tokio::select! {
            read = socket.read_exact(&mut header) => { read?; }
            _ = shutdown_rx.changed() => return Ok(()),
        }
        let header = match MbapHeader::parse(&header) {
            Ok(header) => header,
            Err(e) => {
                warn!("Dropping client after bad header: {}", e);
                return Ok(());
            }
        };
        let mut pdu = vec![0u8; header.pdu_len()];
        socket.read_exact(&mut pdu).await?;

        let (function, response) = match decode_request(&pdu) {
            Ok(request) => (request.function() as u8, execute(&mut bus, request).await),
            Err((function, code)) => (function, Response::Exception(code)),
        };
        let frame = encode_response(header.transaction_id, header.unit_id, function, &response);
        socket.write_all(&frame).await?;
    }
}

async fn execute(bus: &mut dyn FieldBus, request: Request) -> Response {
    let result = match request {
        Request::ReadCoils { address, count } => {
            bus.read_coils(address, count).await.map(Response::Coils)
        }
        Request::ReadInputRegisters { address, count } => bus
            .read_input_registers(address, count)
            .await
            .map(Response::Registers),
        Request::ReadHoldingRegisters { address, count } => bus
            .read_holding_registers(address, count)
            .await
            .map(Response::Registers),
        Request::WriteSingleCoil { address, value } => bus
            .write_single_coil(address, value)
            .await
            .map(|_| Response::CoilWritten { address, value }),
    };
    result.unwrap_or_else(|e: BusError| {
        debug!("Sim request failed: {}", e);
        match e {
            BusError::Exception { code, .. } => Response::Exception(code),
            _ => Response::Exception(EXCEPTION_DEVICE_FAILURE),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ModbusTcp;
    use std::time::Duration;

    #[tokio::test]
    async fn test_modbus_client_against_sim_server() {
        let controller = SimController::new();
        controller.set_coil(0, true);
        controller.set_input_register(6, 314);

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap().to_string();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let server = tokio::spawn(serve_sim(listener, controller.clone(), shutdown_rx));

        let mut bus = ModbusTcp::new(&addr, 1, Duration::from_secs(1));
        assert_eq!(bus.read_coils(0, 1).await.unwrap(), vec![true]);
        assert_eq!(bus.read_input_registers(6, 1).await.unwrap(), vec![314]);
        bus.write_single_coil(12, true).await.unwrap();
        assert_eq!(controller.coil_writes(), vec![(12, true)]);

        controller.set_failing(6, true);
        let err = bus.read_input_registers(6, 1).await.unwrap_err();
        assert!(matches!(err, BusError::Exception { code: 0x04, .. }));

        bus.close().await.unwrap();
        shutdown_tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), server)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }
}
