//! Owns the UDP endpoint (spec §4.2). A single receive loop reads datagrams
//! and hands `(bytes, source)` to whoever is listening on the channel; the
//! pump itself never parses or routes a frame.

use crate::errors::{Error, ErrorKind, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;

/// MTU-sized send buffer; recv uses the full 64K datagram ceiling (spec §4.2).
pub const SEND_BUFFER_HINT: usize = 1400;
pub const RECV_BUFFER_SIZE: usize = 65535;

pub struct SocketPump {
    socket: Arc<UdpSocket>,
}

/// A small, cloneable capability handle for sending datagrams — the
/// "upward reference replaced by a capability handle" from the spec's
/// Design Notes, so callers deep in the lookup engine don't need a
/// reference back to the pump itself.
#[derive(Clone)]
pub struct OutboundSender {
    socket: Arc<UdpSocket>,
}

impl SocketPump {
    pub async fn bind(addr: SocketAddr) -> Result<SocketPump> {
        let socket = UdpSocket::bind(addr)
            .await
            .map_err(|cause| ErrorKind::BindError { addr, cause })?;
        Ok(SocketPump {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn sender(&self) -> OutboundSender {
        OutboundSender {
            socket: self.socket.clone(),
        }
    }

    /// Runs the receive loop until the socket errors out in a way that
    /// isn't a transient condition, forwarding every datagram on `tx`.
    /// Intended to be spawned as its own task (spec §5: one dedicated
    /// receive thread).
    pub async fn run_recv_loop(&self, tx: mpsc::Sender<(Vec<u8>, SocketAddr)>) {
        let mut buf = vec![0u8; RECV_BUFFER_SIZE];
        loop {
            match self.socket.recv_from(&mut buf).await {
                Ok((len, source)) => {
                    let frame = buf[..len].to_vec();
                    if tx.send((frame, source)).await.is_err() {
                        log::debug!("socket pump receiver dropped, exiting recv loop");
                        return;
                    }
                }
                Err(err) => {
                    // A closed socket or OS-level teardown ends the loop
                    // cleanly; anything else is logged and retried (spec
                    // §4.2 failure modes).
                    log::warn!("recv_from failed: {}", err);
                    if is_fatal(&err) {
                        return;
                    }
                }
            }
        }
    }
}

fn is_fatal(err: &std::io::Error) -> bool {
    matches!(
        err.kind(),
        std::io::ErrorKind::NotConnected | std::io::ErrorKind::BrokenPipe
    )
}

impl OutboundSender {
    /// Fire-and-forget send. Failures are reported to the caller but never
    /// retried at this layer (spec §4.2).
    pub async fn send(&self, bytes: &[u8], destination: SocketAddr) -> Result<()> {
        self.socket
            .send_to(bytes, destination)
            .await
            .map(|_| ())
            .map_err(|cause| Error::from(ErrorKind::SendError { to: destination, cause }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn bind_and_send_round_trip() {
        let a = SocketPump::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b = SocketPump::bind("127.0.0.1:0".parse().unwrap()).await.unwrap();
        let b_addr = b.local_addr().unwrap();

        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(async move {
            b.run_recv_loop(tx).await;
        });

        a.sender().send(b"hello", b_addr).await.unwrap();
        let (frame, _source) = rx.recv().await.unwrap();
        assert_eq!(frame, b"hello");
    }
}
