//! Multicast Broadcast Channels
//!
//! Channel A carries identity announces (payload: the sender's address
//! in canonical string form), channel B carries published aggregate
//! values (payload: decimal signed 16-bit). Both are best-effort,
//! group-addressed datagrams on well-known ports.

use std::net::SocketAddr;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;

use crate::addr::NodeAddr;
use crate::config::BroadcastConfig;
use crate::election::{post, Event, Mailbox};
use crate::error::{Error, Result};

/// Receive buffer size; payloads are short text
const RECV_BUF_LEN: usize = 128;

/// Outbound side of both broadcast channels
pub struct Broadcaster {
    socket: UdpSocket,
    announce_target: SocketAddr,
    aggregate_target: SocketAddr,
    own_addr: NodeAddr,
}

impl Broadcaster {
    /// Create the sender socket for both channels
    pub async fn new(config: &BroadcastConfig, own_addr: NodeAddr) -> Result<Self> {
        let socket = UdpSocket::bind("[::]:0")
            .await
            .map_err(|e| Error::Network(format!("Failed to bind broadcast socket: {}", e)))?;

        Ok(Self {
            socket,
            announce_target: SocketAddr::from((config.group, config.announce_port)),
            aggregate_target: SocketAddr::from((config.group, config.aggregate_port)),
            own_addr,
        })
    }

    /// Announce our own address on the identity channel
    pub async fn announce(&self) -> Result<()> {
        let payload = self.own_addr.to_string();
        self.socket
            .send_to(payload.as_bytes(), self.announce_target)
            .await
            .map_err(|e| Error::Network(format!("Announce send failed: {}", e)))?;
        tracing::trace!("Announced {} on {}", payload, self.announce_target);
        Ok(())
    }

    /// Publish an aggregate value on the sensor channel
    pub async fn publish(&self, value: i16) -> Result<()> {
        let payload = value.to_string();
        self.socket
            .send_to(payload.as_bytes(), self.aggregate_target)
            .await
            .map_err(|e| Error::Network(format!("Aggregate publish failed: {}", e)))?;
        tracing::trace!("Published aggregate {} on {}", value, self.aggregate_target);
        Ok(())
    }
}

/// Start the announce listener task
///
/// Parses each datagram as a node address and delivers it as a
/// `PeerBroadcast` event, blocking on the worker's ack before reading
/// the next datagram. Our own announces and unparseable payloads are
/// dropped.
pub async fn spawn_announce_listener(
    config: &BroadcastConfig,
    own_addr: NodeAddr,
    tx: Mailbox,
) -> Result<JoinHandle<()>> {
    let socket = UdpSocket::bind(("::", config.announce_port))
        .await
        .map_err(|e| {
            Error::Network(format!(
                "Failed to bind announce port {}: {}",
                config.announce_port, e
            ))
        })?;
    socket
        .join_multicast_v6(&config.group, 0)
        .map_err(|e| Error::Network(format!("Failed to join group {}: {}", config.group, e)))?;

    tracing::info!(
        "Announce listener joined {} on port {}",
        config.group,
        config.announce_port
    );

    Ok(tokio::spawn(async move {
        listen_loop(socket, own_addr, tx).await;
    }))
}

async fn listen_loop(socket: UdpSocket, own_addr: NodeAddr, tx: Mailbox) {
    let mut buf = [0u8; RECV_BUF_LEN];

    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("Announce recv error: {}", e);
                continue;
            }
        };

        let text = match std::str::from_utf8(&buf[..len]) {
            Ok(s) => s,
            Err(_) => {
                tracing::debug!("Dropping non-UTF-8 announce from {}", src);
                continue;
            }
        };

        match text.parse::<NodeAddr>() {
            Ok(addr) if addr == own_addr => {
                // Our own announce looped back
                continue;
            }
            Ok(addr) => {
                tracing::trace!("Peer announce {} from {}", addr, src);
                if post(&tx, Event::PeerBroadcast(addr)).await.is_err() {
                    break;
                }
            }
            Err(e) => {
                tracing::debug!("Dropping malformed announce from {}: {}", src, e);
            }
        }
    }
}

/// Join the aggregate channel and print published values until the
/// caller stops us; a diagnostic tool, not part of the election core
pub async fn watch_aggregates(config: &BroadcastConfig) -> Result<()> {
    let socket = UdpSocket::bind(("::", config.aggregate_port))
        .await
        .map_err(|e| {
            Error::Network(format!(
                "Failed to bind aggregate port {}: {}",
                config.aggregate_port, e
            ))
        })?;
    socket
        .join_multicast_v6(&config.group, 0)
        .map_err(|e| Error::Network(format!("Failed to join group {}: {}", config.group, e)))?;

    println!(
        "Watching aggregate channel {} port {}...",
        config.group, config.aggregate_port
    );

    let mut buf = [0u8; RECV_BUF_LEN];
    loop {
        let (len, src) = match socket.recv_from(&mut buf).await {
            Ok(received) => received,
            Err(e) => {
                tracing::warn!("Aggregate recv error: {}", e);
                continue;
            }
        };

        match std::str::from_utf8(&buf[..len])
            .ok()
            .and_then(|s| s.trim().parse::<i16>().ok())
        {
            Some(value) => {
                let ip = src.ip();
                println!("{}  aggregate={}  ({:.2} C)", ip, value, value as f64 / 100.0);
            }
            None => tracing::debug!("Dropping malformed aggregate from {}", src),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::Envelope;
    use tokio::sync::mpsc;

    fn test_config(announce_port: u16, aggregate_port: u16) -> BroadcastConfig {
        BroadcastConfig {
            group: "ff15::2409".parse().unwrap(),
            announce_port,
            aggregate_port,
        }
    }

    #[tokio::test]
    async fn test_broadcaster_binds() {
        let config = test_config(0, 0);
        let own: NodeAddr = "fe80::1".parse().unwrap();
        // Port 0 targets are never sent to in this test; only bind matters
        assert!(Broadcaster::new(&config, own).await.is_ok());
    }

    #[tokio::test]
    async fn test_listener_drops_malformed_and_own_announces() {
        // Loop datagrams through a plain local socket pair instead of a
        // multicast group so the test runs on hosts without v6 multicast
        let own: NodeAddr = "fe80::aa".parse().unwrap();
        let listener = UdpSocket::bind("[::1]:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();
        let (tx, mut rx) = mpsc::channel::<Envelope>(8);

        tokio::spawn(async move {
            listen_loop(listener, own, tx).await;
        });

        let sender = UdpSocket::bind("[::1]:0").await.unwrap();
        sender.send_to(b"garbage", listen_addr).await.unwrap();
        sender.send_to(b"fe80::aa", listen_addr).await.unwrap();
        sender.send_to(b"fe80::bb", listen_addr).await.unwrap();

        // Only the foreign well-formed announce arrives
        let envelope = rx.recv().await.unwrap();
        assert_eq!(
            envelope.event,
            Event::PeerBroadcast("fe80::bb".parse().unwrap())
        );
        if let Some(ack) = envelope.ack {
            ack.send(()).unwrap();
        }
        assert!(rx.try_recv().is_err());
    }
}
