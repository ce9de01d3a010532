//! Network Module
//!
//! The two best-effort multicast channels and the request/response
//! endpoint the election core talks through, plus local address
//! detection at startup.

pub mod broadcast;
pub mod endpoint;

pub use broadcast::{spawn_announce_listener, watch_aggregates, Broadcaster};
pub use endpoint::{EndpointClient, EndpointServer};

use std::net::SocketAddr;
use tokio::net::UdpSocket;

use crate::addr::NodeAddr;
use crate::config::MeshConfig;
use crate::error::{Error, Result};

/// Determine this node's own address
///
/// Uses the configured override when present, otherwise probes with a
/// connected UDP socket and reads back the chosen source address. A
/// failure here aborts startup; the election core never runs without an
/// identity.
pub async fn local_address(config: &MeshConfig) -> Result<NodeAddr> {
    if let Some(addr) = config.node.address {
        return Ok(NodeAddr(addr));
    }

    let group_target = SocketAddr::from((config.broadcast.group, config.broadcast.announce_port));
    if let Some(addr) = probe(group_target).await {
        return Ok(addr);
    }

    // No route toward the multicast group; try a global target
    let fallback: SocketAddr = "[2001:4860:4860::8888]:53"
        .parse()
        .map_err(|e| Error::Internal(format!("bad fallback probe target: {}", e)))?;
    if let Some(addr) = probe(fallback).await {
        return Ok(addr);
    }

    Err(Error::LocalAddress(
        "no usable IPv6 source address; set node.address in the configuration".into(),
    ))
}

async fn probe(target: SocketAddr) -> Option<NodeAddr> {
    let socket = UdpSocket::bind("[::]:0").await.ok()?;
    socket.connect(target).await.ok()?;
    match socket.local_addr().ok()? {
        SocketAddr::V6(local) if !local.ip().is_unspecified() => Some(NodeAddr(*local.ip())),
        _ => None,
    }
}
