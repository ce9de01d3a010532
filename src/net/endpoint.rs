//! Request/Response Endpoint
//!
//! A minimal application-layer request/response exchange over single
//! UDP datagrams: method + path + short text payload, with a message id
//! for matching responses to requests. Two resources exist:
//!
//! - `PUT /nodes`  — client registers its address with the coordinator
//! - `GET /sensor` — coordinator queries a client's sensor reading
//!
//! Answering a sensor query also signals coordinator liveness to the
//! queried client.
//!
//! Frame layout (pipe-separated, payload is the final field):
//!
//! ```text
//! request:  MESH|1|<mid>|REQ|<METHOD>|<path>|<payload>
//! response: MESH|1|<mid>|RES|<code>|<payload>
//! ```

use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;

use crate::addr::NodeAddr;
use crate::election::{post, Event, Mailbox};
use crate::error::{Error, Result};
use crate::sensor::SharedSensor;

/// Frame prefix
const FRAME_PREFIX: &str = "MESH";

/// Frame version
const FRAME_VERSION: u8 = 1;

/// Registration resource path
const PATH_NODES: &str = "/nodes";

/// Sensor query resource path
const PATH_SENSOR: &str = "/sensor";

/// Shortest parseable address payload ("::1")
const MIN_ADDR_LEN: usize = 3;

/// Receive buffer size; frames are short text
const RECV_BUF_LEN: usize = 256;

/// Response codes, class.detail form
mod code {
    pub const CHANGED: &str = "2.04";
    pub const CONTENT: &str = "2.05";
    pub const BAD_REQUEST: &str = "4.00";
    pub const NOT_FOUND: &str = "4.04";
    pub const INTERNAL: &str = "5.00";

    pub fn is_success(code: &str) -> bool {
        code.starts_with("2.")
    }
}

/// Request methods
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Put,
}

impl Method {
    fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Put => "PUT",
        }
    }

    fn parse(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::Get),
            "PUT" => Some(Method::Put),
            _ => None,
        }
    }
}

/// A parsed request frame
#[derive(Debug, Clone, PartialEq, Eq)]
struct Request {
    mid: u16,
    method: Method,
    path: String,
    payload: String,
}

/// Format a request frame
fn format_request(mid: u16, method: Method, path: &str, payload: &str) -> String {
    format!(
        "{}|{}|{}|REQ|{}|{}|{}",
        FRAME_PREFIX,
        FRAME_VERSION,
        mid,
        method.as_str(),
        path,
        payload
    )
}

/// Parse a request frame
fn parse_request(frame: &str) -> Option<Request> {
    let mut parts = frame.splitn(7, '|');
    if parts.next()? != FRAME_PREFIX {
        return None;
    }
    if parts.next()?.parse::<u8>().ok()? != FRAME_VERSION {
        return None;
    }
    let mid = parts.next()?.parse::<u16>().ok()?;
    if parts.next()? != "REQ" {
        return None;
    }
    let method = Method::parse(parts.next()?)?;
    let path = parts.next()?.to_string();
    let payload = parts.next()?.to_string();

    Some(Request {
        mid,
        method,
        path,
        payload,
    })
}

/// Format a response frame
fn format_response(mid: u16, code: &str, payload: &str) -> String {
    format!(
        "{}|{}|{}|RES|{}|{}",
        FRAME_PREFIX, FRAME_VERSION, mid, code, payload
    )
}

/// Parse a response frame, returning (mid, code, payload)
fn parse_response(frame: &str) -> Option<(u16, String, String)> {
    let mut parts = frame.splitn(6, '|');
    if parts.next()? != FRAME_PREFIX {
        return None;
    }
    if parts.next()?.parse::<u8>().ok()? != FRAME_VERSION {
        return None;
    }
    let mid = parts.next()?.parse::<u16>().ok()?;
    if parts.next()? != "RES" {
        return None;
    }
    let code = parts.next()?.to_string();
    let payload = parts.next()?.to_string();

    Some((mid, code, payload))
}

/// Endpoint server: answers register and sensor-query requests
pub struct EndpointServer {
    socket: UdpSocket,
    sensor: SharedSensor,
    tx: Mailbox,
}

impl EndpointServer {
    /// Bind the endpoint port
    pub async fn bind(port: u16, sensor: SharedSensor, tx: Mailbox) -> Result<Self> {
        let socket = UdpSocket::bind(("::", port)).await.map_err(|e| {
            Error::Network(format!("Failed to bind endpoint port {}: {}", port, e))
        })?;
        tracing::info!("Endpoint listening on port {}", port);
        Ok(Self { socket, sensor, tx })
    }

    /// Serve requests until the mailbox closes
    pub async fn run(self) -> Result<()> {
        let mut buf = [0u8; RECV_BUF_LEN];

        loop {
            let (len, src) = match self.socket.recv_from(&mut buf).await {
                Ok(received) => received,
                Err(e) => {
                    tracing::warn!("Endpoint recv error: {}", e);
                    continue;
                }
            };

            let request = match std::str::from_utf8(&buf[..len]).ok().and_then(parse_request) {
                Some(r) => r,
                None => {
                    tracing::debug!("Dropping malformed request from {}", src);
                    continue;
                }
            };

            tracing::debug!(
                "{} {} from {} ({} byte payload)",
                request.method.as_str(),
                request.path,
                src,
                request.payload.len()
            );

            let (code, payload) = match (request.method, request.path.as_str()) {
                (Method::Put, PATH_NODES) => self.handle_register(&request, src).await?,
                (Method::Get, PATH_SENSOR) => self.handle_sensor_query(src).await?,
                _ => (code::NOT_FOUND, String::new()),
            };

            let response = format_response(request.mid, code, &payload);
            if let Err(e) = self.socket.send_to(response.as_bytes(), src).await {
                tracing::warn!("Endpoint reply to {} failed: {}", src, e);
            }
        }
    }

    /// `PUT /nodes`: deliver the join to the worker, then acknowledge
    async fn handle_register(
        &self,
        request: &Request,
        src: SocketAddr,
    ) -> Result<(&'static str, String)> {
        if request.payload.len() < MIN_ADDR_LEN {
            return Ok((code::BAD_REQUEST, "address too short".to_string()));
        }

        match request.payload.parse::<NodeAddr>() {
            Ok(addr) => {
                post(&self.tx, Event::ClientJoin(addr)).await?;
                Ok((code::CHANGED, String::new()))
            }
            Err(e) => {
                tracing::debug!("Bad register payload from {}: {}", src, e);
                Ok((code::BAD_REQUEST, "unparseable address".to_string()))
            }
        }
    }

    /// `GET /sensor`: read the local sensor and signal coordinator
    /// liveness before replying
    async fn handle_sensor_query(&self, src: SocketAddr) -> Result<(&'static str, String)> {
        // Take the reading before any await; the lock must not be held
        // across suspension points
        let reading = {
            let mut sensor = match self.sensor.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            sensor.read()
        };

        post(&self.tx, Event::CoordinatorHeartbeat).await?;

        match reading {
            Ok(value) => Ok((code::CONTENT, value.to_string())),
            Err(e) => {
                tracing::warn!("Sensor read for query from {} failed: {}", src, e);
                Ok((code::INTERNAL, "sensor unavailable".to_string()))
            }
        }
    }
}

/// Endpoint client: issues register and sensor-query requests
pub struct EndpointClient {
    server_port: u16,
    timeout: Duration,
}

impl EndpointClient {
    /// Create a client targeting the given endpoint port
    pub fn new(server_port: u16, timeout: Duration) -> Self {
        Self {
            server_port,
            timeout,
        }
    }

    /// Register our address with the coordinator
    pub async fn register(&self, coordinator: NodeAddr, own_addr: NodeAddr) -> Result<()> {
        let (code, payload) = self
            .request(coordinator, Method::Put, PATH_NODES, &own_addr.to_string())
            .await?;

        if code::is_success(&code) {
            tracing::debug!("Registered with coordinator {}", coordinator);
            Ok(())
        } else {
            Err(Error::Network(format!(
                "register rejected by {}: {} {}",
                coordinator, code, payload
            )))
        }
    }

    /// Query a client for its sensor reading
    pub async fn query_sensor(&self, client: NodeAddr) -> Result<i16> {
        let (code, payload) = self
            .request(client, Method::Get, PATH_SENSOR, "")
            .await?;

        if !code::is_success(&code) {
            // Diagnostic payload in failure cases; treated as no report
            return Err(Error::Network(format!(
                "query-sensor failed at {}: {} {}",
                client, code, payload
            )));
        }

        payload
            .trim()
            .parse::<i16>()
            .map_err(|_| Error::MalformedPayload {
                source_addr: client.to_string(),
                reason: format!("not a sensor value: {:?}", payload),
            })
    }

    /// One request/response exchange with a fresh ephemeral socket
    async fn request(
        &self,
        target: NodeAddr,
        method: Method,
        path: &str,
        payload: &str,
    ) -> Result<(String, String)> {
        let socket = UdpSocket::bind("[::]:0")
            .await
            .map_err(|e| Error::Network(format!("Failed to bind request socket: {}", e)))?;

        let mid: u16 = rand::random();
        let frame = format_request(mid, method, path, payload);
        let target_addr = SocketAddr::from((target.ip(), self.server_port));

        socket
            .send_to(frame.as_bytes(), target_addr)
            .await
            .map_err(|e| Error::Network(format!("Request send to {} failed: {}", target, e)))?;

        tokio::time::timeout(self.timeout, Self::await_response(&socket, mid))
            .await
            .map_err(|_| Error::RequestTimeout(target.to_string()))?
    }

    async fn await_response(socket: &UdpSocket, mid: u16) -> Result<(String, String)> {
        let mut buf = [0u8; RECV_BUF_LEN];
        loop {
            let (len, src) = socket
                .recv_from(&mut buf)
                .await
                .map_err(|e| Error::Network(format!("Response recv failed: {}", e)))?;

            match std::str::from_utf8(&buf[..len]).ok().and_then(parse_response) {
                Some((resp_mid, code, payload)) if resp_mid == mid => {
                    return Ok((code, payload));
                }
                Some((resp_mid, ..)) => {
                    tracing::debug!("Stale response mid {} from {}", resp_mid, src);
                }
                None => {
                    tracing::debug!("Dropping malformed response from {}", src);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::election::Envelope;
    use crate::sensor::testing::ScriptedSensor;
    use std::sync::{Arc, Mutex};
    use tokio::sync::mpsc;

    #[test]
    fn test_format_parse_request() {
        let frame = format_request(42, Method::Put, "/nodes", "fe80::1");
        let parsed = parse_request(&frame).unwrap();

        assert_eq!(parsed.mid, 42);
        assert_eq!(parsed.method, Method::Put);
        assert_eq!(parsed.path, "/nodes");
        assert_eq!(parsed.payload, "fe80::1");
    }

    #[test]
    fn test_format_parse_response() {
        let frame = format_response(7, code::CONTENT, "-123");
        let (mid, code, payload) = parse_response(&frame).unwrap();

        assert_eq!(mid, 7);
        assert_eq!(code, "2.05");
        assert_eq!(payload, "-123");
    }

    #[test]
    fn test_parse_rejects_wrong_prefix_and_version() {
        assert!(parse_request("NOPE|1|1|REQ|GET|/sensor|").is_none());
        assert!(parse_request("MESH|2|1|REQ|GET|/sensor|").is_none());
        assert!(parse_response("MESH|1|1|REQ|2.05|x").is_none());
        assert!(parse_request("garbage").is_none());
    }

    #[test]
    fn test_empty_payload_round_trip() {
        let frame = format_request(1, Method::Get, "/sensor", "");
        let parsed = parse_request(&frame).unwrap();
        assert_eq!(parsed.payload, "");
    }

    /// Spin up a server on an ephemeral port with a worker that acks
    /// every event, returning the port and the delivered-event log
    async fn test_server(readings: Vec<i16>) -> (u16, mpsc::Receiver<Event>) {
        let sensor: SharedSensor = Arc::new(Mutex::new(ScriptedSensor::new(readings)));
        let (tx, mut rx) = mpsc::channel::<Envelope>(8);
        let (log_tx, log_rx) = mpsc::channel::<Event>(8);

        let server = EndpointServer::bind(0, sensor, tx).await.unwrap();
        let port = server.socket.local_addr().unwrap().port();

        tokio::spawn(async move {
            let _ = server.run().await;
        });
        tokio::spawn(async move {
            while let Some(envelope) = rx.recv().await {
                let _ = log_tx.send(envelope.event).await;
                if let Some(ack) = envelope.ack {
                    let _ = ack.send(());
                }
            }
        });

        (port, log_rx)
    }

    #[tokio::test]
    async fn test_register_round_trip() {
        let (port, mut events) = test_server(vec![0]).await;
        let client = EndpointClient::new(port, Duration::from_secs(2));

        let own: NodeAddr = "fe80::17".parse().unwrap();
        client.register("::1".parse().unwrap(), own).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), Event::ClientJoin(own));
    }

    #[tokio::test]
    async fn test_register_rejects_bad_payload() {
        let (port, mut events) = test_server(vec![0]).await;
        let client = EndpointClient::new(port, Duration::from_secs(2));

        // Drive the raw frame so the payload can be invalid
        let socket = UdpSocket::bind("[::]:0").await.unwrap();
        let frame = format_request(9, Method::Put, "/nodes", "xx");
        socket
            .send_to(frame.as_bytes(), ("::1", port))
            .await
            .unwrap();

        let mut buf = [0u8; RECV_BUF_LEN];
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let (mid, code, _) =
            parse_response(std::str::from_utf8(&buf[..len]).unwrap()).unwrap();
        assert_eq!(mid, 9);
        assert_eq!(code, "4.00");

        // No join event was delivered
        drop(client);
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_sensor_query_replies_and_signals_liveness() {
        let (port, mut events) = test_server(vec![2150]).await;
        let client = EndpointClient::new(port, Duration::from_secs(2));

        let value = client.query_sensor("::1".parse().unwrap()).await.unwrap();
        assert_eq!(value, 2150);
        assert_eq!(events.recv().await.unwrap(), Event::CoordinatorHeartbeat);
    }

    #[tokio::test]
    async fn test_unknown_path_is_not_found() {
        let (port, _events) = test_server(vec![0]).await;

        let socket = UdpSocket::bind("[::]:0").await.unwrap();
        let frame = format_request(3, Method::Get, "/bogus", "");
        socket
            .send_to(frame.as_bytes(), ("::1", port))
            .await
            .unwrap();

        let mut buf = [0u8; RECV_BUF_LEN];
        let (len, _) = socket.recv_from(&mut buf).await.unwrap();
        let (_, code, _) = parse_response(std::str::from_utf8(&buf[..len]).unwrap()).unwrap();
        assert_eq!(code, "4.04");
    }

    #[tokio::test]
    async fn test_query_times_out_without_server() {
        let client = EndpointClient::new(1, Duration::from_millis(50));
        let result = client.query_sensor("::1".parse().unwrap()).await;
        assert!(matches!(result, Err(Error::RequestTimeout(_))));
    }
}
