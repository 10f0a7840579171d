//! Scripted in-memory gateway for driving a real session in tests.
//!
//! Every `connect` the client makes shows up as a [`Server`] on the
//! [`Gateway`]; the test plays the remote side by pushing frames and reading
//! what the client sent back.

#![allow(dead_code)]

use std::time::Duration;

use async_trait::async_trait;
use hearth_client::shared::{CloseCode, GatewayFrame};
use hearth_client::{
    BoxError, Client, ClientConfig, Connector, HeartbeatConfig, ReconnectConfig, SessionState,
    Transport, TransportError,
};
use serde_json::{json, Value};
use tokio::sync::mpsc;

pub const TOKEN: &str = "secret";

/// Something the client put on the wire.
#[derive(Debug, Clone, PartialEq)]
pub enum Sent {
    Frame(Value),
    Close(u16),
    /// The socket stopped accepting writes; this send never completes.
    Stalled,
}

struct StubTransport {
    inbound: mpsc::UnboundedReceiver<Result<String, TransportError>>,
    outbound: mpsc::UnboundedSender<Sent>,
    /// Writes accepted before the socket jams, if it ever does.
    writable: Option<usize>,
}

impl StubTransport {
    async fn jam_if_full(&mut self) {
        if let Some(left) = self.writable.as_mut() {
            if *left == 0 {
                let _ = self.outbound.send(Sent::Stalled);
                std::future::pending::<()>().await;
            }
            *left -= 1;
        }
    }
}

#[async_trait]
impl Transport for StubTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.jam_if_full().await;
        let frame = serde_json::from_str(&text).map_err(|e| TransportError::Io(e.to_string()))?;
        self.outbound
            .send(Sent::Frame(frame))
            .map_err(|_| TransportError::Io("peer gone".into()))
    }

    async fn recv(&mut self) -> Result<String, TransportError> {
        match self.inbound.recv().await {
            Some(result) => result,
            None => Err(TransportError::Closed {
                code: None,
                reason: "peer gone".into(),
            }),
        }
    }

    async fn close(&mut self, code: CloseCode) {
        if self.writable == Some(0) {
            std::future::pending::<()>().await;
        }
        let _ = self.outbound.send(Sent::Close(code.0));
    }
}

struct StubConnector {
    accepted: mpsc::UnboundedSender<Server>,
    writable: Option<usize>,
}

#[async_trait]
impl Connector for StubConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn Transport>, TransportError> {
        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        self.accepted
            .send(Server {
                url: url.to_string(),
                to_client,
                from_client,
            })
            .map_err(|_| TransportError::Connect("gateway gone".into()))?;
        Ok(Box::new(StubTransport {
            inbound,
            outbound,
            writable: self.writable,
        }))
    }
}

pub struct Gateway {
    accepted: mpsc::UnboundedReceiver<Server>,
}

impl Gateway {
    pub async fn accept(&mut self) -> Server {
        tokio::time::timeout(Duration::from_secs(120), self.accepted.recv())
            .await
            .expect("client never connected")
            .expect("connector dropped")
    }

    pub fn try_accept(&mut self) -> Option<Server> {
        self.accepted.try_recv().ok()
    }
}

/// The remote end of one connection.
pub struct Server {
    pub url: String,
    to_client: mpsc::UnboundedSender<Result<String, TransportError>>,
    from_client: mpsc::UnboundedReceiver<Sent>,
}

impl Server {
    pub fn send(&self, frame: GatewayFrame) {
        let _ = self.to_client.send(Ok(frame.to_json()));
    }

    pub fn send_raw(&self, text: &str) {
        let _ = self.to_client.send(Ok(text.to_string()));
    }

    pub fn hello(&self, interval_ms: u64) {
        self.send(GatewayFrame::hello(interval_ms));
    }

    pub fn dispatch(&self, seq: u64, name: &str, data: Value) {
        self.send(GatewayFrame::dispatch(seq, name, data));
    }

    pub fn close(&self, code: u16, reason: &str) {
        let _ = self.to_client.send(Err(TransportError::Closed {
            code: Some(CloseCode(code)),
            reason: reason.to_string(),
        }));
    }

    pub async fn next(&mut self) -> Option<Sent> {
        tokio::time::timeout(Duration::from_secs(120), self.from_client.recv())
            .await
            .ok()
            .flatten()
    }

    /// Payload of the next frame with opcode `op`; heartbeats in between are
    /// skipped.
    pub async fn expect_op(&mut self, op: u8) -> Value {
        loop {
            match self.next().await {
                Some(Sent::Frame(frame)) if frame["op"] == op => return frame["d"].clone(),
                Some(Sent::Frame(frame)) if frame["op"] == 1 => continue,
                other => panic!("expected op {op}, got {other:?}"),
            }
        }
    }

    /// Wait until the client's writes jam, skipping heartbeats.
    pub async fn expect_stall(&mut self) {
        loop {
            match self.next().await {
                Some(Sent::Stalled) => return,
                Some(Sent::Frame(frame)) if frame["op"] == 1 => continue,
                other => panic!("expected a jammed write, got {other:?}"),
            }
        }
    }

    /// Close code of the client's close, skipping heartbeats.
    pub async fn expect_close(&mut self) -> u16 {
        loop {
            match self.next().await {
                Some(Sent::Close(code)) => return code,
                Some(Sent::Frame(frame)) if frame["op"] == 1 => continue,
                other => panic!("expected close, got {other:?}"),
            }
        }
    }
}

pub fn config() -> ClientConfig {
    ClientConfig::new(TOKEN)
        .with_gateway_url("wss://gateway.test/?v=10&encoding=json")
        .with_reconnect(ReconnectConfig {
            initial_delay_ms: 100,
            max_delay_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter: 0.0,
        })
        .with_heartbeat(HeartbeatConfig::default())
}

pub fn harness() -> (Client, Gateway) {
    build_harness(None)
}

/// Every connection jams after accepting `writes` frames.
pub fn jamming_harness(writes: usize) -> (Client, Gateway) {
    build_harness(Some(writes))
}

fn build_harness(writable: Option<usize>) -> (Client, Gateway) {
    let (accepted_tx, accepted) = mpsc::unbounded_channel();
    let client = Client::builder(config())
        .connector(StubConnector {
            accepted: accepted_tx,
            writable,
        })
        .build();
    (client, Gateway { accepted })
}

pub fn ready(session_id: &str, guilds: Value) -> Value {
    json!({
        "v": 10,
        "user": { "id": "1", "username": "hearth", "bot": true },
        "guilds": guilds,
        "session_id": session_id,
        "shard": [0, 1],
    })
}

/// A full guild with one text channel (`{id}1`) and one member (`{id}9`).
pub fn guild(id: &str, name: &str) -> Value {
    json!({
        "id": id,
        "name": name,
        "channels": [{ "id": format!("{id}1"), "type": 0, "name": "general" }],
        "members": [{ "user": { "id": format!("{id}9"), "username": "member" } }],
    })
}

pub async fn wait_state(client: &Client, predicate: impl FnMut(&SessionState) -> bool) {
    let mut states = client.subscribe_state();
    tokio::time::timeout(Duration::from_secs(120), states.wait_for(predicate))
        .await
        .expect("state never reached")
        .map(|_| ())
        .expect("state channel closed");
}

/// Identify and deliver READY with one guild (`10`); returns the live server.
pub async fn connect_ready(client: &Client, gateway: &mut Gateway, heartbeat_ms: u64) -> Server {
    client.connect(false).await.expect("connect");
    let mut server = gateway.accept().await;
    server.hello(heartbeat_ms);
    server.expect_op(2).await;
    server.dispatch(1, "READY", ready("abc", json!([guild("10", "den")])));
    wait_state(client, SessionState::is_ready).await;
    server
}

/// Record `(event name, payload)` for every listed event, in handler order.
pub fn record(client: &Client, names: &[&str]) -> mpsc::UnboundedReceiver<(String, Value)> {
    let (tx, rx) = mpsc::unbounded_channel();
    for name in names {
        let tx = tx.clone();
        client.on(name, move |event| {
            let tx = tx.clone();
            async move {
                tx.send((event.name.clone(), (*event.data).clone()))?;
                Ok::<(), BoxError>(())
            }
        });
    }
    rx
}
