//! The session task: one per `connect`, owning the transport.
//!
//! Heartbeat timer, inbound frames, outbound commands and the close signal
//! are multiplexed in a single `select!`, so events are handled strictly one
//! at a time and only one place ever decides that a connection is dead.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use hearth_shared::{
    event_name, ClientCommand, CloseCode, Identify, ProtocolError, Ready, Resume,
    ServerFrame, Snowflake, GATEWAY_VERSION,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Deserialize;
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::events::apply_event;
use super::heartbeat::{Beat, Heartbeater, LatencyGauge};
use super::transport::{Connector, Transport};
use super::{Session, SessionState};
use crate::cache::EntityCache;
use crate::config::ClientConfig;
use crate::dispatch::Dispatcher;
use crate::error::{ClientError, TransportError};

/// State the session task shares with the client facade.
#[derive(Debug)]
pub(crate) struct SessionShared {
    pub cache: EntityCache,
    pub dispatcher: Arc<Dispatcher>,
    pub latency: LatencyGauge,
    pub state: watch::Sender<SessionState>,
    pub session: Mutex<Option<Session>>,
    /// Set on the first READY or RESUMED after `connect`; survives reconnects.
    pub ready_once: AtomicBool,
}

impl SessionShared {
    pub fn new() -> Self {
        Self {
            cache: EntityCache::new(),
            dispatcher: Arc::new(Dispatcher::new()),
            latency: LatencyGauge::default(),
            state: watch::Sender::new(SessionState::Disconnected),
            session: Mutex::new(None),
            ready_once: AtomicBool::new(false),
        }
    }

    pub fn set_state(&self, state: SessionState) {
        tracing::info!(?state, "session state");
        self.state.send_replace(state);
    }

    pub fn state(&self) -> SessionState {
        self.state.borrow().clone()
    }
}

/// Longest wait for the closing handshake once a connection is finished.
const CLOSE_GRACE: Duration = Duration::from_secs(5);

/// How a connection ended.
#[derive(Debug)]
enum Exit {
    Reconnect {
        resume: bool,
        delay: Option<Duration>,
    },
    Cancelled,
    Fatal {
        code: CloseCode,
        reason: String,
    },
}

/// READY arrived but some of its guilds were unavailable.
struct PendingGuilds {
    remaining: HashSet<Snowflake>,
    deadline: Instant,
    ready: Value,
}

/// Per-connection bookkeeping.
struct Connection {
    seq: Option<u64>,
    pending: Option<PendingGuilds>,
    reached_ready: bool,
}

/// Why an outbound frame did not go out.
enum SendFailure {
    Cancelled,
    Transport(TransportError),
}

enum Wake {
    Cancelled,
    Heartbeat,
    GuildTimeout,
    Command(ClientCommand),
    Frame(Result<String, TransportError>),
}

pub(crate) struct SessionRunner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    shared: Arc<SessionShared>,
    commands: mpsc::UnboundedReceiver<ClientCommand>,
    cancel: CancellationToken,
    rng: StdRng,
}

impl SessionRunner {
    pub fn new(
        config: ClientConfig,
        connector: Arc<dyn Connector>,
        shared: Arc<SessionShared>,
        commands: mpsc::UnboundedReceiver<ClientCommand>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            config,
            connector,
            shared,
            commands,
            cancel,
            rng: StdRng::from_entropy(),
        }
    }

    /// Keep a session alive until it is cancelled or the gateway ends it for
    /// good.
    pub async fn run(mut self, resume: bool) -> Result<(), ClientError> {
        let mut resume = resume;
        let mut attempt = 0u32;

        loop {
            let (exit, reached_ready) = self.connect_once(resume).await;
            if reached_ready {
                attempt = 0;
            }

            match exit {
                Exit::Cancelled => {
                    self.shared.set_state(SessionState::Closed);
                    return Ok(());
                }
                Exit::Fatal { code, reason } => {
                    let error = ClientError::from_fatal_close(code, &reason);
                    tracing::error!(code = code.0, %error, "gateway ended the session");
                    self.shared.session.lock().take();
                    self.shared.set_state(SessionState::Failed {
                        code: code.0,
                        reason,
                    });
                    return Err(error);
                }
                Exit::Reconnect {
                    resume: next_resume,
                    delay,
                } => {
                    if !next_resume {
                        self.shared.session.lock().take();
                    }
                    resume = next_resume;
                    attempt += 1;
                    self.shared.set_state(SessionState::Reconnecting { attempt });

                    let delay = delay.unwrap_or_else(|| {
                        self.config
                            .reconnect
                            .jittered_delay(attempt - 1, &mut self.rng)
                    });
                    tracing::info!(attempt, ?delay, resume, "reconnecting");
                    tokio::select! {
                        _ = self.cancel.cancelled() => {
                            self.shared.set_state(SessionState::Closed);
                            return Ok(());
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    async fn connect_once(&mut self, resume: bool) -> (Exit, bool) {
        let session = if resume {
            self.shared.session.lock().clone()
        } else {
            None
        };
        let url = session
            .as_ref()
            .and_then(|s| s.resume_url.as_deref())
            .map(with_gateway_query)
            .unwrap_or_else(|| self.config.gateway_url.clone());

        let cancel = self.cancel.clone();
        let connected = tokio::select! {
            _ = cancel.cancelled() => return (Exit::Cancelled, false),
            connected = self.connector.connect(&url) => connected,
        };
        let mut transport = match connected {
            Ok(transport) => transport,
            Err(e) => {
                tracing::warn!(error = %e, %url, "gateway connect failed");
                return (
                    Exit::Reconnect {
                        resume,
                        delay: None,
                    },
                    false,
                );
            }
        };

        let mut conn = Connection {
            seq: None,
            pending: None,
            reached_ready: false,
        };
        let exit = self.drive(transport.as_mut(), session, &mut conn).await;

        let code = match &exit {
            Exit::Reconnect { resume: true, .. } => Some(CloseCode::UNKNOWN_ERROR),
            Exit::Reconnect { resume: false, .. } | Exit::Cancelled => Some(CloseCode::NORMAL),
            Exit::Fatal { .. } => None,
        };
        if let Some(code) = code {
            if tokio::time::timeout(CLOSE_GRACE, transport.close(code))
                .await
                .is_err()
            {
                tracing::warn!(code = code.0, "closing handshake stalled; dropping transport");
            }
        }
        (exit, conn.reached_ready)
    }

    async fn drive(
        &mut self,
        transport: &mut dyn Transport,
        session: Option<Session>,
        conn: &mut Connection,
    ) -> Exit {
        let cancel = self.cancel.clone();
        let can_resume = session.is_some();

        let hello = tokio::select! {
            _ = cancel.cancelled() => return Exit::Cancelled,
            hello = tokio::time::timeout(self.config.heartbeat.hello_timeout, transport.recv()) => hello,
        };
        let interval = match hello {
            Err(_) => {
                let err = ProtocolError::HelloTimeout(self.config.heartbeat.hello_timeout);
                tracing::warn!(error = %err, "dropping connection");
                return Exit::Reconnect {
                    resume: can_resume,
                    delay: None,
                };
            }
            Ok(Err(e)) => return self.transport_lost(e, can_resume),
            Ok(Ok(text)) => match ServerFrame::decode(&text) {
                Ok(ServerFrame::Hello {
                    heartbeat_interval_ms,
                }) => Duration::from_millis(heartbeat_interval_ms),
                Ok(other) => {
                    tracing::warn!(frame = ?other, "expected HELLO");
                    return Exit::Reconnect {
                        resume: can_resume,
                        delay: None,
                    };
                }
                Err(e) => {
                    tracing::warn!(error = %e, "undecodable HELLO");
                    return Exit::Reconnect {
                        resume: can_resume,
                        delay: None,
                    };
                }
            },
        };
        tracing::debug!(?interval, "HELLO");

        let mut heartbeater = Heartbeater::new(
            interval,
            self.config.heartbeat.max_missed_acks,
            &mut self.rng,
        );

        let handshake = match session {
            Some(session) => {
                conn.seq = session.sequence;
                self.shared.set_state(SessionState::Resuming);
                ClientCommand::Resume(Resume {
                    token: self.config.token.clone(),
                    session_id: session.session_id,
                    seq: session.sequence,
                })
            }
            None => {
                self.shared.set_state(SessionState::Identifying);
                ClientCommand::Identify(self.identify())
            }
        };
        if let Err(failure) = self.send(transport, &handshake, interval).await {
            return self.send_failed(failure, can_resume);
        }

        loop {
            let accepting = self.shared.state.borrow().is_connected();
            let guild_deadline = conn.pending.as_ref().map(|p| p.deadline);

            let wake = tokio::select! {
                biased;
                _ = cancel.cancelled() => Wake::Cancelled,
                _ = tokio::time::sleep_until(heartbeater.next_tick()) => Wake::Heartbeat,
                _ = sleep_until_opt(guild_deadline) => Wake::GuildTimeout,
                Some(cmd) = self.commands.recv(), if accepting => Wake::Command(cmd),
                frame = transport.recv() => Wake::Frame(frame),
            };

            match wake {
                Wake::Cancelled => return Exit::Cancelled,
                Wake::Heartbeat => match heartbeater.tick(Instant::now()) {
                    Beat::Zombie => {
                        tracing::warn!(
                            missed = heartbeater.missed(),
                            interval = ?heartbeater.interval(),
                            "heartbeat not acknowledged; connection is a zombie"
                        );
                        return Exit::Reconnect {
                            resume: true,
                            delay: None,
                        };
                    }
                    Beat::Send => {
                        let beat = ClientCommand::Heartbeat { seq: conn.seq };
                        if let Err(failure) = self.send(transport, &beat, interval).await {
                            return self.send_failed(failure, true);
                        }
                    }
                },
                Wake::GuildTimeout => {
                    if let Some(pending) = conn.pending.take() {
                        tracing::warn!(
                            missing = pending.remaining.len(),
                            "guilds did not arrive in time; ready anyway"
                        );
                        self.enter_ready(conn, pending.ready);
                    }
                }
                Wake::Command(cmd) => {
                    tracing::debug!(op = ?cmd.opcode(), "sending command");
                    if let Err(failure) = self.send(transport, &cmd, interval).await {
                        return self.send_failed(failure, true);
                    }
                }
                Wake::Frame(Err(e)) => {
                    let can_resume = self.shared.session.lock().is_some();
                    return self.transport_lost(e, can_resume);
                }
                Wake::Frame(Ok(text)) => {
                    if let Some(exit) = self
                        .handle_frame(transport, &text, conn, &mut heartbeater)
                        .await
                    {
                        return exit;
                    }
                }
            }
        }
    }

    async fn handle_frame(
        &mut self,
        transport: &mut dyn Transport,
        text: &str,
        conn: &mut Connection,
        heartbeater: &mut Heartbeater,
    ) -> Option<Exit> {
        let frame = match ServerFrame::decode(text) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::warn!(error = %e, "dropping frame");
                return None;
            }
        };

        match frame {
            ServerFrame::Dispatch { seq, name, data } => self.handle_dispatch(seq, name, data, conn),
            ServerFrame::HeartbeatAck => {
                if let Some(rtt) = heartbeater.ack(Instant::now()) {
                    tracing::trace!(?rtt, "heartbeat acknowledged");
                    self.shared.latency.record(rtt);
                }
                None
            }
            ServerFrame::Heartbeat => {
                heartbeater.sent(Instant::now());
                let beat = ClientCommand::Heartbeat { seq: conn.seq };
                match self.send(transport, &beat, heartbeater.interval()).await {
                    Ok(()) => None,
                    Err(failure) => Some(self.send_failed(failure, true)),
                }
            }
            ServerFrame::Reconnect => {
                tracing::info!("gateway requested a reconnect");
                Some(Exit::Reconnect {
                    resume: true,
                    delay: None,
                })
            }
            ServerFrame::InvalidSession { resumable } => {
                let (low, high) = self.config.heartbeat.invalid_session_delay;
                let delay = if high > low {
                    self.rng.gen_range(low..=high)
                } else {
                    low
                };
                tracing::warn!(resumable, ?delay, "session invalidated");
                Some(Exit::Reconnect {
                    resume: resumable,
                    delay: Some(delay),
                })
            }
            ServerFrame::Hello { .. } => {
                tracing::debug!("ignoring repeated HELLO");
                None
            }
        }
    }

    /// Cache first, then waiters and handlers.
    fn handle_dispatch(
        &mut self,
        seq: u64,
        name: String,
        data: Value,
        conn: &mut Connection,
    ) -> Option<Exit> {
        if let Some(last) = conn.seq {
            if seq < last {
                let err = ProtocolError::SequenceRegression {
                    last,
                    received: seq,
                };
                tracing::error!(error = %err, "discarding session");
                return Some(Exit::Reconnect {
                    resume: false,
                    delay: None,
                });
            }
        }
        conn.seq = Some(seq);
        if let Some(session) = self.shared.session.lock().as_mut() {
            session.sequence = Some(seq);
        }
        tracing::trace!(seq, event = %name, "dispatch");

        match name.as_str() {
            "READY" => self.handle_ready(seq, data, conn),
            "RESUMED" => {
                conn.reached_ready = true;
                self.shared.ready_once.store(true, Ordering::Release);
                self.shared.set_state(SessionState::Ready);
                self.shared.dispatcher.dispatch("resumed", data);
            }
            _ => {
                if let Err(e) = apply_event(&self.shared.cache, &name, &data) {
                    tracing::warn!(event = %name, error = %e, "dropping malformed event");
                    return None;
                }

                let mut guilds_done = false;
                if name == "GUILD_CREATE" {
                    if let Some(pending) = conn.pending.as_mut() {
                        if let Some(id) = data.get("id").and_then(|id| Snowflake::deserialize(id).ok()) {
                            pending.remaining.remove(&id);
                        }
                        guilds_done = pending.remaining.is_empty();
                    }
                }

                self.shared.dispatcher.dispatch(&event_name(&name), data);

                if guilds_done {
                    if let Some(pending) = conn.pending.take() {
                        self.enter_ready(conn, pending.ready);
                    }
                }
            }
        }
        None
    }

    fn handle_ready(&mut self, seq: u64, data: Value, conn: &mut Connection) {
        let ready = match Ready::deserialize(&data) {
            Ok(ready) => ready,
            Err(e) => {
                tracing::warn!(error = %e, "dropping malformed READY");
                return;
            }
        };
        tracing::info!(
            session_id = %ready.session_id,
            user = %ready.user.username,
            guilds = ready.guilds.len(),
            "READY"
        );

        *self.shared.session.lock() = Some(Session {
            session_id: ready.session_id,
            sequence: Some(seq),
            resume_url: ready.resume_gateway_url,
            shard: ready
                .shard
                .unwrap_or([self.config.shard_id, self.config.shard_count]),
        });

        let remaining: HashSet<Snowflake> = ready
            .guilds
            .iter()
            .filter(|g| g.guild.unavailable)
            .map(|g| g.guild.id)
            .collect();
        self.shared.cache.apply_snapshot(ready.user, ready.guilds);

        if remaining.is_empty() {
            self.enter_ready(conn, data);
        } else {
            self.shared.set_state(SessionState::AwaitingSnapshot);
            conn.pending = Some(PendingGuilds {
                remaining,
                deadline: Instant::now() + self.config.heartbeat.guild_ready_timeout,
                ready: data,
            });
        }
    }

    fn enter_ready(&self, conn: &mut Connection, ready: Value) {
        conn.reached_ready = true;
        self.shared.ready_once.store(true, Ordering::Release);
        self.shared.set_state(SessionState::Ready);
        self.shared.dispatcher.dispatch("ready", ready);
    }

    fn identify(&self) -> Identify {
        Identify {
            token: self.config.token.clone(),
            intents: self.config.intents,
            shard: [self.config.shard_id, self.config.shard_count],
            properties: self.config.properties.clone(),
            large_threshold: self.config.large_threshold,
            presence: self.config.initial_presence.clone(),
        }
    }

    /// Send one command. The send gives way to `close()` and may take at
    /// most `limit`; a socket that stalls longer is treated as lost.
    async fn send(
        &self,
        transport: &mut dyn Transport,
        command: &ClientCommand,
        limit: Duration,
    ) -> Result<(), SendFailure> {
        let text = match command.encode() {
            Ok(text) => text,
            Err(e) => {
                tracing::error!(op = ?command.opcode(), error = %e, "failed to encode command");
                return Ok(());
            }
        };
        tokio::select! {
            _ = self.cancel.cancelled() => Err(SendFailure::Cancelled),
            sent = tokio::time::timeout(limit, transport.send(text)) => match sent {
                Ok(result) => result.map_err(SendFailure::Transport),
                Err(_) => Err(SendFailure::Transport(TransportError::Io(format!(
                    "send stalled for {limit:?}"
                )))),
            },
        }
    }

    fn send_failed(&self, failure: SendFailure, can_resume: bool) -> Exit {
        match failure {
            SendFailure::Cancelled => Exit::Cancelled,
            SendFailure::Transport(e) => self.transport_lost(e, can_resume),
        }
    }

    fn transport_lost(&self, err: TransportError, can_resume: bool) -> Exit {
        match err {
            TransportError::Closed {
                code: Some(code),
                reason,
            } if code.is_fatal() => Exit::Fatal { code, reason },
            TransportError::Closed {
                code: Some(code),
                reason,
            } => {
                tracing::warn!(code = code.0, %reason, "gateway closed the connection");
                Exit::Reconnect {
                    resume: can_resume && code.is_resumable(),
                    delay: None,
                }
            }
            other => {
                tracing::warn!(error = %other, "connection lost");
                Exit::Reconnect {
                    resume: can_resume,
                    delay: None,
                }
            }
        }
    }
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// Resume URLs come bare; the gateway still wants version and encoding.
fn with_gateway_query(url: &str) -> String {
    if url.contains('?') {
        url.to_string()
    } else {
        format!(
            "{}/?v={GATEWAY_VERSION}&encoding=json",
            url.trim_end_matches('/')
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resume_url_gets_query() {
        assert_eq!(
            with_gateway_query("wss://resume.example"),
            "wss://resume.example/?v=10&encoding=json"
        );
        assert_eq!(
            with_gateway_query("wss://resume.example/?v=10"),
            "wss://resume.example/?v=10"
        );
    }
}
