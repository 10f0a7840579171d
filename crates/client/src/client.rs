//! The public client: owns one gateway session, its cache and its handlers.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use hearth_shared::{
    Activity, AppInfo, Channel, ClientCommand, CloseCode, CreateGuildRequest, Emoji, Guild,
    Invite, PresenceUpdate, RequestGuildMembers, Snowflake, Status, Template, User, UserProfile,
    VoiceSession, VoiceStateUpdate, Webhook,
};
use serde_json::Value;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::api_client::{ApiClient, RestTransport};
use crate::config::ClientConfig;
use crate::dispatch::{Event, HandlerFailure};
use crate::error::{BoxError, ClientError};
use crate::gateway::{Connector, Session, SessionRunner, SessionShared, SessionState, WsConnector};

struct RunHandle {
    task: JoinHandle<Result<(), ClientError>>,
    cancel: CancellationToken,
}

struct ClientInner {
    config: ClientConfig,
    connector: Arc<dyn Connector>,
    rest: Arc<dyn RestTransport>,
    shared: Arc<SessionShared>,
    run: tokio::sync::Mutex<Option<RunHandle>>,
    commands: parking_lot::Mutex<Option<mpsc::UnboundedSender<ClientCommand>>>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        if let Some(handle) = self.run.get_mut().take() {
            handle.cancel.cancel();
        }
    }
}

/// Builds a [`Client`], optionally with custom transports.
pub struct ClientBuilder {
    config: ClientConfig,
    connector: Option<Arc<dyn Connector>>,
    rest: Option<Arc<dyn RestTransport>>,
}

impl ClientBuilder {
    pub fn connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Some(Arc::new(connector));
        self
    }

    pub fn rest(mut self, rest: impl RestTransport + 'static) -> Self {
        self.rest = Some(Arc::new(rest));
        self
    }

    pub fn build(self) -> Client {
        let rest = self.rest.unwrap_or_else(|| {
            Arc::new(ApiClient::new(
                self.config.api_url.clone(),
                self.config.token.clone(),
            ))
        });
        Client {
            inner: Arc::new(ClientInner {
                connector: self.connector.unwrap_or_else(|| Arc::new(WsConnector)),
                rest,
                config: self.config,
                shared: Arc::new(SessionShared::new()),
                run: tokio::sync::Mutex::new(None),
                commands: parking_lot::Mutex::new(None),
            }),
        }
    }
}

/// Handle to one gateway session. Cheap to clone; clones share everything.
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("state", &self.state())
            .field("shard", &[self.inner.config.shard_id, self.inner.config.shard_count])
            .finish()
    }
}

impl Client {
    pub fn new(config: ClientConfig) -> Self {
        Self::builder(config).build()
    }

    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder {
            config,
            connector: None,
            rest: None,
        }
    }

    pub fn config(&self) -> &ClientConfig {
        &self.inner.config
    }

    // --- Lifecycle ---

    /// Start the session task. With `resume` and a stored session, the
    /// first handshake is RESUME; otherwise IDENTIFY.
    ///
    /// Returns once the task is running. A session that is already running
    /// is left alone.
    pub async fn connect(&self, resume: bool) -> Result<(), ClientError> {
        self.inner.config.validate()?;

        let mut run = self.inner.run.lock().await;
        if run.as_ref().is_some_and(|h| !h.task.is_finished()) {
            tracing::debug!("session already running");
            return Ok(());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        *self.inner.commands.lock() = Some(tx);
        let cancel = CancellationToken::new();
        self.inner.shared.latency.reset();
        self.inner.shared.ready_once.store(false, Ordering::Release);
        self.inner.shared.set_state(SessionState::Disconnected);

        let runner = SessionRunner::new(
            self.inner.config.clone(),
            Arc::clone(&self.inner.connector),
            Arc::clone(&self.inner.shared),
            rx,
            cancel.clone(),
        );
        let task = tokio::spawn(runner.run(resume));
        *run = Some(RunHandle { task, cancel });
        Ok(())
    }

    /// Connect, then wait until the session ends.
    pub async fn run(&self) -> Result<(), ClientError> {
        self.connect(true).await?;
        self.wait_closed().await
    }

    /// Wait until the running session is closed or fails. Returns the fatal
    /// error if the gateway ended it.
    pub async fn wait_closed(&self) -> Result<(), ClientError> {
        let running = self
            .inner
            .run
            .lock()
            .await
            .as_ref()
            .is_some_and(|h| !h.task.is_finished());

        let mut rx = self.inner.shared.state.subscribe();
        let state = if running {
            rx.wait_for(SessionState::is_terminal)
                .await
                .map(|s| s.clone())
                .unwrap_or(SessionState::Closed)
        } else {
            self.state()
        };

        match state {
            SessionState::Failed { code, reason } => {
                Err(ClientError::from_fatal_close(CloseCode(code), &reason))
            }
            _ => Ok(()),
        }
    }

    /// Stop the session from any state: pending waits fail with
    /// [`ClientError::Cancelled`], the transport is closed and the stored
    /// session is forgotten, so the next `connect` identifies afresh.
    pub async fn close(&self) {
        self.inner.shared.dispatcher.cancel_all();
        *self.inner.commands.lock() = None;

        let handle = self.inner.run.lock().await.take();
        if let Some(handle) = handle {
            handle.cancel.cancel();
            match handle.task.await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!(error = %e, "session had already ended"),
                Err(e) => tracing::warn!(error = %e, "session task did not finish cleanly"),
            }
        }

        self.inner.shared.session.lock().take();
        if self.state() != SessionState::Closed {
            self.inner.shared.set_state(SessionState::Closed);
        }
    }

    // --- State ---

    /// Current session state.
    pub fn state(&self) -> SessionState {
        self.inner.shared.state()
    }

    /// Receiver that observes every state transition.
    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.inner.shared.state.subscribe()
    }

    /// Whether the session has reached `Ready` at least once since the last
    /// [`connect`](Self::connect). Stays true through reconnects.
    pub fn is_ready(&self) -> bool {
        self.inner.shared.ready_once.load(Ordering::Acquire)
    }

    /// Last heartbeat round trip.
    pub fn latency(&self) -> Option<Duration> {
        self.inner.shared.latency.get()
    }

    /// Resume data of the current session, if any.
    pub fn session(&self) -> Option<Session> {
        self.inner.shared.session.lock().clone()
    }

    // --- Cache ---

    /// The logged-in user; [`ClientError::NotReady`] before READY.
    pub fn current_user(&self) -> Result<User, ClientError> {
        self.inner
            .shared
            .cache
            .current_user()
            .ok_or(ClientError::NotReady)
    }

    /// Snapshot of every cached guild, in arrival order.
    pub fn guilds(&self) -> Vec<Guild> {
        self.inner.shared.cache.list()
    }

    /// Snapshot of every cached user.
    pub fn users(&self) -> Vec<User> {
        self.inner.shared.cache.list()
    }

    /// Snapshot of every cached channel, guild and private alike.
    pub fn channels(&self) -> Vec<Channel> {
        self.inner.shared.cache.list()
    }

    /// Snapshot of every cached emoji.
    pub fn emojis(&self) -> Vec<Emoji> {
        self.inner.shared.cache.list()
    }

    /// The current user's voice presence in each guild.
    pub fn voice_sessions(&self) -> Vec<VoiceSession> {
        self.inner.shared.cache.list()
    }

    /// Look up one guild.
    pub fn get_guild(&self, id: Snowflake) -> Option<Guild> {
        self.inner.shared.cache.get(id)
    }

    /// Look up one user.
    pub fn get_user(&self, id: Snowflake) -> Option<User> {
        self.inner.shared.cache.get(id)
    }

    /// Look up one channel.
    pub fn get_channel(&self, id: Snowflake) -> Option<Channel> {
        self.inner.shared.cache.get(id)
    }

    /// Look up one emoji.
    pub fn get_emoji(&self, id: Snowflake) -> Option<Emoji> {
        self.inner.shared.cache.get(id)
    }

    /// Voice sessions are keyed by guild.
    pub fn get_voice_session(&self, guild_id: Snowflake) -> Option<VoiceSession> {
        self.inner.shared.cache.get(guild_id)
    }

    /// Cached members of a guild.
    pub fn members(&self, guild_id: Snowflake) -> Vec<User> {
        self.inner.shared.cache.members(guild_id)
    }

    /// Channels belonging to a guild.
    pub fn guild_channels(&self, guild_id: Snowflake) -> Vec<Channel> {
        self.inner.shared.cache.guild_channels(guild_id)
    }

    // --- Events ---

    /// Register a handler; `name` is an event name such as `"ready"` or
    /// `"guild_create"` (an `on_` prefix is accepted).
    pub fn on<F, Fut>(&self, name: &str, handler: F)
    where
        F: Fn(Event) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), BoxError>> + Send + 'static,
    {
        self.inner.shared.dispatcher.on(name, handler);
    }

    /// Register a sink for handler failures. Without one, failures are
    /// logged.
    pub fn on_error<F, Fut>(&self, handler: F)
    where
        F: Fn(HandlerFailure) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.inner.shared.dispatcher.on_error(handler);
    }

    /// Deliver an event to waiters and handlers. The cache is not touched.
    pub fn dispatch(&self, name: &str, data: Value) {
        self.inner.shared.dispatcher.dispatch(name, data);
    }

    /// Wait for the next `name` event accepted by `predicate`, failing with
    /// [`ClientError::WaitTimeout`] after `timeout`.
    pub async fn wait_for<P>(
        &self,
        name: &str,
        predicate: P,
        timeout: Duration,
    ) -> Result<Event, ClientError>
    where
        P: Fn(&Event) -> bool + Send + Sync + 'static,
    {
        self.inner
            .shared
            .dispatcher
            .wait_for(name, predicate, timeout)
            .await
    }

    /// Wait for the next `name` event of any content.
    pub async fn wait_for_next(&self, name: &str, timeout: Duration) -> Result<Event, ClientError> {
        self.inner.shared.dispatcher.wait_for_next(name, timeout).await
    }

    // --- Gateway commands ---

    fn send_command(&self, command: ClientCommand) -> Result<(), ClientError> {
        if !self.state().is_connected() {
            tracing::warn!(op = ?command.opcode(), "no live connection; command refused");
            return Err(ClientError::NotConnected);
        }
        let sender = self.inner.commands.lock().clone();
        match sender {
            Some(tx) => tx.send(command).map_err(|_| ClientError::NotConnected),
            None => Err(ClientError::NotConnected),
        }
    }

    /// Update status and activity for this shard.
    pub fn change_presence(
        &self,
        status: Status,
        activity: Option<Activity>,
    ) -> Result<(), ClientError> {
        self.send_command(ClientCommand::PresenceUpdate(PresenceUpdate::new(
            status, activity,
        )))
    }

    /// Ask for the full member list of each guild; members arrive as
    /// `guild_members_chunk` events.
    pub fn request_offline_members(&self, guild_ids: &[Snowflake]) -> Result<(), ClientError> {
        for guild_id in guild_ids {
            self.send_command(ClientCommand::RequestGuildMembers(
                RequestGuildMembers::all(*guild_id),
            ))?;
        }
        Ok(())
    }

    /// Join (or move to) a voice channel. Only the signalling is sent.
    pub fn join_voice_channel(
        &self,
        guild_id: Snowflake,
        channel_id: Snowflake,
        self_mute: bool,
        self_deaf: bool,
    ) -> Result<(), ClientError> {
        self.send_command(ClientCommand::VoiceStateUpdate(VoiceStateUpdate {
            guild_id,
            channel_id: Some(channel_id),
            self_mute,
            self_deaf,
        }))
    }

    /// Leave whatever voice channel the current user is in for `guild_id`.
    pub fn leave_voice_channel(&self, guild_id: Snowflake) -> Result<(), ClientError> {
        self.send_command(ClientCommand::VoiceStateUpdate(VoiceStateUpdate {
            guild_id,
            channel_id: None,
            self_mute: false,
            self_deaf: false,
        }))
    }

    // --- REST ---

    pub async fn create_guild(&self, request: &CreateGuildRequest) -> Result<Guild, ClientError> {
        Ok(self.inner.rest.create_guild(request).await?)
    }

    /// Accepts a bare code or an invite URL.
    pub async fn get_invite(&self, invite: &str, with_counts: bool) -> Result<Invite, ClientError> {
        Ok(self.inner.rest.get_invite(invite, with_counts).await?)
    }

    pub async fn delete_invite(&self, invite: &str) -> Result<Invite, ClientError> {
        Ok(self.inner.rest.delete_invite(invite).await?)
    }

    pub async fn application_info(&self) -> Result<AppInfo, ClientError> {
        Ok(self.inner.rest.application_info().await?)
    }

    pub async fn get_user_info(&self, user_id: Snowflake) -> Result<User, ClientError> {
        Ok(self.inner.rest.get_user_info(user_id).await?)
    }

    pub async fn get_user_profile(&self, user_id: Snowflake) -> Result<UserProfile, ClientError> {
        Ok(self.inner.rest.get_user_profile(user_id).await?)
    }

    pub async fn get_webhook_info(&self, webhook_id: Snowflake) -> Result<Webhook, ClientError> {
        Ok(self.inner.rest.get_webhook_info(webhook_id).await?)
    }

    /// Accepts a bare template code or a template URL.
    pub async fn fetch_template(&self, template: &str) -> Result<Template, ClientError> {
        Ok(self.inner.rest.fetch_template(template).await?)
    }

    /// Create a guild laid out like `template`. The returned guild is not
    /// cached; it arrives through `guild_create` like any other.
    pub async fn create_guild_from_template(
        &self,
        template: &str,
        request: &CreateGuildRequest,
    ) -> Result<Guild, ClientError> {
        Ok(self
            .inner
            .rest
            .create_guild_from_template(template, request)
            .await?)
    }
}
