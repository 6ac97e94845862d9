//! Connection management for AMI
//!
//! One engine task per stream owns the transport, the lexer and the table of
//! outstanding actions. [`AmiStream`] handles talk to it through an unbounded
//! command queue; each action awaits its own oneshot reply, so replies are
//! matched by `ActionID` regardless of the order they arrive in.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::{
    action::{new_action_id, AmiAction},
    constants::{DEFAULT_AMI_PORT, DEFAULT_TIMEOUT_MS, MAX_MESSAGE_QUEUE_SIZE, SOCKET_BUF_SIZE},
    delegate::{AmiDelegate, AmiMessageStream, ChannelDelegate},
    error::{AmiError, AmiResult},
    event::AmiEvent,
    message::{AmiErrorResponse, AmiMessage, AmiResponse},
    protocol::{AmiLexer, LexedItem},
};

/// Lifecycle of an [`AmiStream`]
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum StreamState {
    /// Opening the transport.
    Connecting,
    /// Transport is up; waiting for the greeting line.
    AwaitingBanner,
    /// `Login` was written; waiting for its reply.
    LoggingIn,
    /// Actions are written as soon as they are issued.
    Ready,
    /// Terminal. Every outstanding action has been failed.
    Stopped(DisconnectReason),
}

/// Reason a stream stopped
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum DisconnectReason {
    /// Clean EOF on the transport
    ConnectionClosed,
    /// Transport I/O error (io::Error is not Clone, so we store the message)
    IoError(String),
    /// Client called stop()
    ClientRequested,
    /// TCP connect failed or timed out
    ConnectFailed(String),
    /// Server answered `Login` with `Response: Error`
    LoginRejected(String),
    /// Receive buffer overflow or an action that could not be serialised
    ProtocolError(String),
    /// The engine task panicked (usually inside a delegate)
    Panicked,
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DisconnectReason::ConnectionClosed => write!(f, "connection closed"),
            DisconnectReason::IoError(msg) => write!(f, "I/O error: {}", msg),
            DisconnectReason::ClientRequested => write!(f, "client requested stop"),
            DisconnectReason::ConnectFailed(msg) => write!(f, "connect failed: {}", msg),
            DisconnectReason::LoginRejected(msg) => write!(f, "login rejected: {}", msg),
            DisconnectReason::ProtocolError(msg) => write!(f, "protocol error: {}", msg),
            DisconnectReason::Panicked => write!(f, "engine task panicked"),
        }
    }
}

/// Establish a TCP connection with a timeout.
async fn tcp_connect_with_timeout(
    host: &str,
    port: u16,
    connect_timeout: Duration,
) -> AmiResult<TcpStream> {
    let tcp_result = timeout(connect_timeout, TcpStream::connect((host, port))).await;

    match tcp_result {
        Ok(Ok(s)) => {
            debug!("[CONNECT] TCP connection established");
            Ok(s)
        }
        Ok(Err(e)) => {
            warn!("[CONNECT] TCP connect failed: {}", e);
            Err(AmiError::Io(e))
        }
        Err(_) => {
            let timeout_ms = connect_timeout.as_millis() as u64;
            warn!("[CONNECT] TCP connect timed out after {}ms", timeout_ms);
            Err(AmiError::Timeout { timeout_ms })
        }
    }
}

/// Options for AMI connection configuration.
///
/// Use [`AmiConnectOptions::new`] plus [`credentials`](Self::credentials), or
/// [`Default::default()`] for an unauthenticated stream to `127.0.0.1:5038`.
#[derive(Clone)]
pub struct AmiConnectOptions {
    /// Server host name or address.
    pub host: String,
    /// Server port. Default: 5038.
    pub port: u16,
    /// Login user. When `None` no `Login` is sent and the stream is ready as
    /// soon as the transport connects.
    pub username: Option<String>,
    /// Login secret.
    pub password: Option<String>,
    /// TCP connect timeout. Default: 2 seconds.
    pub connect_timeout: Duration,
    /// Capacity of the queue behind [`AmiStream::connect`]. Default: 1000.
    pub message_queue_size: usize,
}

impl Default for AmiConnectOptions {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_AMI_PORT,
            username: None,
            password: None,
            connect_timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
            message_queue_size: MAX_MESSAGE_QUEUE_SIZE,
        }
    }
}

impl std::fmt::Debug for AmiConnectOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiConnectOptions")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field(
                "password",
                &self
                    .password
                    .as_ref()
                    .map(|_| "[REDACTED]"),
            )
            .field("connect_timeout", &self.connect_timeout)
            .field("message_queue_size", &self.message_queue_size)
            .finish()
    }
}

impl AmiConnectOptions {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Self::default()
        }
    }

    /// Log in with `Username`/`Secret` once the banner arrives.
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn login_action(&self) -> AmiResult<Option<AmiAction>> {
        match &self.username {
            Some(username) => AmiAction::login(
                username,
                self.password
                    .as_deref()
                    .unwrap_or_default(),
            )
            .map(Some),
            None => Ok(None),
        }
    }
}

type ErrorHandler = Box<dyn FnOnce(AmiErrorResponse) + Send + 'static>;
type ActionReply = AmiResult<Option<AmiResponse>>;

/// A serialised action on its way to the engine.
struct OutgoingAction {
    action_id: String,
    name: String,
    wire: String,
    error_handler: Option<ErrorHandler>,
    reply_tx: oneshot::Sender<ActionReply>,
}

enum EngineCommand {
    Send(OutgoingAction),
    /// The caller gave up (action timeout); forget the id.
    Cancel(String),
    Stop,
}

/// An action written to the transport and not yet resolved.
struct PendingCall {
    name: String,
    error_handler: Option<ErrorHandler>,
    reply_tx: oneshot::Sender<ActionReply>,
    /// Set once `Message: Events to follow` arrived
    aggregation: Option<(AmiResponse, Vec<AmiEvent>)>,
}

impl PendingCall {
    fn resolve(self, reply: ActionReply) {
        if self
            .reply_tx
            .send(reply)
            .is_err()
        {
            debug!("[RECV] Caller of {} went away before its reply", self.name);
        }
    }
}

/// Shared state between AmiStream handles and the engine task
struct SharedState {
    status_tx: watch::Sender<StreamState>,
    /// Version from the greeting line, set once
    version: OnceLock<String>,
    /// Set once the transport connected
    started: AtomicBool,
    /// Action timeout in milliseconds (0 = disabled)
    action_timeout_ms: AtomicU64,
    /// Total count of messages dropped by the channel delegate
    dropped_message_count: AtomicU64,
}

impl SharedState {
    fn set_state(&self, state: StreamState) {
        trace!("State -> {:?}", state);
        self.status_tx
            .send_replace(state);
    }
}

/// AMI stream handle (Clone + Send)
///
/// Every clone talks to the same engine task. The engine keeps a handle of
/// its own for the delegate, so a stream runs until [`stop`](Self::stop) is
/// called or the server closes the connection; dropping the handles does not
/// stop it.
#[derive(Clone)]
pub struct AmiStream {
    command_tx: mpsc::UnboundedSender<EngineCommand>,
    shared: Arc<SharedState>,
    status_rx: watch::Receiver<StreamState>,
}

impl std::fmt::Debug for AmiStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AmiStream")
            .field("state", &self.state())
            .field("version", &self.version())
            .finish()
    }
}

impl AmiStream {
    /// Open a TCP connection to `options.host:options.port` and run the
    /// stream, delivering every message to `delegate`.
    ///
    /// Returns immediately in [`StreamState::Connecting`]; actions issued
    /// before the stream is ready are written once it is. Must be called from
    /// within a tokio runtime.
    pub fn new(options: AmiConnectOptions, delegate: impl AmiDelegate) -> AmiResult<Self> {
        let login = options.login_action()?;
        let host = options.host;
        let port = options.port;
        let connect_timeout = options.connect_timeout;
        let username = options.username;

        Ok(Self::spawn(login, username, Arc::new(delegate), async move {
            info!("[CONNECT] Connecting to Asterisk at {}:{}", host, port);
            tcp_connect_with_timeout(&host, port, connect_timeout).await
        }))
    }

    /// Run the stream over an already-connected transport.
    pub fn from_transport<T>(
        io: T,
        options: AmiConnectOptions,
        delegate: impl AmiDelegate,
    ) -> AmiResult<Self>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let login = options.login_action()?;
        Ok(Self::spawn(
            login,
            options.username,
            Arc::new(delegate),
            async move { Ok(io) },
        ))
    }

    /// Connect and receive messages through an [`AmiMessageStream`] instead
    /// of a delegate.
    ///
    /// ```rust,no_run
    /// use asterisk_ami_tokio::{AmiConnectOptions, AmiMessage, AmiStream};
    ///
    /// # async fn example() -> Result<(), asterisk_ami_tokio::AmiError> {
    /// let options = AmiConnectOptions::new("127.0.0.1", 5038).credentials("admin", "secret");
    /// let (stream, mut messages) = AmiStream::connect(options)?;
    /// stream.wait_ready().await?;
    ///
    /// while let Some(Ok(message)) = messages.recv().await {
    ///     if let AmiMessage::Event(event) = message {
    ///         println!("{}", event.name());
    ///     }
    /// }
    /// # Ok(())
    /// # }
    /// ```
    pub fn connect(options: AmiConnectOptions) -> AmiResult<(Self, AmiMessageStream)> {
        let (tx, rx) = mpsc::channel(
            options
                .message_queue_size
                .max(1),
        );
        let stream = Self::new(options, ChannelDelegate::new(tx))?;
        let messages = AmiMessageStream::new(
            rx,
            stream
                .shared
                .status_tx
                .subscribe(),
        );
        Ok((stream, messages))
    }

    fn spawn<T, F>(
        login: Option<AmiAction>,
        username: Option<String>,
        delegate: Arc<dyn AmiDelegate>,
        open: F,
    ) -> Self
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
        F: Future<Output = AmiResult<T>> + Send + 'static,
    {
        let (status_tx, status_rx) = watch::channel(StreamState::Connecting);
        let shared = Arc::new(SharedState {
            status_tx,
            version: OnceLock::new(),
            started: AtomicBool::new(false),
            action_timeout_ms: AtomicU64::new(0),
            dropped_message_count: AtomicU64::new(0),
        });
        let (command_tx, command_rx) = mpsc::unbounded_channel();

        let handle = AmiStream {
            command_tx,
            shared,
            status_rx,
        };

        let engine = Engine {
            handle: handle.clone(),
            delegate,
            lexer: AmiLexer::new(),
            login: login.map(|action| (action, username.unwrap_or_default())),
            login_action_id: None,
            pending: HashMap::new(),
            queued: VecDeque::new(),
        };

        tokio::spawn(engine_task(engine, command_rx, open));
        handle
    }

    /// Send an action and wait for its reply.
    ///
    /// A fresh `ActionID` is generated unless the action carries one. For a
    /// reply of `Message: Events to follow` the call completes once the
    /// matching `EventList: Complete` event arrives, with every correlated
    /// event attached in [`AmiResponse::events`].
    ///
    /// A `Response: Error` fails the call with [`AmiError::ActionFailed`];
    /// the stream stays usable.
    pub async fn send_action(&self, action: AmiAction) -> AmiResult<AmiResponse> {
        self.send_action_inner(action, None)
            .await?
            .ok_or_else(|| AmiError::protocol_error("error reply routed to a missing handler"))
    }

    /// Like [`send_action`](Self::send_action), but a `Response: Error` is
    /// passed to `handler` (on the engine task) and the call returns
    /// `Ok(None)`.
    pub async fn send_action_with_handler<H>(
        &self,
        action: AmiAction,
        handler: H,
    ) -> AmiResult<Option<AmiResponse>>
    where
        H: FnOnce(AmiErrorResponse) + Send + 'static,
    {
        self.send_action_inner(action, Some(Box::new(handler)))
            .await
    }

    async fn send_action_inner(
        &self,
        action: AmiAction,
        error_handler: Option<ErrorHandler>,
    ) -> ActionReply {
        if self.is_stopped() {
            return Err(AmiError::NotConnected);
        }

        let action_id = action
            .action_id()
            .map(str::to_string)
            .unwrap_or_else(new_action_id);
        let wire = action.to_wire_format(&action_id)?;
        let (reply_tx, reply_rx) = oneshot::channel();

        self.command_tx
            .send(EngineCommand::Send(OutgoingAction {
                action_id: action_id.clone(),
                name: action
                    .name()
                    .to_string(),
                wire,
                error_handler,
                reply_tx,
            }))
            .map_err(|_| AmiError::NotConnected)?;

        let timeout_ms = self
            .shared
            .action_timeout_ms
            .load(Ordering::Relaxed);
        let reply = if timeout_ms > 0 {
            match timeout(Duration::from_millis(timeout_ms), reply_rx).await {
                Ok(reply) => reply,
                Err(_) => {
                    warn!(
                        "[SEND] {} (ActionID {}) timed out after {}ms",
                        action.name(),
                        action_id,
                        timeout_ms
                    );
                    let _ = self
                        .command_tx
                        .send(EngineCommand::Cancel(action_id));
                    return Err(AmiError::Timeout { timeout_ms });
                }
            }
        } else {
            reply_rx.await
        };

        reply.unwrap_or(Err(AmiError::ConnectionClosed))
    }

    /// `Action: Ping`; resolves with the fields of the `Pong` (or `Success`) reply.
    pub async fn ping(&self) -> AmiResult<AmiResponse> {
        self.send_action(AmiAction::ping())
            .await
    }

    /// Run a CLI command and return its output.
    ///
    /// ```rust,no_run
    /// # async fn example(stream: &asterisk_ami_tokio::AmiStream) -> Result<(), asterisk_ami_tokio::AmiError> {
    /// let output = stream.command("core show version").await?;
    /// println!("{}", output);
    /// # Ok(())
    /// # }
    /// ```
    pub async fn command(&self, cli: &str) -> AmiResult<String> {
        let response = self
            .send_action(AmiAction::command(cli)?)
            .await?;
        Ok(response
            .text_body()
            .unwrap_or_default()
            .to_string())
    }

    /// `Action: Logoff`. The server answers `Goodbye` and closes the connection.
    pub async fn logoff(&self) -> AmiResult<AmiResponse> {
        self.send_action(AmiAction::logoff())
            .await
    }

    /// Close the transport. Outstanding actions fail with
    /// [`AmiError::ConnectionClosed`]; use [`wait_stopped`](Self::wait_stopped)
    /// to wait for the engine to finish.
    pub fn stop(&self) {
        info!("Client requested stop");
        if self
            .command_tx
            .send(EngineCommand::Stop)
            .is_err()
        {
            trace!("Stop requested on a finished stream");
        }
    }

    /// Number of messages dropped due to a full message queue.
    pub fn dropped_message_count(&self) -> u64 {
        self.shared
            .dropped_message_count
            .load(Ordering::Relaxed)
    }

    pub(crate) fn record_dropped_message(&self) {
        self.shared
            .dropped_message_count
            .fetch_add(1, Ordering::Relaxed);
    }

    /// Set a per-action reply timeout. Zero disables it (default).
    ///
    /// Not part of the protocol: the server may still answer later, and that
    /// reply is then only seen by the delegate.
    pub fn set_action_timeout(&self, duration: Duration) {
        self.shared
            .action_timeout_ms
            .store(duration.as_millis() as u64, Ordering::Relaxed);
    }

    /// Whether the stream has not yet stopped.
    pub fn is_alive(&self) -> bool {
        !self.is_stopped()
    }

    /// Whether the stream reached its terminal state.
    pub fn is_stopped(&self) -> bool {
        matches!(
            *self
                .status_rx
                .borrow(),
            StreamState::Stopped(_)
        )
    }

    /// Whether the transport ever connected.
    pub fn is_started(&self) -> bool {
        self.shared
            .started
            .load(Ordering::Acquire)
    }

    /// Current state snapshot.
    pub fn state(&self) -> StreamState {
        self.status_rx
            .borrow()
            .clone()
    }

    /// Version announced in the `Asterisk Call Manager/<version>` greeting.
    pub fn version(&self) -> Option<&str> {
        self.shared
            .version
            .get()
            .map(String::as_str)
    }

    /// `true` if both handles drive the same engine.
    pub fn same_stream(&self, other: &AmiStream) -> bool {
        Arc::ptr_eq(&self.shared, &other.shared)
    }

    /// Wait until the stream is [`Ready`](StreamState::Ready).
    ///
    /// Fails with [`AmiError::LoginFailed`] when the server rejected the
    /// login, or [`AmiError::ConnectionClosed`] when the stream stopped for
    /// any other reason first.
    pub async fn wait_ready(&self) -> AmiResult<()> {
        let mut rx = self
            .status_rx
            .clone();
        loop {
            let state = rx
                .borrow_and_update()
                .clone();
            match state {
                StreamState::Ready => return Ok(()),
                StreamState::Stopped(DisconnectReason::LoginRejected(message)) => {
                    return Err(AmiError::LoginFailed { message })
                }
                StreamState::Stopped(_) => return Err(AmiError::ConnectionClosed),
                _ => {}
            }
            if rx
                .changed()
                .await
                .is_err()
            {
                return Err(AmiError::ConnectionClosed);
            }
        }
    }

    /// Wait for the terminal state and return why it was reached.
    pub async fn wait_stopped(&self) -> DisconnectReason {
        let mut rx = self
            .status_rx
            .clone();
        loop {
            if let StreamState::Stopped(reason) = &*rx.borrow_and_update() {
                return reason.clone();
            }
            if rx
                .changed()
                .await
                .is_err()
            {
                // The sender lives in SharedState, which we hold.
                return DisconnectReason::ConnectionClosed;
            }
        }
    }
}

/// Engine task: open the transport, run the loop, publish the outcome.
///
/// Panics inside the loop (a delegate or error handler) are caught and turn
/// into [`DisconnectReason::Panicked`]; outstanding callers then see
/// [`AmiError::ConnectionClosed`] as their reply channels drop.
async fn engine_task<T, F>(
    engine: Engine,
    command_rx: mpsc::UnboundedReceiver<EngineCommand>,
    open: F,
) where
    T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    F: Future<Output = AmiResult<T>> + Send + 'static,
{
    let shared = engine
        .handle
        .shared
        .clone();

    let io = match open.await {
        Ok(io) => io,
        Err(e) => {
            shared.set_state(StreamState::Stopped(DisconnectReason::ConnectFailed(
                e.to_string(),
            )));
            return;
        }
    };

    let result = std::panic::AssertUnwindSafe(engine.run(io, command_rx));
    if futures_util::FutureExt::catch_unwind(result)
        .await
        .is_err()
    {
        error!("engine task panicked");
        shared.set_state(StreamState::Stopped(DisconnectReason::Panicked));
    }
}

struct Engine {
    handle: AmiStream,
    delegate: Arc<dyn AmiDelegate>,
    lexer: AmiLexer,
    /// Login action and user name, taken when the banner arrives
    login: Option<(AmiAction, String)>,
    login_action_id: Option<String>,
    pending: HashMap<String, PendingCall>,
    /// Caller actions issued before login completed, in issue order
    queued: VecDeque<OutgoingAction>,
}

impl Engine {
    fn shared(&self) -> &SharedState {
        &self
            .handle
            .shared
    }

    fn state(&self) -> StreamState {
        self.handle
            .state()
    }

    fn emit(&self, message: &AmiMessage) {
        trace!("[RECV] Delivering {}", message);
        self.delegate
            .on_message(message, &self.handle);
    }

    async fn run<T>(mut self, io: T, mut command_rx: mpsc::UnboundedReceiver<EngineCommand>)
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (mut reader, mut writer) = tokio::io::split(io);

        self.shared()
            .started
            .store(true, Ordering::Release);
        self.shared()
            .set_state(StreamState::AwaitingBanner);
        self.emit(&AmiMessage::Connected);
        if self
            .login
            .is_none()
        {
            info!("[CONNECT] No credentials, stream ready");
            self.shared()
                .set_state(StreamState::Ready);
        }

        let mut read_buffer = vec![0u8; SOCKET_BUF_SIZE];
        let reason = loop {
            tokio::select! {
                read = reader.read(&mut read_buffer) => match read {
                    Ok(0) => {
                        info!("Connection closed (EOF)");
                        break DisconnectReason::ConnectionClosed;
                    }
                    Ok(n) => {
                        if let Err(reason) = self.handle_data(&read_buffer[..n], &mut writer).await {
                            break reason;
                        }
                    }
                    Err(e) => {
                        warn!("Read error: {}", e);
                        break DisconnectReason::IoError(e.to_string());
                    }
                },
                command = command_rx.recv() => match command {
                    Some(EngineCommand::Send(action)) => {
                        if let Err(reason) = self.handle_send(action, &mut writer).await {
                            break reason;
                        }
                    }
                    Some(EngineCommand::Cancel(action_id)) => {
                        self.pending
                            .remove(&action_id);
                        self.queued
                            .retain(|a| a.action_id != action_id);
                    }
                    Some(EngineCommand::Stop) | None => break DisconnectReason::ClientRequested,
                },
            }
        };

        if let Err(e) = writer
            .shutdown()
            .await
        {
            trace!("Transport shutdown failed: {}", e);
        }
        command_rx.close();
        self.finish(reason);
    }

    /// Enter `Stopped`, tell the delegate, fail everything outstanding.
    /// Only reached from `run`, after `Connected` was emitted.
    fn finish(mut self, reason: DisconnectReason) {
        info!("Stream stopped: {}", reason);
        self.shared()
            .set_state(StreamState::Stopped(reason.clone()));
        self.emit(&AmiMessage::Disconnected);

        for (_, call) in self
            .pending
            .drain()
        {
            call.resolve(Err(AmiError::ConnectionClosed));
        }

        let queued_error = |reason: &DisconnectReason| match reason {
            DisconnectReason::LoginRejected(message) => AmiError::LoginFailed {
                message: message.clone(),
            },
            _ => AmiError::ConnectionClosed,
        };
        for action in self
            .queued
            .drain(..)
        {
            let _ = action
                .reply_tx
                .send(Err(queued_error(&reason)));
        }
    }

    async fn handle_send<W>(
        &mut self,
        action: OutgoingAction,
        writer: &mut W,
    ) -> Result<(), DisconnectReason>
    where
        W: AsyncWrite + Unpin,
    {
        let id = action
            .action_id
            .as_str();
        // A caller that dropped its future no longer holds the id.
        if self
            .pending
            .get(id)
            .is_some_and(|call| {
                call.reply_tx
                    .is_closed()
            })
        {
            debug!("[SEND] Releasing abandoned ActionID {}", id);
            self.pending
                .remove(id);
        }
        self.queued
            .retain(|q| {
                q.action_id != id
                    || !q
                        .reply_tx
                        .is_closed()
            });
        let duplicate = self
            .pending
            .contains_key(id)
            || self
                .queued
                .iter()
                .any(|q| q.action_id == id)
            || self
                .login_action_id
                .as_deref()
                == Some(id);
        if duplicate {
            debug!("[SEND] Rejecting {}: ActionID {} is outstanding", action.name, id);
            let _ = action
                .reply_tx
                .send(Err(AmiError::DuplicateActionId {
                    action_id: action.action_id,
                }));
            return Ok(());
        }

        if self.state() != StreamState::Ready {
            debug!(
                "[SEND] Queueing {} (ActionID {}) until login completes",
                action.name, action.action_id
            );
            self.queued
                .push_back(action);
            return Ok(());
        }

        self.write_action(action, writer)
            .await
    }

    /// Register and write one action. The call is pending before the write so
    /// a write failure resolves it through `finish`.
    async fn write_action<W>(
        &mut self,
        action: OutgoingAction,
        writer: &mut W,
    ) -> Result<(), DisconnectReason>
    where
        W: AsyncWrite + Unpin,
    {
        debug!("[SEND] {} (ActionID {})", action.name, action.action_id);
        self.pending
            .insert(
                action.action_id,
                PendingCall {
                    name: action.name,
                    error_handler: action.error_handler,
                    reply_tx: action.reply_tx,
                    aggregation: None,
                },
            );
        write_wire(writer, &action.wire).await
    }

    async fn flush_queued<W>(&mut self, writer: &mut W) -> Result<(), DisconnectReason>
    where
        W: AsyncWrite + Unpin,
    {
        if !self
            .queued
            .is_empty()
        {
            debug!("[SEND] Flushing {} queued actions", self.queued.len());
        }
        while let Some(action) = self
            .queued
            .pop_front()
        {
            self.write_action(action, writer)
                .await?;
        }
        Ok(())
    }

    async fn handle_data<W>(&mut self, data: &[u8], writer: &mut W) -> Result<(), DisconnectReason>
    where
        W: AsyncWrite + Unpin,
    {
        let items = self
            .lexer
            .feed(data)
            .map_err(|e| {
                warn!("Lexer error: {}", e);
                DisconnectReason::ProtocolError(e.to_string())
            })?;

        for item in items {
            match item {
                LexedItem::Banner(version) => {
                    self.on_banner(version, writer)
                        .await?
                }
                LexedItem::Message(message) => {
                    self.on_message(message, writer)
                        .await?
                }
                LexedItem::Ignored(raw) => {
                    warn!("[RECV] Ignoring unrecognised stanza: {:?}", raw);
                }
            }
        }
        Ok(())
    }

    async fn on_banner<W>(
        &mut self,
        version: String,
        writer: &mut W,
    ) -> Result<(), DisconnectReason>
    where
        W: AsyncWrite + Unpin,
    {
        info!("[CONNECT] Asterisk Call Manager version {}", version);
        if self
            .shared()
            .version
            .set(version)
            .is_err()
        {
            debug!("[RECV] Repeated greeting ignored");
            return Ok(());
        }

        let Some((login, username)) = self
            .login
            .take()
        else {
            return Ok(());
        };

        let action_id = new_action_id();
        let wire = login
            .to_wire_format(&action_id)
            .map_err(|e| DisconnectReason::ProtocolError(e.to_string()))?;
        info!("[LOGIN] Logging in as {}", username);
        debug!("[SEND] Login (ActionID {}) Secret: [REDACTED]", action_id);
        self.login_action_id = Some(action_id);
        self.shared()
            .set_state(StreamState::LoggingIn);
        write_wire(writer, &wire).await
    }

    async fn on_message<W>(
        &mut self,
        message: AmiMessage,
        writer: &mut W,
    ) -> Result<(), DisconnectReason>
    where
        W: AsyncWrite + Unpin,
    {
        trace!("[RECV] {}", message);
        self.emit(&message);

        match message {
            AmiMessage::Response(response) => {
                self.on_response(response, writer)
                    .await
            }
            AmiMessage::Pong(pong) => {
                self.on_response(pong.into(), writer)
                    .await
            }
            AmiMessage::Error(error) => self.on_error(error),
            AmiMessage::Event(event) => {
                self.on_event(event);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    async fn on_response<W>(
        &mut self,
        response: AmiResponse,
        writer: &mut W,
    ) -> Result<(), DisconnectReason>
    where
        W: AsyncWrite + Unpin,
    {
        let Some(action_id) = response
            .action_id()
            .map(str::to_string)
        else {
            trace!("[RECV] Response without ActionID");
            return Ok(());
        };

        if self
            .login_action_id
            .as_deref()
            == Some(action_id.as_str())
        {
            self.login_action_id = None;
            info!("[LOGIN] Logged in");
            self.shared()
                .set_state(StreamState::Ready);
            return self
                .flush_queued(writer)
                .await;
        }

        let Some(call) = self
            .pending
            .get_mut(&action_id)
        else {
            debug!("[RECV] Response for unknown ActionID {}", action_id);
            return Ok(());
        };

        if response.is_events_to_follow() {
            trace!("[RECV] {} (ActionID {}) collecting events", call.name, action_id);
            call.aggregation = Some((response, Vec::new()));
            return Ok(());
        }

        if let Some(call) = self
            .pending
            .remove(&action_id)
        {
            call.resolve(Ok(Some(response)));
        }
        Ok(())
    }

    fn on_error(&mut self, error: AmiErrorResponse) -> Result<(), DisconnectReason> {
        let Some(action_id) = error
            .action_id()
            .map(str::to_string)
        else {
            trace!("[RECV] Error without ActionID");
            return Ok(());
        };
        let message = error
            .message()
            .unwrap_or_default()
            .to_string();

        if self
            .login_action_id
            .as_deref()
            == Some(action_id.as_str())
        {
            warn!("[LOGIN] Login rejected: {}", message);
            self.login_action_id = None;
            return Err(DisconnectReason::LoginRejected(message));
        }

        let Some(mut call) = self
            .pending
            .remove(&action_id)
        else {
            debug!("[RECV] Error for unknown ActionID {}", action_id);
            return Ok(());
        };

        debug!("[RECV] {} (ActionID {}) failed: {}", call.name, action_id, message);
        match call
            .error_handler
            .take()
        {
            Some(handler) => {
                handler(error);
                call.resolve(Ok(None));
            }
            None => call.resolve(Err(AmiError::ActionFailed { message })),
        }
        Ok(())
    }

    fn on_event(&mut self, event: AmiEvent) {
        let Some(action_id) = event
            .action_id()
            .map(str::to_string)
        else {
            return;
        };
        let Some((_, events)) = self
            .pending
            .get_mut(&action_id)
            .and_then(|call| {
                call.aggregation
                    .as_mut()
            })
        else {
            return;
        };

        let complete = event.is_list_complete();
        events.push(event);
        if !complete {
            return;
        }

        if let Some(mut call) = self
            .pending
            .remove(&action_id)
        {
            if let Some((response, events)) = call
                .aggregation
                .take()
            {
                trace!(
                    "[RECV] {} (ActionID {}) complete with {} events",
                    call.name,
                    action_id,
                    events.len()
                );
                call.resolve(Ok(Some(response.with_events(events))));
            }
        }
    }
}

async fn write_wire<W>(writer: &mut W, wire: &str) -> Result<(), DisconnectReason>
where
    W: AsyncWrite + Unpin,
{
    writer
        .write_all(wire.as_bytes())
        .await
        .map_err(|e| {
            warn!("Write error: {}", e);
            DisconnectReason::IoError(e.to_string())
        })
}
