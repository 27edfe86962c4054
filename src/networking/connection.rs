use std::any::Any;
use std::collections::VecDeque;
use std::fmt::Display;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, OnceLock};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::poll_fn;
use futures::ready;
use futures::stream::SplitSink;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{client_async_with_config, WebSocketStream};
use tracing::{event, Level};
use url::Url;

use crate::abi::TypeRegistry;
use crate::codec;
use crate::error::{Fault, ProtocolError};
use crate::networking::callbacks::{ConnectionCallbacks, Flow};
use crate::networking::request::resume_start_block;
use crate::types::{
    BlockPosition, BlocksAckRequest, BlocksRequest, Request, ResultMessage, StatusResult,
};

/// Largest message accepted from the node. Block frames for busy chains can
/// be very large.
pub const MAX_MESSAGE_SIZE: u64 = 10 * 1024 * 1024 * 1024;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionConfig {
    pub host: String,
    pub port: String,
}

impl ConnectionConfig {
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        ConnectionConfig {
            host: host.into(),
            port: port.into(),
        }
    }

    pub fn port_number(&self) -> crate::Result<u16> {
        let port: u16 = self
            .port
            .trim()
            .parse()
            .map_err(|_| format!("invalid port {:?}", self.port))?;
        if port == 0 {
            return Err("port must not be 0".into());
        }
        Ok(port)
    }

    /// The websocket endpoint for this node. IPv6 literals are bracketed.
    pub fn websocket_url(&self) -> crate::Result<Url> {
        let host = self.host.trim();
        if host.is_empty() {
            return Err("host must not be empty".into());
        }
        let port = self.port_number()?;
        let url = if host.contains(':') && !host.starts_with('[') {
            format!("ws://[{}]:{}/", host, port)
        } else {
            format!("ws://{}:{}/", host, port)
        };
        Ok(Url::parse(&url)?)
    }
}

impl Display for ConnectionConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Resolving,
    Connecting,
    Handshaking,
    AwaitingSchema,
    Streaming,
    Closed,
}

#[derive(Debug)]
enum Command {
    Send(Vec<u8>),
    Close { retry: bool },
}

/// A connection that has not been started yet. `connect` consumes it, so a
/// connection can only ever be started once; reconnecting means building a
/// new one.
pub struct Connection {
    runtime: Handle,
    config: ConnectionConfig,
    callbacks: Arc<dyn ConnectionCallbacks>,
}

impl Connection {
    pub fn new(
        runtime: Handle,
        config: ConnectionConfig,
        callbacks: Arc<dyn ConnectionCallbacks>,
    ) -> Self {
        Connection {
            runtime,
            config,
            callbacks,
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn state(&self) -> ConnectionState {
        ConnectionState::Disconnected
    }

    /// Validates the configuration and spawns the driver task. Everything that
    /// goes wrong after this returns is reported through
    /// [`ConnectionCallbacks::closed`].
    pub fn connect(self) -> crate::Result<ConnectionHandle> {
        let url = self.config.websocket_url()?;
        let port = self.config.port_number()?;

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Disconnected);
        let handle = ConnectionHandle {
            commands: command_tx,
            state: state_rx,
            registry: Arc::new(OnceLock::new()),
        };

        let driver = Driver {
            target: Target {
                host: self
                    .config
                    .host
                    .trim()
                    .trim_start_matches('[')
                    .trim_end_matches(']')
                    .to_string(),
                port,
                url,
            },
            handle: handle.clone(),
            commands: command_rx,
            state: state_tx,
            callbacks: Some(self.callbacks),
        };
        event!(Level::INFO, "connecting to state history at {}", self.config);
        self.runtime.spawn(driver.run());
        Ok(handle)
    }
}

/// Cheap to clone; every clone controls the same connection. Dropping handles
/// does not close the connection, call [`ConnectionHandle::close`].
#[derive(Clone)]
pub struct ConnectionHandle {
    commands: mpsc::UnboundedSender<Command>,
    state: watch::Receiver<ConnectionState>,
    registry: Arc<OnceLock<Arc<TypeRegistry>>>,
}

impl ConnectionHandle {
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Resolves once the connection is closed and the `closed` notification
    /// has returned.
    pub async fn wait_closed(&self) {
        let mut state = self.state.clone();
        loop {
            if *state.borrow_and_update() == ConnectionState::Closed {
                return;
            }
            if state.changed().await.is_err() {
                return;
            }
        }
    }

    /// The registry built from this session's schema, once it has arrived.
    pub fn registry(&self) -> Option<Arc<TypeRegistry>> {
        self.registry.get().cloned()
    }

    /// Queues a request for the driver to write. Writes never overlap and go
    /// out in the order they were queued.
    pub fn send(&self, request: &Request) -> crate::Result<()> {
        match self.state() {
            ConnectionState::AwaitingSchema | ConnectionState::Streaming => {}
            state => {
                return Err(format!(
                    "cannot send {} while connection is {:?}",
                    request.type_name(),
                    state
                )
                .into())
            }
        }
        let registry = self.registry();
        let bytes = codec::encode_request(registry.as_deref(), request)?;
        self.commands
            .send(Command::Send(bytes))
            .map_err(|_| "connection is closed")?;
        Ok(())
    }

    pub fn request_status(&self) -> crate::Result<()> {
        self.send(&Request::Status)
    }

    pub fn request_blocks(
        &self,
        start_block_num: u32,
        positions: &[BlockPosition],
    ) -> crate::Result<()> {
        self.send(&Request::Blocks(BlocksRequest::stream_from(
            start_block_num,
            positions,
        )))
    }

    /// Like [`request_blocks`](Self::request_blocks) but never asks for
    /// history the node no longer has.
    pub fn request_blocks_from_status(
        &self,
        status: &StatusResult,
        start_block_num: u32,
        positions: &[BlockPosition],
    ) -> crate::Result<()> {
        self.request_blocks(resume_start_block(status, start_block_num), positions)
    }

    pub fn request_ack(&self, num_messages: u32) -> crate::Result<()> {
        self.send(&Request::BlocksAck(BlocksAckRequest { num_messages }))
    }

    /// Idempotent. Only the first close of a connection decides the `retry`
    /// flag; later calls are ignored.
    pub fn close(&self, retry: bool) {
        let _ = self.commands.send(Command::Close { retry });
    }
}

struct Target {
    host: String,
    port: u16,
    url: Url,
}

type Socket = WebSocketStream<TcpStream>;

struct Driver {
    target: Target,
    handle: ConnectionHandle,
    commands: mpsc::UnboundedReceiver<Command>,
    state: watch::Sender<ConnectionState>,
    callbacks: Option<Arc<dyn ConnectionCallbacks>>,
}

impl Driver {
    async fn run(mut self) {
        let fault = match self.open().await {
            Ok(socket) => self.stream(socket).await,
            Err(fault) => fault,
        };
        self.finish(fault);
    }

    fn set_state(&self, state: ConnectionState) {
        let previous = self.state.send_replace(state);
        event!(
            Level::DEBUG,
            "{}:{} {:?} -> {:?}",
            self.target.host,
            self.target.port,
            previous,
            state
        );
    }

    fn current_state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    async fn open(&mut self) -> Result<Socket, Fault> {
        self.set_state(ConnectionState::Resolving);
        let lookup = tokio::net::lookup_host((self.target.host.clone(), self.target.port));
        let addrs: Vec<SocketAddr> = self.step("resolve", lookup).await?.collect();
        if addrs.is_empty() {
            return Err(Fault::transport("resolve", "no addresses found"));
        }

        self.set_state(ConnectionState::Connecting);
        let stream = self.step("connect", connect_any(addrs)).await?;

        self.set_state(ConnectionState::Handshaking);
        let mut config = WebSocketConfig::default();
        let limit = usize::try_from(MAX_MESSAGE_SIZE).unwrap_or(usize::MAX);
        config.max_message_size = Some(limit);
        config.max_frame_size = Some(limit);
        let handshake = client_async_with_config(self.target.url.clone(), stream, Some(config));
        let (socket, _response) = self.step("handshake", handshake).await?;

        self.set_state(ConnectionState::AwaitingSchema);
        event!(Level::INFO, "connected to {}", self.target.url);
        Ok(socket)
    }

    /// Awaits one connection step while still honouring close requests.
    async fn step<T, E, F>(&mut self, step: &'static str, future: F) -> Result<T, Fault>
    where
        E: Display,
        F: Future<Output = Result<T, E>>,
    {
        tokio::pin!(future);
        loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Send(_)) => {
                        event!(Level::WARN, "dropping request queued before the session opened");
                    }
                    Some(Command::Close { retry }) => return Err(Fault::Requested { retry }),
                    None => return Err(Fault::Requested { retry: false }),
                },
                result = &mut future => return result.map_err(|err| Fault::transport(step, err)),
            }
        }
    }

    async fn stream(&mut self, socket: Socket) -> Fault {
        let (mut sink, mut reader) = socket.split();
        let mut outbound: VecDeque<Vec<u8>> = VecDeque::new();
        let mut unflushed = false;
        let fault = loop {
            tokio::select! {
                biased;
                command = self.commands.recv() => match command {
                    Some(Command::Send(bytes)) => {
                        outbound.push_back(bytes);
                        unflushed = true;
                    }
                    Some(Command::Close { retry }) => break Fault::Requested { retry },
                    None => break Fault::Requested { retry: false },
                },
                written = poll_fn(|cx| poll_write(&mut sink, &mut outbound, cx)), if unflushed => {
                    match written {
                        Ok(()) => unflushed = false,
                        Err(err) => break Fault::transport("async_write", err),
                    }
                }
                frame = reader.next() => {
                    if let Err(fault) = self.on_frame(frame) {
                        break fault;
                    }
                }
            }
        };
        self.commands.close();
        if !outbound.is_empty() {
            event!(Level::DEBUG, "dropping {} unsent requests", outbound.len());
        }
        if !matches!(fault, Fault::Transport { .. }) {
            if let Ok(Err(err)) = tokio::time::timeout(CLOSE_TIMEOUT, sink.close()).await {
                event!(Level::DEBUG, "error closing socket: {}", err);
            }
        }
        fault
    }

    fn on_frame(&mut self, frame: Option<Result<Message, WsError>>) -> Result<(), Fault> {
        let payload = match frame {
            None => return Err(Fault::transport("async_read", "end of stream")),
            Some(Err(err)) => return Err(Fault::transport("async_read", err)),
            Some(Ok(Message::Close(_))) => {
                return Err(Fault::transport("async_read", "connection closed by peer"))
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => return Ok(()),
            Some(Ok(message)) => message.into_data(),
        };

        match self.current_state() {
            ConnectionState::AwaitingSchema => self.on_schema(&payload),
            _ => self.on_result(&payload),
        }
    }

    fn on_schema(&mut self, payload: &[u8]) -> Result<(), Fault> {
        let registry = codec::parse_schema(payload).map_err(|err| {
            event!(Level::ERROR, "invalid schema from {}: {}", self.target.url, err);
            err
        })?;
        event!(
            Level::DEBUG,
            "schema {} with {} types",
            registry.version(),
            registry.len()
        );
        let _ = self.handle.registry.set(Arc::new(registry));
        self.set_state(ConnectionState::Streaming);

        if let Some(callbacks) = self.callbacks.clone() {
            guarded("received_abi", || callbacks.received_abi(&self.handle))?;
        }
        Ok(())
    }

    fn on_result(&mut self, payload: &[u8]) -> Result<(), Fault> {
        let registry = match self.handle.registry.get() {
            Some(registry) => registry.clone(),
            None => return Err(ProtocolError::ResultBeforeSchema.into()),
        };
        let result = codec::decode_result(&registry, payload).map_err(|err| {
            event!(
                Level::ERROR,
                "failed to decode {} byte result frame: {}",
                payload.len(),
                err
            );
            err
        })?;

        let callbacks = match self.callbacks.clone() {
            Some(callbacks) => callbacks,
            None => return Ok(()),
        };
        let flow = match &result {
            ResultMessage::Status(status) => guarded("received_status", || {
                callbacks.received_status(&self.handle, status, payload)
            })?,
            ResultMessage::Blocks(blocks) => guarded("received_blocks", || {
                callbacks.received_blocks(&self.handle, blocks, payload)
            })?,
        };
        match flow {
            Flow::Continue => Ok(()),
            Flow::Stop => Err(Fault::Stopped),
        }
    }

    fn finish(&mut self, fault: Fault) {
        // from here on every send fails, including sends made from `closed`
        self.commands.close();
        let retry = fault.retry();
        match &fault {
            Fault::Transport { .. } => {
                event!(Level::ERROR, "{} {}", self.target.url, fault);
            }
            Fault::Protocol(_) | Fault::Consumer(_) => {
                event!(Level::ERROR, "closing {}: {}", self.target.url, fault);
            }
            Fault::Stopped | Fault::Requested { .. } => {
                event!(Level::INFO, "closing {}: {}", self.target.url, fault);
            }
        }

        if let Some(callbacks) = self.callbacks.take() {
            if let Err(panic) = panic::catch_unwind(AssertUnwindSafe(|| callbacks.closed(retry))) {
                event!(
                    Level::ERROR,
                    "closed callback panicked: {}",
                    panic_message(panic.as_ref())
                );
            }
        }
        self.set_state(ConnectionState::Closed);
    }
}

/// Hands queued requests to the socket and flushes them. Frames already
/// handed over stay buffered in the sink, so dropping this between polls
/// loses nothing.
fn poll_write(
    sink: &mut SplitSink<Socket, Message>,
    outbound: &mut VecDeque<Vec<u8>>,
    cx: &mut Context<'_>,
) -> Poll<Result<(), WsError>> {
    while !outbound.is_empty() {
        ready!(sink.poll_ready_unpin(cx))?;
        if let Some(bytes) = outbound.pop_front() {
            sink.start_send_unpin(Message::Binary(bytes))?;
        }
    }
    sink.poll_flush_unpin(cx)
}

async fn connect_any(addrs: Vec<SocketAddr>) -> io::Result<TcpStream> {
    let mut last_err = io::Error::new(io::ErrorKind::NotFound, "no addresses");
    for addr in addrs {
        match TcpStream::connect(addr).await {
            Ok(stream) => return Ok(stream),
            Err(err) => last_err = err,
        }
    }
    Err(last_err)
}

/// Runs a consumer callback; an error or a panic becomes a consumer fault.
fn guarded<T>(name: &str, callback: impl FnOnce() -> crate::Result<T>) -> Result<T, Fault> {
    match panic::catch_unwind(AssertUnwindSafe(callback)) {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => Err(Fault::Consumer(format!("{} failed: {}", name, err))),
        Err(panic) => Err(Fault::Consumer(format!(
            "{} panicked: {}",
            name,
            panic_message(panic.as_ref())
        ))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        String::from("unknown panic")
    }
}
