#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use ship_client::networking::callbacks::{ConnectionCallbacks, Flow};
use ship_client::networking::connection::{Connection, ConnectionConfig, ConnectionHandle};
use ship_client::types::{BlockPosition, BlocksResult, Request, ResultMessage, StatusResult};
use ship_client::wire::{BinDeserialize, BinSerialize};
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_async, WebSocketStream};

pub const SHIP_ABI: &str = include_str!("../data/ship_abi.json");

const WAIT: Duration = Duration::from_secs(5);

/// One thing the mock node does, in order.
#[derive(Debug, Clone)]
pub enum Step {
    Text(String),
    Binary(Vec<u8>),
    /// Wait for the next request and report it.
    Expect,
    Close,
    /// Keep the socket open but stop reading from it.
    Stall,
}

pub fn schema() -> Step {
    Step::Text(SHIP_ABI.to_string())
}

pub fn status(status: StatusResult) -> Step {
    Step::Binary(ResultMessage::Status(status).serialize())
}

pub fn block(block_num: u32, last_irreversible: u32) -> Step {
    Step::Binary(ResultMessage::Blocks(blocks_result(block_num, last_irreversible)).serialize())
}

pub fn position(block_num: u32) -> BlockPosition {
    BlockPosition::new(block_num, [block_num as u8; 32])
}

pub fn blocks_result(block_num: u32, last_irreversible: u32) -> BlocksResult {
    BlocksResult {
        head: position(block_num),
        last_irreversible: position(last_irreversible),
        this_block: Some(position(block_num)),
        prev_block: Some(position(block_num.saturating_sub(1))),
        block: Some(vec![block_num as u8; 4]),
        traces: None,
        deltas: None,
    }
}

pub fn status_result(trace: (u32, u32), chain_state: (u32, u32)) -> StatusResult {
    StatusResult {
        head: position(trace.1),
        last_irreversible: position(trace.1.saturating_sub(10)),
        trace_begin_block: trace.0,
        trace_end_block: trace.1,
        chain_state_begin_block: chain_state.0,
        chain_state_end_block: chain_state.1,
    }
}

/// An in-process state-history node. Each accepted connection runs the next
/// script; connections are served one after the other.
pub struct MockNode {
    pub port: u16,
    requests: mpsc::UnboundedReceiver<Request>,
}

impl MockNode {
    pub async fn start(script: Vec<Step>) -> MockNode {
        MockNode::start_many(vec![script]).await
    }

    pub async fn start_many(scripts: Vec<Vec<Step>>) -> MockNode {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let (requests_tx, requests) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            for script in scripts {
                let (socket, _) = match listener.accept().await {
                    Ok(accepted) => accepted,
                    Err(_) => return,
                };
                let mut ws = match accept_async(socket).await {
                    Ok(ws) => ws,
                    Err(_) => continue,
                };
                run_script(&mut ws, script, &requests_tx).await;
            }
        });
        MockNode { port, requests }
    }

    pub fn config(&self) -> ConnectionConfig {
        ConnectionConfig::new("127.0.0.1", self.port.to_string())
    }

    pub async fn next_request(&mut self) -> Request {
        tokio::time::timeout(WAIT, self.requests.recv())
            .await
            .expect("timed out waiting for a request")
            .expect("mock node stopped")
    }
}

async fn run_script(
    ws: &mut WebSocketStream<TcpStream>,
    script: Vec<Step>,
    requests: &mpsc::UnboundedSender<Request>,
) {
    for step in script {
        match step {
            Step::Text(text) => {
                if ws.send(Message::Text(text)).await.is_err() {
                    return;
                }
            }
            Step::Binary(bytes) => {
                if ws.send(Message::Binary(bytes)).await.is_err() {
                    return;
                }
            }
            Step::Expect => loop {
                match ws.next().await {
                    Some(Ok(Message::Binary(data))) => {
                        let request = Request::deserialize(&data).expect("undecodable request");
                        let _ = requests.send(request);
                        break;
                    }
                    Some(Ok(_)) => continue,
                    _ => return,
                }
            },
            Step::Close => {
                let _ = ws.close(None).await;
            }
            Step::Stall => std::future::pending::<()>().await,
        }
    }
    // hold the socket until the client goes away
    while let Some(Ok(_)) = ws.next().await {}
}

/// A port nothing listens on.
pub async fn refused_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap().port()
}

/// Accepts one tcp connection, reads the start of the upgrade request and
/// resets the connection.
pub async fn reset_during_handshake() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    tokio::spawn(async move {
        if let Ok((mut socket, _)) = listener.accept().await {
            let mut buf = [0u8; 16];
            let _ = socket.read(&mut buf).await;
            let _ = socket.set_linger(Some(Duration::ZERO));
            drop(socket);
        }
    });
    port
}

#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    Abi,
    Status(StatusResult),
    Blocks(BlocksResult),
    Closed(bool),
}

type AbiHook = Box<dyn Fn(&ConnectionHandle) -> ship_client::Result<()> + Send + Sync>;
type Hook<T> = Box<dyn Fn(&ConnectionHandle, &T) -> ship_client::Result<Flow> + Send + Sync>;

/// Consumer that reports every callback as an [`Event`] and delegates the
/// decision to configurable hooks.
pub struct Recorder {
    events: mpsc::UnboundedSender<Event>,
    on_abi: AbiHook,
    on_status: Hook<StatusResult>,
    on_blocks: Hook<BlocksResult>,
}

impl Recorder {
    pub fn new() -> (Recorder, Events) {
        let (events, receiver) = mpsc::unbounded_channel();
        let recorder = Recorder {
            events,
            on_abi: Box::new(|_| Ok(())),
            on_status: Box::new(|_, _| Ok(Flow::Continue)),
            on_blocks: Box::new(|_, _| Ok(Flow::Continue)),
        };
        (recorder, Events(receiver))
    }

    pub fn on_abi(
        mut self,
        hook: impl Fn(&ConnectionHandle) -> ship_client::Result<()> + Send + Sync + 'static,
    ) -> Self {
        self.on_abi = Box::new(hook);
        self
    }

    pub fn on_status(
        mut self,
        hook: impl Fn(&ConnectionHandle, &StatusResult) -> ship_client::Result<Flow>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.on_status = Box::new(hook);
        self
    }

    pub fn on_blocks(
        mut self,
        hook: impl Fn(&ConnectionHandle, &BlocksResult) -> ship_client::Result<Flow>
            + Send
            + Sync
            + 'static,
    ) -> Self {
        self.on_blocks = Box::new(hook);
        self
    }

    pub fn connect(self, config: ConnectionConfig) -> ConnectionHandle {
        Connection::new(tokio::runtime::Handle::current(), config, Arc::new(self))
            .connect()
            .unwrap()
    }
}

impl ConnectionCallbacks for Recorder {
    fn received_abi(&self, connection: &ConnectionHandle) -> ship_client::Result<()> {
        let _ = self.events.send(Event::Abi);
        (self.on_abi)(connection)
    }

    fn received_status(
        &self,
        connection: &ConnectionHandle,
        status: &StatusResult,
        _raw: &[u8],
    ) -> ship_client::Result<Flow> {
        let _ = self.events.send(Event::Status(status.clone()));
        (self.on_status)(connection, status)
    }

    fn received_blocks(
        &self,
        connection: &ConnectionHandle,
        blocks: &BlocksResult,
        raw: &[u8],
    ) -> ship_client::Result<Flow> {
        assert_eq!(
            raw,
            ResultMessage::Blocks(blocks.clone()).serialize().as_slice()
        );
        let _ = self.events.send(Event::Blocks(blocks.clone()));
        (self.on_blocks)(connection, blocks)
    }

    fn closed(&self, retry: bool) {
        let _ = self.events.send(Event::Closed(retry));
    }
}

pub struct Events(mpsc::UnboundedReceiver<Event>);

impl Events {
    pub async fn next(&mut self) -> Event {
        tokio::time::timeout(WAIT, self.0.recv())
            .await
            .expect("timed out waiting for a callback")
            .expect("consumer dropped")
    }

    /// Everything up to and including the closed notification.
    pub async fn until_closed(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        loop {
            let event = self.next().await;
            let done = matches!(event, Event::Closed(_));
            events.push(event);
            if done {
                return events;
            }
        }
    }

    /// Callbacks that arrived after the connection reported closed.
    pub fn leftover(&mut self) -> Vec<Event> {
        let mut events = Vec::new();
        while let Ok(event) = self.0.try_recv() {
            events.push(event);
        }
        events
    }
}
