use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use clap::{App, Arg};
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tracing::{event, Level};

use crate::networking::callbacks::{ConnectionCallbacks, Flow};
use crate::networking::connection::{Connection, ConnectionHandle};
use crate::settings::{ClientSettings, Overrides};
use crate::signals::signal_for_shutdown;
use crate::types::{BlockPosition, BlocksResult, StatusResult};

/// Most reversible positions offered back to the node on reconnect.
const MAX_TRACKED_POSITIONS: usize = 1024;

///
/// The entry point of the `ship_client` binary
///
pub async fn run() -> crate::Result<()> {
    let matches = App::new("ship_client")
        .about("Streams blocks from a state-history node")
        .arg(
            Arg::with_name("config")
                .short("c")
                .long("config")
                .takes_value(true)
                .help("config file name"),
        )
        .arg(
            Arg::with_name("host")
                .long("host")
                .takes_value(true)
                .help("state history host"),
        )
        .arg(
            Arg::with_name("port")
                .short("p")
                .long("port")
                .takes_value(true)
                .help("state history port"),
        )
        .arg(
            Arg::with_name("start_block")
                .short("s")
                .long("start_block")
                .takes_value(true)
                .help("first block to stream"),
        )
        .arg(
            Arg::with_name("stop_before")
                .long("stop_before")
                .takes_value(true)
                .help("stop when this block is reached"),
        )
        .get_matches();

    let overrides = Overrides {
        host: matches.value_of("host").map(String::from),
        port: matches.value_of("port").map(String::from),
        start_block: parse_block_arg(matches.value_of("start_block"), "start_block")?,
        stop_before: parse_block_arg(matches.value_of("stop_before"), "stop_before")?,
    };
    let settings = ClientSettings::load(matches.value_of("config"), &overrides)?;

    tail(settings, async {
        if let Err(err) = signal_for_shutdown().await {
            event!(Level::ERROR, "failed to listen for shutdown signals: {}", err);
            std::future::pending::<()>().await;
        }
        event!(Level::INFO, "Shutting down!");
    })
    .await
}

fn parse_block_arg(value: Option<&str>, name: &str) -> crate::Result<Option<u32>> {
    match value {
        Some(value) => value
            .parse::<u32>()
            .map(Some)
            .map_err(|_| format!("--{} must be a block number, got {:?}", name, value).into()),
        None => Ok(None),
    }
}

/// Follows the chain until `shutdown` resolves, the configured stop block is
/// reached, or the node fails in a way retrying will not fix.
pub async fn tail(settings: ClientSettings, shutdown: impl Future<Output = ()>) -> crate::Result<()> {
    tokio::pin!(shutdown);
    let progress = Arc::new(Mutex::new(Progress::new(settings.stream.start_block)));
    let mut backoff = settings.backoff();

    loop {
        let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();
        let consumer = Arc::new(TailConsumer {
            stop_before: settings.stream.stop_before,
            progress: progress.clone(),
            closed: closed_tx,
        });
        let received_before = lock(&progress).received;
        let connection = Connection::new(
            Handle::current(),
            settings.connection_config(),
            consumer,
        )
        .connect()?;

        let retry = tokio::select! {
            retry = closed_rx.recv() => retry.unwrap_or(false),
            _ = &mut shutdown => {
                connection.close(false);
                connection.wait_closed().await;
                return Ok(());
            }
        };

        {
            let state = lock(&progress);
            if state.finished {
                event!(
                    Level::INFO,
                    "reached block {}, {} blocks received",
                    settings.stream.stop_before,
                    state.received
                );
                return Ok(());
            }
            if !retry {
                return Err("state history connection failed and will not be retried".into());
            }
            if state.received > received_before {
                backoff.reset();
            }
        }

        let delay = backoff.next_delay();
        event!(Level::INFO, "reconnecting in {} ms", delay.as_millis());
        tokio::select! {
            _ = tokio::time::sleep(delay) => {}
            _ = &mut shutdown => return Ok(()),
        }
    }
}

fn lock(progress: &Mutex<Progress>) -> MutexGuard<'_, Progress> {
    // the data stays consistent even if a callback panicked mid-update
    progress.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// What has been streamed so far. Survives reconnects.
#[derive(Debug, Clone)]
pub struct Progress {
    pub next_block: u32,
    pub received: u64,
    pub finished: bool,
    /// Received blocks that were still reversible, oldest first.
    positions: VecDeque<BlockPosition>,
}

impl Progress {
    pub fn new(start_block: u32) -> Self {
        Progress {
            next_block: start_block,
            received: 0,
            finished: false,
            positions: VecDeque::new(),
        }
    }

    pub fn positions(&self) -> Vec<BlockPosition> {
        self.positions.iter().copied().collect()
    }

    /// Records a received block. A block at or below one already held means
    /// the node switched forks; everything from that height on is replaced.
    pub fn record(&mut self, block: &BlockPosition, last_irreversible: u32) -> bool {
        let forked = block.block_num < self.next_block && self.received > 0;
        while matches!(self.positions.back(), Some(last) if last.block_num >= block.block_num) {
            self.positions.pop_back();
        }
        self.positions.push_back(*block);
        while matches!(self.positions.front(), Some(first) if first.block_num <= last_irreversible)
        {
            self.positions.pop_front();
        }
        while self.positions.len() > MAX_TRACKED_POSITIONS {
            self.positions.pop_front();
        }
        self.next_block = block.block_num.saturating_add(1);
        self.received += 1;
        forked
    }
}

/// Requests status once the schema is in, then streams blocks from where the
/// last connection left off.
pub struct TailConsumer {
    stop_before: u32,
    progress: Arc<Mutex<Progress>>,
    closed: mpsc::UnboundedSender<bool>,
}

impl ConnectionCallbacks for TailConsumer {
    fn received_abi(&self, connection: &ConnectionHandle) -> crate::Result<()> {
        connection.request_status()
    }

    fn received_status(
        &self,
        connection: &ConnectionHandle,
        status: &StatusResult,
        _raw: &[u8],
    ) -> crate::Result<Flow> {
        let progress = lock(&self.progress);
        event!(
            Level::INFO,
            "node head {} irreversible {}, traces [{}, {}) chain state [{}, {})",
            status.head.block_num,
            status.last_irreversible.block_num,
            status.trace_begin_block,
            status.trace_end_block,
            status.chain_state_begin_block,
            status.chain_state_end_block
        );
        connection.request_blocks_from_status(status, progress.next_block, &progress.positions())?;
        Ok(Flow::Continue)
    }

    fn received_blocks(
        &self,
        connection: &ConnectionHandle,
        blocks: &BlocksResult,
        _raw: &[u8],
    ) -> crate::Result<Flow> {
        let this_block = match &blocks.this_block {
            Some(this_block) => this_block,
            None => {
                event!(Level::DEBUG, "caught up at head {}", blocks.head.block_num);
                return Ok(Flow::Continue);
            }
        };

        let mut progress = lock(&self.progress);
        if progress.record(this_block, blocks.last_irreversible.block_num) {
            event!(Level::WARN, "fork switch at block {}", this_block.block_num);
        }
        event!(
            Level::INFO,
            "block {} {} head {} irreversible {}",
            this_block.block_num,
            hex::encode(&this_block.block_id),
            blocks.head.block_num,
            blocks.last_irreversible.block_num
        );
        if tracing::enabled!(Level::TRACE) {
            log_deltas(connection, blocks);
        }

        if self.stop_before != 0 && progress.next_block >= self.stop_before {
            progress.finished = true;
            return Ok(Flow::Stop);
        }
        Ok(Flow::Continue)
    }

    fn closed(&self, retry: bool) {
        let _ = self.closed.send(retry);
    }
}

fn log_deltas(connection: &ConnectionHandle, blocks: &BlocksResult) {
    let (registry, deltas) = match (connection.registry(), &blocks.deltas) {
        (Some(registry), Some(deltas)) => (registry, deltas),
        _ => return,
    };
    match registry.bin_to_json("table_delta[]", deltas) {
        Ok(value) => event!(Level::TRACE, "deltas {}", value),
        Err(err) => event!(Level::TRACE, "deltas not decodable: {}", err),
    }
}
