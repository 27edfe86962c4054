/*!
# State History Client

A client for the state-history websocket that EOSIO/Antelope nodes expose.
It negotiates the node's schema, asks for the node's status and streams
blocks, traces and table deltas to a consumer.

# Usage

Implement [`ConnectionCallbacks`](networking::callbacks::ConnectionCallbacks)
and hand it to a [`Connection`](networking::connection::Connection):

```no_run
use std::sync::Arc;
use ship_client::networking::callbacks::{ConnectionCallbacks, Flow};
use ship_client::networking::connection::{Connection, ConnectionConfig, ConnectionHandle};
use ship_client::types::BlocksResult;

struct Printer;

impl ConnectionCallbacks for Printer {
    fn received_abi(&self, connection: &ConnectionHandle) -> ship_client::Result<()> {
        connection.request_blocks(0, &[])
    }

    fn received_blocks(
        &self,
        _connection: &ConnectionHandle,
        blocks: &BlocksResult,
        _raw: &[u8],
    ) -> ship_client::Result<Flow> {
        println!("{:?}", blocks.this_block);
        Ok(Flow::Continue)
    }

    fn closed(&self, retry: bool) {
        println!("closed, retry: {}", retry);
    }
}

#[tokio::main]
async fn main() -> ship_client::Result<()> {
    let config = ConnectionConfig::new("127.0.0.1", "8080");
    let connection = Connection::new(tokio::runtime::Handle::current(), config, Arc::new(Printer));
    connection.connect()?.wait_closed().await;
    Ok(())
}
```

The `ship_client` binary wraps this in a reconnect loop (see [`tail`]).

*/
pub mod abi;
pub mod backoff;
pub mod codec;
pub mod error;
pub mod networking;
pub mod settings;
pub mod signals;
pub mod tail;
pub mod types;
pub mod wire;

#[cfg(test)]
mod test_utilities;

/// Error returned by most functions.
///
/// Typed errors ([`error::ProtocolError`], [`error::Fault`]) are used where
/// callers match on them; everything else is boxed.
pub type Error = Box<dyn std::error::Error + Send + Sync>;

/// A specialized `Result` type for client operations.
pub type Result<T> = std::result::Result<T, Error>;
