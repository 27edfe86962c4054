/*!

# State History Connection

## Introduction

A state-history node serves its chain over a single websocket. The client
opens the socket, receives a schema document and then streams results.

Binary payloads use the node's own serialization (see `crate::wire`).

## Session

```text
client                               node
  |  ---- websocket upgrade ---->      |
  |  <--- schema (text frame) ---      |
  |  ---- get_status_request ---->     |
  |  <--- get_status_result -----      |
  |  ---- get_blocks_request ---->     |
  |  <--- get_blocks_result -----      |  (repeated)
```

The first frame is always the schema. Every later frame is one `result`
variant, and every request is one `request` variant. Variant tags are taken
from the schema the node sent, not from a table compiled into the client.

## Requests

### get_status_request_v0

No fields. Answered with the node's head, last irreversible block and the
block ranges it still retains for traces and chain state.

### get_blocks_request_v0

Starts (or restarts) the block stream. `have_positions` lists blocks the
client already holds; the node resends from the first one that no longer
matches its chain, which is how forks are resolved across reconnects.

### get_blocks_ack_request_v0

Acknowledges results when `max_messages_in_flight` is bounded.

## Lifecycle

`Connection::connect` spawns a driver task. The task walks
`Resolving -> Connecting -> Handshaking -> AwaitingSchema -> Streaming` and
always ends in `Closed`, telling the consumer exactly once whether a retry
is worthwhile.

*/

pub mod callbacks;
pub mod connection;
pub mod request;
