mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{
    block, blocks_result, position, refused_port, reset_during_handshake, schema, status,
    status_result, Event, MockNode, Recorder, Step,
};
use ship_client::networking::callbacks::Flow;
use ship_client::networking::connection::{ConnectionConfig, ConnectionState};
use ship_client::networking::request::available_start_block;
use ship_client::types::{BlockPosition, BlocksAckRequest, BlocksRequest, Request, UNBOUNDED};

#[tokio::test]
async fn test_status_reports_available_start() {
    let trace_and_empty_chain_state = status_result((100, 500), (0, 0));
    let mut node = MockNode::start(vec![
        schema(),
        Step::Expect,
        status(trace_and_empty_chain_state.clone()),
    ])
    .await;

    let start = Arc::new(Mutex::new(None));
    let seen = start.clone();
    let (recorder, mut events) = Recorder::new();
    let connection = recorder
        .on_abi(|connection| connection.request_status())
        .on_status(move |_, status| {
            *seen.lock().unwrap() = Some(available_start_block(status));
            Ok(Flow::Stop)
        })
        .connect(node.config());

    assert_eq!(node.next_request().await, Request::Status);
    assert_eq!(
        events.until_closed().await,
        vec![
            Event::Abi,
            Event::Status(trace_and_empty_chain_state),
            Event::Closed(false)
        ]
    );
    assert_eq!(*start.lock().unwrap(), Some(100));

    connection.wait_closed().await;
    assert_eq!(connection.state(), ConnectionState::Closed);
    assert!(events.leftover().is_empty());
}

#[tokio::test]
async fn test_connect_refused_is_retryable() {
    let port = refused_port().await;
    let (recorder, mut events) = Recorder::new();
    let connection = recorder.connect(ConnectionConfig::new("127.0.0.1", port.to_string()));

    assert_eq!(events.until_closed().await, vec![Event::Closed(true)]);
    connection.wait_closed().await;
    assert!(connection.registry().is_none());
}

#[tokio::test]
async fn test_reset_during_handshake_is_retryable() {
    let port = reset_during_handshake().await;
    let (recorder, mut events) = Recorder::new();
    let connection = recorder.connect(ConnectionConfig::new("127.0.0.1", port.to_string()));

    assert_eq!(events.until_closed().await, vec![Event::Closed(true)]);
    connection.wait_closed().await;
    assert!(events.leftover().is_empty());
}

#[tokio::test]
async fn test_unknown_result_tag_is_not_retryable() {
    let first = status_result((1, 20), (1, 20));
    let node = MockNode::start(vec![
        schema(),
        status(first.clone()),
        Step::Binary(vec![7, 0, 0]),
        status(first.clone()),
    ])
    .await;
    let (recorder, mut events) = Recorder::new();
    let _connection = recorder.connect(node.config());

    assert_eq!(
        events.until_closed().await,
        vec![Event::Abi, Event::Status(first), Event::Closed(false)]
    );
}

#[tokio::test]
async fn test_truncated_frame_never_reaches_consumer() {
    let mut frame = match block(5, 1) {
        Step::Binary(frame) => frame,
        _ => unreachable!(),
    };
    frame.truncate(frame.len() - 3);
    let node = MockNode::start(vec![schema(), Step::Binary(frame)]).await;
    let (recorder, mut events) = Recorder::new();
    let _connection = recorder.connect(node.config());

    assert_eq!(
        events.until_closed().await,
        vec![Event::Abi, Event::Closed(false)]
    );
}

#[tokio::test]
async fn test_first_frame_is_always_the_schema() {
    let node = MockNode::start(vec![status(status_result((1, 2), (1, 2))), schema()]).await;
    let (recorder, mut events) = Recorder::new();
    let connection = recorder.connect(node.config());

    assert_eq!(events.until_closed().await, vec![Event::Closed(false)]);
    assert!(connection.registry().is_none());
}

#[tokio::test]
async fn test_unsupported_schema_version() {
    let abi = common::SHIP_ABI.replace("eosio::abi/1.1", "eosio::abi/2.0");
    let node = MockNode::start(vec![Step::Text(abi)]).await;
    let (recorder, mut events) = Recorder::new();
    let _connection = recorder.connect(node.config());

    assert_eq!(events.until_closed().await, vec![Event::Closed(false)]);
}

#[tokio::test]
async fn test_schema_referencing_unknown_type() {
    let abi = common::SHIP_ABI.replace("\"type\": \"checksum256\" }", "\"type\": \"checksum999\" }");
    let node = MockNode::start(vec![Step::Text(abi)]).await;
    let (recorder, mut events) = Recorder::new();
    let _connection = recorder.connect(node.config());

    assert_eq!(events.until_closed().await, vec![Event::Closed(false)]);
}

#[tokio::test]
async fn test_blocks_request_resumes_from_status() {
    let mut node = MockNode::start(vec![
        schema(),
        Step::Expect,
        status(status_result((100, 500), (0, 0))),
        Step::Expect,
        block(100, 90),
        block(101, 90),
        block(102, 90),
    ])
    .await;

    let (recorder, mut events) = Recorder::new();
    let _connection = recorder
        .on_abi(|connection| connection.request_status())
        .on_status(|connection, status| {
            connection.request_blocks_from_status(status, 50, &[position(99)])?;
            Ok(Flow::Continue)
        })
        .on_blocks(|_, blocks| match blocks.this_block {
            Some(this_block) if this_block.block_num == 101 => Ok(Flow::Stop),
            _ => Ok(Flow::Continue),
        })
        .connect(node.config());

    assert_eq!(node.next_request().await, Request::Status);
    assert_eq!(
        node.next_request().await,
        Request::Blocks(BlocksRequest {
            start_block_num: 100,
            end_block_num: UNBOUNDED,
            max_messages_in_flight: UNBOUNDED,
            have_positions: vec![position(99)],
            irreversible_only: false,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: true,
        })
    );

    let events = events.until_closed().await;
    assert_eq!(
        &events[2..],
        &[
            Event::Blocks(blocks_result(100, 90)),
            Event::Blocks(blocks_result(101, 90)),
            Event::Closed(false)
        ]
    );
}

#[tokio::test]
async fn test_requests_are_written_in_order() {
    let mut node = MockNode::start(vec![
        schema(),
        Step::Expect,
        Step::Expect,
        Step::Expect,
    ])
    .await;
    let (recorder, mut events) = Recorder::new();
    let connection = recorder
        .on_abi(|connection| {
            connection.request_blocks(7, &[])?;
            connection.request_ack(2)?;
            connection.request_status()
        })
        .connect(node.config());

    assert_eq!(
        node.next_request().await,
        Request::Blocks(BlocksRequest::stream_from(7, &[]))
    );
    assert_eq!(
        node.next_request().await,
        Request::BlocksAck(BlocksAckRequest { num_messages: 2 })
    );
    assert_eq!(node.next_request().await, Request::Status);

    assert_eq!(events.next().await, Event::Abi);
    assert_eq!(connection.state(), ConnectionState::Streaming);
    assert_eq!(
        connection.registry().map(|registry| registry.version().to_string()),
        Some(String::from("eosio::abi/1.1"))
    );
    connection.close(false);
    assert_eq!(events.until_closed().await, vec![Event::Closed(false)]);
}

#[tokio::test]
async fn test_consumer_error_is_not_retryable() {
    let node = MockNode::start(vec![schema()]).await;
    let (recorder, mut events) = Recorder::new();
    let _connection = recorder
        .on_abi(|_| Err("database unavailable".into()))
        .connect(node.config());

    assert_eq!(
        events.until_closed().await,
        vec![Event::Abi, Event::Closed(false)]
    );
}

#[tokio::test]
async fn test_consumer_panic_is_not_retryable() {
    let node = MockNode::start(vec![schema(), block(3, 1), block(4, 1)]).await;
    let (recorder, mut events) = Recorder::new();
    let _connection = recorder
        .on_blocks(|_, _| panic!("consumer bug"))
        .connect(node.config());

    assert_eq!(
        events.until_closed().await,
        vec![
            Event::Abi,
            Event::Blocks(blocks_result(3, 1)),
            Event::Closed(false)
        ]
    );
    assert!(events.leftover().is_empty());
}

#[tokio::test]
async fn test_owner_close_is_reported_once() {
    let node = MockNode::start(vec![schema()]).await;
    let (recorder, mut events) = Recorder::new();
    let connection = recorder.connect(node.config());
    assert_eq!(events.next().await, Event::Abi);

    connection.close(true);
    connection.close(false);
    assert_eq!(events.until_closed().await, vec![Event::Closed(true)]);
    connection.wait_closed().await;
    assert!(events.leftover().is_empty());
    assert!(connection.request_status().is_err());
}

#[tokio::test]
async fn test_peer_close_is_retryable() {
    let node = MockNode::start(vec![schema(), block(10, 5), Step::Close]).await;
    let (recorder, mut events) = Recorder::new();
    let _connection = recorder.connect(node.config());

    assert_eq!(
        events.until_closed().await,
        vec![
            Event::Abi,
            Event::Blocks(blocks_result(10, 5)),
            Event::Closed(true)
        ]
    );
}

#[tokio::test]
async fn test_send_is_rejected_after_close() {
    let node = MockNode::start(vec![schema(), Step::Close]).await;
    let (recorder, mut events) = Recorder::new();
    let connection = recorder.connect(node.config());

    events.until_closed().await;
    connection.wait_closed().await;
    assert!(connection.request_blocks(1, &[]).is_err());
    assert!(connection.request_ack(1).is_err());
}

#[tokio::test]
async fn test_close_while_node_is_not_reading() {
    let node = MockNode::start(vec![schema(), Step::Stall]).await;
    // large enough to fill both socket buffers
    let positions: Vec<BlockPosition> = (0..2_000_000).map(position).collect();
    let (recorder, mut events) = Recorder::new();
    let connection = recorder
        .on_abi(move |connection| connection.request_blocks(1, &positions))
        .connect(node.config());
    assert_eq!(events.next().await, Event::Abi);
    tokio::time::sleep(Duration::from_millis(500)).await;

    connection.close(false);
    assert_eq!(events.until_closed().await, vec![Event::Closed(false)]);
    tokio::time::timeout(Duration::from_secs(5), connection.wait_closed())
        .await
        .expect("connection did not close");
    assert_eq!(connection.state(), ConnectionState::Closed);
}
