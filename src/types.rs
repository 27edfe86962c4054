use std::ops::Range;

use crate::error::ProtocolError;
use crate::wire::{BinDeserialize, BinReader, BinSerialize, BinWriter, Bytes, Checksum256};

/// "No limit" for `end_block_num` and `max_messages_in_flight`.
pub const UNBOUNDED: u32 = u32::MAX;

/// A block the consumer has already seen, identified by height and id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BlockPosition {
    pub block_num: u32,
    pub block_id: Checksum256,
}

impl BlockPosition {
    pub fn new(block_num: u32, block_id: Checksum256) -> Self {
        BlockPosition {
            block_num,
            block_id,
        }
    }
}

impl BinSerialize for BlockPosition {
    fn write_bin(&self, writer: &mut BinWriter) {
        self.block_num.write_bin(writer);
        self.block_id.write_bin(writer);
    }
}

impl BinDeserialize for BlockPosition {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        Ok(BlockPosition {
            block_num: reader.read_u32()?,
            block_id: reader.read_checksum256()?,
        })
    }
}

///
/// get_status_result_v0
///
/// The node reports which block ranges it still retains. A range is
/// unavailable when `begin >= end`.
///
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StatusResult {
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub trace_begin_block: u32,
    pub trace_end_block: u32,
    pub chain_state_begin_block: u32,
    pub chain_state_end_block: u32,
}

impl StatusResult {
    pub fn trace_range(&self) -> Option<Range<u32>> {
        available(self.trace_begin_block, self.trace_end_block)
    }

    pub fn chain_state_range(&self) -> Option<Range<u32>> {
        available(self.chain_state_begin_block, self.chain_state_end_block)
    }
}

fn available(begin: u32, end: u32) -> Option<Range<u32>> {
    if begin < end {
        Some(begin..end)
    } else {
        None
    }
}

impl BinSerialize for StatusResult {
    fn write_bin(&self, writer: &mut BinWriter) {
        self.head.write_bin(writer);
        self.last_irreversible.write_bin(writer);
        writer.write_u32(self.trace_begin_block);
        writer.write_u32(self.trace_end_block);
        writer.write_u32(self.chain_state_begin_block);
        writer.write_u32(self.chain_state_end_block);
    }
}

impl BinDeserialize for StatusResult {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        Ok(StatusResult {
            head: BlockPosition::read_bin(reader)?,
            last_irreversible: BlockPosition::read_bin(reader)?,
            trace_begin_block: reader.read_u32()?,
            trace_end_block: reader.read_u32()?,
            chain_state_begin_block: reader.read_u32()?,
            chain_state_end_block: reader.read_u32()?,
        })
    }
}

///
/// get_blocks_result_v0
///
/// `block`, `traces` and `deltas` are left encoded. Consumers decode them with
/// the session's [`TypeRegistry`](crate::abi::TypeRegistry) when they need
/// them (`signed_block`, `transaction_trace[]`, `table_delta[]`).
///
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BlocksResult {
    pub head: BlockPosition,
    pub last_irreversible: BlockPosition,
    pub this_block: Option<BlockPosition>,
    pub prev_block: Option<BlockPosition>,
    pub block: Option<Vec<u8>>,
    pub traces: Option<Vec<u8>>,
    pub deltas: Option<Vec<u8>>,
}

impl BinSerialize for BlocksResult {
    fn write_bin(&self, writer: &mut BinWriter) {
        self.head.write_bin(writer);
        self.last_irreversible.write_bin(writer);
        self.this_block.write_bin(writer);
        self.prev_block.write_bin(writer);
        for payload in [&self.block, &self.traces, &self.deltas] {
            match payload {
                Some(bytes) => {
                    writer.write_bool(true);
                    writer.write_blob(bytes);
                }
                None => writer.write_bool(false),
            }
        }
    }
}

impl BinDeserialize for BlocksResult {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        Ok(BlocksResult {
            head: BlockPosition::read_bin(reader)?,
            last_irreversible: BlockPosition::read_bin(reader)?,
            this_block: Option::read_bin(reader)?,
            prev_block: Option::read_bin(reader)?,
            block: Option::<Bytes>::read_bin(reader)?.map(|b| b.0),
            traces: Option::<Bytes>::read_bin(reader)?.map(|b| b.0),
            deltas: Option::<Bytes>::read_bin(reader)?.map(|b| b.0),
        })
    }
}

/// get_blocks_request_v0
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlocksRequest {
    pub start_block_num: u32,
    pub end_block_num: u32,
    pub max_messages_in_flight: u32,
    pub have_positions: Vec<BlockPosition>,
    pub irreversible_only: bool,
    pub fetch_block: bool,
    pub fetch_traces: bool,
    pub fetch_deltas: bool,
}

impl BinSerialize for BlocksRequest {
    fn write_bin(&self, writer: &mut BinWriter) {
        writer.write_u32(self.start_block_num);
        writer.write_u32(self.end_block_num);
        writer.write_u32(self.max_messages_in_flight);
        self.have_positions.write_bin(writer);
        writer.write_bool(self.irreversible_only);
        writer.write_bool(self.fetch_block);
        writer.write_bool(self.fetch_traces);
        writer.write_bool(self.fetch_deltas);
    }
}

impl BinDeserialize for BlocksRequest {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        Ok(BlocksRequest {
            start_block_num: reader.read_u32()?,
            end_block_num: reader.read_u32()?,
            max_messages_in_flight: reader.read_u32()?,
            have_positions: Vec::read_bin(reader)?,
            irreversible_only: reader.read_bool()?,
            fetch_block: reader.read_bool()?,
            fetch_traces: reader.read_bool()?,
            fetch_deltas: reader.read_bool()?,
        })
    }
}

/// get_blocks_ack_request_v0, only meaningful when `max_messages_in_flight`
/// was bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlocksAckRequest {
    pub num_messages: u32,
}

///
/// The `request` variant sent to the node. Discriminants are the canonical
/// positions in the node's schema; the codec prefers whatever position the
/// connected node's schema actually declares.
///
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Status,
    Blocks(BlocksRequest),
    BlocksAck(BlocksAckRequest),
}

impl Request {
    pub fn type_name(&self) -> &'static str {
        match self {
            Request::Status => "get_status_request_v0",
            Request::Blocks(_) => "get_blocks_request_v0",
            Request::BlocksAck(_) => "get_blocks_ack_request_v0",
        }
    }

    pub fn canonical_index(&self) -> u32 {
        match self {
            Request::Status => 0,
            Request::Blocks(_) => 1,
            Request::BlocksAck(_) => 2,
        }
    }

    /// The request body without its variant tag.
    pub fn write_body(&self, writer: &mut BinWriter) {
        match self {
            Request::Status => {}
            Request::Blocks(request) => request.write_bin(writer),
            Request::BlocksAck(ack) => writer.write_u32(ack.num_messages),
        }
    }
}

impl BinSerialize for Request {
    fn write_bin(&self, writer: &mut BinWriter) {
        writer.write_varuint32(self.canonical_index());
        self.write_body(writer);
    }
}

impl BinDeserialize for Request {
    fn read_bin(reader: &mut BinReader) -> Result<Self, ProtocolError> {
        match reader.read_varuint32()? {
            0 => Ok(Request::Status),
            1 => Ok(Request::Blocks(BlocksRequest::read_bin(reader)?)),
            2 => Ok(Request::BlocksAck(BlocksAckRequest {
                num_messages: reader.read_u32()?,
            })),
            index => Err(ProtocolError::InvalidVariantIndex {
                variant: String::from("request"),
                index,
            }),
        }
    }
}

/// The `result` variant received from the node; one per frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResultMessage {
    Status(StatusResult),
    Blocks(BlocksResult),
}

impl ResultMessage {
    pub fn type_name(&self) -> &'static str {
        match self {
            ResultMessage::Status(_) => STATUS_RESULT_TYPE,
            ResultMessage::Blocks(_) => BLOCKS_RESULT_TYPE,
        }
    }
}

pub const STATUS_RESULT_TYPE: &str = "get_status_result_v0";
pub const BLOCKS_RESULT_TYPE: &str = "get_blocks_result_v0";

impl BinSerialize for ResultMessage {
    fn write_bin(&self, writer: &mut BinWriter) {
        match self {
            ResultMessage::Status(status) => {
                writer.write_varuint32(0);
                status.write_bin(writer);
            }
            ResultMessage::Blocks(blocks) => {
                writer.write_varuint32(1);
                blocks.write_bin(writer);
            }
        }
    }
}
