//!
//! Glue between raw websocket frames and typed protocol messages.
//!
//! The first frame of a session is the schema document; every later frame is
//! one `result` variant. Variant tags are looked up in the session registry
//! instead of being hard-coded, so a node that reorders or extends its
//! variants is still understood (or cleanly rejected).
//!
use tracing::{event, Level};

use crate::abi::TypeRegistry;
use crate::error::ProtocolError;
use crate::types::{
    BlocksResult, Request, ResultMessage, StatusResult, BLOCKS_RESULT_TYPE, STATUS_RESULT_TYPE,
};
use crate::wire::{BinDeserialize, BinReader, BinWriter};

pub const RESULT_VARIANT: &str = "result";
pub const REQUEST_VARIANT: &str = "request";

pub fn parse_schema(frame: &[u8]) -> Result<TypeRegistry, ProtocolError> {
    let text = std::str::from_utf8(frame).map_err(|_| ProtocolError::InvalidUtf8)?;
    TypeRegistry::from_json(text)
}

pub fn decode_result(registry: &TypeRegistry, frame: &[u8]) -> Result<ResultMessage, ProtocolError> {
    let mut reader = BinReader::new(frame);
    let index = reader.read_varuint32()?;
    let case = registry.variant_case(RESULT_VARIANT, index)?;
    let result = match case {
        STATUS_RESULT_TYPE => ResultMessage::Status(StatusResult::read_bin(&mut reader)?),
        BLOCKS_RESULT_TYPE => ResultMessage::Blocks(BlocksResult::read_bin(&mut reader)?),
        other => return Err(ProtocolError::UnsupportedResult(other.to_string())),
    };
    if reader.remaining() > 0 {
        event!(
            Level::DEBUG,
            "ignoring {} trailing bytes after {}",
            reader.remaining(),
            case
        );
    }
    Ok(result)
}

/// Serializes a request. With a registry the tag is the request's position in
/// the node's `request` variant; a node that never declared the request type
/// cannot be sent it.
pub fn encode_request(
    registry: Option<&TypeRegistry>,
    request: &Request,
) -> Result<Vec<u8>, ProtocolError> {
    let index = match registry {
        Some(registry) => registry.variant_index(REQUEST_VARIANT, request.type_name())?,
        None => request.canonical_index(),
    };
    let mut writer = BinWriter::new();
    writer.write_varuint32(index);
    request.write_body(&mut writer);
    Ok(writer.into_bytes())
}
