use crate::networking::connection::ConnectionHandle;
use crate::types::{BlocksResult, StatusResult};

/// What the read loop does after a result has been handed to the consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Flow {
    Continue,
    /// Close without retry. Not an error.
    Stop,
}

/// The consumer side of a connection.
///
/// All methods are invoked from the connection's driver task, one at a time
/// and in frame order. They should return quickly: the next frame is not read
/// until the callback returns. Requests issued through the handle are queued
/// and written by the driver after the callback returns.
///
/// An `Err` or a panic escaping any `received_*` method closes the
/// connection without retry.
pub trait ConnectionCallbacks: Send + Sync {
    /// The schema has been negotiated and requests may now be sent.
    fn received_abi(&self, _connection: &ConnectionHandle) -> crate::Result<()> {
        Ok(())
    }

    /// `raw` is the complete undecoded frame.
    fn received_status(
        &self,
        _connection: &ConnectionHandle,
        _status: &StatusResult,
        _raw: &[u8],
    ) -> crate::Result<Flow> {
        Ok(Flow::Continue)
    }

    /// `raw` is the complete undecoded frame; `blocks.block`, `blocks.traces`
    /// and `blocks.deltas` are still in their node encoding and can be read
    /// with the session registry.
    fn received_blocks(
        &self,
        _connection: &ConnectionHandle,
        _blocks: &BlocksResult,
        _raw: &[u8],
    ) -> crate::Result<Flow> {
        Ok(Flow::Continue)
    }

    /// Fired exactly once per connection, after which no other method is
    /// called. `retry` is true when the failure looked transient.
    fn closed(&self, retry: bool);
}
