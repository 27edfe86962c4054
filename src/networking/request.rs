use crate::types::{BlockPosition, BlocksRequest, StatusResult, UNBOUNDED};

impl BlocksRequest {
    /// Full-fidelity stream (block, traces and deltas) from `start_block_num`
    /// with no end and no flow-control window.
    pub fn stream_from(start_block_num: u32, positions: &[BlockPosition]) -> Self {
        BlocksRequest {
            start_block_num,
            end_block_num: UNBOUNDED,
            max_messages_in_flight: UNBOUNDED,
            have_positions: positions.to_vec(),
            irreversible_only: false,
            fetch_block: true,
            fetch_traces: true,
            fetch_deltas: true,
        }
    }
}

/// Oldest block the node still retains in any available range, 0 when it
/// reports none.
pub fn available_start_block(status: &StatusResult) -> u32 {
    [status.trace_range(), status.chain_state_range()]
        .iter()
        .flatten()
        .map(|range| range.start)
        .min()
        .unwrap_or(0)
}

/// Never ask for blocks older than both what the caller wants and what the
/// node still has; requesting pruned history would fail on the node side.
pub fn resume_start_block(status: &StatusResult, start_block_num: u32) -> u32 {
    start_block_num.max(available_start_block(status))
}
