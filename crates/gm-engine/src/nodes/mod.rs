//! Built-in node variants

mod asio_sink;
mod asio_source;
mod convert;
mod file_sink;
mod file_source;
mod filter;

pub use asio_sink::AsioSinkNode;
pub use asio_source::AsioSourceNode;
pub use convert::ConvertNode;
pub use file_sink::FileSinkNode;
pub use file_source::FileSourceNode;
pub use filter::FilterProcessorNode;

use std::time::Duration;

use gm_core::{EngineError, EngineResult};

use crate::node::NodeParams;

/// Bound of the file nodes' block queues.
pub(crate) const QUEUE_BLOCKS: usize = 4;

/// Output pool slots for producing nodes: queue bound plus in-flight
/// blocks.
pub(crate) const POOL_SLOTS: usize = QUEUE_BLOCKS + 2;

/// Worker join deadline on stop.
pub(crate) const JOIN_DEADLINE: Duration = Duration::from_secs(2);

/// Default FileSink drain deadline on stop, milliseconds.
pub(crate) const DEFAULT_FLUSH_MS: u64 = 1000;

/// Reject parameter keys outside a node's recognized set.
pub(crate) fn reject_unknown_params(
    node_type: &str,
    params: &NodeParams,
    recognized: &[&str],
) -> EngineResult<()> {
    for key in params.keys() {
        if !recognized.contains(&key.as_str()) {
            return Err(EngineError::Config(format!(
                "{node_type}: unknown parameter '{key}'"
            )));
        }
    }
    Ok(())
}

/// Parse the driver channel list parameter (`"0,1"`).
pub(crate) fn parse_channel_list(node_type: &str, value: &str) -> EngineResult<Vec<usize>> {
    let channels = value
        .split(',')
        .map(|part| {
            part.trim().parse::<usize>().map_err(|_| {
                EngineError::Config(format!("{node_type}: bad channel index '{part}'"))
            })
        })
        .collect::<EngineResult<Vec<_>>>()?;
    if channels.is_empty() {
        return Err(EngineError::Config(format!(
            "{node_type}: empty channel list"
        )));
    }
    Ok(channels)
}

/// Two-slot status holder for realtime paths (no allocation).
#[derive(Debug, Default)]
pub(crate) struct StatusSlots {
    slots: [Option<crate::node::NodeStatus>; 2],
}

impl StatusSlots {
    pub fn push(&mut self, status: crate::node::NodeStatus) {
        for slot in &mut self.slots {
            if slot.is_none() {
                *slot = Some(status);
                return;
            }
        }
        // Full: the oldest pending record wins, the new one is dropped.
    }

    pub fn pop(&mut self) -> Option<crate::node::NodeStatus> {
        let first = self.slots[0].take();
        self.slots[0] = self.slots[1].take();
        first
    }

    pub fn clear(&mut self) {
        self.slots = [None, None];
    }
}
