//! Process-order scheduling
//!
//! Kahn's algorithm with deterministic tie-breaking by node insertion
//! order, producing an interleaved schedule: each node's process step is
//! followed immediately by the transfers of all its outgoing edges (in
//! connection insertion order), so a buffer produced in a block is
//! consumed in the same block.

use gm_core::{EngineError, EngineResult};

use crate::graph::Connection;

/// One step of the per-block schedule
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleStep {
    /// Call `process()` on the node at this index.
    Process(usize),
    /// Carry out the connection at this index.
    Transfer(usize),
}

/// Compute the process order and the interleaved schedule.
///
/// Returns `(order, steps)` where `order` lists node indices in process
/// order. Fails with `CyclicGraph` when no progress can be made with
/// nodes remaining.
pub fn compute_schedule(
    node_names: &[String],
    connections: &[Connection],
) -> EngineResult<(Vec<usize>, Vec<ScheduleStep>)> {
    let count = node_names.len();
    let mut indegree = vec![0usize; count];
    for conn in connections {
        indegree[conn.sink_node] += 1;
    }

    let mut placed = vec![false; count];
    let mut order = Vec::with_capacity(count);
    let mut steps = Vec::with_capacity(count + connections.len());

    for _ in 0..count {
        // Deterministic tie-break: lowest insertion index first.
        let next = (0..count).find(|&i| !placed[i] && indegree[i] == 0);
        let Some(idx) = next else {
            let stuck: Vec<&str> = (0..count)
                .filter(|&i| !placed[i])
                .map(|i| node_names[i].as_str())
                .collect();
            return Err(EngineError::CyclicGraph(format!(
                "no progress with nodes remaining: {}",
                stuck.join(", ")
            )));
        };

        placed[idx] = true;
        order.push(idx);
        steps.push(ScheduleStep::Process(idx));

        // Outgoing edges immediately after the node, in insertion order.
        for (c, conn) in connections.iter().enumerate() {
            if conn.source_node == idx {
                steps.push(ScheduleStep::Transfer(c));
                indegree[conn.sink_node] -= 1;
            }
        }
    }

    Ok((order, steps))
}
