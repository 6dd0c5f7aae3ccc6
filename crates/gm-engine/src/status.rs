//! Status reporting
//!
//! Two delivery paths into one callback registry:
//! - non-realtime contexts call [`StatusRegistry::dispatch`] directly;
//! - the realtime path pushes compact [`RtStatus`] records into a
//!   lock-free ring, drained by a dedicated reporter thread that formats
//!   the prose and fans out to callbacks.
//!
//! Callbacks are removed only via the opaque handle returned at
//! registration; there is no filter-based subscription or eviction.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::RwLock;

use crate::node::NodeStatus;

/// Capacity of the realtime status ring. Statuses beyond this between
/// reporter wakeups are dropped (the realtime path never blocks).
pub const RT_STATUS_CAPACITY: usize = 256;

/// Status categories, exactly as surfaced to callbacks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCategory {
    Error,
    Warning,
    Info,
    Underrun,
    Overrun,
}

impl StatusCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Error => "Error",
            Self::Warning => "Warning",
            Self::Info => "Info",
            Self::Underrun => "Underrun",
            Self::Overrun => "Overrun",
        }
    }
}

/// Compact status record pushed from the realtime path
#[derive(Debug, Clone, Copy)]
pub struct RtStatus {
    /// Node index in the graph.
    pub node: u32,
    pub status: NodeStatus,
}

/// Opaque handle for removing a status callback
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct StatusCallbackId(u64);

type StatusCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Registry of `(category, message)` callbacks
pub struct StatusRegistry {
    callbacks: RwLock<Vec<(u64, StatusCallback)>>,
    next_id: AtomicU64,
}

impl StatusRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            callbacks: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
        })
    }

    pub fn add_status_callback<F>(&self, callback: F) -> StatusCallbackId
    where
        F: Fn(&str, &str) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.write().push((id, Box::new(callback)));
        StatusCallbackId(id)
    }

    pub fn remove_status_callback(&self, id: StatusCallbackId) {
        self.callbacks.write().retain(|(cb_id, _)| *cb_id != id.0);
    }

    /// Deliver a status to every callback. Non-realtime contexts only.
    pub fn dispatch(&self, category: StatusCategory, message: &str) {
        match category {
            StatusCategory::Error => log::error!("{message}"),
            StatusCategory::Warning | StatusCategory::Underrun | StatusCategory::Overrun => {
                log::warn!("{message}");
            }
            StatusCategory::Info => log::info!("{message}"),
        }
        for (_, callback) in self.callbacks.read().iter() {
            callback(category.as_str(), message);
        }
    }
}

/// Category and prose for a node status record.
fn describe(status: NodeStatus, node_label: &str) -> (StatusCategory, String) {
    match status {
        NodeStatus::SourceUnderrun => (
            StatusCategory::Underrun,
            format!("{node_label}: output queue empty, emitting silence"),
        ),
        NodeStatus::SinkUnderrun => (
            StatusCategory::Underrun,
            format!("{node_label}: no input since last block, emitting silence"),
        ),
        NodeStatus::QueueOverrun => (
            StatusCategory::Overrun,
            format!("{node_label}: writer queue full, dropped oldest block"),
        ),
        NodeStatus::PoolExhausted => (
            StatusCategory::Warning,
            format!("{node_label}: output pool exhausted, allocating"),
        ),
        NodeStatus::WorkerFailed => (
            StatusCategory::Error,
            format!("{node_label}: worker thread failed, emitting silence until reset"),
        ),
        NodeStatus::ProcessFailed => (
            StatusCategory::Error,
            format!("{node_label}: process failed for this block"),
        ),
        NodeStatus::TransferFailed => (
            StatusCategory::Error,
            format!("{node_label}: pad transfer rejected"),
        ),
        NodeStatus::StopTimeout => (
            StatusCategory::Warning,
            format!("{node_label}: worker missed the join deadline"),
        ),
        NodeStatus::FlushDropped => (
            StatusCategory::Warning,
            format!("{node_label}: flush deadline passed, queued blocks dropped"),
        ),
        NodeStatus::EndOfStream => (StatusCategory::Info, format!("{node_label}: end of stream")),
    }
}

/// Reporter thread draining the realtime status ring
pub struct StatusReporter {
    handle: Option<thread::JoinHandle<()>>,
    stop: Arc<AtomicBool>,
}

impl StatusReporter {
    /// Spawn the reporter. `node_labels` carries `"type 'name'"` labels
    /// indexed like the graph's node list.
    pub fn spawn(
        registry: Arc<StatusRegistry>,
        mut consumer: rtrb::Consumer<RtStatus>,
        node_labels: Arc<Vec<String>>,
    ) -> Self {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_flag = Arc::clone(&stop);
        let handle = thread::Builder::new()
            .name("gm-status".into())
            .spawn(move || {
                loop {
                    while let Ok(rt) = consumer.pop() {
                        let label = node_labels
                            .get(rt.node as usize)
                            .map(String::as_str)
                            .unwrap_or("unknown node");
                        let (category, message) = describe(rt.status, label);
                        registry.dispatch(category, &message);
                    }
                    if stop_flag.load(Ordering::Acquire) {
                        // Final drain happened above; exit.
                        break;
                    }
                    thread::sleep(Duration::from_millis(1));
                }
            })
            .expect("spawn status reporter");
        Self {
            handle: Some(handle),
            stop,
        }
    }

    /// Drain remaining records and stop the thread.
    pub fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for StatusReporter {
    fn drop(&mut self) {
        self.shutdown();
    }
}
