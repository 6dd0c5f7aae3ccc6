//! File sink node
//!
//! `set_input` enqueues shared buffer handles onto a bounded queue; a
//! worker thread dequeues, interleaves and encodes. When the queue is
//! full the oldest queued block is dropped and an overrun reported, so
//! the realtime path never blocks on the disk. `stop()` drains the queue
//! within a configurable deadline, finalizes the encoder and joins the
//! worker.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use gm_core::{AudioBuffer, EngineError, EngineResult, SampleElement, SampleFormat};
use gm_file::{BlockWriter, WavCodec};

use crate::node::{
    check_pad_buffer, ControlOutcome, GraphContext, Node, NodeParams, NodeState, NodeStatus,
};
use crate::nodes::{reject_unknown_params, StatusSlots, DEFAULT_FLUSH_MS, JOIN_DEADLINE, QUEUE_BLOCKS};

struct Worker {
    handle: thread::JoinHandle<()>,
    stop: Arc<AtomicBool>,
    failed: Arc<AtomicBool>,
    /// Blocks dropped when the flush deadline passed.
    flush_dropped: Arc<AtomicU64>,
    completion: Receiver<()>,
}

pub struct FileSinkNode {
    state: NodeState,
    ctx: Option<GraphContext>,
    format: Option<SampleFormat>,
    path: Option<PathBuf>,
    codec: WavCodec,
    flush_ms: u64,
    tx: Option<Sender<AudioBuffer>>,
    /// Receiver clone kept for the drop-oldest policy; the worker holds
    /// its own clone.
    rx: Option<Receiver<AudioBuffer>>,
    worker: Option<Worker>,
    reported_failed: bool,
    statuses: StatusSlots,
}

impl FileSinkNode {
    pub fn new() -> Self {
        Self {
            state: NodeState::Unconfigured,
            ctx: None,
            format: None,
            path: None,
            codec: WavCodec::Pcm16,
            flush_ms: DEFAULT_FLUSH_MS,
            tx: None,
            rx: None,
            worker: None,
            reported_failed: false,
            statuses: StatusSlots::default(),
        }
    }

    /// Queue a block, dropping the oldest on overflow.
    fn enqueue(&mut self, buffer: AudioBuffer) {
        let (Some(tx), Some(rx)) = (&self.tx, &self.rx) else {
            return;
        };
        match tx.try_send(buffer) {
            Ok(()) => {}
            Err(TrySendError::Full(buffer)) => {
                // Drop-oldest: steal one from the head, then retry. If a
                // racing worker emptied the queue meanwhile the retry
                // just succeeds.
                let _ = rx.try_recv();
                self.statuses.push(NodeStatus::QueueOverrun);
                // If the queue is somehow full again, the new block is
                // the one lost; the bound is never exceeded either way.
                let _ = tx.try_send(buffer);
            }
            Err(TrySendError::Disconnected(_)) => {
                if !self.reported_failed {
                    self.reported_failed = true;
                    self.statuses.push(NodeStatus::WorkerFailed);
                }
            }
        }
    }

    fn stop_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        match worker.completion.recv_timeout(JOIN_DEADLINE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                self.statuses.push(NodeStatus::StopTimeout);
                log::warn!("file_sink worker missed the join deadline; waiting");
            }
        }
        let _ = worker.handle.join();
        if worker.flush_dropped.load(Ordering::Acquire) > 0 {
            self.statuses.push(NodeStatus::FlushDropped);
        }
        if worker.failed.load(Ordering::Acquire) && !self.reported_failed {
            self.reported_failed = true;
            self.statuses.push(NodeStatus::WorkerFailed);
        }
    }
}

impl Default for FileSinkNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for FileSinkNode {
    fn type_name(&self) -> &'static str {
        "file_sink"
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn configure(&mut self, params: &NodeParams, ctx: &GraphContext) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Unconfigured, NodeState::Stopped], "configure")?;
        reject_unknown_params(
            "file_sink",
            params,
            &["path", "codec", "format", "bitrate", "flush_deadline_ms"],
        )?;
        let path = params
            .get("path")
            .ok_or_else(|| EngineError::Config("file_sink: missing 'path'".into()))?;

        self.codec = match params.get("codec") {
            None => WavCodec::Pcm16,
            Some(name) => WavCodec::from_name(name).ok_or_else(|| {
                EngineError::Config(format!("file_sink: unknown codec '{name}'"))
            })?,
        };
        if let Some(container) = params.get("format") {
            if container != "wav" {
                return Err(EngineError::Config(format!(
                    "file_sink: unsupported container '{container}'"
                )));
            }
        }
        // Recognized for API compatibility; WAV carries no bitrate.
        if let Some(bitrate) = params.get("bitrate") {
            log::debug!("file_sink: ignoring bitrate '{bitrate}' for wav output");
        }
        self.flush_ms = match params.get("flush_deadline_ms") {
            None => DEFAULT_FLUSH_MS,
            Some(ms) => ms.parse().map_err(|_| {
                EngineError::Config(format!("file_sink: bad flush_deadline_ms '{ms}'"))
            })?,
        };

        if ctx.format.element != SampleElement::F32 {
            return Err(EngineError::Config(format!(
                "file_sink: unsupported internal element '{}'",
                ctx.format.element.name()
            )));
        }

        let (tx, rx) = bounded(QUEUE_BLOCKS);
        self.tx = Some(tx);
        self.rx = Some(rx);
        self.path = Some(PathBuf::from(path));
        self.format = Some(ctx.format.clone());
        self.ctx = Some(ctx.clone());
        self.state = NodeState::Configured;
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        if self.state == NodeState::Running {
            return Ok(());
        }
        self.state
            .ensure(&[NodeState::Configured, NodeState::Stopped], "start")?;

        // A fresh queue per run: stop() drains the old one.
        let (tx, rx) = bounded(QUEUE_BLOCKS);
        self.tx = Some(tx);
        self.rx = Some(rx.clone());

        let stop = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let flush_dropped = Arc::new(AtomicU64::new(0));
        let (completion_tx, completion_rx) = bounded(1);

        let ctx = self.ctx.clone().expect("configured");
        let format = self.format.clone().expect("configured");
        let path = self.path.clone().expect("configured");
        let codec = self.codec;
        let flush_ms = self.flush_ms;
        let worker_stop = Arc::clone(&stop);
        let worker_failed = Arc::clone(&failed);
        let worker_dropped = Arc::clone(&flush_dropped);

        let handle = thread::Builder::new()
            .name("gm-file-sink".into())
            .spawn(move || {
                if let Err(err) = write_stream(
                    &path,
                    codec,
                    &ctx,
                    &format,
                    &rx,
                    &worker_stop,
                    &worker_dropped,
                    flush_ms,
                ) {
                    log::error!("file_sink worker failed: {err}");
                    worker_failed.store(true, Ordering::Release);
                }
                let _ = completion_tx.send(());
            })
            .map_err(EngineError::Io)?;

        self.worker = Some(Worker {
            handle,
            stop,
            failed,
            flush_dropped,
            completion: completion_rx,
        });
        self.reported_failed = false;
        self.state = NodeState::Running;
        Ok(())
    }

    fn process(&mut self) -> EngineResult<()> {
        // Input arrives through set_input during edge transfers; process
        // only validates lifecycle.
        self.state.ensure(&[NodeState::Running], "process")
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.state.ensure(&[NodeState::Running], "stop")?;
        self.stop_worker();
        self.tx = None;
        self.rx = None;
        self.state = NodeState::Stopped;
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Configured, NodeState::Stopped], "reset")?;
        // Drain anything still queued from the last run.
        if let Some(rx) = &self.rx {
            while rx.try_recv().is_ok() {}
        }
        self.reported_failed = false;
        self.statuses.clear();
        self.state = NodeState::Configured;
        Ok(())
    }

    fn input_count(&self) -> usize {
        1
    }

    fn output_count(&self) -> usize {
        0
    }

    fn input_format(&self, pad: usize) -> Option<SampleFormat> {
        (pad == 0).then(|| self.format.clone()).flatten()
    }

    fn output_format(&self, _pad: usize) -> Option<SampleFormat> {
        None
    }

    fn set_input(&mut self, buffer: AudioBuffer, pad: usize) -> EngineResult<()> {
        if pad != 0 {
            return Err(EngineError::FormatMismatch(format!(
                "file_sink has no input pad {pad}"
            )));
        }
        self.state.ensure(&[NodeState::Running], "set_input")?;
        let (Some(format), Some(ctx)) = (self.format.as_ref(), self.ctx.as_ref()) else {
            return Err(EngineError::InvalidState("file_sink unconfigured".into()));
        };
        check_pad_buffer(&buffer, format, ctx.sample_rate, ctx.block_frames)?;
        self.enqueue(buffer);
        Ok(())
    }

    fn take_output(&mut self, _pad: usize) -> Option<AudioBuffer> {
        None
    }

    fn control_message(&mut self, _kind: &str, _params: &NodeParams) -> EngineResult<ControlOutcome> {
        Ok(ControlOutcome::Unhandled)
    }

    fn take_status(&mut self) -> Option<NodeStatus> {
        self.statuses.pop()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for FileSinkNode {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Worker body: drain the queue to disk, flush on stop, finalize.
#[allow(clippy::too_many_arguments)]
fn write_stream(
    path: &Path,
    codec: WavCodec,
    ctx: &GraphContext,
    format: &SampleFormat,
    rx: &Receiver<AudioBuffer>,
    stop: &AtomicBool,
    flush_dropped: &AtomicU64,
    flush_ms: u64,
) -> EngineResult<()> {
    let channels = format.channel_count();
    let mut writer = BlockWriter::create(path, ctx.sample_rate, channels, codec)
        .map_err(EngineError::from)?;
    let mut planes: Vec<Vec<f32>> = vec![Vec::with_capacity(ctx.block_frames); channels];

    loop {
        if stop.load(Ordering::Acquire) {
            break;
        }
        match rx.recv_timeout(Duration::from_millis(20)) {
            Ok(buffer) => write_buffer(&mut writer, &buffer, &mut planes)?,
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    // Flush: drain what is queued within the deadline, count the rest as
    // dropped.
    let deadline = Instant::now() + Duration::from_millis(flush_ms);
    while Instant::now() < deadline {
        match rx.try_recv() {
            Ok(buffer) => write_buffer(&mut writer, &buffer, &mut planes)?,
            Err(_) => break,
        }
    }
    while rx.try_recv().is_ok() {
        flush_dropped.fetch_add(1, Ordering::AcqRel);
    }

    writer.finalize().map_err(EngineError::from)?;
    Ok(())
}

fn write_buffer(
    writer: &mut BlockWriter,
    buffer: &AudioBuffer,
    planes: &mut [Vec<f32>],
) -> EngineResult<()> {
    for (c, plane) in planes.iter_mut().enumerate() {
        plane.clear();
        plane.extend(buffer.channel_f32(c)?);
    }
    let refs: Vec<&[f32]> = planes.iter().map(Vec::as_slice).collect();
    writer.write_block(&refs).map_err(EngineError::from)
}
