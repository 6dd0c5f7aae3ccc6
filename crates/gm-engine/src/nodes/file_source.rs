//! File source node
//!
//! Keeps decoding off the realtime path: a worker thread reads the file
//! through [`gm_file::BlockReader`], resamples to the engine rate when
//! needed, and pushes full blocks into a bounded queue. The realtime
//! `process()` only dequeues; an empty queue yields silence and an
//! underrun status, and a cleanly finished stream stops producing so
//! downstream files keep exact sample counts.

use std::any::Any;
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TrySendError};

use gm_core::{
    AudioBuffer, BufferPool, ChannelLayout, EngineError, EngineResult, SampleElement, SampleFormat,
};
use gm_file::{BlockReader, RateConverter};

use crate::node::{ControlOutcome, GraphContext, Node, NodeParams, NodeState, NodeStatus};
use crate::nodes::{reject_unknown_params, StatusSlots, JOIN_DEADLINE, POOL_SLOTS, QUEUE_BLOCKS};

struct Worker {
    handle: thread::JoinHandle<()>,
    stop: Arc<AtomicBool>,
    /// Set when the stream reached its natural end.
    eof: Arc<AtomicBool>,
    /// Set when the worker failed; the node emits silence until reset.
    failed: Arc<AtomicBool>,
    completion: Receiver<()>,
}

pub struct FileSourceNode {
    state: NodeState,
    ctx: Option<GraphContext>,
    format: Option<SampleFormat>,
    path: Option<PathBuf>,
    loop_playback: bool,
    rx: Option<Receiver<AudioBuffer>>,
    worker: Option<Worker>,
    silence: Option<AudioBuffer>,
    out: Option<AudioBuffer>,
    finished: bool,
    reported_failed: bool,
    reported_eos: bool,
    statuses: StatusSlots,
}

impl FileSourceNode {
    pub fn new() -> Self {
        Self {
            state: NodeState::Unconfigured,
            ctx: None,
            format: None,
            path: None,
            loop_playback: false,
            rx: None,
            worker: None,
            silence: None,
            out: None,
            finished: false,
            reported_failed: false,
            reported_eos: false,
            statuses: StatusSlots::default(),
        }
    }

    fn stop_worker(&mut self) {
        let Some(worker) = self.worker.take() else {
            return;
        };
        worker.stop.store(true, Ordering::Release);
        // Unblock a worker waiting on a full queue.
        if let Some(rx) = &self.rx {
            while rx.try_recv().is_ok() {}
        }
        match worker.completion.recv_timeout(JOIN_DEADLINE) {
            Ok(()) | Err(RecvTimeoutError::Disconnected) => {}
            Err(RecvTimeoutError::Timeout) => {
                self.statuses.push(NodeStatus::StopTimeout);
                log::warn!("file_source worker missed the join deadline; waiting");
            }
        }
        let _ = worker.handle.join();
    }

    #[cfg(test)]
    pub(crate) fn kill_worker_for_test(&mut self) {
        if let Some(worker) = &self.worker {
            worker.failed.store(true, Ordering::Release);
            worker.stop.store(true, Ordering::Release);
        }
        if let Some(rx) = &self.rx {
            while rx.try_recv().is_ok() {}
        }
    }
}

impl Default for FileSourceNode {
    fn default() -> Self {
        Self::new()
    }
}

impl Node for FileSourceNode {
    fn type_name(&self) -> &'static str {
        "file_source"
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn configure(&mut self, params: &NodeParams, ctx: &GraphContext) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Unconfigured, NodeState::Stopped], "configure")?;
        reject_unknown_params("file_source", params, &["path", "loop"])?;
        let path = params
            .get("path")
            .ok_or_else(|| EngineError::Config("file_source: missing 'path'".into()))?;
        self.loop_playback = match params.get("loop").map(String::as_str) {
            None | Some("false") => false,
            Some("true") => true,
            Some(other) => {
                return Err(EngineError::Config(format!(
                    "file_source: 'loop' must be true or false, got '{other}'"
                )));
            }
        };
        if ctx.format.element != SampleElement::F32 {
            return Err(EngineError::Config(format!(
                "file_source: unsupported internal element '{}'",
                ctx.format.element.name()
            )));
        }

        // Probe now so the pad format is known at configure time; the
        // worker reopens for streaming.
        let probe = BlockReader::open(path).map_err(EngineError::from)?;
        let format = SampleFormat::new(
            SampleElement::F32,
            ctx.format.layout,
            ChannelLayout::from_count(probe.channels()),
        );

        self.silence = Some(AudioBuffer::new(
            ctx.block_frames,
            ctx.sample_rate,
            format.clone(),
        )?);
        self.path = Some(PathBuf::from(path));
        self.format = Some(format);
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

        let (tx, rx) = bounded(QUEUE_BLOCKS);
        let stop = Arc::new(AtomicBool::new(false));
        let eof = Arc::new(AtomicBool::new(false));
        let failed = Arc::new(AtomicBool::new(false));
        let (completion_tx, completion_rx) = bounded(1);

        let ctx = self.ctx.clone().expect("configured");
        let format = self.format.clone().expect("configured");
        let path = self.path.clone().expect("configured");
        let loop_playback = self.loop_playback;
        let worker_stop = Arc::clone(&stop);
        let worker_eof = Arc::clone(&eof);
        let worker_failed = Arc::clone(&failed);

        let handle = thread::Builder::new()
            .name("gm-file-source".into())
            .spawn(move || {
                match stream_file(
                    &path,
                    loop_playback,
                    &ctx,
                    &format,
                    &tx,
                    &worker_stop,
                ) {
                    Ok(reached_eof) => {
                        if reached_eof {
                            worker_eof.store(true, Ordering::Release);
                        }
                    }
                    Err(err) => {
                        log::error!("file_source worker failed: {err}");
                        worker_failed.store(true, Ordering::Release);
                    }
                }
                let _ = completion_tx.send(());
            })
            .map_err(EngineError::Io)?;

        // Prime: let the worker fill the queue before the first block so
        // startup does not read as an underrun.
        let deadline = std::time::Instant::now() + Duration::from_millis(500);
        while std::time::Instant::now() < deadline {
            if !rx.is_empty() || eof.load(Ordering::Acquire) || failed.load(Ordering::Acquire) {
                break;
            }
            thread::sleep(Duration::from_millis(1));
        }

        self.rx = Some(rx);
        self.worker = Some(Worker {
            handle,
            stop,
            eof,
            failed,
            completion: completion_rx,
        });
        self.finished = false;
        self.reported_failed = false;
        self.reported_eos = false;
        self.state = NodeState::Running;
        Ok(())
    }

    fn process(&mut self) -> EngineResult<()> {
        self.state.ensure(&[NodeState::Running], "process")?;
        let (eof, failed) = match &self.worker {
            Some(worker) => (
                worker.eof.load(Ordering::Acquire),
                worker.failed.load(Ordering::Acquire),
            ),
            None => (false, true),
        };

        let received = self.rx.as_ref().and_then(|rx| rx.try_recv().ok());
        self.out = match received {
            Some(buf) => Some(buf),
            None if failed => {
                // Stopped-with-error worker: silence until reset, with
                // an underrun per block and the failure reported once.
                if !self.reported_failed {
                    self.reported_failed = true;
                    self.statuses.push(NodeStatus::WorkerFailed);
                }
                self.statuses.push(NodeStatus::SourceUnderrun);
                self.silence.as_ref().map(AudioBuffer::share)
            }
            None if eof => {
                // Clean end of input: stop producing entirely.
                self.finished = true;
                if !self.reported_eos {
                    self.reported_eos = true;
                    self.statuses.push(NodeStatus::EndOfStream);
                }
                None
            }
            None => {
                // Worker alive but late.
                self.statuses.push(NodeStatus::SourceUnderrun);
                self.silence.as_ref().map(AudioBuffer::share)
            }
        };
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.state.ensure(&[NodeState::Running], "stop")?;
        self.stop_worker();
        self.rx = None;
        self.out = None;
        self.state = NodeState::Stopped;
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
        self.state
            .ensure(&[NodeState::Configured, NodeState::Stopped], "reset")?;
        self.out = None;
        self.finished = false;
        self.reported_failed = false;
        self.reported_eos = false;
        self.statuses.clear();
        self.state = NodeState::Configured;
        Ok(())
    }

    fn input_count(&self) -> usize {
        0
    }

    fn output_count(&self) -> usize {
        1
    }

    fn input_format(&self, _pad: usize) -> Option<SampleFormat> {
        None
    }

    fn output_format(&self, pad: usize) -> Option<SampleFormat> {
        (pad == 0).then(|| self.format.clone()).flatten()
    }

    fn set_input(&mut self, _buffer: AudioBuffer, pad: usize) -> EngineResult<()> {
        Err(EngineError::FormatMismatch(format!(
            "file_source has no input pad {pad}"
        )))
    }

    fn take_output(&mut self, pad: usize) -> Option<AudioBuffer> {
        (pad == 0).then(|| self.out.take()).flatten()
    }

    fn control_message(&mut self, _kind: &str, _params: &NodeParams) -> EngineResult<ControlOutcome> {
        Ok(ControlOutcome::Unhandled)
    }

    fn is_finished(&self) -> bool {
        self.finished
    }

    fn take_status(&mut self) -> Option<NodeStatus> {
        self.statuses.pop()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

impl Drop for FileSourceNode {
    fn drop(&mut self) {
        self.stop_worker();
    }
}

/// Worker body. Returns `Ok(true)` at natural end of stream, `Ok(false)`
/// when stopped early.
fn stream_file(
    path: &Path,
    loop_playback: bool,
    ctx: &GraphContext,
    format: &SampleFormat,
    tx: &Sender<AudioBuffer>,
    stop: &AtomicBool,
) -> EngineResult<bool> {
    let block = ctx.block_frames;
    let channels = format.channel_count();
    let mut pool = BufferPool::new(POOL_SLOTS, block, ctx.sample_rate, format)?;
    let mut staging: Vec<Vec<f32>> = vec![vec![0.0; block]; channels];
    let mut backlog: Vec<VecDeque<f32>> = (0..channels).map(|_| VecDeque::new()).collect();
    let mut chunk: Vec<f32> = vec![0.0; block];

    'stream: loop {
        let mut reader = BlockReader::open(path).map_err(EngineError::from)?;
        if reader.channels() != channels {
            return Err(EngineError::FormatMismatch(format!(
                "file changed channel count: {} vs {}",
                reader.channels(),
                channels
            )));
        }
        let mut converter = if reader.sample_rate() != ctx.sample_rate {
            Some(
                RateConverter::new(reader.sample_rate(), ctx.sample_rate, channels)
                    .map_err(EngineError::from)?,
            )
        } else {
            None
        };

        loop {
            if stop.load(Ordering::Acquire) {
                return Ok(false);
            }
            let frames = reader
                .read_block(&mut staging, block)
                .map_err(EngineError::from)?;
            if frames == 0 {
                if loop_playback {
                    // Converter state is dropped on rewind; a fresh one
                    // avoids splicing tails across iterations.
                    continue 'stream;
                }
                if let Some(converter) = &mut converter {
                    let tail = converter.flush().map_err(EngineError::from)?;
                    push_planar(&mut backlog, &tail, tail[0].len());
                }
                drain_backlog(
                    &mut backlog,
                    &mut pool,
                    &mut chunk,
                    ctx,
                    format,
                    tx,
                    stop,
                    true,
                )?;
                return Ok(true);
            }

            match &mut converter {
                Some(converter) => {
                    let converted = converter
                        .process(&staging, frames)
                        .map_err(EngineError::from)?;
                    push_planar(&mut backlog, &converted, converted[0].len());
                }
                None => push_planar(&mut backlog, &staging, frames),
            }
            if !drain_backlog(
                &mut backlog,
                &mut pool,
                &mut chunk,
                ctx,
                format,
                tx,
                stop,
                false,
            )? {
                return Ok(false);
            }
        }
    }
}

fn push_planar(backlog: &mut [VecDeque<f32>], planes: &[Vec<f32>], frames: usize) {
    for (queue, plane) in backlog.iter_mut().zip(planes) {
        queue.extend(plane[..frames].iter().copied());
    }
}

/// Send full blocks from the backlog; with `final_flush` also the
/// remaining partial tail. Returns false when stopped mid-send.
#[allow(clippy::too_many_arguments)]
fn drain_backlog(
    backlog: &mut [VecDeque<f32>],
    pool: &mut BufferPool,
    chunk: &mut [f32],
    ctx: &GraphContext,
    format: &SampleFormat,
    tx: &Sender<AudioBuffer>,
    stop: &AtomicBool,
    final_flush: bool,
) -> EngineResult<bool> {
    let block = ctx.block_frames;
    loop {
        let available = backlog[0].len();
        let frames = if available >= block {
            block
        } else if final_flush && available > 0 {
            available
        } else {
            return Ok(true);
        };

        let mut buffer = if frames == block {
            match pool.acquire() {
                Some(slot) => {
                    fill_slot(slot, backlog, chunk, frames);
                    slot.share()
                }
                None => {
                    // Queue consumers hold every slot; allocate.
                    let mut fresh =
                        AudioBuffer::new(frames, ctx.sample_rate, format.clone())?;
                    fill_slot(&mut fresh, backlog, chunk, frames);
                    fresh
                }
            }
        } else {
            // Short tail block gets an exact-size buffer.
            let mut fresh = AudioBuffer::new(frames, ctx.sample_rate, format.clone())?;
            fill_slot(&mut fresh, backlog, chunk, frames);
            fresh
        };

        // Blocking send with stop awareness: suspend while the queue is
        // full, never drop source data.
        loop {
            if stop.load(Ordering::Acquire) {
                return Ok(false);
            }
            match tx.try_send(buffer) {
                Ok(()) => break,
                Err(TrySendError::Full(back)) => {
                    buffer = back;
                    thread::sleep(Duration::from_millis(2));
                }
                Err(TrySendError::Disconnected(_)) => return Ok(false),
            }
        }
    }
}

fn fill_slot(slot: &mut AudioBuffer, backlog: &mut [VecDeque<f32>], chunk: &mut [f32], frames: usize) {
    for (c, queue) in backlog.iter_mut().enumerate() {
        for sample in chunk[..frames].iter_mut() {
            *sample = queue.pop_front().unwrap_or(0.0);
        }
        let _ = slot.copy_into_channel(c, &chunk[..frames]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_wav(frames: usize, rate: u32) -> tempfile::TempPath {
        let file = tempfile::Builder::new().suffix(".wav").tempfile().unwrap();
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: rate,
            bits_per_sample: 32,
            sample_format: hound::SampleFormat::Float,
        };
        let mut writer = hound::WavWriter::create(file.path(), spec).unwrap();
        for i in 0..frames {
            writer.write_sample(i as f32 / frames as f32).unwrap();
            writer.write_sample(-(i as f32) / frames as f32).unwrap();
        }
        writer.finalize().unwrap();
        file.into_temp_path()
    }

    fn ctx() -> GraphContext {
        GraphContext {
            sample_rate: 48000,
            block_frames: 256,
            format: SampleFormat::planar_f32(ChannelLayout::stereo()),
        }
    }

    fn configured(path: &std::path::Path) -> FileSourceNode {
        let mut node = FileSourceNode::new();
        let mut params = NodeParams::new();
        params.insert("path".into(), path.to_string_lossy().into_owned());
        node.configure(&params, &ctx()).unwrap();
        node
    }

    fn drain_all(node: &mut FileSourceNode) -> (usize, Vec<AudioBuffer>) {
        let mut blocks = Vec::new();
        let mut total = 0;
        // Generous retry cap: the worker fills asynchronously.
        for _ in 0..2000 {
            node.process().unwrap();
            if node.is_finished() {
                break;
            }
            if let Some(buf) = node.take_output(0) {
                // Ignore silence blocks from startup underruns.
                if node.take_status() == Some(NodeStatus::SourceUnderrun) {
                    thread::sleep(Duration::from_millis(1));
                    continue;
                }
                total += buf.frames();
                blocks.push(buf);
            }
        }
        (total, blocks)
    }

    #[test]
    fn test_configure_requires_path() {
        let mut node = FileSourceNode::new();
        assert!(node.configure(&NodeParams::new(), &ctx()).is_err());

        let mut params = NodeParams::new();
        params.insert("path".into(), "/nonexistent/in.wav".into());
        assert!(node.configure(&params, &ctx()).is_err());
    }

    #[test]
    fn test_reads_exact_sample_count() {
        // 700 frames = 2 full blocks + a 188-frame tail at block 256.
        let path = write_wav(700, 48000);
        let mut node = configured(&path);
        node.start().unwrap();

        let (total, blocks) = drain_all(&mut node);
        assert_eq!(total, 700);
        assert_eq!(blocks.last().unwrap().frames(), 188);
        assert!(node.is_finished());

        node.stop().unwrap();
    }

    #[test]
    fn test_block_content_matches_file() {
        let path = write_wav(512, 48000);
        let mut node = configured(&path);
        node.start().unwrap();

        let (total, blocks) = drain_all(&mut node);
        assert_eq!(total, 512);
        let first = &blocks[0];
        let left = first.plane_f32(0).unwrap();
        let right = first.plane_f32(1).unwrap();
        assert!((left[10] - 10.0 / 512.0).abs() < 1e-7);
        assert!((right[10] + 10.0 / 512.0).abs() < 1e-7);
    }

    #[test]
    fn test_underrun_after_worker_death() {
        let path = write_wav(48000, 48000);
        let mut node = configured(&path);
        node.start().unwrap();

        node.kill_worker_for_test();
        // Give the worker a moment to observe the stop flag.
        thread::sleep(Duration::from_millis(50));
        while node.rx.as_ref().unwrap().try_recv().is_ok() {}

        node.process().unwrap();
        let out = node.take_output(0).unwrap();
        assert!(out.plane_f32(0).unwrap().iter().all(|&s| s == 0.0));

        let mut seen = Vec::new();
        while let Some(status) = node.take_status() {
            seen.push(status);
        }
        assert!(seen.contains(&NodeStatus::WorkerFailed));
        assert!(seen.contains(&NodeStatus::SourceUnderrun));

        // Underrun repeats every block, the failure is reported once.
        node.process().unwrap();
        assert_eq!(node.take_status(), Some(NodeStatus::SourceUnderrun));
        assert!(!node.is_finished());

        node.stop().unwrap();
    }

    #[test]
    fn test_stop_joins_within_deadline() {
        let path = write_wav(480000, 48000); // long file, queue stays full
        let mut node = configured(&path);
        node.start().unwrap();
        thread::sleep(Duration::from_millis(50));

        let started = std::time::Instant::now();
        node.stop().unwrap();
        assert!(started.elapsed() < JOIN_DEADLINE);
        assert_eq!(node.state(), NodeState::Stopped);
    }

    #[test]
    fn test_resampled_source_produces_engine_rate() {
        let path = write_wav(44100, 44100);
        let mut node = configured(&path);
        node.start().unwrap();

        let (total, blocks) = drain_all(&mut node);
        // One second of audio lands near 48000 frames at the engine
        // rate (sinc latency trims a little).
        assert!((total as i64 - 48000).unsigned_abs() < 2000, "{total}");
        assert!(blocks.iter().all(|b| b.sample_rate() == 48000));
        node.stop().unwrap();
    }
}
