//! Engine orchestration
//!
//! Builds the node graph from a validated configuration, computes the
//! process order, wires the driver bridge and control surface, and
//! drives the per-block pass. With a hardware driver the callback thread
//! invokes [`GraphRunner::process_block`] directly; without one a pacing
//! thread advances the graph at block-duration intervals until every
//! source reports end of stream.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use gm_audio::{DriverBridge, DriverBuffers};
use gm_core::{
    ChannelLayout, EngineError, EngineResult, SampleElement, SampleFormat, SampleLayout,
};

use crate::config::{ControlArgValue, EngineConfig};
use crate::control::{ControlArg, ControlCallbackId, ControlSurface};
use crate::factory::NodeFactory;
use crate::graph::{BufferPolicy, Connection, Pad, PadDirection};
use crate::node::{ControlOutcome, GraphContext, Node, NodeParams, NodeState, NodeStatus};
use crate::nodes::{AsioSinkNode, AsioSourceNode, ConvertNode};
use crate::schedule::{compute_schedule, ScheduleStep};
use crate::status::{RtStatus, StatusRegistry, StatusReporter, RT_STATUS_CAPACITY};

/// Default preferred sample rate when neither configuration nor driver
/// says otherwise.
pub const DEFAULT_SAMPLE_RATE: u32 = 48000;

/// Default preferred block size in frames.
pub const DEFAULT_BLOCK_FRAMES: usize = 512;

/// Address prefix the engine claims on the control surface; events at
/// `/gridmix/node/<name>` become control messages for the named node.
pub const CONTROL_NODE_PREFIX: &str = "/gridmix/node/";

/// Process-wide cancellation token, passed explicitly into `run`.
#[derive(Clone)]
pub struct ShutdownToken(Arc<AtomicBool>);

impl ShutdownToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn shutdown(&self) {
        self.0.store(true, Ordering::Release);
    }

    pub fn is_shutdown(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

impl Default for ShutdownToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    New,
    Initialized,
    Running,
    Stopped,
    Cleaned,
}

/// Collaborators handed to the engine at construction
pub struct EngineOptions {
    pub driver: Option<Box<dyn DriverBridge>>,
    pub control: Option<Box<dyn ControlSurface>>,
    pub factory: NodeFactory,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            driver: None,
            control: None,
            factory: NodeFactory::with_builtin(),
        }
    }
}

pub(crate) struct NodeEntry {
    pub name: String,
    pub node: Box<dyn Node>,
}

/// The per-block state shared with the driver callback
pub struct GraphRunner {
    nodes: Vec<NodeEntry>,
    connections: Vec<Connection>,
    schedule: Vec<ScheduleStep>,
    order: Vec<usize>,
    driver_sources: Vec<usize>,
    driver_sinks: Vec<usize>,
    rt_status: rtrb::Producer<RtStatus>,
}

impl GraphRunner {
    /// One full pass: driver inputs, nodes and transfers in schedule
    /// order, driver outputs. Runs on the realtime path; errors become
    /// ring statuses and the pass always completes.
    pub fn process_block(&mut self, half: u32, mut driver: Option<&mut dyn DriverBuffers>) {
        for k in 0..self.driver_sources.len() {
            let idx = self.driver_sources[k];
            if let Some(buffers) = driver.as_deref_mut() {
                if let Some(source) = self.nodes[idx]
                    .node
                    .as_any_mut()
                    .downcast_mut::<AsioSourceNode>()
                {
                    source.accept_driver_block(half, buffers);
                }
            }
        }

        // Only the first process() failure per block becomes a status
        // event; every remaining node still runs.
        let mut first_error_reported = false;
        for k in 0..self.schedule.len() {
            match self.schedule[k] {
                ScheduleStep::Process(i) => {
                    let entry = &mut self.nodes[i];
                    if entry.node.state() == NodeState::Running
                        && entry.node.process().is_err()
                        && !first_error_reported
                    {
                        first_error_reported = true;
                        let _ = self.rt_status.push(RtStatus {
                            node: i as u32,
                            status: NodeStatus::ProcessFailed,
                        });
                    }
                    while let Some(status) = entry.node.take_status() {
                        let _ = self.rt_status.push(RtStatus {
                            node: i as u32,
                            status,
                        });
                    }
                }
                ScheduleStep::Transfer(c) => self.transfer(c),
            }
        }

        for k in 0..self.driver_sinks.len() {
            let idx = self.driver_sinks[k];
            if let Some(buffers) = driver.as_deref_mut() {
                if let Some(sink) = self.nodes[idx]
                    .node
                    .as_any_mut()
                    .downcast_mut::<AsioSinkNode>()
                {
                    sink.produce_driver_block(half, buffers);
                }
            }
            let entry = &mut self.nodes[idx];
            while let Some(status) = entry.node.take_status() {
                let _ = self.rt_status.push(RtStatus {
                    node: idx as u32,
                    status,
                });
            }
        }
    }

    fn transfer(&mut self, c: usize) {
        let conn = self.connections[c];
        let Some(buffer) = self.nodes[conn.source_node]
            .node
            .take_output(conn.source_pad)
        else {
            return;
        };
        let buffer = match conn.resolved {
            BufferPolicy::DeepCopy => match buffer.deep_copy() {
                Ok(copy) => copy,
                Err(_) => {
                    let _ = self.rt_status.push(RtStatus {
                        node: conn.sink_node as u32,
                        status: NodeStatus::TransferFailed,
                    });
                    return;
                }
            },
            _ => buffer,
        };
        if self.nodes[conn.sink_node]
            .node
            .set_input(buffer, conn.sink_pad)
            .is_err()
        {
            let _ = self.rt_status.push(RtStatus {
                node: conn.sink_node as u32,
                status: NodeStatus::TransferFailed,
            });
        }
    }

    /// True once every source node (no input pads) reports end of
    /// stream.
    pub fn all_sources_finished(&self) -> bool {
        self.nodes
            .iter()
            .filter(|entry| entry.node.input_count() == 0)
            .all(|entry| entry.node.is_finished())
    }

    fn find(&self, name: &str) -> Option<usize> {
        self.nodes.iter().position(|entry| entry.name == name)
    }
}

/// The audio engine: owns nodes, connections, scheduler, driver bridge
/// and control handle.
pub struct Engine {
    state: EngineState,
    sample_rate: u32,
    block_frames: usize,
    runner: Arc<Mutex<GraphRunner>>,
    node_names: Vec<String>,
    driver: Option<Box<dyn DriverBridge>>,
    control: Option<Box<dyn ControlSurface>>,
    control_cb: Option<ControlCallbackId>,
    initial_commands: Vec<(String, Vec<ControlArg>)>,
    status: Arc<StatusRegistry>,
    reporter: Option<StatusReporter>,
    pacer: Option<thread::JoinHandle<()>>,
    pacer_stop: Arc<AtomicBool>,
    idle: Arc<AtomicBool>,
    fatal: bool,
}

impl std::fmt::Debug for Engine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Engine").finish_non_exhaustive()
    }
}

impl Engine {
    /// Build and configure the graph. On failure everything constructed
    /// so far is dropped (worker-owning nodes shut down in their Drop)
    /// and the error is returned; no partial engine exists.
    pub fn new(config: EngineConfig, mut options: EngineOptions) -> EngineResult<Self> {
        let element = match config.internal_format.as_deref() {
            None => SampleElement::F32,
            Some(name) => SampleElement::from_name(name)
                .ok_or_else(|| EngineError::Config(format!("unknown internal_format '{name}'")))?,
        };
        if element != SampleElement::F32 {
            return Err(EngineError::Config(format!(
                "internal processing requires f32 samples, got '{}'",
                element.name()
            )));
        }
        let layout = match config.internal_layout.as_deref() {
            None => SampleLayout::Planar,
            Some(name) => SampleLayout::from_name(name)
                .ok_or_else(|| EngineError::Config(format!("unknown internal_layout '{name}'")))?,
        };

        let mut sample_rate = config.sample_rate.unwrap_or(DEFAULT_SAMPLE_RATE);
        let mut block_frames = config.block_frames.unwrap_or(DEFAULT_BLOCK_FRAMES);

        // The driver negotiates first so nodes configure against the
        // rates the hardware actually granted.
        if let Some(driver) = options.driver.as_mut() {
            let device = config.audio_device.as_deref().unwrap_or("default");
            driver.load(device).map_err(EngineError::from)?;
            let (rate, block) = driver
                .init(sample_rate, block_frames)
                .map_err(EngineError::from)?;
            sample_rate = rate;
            block_frames = block;
        }

        // Instantiate nodes; names must be unique (invariant 2).
        let mut names: Vec<String> = Vec::with_capacity(config.nodes.len());
        let mut nodes: Vec<NodeEntry> = Vec::with_capacity(config.nodes.len());
        for node_config in &config.nodes {
            if names.contains(&node_config.name) {
                return Err(EngineError::Config(format!(
                    "duplicate node name '{}'",
                    node_config.name
                )));
            }
            let node = options.factory.create(&node_config.node_type)?;
            names.push(node_config.name.clone());
            nodes.push(NodeEntry {
                name: node_config.name.clone(),
                node,
            });
        }

        // Resolve connections by name (invariant 1).
        let mut connections: Vec<Connection> = Vec::with_capacity(config.connections.len());
        for cc in &config.connections {
            let source = names
                .iter()
                .position(|n| *n == cc.source_name)
                .ok_or_else(|| {
                    EngineError::Config(format!("connection from unknown node '{}'", cc.source_name))
                })?;
            let sink = names
                .iter()
                .position(|n| *n == cc.sink_name)
                .ok_or_else(|| {
                    EngineError::Config(format!("connection to unknown node '{}'", cc.sink_name))
                })?;
            let mut conn = Connection::new(source, cc.source_pad, sink, cc.sink_pad);
            conn.allow_format_convert = cc.allow_format_convert;
            conn.policy = match cc.buffer_policy.as_deref() {
                None => BufferPolicy::Auto,
                Some(name) => BufferPolicy::from_name(name).ok_or_else(|| {
                    EngineError::Config(format!("unknown buffer_policy '{name}'"))
                })?,
            };
            connections.push(conn);
        }

        // Process order drives configuration, so downstream nodes can
        // inherit their upstream pad's channel layout (invariant 3
        // checked here too: cycles fail before any node configures).
        let (order, _) = compute_schedule(&names, &connections)?;
        for &idx in &order {
            let inherited = connections
                .iter()
                .find(|c| c.sink_node == idx)
                .and_then(|c| nodes[c.source_node].node.output_format(c.source_pad))
                .map(|f| f.channels);
            let ctx = GraphContext {
                sample_rate,
                block_frames,
                format: SampleFormat::new(
                    element,
                    layout,
                    inherited.unwrap_or_else(ChannelLayout::stereo),
                ),
            };
            nodes[idx]
                .node
                .configure(&config.nodes[idx].params, &ctx)
                .map_err(|e| {
                    log::error!("configuring node '{}' failed: {e}", names[idx]);
                    e
                })?;
        }

        // Pad format validation (invariant 4), Auto policy resolution,
        // and implicit conversion insertion.
        let declared = connections.len();
        let mut convert_count = 0usize;
        for ci in 0..declared {
            let conn = connections[ci];
            let src_fmt = nodes[conn.source_node]
                .node
                .output_format(conn.source_pad)
                .ok_or_else(|| {
                    EngineError::Config(format!(
                        "node '{}' has no output pad {}",
                        names[conn.source_node], conn.source_pad
                    ))
                })?;
            let sink_fmt = nodes[conn.sink_node]
                .node
                .input_format(conn.sink_pad)
                .ok_or_else(|| {
                    EngineError::Config(format!(
                        "node '{}' has no input pad {}",
                        names[conn.sink_node], conn.sink_pad
                    ))
                })?;

            if src_fmt == sink_fmt {
                let mutates = nodes[conn.sink_node].node.mutates_input();
                connections[ci].resolve_policy(true, mutates);
                continue;
            }
            if !conn.allow_format_convert {
                return Err(EngineError::FormatMismatch(format!(
                    "'{}' pad {} ({src_fmt:?}) does not match '{}' pad {} ({sink_fmt:?})",
                    names[conn.source_node],
                    conn.source_pad,
                    names[conn.sink_node],
                    conn.sink_pad
                )));
            }

            // Splice a convert node into the edge.
            let mut convert = ConvertNode::between(src_fmt.clone(), sink_fmt.clone());
            let ctx = GraphContext {
                sample_rate,
                block_frames,
                format: src_fmt.clone(),
            };
            convert.configure(&NodeParams::new(), &ctx)?;
            let conv_idx = nodes.len();
            let conv_name = format!("__convert{convert_count}");
            convert_count += 1;
            names.push(conv_name.clone());
            nodes.push(NodeEntry {
                name: conv_name,
                node: Box::new(convert),
            });

            let sink_mutates = nodes[conn.sink_node].node.mutates_input();
            connections[ci].sink_node = conv_idx;
            connections[ci].sink_pad = 0;
            connections[ci].resolve_policy(true, false);

            let mut tail = Connection::new(conv_idx, 0, conn.sink_node, conn.sink_pad);
            tail.policy = conn.policy;
            tail.resolve_policy(true, sink_mutates);
            connections.push(tail);
        }

        let (order, schedule) = compute_schedule(&names, &connections)?;

        let driver_sources: Vec<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].node.type_name() == "asio_source")
            .collect();
        let driver_sinks: Vec<usize> = (0..nodes.len())
            .filter(|&i| nodes[i].node.type_name() == "asio_sink")
            .collect();

        // Open the driver channels the bridge nodes claim.
        if let Some(driver) = options.driver.as_mut() {
            let mut in_channels: Vec<usize> = Vec::new();
            let mut out_channels: Vec<usize> = Vec::new();
            for &idx in &driver_sources {
                if let Some(source) = nodes[idx]
                    .node
                    .as_any_mut()
                    .downcast_mut::<AsioSourceNode>()
                {
                    in_channels.extend_from_slice(source.driver_channels());
                }
            }
            for &idx in &driver_sinks {
                if let Some(sink) = nodes[idx].node.as_any_mut().downcast_mut::<AsioSinkNode>() {
                    out_channels.extend_from_slice(sink.driver_channels());
                }
            }
            in_channels.sort_unstable();
            in_channels.dedup();
            out_channels.sort_unstable();
            out_channels.dedup();
            driver
                .create_buffers(&in_channels, &out_channels)
                .map_err(EngineError::from)?;
        }

        let status = StatusRegistry::new();
        let (rt_producer, rt_consumer) = rtrb::RingBuffer::new(RT_STATUS_CAPACITY);
        let labels: Vec<String> = nodes
            .iter()
            .map(|entry| format!("{} '{}'", entry.node.type_name(), entry.name))
            .collect();
        let reporter = StatusReporter::spawn(Arc::clone(&status), rt_consumer, Arc::new(labels));

        let runner = Arc::new(Mutex::new(GraphRunner {
            nodes,
            connections,
            schedule,
            order,
            driver_sources,
            driver_sinks,
            rt_status: rt_producer,
        }));

        // The driver callback drives the whole graph pass.
        if let Some(driver) = options.driver.as_mut() {
            let callback_runner = Arc::clone(&runner);
            driver.set_callback(Box::new(move |half, buffers| {
                callback_runner.lock().process_block(half, Some(buffers));
            }));
        }

        // Control surface: bind, route node-addressed events into
        // control_message.
        let mut control_cb = None;
        if let (Some(control), Some(control_config)) = (options.control.as_mut(), &config.control)
        {
            control.configure(
                &control_config.target_ip,
                control_config.target_port,
                control_config.receive_port,
            )?;
            let event_runner = Arc::clone(&runner);
            let event_status = Arc::clone(&status);
            control_cb = Some(control.add_event_callback(Arc::new(move |address, args| {
                handle_control_event(&event_runner, &event_status, address, args);
            })));
        }

        let initial_commands = config
            .initial_control_commands
            .iter()
            .map(|command| {
                let args = command
                    .args
                    .iter()
                    .map(|arg| match arg {
                        ControlArgValue::Int(v) => ControlArg::Int(*v),
                        ControlArgValue::Float(v) => ControlArg::Float(*v),
                        ControlArgValue::Str(v) => ControlArg::Str(v.clone()),
                    })
                    .collect();
                (command.address.clone(), args)
            })
            .collect();

        Ok(Self {
            state: EngineState::Initialized,
            sample_rate,
            block_frames,
            runner,
            node_names: names,
            driver: options.driver,
            control: options.control,
            control_cb,
            initial_commands,
            status,
            reporter: Some(reporter),
            pacer: None,
            pacer_stop: Arc::new(AtomicBool::new(false)),
            idle: Arc::new(AtomicBool::new(false)),
            fatal: false,
        })
    }

    #[inline]
    pub fn state(&self) -> EngineState {
        self.state
    }

    #[inline]
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[inline]
    pub fn block_frames(&self) -> usize {
        self.block_frames
    }

    /// Node names in process order.
    pub fn process_order(&self) -> Vec<String> {
        let runner = self.runner.lock();
        runner
            .order
            .iter()
            .map(|&idx| runner.nodes[idx].name.clone())
            .collect()
    }

    pub fn status_registry(&self) -> Arc<StatusRegistry> {
        Arc::clone(&self.status)
    }

    /// The driver bridge, for backend-specific control (and mock
    /// drivers in tests).
    pub fn driver_mut(&mut self) -> Option<&mut (dyn DriverBridge + '_)> {
        match &mut self.driver {
            Some(d) => Some(d.as_mut()),
            None => None,
        }
    }

    /// The typed pads of a node, inputs first.
    pub fn node_pads(&self, name: &str) -> Option<Vec<Pad>> {
        let runner = self.runner.lock();
        let idx = runner.find(name)?;
        let node = &runner.nodes[idx].node;
        let mut pads = Vec::new();
        for index in 0..node.input_count() {
            if let Some(format) = node.input_format(index) {
                pads.push(Pad {
                    node: idx,
                    direction: PadDirection::In,
                    index,
                    format,
                });
            }
        }
        for index in 0..node.output_count() {
            if let Some(format) = node.output_format(index) {
                pads.push(Pad {
                    node: idx,
                    direction: PadDirection::Out,
                    index,
                    format,
                });
            }
        }
        Some(pads)
    }

    /// Current lifecycle state of a node.
    pub fn node_state(&self, name: &str) -> Option<NodeState> {
        let runner = self.runner.lock();
        runner.find(name).map(|idx| runner.nodes[idx].node.state())
    }

    /// Deliver a control message to a node. Callable from any thread;
    /// takes the process lock briefly.
    pub fn control_message(
        &self,
        node_name: &str,
        kind: &str,
        params: &NodeParams,
    ) -> EngineResult<ControlOutcome> {
        let mut runner = self.runner.lock();
        let idx = runner
            .find(node_name)
            .ok_or_else(|| EngineError::Config(format!("no node named '{node_name}'")))?;
        runner.nodes[idx].node.control_message(kind, params)
    }

    /// Start all nodes (process order), then the driver or the pacing
    /// thread.
    pub fn run(&mut self, token: ShutdownToken) -> EngineResult<()> {
        if self.fatal {
            return Err(EngineError::InvalidState(
                "engine is in a fatal error state".into(),
            ));
        }
        match self.state {
            EngineState::Initialized | EngineState::Stopped => {}
            _ => {
                return Err(EngineError::InvalidState(format!(
                    "run not legal in state {:?}",
                    self.state
                )));
            }
        }

        {
            let mut runner = self.runner.lock();
            let order = runner.order.clone();
            for (pos, &idx) in order.iter().enumerate() {
                if let Err(err) = runner.nodes[idx].node.start() {
                    // Unwind the ones already running, reverse order.
                    for &done in order[..pos].iter().rev() {
                        if runner.nodes[done].node.stop().is_err() {
                            self.fatal = true;
                        }
                    }
                    return Err(err);
                }
            }
        }

        self.idle.store(false, Ordering::Release);
        self.pacer_stop.store(false, Ordering::Release);

        if let Some(driver) = self.driver.as_mut() {
            if let Err(err) = driver.start() {
                self.stop_nodes();
                return Err(err.into());
            }
        } else {
            // File-only operation: a dedicated thread paces the graph by
            // block duration.
            let runner = Arc::clone(&self.runner);
            let stop = Arc::clone(&self.pacer_stop);
            let idle = Arc::clone(&self.idle);
            let block_duration =
                Duration::from_secs_f64(self.block_frames as f64 / self.sample_rate as f64);
            let pacer_token = token.clone();
            let handle = thread::Builder::new()
                .name("gm-pacer".into())
                .spawn(move || {
                    let mut half = 0u32;
                    loop {
                        if stop.load(Ordering::Acquire) || pacer_token.is_shutdown() {
                            break;
                        }
                        {
                            let mut runner = runner.lock();
                            runner.process_block(half, None);
                            if runner.all_sources_finished() {
                                idle.store(true, Ordering::Release);
                                break;
                            }
                        }
                        half ^= 1;
                        thread::sleep(block_duration);
                    }
                })
                .map_err(EngineError::Io)?;
            self.pacer = Some(handle);
        }

        // Initial control commands go out once audio is rolling.
        if let Some(control) = self.control.as_mut() {
            for (address, args) in &self.initial_commands {
                if let Err(err) = control.send(address, args) {
                    log::warn!("initial control command '{address}' failed: {err}");
                }
            }
        }

        self.state = EngineState::Running;
        Ok(())
    }

    /// Block until the file-only graph ran out of input, or the timeout
    /// passes. Returns true when idle.
    pub fn wait_until_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        while Instant::now() < deadline {
            if self.idle.load(Ordering::Acquire) {
                return true;
            }
            thread::sleep(Duration::from_millis(5));
        }
        self.idle.load(Ordering::Acquire)
    }

    fn stop_nodes(&mut self) {
        let mut runner = self.runner.lock();
        let order = runner.order.clone();
        for &idx in order.iter().rev() {
            if runner.nodes[idx].node.state() == NodeState::Running {
                if let Err(err) = runner.nodes[idx].node.stop() {
                    log::error!("node '{}' failed to stop: {err}", runner.nodes[idx].name);
                }
            }
            // Stop-time statuses (join timeouts, flush drops) ride the
            // same ring; the reporter stays alive until cleanup.
            while let Some(status) = runner.nodes[idx].node.take_status() {
                let _ = runner.rt_status.push(RtStatus {
                    node: idx as u32,
                    status,
                });
            }
        }
    }

    /// Stop the driver (or pacer) and all nodes, reverse process order.
    pub fn stop(&mut self) -> EngineResult<()> {
        if self.state != EngineState::Running {
            return Err(EngineError::InvalidState(format!(
                "stop not legal in state {:?}",
                self.state
            )));
        }

        if let Some(driver) = self.driver.as_mut() {
            if let Err(err) = driver.stop() {
                log::error!("driver stop failed: {err}");
            }
        }
        self.pacer_stop.store(true, Ordering::Release);
        if let Some(pacer) = self.pacer.take() {
            let _ = pacer.join();
        }

        self.stop_nodes();
        self.state = EngineState::Stopped;
        Ok(())
    }

    /// Reset nodes and release runtime plumbing. The engine cannot run
    /// again after cleanup.
    pub fn cleanup(&mut self) -> EngineResult<()> {
        match self.state {
            EngineState::Stopped | EngineState::Initialized => {}
            _ => {
                return Err(EngineError::InvalidState(format!(
                    "cleanup not legal in state {:?}",
                    self.state
                )));
            }
        }
        {
            let mut runner = self.runner.lock();
            let order = runner.order.clone();
            for &idx in order.iter().rev() {
                let state = runner.nodes[idx].node.state();
                if matches!(state, NodeState::Configured | NodeState::Stopped) {
                    if let Err(err) = runner.nodes[idx].node.reset() {
                        log::error!("node '{}' failed to reset: {err}", runner.nodes[idx].name);
                    }
                }
            }
        }
        if let (Some(control), Some(id)) = (self.control.as_mut(), self.control_cb.take()) {
            control.remove_event_callback(id);
        }
        if let Some(mut reporter) = self.reporter.take() {
            reporter.shutdown();
        }
        self.state = EngineState::Cleaned;
        Ok(())
    }

    /// Names of all nodes, insertion order (implicit convert nodes
    /// last).
    pub fn node_names(&self) -> &[String] {
        &self.node_names
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        if self.state == EngineState::Running {
            let _ = self.stop();
        }
        if let Some(mut reporter) = self.reporter.take() {
            reporter.shutdown();
        }
    }
}

/// Route a control-surface event to the addressed node.
fn handle_control_event(
    runner: &Arc<Mutex<GraphRunner>>,
    status: &Arc<StatusRegistry>,
    address: &str,
    args: &[ControlArg],
) {
    let Some(node_name) = address.strip_prefix(CONTROL_NODE_PREFIX) else {
        return;
    };
    // Args: kind, then key/value pairs, all strings (numbers accepted
    // and stringified).
    let mut strings = args.iter().map(|arg| match arg {
        ControlArg::Str(s) => s.clone(),
        ControlArg::Int(v) => v.to_string(),
        ControlArg::Float(v) => v.to_string(),
    });
    let Some(kind) = strings.next() else {
        status.dispatch(
            crate::status::StatusCategory::Warning,
            &format!("control event for '{node_name}' without a message kind"),
        );
        return;
    };
    let mut params = NodeParams::new();
    loop {
        let Some(key) = strings.next() else { break };
        let Some(value) = strings.next() else {
            status.dispatch(
                crate::status::StatusCategory::Warning,
                &format!("control event for '{node_name}': key '{key}' without value"),
            );
            return;
        };
        params.insert(key, value);
    }

    let mut runner = runner.lock();
    let Some(idx) = runner.find(node_name) else {
        status.dispatch(
            crate::status::StatusCategory::Warning,
            &format!("control event for unknown node '{node_name}'"),
        );
        return;
    };
    match runner.nodes[idx].node.control_message(&kind, &params) {
        Ok(ControlOutcome::Handled) => {}
        Ok(ControlOutcome::Unhandled) => {
            status.dispatch(
                crate::status::StatusCategory::Info,
                &format!("node '{node_name}' ignored control message '{kind}'"),
            );
        }
        Err(err) => {
            status.dispatch(
                crate::status::StatusCategory::Warning,
                &format!("control message '{kind}' for '{node_name}' failed: {err}"),
            );
        }
    }
}
