//! gm-engine: The Gridmix audio graph runtime
//!
//! A directed graph of audio nodes (sources, processors, sinks)
//! connected by typed pads, advanced one block per driver callback in
//! topological order. File nodes bridge the realtime path to worker
//! threads over bounded queues; a filter pipeline node hosts
//! text-described DSP chains with live parameter updates; an OSC control
//! surface carries parameter traffic to and from the hardware mixer
//! sharing the audio interface.
//!
//! ```no_run
//! use gm_engine::{Engine, EngineConfig, EngineOptions, ShutdownToken};
//!
//! let config = EngineConfig::from_json_str(r#"{
//!     "nodes": [
//!         {"name": "src", "type": "file_source", "params": {"path": "in.wav"}},
//!         {"name": "vol", "type": "filter_processor",
//!          "params": {"filter_description": "volume=0.5"}},
//!         {"name": "dst", "type": "file_sink",
//!          "params": {"path": "out.wav", "codec": "f32"}}
//!     ],
//!     "connections": [
//!         {"source_name": "src", "sink_name": "vol"},
//!         {"source_name": "vol", "sink_name": "dst"}
//!     ]
//! }"#)?;
//!
//! let mut engine = Engine::new(config, EngineOptions::default())?;
//! let token = ShutdownToken::new();
//! engine.run(token.clone())?;
//! engine.wait_until_idle(std::time::Duration::from_secs(10));
//! engine.stop()?;
//! engine.cleanup()?;
//! # Ok::<(), gm_core::EngineError>(())
//! ```

mod config;
mod control;
mod engine;
mod factory;
mod graph;
mod node;
mod nodes;
mod osc;
mod schedule;
mod status;

pub use config::{
    ControlArgValue, ControlCommandConfig, ConnectionConfig, ControlConfig, EngineConfig,
    NodeConfig,
};
pub use control::{
    ControlArg, ControlCallbackId, ControlEventCallback, ControlQueryCallback, ControlSurface,
    MockControl, MockControlInjector,
};
pub use engine::{
    Engine, EngineOptions, EngineState, GraphRunner, ShutdownToken, CONTROL_NODE_PREFIX,
    DEFAULT_BLOCK_FRAMES, DEFAULT_SAMPLE_RATE,
};
pub use factory::{NodeConstructor, NodeFactory};
pub use graph::{BufferPolicy, Connection, Pad, PadDirection};
pub use node::{
    check_pad_buffer, ControlOutcome, GraphContext, Node, NodeParams, NodeState, NodeStatus,
};
pub use nodes::{
    AsioSinkNode, AsioSourceNode, ConvertNode, FileSinkNode, FileSourceNode, FilterProcessorNode,
};
pub use osc::OscControl;
pub use schedule::{compute_schedule, ScheduleStep};
pub use status::{RtStatus, StatusCallbackId, StatusCategory, StatusRegistry, StatusReporter};
