//! Engine configuration model
//!
//! The validated configuration object the engine consumes, matching the
//! external loader's shape field for field. Loading UX (files, CLI) is
//! the embedding application's concern; [`EngineConfig::from_json_str`]
//! covers the common embedding case.

use std::collections::BTreeMap;

use serde::Deserialize;

use gm_core::{EngineError, EngineResult};

/// Top-level engine configuration
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EngineConfig {
    /// Driver device name; used only when a driver bridge is wired.
    pub audio_device: Option<String>,
    /// Preferred sample rate; the driver may negotiate another.
    pub sample_rate: Option<u32>,
    /// Preferred block size in frames.
    pub block_frames: Option<usize>,
    /// Internal sample element (`"f32"`; the only supported internal
    /// element).
    pub internal_format: Option<String>,
    /// Internal plane layout (`"planar"` or `"interleaved"`).
    pub internal_layout: Option<String>,
    #[serde(default)]
    pub nodes: Vec<NodeConfig>,
    #[serde(default)]
    pub connections: Vec<ConnectionConfig>,
    pub control: Option<ControlConfig>,
    #[serde(default)]
    pub initial_control_commands: Vec<ControlCommandConfig>,
}

impl EngineConfig {
    pub fn from_json_str(json: &str) -> EngineResult<Self> {
        serde_json::from_str(json).map_err(|e| EngineError::Config(e.to_string()))
    }
}

/// One node declaration
#[derive(Debug, Clone, Deserialize)]
pub struct NodeConfig {
    pub name: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub params: BTreeMap<String, String>,
}

/// One connection declaration
#[derive(Debug, Clone, Deserialize)]
pub struct ConnectionConfig {
    pub source_name: String,
    #[serde(default)]
    pub source_pad: usize,
    pub sink_name: String,
    #[serde(default)]
    pub sink_pad: usize,
    #[serde(default)]
    pub allow_format_convert: bool,
    /// `"auto"` (default), `"share_direct"` or `"deep_copy"`.
    pub buffer_policy: Option<String>,
}

/// External control surface endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct ControlConfig {
    pub target_ip: String,
    pub target_port: u16,
    pub receive_port: Option<u16>,
}

/// One control command sent right after the engine starts
#[derive(Debug, Clone, Deserialize)]
pub struct ControlCommandConfig {
    pub address: String,
    #[serde(default)]
    pub args: Vec<ControlArgValue>,
}

/// Argument of an initial control command
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ControlArgValue {
    Int(i32),
    Float(f32),
    Str(String),
}
