//! Graph construction: ordering determinism, validation failures,
//! custom node registration and implicit format conversion.

use std::any::Any;
use std::time::Duration;

use gm_core::{
    AudioBuffer, ChannelLayout, EngineError, EngineResult, SampleElement, SampleFormat,
    SampleLayout,
};
use gm_engine::{
    ControlOutcome, Engine, EngineConfig, EngineOptions, GraphContext, Node, NodeFactory,
    NodeParams, NodeState, ShutdownToken,
};

fn write_wav(path: &std::path::Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        writer.write_sample(i as f32 / frames as f32).unwrap();
        writer.write_sample(0.0f32).unwrap();
    }
    writer.finalize().unwrap();
}

#[test]
fn duplicate_node_names_rejected() {
    let config = EngineConfig::from_json_str(
        r#"{
            "nodes": [
                {"name": "x", "type": "filter_processor",
                 "params": {"filter_description": "volume=1"}},
                {"name": "x", "type": "filter_processor",
                 "params": {"filter_description": "volume=1"}}
            ]
        }"#,
    )
    .unwrap();
    assert!(matches!(
        Engine::new(config, EngineOptions::default()),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn unknown_connection_endpoint_rejected() {
    let config = EngineConfig::from_json_str(
        r#"{
            "nodes": [
                {"name": "a", "type": "filter_processor",
                 "params": {"filter_description": "volume=1"}}
            ],
            "connections": [
                {"source_name": "a", "sink_name": "phantom"}
            ]
        }"#,
    )
    .unwrap();
    assert!(matches!(
        Engine::new(config, EngineOptions::default()),
        Err(EngineError::Config(_))
    ));
}

#[test]
fn unknown_node_type_rejected() {
    let config = EngineConfig::from_json_str(
        r#"{"nodes": [{"name": "a", "type": "granulator"}]}"#,
    )
    .unwrap();
    assert!(matches!(
        Engine::new(config, EngineOptions::default()),
        Err(EngineError::Config(_))
    ));
}

/// Two parallel chains: the scheduler follows insertion order among
/// ready nodes.
#[test]
fn process_order_is_deterministic() {
    let dir = tempfile::tempdir().unwrap();
    let in_a = dir.path().join("a.wav");
    let in_b = dir.path().join("b.wav");
    write_wav(&in_a, 256);
    write_wav(&in_b, 256);

    let config = EngineConfig::from_json_str(&format!(
        r#"{{
            "nodes": [
                {{"name": "src_a", "type": "file_source", "params": {{"path": "{a}"}}}},
                {{"name": "dst_a", "type": "file_sink",
                  "params": {{"path": "{oa}", "codec": "f32"}}}},
                {{"name": "src_b", "type": "file_source", "params": {{"path": "{b}"}}}},
                {{"name": "dst_b", "type": "file_sink",
                  "params": {{"path": "{ob}", "codec": "f32"}}}}
            ],
            "connections": [
                {{"source_name": "src_a", "sink_name": "dst_a"}},
                {{"source_name": "src_b", "sink_name": "dst_b"}}
            ]
        }}"#,
        a = in_a.display(),
        b = in_b.display(),
        oa = dir.path().join("oa.wav").display(),
        ob = dir.path().join("ob.wav").display(),
    ))
    .unwrap();

    let engine = Engine::new(config, EngineOptions::default()).unwrap();
    // src_a unblocks dst_a before src_b is considered.
    assert_eq!(
        engine.process_order(),
        vec!["src_a", "dst_a", "src_b", "dst_b"]
    );
}

// ─── custom node: fixed-level tone in interleaved f32 ───────────────────

/// Minimal user-defined source registered under the `custom` type
/// string. Emits a constant level in *interleaved* f32, so connecting it
/// to a planar sink exercises the implicit conversion node.
struct LevelSourceNode {
    state: NodeState,
    level: f32,
    blocks_left: u32,
    format: Option<SampleFormat>,
    ctx: Option<GraphContext>,
    out: Option<AudioBuffer>,
}

impl LevelSourceNode {
    fn new() -> Self {
        Self {
            state: NodeState::Unconfigured,
            level: 0.5,
            blocks_left: 4,
            format: None,
            ctx: None,
            out: None,
        }
    }
}

impl Node for LevelSourceNode {
    fn type_name(&self) -> &'static str {
        "custom"
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn configure(&mut self, params: &NodeParams, ctx: &GraphContext) -> EngineResult<()> {
        if let Some(level) = params.get("level") {
            self.level = level
                .parse()
                .map_err(|_| EngineError::Config(format!("bad level '{level}'")))?;
        }
        if let Some(blocks) = params.get("blocks") {
            self.blocks_left = blocks
                .parse()
                .map_err(|_| EngineError::Config(format!("bad blocks '{blocks}'")))?;
        }
        self.format = Some(SampleFormat::new(
            SampleElement::F32,
            SampleLayout::Interleaved,
            ChannelLayout::stereo(),
        ));
        self.ctx = Some(ctx.clone());
        self.state = NodeState::Configured;
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        self.state = NodeState::Running;
        Ok(())
    }

    fn process(&mut self) -> EngineResult<()> {
        if self.blocks_left == 0 {
            self.out = None;
            return Ok(());
        }
        self.blocks_left -= 1;
        let ctx = self.ctx.as_ref().unwrap();
        let mut buf = AudioBuffer::new(
            ctx.block_frames,
            ctx.sample_rate,
            self.format.clone().unwrap(),
        )?;
        buf.plane_f32_mut(0)?.fill(self.level);
        self.out = Some(buf);
        Ok(())
    }

    fn stop(&mut self) -> EngineResult<()> {
        self.state = NodeState::Stopped;
        Ok(())
    }

    fn reset(&mut self) -> EngineResult<()> {
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
        Err(EngineError::FormatMismatch(format!("no input pad {pad}")))
    }

    fn take_output(&mut self, pad: usize) -> Option<AudioBuffer> {
        (pad == 0).then(|| self.out.take()).flatten()
    }

    fn control_message(&mut self, _kind: &str, _params: &NodeParams) -> EngineResult<ControlOutcome> {
        Ok(ControlOutcome::Unhandled)
    }

    fn is_finished(&self) -> bool {
        self.blocks_left == 0 && self.out.is_none()
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

fn custom_factory() -> NodeFactory {
    let mut factory = NodeFactory::with_builtin();
    factory.register("custom", Box::new(|| Box::new(LevelSourceNode::new())));
    factory
}

/// Interleaved custom source into a planar file sink: without
/// allow_format_convert the build fails; with it an implicit convert
/// node is spliced in and audio flows.
#[test]
fn format_mismatch_and_implicit_conversion() {
    let dir = tempfile::tempdir().unwrap();
    let out_path = dir.path().join("tone.wav");

    let strict = EngineConfig::from_json_str(&format!(
        r#"{{
            "nodes": [
                {{"name": "tone", "type": "custom", "params": {{"level": "0.5"}}}},
                {{"name": "dst", "type": "file_sink",
                  "params": {{"path": "{out}", "codec": "f32"}}}}
            ],
            "connections": [
                {{"source_name": "tone", "sink_name": "dst"}}
            ]
        }}"#,
        out = out_path.display(),
    ))
    .unwrap();
    let options = EngineOptions {
        factory: custom_factory(),
        ..Default::default()
    };
    assert!(matches!(
        Engine::new(strict, options),
        Err(EngineError::FormatMismatch(_))
    ));

    let convertible = EngineConfig::from_json_str(&format!(
        r#"{{
            "nodes": [
                {{"name": "tone", "type": "custom",
                  "params": {{"level": "0.5", "blocks": "3"}}}},
                {{"name": "dst", "type": "file_sink",
                  "params": {{"path": "{out}", "codec": "f32"}}}}
            ],
            "connections": [
                {{"source_name": "tone", "sink_name": "dst", "allow_format_convert": true}}
            ]
        }}"#,
        out = out_path.display(),
    ))
    .unwrap();
    let options = EngineOptions {
        factory: custom_factory(),
        ..Default::default()
    };
    let mut engine = Engine::new(convertible, options).unwrap();
    assert!(engine
        .node_names()
        .iter()
        .any(|name| name.starts_with("__convert")));
    assert_eq!(
        engine.process_order(),
        vec!["tone", "__convert0", "dst"]
    );

    // The spliced converter's pads carry the two formats it bridges.
    let pads = engine.node_pads("__convert0").unwrap();
    assert_eq!(pads.len(), 2);
    assert_eq!(pads[0].format.layout, SampleLayout::Interleaved);
    assert_eq!(pads[1].format.layout, SampleLayout::Planar);

    let token = ShutdownToken::new();
    engine.run(token.clone()).unwrap();
    assert!(engine.wait_until_idle(Duration::from_secs(5)));
    engine.stop().unwrap();
    engine.cleanup().unwrap();

    let mut reader = hound::WavReader::open(&out_path).unwrap();
    let samples: Vec<f32> = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    // 3 blocks of stereo at the default block size.
    assert_eq!(samples.len(), 3 * 512 * 2);
    assert!(samples.iter().all(|&s| s == 0.5));
}
