//! End-to-end file pipeline scenarios: decode → filter → encode with the
//! realtime pass on the pacing thread.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use gm_engine::{
    ControlArg, Engine, EngineConfig, EngineOptions, EngineState, MockControl, ShutdownToken,
};

fn write_input_wav(path: &std::path::Path, frames: usize) {
    let spec = hound::WavSpec {
        channels: 2,
        sample_rate: 48000,
        bits_per_sample: 32,
        sample_format: hound::SampleFormat::Float,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    for i in 0..frames {
        let left = (i as f32 / frames as f32) - 0.5;
        writer.write_sample(left).unwrap();
        writer.write_sample(-left).unwrap();
    }
    writer.finalize().unwrap();
}

fn read_wav_f32(path: &std::path::Path) -> (u16, Vec<f32>) {
    let mut reader = hound::WavReader::open(path).unwrap();
    let channels = reader.spec().channels;
    let samples = reader.samples::<f32>().map(|s| s.unwrap()).collect();
    (channels, samples)
}

/// A file pipeline at half volume preserves the sample count and scales
/// every sample by exactly 0.5.
#[test]
fn file_pipeline_at_half_volume() {
    let _ = env_logger::builder().is_test(true).try_init();
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("in.wav");
    let out_path = dir.path().join("out.wav");
    // Not a multiple of the block size: the tail block must survive.
    write_input_wav(&in_path, 1300);

    let config = EngineConfig::from_json_str(&format!(
        r#"{{
            "sample_rate": 48000,
            "block_frames": 512,
            "internal_format": "f32",
            "internal_layout": "planar",
            "nodes": [
                {{"name": "src", "type": "file_source",
                  "params": {{"path": "{in_path}"}}}},
                {{"name": "vol", "type": "filter_processor",
                  "params": {{"filter_description": "volume=0.5"}}}},
                {{"name": "dst", "type": "file_sink",
                  "params": {{"path": "{out_path}", "codec": "f32"}}}}
            ],
            "connections": [
                {{"source_name": "src", "source_pad": 0, "sink_name": "vol", "sink_pad": 0}},
                {{"source_name": "vol", "source_pad": 0, "sink_name": "dst", "sink_pad": 0}}
            ]
        }}"#,
        in_path = in_path.display(),
        out_path = out_path.display(),
    ))
    .unwrap();

    let mut engine = Engine::new(config, EngineOptions::default()).unwrap();
    assert_eq!(engine.state(), EngineState::Initialized);
    assert_eq!(engine.process_order(), vec!["src", "vol", "dst"]);

    let token = ShutdownToken::new();
    engine.run(token.clone()).unwrap();
    assert!(engine.wait_until_idle(Duration::from_secs(10)));
    engine.stop().unwrap();
    engine.cleanup().unwrap();

    let (in_channels, input) = read_wav_f32(&in_path);
    let (out_channels, output) = read_wav_f32(&out_path);
    assert_eq!(in_channels, out_channels);
    assert_eq!(
        output.len(),
        input.len(),
        "sample counts must match exactly"
    );
    for (i, (a, b)) in input.iter().zip(output.iter()).enumerate() {
        // Multiplying by 0.5 is exact in binary floating point.
        assert_eq!(*b, *a * 0.5, "sample {i}");
    }
}

/// A configuration whose graph cycles fails initialization with
/// CyclicGraph and constructs no engine.
#[test]
fn cyclic_graph_fails_initialization() {
    let config = EngineConfig::from_json_str(
        r#"{
            "nodes": [
                {"name": "a", "type": "filter_processor",
                 "params": {"filter_description": "volume=1.0"}},
                {"name": "b", "type": "filter_processor",
                 "params": {"filter_description": "volume=1.0"}}
            ],
            "connections": [
                {"source_name": "a", "sink_name": "b"},
                {"source_name": "b", "sink_name": "a"}
            ]
        }"#,
    )
    .unwrap();

    let err = Engine::new(config, EngineOptions::default()).unwrap_err();
    assert!(matches!(err, gm_core::EngineError::CyclicGraph(_)));
}

/// Control events addressed to a node reach its control_message; the
/// filter's parameter update takes effect at the next block.
#[test]
fn control_event_routes_to_filter() {
    let dir = tempfile::tempdir().unwrap();
    let in_path = dir.path().join("in.wav");
    let out_path = dir.path().join("out.wav");
    write_input_wav(&in_path, 48000);

    let control = MockControl::new();
    let injector = control.injector();
    let sent = control.sent_log();

    let config = EngineConfig::from_json_str(&format!(
        r#"{{
            "nodes": [
                {{"name": "src", "type": "file_source",
                  "params": {{"path": "{in_path}"}}}},
                {{"name": "fx", "type": "filter_processor",
                  "params": {{"filter_description": "eq@low f=120 g=0, volume@main g=1"}}}},
                {{"name": "dst", "type": "file_sink",
                  "params": {{"path": "{out_path}", "codec": "f32"}}}}
            ],
            "connections": [
                {{"source_name": "src", "sink_name": "fx"}},
                {{"source_name": "fx", "sink_name": "dst"}}
            ],
            "control": {{"target_ip": "127.0.0.1", "target_port": 7001}},
            "initial_control_commands": [
                {{"address": "/mixer/master/volume", "args": [0.75]}}
            ]
        }}"#,
        in_path = in_path.display(),
        out_path = out_path.display(),
    ))
    .unwrap();

    let options = EngineOptions {
        control: Some(Box::new(control)),
        ..Default::default()
    };
    let mut engine = Engine::new(config, options).unwrap();

    // Warnings for misaddressed events surface as statuses.
    let statuses = Arc::new(Mutex::new(Vec::new()));
    let statuses_cb = Arc::clone(&statuses);
    engine.status_registry().add_status_callback(move |category, message| {
        statuses_cb
            .lock()
            .unwrap()
            .push((category.to_string(), message.to_string()));
    });

    let token = ShutdownToken::new();
    engine.run(token.clone()).unwrap();

    // Initial control commands were sent on run.
    assert_eq!(sent.lock()[0].0, "/mixer/master/volume");

    // A live update addressed to the filter node.
    injector.inject_event(
        "/gridmix/node/fx",
        &[
            ControlArg::Str("update".into()),
            ControlArg::Str("filter".into()),
            ControlArg::Str("main".into()),
            ControlArg::Str("param".into()),
            ControlArg::Str("g".into()),
            ControlArg::Str("value".into()),
            ControlArg::Str("0.5".into()),
        ],
    );

    // An event for a node that does not exist is reported, not fatal.
    injector.inject_event("/gridmix/node/ghost", &[ControlArg::Str("update".into())]);

    engine.stop().unwrap();
    engine.cleanup().unwrap();

    let statuses = statuses.lock().unwrap();
    assert!(statuses
        .iter()
        .any(|(category, message)| category == "Warning" && message.contains("ghost")));
    // The well-addressed update produced no warning.
    assert!(!statuses
        .iter()
        .any(|(_, message)| message.contains("'update' for 'fx' failed")));
}
