//! Process-block error policy: the first failing node per block becomes
//! one status event, every node still runs, and healthy chains keep
//! producing output.

use std::any::Any;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use gm_audio::{DriverBridge, MockDriver, NativeSampleType};
use gm_core::{AudioBuffer, EngineError, EngineResult, SampleFormat};
use gm_engine::{
    ControlOutcome, Engine, EngineConfig, EngineOptions, GraphContext, Node, NodeFactory,
    NodeParams, NodeState, ShutdownToken,
};

/// A node whose `process()` always fails, counting its invocations.
struct FlakyNode {
    state: NodeState,
    invocations: Arc<AtomicU32>,
}

impl Node for FlakyNode {
    fn type_name(&self) -> &'static str {
        "custom"
    }

    fn state(&self) -> NodeState {
        self.state
    }

    fn configure(&mut self, _params: &NodeParams, _ctx: &GraphContext) -> EngineResult<()> {
        self.state = NodeState::Configured;
        Ok(())
    }

    fn start(&mut self) -> EngineResult<()> {
        self.state = NodeState::Running;
        Ok(())
    }

    fn process(&mut self) -> EngineResult<()> {
        self.invocations.fetch_add(1, Ordering::Relaxed);
        Err(EngineError::Driver("induced failure".into()))
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
        0
    }

    fn input_format(&self, _pad: usize) -> Option<SampleFormat> {
        None
    }

    fn output_format(&self, _pad: usize) -> Option<SampleFormat> {
        None
    }

    fn set_input(&mut self, _buffer: AudioBuffer, pad: usize) -> EngineResult<()> {
        Err(EngineError::FormatMismatch(format!("no input pad {pad}")))
    }

    fn take_output(&mut self, _pad: usize) -> Option<AudioBuffer> {
        None
    }

    fn control_message(&mut self, _kind: &str, _params: &NodeParams) -> EngineResult<ControlOutcome> {
        Ok(ControlOutcome::Unhandled)
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}

/// Two mis-behaving stages in one block: exactly one error status per
/// block (the first failing node in process order), both stages still
/// invoked, and the healthy driver chain unaffected.
#[test]
fn first_process_error_per_block_is_reported_once() {
    let invocations = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&invocations);
    let mut factory = NodeFactory::with_builtin();
    factory.register(
        "custom",
        Box::new(move || {
            Box::new(FlakyNode {
                state: NodeState::Unconfigured,
                invocations: Arc::clone(&counter),
            })
        }),
    );

    let config = EngineConfig::from_json_str(
        r#"{
            "audio_device": "Mock ASIO",
            "sample_rate": 48000,
            "block_frames": 128,
            "nodes": [
                {"name": "fail1", "type": "custom"},
                {"name": "fail2", "type": "custom"},
                {"name": "in", "type": "asio_source", "params": {"channels": "0"}},
                {"name": "out", "type": "asio_sink", "params": {"channels": "0"}}
            ],
            "connections": [
                {"source_name": "in", "sink_name": "out"}
            ]
        }"#,
    )
    .unwrap();
    let options = EngineOptions {
        driver: Some(Box::new(MockDriver::new(
            1,
            1,
            48000,
            128,
            NativeSampleType::F32Le,
        ))),
        factory,
        ..Default::default()
    };
    let mut engine = Engine::new(config, options).unwrap();

    let statuses = Arc::new(Mutex::new(Vec::new()));
    let statuses_cb = Arc::clone(&statuses);
    engine
        .status_registry()
        .add_status_callback(move |category, message| {
            statuses_cb
                .lock()
                .unwrap()
                .push((category.to_string(), message.to_string()));
        });

    let token = ShutdownToken::new();
    engine.run(token.clone()).unwrap();

    let ramp: Vec<f32> = (0..128).map(|i| i as f32 / 128.0).collect();
    {
        let mock = engine
            .driver_mut()
            .unwrap()
            .as_any_mut()
            .downcast_mut::<MockDriver>()
            .unwrap();
        mock.fill_input_f32(0, 0, &ramp).unwrap();
        mock.fill_input_f32(0, 1, &ramp).unwrap();
        mock.fire_block(0).unwrap();
        mock.fire_block(1).unwrap();
    }

    // The healthy chain still produced output in both blocks.
    {
        let mock = engine
            .driver_mut()
            .unwrap()
            .as_any_mut()
            .downcast_mut::<MockDriver>()
            .unwrap();
        for half in 0..2 {
            let out = mock.output_f32(0, half).unwrap();
            for (i, (&expected, &got)) in ramp.iter().zip(out.iter()).enumerate() {
                assert!(
                    (expected - got).abs() < 1e-6,
                    "half {half} sample {i}: {expected} vs {got}"
                );
            }
        }
    }

    // Both flaky stages ran in both blocks.
    assert_eq!(invocations.load(Ordering::Relaxed), 4);

    engine.stop().unwrap();
    // Cleanup drains the status ring through the reporter before it
    // shuts down.
    engine.cleanup().unwrap();

    let statuses = statuses.lock().unwrap();
    let failures: Vec<&(String, String)> = statuses
        .iter()
        .filter(|(category, message)| category == "Error" && message.contains("process failed"))
        .collect();
    assert_eq!(
        failures.len(),
        2,
        "one error status per block, got {statuses:?}"
    );
    // Only the first failing node in process order is named.
    assert!(failures.iter().all(|(_, message)| message.contains("fail1")));
    assert!(!statuses
        .iter()
        .any(|(_, message)| message.contains("fail2")));
}
