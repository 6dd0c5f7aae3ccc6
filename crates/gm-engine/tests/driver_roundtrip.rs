//! Mock-driver scenarios: the engine's block pass driven from the
//! hardware callback, source to sink.

use gm_audio::{DriverBridge, MockDriver, NativeSampleType};
use gm_engine::{Engine, EngineConfig, EngineOptions, ShutdownToken};

fn passthrough_config() -> EngineConfig {
    EngineConfig::from_json_str(
        r#"{
            "audio_device": "Mock ASIO",
            "sample_rate": 48000,
            "block_frames": 512,
            "nodes": [
                {"name": "in", "type": "asio_source", "params": {"channels": "0"}},
                {"name": "thru", "type": "filter_processor",
                 "params": {"filter_description": "volume=1.0"}},
                {"name": "out", "type": "asio_sink", "params": {"channels": "0"}}
            ],
            "connections": [
                {"source_name": "in", "sink_name": "thru"},
                {"source_name": "thru", "sink_name": "out"}
            ]
        }"#,
    )
    .unwrap()
}

fn mock_driver() -> Box<MockDriver> {
    Box::new(MockDriver::new(2, 2, 48000, 512, NativeSampleType::F32Le))
}

/// A ramp delivered on channel 0 of half 0 comes back on the same
/// channel and half after one block.
#[test]
fn driver_ramp_round_trip() {
    let options = EngineOptions {
        driver: Some(mock_driver()),
        ..Default::default()
    };
    let mut engine = Engine::new(passthrough_config(), options).unwrap();
    assert_eq!(engine.sample_rate(), 48000);
    assert_eq!(engine.block_frames(), 512);

    let token = ShutdownToken::new();
    engine.run(token.clone()).unwrap();

    let ramp: Vec<f32> = (0..512).map(|i| i as f32 / 512.0).collect();
    {
        let driver = engine.driver_mut().unwrap();
        let mock = driver.as_any_mut().downcast_mut::<MockDriver>().unwrap();
        mock.fill_input_f32(0, 0, &ramp).unwrap();
        mock.fire_block(0).unwrap();
    }

    let driver = engine.driver_mut().unwrap();
    let mock = driver.as_any_mut().downcast_mut::<MockDriver>().unwrap();
    let out = mock.output_f32(0, 0).unwrap();
    for (i, (&expected, &got)) in ramp.iter().zip(out.iter()).enumerate() {
        assert!(
            (expected - got).abs() < 1e-6,
            "sample {i}: {expected} vs {got}"
        );
    }

    engine.stop().unwrap();
    engine.cleanup().unwrap();
}

/// Consecutive blocks alternate halves; each half carries its own data.
#[test]
fn driver_double_buffer_halves_are_independent() {
    let options = EngineOptions {
        driver: Some(mock_driver()),
        ..Default::default()
    };
    let mut engine = Engine::new(passthrough_config(), options).unwrap();
    let token = ShutdownToken::new();
    engine.run(token.clone()).unwrap();

    let ones = vec![0.25f32; 512];
    let twos = vec![-0.5f32; 512];
    {
        let mock = engine
            .driver_mut()
            .unwrap()
            .as_any_mut()
            .downcast_mut::<MockDriver>()
            .unwrap();
        mock.fill_input_f32(0, 0, &ones).unwrap();
        mock.fill_input_f32(0, 1, &twos).unwrap();
        mock.fire_block(0).unwrap();
        mock.fire_block(1).unwrap();
    }

    let mock = engine
        .driver_mut()
        .unwrap()
        .as_any_mut()
        .downcast_mut::<MockDriver>()
        .unwrap();
    assert!(mock.output_f32(0, 0).unwrap().iter().all(|&s| s == 0.25));
    assert!(mock.output_f32(0, 1).unwrap().iter().all(|&s| s == -0.5));

    engine.stop().unwrap();
    engine.cleanup().unwrap();
}

/// A live filter update through the engine's control path scales the
/// next block, with one block of transition latency allowed.
#[test]
fn live_parameter_update_scales_next_block() {
    let options = EngineOptions {
        driver: Some(mock_driver()),
        ..Default::default()
    };
    let config = EngineConfig::from_json_str(
        r#"{
            "audio_device": "Mock ASIO",
            "sample_rate": 48000,
            "block_frames": 512,
            "nodes": [
                {"name": "in", "type": "asio_source", "params": {"channels": "0"}},
                {"name": "fx", "type": "filter_processor",
                 "params": {"filter_description": "volume@main g=1"}},
                {"name": "out", "type": "asio_sink", "params": {"channels": "0"}}
            ],
            "connections": [
                {"source_name": "in", "sink_name": "fx"},
                {"source_name": "fx", "sink_name": "out"}
            ]
        }"#,
    )
    .unwrap();
    let mut engine = Engine::new(config, options).unwrap();
    let token = ShutdownToken::new();
    engine.run(token.clone()).unwrap();

    let dc = vec![0.5f32; 512];
    {
        let mock = engine
            .driver_mut()
            .unwrap()
            .as_any_mut()
            .downcast_mut::<MockDriver>()
            .unwrap();
        mock.fill_input_f32(0, 0, &dc).unwrap();
        mock.fill_input_f32(0, 1, &dc).unwrap();
        mock.fire_block(0).unwrap();
    }
    {
        let mock = engine
            .driver_mut()
            .unwrap()
            .as_any_mut()
            .downcast_mut::<MockDriver>()
            .unwrap();
        assert!((mock.output_f32(0, 0).unwrap()[511] - 0.5).abs() < 1e-6);
    }

    let mut params = gm_engine::NodeParams::new();
    params.insert("filter".into(), "main".into());
    params.insert("param".into(), "g".into());
    params.insert("value".into(), "0.5".into());
    engine.control_message("fx", "update", &params).unwrap();

    // The block after the update ends at the new gain (the ramp settles
    // well within 512 frames).
    {
        let mock = engine
            .driver_mut()
            .unwrap()
            .as_any_mut()
            .downcast_mut::<MockDriver>()
            .unwrap();
        mock.fire_block(1).unwrap();
        assert!((mock.output_f32(0, 1).unwrap()[511] - 0.25).abs() < 1e-3);
    }

    engine.stop().unwrap();
    engine.cleanup().unwrap();
}
