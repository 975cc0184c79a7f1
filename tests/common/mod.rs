#![allow(dead_code)]

use std::sync::Arc;

use klangraum::spatial::ComponentRegistry;
use klangraum::{Engine, EngineConfig, EpochCounter, BLOCK_SIZE};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A device-less stereo engine with its own registry, so tests never share epochs.
pub fn engine() -> Engine {
    engine_with(EngineConfig::new())
}

pub fn engine_with(config: EngineConfig) -> Engine {
    init_tracing();
    let registry = Arc::new(ComponentRegistry::with_builtins(Arc::new(EpochCounter::new())));
    Engine::new(config.no_device(true).registry(registry)).expect("engine")
}

/// Render `blocks` whole blocks and return the interleaved output.
pub fn render_blocks(engine: &Engine, blocks: usize) -> Vec<f32> {
    let mut out = vec![0.0; BLOCK_SIZE * engine.channels() * blocks];
    engine.read(&mut out);
    out
}

pub fn peak(samples: &[f32]) -> f32 {
    samples.iter().fold(0.0f32, |m, s| m.max(s.abs()))
}
