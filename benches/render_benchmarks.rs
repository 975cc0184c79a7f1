use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use klangraum::nodes::Sine;
use klangraum::spatial::ComponentRegistry;
use klangraum::{Engine, EngineConfig, EpochCounter, Mixer, ReverbBus, ReverbPlacement, Vec3, BLOCK_SIZE};

fn engine(hrtf: bool) -> Engine {
    let registry = Arc::new(ComponentRegistry::with_builtins(Arc::new(EpochCounter::new())));
    registry.set_global_hrtf(hrtf).unwrap();
    Engine::new(EngineConfig::new().no_device(true).registry(registry)).unwrap()
}

fn voices(engine: &Engine, count: usize) -> Vec<(Mixer, klangraum::GraphNode)> {
    (0..count)
        .map(|i| {
            let mixer = engine.new_mixer(None).unwrap();
            let tone = engine.add_node(Sine::new(110.0 * (i + 1) as f32, 2)).unwrap();
            tone.attach_output_bus(0, mixer.input(), 0).unwrap();
            let angle = i as f32 * 0.7;
            mixer.set_position_3d(Vec3::new(angle.cos() * 3.0, 0.0, angle.sin() * 3.0));
            (mixer, tone)
        })
        .collect()
}

pub fn criterion_benchmark(c: &mut Criterion) {
    c.bench_function("Sine.process()", |b| {
        let engine = engine(false);
        let tone = engine.add_node(Sine::new(440.0, 2)).unwrap();
        tone.attach_output_bus(0, engine.endpoint(), 0).unwrap();
        let mut out = vec![0.0; BLOCK_SIZE * 2];

        b.iter(|| engine.read(black_box(&mut out)))
    });

    c.bench_function("16 basic voices, one block", |b| {
        let engine = engine(false);
        let _voices = voices(&engine, 16);
        let mut out = vec![0.0; BLOCK_SIZE * 2];

        b.iter(|| engine.read(black_box(&mut out)))
    });

    c.bench_function("16 binaural voices with reverb sends, one block", |b| {
        let engine = engine(true);
        let bus = ReverbBus::new(&engine, None, None).unwrap();
        let voices = voices(&engine, 16);
        for (mixer, _) in &voices {
            mixer.spatializer().set_reverb3d(Some(&bus), ReverbPlacement::PostPan).unwrap();
        }
        let mut out = vec![0.0; BLOCK_SIZE * 2];

        b.iter(|| engine.read(black_box(&mut out)))
    });

    c.bench_function("listener move, 16 voices", |b| {
        let engine = engine(false);
        let _voices = voices(&engine, 16);
        let mut out = vec![0.0; BLOCK_SIZE * 2];
        let mut x = 0.0f32;

        b.iter(|| {
            x += 0.01;
            engine.set_listener_position(0, Vec3::new(x.sin(), 0.0, 0.0)).unwrap();
            engine.read(black_box(&mut out));
        })
    });
}

criterion_group!(benches, criterion_benchmark);
criterion_main!(benches);
