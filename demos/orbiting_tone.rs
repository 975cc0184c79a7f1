//! A tone circling the listener, switching to binaural panning halfway through.
//!
//! Run with: cargo run --example orbiting_tone --features cpal_sink

use std::thread::sleep;
use std::time::{Duration, Instant};

use klangraum::nodes::Sine;
use klangraum::{Engine, EngineConfig, ReverbBus, ReverbPlacement, Vec3};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let engine = Engine::new(EngineConfig::new())?;
    if !engine.is_running() {
        return Err("No audio device".into());
    }

    let mixer = engine.new_mixer(None)?;
    let tone = engine.add_node(Sine::new(330.0, engine.channels()).with_amplitude(0.3))?;
    tone.attach_output_bus(0, mixer.input(), 0)?;

    let reverb = ReverbBus::new(&engine, None, None)?;
    mixer.spatializer().set_reverb3d(Some(&reverb), ReverbPlacement::PostPan)?;

    println!("Orbiting... Ctrl+C to stop");
    let start = Instant::now();
    let mut hrtf = false;
    loop {
        let t = start.elapsed().as_secs_f32();
        let radius = 2.0 + (t * 0.2).sin() * 1.5;
        mixer.set_position_3d(Vec3::new((t * 0.8).cos() * radius, 0.0, (t * 0.8).sin() * radius));

        if !hrtf && t > 10.0 {
            println!("Switching to binaural panning");
            engine.registry().set_global_hrtf(true)?;
            hrtf = true;
        }
        sleep(Duration::from_millis(10));
    }
}
