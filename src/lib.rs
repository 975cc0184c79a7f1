//! Klangraum - real-time audio node graph with swappable 3D spatialization
//!
//! Overview:
//! - An [`Engine`] owns a node graph, rendered in 64-frame blocks into an endpoint node
//! - Topology changes are made on the caller side and shipped to the renderer through a
//!   lock-free command ring
//! - Every [`Mixer`] carries a [`Spatializer`]: a node chain of listener monitor, panner,
//!   attenuator and an optional send into a shared [`ReverbBus`]
//! - Panners and attenuators come from a [`ComponentRegistry`](spatial::ComponentRegistry)
//!   and are swapped on a background worker, never on the audio thread
//!
//! ```
//! use klangraum::{Engine, EngineConfig, Vec3};
//! use klangraum::nodes::Sine;
//!
//! let engine = Engine::new(EngineConfig::new().no_device(true)).unwrap();
//! let mixer = engine.new_mixer(None).unwrap();
//! let tone = engine.add_node(Sine::new(440.0, engine.channels())).unwrap();
//! tone.attach_output_bus(0, mixer.input(), 0).unwrap();
//! mixer.set_position_3d(Vec3::new(2.0, 0.0, -1.0));
//!
//! let mut out = vec![0.0; 512 * engine.channels()];
//! engine.read(&mut out);
//! ```

mod chain;
pub mod config;
#[cfg(feature = "cpal_sink")]
mod device;
mod engine;
mod error;
mod graph;
mod handle;
mod listener;
mod lockfree;
mod math;
mod mixer;
mod monitor;
mod node;
pub mod nodes;
mod reverb;
mod sound;
pub mod spatial;
mod worker;

pub use chain::{ChainSource, NodeChain};
pub use config::EngineConfig;
pub use engine::Engine;
pub use error::{Error, Result};
pub use handle::{GraphNode, WeakGraphNode};
pub use listener::{Cone, EpochCounter, ListenerSnapshot, Listeners, MAX_LISTENERS};
pub use lockfree::{AtomicParam, AtomicVec3};
pub use math::{db_to_linear, linear_to_db, pan_db_to_linear, pan_linear_to_db, Vec3};
pub use mixer::Mixer;
pub use monitor::MonitorState;
pub use node::{AudioNode, Bus, BusLayout, NodeId, NodeState, ProcessContext, BLOCK_SIZE, MAX_BUSES, MAX_CHANNELS};
pub use reverb::{ReverbBus, ReverbCurve};
pub use sound::Sound;
pub use spatial::{ReverbPlacement, Spatializer};
