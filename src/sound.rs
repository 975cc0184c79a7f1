//! Sounds: mixers fed by an in-memory sample player.

use std::fmt;
use std::ops::Deref;

use parking_lot::Mutex;

use crate::engine::Engine;
use crate::error::{Error, Result};
use crate::handle::GraphNode;
use crate::mixer::Mixer;
use crate::nodes::{PlayerControl, PlayerMessage, SamplePlayer};

/// A playable clip with its own spatializer.
///
/// Dereferences to its [`Mixer`] for volume, 3D attributes and routing.
pub struct Sound {
    mixer: Mixer,
    player: GraphNode,
    control: Mutex<PlayerControl>,
}

impl Sound {
    /// Load interleaved PCM. The sample rate must match the engine's.
    pub fn from_pcm(engine: &Engine, samples: Vec<f32>, channels: usize, sample_rate: u32) -> Result<Self> {
        if sample_rate != engine.sample_rate() {
            return Err(Error::InvalidParameter(format!(
                "clip sample rate {sample_rate} does not match engine rate {}",
                engine.sample_rate()
            )));
        }
        if channels == 0 {
            return Err(Error::InvalidParameter("clip has no channels".into()));
        }
        Self::with_destination(engine, samples, channels, None)
    }

    /// Like [`from_pcm`](Self::from_pcm) at the engine rate, routed into `destination`.
    pub fn with_destination(
        engine: &Engine,
        samples: Vec<f32>,
        channels: usize,
        destination: Option<&Mixer>,
    ) -> Result<Self> {
        let mixer = Mixer::new(engine, destination)?;
        let (player, control) = SamplePlayer::new(samples, channels, engine.channels());
        let player = engine.add_node(player)?;
        player.attach_output_bus(0, mixer.input(), 0)?;
        Ok(Self {
            mixer,
            player,
            control: Mutex::new(control),
        })
    }

    pub fn mixer(&self) -> &Mixer {
        &self.mixer
    }

    pub fn player(&self) -> &GraphNode {
        &self.player
    }

    fn send(&self, msg: PlayerMessage) -> Result<()> {
        self.control.lock().send(msg).map_err(|_| Error::QueueFull)
    }

    pub fn play(&self) -> Result<()> {
        self.mixer.play();
        self.send(PlayerMessage::Play)
    }

    pub fn pause(&self) -> Result<()> {
        self.send(PlayerMessage::Pause)
    }

    /// Stop and rewind.
    pub fn stop(&self) -> Result<()> {
        self.send(PlayerMessage::Stop)
    }

    pub fn seek(&self, frame: u64) -> Result<()> {
        self.send(PlayerMessage::Seek(frame))
    }

    pub fn set_looping(&self, looping: bool) -> Result<()> {
        self.send(PlayerMessage::SetLooping(looping))
    }

    pub fn is_playing(&self) -> bool {
        self.control.lock().status().is_playing()
    }

    pub fn is_looping(&self) -> bool {
        self.control.lock().status().is_looping()
    }

    /// Playback position in frames, as of the last rendered block.
    pub fn position(&self) -> u64 {
        self.control.lock().status().position()
    }

    pub fn length(&self) -> u64 {
        self.control.lock().frames()
    }
}

impl Deref for Sound {
    type Target = Mixer;

    fn deref(&self) -> &Mixer {
        &self.mixer
    }
}

impl fmt::Debug for Sound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Sound")
            .field("player", &self.player.id())
            .field("mixer", &self.mixer)
            .finish()
    }
}
