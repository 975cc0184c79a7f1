//! Audio sample player.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use rtrb::{Consumer, Producer, RingBuffer};

use crate::node::{AudioNode, Bus, BusLayout, ProcessContext};
use crate::nodes::silence_bus;

const MESSAGE_CAPACITY: usize = 64;

/// Messages to control a [`SamplePlayer`].
///
/// Send these via [`PlayerControl::send`] to control playback.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PlayerMessage {
    /// Start or resume playback.
    Play,
    /// Pause playback (keeps position).
    Pause,
    /// Stop playback and reset to beginning.
    Stop,
    /// Seek to a position in frames.
    Seek(u64),
    /// Enable or disable looping.
    SetLooping(bool),
}

/// Playback state published by the render thread.
#[derive(Debug, Default)]
pub struct PlayerStatus {
    position: AtomicU64,
    playing: AtomicBool,
    looping: AtomicBool,
}

impl PlayerStatus {
    /// Current position in source frames.
    pub fn position(&self) -> u64 {
        self.position.load(Ordering::Acquire)
    }

    pub fn is_playing(&self) -> bool {
        self.playing.load(Ordering::Acquire)
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Acquire)
    }
}

/// Caller side of a [`SamplePlayer`].
pub struct PlayerControl {
    sender: Producer<PlayerMessage>,
    status: Arc<PlayerStatus>,
    frames: u64,
}

impl PlayerControl {
    /// Queue a message for the next audio block.
    ///
    /// Returns `Err(msg)` if the queue is full.
    pub fn send(&mut self, msg: PlayerMessage) -> Result<(), PlayerMessage> {
        self.sender.push(msg).map_err(|rtrb::PushError::Full(m)| m)
    }

    pub fn status(&self) -> &PlayerStatus {
        &self.status
    }

    /// Length of the loaded audio in frames.
    pub fn frames(&self) -> u64 {
        self.frames
    }
}

/// Plays in-memory interleaved PCM.
///
/// Source channels are mapped onto output channels by wrapping, so a mono clip feeds
/// every output channel. No sample rate conversion is performed.
pub struct SamplePlayer {
    samples: Vec<f32>,
    channels: usize,
    output_channels: usize,
    position: usize,
    playing: bool,
    looping: bool,
    receiver: Consumer<PlayerMessage>,
    status: Arc<PlayerStatus>,
}

impl SamplePlayer {
    /// Create a paused player from interleaved samples, plus its control handle.
    pub fn new(samples: Vec<f32>, channels: usize, output_channels: usize) -> (Self, PlayerControl) {
        let channels = channels.max(1);
        let (sender, receiver) = RingBuffer::new(MESSAGE_CAPACITY);
        let status = Arc::new(PlayerStatus::default());
        let frames = (samples.len() / channels) as u64;
        let player = Self {
            samples,
            channels,
            output_channels,
            position: 0,
            playing: false,
            looping: false,
            receiver,
            status: status.clone(),
        };
        let control = PlayerControl {
            sender,
            status,
            frames,
        };
        (player, control)
    }

    fn handle(&mut self, msg: PlayerMessage) {
        match msg {
            PlayerMessage::Play => self.playing = true,
            PlayerMessage::Pause => self.playing = false,
            PlayerMessage::Stop => {
                self.playing = false;
                self.position = 0;
            }
            PlayerMessage::Seek(frame) => {
                let sample_pos = (frame as usize).saturating_mul(self.channels);
                self.position = sample_pos.min(self.samples.len());
            }
            PlayerMessage::SetLooping(l) => self.looping = l,
        }
    }

    fn publish(&self) {
        self.status
            .position
            .store((self.position / self.channels) as u64, Ordering::Release);
        self.status.playing.store(self.playing, Ordering::Release);
        self.status.looping.store(self.looping, Ordering::Release);
    }
}

impl AudioNode for SamplePlayer {
    fn process(&mut self, _ctx: &ProcessContext, _inputs: &[Bus], outputs: &mut [Bus]) {
        while let Ok(msg) = self.receiver.pop() {
            self.handle(msg);
        }

        let Some(output) = outputs.first_mut() else {
            return;
        };
        silence_bus(output);

        let total_samples = self.samples.len();
        if self.playing && total_samples > 0 {
            let buffer_len = output.first().map_or(0, |b| b.len());
            for i in 0..buffer_len {
                if self.position >= total_samples {
                    if self.looping {
                        self.position = 0;
                    } else {
                        self.playing = false;
                        break;
                    }
                }

                for (ch, buffer) in output.iter_mut().enumerate() {
                    let src_ch = ch % self.channels;
                    buffer[i] = self.samples.get(self.position + src_ch).copied().unwrap_or(0.0);
                }

                self.position += self.channels;
            }
        }

        self.publish();
    }

    fn layout(&self) -> BusLayout {
        BusLayout::source(self.output_channels)
    }

    fn name(&self) -> &'static str {
        "sample_player"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::node::BLOCK_SIZE;

    fn run(player: &mut SamplePlayer) -> Vec<Bus> {
        let mut outputs = player.layout().allocate_outputs();
        let ctx = ProcessContext {
            sample_rate: 48_000,
            buffer_size: BLOCK_SIZE,
            time: 0,
        };
        player.process(&ctx, &[], &mut outputs);
        outputs
    }

    #[test]
    fn mono_clip_feeds_every_channel_and_stops_at_end() {
        let (mut player, mut control) = SamplePlayer::new(vec![0.5; 10], 1, 2);
        control.send(PlayerMessage::Play).unwrap();

        let out = run(&mut player);
        assert_eq!(out[0][0][9], 0.5);
        assert_eq!(out[0][1][9], 0.5);
        assert_eq!(out[0][0][10], 0.0);
        assert!(!control.status().is_playing());
        assert_eq!(control.status().position(), 10);
    }

    #[test]
    fn looping_wraps_and_seek_moves() {
        let samples: Vec<f32> = (0..8).map(|i| i as f32).collect();
        let (mut player, mut control) = SamplePlayer::new(samples, 2, 2);
        control.send(PlayerMessage::SetLooping(true)).unwrap();
        control.send(PlayerMessage::Seek(3)).unwrap();
        control.send(PlayerMessage::Play).unwrap();

        let out = run(&mut player);
        assert_eq!(out[0][0][0], 6.0);
        assert_eq!(out[0][1][0], 7.0);
        assert_eq!(out[0][0][1], 0.0);
        assert!(control.status().is_playing());
        assert_eq!(control.frames(), 4);
    }
}
